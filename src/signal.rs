//! System signal handling for graceful shutdown and reconnection.
//!
//! * Unix: SIGTERM, SIGHUP, and Ctrl-C (SIGINT)
//! * Windows: Ctrl-C only
//!
//! # Example
//!
//! ```no_run
//! use putv_remote::signal::{Handler, Signal};
//!
//! async fn example() {
//!     let mut signals = Handler::new().unwrap();
//!
//!     match signals.recv().await {
//!         Signal::Interrupt | Signal::Terminate => println!("shutting down"),
//!         Signal::Reconnect => println!("reconnecting"),
//!     }
//! }
//! ```

use std::fmt;

use crate::error::Result;

#[cfg(unix)]
use tokio::signal::unix::{self, SignalKind};

/// Signal that asks the client to stop or to reconnect.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Signal {
    /// Interrupt signal (Ctrl-C/SIGINT)
    Interrupt,
    /// Termination signal (SIGTERM)
    Terminate,
    /// Hangup signal (SIGHUP): drop the connection and connect again
    Reconnect,
}

impl Signal {
    #[must_use]
    pub fn is_shutdown(self) -> bool {
        matches!(self, Self::Interrupt | Self::Terminate)
    }
}

/// Listens for system signals.
pub struct Handler {
    #[cfg(unix)]
    sigterm: unix::Signal,
    #[cfg(unix)]
    sighup: unix::Signal,
}

impl Handler {
    /// Creates a new signal handler.
    ///
    /// # Errors
    ///
    /// Returns error if signal handlers cannot be registered.
    pub fn new() -> Result<Self> {
        #[cfg(unix)]
        {
            Ok(Self {
                sigterm: unix::signal(SignalKind::terminate())?,
                sighup: unix::signal(SignalKind::hangup())?,
            })
        }

        #[cfg(not(unix))]
        Ok(Self {})
    }

    /// Waits for the next signal.
    ///
    /// On Windows, this only waits for Ctrl-C and always returns
    /// [`Signal::Interrupt`].
    pub async fn recv(&mut self) -> Signal {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => Signal::Interrupt,
                _ = self.sigterm.recv() => Signal::Terminate,
                _ = self.sighup.recv() => Signal::Reconnect,
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            Signal::Interrupt
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => write!(f, "Ctrl+C"),
            Signal::Terminate => write!(f, "SIGTERM"),
            Signal::Reconnect => write!(f, "SIGHUP"),
        }
    }
}
