//! Configuration for the remote control client.
//!
//! A [`Config`] is usually built from defaults and then overridden, either
//! from a TOML file or from command line arguments:
//!
//! ```toml
//! url = "wss://player.local/apps/player"
//! page_size = 10
//! reconnect_delay = 3000
//! ```

use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};
use url::Url;

use crate::error::{Error, Result};

/// Number of list entries requested per page when not configured.
pub const DEFAULT_PAGE_SIZE: u32 = 5;

/// Delay before a dropped connection is retried.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3_000);

/// Interval between `getposition` requests while a duration is known.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

/// Configuration files are tiny; anything larger is a mistake.
const MAX_FILE_SIZE: u64 = 16 * 1024;

#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Either a complete `ws://` or `wss://` URL, or a path that is appended
    /// to the [`origin`](Self::origin).
    pub url: String,

    /// Origin of the page serving the player, used to synthesize the socket
    /// URL when [`url`](Self::url) is only a path.
    pub origin: Option<Url>,

    /// Number of entries per list window (`maxitems`).
    pub page_size: u32,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reconnect_delay: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,

    /// Report every parsed inbound message as [`Event::Message`].
    ///
    /// [`Event::Message`]: crate::events::Event::Message
    pub forward_messages: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: String::new(),
            origin: None,
            page_size: DEFAULT_PAGE_SIZE,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            forward_messages: false,
        }
    }
}

impl Config {
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Loads a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the file cannot be read, is larger than a few
    /// kilobytes, does not parse or holds an invalid page size.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Prevent out-of-memory condition: configuration files should be small.
        let file_size = fs::metadata(path)?.len();
        if file_size > MAX_FILE_SIZE {
            return Err(Error::out_of_range(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        let config = toml::from_str::<Self>(&contents)?;
        config.validate()?;

        trace!("configuration from {}: {config:?}", path.display());
        Ok(config)
    }

    /// Checks invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the page size or any interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::out_of_range("page size must be positive"));
        }

        if self.reconnect_delay.is_zero() || self.poll_interval.is_zero() {
            return Err(Error::out_of_range("intervals must be positive"));
        }

        Ok(())
    }
}
