//! Error handling for putv-remote.
//!
//! Errors carry a category based on gRPC status codes plus the underlying
//! error that caused them. Only setup paths return errors: resolving an
//! endpoint, loading configuration and encoding request parameters. Once a
//! connection is running, failures end in a log line or an application
//! event instead.
//!
//! # Example
//!
//! ```rust
//! use putv_remote::error::{Error, ErrorKind, Result};
//!
//! fn page_size(value: u32) -> Result<u32> {
//!     if value == 0 {
//!         return Err(Error::out_of_range("page size must be positive"));
//!     }
//!     Ok(value)
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

/// Standard result type for putv-remote operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories based on gRPC status codes.
///
/// See [gRPC status codes](https://github.com/googleapis/googleapis/blob/master/google/rpc/code.proto)
/// for the original definitions.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum ErrorKind {
    /// The operation was cancelled, typically by the peer closing.
    #[error("operation was cancelled")]
    Cancelled = 1,

    /// Anything that does not fit another category.
    #[error("unknown error")]
    Unknown = 2,

    /// Malformed endpoint, configuration or request parameters.
    #[error("invalid argument specified")]
    InvalidArgument = 3,

    /// A timer or handshake ran out of time.
    #[error("operation timed out")]
    DeadlineExceeded = 4,

    /// A file or resource does not exist.
    #[error("not found")]
    NotFound = 5,

    /// The operation was refused.
    #[error("permission denied")]
    PermissionDenied = 7,

    /// A buffer or size limit was hit.
    #[error("resource has been exhausted")]
    ResourceExhausted = 8,

    /// The connection is not in a state that allows the operation.
    #[error("invalid state")]
    FailedPrecondition = 9,

    /// The connection was reset underneath an operation.
    #[error("operation aborted")]
    Aborted = 10,

    /// A value exceeds its allowed bounds.
    #[error("out of range")]
    OutOfRange = 11,

    /// Bug in this crate.
    #[error("internal error")]
    Internal = 13,

    /// The control socket cannot be reached or is not open.
    #[error("service unavailable")]
    Unavailable = 14,

    /// Frames were lost or truncated on the wire.
    #[error("unrecoverable data loss or corruption")]
    DataLoss = 15,
}

impl Error {
    /// Creates a new error with specified kind and details.
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// Creates an error for operations reset by the transport.
    pub fn aborted<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Aborted, error)
    }

    /// Creates an error for operations cancelled before completion, such as
    /// a socket closed by the server.
    pub fn cancelled<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Cancelled, error)
    }

    /// Creates an error for truncated or corrupted transport data.
    pub fn data_loss<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::DataLoss, error)
    }

    /// Creates an error for operations that exceeded their deadline.
    pub fn deadline_exceeded<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::DeadlineExceeded, error)
    }

    /// Creates an error for operations that cannot proceed in the current
    /// connection state.
    pub fn failed_precondition<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::FailedPrecondition, error)
    }


    /// Creates an error for arguments that fail validation.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::invalid_argument("endpoint scheme must be http or https");
    /// assert_eq!(err.kind, ErrorKind::InvalidArgument);
    /// ```
    pub fn invalid_argument<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidArgument, error)
    }

    /// Creates an error for missing files or resources.
    pub fn not_found<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NotFound, error)
    }

    /// Creates an error for values outside their valid range.
    pub fn out_of_range<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::OutOfRange, error)
    }

    /// Creates an error for refused operations.
    pub fn permission_denied<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::PermissionDenied, error)
    }

    /// Creates an error for exhausted buffers or limits.
    pub fn resource_exhausted<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::ResourceExhausted, error)
    }

    /// Creates an error for a control socket that cannot be used.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::unavailable("websocket is not open");
    /// assert_eq!(err.kind, ErrorKind::Unavailable);
    /// ```
    pub fn unavailable<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unavailable, error)
    }

    /// Creates an error that does not fit any other category.
    pub fn unknown<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unknown, error)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error as "{kind}: {details}".
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Maps IO errors onto their logical equivalents.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_found(err),
            PermissionDenied => Self::permission_denied(err),
            AddrNotAvailable | ConnectionRefused | NotConnected => Self::unavailable(err),
            BrokenPipe | ConnectionReset | ConnectionAborted => Self::aborted(err),
            Interrupted | WouldBlock => Self::cancelled(err),
            UnexpectedEof => Self::data_loss(err),
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            WriteZero => Self::resource_exhausted(err),
            _ => Self::unknown(err),
        }
    }
}

/// Maps WebSocket errors based on their type:
/// * `ConnectionClosed` -> `Cancelled`
/// * `AlreadyClosed` -> `FailedPrecondition`
/// * `Io` -> `Unavailable`
/// * `Capacity` -> `OutOfRange`
/// * `Url` -> `InvalidArgument`
impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error::*;
        match err {
            ConnectionClosed => Self::cancelled(err),
            AlreadyClosed => Self::failed_precondition(err),
            Io(_) => Self::unavailable(err),
            Capacity(_) => Self::out_of_range(err),
            Url(_) => Self::invalid_argument(err),
            AttackAttempt => Self::permission_denied(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts JSON errors through IO error mapping.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        std::io::Error::from(err).into()
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}
