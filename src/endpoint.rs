//! Control socket endpoint resolution.
//!
//! The player may be configured with a complete socket URL, or with just a
//! path that lives next to the page serving the player. In the latter case
//! the socket URL is synthesized from the page origin:
//!
//! | Origin scheme | Socket scheme |
//! |---------------|---------------|
//! | `http`        | `ws`          |
//! | `https`       | `wss`         |

use std::fmt;

use url::Url;

use crate::error::{Error, Result};

/// A resolved WebSocket URL.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Endpoint(Url);

impl Endpoint {
    const INSECURE: &'static str = "ws";
    const SECURE: &'static str = "wss";

    /// Resolves `url` into a socket endpoint.
    ///
    /// If `url` already carries a `ws://` or `wss://` scheme it is used as
    /// is and `origin` is ignored. Otherwise `url` is treated as a path
    /// suffix on `origin`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - `url` is a socket URL that does not parse
    /// - `url` is a path and no `origin` was given
    /// - `origin` is neither `http` nor `https`, or has no host
    pub fn resolve(url: &str, origin: Option<&Url>) -> Result<Self> {
        if Self::has_socket_scheme(url) {
            let url = Url::parse(url)?;
            return Ok(Self(url));
        }

        let origin = origin.ok_or_else(|| {
            Error::invalid_argument(format!("{url} is not a socket url and no origin is set"))
        })?;

        let scheme = match origin.scheme() {
            "http" => Self::INSECURE,
            "https" => Self::SECURE,
            other => {
                return Err(Error::invalid_argument(format!(
                    "cannot derive socket scheme from {other}"
                )))
            }
        };

        let host = origin
            .host_str()
            .ok_or_else(|| Error::invalid_argument(format!("{origin} has no host")))?;

        let path = url.trim_start_matches('/');
        let synthesized = match origin.port() {
            Some(port) => format!("{scheme}://{host}:{port}/{path}"),
            None => format!("{scheme}://{host}/{path}"),
        };

        let url = Url::parse(&synthesized)?;
        Ok(Self(url))
    }

    fn has_socket_scheme(url: &str) -> bool {
        url.split_once("://").is_some_and(|(scheme, _)| {
            scheme.eq_ignore_ascii_case(Self::INSECURE) || scheme.eq_ignore_ascii_case(Self::SECURE)
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
