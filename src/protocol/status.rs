//! Player state payloads.
//!
//! The server pushes partial state deltas: any subset of the fields of
//! [`Change`] may be present in a `status` or `change` response, or in an
//! `onchange` notification. Absent fields mean "unchanged", not "cleared".

use std::{convert::Infallible, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{serde_as, DefaultOnError, DeserializeFromStr, SerializeDisplay};

/// Playback status as reported by the server.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
pub enum PlaybackState {
    Play,
    Pause,
    #[default]
    Stop,

    /// Not a server state: the connection to the server was lost.
    Disconnected,

    Other(String),
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Play => f.write_str("play"),
            Self::Pause => f.write_str("pause"),
            Self::Stop => f.write_str("stop"),
            Self::Disconnected => f.write_str("disconnect"),
            Self::Other(state) => f.write_str(state),
        }
    }
}

impl FromStr for PlaybackState {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s {
            "play" => Self::Play,
            "pause" => Self::Pause,
            "stop" => Self::Stop,
            "disconnect" => Self::Disconnected,
            other => Self::Other(other.to_owned()),
        };

        Ok(state)
    }
}

/// A partial player state update.
///
/// Fields are read independently: one with an unexpected type is treated
/// as absent and does not discard the others.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Change {
    /// Identifier of the current track, or -1 when there is none.
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub id: Option<i64>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub state: Option<PlaybackState>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub duration: Option<f64>,
    pub media: Option<Value>,
    pub info: Option<Value>,
    pub options: Option<Value>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub next: Option<i64>,
    pub volume: Option<Value>,
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub level: Option<i64>,
    pub message: Option<Value>,
}

impl Change {
    /// The duration, if it is present and non-zero.
    #[must_use]
    pub fn known_duration(&self) -> Option<f64> {
        self.duration.filter(|duration| *duration != 0.0 && !duration.is_nan())
    }

    /// The volume level, from `level` or a numeric `volume`.
    #[must_use]
    pub fn volume_level(&self) -> Option<i64> {
        self.level
            .or_else(|| self.volume.as_ref().and_then(Value::as_i64))
    }

    #[must_use]
    pub fn has_volume(&self) -> bool {
        self.volume.is_some() || self.level.is_some()
    }

    /// Options as a normalized list, if present.
    #[must_use]
    pub fn normalized_options(&self) -> Option<Vec<String>> {
        self.options.as_ref().map(normalize_options)
    }
}

/// Answer to a `getposition` request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Position {
    pub position: Option<f64>,
    pub duration: Option<f64>,
}

impl Position {
    /// A negative or missing position means playback has ended.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        !self.position.is_some_and(|position| position >= 0.0)
    }
}

/// Parameters of a `list` request: a window of `maxitems` entries starting
/// at `first`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListRequest {
    pub maxitems: u32,
    pub first: u64,
}

impl ListRequest {
    /// The window of `maxitems` entries that contains entry `id`.
    #[must_use]
    pub fn page_of(id: u64, maxitems: u32) -> Self {
        let page = u64::from(maxitems.max(1));
        Self {
            maxitems,
            first: id - (id % page),
        }
    }
}

/// Caller-side list query where every field may be left to defaults.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    pub maxitems: Option<u32>,
    pub first: Option<u64>,

    /// Request the window containing this entry instead of `first`.
    pub id: Option<u64>,
}

impl ListQuery {
    /// Fills missing fields: `maxitems` from `page_size`, `first` from the
    /// window containing `id`, or 0.
    #[must_use]
    pub fn resolve(self, page_size: u32) -> ListRequest {
        let maxitems = self.maxitems.filter(|items| *items > 0).unwrap_or(page_size);
        match (self.first, self.id) {
            (Some(first), _) => ListRequest { maxitems, first },
            (None, Some(id)) => ListRequest::page_of(id, maxitems),
            (None, None) => ListRequest { maxitems, first: 0 },
        }
    }
}

/// Answer to a `list` request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListResponse {
    pub playlist: Vec<Value>,
    pub count: u64,
}

/// Normalizes an options payload into a list of names.
///
/// A map of booleans becomes a list where disabled options are prefixed
/// with `!`; entries that are not booleans are skipped. A list of names is
/// passed through.
#[must_use]
pub fn normalize_options(options: &Value) -> Vec<String> {
    match options {
        Value::Object(map) => normalize_option_map(map),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .map(ToOwned::to_owned)
            .collect(),
        _ => Vec::new(),
    }
}

fn normalize_option_map(map: &Map<String, Value>) -> Vec<String> {
    map.iter()
        .filter_map(|(name, enabled)| match enabled {
            Value::Bool(true) => Some(name.clone()),
            Value::Bool(false) => Some(format!("!{name}")),
            _ => None,
        })
        .collect()
}
