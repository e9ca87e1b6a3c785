//! Capability negotiation payloads.
//!
//! Right after connecting, the client asks the server which notifications it
//! may emit and which requests it accepts:
//!
//! ```json
//! {
//!     "events": [{"method": "onchange"}],
//!     "actions": [
//!         {"method": "play"},
//!         {"method": "options", "params": ["random", "loop"]},
//!         {"method": "list"}
//!     ]
//! }
//! ```

use std::{collections::HashSet, convert::Infallible, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DeserializeFromStr, SerializeDisplay};

/// Methods a putv server may accept.
#[derive(Clone, Debug, Hash, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
pub enum Action {
    Append,
    Capabilities,
    Change,
    Filter,
    GetPosition,
    Info,
    List,
    Next,
    Options,
    Pause,
    Play,
    Remove,
    SetInfo,
    SetNext,
    Status,
    Stop,
    Volume,

    /// A method this client does not know about.
    Other(String),
}

impl Action {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Append => "append",
            Self::Capabilities => "capabilities",
            Self::Change => "change",
            Self::Filter => "filter",
            Self::GetPosition => "getposition",
            Self::Info => "info",
            Self::List => "list",
            Self::Next => "next",
            Self::Options => "options",
            Self::Pause => "pause",
            Self::Play => "play",
            Self::Remove => "remove",
            Self::SetInfo => "setinfo",
            Self::SetNext => "setnext",
            Self::Status => "status",
            Self::Stop => "stop",
            Self::Volume => "volume",
            Self::Other(method) => method,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s {
            "append" => Self::Append,
            "capabilities" => Self::Capabilities,
            "change" => Self::Change,
            "filter" => Self::Filter,
            "getposition" => Self::GetPosition,
            "info" => Self::Info,
            "list" => Self::List,
            "next" => Self::Next,
            "options" => Self::Options,
            "pause" => Self::Pause,
            "play" => Self::Play,
            "remove" => Self::Remove,
            "setinfo" => Self::SetInfo,
            "setnext" => Self::SetNext,
            "status" => Self::Status,
            "stop" => Self::Stop,
            "volume" => Self::Volume,
            other => Self::Other(other.to_owned()),
        };

        Ok(action)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub method: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub method: Action,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ActionDescriptor {
    /// Names of the parameters the action accepts, for actions that list
    /// them as an array of strings.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(Value::as_str)
    }
}

/// The server's answer to a `capabilities` request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(default)]
    pub events: Vec<EventDescriptor>,

    #[serde(default)]
    pub actions: Vec<ActionDescriptor>,
}

/// Capabilities negotiated for the current connection.
///
/// Computed once from a [`Descriptor`] and consulted before any gated
/// command is issued. Empty until negotiation completes, and cleared again
/// when the connection drops.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    actions: HashSet<Action>,
    events: HashSet<String>,
}

impl CapabilitySet {
    #[must_use]
    pub fn contains(&self, action: &Action) -> bool {
        self.actions.contains(action)
    }

    #[must_use]
    pub fn contains_any(&self, actions: &[Action]) -> bool {
        actions.iter().any(|action| self.contains(action))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
        self.events.clear();
    }
}

impl From<&Descriptor> for CapabilitySet {
    fn from(descriptor: &Descriptor) -> Self {
        Self {
            actions: descriptor
                .actions
                .iter()
                .map(|action| action.method.clone())
                .collect(),
            events: descriptor
                .events
                .iter()
                .map(|event| event.method.clone())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn known_and_unknown_actions() {
        assert_eq!("getposition".parse::<Action>(), Ok(Action::GetPosition));
        assert_eq!(
            "eject".parse::<Action>(),
            Ok(Action::Other("eject".to_owned()))
        );
        assert_eq!(Action::SetNext.to_string(), "setnext");
    }

    #[test]
    fn parses_descriptor() {
        let descriptor: Descriptor = serde_json::from_value(json!({
            "events": [{"method": "onchange"}],
            "actions": [
                {"method": "pause"},
                {"method": "options", "params": ["random", "loop"]},
                {"method": "eject"}
            ]
        }))
        .unwrap();

        assert_eq!(descriptor.actions.len(), 3);
        let options = &descriptor.actions[1];
        assert_eq!(options.param_names().collect::<Vec<_>>(), ["random", "loop"]);

        let set = CapabilitySet::from(&descriptor);
        assert!(set.contains(&Action::Pause));
        assert!(set.contains_any(&[Action::Play, Action::Pause]));
        assert!(!set.contains(&Action::List));
        assert!(!set.is_empty());
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let descriptor: Descriptor = serde_json::from_value(json!({})).unwrap();
        assert!(CapabilitySet::from(&descriptor).is_empty());
    }

    #[test]
    fn non_list_params_have_no_names() {
        let action: ActionDescriptor =
            serde_json::from_value(json!({"method": "append", "params": "[]"})).unwrap();
        assert_eq!(action.param_names().count(), 0);
    }
}
