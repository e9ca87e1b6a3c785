//! Wire types for the putv JSON-RPC control protocol.
//!
//! Every WebSocket text frame carries exactly one JSON document. Three shapes
//! travel over the socket:
//!
//! ```json
//! {"jsonrpc": "2.0", "method": "status", "params": null, "id": 3}   // request
//! {"id": 3, "result": {"state": "play", "id": 7}}                   // response
//! {"method": "onchange", "params": {"state": "pause"}}              // notification
//! ```
//!
//! Requests are only ever sent by this client; responses and notifications
//! are only ever received. Payload types for the individual methods live in
//! [`capabilities`] and [`status`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod capabilities;
pub mod status;

pub use capabilities::{Action, ActionDescriptor, CapabilitySet, Descriptor, EventDescriptor};
pub use status::{Change, ListQuery, ListRequest, ListResponse, PlaybackState, Position};

/// Protocol version tag carried by every request.
pub const JSONRPC_VERSION: &str = "2.0";

/// An outgoing request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: u64,
}

impl Request {
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// An inbound message, either a response or a notification.
///
/// All fields are optional on the wire. After correlation, `method` holds
/// the method of the request that a response answers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Message {
    /// The request identifier, if it is one this client could have issued.
    #[must_use]
    pub fn request_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }

    /// The payload a handler is invoked with: `result` for responses,
    /// `params` for notifications. JSON `null` counts as absent.
    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        self.result
            .as_ref()
            .filter(|value| !value.is_null())
            .or_else(|| self.params.as_ref().filter(|value| !value.is_null()))
    }
}

/// Request parameters as handed to [`Rpc::send`](crate::rpc::Rpc::send).
///
/// Structured parameters are sent as is; text is parsed as JSON first.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Params {
    #[default]
    None,
    Value(Value),
    Text(String),
}

impl From<Value> for Params {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<String> for Params {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Params {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Option<Value>> for Params {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Self::None, Self::Value)
    }
}

impl Params {
    /// Converts into the JSON value put on the wire.
    ///
    /// # Errors
    ///
    /// Will return `Err` if textual parameters are not valid JSON.
    pub fn into_value(self) -> serde_json::Result<Value> {
        match self {
            Self::None => Ok(Value::Null),
            Self::Value(value) => Ok(value),
            Self::Text(text) => serde_json::from_str(&text),
        }
    }
}
