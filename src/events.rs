//! Events emitted by the player while it follows a remote putv server.
//!
//! The [`Player`](crate::player::Player) never talks to a user interface
//! directly. Everything it learns from the server is reported as an
//! [`Event`] over an unbounded channel, so that a UI adapter such as
//! [`PlayerCmd`](crate::cmdbar::PlayerCmd) can render it.
//!
//! # Example
//!
//! ```rust
//! use putv_remote::events::Event;
//!
//! fn handle_event(event: &Event) {
//!     match event {
//!         Event::Connected => println!("connected"),
//!         Event::StateChanged { state, .. } => println!("now {state}"),
//!         Event::Disconnected => println!("connection lost"),
//!         _ => {}
//!     }
//! }
//! ```

use serde_json::Value;

use crate::protocol::{ActionDescriptor, Message, PlaybackState, Request};

/// Events that can be emitted by the player.
///
/// Connection events:
/// * [`Connected`](Self::Connected) - The socket opened
/// * [`Disconnected`](Self::Disconnected) - The socket closed
///
/// State events mirror the partial updates the server pushes. Identifiers
/// are track identifiers as reported by the server; -1 means "none".
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// The control socket is open. Capabilities are being negotiated.
    Connected,

    /// The control socket closed. State is stale until the next
    /// [`Connected`](Self::Connected).
    Disconnected,

    StateChanged {
        id: Option<i64>,
        state: PlaybackState,
    },

    /// Playback progress. A zero `duration` means nothing is playing or
    /// playback ended; an `id` of -1 marks the end of the stream.
    DurationChanged {
        id: Option<i64>,
        position: f64,
        duration: f64,
    },

    MediaChanged {
        id: Option<i64>,
        media: Value,
    },

    InfoChanged {
        id: Option<i64>,
        info: Value,
    },

    /// Option names; disabled options are prefixed with `!`.
    OptionsChanged {
        id: Option<i64>,
        options: Vec<String>,
    },

    NextChanged(i64),

    VolumeChanged(Option<i64>),

    ListChanged {
        playlist: Vec<Value>,
        count: u64,
    },

    /// The server acknowledged a `setinfo` request.
    InfoSaved(Option<Value>),

    /// Notifications the server announced during negotiation.
    EventsAnnounced(Vec<String>),

    /// Requests the server accepts, as announced during negotiation.
    ActionsAnnounced(Vec<ActionDescriptor>),

    /// The server answered with an error.
    Error {
        error: Value,
        request: Option<Request>,
    },

    /// Any parsed inbound message. Only emitted when enabled in the
    /// configuration.
    Message(Message),
}
