//! Method name to handler resolution.
//!
//! Inbound messages name a method; the [`Dispatcher`] maps that name onto
//! one of a closed set of handler [`Slot`]s. Slots are registered when
//! capabilities are negotiated, so a method the server never advertised
//! simply does not resolve and its messages are dropped.

use std::collections::HashMap;

/// Handlers a method can be routed to.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum Slot {
    /// Capability descriptor.
    Capabilities,
    /// Partial state update.
    Change,
    /// Playback state after a transport command.
    State,
    /// Next track.
    Next,
    /// List window.
    List,
    /// Option toggles.
    Options,
    /// Filter applied; the list needs refreshing.
    Filter,
    /// Track information.
    Info,
    /// Track information saved.
    SetInfo,
    /// Volume level.
    Volume,
    /// Playback position.
    Position,
}

/// Method names that resolve regardless of negotiated capabilities.
const PERMANENT: [(&str, Slot); 3] = [
    ("capabilities", Slot::Capabilities),
    ("onchange", Slot::Change),
    ("getposition", Slot::Position),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dispatcher {
    slots: HashMap<String, Slot>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        let mut dispatcher = Self {
            slots: HashMap::new(),
        };
        dispatcher.reset();
        dispatcher
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `method` to `slot`, replacing any earlier route.
    pub fn register(&mut self, method: impl Into<String>, slot: Slot) {
        let method = method.into();
        trace!("routing {method} to {slot:?}");
        self.slots.insert(method, slot);
    }

    #[must_use]
    pub fn resolve(&self, method: &str) -> Option<Slot> {
        self.slots.get(method).copied()
    }

    /// Drops all negotiated routes, keeping only the permanent ones.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.slots.extend(
            PERMANENT
                .iter()
                .map(|(method, slot)| ((*method).to_owned(), *slot)),
        );
    }
}
