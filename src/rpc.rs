//! JSON-RPC codec and response correlator.
//!
//! [`Rpc`] does no I/O. Encoded requests are queued in an outbox that the
//! owner flushes to the socket, and inbound text is handed to
//! [`Rpc::receive`] which parses it and matches responses to the requests
//! they answer.
//!
//! # Identifiers
//!
//! Request identifiers start at 0 and increase by one for every request that
//! is actually queued for transmission. They are never reused by the same
//! `Rpc`, including across reconnects: [`Rpc::reset`] drops the pending
//! requests but keeps counting. Only a new `Rpc` starts from 0 again.
//!
//! # Readiness
//!
//! While the connection is not open, [`Rpc::send`] is a no-op: nothing is
//! queued, no identifier is consumed and the pending table is left alone.

use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
};

use serde_json::Value;

use crate::{
    error::{Error, Result},
    protocol::{Message, Params, Request},
};

/// Continuation for a single request, invoked at most once with the
/// response `result` when it arrives.
pub type Respond = Box<dyn FnOnce(Option<&Value>) + Send>;

struct Pending {
    request: Request,
    respond: Option<Respond>,
}

/// A parsed inbound message together with what was asked, if it answers a
/// pending request.
pub struct Inbound {
    pub message: Message,
    pub request: Option<Request>,
    pub respond: Option<Respond>,
}

impl fmt::Debug for Inbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbound")
            .field("message", &self.message)
            .field("request", &self.request)
            .field("respond", &self.respond.is_some())
            .finish()
    }
}

#[derive(Default)]
pub struct Rpc {
    next_id: u64,
    open: bool,
    // Identifiers only increase, so key order is insertion order.
    pending: BTreeMap<u64, Pending>,
    outbox: VecDeque<String>,
}

impl fmt::Debug for Rpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rpc")
            .field("next_id", &self.next_id)
            .field("open", &self.open)
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .field("outbox", &self.outbox.len())
            .finish()
    }
}

impl Rpc {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn set_open(&mut self, open: bool) {
        self.open = open;
    }

    /// Closes the session: pending requests are discarded, not retried, and
    /// anything still in the outbox is dropped.
    pub fn reset(&mut self) {
        self.open = false;

        if !self.pending.is_empty() {
            debug!("discarding {} pending requests", self.pending.len());
            self.pending.clear();
        }

        self.outbox.clear();
    }

    /// The identifier the next queued request will get.
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Returns the request that is still waiting for a response with `id`.
    #[must_use]
    pub fn pending(&self, id: u64) -> Option<&Request> {
        self.pending.get(&id).map(|pending| &pending.request)
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Encodes a request and queues it for transmission.
    ///
    /// Returns the identifier assigned to the request, or `None` when the
    /// connection is not open and nothing was queued.
    ///
    /// # Errors
    ///
    /// Will return `Err` if textual `params` are not valid JSON. Nothing is
    /// queued and no identifier is consumed in that case.
    pub fn send(
        &mut self,
        method: &str,
        params: impl Into<Params>,
        respond: Option<Respond>,
    ) -> Result<Option<u64>> {
        let params = params.into().into_value().map_err(|e| {
            Error::invalid_argument(format!("invalid parameters for {method}: {e}"))
        })?;

        if !self.open {
            debug!("not connected, dropping {method}");
            return Ok(None);
        }

        let id = self.next_id;
        let request = Request::new(id, method, params);
        let text = serde_json::to_string(&request)?;
        trace!("send: {text}");

        self.outbox.push_back(text);
        self.pending.insert(id, Pending { request, respond });
        self.next_id += 1;

        Ok(Some(id))
    }

    /// Takes all queued frames in the order they were sent.
    pub fn drain_outbox(&mut self) -> impl Iterator<Item = String> + '_ {
        self.outbox.drain(..)
    }

    /// Parses one inbound frame and correlates it with a pending request.
    ///
    /// Returns `None` for frames that are not a JSON object; these are
    /// logged and leave all state untouched. A response whose identifier
    /// does not match a pending request is returned uncorrelated.
    pub fn receive(&mut self, text: &str) -> Option<Inbound> {
        let mut message = match serde_json::from_str::<Message>(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("ignoring malformed message: {e}");
                trace!("recv: {text}");
                return None;
            }
        };
        trace!("recv: {text}");

        let mut inbound = Inbound {
            message: Message::default(),
            request: None,
            respond: None,
        };

        if let Some(id) = message.id.clone() {
            match message.request_id().and_then(|id| self.pending.remove(&id)) {
                Some(Pending { request, respond }) => {
                    message.method = Some(request.method.clone());
                    inbound.request = Some(request);
                    inbound.respond = respond;
                }
                None => warn!("no pending request with id {id}"),
            }
        }

        inbound.message = message;
        Some(inbound)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use serde_json::json;

    use super::*;

    /// Test-only shim for the removed `Message::is_notification` (SPEC:
    /// a notification has a `method` and no `id`).
    trait IsNotification {
        fn is_notification(&self) -> bool;
    }

    impl IsNotification for crate::protocol::Message {
        fn is_notification(&self) -> bool {
            self.id.is_none() && self.method.is_some()
        }
    }

    fn open() -> Rpc {
        let mut rpc = Rpc::new();
        rpc.set_open(true);
        rpc
    }

    #[test]
    fn identifiers_increase_from_zero() {
        let mut rpc = open();
        assert_eq!(rpc.send("capabilities", Params::None, None).unwrap(), Some(0));
        assert_eq!(rpc.send("status", Params::None, None).unwrap(), Some(1));
        assert_eq!(rpc.send("list", json!({"maxitems": 5, "first": 0}), None).unwrap(), Some(2));
        assert_eq!(rpc.pending_len(), 3);

        let frames: Vec<String> = rpc.drain_outbox().collect();
        assert_eq!(frames.len(), 3);
        let first: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(first["method"], "capabilities");
        assert_eq!(first["id"], 0);
        assert_eq!(first["jsonrpc"], "2.0");
    }

    #[test]
    fn sending_while_closed_is_a_no_op() {
        let mut rpc = Rpc::new();
        assert_eq!(rpc.send("play", Params::None, None).unwrap(), None);
        assert_eq!(rpc.pending_len(), 0);
        assert_eq!(rpc.next_id(), 0);
        assert_eq!(rpc.drain_outbox().count(), 0);
    }

    #[test]
    fn invalid_text_params_abort_the_send() {
        let mut rpc = open();
        assert!(rpc.send("filter", "{not json", None).is_err());
        assert_eq!(rpc.next_id(), 0);
        assert_eq!(rpc.pending_len(), 0);

        assert_eq!(rpc.send("filter", r#"{"keyword":"jazz"}"#, None).unwrap(), Some(0));
        assert_eq!(rpc.pending(0).unwrap().params, json!({"keyword": "jazz"}));
    }

    #[test]
    fn responses_match_their_request_once() {
        let mut rpc = open();
        rpc.send("status", Params::None, None).unwrap();
        rpc.send("list", json!({"maxitems": 5, "first": 0}), None).unwrap();

        let inbound = rpc.receive(r#"{"id":1,"result":{"count":0}}"#).unwrap();
        assert_eq!(inbound.message.method.as_deref(), Some("list"));
        assert_eq!(inbound.request.as_ref().map(|r| r.id), Some(1));
        assert!(rpc.pending(1).is_none());
        assert!(rpc.pending(0).is_some());

        // A duplicate answer no longer correlates.
        let duplicate = rpc.receive(r#"{"id":1,"result":{"count":0}}"#).unwrap();
        assert!(duplicate.request.is_none());
        assert!(duplicate.message.method.is_none());
        assert_eq!(rpc.pending_len(), 1);
    }

    #[test]
    fn unmatched_identifiers_are_dropped() {
        let mut rpc = open();
        rpc.send("status", Params::None, None).unwrap();

        let inbound = rpc.receive(r#"{"id":42,"result":{}}"#).unwrap();
        assert!(inbound.request.is_none());
        assert_eq!(rpc.pending_len(), 1);
    }

    #[test]
    fn malformed_frames_leave_state_alone() {
        let mut rpc = open();
        rpc.send("status", Params::None, None).unwrap();

        assert!(rpc.receive("{\"id\":0,").is_none());
        assert!(rpc.receive("[1,2,3]").is_none());
        assert!(rpc.receive("").is_none());
        assert_eq!(rpc.pending_len(), 1);
        assert_eq!(rpc.next_id(), 1);
    }

    #[test]
    fn continuation_travels_with_its_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);

        let mut rpc = open();
        rpc.send("play", Params::None, None).unwrap();
        rpc.send(
            "status",
            Params::None,
            Some(Box::new(move |result| {
                assert_eq!(result, Some(&json!({"state": "play"})));
                seen.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

        let play = rpc.receive(r#"{"id":0,"result":{"state":"play"}}"#).unwrap();
        assert!(play.respond.is_none());

        let status = rpc.receive(r#"{"id":1,"result":{"state":"play"}}"#).unwrap();
        let respond = status.respond.unwrap();
        respond(status.message.result.as_ref());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_discards_pending_but_keeps_counting() {
        let mut rpc = open();
        rpc.send("status", Params::None, None).unwrap();
        rpc.send("list", Params::None, None).unwrap();

        rpc.reset();
        assert!(!rpc.is_open());
        assert_eq!(rpc.pending_len(), 0);
        assert_eq!(rpc.drain_outbox().count(), 0);

        rpc.set_open(true);
        assert_eq!(rpc.send("capabilities", Params::None, None).unwrap(), Some(2));
    }

    #[test]
    fn notifications_pass_through() {
        let mut rpc = open();
        let inbound = rpc
            .receive(r#"{"method":"onchange","params":{"state":"pause"}}"#)
            .unwrap();
        assert!(inbound.message.is_notification());
        assert!(inbound.request.is_none());
    }
}
