//! Player state synchronization with a remote putv server.
//!
//! The [`Player`] is the session context of a connection. It:
//! * negotiates capabilities when the socket opens and routes the
//!   advertised methods to its handlers
//! * folds the partial state updates pushed by the server into a
//!   [`PlayerState`] cache and reports them as [`Event`]s
//! * issues follow-up requests: the list window around the playing entry,
//!   and `getposition` once per poll interval while a duration is known
//! * gates client commands on the negotiated [`CapabilitySet`]
//!
//! The player does no I/O. Requests end up in the outbox of its [`Rpc`],
//! which the [`Client`](crate::remote::Client) flushes to the socket, and
//! the client feeds inbound frames to [`Player::receive`].

use std::{fmt, future, str::FromStr, time::Duration};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::{
    sync::mpsc,
    time::{self, Instant, Interval, MissedTickBehavior},
};

use crate::{
    config::Config,
    dispatch::{Dispatcher, Slot},
    error::Error,
    events::Event,
    protocol::{
        Action, CapabilitySet, Change, Descriptor, ListQuery, ListRequest, ListResponse, Params,
        PlaybackState, Position, Request,
    },
    rpc::{Inbound, Respond, Rpc},
};

/// Last known state of the remote player.
///
/// Everything in here is a best-effort cache: the server is the source of
/// truth, and after a reconnect the cache is stale until refreshed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlayerState {
    pub id: Option<i64>,
    pub state: PlaybackState,
    pub duration: Option<f64>,
    pub position: Option<f64>,
    pub media: Option<Value>,
    pub info: Option<Value>,
    pub options: Vec<String>,
    pub next: Option<i64>,
    pub volume: Option<i64>,
    pub list: Option<ListWindow>,
}

/// The list window last received from the server.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListWindow {
    pub cursor: Option<ListRequest>,
    pub playlist: Vec<Value>,
    pub count: u64,
}

/// Commands an application can issue to the remote player.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Stop,
    Next,
    /// Change the volume by a step, or query it.
    Volume(Option<i64>),
    Shuffle(bool),
    Repeat(bool),
    Filter(Value),
    /// Either `{"next": id}` to queue a track or `{"media": ...}` to change
    /// the media.
    Change(Value),
    /// Information about a track, or the player status.
    About(Option<i64>),
    List(ListQuery),
    /// Negotiate capabilities again.
    Load,
    /// Follow a different player. Handled by the client.
    ChangePlayer(String),
    /// Drop the connection and connect again. Handled by the client.
    Reconnect,
    /// Close the connection and end the client loop. Handled by the client.
    Quit,
}

impl FromStr for Command {
    type Err = Error;

    /// Parses console commands such as `random on`, `volume up` or
    /// `about 12`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let argument = words.next();

        let toggle = |argument: Option<&str>| match argument {
            Some("on") => Ok(true),
            Some("off") => Ok(false),
            _ => Err(Error::invalid_argument(format!("{verb} needs on or off"))),
        };

        let command = match (verb, argument) {
            ("play", None) => Self::Play,
            ("pause", None) => Self::Pause,
            ("stop", None) => Self::Stop,
            ("next", None) => Self::Next,
            ("status", None) | ("about", None) => Self::About(None),
            ("about", Some(id)) => Self::About(Some(id.parse()?)),
            ("load", None) => Self::Load,
            ("list", None) => Self::List(ListQuery::default()),
            ("list", Some(id)) => Self::List(ListQuery {
                id: Some(id.parse()?),
                ..ListQuery::default()
            }),
            ("random" | "shuffle", argument) => Self::Shuffle(toggle(argument)?),
            ("repeat" | "loop", argument) => Self::Repeat(toggle(argument)?),
            ("volume", None) => Self::Volume(None),
            ("volume", Some("up")) => Self::Volume(Some(5)),
            ("volume", Some("down")) => Self::Volume(Some(-5)),
            ("volume", Some(step)) => Self::Volume(Some(step.parse()?)),
            ("connect", Some(url)) => Self::ChangePlayer(url.to_owned()),
            ("reconnect", None) => Self::Reconnect,
            ("quit" | "exit", None) => Self::Quit,
            _ => return Err(Error::invalid_argument(format!("unknown command: {s}"))),
        };

        if words.next().is_some() {
            return Err(Error::invalid_argument(format!("trailing arguments: {s}")));
        }

        Ok(command)
    }
}

pub struct Player {
    rpc: Rpc,
    dispatcher: Dispatcher,
    capabilities: CapabilitySet,
    state: PlayerState,

    page_size: u32,
    poll_interval: Duration,
    position_timer: Option<Interval>,

    forward_messages: bool,
    event_tx: Option<mpsc::UnboundedSender<Event>>,
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("rpc", &self.rpc)
            .field("capabilities", &self.capabilities)
            .field("state", &self.state)
            .field("page_size", &self.page_size)
            .field("polling", &self.is_polling())
            .finish_non_exhaustive()
    }
}

impl Player {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            rpc: Rpc::new(),
            dispatcher: Dispatcher::new(),
            capabilities: CapabilitySet::default(),
            state: PlayerState::default(),

            page_size: config.page_size.max(1),
            poll_interval: config.poll_interval,
            position_timer: None,

            forward_messages: config.forward_messages,
            event_tx: None,
        }
    }

    /// Registers the channel that receives player events.
    pub fn register_event_handler(&mut self, event_tx: mpsc::UnboundedSender<Event>) {
        self.event_tx = Some(event_tx);
    }

    #[must_use]
    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    #[must_use]
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.rpc.is_open()
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.position_timer.is_some()
    }

    /// Number of requests still waiting for a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.rpc.pending_len()
    }

    /// Takes the encoded requests that are due for transmission.
    pub fn drain_outbox(&mut self) -> Vec<String> {
        self.rpc.drain_outbox().collect()
    }

    fn emit(&self, event: Event) {
        if let Some(event_tx) = &self.event_tx {
            if event_tx.send(event).is_err() {
                trace!("event receiver is gone");
            }
        }
    }

    /// Called when the control socket opened.
    pub fn on_open(&mut self) {
        self.rpc.set_open(true);
        self.emit(Event::Connected);
        self.load();
    }

    /// Called when the control socket closed, for whatever reason.
    ///
    /// Pending requests are discarded and the position timer is stopped.
    /// Capabilities must be negotiated again on the next connection.
    pub fn on_close(&mut self) {
        let was_open = self.rpc.is_open();
        self.rpc.reset();
        self.stop_polling();
        self.capabilities.clear();
        self.dispatcher.reset();

        if was_open {
            self.state.state = PlaybackState::Disconnected;
            self.emit(Event::StateChanged {
                id: Some(-1),
                state: PlaybackState::Disconnected,
            });
            self.emit(Event::Disconnected);
        }
    }

    /// Starts a new session for a different player: like
    /// [`on_close`](Self::on_close), but request identifiers restart at 0.
    pub fn reset_session(&mut self) {
        self.on_close();
        self.rpc = Rpc::new();
    }

    /// Sends a request, handing the response `result` to `respond`.
    ///
    /// Returns the request identifier, or `None` if nothing was sent.
    pub fn request(
        &mut self,
        method: &str,
        params: impl Into<Params>,
        respond: Option<Respond>,
    ) -> Option<u64> {
        match self.rpc.send(method, params, respond) {
            Ok(id) => id,
            Err(e) => {
                error!("{e}");
                None
            }
        }
    }

    fn send(&mut self, method: &str, params: impl Into<Params>) -> Option<u64> {
        self.request(method, params, None)
    }

    fn send_gated(&mut self, actions: &[Action], method: &str, params: impl Into<Params>) {
        if self.capabilities.contains_any(actions) {
            self.send(method, params);
        } else {
            debug!("{method} is not supported by the player");
        }
    }

    /// Handles one inbound text frame.
    pub fn receive(&mut self, text: &str) {
        if let Some(inbound) = self.rpc.receive(text) {
            self.dispatch(inbound);
        }
    }

    fn dispatch(&mut self, inbound: Inbound) {
        let Inbound {
            message,
            request,
            respond,
        } = inbound;

        if let Some(error) = &message.error {
            warn!(
                "{} failed: {error}",
                request.as_ref().map_or("request", |request| request.method.as_str())
            );
            self.emit(Event::Error {
                error: error.clone(),
                request: request.clone(),
            });
        } else if let Some(method) = message.method.as_deref() {
            if let Some(respond) = respond {
                respond(message.result.as_ref());
            }

            match (self.dispatcher.resolve(method), message.payload()) {
                (Some(slot), Some(payload)) => {
                    if request.is_some() {
                        debug!("response {method}");
                    } else {
                        debug!("notification {method}");
                    }
                    self.invoke(slot, payload, request.as_ref());
                }
                (Some(_), None) => debug!("{method} carries no payload"),
                (None, _) => debug!("{method} is not connected"),
            }
        }

        if self.forward_messages {
            self.emit(Event::Message(message));
        }
    }

    fn invoke(&mut self, slot: Slot, payload: &Value, request: Option<&Request>) {
        match slot {
            Slot::Capabilities => {
                if let Some(descriptor) = parse::<Descriptor>(slot, payload) {
                    self.on_capabilities(descriptor);
                }
            }
            Slot::Change => {
                if let Some(change) = parse::<Change>(slot, payload) {
                    self.on_change(change);
                }
            }
            Slot::State => {
                if let Some(change) = parse::<Change>(slot, payload) {
                    self.on_state(change);
                }
            }
            Slot::Next => {
                if let Some(next) = parse::<Change>(slot, payload).and_then(|change| change.next) {
                    self.state.next = Some(next);
                    self.emit(Event::NextChanged(next));
                }
            }
            Slot::List => {
                if let Some(list) = parse::<ListResponse>(slot, payload) {
                    self.on_list(list, request);
                }
            }
            Slot::Options => self.on_options(payload),
            Slot::Filter => {
                if self.capabilities.contains(&Action::List) {
                    let window = ListRequest {
                        maxitems: self.page_size,
                        first: 0,
                    };
                    self.send_list(window);
                }
            }
            Slot::Info => {
                if let Some(change) = parse::<Change>(slot, payload) {
                    match change.info {
                        Some(info) => self.emit(Event::InfoChanged {
                            id: change.id,
                            info,
                        }),
                        None => {
                            if let Some(message) = change.message {
                                info!("{message}");
                            }
                        }
                    }
                }
            }
            Slot::SetInfo => {
                let message = payload.get("message").cloned();
                self.emit(Event::InfoSaved(message));
            }
            Slot::Volume => {
                if let Some(change) = parse::<Change>(slot, payload) {
                    self.state.volume = change.volume_level();
                    self.emit(Event::VolumeChanged(self.state.volume));
                }
            }
            Slot::Position => {
                if let Some(position) = parse::<Position>(slot, payload) {
                    self.on_position(position);
                }
            }
        }
    }

    fn on_capabilities(&mut self, descriptor: Descriptor) {
        self.capabilities = CapabilitySet::from(&descriptor);
        self.dispatcher.reset();

        let events = descriptor
            .events
            .iter()
            .map(|event| event.method.clone())
            .collect();
        self.emit(Event::EventsAnnounced(events));

        let mut seed_status = false;
        for action in &descriptor.actions {
            let method = action.method.as_str();
            match &action.method {
                Action::Play | Action::Pause => {
                    self.dispatcher.register(Action::Play.as_str(), Slot::State);
                    self.dispatcher.register(Action::Pause.as_str(), Slot::State);
                }
                Action::Stop | Action::Next => self.dispatcher.register(method, Slot::State),
                Action::Change => self.dispatcher.register(method, Slot::Change),
                Action::SetNext => self.dispatcher.register(method, Slot::Next),
                Action::Status => {
                    self.dispatcher.register(method, Slot::Change);
                    seed_status = true;
                }
                Action::List => self.dispatcher.register(method, Slot::List),
                Action::Options => self.dispatcher.register(method, Slot::Options),
                Action::Filter => self.dispatcher.register(method, Slot::Filter),
                Action::Info => self.dispatcher.register(method, Slot::Info),
                Action::SetInfo => self.dispatcher.register(method, Slot::SetInfo),
                Action::Volume => self.dispatcher.register(method, Slot::Volume),
                Action::Append | Action::Remove | Action::GetPosition | Action::Capabilities => {}
                Action::Other(method) => warn!("unknown action {method}"),
            }
        }

        info!(
            "player supports {}",
            descriptor
                .actions
                .iter()
                .map(|action| action.method.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.emit(Event::ActionsAnnounced(descriptor.actions));

        if seed_status {
            self.send(Action::Status.as_str(), Params::None);
        }
    }

    /// Applies a partial state update. Every present field is handled on
    /// its own; none of them excludes another.
    fn on_change(&mut self, change: Change) {
        if change.id.is_some() {
            self.state.id = change.id;
        }

        if let Some(state) = &change.state {
            self.state.state = state.clone();
            self.emit(Event::StateChanged {
                id: change.id,
                state: state.clone(),
            });
        }

        if let Some(duration) = change.known_duration() {
            self.state.duration = Some(duration);
            self.emit(Event::DurationChanged {
                id: change.id,
                position: 0.0,
                duration,
            });
            self.start_polling();
        } else if self.is_polling() {
            self.state.duration = None;
            self.emit(Event::DurationChanged {
                id: change.id,
                position: 0.0,
                duration: 0.0,
            });
            self.stop_polling();
        }

        if let Some(media) = &change.media {
            self.state.media = Some(media.clone());
            self.emit(Event::MediaChanged {
                id: change.id,
                media: media.clone(),
            });
        }

        if let Some(info) = &change.info {
            self.state.info = Some(info.clone());
            self.emit(Event::InfoChanged {
                id: change.id,
                info: info.clone(),
            });
        }

        if let Some(options) = change.normalized_options() {
            self.state.options.clone_from(&options);
            self.emit(Event::OptionsChanged {
                id: change.id,
                options,
            });
        }

        // Keep the visible list window aligned with the playing entry.
        if let Some(id) = change.id.and_then(|id| u64::try_from(id).ok()) {
            if self.capabilities.contains(&Action::List) {
                self.send_list(ListRequest::page_of(id, self.page_size));
            }
        }

        if let Some(next) = change.next.filter(|next| *next != -1) {
            self.state.next = Some(next);
            self.emit(Event::NextChanged(next));
        }

        if change.has_volume() {
            self.state.volume = change.volume_level();
            self.emit(Event::VolumeChanged(self.state.volume));
        }
    }

    fn on_state(&mut self, change: Change) {
        if let Some(state) = change.state {
            if change.id.is_some() {
                self.state.id = change.id;
            }
            self.state.state = state.clone();
            self.emit(Event::StateChanged {
                id: change.id,
                state,
            });
        }
    }

    fn on_list(&mut self, list: ListResponse, request: Option<&Request>) {
        let cursor = request.and_then(|request| {
            serde_json::from_value::<ListRequest>(request.params.clone()).ok()
        });

        self.state.list = Some(ListWindow {
            cursor,
            playlist: list.playlist.clone(),
            count: list.count,
        });

        self.emit(Event::ListChanged {
            playlist: list.playlist,
            count: list.count,
        });
    }

    fn on_options(&mut self, payload: &Value) {
        let id = payload.get("id").and_then(Value::as_i64);
        let options = crate::protocol::status::normalize_options(payload);

        self.state.options.clone_from(&options);
        self.emit(Event::OptionsChanged { id, options });
    }

    fn on_position(&mut self, position: Position) {
        if position.is_end_of_stream() {
            self.state.position = None;
            self.emit(Event::DurationChanged {
                id: Some(-1),
                position: 0.0,
                duration: 0.0,
            });
            self.stop_polling();
            return;
        }

        let current = position.position.unwrap_or_default();
        self.state.position = Some(current);
        let duration = position
            .duration
            .or(self.state.duration)
            .unwrap_or_default();

        self.emit(Event::DurationChanged {
            id: Some(0),
            position: current,
            duration,
        });
    }

    fn send_list(&mut self, window: ListRequest) {
        let params = json!({"maxitems": window.maxitems, "first": window.first});
        self.send(Action::List.as_str(), params);
    }

    fn start_polling(&mut self) {
        let period = self.poll_interval;
        let mut timer = time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Replacing drops the previous timer: there is never more than one.
        if self.position_timer.replace(timer).is_none() {
            debug!("polling position every {period:?}");
        }
    }

    fn stop_polling(&mut self) {
        if self.position_timer.take().is_some() {
            debug!("stopped polling position");
        }
    }

    /// Completes when the next position poll is due. Never completes while
    /// no duration is known.
    pub async fn position_tick(&mut self) {
        match &mut self.position_timer {
            Some(timer) => {
                timer.tick().await;
            }
            None => future::pending().await,
        }
    }

    /// Asks the server for the playback position.
    pub fn poll_position(&mut self) {
        self.send(Action::GetPosition.as_str(), Params::None);
    }

    /// Requests the capability descriptor.
    pub fn load(&mut self) {
        self.send(Action::Capabilities.as_str(), Params::None);
    }

    pub fn play(&mut self) {
        self.send_gated(&[Action::Play, Action::Pause], "play", Params::None);
    }

    pub fn pause(&mut self) {
        self.send_gated(&[Action::Pause], "pause", Params::None);
    }

    pub fn stop(&mut self) {
        self.send_gated(&[Action::Stop], "stop", Params::None);
    }

    pub fn next(&mut self) {
        self.send_gated(&[Action::Next], "next", Params::None);
    }

    /// Changes the volume by `step`, or queries it when `step` is `None`.
    pub fn volume(&mut self, step: Option<i64>) {
        let params = match step.filter(|step| *step != 0) {
            Some(step) => json!({ "step": step }),
            None => Value::Null,
        };
        self.send_gated(&[Action::Volume], "volume", params);
    }

    pub fn filter(&mut self, params: Value) {
        self.send_gated(&[Action::Filter], "filter", params);
    }

    /// Queues the track in `media.next`, or else changes to `media.media`.
    pub fn change(&mut self, media: &Value) {
        if let Some(next) = media.get("next").filter(|next| !next.is_null()) {
            if self.capabilities.contains(&Action::SetNext) {
                self.send("setnext", json!({ "id": next }));
                return;
            }
        }

        if media.get("media").is_some_and(|media| !media.is_null())
            && self.capabilities.contains(&Action::Change)
        {
            self.send("change", media.clone());
        } else {
            debug!("change is not supported by the player");
        }
    }

    /// Requests information about track `id`, or the player status.
    pub fn about(&mut self, id: Option<i64>) {
        match id {
            Some(id) => self.send("info", json!({ "id": id })),
            None => self.send("status", Params::None),
        };
    }

    pub fn shuffle(&mut self, enable: bool) {
        self.send_gated(&[Action::Options], "options", json!({ "random": enable }));
    }

    pub fn repeat(&mut self, enable: bool) {
        self.send_gated(&[Action::Options], "options", json!({ "loop": enable }));
    }

    pub fn list(&mut self, query: ListQuery) {
        if self.capabilities.contains(&Action::List) {
            self.send_list(query.resolve(self.page_size));
        } else {
            debug!("list is not supported by the player");
        }
    }

    pub fn execute(&mut self, command: Command) {
        debug!("executing {command:?}");
        match command {
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::Stop => self.stop(),
            Command::Next => self.next(),
            Command::Volume(step) => self.volume(step),
            Command::Shuffle(enable) => self.shuffle(enable),
            Command::Repeat(enable) => self.repeat(enable),
            Command::Filter(params) => self.filter(params),
            Command::Change(media) => self.change(&media),
            Command::About(id) => self.about(id),
            Command::List(query) => self.list(query),
            Command::Load => self.load(),
            Command::ChangePlayer(url) => {
                warn!("cannot change to {url} without a client");
            }
            Command::Reconnect | Command::Quit => {
                warn!("{command:?} needs a client");
            }
        }
    }
}

fn parse<T: DeserializeOwned>(slot: Slot, payload: &Value) -> Option<T> {
    match serde_json::from_value(payload.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{slot:?} handler cannot use payload: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    fn player() -> (Player, mpsc::UnboundedReceiver<Event>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut player = Player::new(&Config::with_url("ws://localhost/player"));
        player.register_event_handler(event_tx);
        (player, event_rx)
    }

    fn sent(player: &mut Player) -> Vec<Value> {
        player
            .drain_outbox()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    fn events(event_rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Opens the session and answers the capabilities request.
    fn negotiate(player: &mut Player, actions: &[&str]) -> Vec<Value> {
        player.on_open();
        let requests = sent(player);
        assert_eq!(requests[0]["method"], "capabilities");

        let actions: Vec<Value> = actions.iter().map(|method| json!({ "method": method })).collect();
        let response = json!({
            "id": requests[0]["id"],
            "result": {"events": [{"method": "onchange"}], "actions": actions},
        });
        player.receive(&response.to_string());
        sent(player)
    }

    #[tokio::test]
    async fn negotiation_wires_advertised_actions() {
        let (mut player, mut event_rx) = player();
        let requests = negotiate(&mut player, &["pause", "list", "eject"]);
        assert!(requests.is_empty());

        assert!(player.capabilities().contains(&Action::List));
        assert!(player.dispatcher.resolve("play").is_some());
        assert!(player.dispatcher.resolve("pause").is_some());
        assert!(player.dispatcher.resolve("stop").is_none());

        let events = events(&mut event_rx);
        assert_eq!(events[0], Event::Connected);
        assert_eq!(events[1], Event::EventsAnnounced(vec!["onchange".to_owned()]));
        assert!(matches!(&events[2], Event::ActionsAnnounced(actions) if actions.len() == 3));
    }

    #[tokio::test]
    async fn status_action_seeds_state() {
        let (mut player, _event_rx) = player();
        let requests = negotiate(&mut player, &["status"]);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["method"], "status");
        assert_eq!(requests[0]["params"], Value::Null);
    }

    #[tokio::test]
    async fn playing_entry_aligns_list_window() {
        let (mut player, _event_rx) = player();
        negotiate(&mut player, &["list"]);

        player.receive(r#"{"method":"onchange","params":{"id":7}}"#);
        let requests = sent(&mut player);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["method"], "list");
        assert_eq!(requests[0]["params"], json!({"maxitems": 5, "first": 5}));
    }

    #[tokio::test]
    async fn list_window_needs_list_capability() {
        let (mut player, _event_rx) = player();
        negotiate(&mut player, &["status"]);

        player.receive(r#"{"method":"onchange","params":{"id":7}}"#);
        player.receive(r#"{"method":"onchange","params":{"id":-1}}"#);
        assert!(sent(&mut player).is_empty());
    }

    #[tokio::test]
    async fn list_response_is_cached_with_its_cursor() {
        let (mut player, mut event_rx) = player();
        negotiate(&mut player, &["list"]);
        events(&mut event_rx);

        player.list(ListQuery {
            id: Some(12),
            ..ListQuery::default()
        });
        let requests = sent(&mut player);
        let request = &requests[0];
        assert_eq!(request["params"], json!({"maxitems": 5, "first": 10}));

        let response = json!({"id": request["id"], "result": {"playlist": [{"id": 10}], "count": 14}});
        player.receive(&response.to_string());

        let window = player.state().list.clone().unwrap();
        assert_eq!(window.cursor, Some(ListRequest { maxitems: 5, first: 10 }));
        assert_eq!(window.count, 14);
        assert_eq!(
            events(&mut event_rx),
            [Event::ListChanged {
                playlist: vec![json!({"id": 10})],
                count: 14
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duration_drives_position_polling() {
        let (mut player, mut event_rx) = player();
        negotiate(&mut player, &[]);
        events(&mut event_rx);

        player.receive(r#"{"method":"onchange","params":{"id":3,"duration":180}}"#);
        assert!(player.is_polling());
        assert_eq!(
            events(&mut event_rx),
            [Event::DurationChanged {
                id: Some(3),
                position: 0.0,
                duration: 180.0
            }]
        );

        let start = Instant::now();
        for _ in 0..3 {
            player.position_tick().await;
            player.poll_position();
        }
        assert_eq!(start.elapsed(), Duration::from_secs(3));

        let polls = sent(&mut player);
        assert_eq!(polls.len(), 3);
        assert!(polls.iter().all(|request| request["method"] == "getposition"));

        player.receive(r#"{"method":"onchange","params":{"state":"stop"}}"#);
        assert!(!player.is_polling());
        assert!(time::timeout(Duration::from_secs(10), player.position_tick())
            .await
            .is_err());
        assert!(sent(&mut player).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn new_duration_replaces_timer() {
        let (mut player, _event_rx) = player();
        negotiate(&mut player, &[]);

        player.receive(r#"{"method":"onchange","params":{"duration":180}}"#);
        time::advance(Duration::from_millis(600)).await;
        player.receive(r#"{"method":"onchange","params":{"duration":200}}"#);

        // The replacement timer starts a full period later.
        let start = Instant::now();
        player.position_tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn position_responses_are_forwarded() {
        let (mut player, mut event_rx) = player();
        negotiate(&mut player, &[]);
        player.receive(r#"{"method":"onchange","params":{"duration":180}}"#);
        events(&mut event_rx);

        player.poll_position();
        let requests = sent(&mut player);
        let request = &requests[0];
        let response = json!({"id": request["id"], "result": {"position": 42, "duration": 180}});
        player.receive(&response.to_string());

        assert_eq!(
            events(&mut event_rx),
            [Event::DurationChanged {
                id: Some(0),
                position: 42.0,
                duration: 180.0
            }]
        );
        assert_eq!(player.state().position, Some(42.0));
        assert!(player.is_polling());
    }

    #[tokio::test]
    async fn end_of_stream_stops_polling_idempotently() {
        let (mut player, mut event_rx) = player();
        negotiate(&mut player, &[]);
        events(&mut event_rx);

        // Never started polling: still reported, still harmless.
        player.receive(r#"{"method":"getposition","params":{"position":-1}}"#);
        assert_eq!(
            events(&mut event_rx),
            [Event::DurationChanged {
                id: Some(-1),
                position: 0.0,
                duration: 0.0
            }]
        );
        assert!(!player.is_polling());

        player.receive(r#"{"method":"onchange","params":{"duration":180}}"#);
        assert!(player.is_polling());
        player.poll_position();
        let requests = sent(&mut player);
        let request = &requests[0];
        player.receive(&json!({"id": request["id"], "result": {"position": -1}}).to_string());
        assert!(!player.is_polling());
    }

    #[tokio::test]
    async fn independent_fields_of_a_change() {
        let (mut player, mut event_rx) = player();
        negotiate(&mut player, &[]);
        events(&mut event_rx);

        player.receive(
            r#"{"method":"onchange","params":{
                "id":2,"state":"play","media":"file:///a.flac","info":{"title":"A"},
                "options":{"random":true,"loop":false},"next":3,"volume":true,"level":60}}"#,
        );

        let events = events(&mut event_rx);
        assert!(events.contains(&Event::StateChanged {
            id: Some(2),
            state: PlaybackState::Play
        }));
        assert!(events.contains(&Event::MediaChanged {
            id: Some(2),
            media: json!("file:///a.flac")
        }));
        assert!(events.contains(&Event::InfoChanged {
            id: Some(2),
            info: json!({"title": "A"})
        }));
        assert!(events.contains(&Event::OptionsChanged {
            id: Some(2),
            options: vec!["!loop".to_owned(), "random".to_owned()]
        }));
        assert!(events.contains(&Event::NextChanged(3)));
        assert!(events.contains(&Event::VolumeChanged(Some(60))));

        let state = player.state();
        assert_eq!(state.id, Some(2));
        assert_eq!(state.state, PlaybackState::Play);
        assert_eq!(state.volume, Some(60));
    }

    #[tokio::test(start_paused = true)]
    async fn mistyped_field_keeps_the_rest_of_a_change() {
        let (mut player, mut event_rx) = player();
        negotiate(&mut player, &[]);
        events(&mut event_rx);

        player.receive(
            r#"{"method":"onchange","params":{"id":2,"state":"play","duration":180,"level":42.5}}"#,
        );

        assert_eq!(
            events(&mut event_rx),
            [
                Event::StateChanged {
                    id: Some(2),
                    state: PlaybackState::Play
                },
                Event::DurationChanged {
                    id: Some(2),
                    position: 0.0,
                    duration: 180.0
                },
            ]
        );
        assert!(player.is_polling());
        assert_eq!(player.state().state, PlaybackState::Play);
        assert_eq!(player.state().volume, None);
    }

    #[tokio::test]
    async fn error_responses_reach_the_application() {
        let (mut player, mut event_rx) = player();
        negotiate(&mut player, &["info"]);
        events(&mut event_rx);

        player.about(Some(9));
        let requests = sent(&mut player);
        let request = &requests[0];
        player.receive(&json!({"id": request["id"], "error": "no such media"}).to_string());

        match &events(&mut event_rx)[..] {
            [Event::Error { error, request }] => {
                assert_eq!(error, &json!("no such media"));
                assert_eq!(request.as_ref().map(|r| r.method.as_str()), Some("info"));
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert_eq!(player.pending_requests(), 0);
    }

    #[tokio::test]
    async fn commands_are_gated_on_capabilities() {
        let (mut player, _event_rx) = player();
        negotiate(&mut player, &["stop"]);

        player.play();
        player.next();
        player.shuffle(true);
        player.volume(Some(5));
        player.list(ListQuery::default());
        assert!(sent(&mut player).is_empty());

        player.stop();
        let requests = sent(&mut player);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["method"], "stop");
    }

    #[tokio::test]
    async fn pause_capability_enables_play() {
        let (mut player, _event_rx) = player();
        negotiate(&mut player, &["pause", "options", "volume", "setnext", "change"]);

        player.play();
        player.repeat(false);
        player.volume(Some(-5));
        player.volume(None);
        player.change(&json!({"next": 4}));
        player.change(&json!({"media": "http://radio/stream"}));

        let requests = sent(&mut player);
        let summary: Vec<(Value, Value)> = requests
            .iter()
            .map(|request| (request["method"].clone(), request["params"].clone()))
            .collect();
        assert_eq!(
            summary,
            [
                (json!("play"), Value::Null),
                (json!("options"), json!({"loop": false})),
                (json!("volume"), json!({"step": -5})),
                (json!("volume"), Value::Null),
                (json!("setnext"), json!({"id": 4})),
                (json!("change"), json!({"media": "http://radio/stream"})),
            ]
        );
    }

    #[tokio::test]
    async fn state_responses_forward_state() {
        let (mut player, mut event_rx) = player();
        negotiate(&mut player, &["pause"]);
        events(&mut event_rx);

        player.pause();
        let requests = sent(&mut player);
        let request = &requests[0];
        player.receive(&json!({"id": request["id"], "result": {"id": 5, "state": "pause"}}).to_string());

        assert_eq!(
            events(&mut event_rx),
            [Event::StateChanged {
                id: Some(5),
                state: PlaybackState::Pause
            }]
        );
    }

    #[tokio::test]
    async fn options_response_is_normalized() {
        let (mut player, mut event_rx) = player();
        negotiate(&mut player, &["options"]);
        events(&mut event_rx);

        player.shuffle(true);
        let requests = sent(&mut player);
        let request = &requests[0];
        player.receive(&json!({"id": request["id"], "result": {"random": true, "loop": true}}).to_string());

        assert_eq!(
            events(&mut event_rx),
            [Event::OptionsChanged {
                id: None,
                options: vec!["loop".to_owned(), "random".to_owned()]
            }]
        );
    }

    #[tokio::test]
    async fn filter_refreshes_first_page() {
        let (mut player, _event_rx) = player();
        negotiate(&mut player, &["filter", "list"]);

        player.filter(json!({"keyword": "jazz"}));
        let requests = sent(&mut player);
        let request = &requests[0];
        player.receive(&json!({"id": request["id"], "result": {"status": "DONE"}}).to_string());

        let requests = sent(&mut player);
        assert_eq!(requests[0]["method"], "list");
        assert_eq!(requests[0]["params"], json!({"maxitems": 5, "first": 0}));
    }

    #[tokio::test]
    async fn unconnected_methods_are_dropped() {
        let (mut player, mut event_rx) = player();
        negotiate(&mut player, &[]);
        events(&mut event_rx);

        player.receive(r#"{"method":"volume","params":{"level":10}}"#);
        player.receive(r#"{"method":"player.list","params":{}}"#);
        assert!(events(&mut event_rx).is_empty());
    }

    #[tokio::test]
    async fn continuation_runs_once() {
        let (mut player, _event_rx) = player();
        negotiate(&mut player, &[]);

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let id = player
            .request(
                "status",
                Params::None,
                Some(Box::new(move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();

        let response = json!({"id": id, "result": {"state": "stop"}}).to_string();
        player.receive(&response);
        player.receive(&response);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_frames_change_nothing() {
        let (mut player, mut event_rx) = player();
        negotiate(&mut player, &["list"]);
        player.receive(r#"{"method":"onchange","params":{"duration":180}}"#);
        player.list(ListQuery::default());
        sent(&mut player);
        events(&mut event_rx);

        let pending = player.pending_requests();
        player.receive("{\"id\": 1, \"result\": ");
        player.receive("not json at all");

        assert_eq!(player.pending_requests(), pending);
        assert!(player.is_polling());
        assert!(events(&mut event_rx).is_empty());
    }

    #[tokio::test]
    async fn closing_tears_down_session() {
        let (mut player, mut event_rx) = player();
        negotiate(&mut player, &["list", "status"]);
        player.receive(r#"{"method":"onchange","params":{"duration":180}}"#);
        events(&mut event_rx);
        assert!(player.pending_requests() > 0);

        player.on_close();
        assert!(!player.is_polling());
        assert!(!player.is_connected());
        assert_eq!(player.pending_requests(), 0);
        assert!(player.capabilities().is_empty());
        assert_eq!(
            events(&mut event_rx),
            [
                Event::StateChanged {
                    id: Some(-1),
                    state: PlaybackState::Disconnected
                },
                Event::Disconnected
            ]
        );

        // Sending while closed does nothing.
        player.about(None);
        assert!(sent(&mut player).is_empty());

        // Identifiers keep counting on the same session.
        player.on_open();
        let requests = sent(&mut player);
        assert!(requests[0]["id"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn new_session_restarts_identifiers() {
        let (mut player, _event_rx) = player();
        negotiate(&mut player, &[]);

        player.reset_session();
        player.on_open();
        assert_eq!(sent(&mut player)[0]["id"], 0);
    }

    #[test]
    fn parses_console_commands() {
        assert_eq!("random on".parse::<Command>().unwrap(), Command::Shuffle(true));
        assert_eq!("repeat off".parse::<Command>().unwrap(), Command::Repeat(false));
        assert_eq!("volume down".parse::<Command>().unwrap(), Command::Volume(Some(-5)));
        assert_eq!("about 12".parse::<Command>().unwrap(), Command::About(Some(12)));
        assert_eq!(
            "connect ws://other/player".parse::<Command>().unwrap(),
            Command::ChangePlayer("ws://other/player".to_owned())
        );
        assert_eq!("reconnect".parse::<Command>().unwrap(), Command::Reconnect);
        assert_eq!("quit".parse::<Command>().unwrap(), Command::Quit);
        assert!("random".parse::<Command>().is_err());
        assert!("play now".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
    }
}
