//! Control socket lifecycle and automatic reconnection.
//!
//! A [`Connection`] owns at most one WebSocket at a time and at most one
//! pending reconnect timer. Its owner drives it by awaiting
//! [`Connection::next_event`], which reports the socket opening, text
//! frames, errors and closes as a [`connection::Event`](Event).
//!
//! Whenever the socket closes without [`Connection::close`] having been
//! called, a reconnect is scheduled after the configured delay. Closing
//! deliberately cancels any pending reconnect.

use std::{collections::VecDeque, fmt, future, pin::Pin, time::Duration};

use futures_util::{
    future::BoxFuture,
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{net::TcpStream, time::Sleep};
use tokio_tungstenite::{
    tungstenite::{self, Message as WebsocketMessage},
    MaybeTlsStream, WebSocketStream,
};

use crate::{
    endpoint::Endpoint,
    error::{Error, Result},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Handshake = BoxFuture<'static, std::result::Result<WsStream, tungstenite::Error>>;

/// Lifecycle of the control socket.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum State {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
    ReconnectPending,
}

/// What happened on the control socket.
#[derive(Debug)]
pub enum Event {
    Open,
    Text(String),
    /// The socket is gone. Unless it was closed deliberately, a reconnect
    /// has been scheduled.
    Close,
    Error(Error),
}

pub struct Connection {
    endpoint: Endpoint,
    delay: Duration,
    state: State,

    handshake: Option<Handshake>,
    ws_tx: Option<SplitSink<WsStream, WebsocketMessage>>,
    ws_rx: Option<SplitStream<WsStream>>,
    reconnect: Option<Pin<Box<Sleep>>>,

    events: VecDeque<Event>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("delay", &self.delay)
            .field("state", &self.state)
            .field("reconnect_pending", &self.reconnect.is_some())
            .finish_non_exhaustive()
    }
}

impl Connection {
    #[must_use]
    pub fn new(endpoint: Endpoint, delay: Duration) -> Self {
        Self {
            endpoint,
            delay,
            state: State::Disconnected,
            handshake: None,
            ws_tx: None,
            ws_rx: None,
            reconnect: None,
            events: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }

    /// Points the connection at another endpoint. Takes effect on the next
    /// [`connect`](Self::connect).
    pub fn set_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoint = endpoint;
    }

    /// Opens the socket.
    ///
    /// Cancels a pending reconnect. An open socket is dropped first and its
    /// close is reported. A handshake that is already in flight is kept.
    pub fn connect(&mut self) {
        self.cancel_reconnect();

        match self.state {
            State::Connecting => {
                debug!("already connecting to {}", self.endpoint);
                return;
            }
            State::Open => {
                self.drop_socket();
                self.events.push_back(Event::Close);
            }
            _ => {}
        }

        info!("connecting to {}", self.endpoint);
        let url = self.endpoint.as_str().to_owned();
        self.handshake = Some(Box::pin(async move {
            tokio_tungstenite::connect_async(url)
                .await
                .map(|(ws_stream, _)| ws_stream)
        }));
        self.state = State::Connecting;
    }

    /// Closes the socket without reconnecting.
    pub async fn close(&mut self) {
        self.cancel_reconnect();
        self.handshake = None;
        self.events.clear();

        if let Some(mut ws_tx) = self.ws_tx.take() {
            self.state = State::Closing;
            debug!("closing connection to {}", self.endpoint);
            if let Err(e) = ws_tx.send(WebsocketMessage::Close(None)).await {
                debug!("error sending close frame: {e}");
            }
        }

        self.ws_rx = None;
        self.state = State::Disconnected;
    }

    /// Sends a text frame.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the socket is not open or the frame could not be
    /// written.
    pub async fn send(&mut self, text: String) -> Result<()> {
        match &mut self.ws_tx {
            Some(ws_tx) if self.state == State::Open => ws_tx
                .send(WebsocketMessage::text(text))
                .await
                .map_err(Into::into),
            _ => Err(Error::unavailable("websocket is not open")),
        }
    }

    /// Waits for the next thing to happen on the socket.
    ///
    /// Never completes while there is no socket and no reconnect pending.
    pub async fn next_event(&mut self) -> Event {
        loop {
            if let Some(event) = self.events.pop_front() {
                return event;
            }

            tokio::select! {
                result = handshake(&mut self.handshake) => {
                    self.handshake = None;
                    match result {
                        Ok(ws_stream) => {
                            let (ws_tx, ws_rx) = ws_stream.split();
                            self.ws_tx = Some(ws_tx);
                            self.ws_rx = Some(ws_rx);
                            self.state = State::Open;
                            info!("connected to {}", self.endpoint);
                            return Event::Open;
                        }
                        Err(e) => {
                            error!("error connecting to {}: {e}", self.endpoint);
                            self.closed();
                            self.events.push_back(Event::Close);
                            return Event::Error(e.into());
                        }
                    }
                }

                message = receive(&mut self.ws_rx) => {
                    match message {
                        Some(Ok(WebsocketMessage::Text(text))) => {
                            return Event::Text(text.as_str().to_owned());
                        }
                        Some(Ok(WebsocketMessage::Close(frame))) => {
                            // The closing handshake completes on the next read.
                            debug!("connection closed by server: {frame:?}");
                        }
                        Some(Ok(message)) => {
                            trace!("ignoring {} byte non-text frame", message.len());
                        }
                        Some(Err(
                            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                        ))
                        | None => {
                            self.closed();
                            return Event::Close;
                        }
                        Some(Err(e)) => {
                            error!("error receiving message: {e}");
                            self.closed();
                            self.events.push_back(Event::Close);
                            return Event::Error(e.into());
                        }
                    }
                }

                () = expire(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.state = State::Disconnected;
                    self.connect();
                }
            }
        }
    }

    /// The socket went away by itself: schedule a reconnect.
    fn closed(&mut self) {
        let was_open = self.ws_tx.is_some();
        self.drop_socket();

        if was_open {
            info!("disconnected from {}", self.endpoint);
        }

        self.schedule_reconnect();
    }

    fn drop_socket(&mut self) {
        self.ws_tx = None;
        self.ws_rx = None;
        self.handshake = None;
        self.state = State::Disconnected;
    }

    /// Arms the reconnect timer, unless it is already armed.
    fn schedule_reconnect(&mut self) {
        if self.reconnect.is_none() {
            info!("reconnecting in {:.1}s", self.delay.as_secs_f32());
            self.reconnect = Some(Box::pin(tokio::time::sleep(self.delay)));
        }

        self.state = State::ReconnectPending;
    }

    fn cancel_reconnect(&mut self) {
        if self.reconnect.take().is_some() {
            debug!("cancelled pending reconnect");
        }
        if self.state == State::ReconnectPending {
            self.state = State::Disconnected;
        }
    }
}

async fn handshake(
    handshake: &mut Option<Handshake>,
) -> std::result::Result<WsStream, tungstenite::Error> {
    match handshake {
        Some(handshake) => handshake.await,
        None => future::pending().await,
    }
}

async fn receive(
    ws_rx: &mut Option<SplitStream<WsStream>>,
) -> Option<std::result::Result<WebsocketMessage, tungstenite::Error>> {
    match ws_rx {
        Some(ws_rx) => ws_rx.next().await,
        None => future::pending().await,
    }
}

async fn expire(reconnect: &mut Option<Pin<Box<Sleep>>>) {
    match reconnect {
        Some(sleep) => sleep.await,
        None => future::pending().await,
    }
}
