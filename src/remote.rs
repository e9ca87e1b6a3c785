//! Remote control client.
//!
//! The [`Client`] ties a [`Connection`] to a [`Player`] and runs the one
//! event loop that drives both. Every transport event, position poll and
//! application command is handled to completion before the next one, and
//! whatever requests that produced are flushed to the socket right after.
//! There is no shared state and nothing to lock.
//!
//! # Example
//!
//! ```no_run
//! use putv_remote::{
//!     config::Config,
//!     player::{Command, Player},
//!     remote::Client,
//! };
//! use tokio::sync::mpsc;
//!
//! async fn example() -> putv_remote::error::Result<()> {
//!     let config = Config::with_url("ws://localhost:8080/player");
//!     let (command_tx, command_rx) = mpsc::unbounded_channel();
//!
//!     let mut client = Client::new(&config, Player::new(&config), command_rx)?;
//!     client.connect();
//!
//!     // Queued commands run in order; `Quit` ends the loop.
//!     command_tx.send(Command::Quit).ok();
//!     client.run().await
//! }
//! ```

use tokio::sync::mpsc;
use url::Url;

use crate::{
    config::Config,
    connection::{self, Connection},
    endpoint::Endpoint,
    error::Result,
    player::{Command, Player},
};

#[derive(Debug)]
pub struct Client {
    connection: Connection,
    player: Player,
    origin: Option<Url>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Client {
    /// Creates a client for the player configured in `config`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the configured URL cannot be resolved into a
    /// socket endpoint.
    pub fn new(
        config: &Config,
        player: Player,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Result<Self> {
        let endpoint = Endpoint::resolve(&config.url, config.origin.as_ref())?;
        debug!("remote endpoint: {endpoint}");

        Ok(Self {
            connection: Connection::new(endpoint, config.reconnect_delay),
            player,
            origin: config.origin.clone(),
            commands,
        })
    }

    #[must_use]
    pub fn player(&self) -> &Player {
        &self.player
    }

    /// Starts connecting. Progress is made by [`run`](Self::run).
    pub fn connect(&mut self) {
        self.connection.connect();
    }

    /// Forces a fresh connection, dropping the current one if any.
    pub fn reconnect(&mut self) {
        info!("reconnecting");
        self.connection.connect();
    }

    /// Closes the connection without reconnecting and stops polling.
    pub async fn stop(&mut self) {
        self.connection.close().await;
        self.player.on_close();
    }

    /// Runs the event loop until [`Command::Quit`] is received or every
    /// command sender is dropped.
    ///
    /// The returned future is not cancellation safe: dropping it in the
    /// middle of a player change or a flush can lose requests or leave the
    /// connection without a reconnect timer. Drive it to completion and
    /// deliver signals as [`Command::Reconnect`] or [`Command::Quit`].
    ///
    /// # Errors
    ///
    /// Currently never returns `Err`; failures of the remote player are
    /// logged and recovered from by reconnecting.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                event = self.connection.next_event() => self.handle_event(event),

                () = self.player.position_tick() => self.player.poll_position(),

                command = self.commands.recv() => match command {
                    Some(Command::ChangePlayer(url)) => self.change_player(&url).await,
                    Some(Command::Reconnect) => self.reconnect(),
                    Some(Command::Quit) => {
                        debug!("quitting");
                        self.stop().await;
                        return Ok(());
                    }
                    Some(command) => self.player.execute(command),
                    None => {
                        debug!("command channel closed");
                        self.stop().await;
                        return Ok(());
                    }
                },
            }

            self.flush().await;
        }
    }

    fn handle_event(&mut self, event: connection::Event) {
        match event {
            connection::Event::Open => self.player.on_open(),
            connection::Event::Text(text) => self.player.receive(&text),
            connection::Event::Close => self.player.on_close(),
            connection::Event::Error(e) => debug!("connection error: {e}"),
        }
    }

    /// Follows another player, starting a new session.
    async fn change_player(&mut self, url: &str) {
        let endpoint = match Endpoint::resolve(url, self.origin.as_ref()) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!("cannot change player: {e}");
                return;
            }
        };

        info!("changing player to {endpoint}");
        self.connection.close().await;
        self.player.reset_session();
        self.connection.set_endpoint(endpoint);
        self.connection.connect();
    }

    async fn flush(&mut self) {
        for text in self.player.drain_outbox() {
            if let Err(e) = self.connection.send(text).await {
                error!("error sending request: {e}");
            }
        }
    }
}
