//! Remote control client for the putv audio player.
//!
//! putv exposes its controls as JSON-RPC 2.0 over a WebSocket. This crate
//! connects to it, negotiates which actions the player supports, mirrors
//! the player state as it changes and issues commands on behalf of an
//! application.
//!
//! * [`remote::Client`] runs the event loop
//! * [`player::Player`] negotiates capabilities and tracks state
//! * [`connection::Connection`] owns the socket and reconnects
//! * [`rpc::Rpc`] encodes requests and correlates responses
//! * [`cmdbar::PlayerCmd`] keeps a command bar in sync
//!
//! Everything the player learns is reported as an [`events::Event`].
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

#[macro_use]
extern crate log;

pub mod cmdbar;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod player;
pub mod protocol;
pub mod remote;
pub mod rpc;
pub mod signal;
