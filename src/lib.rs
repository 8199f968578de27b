//! # cometpoll
//!
//! `cometpoll` is a Bayeux (CometD) client over HTTP long-polling. It
//! handshakes with a server, keeps a long poll open, subscribes callbacks to
//! channels (including `/*` and `/**` wildcards) and publishes data, and
//! recovers from expired sessions and network failures as the server
//! advises.
//!
//! ## Core Modules
//!
//! - `client`: The session state machine and the public API (`CometClient`).
//! - `transport`: The long-polling request loop and the HTTP seam.
//! - `queue`: The outgoing and incoming message queues.
//! - `subscription`: Binds a channel pattern to a callback.
//! - `channel`: Channel name validation and pattern matching.
//! - `message`: The Bayeux message frame and server advice.
//! - `config`: Loads client configuration from files and environment.
//! - `utils`: Shared utilities such as error handling and logging.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cometpoll::{CometClient, Message, MessageCallback};
//!
//! # async fn run() -> Result<(), cometpoll::CometError> {
//! let client = CometClient::new("http://localhost:8080/cometd".parse().unwrap());
//! client.schedule_on(tokio::runtime::Handle::current());
//!
//! let on_chat: MessageCallback = Arc::new(|m: &Message| println!("{:?}", m.data));
//! client.subscribe("/chat/**", &on_chat)?;
//! client.handshake()?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod message;
pub mod queue;
pub mod subscription;
pub mod transport;
pub mod utils;

pub use client::{
    ClientOptions, CometClient, CometClientDelegate, CometState, DataDelegate, PublishHooks,
    SubscriptionDelegate,
};
pub use message::{Advice, Message, Reconnect};
pub use subscription::{MessageCallback, Subscription, SubscriptionHooks};
pub use utils::error::{BayeuxError, CometError};
