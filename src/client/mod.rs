//! The `client` module is the Bayeux session: the state machine, the public
//! API and the task that dispatches server messages.
//!
//! `CometClient` is the entry point. Outcomes of asynchronous operations are
//! reported through per-call hooks or the `CometClientDelegate`.

#[allow(clippy::module_inception)]
pub mod client;
pub mod delegate;
mod processor;
pub mod state;

pub use client::CometClient;
pub use delegate::{CometClientDelegate, DataDelegate, PublishHooks, SubscriptionDelegate};
pub use state::{ClientOptions, CometState};
