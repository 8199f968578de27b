//! The `message` module defines the Bayeux frame exchanged with the server.
//!
//! It provides the `Message` struct used for both client requests and
//! server responses, the `Advice` reconnection policy that rides on
//! responses, and helpers to encode/decode the JSON array bodies used by
//! the long-polling transport.

pub mod advice;
#[allow(clippy::module_inception)]
pub mod message;

pub use advice::{Advice, Reconnect};
pub use message::{
    BAYEUX_VERSION, LONG_POLLING, META_CONNECT, META_DISCONNECT, META_HANDSHAKE, META_SUBSCRIBE,
    META_UNSUBSCRIBE, Message, decode_messages, encode_messages,
};

#[cfg(test)]
mod tests;
