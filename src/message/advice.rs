use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Either the client should make a handshake again, retry to connect
/// or just do nothing. This is part of the [`Advice`] struct.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Reconnect {
    /// The client should retry a `connect` request.
    Retry,
    /// The client should send a handshake request.
    Handshake,
    /// The client should neither reconnect or send a handshake request.
    None,
}

/// Reconnection policy supplied by the server on responses.
///
/// Keys the client does not interpret (`multiple-clients`, `hosts`, ...)
/// are kept in `extra` so the advice survives a decode/encode cycle.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct Advice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<Reconnect>,
    /// Milliseconds to wait before the next connect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// Milliseconds the server may hold a long poll.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Advice {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval.unwrap_or(0))
    }

    pub fn reconnect(&self) -> Reconnect {
        self.reconnect.unwrap_or(Reconnect::Retry)
    }
}
