use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::client::delegate::PublishHooks;
use crate::config::ClientSettings;
use crate::message::{Advice, Message};
use crate::subscription::Subscription;
use crate::transport::LongPollingTransport;

/// First delay of the automatic retry backoff.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CometState {
    Disconnected,
    Handshaking,
    Connecting,
    Connected,
    Disconnecting,
    TransportError,
}

impl fmt::Display for CometState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CometState::Disconnected => "disconnected",
            CometState::Handshaking => "handshaking",
            CometState::Connecting => "connecting",
            CometState::Connected => "connected",
            CometState::Disconnecting => "disconnecting",
            CometState::TransportError => "transport error",
        };
        f.write_str(name)
    }
}

/// Runtime behaviour switches of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Let the same callback subscribe to the same channel more than once.
    pub allow_duplicate_subscriptions: bool,
    /// Re-handshake automatically when the server reports the session expired.
    pub reconnect_on_client_expired: bool,
    /// Keep subscriptions across disconnects and replay them on the next connect.
    pub persistent_subscriptions: bool,
    /// Restart the transport on its own after a network failure.
    pub retry_on_transport_error: bool,
    pub disconnect_timeout: Duration,
    pub max_backoff: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            allow_duplicate_subscriptions: false,
            reconnect_on_client_expired: true,
            persistent_subscriptions: true,
            retry_on_transport_error: false,
            disconnect_timeout: Duration::from_millis(5000),
            max_backoff: Duration::from_millis(30_000),
        }
    }
}

impl From<&ClientSettings> for ClientOptions {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            allow_duplicate_subscriptions: settings.allow_duplicate_subscriptions,
            reconnect_on_client_expired: settings.reconnect_on_client_expired,
            persistent_subscriptions: settings.persistent_subscriptions,
            retry_on_transport_error: settings.retry_on_transport_error,
            disconnect_timeout: Duration::from_millis(settings.disconnect_timeout_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
        }
    }
}

/// A publish waiting for the server's acknowledgement.
pub(crate) struct PendingPublish {
    pub channel: String,
    pub data: Value,
    pub hooks: PublishHooks,
}

/// Everything guarded by the client's session lock.
pub(crate) struct Session {
    pub state: CometState,
    pub client_id: Option<String>,
    pub advice: Option<Advice>,
    pub options: ClientOptions,
    pub subscriptions: Vec<Arc<Subscription>>,
    /// Keyed by the id of the `/meta/subscribe` message.
    pub pending_subscriptions: HashMap<String, Vec<Arc<Subscription>>>,
    /// Keyed by the id of the publish message.
    pub pending_publishes: HashMap<String, PendingPublish>,
    /// Publishes issued before the session was connected.
    pub deferred_publishes: Vec<Message>,
    pub transport: Option<Arc<LongPollingTransport>>,
    /// Bumped whenever the session is restarted or ended; timers armed
    /// under an older epoch do nothing.
    pub epoch: u64,
    /// Consecutive automatic handshakes or transport restarts.
    pub retry_attempts: u32,
    /// False between losing the transport and the next successful connect.
    pub receiving: bool,
    /// Id of the handshake or connect whose reply is awaited.
    pub session_request: Option<String>,
}

impl Session {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            state: CometState::Disconnected,
            client_id: None,
            advice: None,
            options,
            subscriptions: Vec::new(),
            pending_subscriptions: HashMap::new(),
            pending_publishes: HashMap::new(),
            deferred_publishes: Vec::new(),
            transport: None,
            epoch: 0,
            retry_attempts: 0,
            receiving: true,
            session_request: None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            CometState::Handshaking | CometState::Connecting | CometState::Connected
        )
    }

    /// Claims `reply` if it answers the handshake or connect in flight.
    /// Replies carrying no id are taken at face value.
    pub fn take_session_reply(&mut self, reply: &Message) -> bool {
        match &reply.id {
            None => true,
            Some(id) if self.session_request.as_ref() == Some(id) => {
                self.session_request = None;
                true
            }
            Some(_) => false,
        }
    }

    /// Drops unanswered `/meta/subscribe` entries for removed subscriptions.
    pub fn forget_pending(&mut self, removed: impl Fn(&Subscription) -> bool) {
        self.pending_subscriptions.retain(|_, waiting| {
            waiting.retain(|s| !removed(s.as_ref()));
            !waiting.is_empty()
        });
    }

    /// Delay before the `attempt`-th automatic retry: none for the first,
    /// then doubling from `INITIAL_BACKOFF`, capped by the advised interval
    /// or `max_backoff` when the server advised none.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        retry_delay(attempt, self.advice.as_ref(), self.options.max_backoff)
    }
}

pub(crate) fn retry_delay(
    attempt: u32,
    advice: Option<&Advice>,
    max_backoff: Duration,
) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let cap = advice
        .map(Advice::interval)
        .filter(|interval| !interval.is_zero())
        .unwrap_or(max_backoff);
    let exponent = (attempt - 1).min(16);
    INITIAL_BACKOFF.saturating_mul(1 << exponent).min(cap)
}
