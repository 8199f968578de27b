//! Observer interfaces for client events.
//!
//! Every hook has an empty default body: implement only the events you care
//! about. The client only keeps `Weak` references to delegates.

use std::sync::Arc;

use serde_json::Value;

use crate::client::CometClient;
use crate::subscription::Subscription;
use crate::utils::error::CometError;

pub trait SubscriptionDelegate: Send + Sync {
    fn subscription_did_succeed(&self, _client: &CometClient, _subscription: &Subscription) {}

    fn subscription_did_fail(
        &self,
        _client: &CometClient,
        _subscription: &Subscription,
        _error: &CometError,
    ) {
    }
}

pub trait DataDelegate: Send + Sync {
    fn data_did_send(&self, _client: &CometClient, _data: &Value, _channel: &str) {}

    fn data_did_fail(
        &self,
        _client: &CometClient,
        _data: &Value,
        _channel: &str,
        _error: &CometError,
    ) {
    }
}

/// Session-level events. Also receives subscription and publish outcomes
/// that were not registered with their own hooks.
pub trait CometClientDelegate: SubscriptionDelegate + DataDelegate {
    fn handshake_did_succeed(&self, _client: &CometClient) {}

    fn handshake_did_fail(&self, _client: &CometClient, _error: &CometError) {}

    fn connect_did_succeed(&self, _client: &CometClient) {}

    fn connect_did_fail(&self, _client: &CometClient, _error: &CometError) {}

    /// The long poll was lost while connected.
    fn stopped_receiving_messages(&self, _client: &CometClient, _error: &CometError) {}

    /// First successful connect after `stopped_receiving_messages`.
    fn continued_receiving_messages(&self, _client: &CometClient) {}

    fn did_fail_with_transport_error(&self, _client: &CometClient, _error: &CometError) {}

    /// The server expired the session and the client will not re-handshake.
    fn client_expired(&self, _client: &CometClient) {}
}

pub type PublishSuccess = Arc<dyn Fn(&CometClient, &Value, &str) + Send + Sync>;
pub type PublishFailure = Arc<dyn Fn(&CometClient, &Value, &str, &CometError) + Send + Sync>;

/// Outcome hooks of one publish.
#[derive(Clone, Default)]
pub struct PublishHooks {
    pub on_success: Option<PublishSuccess>,
    pub on_failure: Option<PublishFailure>,
}

impl PublishHooks {
    pub fn new(
        on_success: impl Fn(&CometClient, &Value, &str) + Send + Sync + 'static,
        on_failure: impl Fn(&CometClient, &Value, &str, &CometError) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_success: Some(Arc::new(on_success)),
            on_failure: Some(Arc::new(on_failure)),
        }
    }

    pub fn from_delegate<D: DataDelegate + 'static>(delegate: &Arc<D>) -> Self {
        let on_success = Arc::downgrade(delegate);
        let on_failure = Arc::downgrade(delegate);
        Self {
            on_success: Some(Arc::new(
                move |client: &CometClient, data: &Value, channel: &str| {
                    if let Some(delegate) = on_success.upgrade() {
                        delegate.data_did_send(client, data, channel);
                    }
                },
            )),
            on_failure: Some(Arc::new(
                move |client: &CometClient, data: &Value, channel: &str, err: &CometError| {
                    if let Some(delegate) = on_failure.upgrade() {
                        delegate.data_did_fail(client, data, channel, err);
                    }
                },
            )),
        }
    }
}
