//! The `subscription` module binds a channel pattern to the callback that
//! receives its messages.
//!
//! A `Subscription` never keeps its callback alive: it holds a `Weak`
//! reference, and delivery to a callback that has been dropped is a silent
//! no-op. The application owns the `MessageCallback` for as long as it
//! wants messages.

use std::fmt;
use std::sync::{Arc, Weak};

use uuid::Uuid;

use crate::channel;
use crate::client::CometClient;
use crate::client::delegate::SubscriptionDelegate;
use crate::message::Message;
use crate::utils::error::CometError;

/// Receives every message published on a matching channel.
pub type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;

pub type SubscribeSuccess = Arc<dyn Fn(&CometClient, &Subscription) + Send + Sync>;
pub type SubscribeFailure = Arc<dyn Fn(&CometClient, &Subscription, &CometError) + Send + Sync>;

/// The two outcomes of a `/meta/subscribe` request. Either hook may be
/// absent, in which case the client delegate is consulted instead.
#[derive(Clone, Default)]
pub struct SubscriptionHooks {
    pub on_success: Option<SubscribeSuccess>,
    pub on_failure: Option<SubscribeFailure>,
}

impl SubscriptionHooks {
    pub fn new(
        on_success: impl Fn(&CometClient, &Subscription) + Send + Sync + 'static,
        on_failure: impl Fn(&CometClient, &Subscription, &CometError) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_success: Some(Arc::new(on_success)),
            on_failure: Some(Arc::new(on_failure)),
        }
    }

    /// Routes both outcomes to `delegate` without keeping it alive.
    pub fn from_delegate<D: SubscriptionDelegate + 'static>(delegate: &Arc<D>) -> Self {
        let on_success = Arc::downgrade(delegate);
        let on_failure = Arc::downgrade(delegate);
        Self {
            on_success: Some(Arc::new(move |client: &CometClient, sub: &Subscription| {
                if let Some(delegate) = on_success.upgrade() {
                    delegate.subscription_did_succeed(client, sub);
                }
            })),
            on_failure: Some(Arc::new(
                move |client: &CometClient, sub: &Subscription, err: &CometError| {
                    if let Some(delegate) = on_failure.upgrade() {
                        delegate.subscription_did_fail(client, sub, err);
                    }
                },
            )),
        }
    }
}

pub struct Subscription {
    id: Uuid,
    channel: String,
    callback: Weak<dyn Fn(&Message) + Send + Sync>,
    hooks: SubscriptionHooks,
    wildcard: bool,
}

impl Subscription {
    pub fn new(channel: &str, callback: &MessageCallback) -> Self {
        Self::with_hooks(channel, callback, SubscriptionHooks::default())
    }

    pub fn with_hooks(channel: &str, callback: &MessageCallback, hooks: SubscriptionHooks) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.to_string(),
            callback: Arc::downgrade(callback),
            hooks,
            wildcard: channel::is_wildcard(channel),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn hooks(&self) -> &SubscriptionHooks {
        &self.hooks
    }

    pub fn matches_channel(&self, channel: &str) -> bool {
        channel::matches(&self.channel, channel)
    }

    /// Whether this subscription already receives everything sent to `channel`.
    pub fn is_parent_channel(&self, channel: &str) -> bool {
        channel::is_parent(&self.channel, channel)
    }

    /// Whether the callback is still owned by someone.
    pub fn is_alive(&self) -> bool {
        self.callback.strong_count() > 0
    }

    /// Same channel and same callback instance.
    pub fn is_equivalent(&self, channel: &str, callback: &MessageCallback) -> bool {
        self.channel == channel && Weak::ptr_eq(&self.callback, &Arc::downgrade(callback))
    }

    /// Hands `message` to the callback. Returns `false` if the callback is gone.
    pub fn deliver(&self, message: &Message) -> bool {
        match self.callback.upgrade() {
            Some(callback) => {
                callback(message);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("wildcard", &self.wildcard)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests;
