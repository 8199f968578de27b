//! The Bayeux client: session state machine, subscription bookkeeping and
//! the public API.
//!
//! Concurrency notes:
//! - Every public call only enqueues work and returns; outcomes arrive on
//!   hooks or the delegate, invoked from the queue processor task.
//! - One lock (`Session`) covers the state, the subscription set and the
//!   pending tables. Callbacks are collected while it is held and run after
//!   it is released, so a callback may call back into the client.
//! - The transport and the processor only hold `Weak` references; dropping
//!   the last `CometClient` cancels both.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::channel;
use crate::client::delegate::{
    CometClientDelegate, DataDelegate, PublishHooks, SubscriptionDelegate,
};
use crate::client::processor;
use crate::client::state::{ClientOptions, CometState, PendingPublish, Session};
use crate::config::ClientSettings;
use crate::message::{
    Advice, BAYEUX_VERSION, LONG_POLLING, META_CONNECT, META_DISCONNECT, META_HANDSHAKE,
    META_SUBSCRIBE, META_UNSUBSCRIBE, Message, Reconnect,
};
use crate::queue::MessageQueue;
use crate::subscription::{MessageCallback, Subscription, SubscriptionHooks};
use crate::transport::{HttpClient, LongPollingTransport, ReqwestHttpClient, TransportOwner};
use crate::utils::error::CometError;

/// Work to run once the session lock has been released.
type Deferred = Box<dyn FnOnce(&CometClient) + Send>;

pub(crate) struct ClientInner {
    this: Weak<ClientInner>,
    endpoint: Url,
    http: Arc<dyn HttpClient>,
    message_counter: AtomicU64,
    outgoing: Arc<MessageQueue>,
    incoming: Arc<MessageQueue>,
    session: Mutex<Session>,
    delegate: RwLock<Option<Weak<dyn CometClientDelegate>>>,
    runtime: Mutex<Option<Handle>>,
    processor: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a Bayeux session against one endpoint. Cheap to clone; all
/// clones drive the same session.
#[derive(Clone)]
pub struct CometClient {
    inner: Arc<ClientInner>,
}

impl CometClient {
    /// A client using the default `reqwest` HTTP stack.
    pub fn new(endpoint: Url) -> Self {
        Self::with_http_client(
            endpoint,
            Arc::new(ReqwestHttpClient::new()),
            ClientOptions::default(),
        )
    }

    pub fn with_http_client(
        endpoint: Url,
        http: Arc<dyn HttpClient>,
        options: ClientOptions,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| ClientInner {
            this: this.clone(),
            endpoint,
            http,
            message_counter: AtomicU64::new(0),
            outgoing: Arc::new(MessageQueue::new()),
            incoming: Arc::new(MessageQueue::new()),
            session: Mutex::new(Session::new(options)),
            delegate: RwLock::new(None),
            runtime: Mutex::new(None),
            processor: Mutex::new(None),
        });
        Self { inner }
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self, CometError> {
        let endpoint = Url::parse(&settings.endpoint).map_err(|e| {
            CometError::InvalidOperation(format!("invalid endpoint {:?}: {e}", settings.endpoint))
        })?;
        let http =
            ReqwestHttpClient::with_timeout(Duration::from_secs(settings.request_timeout_secs));
        Ok(Self::with_http_client(
            endpoint,
            Arc::new(http),
            ClientOptions::from(settings),
        ))
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    /// Attaches the client's background work (transport loop, queue
    /// processor, timers) to `runtime`. Must be called before `handshake`.
    pub fn schedule_on(&self, runtime: Handle) {
        *lock(&self.inner.runtime) = Some(runtime);
    }

    pub fn set_delegate<D: CometClientDelegate + 'static>(&self, delegate: &Arc<D>) {
        let weak = Arc::downgrade(delegate);
        let weak: Weak<dyn CometClientDelegate> = weak;
        *self
            .inner
            .delegate
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(weak);
    }

    pub fn clear_delegate(&self) {
        *self
            .inner
            .delegate
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    // ----- accessors -----

    pub fn client_id(&self) -> Option<String> {
        self.session().client_id.clone()
    }

    pub fn endpoint_url(&self) -> &Url {
        &self.inner.endpoint
    }

    pub fn state(&self) -> CometState {
        self.session().state
    }

    pub fn advice(&self) -> Option<Advice> {
        self.session().advice.clone()
    }

    pub fn subscriptions(&self) -> Vec<Arc<Subscription>> {
        self.session().subscriptions.clone()
    }

    pub fn options(&self) -> ClientOptions {
        self.session().options.clone()
    }

    pub fn allow_duplicate_subscriptions(&self) -> bool {
        self.session().options.allow_duplicate_subscriptions
    }

    pub fn set_allow_duplicate_subscriptions(&self, allow: bool) {
        self.session().options.allow_duplicate_subscriptions = allow;
    }

    pub fn reconnect_on_client_expired(&self) -> bool {
        self.session().options.reconnect_on_client_expired
    }

    pub fn set_reconnect_on_client_expired(&self, reconnect: bool) {
        self.session().options.reconnect_on_client_expired = reconnect;
    }

    pub fn persistent_subscriptions(&self) -> bool {
        self.session().options.persistent_subscriptions
    }

    pub fn set_persistent_subscriptions(&self, persistent: bool) {
        self.session().options.persistent_subscriptions = persistent;
    }

    pub fn set_retry_on_transport_error(&self, retry: bool) {
        self.session().options.retry_on_transport_error = retry;
    }

    // ----- session lifecycle -----

    /// Starts a new session. Fails immediately if one is already running or
    /// the client has not been attached to a runtime.
    pub fn handshake(&self) -> Result<Message, CometError> {
        let runtime = self.runtime().ok_or_else(|| {
            CometError::InvalidOperation(
                "client is not attached to a runtime; call schedule_on first".to_string(),
            )
        })?;

        let mut effects = Vec::new();
        let message = {
            let mut session = self.session();
            match session.state {
                CometState::Disconnected | CometState::TransportError => {}
                state => {
                    return Err(CometError::InvalidOperation(format!(
                        "cannot handshake while {state}"
                    )));
                }
            }

            self.invalidate_pending(&mut session, &CometError::Disconnected, &mut effects);
            session.retry_attempts = 0;
            session.receiving = true;
            let message = self.begin_handshake(&mut session);
            self.restart_transport(&mut session, &runtime);
            message
        };

        self.ensure_processor(&runtime);
        self.run(effects);
        Ok(message)
    }

    /// Ends the session. Completes when the server answers or after the
    /// disconnect timeout, whichever comes first.
    pub fn disconnect(&self) -> Result<Message, CometError> {
        let mut effects = Vec::new();
        let message = {
            let mut session = self.session();
            let previous = session.state;
            match previous {
                CometState::Handshaking
                | CometState::Connecting
                | CometState::Connected
                | CometState::TransportError => {}
                state => {
                    return Err(CometError::InvalidOperation(format!(
                        "cannot disconnect while {state}"
                    )));
                }
            }

            let mut message = Message::new(META_DISCONNECT);
            message.id = Some(self.next_message_id());
            message.client_id = session.client_id.clone();

            session.state = CometState::Disconnecting;
            session.epoch += 1;
            info!(client_id = ?session.client_id, "disconnecting");

            match self.runtime() {
                Some(runtime) => {
                    if previous == CometState::TransportError {
                        self.restart_transport(&mut session, &runtime);
                    }
                    self.inner.outgoing.enqueue(message.clone());
                    self.arm_disconnect_timeout(
                        &runtime,
                        session.epoch,
                        session.options.disconnect_timeout,
                    );
                }
                None => self.end_session(&mut session, &CometError::Disconnected, &mut effects),
            }
            message
        };

        self.run(effects);
        Ok(message)
    }

    // ----- subscriptions -----

    pub fn subscribe(
        &self,
        channel: &str,
        callback: &MessageCallback,
    ) -> Result<Arc<Subscription>, CometError> {
        self.subscribe_with_hooks(channel, callback, SubscriptionHooks::default())
    }

    pub fn subscribe_with_delegate<D: SubscriptionDelegate + 'static>(
        &self,
        channel: &str,
        callback: &MessageCallback,
        delegate: &Arc<D>,
    ) -> Result<Arc<Subscription>, CometError> {
        self.subscribe_with_hooks(channel, callback, SubscriptionHooks::from_delegate(delegate))
    }

    pub fn subscribe_with_handlers(
        &self,
        channel: &str,
        callback: &MessageCallback,
        on_success: impl Fn(&CometClient, &Subscription) + Send + Sync + 'static,
        on_failure: impl Fn(&CometClient, &Subscription, &CometError) + Send + Sync + 'static,
    ) -> Result<Arc<Subscription>, CometError> {
        self.subscribe_with_hooks(channel, callback, SubscriptionHooks::new(on_success, on_failure))
    }

    /// Registers `callback` for messages on `channel` (a name or pattern).
    ///
    /// While connected the `/meta/subscribe` goes out immediately; before
    /// that the subscription is held and sent once the session connects.
    pub fn subscribe_with_hooks(
        &self,
        channel: &str,
        callback: &MessageCallback,
        hooks: SubscriptionHooks,
    ) -> Result<Arc<Subscription>, CometError> {
        channel::validate(channel)?;
        if channel::is_meta(channel) {
            return Err(CometError::InvalidChannel(format!(
                "cannot subscribe to meta channel {channel}"
            )));
        }

        let mut effects = Vec::new();
        let subscription = {
            let mut session = self.session();
            if !session.options.allow_duplicate_subscriptions {
                if let Some(existing) = session
                    .subscriptions
                    .iter()
                    .find(|s| s.is_equivalent(channel, callback))
                {
                    debug!(channel, "reusing existing subscription");
                    return Ok(existing.clone());
                }
            }

            let subscription = Arc::new(Subscription::with_hooks(channel, callback, hooks));
            session.subscriptions.push(subscription.clone());

            if session.state == CometState::Connected {
                if let Some(request) =
                    self.request_subscription(&mut session, &subscription, &mut effects)
                {
                    self.inner.outgoing.enqueue(request);
                }
            } else {
                debug!(channel, state = %session.state, "holding subscription until connected");
            }
            subscription
        };

        self.run(effects);
        Ok(subscription)
    }

    /// Returns the `/meta/unsubscribe` sent, if the server had to be told.
    pub fn unsubscribe(&self, subscription: &Subscription) -> Option<Message> {
        let mut session = self.session();
        let before = session.subscriptions.len();
        session
            .subscriptions
            .retain(|s| !std::ptr::eq(s.as_ref(), subscription));
        if session.subscriptions.len() == before {
            return None;
        }
        session.forget_pending(|s| std::ptr::eq(s, subscription));
        self.release_channel(&mut session, subscription.channel())
    }

    /// Removes every subscription of `callback` on `channel`.
    pub fn unsubscribe_from_channel(
        &self,
        channel: &str,
        callback: &MessageCallback,
    ) -> Option<Message> {
        let mut session = self.session();
        let before = session.subscriptions.len();
        session
            .subscriptions
            .retain(|s| !s.is_equivalent(channel, callback));
        if session.subscriptions.len() == before {
            return None;
        }
        session.forget_pending(|s| s.is_equivalent(channel, callback));
        self.release_channel(&mut session, channel)
    }

    pub fn unsubscribe_all(&self) -> Vec<Message> {
        let mut session = self.session();
        let removed = std::mem::take(&mut session.subscriptions);
        session.pending_subscriptions.clear();
        if session.state != CometState::Connected {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let requests: Vec<Message> = removed
            .iter()
            .filter(|s| seen.insert(s.channel().to_string()))
            .map(|s| self.channel_request(&session, META_UNSUBSCRIBE, s.channel()))
            .collect();
        info!(count = requests.len(), "unsubscribing from all channels");
        self.inner.outgoing.enqueue_all(requests.clone());
        requests
    }

    // ----- publishing -----

    pub fn publish(&self, data: Value, channel: &str) -> Result<Message, CometError> {
        self.publish_with_hooks(data, channel, PublishHooks::default())
    }

    pub fn publish_with_delegate<D: DataDelegate + 'static>(
        &self,
        data: Value,
        channel: &str,
        delegate: &Arc<D>,
    ) -> Result<Message, CometError> {
        self.publish_with_hooks(data, channel, PublishHooks::from_delegate(delegate))
    }

    pub fn publish_with_handlers(
        &self,
        data: Value,
        channel: &str,
        on_success: impl Fn(&CometClient, &Value, &str) + Send + Sync + 'static,
        on_failure: impl Fn(&CometClient, &Value, &str, &CometError) + Send + Sync + 'static,
    ) -> Result<Message, CometError> {
        self.publish_with_hooks(data, channel, PublishHooks::new(on_success, on_failure))
    }

    /// Publishes `data` on `channel`. A publish issued while the session is
    /// still being established is held and sent with the first connect.
    pub fn publish_with_hooks(
        &self,
        data: Value,
        channel: &str,
        hooks: PublishHooks,
    ) -> Result<Message, CometError> {
        channel::validate(channel)?;
        if channel::is_meta(channel) || channel::is_wildcard(channel) {
            return Err(CometError::InvalidChannel(format!(
                "cannot publish to {channel}"
            )));
        }

        let mut session = self.session();
        let mut message = Message::new(channel);
        message.id = Some(self.next_message_id());
        message.data = Some(data.clone());

        let deferred = match session.state {
            CometState::Connected => false,
            CometState::Handshaking | CometState::Connecting => true,
            state => {
                return Err(CometError::InvalidOperation(format!(
                    "cannot publish while {state}"
                )));
            }
        };

        let id = message.id.clone().unwrap_or_default();
        session.pending_publishes.insert(
            id,
            PendingPublish {
                channel: channel.to_string(),
                data,
                hooks,
            },
        );

        if deferred {
            debug!(channel, "holding publish until connected");
            session.deferred_publishes.push(message.clone());
        } else {
            message.client_id = session.client_id.clone();
            self.inner.outgoing.enqueue(message.clone());
        }
        Ok(message)
    }

    // ----- incoming messages -----

    /// Routes one message from the server. Called by the queue processor.
    pub(crate) fn handle_message(&self, message: Message) {
        let mut effects = Vec::new();
        {
            let mut session = self.session();
            if let Some(advice) = &message.advice {
                session.advice = Some(advice.clone());
            }

            if message.is_meta() {
                match message.channel.as_str() {
                    META_HANDSHAKE => self.handle_handshake(&mut session, &message, &mut effects),
                    META_CONNECT => self.handle_connect(&mut session, &message, &mut effects),
                    META_SUBSCRIBE => self.handle_subscribe(&mut session, &message, &mut effects),
                    META_UNSUBSCRIBE => handle_unsubscribe(&message),
                    META_DISCONNECT => self.handle_disconnect(&mut session, &message, &mut effects),
                    other => debug!(channel = other, "ignoring unknown meta message"),
                }
            } else if message.successful.is_some() {
                self.handle_publish_reply(&mut session, &message, &mut effects);
            } else {
                let matching: Vec<Arc<Subscription>> = session
                    .subscriptions
                    .iter()
                    .filter(|s| s.matches_channel(&message.channel))
                    .cloned()
                    .collect();
                if matching.is_empty() {
                    debug!(channel = %message.channel, "no subscription for delivered message");
                } else {
                    effects.push(Box::new(move |_: &CometClient| {
                        for subscription in &matching {
                            subscription.deliver(&message);
                        }
                    }));
                }
            }
        }
        self.run(effects);
    }

    fn handle_handshake(
        &self,
        session: &mut Session,
        message: &Message,
        effects: &mut Vec<Deferred>,
    ) {
        if session.state != CometState::Handshaking || !session.take_session_reply(message) {
            debug!(state = %session.state, id = ?message.id, "ignoring stale handshake response");
            return;
        }

        if message.is_successful() {
            session.client_id = message.client_id.clone();
            session.state = CometState::Connecting;
            info!(client_id = ?session.client_id, "handshake succeeded");
            let connect = self.connect_message(session);
            self.inner.outgoing.enqueue(connect);
            effects.push(notify(|d, c| d.handshake_did_succeed(c)));
            return;
        }

        let error = message.failure();
        warn!(%error, "handshake failed");
        let err = error.clone();
        effects.push(notify(move |d, c| d.handshake_did_fail(c, &err)));

        let reconnect = session.advice.as_ref().map(Advice::reconnect);
        if session.retry_attempts > 0 && reconnect != Some(Reconnect::None) {
            // an automatic re-handshake keeps trying with backoff
            self.schedule_rehandshake(session);
        } else {
            self.end_session(session, &error, effects);
        }
    }

    fn handle_connect(
        &self,
        session: &mut Session,
        message: &Message,
        effects: &mut Vec<Deferred>,
    ) {
        if !matches!(session.state, CometState::Connecting | CometState::Connected)
            || !session.take_session_reply(message)
        {
            debug!(state = %session.state, id = ?message.id, "ignoring stale connect response");
            return;
        }

        if message.is_successful() {
            let newly_connected = session.state == CometState::Connecting;
            session.state = CometState::Connected;
            session.retry_attempts = 0;

            if !session.receiving {
                session.receiving = true;
                effects.push(notify(|d, c| d.continued_receiving_messages(c)));
            }

            let advice = session.advice.clone().unwrap_or_default();
            if advice.reconnect() == Reconnect::None {
                info!("server advised not to reconnect; ending session");
                self.end_session(session, &CometError::Disconnected, effects);
                return;
            }

            // the long poll is re-armed ahead of anything else in the batch
            let mut batch = Vec::new();
            if advice.interval().is_zero() {
                batch.push(self.connect_message(session));
            } else {
                self.arm_connect(session, advice.interval());
            }

            if newly_connected {
                info!(client_id = ?session.client_id, "connected");
                for subscription in session.subscriptions.clone() {
                    if let Some(request) =
                        self.request_subscription(session, &subscription, effects)
                    {
                        batch.push(request);
                    }
                }
                let client_id = session.client_id.clone();
                for mut publish in std::mem::take(&mut session.deferred_publishes) {
                    publish.client_id = client_id.clone();
                    batch.push(publish);
                }
                effects.push(notify(|d, c| d.connect_did_succeed(c)));
            }

            self.inner.outgoing.enqueue_all(batch);
            return;
        }

        let error = message.failure();
        if error == CometError::SessionExpired {
            if session.options.reconnect_on_client_expired {
                info!("session expired; handshaking again");
                self.schedule_rehandshake(session);
            } else {
                warn!("session expired");
                self.end_session(session, &error, effects);
                effects.push(notify(|d, c| d.client_expired(c)));
            }
            return;
        }

        warn!(%error, "connect failed");
        let err = error.clone();
        effects.push(notify(move |d, c| d.connect_did_fail(c, &err)));

        match session.advice.as_ref().map(Advice::reconnect).unwrap_or(Reconnect::Retry) {
            Reconnect::Retry => {
                session.retry_attempts += 1;
                let interval = session
                    .advice
                    .as_ref()
                    .map(Advice::interval)
                    .unwrap_or_default();
                let delay = interval.max(session.retry_delay(session.retry_attempts));
                debug!(delay_ms = delay.as_millis() as u64, "retrying connect");
                self.arm_connect(session, delay);
            }
            Reconnect::Handshake => self.schedule_rehandshake(session),
            Reconnect::None => self.end_session(session, &error, effects),
        }
    }

    fn handle_subscribe(
        &self,
        session: &mut Session,
        message: &Message,
        effects: &mut Vec<Deferred>,
    ) {
        let Some(subscriptions) = message
            .id
            .as_ref()
            .and_then(|id| session.pending_subscriptions.remove(id))
        else {
            debug!(id = ?message.id, "subscribe response without a pending request");
            return;
        };

        if message.is_successful() {
            debug!(subscription = ?message.subscription, "subscribed");
            for subscription in subscriptions {
                effects.push(subscription_succeeded(subscription));
            }
            return;
        }

        let error = message.failure();
        warn!(%error, "subscribe failed");
        session
            .subscriptions
            .retain(|s| !subscriptions.iter().any(|failed| Arc::ptr_eq(s, failed)));
        for subscription in subscriptions {
            effects.push(subscription_failed(subscription, error.clone()));
        }
    }

    fn handle_disconnect(
        &self,
        session: &mut Session,
        message: &Message,
        effects: &mut Vec<Deferred>,
    ) {
        if session.state != CometState::Disconnecting {
            debug!(state = %session.state, "ignoring disconnect response");
            return;
        }
        info!(successful = message.is_successful(), "disconnected");
        self.end_session(session, &CometError::Disconnected, effects);
    }

    fn handle_publish_reply(
        &self,
        session: &mut Session,
        message: &Message,
        effects: &mut Vec<Deferred>,
    ) {
        let pending = message
            .id
            .as_ref()
            .and_then(|id| session.pending_publishes.remove(id));
        let Some(pending) = pending else {
            debug!(
                id = ?message.id,
                channel = %message.channel,
                "publish response without a pending request"
            );
            return;
        };

        if message.is_successful() {
            effects.push(publish_succeeded(pending));
        } else {
            let error = message.failure();
            warn!(%error, channel = %pending.channel, "publish failed");
            effects.push(publish_failed(pending, error));
        }
    }

    /// Called when the batch `messages` could not be exchanged with the server.
    fn handle_connection_failed(&self, error: CometError, messages: Vec<Message>) {
        let mut effects = Vec::new();
        {
            let mut session = self.session();
            let mut session_lost = false;

            for message in &messages {
                let id = message.id.as_deref().unwrap_or_default();
                match message.channel.as_str() {
                    META_HANDSHAKE => {
                        session_lost = true;
                        let err = error.clone();
                        effects.push(notify(move |d, c| d.handshake_did_fail(c, &err)));
                    }
                    META_CONNECT => {
                        session_lost = true;
                        let err = error.clone();
                        effects.push(notify(move |d, c| d.connect_did_fail(c, &err)));
                    }
                    META_SUBSCRIBE => {
                        if let Some(subscriptions) = session.pending_subscriptions.remove(id) {
                            if !session.options.persistent_subscriptions {
                                session.subscriptions.retain(|s| {
                                    !subscriptions.iter().any(|failed| Arc::ptr_eq(s, failed))
                                });
                            }
                            for subscription in subscriptions {
                                effects.push(subscription_failed(subscription, error.clone()));
                            }
                        }
                    }
                    META_UNSUBSCRIBE => {}
                    META_DISCONNECT => {
                        if session.state == CometState::Disconnecting {
                            self.end_session(&mut session, &CometError::Disconnected, &mut effects);
                        }
                    }
                    _ => {
                        if let Some(pending) = session.pending_publishes.remove(id) {
                            effects.push(publish_failed(pending, error.clone()));
                        }
                    }
                }
            }

            if session_lost && session.is_active() {
                let was_connected = session.state == CometState::Connected;
                let resume_with_connect = session.client_id.is_some()
                    && session.state != CometState::Handshaking;
                session.state = CometState::TransportError;
                session.epoch += 1;
                warn!(%error, "transport error");

                let err = error.clone();
                effects.push(notify(move |d, c| d.did_fail_with_transport_error(c, &err)));
                if was_connected && session.receiving {
                    session.receiving = false;
                    let err = error.clone();
                    effects.push(notify(move |d, c| d.stopped_receiving_messages(c, &err)));
                }

                if !session.options.persistent_subscriptions {
                    session.subscriptions.clear();
                }
                if session.options.retry_on_transport_error {
                    self.schedule_transport_retry(&mut session, resume_with_connect);
                } else {
                    // nothing will flush them now
                    for held in std::mem::take(&mut session.deferred_publishes) {
                        let id = held.id.unwrap_or_default();
                        if let Some(pending) = session.pending_publishes.remove(&id) {
                            effects.push(publish_failed(pending, error.clone()));
                        }
                    }
                }
            }
        }
        self.run(effects);
    }

    // ----- internals -----

    pub(crate) fn next_message_id(&self) -> String {
        (self.inner.message_counter.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        lock(&self.inner.session)
    }

    fn runtime(&self) -> Option<Handle> {
        lock(&self.inner.runtime).clone()
    }

    fn delegate(&self) -> Option<Arc<dyn CometClientDelegate>> {
        self.inner
            .delegate
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn run(&self, effects: Vec<Deferred>) {
        for effect in effects {
            effect(self);
        }
    }

    fn ensure_processor(&self, runtime: &Handle) {
        let mut processor = lock(&self.inner.processor);
        if processor.as_ref().is_some_and(|p| !p.is_finished()) {
            return;
        }
        *processor = Some(processor::spawn(
            runtime,
            self.inner.incoming.clone(),
            Arc::downgrade(&self.inner),
        ));
    }

    fn restart_transport(&self, session: &mut Session, runtime: &Handle) {
        if let Some(old) = session.transport.take() {
            old.cancel();
        }
        let owner: Weak<dyn TransportOwner> = self.inner.this.clone() as Weak<dyn TransportOwner>;
        let transport = LongPollingTransport::new(
            self.inner.endpoint.clone(),
            self.inner.http.clone(),
            self.inner.outgoing.clone(),
            self.inner.incoming.clone(),
            owner,
        );
        transport.start(runtime);
        session.transport = Some(transport);
    }

    fn begin_handshake(&self, session: &mut Session) -> Message {
        session.state = CometState::Handshaking;
        session.client_id = None;
        session.epoch += 1;

        let mut message = Message::new(META_HANDSHAKE);
        message.id = Some(self.next_message_id());
        message.version = Some(BAYEUX_VERSION.to_string());
        message.minimum_version = Some(BAYEUX_VERSION.to_string());
        message.supported_connection_types = Some(vec![LONG_POLLING.to_string()]);
        session.session_request = message.id.clone();

        info!(endpoint = %self.inner.endpoint, "handshaking");
        self.inner.outgoing.enqueue(message.clone());
        message
    }

    /// Re-handshake without the application asking: after an expired
    /// session, on `reconnect: handshake` advice, or after a failed
    /// automatic handshake.
    fn schedule_rehandshake(&self, session: &mut Session) {
        let delay = session.retry_delay(session.retry_attempts);
        session.retry_attempts += 1;

        session.state = CometState::Handshaking;
        session.client_id = None;
        session.epoch += 1;
        // unanswered subscribes are replayed after the new handshake
        session.pending_subscriptions.clear();
        if !session.options.persistent_subscriptions {
            session.subscriptions.clear();
        }

        if delay.is_zero() {
            self.begin_handshake(session);
            return;
        }

        debug!(delay_ms = delay.as_millis() as u64, "delaying re-handshake");
        let epoch = session.epoch;
        self.after(delay, move |client| {
            let mut session = client.session();
            if session.epoch == epoch && session.state == CometState::Handshaking {
                client.begin_handshake(&mut session);
            }
        });
    }

    fn schedule_transport_retry(&self, session: &mut Session, resume_with_connect: bool) {
        session.retry_attempts += 1;
        let delay = session.retry_delay(session.retry_attempts);
        let epoch = session.epoch;
        info!(delay_ms = delay.as_millis() as u64, "retrying after transport error");

        self.after(delay, move |client| {
            let Some(runtime) = client.runtime() else {
                return;
            };
            let mut session = client.session();
            if session.epoch != epoch || session.state != CometState::TransportError {
                return;
            }
            client.restart_transport(&mut session, &runtime);
            if resume_with_connect {
                session.state = CometState::Connecting;
                let connect = client.connect_message(&mut session);
                client.inner.outgoing.enqueue(connect);
            } else {
                client.begin_handshake(&mut session);
            }
        });
    }

    /// Queues the next `/meta/connect` once `delay` has passed, unless the
    /// session moved on in the meantime.
    fn arm_connect(&self, session: &mut Session, delay: Duration) {
        if delay.is_zero() {
            let connect = self.connect_message(session);
            self.inner.outgoing.enqueue(connect);
            return;
        }
        let epoch = session.epoch;
        self.after(delay, move |client| {
            let mut session = client.session();
            if session.epoch == epoch
                && matches!(session.state, CometState::Connecting | CometState::Connected)
            {
                let connect = client.connect_message(&mut session);
                client.inner.outgoing.enqueue(connect);
            }
        });
    }

    fn arm_disconnect_timeout(&self, runtime: &Handle, epoch: u64, timeout: Duration) {
        let weak = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let client = CometClient::from_inner(inner);
            let mut effects = Vec::new();
            {
                let mut session = client.session();
                if session.epoch != epoch || session.state != CometState::Disconnecting {
                    return;
                }
                warn!("disconnect timed out; closing locally");
                client.end_session(&mut session, &CometError::Disconnected, &mut effects);
            }
            client.run(effects);
        });
    }

    /// Runs `f` on the attached runtime after `delay`, if the client still exists.
    fn after(&self, delay: Duration, f: impl FnOnce(&CometClient) + Send + 'static) {
        let Some(runtime) = self.runtime() else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                f(&CometClient::from_inner(inner));
            }
        });
    }

    fn end_session(&self, session: &mut Session, error: &CometError, effects: &mut Vec<Deferred>) {
        session.state = CometState::Disconnected;
        session.epoch += 1;
        session.client_id = None;
        session.session_request = None;
        if let Some(transport) = session.transport.take() {
            transport.cancel();
        }
        self.invalidate_pending(session, error, effects);
        if !session.options.persistent_subscriptions {
            session.subscriptions.clear();
        }
    }

    /// Fails everything still waiting on the previous session.
    fn invalidate_pending(
        &self,
        session: &mut Session,
        error: &CometError,
        effects: &mut Vec<Deferred>,
    ) {
        let stale = self.inner.outgoing.dequeue_all();
        if !stale.is_empty() {
            debug!(count = stale.len(), "dropping unsent messages");
        }
        session.deferred_publishes.clear();

        for (_, pending) in session.pending_publishes.drain() {
            effects.push(publish_failed(pending, error.clone()));
        }

        let pending_subscriptions: Vec<_> = session.pending_subscriptions.drain().collect();
        if !session.options.persistent_subscriptions {
            for (_, subscriptions) in pending_subscriptions {
                for subscription in subscriptions {
                    effects.push(subscription_failed(subscription, error.clone()));
                }
            }
        }
    }

    fn connect_message(&self, session: &mut Session) -> Message {
        let mut message = Message::new(META_CONNECT);
        message.id = Some(self.next_message_id());
        message.client_id = session.client_id.clone();
        message.connection_type = Some(LONG_POLLING.to_string());
        session.session_request = message.id.clone();
        message
    }

    fn channel_request(&self, session: &Session, meta: &str, channel: &str) -> Message {
        let mut message = Message::new(meta);
        message.id = Some(self.next_message_id());
        message.client_id = session.client_id.clone();
        message.subscription = Some(channel.to_string());
        message
    }

    /// Builds the `/meta/subscribe` for `subscription`, or resolves it
    /// locally when a wildcard subscription already covers its channel.
    fn request_subscription(
        &self,
        session: &mut Session,
        subscription: &Arc<Subscription>,
        effects: &mut Vec<Deferred>,
    ) -> Option<Message> {
        let covered = session.subscriptions.iter().any(|other| {
            !Arc::ptr_eq(other, subscription) && other.is_parent_channel(subscription.channel())
        });
        if covered {
            debug!(channel = subscription.channel(), "already covered by a wildcard subscription");
            effects.push(subscription_succeeded(subscription.clone()));
            return None;
        }

        let request = self.channel_request(session, META_SUBSCRIBE, subscription.channel());
        let id = request.id.clone().unwrap_or_default();
        session
            .pending_subscriptions
            .entry(id)
            .or_default()
            .push(subscription.clone());
        Some(request)
    }

    /// Tells the server to stop sending `channel` once nothing local needs it.
    /// Subscriptions that only received messages through it are re-subscribed.
    fn release_channel(&self, session: &mut Session, channel: &str) -> Option<Message> {
        if session.state != CometState::Connected {
            return None;
        }
        if session.subscriptions.iter().any(|s| s.channel() == channel) {
            return None;
        }

        let unsubscribe = self.channel_request(session, META_UNSUBSCRIBE, channel);
        let mut batch = vec![unsubscribe.clone()];

        let orphans: Vec<Arc<Subscription>> = session
            .subscriptions
            .iter()
            .filter(|s| channel::is_parent(channel, s.channel()))
            .filter(|s| {
                !session
                    .subscriptions
                    .iter()
                    .any(|other| other.is_parent_channel(s.channel()))
            })
            .cloned()
            .collect();
        let mut resubscribed = HashSet::new();
        let mut effects = Vec::new();
        for orphan in orphans {
            if resubscribed.insert(orphan.channel().to_string()) {
                if let Some(request) = self.request_subscription(session, &orphan, &mut effects) {
                    batch.push(request);
                }
            }
        }

        info!(channel, "unsubscribing");
        self.inner.outgoing.enqueue_all(batch);
        Some(unsubscribe)
    }
}

impl TransportOwner for ClientInner {
    fn connection_failed(&self, error: CometError, messages: Vec<Message>) {
        if let Some(inner) = self.this.upgrade() {
            CometClient::from_inner(inner).handle_connection_failed(error, messages);
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let session = self.session.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(transport) = session.transport.take() {
            transport.cancel();
        }
        let processor = self
            .processor
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(processor) = processor.take() {
            processor.abort();
        }
    }
}

fn handle_unsubscribe(message: &Message) {
    if message.is_successful() {
        debug!(subscription = ?message.subscription, "unsubscribed");
    } else {
        warn!(error = %message.failure(), "unsubscribe failed");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn notify(f: impl FnOnce(&dyn CometClientDelegate, &CometClient) + Send + 'static) -> Deferred {
    Box::new(move |client: &CometClient| {
        if let Some(delegate) = client.delegate() {
            f(delegate.as_ref(), client);
        }
    })
}

fn subscription_succeeded(subscription: Arc<Subscription>) -> Deferred {
    Box::new(move |client: &CometClient| match &subscription.hooks().on_success {
        Some(hook) => hook(client, subscription.as_ref()),
        None => {
            if let Some(delegate) = client.delegate() {
                delegate.subscription_did_succeed(client, &subscription);
            }
        }
    })
}

fn subscription_failed(subscription: Arc<Subscription>, error: CometError) -> Deferred {
    Box::new(move |client: &CometClient| match &subscription.hooks().on_failure {
        Some(hook) => hook(client, subscription.as_ref(), &error),
        None => {
            if let Some(delegate) = client.delegate() {
                delegate.subscription_did_fail(client, &subscription, &error);
            }
        }
    })
}

fn publish_succeeded(pending: PendingPublish) -> Deferred {
    Box::new(move |client: &CometClient| match &pending.hooks.on_success {
        Some(hook) => hook(client, &pending.data, pending.channel.as_str()),
        None => {
            if let Some(delegate) = client.delegate() {
                delegate.data_did_send(client, &pending.data, &pending.channel);
            }
        }
    })
}

fn publish_failed(pending: PendingPublish, error: CometError) -> Deferred {
    Box::new(move |client: &CometClient| match &pending.hooks.on_failure {
        Some(hook) => hook(client, &pending.data, pending.channel.as_str(), &error),
        None => {
            if let Some(delegate) = client.delegate() {
                delegate.data_did_fail(client, &pending.data, &pending.channel, &error);
            }
        }
    })
}
