//! The long-polling request/response loop.
//!
//! Each iteration drains the outgoing queue and POSTs the batch. A batch
//! that carries `/meta/connect` is the long poll: the server holds it until
//! it has something to say, so while it is outstanding anything newly
//! queued goes out in a side request. Decoded responses are appended to the
//! incoming queue in the order the server returned them.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use url::Url;

use crate::message::{META_CONNECT, META_HANDSHAKE, Message, decode_messages, encode_messages};
use crate::queue::MessageQueue;
use crate::transport::http::HttpClient;
use crate::utils::error::CometError;

/// The side of the client the transport reports failures to.
pub trait TransportOwner: Send + Sync {
    /// `messages` is the batch that was in flight when `error` happened.
    fn connection_failed(&self, error: CometError, messages: Vec<Message>);
}

pub struct LongPollingTransport {
    endpoint: Url,
    http: Arc<dyn HttpClient>,
    outgoing: Arc<MessageQueue>,
    incoming: Arc<MessageQueue>,
    owner: Weak<dyn TransportOwner>,
    cancelled: Mutex<bool>,
    cancel_notify: Notify,
}

impl LongPollingTransport {
    pub fn new(
        endpoint: Url,
        http: Arc<dyn HttpClient>,
        outgoing: Arc<MessageQueue>,
        incoming: Arc<MessageQueue>,
        owner: Weak<dyn TransportOwner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            http,
            outgoing,
            incoming,
            owner,
            cancelled: Mutex::new(false),
            cancel_notify: Notify::new(),
        })
    }

    /// Spawns the loop on `runtime`. It runs until `cancel` or until a
    /// handshake/connect batch fails.
    pub fn start(self: &Arc<Self>, runtime: &Handle) {
        runtime.spawn(self.clone().run());
    }

    /// No request is issued after this returns. A request already in flight
    /// completes, but its outcome is dropped.
    pub fn cancel(&self) {
        *self.lock_cancelled() = true;
        self.cancel_notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.lock_cancelled()
    }

    async fn run(self: Arc<Self>) {
        info!(endpoint = %self.endpoint, "long-polling transport started");

        loop {
            tokio::select! {
                biased;
                _ = self.wait_cancelled() => break,
                _ = self.outgoing.wait() => {}
            }

            let Some(batch) = self.take_batch() else {
                break;
            };
            if batch.is_empty() {
                continue;
            }

            let polling = batch.iter().any(|m| m.channel == META_CONNECT);
            let carries_session = polling || batch.iter().any(|m| m.channel == META_HANDSHAKE);

            let result = if polling {
                self.long_poll(&batch).await
            } else {
                self.exchange(&batch).await
            };

            if let Err(err) = result {
                self.report(err, batch);
                if carries_session {
                    break;
                }
            }
        }

        info!(endpoint = %self.endpoint, "long-polling transport stopped");
    }

    // Draining and the cancel flag share one lock so that a cancelled
    // transport never takes messages queued for its successor.
    fn take_batch(&self) -> Option<Vec<Message>> {
        let cancelled = self.lock_cancelled();
        if *cancelled {
            return None;
        }
        Some(self.outgoing.dequeue_all())
    }

    async fn long_poll(self: &Arc<Self>, batch: &[Message]) -> Result<(), CometError> {
        let poll = self.exchange(batch);
        tokio::pin!(poll);

        loop {
            tokio::select! {
                biased;
                result = &mut poll => return result,
                _ = self.outgoing.wait(), if !self.is_cancelled() => {
                    if let Some(side) = self.take_batch().filter(|b| !b.is_empty()) {
                        self.send_detached(side);
                    }
                }
            }
        }
    }

    fn send_detached(self: &Arc<Self>, batch: Vec<Message>) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.exchange(&batch).await {
                this.report(err, batch);
            }
        });
    }

    async fn exchange(&self, batch: &[Message]) -> Result<(), CometError> {
        let body = encode_messages(batch)?;
        debug!(
            count = batch.len(),
            channels = ?batch.iter().map(|m| m.channel.as_str()).collect::<Vec<_>>(),
            "sending batch"
        );

        let response = self.http.post(&self.endpoint, body).await?;
        if !response.is_success() {
            return Err(CometError::TransportFailure(format!(
                "server answered HTTP {}",
                response.status
            )));
        }

        let replies = decode_messages(&response.body)?;
        // held across the enqueue so nothing lands after `cancel` returns
        let cancelled = self.lock_cancelled();
        if *cancelled {
            debug!(count = replies.len(), "discarding response for cancelled transport");
            return Ok(());
        }
        debug!(count = replies.len(), "received batch");
        self.incoming.enqueue_all(replies);
        Ok(())
    }

    fn report(&self, error: CometError, messages: Vec<Message>) {
        if self.is_cancelled() {
            debug!(%error, "ignoring failure on cancelled transport");
            return;
        }
        warn!(%error, count = messages.len(), "batch failed");
        if let Some(owner) = self.owner.upgrade() {
            owner.connection_failed(error, messages);
        }
    }

    async fn wait_cancelled(&self) {
        loop {
            let notified = self.cancel_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    fn lock_cancelled(&self) -> MutexGuard<'_, bool> {
        self.cancelled.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
