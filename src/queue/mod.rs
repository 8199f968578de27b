//! The `queue` module provides the FIFO used for both the outgoing and the
//! incoming side of a client.
//!
//! Producers only ever append; the single consumer of each queue takes the
//! whole content at once with `dequeue_all`, which is how the transport
//! batches a request. Consumers that have nothing to do park on `wait`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::message::Message;

#[derive(Debug, Default)]
pub struct MessageQueue {
    messages: Mutex<VecDeque<Message>>,
    notify: Notify,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, message: Message) {
        self.lock().push_back(message);
        self.notify.notify_waiters();
    }

    /// Appends `messages` as one unit: a concurrent `dequeue_all` sees all
    /// of them or none.
    pub fn enqueue_all(&self, messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        self.lock().extend(messages);
        self.notify.notify_waiters();
    }

    /// Removes and returns everything queued, oldest first.
    pub fn dequeue_all(&self) -> Vec<Message> {
        self.lock().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Resolves once the queue holds at least one message.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before checking so an enqueue in between is not missed
            notified.as_mut().enable();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.messages.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests;
