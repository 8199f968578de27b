//! Drains the incoming queue and hands each message to the client.

use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::client::{ClientInner, CometClient};
use crate::queue::MessageQueue;

pub(crate) fn spawn(
    runtime: &Handle,
    incoming: Arc<MessageQueue>,
    client: Weak<ClientInner>,
) -> JoinHandle<()> {
    runtime.spawn(run(incoming, client))
}

async fn run(incoming: Arc<MessageQueue>, client: Weak<ClientInner>) {
    debug!("queue processor started");

    loop {
        incoming.wait().await;
        let Some(inner) = client.upgrade() else {
            break;
        };
        let client = CometClient::from_inner(inner);
        // one message at a time, in arrival order
        for message in incoming.dequeue_all() {
            client.handle_message(message);
        }
    }

    debug!("queue processor stopped");
}
