use super::MessageQueue;
use crate::message::Message;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_fifo_order() {
    let queue = MessageQueue::new();
    queue.enqueue(Message::new("/a"));
    queue.enqueue(Message::new("/b"));
    queue.enqueue_all(vec![Message::new("/c"), Message::new("/d")]);

    let channels: Vec<_> = queue.dequeue_all().into_iter().map(|m| m.channel).collect();
    assert_eq!(channels, vec!["/a", "/b", "/c", "/d"]);
}

#[test]
fn test_dequeue_all_leaves_queue_empty() {
    let queue = MessageQueue::new();
    assert!(queue.is_empty());
    queue.enqueue(Message::new("/a"));
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.dequeue_all().len(), 1);
    assert!(queue.is_empty());
    assert!(queue.dequeue_all().is_empty());
}

#[test]
fn test_concurrent_enqueue_loses_nothing() {
    let queue = Arc::new(MessageQueue::new());
    let producers: Vec<_> = (0..8)
        .map(|p| {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    let mut msg = Message::new("/load");
                    msg.id = Some(format!("{p}-{i}"));
                    queue.enqueue(msg);
                }
            })
        })
        .collect();

    let mut drained = Vec::new();
    while !producers.iter().all(|h| h.is_finished()) {
        drained.extend(queue.dequeue_all());
        std::thread::yield_now();
    }
    for handle in producers {
        handle.join().unwrap();
    }
    drained.extend(queue.dequeue_all());

    let ids: Vec<String> = drained.into_iter().filter_map(|m| m.id).collect();
    let unique: HashSet<_> = ids.iter().cloned().collect();
    assert_eq!(ids.len(), 4000);
    assert_eq!(unique.len(), 4000);

    // per-producer order survives
    for p in 0..8 {
        let prefix = format!("{p}-");
        let order: Vec<usize> = ids
            .iter()
            .filter_map(|id| id.strip_prefix(&prefix))
            .map(|n| n.parse().unwrap())
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }
}

#[tokio::test]
async fn test_wait_returns_immediately_when_non_empty() {
    let queue = MessageQueue::new();
    queue.enqueue(Message::new("/a"));
    tokio::time::timeout(Duration::from_millis(100), queue.wait())
        .await
        .expect("wait should not block on a non-empty queue");
}

#[tokio::test]
async fn test_wait_wakes_on_enqueue() {
    let queue = Arc::new(MessageQueue::new());
    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue.wait().await;
            queue.dequeue_all()
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.enqueue(Message::new("/late"));

    let drained = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should wake")
        .unwrap();
    assert_eq!(drained.len(), 1);
}
