use super::*;
use std::sync::Mutex;

fn recording_callback() -> (MessageCallback, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: MessageCallback = Arc::new(move |msg: &Message| {
        sink.lock().unwrap().push(msg.channel.clone());
    });
    (callback, seen)
}

#[test]
fn test_subscription_new() {
    let (callback, _) = recording_callback();
    let sub = Subscription::new("/foo/bar", &callback);
    assert_eq!(sub.channel(), "/foo/bar");
    assert!(!sub.is_wildcard());
    assert!(sub.is_alive());
    assert!(sub.hooks().on_success.is_none());
}

#[test]
fn test_wildcard_flag_follows_pattern() {
    let (callback, _) = recording_callback();
    assert!(Subscription::new("/foo/*", &callback).is_wildcard());
    assert!(Subscription::new("/foo/**", &callback).is_wildcard());
}

#[test]
fn test_matches_and_parent() {
    let (callback, _) = recording_callback();
    let sub = Subscription::new("/chat/**", &callback);
    assert!(sub.matches_channel("/chat"));
    assert!(sub.matches_channel("/chat/room/1"));
    assert!(!sub.matches_channel("/news"));
    assert!(sub.is_parent_channel("/chat/room"));
    assert!(!sub.is_parent_channel("/chat/**"));
}

#[test]
fn test_deliver_invokes_callback() {
    let (callback, seen) = recording_callback();
    let sub = Subscription::new("/foo", &callback);
    assert!(sub.deliver(&Message::new("/foo")));
    assert_eq!(*seen.lock().unwrap(), vec!["/foo".to_string()]);
}

#[test]
fn test_deliver_to_dropped_callback_is_noop() {
    let (callback, seen) = recording_callback();
    let sub = Subscription::new("/foo", &callback);
    drop(callback);
    assert!(!sub.is_alive());
    assert!(!sub.deliver(&Message::new("/foo")));
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_equivalence_needs_same_channel_and_callback() {
    let (first, _) = recording_callback();
    let (second, _) = recording_callback();
    let sub = Subscription::new("/foo", &first);
    assert!(sub.is_equivalent("/foo", &first));
    assert!(sub.is_equivalent("/foo", &first.clone()));
    assert!(!sub.is_equivalent("/foo", &second));
    assert!(!sub.is_equivalent("/bar", &first));
}

#[test]
fn test_subscriptions_have_distinct_ids() {
    let (callback, _) = recording_callback();
    let a = Subscription::new("/foo", &callback);
    let b = Subscription::new("/foo", &callback);
    assert_ne!(a.id(), b.id());
}
