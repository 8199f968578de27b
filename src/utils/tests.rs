use super::error::{BayeuxError, CometError, SESSION_EXPIRED_CODE};
use super::logging;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("nonsense");
}

#[test]
fn test_parse_bayeux_error_with_code_and_args() {
    let err: BayeuxError = "403:/foo,bar:Subscription denied".parse().unwrap();
    assert_eq!(err.code, Some(403));
    assert_eq!(err.args, vec!["/foo".to_string(), "bar".to_string()]);
    assert_eq!(err.message, "Subscription denied");
    assert_eq!(err.to_string(), "403:/foo,bar:Subscription denied");
}

#[test]
fn test_parse_bayeux_error_without_args() {
    let err: BayeuxError = "402::Unknown client".parse().unwrap();
    assert!(err.is_session_expired());
    assert!(err.args.is_empty());
    assert_eq!(err.message, "Unknown client");
}

#[test]
fn test_parse_bayeux_error_free_text() {
    let err: BayeuxError = "something broke".parse().unwrap();
    assert_eq!(err.code, None);
    assert_eq!(err.message, "something broke");
    assert_eq!(err.to_string(), "something broke");
}

#[test]
fn test_message_with_colons_is_kept_whole() {
    let err: BayeuxError = "500::bad: really bad".parse().unwrap();
    assert_eq!(err.code, Some(500));
    assert_eq!(err.message, "bad: really bad");
}

#[test]
fn test_comet_error_codes() {
    let failure = CometError::ProtocolFailure {
        channel: "/meta/connect".to_string(),
        error: Some(BayeuxError::new(SESSION_EXPIRED_CODE, "expired")),
    };
    assert_eq!(failure.code(), Some(402));
    assert_eq!(CometError::SessionExpired.code(), Some(402));
    assert_eq!(CometError::Disconnected.code(), None);
}

#[test]
fn test_protocol_failure_display() {
    let bare = CometError::ProtocolFailure {
        channel: "/foo".to_string(),
        error: None,
    };
    assert_eq!(bare.to_string(), "request on /foo was rejected");

    let detailed = CometError::ProtocolFailure {
        channel: "/foo".to_string(),
        error: Some(BayeuxError::new(403, "denied")),
    };
    assert_eq!(detailed.to_string(), "request on /foo was rejected: 403::denied");
}
