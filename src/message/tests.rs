use super::*;
use crate::utils::error::{BayeuxError, CometError};
use chrono::{TimeZone, Timelike, Utc};
use serde_json::json;

#[test]
fn test_message_new() {
    let msg = Message::new("/foo/bar");
    assert_eq!(msg.channel, "/foo/bar");
    assert!(msg.id.is_none());
    assert!(msg.client_id.is_none());
    assert!(!msg.is_meta());
}

#[test]
fn test_unset_fields_are_omitted() {
    let value = Message::new("/meta/connect").to_value();
    assert_eq!(value, json!({ "channel": "/meta/connect" }));
}

#[test]
fn test_round_trip_preserves_set_fields() {
    let mut advice = Advice {
        reconnect: Some(Reconnect::Retry),
        interval: Some(0),
        timeout: Some(30_000),
        ..Default::default()
    };
    advice.extra.insert("multiple-clients".to_string(), json!(true));

    let msg = Message {
        channel: "/meta/handshake".to_string(),
        id: Some("7".to_string()),
        client_id: Some("c1".to_string()),
        data: Some(json!({ "x": 1 })),
        advice: Some(advice),
        connection_type: Some(LONG_POLLING.to_string()),
        version: Some(BAYEUX_VERSION.to_string()),
        minimum_version: Some(BAYEUX_VERSION.to_string()),
        supported_connection_types: Some(vec![LONG_POLLING.to_string()]),
        successful: Some(false),
        subscription: Some("/foo/*".to_string()),
        error: Some(BayeuxError::new(403, "denied")),
        ext: Some(json!({ "ack": true })),
        timestamp: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap()),
    };

    let decoded = Message::from_value(msg.to_value()).unwrap();
    assert_eq!(decoded, msg);
}

#[test]
fn test_wire_keys_use_bayeux_spelling() {
    let mut msg = Message::new("/meta/handshake");
    msg.client_id = Some("c1".to_string());
    msg.minimum_version = Some("1.0".to_string());
    msg.supported_connection_types = Some(vec![LONG_POLLING.to_string()]);
    msg.connection_type = Some(LONG_POLLING.to_string());

    let value = msg.to_value();
    assert_eq!(value["clientId"], "c1");
    assert_eq!(value["minimumVersion"], "1.0");
    assert_eq!(value["supportedConnectionTypes"], json!(["long-polling"]));
    assert_eq!(value["connectionType"], "long-polling");
}

#[test]
fn test_explicit_null_data_survives() {
    let decoded = Message::from_value(json!({ "channel": "/foo", "data": null })).unwrap();
    assert_eq!(decoded.data, Some(serde_json::Value::Null));
    assert_eq!(decoded.to_value(), json!({ "channel": "/foo", "data": null }));
}

#[test]
fn test_missing_channel_is_malformed() {
    let err = Message::from_value(json!({ "id": "1", "successful": true })).unwrap_err();
    assert!(matches!(err, CometError::MalformedMessage(_)));
}

#[test]
fn test_non_string_channel_is_malformed() {
    let err = Message::from_value(json!({ "channel": 5 })).unwrap_err();
    assert!(matches!(err, CometError::MalformedMessage(_)));

    let err = Message::from_value(json!("not an object")).unwrap_err();
    assert!(matches!(err, CometError::MalformedMessage(_)));
}

#[test]
fn test_numeric_id_is_accepted() {
    let decoded = Message::from_value(json!({ "channel": "/foo", "id": 42 })).unwrap();
    assert_eq!(decoded.id.as_deref(), Some("42"));
}

#[test]
fn test_bayeux_timestamp_without_zone() {
    let decoded =
        Message::from_value(json!({ "channel": "/foo", "timestamp": "2024-05-01T12:30:15.25" }))
            .unwrap();
    let ts = decoded.timestamp.unwrap();
    assert_eq!(ts.timestamp(), Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap().timestamp());
}

#[test]
fn test_timestamp_keeps_sub_millisecond_precision() {
    let mut msg = Message::new("/foo");
    msg.timestamp = Some(
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
            .unwrap()
            .with_nanosecond(123_456_789)
            .unwrap(),
    );

    let value = msg.to_value();
    assert_eq!(value["timestamp"], "2024-01-02T03:04:05.123456789");
    assert_eq!(Message::from_value(value).unwrap(), msg);

    // whole seconds carry no fraction
    msg.timestamp = Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
    let value = msg.to_value();
    assert_eq!(value["timestamp"], "2024-01-02T03:04:05");
    assert_eq!(Message::from_value(value).unwrap(), msg);
}

#[test]
fn test_error_field_is_structured() {
    let decoded = Message::from_value(json!({
        "channel": "/meta/connect",
        "successful": false,
        "error": "402::Unknown client"
    }))
    .unwrap();
    assert!(!decoded.is_successful());
    assert_eq!(decoded.error.as_ref().and_then(|e| e.code), Some(402));
    assert_eq!(decoded.failure(), CometError::SessionExpired);
}

#[test]
fn test_failure_names_subscription_channel() {
    let decoded = Message::from_value(json!({
        "channel": "/meta/subscribe",
        "subscription": "/secret",
        "successful": false,
        "error": "403:/secret:denied"
    }))
    .unwrap();
    match decoded.failure() {
        CometError::ProtocolFailure { channel, error } => {
            assert_eq!(channel, "/secret");
            assert_eq!(error.unwrap().code, Some(403));
        }
        other => panic!("unexpected failure {other:?}"),
    }
}

#[test]
fn test_decode_messages_keeps_order() {
    let body = concat!(
        r#"[{"channel":"/meta/connect","successful":true},"#,
        r#"{"channel":"/a","data":1},{"channel":"/b","data":2}]"#,
    )
    .as_bytes();
    let messages = decode_messages(body).unwrap();
    let channels: Vec<_> = messages.iter().map(|m| m.channel.as_str()).collect();
    assert_eq!(channels, vec!["/meta/connect", "/a", "/b"]);
}

#[test]
fn test_decode_messages_rejects_garbage() {
    assert!(matches!(
        decode_messages(b"<html>oops</html>"),
        Err(CometError::MalformedMessage(_))
    ));
    assert!(matches!(
        decode_messages(b"[{\"id\":\"1\"}]"),
        Err(CometError::MalformedMessage(_))
    ));
    assert!(matches!(decode_messages(b"42"), Err(CometError::MalformedMessage(_))));
}

#[test]
fn test_advice_defaults() {
    let advice = Advice::default();
    assert_eq!(advice.reconnect(), Reconnect::Retry);
    assert_eq!(advice.interval(), std::time::Duration::ZERO);

    let parsed: Advice =
        serde_json::from_value(json!({ "reconnect": "handshake", "interval": 250 })).unwrap();
    assert_eq!(parsed.reconnect(), Reconnect::Handshake);
    assert_eq!(parsed.interval().as_millis(), 250);
}
