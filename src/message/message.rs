use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::advice::Advice;
use crate::utils::error::{BayeuxError, CometError};

pub const META_HANDSHAKE: &str = "/meta/handshake";
pub const META_CONNECT: &str = "/meta/connect";
pub const META_SUBSCRIBE: &str = "/meta/subscribe";
pub const META_UNSUBSCRIBE: &str = "/meta/unsubscribe";
pub const META_DISCONNECT: &str = "/meta/disconnect";

/// The only transport this client speaks.
pub const LONG_POLLING: &str = "long-polling";
pub const BAYEUX_VERSION: &str = "1.0";

/// One Bayeux protocol frame, either a request built by the client or a
/// response/delivery decoded from the server.
///
/// Unset fields are left out of the encoded form. `data` distinguishes an
/// absent payload (`None`) from an explicit `null` (`Some(Value::Null)`).
///
/// # Example
///
/// ```rust
/// use cometpoll::message::Message;
/// use serde_json::json;
///
/// let mut msg = Message::new("/chat/demo");
/// msg.data = Some(json!({ "text": "hello" }));
/// assert_eq!(msg.to_value()["channel"], "/chat/demo");
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub channel: String,

    #[serde(
        default,
        deserialize_with = "id_from_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BayeuxError>,

    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub ext: Option<Value>,

    #[serde(default, with = "bayeux_timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Default::default()
        }
    }

    /// Decodes one message object. Fails with `MalformedMessage` when the
    /// value is not an object, `channel` is missing or not a string, or a
    /// known field has the wrong shape.
    pub fn from_value(value: Value) -> Result<Self, CometError> {
        match value.get("channel") {
            Some(Value::String(_)) => {}
            Some(other) => {
                return Err(CometError::MalformedMessage(format!(
                    "channel must be a string, got {other}"
                )));
            }
            None => {
                return Err(CometError::MalformedMessage(
                    "message has no channel".to_string(),
                ));
            }
        }
        serde_json::from_value(value).map_err(|e| CometError::MalformedMessage(e.to_string()))
    }

    pub fn to_value(&self) -> Value {
        // Every field is a plain string, number, or JSON value, so this cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn is_meta(&self) -> bool {
        self.channel.starts_with("/meta/")
    }

    pub fn is_successful(&self) -> bool {
        self.successful == Some(true)
    }

    /// The server's failure description as a `CometError`.
    pub fn failure(&self) -> CometError {
        if self.channel == META_CONNECT
            && self.error.as_ref().is_some_and(BayeuxError::is_session_expired)
        {
            return CometError::SessionExpired;
        }
        CometError::ProtocolFailure {
            channel: self.subscription.clone().unwrap_or_else(|| self.channel.clone()),
            error: self.error.clone(),
        }
    }
}

/// Decodes a response body: a JSON array of message objects (a lone object
/// is tolerated). Order is preserved.
pub fn decode_messages(body: &[u8]) -> Result<Vec<Message>, CometError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| CometError::MalformedMessage(e.to_string()))?;
    match value {
        Value::Array(items) => items.into_iter().map(Message::from_value).collect(),
        obj @ Value::Object(_) => Ok(vec![Message::from_value(obj)?]),
        other => Err(CometError::MalformedMessage(format!(
            "expected an array of messages, got {other}"
        ))),
    }
}

pub fn encode_messages(messages: &[Message]) -> Result<Vec<u8>, CometError> {
    serde_json::to_vec(messages).map_err(|e| CometError::MalformedMessage(e.to_string()))
}

// `null` still counts as present for `data` and `ext`.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "message id must be a string or number, got {other}"
        ))),
    }
}

mod bayeux_timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(raw) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(Some(ts.with_timezone(&Utc)));
        }
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| Some(naive.and_utc()))
            .map_err(serde::de::Error::custom)
    }
}
