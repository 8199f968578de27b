//! The `error` module defines the error types used throughout `cometpoll`.
//!
//! `CometError` is the single error type surfaced to applications, either
//! returned synchronously (misuse such as handshaking twice) or handed to
//! the hooks of the request it belongs to. `BayeuxError` is the structured
//! form of the `error` field a Bayeux server attaches to failed responses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bayeux error code the server uses on `/meta/connect` when the client
/// session is unknown or has expired.
pub const SESSION_EXPIRED_CODE: u16 = 402;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CometError {
    /// A server response could not be decoded into Bayeux messages.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The server answered a request with `successful: false`.
    #[error(
        "request on {channel} was rejected{}",
        .error.as_ref().map(|e| format!(": {e}")).unwrap_or_default()
    )]
    ProtocolFailure {
        channel: String,
        error: Option<BayeuxError>,
    },

    /// The server no longer knows this client (error 402 on connect).
    #[error("client session expired")]
    SessionExpired,

    /// The HTTP exchange carrying the request failed.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The operation is not valid in the client's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("invalid channel name: {0}")]
    InvalidChannel(String),

    /// The request was discarded because the session ended before it resolved.
    #[error("client disconnected before the request completed")]
    Disconnected,
}

impl CometError {
    /// Returns the Bayeux error code carried by a protocol failure, if any.
    pub fn code(&self) -> Option<u16> {
        match self {
            CometError::ProtocolFailure { error, .. } => error.as_ref().and_then(|e| e.code),
            CometError::SessionExpired => Some(SESSION_EXPIRED_CODE),
            _ => None,
        }
    }
}

/// Structured form of the Bayeux `error` field: `code:arg1,arg2:message`.
///
/// Servers do not always follow the grammar, so parsing never fails: a
/// string without a numeric code is kept whole as the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct BayeuxError {
    pub code: Option<u16>,
    pub args: Vec<String>,
    pub message: String,
}

impl BayeuxError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            args: Vec::new(),
            message: message.into(),
        }
    }

    pub fn is_session_expired(&self) -> bool {
        self.code == Some(SESSION_EXPIRED_CODE)
    }
}

impl FromStr for BayeuxError {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (code, args, message) = (parts.next(), parts.next(), parts.next());

        if let (Some(code), Some(args), Some(message)) = (code, args, message) {
            if let Ok(code) = code.trim().parse::<u16>() {
                let args = args
                    .split(',')
                    .filter(|a| !a.is_empty())
                    .map(str::to_string)
                    .collect();
                return Ok(Self {
                    code: Some(code),
                    args,
                    message: message.to_string(),
                });
            }
        }

        Ok(Self {
            code: None,
            args: Vec::new(),
            message: s.to_string(),
        })
    }
}

impl From<String> for BayeuxError {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(parsed) => parsed,
            Err(never) => match never {},
        }
    }
}

impl From<BayeuxError> for String {
    fn from(value: BayeuxError) -> Self {
        value.to_string()
    }
}

impl fmt::Display for BayeuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{}:{}:{}", code, self.args.join(","), self.message),
            None => f.write_str(&self.message),
        }
    }
}
