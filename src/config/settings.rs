use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the Bayeux client and for logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub client: ClientSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the client.
///
/// Defines the server endpoint and the session behaviour flags.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientSettings {
    pub endpoint: String,
    pub allow_duplicate_subscriptions: bool,
    pub reconnect_on_client_expired: bool,
    pub persistent_subscriptions: bool,
    pub retry_on_transport_error: bool,
    pub request_timeout_secs: u64,
    pub disconnect_timeout_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is not set.
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub client: Option<PartialClientSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub endpoint: Option<String>,
    pub allow_duplicate_subscriptions: Option<bool>,
    pub reconnect_on_client_expired: Option<bool>,
    pub persistent_subscriptions: Option<bool>,
    pub retry_on_transport_error: Option<bool>,
    pub request_timeout_secs: Option<u64>,
    pub disconnect_timeout_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/cometd".to_string(),
            allow_duplicate_subscriptions: false,
            reconnect_on_client_expired: true,
            persistent_subscriptions: true,
            retry_on_transport_error: false,
            request_timeout_secs: 60,
            disconnect_timeout_ms: 5000,
            max_backoff_ms: 30_000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            client: ClientSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from `defaults`.
    pub fn merge_over(self, defaults: Settings) -> Settings {
        let client = self.client;
        let d = defaults.client;
        let client = match client {
            None => d,
            Some(p) => ClientSettings {
                endpoint: p.endpoint.unwrap_or(d.endpoint),
                allow_duplicate_subscriptions: p
                    .allow_duplicate_subscriptions
                    .unwrap_or(d.allow_duplicate_subscriptions),
                reconnect_on_client_expired: p
                    .reconnect_on_client_expired
                    .unwrap_or(d.reconnect_on_client_expired),
                persistent_subscriptions: p
                    .persistent_subscriptions
                    .unwrap_or(d.persistent_subscriptions),
                retry_on_transport_error: p
                    .retry_on_transport_error
                    .unwrap_or(d.retry_on_transport_error),
                request_timeout_secs: p.request_timeout_secs.unwrap_or(d.request_timeout_secs),
                disconnect_timeout_ms: p.disconnect_timeout_ms.unwrap_or(d.disconnect_timeout_ms),
                max_backoff_ms: p.max_backoff_ms.unwrap_or(d.max_backoff_ms),
            },
        };

        let logging = LoggingSettings {
            level: self
                .logging
                .and_then(|l| l.level)
                .unwrap_or(defaults.logging.level),
        };

        Settings { client, logging }
    }
}
