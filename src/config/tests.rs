use super::*;
use serial_test::serial;
use std::io::Write;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.client.endpoint, "http://127.0.0.1:8080/cometd");
    assert!(!settings.client.allow_duplicate_subscriptions);
    assert!(settings.client.reconnect_on_client_expired);
    assert!(settings.client.persistent_subscriptions);
    assert!(!settings.client.retry_on_transport_error);
    assert_eq!(settings.client.request_timeout_secs, 60);
    assert_eq!(settings.client.disconnect_timeout_ms, 5000);
    assert_eq!(settings.client.max_backoff_ms, 30_000);
    assert_eq!(settings.logging.level, "info");
}

#[test]
#[serial]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let settings = load_config_from(&path).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
#[serial]
fn test_partial_file_is_merged_over_defaults() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        concat!(
            "[client]\n",
            "endpoint = \"https://push.example.com/cometd\"\n",
            "persistent_subscriptions = false\n",
        )
    )
    .unwrap();

    let settings = load_config_from(file.path()).unwrap();
    assert_eq!(settings.client.endpoint, "https://push.example.com/cometd");
    assert!(!settings.client.persistent_subscriptions);
    // untouched keys keep their defaults
    assert!(settings.client.reconnect_on_client_expired);
    assert_eq!(settings.client.max_backoff_ms, 30_000);
    assert_eq!(settings.logging.level, "info");
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        "[client]\nretry_on_transport_error = false\n[logging]\nlevel = \"warn\""
    )
    .unwrap();

    temp_env::with_vars(
        [
            ("COMET_CLIENT__RETRY_ON_TRANSPORT_ERROR", Some("true")),
            ("COMET_CLIENT__DISCONNECT_TIMEOUT_MS", Some("250")),
            ("COMET_LOGGING__LEVEL", Some("debug")),
        ],
        || {
            let settings = load_config_from(file.path()).unwrap();
            assert!(settings.client.retry_on_transport_error);
            assert_eq!(settings.client.disconnect_timeout_ms, 250);
            assert_eq!(settings.logging.level, "debug");
        },
    );
}

#[test]
#[serial]
fn test_invalid_value_is_an_error() {
    temp_env::with_var("COMET_CLIENT__MAX_BACKOFF_MS", Some("soon"), || {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config_from(dir.path().join("none")).is_err());
    });
}
