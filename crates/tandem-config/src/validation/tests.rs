//! Tests for the full validation pipeline.

use super::*;
use crate::schema::*;

#[test]
fn default_config_validates() {
    let config = TandemConfig::default();
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_max_below_initial_delay() {
    let mut config = TandemConfig::default();
    config.channel.reconnect_initial_ms = 2000;
    config.channel.reconnect_max_ms = 1000;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("channel.reconnect_max_ms"));
}

#[test]
fn catches_zero_reconnect_attempts() {
    let mut config = TandemConfig::default();
    config.channel.max_reconnect_attempts = 0;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("channel.max_reconnect_attempts"));
}

#[test]
fn catches_tiny_reconcile_interval() {
    let mut config = TandemConfig::default();
    config.queue.min_interval_ms = 10;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("queue.min_interval_ms"));
}

#[test]
fn catches_unknown_source() {
    let mut config = TandemConfig::default();
    config.player.source = "tidal".into();
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("player.source"));
}

#[test]
fn catches_bad_ice_url() {
    let mut config = TandemConfig::default();
    config.signaling.ice_servers.push(IceServerConfig {
        url: "http://example.com".into(),
        username: None,
        credential: None,
    });
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("signaling.ice_servers[1]"));
}

#[test]
fn collects_multiple_errors() {
    let mut config = TandemConfig::default();
    config.queue.min_interval_ms = 0;
    config.signaling.max_retries = 9;
    config.channel.endpoint.clear();
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("queue.min_interval_ms"));
    assert!(err.contains("signaling.max_retries"));
    assert!(err.contains("channel.endpoint"));
}
