//! Full configuration validation.
//!
//! Validates numeric ranges and enumerated strings, collecting every
//! problem into a single `ConfigError`.

mod helpers;

#[cfg(test)]
mod tests;

use crate::schema::TandemConfig;
use tandem_common::ConfigError;

use helpers::{validate_one_of, validate_range};

const SOURCES: &[&str] = &["spotify", "youtube"];

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &TandemConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_channel(&mut errors, config);
    validate_queue(&mut errors, config);
    validate_rate_limit(&mut errors, config);
    validate_signaling(&mut errors, config);
    validate_player(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_channel(errors: &mut Vec<String>, config: &TandemConfig) {
    let channel = &config.channel;
    if channel.endpoint.is_empty() {
        errors.push("channel.endpoint must not be empty".into());
    }
    validate_range(
        errors,
        "channel.reconnect_initial_ms",
        channel.reconnect_initial_ms,
        100,
        60_000,
    );
    if channel.reconnect_max_ms < channel.reconnect_initial_ms {
        errors.push(format!(
            "channel.reconnect_max_ms = {} is below channel.reconnect_initial_ms = {}",
            channel.reconnect_max_ms, channel.reconnect_initial_ms
        ));
    }
    validate_range(
        errors,
        "channel.max_reconnect_attempts",
        u64::from(channel.max_reconnect_attempts),
        1,
        50,
    );
    validate_range(
        errors,
        "channel.heartbeat_interval_secs",
        channel.heartbeat_interval_secs,
        1,
        300,
    );
    validate_range(
        errors,
        "channel.connect_timeout_ms",
        channel.connect_timeout_ms,
        500,
        120_000,
    );
}

fn validate_queue(errors: &mut Vec<String>, config: &TandemConfig) {
    validate_range(
        errors,
        "queue.min_interval_ms",
        config.queue.min_interval_ms,
        100,
        60_000,
    );
}

fn validate_rate_limit(errors: &mut Vec<String>, config: &TandemConfig) {
    let limits = &config.rate_limit;
    for (name, value) in [
        ("rate_limit.player_control_ms", limits.player_control_ms),
        ("rate_limit.device_control_ms", limits.device_control_ms),
        ("rate_limit.volume_control_ms", limits.volume_control_ms),
        ("rate_limit.queue_control_ms", limits.queue_control_ms),
        ("rate_limit.general_ms", limits.general_ms),
    ] {
        validate_range(errors, name, value, 0, 10_000);
    }
}

fn validate_signaling(errors: &mut Vec<String>, config: &TandemConfig) {
    validate_range(
        errors,
        "signaling.connect_timeout_ms",
        config.signaling.connect_timeout_ms,
        1000,
        120_000,
    );
    validate_range(
        errors,
        "signaling.max_retries",
        u64::from(config.signaling.max_retries),
        0,
        5,
    );
    for (i, server) in config.signaling.ice_servers.iter().enumerate() {
        let scheme_ok = ["stun:", "stuns:", "turn:", "turns:"]
            .iter()
            .any(|s| server.url.starts_with(s));
        if !scheme_ok {
            errors.push(format!(
                "signaling.ice_servers[{i}].url = {:?} is not a stun/turn url",
                server.url
            ));
        }
    }
}

fn validate_player(errors: &mut Vec<String>, config: &TandemConfig) {
    validate_one_of(errors, "player.source", &config.player.source, SOURCES);
    if !config.player.api_base.starts_with("http") {
        errors.push(format!(
            "player.api_base = {:?} is not an http(s) url",
            config.player.api_base
        ));
    }
    validate_range(
        errors,
        "player.request_timeout_secs",
        config.player.request_timeout_secs,
        1,
        120,
    );
}
