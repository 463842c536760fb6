//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# Tandem Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[channel]
endpoint = "ws://127.0.0.1:8787/session"
# queue_endpoint = "ws://127.0.0.1:8787/session/queue"
# poll_endpoint = "http://127.0.0.1:8787/session"
# connect_timeout_ms = 10000
# heartbeat_interval_secs = 25
# reconnect_initial_ms = 1000     # 100-60000
# reconnect_max_ms = 5000         # >= reconnect_initial_ms
# max_reconnect_attempts = 5      # 1-50
# server_close_delay_ms = 1000

[queue]
# min_interval_ms = 3000          # 100-60000

[rate_limit]
# player_control_ms = 20
# device_control_ms = 50
# volume_control_ms = 50
# queue_control_ms = 50
# general_ms = 50

[signaling]
# connect_timeout_ms = 10000
# max_retries = 1                 # 0-5

[[signaling.ice_servers]]
url = "stun:stun.l.google.com:19302"
# username = ""
# credential = ""

[player]
# api_base = "https://api.spotify.com/v1"
# source = "spotify"              # spotify, youtube
# request_timeout_secs = 10
# device_id = ""

[logging]
# level = "info"                  # trace, debug, info, warn, error
# filter = "tandem=debug"
"##
    .to_string()
}
