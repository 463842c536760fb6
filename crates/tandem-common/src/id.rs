/// Queue entry ids are short enough to type on the command line.
pub fn new_entry_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    let bytes = uuid.as_bytes();
    format!(
        "{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}

/// Stable per-device user id. Persisted by the caller; generated once.
pub fn new_user_id() -> String {
    format!("user-{}", new_entry_id())
}
