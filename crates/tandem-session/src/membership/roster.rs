use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::warn;

use crate::protocol::{Participant, Role};

/// Membership as seen by this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    pub session_id: String,
    pub me: Participant,
    pub host: Option<Participant>,
    /// Guests other than this device.
    pub guests: Vec<Participant>,
}

impl Roster {
    /// A roster containing only this device.
    pub fn solo(session_id: &str, me: Participant) -> Self {
        let host = me.is_host().then(|| me.clone());
        Self {
            session_id: session_id.to_string(),
            me,
            host,
            guests: Vec::new(),
        }
    }

    pub fn host_id(&self) -> Option<&str> {
        self.host.as_ref().map(|h| h.user_id.as_str())
    }

    pub fn guest_ids(&self) -> Vec<&str> {
        self.guests.iter().map(|g| g.user_id.as_str()).collect()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.me.user_id == user_id
            || self.host_id() == Some(user_id)
            || self.guests.iter().any(|g| g.user_id == user_id)
    }

    /// Everyone in the session, this device included.
    pub fn participant_count(&self) -> usize {
        let host_is_other = self.host.as_ref().is_some_and(|h| h.user_id != self.me.user_id);
        1 + usize::from(host_is_other) + self.guests.len()
    }
}

/// Accepts either a bare array or `{"devices": [...]}`.
pub(crate) fn parse_device_list(payload: Value) -> Result<Vec<Participant>, serde_json::Error> {
    let list = match payload {
        Value::Object(mut map) => map
            .remove("devices")
            .or_else(|| map.remove("participants"))
            .unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    serde_json::from_value(list)
}

/// Fold a device list into a roster.
///
/// `claims` remembers the first role each present user was seen with;
/// later conflicting claims are ignored. Users missing from the list lose
/// their claim, so a rejoin starts fresh. This device's own role is never
/// taken from the list. At most one host is admitted.
pub(crate) fn build_roster(
    session_id: &str,
    me: &Participant,
    claims: &mut HashMap<String, Role>,
    list: Vec<Participant>,
) -> Roster {
    claims.entry(me.user_id.clone()).or_insert(me.role);

    let mut roster = Roster::solo(session_id, me.clone());
    let mut seen = HashSet::from([me.user_id.clone()]);

    for mut participant in list {
        if !seen.insert(participant.user_id.clone()) {
            continue;
        }
        let role = *claims
            .entry(participant.user_id.clone())
            .or_insert(participant.role);
        if role != participant.role {
            warn!(
                user_id = %participant.user_id,
                claimed = %participant.role,
                kept = %role,
                "Ignoring conflicting role claim"
            );
            participant.role = role;
        }

        match role {
            Role::Host if roster.host.is_none() => roster.host = Some(participant),
            Role::Host => {
                warn!(user_id = %participant.user_id, "Second host in device list, ignoring");
            }
            Role::Guest => roster.guests.push(participant),
        }
    }
    claims.retain(|user_id, _| seen.contains(user_id));
    roster
}
