//! Session membership: who is in the session and in which role.
//!
//! Announces this device's capabilities on join (and again after every
//! reconnect) and folds `device-list` broadcasts into a [`Roster`].

mod registry;
mod roster;

pub use registry::MembershipRegistry;
pub use roster::Roster;
