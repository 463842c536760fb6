//! Shared Queue Synchronizer.
//!
//! Owns the session's authoritative queue. Mutations are applied locally
//! and broadcast on the queue channel; remote snapshots replace the local
//! copy. On the host, every accepted change triggers a reconciliation pass
//! that aligns the external player's queue with the session queue.

mod local;
mod plan;
mod supervisor;
mod synchronizer;

use tandem_common::{ChannelError, TandemError};

pub use local::LocalQueue;
pub use plan::{plan, ReconcilePlan};
pub use supervisor::{ReconcileSupervisor, SlotState};
pub use synchronizer::{PassOutcome, PassReport, QueueSynchronizer, SyncParams};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("{uri} is already queued")]
    Duplicate { uri: String },

    #[error("no queue entry matches {0}")]
    NotFound(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl From<QueueError> for TandemError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Channel(e) => TandemError::Channel(e),
            other => TandemError::Queue(other.to_string()),
        }
    }
}
