use std::collections::HashSet;

use crate::player::ExternalQueue;
use crate::protocol::{QueueEntry, Source};

/// External side effects one reconciliation pass will perform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Skips to issue before enqueuing.
    pub drain: usize,
    /// URIs to enqueue, in local insertion order.
    pub enqueue: Vec<String>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.drain == 0 && self.enqueue.is_empty()
    }
}

/// Compare the session queue with the external player's queue.
///
/// Only entries of `source` are considered. When the session holds exactly
/// one such entry and the player has its own, unrelated queue, that queue
/// is drained (bounded by its observed length) so the entry plays next.
/// Otherwise local URIs missing externally are enqueued; positions of
/// URIs already present are left alone.
pub fn plan(local: &[QueueEntry], source: Source, external: &ExternalQueue) -> ReconcilePlan {
    let wanted: Vec<&QueueEntry> = local.iter().filter(|e| e.source == source).collect();

    if let [only] = wanted.as_slice() {
        if !external.queue.is_empty() && !external.contains(&only.uri) {
            return ReconcilePlan {
                drain: external.queue.len(),
                enqueue: vec![only.uri.clone()],
            };
        }
    }

    let present: HashSet<&str> = external
        .queue
        .iter()
        .map(String::as_str)
        .chain(external.currently_playing.as_deref())
        .collect();
    let mut planned = HashSet::new();
    let enqueue = wanted
        .into_iter()
        .filter(|e| !present.contains(e.uri.as_str()) && planned.insert(e.uri.as_str()))
        .map(|e| e.uri.clone())
        .collect();

    ReconcilePlan { drain: 0, enqueue }
}
