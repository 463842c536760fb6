use tandem_common::new_entry_id;

use super::QueueError;
use crate::protocol::{EntryRef, NewEntry, QueueEntry, Source};

/// Ordered queue with per-source URI uniqueness.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalQueue {
    entries: Vec<QueueEntry>,
    next_seq: u64,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, source: Source, uri: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.source == source && e.uri == uri)
    }

    /// Append a new entry with a fresh id and the next sequence number.
    pub fn insert(&mut self, entry: NewEntry) -> Result<QueueEntry, QueueError> {
        if self.contains(entry.source, &entry.uri) {
            return Err(QueueError::Duplicate { uri: entry.uri });
        }
        let entry = QueueEntry {
            id: new_entry_id(),
            source: entry.source,
            uri: entry.uri,
            metadata: entry.metadata,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.push(entry.clone());
        Ok(entry)
    }

    pub fn remove(&mut self, entry_ref: &EntryRef) -> Result<QueueEntry, QueueError> {
        let pos = self
            .entries
            .iter()
            .position(|e| entry_ref.matches(e))
            .ok_or_else(|| QueueError::NotFound(format!("{entry_ref:?}")))?;
        Ok(self.entries.remove(pos))
    }

    /// Adopt a remote snapshot. Later duplicates of a (source, uri) are dropped.
    pub fn replace(&mut self, snapshot: Vec<QueueEntry>) {
        let mut entries: Vec<QueueEntry> = Vec::with_capacity(snapshot.len());
        for entry in snapshot {
            if !entries
                .iter()
                .any(|e| e.source == entry.source && e.uri == entry.uri)
            {
                entries.push(entry);
            }
        }
        let max_seq = entries.iter().map(|e| e.seq + 1).max().unwrap_or(0);
        self.next_seq = self.next_seq.max(max_seq);
        self.entries = entries;
    }
}
