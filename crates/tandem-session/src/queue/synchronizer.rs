use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::json;
use tandem_common::{NoticeBus, ReconciliationError, SessionNotice};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::local::LocalQueue;
use super::plan::plan;
use super::supervisor::{ReconcileSupervisor, SlotState};
use super::QueueError;
use crate::player::{ExternalQueue, LocalStore, PlayerApi, PlayerError};
use crate::protocol::{
    events, AddToQueuePayload, EntryRef, NewEntry, QueueEntry, QueueErrorPayload,
    QueueUpdatePayload, RemoveFromQueuePayload, Role, Source,
};
use crate::rate_limit::{Category, RateLimiter};
use crate::realtime::{ChannelClient, Subscription};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Everything the synchronizer needs for one session.
pub struct SyncParams {
    pub session_id: String,
    pub role: Role,
    /// Source played by the host's external player.
    pub source: Source,
    /// The queue channel.
    pub channel: ChannelClient,
    /// Rate-limited player. Only the host has one.
    pub player: Option<Arc<dyn PlayerApi>>,
    pub limiter: Arc<RateLimiter>,
    pub store: Arc<dyn LocalStore>,
    pub notices: NoticeBus,
    pub min_interval: Duration,
}

/// What a completed pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub drained: usize,
    pub enqueued: Vec<String>,
    /// Single-track failures that were skipped.
    pub failures: Vec<ReconciliationError>,
    /// Planned URIs left out because a newer change removed them mid-pass.
    pub withdrawn: Vec<String>,
    /// URIs the external player started, dropped from the session queue.
    pub consumed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Applied(PassReport),
    /// Newer changes withdrew everything the pass planned; a follow-up
    /// pass handles them.
    Superseded,
    NothingToDo,
}

struct SyncInner {
    session_id: String,
    role: Role,
    source: Source,
    channel: ChannelClient,
    player: Option<Arc<dyn PlayerApi>>,
    limiter: Arc<RateLimiter>,
    store: Arc<dyn LocalStore>,
    notices: NoticeBus,
    queue: RwLock<LocalQueue>,
    /// Bumped on every accepted change, local or remote.
    update_seq: AtomicU64,
    queue_tx: watch::Sender<Vec<QueueEntry>>,
    supervisor: Arc<ReconcileSupervisor>,
    /// Session URIs seen queued on the external player, or queued there by us.
    dispatched: Mutex<HashSet<String>>,
}

// ---------------------------------------------------------------------------
// Synchronizer
// ---------------------------------------------------------------------------

pub struct QueueSynchronizer {
    inner: Arc<SyncInner>,
    listener: JoinHandle<()>,
}

impl QueueSynchronizer {
    /// Build the synchronizer and start listening on the queue channel.
    pub fn start(params: SyncParams) -> Self {
        let updates = params.channel.on(events::QUEUE_UPDATE);
        let errors = params.channel.on(events::QUEUE_ERROR);

        let inner = Arc::new_cyclic(|weak: &Weak<SyncInner>| {
            let weak = weak.clone();
            let supervisor = ReconcileSupervisor::new(params.min_interval, move || {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.reconcile_and_report().await;
                    }
                })
            });
            SyncInner {
                session_id: params.session_id,
                role: params.role,
                source: params.source,
                channel: params.channel,
                player: params.player,
                limiter: params.limiter,
                store: params.store,
                notices: params.notices,
                queue: RwLock::new(LocalQueue::new()),
                update_seq: AtomicU64::new(0),
                queue_tx: watch::channel(Vec::new()).0,
                supervisor,
                dispatched: Mutex::new(HashSet::new()),
            }
        });

        let listener = tokio::spawn(listen(Arc::clone(&inner), updates, errors));
        Self { inner, listener }
    }

    pub async fn add_to_queue(&self, entry: NewEntry) -> Result<QueueEntry, QueueError> {
        let entry = {
            let mut queue = self.inner.queue.write().await;
            let entry = queue.insert(entry)?;
            self.inner.changed(&queue);
            entry
        };
        info!(uri = %entry.uri, id = %entry.id, "Added to queue");

        let payload = AddToQueuePayload {
            session_id: self.inner.session_id.clone(),
            entry: entry.clone(),
        };
        self.inner
            .channel
            .send_json(events::ADD_TO_QUEUE, &payload)
            .await?;
        Ok(entry)
    }

    pub async fn remove_from_queue(&self, entry_ref: EntryRef) -> Result<QueueEntry, QueueError> {
        let removed = {
            let mut queue = self.inner.queue.write().await;
            let removed = queue.remove(&entry_ref)?;
            self.inner.changed(&queue);
            removed
        };
        info!(uri = %removed.uri, id = %removed.id, "Removed from queue");

        let payload = RemoveFromQueuePayload {
            session_id: self.inner.session_id.clone(),
            entry_ref,
        };
        self.inner
            .channel
            .send_json(events::REMOVE_FROM_QUEUE, &payload)
            .await?;
        Ok(removed)
    }

    /// The session queue in insertion order.
    pub async fn get_queue(&self) -> Vec<QueueEntry> {
        self.inner.queue.read().await.entries().to_vec()
    }

    /// Ask the server for the authoritative queue.
    pub async fn request_queue(&self) -> Result<(), QueueError> {
        self.inner.request_queue().await?;
        Ok(())
    }

    /// Adopt a queue snapshot from another participant.
    pub async fn on_remote_queue_update(&self, snapshot: Vec<QueueEntry>) {
        self.inner.apply_snapshot(snapshot).await;
    }

    /// Drop the entry for `uri` once the external player has started it.
    pub async fn mark_consumed(&self, uri: &str) -> Result<QueueEntry, QueueError> {
        self.inner.dispatched_uris().remove(uri);
        self.remove_from_queue(EntryRef::track(self.inner.source, uri))
            .await
    }

    /// Receiver that sees the queue after every change.
    pub fn on_queue_change(&self) -> watch::Receiver<Vec<QueueEntry>> {
        self.inner.queue_tx.subscribe()
    }

    /// Request a reconciliation pass, subject to pacing. Host only.
    pub fn trigger_reconcile(&self) {
        if self.inner.role == Role::Host {
            self.inner.supervisor.trigger();
        }
    }

    pub fn reconcile_state(&self) -> SlotState {
        self.inner.supervisor.state()
    }

    pub fn passes_started(&self) -> u64 {
        self.inner.supervisor.passes_started()
    }

    pub fn shutdown(&self) {
        self.listener.abort();
        self.inner.supervisor.shutdown();
    }
}

impl Drop for QueueSynchronizer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Inner
// ---------------------------------------------------------------------------

fn classify(err: PlayerError, other: impl FnOnce(String) -> ReconciliationError) -> ReconciliationError {
    match err {
        PlayerError::AuthExpired(e) => e.into(),
        PlayerError::RateLimited(e) => e.into(),
        e => other(e.to_string()),
    }
}

impl SyncInner {
    /// Record an accepted change. Call with the queue write lock held.
    fn changed(&self, queue: &LocalQueue) {
        self.publish(queue);
        if self.role == Role::Host {
            self.supervisor.trigger();
        }
    }

    fn publish(&self, queue: &LocalQueue) {
        self.update_seq.fetch_add(1, Ordering::SeqCst);
        self.queue_tx.send_replace(queue.entries().to_vec());
    }

    fn dispatched_uris(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.dispatched.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Session entries the external player has started: ones we saw queued
    /// there that are no longer waiting in its queue.
    fn consumed_by(&self, external: &ExternalQueue) -> Vec<String> {
        let mut dispatched = self.dispatched_uris();
        let consumed: Vec<String> = dispatched
            .iter()
            .filter(|uri| !external.queue.contains(uri))
            .cloned()
            .collect();
        for uri in &consumed {
            dispatched.remove(uri);
        }
        consumed
    }

    /// Drop a consumed entry and tell the other participants. The pass
    /// that found it carries on with the updated queue.
    async fn consume(&self, uri: &str) -> bool {
        let entry_ref = EntryRef::track(self.source, uri);
        {
            let mut queue = self.queue.write().await;
            if queue.remove(&entry_ref).is_err() {
                return false;
            }
            self.publish(&queue);
        }
        info!(uri = %uri, "External player started entry, removing it");

        let payload = RemoveFromQueuePayload {
            session_id: self.session_id.clone(),
            entry_ref,
        };
        if let Err(e) = self
            .channel
            .send_json(events::REMOVE_FROM_QUEUE, &payload)
            .await
        {
            warn!(uri = %uri, error = %e, "Failed to broadcast consumed entry");
        }
        true
    }

    /// Whether `uri` is still wanted. Re-reads the session queue only when
    /// a change landed after `seq`.
    async fn still_wanted(&self, seq: u64, uri: &str) -> bool {
        if self.update_seq.load(Ordering::SeqCst) == seq {
            return true;
        }
        self.queue
            .read()
            .await
            .entries()
            .iter()
            .any(|e| e.source == self.source && e.uri == uri)
    }

    async fn apply_snapshot(&self, snapshot: Vec<QueueEntry>) {
        let mut queue = self.queue.write().await;
        queue.replace(snapshot);
        debug!(entries = queue.len(), "Adopted remote queue");
        self.changed(&queue);
    }

    async fn request_queue(&self) -> Result<(), tandem_common::ChannelError> {
        self.channel
            .send(events::GET_QUEUE, json!({ "sessionId": self.session_id }))
            .await
    }

    async fn pace(&self, category: Category) {
        let wait = self.limiter.until_ready(category);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// One reconciliation pass. Only the supervisor calls this.
    async fn reconcile(&self) -> Result<PassOutcome, ReconciliationError> {
        let Some(player) = &self.player else {
            return Ok(PassOutcome::NothingToDo);
        };

        self.pace(Category::General).await;
        let external = player
            .current_queue()
            .await
            .map_err(|e| classify(e, ReconciliationError::FetchQueue))?;

        let mut consumed = Vec::new();
        for uri in self.consumed_by(&external) {
            if self.consume(&uri).await {
                consumed.push(uri);
            }
        }

        let started_at_seq = self.update_seq.load(Ordering::SeqCst);
        let snapshot = self.queue.read().await.entries().to_vec();
        {
            let mut dispatched = self.dispatched_uris();
            for entry in snapshot.iter().filter(|e| e.source == self.source) {
                if external.queue.contains(&entry.uri) {
                    dispatched.insert(entry.uri.clone());
                }
            }
        }

        let plan = plan(&snapshot, self.source, &external);
        if plan.is_empty() {
            debug!("External queue already in sync");
            return Ok(if consumed.is_empty() {
                PassOutcome::NothingToDo
            } else {
                PassOutcome::Applied(PassReport {
                    consumed,
                    ..PassReport::default()
                })
            });
        }

        let mut report = PassReport {
            consumed,
            ..PassReport::default()
        };

        // Every side effect below is re-checked against changes that landed
        // after the snapshot.
        let drain_for = plan.enqueue.first().cloned().unwrap_or_default();
        for _ in 0..plan.drain {
            if !self.still_wanted(started_at_seq, &drain_for).await {
                debug!(drained = report.drained, "Entry behind the drain was removed");
                break;
            }
            self.pace(Category::PlayerControl).await;
            match player.skip_next().await {
                Ok(()) => report.drained += 1,
                Err(e) => match classify(e, ReconciliationError::Skip) {
                    ReconciliationError::AuthExpired(e) => return Err(e.into()),
                    err => {
                        // The external queue is no longer what we observed.
                        warn!(error = %err, drained = report.drained, "Drain stopped early");
                        report.failures.push(err);
                        break;
                    }
                },
            }
        }

        for uri in plan.enqueue {
            if !self.still_wanted(started_at_seq, &uri).await {
                debug!(uri = %uri, "Removed mid-pass, not enqueuing");
                report.withdrawn.push(uri);
                continue;
            }
            self.pace(Category::QueueControl).await;
            match player.enqueue(&uri).await {
                Ok(()) => {
                    self.dispatched_uris().insert(uri.clone());
                    report.enqueued.push(uri);
                }
                Err(e) => {
                    match classify(e, |reason| ReconciliationError::Enqueue {
                        uri: uri.clone(),
                        reason,
                    }) {
                        ReconciliationError::AuthExpired(e) => return Err(e.into()),
                        err => {
                            warn!(uri = %uri, error = %err, "Skipping track");
                            self.notices
                                .publish(SessionNotice::Transient(format!("Could not queue {uri}")));
                            report.failures.push(err);
                        }
                    }
                }
            }
        }

        if report.drained == 0 && report.enqueued.is_empty() && report.failures.is_empty()
            && report.consumed.is_empty()
        {
            return Ok(PassOutcome::Superseded);
        }
        Ok(PassOutcome::Applied(report))
    }

    async fn reconcile_and_report(&self) {
        match self.reconcile().await {
            Ok(PassOutcome::Applied(report)) => info!(
                session_id = %self.session_id,
                drained = report.drained,
                enqueued = report.enqueued.len(),
                failed = report.failures.len(),
                withdrawn = report.withdrawn.len(),
                consumed = report.consumed.len(),
                "Reconciled external queue"
            ),
            Ok(PassOutcome::Superseded) => debug!("Reconciliation superseded"),
            Ok(PassOutcome::NothingToDo) => {}
            Err(ReconciliationError::AuthExpired(e)) => {
                error!(error = %e, "Player credentials rejected, reloading session state");
                self.store.invalidate_credentials();
                self.notices.publish(SessionNotice::ReloadRequired);
                if let Err(e) = self.request_queue().await {
                    warn!(error = %e, "Failed to request queue reload");
                }
            }
            Err(e) => {
                warn!(error = %e, "Reconciliation failed");
                self.notices.publish(SessionNotice::Transient(e.to_string()));
            }
        }
    }
}

async fn listen(inner: Arc<SyncInner>, mut updates: Subscription, mut errors: Subscription) {
    loop {
        tokio::select! {
            payload = updates.recv() => {
                let Some(payload) = payload else { break };
                match serde_json::from_value::<QueueUpdatePayload>(payload) {
                    Ok(update) => inner.apply_snapshot(update.queue).await,
                    Err(e) => warn!(error = %e, "Malformed queue-update"),
                }
            }
            payload = errors.recv() => {
                let Some(payload) = payload else { break };
                let message = serde_json::from_value::<QueueErrorPayload>(payload)
                    .map(|p| p.message)
                    .unwrap_or_else(|_| "queue error".to_string());
                warn!(message = %message, "Server rejected queue change");
                inner.notices.publish(SessionNotice::Transient(message));
            }
        }
    }
}
