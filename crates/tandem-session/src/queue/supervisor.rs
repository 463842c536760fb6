//! Single-slot supervisor for reconciliation passes.
//!
//! At most one pass is in flight per session, and pass starts are spaced
//! at least `min_interval` apart. Triggers that arrive while a pass is
//! already scheduled are dropped; triggers that arrive mid-pass mark it
//! superseded, which schedules exactly one follow-up pass.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

pub type PassFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Runner = Box<dyn Fn() -> PassFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Scheduled,
    Running { superseded: bool },
}

struct Slot {
    state: SlotState,
    last_started: Option<Instant>,
    task: Option<JoinHandle<()>>,
    passes: u64,
    closed: bool,
}

pub struct ReconcileSupervisor {
    min_interval: Duration,
    runner: Runner,
    slot: Mutex<Slot>,
}

impl ReconcileSupervisor {
    pub fn new<F>(min_interval: Duration, runner: F) -> Arc<Self>
    where
        F: Fn() -> PassFuture + Send + Sync + 'static,
    {
        Arc::new(Self {
            min_interval,
            runner: Box::new(runner),
            slot: Mutex::new(Slot {
                state: SlotState::Idle,
                last_started: None,
                task: None,
                passes: 0,
                closed: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> SlotState {
        self.lock().state
    }

    /// Passes started so far.
    pub fn passes_started(&self) -> u64 {
        self.lock().passes
    }

    /// Request a pass.
    pub fn trigger(self: &Arc<Self>) {
        let mut slot = self.lock();
        if slot.closed {
            return;
        }
        let state = slot.state;
        match state {
            SlotState::Idle => self.schedule(&mut slot),
            SlotState::Scheduled => trace!("Reconciliation already scheduled, dropping trigger"),
            SlotState::Running { .. } => {
                debug!("Reconciliation in flight, marking superseded");
                slot.state = SlotState::Running { superseded: true };
            }
        }
    }

    fn schedule(self: &Arc<Self>, slot: &mut Slot) {
        let wait = slot
            .last_started
            .map(|t| (t + self.min_interval).saturating_duration_since(Instant::now()))
            .unwrap_or_default();
        slot.state = SlotState::Scheduled;
        if !wait.is_zero() {
            debug!(?wait, "Deferring reconciliation");
        }

        let this = Arc::clone(self);
        slot.task = Some(tokio::spawn(async move {
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            this.run().await;
        }));
    }

    async fn run(self: Arc<Self>) {
        {
            let mut slot = self.lock();
            if slot.closed {
                return;
            }
            slot.state = SlotState::Running { superseded: false };
            slot.last_started = Some(Instant::now());
            slot.passes += 1;
        }

        (self.runner)().await;

        let mut slot = self.lock();
        let follow_up = slot.state == SlotState::Running { superseded: true } && !slot.closed;
        if follow_up {
            self.schedule(&mut slot);
        } else {
            slot.state = SlotState::Idle;
        }
    }

    /// Cancel anything scheduled or running and refuse further triggers.
    pub fn shutdown(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        slot.state = SlotState::Idle;
        if let Some(task) = slot.task.take() {
            task.abort();
        }
    }
}
