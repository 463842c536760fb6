//! Per-category spacing for external player calls.
//!
//! Each category admits at most one call per window. Calls made before
//! the window elapses fail fast with [`RateLimitExceeded`]; callers that
//! would rather wait use [`RateLimiter::until_ready`]. One limiter exists
//! per session and is never shared across sessions.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tandem_common::RateLimitExceeded;
use tandem_config::RateLimitConfig;
use tokio::time::Instant;
use tracing::warn;

use crate::player::PlayerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    PlayerControl,
    DeviceControl,
    VolumeControl,
    QueueControl,
    General,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Self::PlayerControl,
        Self::DeviceControl,
        Self::VolumeControl,
        Self::QueueControl,
        Self::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlayerControl => "player-control",
            Self::DeviceControl => "device-control",
            Self::VolumeControl => "volume-control",
            Self::QueueControl => "queue-control",
            Self::General => "general",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum spacing between two calls of the same category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimits {
    windows: HashMap<Category, Duration>,
}

impl RateLimits {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let windows = HashMap::from([
            (
                Category::PlayerControl,
                Duration::from_millis(config.player_control_ms),
            ),
            (
                Category::DeviceControl,
                Duration::from_millis(config.device_control_ms),
            ),
            (
                Category::VolumeControl,
                Duration::from_millis(config.volume_control_ms),
            ),
            (
                Category::QueueControl,
                Duration::from_millis(config.queue_control_ms),
            ),
            (Category::General, Duration::from_millis(config.general_ms)),
        ]);
        Self { windows }
    }

    pub fn window(&self, category: Category) -> Duration {
        self.windows.get(&category).copied().unwrap_or_default()
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Limiter
// ---------------------------------------------------------------------------

pub struct RateLimiter {
    limits: RateLimits,
    last_call: Mutex<HashMap<Category, Instant>>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            last_call: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(RateLimits::from_config(config))
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    fn remaining(&self, category: Category, now: Instant) -> Duration {
        let last_call = self
            .last_call
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match last_call.get(&category) {
            Some(last) => (*last + self.limits.window(category)).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Time left before `category` admits another call. Zero when ready.
    pub fn until_ready(&self, category: Category) -> Duration {
        self.remaining(category, Instant::now())
    }

    /// Claim the window for `category`, or fail without waiting.
    pub fn try_acquire(&self, category: Category) -> Result<(), RateLimitExceeded> {
        let now = Instant::now();
        let mut last_call = self
            .last_call
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(last) = last_call.get(&category) {
            let retry_in =
                (*last + self.limits.window(category)).saturating_duration_since(now);
            if !retry_in.is_zero() {
                return Err(RateLimitExceeded {
                    category: category.as_str(),
                    retry_in,
                });
            }
        }
        last_call.insert(category, now);
        Ok(())
    }

    /// Sleep until `category` is ready, then claim it.
    pub async fn acquire(&self, category: Category) {
        loop {
            let wait = self.until_ready(category);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            if self.try_acquire(category).is_ok() {
                return;
            }
        }
    }

    fn record(&self, category: Category) {
        self.last_call
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(category, Instant::now());
    }

    /// Run `op` under the limiter.
    ///
    /// The first call must pass [`try_acquire`](Self::try_acquire). If the
    /// external service answers with a retry-after hint, the call is retried
    /// exactly once after that delay without consulting the window again.
    pub async fn execute<T, F, Fut>(&self, category: Category, mut op: F) -> Result<T, PlayerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PlayerError>>,
    {
        self.try_acquire(category)?;
        match op().await {
            Err(PlayerError::RetryAfter(delay)) => {
                warn!(category = %category, ?delay, "Retry-after from player, retrying once");
                tokio::time::sleep(delay).await;
                self.record(category);
                op().await
            }
            other => other,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn default_windows() {
        let limits = RateLimits::default();
        assert_eq!(
            limits.window(Category::PlayerControl),
            Duration::from_millis(20)
        );
        for category in [
            Category::DeviceControl,
            Category::VolumeControl,
            Category::QueueControl,
            Category::General,
        ] {
            assert_eq!(limits.window(category), Duration::from_millis(50));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_within_window_fails_fast() {
        let limiter = RateLimiter::default();
        assert!(limiter.try_acquire(Category::QueueControl).is_ok());

        let err = limiter.try_acquire(Category::QueueControl).unwrap_err();
        assert_eq!(err.category, "queue-control");
        assert_eq!(err.retry_in, Duration::from_millis(50));

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(limiter.try_acquire(Category::QueueControl).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn categories_are_independent() {
        let limiter = RateLimiter::default();
        for category in Category::ALL {
            assert!(limiter.try_acquire(category).is_ok());
        }
        assert!(limiter.try_acquire(Category::PlayerControl).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn until_ready_counts_down() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.until_ready(Category::General), Duration::ZERO);
        limiter.try_acquire(Category::General).unwrap();
        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(
            limiter.until_ready(Category::General),
            Duration::from_millis(30)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_out_the_window() {
        let limiter = RateLimiter::default();
        limiter.acquire(Category::PlayerControl).await;
        let start = Instant::now();
        limiter.acquire(Category::PlayerControl).await;
        assert_eq!(start.elapsed(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn limiters_do_not_share_state() {
        let a = RateLimiter::default();
        let b = RateLimiter::default();
        a.try_acquire(Category::QueueControl).unwrap();
        assert!(b.try_acquire(Category::QueueControl).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_sleeps_and_retries_once() {
        let limiter = RateLimiter::default();
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = limiter
            .execute(Category::QueueControl, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(PlayerError::RetryAfter(Duration::from_millis(2000)))
                    } else {
                        Ok("queued")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "queued");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn second_retry_after_is_returned() {
        let limiter = RateLimiter::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), PlayerError> = limiter
            .execute(Category::PlayerControl, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(PlayerError::RetryAfter(Duration::from_millis(500))) }
            })
            .await;

        assert!(matches!(result, Err(PlayerError::RetryAfter(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_rejects_inside_window() {
        let limiter = RateLimiter::default();
        limiter.try_acquire(Category::VolumeControl).unwrap();
        let calls = AtomicU32::new(0);

        let result: Result<(), PlayerError> = limiter
            .execute(Category::VolumeControl, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(PlayerError::RateLimited(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
