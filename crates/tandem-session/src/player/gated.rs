use std::sync::Arc;

use async_trait::async_trait;

use super::api::{Device, ExternalQueue, PlayerApi};
use super::PlayerError;
use crate::rate_limit::{Category, RateLimiter};

/// A [`PlayerApi`] whose every call passes through a [`RateLimiter`].
pub struct GatedPlayer {
    inner: Arc<dyn PlayerApi>,
    limiter: Arc<RateLimiter>,
}

impl GatedPlayer {
    pub fn new(inner: Arc<dyn PlayerApi>, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

#[async_trait]
impl PlayerApi for GatedPlayer {
    async fn current_queue(&self) -> Result<ExternalQueue, PlayerError> {
        self.limiter
            .execute(Category::General, || self.inner.current_queue())
            .await
    }

    async fn enqueue(&self, uri: &str) -> Result<(), PlayerError> {
        self.limiter
            .execute(Category::QueueControl, || self.inner.enqueue(uri))
            .await
    }

    async fn skip_next(&self) -> Result<(), PlayerError> {
        self.limiter
            .execute(Category::PlayerControl, || self.inner.skip_next())
            .await
    }

    async fn transfer_playback(&self, device_id: &str, play: bool) -> Result<(), PlayerError> {
        self.limiter
            .execute(Category::DeviceControl, || {
                self.inner.transfer_playback(device_id, play)
            })
            .await
    }

    async fn set_playing(&self, playing: bool) -> Result<(), PlayerError> {
        self.limiter
            .execute(Category::PlayerControl, || self.inner.set_playing(playing))
            .await
    }

    async fn set_volume(&self, percent: u8) -> Result<(), PlayerError> {
        self.limiter
            .execute(Category::VolumeControl, || self.inner.set_volume(percent))
            .await
    }

    async fn list_devices(&self) -> Result<Vec<Device>, PlayerError> {
        self.limiter
            .execute(Category::General, || self.inner.list_devices())
            .await
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scriptable in-memory player shared by tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct FakeState {
        external: ExternalQueue,
        calls: Vec<String>,
        failures: VecDeque<(String, PlayerError)>,
    }

    /// Models a device queue: `skip_next` pops into "now playing",
    /// `enqueue` appends.
    #[derive(Default)]
    pub(crate) struct FakePlayer {
        state: Mutex<FakeState>,
    }

    impl FakePlayer {
        pub(crate) fn with_queue(uris: &[&str]) -> Self {
            let player = Self::default();
            player.state.lock().unwrap().external.queue =
                uris.iter().map(|u| u.to_string()).collect();
            player
        }

        /// Make the next call to `operation` fail with `error`.
        pub(crate) fn fail_next(&self, operation: &str, error: PlayerError) {
            self.state
                .lock()
                .unwrap()
                .failures
                .push_back((operation.to_string(), error));
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.state.lock().unwrap().calls.clone()
        }

        pub(crate) fn mutating_calls(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|c| !c.starts_with("current_queue"))
                .collect()
        }

        /// The device finished a track on its own: the next queued one starts.
        pub(crate) fn advance(&self) {
            let mut state = self.state.lock().unwrap();
            if !state.external.queue.is_empty() {
                let next = state.external.queue.remove(0);
                state.external.currently_playing = Some(next);
            }
        }

        pub(crate) fn external(&self) -> ExternalQueue {
            self.state.lock().unwrap().external.clone()
        }

        fn record(&self, call: String, operation: &str) -> Result<(), PlayerError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call);
            if let Some(pos) = state.failures.iter().position(|(op, _)| op == operation) {
                if let Some((_, err)) = state.failures.remove(pos) {
                    return Err(err);
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PlayerApi for FakePlayer {
        async fn current_queue(&self) -> Result<ExternalQueue, PlayerError> {
            self.record("current_queue".into(), "current_queue")?;
            Ok(self.external())
        }

        async fn enqueue(&self, uri: &str) -> Result<(), PlayerError> {
            self.record(format!("enqueue {uri}"), "enqueue")?;
            self.state.lock().unwrap().external.queue.push(uri.to_string());
            Ok(())
        }

        async fn skip_next(&self) -> Result<(), PlayerError> {
            self.record("skip_next".into(), "skip_next")?;
            let mut state = self.state.lock().unwrap();
            if state.external.queue.is_empty() {
                state.external.currently_playing = None;
            } else {
                let next = state.external.queue.remove(0);
                state.external.currently_playing = Some(next);
            }
            Ok(())
        }

        async fn transfer_playback(&self, device_id: &str, play: bool) -> Result<(), PlayerError> {
            self.record(
                format!("transfer_playback {device_id} {play}"),
                "transfer_playback",
            )
        }

        async fn set_playing(&self, playing: bool) -> Result<(), PlayerError> {
            self.record(format!("set_playing {playing}"), "set_playing")
        }

        async fn set_volume(&self, percent: u8) -> Result<(), PlayerError> {
            self.record(format!("set_volume {percent}"), "set_volume")
        }

        async fn list_devices(&self) -> Result<Vec<Device>, PlayerError> {
            self.record("list_devices".into(), "list_devices")?;
            Ok(Vec::new())
        }
    }
}
