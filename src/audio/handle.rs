//! Playback handles and their state machine.
//!
//! `Created -> Playing -> {Completed | Stopped}`. Terminal states never change,
//! so completion is observed at most once and only after natural end.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Created,
    Playing,
    /// The whole buffer was rendered.
    Completed,
    /// Cancelled by `stop()` or by device shutdown.
    Stopped,
}

impl PlaybackState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped)
    }
}

/// Caller-side token for one playback instance.
///
/// Clones share the same state, so a clone kept elsewhere can stop the
/// playback or wait for it.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    id: Uuid,
    frames: usize,
    sample_rate: u32,
    state: Arc<watch::Sender<PlaybackState>>,
}

impl PlaybackHandle {
    pub(crate) fn new(frames: usize, sample_rate: u32) -> Self {
        let (state, _) = watch::channel(PlaybackState::Created);
        Self {
            id: Uuid::new_v4(),
            frames,
            sample_rate,
            state: Arc::new(state),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Length of the attached buffer.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames as f64 / self.sample_rate as f64)
    }

    /// Silence this playback. Calling it again, or after completion, does nothing.
    pub fn stop(&self) {
        let stopped = self.transition(|s| !s.is_terminal(), PlaybackState::Stopped);
        if stopped {
            log::debug!("Playback {} stopped", self.id);
        }
    }

    /// Resolves with the terminal state once playback has ended either way.
    pub async fn wait(&self) -> PlaybackState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// Resolves `true` only if playback reached the end of its buffer.
    pub async fn completed(&self) -> bool {
        self.wait().await == PlaybackState::Completed
    }

    pub(crate) fn start(&self) -> bool {
        self.transition(|s| s == PlaybackState::Created, PlaybackState::Playing)
    }

    pub(crate) fn complete(&self) -> bool {
        let completed = self.transition(|s| s == PlaybackState::Playing, PlaybackState::Completed);
        if completed {
            log::debug!("Playback {} completed ({} frames)", self.id, self.frames);
        }
        completed
    }

    // 状态检查和修改在 watch 的锁内完成，保证终态只写入一次
    fn transition(&self, allowed: impl Fn(PlaybackState) -> bool, next: PlaybackState) -> bool {
        self.state.send_if_modified(|state| {
            if allowed(*state) {
                *state = next;
                true
            } else {
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[test]
    fn lifecycle_reaches_completed() {
        let handle = PlaybackHandle::new(48, 24000);
        assert_eq!(handle.state(), PlaybackState::Created);
        assert!(handle.start());
        assert_eq!(handle.state(), PlaybackState::Playing);
        assert!(handle.complete());
        assert_eq!(handle.state(), PlaybackState::Completed);
        assert!(!handle.is_active());
    }

    #[test]
    fn stop_is_idempotent() {
        let handle = PlaybackHandle::new(48, 24000);
        handle.start();
        handle.stop();
        assert_eq!(handle.state(), PlaybackState::Stopped);
        handle.stop();
        assert_eq!(handle.state(), PlaybackState::Stopped);
    }

    #[test]
    fn terminal_states_do_not_change() {
        let completed = PlaybackHandle::new(1, 24000);
        completed.start();
        completed.complete();
        completed.stop();
        assert_eq!(completed.state(), PlaybackState::Completed);

        let stopped = PlaybackHandle::new(1, 24000);
        stopped.start();
        stopped.stop();
        assert!(!stopped.complete());
        assert!(!stopped.start());
        assert_eq!(stopped.state(), PlaybackState::Stopped);
    }

    #[test]
    fn complete_requires_playing() {
        let handle = PlaybackHandle::new(1, 24000);
        assert!(!handle.complete());
        assert_eq!(handle.state(), PlaybackState::Created);
    }

    #[tokio::test]
    async fn wait_resolves_on_stop() {
        let handle = PlaybackHandle::new(24000, 24000);
        handle.start();

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.completed().await })
        };
        handle.stop();

        let completed = timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
        assert!(!completed);
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_already_terminal() {
        let handle = PlaybackHandle::new(10, 24000);
        handle.start();
        handle.complete();
        let state = timeout(Duration::from_secs(1), handle.wait()).await.unwrap();
        assert_eq!(state, PlaybackState::Completed);
    }

    #[test]
    fn duration_uses_frames() {
        assert_eq!(PlaybackHandle::new(12000, 24000).duration(), Duration::from_millis(500));
    }
}
