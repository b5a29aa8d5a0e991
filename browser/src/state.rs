use std::sync::Arc;
use tokio::sync::watch;

/// Where the session is in its life. Only ever moves forward.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display, serde::Serialize, serde::Deserialize,
)]
pub enum LifecycleState {
    #[default]
    Initializing,
    AwaitingAuth,
    Joining,
    WaitingAdmission,
    InMeeting,
    ShuttingDown,
    Closed,
}

/// The authoritative [`LifecycleState`] of a session. Clones share the
/// same state.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: Arc<watch::Sender<LifecycleState>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        let (state, _) = watch::channel(LifecycleState::default());
        Self { state: Arc::new(state) }
    }
}

impl Lifecycle {
    pub fn current(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Moves to `next` if it lies ahead of the current state. Returns
    /// whether the transition happened.
    pub fn advance(&self, next: LifecycleState) -> bool {
        self.state.send_if_modified(|state| {
            if next > *state {
                info!(from = %state, to = %next, "Lifecycle transition");
                *state = next;
                true
            } else {
                debug!(current = %state, ignored = %next, "Ignoring lifecycle regression");
                false
            }
        })
    }

    /// Enters [`LifecycleState::ShuttingDown`]. Only the first caller gets
    /// `true`.
    pub fn begin_shutdown(&self) -> bool {
        self.advance(LifecycleState::ShuttingDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_moves_forward() {
        let lifecycle = Lifecycle::default();
        assert_eq!(lifecycle.current(), LifecycleState::Initializing);

        assert!(lifecycle.advance(LifecycleState::Joining));
        assert!(!lifecycle.advance(LifecycleState::AwaitingAuth));
        assert!(!lifecycle.advance(LifecycleState::Joining));
        assert_eq!(lifecycle.current(), LifecycleState::Joining);

        assert!(lifecycle.advance(LifecycleState::InMeeting));
        assert_eq!(lifecycle.current(), LifecycleState::InMeeting);
    }

    #[test]
    fn shutdown_is_entered_once() {
        let lifecycle = Lifecycle::default();
        let observer = lifecycle.clone();

        assert!(lifecycle.begin_shutdown());
        assert!(!observer.begin_shutdown());
        assert_eq!(observer.current(), LifecycleState::ShuttingDown);

        assert!(lifecycle.advance(LifecycleState::Closed));
        assert!(!lifecycle.begin_shutdown());
        assert_eq!(observer.current(), LifecycleState::Closed);
    }
}
