//! Registry lifecycle states and the process-wide stop signal

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle of the registry subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Tracks the lifecycle state and owns the cancellation token background
/// loops and provisioning waits observe at their wait points.
pub(crate) struct Lifecycle {
    state: watch::Sender<LifecycleState>,
    cancel: watch::Sender<CancellationToken>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Stopped);
        let (cancel, _) = watch::channel(CancellationToken::new());
        Self { state, cancel }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    pub fn is_stopping(&self) -> bool {
        self.state() == LifecycleState::Stopping
    }

    /// Compare-and-set state transition. Returns false when the current
    /// state is not `from`.
    pub fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        let mut moved = false;
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                moved = true;
                true
            } else {
                false
            }
        });
        moved
    }

    /// The current cancellation token
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.borrow().clone()
    }

    /// Cancel the current token, waking every wait point
    pub fn cancel(&self) {
        self.cancel.borrow().cancel();
    }

    /// Install a fresh token for a new start cycle
    pub fn renew_cancel(&self) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancel.send_replace(token.clone());
        token
    }
}
