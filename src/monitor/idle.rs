use std::time::Duration;
use tokio::time::Instant;

type CompletionCallback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    /// No activity observed yet; nothing to wait for.
    Dormant,
    Armed { deadline: Instant },
    Fired,
}

/// Raises the "scan complete" signal once no lifecycle activity has been seen for
/// `quiet_interval`, or immediately on `force_complete`.
///
/// The detector is driven by the orchestrator's reactor: activity is fed in with
/// [`record_activity`](Self::record_activity) and the reactor sleeps until
/// [`deadline`](Self::deadline), then calls [`poll`](Self::poll).
pub struct IdleCompletionDetector {
    quiet_interval: Duration,
    state: IdleState,
    callback: Option<CompletionCallback>,
}

impl IdleCompletionDetector {
    pub fn new(quiet_interval: Duration) -> Self {
        Self {
            quiet_interval,
            state: IdleState::Dormant,
            callback: None,
        }
    }

    pub fn state(&self) -> IdleState {
        self.state
    }

    pub fn quiet_interval(&self) -> Duration {
        self.quiet_interval
    }

    pub fn on_complete(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    pub fn record_activity(&mut self, now: Instant) {
        if self.state == IdleState::Fired {
            return;
        }
        self.state = IdleState::Armed {
            deadline: now + self.quiet_interval,
        };
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            IdleState::Armed { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Fires if the quiet interval has elapsed. Returns true only on the call that fires.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.state {
            IdleState::Armed { deadline } if now >= deadline => self.fire(),
            _ => false,
        }
    }

    /// Fires regardless of timer state. No-op once fired.
    pub fn force_complete(&mut self) -> bool {
        self.fire()
    }

    pub fn has_fired(&self) -> bool {
        self.state == IdleState::Fired
    }

    fn fire(&mut self) -> bool {
        if self.state == IdleState::Fired {
            return false;
        }
        self.state = IdleState::Fired;
        if let Some(callback) = self.callback.take() {
            callback();
        }
        true
    }
}
