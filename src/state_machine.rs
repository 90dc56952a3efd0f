//! Engine status machine: Disabled → Starting → Enabled ⇄ Processing, with Restarting
//! reachable from every live state and Disabled reachable from everywhere.
//! Subscribers observe changes through a watch channel, so readiness can be awaited.

use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

/// Lifecycle state of one engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EngineStatus {
    Disabled,
    Starting,
    Enabled,
    Processing,
    Restarting,
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineStatus::Disabled => write!(f, "Disabled"),
            EngineStatus::Starting => write!(f, "Starting"),
            EngineStatus::Enabled => write!(f, "Enabled"),
            EngineStatus::Processing => write!(f, "Processing"),
            EngineStatus::Restarting => write!(f, "Restarting"),
        }
    }
}

impl EngineStatus {
    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: EngineStatus) -> bool {
        matches!(
            (self, next),
            (EngineStatus::Disabled, EngineStatus::Starting)
                | (EngineStatus::Starting, EngineStatus::Enabled)
                | (EngineStatus::Starting, EngineStatus::Restarting) // launch failed
                | (EngineStatus::Enabled, EngineStatus::Processing)
                | (EngineStatus::Enabled, EngineStatus::Restarting)
                | (EngineStatus::Processing, EngineStatus::Enabled)
                | (EngineStatus::Processing, EngineStatus::Restarting)
                | (EngineStatus::Restarting, EngineStatus::Enabled)
                // retries exhausted or explicit shutdown
                | (_, EngineStatus::Disabled)
        )
    }

    /// Connected and able to accept (or queue) work.
    pub fn is_ready(self) -> bool {
        matches!(self, EngineStatus::Enabled | EngineStatus::Processing)
    }
}

/// Thread-safe status holder with a watch channel for reactive subscribers.
pub struct StateMachine {
    state: RwLock<EngineStatus>,
    state_tx: watch::Sender<EngineStatus>,
    state_rx: watch::Receiver<EngineStatus>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(EngineStatus::Disabled);
        Self {
            state: RwLock::new(EngineStatus::Disabled),
            state_tx,
            state_rx,
        }
    }

    /// Current status (non-blocking read).
    pub fn current(&self) -> EngineStatus {
        *self.state.read()
    }

    /// Attempt a transition from whatever the current status is.
    pub fn transition(&self, next: EngineStatus) -> EngineResult<EngineStatus> {
        let mut state = self.state.write();
        let current = *state;
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "invalid status transition");
            return Err(EngineError::InvalidTransition { from: current, to: next });
        }
        *state = next;
        let _ = self.state_tx.send(next);
        info!(from = %current, to = %next, "status_transition");
        Ok(next)
    }

    /// Transition only if the current status is `expected`. Returns whether it happened.
    pub fn transition_from(&self, expected: EngineStatus, next: EngineStatus) -> bool {
        let mut state = self.state.write();
        if *state != expected || !expected.can_transition_to(next) {
            return false;
        }
        *state = next;
        let _ = self.state_tx.send(next);
        debug!(from = %expected, to = %next, "status_transition");
        true
    }

    /// Force Disabled from any state (retries exhausted or shutdown).
    pub fn force_disable(&self) {
        let mut state = self.state.write();
        let prev = *state;
        *state = EngineStatus::Disabled;
        let _ = self.state_tx.send(EngineStatus::Disabled);
        info!(from = %prev, "force_disable");
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.state_rx.clone()
    }

    /// Wait until the engine is ready, bounded by `poll_interval * max_tries`.
    ///
    /// Returns `false` as soon as the engine lands in Disabled or the bound elapses.
    pub async fn wait_until_ready(&self, poll_interval: Duration, max_tries: u32) -> bool {
        let mut rx = self.subscribe();
        let deadline = Instant::now() + poll_interval * max_tries;
        loop {
            let status = *rx.borrow_and_update();
            if status.is_ready() {
                return true;
            }
            if status == EngineStatus::Disabled {
                debug!("engine disabled while waiting for readiness");
                return false;
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return false,
                Err(_) => {
                    warn!(status = %status, max_tries, "engine not ready in time");
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_transition_table() {
        use EngineStatus::*;
        assert!(Disabled.can_transition_to(Starting));
        assert!(!Disabled.can_transition_to(Enabled));
        assert!(!Disabled.can_transition_to(Processing));
        assert!(Starting.can_transition_to(Enabled));
        assert!(Enabled.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Enabled));
        assert!(Processing.can_transition_to(Restarting));
        assert!(!Restarting.can_transition_to(Processing));
        assert!(!Enabled.can_transition_to(Starting));
        for status in [Starting, Enabled, Processing, Restarting] {
            assert!(status.can_transition_to(Disabled));
        }
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let sm = StateMachine::new();
        let err = sm.transition(EngineStatus::Processing).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: EngineStatus::Disabled,
                to: EngineStatus::Processing
            }
        ));
        assert_eq!(sm.current(), EngineStatus::Disabled);
    }

    #[test]
    fn test_transition_from_is_compare_and_set() {
        let sm = StateMachine::new();
        sm.transition(EngineStatus::Starting).unwrap();
        sm.transition(EngineStatus::Enabled).unwrap();

        assert!(sm.transition_from(EngineStatus::Enabled, EngineStatus::Processing));
        assert!(!sm.transition_from(EngineStatus::Enabled, EngineStatus::Processing));
        assert_eq!(sm.current(), EngineStatus::Processing);
    }

    #[tokio::test]
    async fn test_wait_until_ready_wakes_on_enable() {
        let sm = Arc::new(StateMachine::new());
        sm.transition(EngineStatus::Starting).unwrap();

        let waiter = {
            let sm = Arc::clone(&sm);
            tokio::spawn(async move { sm.wait_until_ready(Duration::from_millis(200), 10).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        sm.transition(EngineStatus::Enabled).unwrap();

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_until_ready_gives_up_on_disable() {
        let sm = Arc::new(StateMachine::new());
        sm.transition(EngineStatus::Starting).unwrap();

        let waiter = {
            let sm = Arc::clone(&sm);
            tokio::spawn(async move { sm.wait_until_ready(Duration::from_secs(5), 15).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        sm.force_disable();

        assert!(!waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_ready_is_bounded() {
        let sm = StateMachine::new();
        sm.transition(EngineStatus::Starting).unwrap();
        assert!(!sm.wait_until_ready(Duration::from_millis(100), 3).await);
    }
}
