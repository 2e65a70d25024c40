//! Per-process coordination state machine and exit signalling

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Where this process stands in the coordination protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinatorState {
    Unclaimed,
    Probing,
    /// Holds the segment and serves the endpoint
    Owner,
    /// Negotiating with an existing owner
    Challenging,
    /// Lost a negotiation; about to exit
    Conceded,
    /// Running without single-instance enforcement
    Unenforced,
    /// Giving up the segment and endpoint
    Releasing,
    Terminating,
}

impl CoordinatorState {
    /// Check whether moving to `next` is a legal transition
    pub fn can_transition_to(self, next: CoordinatorState) -> bool {
        use CoordinatorState::*;
        matches!(
            (self, next),
            (Unclaimed, Probing)
                | (Probing, Owner | Challenging | Unenforced)
                | (Challenging, Owner | Conceded | Unenforced)
                | (Owner, Releasing)
                | (Releasing, Terminating)
                | (Conceded, Terminating)
                | (Unenforced, Terminating)
        )
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordinatorState::Unclaimed => "unclaimed",
            CoordinatorState::Probing => "probing",
            CoordinatorState::Owner => "owner",
            CoordinatorState::Challenging => "challenging",
            CoordinatorState::Conceded => "conceded",
            CoordinatorState::Unenforced => "unenforced",
            CoordinatorState::Releasing => "releasing",
            CoordinatorState::Terminating => "terminating",
        };
        f.write_str(name)
    }
}

/// Shared, observable state cell
#[derive(Debug, Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<CoordinatorState>>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CoordinatorState::Unclaimed);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> CoordinatorState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.tx.subscribe()
    }

    /// Move to `next` if the transition is legal
    ///
    /// Returns false (and leaves the state alone) for illegal transitions.
    /// Re-entering the current state is a no-op that returns true.
    pub fn transition(&self, next: CoordinatorState) -> bool {
        let mut from = next;
        let changed = self.tx.send_if_modified(|state| {
            from = *state;
            if *state == next || !state.can_transition_to(next) {
                return false;
            }
            *state = next;
            true
        });

        if changed {
            info!(%from, to = %next, "Coordinator state changed");
            true
        } else if from == next {
            debug!(state = %next, "transition: already in state");
            true
        } else {
            warn!(%from, to = %next, "Refusing illegal coordinator state transition");
            false
        }
    }
}

/// Why the coordinator asked the hosting process to exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A challenger told this owner to quit
    Displaced,
    /// This challenger lost the negotiation
    Conceded,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Displaced => f.write_str("displaced by a newer instance"),
            ExitReason::Conceded => f.write_str("another instance is already running"),
        }
    }
}

/// Deferred self-termination request shared by the coordinator and its tasks
#[derive(Debug, Clone)]
pub struct ExitSignal {
    tx: Arc<watch::Sender<Option<ExitReason>>>,
}

impl Default for ExitSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ExitSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Ask the hosting process to exit; the first reason sticks
    pub fn request(&self, reason: ExitReason) {
        let accepted = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        debug!(%reason, accepted, "ExitSignal::request");
    }

    pub fn requested(&self) -> Option<ExitReason> {
        *self.tx.borrow()
    }

    /// Wait until an exit has been requested
    pub async fn wait(&self) -> ExitReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            // The sender lives in `self`, so this can't fail while we wait
            if rx.changed().await.is_err() {
                return ExitReason::Displaced;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_owner_path() {
        let cell = StateCell::new();
        assert!(cell.transition(CoordinatorState::Probing));
        assert!(cell.transition(CoordinatorState::Owner));
        assert!(cell.transition(CoordinatorState::Releasing));
        assert!(cell.transition(CoordinatorState::Terminating));
        assert_eq!(cell.get(), CoordinatorState::Terminating);
    }

    #[test]
    fn test_challenger_path() {
        let cell = StateCell::new();
        assert!(cell.transition(CoordinatorState::Probing));
        assert!(cell.transition(CoordinatorState::Challenging));
        assert!(cell.transition(CoordinatorState::Challenging));
        assert!(cell.transition(CoordinatorState::Conceded));
        assert!(cell.transition(CoordinatorState::Terminating));
    }

    #[test]
    fn test_no_regression_to_probing() {
        let cell = StateCell::new();
        cell.transition(CoordinatorState::Probing);
        cell.transition(CoordinatorState::Owner);
        assert!(!cell.transition(CoordinatorState::Probing));
        assert_eq!(cell.get(), CoordinatorState::Owner);

        let cell = StateCell::new();
        cell.transition(CoordinatorState::Probing);
        cell.transition(CoordinatorState::Challenging);
        cell.transition(CoordinatorState::Conceded);
        assert!(!cell.transition(CoordinatorState::Probing));
        assert!(!cell.transition(CoordinatorState::Owner));
        assert_eq!(cell.get(), CoordinatorState::Conceded);
    }

    #[test]
    fn test_owner_cannot_skip_releasing() {
        assert!(!CoordinatorState::Owner.can_transition_to(CoordinatorState::Terminating));
        assert!(!CoordinatorState::Unclaimed.can_transition_to(CoordinatorState::Owner));
    }

    #[tokio::test]
    async fn test_subscribe_sees_changes() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();
        cell.transition(CoordinatorState::Probing);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), CoordinatorState::Probing);
    }

    #[tokio::test]
    async fn test_exit_first_reason_sticks() {
        let exit = ExitSignal::new();
        assert_eq!(exit.requested(), None);
        exit.request(ExitReason::Conceded);
        exit.request(ExitReason::Displaced);
        assert_eq!(exit.requested(), Some(ExitReason::Conceded));
        assert_eq!(exit.wait().await, ExitReason::Conceded);
    }

    #[tokio::test]
    async fn test_exit_wait_wakes_on_request() {
        let exit = ExitSignal::new();
        let waiter = {
            let exit = exit.clone();
            tokio::spawn(async move { exit.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        exit.request(ExitReason::Displaced);

        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, ExitReason::Displaced);
    }
}
