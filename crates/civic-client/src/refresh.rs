//! Single-flight token refresh
//!
//! At most one refresh call is in flight per client. The first request that
//! hits a 401 becomes the leader and performs the refresh; every request that
//! 401s while the leader is busy parks on a oneshot channel and is released,
//! in arrival order, with the leader's outcome.
//!
//! ```text
//! Idle       --401, refresh token--> Refreshing   (leader calls refresh)
//! Idle       --401, no token------>  Idle         (session expired)
//! Refreshing --401--------------->   Refreshing   (enqueue)
//! Refreshing --refresh ok-------->   Idle         (release queue with token)
//! Refreshing --refresh failed---->   Idle         (reject queue)
//! Refreshing --leader dropped---->   Idle         (waiters rejoin)
//! ```

use crate::error::ClientError;
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Refresh state of one client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RefreshState {
    /// No refresh in flight
    #[default]
    Idle,
    /// A leader is waiting for the refresh endpoint
    Refreshing,
}

/// Inputs to the refresh state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshEvent {
    /// A non-auth request got a 401
    Unauthorized {
        /// Whether a refresh token is stored
        has_refresh_token: bool,
    },
    /// Refresh endpoint returned a new access token
    RefreshSucceeded,
    /// Refresh endpoint failed
    RefreshFailed,
}

/// What the client must do after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshAction {
    /// Call the refresh endpoint
    StartRefresh,
    /// Park the request until the refresh settles
    Enqueue,
    /// Clear the session, redirect, fail with `SessionExpired`
    ExpireSession,
    /// Replay the queue with the new token
    ReleaseQueue,
    /// Reject the queue, clear the session, redirect
    RejectQueue,
}

/// Illegal transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal refresh transition: {event:?} in state {state:?}")]
pub struct TransitionError {
    /// State the event arrived in
    pub state: RefreshState,
    /// Rejected event
    pub event: RefreshEvent,
}

/// Apply an event to a state
pub fn transition(
    state: RefreshState,
    event: RefreshEvent,
) -> Result<(RefreshState, RefreshAction), TransitionError> {
    use RefreshAction::*;
    use RefreshState::*;

    match (state, event) {
        (_, RefreshEvent::Unauthorized { has_refresh_token: false }) => Ok((state, ExpireSession)),
        (Idle, RefreshEvent::Unauthorized { .. }) => Ok((Refreshing, StartRefresh)),
        (Refreshing, RefreshEvent::Unauthorized { .. }) => Ok((Refreshing, Enqueue)),
        (Refreshing, RefreshEvent::RefreshSucceeded) => Ok((Idle, ReleaseQueue)),
        (Refreshing, RefreshEvent::RefreshFailed) => Ok((Idle, RejectQueue)),
        (Idle, RefreshEvent::RefreshSucceeded | RefreshEvent::RefreshFailed) => {
            Err(TransitionError { state, event })
        }
    }
}

/// States reachable from `from` in one step
pub fn allowed_transitions(from: RefreshState) -> Vec<RefreshState> {
    match from {
        RefreshState::Idle => vec![RefreshState::Idle, RefreshState::Refreshing],
        RefreshState::Refreshing => vec![RefreshState::Refreshing, RefreshState::Idle],
    }
}

/// How a refresh cycle ended, as seen by a parked request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New access token to replay with
    Refreshed(String),
    /// Refresh failed; the session is already gone
    Failed(ClientError),
    /// Leader went away before settling; the caller may start a new cycle
    Abandoned,
}

#[derive(Debug, Default)]
struct Inner {
    state: RefreshState,
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    cycles: u64,
}

/// Refresh coordinator statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    /// Current state
    pub state: RefreshState,
    /// Requests parked behind the in-flight refresh
    pub pending: usize,
    /// Refresh cycles started so far
    pub cycles: u64,
}

/// Role handed out by [`RefreshCoordinator::join`]
#[derive(Debug)]
pub enum Ticket<'a> {
    /// Caller must perform the refresh and settle it
    Leader(RefreshLeader<'a>),
    /// Caller must wait for the leader's outcome
    Waiter(PendingRefresh),
    /// No refresh token; caller must end the session
    Expired,
}

/// Owns the refresh-in-progress flag and the waiter queue
#[derive(Debug, Default)]
pub struct RefreshCoordinator {
    inner: Mutex<Inner>,
}

impl RefreshCoordinator {
    /// Create idle coordinator
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a 401 and get this caller's part in the recovery
    ///
    /// The state check and the enqueue happen under one lock with no await
    /// point, so two callers can never both become leader.
    ///
    /// # Errors
    /// `TransitionError` if the state machine maps the 401 to a settling action.
    pub fn join(&self, has_refresh_token: bool) -> Result<Ticket<'_>, TransitionError> {
        let mut inner = self.inner.lock();
        let event = RefreshEvent::Unauthorized { has_refresh_token };
        let (next, action) = transition(inner.state, event)?;

        let ticket = match action {
            RefreshAction::ExpireSession => Ticket::Expired,
            RefreshAction::StartRefresh => {
                inner.cycles += 1;
                tracing::debug!("Starting refresh cycle {}", inner.cycles);
                Ticket::Leader(RefreshLeader {
                    coordinator: self,
                    settled: false,
                })
            }
            RefreshAction::Enqueue => {
                let (tx, rx) = oneshot::channel();
                inner.waiters.push(tx);
                tracing::debug!("Queued behind refresh ({} waiting)", inner.waiters.len());
                Ticket::Waiter(PendingRefresh { rx })
            }
            RefreshAction::ReleaseQueue | RefreshAction::RejectQueue => {
                return Err(TransitionError {
                    state: inner.state,
                    event,
                })
            }
        };
        inner.state = next;
        Ok(ticket)
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> RefreshState {
        self.inner.lock().state
    }

    /// Snapshot of state, queue length and cycle count
    #[must_use]
    pub fn stats(&self) -> RefreshStats {
        let inner = self.inner.lock();
        RefreshStats {
            state: inner.state,
            pending: inner.waiters.len(),
            cycles: inner.cycles,
        }
    }

    fn settle(&self, event: RefreshEvent, outcome: &RefreshOutcome) -> usize {
        let waiters = {
            let mut inner = self.inner.lock();
            match transition(inner.state, event) {
                Ok((next, _)) => inner.state = next,
                Err(e) => {
                    // Only the leader settles, so this means the state was reset under it.
                    tracing::error!("{}", e);
                    inner.state = RefreshState::Idle;
                }
            }
            std::mem::take(&mut inner.waiters)
        };

        let released = waiters.len();
        for waiter in waiters {
            // A dropped receiver means that caller gave up; nothing to deliver.
            let _ = waiter.send(outcome.clone());
        }
        released
    }
}

/// Exclusive right to run the current refresh cycle
///
/// Dropping an unsettled leader hands its waiters [`RefreshOutcome::Abandoned`]
/// and returns the coordinator to `Idle`.
#[derive(Debug)]
pub struct RefreshLeader<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl RefreshLeader<'_> {
    /// Release the queue with the new token; returns how many were waiting
    pub fn succeed(mut self, access_token: &str) -> usize {
        self.settled = true;
        self.coordinator.settle(
            RefreshEvent::RefreshSucceeded,
            &RefreshOutcome::Refreshed(access_token.to_string()),
        )
    }

    /// Reject the queue with `error`; returns how many were waiting
    pub fn fail(mut self, error: ClientError) -> usize {
        self.settled = true;
        self.coordinator
            .settle(RefreshEvent::RefreshFailed, &RefreshOutcome::Failed(error))
    }
}

impl Drop for RefreshLeader<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("Refresh leader dropped before settling");
            self.coordinator
                .settle(RefreshEvent::RefreshFailed, &RefreshOutcome::Abandoned);
        }
    }
}

/// A request parked behind an in-flight refresh
#[derive(Debug)]
pub struct PendingRefresh {
    rx: oneshot::Receiver<RefreshOutcome>,
}

impl PendingRefresh {
    /// Wait for the leader's outcome
    pub async fn wait(self) -> RefreshOutcome {
        self.rx.await.unwrap_or(RefreshOutcome::Abandoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_the_table() {
        use RefreshAction::*;
        use RefreshState::*;

        let with_token = RefreshEvent::Unauthorized { has_refresh_token: true };
        let without_token = RefreshEvent::Unauthorized { has_refresh_token: false };

        assert_eq!(transition(Idle, with_token), Ok((Refreshing, StartRefresh)));
        assert_eq!(transition(Idle, without_token), Ok((Idle, ExpireSession)));
        assert_eq!(transition(Refreshing, with_token), Ok((Refreshing, Enqueue)));
        assert_eq!(
            transition(Refreshing, RefreshEvent::RefreshSucceeded),
            Ok((Idle, ReleaseQueue))
        );
        assert_eq!(
            transition(Refreshing, RefreshEvent::RefreshFailed),
            Ok((Idle, RejectQueue))
        );
        assert!(transition(Idle, RefreshEvent::RefreshSucceeded).is_err());
        assert!(transition(Idle, RefreshEvent::RefreshFailed).is_err());
    }

    #[test]
    fn transition_targets_are_allowed() {
        let events = [
            RefreshEvent::Unauthorized { has_refresh_token: true },
            RefreshEvent::Unauthorized { has_refresh_token: false },
            RefreshEvent::RefreshSucceeded,
            RefreshEvent::RefreshFailed,
        ];
        for from in [RefreshState::Idle, RefreshState::Refreshing] {
            for event in events {
                if let Ok((to, _)) = transition(from, event) {
                    assert!(allowed_transitions(from).contains(&to));
                }
            }
        }
    }

    #[test]
    fn only_first_joiner_leads() {
        let coordinator = RefreshCoordinator::new();

        let leader = match coordinator.join(true) {
            Ok(Ticket::Leader(leader)) => leader,
            other => panic!("first joiner must lead, got {other:?}"),
        };
        assert!(matches!(coordinator.join(true), Ok(Ticket::Waiter(_))));

        let stats = coordinator.stats();
        assert_eq!(stats.state, RefreshState::Refreshing);
        assert_eq!(stats.cycles, 1);

        drop(leader);
        assert_eq!(coordinator.state(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn waiters_receive_token_in_order() {
        let coordinator = RefreshCoordinator::new();
        let Ok(Ticket::Leader(leader)) = coordinator.join(true) else {
            panic!("expected leader");
        };

        let waiters: Vec<PendingRefresh> = (0..3)
            .map(|_| match coordinator.join(true) {
                Ok(Ticket::Waiter(w)) => w,
                other => panic!("expected waiter, got {other:?}"),
            })
            .collect();
        assert_eq!(coordinator.stats().pending, 3);

        assert_eq!(leader.succeed("T2"), 3);
        assert_eq!(coordinator.stats().pending, 0);
        assert_eq!(coordinator.state(), RefreshState::Idle);

        for waiter in waiters {
            assert_eq!(waiter.wait().await, RefreshOutcome::Refreshed("T2".into()));
        }
    }

    #[tokio::test]
    async fn waiters_share_the_failure() {
        let coordinator = RefreshCoordinator::new();
        let Ok(Ticket::Leader(leader)) = coordinator.join(true) else {
            panic!("expected leader");
        };
        let Ok(Ticket::Waiter(waiter)) = coordinator.join(true) else {
            panic!("expected waiter");
        };

        let error = ClientError::SessionExpired("refresh rejected".into());
        assert_eq!(leader.fail(error.clone()), 1);
        assert_eq!(waiter.wait().await, RefreshOutcome::Failed(error));
    }

    #[tokio::test]
    async fn dropped_leader_abandons_waiters() {
        let coordinator = RefreshCoordinator::new();
        let leader = coordinator.join(true).unwrap();
        let Ok(Ticket::Waiter(waiter)) = coordinator.join(true) else {
            panic!("expected waiter");
        };

        drop(leader);
        assert_eq!(waiter.wait().await, RefreshOutcome::Abandoned);
        assert_eq!(coordinator.state(), RefreshState::Idle);

        // The abandoned cycle does not block the next one
        assert!(matches!(coordinator.join(true), Ok(Ticket::Leader(_))));
        assert_eq!(coordinator.stats().cycles, 2);
    }

    #[tokio::test]
    async fn new_cycle_after_settle() {
        let coordinator = RefreshCoordinator::new();
        if let Ok(Ticket::Leader(leader)) = coordinator.join(true) {
            leader.succeed("T2");
        }
        assert!(matches!(coordinator.join(true), Ok(Ticket::Leader(_))));
        assert_eq!(coordinator.stats().cycles, 2);
    }

    #[test]
    fn missing_refresh_token_expires_in_any_state() {
        let coordinator = RefreshCoordinator::new();
        assert!(matches!(coordinator.join(false), Ok(Ticket::Expired)));
        assert_eq!(coordinator.stats(), RefreshStats::default());

        let _leader = coordinator.join(true).unwrap();
        assert!(matches!(coordinator.join(false), Ok(Ticket::Expired)));
        let stats = coordinator.stats();
        assert_eq!(stats.state, RefreshState::Refreshing);
        assert_eq!(stats.pending, 0);
    }

    #[test]
    fn settle_follows_the_table() {
        let coordinator = RefreshCoordinator::new();
        let Ok(Ticket::Leader(leader)) = coordinator.join(true) else {
            panic!("expected leader");
        };
        assert_eq!(leader.fail(ClientError::SessionExpired("gone".into())), 0);
        assert_eq!(coordinator.state(), RefreshState::Idle);
    }
}
