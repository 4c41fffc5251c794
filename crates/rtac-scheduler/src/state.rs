use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Unknown,
    Follower,
    Leader,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Follower => "follower",
            Self::Leader => "leader",
        }
    }
}

/// Immutable snapshot of the replica's run state.
///
/// Replaced whole on every transition, so readers never see a role that
/// disagrees with the reachability it was decided under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerState {
    pub role: Role,
    pub store_reachable: bool,
    /// Bumped on every connectivity transition.
    pub epoch: u64,
    pub last_renewal: Option<DateTime<Utc>>,
    /// Local deadline after which the lease must be assumed gone.
    pub lease_expires_at: Option<Instant>,
}

impl SchedulerState {
    pub const INITIAL: Self = Self {
        role: Role::Unknown,
        store_reachable: false,
        epoch: 0,
        last_renewal: None,
        lease_expires_at: None,
    };

    /// Fail-closed leadership: role, reachability and an unexpired local deadline.
    pub fn is_leader_at(&self, now: Instant) -> bool {
        self.role == Role::Leader
            && self.store_reachable
            && self.lease_expires_at.is_some_and(|deadline| deadline > now)
    }
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::INITIAL
    }
}

/// Single-writer cell holding the current [`SchedulerState`].
pub(crate) struct StateCell {
    tx: watch::Sender<SchedulerState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(SchedulerState::INITIAL);
        Self { tx }
    }

    pub(crate) fn get(&self) -> SchedulerState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.tx.subscribe()
    }

    /// Apply `f` atomically; subscribers are notified only when it returns true.
    pub(crate) fn transition<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut SchedulerState) -> bool,
    {
        self.tx.send_if_modified(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn leader(deadline: Instant) -> SchedulerState {
        SchedulerState {
            role: Role::Leader,
            store_reachable: true,
            epoch: 1,
            last_renewal: None,
            lease_expires_at: Some(deadline),
        }
    }

    #[test]
    fn initial_state_is_unknown_and_unreachable() {
        let state = SchedulerState::default();
        assert_eq!(state.role, Role::Unknown);
        assert!(!state.store_reachable);
        assert!(!state.is_leader_at(Instant::now()));
    }

    #[test]
    fn leadership_requires_future_deadline() {
        let now = Instant::now();
        assert!(leader(now + Duration::from_secs(1)).is_leader_at(now));
        assert!(!leader(now).is_leader_at(now));
    }

    #[test]
    fn leadership_requires_reachable_store() {
        let now = Instant::now();
        let mut state = leader(now + Duration::from_secs(30));
        state.store_reachable = false;
        assert!(!state.is_leader_at(now));
    }

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Follower).unwrap(), "\"follower\"");
        assert_eq!(Role::Leader.as_str(), "leader");
    }

    #[tokio::test]
    async fn transition_notifies_only_on_change() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();

        assert!(!cell.transition(|_| false));
        assert!(!rx.has_changed().unwrap());

        assert!(cell.transition(|s| {
            s.store_reachable = true;
            true
        }));
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().store_reachable);
        assert!(cell.get().store_reachable);
    }
}
