use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::identity::ReplicaId;
use crate::keys::KeySpace;
use crate::state::{Role, SchedulerState, StateCell};
use crate::traits::LockStore;

/// Owns the cluster-wide leader lease and the replica's run state.
///
/// The only writer of [`SchedulerState`]. The heartbeat drives
/// [`try_acquire`](Self::try_acquire) and [`renew`](Self::renew), the
/// supervisor drives the reachability transitions, and everything else reads
/// snapshots.
pub struct LeaderElection<S: LockStore> {
    store: S,
    id: ReplicaId,
    key: String,
    ttl: Duration,
    state: StateCell,
}

impl<S: LockStore> LeaderElection<S> {
    pub fn new(store: S, id: ReplicaId, keys: &KeySpace, ttl: Duration) -> Self {
        Self {
            store,
            id,
            key: keys.leader_key(),
            ttl,
            state: StateCell::new(),
        }
    }

    pub fn identity(&self) -> &ReplicaId {
        &self.id
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn snapshot(&self) -> SchedulerState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// False on any uncertainty, including a lease whose local deadline passed
    /// without a successful renewal.
    pub fn is_leader(&self) -> bool {
        self.state.get().is_leader_at(Instant::now())
    }

    /// Attempt to take the lease. Returns true if this replica is leader afterwards.
    pub async fn try_acquire(&self) -> bool {
        let started = self.state.get();
        if !started.store_reachable {
            return false;
        }

        let sent_at = Instant::now();
        match self.store.acquire(&self.key, self.id.as_str(), self.ttl).await {
            Ok(true) => self.promote(started.epoch, sent_at, "acquired"),
            Ok(false) => self.reclaim(started.epoch).await,
            Err(e) => {
                self.mark_unreachable(e.reason());
                false
            }
        }
    }

    /// The key is taken, but possibly by us from before a connectivity blip.
    /// The owner-checked renew only succeeds in that case.
    async fn reclaim(&self, epoch: u64) -> bool {
        let sent_at = Instant::now();
        match self.store.renew(&self.key, self.id.as_str(), self.ttl).await {
            Ok(true) => self.promote(epoch, sent_at, "reclaimed"),
            Ok(false) => {
                self.become_follower(epoch);
                false
            }
            Err(e) => {
                self.mark_unreachable(e.reason());
                false
            }
        }
    }

    /// Extend the lease. Returns false, after stepping down, when it is not ours anymore.
    pub async fn renew(&self) -> bool {
        let started = self.state.get();
        if started.role != Role::Leader || !started.store_reachable {
            return false;
        }

        let sent_at = Instant::now();
        match self.store.renew(&self.key, self.id.as_str(), self.ttl).await {
            Ok(true) => {
                let ttl = self.ttl;
                let mut renewed = false;
                self.state.transition(|s| {
                    if s.epoch != started.epoch || s.role != Role::Leader {
                        return false;
                    }
                    s.last_renewal = Some(Utc::now());
                    s.lease_expires_at = Some(sent_at + ttl);
                    renewed = true;
                    true
                });
                if renewed {
                    debug!(replica_id = %self.id, "Leader lease renewed");
                }
                renewed
            }
            Ok(false) => {
                self.step_down("lease no longer held by this replica");
                false
            }
            Err(e) => {
                self.mark_unreachable(e.reason());
                false
            }
        }
    }

    /// Drop leadership locally. Safe to call at any time.
    pub fn step_down(&self, reason: &str) {
        let was_leader = self.state.transition(|s| {
            if s.role != Role::Leader {
                return false;
            }
            s.role = if s.store_reachable {
                Role::Follower
            } else {
                Role::Unknown
            };
            s.lease_expires_at = None;
            true
        });
        if was_leader {
            warn!(replica_id = %self.id, reason, "Leadership lost");
        }
    }

    /// Force `Unknown` and bump the epoch. Returns true on the reachable → unreachable edge.
    pub fn mark_unreachable(&self, reason: &str) -> bool {
        let mut was_leader = false;
        let changed = self.state.transition(|s| {
            if !s.store_reachable {
                return false;
            }
            was_leader = s.role == Role::Leader;
            *s = SchedulerState {
                role: Role::Unknown,
                store_reachable: false,
                epoch: s.epoch + 1,
                last_renewal: s.last_renewal,
                lease_expires_at: None,
            };
            true
        });
        if changed {
            warn!(replica_id = %self.id, reason, "Store connectivity lost");
            if was_leader {
                warn!(replica_id = %self.id, reason = "store unreachable", "Leadership lost");
            }
        }
        changed
    }

    /// Enter a clean `Unknown` state with the store reachable. Leadership must be re-earned.
    pub fn mark_reachable(&self) -> bool {
        self.state.transition(|s| {
            if s.store_reachable {
                return false;
            }
            *s = SchedulerState {
                role: Role::Unknown,
                store_reachable: true,
                epoch: s.epoch + 1,
                last_renewal: s.last_renewal,
                lease_expires_at: None,
            };
            true
        })
    }

    /// Best-effort owner-checked delete of the lease on shutdown.
    ///
    /// Never an error: if this fails the TTL still frees the lease.
    pub async fn release(&self) -> bool {
        let released = match self.store.release(&self.key, self.id.as_str()).await {
            Ok(true) => {
                info!(replica_id = %self.id, "Released leader lease");
                true
            }
            Ok(false) => {
                debug!(replica_id = %self.id, "Leader lease not held, nothing to release");
                false
            }
            Err(e) => {
                warn!(replica_id = %self.id, error = %e, "Failed to release leader lease");
                false
            }
        };
        self.state.transition(|s| {
            if s.role != Role::Leader {
                return false;
            }
            s.role = Role::Follower;
            s.lease_expires_at = None;
            true
        });
        released
    }

    fn promote(&self, epoch: u64, sent_at: Instant, how: &'static str) -> bool {
        let ttl = self.ttl;
        let mut promoted = false;
        let mut newly = false;
        self.state.transition(|s| {
            // A connectivity transition raced this call; its result is stale.
            if s.epoch != epoch || !s.store_reachable {
                return false;
            }
            newly = s.role != Role::Leader;
            s.role = Role::Leader;
            s.last_renewal = Some(Utc::now());
            s.lease_expires_at = Some(sent_at + ttl);
            promoted = true;
            true
        });
        if newly {
            info!(replica_id = %self.id, how, ttl_secs = ttl.as_secs(), "Leadership acquired");
        }
        promoted
    }

    fn become_follower(&self, epoch: u64) {
        let demoted_leader = {
            let mut was_leader = false;
            self.state.transition(|s| {
                if s.epoch != epoch || !s.store_reachable || s.role == Role::Follower {
                    return false;
                }
                was_leader = s.role == Role::Leader;
                s.role = Role::Follower;
                s.lease_expires_at = None;
                true
            });
            was_leader
        };
        if demoted_leader {
            warn!(
                replica_id = %self.id,
                reason = "lease held by another replica",
                "Leadership lost"
            );
        }
    }
}
