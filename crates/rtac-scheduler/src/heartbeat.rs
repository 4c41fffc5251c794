use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::leader::LeaderElection;
use crate::state::Role;
use crate::traits::LockStore;

/// Result of a single heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Store unreachable; recovery belongs to the supervisor.
    Suspended,
    Renewed,
    Lost,
    Acquired,
    /// Follower and the lease is held elsewhere.
    Standby,
}

/// One tick: renew while leader, otherwise try to take the lease.
pub async fn beat<S: LockStore>(election: &LeaderElection<S>) -> Beat {
    let state = election.snapshot();
    if !state.store_reachable {
        return Beat::Suspended;
    }
    if state.role == Role::Leader {
        if election.renew().await {
            Beat::Renewed
        } else {
            Beat::Lost
        }
    } else if election.try_acquire().await {
        Beat::Acquired
    } else {
        Beat::Standby
    }
}

/// Beat every `interval` until `token` is cancelled. The first beat happens
/// one interval after start.
pub async fn run<S: LockStore>(
    election: Arc<LeaderElection<S>>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(
        replica_id = %election.identity(),
        interval_secs = interval.as_secs_f64(),
        "Heartbeat started"
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let outcome = beat(&election).await;
                tracing::trace!(replica_id = %election.identity(), ?outcome, "Heartbeat");
            }
        }
    }

    tracing::debug!(replica_id = %election.identity(), "Heartbeat stopped");
}
