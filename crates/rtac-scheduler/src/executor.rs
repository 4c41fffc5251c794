use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::job_lock::JobLockManager;
use crate::keys::format_slot;
use crate::leader::LeaderElection;
use crate::status::{OutcomeRecord, SkipReason, StatusHandle, TaskOutcome};
use crate::task::TaskDescriptor;
use crate::traits::LockStore;

/// How long an aborted body may take to actually drop. Job-lock TTLs must
/// cover the expected duration plus this.
pub const ABORT_GRACE: Duration = Duration::from_secs(1);

/// Wraps every task run in the same guard sequence:
/// ping, leadership, job lock, bounded execution, release, record.
///
/// Nothing side-effecting happens until the first three pass.
pub struct GuardedExecutor<S: LockStore, C: Clock = SystemClock> {
    election: Arc<LeaderElection<S>>,
    locks: JobLockManager<S>,
    status: StatusHandle,
    clock: C,
}

impl<S: LockStore, C: Clock> Clone for GuardedExecutor<S, C> {
    fn clone(&self) -> Self {
        Self {
            election: Arc::clone(&self.election),
            locks: self.locks.clone(),
            status: self.status.clone(),
            clock: self.clock.clone(),
        }
    }
}

/// Aborts the spawned body if the guarded run itself is dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<S: LockStore, C: Clock> GuardedExecutor<S, C> {
    pub fn new(
        election: Arc<LeaderElection<S>>,
        locks: JobLockManager<S>,
        status: StatusHandle,
        clock: C,
    ) -> Self {
        Self {
            election,
            locks,
            status,
            clock,
        }
    }

    pub async fn run_guarded(
        &self,
        task: &TaskDescriptor,
        slot: DateTime<Utc>,
        lock_ttl: Duration,
        cancel: CancellationToken,
    ) -> TaskOutcome {
        let task_id = task.id();

        match self.election.store().ping().await {
            Ok(true) => {}
            Ok(false) => {
                self.election.mark_unreachable("ping");
                return self.skip(task_id, slot, SkipReason::StoreUnreachable);
            }
            Err(e) => {
                self.election.mark_unreachable(e.reason());
                return self.skip(task_id, slot, SkipReason::StoreUnreachable);
            }
        }

        // The ping answered but the supervisor has not restored the state yet.
        if !self.election.snapshot().store_reachable {
            return self.skip(task_id, slot, SkipReason::StoreUnreachable);
        }
        if !self.election.is_leader() {
            return self.skip(task_id, slot, SkipReason::NotLeader);
        }

        let lock = match self.locks.claim(task_id, slot, lock_ttl).await {
            Ok(Some(lock)) => lock,
            Ok(None) => return self.skip(task_id, slot, SkipReason::LockHeld),
            Err(e) => {
                self.election.mark_unreachable(e.reason());
                return self.skip(task_id, slot, SkipReason::StoreUnreachable);
            }
        };

        // Leadership may have lapsed during the claim round trip.
        if !self.election.is_leader() {
            if let Err(e) = self.locks.release(lock).await {
                self.election.mark_unreachable(e.reason());
            }
            return self.skip(task_id, slot, SkipReason::NotLeader);
        }

        tracing::info!(
            replica_id = %self.election.identity(),
            task_id,
            slot = %format_slot(slot),
            "Task started"
        );
        let started = tokio::time::Instant::now();
        // Never let the body outlive its lock, whatever TTL the caller passed.
        let budget = task.expected_duration().min(
            lock.expires_at()
                .saturating_duration_since(started)
                .saturating_sub(ABORT_GRACE),
        );
        let outcome = self.execute(task, budget, cancel).await;
        let elapsed = started.elapsed();

        match self.locks.release(lock).await {
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    replica_id = %self.election.identity(),
                    task_id,
                    slot = %format_slot(slot),
                    error = %e,
                    "Failed to release job lock, it will expire"
                );
                self.election.mark_unreachable(e.reason());
            }
        }

        self.log_outcome(task_id, slot, &outcome, elapsed);
        self.record(task_id, slot, outcome.clone(), Some(elapsed));
        outcome
    }

    /// Run the body in its own task so panics surface as `JoinError`s.
    async fn execute(
        &self,
        task: &TaskDescriptor,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> TaskOutcome {
        let mut handle = tokio::spawn(task.invoke());
        let _abort = AbortOnDrop(handle.abort_handle());

        tokio::select! {
            joined = tokio::time::timeout(deadline, &mut handle) => match joined {
                Ok(Ok(Ok(()))) => TaskOutcome::Succeeded,
                Ok(Ok(Err(e))) => TaskOutcome::Failed { error: format!("{e:#}") },
                Ok(Err(e)) if e.is_panic() => TaskOutcome::Failed { error: e.to_string() },
                Ok(Err(_)) => TaskOutcome::Cancelled,
                Err(_) => {
                    handle.abort();
                    let _ = tokio::time::timeout(ABORT_GRACE, handle).await;
                    TaskOutcome::TimedOut
                }
            },
            _ = cancel.cancelled() => {
                handle.abort();
                let _ = tokio::time::timeout(ABORT_GRACE, handle).await;
                TaskOutcome::Cancelled
            }
        }
    }

    /// Record a skip without touching the store.
    pub fn skip(&self, task_id: &str, slot: DateTime<Utc>, reason: SkipReason) -> TaskOutcome {
        let replica_id = self.election.identity();
        let slot_label = format_slot(slot);
        match reason {
            SkipReason::NotLeader | SkipReason::LockHeld => {
                tracing::debug!(%replica_id, task_id, slot = %slot_label, ?reason, "Task skipped");
            }
            SkipReason::AlreadyRunning => {
                tracing::info!(%replica_id, task_id, slot = %slot_label, ?reason, "Task skipped");
            }
            SkipReason::StoreUnreachable => {
                tracing::warn!(%replica_id, task_id, slot = %slot_label, ?reason, "Task skipped");
            }
        }
        let outcome = TaskOutcome::Skipped { reason };
        self.record(task_id, slot, outcome.clone(), None);
        outcome
    }

    fn log_outcome(
        &self,
        task_id: &str,
        slot: DateTime<Utc>,
        outcome: &TaskOutcome,
        elapsed: Duration,
    ) {
        let replica_id = self.election.identity();
        let slot = format_slot(slot);
        let duration_ms = elapsed.as_millis() as u64;
        match outcome {
            TaskOutcome::Succeeded => {
                tracing::info!(%replica_id, task_id, %slot, duration_ms, "Task succeeded");
            }
            TaskOutcome::Failed { error } => {
                tracing::error!(
                    %replica_id,
                    task_id,
                    %slot,
                    duration_ms,
                    error = %error,
                    "Task failed"
                );
            }
            TaskOutcome::TimedOut => {
                tracing::warn!(
                    %replica_id,
                    task_id,
                    %slot,
                    duration_ms,
                    "Task exceeded its time budget and was cancelled"
                );
            }
            TaskOutcome::Cancelled => {
                tracing::warn!(%replica_id, task_id, %slot, duration_ms, "Task cancelled");
            }
            TaskOutcome::Skipped { .. } => {}
        }
    }

    fn record(
        &self,
        task_id: &str,
        slot: DateTime<Utc>,
        outcome: TaskOutcome,
        elapsed: Option<Duration>,
    ) {
        self.status.record(OutcomeRecord {
            task_id: task_id.to_string(),
            slot,
            outcome,
            finished_at: self.clock.now(),
            duration_ms: elapsed.map(|d| d.as_millis() as u64),
        });
    }
}
