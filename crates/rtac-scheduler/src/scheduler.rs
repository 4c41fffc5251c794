use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::executor::GuardedExecutor;
use crate::heartbeat;
use crate::job_lock::JobLockManager;
use crate::leader::LeaderElection;
use crate::status::{SkipReason, StatusHandle};
use crate::supervisor::ReconnectSupervisor;
use crate::task::{TaskDescriptor, TaskState};
use crate::traits::LockStore;

const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Trigger loop plus the background heartbeat and reconnect supervisor.
pub struct Scheduler<S: LockStore, C: Clock = SystemClock> {
    config: SchedulerConfig,
    election: Arc<LeaderElection<S>>,
    executor: GuardedExecutor<S, C>,
    status: StatusHandle,
    clock: C,
    tasks: Vec<TaskState>,
}

impl<S: LockStore> Scheduler<S, SystemClock> {
    pub fn new(store: S, config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::with_clock(store, config, SystemClock)
    }
}

impl<S: LockStore, C: Clock> Scheduler<S, C> {
    pub fn with_clock(store: S, config: SchedulerConfig, clock: C) -> Result<Self, SchedulerError> {
        config.validate()?;

        let election = Arc::new(LeaderElection::new(
            store.clone(),
            config.replica_id.clone(),
            &config.keys,
            config.leader_ttl,
        ));
        let status = StatusHandle::new(
            config.replica_id.clone(),
            election.subscribe(),
            config.outcome_history,
        );
        let locks = JobLockManager::new(store, config.replica_id.clone(), config.keys.clone());
        let executor = GuardedExecutor::new(
            Arc::clone(&election),
            locks,
            status.clone(),
            clock.clone(),
        );

        Ok(Self {
            config,
            election,
            executor,
            status,
            clock,
            tasks: Vec::new(),
        })
    }

    pub fn register(&mut self, task: TaskDescriptor) -> Result<(), SchedulerError> {
        if self.tasks.iter().any(|t| t.id() == task.id()) {
            return Err(SchedulerError::DuplicateTask {
                id: task.id().to_string(),
            });
        }
        let state = TaskState::build(task, &self.config.job_lock_ttl, self.clock.now())?;
        tracing::info!(
            task_id = %state.id(),
            schedule = ?state.descriptor.schedule(),
            expected_duration_secs = state.descriptor.expected_duration().as_secs(),
            lock_ttl_secs = state.lock_ttl.as_secs(),
            first_slot = ?state.next_slot,
            "Task registered"
        );
        self.status.add_task(state.id());
        self.tasks.push(state);
        Ok(())
    }

    pub fn election(&self) -> Arc<LeaderElection<S>> {
        Arc::clone(&self.election)
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Run until `shutdown` is cancelled, then drain, stop the background
    /// loops and release the leader lease.
    pub async fn run(self, shutdown: CancellationToken) {
        let Self {
            config,
            election,
            executor,
            clock,
            mut tasks,
            ..
        } = self;

        let background = CancellationToken::new();
        let executions = CancellationToken::new();

        let heartbeat = tokio::spawn(heartbeat::run(
            Arc::clone(&election),
            config.heartbeat_interval,
            background.clone(),
        ));
        let supervisor =
            tokio::spawn(ReconnectSupervisor::new(Arc::clone(&election)).run(background.clone()));

        tracing::info!(
            replica_id = %election.identity(),
            task_count = tasks.len(),
            leader_ttl_secs = config.leader_ttl.as_secs(),
            heartbeat_secs = config.heartbeat_interval.as_secs(),
            "Scheduler starting"
        );

        let mut inflight = JoinSet::new();
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    fire_due(&mut tasks, &executor, &clock, &mut inflight, &executions);
                }
                Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Guarded run aborted unexpectedly");
                    }
                }
            }
        }

        tracing::info!(
            replica_id = %election.identity(),
            in_flight = inflight.len(),
            "Shutdown requested, no new task runs will start"
        );

        let drained = tokio::time::timeout(config.shutdown_timeout, async {
            while inflight.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(
                replica_id = %election.identity(),
                in_flight = inflight.len(),
                timeout_secs = config.shutdown_timeout.as_secs(),
                "In-flight tasks did not finish in time, cancelling"
            );
            executions.cancel();
            while inflight.join_next().await.is_some() {}
        }

        background.cancel();
        let _ = heartbeat.await;
        let _ = supervisor.await;

        election.release().await;
        tracing::info!(replica_id = %election.identity(), "Scheduler stopped");
    }
}

fn fire_due<S: LockStore, C: Clock>(
    tasks: &mut [TaskState],
    executor: &GuardedExecutor<S, C>,
    clock: &C,
    inflight: &mut JoinSet<()>,
    executions: &CancellationToken,
) {
    let now = clock.now();
    for state in tasks.iter_mut() {
        let Some(slot) = state.due_slot(now) else {
            continue;
        };
        state.advance(slot, now);

        let Some(running) = state.try_start() else {
            executor.skip(state.id(), slot, SkipReason::AlreadyRunning);
            continue;
        };

        let executor = executor.clone();
        let task = state.descriptor.clone();
        let lock_ttl = state.lock_ttl;
        let cancel = executions.child_token();
        inflight.spawn(async move {
            let _running = running;
            executor.run_guarded(&task, slot, lock_ttl, cancel).await;
        });
    }
}
