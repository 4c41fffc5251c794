use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::identity::ReplicaId;
use crate::state::{Role, SchedulerState};

pub const DEFAULT_OUTCOME_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    StoreUnreachable,
    NotLeader,
    LockHeld,
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    Failed { error: String },
    TimedOut,
    Cancelled,
    Skipped { reason: SkipReason },
}

impl TaskOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed { .. } => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Skipped { .. } => "skipped",
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeRecord {
    pub task_id: String,
    pub slot: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
    pub finished_at: DateTime<Utc>,
    /// Unset for skips, which never start the body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeTotals {
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub skipped: u64,
}

/// Ring buffer of the most recent outcomes plus running totals.
#[derive(Debug)]
pub struct OutcomeLog {
    capacity: usize,
    recent: VecDeque<OutcomeRecord>,
    totals: OutcomeTotals,
}

impl OutcomeLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            recent: VecDeque::with_capacity(capacity),
            totals: OutcomeTotals::default(),
        }
    }

    pub fn push(&mut self, record: OutcomeRecord) {
        match record.outcome {
            TaskOutcome::Succeeded => self.totals.succeeded += 1,
            TaskOutcome::Failed { .. } => self.totals.failed += 1,
            TaskOutcome::TimedOut => self.totals.timed_out += 1,
            TaskOutcome::Cancelled => self.totals.cancelled += 1,
            TaskOutcome::Skipped { .. } => self.totals.skipped += 1,
        }
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(record);
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<OutcomeRecord> {
        self.recent.iter().rev().cloned().collect()
    }

    pub fn totals(&self) -> OutcomeTotals {
        self.totals
    }
}

/// What the health endpoint reports.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub replica_id: ReplicaId,
    pub role: Role,
    pub is_leader: bool,
    pub store_reachable: bool,
    pub degraded: bool,
    pub last_renewal: Option<DateTime<Utc>>,
    pub tasks: Vec<String>,
    pub recent_outcomes: Vec<OutcomeRecord>,
    pub totals: OutcomeTotals,
}

struct Shared {
    outcomes: Mutex<OutcomeLog>,
    tasks: Mutex<Vec<String>>,
}

/// Cheap, cloneable read side of the scheduler for the HTTP layer.
#[derive(Clone)]
pub struct StatusHandle {
    replica_id: ReplicaId,
    state: watch::Receiver<SchedulerState>,
    shared: Arc<Shared>,
}

impl StatusHandle {
    pub(crate) fn new(
        replica_id: ReplicaId,
        state: watch::Receiver<SchedulerState>,
        history: usize,
    ) -> Self {
        Self {
            replica_id,
            state,
            shared: Arc::new(Shared {
                outcomes: Mutex::new(OutcomeLog::new(history)),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn store_reachable(&self) -> bool {
        self.state().store_reachable
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.state();
        let (recent_outcomes, totals) = {
            let log = self.shared.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
            (log.recent(), log.totals())
        };
        SchedulerStatus {
            replica_id: self.replica_id.clone(),
            role: state.role,
            is_leader: state.is_leader_at(Instant::now()),
            store_reachable: state.store_reachable,
            degraded: !state.store_reachable,
            last_renewal: state.last_renewal,
            tasks: self.tasks(),
            recent_outcomes,
            totals,
        }
    }

    pub fn tasks(&self) -> Vec<String> {
        self.shared
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn recent_outcomes(&self) -> Vec<OutcomeRecord> {
        self.shared
            .outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recent()
    }

    pub fn totals(&self) -> OutcomeTotals {
        self.shared
            .outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .totals()
    }

    pub(crate) fn record(&self, record: OutcomeRecord) {
        self.shared
            .outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    pub(crate) fn add_task(&self, id: &str) {
        self.shared
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(task: &str, outcome: TaskOutcome) -> OutcomeRecord {
        OutcomeRecord {
            task_id: task.to_string(),
            slot: Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap(),
            outcome,
            finished_at: Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 3).unwrap(),
            duration_ms: Some(3000),
        }
    }

    #[test]
    fn ring_buffer_keeps_newest() {
        let mut log = OutcomeLog::new(2);
        log.push(record("a", TaskOutcome::Succeeded));
        log.push(record("b", TaskOutcome::TimedOut));
        log.push(record("c", TaskOutcome::Cancelled));

        let ids: Vec<_> = log.recent().into_iter().map(|r| r.task_id).collect();
        assert_eq!(ids, ["c", "b"]);
    }

    #[test]
    fn totals_count_every_outcome_even_evicted() {
        let mut log = OutcomeLog::new(1);
        log.push(record("a", TaskOutcome::Succeeded));
        log.push(record("a", TaskOutcome::Failed { error: "boom".into() }));
        log.push(record("a", TaskOutcome::Skipped { reason: SkipReason::LockHeld }));

        assert_eq!(
            log.totals(),
            OutcomeTotals {
                succeeded: 1,
                failed: 1,
                skipped: 1,
                ..Default::default()
            }
        );
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut log = OutcomeLog::new(0);
        log.push(record("a", TaskOutcome::Succeeded));
        assert_eq!(log.recent().len(), 1);
    }

    #[test]
    fn outcome_serializes_flat_with_tag() {
        let json = serde_json::to_value(record(
            "poll",
            TaskOutcome::Skipped { reason: SkipReason::NotLeader },
        ))
        .unwrap();
        assert_eq!(json["task_id"], "poll");
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["reason"], "not_leader");
        assert_eq!(json["slot"], "2026-10-14T12:00:00Z");
    }

    #[test]
    fn status_reports_degraded_while_unreachable() {
        let (_tx, rx) = watch::channel(SchedulerState::INITIAL);
        let handle = StatusHandle::new(ReplicaId::new("a").unwrap(), rx, 10);
        handle.add_task("poll");

        let status = handle.status();
        assert!(status.degraded);
        assert!(!status.is_leader);
        assert_eq!(status.role, Role::Unknown);
        assert_eq!(status.tasks, ["poll"]);
    }
}
