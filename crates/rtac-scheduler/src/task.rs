//! Task registration: descriptors, schedules and per-task slot tracking.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::executor::ABORT_GRACE;

/// Default safety margin added to a task's expected duration for its job-lock TTL.
pub const DEFAULT_JOB_LOCK_BUFFER: Duration = Duration::from_secs(5);

// Keeps slot arithmetic far away from i64 overflow.
const MAX_INTERVAL_SECS: u64 = i32::MAX as u64;

/// When a task fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Every N seconds, aligned to the Unix epoch so every replica computes the same slots.
    Interval { every_sec: u64 },
    /// 6-field cron expression with seconds, evaluated in UTC: "0 */5 * * * *".
    Cron { expr: String },
}

impl Schedule {
    /// Intervals are whole seconds. A period with a fractional part maps to
    /// `every_sec: 0`, which registration rejects.
    pub fn every(period: Duration) -> Self {
        let every_sec = if period.subsec_nanos() == 0 { period.as_secs() } else { 0 };
        Self::Interval { every_sec }
    }

    pub fn cron(expr: impl Into<String>) -> Self {
        Self::Cron { expr: expr.into() }
    }
}

pub type TaskFuture = BoxFuture<'static, anyhow::Result<()>>;

type TaskFn = dyn Fn() -> TaskFuture + Send + Sync;

/// A registered unit of work.
///
/// The body takes no arguments beyond its own captured state. Its identity
/// must be stable across replicas and restarts, since it is part of the
/// job-lock key.
#[derive(Clone)]
pub struct TaskDescriptor {
    id: String,
    schedule: Schedule,
    expected_duration: Duration,
    lock_ttl: Option<Duration>,
    body: Arc<TaskFn>,
}

impl TaskDescriptor {
    pub fn new<F, Fut>(
        id: impl Into<String>,
        schedule: Schedule,
        expected_duration: Duration,
        body: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            id: id.into(),
            schedule,
            expected_duration,
            lock_ttl: None,
            body: Arc::new(move || body().boxed()),
        }
    }

    /// Override the job-lock TTL for this task only.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = Some(ttl);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn expected_duration(&self) -> Duration {
        self.expected_duration
    }

    pub fn lock_ttl(&self) -> Option<Duration> {
        self.lock_ttl
    }

    pub fn invoke(&self) -> TaskFuture {
        (self.body)()
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("id", &self.id)
            .field("schedule", &self.schedule)
            .field("expected_duration", &self.expected_duration)
            .field("lock_ttl", &self.lock_ttl)
            .finish_non_exhaustive()
    }
}

/// Job-lock TTL resolution: task override, then global override, then
/// expected duration plus buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTtlPolicy {
    pub global_override: Option<Duration>,
    pub buffer: Duration,
}

impl LockTtlPolicy {
    pub fn resolve(&self, task: &TaskDescriptor) -> Duration {
        task.lock_ttl
            .or(self.global_override)
            .unwrap_or(task.expected_duration + self.buffer)
    }
}

impl Default for LockTtlPolicy {
    fn default() -> Self {
        Self {
            global_override: None,
            buffer: DEFAULT_JOB_LOCK_BUFFER,
        }
    }
}

enum CompiledSchedule {
    Interval(i64),
    Cron(Box<cron::Schedule>),
}

impl CompiledSchedule {
    fn compile(id: &str, schedule: &Schedule) -> Result<Self, SchedulerError> {
        match schedule {
            Schedule::Interval { every_sec } => {
                if *every_sec == 0 {
                    return Err(invalid(id, "interval must be a positive whole number of seconds"));
                }
                if *every_sec > MAX_INTERVAL_SECS {
                    return Err(invalid(id, "interval is too large"));
                }
                Ok(Self::Interval(*every_sec as i64))
            }
            Schedule::Cron { expr } => cron::Schedule::from_str(expr)
                .map(|s| Self::Cron(Box::new(s)))
                .map_err(|e| SchedulerError::InvalidCronExpression {
                    expr: expr.clone(),
                    reason: e.to_string(),
                }),
        }
    }

    /// First slot strictly after `t`.
    fn after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval(every) => {
                let next = (t.timestamp().div_euclid(*every) + 1) * every;
                DateTime::from_timestamp(next, 0)
            }
            Self::Cron(schedule) => schedule.after(&t).next(),
        }
    }

    fn at_or_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.after(t - chrono::Duration::nanoseconds(1))
    }
}

fn invalid(id: &str, reason: impl Into<String>) -> SchedulerError {
    SchedulerError::InvalidTask {
        id: id.to_string(),
        reason: reason.into(),
    }
}

fn validate_id(id: &str) -> Result<(), SchedulerError> {
    if id.is_empty() {
        return Err(invalid(id, "id must not be empty"));
    }
    if id.contains(':') || id.chars().any(char::is_whitespace) {
        return Err(invalid(id, "id must not contain ':' or whitespace"));
    }
    Ok(())
}

/// Engine-side state for one registered task.
pub(crate) struct TaskState {
    pub(crate) descriptor: TaskDescriptor,
    compiled: CompiledSchedule,
    pub(crate) lock_ttl: Duration,
    pub(crate) next_slot: Option<DateTime<Utc>>,
    running: Arc<AtomicBool>,
}

impl TaskState {
    pub(crate) fn build(
        descriptor: TaskDescriptor,
        policy: &LockTtlPolicy,
        now: DateTime<Utc>,
    ) -> Result<Self, SchedulerError> {
        let id = descriptor.id();
        validate_id(id)?;
        if descriptor.expected_duration().is_zero() {
            return Err(invalid(id, "expected duration must be greater than zero"));
        }
        let compiled = CompiledSchedule::compile(id, descriptor.schedule())?;

        // The body is cut off before its lock lapses, with time left to abort it.
        let lock_ttl = policy.resolve(&descriptor);
        let expected = descriptor.expected_duration();
        if lock_ttl < expected + ABORT_GRACE {
            return Err(invalid(
                id,
                format!(
                    "job lock TTL {lock_ttl:?} must exceed the expected duration \
                     {expected:?} by at least {ABORT_GRACE:?}"
                ),
            ));
        }

        let next_slot = compiled.at_or_after(now);
        Ok(Self {
            descriptor,
            compiled,
            lock_ttl,
            next_slot,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub(crate) fn id(&self) -> &str {
        self.descriptor.id()
    }

    pub(crate) fn due_slot(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_slot.filter(|slot| *slot <= now)
    }

    /// Move past `fired`, skipping every slot that is already in the past.
    pub(crate) fn advance(&mut self, fired: DateTime<Utc>, now: DateTime<Utc>) {
        let following = self.compiled.after(fired);
        let next = self.compiled.after(now.max(fired));
        if let (Some(following), Some(next)) = (following, next) {
            if following < next {
                tracing::info!(
                    task_id = %self.descriptor.id(),
                    from = %following,
                    resume_at = %next,
                    "Missed slots skipped"
                );
            }
        }
        self.next_slot = next;
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark the task as running. `None` if a previous run has not finished.
    pub(crate) fn try_start(&self) -> Option<RunningGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunningGuard(Arc::clone(&self.running)))
    }
}

/// Clears the running flag when the run ends, however it ends.
pub(crate) struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
