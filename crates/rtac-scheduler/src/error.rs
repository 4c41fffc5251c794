//! Error types for rtac-scheduler

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure talking to the lock store.
///
/// Every variant is transient: callers treat it as connectivity loss and hand
/// recovery to the reconnection supervisor. Lock contention is never an error,
/// it is reported as `Ok(false)` by [`LockStore`](crate::traits::LockStore).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store {op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Connection(_) => "connection",
            Self::Backend(_) => "backend",
        }
    }
}

/// Startup configuration errors. These are the only errors allowed to abort the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("heartbeat interval ({heartbeat:?}) must be below the leader lock TTL ({ttl:?})")]
    HeartbeatNotBelowTtl { heartbeat: Duration, ttl: Duration },

    #[error("store timeout ({timeout:?}) must be below the heartbeat interval ({heartbeat:?})")]
    StoreTimeoutNotBelowHeartbeat { timeout: Duration, heartbeat: Duration },

    #[error("replica identity is required but none of {sources} is set")]
    MissingReplicaId { sources: &'static str },

    #[error("invalid replica identity {0:?}: must be non-empty and contain no whitespace")]
    InvalidReplicaId(String),

    #[error("invalid namespace {0:?}: must be non-empty and contain no whitespace")]
    InvalidNamespace(String),

    #[error("invalid {var} value {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("failed to read tasks file {path}: {source}")]
    TasksFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse tasks file {path}: {source}")]
    TasksFileParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid command for task {id:?}: {reason}")]
    InvalidCommand { id: String, reason: String },

    #[error("invalid store URL: {0}")]
    InvalidStoreUrl(String),
}

/// Errors raised while registering tasks with the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task {id:?} is already registered")]
    DuplicateTask { id: String },

    #[error("invalid task {id:?}: {reason}")]
    InvalidTask { id: String, reason: String },

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCronExpression { expr: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
