//! # rtac-scheduler
//!
//! Leader election and per-slot job locking for replicated device pollers.
//!
//! ## Features
//!
//! - One leader per cluster through a Redis lease (`SET NX PX`), renewed by a heartbeat.
//! - Ownership is always a value comparison: renew and release are owner-checked Lua scripts.
//! - Every task run is guarded: store ping, leadership check, then a job lock keyed by
//!   task id and scheduled slot, so a slot runs at most once even during a handoff race.
//! - Fail-closed: a failed renewal or an unreachable store drops leadership before the
//!   next task dispatch.
//! - Store outages trigger reconnection with capped, jittered exponential backoff.
//! - Graceful shutdown drains in-flight runs, cancels the rest, and releases the lease.
//! - Missed slots are skipped (at-most-once per slot).
//!
//! This is lease-based mutual exclusion, not consensus. A leader that freezes keeps
//! its lease until the TTL runs out, and a replica whose renewals stall stops acting
//! as leader at its local lease deadline. Job locks bound the damage when two
//! replicas briefly overlap.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use rtac_scheduler::{
//!     ReplicaId, Schedule, Scheduler, SchedulerConfig, TaskDescriptor,
//!     redis_store::RedisLockStore,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SchedulerConfig::new(ReplicaId::new("poller-0")?);
//!     let store = RedisLockStore::open("redis://localhost:6379/0", config.store_timeout)?;
//!
//!     let mut scheduler = Scheduler::new(store, config)?;
//!     scheduler.register(TaskDescriptor::new(
//!         "modbus_poll",
//!         Schedule::every(Duration::from_secs(60)),
//!         Duration::from_secs(30),
//!         || async {
//!             // poll devices, write results
//!             Ok(())
//!         },
//!     ))?;
//!
//!     scheduler.run(CancellationToken::new()).await;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod command;
pub mod config;
pub mod env;
pub mod error;
pub mod executor;
pub mod health;
pub mod heartbeat;
pub mod identity;
pub mod job_lock;
pub mod keys;
pub mod leader;
pub mod redis_store;
pub mod scheduler;
pub mod signal;
pub mod state;
pub mod status;
pub mod supervisor;
pub mod task;
pub mod tasks_file;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod mocks;

#[cfg(test)]
mod tests;

pub use config::SchedulerConfig;
pub use error::{ConfigError, SchedulerError, StoreError};
pub use identity::ReplicaId;
pub use leader::LeaderElection;
pub use scheduler::Scheduler;
pub use state::{Role, SchedulerState};
pub use status::{SchedulerStatus, SkipReason, StatusHandle, TaskOutcome};
pub use task::{Schedule, TaskDescriptor};
pub use traits::LockStore;
