use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::identity::ReplicaId;
use crate::keys::{KeySpace, format_slot};
use crate::traits::LockStore;

/// Proof of a claimed `(task, slot)` invocation. Released by value, so it can
/// only be released once.
#[derive(Debug)]
pub struct JobLock {
    key: String,
    task_id: String,
    slot: DateTime<Utc>,
    ttl: Duration,
    acquired_at: Instant,
}

impl JobLock {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn slot(&self) -> DateTime<Utc> {
        self.slot
    }

    /// Local estimate of when the store drops the lock.
    pub fn expires_at(&self) -> Instant {
        self.acquired_at + self.ttl
    }
}

/// Claims per-slot job locks so two replicas that both think they lead still
/// cannot run the same slot.
#[derive(Clone)]
pub struct JobLockManager<S: LockStore> {
    store: S,
    id: ReplicaId,
    keys: KeySpace,
}

impl<S: LockStore> JobLockManager<S> {
    pub fn new(store: S, id: ReplicaId, keys: KeySpace) -> Self {
        Self { store, id, keys }
    }

    /// `Ok(None)` when another claimant already holds the slot.
    pub async fn claim(
        &self,
        task_id: &str,
        slot: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Option<JobLock>, StoreError> {
        let key = self.keys.job_key(task_id, slot);
        let acquired_at = Instant::now();
        if !self.store.acquire(&key, self.id.as_str(), ttl).await? {
            warn!(
                replica_id = %self.id,
                task_id,
                slot = %format_slot(slot),
                key = %key,
                "Job lock denied, slot already claimed"
            );
            return Ok(None);
        }

        info!(
            replica_id = %self.id,
            task_id,
            slot = %format_slot(slot),
            ttl_secs = ttl.as_secs(),
            "Job lock acquired"
        );
        Ok(Some(JobLock {
            key,
            task_id: task_id.to_string(),
            slot,
            ttl,
            acquired_at,
        }))
    }

    /// `Ok(false)` if the lock had already expired or changed hands.
    pub async fn release(&self, lock: JobLock) -> Result<bool, StoreError> {
        let released = self.store.release(&lock.key, self.id.as_str()).await?;
        if released {
            debug!(
                replica_id = %self.id,
                task_id = %lock.task_id,
                slot = %format_slot(lock.slot),
                "Job lock released"
            );
        } else {
            warn!(
                replica_id = %self.id,
                task_id = %lock.task_id,
                slot = %format_slot(lock.slot),
                "Job lock was no longer held at release"
            );
        }
        Ok(released)
    }

    /// Owner-checked delete by coordinates. A no-op `Ok(false)` on absent keys.
    pub async fn release_key(
        &self,
        task_id: &str,
        slot: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.store
            .release(&self.keys.job_key(task_id, slot), self.id.as_str())
            .await
    }
}
