use std::future::Future;
use std::time::Duration;

use crate::error::StoreError;

/// Atomic conditional writes with expiry, the only contract the scheduler
/// needs from its backing store.
///
/// Every operation is a single store-native atomic step, never a read followed
/// by a write. `Ok(false)` means contention or "not the owner" and is expected;
/// `Err` means the store could not be reached and callers treat it as
/// connectivity loss.
///
/// Ownership is a value comparison, not a consensus protocol: a holder that
/// stops renewing loses the lease when the TTL runs out, and two replicas can
/// overlap for at most the gap between a missed renewal and the next check.
pub trait LockStore: Send + Sync + Clone + 'static {
    /// Set `key = value` with `ttl` only if `key` is absent.
    fn acquire(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Reset the expiry of `key` to `ttl` only if it currently holds `expected`.
    fn renew(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Delete `key` only if it currently holds `expected`.
    fn release(
        &self,
        key: &str,
        expected: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn ping(&self) -> impl Future<Output = Result<bool, StoreError>> + Send;
}
