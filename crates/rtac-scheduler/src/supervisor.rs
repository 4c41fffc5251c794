use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::leader::LeaderElection;
use crate::traits::LockStore;

pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Exponential reconnect delay with downward jitter.
///
/// `base * 2^n`, capped at `max`, times a factor in [0.8, 1.0]. Never smaller
/// than the previous delay and never above `max`.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    attempt: u32,
    last: Duration,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
            last: Duration::ZERO,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(16);
        let raw = self.base.saturating_mul(1u32 << exponent).min(self.max);
        // factor ∈ [0.8, 1.0]
        let factor = 0.8 + rand::random::<f64>() * 0.2;
        let delay = raw.mul_f64(factor).max(self.last).min(self.max);

        self.attempt = self.attempt.saturating_add(1);
        self.last = delay;
        delay
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(RECONNECT_BASE_DELAY, RECONNECT_MAX_DELAY)
    }
}

/// Watches the run state and, whenever the store is marked unreachable, pings
/// it with backoff until it answers.
pub struct ReconnectSupervisor<S: LockStore> {
    election: Arc<LeaderElection<S>>,
    base: Duration,
    max: Duration,
}

impl<S: LockStore> ReconnectSupervisor<S> {
    pub fn new(election: Arc<LeaderElection<S>>) -> Self {
        Self {
            election,
            base: RECONNECT_BASE_DELAY,
            max: RECONNECT_MAX_DELAY,
        }
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base = base;
        self.max = max;
        self
    }

    pub async fn run(self, token: CancellationToken) {
        let mut rx = self.election.subscribe();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                open = async { rx.wait_for(|s| !s.store_reachable).await.is_ok() } => {
                    if !open {
                        break;
                    }
                }
            }
            if !self.reconnect(&token).await {
                break;
            }
        }
        tracing::debug!(replica_id = %self.election.identity(), "Reconnect supervisor stopped");
    }

    /// Ping until the store answers, then re-enter election from a clean
    /// `Unknown` state. Returns false if cancelled first.
    pub async fn reconnect(&self, token: &CancellationToken) -> bool {
        let replica_id = self.election.identity();
        let mut backoff = ReconnectBackoff::new(self.base, self.max);

        loop {
            match self.election.store().ping().await {
                Ok(true) => {
                    self.election.mark_reachable();
                    tracing::info!(
                        %replica_id,
                        attempts = backoff.attempts() + 1,
                        "Store connectivity restored"
                    );
                    self.election.try_acquire().await;
                    return true;
                }
                Ok(false) => {
                    tracing::debug!(%replica_id, "Store ping returned an unexpected reply");
                }
                Err(e) => {
                    tracing::debug!(%replica_id, error = %e, "Store ping failed");
                }
            }

            let delay = backoff.next_delay();
            tracing::info!(
                %replica_id,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to store"
            );
            tokio::select! {
                _ = token.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
