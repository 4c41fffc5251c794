use chrono::{DateTime, Utc};

/// Wall-clock source for slot computation.
///
/// Deadlines and TTLs use `tokio::time`; only schedule evaluation needs calendar time.
pub trait Clock: Send + Sync + Clone + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
