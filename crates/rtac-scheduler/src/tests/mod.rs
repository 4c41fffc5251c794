mod exclusion;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::identity::ReplicaId;
use crate::mocks::{InMemoryLockStore, MockClock};
use crate::scheduler::Scheduler;
use crate::task::{Schedule, TaskDescriptor};

pub(crate) const LEADER_KEY: &str = "scheduler:leader";

pub(crate) type TestScheduler = Scheduler<InMemoryLockStore, MockClock>;

pub(crate) fn wall(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 14, h, m, s).unwrap()
}

pub(crate) fn config(id: &str) -> SchedulerConfig {
    SchedulerConfig::new(ReplicaId::new(id).unwrap())
}

pub(crate) fn scheduler(store: &InMemoryLockStore, id: &str, clock: &MockClock) -> TestScheduler {
    Scheduler::with_clock(store.clone(), config(id), clock.clone()).unwrap()
}

/// Counts how often its body ran; each run takes `work`.
#[derive(Clone, Default)]
pub(crate) struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn task(
        &self,
        id: &str,
        every: Duration,
        expected: Duration,
        work: Duration,
    ) -> TaskDescriptor {
        let runs = Arc::clone(&self.0);
        TaskDescriptor::new(id, Schedule::every(every), expected, move || {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(work).await;
                Ok(())
            }
        })
    }
}

pub(crate) struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Running {
    pub(crate) fn start(scheduler: TestScheduler) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(token.clone()));
        Self { token, handle }
    }

    pub(crate) async fn stop(self) {
        self.token.cancel();
        self.handle.await.unwrap();
    }
}
