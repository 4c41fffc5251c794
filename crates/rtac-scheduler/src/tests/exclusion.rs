use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::executor::GuardedExecutor;
use crate::job_lock::JobLockManager;
use crate::keys::KeySpace;
use crate::leader::LeaderElection;
use crate::status::{SkipReason, StatusHandle, TaskOutcome};

const TTL: Duration = Duration::from_secs(30);

fn election(store: &InMemoryLockStore, id: &str) -> Arc<LeaderElection<InMemoryLockStore>> {
    let id = ReplicaId::new(id).unwrap();
    let e = LeaderElection::new(store.clone(), id, &KeySpace::default(), TTL);
    e.mark_reachable();
    Arc::new(e)
}

fn executor(
    store: &InMemoryLockStore,
    election: &Arc<LeaderElection<InMemoryLockStore>>,
) -> GuardedExecutor<InMemoryLockStore, MockClock> {
    let id = election.identity().clone();
    GuardedExecutor::new(
        Arc::clone(election),
        JobLockManager::new(store.clone(), id.clone(), KeySpace::default()),
        StatusHandle::new(id, election.subscribe(), 10),
        MockClock::starting_at(wall(12, 0, 0)),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn at_most_one_replica_acquires_the_lease() {
    let store = InMemoryLockStore::new();
    let candidates: Vec<_> = (0..16).map(|i| election(&store, &format!("replica-{i}"))).collect();

    let mut handles = Vec::new();
    for candidate in &candidates {
        let candidate = Arc::clone(candidate);
        handles.push(tokio::spawn(async move { candidate.try_acquire().await }));
    }
    let mut winners = 0;
    for h in handles {
        if h.await.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(candidates.iter().filter(|c| c.is_leader()).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn frozen_leader_loses_effective_leadership_within_ttl() {
    let store = InMemoryLockStore::new();
    let a = election(&store, "a");
    let b = election(&store, "b");
    assert!(a.try_acquire().await);

    // a stops renewing.
    tokio::time::advance(TTL - Duration::from_millis(1)).await;
    assert!(a.is_leader());
    assert!(!b.try_acquire().await);

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(!a.is_leader());
    assert!(b.try_acquire().await);
}

#[tokio::test(start_paused = true)]
async fn split_brain_still_runs_a_slot_once() {
    let store = InMemoryLockStore::new();
    let a = election(&store, "a");
    let b = election(&store, "b");
    assert!(a.try_acquire().await);

    // b grabs the key behind a's back; a has not renewed yet and still believes it leads.
    store.force_value(LEADER_KEY, "b", TTL);
    assert!(b.try_acquire().await);
    assert!(a.is_leader() && b.is_leader());

    let runs = Arc::new(AtomicUsize::new(0));
    let task = {
        let runs = Arc::clone(&runs);
        let every = Schedule::every(Duration::from_secs(60));
        TaskDescriptor::new("poll", every, Duration::from_secs(10), move || {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(())
            }
        })
    };
    let slot = wall(12, 0, 0);
    let lock_ttl = Duration::from_secs(15);

    let (ea, eb) = (executor(&store, &a), executor(&store, &b));
    let (ra, rb) = tokio::join!(
        ea.run_guarded(&task, slot, lock_ttl, CancellationToken::new()),
        eb.run_guarded(&task, slot, lock_ttl, CancellationToken::new()),
    );

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let outcomes = [ra, rb];
    assert_eq!(outcomes.iter().filter(|o| **o == TaskOutcome::Succeeded).count(), 1);
    assert!(outcomes.contains(&TaskOutcome::Skipped { reason: SkipReason::LockHeld }));
}

#[tokio::test(start_paused = true)]
async fn renewal_failure_blocks_the_next_dispatch() {
    let store = InMemoryLockStore::new();
    let a = election(&store, "a");
    assert!(a.try_acquire().await);

    store.force_value(LEADER_KEY, "b", TTL);
    assert!(!a.renew().await);

    let runs = Counter::default();
    let outcome = executor(&store, &a)
        .run_guarded(
            &runs.task("poll", Duration::from_secs(60), Duration::from_secs(5), Duration::ZERO),
            wall(12, 0, 0),
            Duration::from_secs(10),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome, TaskOutcome::Skipped { reason: SkipReason::NotLeader });
    assert_eq!(runs.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn releasing_an_expired_job_lock_does_not_block_later_slots() {
    let store = InMemoryLockStore::new();
    let id = ReplicaId::new("a").unwrap();
    let locks = JobLockManager::new(store.clone(), id, KeySpace::default());

    let first = locks.claim("poll", wall(12, 0, 0), Duration::from_secs(5)).await.unwrap();
    let first = first.unwrap();
    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(!locks.release(first).await.unwrap());

    let next = locks.claim("poll", wall(12, 1, 0), Duration::from_secs(5)).await.unwrap();
    assert!(next.is_some());
}
