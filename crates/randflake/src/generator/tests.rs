use crate::{
    Error, Generator, LEASE_RANGE_MAX, LEASE_SIZE, LeaseConfig, MemoryLeaseStore, RANDFLAKE_EPOCH,
    RandFlake, RandflakeId, RangeRecord, StoreError, TimeSource,
};
use core::time::Duration;
use portable_atomic::{AtomicI64, Ordering};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const SECRET: &[u8; 16] = b"0123456789abcdef";
const T0: i64 = RANDFLAKE_EPOCH + 86_400;

#[derive(Clone)]
struct ManualClock(Arc<AtomicI64>);

impl ManualClock {
    fn new(secs: i64) -> Self {
        Self(Arc::new(AtomicI64::new(secs)))
    }

    fn set(&self, secs: i64) {
        self.0.store(secs, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn unix_secs(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn config() -> LeaseConfig {
    LeaseConfig {
        conflict_backoff: Duration::from_millis(1),
        ..LeaseConfig::default()
    }
}

fn randflake(store: &MemoryLeaseStore, clock: &ManualClock) -> RandFlake<MemoryLeaseStore, ManualClock> {
    RandFlake::with_options(store.clone(), SECRET, clock.clone(), config()).unwrap()
}

async fn node_of(generator: &Generator<MemoryLeaseStore, ManualClock>) -> u64 {
    generator.next_id().await.unwrap().node_id()
}

#[tokio::test]
async fn rapid_ids_share_timestamp_and_node_and_decrypt_back() {
    let store = MemoryLeaseStore::new();
    let clock = ManualClock::new(T0);
    let randflake = randflake(&store, &clock);
    let generator = randflake.new_generator().await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(generator.generate_unencrypted().await.unwrap());
    }
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let first = RandflakeId::from(ids[0]);
    for raw in &ids {
        let id = RandflakeId::from(*raw);
        assert_eq!(id.timestamp(), first.timestamp());
        assert_eq!(id.node_id(), first.node_id());
        assert_eq!(raw >> 17, ids[0] >> 17);
    }
    let counters: Vec<u64> = ids.iter().map(|r| RandflakeId::from(*r).counter()).collect();
    // Counter 0 went to the validation call in `new_generator`.
    assert_eq!(counters, vec![1, 2, 3, 4, 5]);

    let hidden = generator.generate().await.unwrap();
    let raw = RandflakeId::from(randflake.decrypt(hidden));
    assert_eq!(raw, RandflakeId::from_components(first.timestamp(), first.node_id(), 6));
}

#[tokio::test]
async fn pair_returns_raw_and_its_encryption() {
    let store = MemoryLeaseStore::new();
    let randflake = randflake(&store, &ManualClock::new(T0));
    let generator = randflake.new_generator().await.unwrap();

    let (raw, hidden) = generator.generate_pair().await.unwrap();
    assert_eq!(randflake.encrypt(raw), hidden);
    assert_eq!(randflake.decrypt(hidden), raw);
    assert_ne!(raw, hidden);
}

#[tokio::test]
async fn first_generator_claims_one_lease_from_the_start() {
    let store = MemoryLeaseStore::new();
    let randflake = randflake(&store, &ManualClock::new(T0));
    let generator = randflake.new_generator().await.unwrap();

    assert_eq!(generator.sources(), 1);
    assert_eq!(node_of(&generator).await, 0);

    let held = store.held_by(randflake.holder(), T0);
    assert_eq!(held.len(), 1);
    assert_eq!((held[0].range_start, held[0].range_end), (0, LEASE_SIZE - 1));
    assert_eq!(held[0].lease_end, T0 + 600);
    assert_eq!(randflake.held_leases().await.len(), 1);
}

#[tokio::test]
async fn generators_get_distinct_node_ids_from_one_lease() {
    let store = MemoryLeaseStore::new();
    let randflake = randflake(&store, &ManualClock::new(T0));

    let mut nodes = Vec::new();
    let mut generators = Vec::new();
    for _ in 0..5 {
        let generator = randflake.new_generator().await.unwrap();
        nodes.push(node_of(&generator).await);
        generators.push(generator);
    }
    assert_eq!(nodes, vec![0, 1, 2, 3, 4]);
    assert_eq!(store.records().len(), 1);
}

#[tokio::test]
async fn full_lease_triggers_a_second_claim() {
    let store = MemoryLeaseStore::new();
    let randflake = randflake(&store, &ManualClock::new(T0));

    let mut generators = Vec::new();
    for _ in 0..=LEASE_SIZE {
        generators.push(randflake.new_generator().await.unwrap());
    }
    assert_eq!(node_of(generators.last().unwrap()).await, LEASE_SIZE as u64);
    assert_eq!(randflake.held_leases().await.len(), 2);
}

#[tokio::test]
async fn closed_generator_returns_sources_for_reuse() {
    let store = MemoryLeaseStore::new();
    let randflake = randflake(&store, &ManualClock::new(T0));

    let first = randflake.new_generator().await.unwrap();
    let node = node_of(&first).await;
    first.close().await;
    assert_eq!(randflake.idle_sources(), 1);
    assert!(matches!(first.generate().await, Err(Error::Closed)));
    assert!(first.generate().await.unwrap_err().is_fatal());

    first.close().await;
    assert_eq!(randflake.idle_sources(), 1);

    let second = randflake.new_generator().await.unwrap();
    assert_eq!(node_of(&second).await, node);
    assert_eq!(randflake.idle_sources(), 0);
}

#[tokio::test]
async fn dropping_an_open_generator_releases_its_sources() {
    let store = MemoryLeaseStore::new();
    let randflake = randflake(&store, &ManualClock::new(T0));

    let generator = randflake.new_generator().await.unwrap();
    drop(generator);
    assert_eq!(randflake.idle_sources(), 1);
}

#[tokio::test]
async fn exhausting_a_second_grows_the_generator() {
    let store = MemoryLeaseStore::new();
    let randflake = randflake(&store, &ManualClock::new(T0));
    let generator = randflake.new_generator().await.unwrap();

    // `new_generator` already used counter 0.
    for _ in 0..RandflakeId::MAX_COUNTER {
        let id = generator.next_id().await.unwrap();
        assert_eq!(id.node_id(), 0);
    }
    assert_eq!(generator.sources(), 1);

    let id = generator.next_id().await.unwrap();
    assert_eq!(id.node_id(), 1);
    assert_eq!(id.counter(), 0);
    assert_eq!(generator.sources(), 2);

    generator.close().await;
    assert_eq!(randflake.idle_sources(), 2);
}

#[tokio::test]
async fn growing_frees_replaced_source_lists() {
    let store = MemoryLeaseStore::new();
    let randflake = randflake(&store, &ManualClock::new(T0));
    let generator = randflake.new_generator().await.unwrap();
    assert_eq!(generator.retained_snapshots().await, 1);

    // Two full sources under one fixed second, then one more ID.
    let per_source = RandflakeId::MAX_COUNTER + 1;
    for _ in 1..2 * per_source + 1 {
        generator.next_id().await.unwrap();
    }
    assert_eq!(generator.sources(), 3);
    assert_eq!(generator.retained_snapshots().await, 1);

    generator.close().await;
    assert_eq!(generator.retained_snapshots().await, 0);
    assert_eq!(randflake.idle_sources(), 3);
}

#[tokio::test]
async fn sources_stop_before_their_lease_reaches_the_safety_margin() {
    let store = MemoryLeaseStore::new();
    let clock = ManualClock::new(T0);
    let randflake = randflake(&store, &clock);
    let generator = randflake.new_generator().await.unwrap();
    assert_eq!(node_of(&generator).await, 0);

    // No upkeep ran, so the first lease is now inside the margin.
    clock.set(T0 + 600 - 179);
    let id = generator.next_id().await.unwrap();
    assert_eq!(id.node_id(), LEASE_SIZE as u64);
    assert_eq!(generator.sources(), 2);

    let held = store.held_by(randflake.holder(), clock.unix_secs());
    assert_eq!(held.len(), 2);
}

#[tokio::test]
async fn upkeep_renews_leases_past_the_threshold() {
    let store = MemoryLeaseStore::new();
    let clock = ManualClock::new(T0);
    let randflake = randflake(&store, &clock);
    let _generator = randflake.new_generator().await.unwrap();

    clock.set(T0 + 100);
    let report = randflake.maintain_leases().await;
    assert_eq!(report.renewed, 0);

    clock.set(T0 + 181);
    let report = randflake.maintain_leases().await;
    assert_eq!(report.renewed, 1);
    assert_eq!(report.dropped, 0);

    let lease = &randflake.held_leases().await[0];
    assert_eq!(lease.expires_at(), T0 + 181 + 600);
    assert_eq!(store.records()[0].lease_end, T0 + 181 + 600);
}

#[tokio::test]
async fn upkeep_drops_leases_inside_the_margin() {
    let store = MemoryLeaseStore::new();
    let clock = ManualClock::new(T0);
    let randflake = randflake(&store, &clock);
    let generator = randflake.new_generator().await.unwrap();
    generator.close().await;
    assert_eq!(randflake.idle_sources(), 1);

    clock.set(T0 + 430);
    let report = randflake.maintain_leases().await;
    assert_eq!(report.dropped, 1);
    assert_eq!(report.renewed, 0);
    assert!(randflake.held_leases().await.is_empty());
    assert_eq!(randflake.idle_sources(), 0);
}

#[tokio::test]
async fn failed_renewal_is_reported_and_lease_kept() {
    let store = MemoryLeaseStore::new();
    let clock = ManualClock::new(T0);
    let randflake = randflake(&store, &clock);
    let _generator = randflake.new_generator().await.unwrap();

    clock.set(T0 + 200);
    store.inject_failure("network partition");
    let report = randflake.maintain_leases().await;
    assert_eq!(report.failed, 1);
    assert_eq!(randflake.held_leases().await.len(), 1);

    let report = randflake.maintain_leases().await;
    assert_eq!(report.renewed, 1);
}

#[tokio::test(start_paused = true)]
async fn background_worker_renews_until_shutdown() {
    let store = MemoryLeaseStore::new();
    let clock = ManualClock::new(T0);
    let randflake = randflake(&store, &clock);
    let _generator = randflake.new_generator().await.unwrap();

    clock.set(T0 + 200);
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(randflake.held_leases().await[0].expires_at(), T0 + 800);

    randflake.shutdown().await;
    clock.set(T0 + 500);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(randflake.held_leases().await[0].expires_at(), T0 + 800);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_a_stalled_renewal() {
    let store = MemoryLeaseStore::new();
    let clock = ManualClock::new(T0);
    let randflake = randflake(&store, &clock);
    let _generator = randflake.new_generator().await.unwrap();

    // Every renewal commit conflicts and retries are unbounded.
    store.inject_conflicts(u32::MAX);
    clock.set(T0 + 200);
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(store.conflicts() > 0);

    tokio::time::timeout(Duration::from_secs(5), randflake.shutdown())
        .await
        .expect("shutdown waited on the stalled renewal");

    let conflicts = store.conflicts();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.conflicts(), conflicts);
    assert_eq!(randflake.held_leases().await[0].expires_at(), T0 + 600);
}

#[tokio::test]
async fn fully_leased_space_is_resource_exhaustion() {
    let store = MemoryLeaseStore::new();
    store.seed([RangeRecord {
        id: 1,
        range_start: 0,
        range_end: LEASE_RANGE_MAX - 1,
        lease_holder: Uuid::now_v7(),
        lease_start: T0,
        lease_end: T0 + 600,
    }]);
    let randflake = randflake(&store, &ManualClock::new(T0));

    let err = randflake.new_generator().await.unwrap_err();
    assert!(err.is_exhausted());
}

#[tokio::test]
async fn store_failures_reach_the_caller() {
    let store = MemoryLeaseStore::new();
    store.inject_failure("connection refused");
    let randflake = randflake(&store, &ManualClock::new(T0));

    let err = randflake.new_generator().await.unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::Backend(_))));
}

#[tokio::test]
async fn past_the_horizon_the_generator_is_dead() {
    let store = MemoryLeaseStore::new();
    let far = RANDFLAKE_EPOCH + RandflakeId::MAX_TIMESTAMP as i64 + 1;
    let randflake = randflake(&store, &ManualClock::new(far));

    let err = randflake.new_generator().await.unwrap_err();
    assert!(matches!(err, Error::Dead));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn invalid_secret_and_config_are_rejected() {
    let store = MemoryLeaseStore::new();
    let err = RandFlake::new(store.clone(), b"too short").unwrap_err();
    assert!(matches!(err, Error::InvalidSecret { len: 9 }));

    let bad = LeaseConfig {
        safety_margin: Duration::from_secs(600),
        ..config()
    };
    let err = RandFlake::with_options(store, SECRET, ManualClock::new(T0), bad).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_processes_claim_disjoint_ranges() {
    const PROCESSES: usize = 8;
    const GENERATORS_PER_PROCESS: usize = 3;

    let store = MemoryLeaseStore::new();
    let clock = ManualClock::new(T0);

    let mut tasks = Vec::new();
    for _ in 0..PROCESSES {
        let randflake = randflake(&store, &clock);
        tasks.push(tokio::spawn(async move {
            let mut generators = Vec::new();
            for _ in 0..GENERATORS_PER_PROCESS {
                generators.push(randflake.new_generator().await.unwrap());
            }
            // Push the process onto a second lease as well.
            for _ in 0..LEASE_SIZE {
                generators.push(randflake.new_generator().await.unwrap());
            }
            randflake.held_leases().await.len()
        }));
    }
    for task in futures::future::join_all(tasks).await {
        assert_eq!(task.unwrap(), 2);
    }

    let records = store.records();
    assert_eq!(records.len(), PROCESSES * 2);
    for (i, a) in records.iter().enumerate() {
        for b in &records[i + 1..] {
            assert!(
                !a.overlaps(b.range_start, b.range_end),
                "{a:?} overlaps {b:?}"
            );
        }
    }
    let holders: HashSet<Uuid> = records.iter().map(|r| r.lease_holder).collect();
    assert_eq!(holders.len(), PROCESSES);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_waits_for_in_flight_calls_and_releases_once() {
    const TASKS: usize = 8;

    let store = MemoryLeaseStore::new();
    let randflake = randflake(&store, &ManualClock::new(T0));
    let generator = Arc::new(randflake.new_generator().await.unwrap());
    let seen = Arc::new(Mutex::new(HashSet::new()));

    let mut tasks = Vec::new();
    for _ in 0..TASKS {
        let generator = Arc::clone(&generator);
        let seen = Arc::clone(&seen);
        tasks.push(tokio::spawn(async move {
            loop {
                match generator.generate_unencrypted().await {
                    Ok(id) => assert!(seen.lock().unwrap().insert(id)),
                    Err(Error::Closed) => break,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        }));
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    generator.close().await;
    assert_eq!(generator.sources(), 0);

    for task in futures::future::join_all(tasks).await {
        task.unwrap();
    }

    // A source released twice would hand the same node ID to two generators.
    let idle = randflake.idle_sources();
    assert!(idle >= 1);
    let mut nodes = HashSet::new();
    let mut generators = Vec::new();
    for _ in 0..idle {
        let generator = randflake.new_generator().await.unwrap();
        assert!(nodes.insert(node_of(&generator).await));
        generators.push(generator);
    }
    assert_eq!(randflake.idle_sources(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ids_are_unique_across_generators_and_threads() {
    const TASKS: usize = 8;
    const IDS_PER_TASK: usize = 5_000;

    let store = MemoryLeaseStore::new();
    let randflake = randflake(&store, &ManualClock::new(T0));
    let shared = Arc::new(randflake.new_generator().await.unwrap());

    let mut tasks = Vec::new();
    for i in 0..TASKS {
        let randflake = randflake.clone();
        let shared = Arc::clone(&shared);
        tasks.push(tokio::spawn(async move {
            let own = randflake.new_generator().await.unwrap();
            let mut ids = Vec::with_capacity(IDS_PER_TASK * 2);
            for _ in 0..IDS_PER_TASK {
                ids.push(own.generate().await.unwrap());
                let target = if i % 2 == 0 { &*shared } else { &own };
                ids.push(target.generate().await.unwrap());
            }
            own.close().await;
            ids
        }));
    }

    let mut seen = HashSet::new();
    for task in futures::future::join_all(tasks).await {
        for id in task.unwrap() {
            assert!(seen.insert(id));
        }
    }
    assert_eq!(seen.len(), TASKS * IDS_PER_TASK * 2);
}
