mod common;

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use common::{eventually, FaultyStore, RecordingStore, TrackingStore};
use kvpipe::{
    BatchPipeline, MemStore, PipelineOptions, PipelineState, SharedQueueThreadPool, StoreEngine,
    StoreError, ThreadPool,
};

fn options(batch_size: usize) -> PipelineOptions {
    PipelineOptions {
        batch_size,
        ..PipelineOptions::default()
    }
}

fn pipeline<E: StoreEngine>(engine: E, batch_size: usize) -> BatchPipeline<E, SharedQueueThreadPool> {
    let pool = SharedQueueThreadPool::new(2).unwrap();
    BatchPipeline::new(engine, pool, options(batch_size))
}

#[test]
fn load_creates_every_item() {
    let store = MemStore::new();
    let pipeline = pipeline(store.clone(), 5_000);

    let report = pipeline.load(12_345).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.items, 12_345);
    assert_eq!(report.batches, 3);
    assert_eq!(report.state, PipelineState::Done);

    let members = store.set_members("identifiers".into()).unwrap();
    assert_eq!(members.len(), 12_345);
    assert_eq!(store.set_size("identifiers".into()).unwrap(), 12_345);
    for id in &members {
        assert_eq!(store.get(id.clone()).unwrap(), Some(format!("Value: {}", id)));
    }
    // buckets plus the working set, the counter is gone
    assert_eq!(store.len(), 12_345 + 1);
}

#[test]
fn remove_deletes_every_item() {
    let store = MemStore::new();
    let pipeline = pipeline(store.clone(), 64);
    pipeline.load(1_000).unwrap();
    let ids = store.set_members("identifiers".into()).unwrap();

    let report = pipeline.remove().unwrap();
    assert!(report.is_clean());
    assert_eq!(report.items, 1_000);
    assert_eq!(report.batches, 16);

    assert_eq!(store.set_size("identifiers".into()).unwrap(), 0);
    for id in ids {
        assert!(!store.exists(id).unwrap());
    }
    // the empty set was pruned, so there is nothing left to delete
    assert!(!store.exists("identifiers".into()).unwrap());
    assert!(!pipeline.cleanup().unwrap());
    assert!(store.is_empty());
}

#[test]
fn small_load_is_one_batch() {
    let store = RecordingStore::default();
    let pipeline = pipeline(store.clone(), 5_000);

    pipeline.load(3).unwrap();
    // one set and one add per item
    assert_eq!(store.batches(), vec![6]);
}

#[test]
fn progress_counter_lifecycle() {
    let store = RecordingStore::default();
    let pipeline = pipeline(store.clone(), 5);
    assert!(!store.exists("loadBatchNumber".into()).unwrap());

    let report = pipeline.load(12).unwrap();
    assert_eq!(report.last_progress, Some(3));
    assert_eq!(
        store.increments(),
        vec![
            ("loadBatchNumber".to_string(), 1),
            ("loadBatchNumber".to_string(), 2),
            ("loadBatchNumber".to_string(), 3),
        ]
    );
    assert!(!store.exists("loadBatchNumber".into()).unwrap());

    pipeline.remove().unwrap();
    let removals: Vec<i64> = store
        .increments()
        .into_iter()
        .filter(|(name, _)| name == "removeBatchNumber")
        .map(|(_, n)| n)
        .collect();
    assert_eq!(removals, vec![1, 2, 3]);
    assert!(!store.exists("removeBatchNumber".into()).unwrap());
}

#[test]
fn stale_counter_is_replaced() {
    let store = MemStore::new();
    for _ in 0..41 {
        store.incr("loadBatchNumber".into()).unwrap();
    }
    let report = pipeline(store.clone(), 10).load(25).unwrap();
    assert_eq!(report.last_progress, Some(3));
    assert!(!store.exists("loadBatchNumber".into()).unwrap());
}

#[test]
fn removing_an_empty_set_sends_nothing() {
    let store = RecordingStore::default();
    let report = pipeline(store.clone(), 100).remove().unwrap();

    assert_eq!(report.batches, 0);
    assert_eq!(report.state, PipelineState::Done);
    assert!(store.batches().is_empty());
    assert!(store.increments().is_empty());
}

#[test]
fn load_refuses_a_non_empty_working_set() {
    let store = MemStore::new();
    store.set_add("identifiers".into(), "leftover".into()).unwrap();

    match pipeline(store.clone(), 10).load(5) {
        Err(StoreError::WorkingSetNotEmpty { name, size }) => {
            assert_eq!(name, "identifiers");
            assert_eq!(size, 1);
        }
        other => panic!("expected WorkingSetNotEmpty, got {:?}", other),
    }
    assert_eq!(store.len(), 1);
}

#[test]
fn zero_batch_size_is_rejected() {
    let pipeline = pipeline(MemStore::new(), 0);
    assert!(matches!(pipeline.load(5), Err(StoreError::InvalidArgument(_))));
    assert!(matches!(pipeline.remove(), Err(StoreError::InvalidArgument(_))));
}

#[test]
fn per_item_faults_are_repaired() {
    let store = FaultyStore::new().fail_set_add_every(7);
    let pipeline = pipeline(store.clone(), 10);

    let report = pipeline.load(100).unwrap();
    assert_eq!(report.items, 100);
    assert_eq!(report.batches, 10);
    // every batch of 10 adds hits a multiple of 7
    assert_eq!(report.faulted_batches, 10);
    assert_eq!(report.repaired, 14);
    assert_eq!(report.last_progress, None);

    // the buckets of the 14 failed adds were deleted again
    let members: HashSet<String> = store
        .set_members("identifiers".into())
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(members.len(), 86);
    assert_eq!(store.inner.len(), 86 + 1);
    for id in &members {
        assert!(store.exists(id.clone()).unwrap());
    }
    assert_eq!(pipeline.reconcile().unwrap(), 0);
}

#[test]
fn failed_bucket_deletes_are_retried() {
    let store = FaultyStore::new().fail_get_and_delete_every(25);
    let pipeline = pipeline(store.clone(), 10);
    pipeline.load(100).unwrap();

    let report = pipeline.remove().unwrap();
    assert!(!report.stalled);
    assert!(report.faulted_batches > 0);
    assert_eq!(report.repaired, report.faulted_batches);
    assert_eq!(
        report.last_progress,
        Some((report.batches - report.faulted_batches) as i64)
    );
    assert!(store.inner.is_empty());
}

#[test]
fn failed_batches_are_skipped() {
    let store = FaultyStore::new().fail_next_batches(1);
    let report = pipeline(store.clone(), 10).load(30).unwrap();

    assert_eq!(report.batches, 3);
    assert_eq!(report.faulted_batches, 1);
    assert_eq!(report.last_progress, Some(2));
    assert_eq!(store.set_size("identifiers".into()).unwrap(), 20);
}

#[test]
fn remove_stalls_when_every_batch_faults() {
    let store = MemStore::new();
    pipeline(store.clone(), 10).load(20).unwrap();

    let faulty = FaultyStore::wrapping(store.clone()).fail_next_batches(usize::MAX);
    let mut opts = options(10);
    opts.max_consecutive_faults = 3;
    let pipeline = BatchPipeline::new(faulty, SharedQueueThreadPool::new(1).unwrap(), opts);

    let report = pipeline.remove().unwrap();
    assert!(report.stalled);
    assert_eq!(report.batches, 3);
    assert_eq!(report.faulted_batches, 3);
    assert_eq!(store.set_size("identifiers".into()).unwrap(), 20);
    assert!(!store.exists("removeBatchNumber".into()).unwrap());
}

fn tracking_pipeline(
    store: &TrackingStore,
    batch_size: usize,
    timeout: Duration,
) -> BatchPipeline<TrackingStore, SharedQueueThreadPool> {
    let mut opts = options(batch_size);
    opts.response_timeout = timeout;
    // enough workers that overlapping batches would actually overlap
    BatchPipeline::new(store.clone(), SharedQueueThreadPool::new(4).unwrap(), opts)
}

#[test]
fn batches_never_overlap() {
    let store = TrackingStore::new().delay_batches(Duration::from_millis(2));
    let pipeline = tracking_pipeline(&store, 50, Duration::from_secs(5));

    let (loaded, removed) = pipeline.run(1_000).unwrap();
    assert!(loaded.is_clean());
    assert!(removed.is_clean());
    assert_eq!(store.max_in_flight(), 1);
    assert_eq!(store.deleted().len(), 1_000);
    assert!(store.deletes_are_distinct());
    assert!(store.inner.is_empty());
}

#[test]
fn timed_out_batches_settle_before_the_next_one() {
    let store = TrackingStore::new().delay_batches(Duration::from_millis(150));
    let pipeline = tracking_pipeline(&store, 10, Duration::from_millis(120));

    let report = pipeline.load(30).unwrap();
    assert_eq!(report.batches, 3);
    assert_eq!(report.faulted_batches, 3);
    assert_eq!(report.last_progress, None);
    assert!(!report.interrupted);
    assert!(!report.stalled);

    // every late batch finished before the load returned
    assert_eq!(store.set_size("identifiers".into()).unwrap(), 30);
    assert_eq!(store.max_in_flight(), 1);
    assert!(!store.exists("loadBatchNumber".into()).unwrap());
}

#[test]
fn a_batch_that_never_settles_stalls_the_load() {
    let store = TrackingStore::new().delay_batches(Duration::from_millis(400));
    let pipeline = tracking_pipeline(&store, 10, Duration::from_millis(20));

    let report = pipeline.load(100).unwrap();
    assert!(report.stalled);
    assert_eq!(report.batches, 1);
    assert_eq!(report.items, 10);
    assert_eq!(report.faulted_batches, 1);

    assert!(eventually(Duration::from_secs(5), || {
        store.set_size("identifiers".into()).unwrap() == 10
    }));
    assert_eq!(store.max_in_flight(), 1);
}

#[test]
fn interrupted_load_runs_to_the_end() {
    let store = TrackingStore::new().delay_batches(Duration::from_millis(5));
    let pipeline = tracking_pipeline(&store, 10, Duration::from_secs(5));
    pipeline.interrupt_handle().interrupt();

    let report = pipeline.load(30).unwrap();
    assert!(report.interrupted);
    assert!(!report.stalled);
    assert_eq!(report.batches, 3);
    assert_eq!(report.items, 30);
    assert_eq!(report.faulted_batches, 3);
    assert_eq!(store.set_size("identifiers".into()).unwrap(), 30);
    assert_eq!(store.max_in_flight(), 1);
}

#[test]
fn interrupted_remove_draws_every_member_once() {
    let store = TrackingStore::new().delay_batches(Duration::from_millis(5));
    let pipeline = tracking_pipeline(&store, 10, Duration::from_secs(5));
    pipeline.load(95).unwrap();
    pipeline.interrupt_handle().interrupt();

    let report = pipeline.remove().unwrap();
    assert!(report.interrupted);
    assert!(!report.stalled);
    assert_eq!(report.batches, 10);
    assert_eq!(report.items, 95);
    assert_eq!(store.deleted().len(), 95);
    assert!(store.deletes_are_distinct());
    assert_eq!(store.max_in_flight(), 1);
    assert!(store.set_is_empty("identifiers".into()).unwrap());
}

#[test]
fn interrupt_during_a_load_keeps_batches_in_order() {
    let store = TrackingStore::new().delay_batches(Duration::from_millis(30));
    let pipeline = tracking_pipeline(&store, 10, Duration::from_secs(5));
    let interrupt = pipeline.interrupt_handle();

    let raiser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        interrupt.interrupt();
    });
    let report = pipeline.load(200).unwrap();
    raiser.join().unwrap();

    assert!(report.interrupted);
    assert_eq!(report.batches, 20);
    assert!(report.faulted_batches > 0);
    assert!(report.faulted_batches < 20);
    assert_eq!(store.set_size("identifiers".into()).unwrap(), 200);
    assert_eq!(store.max_in_flight(), 1);
}

#[test]
fn interrupted_run_leaves_nothing_behind() {
    let store = TrackingStore::new().delay_batches(Duration::from_millis(5));
    let pipeline = tracking_pipeline(&store, 10, Duration::from_secs(5));
    pipeline.interrupt_handle().interrupt();

    let (loaded, removed) = pipeline.run(50).unwrap();
    assert!(loaded.interrupted);
    assert!(removed.interrupted);
    assert_eq!(removed.items, 50);
    assert!(store.deletes_are_distinct());
    assert!(store.inner.is_empty());

    // no batch is still running behind the run's back
    thread::sleep(Duration::from_millis(100));
    assert!(store.inner.is_empty());
    assert_eq!(store.max_in_flight(), 1);
}

#[test]
fn reconcile_drops_members_without_buckets() {
    let store = MemStore::new();
    let pipeline = pipeline(store.clone(), 4);
    pipeline.load(10).unwrap();

    let members = store.set_members("identifiers".into()).unwrap();
    store.delete(members[0].clone()).unwrap();
    store.delete(members[1].clone()).unwrap();

    assert_eq!(pipeline.reconcile().unwrap(), 2);
    assert_eq!(store.set_size("identifiers".into()).unwrap(), 8);
}

#[test]
fn run_leaves_nothing_behind() {
    let store = MemStore::new();
    let (loaded, removed) = pipeline(store.clone(), 128).run(1_000).unwrap();

    assert_eq!(loaded.items, 1_000);
    assert_eq!(removed.items, 1_000);
    assert!(store.is_empty());
}
