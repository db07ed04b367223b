//! Rank worker draining adapter work items.

use crate::mock_adapter::{division_group, level_group, MockAdapter};
use chrono::NaiveDate;
use std::sync::Arc;
use voicerank::adapters::{AdapterError, RankWorker, WorkQueue};
use voicerank::ranks::{check_and_correct, StoredRanks};
use voicerank::storage::{AccrualStore, Database};
use voicerank::Platform;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_corrects_queued_users() {
    let adapter = Arc::new(MockAdapter::new(Platform::Teamspeak));
    let store = AccrualStore::new(Arc::new(Database::open_in_memory().unwrap()));
    let now = NaiveDate::from_ymd_opt(2024, 6, 3)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    store
        .upsert_identity(Platform::Teamspeak, "uid-1", "Anna", now)
        .unwrap();
    adapter.set_groups("uid-1", vec![level_group(3)]);

    let (queue, rx) = WorkQueue::new();
    let worker = RankWorker::spawn(
        Arc::clone(&adapter),
        store.clone(),
        rx,
        tokio::runtime::Handle::current(),
    )
    .unwrap();

    queue.check_ranks("uid-1");
    // Users the database has never seen are treated as level 1, division 1
    queue.check_ranks("uid-unknown");
    queue.close();
    tokio::task::spawn_blocking(move || worker.join())
        .await
        .unwrap();

    assert_eq!(
        adapter.groups_of("uid-1"),
        vec![level_group(1), division_group(1)]
    );
    assert_eq!(
        adapter.groups_of("uid-unknown"),
        vec![level_group(1), division_group(1)]
    );
}

/// A refused level group does not keep the division from being corrected
#[tokio::test]
async fn test_division_corrected_when_level_fails() {
    let adapter = MockAdapter::new(Platform::Teamspeak);
    adapter.set_groups("uid-1", vec![level_group(4), division_group(3)]);
    adapter.refuse_group(level_group(1));

    let result = check_and_correct(&adapter, "uid-1", StoredRanks::default()).await;

    assert!(matches!(result, Err(AdapterError::Rejected(_))));
    assert_eq!(adapter.groups_of("uid-1"), vec![division_group(1)]);
}

/// Items pushed after the worker stopped are dropped without panicking
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_closed_queue_drops_items() {
    let adapter = Arc::new(MockAdapter::new(Platform::Discord));
    let store = AccrualStore::new(Arc::new(Database::open_in_memory().unwrap()));

    let (queue, rx) = WorkQueue::new();
    let worker = RankWorker::spawn(
        Arc::clone(&adapter),
        store,
        rx,
        tokio::runtime::Handle::current(),
    )
    .unwrap();
    queue.close();
    tokio::task::spawn_blocking(move || worker.join())
        .await
        .unwrap();

    queue.check_ranks("42");
    assert!(adapter.calls().is_empty());
}
