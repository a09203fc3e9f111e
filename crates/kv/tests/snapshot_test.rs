//! Snapshot visibility and garbage collection behavior

use ember_kv::{EngineConfig, Error, KvEngine};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test]
async fn test_reads_are_repeatable_across_commits() {
    let engine = KvEngine::new(EngineConfig::default());

    let setup = engine.new_txn();
    engine.put(&setup, 1, "5".into()).await.unwrap();
    engine.put(&setup, 2, "5".into()).await.unwrap();
    setup.commit().unwrap();

    let reader = engine.new_txn();
    assert_eq!(engine.get(&reader, 1).await.unwrap(), "5");

    let writer = engine.new_txn();
    engine.put(&writer, 1, "7".into()).await.unwrap();
    engine.put(&writer, 2, "7".into()).await.unwrap();
    writer.commit().unwrap();

    // both the already-read and the not-yet-read key stay at the old
    // snapshot
    assert_eq!(engine.get(&reader, 1).await.unwrap(), "5");
    assert_eq!(engine.get(&reader, 2).await.unwrap(), "5");
    reader.commit().unwrap();

    let fresh = engine.new_txn();
    assert_eq!(engine.get(&fresh, 1).await.unwrap(), "7");
    assert_eq!(engine.get(&fresh, 2).await.unwrap(), "7");
    fresh.commit().unwrap();
}

#[tokio::test]
async fn test_absent_key_stays_absent_within_snapshot() {
    let engine = KvEngine::new(EngineConfig::default());

    let reader = engine.new_txn();
    assert_eq!(engine.get(&reader, 1).await, Err(Error::NotFound));

    let writer = engine.new_txn();
    engine.put(&writer, 1, "late".into()).await.unwrap();
    writer.commit().unwrap();

    assert_eq!(engine.get(&reader, 1).await, Err(Error::NotFound));
    reader.commit().unwrap();
}

#[tokio::test]
async fn test_delete_is_snapshot_scoped() {
    let engine = KvEngine::new(EngineConfig::default());

    let setup = engine.new_txn();
    engine.put(&setup, 1, "here".into()).await.unwrap();
    setup.commit().unwrap();

    let reader = engine.new_txn();
    assert_eq!(engine.get(&reader, 1).await.unwrap(), "here");

    let deleter = engine.new_txn();
    engine.del(&deleter, 1).await.unwrap();
    deleter.commit().unwrap();

    // the tombstone landed after the reader's snapshot
    assert_eq!(engine.get(&reader, 1).await.unwrap(), "here");
    reader.commit().unwrap();

    let fresh = engine.new_txn();
    assert_eq!(engine.get(&fresh, 1).await, Err(Error::NotFound));
    fresh.commit().unwrap();
}

#[tokio::test]
async fn test_version_chains_converge_to_one() {
    let config = EngineConfig::default().with_gc_interval(Duration::from_millis(10));
    let engine = KvEngine::new(config);
    engine.start();

    for n in 0..200u32 {
        let txn = engine.new_txn();
        engine.put(&txn, 1, format!("v{n}")).await.unwrap();
        txn.commit().unwrap();
    }
    sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.version_count(1), 1);

    let reader = engine.new_txn();
    assert_eq!(engine.get(&reader, 1).await.unwrap(), "v199");
    reader.commit().unwrap();
    engine.shutdown();
}

#[tokio::test]
async fn test_deleted_key_disappears_entirely() {
    let config = EngineConfig::default().with_gc_interval(Duration::from_millis(10));
    let engine = KvEngine::new(config);
    engine.start();

    let txn = engine.new_txn();
    engine.put(&txn, 1, "doomed".into()).await.unwrap();
    txn.commit().unwrap();

    let txn = engine.new_txn();
    engine.del(&txn, 1).await.unwrap();
    txn.commit().unwrap();

    sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.version_count(1), 0);

    let reader = engine.new_txn();
    assert_eq!(engine.get(&reader, 1).await, Err(Error::NotFound));
    reader.commit().unwrap();
    engine.shutdown();
}

#[tokio::test]
async fn test_gc_waits_for_long_running_reader() {
    let config = EngineConfig::default().with_gc_interval(Duration::from_millis(10));
    let engine = KvEngine::new(config);
    engine.start();

    let txn = engine.new_txn();
    engine.put(&txn, 1, "old".into()).await.unwrap();
    txn.commit().unwrap();

    let reader = engine.new_txn();
    assert_eq!(engine.get(&reader, 1).await.unwrap(), "old");

    let txn = engine.new_txn();
    engine.put(&txn, 1, "new".into()).await.unwrap();
    txn.commit().unwrap();

    sleep(Duration::from_millis(100)).await;
    // the reader's snapshot pins the old version
    assert_eq!(engine.version_count(1), 2);
    assert_eq!(engine.get(&reader, 1).await.unwrap(), "old");
    reader.commit().unwrap();

    sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.version_count(1), 1);

    let fresh = engine.new_txn();
    assert_eq!(engine.get(&fresh, 1).await.unwrap(), "new");
    fresh.commit().unwrap();
    engine.shutdown();
}
