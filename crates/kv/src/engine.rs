//! Engine facade wiring the index, transactions, and background tasks

use crate::config::EngineConfig;
use crate::deadlock::DeadlockDetector;
use crate::error::{Error, Result};
use crate::gc::GarbageCollector;
use crate::storage::{IndexRegistry, LockRegistry, SkipList, ValueRegistry, RESERVED_KEY};
use crate::txn::{Transaction, TransactionManager};
use ember_common::LogicalClock;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// In-memory MVCC key-value engine over `u64` keys.
///
/// All state lives inside the engine; dropping it (or calling
/// [`shutdown`](Self::shutdown)) stops the background tasks. Operations
/// take a transaction begun with [`new_txn`](Self::new_txn) and are
/// `async` because writes (and first reads of contended keys) may park
/// on a per-key lock.
pub struct KvEngine {
    config: EngineConfig,
    index: Arc<SkipList>,
    txns: Arc<TransactionManager>,
    detector: Arc<DeadlockDetector>,
    collector: Arc<GarbageCollector>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl KvEngine {
    pub fn new(config: EngineConfig) -> Self {
        let clock = Arc::new(LogicalClock::new());
        let values = ValueRegistry::new();
        let locks = LockRegistry::new();
        let indexes = IndexRegistry::new();
        let index = indexes.create_index(&config, values.clone(), locks.clone());
        let (gc_tx, gc_rx) = mpsc::unbounded_channel();
        let txns = TransactionManager::new(clock, values.clone(), gc_tx);
        let detector = DeadlockDetector::new(txns.clone(), locks);
        let collector = GarbageCollector::new(gc_rx, txns.clone(), values, indexes);
        Self {
            config,
            index,
            txns,
            detector,
            collector,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start the deadlock detector and garbage collector. Without this
    /// the engine still works, but deadlocked transactions wait forever
    /// and version chains only grow. Idempotent.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        debug!(
            deadlock_interval = ?self.config.deadlock_interval,
            gc_interval = ?self.config.gc_interval,
            "starting background tasks"
        );
        tasks.push(self.detector.clone().spawn(self.config.deadlock_interval));
        tasks.push(self.collector.clone().spawn(self.config.gc_interval));
    }

    /// Stop the background tasks. Idempotent.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Begin a new transaction.
    pub fn new_txn(&self) -> Arc<Transaction> {
        self.txns.new_txn()
    }

    /// Read the version of `key` visible to `txn`.
    ///
    /// Fails with `NotFound` when the key is absent, deleted, or has no
    /// version visible at the transaction's snapshot; fails with
    /// `LockWaitAborted` if the transaction is picked as a deadlock
    /// victim while waiting to pin the key.
    pub async fn get(&self, txn: &Transaction, key: u64) -> Result<String> {
        let Some(value) = self.index.get(key) else {
            return Err(Error::NotFound);
        };
        value.traverse(txn).await?.ok_or(Error::NotFound)
    }

    /// Write `payload` under `key` for `txn`. Visible to others only
    /// after commit. Writing the reserved key 0 is a no-op.
    pub async fn put(&self, txn: &Transaction, key: u64, payload: String) -> Result<()> {
        let Some(value) = self.index.get_or_create(key) else {
            return Ok(());
        };
        if value.put(txn, payload).await? {
            txn.record_write(value.id(), key, self.index.id());
        }
        Ok(())
    }

    /// Delete `key` for `txn`. Deleting an absent or already-deleted key
    /// is a no-op.
    pub async fn del(&self, txn: &Transaction, key: u64) -> Result<()> {
        let Some(value) = self.index.get(key) else {
            return Ok(());
        };
        if value.del(txn).await? {
            txn.record_write(value.id(), key, self.index.id());
        }
        Ok(())
    }

    /// Read up to `count` index entries with keys ≥ `key`, ascending,
    /// returning those with a version visible to `txn`. Entries the
    /// transaction cannot see are skipped, so fewer than `count` results
    /// may come back even when more keys exist.
    pub async fn scan(
        &self,
        txn: &Transaction,
        key: u64,
        count: usize,
    ) -> Result<Vec<(u64, String)>> {
        let mut out = Vec::new();
        for (key, value) in self.index.scan(key, count) {
            if let Some(payload) = value.traverse(txn).await? {
                out.push((key, payload));
            }
        }
        Ok(out)
    }

    /// Number of versions currently chained under `key`. Diagnostic;
    /// reads the live chain without any snapshot semantics.
    pub fn version_count(&self, key: u64) -> usize {
        self.index
            .get(key)
            .map_or(0, |value| value.version_count())
    }
}

impl Drop for KvEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// String-keyed adapter over [`KvEngine`].
///
/// Keys are mapped to `u64` with xxh3; a hash of 0 is bumped to 1 so it
/// never collides with the reserved key. Scans are not offered here
/// because hashing destroys key order.
pub struct StringKvEngine {
    inner: KvEngine,
}

impl StringKvEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: KvEngine::new(config),
        }
    }

    pub fn start(&self) {
        self.inner.start();
    }

    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn new_txn(&self) -> Arc<Transaction> {
        self.inner.new_txn()
    }

    pub async fn get(&self, txn: &Transaction, key: &str) -> Result<String> {
        self.inner.get(txn, Self::hash_key(key)).await
    }

    pub async fn put(&self, txn: &Transaction, key: &str, payload: String) -> Result<()> {
        self.inner.put(txn, Self::hash_key(key), payload).await
    }

    pub async fn del(&self, txn: &Transaction, key: &str) -> Result<()> {
        self.inner.del(txn, Self::hash_key(key)).await
    }

    fn hash_key(key: &str) -> u64 {
        match twox_hash::xxh3::hash64(key.as_bytes()) {
            RESERVED_KEY => RESERVED_KEY + 1,
            hash => hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reserved_key_operations_are_noops() {
        let engine = KvEngine::new(EngineConfig::default());
        let txn = engine.new_txn();

        engine.put(&txn, 0, "x".into()).await.unwrap();
        assert_eq!(engine.get(&txn, 0).await, Err(Error::NotFound));
        engine.del(&txn, 0).await.unwrap();
        assert_eq!(engine.version_count(0), 0);
        txn.commit().unwrap();
    }

    #[test]
    fn test_string_keys_avoid_the_reserved_slot() {
        let keys = ["", "a", "answer", "the quick brown fox"];
        for key in keys {
            assert_ne!(StringKvEngine::hash_key(key), RESERVED_KEY);
        }
    }
}
