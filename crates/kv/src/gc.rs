//! Version-chain garbage collection
//!
//! Every committed transaction is queued to the collector over a
//! channel. A transaction becomes collectable once its commit id falls
//! below the watermark (the lowest active transaction id): at that point
//! the version it installed is visible to every present and future
//! transaction, so anything older in the chain is unreachable and is cut
//! off. A chain whose only surviving version is a tombstone is emptied
//! outright, and the dead key is vacuumed out of its index and the value
//! registry.
//!
//! Collection is incremental: transactions that are not yet collectable,
//! or whose tombstoned value is still locked, stay in the backlog and
//! are retried on the next tick.

use crate::storage::{IndexRegistry, ValueRegistry};
use crate::txn::{Transaction, TransactionManager};
use ember_common::TxnId;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub struct GarbageCollector {
    rx: Mutex<mpsc::UnboundedReceiver<Arc<Transaction>>>,
    /// Committed transactions not yet fully collected, oldest first.
    backlog: Mutex<Vec<Arc<Transaction>>>,
    txns: Arc<TransactionManager>,
    values: Arc<ValueRegistry>,
    indexes: Arc<IndexRegistry>,
}

impl GarbageCollector {
    pub fn new(
        rx: mpsc::UnboundedReceiver<Arc<Transaction>>,
        txns: Arc<TransactionManager>,
        values: Arc<ValueRegistry>,
        indexes: Arc<IndexRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            rx: Mutex::new(rx),
            backlog: Mutex::new(Vec::new()),
            txns,
            values,
            indexes,
        })
    }

    /// Run one collection pass over the backlog plus anything newly
    /// committed.
    pub fn tick(&self) {
        let mut backlog = self.backlog.lock();
        {
            let mut rx = self.rx.lock();
            while let Ok(txn) = rx.try_recv() {
                backlog.push(txn);
            }
        }
        let watermark = self.txns.watermark();
        backlog.retain(|txn| !self.collect(txn, watermark));
    }

    /// Collect one committed transaction's write set. Returns true when
    /// every entry is dealt with and the transaction can leave the
    /// backlog.
    fn collect(&self, txn: &Arc<Transaction>, watermark: TxnId) -> bool {
        let Some(commit_id) = txn.commit_id() else {
            return true;
        };
        // some active transaction may still need versions this commit
        // superseded; wait for the watermark to pass it
        if commit_id >= watermark {
            return false;
        }
        let mut done = true;
        for (value_id, origin) in txn.write_entries() {
            let Some(value) = self.values.get(value_id) else {
                txn.remove_write_entry(value_id);
                continue;
            };
            if value.truncate_behind(commit_id) {
                // sole tombstone still pinned by a lock holder
                done = false;
                continue;
            }
            if value.is_chain_empty() {
                let vacuumed = self
                    .indexes
                    .get(origin.index_id)
                    .map_or(true, |index| index.vacuum(origin.key, &value));
                if vacuumed {
                    debug!(key = origin.key, value = value_id, "vacuumed dead key");
                    self.values.remove(value_id);
                    txn.remove_write_entry(value_id);
                } else {
                    // the value came back to life under the index mutex
                    done = false;
                }
            } else {
                txn.remove_write_entry(value_id);
            }
        }
        done
    }

    /// Run [`tick`](Self::tick) every `period` until the returned task is
    /// aborted.
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.tick();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::storage::{LockRegistry, SkipList};
    use ember_common::LogicalClock;

    struct Harness {
        txns: Arc<TransactionManager>,
        values: Arc<ValueRegistry>,
        index: Arc<SkipList>,
        collector: Arc<GarbageCollector>,
    }

    fn harness() -> Harness {
        let values = ValueRegistry::new();
        let locks = LockRegistry::new();
        let indexes = IndexRegistry::new();
        let index = indexes.create_index(&EngineConfig::default(), values.clone(), locks);
        let (gc_tx, gc_rx) = mpsc::unbounded_channel();
        let txns = TransactionManager::new(Arc::new(LogicalClock::new()), values.clone(), gc_tx);
        let collector = GarbageCollector::new(gc_rx, txns.clone(), values.clone(), indexes);
        Harness {
            txns,
            values,
            index,
            collector,
        }
    }

    async fn committed_put(h: &Harness, key: u64, payload: &str) {
        let txn = h.txns.new_txn();
        let value = h.index.get_or_create(key).unwrap();
        assert!(value.put(&txn, payload.into()).await.unwrap());
        txn.record_write(value.id(), key, h.index.id());
        txn.commit().unwrap();
    }

    #[tokio::test]
    async fn test_chain_truncates_to_latest_version() {
        let h = harness();
        for payload in ["v1", "v2", "v3"] {
            committed_put(&h, 1, payload).await;
        }
        let value = h.index.get(1).unwrap();
        assert_eq!(value.version_count(), 3);

        h.collector.tick();
        assert_eq!(value.version_count(), 1);

        let reader = h.txns.new_txn();
        assert_eq!(value.traverse(&reader).await.unwrap(), Some("v3".into()));
    }

    #[tokio::test]
    async fn test_watermark_pins_versions_for_active_reader() {
        let h = harness();
        committed_put(&h, 1, "v1").await;
        let reader = h.txns.new_txn();
        committed_put(&h, 1, "v2").await;

        let value = h.index.get(1).unwrap();
        h.collector.tick();
        // v2 committed after the reader began, so v1 must survive
        assert_eq!(value.version_count(), 2);
        assert_eq!(value.traverse(&reader).await.unwrap(), Some("v1".into()));

        reader.commit().unwrap();
        h.collector.tick();
        assert_eq!(value.version_count(), 1);
    }

    #[tokio::test]
    async fn test_deleted_key_is_vacuumed() {
        let h = harness();
        committed_put(&h, 1, "v1").await;
        let value = h.index.get(1).unwrap();

        let txn = h.txns.new_txn();
        assert!(value.del(&txn).await.unwrap());
        txn.record_write(value.id(), 1, h.index.id());
        txn.commit().unwrap();

        h.collector.tick();
        assert!(h.index.get(1).is_none());
        assert!(h.values.get(value.id()).is_none());
        assert!(h.index.is_empty());
    }

    #[tokio::test]
    async fn test_pinned_tombstone_is_retried() {
        let h = harness();
        committed_put(&h, 1, "v1").await;
        let value = h.index.get(1).unwrap();

        let deleter = h.txns.new_txn();
        assert!(value.del(&deleter).await.unwrap());
        deleter.record_write(value.id(), 1, h.index.id());
        deleter.commit().unwrap();

        // a later reader sees the committed tombstone and pins the value
        // under its shared lock
        let reader = h.txns.new_txn();
        assert_eq!(value.traverse(&reader).await.unwrap(), None);

        h.collector.tick();
        // the tombstone cannot be cleared while the reader holds the lock
        assert!(h.index.get(1).is_some());
        assert_eq!(value.version_count(), 1);

        reader.commit().unwrap();
        h.collector.tick();
        assert!(h.index.get(1).is_none());
        assert!(h.values.get(value.id()).is_none());
    }

    #[tokio::test]
    async fn test_recreated_key_is_not_vacuumed() {
        let h = harness();
        committed_put(&h, 1, "v1").await;
        let value = h.index.get(1).unwrap();

        let deleter = h.txns.new_txn();
        assert!(value.del(&deleter).await.unwrap());
        deleter.record_write(value.id(), 1, h.index.id());
        deleter.commit().unwrap();

        // key is written again before the collector runs
        committed_put(&h, 1, "v2").await;
        h.collector.tick();

        let reader = h.txns.new_txn();
        let current = h.index.get(1).unwrap();
        assert_eq!(current.traverse(&reader).await.unwrap(), Some("v2".into()));
    }
}
