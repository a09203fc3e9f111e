//! Transaction lifecycle: begin, commit, abort

use crate::error::{Error, Result};
use crate::storage::ValueRegistry;
use crate::txn::transaction::{Transaction, TxnState};
use ember_common::{LogicalClock, TxnId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

/// Creates transactions and drives their commit and abort paths.
///
/// Transaction ids and commit ids come from the same logical clock, so a
/// version committed while some reader was in flight always carries a
/// commit id above that reader's transaction id. Snapshot visibility
/// rests on that ordering.
pub struct TransactionManager {
    clock: Arc<LogicalClock>,
    values: Arc<ValueRegistry>,
    active: Mutex<HashMap<TxnId, Arc<Transaction>>>,
    /// Committed transactions are handed to the garbage collector in
    /// commit order through this channel.
    gc_tx: mpsc::UnboundedSender<Arc<Transaction>>,
    weak_self: Weak<TransactionManager>,
}

impl TransactionManager {
    pub fn new(
        clock: Arc<LogicalClock>,
        values: Arc<ValueRegistry>,
        gc_tx: mpsc::UnboundedSender<Arc<Transaction>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            clock,
            values,
            active: Mutex::new(HashMap::new()),
            gc_tx,
            weak_self: weak.clone(),
        })
    }

    /// Begin a transaction. Its id doubles as its snapshot timestamp.
    pub fn new_txn(&self) -> Arc<Transaction> {
        let id = self.clock.next();
        let txn = Arc::new(Transaction::new(id, self.weak_self.clone()));
        self.active.lock().insert(id, txn.clone());
        txn
    }

    pub fn get_txn(&self, id: TxnId) -> Option<Arc<Transaction>> {
        self.active.lock().get(&id).cloned()
    }

    pub fn active_txns(&self) -> Vec<Arc<Transaction>> {
        self.active.lock().values().cloned().collect()
    }

    /// Lowest active transaction id, or `TxnId::MAX` when nothing is
    /// running. Versions below this watermark are invisible to every
    /// present and future transaction.
    pub fn watermark(&self) -> TxnId {
        self.active
            .lock()
            .keys()
            .min()
            .copied()
            .unwrap_or(TxnId::MAX)
    }

    /// Commit `txn`: stamp a commit id, publish every written head at
    /// that id, and release all of its locks.
    ///
    /// The transaction's state mutex is held for the whole commit, so a
    /// concurrent abort (for example from the deadlock detector) either
    /// runs entirely before this or observes `Committed` and fails.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<()> {
        let mut inner = txn.inner_lock();
        if inner.state != TxnState::Processing {
            return Err(Error::InvalidState {
                txn: txn.id(),
                state: inner.state,
            });
        }
        let commit_id = self.clock.next();
        inner.commit_id = Some(commit_id);
        for &value_id in &inner.read_set {
            if let Some(value) = self.values.get(value_id) {
                value.lock().read_unlock(txn.id());
            }
        }
        for &value_id in inner.write_set.keys() {
            if let Some(value) = self.values.get(value_id) {
                value.install_head(commit_id);
                value.lock().write_unlock(txn.id());
            }
        }
        inner.state = TxnState::Committed;
        drop(inner);
        self.active.lock().remove(&txn.id());
        // the collector may already be gone during shutdown
        let _ = self.gc_tx.send(txn.clone());
        Ok(())
    }

    /// Abort `txn`: discard its uncommitted heads and release all of its
    /// locks. Waiters queued behind them are admitted immediately.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<()> {
        let mut inner = txn.inner_lock();
        if inner.state != TxnState::Processing {
            return Err(Error::InvalidState {
                txn: txn.id(),
                state: inner.state,
            });
        }
        for &value_id in &inner.read_set {
            if let Some(value) = self.values.get(value_id) {
                value.lock().read_unlock(txn.id());
            }
        }
        for &value_id in inner.write_set.keys() {
            if let Some(value) = self.values.get(value_id) {
                value.rollback_head();
                value.lock().write_unlock(txn.id());
            }
        }
        inner.state = TxnState::Aborted;
        drop(inner);
        self.active.lock().remove(&txn.id());
        Ok(())
    }
}
