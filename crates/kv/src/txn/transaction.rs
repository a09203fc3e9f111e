//! Transaction state

use crate::error::{Error, Result};
use ember_common::TxnId;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

/// Transaction lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnState {
    Processing,
    Committed,
    Aborted,
}

/// Where a written value came from, kept so the garbage collector can
/// vacuum the key out of the right index later.
#[derive(Debug, Clone, Copy)]
pub struct WriteOrigin {
    pub key: u64,
    pub index_id: u64,
}

pub(crate) struct TxnInner {
    pub state: TxnState,
    pub commit_id: Option<TxnId>,
    /// Value ids this transaction holds a shared lock on.
    pub read_set: HashSet<u64>,
    /// Value ids this transaction holds the exclusive lock on.
    pub write_set: HashMap<u64, WriteOrigin>,
}

/// A unit of work against the engine.
///
/// Created by the transaction manager; all operations on it are issued
/// through the engine until [`commit`](Transaction::commit) or
/// [`abort`](Transaction::abort) ends it. A value that was read and then
/// written sits in both sets; the release paths tolerate that, since its
/// shared lock was consumed by the upgrade to writership.
pub struct Transaction {
    id: TxnId,
    manager: Weak<super::TransactionManager>,
    inner: Mutex<TxnInner>,
}

impl Transaction {
    pub(crate) fn new(id: TxnId, manager: Weak<super::TransactionManager>) -> Self {
        Self {
            id,
            manager,
            inner: Mutex::new(TxnInner {
                state: TxnState::Processing,
                commit_id: None,
                read_set: HashSet::new(),
                write_set: HashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TxnState {
        self.inner.lock().state
    }

    /// Commit id, present once committed.
    pub fn commit_id(&self) -> Option<TxnId> {
        self.inner.lock().commit_id
    }

    pub fn is_writing(&self, value_id: u64) -> bool {
        self.inner.lock().write_set.contains_key(&value_id)
    }

    pub fn is_reading(&self, value_id: u64) -> bool {
        self.inner.lock().read_set.contains(&value_id)
    }

    pub(crate) fn record_read(&self, value_id: u64) {
        self.inner.lock().read_set.insert(value_id);
    }

    pub(crate) fn record_write(&self, value_id: u64, key: u64, index_id: u64) {
        self.inner
            .lock()
            .write_set
            .insert(value_id, WriteOrigin { key, index_id });
    }

    pub(crate) fn write_entries(&self) -> Vec<(u64, WriteOrigin)> {
        self.inner
            .lock()
            .write_set
            .iter()
            .map(|(&id, &origin)| (id, origin))
            .collect()
    }

    /// Drop a write-set entry whose chain the collector has finished
    /// with.
    pub(crate) fn remove_write_entry(&self, value_id: u64) {
        self.inner.lock().write_set.remove(&value_id);
    }

    pub(crate) fn inner_lock(&self) -> MutexGuard<'_, TxnInner> {
        self.inner.lock()
    }

    /// Commit this transaction. Fails with `InvalidState` unless the
    /// transaction is still processing.
    pub fn commit(self: &Arc<Self>) -> Result<()> {
        match self.manager.upgrade() {
            Some(manager) => manager.commit(self),
            None => Err(Error::InvalidState {
                txn: self.id,
                state: self.state(),
            }),
        }
    }

    /// Abort this transaction, rolling back its uncommitted writes.
    pub fn abort(self: &Arc<Self>) -> Result<()> {
        match self.manager.upgrade() {
            Some(manager) => manager.abort(self),
            None => Err(Error::InvalidState {
                txn: self.id,
                state: self.state(),
            }),
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
