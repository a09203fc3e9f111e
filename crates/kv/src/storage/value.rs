//! Per-key Value: version chain + lock + structural mutex
//!
//! A `Value` is the unit a transaction locks. It owns the key's version
//! chain and the fair reader/writer lock that serializes writers and pins
//! snapshots for readers. The chain itself sits behind a short-held
//! structural mutex; that mutex is never held while a task is parked
//! waiting for the lock, so commit and abort can always reach the chain
//! to install or roll back a head.

use crate::error::{Error, Result};
use crate::storage::lock::RwLock;
use crate::storage::version::{Version, VersionChain};
use crate::txn::{Transaction, TxnState};
use ember_common::TxnId;
use parking_lot::Mutex;
use std::sync::Arc;

/// One live key's storage.
pub struct Value {
    id: u64,
    lock: Arc<RwLock>,
    chain: Mutex<VersionChain>,
}

impl Value {
    pub(crate) fn new(id: u64, lock: Arc<RwLock>) -> Self {
        Self {
            id,
            lock,
            chain: Mutex::new(VersionChain::default()),
        }
    }

    /// Process-unique id; transactions track this value in their
    /// read/write sets by id, and the registry resolves it back.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn lock(&self) -> &Arc<RwLock> {
        &self.lock
    }

    pub fn is_chain_empty(&self) -> bool {
        self.chain.lock().is_empty()
    }

    /// Number of versions currently chained. Diagnostic.
    pub fn version_count(&self) -> usize {
        self.chain.lock().len()
    }

    /// Resolve the version of this value visible to `txn`.
    ///
    /// A transaction that already holds this value's lock reads its own
    /// head. Otherwise the newest committed version is only returned
    /// after taking the shared lock (pinning it for the rest of the
    /// transaction); strictly older committed versions are immutable and
    /// read without locking. Returns `None` when nothing is visible or
    /// the visible version is a tombstone.
    ///
    /// Fails with `LockWaitAborted` if the transaction is picked as a
    /// deadlock victim while parked on the shared lock.
    pub async fn traverse(&self, txn: &Transaction) -> Result<Option<String>> {
        {
            let chain = self.chain.lock();
            if self.lock.writer() == Some(txn.id()) || self.lock.is_reader(txn.id()) {
                return Ok(chain.head_read());
            }
            let Some(head) = chain.head() else {
                return Ok(None);
            };
            // a not-yet-installed head belongs to some other writer; skip
            // it. The writer flag is no substitute here: a writer holds
            // the lock before it has pushed anything, and the committed
            // head must stay readable through that window.
            let candidate = if head.is_committed() {
                Some(head)
            } else {
                head.next()
            };
            let Some(candidate) = candidate else {
                return Ok(None);
            };
            if !candidate.is_visible(txn.id()) {
                // older committed versions are immutable and the vacuum
                // watermark keeps them alive, so no lock is needed here
                let mut cur = candidate.next();
                while let Some(version) = cur {
                    if version.is_visible(txn.id()) {
                        return Ok(version.read());
                    }
                    cur = version.next();
                }
                return Ok(None);
            }
        }

        // newest committed version: pin it under the shared lock. Any
        // commit that lands while we are parked gets a commit id above
        // txn.id, so the version visible at txn.id is unchanged.
        self.lock.read_lock(txn.id()).await?;
        // the detector may have aborted this transaction between the
        // grant and this task resuming; the abort could not release a
        // lock no set entry named yet, so give it back here
        if txn.state() != TxnState::Processing {
            self.lock.read_unlock(txn.id());
            return Err(Error::LockWaitAborted(txn.id()));
        }
        txn.record_read(self.id);
        let chain = self.chain.lock();
        Ok(chain.first_visible(txn.id()))
    }

    /// Write `payload` as this transaction's uncommitted head.
    ///
    /// Returns whether this was the transaction's first write to this
    /// value, in which case the caller must add it to the write set.
    pub async fn put(&self, txn: &Transaction, payload: String) -> Result<bool> {
        if self.lock.writer() != Some(txn.id()) {
            self.lock.write_lock(txn.id()).await?;
            if txn.state() != TxnState::Processing {
                self.lock.write_unlock(txn.id());
                return Err(Error::LockWaitAborted(txn.id()));
            }
        }
        let overwrite = txn.is_writing(self.id);
        let mut chain = self.chain.lock();
        if chain.is_empty() {
            chain.push_head(Version::new(payload));
            return Ok(true);
        }
        if overwrite {
            chain.overwrite_head(payload);
            return Ok(false);
        }
        chain.push_head(Version::new(payload));
        Ok(true)
    }

    /// Prepend a tombstone as this transaction's uncommitted head.
    ///
    /// Deleting an absent or already-deleted key is a no-op; a lock that
    /// was acquired just for the no-op is released again, since no
    /// write-set entry will exist to release it at commit.
    pub async fn del(&self, txn: &Transaction) -> Result<bool> {
        if self.lock.writer() != Some(txn.id()) {
            self.lock.write_lock(txn.id()).await?;
            if txn.state() != TxnState::Processing {
                self.lock.write_unlock(txn.id());
                return Err(Error::LockWaitAborted(txn.id()));
            }
        }
        let registered = txn.is_writing(self.id);
        let mut chain = self.chain.lock();
        if chain.is_empty() || chain.head().is_some_and(Version::is_tombstone) {
            drop(chain);
            if !registered {
                self.lock.write_unlock(txn.id());
            }
            return Ok(false);
        }
        if registered {
            // this transaction owns the uncommitted head; fold the delete
            // into it
            chain.tombstone_head();
            return Ok(false);
        }
        chain.push_head(Version::tombstone());
        Ok(true)
    }

    /// Commit-time head installation at `commit_id`.
    pub fn install_head(&self, commit_id: TxnId) {
        self.chain.lock().install_head(commit_id);
    }

    /// Abort-time removal of the uncommitted head.
    pub fn rollback_head(&self) {
        self.chain.lock().rollback_head();
    }

    /// Truncate the chain behind the version visible at `commit_id` and
    /// clear a fully-dead chain whose retained version is a tombstone.
    ///
    /// Returns true when the tombstone head could not be cleared because
    /// the value is still held; the collector retries next tick.
    pub fn truncate_behind(&self, commit_id: TxnId) -> bool {
        let mut chain = self.chain.lock();
        let Some(pos) = chain.first_visible_pos(commit_id) else {
            return false;
        };
        chain.cut_after(pos);
        if chain.is_tombstone_at(pos) {
            if pos == 0 {
                if self.lock.is_unheld() {
                    chain.clear();
                } else {
                    return true;
                }
            } else {
                chain.keep_first(pos);
            }
        }
        false
    }
}
