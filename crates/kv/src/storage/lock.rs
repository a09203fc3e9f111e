//! Per-key reader/writer lock with fair queueing and cancellation
//!
//! One [`RwLock`] instance guards each [`Value`](crate::storage::Value).
//! Unlike a plain rwlock, admission is a strict FIFO queue: a request
//! that cannot be granted immediately parks on a oneshot channel and is
//! woken either by the queue advancing or by the deadlock detector
//! cancelling it. Consecutive read requests at the head of the queue are
//! admitted as one batch, so reads are not starved by a stream of writers
//! while still never jumping ahead of a writer that queued first.
//!
//! Locks are long-held (until the owning transaction commits or aborts),
//! so the detector needs to see them: the [`LockRegistry`] tracks every
//! lock that currently has at least one holder.

use crate::error::{Error, Result};
use ember_common::TxnId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Read,
    Write,
}

/// A parked acquisition request.
struct Waiter {
    txn: TxnId,
    kind: RequestKind,
    wake: oneshot::Sender<Result<()>>,
}

#[derive(Default)]
struct LockState {
    writer: Option<TxnId>,
    readers: HashSet<TxnId>,
    queue: VecDeque<Waiter>,
}

/// Fair queued reader/writer lock, one per key.
pub struct RwLock {
    id: u64,
    registry: Arc<LockRegistry>,
    state: Mutex<LockState>,
}

/// Point-in-time view of a lock, taken by the deadlock detector.
pub struct LockSnapshot {
    pub writer: Option<TxnId>,
    pub readers: Vec<TxnId>,
    /// Queued transactions, front of the queue first.
    pub waiters: Vec<TxnId>,
}

impl RwLock {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Transaction currently holding the exclusive lock, if any.
    pub fn writer(&self) -> Option<TxnId> {
        self.state.lock().writer
    }

    /// Whether `txn` currently holds a shared lock.
    pub fn is_reader(&self, txn: TxnId) -> bool {
        self.state.lock().readers.contains(&txn)
    }

    /// No writer and no readers. Waiters may still be queued.
    pub fn is_unheld(&self) -> bool {
        let st = self.state.lock();
        st.writer.is_none() && st.readers.is_empty()
    }

    /// No holders and no queued requests.
    pub fn is_idle(&self) -> bool {
        let st = self.state.lock();
        st.writer.is_none() && st.readers.is_empty() && st.queue.is_empty()
    }

    pub fn snapshot(&self) -> LockSnapshot {
        let st = self.state.lock();
        LockSnapshot {
            writer: st.writer,
            readers: st.readers.iter().copied().collect(),
            waiters: st.queue.iter().map(|w| w.txn).collect(),
        }
    }

    /// Acquire the shared lock.
    ///
    /// Grants immediately when there is no writer and no queue; otherwise
    /// parks until the queue admits this request or the deadlock detector
    /// cancels it, in which case the call fails with `LockWaitAborted`.
    pub async fn read_lock(&self, txn: TxnId) -> Result<()> {
        let rx = {
            let mut st = self.state.lock();
            if st.writer.is_none() && st.queue.is_empty() {
                st.readers.insert(txn);
                self.registry.activate(self.id);
                return Ok(());
            }
            self.park(&mut st, txn, RequestKind::Read)
        };
        rx.await.unwrap_or(Err(Error::LockWaitAborted(txn)))
    }

    /// Acquire the exclusive lock. Same blocking and failure behavior as
    /// [`read_lock`](Self::read_lock).
    ///
    /// A transaction that is currently the only reader upgrades in place
    /// when the queue is empty; with other readers present its request
    /// queues and converts once they have all released (see
    /// [`read_unlock`](Self::read_unlock)).
    pub async fn write_lock(&self, txn: TxnId) -> Result<()> {
        let rx = {
            let mut st = self.state.lock();
            if st.writer.is_none() && st.queue.is_empty() {
                if st.readers.is_empty() {
                    st.writer = Some(txn);
                    self.registry.activate(self.id);
                    return Ok(());
                }
                if st.readers.len() == 1 && st.readers.contains(&txn) {
                    st.readers.clear();
                    st.writer = Some(txn);
                    return Ok(());
                }
            }
            self.park(&mut st, txn, RequestKind::Write)
        };
        rx.await.unwrap_or(Err(Error::LockWaitAborted(txn)))
    }

    /// Release a shared lock.
    ///
    /// When exactly one reader remains, that reader may have a queued
    /// write request for this same lock; converting it in place avoids a
    /// read-then-write transaction deadlocking on itself. When the last
    /// reader leaves, the queue advances.
    pub fn read_unlock(&self, txn: TxnId) {
        let mut st = self.state.lock();
        if !st.readers.remove(&txn) {
            return;
        }
        if st.readers.len() == 1 {
            self.try_upgrade(&mut st);
        } else if st.readers.is_empty() {
            self.registry.deactivate(self.id);
            self.advance(&mut st);
        }
    }

    /// Release the exclusive lock and advance the queue.
    pub fn write_unlock(&self, txn: TxnId) {
        let mut st = self.state.lock();
        if st.writer != Some(txn) {
            return;
        }
        st.writer = None;
        self.registry.deactivate(self.id);
        self.advance(&mut st);
    }

    /// Remove `txn`'s queued request, failing its parked acquire with
    /// `LockWaitAborted`. Used only by the deadlock detector.
    pub fn cancel(&self, txn: TxnId) {
        let mut st = self.state.lock();
        let Some(pos) = st.queue.iter().position(|w| w.txn == txn) else {
            return;
        };
        if let Some(waiter) = st.queue.remove(pos) {
            let _ = waiter.wake.send(Err(Error::LockWaitAborted(txn)));
        }
        // removing a queue entry can make the new front admissible
        if st.writer.is_none() {
            if st.readers.is_empty() {
                self.advance(&mut st);
            } else if st.readers.len() == 1 {
                self.try_upgrade(&mut st);
            }
        }
    }

    fn park(
        &self,
        st: &mut LockState,
        txn: TxnId,
        kind: RequestKind,
    ) -> oneshot::Receiver<Result<()>> {
        let (wake, rx) = oneshot::channel();
        st.queue.push_back(Waiter { txn, kind, wake });
        rx
    }

    /// Admit the next runnable request(s): either the leading run of
    /// consecutive reads as one batch, or a single write. The grant is
    /// applied here, before the waiter is woken; a waiter whose receiver
    /// has been dropped counts as silently cancelled and its grant is
    /// undone.
    fn advance(&self, st: &mut LockState) {
        loop {
            match st.queue.front().map(|w| w.kind) {
                None => return,
                Some(RequestKind::Read) => {
                    let mut admitted = false;
                    while st
                        .queue
                        .front()
                        .map_or(false, |w| w.kind == RequestKind::Read)
                    {
                        let Some(waiter) = st.queue.pop_front() else {
                            break;
                        };
                        st.readers.insert(waiter.txn);
                        self.registry.activate(self.id);
                        if waiter.wake.send(Ok(())).is_err() {
                            st.readers.remove(&waiter.txn);
                        } else {
                            admitted = true;
                        }
                    }
                    if admitted {
                        return;
                    }
                    if st.readers.is_empty() {
                        self.registry.deactivate(self.id);
                    }
                    // whole batch was gone; fall through to the next entry
                }
                Some(RequestKind::Write) => {
                    let Some(waiter) = st.queue.pop_front() else {
                        return;
                    };
                    st.writer = Some(waiter.txn);
                    self.registry.activate(self.id);
                    if waiter.wake.send(Ok(())).is_ok() {
                        return;
                    }
                    st.writer = None;
                    self.registry.deactivate(self.id);
                }
            }
            if st.queue.is_empty() {
                return;
            }
        }
    }

    /// If the sole remaining reader has a queued write request, convert
    /// it directly to writership without requeueing.
    fn try_upgrade(&self, st: &mut LockState) {
        let Some(&reader) = st.readers.iter().next() else {
            return;
        };
        let Some(pos) = st
            .queue
            .iter()
            .position(|w| w.txn == reader && w.kind == RequestKind::Write)
        else {
            return;
        };
        let Some(waiter) = st.queue.remove(pos) else {
            return;
        };
        st.readers.remove(&reader);
        st.writer = Some(reader);
        if waiter.wake.send(Ok(())).is_err() {
            st.writer = None;
            if st.readers.is_empty() {
                self.registry.deactivate(self.id);
                self.advance(st);
            }
        }
    }
}

/// Tracks held locks for the deadlock detector.
///
/// Every lock ever minted is kept as a weak reference; the `active` set
/// holds the ids of locks with at least one current holder. The detector
/// snapshots the active set each tick.
pub struct LockRegistry {
    next_id: AtomicU64,
    inner: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    all: HashMap<u64, Weak<RwLock>>,
    active: HashSet<u64>,
}

impl LockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            inner: Mutex::new(RegistryState::default()),
        })
    }

    /// Mint a fresh lock tied to this registry.
    pub fn new_lock(self: &Arc<Self>) -> Arc<RwLock> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let lock = Arc::new(RwLock {
            id,
            registry: Arc::clone(self),
            state: Mutex::new(LockState::default()),
        });
        self.inner.lock().all.insert(id, Arc::downgrade(&lock));
        lock
    }

    fn activate(&self, id: u64) {
        self.inner.lock().active.insert(id);
    }

    fn deactivate(&self, id: u64) {
        self.inner.lock().active.remove(&id);
    }

    /// Snapshot of all currently held locks. Also prunes entries whose
    /// lock has been dropped.
    pub fn active_locks(&self) -> Vec<Arc<RwLock>> {
        let mut inner = self.inner.lock();
        inner.all.retain(|_, weak| weak.strong_count() > 0);
        let mut out = Vec::with_capacity(inner.active.len());
        let mut dead = Vec::new();
        for &id in &inner.active {
            match inner.all.get(&id).and_then(Weak::upgrade) {
                Some(lock) => out.push(lock),
                None => dead.push(id),
            }
        }
        for id in dead {
            inner.active.remove(&id);
        }
        out
    }
}
