//! In-memory multi-version key-value engine
//!
//! This crate provides an in-memory MVCC storage engine with pessimistic
//! per-key locking:
//! - Snapshot-style repeatable reads (a transaction's first read of a key
//!   pins the visible version for the rest of the transaction)
//! - Read-your-own-writes semantics
//! - First-committer-wins writes via exclusive per-key locks
//! - Periodic wait-for-graph deadlock detection with victim abort
//! - Periodic garbage collection of version chains behind the oldest
//!   active transaction
//!
//! # Architecture
//!
//! Keys are unsigned 64-bit integers (key 0 is reserved) mapped through a
//! skip-list index to per-key [`Value`](storage::Value)s, each owning a
//! newest-first version chain and a fair queued reader/writer lock.
//! [`KvEngine`] composes the index, transaction manager, deadlock
//! detector, and garbage collector; [`StringKvEngine`] is a thin hashing
//! adapter for string keys.

pub mod config;
pub mod deadlock;
pub mod engine;
pub mod error;
pub mod gc;
pub mod storage;
pub mod txn;

pub use config::EngineConfig;
pub use engine::{KvEngine, StringKvEngine};
pub use error::{Error, Result};
pub use txn::{Transaction, TxnState};
