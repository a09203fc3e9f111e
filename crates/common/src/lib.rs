//! Common types for the Ember KV engine
//!
//! This crate defines:
//! - Transaction/commit identifiers drawn from a single logical clock
//! - The logical clock itself (a shared monotonic counter)

mod clock;
mod txn_id;

pub use clock::LogicalClock;
pub use txn_id::TxnId;
