//! Error types for the KV engine

use crate::txn::TxnState;
use ember_common::TxnId;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the engine's public operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Key absent, or no version of it is visible to this transaction.
    /// Local to a single get/scan; the transaction itself is fine.
    #[error("key not found")]
    NotFound,

    /// The transaction was chosen as a deadlock victim while parked in a
    /// lock wait. The transaction is doomed; the caller must stop using it.
    #[error("transaction {0} aborted while waiting for a lock")]
    LockWaitAborted(TxnId),

    /// Commit or abort was called on a transaction that is no longer
    /// processing.
    #[error("transaction {txn} is not processing (state = {state:?})")]
    InvalidState { txn: TxnId, state: TxnState },
}
