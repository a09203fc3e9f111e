//! Transaction identifier
//!
//! Transaction ids and commit ids share one numbering space: both are
//! drawn from the same [`LogicalClock`](crate::LogicalClock). Their total
//! order is what defines version visibility, so the two must never be
//! issued from separate counters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for a transaction, or for a commit point.
///
/// Ids start at 1; 0 is never issued. [`TxnId::MAX`] is the "not yet
/// visible to anyone" sentinel used on uncommitted versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(u64);

impl TxnId {
    /// Sentinel for the open end of a visibility interval.
    pub const MAX: TxnId = TxnId(u64::MAX);

    pub const fn from_u64(raw: u64) -> Self {
        TxnId(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
