//! The shared logical clock
//!
//! One clock per engine instance issues both transaction ids (at begin)
//! and commit ids (at commit). A single counter gives a total order
//! across begins and commits, which is the order version visibility is
//! defined in.

use crate::TxnId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter issuing [`TxnId`]s.
#[derive(Debug, Default)]
pub struct LogicalClock {
    counter: AtomicU64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw the next id. The first id issued is 1; 0 is never returned.
    pub fn next(&self) -> TxnId {
        TxnId::from_u64(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ids_start_at_one() {
        let clock = LogicalClock::new();
        assert_eq!(clock.next(), TxnId::from_u64(1));
        assert_eq!(clock.next(), TxnId::from_u64(2));
    }

    #[test]
    fn test_concurrent_draws_are_unique() {
        let clock = Arc::new(LogicalClock::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let clock = clock.clone();
            handles.push(std::thread::spawn(move || {
                (0..1000).map(|_| clock.next()).collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<TxnId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 8000);
    }
}
