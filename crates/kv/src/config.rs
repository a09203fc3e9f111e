//! Engine configuration

use std::time::Duration;

/// Configuration for a [`KvEngine`](crate::KvEngine)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period of the deadlock detector's scan loop
    pub deadlock_interval: Duration,

    /// Period of the garbage collector's clean loop
    pub gc_interval: Duration,

    /// Maximum number of levels in the skip-list index
    pub skiplist_max_level: usize,

    /// Probability of promoting a skip-list node one level
    pub skiplist_p: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deadlock_interval: Duration::from_millis(50),
            gc_interval: Duration::from_millis(50),
            skiplist_max_level: 16,
            skiplist_p: 0.5,
        }
    }
}

impl EngineConfig {
    /// Set the deadlock detector period
    pub fn with_deadlock_interval(mut self, interval: Duration) -> Self {
        self.deadlock_interval = interval;
        self
    }

    /// Set the garbage collector period
    pub fn with_gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Set the skip-list height cap
    pub fn with_skiplist_max_level(mut self, max_level: usize) -> Self {
        self.skiplist_max_level = max_level;
        self
    }
}
