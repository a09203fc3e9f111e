//! Ordered index: a probabilistic skip list over `key → Value`
//!
//! Nodes live in an arena (a slot vector with a free list) and link to
//! each other by slot index, so vacuuming a node can never leave a
//! dangling pointer behind. All structural operations run under one
//! index-wide mutex; that lock serializes shape changes and lookups but
//! is released before any per-value work happens, so it is never held
//! across a lock wait.

use crate::config::EngineConfig;
use crate::storage::lock::LockRegistry;
use crate::storage::registry::ValueRegistry;
use crate::storage::value::Value;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Reserved key; every operation treats it as a no-op.
pub const RESERVED_KEY: u64 = 0;

const NIL: usize = usize::MAX;
const HEAD: usize = 0;

struct Node {
    key: u64,
    value: Option<Arc<Value>>,
    /// Forward slot indices, one per level; `NIL` ends a level.
    next: Vec<usize>,
    level: usize,
}

struct Core {
    /// Arena of nodes; slot 0 is the head sentinel.
    nodes: Vec<Node>,
    free: Vec<usize>,
    /// Highest level currently in use.
    level: usize,
    rng: StdRng,
}

/// Concurrent ordered map from key to [`Value`].
pub struct SkipList {
    id: u64,
    max_level: usize,
    p: f64,
    values: Arc<ValueRegistry>,
    locks: Arc<LockRegistry>,
    core: Mutex<Core>,
}

impl SkipList {
    pub(crate) fn new(
        id: u64,
        config: &EngineConfig,
        values: Arc<ValueRegistry>,
        locks: Arc<LockRegistry>,
    ) -> Self {
        let max_level = config.skiplist_max_level.max(1);
        let head = Node {
            key: RESERVED_KEY,
            value: None,
            next: vec![NIL; max_level],
            level: 0,
        };
        Self {
            id,
            max_level,
            p: config.skiplist_p,
            values,
            locks,
            core: Mutex::new(Core {
                nodes: vec![head],
                free: Vec::new(),
                level: 0,
                rng: StdRng::from_entropy(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Point lookup; no side effects.
    pub fn get(&self, key: u64) -> Option<Arc<Value>> {
        if key == RESERVED_KEY {
            return None;
        }
        let core = self.core.lock();
        let slot = Self::find(&core, key);
        match slot {
            Some(slot) => core.nodes[slot].value.clone(),
            None => None,
        }
    }

    /// Return the existing value for `key`, or mint one (with a fresh
    /// lock, registered with the value registry) and link it in. Two
    /// concurrent callers always observe the same value.
    pub fn get_or_create(&self, key: u64) -> Option<Arc<Value>> {
        if key == RESERVED_KEY {
            return None;
        }
        let mut core = self.core.lock();
        let mut updates = vec![HEAD; self.max_level];
        let mut slot = HEAD;
        for lvl in (0..=core.level).rev() {
            while core.nodes[slot].next[lvl] != NIL && core.nodes[core.nodes[slot].next[lvl]].key < key
            {
                slot = core.nodes[slot].next[lvl];
            }
            updates[lvl] = slot;
        }
        let found = core.nodes[slot].next[0];
        if found != NIL && core.nodes[found].key == key {
            return core.nodes[found].value.clone();
        }

        let value = self.values.new_value(self.locks.new_lock());
        let level = self.random_level(&mut core);
        if level > core.level {
            for entry in updates.iter_mut().take(level + 1).skip(core.level + 1) {
                *entry = HEAD;
            }
            core.level = level;
        }
        let new_slot = Self::alloc(&mut core, key, value.clone(), level, self.max_level);
        for lvl in 0..=level {
            let prev = updates[lvl];
            core.nodes[new_slot].next[lvl] = core.nodes[prev].next[lvl];
            core.nodes[prev].next[lvl] = new_slot;
        }
        Some(value)
    }

    /// Up to `count` entries for keys ≥ `key`, ascending.
    pub fn scan(&self, key: u64, count: usize) -> Vec<(u64, Arc<Value>)> {
        if key == RESERVED_KEY {
            return Vec::new();
        }
        let core = self.core.lock();
        let mut slot = HEAD;
        for lvl in (0..=core.level).rev() {
            while core.nodes[slot].next[lvl] != NIL && core.nodes[core.nodes[slot].next[lvl]].key < key
            {
                slot = core.nodes[slot].next[lvl];
            }
        }
        let mut out = Vec::new();
        let mut cur = core.nodes[slot].next[0];
        while cur != NIL && out.len() < count {
            if let Some(value) = core.nodes[cur].value.clone() {
                out.push((core.nodes[cur].key, value));
            }
            cur = core.nodes[cur].next[0];
        }
        out
    }

    /// Unlink `key`'s node at every level and shrink the index height if
    /// the top levels emptied.
    ///
    /// The caller observed the value's chain empty; that is re-verified
    /// here, together with the lock being fully idle, under the index
    /// mutex. Returns true when the node is gone from the index (removed
    /// now, already absent, or replaced by a newer value for the key);
    /// false means the value came back to life and must not be removed.
    pub fn vacuum(&self, key: u64, value: &Arc<Value>) -> bool {
        if key == RESERVED_KEY {
            return true;
        }
        let mut core = self.core.lock();
        let mut updates = vec![HEAD; core.level + 1];
        let mut slot = HEAD;
        for lvl in (0..=core.level).rev() {
            while core.nodes[slot].next[lvl] != NIL && core.nodes[core.nodes[slot].next[lvl]].key < key
            {
                slot = core.nodes[slot].next[lvl];
            }
            updates[lvl] = slot;
        }
        let target = core.nodes[slot].next[0];
        if target == NIL || core.nodes[target].key != key {
            return true;
        }
        match core.nodes[target].value.as_ref() {
            Some(current) if current.id() == value.id() => {}
            // the key was recreated under a different value; ours is gone
            _ => return true,
        }
        if !(value.is_chain_empty() && value.lock().is_idle()) {
            return false;
        }

        let level = core.nodes[target].level;
        for (lvl, &prev) in updates.iter().enumerate().take(level + 1) {
            if core.nodes[prev].next[lvl] == target {
                core.nodes[prev].next[lvl] = core.nodes[target].next[lvl];
            }
        }
        core.nodes[target].value = None;
        core.nodes[target].next.fill(NIL);
        core.free.push(target);
        while core.level > 0 && core.nodes[HEAD].next[core.level] == NIL {
            core.level -= 1;
        }
        true
    }

    /// Number of linked keys. Diagnostic.
    pub fn len(&self) -> usize {
        let core = self.core.lock();
        let mut count = 0;
        let mut cur = core.nodes[HEAD].next[0];
        while cur != NIL {
            count += 1;
            cur = core.nodes[cur].next[0];
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.core.lock().nodes[HEAD].next[0] == NIL
    }

    fn find(core: &Core, key: u64) -> Option<usize> {
        let mut slot = HEAD;
        for lvl in (0..=core.level).rev() {
            while core.nodes[slot].next[lvl] != NIL && core.nodes[core.nodes[slot].next[lvl]].key < key
            {
                slot = core.nodes[slot].next[lvl];
            }
        }
        let found = core.nodes[slot].next[0];
        if found != NIL && core.nodes[found].key == key {
            Some(found)
        } else {
            None
        }
    }

    fn alloc(core: &mut Core, key: u64, value: Arc<Value>, level: usize, max_level: usize) -> usize {
        let node = Node {
            key,
            value: Some(value),
            next: vec![NIL; max_level],
            level,
        };
        match core.free.pop() {
            Some(slot) => {
                core.nodes[slot] = node;
                slot
            }
            None => {
                core.nodes.push(node);
                core.nodes.len() - 1
            }
        }
    }

    fn random_level(&self, core: &mut Core) -> usize {
        let mut level = 0;
        while level + 1 < self.max_level && core.rng.gen_bool(self.p) {
            level += 1;
        }
        level
    }
}
