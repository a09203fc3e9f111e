//! Wait-for-graph deadlock detection
//!
//! A background task periodically rebuilds a bipartite graph of
//! transactions and held locks: an edge runs from each holder to its
//! lock, and from each lock to each transaction queued on it. A cycle in
//! that graph is a deadlock. Cycles are found by draining zero-in-degree
//! nodes (Kahn's algorithm); whatever remains undrained is deadlocked.
//! The lowest transaction id in the residue is aborted, its parked lock
//! waits are cancelled, and draining resumes in case independent cycles
//! remain.
//!
//! The graph is a point-in-time approximation: a transaction may commit
//! between the snapshot and the abort. The abort then fails with
//! `InvalidState` and is simply skipped.

use crate::storage::{LockRegistry, RwLock};
use crate::txn::TransactionManager;
use ember_common::TxnId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NodeId {
    Lock(u64),
    Txn(TxnId),
}

#[derive(Default)]
struct WaitGraph {
    nexts: HashMap<NodeId, Vec<NodeId>>,
    in_deg: HashMap<NodeId, usize>,
}

impl WaitGraph {
    fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.in_deg.entry(from).or_insert(0);
        *self.in_deg.entry(to).or_insert(0) += 1;
        self.nexts.entry(from).or_default().push(to);
    }
}

pub struct DeadlockDetector {
    txns: Arc<TransactionManager>,
    locks: Arc<LockRegistry>,
}

impl DeadlockDetector {
    pub fn new(txns: Arc<TransactionManager>, locks: Arc<LockRegistry>) -> Arc<Self> {
        Arc::new(Self { txns, locks })
    }

    /// Run one detection pass. Returns the ids of the aborted victims,
    /// oldest-first.
    pub fn detect(&self) -> Vec<TxnId> {
        let mut graph = WaitGraph::default();
        // locks each transaction is parked on, for cancelling the victim
        let mut waits_on: HashMap<TxnId, Vec<Arc<RwLock>>> = HashMap::new();

        for lock in self.locks.active_locks() {
            let snapshot = lock.snapshot();
            let node = NodeId::Lock(lock.id());
            if let Some(writer) = snapshot.writer {
                graph.add_edge(NodeId::Txn(writer), node);
            }
            for reader in snapshot.readers {
                graph.add_edge(NodeId::Txn(reader), node);
            }
            for waiter in snapshot.waiters {
                graph.add_edge(node, NodeId::Txn(waiter));
                waits_on.entry(waiter).or_default().push(lock.clone());
            }
        }

        let WaitGraph { nexts, mut in_deg } = graph;
        let mut remaining: HashSet<NodeId> = in_deg.keys().copied().collect();
        let mut queue: VecDeque<NodeId> = in_deg
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&node, _)| node)
            .collect();

        let mut victims = Vec::new();
        loop {
            while let Some(node) = queue.pop_front() {
                if !remaining.remove(&node) {
                    continue;
                }
                for next in nexts.get(&node).into_iter().flatten() {
                    if !remaining.contains(next) {
                        continue;
                    }
                    let deg = in_deg.entry(*next).or_insert(0);
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        queue.push_back(*next);
                    }
                }
            }

            // everything undrained sits on a cycle; sacrifice the oldest
            let Some(victim) = remaining
                .iter()
                .filter_map(|node| match node {
                    NodeId::Txn(txn) => Some(*txn),
                    NodeId::Lock(_) => None,
                })
                .min()
            else {
                break;
            };
            debug!(victim = %victim, "deadlock detected, aborting victim");
            self.sacrifice(victim, &waits_on);
            victims.push(victim);

            // removing the victim unblocks its cycle; resume the drain
            remaining.remove(&NodeId::Txn(victim));
            for next in nexts.get(&NodeId::Txn(victim)).into_iter().flatten() {
                if !remaining.contains(next) {
                    continue;
                }
                let deg = in_deg.entry(*next).or_insert(0);
                *deg = deg.saturating_sub(1);
                if *deg == 0 {
                    queue.push_back(*next);
                }
            }
        }
        victims
    }

    /// Cancel the victim's parked lock waits, then abort it. The abort
    /// releases its held locks, which admits the waiters behind them.
    fn sacrifice(&self, victim: TxnId, waits_on: &HashMap<TxnId, Vec<Arc<RwLock>>>) {
        for lock in waits_on.get(&victim).into_iter().flatten() {
            lock.cancel(victim);
        }
        if let Some(txn) = self.txns.get_txn(victim) {
            // the victim may have committed since the snapshot was taken
            if let Err(error) = txn.abort() {
                debug!(victim = %victim, %error, "victim no longer abortable");
            }
        }
    }

    /// Run [`detect`](Self::detect) every `period` until the returned
    /// task is aborted.
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.detect();
            }
        })
    }
}
