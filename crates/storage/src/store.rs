//! Versioned in-memory node store
//!
//! # Design
//!
//! - DashMap of identity to [`VersionChain`]: reads only lock one shard
//! - Pending writes live in the caller's [`Transaction`], never in the map
//! - One commit at a time: the commit lock covers validation, sequence
//!   allocation and apply, then `visible_seq` is advanced
//!
//! A reader resolves its snapshot from `visible_seq`, so versions pushed by
//! an in-progress commit stay invisible until the whole commit is applied.
//!
//! # Visibility
//!
//! | Isolation        | Read of a committed node                      |
//! |------------------|-----------------------------------------------|
//! | `ReadCommitted`  | newest version at the current `visible_seq`   |
//! | `Serializable`   | newest version at the pin taken on first read |
//!
//! In both levels the transaction's own pending write wins.

use crate::chain::VersionChain;
use crate::transaction::Transaction;
use dashmap::DashMap;
use hyperstore_core::error::{Error, Result};
use hyperstore_core::{GraphNode, Identity, IsolationLevel, SessionId};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Multi-version node store shared by every session
pub struct MemoryStore {
    chains: DashMap<Identity, VersionChain>,
    /// Highest fully applied commit sequence
    visible_seq: AtomicU64,
    /// Serializes commits (validate, allocate, apply)
    commit_lock: Mutex<()>,
    /// Start sequence of every live transaction
    live: Mutex<FxHashMap<SessionId, u64>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            chains: DashMap::new(),
            visible_seq: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
            live: Mutex::new(FxHashMap::default()),
        }
    }

    /// Highest commit sequence visible to readers
    #[inline]
    pub fn visible_seq(&self) -> u64 {
        self.visible_seq.load(Ordering::Acquire)
    }

    // ========================================================================
    // Transaction lifecycle
    // ========================================================================

    /// Begin the pending state of a top-level session
    pub fn begin(&self, id: SessionId, isolation: IsolationLevel, readonly: bool) -> Transaction {
        let start = self.visible_seq();
        self.live.lock().insert(id, start);
        Transaction::new(id, isolation, readonly, start)
    }

    /// Publish every pending write of `txn`
    ///
    /// Returns the commit sequence, or `None` if nothing was written.
    ///
    /// # Commit sequence
    ///
    /// 1. Serializable only, nothing written: fail on a stale read pin
    /// 2. Acquire commit lock
    /// 3. Serializable only: fail if a node this transaction read was
    ///    committed by someone else after it was pinned
    /// 4. Allocate the sequence
    /// 5. Append one version per written identity, stamped with the sequence
    /// 6. Advance `visible_seq`
    pub fn commit(&self, mut txn: Transaction) -> Result<Option<u64>> {
        let id = txn.id();
        let frame = txn.flatten();
        if frame.is_empty() {
            let stale = self.stale_read(&txn);
            self.end(id);
            return match stale {
                Some(err) => Err(err),
                None => Ok(None),
            };
        }
        if txn.is_readonly() {
            self.end(id);
            return Err(Error::ReadOnlySession);
        }

        let _commit_guard = self.commit_lock.lock();

        if let Some(err) = self.stale_read(&txn) {
            self.end(id);
            return Err(err);
        }

        let seq = self.visible_seq() + 1;
        let count = frame.len();
        for (node_id, node) in frame.iter() {
            let stamped = node.as_ref().map(|n| {
                let mut n = GraphNode::clone(n);
                n.version = seq;
                Arc::new(n)
            });
            self.chains
                .entry(node_id.clone())
                .or_default()
                .push(seq, stamped);
        }
        self.visible_seq.store(seq, Ordering::Release);
        drop(_commit_guard);

        self.end(id);
        debug!(session = %id, commit_seq = seq, writes = count, "transaction committed");
        Ok(Some(seq))
    }

    /// Conflict for the first pinned node committed after its pin
    fn stale_read(&self, txn: &Transaction) -> Option<Error> {
        if !txn.isolation().is_serializable() {
            return None;
        }
        txn.pins().find_map(|(node_id, pin)| {
            let latest = self.chains.get(node_id).and_then(|c| c.latest_seq());
            latest.is_some_and(|seq| seq > pin).then(|| Error::SerializableTransaction {
                resource: node_id.to_string(),
                session: txn.id(),
            })
        })
    }

    /// Drop every pending write of `txn`
    pub fn rollback(&self, txn: Transaction) {
        let id = txn.id();
        self.end(id);
        debug!(session = %id, "transaction rolled back");
    }

    /// Forget a transaction that was dropped without commit or rollback
    pub fn discard(&self, id: SessionId) {
        self.end(id);
        debug!(session = %id, "transaction discarded");
    }

    fn end(&self, id: SessionId) {
        self.live.lock().remove(&id);
    }

    /// Oldest sequence any live transaction may still read
    pub fn oldest_live_snapshot(&self) -> u64 {
        self.live
            .lock()
            .values()
            .copied()
            .min()
            .unwrap_or_else(|| self.visible_seq())
    }

    /// Number of live transactions
    pub fn live_transactions(&self) -> usize {
        self.live.lock().len()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read a node as seen by `txn`
    ///
    /// Returns `None` if the node does not exist or is removed in the
    /// transaction's view. Serializable transactions pin the node on first
    /// read, including reads that find nothing.
    pub fn get_node(&self, txn: &mut Transaction, id: &Identity) -> Option<Arc<GraphNode>> {
        if let Some(pending) = txn.pending(id) {
            return pending.clone();
        }
        let snapshot = self.snapshot_for(txn, id);
        self.committed_at(id, snapshot)
    }

    /// Latest committed version, outside any transaction
    pub fn get_committed(&self, id: &Identity) -> Option<Arc<GraphNode>> {
        self.committed_at(id, self.visible_seq())
    }

    fn committed_at(&self, id: &Identity, snapshot: u64) -> Option<Arc<GraphNode>> {
        self.chains
            .get(id)
            .and_then(|chain| chain.visible_at(snapshot).cloned().flatten())
    }

    fn snapshot_for(&self, txn: &mut Transaction, id: &Identity) -> u64 {
        let now = self.visible_seq();
        match txn.isolation() {
            IsolationLevel::ReadCommitted => now,
            IsolationLevel::Serializable => txn.pin(id, now),
        }
    }

    /// Check if a node is visible to `txn`
    pub fn contains(&self, txn: &mut Transaction, id: &Identity) -> bool {
        self.get_node(txn, id).is_some()
    }

    /// Every node visible to `txn` matching `filter`, ordered by identity
    pub fn nodes<F>(&self, txn: &mut Transaction, filter: F) -> Vec<Arc<GraphNode>>
    where
        F: Fn(&GraphNode) -> bool,
    {
        let mut ids: FxHashSet<Identity> =
            self.chains.iter().map(|entry| entry.key().clone()).collect();
        ids.extend(txn.written_ids());

        let mut nodes: Vec<_> = ids
            .into_iter()
            .filter_map(|id| self.get_node(txn, &id))
            .filter(|n| filter(n))
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Add a node that is not visible to `txn`
    ///
    /// # Errors
    ///
    /// - `ReadOnlySession` for read-only transactions
    /// - `DuplicateNode` if the identity is already visible
    pub fn add_node(&self, txn: &mut Transaction, node: GraphNode) -> Result<()> {
        Self::check_writable(txn)?;
        if self.contains(txn, &node.id) {
            return Err(Error::DuplicateNode(node.id));
        }
        txn.write(node.id.clone(), Some(Arc::new(node)));
        Ok(())
    }

    /// Replace a node visible to `txn`
    ///
    /// # Errors
    ///
    /// - `ReadOnlySession` for read-only transactions
    /// - `NodeNotFound` if no version is visible
    pub fn update_node(&self, txn: &mut Transaction, node: GraphNode) -> Result<()> {
        Self::check_writable(txn)?;
        if !self.contains(txn, &node.id) {
            return Err(Error::NodeNotFound(node.id));
        }
        txn.write(node.id.clone(), Some(Arc::new(node)));
        Ok(())
    }

    /// Remove a node in `txn`
    ///
    /// Returns whether a node was removed. Removing an absent node is a no-op
    /// unless `throw_if_not_exists` is set.
    pub fn remove_node(
        &self,
        txn: &mut Transaction,
        id: &Identity,
        throw_if_not_exists: bool,
    ) -> Result<bool> {
        Self::check_writable(txn)?;
        if !self.contains(txn, id) {
            if throw_if_not_exists {
                return Err(Error::NodeNotFound(id.clone()));
            }
            return Ok(false);
        }
        txn.write(id.clone(), None);
        Ok(true)
    }

    fn check_writable(txn: &Transaction) -> Result<()> {
        if txn.is_readonly() {
            return Err(Error::ReadOnlySession);
        }
        Ok(())
    }

    // ========================================================================
    // Maintenance and diagnostics
    // ========================================================================

    /// Drop versions no live reader can see
    ///
    /// Returns the number of versions dropped.
    pub fn prune(&self, oldest_snapshot: u64) -> usize {
        let mut dropped = 0;
        self.chains.retain(|_, chain| {
            dropped += chain.prune(oldest_snapshot);
            if chain.is_dead(oldest_snapshot) {
                dropped += chain.len();
                return false;
            }
            true
        });
        if dropped > 0 {
            debug!(oldest_snapshot, dropped, "versions pruned");
        }
        dropped
    }

    /// Number of nodes visible at the latest commit
    pub fn node_count(&self) -> usize {
        let seq = self.visible_seq();
        self.chains
            .iter()
            .filter(|c| matches!(c.visible_at(seq), Some(Some(_))))
            .count()
    }

    /// Number of committed versions retained for `id`
    pub fn version_count(&self, id: &Identity) -> usize {
        self.chains.get(id).map_or(0, |c| c.len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("chains", &self.chains.len())
            .field("visible_seq", &self.visible_seq())
            .finish()
    }
}
