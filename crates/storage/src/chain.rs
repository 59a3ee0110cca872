//! Per-identity version chain

use hyperstore_core::GraphNode;
use smallvec::SmallVec;
use std::sync::Arc;

/// One committed version; `None` is a tombstone
pub type Version = (u64, Option<Arc<GraphNode>>);

/// Committed versions of one identity, ordered by commit sequence
///
/// Most identities carry one or two live versions, so the chain is inline
/// until it grows.
#[derive(Debug, Clone, Default)]
pub struct VersionChain {
    versions: SmallVec<[Version; 2]>,
}

impl VersionChain {
    /// Empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a version committed at `seq`
    ///
    /// Sequences are allocated under the store's commit lock, so they only
    /// grow along a chain.
    pub fn push(&mut self, seq: u64, node: Option<Arc<GraphNode>>) {
        debug_assert!(self.versions.last().map_or(true, |(s, _)| *s < seq));
        self.versions.push((seq, node));
    }

    /// Version visible at `snapshot`
    ///
    /// Returns `None` if nothing was committed at or before `snapshot`, and
    /// `Some(None)` if the visible version is a tombstone.
    pub fn visible_at(&self, snapshot: u64) -> Option<&Option<Arc<GraphNode>>> {
        self.versions
            .iter()
            .rev()
            .find(|(seq, _)| *seq <= snapshot)
            .map(|(_, node)| node)
    }

    /// Sequence of the newest committed version
    pub fn latest_seq(&self) -> Option<u64> {
        self.versions.last().map(|(seq, _)| *seq)
    }

    /// Newest committed version, ignoring snapshots
    pub fn latest(&self) -> Option<&Arc<GraphNode>> {
        self.versions.last().and_then(|(_, node)| node.as_ref())
    }

    /// Drop versions no reader at or after `oldest_snapshot` can see
    ///
    /// Keeps the newest version at or before `oldest_snapshot` and everything
    /// after it. Returns the number of versions dropped.
    pub fn prune(&mut self, oldest_snapshot: u64) -> usize {
        let keep_from = self
            .versions
            .iter()
            .rposition(|(seq, _)| *seq <= oldest_snapshot)
            .unwrap_or(0);
        if keep_from == 0 {
            return 0;
        }
        self.versions.drain(..keep_from);
        keep_from
    }

    /// Check if the only remaining version is a tombstone no reader needs
    pub fn is_dead(&self, oldest_snapshot: u64) -> bool {
        matches!(self.versions.as_slice(), [(seq, None)] if *seq <= oldest_snapshot)
    }

    /// Number of committed versions retained
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Check if the chain has no versions
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
