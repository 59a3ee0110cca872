//! Transaction-scoped pending state
//!
//! A [`Transaction`] belongs to one top-level session. Each nested session
//! pushes a [`WriteFrame`]; completing the nested session merges the frame
//! into its parent, abandoning it drops the frame. Only the outermost commit
//! publishes anything to the shared version chains.

use hyperstore_core::{GraphNode, Identity, IsolationLevel, SessionId};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Pending writes of one nesting level
///
/// `None` marks a removal. Insertion order is kept so commits apply writes
/// in the order they were made.
#[derive(Debug, Clone, Default)]
pub struct WriteFrame {
    writes: FxHashMap<Identity, Option<Arc<GraphNode>>>,
    order: Vec<Identity>,
}

impl WriteFrame {
    /// Empty frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write (or a removal with `None`)
    pub fn put(&mut self, id: Identity, node: Option<Arc<GraphNode>>) {
        if self.writes.insert(id.clone(), node).is_none() {
            self.order.push(id);
        }
    }

    /// Pending state of `id` in this frame
    pub fn get(&self, id: &Identity) -> Option<&Option<Arc<GraphNode>>> {
        self.writes.get(id)
    }

    /// Writes in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&Identity, &Option<Arc<GraphNode>>)> {
        self.order
            .iter()
            .filter_map(move |id| self.writes.get(id).map(|w| (id, w)))
    }

    /// Fold a child frame into this one; the child's writes win
    pub fn merge(&mut self, child: WriteFrame) {
        let WriteFrame { mut writes, order } = child;
        for id in order {
            if let Some(node) = writes.remove(&id) {
                self.put(id, node);
            }
        }
    }

    /// Number of identities written
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if nothing was written
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Pending state of one top-level session
#[derive(Debug)]
pub struct Transaction {
    id: SessionId,
    isolation: IsolationLevel,
    readonly: bool,
    /// Visible sequence when the transaction began
    start_seq: u64,
    /// Serializable read pins: sequence observed at first touch
    pins: FxHashMap<Identity, u64>,
    /// One frame per nesting depth, innermost last
    frames: Vec<WriteFrame>,
}

impl Transaction {
    pub(crate) fn new(
        id: SessionId,
        isolation: IsolationLevel,
        readonly: bool,
        start_seq: u64,
    ) -> Self {
        Self {
            id,
            isolation,
            readonly,
            start_seq,
            pins: FxHashMap::default(),
            frames: vec![WriteFrame::new()],
        }
    }

    /// Owning session
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Isolation level
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Check if writes are rejected
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Visible sequence at begin
    pub fn start_seq(&self) -> u64 {
        self.start_seq
    }

    /// Current nesting depth (1 for a top-level session)
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Open a frame for a nested session
    pub fn push_frame(&mut self) {
        self.frames.push(WriteFrame::new());
    }

    /// Merge the innermost frame into its parent
    ///
    /// The top-level frame is never merged; it is applied by commit.
    pub fn merge_frame(&mut self) {
        if self.frames.len() > 1 {
            if let Some(child) = self.frames.pop() {
                if let Some(parent) = self.frames.last_mut() {
                    parent.merge(child);
                }
            }
        }
    }

    /// Discard the innermost frame
    pub fn discard_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        } else if let Some(top) = self.frames.last_mut() {
            *top = WriteFrame::new();
        }
    }

    /// Pin recorded for `id`, if the session is serializable and read it
    pub fn pin_of(&self, id: &Identity) -> Option<u64> {
        self.pins.get(id).copied()
    }

    /// Every serializable read pin
    pub fn pins(&self) -> impl Iterator<Item = (&Identity, u64)> + '_ {
        self.pins.iter().map(|(id, seq)| (id, *seq))
    }

    /// Pin `id` at `seq` unless already pinned; returns the effective pin
    pub(crate) fn pin(&mut self, id: &Identity, seq: u64) -> u64 {
        *self.pins.entry(id.clone()).or_insert(seq)
    }

    /// Own pending state of `id`, innermost frame first
    pub fn pending(&self, id: &Identity) -> Option<&Option<Arc<GraphNode>>> {
        self.frames.iter().rev().find_map(|f| f.get(id))
    }

    pub(crate) fn write(&mut self, id: Identity, node: Option<Arc<GraphNode>>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.put(id, node);
        }
    }

    /// Identities with pending writes across all frames
    pub fn written_ids(&self) -> Vec<Identity> {
        let mut seen = rustc_hash::FxHashSet::default();
        self.frames
            .iter()
            .flat_map(|f| f.iter().map(|(id, _)| id))
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect()
    }

    /// Check if any frame holds a write
    pub fn has_writes(&self) -> bool {
        self.frames.iter().any(|f| !f.is_empty())
    }

    /// Collapse every frame into one, in nesting order
    pub(crate) fn flatten(&mut self) -> WriteFrame {
        let mut frames = std::mem::take(&mut self.frames).into_iter();
        let mut merged = frames.next().unwrap_or_default();
        for frame in frames {
            merged.merge(frame);
        }
        self.frames.push(WriteFrame::new());
        merged
    }
}
