//! Elements created, updated and removed during a session

use hyperstore_core::{Identity, NodeKind};
use rustc_hash::FxHashMap;

/// What happened to a tracked element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingState {
    /// Created in the session
    Added,
    /// Existed before and was changed
    Updated,
    /// Existed before and was removed
    Removed,
}

/// One tracked element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedElement {
    /// Element id
    pub id: Identity,
    /// Element schema
    pub schema_id: Option<Identity>,
    /// Entity or relationship
    pub kind: NodeKind,
    /// Net change over the session
    pub state: TrackingState,
}

/// Net changes of a session, one entry per element
///
/// Successive changes to the same element fold together:
///
/// | Existing  | New       | Result         |
/// |-----------|-----------|----------------|
/// | Added     | Updated   | Added          |
/// | Added     | Removed   | (dropped)      |
/// | Updated   | Removed   | Removed        |
/// | Removed   | Added     | Updated        |
#[derive(Debug, Clone, Default)]
pub struct TrackingData {
    elements: FxHashMap<Identity, TrackedElement>,
    order: Vec<Identity>,
}

impl TrackingData {
    /// Empty tracking data
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change
    pub fn record(&mut self, element: TrackedElement) {
        let merged = match self.elements.get(&element.id).map(|e| e.state) {
            None => Some(element.state),
            Some(TrackingState::Added) => match element.state {
                TrackingState::Removed => None,
                _ => Some(TrackingState::Added),
            },
            Some(TrackingState::Updated) => Some(element.state.max_with_update()),
            Some(TrackingState::Removed) => match element.state {
                TrackingState::Added | TrackingState::Updated => Some(TrackingState::Updated),
                TrackingState::Removed => Some(TrackingState::Removed),
            },
        };

        match merged {
            Some(state) => {
                let id = element.id.clone();
                let entry = TrackedElement { state, ..element };
                if self.elements.insert(id.clone(), entry).is_none() {
                    self.order.push(id);
                }
            }
            None => {
                self.elements.remove(&element.id);
                self.order.retain(|i| i != &element.id);
            }
        }
    }

    /// Fold a nested session's changes into this one
    pub fn merge(&mut self, child: TrackingData) {
        let TrackingData { mut elements, order } = child;
        for id in order {
            if let Some(element) = elements.remove(&id) {
                self.record(element);
            }
        }
    }

    /// State of one element
    pub fn state(&self, id: &Identity) -> Option<TrackingState> {
        self.elements.get(id).map(|e| e.state)
    }

    /// Elements in the order they were first touched
    pub fn iter(&self) -> impl Iterator<Item = &TrackedElement> {
        self.order.iter().filter_map(move |id| self.elements.get(id))
    }

    /// Elements in one state
    pub fn in_state(&self, state: TrackingState) -> impl Iterator<Item = &TrackedElement> {
        self.iter().filter(move |e| e.state == state)
    }

    /// Number of tracked elements
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if nothing changed
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl TrackingState {
    // Updated followed by anything but a removal stays Updated
    fn max_with_update(self) -> TrackingState {
        match self {
            TrackingState::Removed => TrackingState::Removed,
            _ => TrackingState::Updated,
        }
    }
}
