//! Domain events
//!
//! Writes made in a session record an [`EventKind`]. After the top-level
//! session commits, each one is stamped into a [`DomainEvent`] with the
//! commit sequence and a timestamp, then handed to every subscriber in
//! order. Loading-mode sessions record nothing.

use chrono::{DateTime, Utc};
use hyperstore_core::{DiagnosticMessage, Identity, SessionId, Value};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// What changed
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Entity created
    AddEntity {
        /// Entity id
        id: Identity,
        /// Entity schema
        schema_id: Identity,
    },
    /// Entity removed
    RemoveEntity {
        /// Entity id
        id: Identity,
        /// Entity schema
        schema_id: Identity,
    },
    /// Relationship created
    AddRelationship {
        /// Relationship id
        id: Identity,
        /// Relationship schema
        schema_id: Identity,
        /// Start element
        start_id: Identity,
        /// End element
        end_id: Identity,
    },
    /// Relationship removed
    RemoveRelationship {
        /// Relationship id
        id: Identity,
        /// Relationship schema
        schema_id: Identity,
        /// Start element
        start_id: Identity,
        /// End element
        end_id: Identity,
    },
    /// Property value changed
    ChangePropertyValue {
        /// Owning element
        id: Identity,
        /// Property name
        property: String,
        /// Previous value, `None` if never set
        old_value: Option<Value>,
        /// New value
        value: Value,
    },
}

impl EventKind {
    /// Element the event is about
    pub fn element_id(&self) -> &Identity {
        match self {
            EventKind::AddEntity { id, .. }
            | EventKind::RemoveEntity { id, .. }
            | EventKind::AddRelationship { id, .. }
            | EventKind::RemoveRelationship { id, .. }
            | EventKind::ChangePropertyValue { id, .. } => id,
        }
    }
}

/// Event dispatched after a commit
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    /// Session that made the change
    pub session_id: SessionId,
    /// Shared by every event of one session
    pub correlation_id: Uuid,
    /// Commit sequence the change became visible at
    pub version: u64,
    /// Commit time
    pub timestamp: DateTime<Utc>,
    /// The change
    pub kind: EventKind,
}

/// Handle returned by subscribe, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type EventHandler = Arc<dyn Fn(&DomainEvent) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(SessionId, &mut [DiagnosticMessage]) + Send + Sync>;

/// Subscriber registry for domain events and validation messages
#[derive(Default)]
pub struct EventDispatcher {
    next_id: AtomicU64,
    events: RwLock<Vec<(SubscriptionId, EventHandler)>>,
    errors: RwLock<Vec<(SubscriptionId, ErrorHandler)>>,
}

impl EventDispatcher {
    /// Empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Receive every committed event
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        let id = self.allocate();
        self.events.write().push((id, Arc::new(handler)));
        id
    }

    /// Receive validation messages while a session is validated
    ///
    /// Handlers may set `silent` on error messages so they no longer abort
    /// the session.
    pub fn on_errors<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(SessionId, &mut [DiagnosticMessage]) + Send + Sync + 'static,
    {
        let id = self.allocate();
        self.errors.write().push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription of either kind; returns true if it existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|(sid, _)| *sid != id);
        if events.len() != before {
            return true;
        }
        drop(events);
        let mut errors = self.errors.write();
        let before = errors.len();
        errors.retain(|(sid, _)| *sid != id);
        errors.len() != before
    }

    /// Deliver events in order to every subscriber
    ///
    /// Handlers run outside the registry lock and may subscribe or
    /// unsubscribe.
    pub fn dispatch(&self, events: &[DomainEvent]) {
        if events.is_empty() {
            return;
        }
        let handlers: Vec<EventHandler> =
            self.events.read().iter().map(|(_, h)| Arc::clone(h)).collect();
        for event in events {
            for handler in &handlers {
                handler(event);
            }
        }
    }

    /// Hand validation messages to every error subscriber
    pub fn notify_errors(&self, session: SessionId, messages: &mut [DiagnosticMessage]) {
        if messages.is_empty() {
            return;
        }
        let handlers: Vec<ErrorHandler> =
            self.errors.read().iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            handler(session, messages);
        }
    }

    /// Number of event subscribers
    pub fn subscriber_count(&self) -> usize {
        self.events.read().len()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("events", &self.events.read().len())
            .field("errors", &self.errors.read().len())
            .finish()
    }
}
