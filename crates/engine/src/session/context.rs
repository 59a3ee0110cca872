//! Per-thread active session state
//!
//! Each thread has at most one active top-level session per store. Nested
//! sessions push a [`SessionFrame`] on it instead of opening a new one. The
//! map is keyed by store id so one thread can work with several stores.

use super::{SessionMode, TrackingData};
use crate::constraint::Constraint;
use crate::events::EventKind;
use crate::store::StoreInner;
use hyperstore_core::{
    CancellationToken, DiagnosticMessage, Identity, IsolationLevel, SessionId, Value,
};
use hyperstore_storage::Transaction;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

thread_local! {
    static ACTIVE: RefCell<FxHashMap<u64, ActiveSession>> = RefCell::new(FxHashMap::default());
}

/// State of one nesting level
pub(crate) struct SessionFrame {
    pub(crate) readonly: bool,
    pub(crate) mode: SessionMode,
    pub(crate) tracking: TrackingData,
    pub(crate) events: Vec<EventKind>,
    pub(crate) constraints: Vec<(Identity, Arc<dyn Constraint>)>,
    pub(crate) context: FxHashMap<String, Value>,
}

impl SessionFrame {
    pub(crate) fn new(mode: SessionMode, readonly: bool) -> Self {
        Self {
            readonly,
            mode,
            tracking: TrackingData::new(),
            events: Vec::new(),
            constraints: Vec::new(),
            context: FxHashMap::default(),
        }
    }
}

/// Active top-level session of a thread
pub(crate) struct ActiveSession {
    pub(crate) id: SessionId,
    pub(crate) isolation: IsolationLevel,
    pub(crate) cancel: CancellationToken,
    pub(crate) correlation_id: Uuid,
    /// `None` while the transaction is lent out (validation, reads)
    pub(crate) txn: Option<Transaction>,
    /// Innermost frame
    pub(crate) current: SessionFrame,
    /// Enclosing frames, outermost first
    pub(crate) parents: Vec<SessionFrame>,
    /// Set while constraints run; writes are rejected
    pub(crate) validating: bool,
    /// Set when an operation failed; the session can no longer commit
    pub(crate) aborted: bool,
    /// Errors recorded outside validation (failed operations, forbidden writes)
    pub(crate) failures: Vec<DiagnosticMessage>,
    /// Lock manager commit clock at begin, serializable sessions only
    pub(crate) lock_snapshot: Option<u64>,
}

impl ActiveSession {
    pub(crate) fn new(
        txn: Transaction,
        cancel: CancellationToken,
        mode: SessionMode,
        readonly: bool,
        lock_snapshot: Option<u64>,
    ) -> Self {
        Self {
            id: txn.id(),
            isolation: txn.isolation(),
            cancel,
            correlation_id: Uuid::new_v4(),
            txn: Some(txn),
            current: SessionFrame::new(mode, readonly),
            parents: Vec::new(),
            validating: false,
            aborted: false,
            failures: Vec::new(),
            lock_snapshot,
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.parents.len() + 1
    }

    pub(crate) fn is_readonly(&self) -> bool {
        self.current.readonly || self.parents.iter().any(|f| f.readonly)
    }

    pub(crate) fn is_loading(&self) -> bool {
        self.frames().any(|f| f.mode.contains(SessionMode::LOADING))
    }

    pub(crate) fn frames(&self) -> impl DoubleEndedIterator<Item = &SessionFrame> {
        self.parents.iter().chain(std::iter::once(&self.current))
    }

    pub(crate) fn push_frame(&mut self, frame: SessionFrame) {
        let parent = std::mem::replace(&mut self.current, frame);
        self.parents.push(parent);
        if let Some(txn) = self.txn.as_mut() {
            txn.push_frame();
        }
    }

    /// Remove the innermost frame; `None` at the top level
    pub(crate) fn pop_frame(&mut self) -> Option<SessionFrame> {
        let parent = self.parents.pop()?;
        Some(std::mem::replace(&mut self.current, parent))
    }

    /// Record an operation failure; the session will not commit
    pub(crate) fn fail(&mut self, message: DiagnosticMessage) {
        self.aborted = true;
        self.failures.push(message);
    }
}

/// Run `f` with the calling thread's active sessions
pub(crate) fn with_sessions<R>(f: impl FnOnce(&mut FxHashMap<u64, ActiveSession>) -> R) -> R {
    ACTIVE.with(|active| f(&mut active.borrow_mut()))
}

/// Run `f` with the active session of `store`, if any
pub(crate) fn with_active<R>(store: u64, f: impl FnOnce(Option<&mut ActiveSession>) -> R) -> R {
    with_sessions(|map| f(map.get_mut(&store)))
}

/// Check if the calling thread has an active session on `store`
pub(crate) fn is_active(store: u64) -> bool {
    with_sessions(|map| map.contains_key(&store))
}

/// Detach the active session of `store`
pub(crate) fn remove(store: u64) -> Option<ActiveSession> {
    with_sessions(|map| map.remove(&store))
}

/// Detach the active session of `store` if it is `id`
///
/// Usable while unwinding: returns `None` instead of panicking when the map
/// is borrowed or the thread is shutting down.
fn detach(store: u64, id: SessionId) -> Option<ActiveSession> {
    ACTIVE
        .try_with(|active| {
            let mut map = active.try_borrow_mut().ok()?;
            match map.get(&store) {
                Some(session) if session.id == id => map.remove(&store),
                _ => None,
            }
        })
        .ok()
        .flatten()
}

/// Cleans up when a closure holding a borrowed transaction unwinds
///
/// Armed until [`LendGuard::disarm`]. Dropped while armed, it releases the
/// transaction's snapshot; a session guard also detaches the active
/// session and frees its locks so the thread can begin again.
pub(crate) struct LendGuard<'a> {
    inner: &'a StoreInner,
    session: SessionId,
    detach: bool,
    armed: bool,
}

impl<'a> LendGuard<'a> {
    /// Guard a transaction private to one call
    pub(crate) fn transaction(inner: &'a StoreInner, session: SessionId) -> Self {
        Self {
            inner,
            session,
            detach: false,
            armed: true,
        }
    }

    /// Guard the transaction of the active session
    pub(crate) fn session(inner: &'a StoreInner, session: SessionId) -> Self {
        Self {
            inner,
            session,
            detach: true,
            armed: true,
        }
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for LendGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let inner = self.inner;
        if self.detach {
            if let Some(txn) = detach(inner.id, self.session).and_then(|a| a.txn) {
                inner.memory.rollback(txn);
            }
            inner.locks.release_all(self.session, false);
        }
        inner.memory.discard(self.session);
        warn!(session_id = %self.session, "transaction abandoned while unwinding");
    }
}
