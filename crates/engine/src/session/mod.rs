//! Sessions
//!
//! A session is the unit of work of the store. The first session begun on a
//! thread owns a transaction; sessions begun while it is active nest inside
//! it and share its transaction, each with its own write frame.
//!
//! # Lifecycle
//!
//! ```text
//! begin_session ──► Active ──accept_changes──► Validating ──► Committed
//!                     │                            │
//!                     └──rollback / drop──► Aborted ◄──┘ (blocking errors)
//! ```
//!
//! - Nested accept folds the frame into its parent; nothing is published
//! - Nested rollback drops only the frame's writes
//! - Top-level accept runs constraints, commits, releases locks and
//!   dispatches domain events
//!
//! The session handle is not `Send`: a session belongs to the thread that
//! began it.

mod context;
mod tracking;

pub(crate) use context::{with_active, ActiveSession, LendGuard};
pub use tracking::{TrackedElement, TrackingData, TrackingState};

use crate::constraint::{validate_commit, Constraint};
use crate::events::DomainEvent;
use crate::store::Store;
use chrono::Utc;
use context::SessionFrame;
use hyperstore_concurrency::{LockGrant, LockKind, LockResource};
use hyperstore_core::error::{Error, Result};
use hyperstore_core::{
    CancellationToken, DiagnosticMessage, Identity, IsolationLevel, SessionId, Value,
};
use hyperstore_storage::Transaction;
use std::marker::PhantomData;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Session mode flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionMode(u8);

impl SessionMode {
    /// Regular edits
    pub const NORMAL: SessionMode = SessionMode(0);
    /// Bulk loading: no domain events are recorded
    pub const LOADING: SessionMode = SessionMode(1);
    /// Commit without running constraints
    pub const SKIP_CONSTRAINTS: SessionMode = SessionMode(1 << 1);

    /// Check if every flag of `other` is set
    pub fn contains(self, other: SessionMode) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw flag bits
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for SessionMode {
    type Output = SessionMode;

    fn bitor(self, rhs: SessionMode) -> SessionMode {
        SessionMode(self.0 | rhs.0)
    }
}

impl BitOrAssign for SessionMode {
    fn bitor_assign(&mut self, rhs: SessionMode) {
        self.0 |= rhs.0;
    }
}

/// Options of [`Store::begin_session`]
///
/// Isolation and cancellation only apply to top-level sessions; a nested
/// session shares its parent's.
#[derive(Debug, Clone, Default)]
pub struct SessionConfiguration {
    /// Isolation level, the store default when `None`
    pub isolation_level: Option<IsolationLevel>,
    /// Mode flags
    pub mode: SessionMode,
    /// Reject every write
    pub readonly: bool,
    /// Token observed by lock waits and validation
    pub cancellation: Option<CancellationToken>,
}

impl SessionConfiguration {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Add mode flags
    pub fn mode(mut self, mode: SessionMode) -> Self {
        self.mode |= mode;
        self
    }

    /// Make the session read-only
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Observe `token`
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Outcome of an accepted session
#[derive(Debug, Clone)]
pub struct SessionResult {
    /// Session id
    pub session_id: SessionId,
    /// Commit sequence; `None` for nested sessions and empty commits
    pub commit_seq: Option<u64>,
    /// The enclosing session can no longer commit
    pub aborted: bool,
    /// Accepted into a parent session rather than committed
    pub nested: bool,
    /// Warnings and silenced errors reported during validation
    pub messages: Vec<DiagnosticMessage>,
    /// Net changes made by the session
    pub tracked: Vec<TrackedElement>,
    /// Events dispatched after the commit
    pub events: Vec<DomainEvent>,
}

impl SessionResult {
    /// Check if any error was reported
    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.is_error())
    }

    /// Check if any warning was reported
    pub fn has_warnings(&self) -> bool {
        self.messages.iter().any(|m| !m.is_error())
    }
}

// ============================================================================
// Session handle
// ============================================================================

/// Handle on an active session
///
/// Dropping a session that was not accepted rolls it back.
pub struct Session {
    store: Store,
    id: SessionId,
    depth: usize,
    isolation: IsolationLevel,
    completed: bool,
    _not_send: PhantomData<*const ()>,
}

impl Session {
    /// Session id (shared by nested sessions and their top-level session)
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Nesting depth, 1 for a top-level session
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Check if this session is nested in another
    pub fn is_nested(&self) -> bool {
        self.depth > 1
    }

    /// Isolation level of the transaction
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Acquire a lock held until the top-level session ends
    ///
    /// A failed acquire aborts the session.
    pub fn acquire_lock(
        &self,
        kind: LockKind,
        resource: impl Into<LockResource>,
    ) -> Result<LockGrant> {
        let resource = resource.into();
        let store = &self.store;
        with_active(store.id(), |active| {
            let active = owned(active, self.id)?;
            let result = store.inner().acquire_for(active, kind, resource);
            if let Err(e) = &result {
                active.fail(DiagnosticMessage::error(e.to_string()));
            }
            result
        })
    }

    /// Validate `schema_id` elements with `constraint` when this session's
    /// changes are committed
    pub fn add_constraint<C>(&self, schema_id: &Identity, constraint: C) -> Result<()>
    where
        C: Constraint + 'static,
    {
        self.store.schema().require(schema_id)?;
        let constraint: Arc<dyn Constraint> = Arc::new(constraint);
        with_active(self.store.id(), |active| {
            let active = owned(active, self.id)?;
            active
                .current
                .constraints
                .push((schema_id.clone(), constraint));
            Ok(())
        })
    }

    /// Attach a value to the session
    pub fn set_context_info(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let (key, value) = (key.into(), value.into());
        with_active(self.store.id(), |active| {
            owned(active, self.id)?.current.context.insert(key, value);
            Ok(())
        })
    }

    /// Value attached to this session or an enclosing one
    pub fn context_info(&self, key: &str) -> Option<Value> {
        with_active(self.store.id(), |active| {
            let active = active.filter(|a| a.id == self.id)?;
            active
                .frames()
                .rev()
                .find_map(|f| f.context.get(key).cloned())
        })
    }

    /// Changes made so far in the innermost session
    pub fn tracking(&self) -> Vec<TrackedElement> {
        with_active(self.store.id(), |active| {
            active
                .filter(|a| a.id == self.id)
                .map(|a| a.current.tracking.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Cancellation token of the transaction
    pub fn cancellation_token(&self) -> CancellationToken {
        with_active(self.store.id(), |active| {
            active
                .filter(|a| a.id == self.id)
                .map(|a| a.cancel.clone())
                .unwrap_or_default()
        })
    }

    /// Complete the session
    ///
    /// A nested session merges into its parent. A top-level session runs
    /// constraints and commits.
    ///
    /// # Errors
    ///
    /// - `Session` with every message when validation reports a blocking
    ///   error or an operation of the session failed
    /// - `SerializableTransaction` when a serializable session finds a newer
    ///   version of a node it read, whether or not it wrote anything
    /// - `Cancelled` when the token fired
    /// - `InvalidOperation` when a nested session is still open; the session
    ///   and every session nested in it are then rolled back
    pub fn accept_changes(mut self) -> Result<SessionResult> {
        let result = self.store.accept_session(self.id, self.depth);
        self.completed = !matches!(result, Err(Error::InvalidOperation(_)));
        result
    }

    /// Discard the session's changes, and those of sessions nested in it
    pub fn rollback(mut self) -> Result<()> {
        self.completed = true;
        self.store.rollback_session(self.id, self.depth)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        match self.store.rollback_session(self.id, self.depth) {
            Ok(()) | Err(Error::SessionCompleted) => {}
            Err(e) => {
                warn!(session_id = %self.id, depth = self.depth, error = %e, "session drop failed to roll back");
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("depth", &self.depth)
            .field("isolation", &self.isolation)
            .finish()
    }
}

/// The active session if it is `id`
fn owned(active: Option<&mut ActiveSession>, id: SessionId) -> Result<&mut ActiveSession> {
    match active {
        Some(active) if active.id == id => Ok(active),
        _ => Err(Error::SessionCompleted),
    }
}

/// The active session if `id` at `depth` is its innermost session
fn innermost(
    active: Option<&mut ActiveSession>,
    id: SessionId,
    depth: usize,
) -> Result<&mut ActiveSession> {
    let active = owned(active, id)?;
    if active.depth() < depth {
        return Err(Error::SessionCompleted);
    }
    if active.depth() > depth {
        return Err(Error::InvalidOperation(
            "a nested session is still open".into(),
        ));
    }
    if active.validating {
        return Err(Error::InvalidOperation(
            "session is being validated".into(),
        ));
    }
    Ok(active)
}

// ============================================================================
// Store lifecycle
// ============================================================================

impl Store {
    /// Begin a session on the calling thread
    ///
    /// Nests inside the thread's active session when there is one.
    pub fn begin_session(&self, config: SessionConfiguration) -> Result<Session> {
        let inner = self.inner();
        let (id, depth, isolation) = context::with_sessions(|map| {
            if let Some(active) = map.get_mut(&inner.id) {
                if active.validating {
                    return Err(Error::InvalidOperation(
                        "cannot begin a session while constraints run".into(),
                    ));
                }
                if active.cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let readonly = config.readonly || active.is_readonly();
                active.push_frame(SessionFrame::new(config.mode, readonly));
                return Ok((active.id, active.depth(), active.isolation));
            }

            let id = inner.session_ids.next_id();
            let isolation = config
                .isolation_level
                .unwrap_or(inner.config.default_isolation);
            let txn = inner.memory.begin(id, isolation, config.readonly);
            let cancel = config.cancellation.clone().unwrap_or_default();
            let lock_snapshot = isolation
                .is_serializable()
                .then(|| inner.locks.open_snapshot(id));
            map.insert(
                inner.id,
                ActiveSession::new(txn, cancel, config.mode, config.readonly, lock_snapshot),
            );
            Ok((id, 1, isolation))
        })?;

        debug!(session_id = %id, depth, %isolation, mode = config.mode.bits(), "session begun");
        Ok(Session {
            store: self.clone(),
            id,
            depth,
            isolation,
            completed: false,
            _not_send: PhantomData,
        })
    }

    /// Begin a session with the default configuration
    pub fn session(&self) -> Result<Session> {
        self.begin_session(SessionConfiguration::default())
    }

    /// Id of the calling thread's active session
    pub fn current_session_id(&self) -> Option<SessionId> {
        with_active(self.id(), |active| active.map(|a| a.id))
    }

    /// Check if the calling thread has an active session
    pub fn in_session(&self) -> bool {
        context::is_active(self.id())
    }

    fn accept_session(&self, id: SessionId, depth: usize) -> Result<SessionResult> {
        let nested = with_active(self.id(), |active| {
            let active = innermost(active, id, depth)?;
            let Some(child) = active.pop_frame() else {
                return Ok(None);
            };
            if let Some(txn) = active.txn.as_mut() {
                txn.merge_frame();
            }
            let tracked: Vec<_> = child.tracking.iter().cloned().collect();
            let parent = &mut active.current;
            parent.tracking.merge(child.tracking);
            parent.events.extend(child.events);
            parent.constraints.extend(child.constraints);
            Ok(Some(SessionResult {
                session_id: id,
                commit_seq: None,
                aborted: active.aborted,
                nested: true,
                messages: Vec::new(),
                tracked,
                events: Vec::new(),
            }))
        })?;

        match nested {
            Some(result) => {
                debug!(session_id = %id, depth, tracked = result.tracked.len(), "nested session accepted");
                Ok(result)
            }
            None => self.commit_session(id),
        }
    }

    fn commit_session(&self, id: SessionId) -> Result<SessionResult> {
        let inner = self.inner();

        // Lend the transaction to the validation pass; writes are refused
        // until the session is detached.
        let (mut txn, tracked, constraints, mode, cancel, aborted) =
            with_active(self.id(), |active| {
                let active = owned(active, id)?;
                let txn = active.txn.take().ok_or_else(|| {
                    Error::InvalidOperation("session transaction unavailable".into())
                })?;
                active.validating = true;
                Ok::<_, Error>((
                    txn,
                    active.current.tracking.iter().cloned().collect::<Vec<_>>(),
                    active.current.constraints.clone(),
                    active.current.mode,
                    active.cancel.clone(),
                    active.aborted,
                ))
            })?;

        let guard = LendGuard::session(inner, id);
        let validation = if aborted || mode.contains(SessionMode::SKIP_CONSTRAINTS) {
            Ok(Vec::new())
        } else if cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            validate_commit(inner, &mut txn, &tracked, &constraints, &cancel)
        };
        guard.disarm();

        let Some(active) = context::remove(self.id()) else {
            self.abort(txn, id);
            return Err(Error::SessionCompleted);
        };
        let mut messages = active.failures;
        match validation {
            Ok(found) => messages.extend(found),
            Err(e) => {
                self.abort(txn, id);
                return Err(e);
            }
        }

        inner.events.notify_errors(id, &mut messages);
        if aborted || messages.iter().any(|m| m.is_blocking()) {
            info!(session_id = %id, messages = messages.len(), aborted, "session aborted");
            self.abort(txn, id);
            return Err(Error::Session { messages });
        }

        let commit_seq = match inner.memory.commit(txn) {
            Ok(seq) => seq,
            Err(e) => {
                inner.locks.release_all(id, false);
                warn!(session_id = %id, error = %e, "commit failed");
                return Err(e);
            }
        };
        inner.locks.release_all(id, true);
        self.prune_after_commit();

        let frame = active.current;
        let events = match commit_seq {
            Some(version) => {
                let timestamp = Utc::now();
                frame
                    .events
                    .into_iter()
                    .map(|kind| DomainEvent {
                        session_id: id,
                        correlation_id: active.correlation_id,
                        version,
                        timestamp,
                        kind,
                    })
                    .collect()
            }
            None => Vec::new(),
        };
        inner.events.dispatch(&events);

        let tracked: Vec<_> = frame.tracking.iter().cloned().collect();
        debug!(
            session_id = %id,
            ?commit_seq,
            tracked = tracked.len(),
            events = events.len(),
            "session accepted"
        );
        Ok(SessionResult {
            session_id: id,
            commit_seq,
            aborted: false,
            nested: false,
            messages,
            tracked,
            events,
        })
    }

    fn rollback_session(&self, id: SessionId, depth: usize) -> Result<()> {
        let top_level = with_active(self.id(), |active| {
            let active = owned(active, id)?;
            if active.depth() < depth {
                return Err(Error::SessionCompleted);
            }
            if active.validating {
                return Err(Error::InvalidOperation(
                    "session is being validated".into(),
                ));
            }
            while active.depth() >= depth {
                if active.pop_frame().is_none() {
                    return Ok(true);
                }
                if let Some(txn) = active.txn.as_mut() {
                    txn.discard_frame();
                }
            }
            Ok(false)
        })?;

        if top_level {
            if let Some(active) = context::remove(self.id()) {
                match active.txn {
                    Some(txn) => self.abort(txn, id),
                    None => self.inner().locks.release_all(id, false),
                }
            }
        }
        debug!(session_id = %id, depth, "session rolled back");
        Ok(())
    }

    fn abort(&self, txn: Transaction, id: SessionId) {
        let inner = self.inner();
        inner.memory.rollback(txn);
        inner.locks.release_all(id, false);
    }
}
