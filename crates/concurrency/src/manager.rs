//! Lock manager
//!
//! One mutex guards the whole lock table; a single condition variable wakes
//! every waiter when anything is released. Waiters re-check their own
//! grantability on wake, so the table is always the single source of truth.
//!
//! ## Acquire sequence
//!
//! ```text
//! 1. Re-entrant request already covered by a held lock: return at once
//! 2. Serializable check against the commit log (exclusive kinds only)
//! 3. Grantable and nobody queued ahead: grant
//! 4. Otherwise enqueue (upgrades go to the front) and loop:
//!    a. wait-for cycle through the requester  -> DeadLock
//!    b. cancellation requested                -> Cancelled
//!    c. grantable                             -> re-check serializable, grant
//!    d. deadline passed                       -> DeadLock
//!    e. sleep until woken or one poll interval elapses
//! ```
//!
//! Only the requesting session's acquire is aborted on a cycle; holders are
//! never touched.
//!
//! The serializable commit log is keyed by the manager's own commit clock,
//! which ticks once per committed session that released an exclusive kind.
//! It covers named resources as well as node ids.

use crate::lock::{AcquireOptions, LockGrant, LockKind, LockResource};
use crate::wait_graph;
use hyperstore_core::error::{Error, Result};
use hyperstore_core::SessionId;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default wait before an acquire is declared a deadlock
pub const DEFAULT_DEADLOCK_TIMEOUT: Duration = Duration::from_millis(20_000);

/// Default granularity at which waiters observe cancellation
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy)]
struct Holder {
    session: SessionId,
    kind: LockKind,
}

#[derive(Debug, Clone, Copy)]
struct Waiter {
    session: SessionId,
    kind: LockKind,
}

#[derive(Debug, Default)]
struct LockEntry {
    holders: SmallVec<[Holder; 2]>,
    queue: VecDeque<Waiter>,
    /// Bumped each time an ExclusiveWait holder releases through a commit
    epoch: u64,
}

impl LockEntry {
    fn is_idle(&self) -> bool {
        self.holders.is_empty() && self.queue.is_empty()
    }

    fn holder_kind(&self, session: SessionId) -> Option<LockKind> {
        self.holders
            .iter()
            .find(|h| h.session == session)
            .map(|h| h.kind)
    }

    /// Check if every other holder tolerates `kind`
    fn admits(&self, session: SessionId, kind: LockKind) -> bool {
        self.holders
            .iter()
            .filter(|h| h.session != session)
            .all(|h| h.kind.compatible_with(kind))
    }

    fn position(&self, session: SessionId) -> Option<usize> {
        self.queue.iter().position(|w| w.session == session)
    }

    /// Check if a queued waiter can be granted now
    fn can_grant_waiter(&self, index: usize) -> bool {
        let waiter = self.queue[index];
        self.admits(waiter.session, waiter.kind)
            && self
                .queue
                .iter()
                .take(index)
                .all(|w| w.kind.compatible_with(waiter.kind))
    }

    fn grant(&mut self, session: SessionId, kind: LockKind) -> bool {
        match self.holders.iter_mut().find(|h| h.session == session) {
            Some(holder) => {
                holder.kind = holder.kind.combine(kind);
                false
            }
            None => {
                self.holders.push(Holder { session, kind });
                true
            }
        }
    }
}

#[derive(Debug, Default)]
struct LockTable {
    entries: FxHashMap<LockResource, LockEntry>,
    /// Resources each session holds
    held: FxHashMap<SessionId, SmallVec<[LockResource; 4]>>,
    /// Resource each blocked session is queued on
    waiting: FxHashMap<SessionId, LockResource>,
    /// Commit tick of the last exclusive holder that committed, per
    /// resource. Kept apart from `entries` so idle locks can be dropped.
    last_commit: FxHashMap<LockResource, u64>,
    /// Ticks once per committed session that held an exclusive kind
    clock: u64,
    /// Clock value each live serializable session started at
    snapshots: FxHashMap<SessionId, u64>,
}

impl LockTable {
    fn grant(&mut self, session: SessionId, kind: LockKind, resource: &LockResource) {
        let entry = self.entries.entry(resource.clone()).or_default();
        if entry.grant(session, kind) {
            self.held.entry(session).or_default().push(resource.clone());
        }
    }

    /// Sessions the waiting `session` is blocked on
    fn blockers(&self, session: SessionId) -> Vec<SessionId> {
        let Some(resource) = self.waiting.get(&session) else {
            return Vec::new();
        };
        let Some(entry) = self.entries.get(resource) else {
            return Vec::new();
        };
        let Some(index) = entry.position(session) else {
            return Vec::new();
        };
        let kind = entry.queue[index].kind;

        let holders = entry
            .holders
            .iter()
            .filter(|h| h.session != session && !h.kind.compatible_with(kind))
            .map(|h| h.session);
        let ahead = entry
            .queue
            .iter()
            .take(index)
            .filter(|w| w.session != session && !w.kind.compatible_with(kind))
            .map(|w| w.session);
        holders.chain(ahead).collect()
    }

    /// Remove a waiter that gives up, dropping the entry if idle
    fn abandon(&mut self, session: SessionId, resource: &LockResource) {
        self.waiting.remove(&session);
        if let Some(entry) = self.entries.get_mut(resource) {
            entry.queue.retain(|w| w.session != session);
            if entry.is_idle() {
                self.entries.remove(resource);
            }
        }
    }

    fn remove_if_idle(&mut self, resource: &LockResource) {
        if self.entries.get(resource).is_some_and(LockEntry::is_idle) {
            self.entries.remove(resource);
        }
    }

    /// Drop commit log entries no live snapshot can conflict with
    fn prune_commit_log(&mut self) {
        match self.snapshots.values().min().copied() {
            Some(oldest) => self.last_commit.retain(|_, committed| *committed > oldest),
            None => self.last_commit.clear(),
        }
    }

    fn serializable_conflict(
        &self,
        kind: LockKind,
        resource: &LockResource,
        snapshot: Option<u64>,
    ) -> bool {
        match (kind, snapshot) {
            (LockKind::Exclusive, Some(snapshot)) => self
                .last_commit
                .get(resource)
                .is_some_and(|&committed| committed > snapshot),
            _ => false,
        }
    }
}

/// Shared/exclusive lock manager with deadlock detection
///
/// # Thread Safety
///
/// All methods take `&self`; the lock table is protected by an internal
/// mutex independent of the resources it manages. `acquire` blocks the
/// calling thread until the lock is granted or the acquire fails.
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
    default_timeout: Duration,
    poll_interval: Duration,
}

impl LockManager {
    /// Create a manager with the default timeout and poll interval
    pub fn new() -> Self {
        Self::with_timeouts(DEFAULT_DEADLOCK_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }

    /// Create a manager with explicit defaults
    pub fn with_timeouts(default_timeout: Duration, poll_interval: Duration) -> Self {
        LockManager {
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
            default_timeout,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Acquire a lock, blocking while it conflicts with other holders
    ///
    /// # Errors
    ///
    /// - `DeadLock` if a wait-for cycle through `session` is found or the
    ///   timeout elapses
    /// - `SerializableTransaction` if an exclusive acquire finds a commit on
    ///   the resource after `opts.snapshot`
    /// - `Cancelled` if the cancellation token fires while waiting
    pub fn acquire(
        &self,
        session: SessionId,
        kind: LockKind,
        resource: impl Into<LockResource>,
        opts: &AcquireOptions,
    ) -> Result<LockGrant> {
        let resource = resource.into();
        let mut table = self.table.lock();

        let already_held = table
            .entries
            .get(&resource)
            .and_then(|e| e.holder_kind(session));
        if already_held.is_some_and(|held| held.covers(kind)) {
            return Ok(LockGrant::Acquired);
        }

        if table.serializable_conflict(kind, &resource, opts.snapshot) {
            return Err(Self::conflict(session, &resource));
        }

        let (epoch, grant_now) = {
            let entry = table.entries.entry(resource.clone()).or_default();
            let free = already_held.is_some() || entry.queue.is_empty();
            (entry.epoch, free && entry.admits(session, kind))
        };
        if grant_now {
            table.grant(session, kind, &resource);
            debug!(session = %session, resource = %resource, ?kind, "lock granted");
            return Ok(LockGrant::Acquired);
        }

        // Upgrades jump the queue: they only wait for the other holders
        let waiter = Waiter { session, kind };
        let entry = table.entries.entry(resource.clone()).or_default();
        if already_held.is_some() {
            entry.queue.push_front(waiter);
        } else {
            entry.queue.push_back(waiter);
        }
        table.waiting.insert(session, resource.clone());
        debug!(session = %session, resource = %resource, ?kind, "waiting for lock");

        let timeout = opts.timeout.unwrap_or(self.default_timeout);
        let poll_interval = opts.poll_interval.unwrap_or(self.poll_interval);
        // `None` when the timeout is too large to represent: wait forever
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let cycle = {
                let t: &LockTable = &table;
                wait_graph::find_cycle(session, |s| t.blockers(s))
            };
            if let Some(cycle) = cycle {
                table.abandon(session, &resource);
                self.released.notify_all();
                warn!(
                    session = %session,
                    resource = %resource,
                    cycle = ?cycle,
                    "deadlock cycle detected, aborting requester"
                );
                return Err(Error::DeadLock {
                    resource: resource.to_string(),
                    session,
                });
            }

            if opts.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                table.abandon(session, &resource);
                self.released.notify_all();
                debug!(session = %session, resource = %resource, "lock wait cancelled");
                return Err(Error::Cancelled);
            }

            let grantable = table
                .entries
                .get(&resource)
                .and_then(|e| e.position(session).map(|i| e.can_grant_waiter(i)))
                .unwrap_or(false);
            if grantable {
                table.waiting.remove(&session);
                let current_epoch = match table.entries.get_mut(&resource) {
                    Some(entry) => {
                        entry.queue.retain(|w| w.session != session);
                        entry.epoch
                    }
                    None => epoch,
                };
                if table.serializable_conflict(kind, &resource, opts.snapshot) {
                    table.remove_if_idle(&resource);
                    self.released.notify_all();
                    return Err(Self::conflict(session, &resource));
                }
                table.grant(session, kind, &resource);
                // Waiters queued behind may now be compatible too
                self.released.notify_all();

                let handled = kind == LockKind::ExclusiveWait && current_epoch != epoch;
                debug!(session = %session, resource = %resource, ?kind, handled, "lock granted after wait");
                return Ok(if handled {
                    LockGrant::AlreadyHandled
                } else {
                    LockGrant::Acquired
                });
            }

            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                table.abandon(session, &resource);
                self.released.notify_all();
                warn!(
                    session = %session,
                    resource = %resource,
                    timeout_ms = timeout.as_millis() as u64,
                    "lock wait timed out, reporting deadlock"
                );
                return Err(Error::DeadLock {
                    resource: resource.to_string(),
                    session,
                });
            }
            let slice = deadline.map_or(poll_interval, |d| (d - now).min(poll_interval));
            self.released.wait_for(&mut table, slice);
        }
    }

    /// Acquire a lock without waiting
    ///
    /// Returns `Ok(None)` when the lock would have to wait.
    pub fn try_acquire(
        &self,
        session: SessionId,
        kind: LockKind,
        resource: impl Into<LockResource>,
        snapshot: Option<u64>,
    ) -> Result<Option<LockGrant>> {
        let resource = resource.into();
        let mut table = self.table.lock();

        let already_held = table
            .entries
            .get(&resource)
            .and_then(|e| e.holder_kind(session));
        if already_held.is_some_and(|held| held.covers(kind)) {
            return Ok(Some(LockGrant::Acquired));
        }
        if table.serializable_conflict(kind, &resource, snapshot) {
            return Err(Self::conflict(session, &resource));
        }

        let grantable = table.entries.get(&resource).map_or(true, |e| {
            (already_held.is_some() || e.queue.is_empty()) && e.admits(session, kind)
        });
        if !grantable {
            return Ok(None);
        }
        table.grant(session, kind, &resource);
        debug!(session = %session, resource = %resource, ?kind, "lock granted");
        Ok(Some(LockGrant::Acquired))
    }

    /// Start a serializable snapshot for `session`
    ///
    /// Returns the commit clock to pass as `AcquireOptions::snapshot`. An
    /// exclusive acquire fails with `SerializableTransaction` when another
    /// session committed while holding the resource exclusively after this
    /// point. The snapshot ends with `release_all`.
    pub fn open_snapshot(&self, session: SessionId) -> u64 {
        let mut table = self.table.lock();
        let clock = table.clock;
        table.snapshots.insert(session, clock);
        clock
    }

    /// Release every lock held by `session` and wake waiters
    ///
    /// `committed` is true when the session ended with a successful commit,
    /// whether or not it wrote anything. Exclusive locks released by a
    /// commit are recorded in the serializable commit log; ExclusiveWait
    /// locks mark their resource as handled.
    pub fn release_all(&self, session: SessionId, committed: bool) {
        let mut guard = self.table.lock();
        let table = &mut *guard;
        let had_snapshot = table.snapshots.remove(&session).is_some();
        let resources = table.held.remove(&session).unwrap_or_default();
        if let Some(resource) = table.waiting.remove(&session) {
            table.abandon(session, &resource);
        }
        if resources.is_empty() {
            if had_snapshot {
                table.prune_commit_log();
            }
            return;
        }

        let tick = table.clock + 1;
        let mut recorded = false;
        let count = resources.len();
        for resource in resources {
            let Some(entry) = table.entries.get_mut(&resource) else {
                continue;
            };
            let Some(index) = entry.holders.iter().position(|h| h.session == session) else {
                continue;
            };
            let holder = entry.holders.remove(index);
            if committed {
                match holder.kind {
                    LockKind::Exclusive => {
                        table.last_commit.insert(resource.clone(), tick);
                        recorded = true;
                    }
                    LockKind::ExclusiveWait => {
                        entry.epoch += 1;
                        recorded = true;
                    }
                    LockKind::Shared => {}
                }
            }
            table.remove_if_idle(&resource);
        }
        if recorded {
            table.clock = tick;
        }
        table.prune_commit_log();
        debug!(session = %session, count, committed, "locks released");
        self.released.notify_all();
    }

    /// Check if no resource has a holder or a waiter
    pub fn is_empty(&self) -> bool {
        let table = self.table.lock();
        table.entries.is_empty() && table.held.is_empty() && table.waiting.is_empty()
    }

    /// Current holders of `resource`
    pub fn holders(&self, resource: impl Into<LockResource>) -> Vec<(SessionId, LockKind)> {
        let resource = resource.into();
        self.table
            .lock()
            .entries
            .get(&resource)
            .map(|e| e.holders.iter().map(|h| (h.session, h.kind)).collect())
            .unwrap_or_default()
    }

    /// Number of sessions queued on `resource`
    pub fn waiter_count(&self, resource: impl Into<LockResource>) -> usize {
        let resource = resource.into();
        self.table
            .lock()
            .entries
            .get(&resource)
            .map_or(0, |e| e.queue.len())
    }

    /// Default wait before an acquire is declared a deadlock
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn conflict(session: SessionId, resource: &LockResource) -> Error {
        warn!(session = %session, resource = %resource, "serializable conflict");
        Error::SerializableTransaction {
            resource: resource.to_string(),
            session,
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock();
        f.debug_struct("LockManager")
            .field("resources", &table.entries.len())
            .field("sessions", &table.held.len())
            .field("waiting", &table.waiting.len())
            .finish()
    }
}
