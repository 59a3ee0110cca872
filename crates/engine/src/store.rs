//! Store handle and builder
//!
//! [`Store`] is a cheap, cloneable handle over the shared engine state: the
//! schema, the versioned memory store, the lock manager, the constraint
//! registry and the event dispatcher.
//!
//! # Access paths
//!
//! - Reads never take locks; they see the calling thread's session view, or
//!   the latest commit outside a session
//! - Writes take an exclusive lock on every node they touch, held until the
//!   top-level session ends. Outside a session, a write opens an implicit
//!   session and accepts it.

use crate::config::{Setting, Settings, StoreConfig};
use crate::constraint::ConstraintRegistry;
use crate::events::{EventDispatcher, EventKind};
use crate::session::{
    with_active, ActiveSession, LendGuard, SessionConfiguration, TrackedElement, TrackingState,
};
use hyperstore_concurrency::{AcquireOptions, LockGrant, LockKind, LockManager, LockResource};
use hyperstore_core::error::{Error, Result};
use hyperstore_core::{
    DiagnosticMessage, GraphNode, IdGenerator, Identity, IsolationLevel, Schema,
    SessionIdAllocator, UuidIdGenerator, Value,
};
use hyperstore_storage::{MemoryStore, Transaction};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Shared engine state
pub(crate) struct StoreInner {
    pub(crate) id: u64,
    pub(crate) config: StoreConfig,
    pub(crate) settings: Settings,
    pub(crate) schema: Arc<Schema>,
    pub(crate) memory: MemoryStore,
    pub(crate) locks: LockManager,
    pub(crate) constraints: ConstraintRegistry,
    pub(crate) events: EventDispatcher,
    pub(crate) id_generator: Arc<dyn IdGenerator>,
    pub(crate) session_ids: SessionIdAllocator,
}

impl StoreInner {
    /// Acquire a lock for the active session with the live settings
    pub(crate) fn acquire_for(
        &self,
        active: &mut ActiveSession,
        kind: LockKind,
        resource: LockResource,
    ) -> Result<LockGrant> {
        if kind.is_exclusive() && active.is_readonly() {
            return Err(Error::ReadOnlySession);
        }
        let mut opts = AcquireOptions::new().cancel(active.cancel.clone());
        if let Some(timeout) = self.settings.duration(Setting::MaxTimeBeforeDeadlockInMs) {
            opts = opts.timeout(timeout);
        }
        if let Some(interval) = self.settings.duration(Setting::LockPollIntervalInMs) {
            opts = opts.poll_interval(interval);
        }
        if let Some(tick) = active.lock_snapshot {
            opts = opts.snapshot(tick);
        }
        self.locks.acquire(active.id, kind, resource, &opts)
    }
}

/// Handle on a hypergraph store
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Store with the default configuration over `schema`
    pub fn new(schema: Schema) -> Self {
        Self::from_parts(
            StoreConfig::default(),
            Arc::new(schema),
            Arc::new(UuidIdGenerator),
        )
    }

    /// Configure a store
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    fn from_parts(config: StoreConfig, schema: Arc<Schema>, id_generator: Arc<dyn IdGenerator>) -> Self {
        let inner = StoreInner {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            settings: Settings::from_config(&config),
            locks: LockManager::with_timeouts(config.deadlock_timeout(), config.poll_interval()),
            constraints: ConstraintRegistry::new(Arc::clone(&schema)),
            memory: MemoryStore::new(),
            events: EventDispatcher::new(),
            session_ids: SessionIdAllocator::new(),
            schema,
            id_generator,
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn inner(&self) -> &StoreInner {
        &self.inner
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Schema resolver
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Constraint registry
    pub fn constraints(&self) -> &ConstraintRegistry {
        &self.inner.constraints
    }

    /// Domain event subscriptions
    pub fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    /// Lock manager
    pub fn locks(&self) -> &LockManager {
        &self.inner.locks
    }

    /// Versioned node storage
    pub fn memory(&self) -> &MemoryStore {
        &self.inner.memory
    }

    /// Configuration the store was built with
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Live settings
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Change a live setting by name
    pub fn register_setting(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let setting: Setting = name.parse()?;
        self.inner.settings.set(setting, value)?;
        debug!(setting = setting.name(), "setting changed");
        Ok(())
    }

    /// Identity in `domain`, generated unless `key` is given
    pub fn create_id(&self, domain: &str, key: Option<&str>) -> Identity {
        match key {
            Some(key) => Identity::new(domain, key),
            None => self.inner.id_generator.next_id(domain),
        }
    }

    /// Drop versions no live session can see
    ///
    /// Returns the number of versions dropped.
    pub fn prune_versions(&self) -> usize {
        let inner = &self.inner;
        let oldest = inner.memory.oldest_live_snapshot();
        inner.memory.prune(oldest)
    }

    pub(crate) fn prune_after_commit(&self) {
        if self.inner.settings.flag(Setting::PruneVersionsOnCommit) {
            self.prune_versions();
        }
    }

    // ========================================================================
    // Access paths
    // ========================================================================

    /// Run `f` against the calling thread's view of the store
    ///
    /// Inside a session `f` sees the session's pending changes. Outside one,
    /// or while the session is being validated, it sees the latest commit.
    /// Writes made through the store while `f` runs are refused. If `f`
    /// panics inside a session, that session is detached and rolled back.
    pub fn read<R>(&self, f: impl FnOnce(&MemoryStore, &mut Transaction) -> R) -> R {
        let inner = &*self.inner;
        let lent = with_active(inner.id, |active| {
            let active = active.filter(|a| !a.validating)?;
            let txn = active.txn.take()?;
            active.validating = true;
            Some(txn)
        });

        match lent {
            Some(mut txn) => {
                let guard = LendGuard::session(inner, txn.id());
                let result = f(&inner.memory, &mut txn);
                guard.disarm();
                with_active(inner.id, |active| match active {
                    Some(active) => {
                        active.txn = Some(txn);
                        active.validating = false;
                    }
                    None => inner.memory.rollback(txn),
                });
                result
            }
            None => {
                let id = inner.session_ids.next_id();
                let mut txn = inner.memory.begin(id, IsolationLevel::ReadCommitted, true);
                let guard = LendGuard::transaction(inner, id);
                let result = f(&inner.memory, &mut txn);
                guard.disarm();
                inner.memory.rollback(txn);
                result
            }
        }
    }

    /// Run a write operation in the current session, or in an implicit one
    pub(crate) fn write<R>(&self, op: impl FnOnce(&mut Scope<'_>) -> Result<R>) -> Result<R> {
        if self.in_session() {
            return self.write_in_current(op);
        }
        let session = self.begin_session(SessionConfiguration::default())?;
        let value = self.write_in_current(op)?;
        session.accept_changes()?;
        Ok(value)
    }

    fn write_in_current<R>(&self, op: impl FnOnce(&mut Scope<'_>) -> Result<R>) -> Result<R> {
        let inner = &*self.inner;
        with_active(inner.id, |active| {
            let active = active.ok_or(Error::NoActiveSession)?;
            if active.validating {
                active
                    .failures
                    .push(DiagnosticMessage::error("constraints cannot modify the store"));
                return Err(Error::ConstraintWriteForbidden);
            }
            if active.cancel.is_cancelled() {
                active.fail(DiagnosticMessage::error(Error::Cancelled.to_string()));
                return Err(Error::Cancelled);
            }

            let mut scope = Scope { inner, active };
            let result = op(&mut scope);
            if let Err(e) = &result {
                debug!(session_id = %scope.active.id, error = %e, "operation failed");
                scope.active.fail(DiagnosticMessage::error(e.to_string()));
            }
            result
        })
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("memory", &self.inner.memory)
            .field("locks", &self.inner.locks)
            .finish()
    }
}

// ============================================================================
// Write scope
// ============================================================================

/// Write access to the active session for the duration of one operation
pub(crate) struct Scope<'a> {
    inner: &'a StoreInner,
    active: &'a mut ActiveSession,
}

impl<'a> Scope<'a> {
    pub(crate) fn schema(&self) -> &'a Schema {
        let inner = self.inner;
        &inner.schema
    }

    fn txn(&mut self) -> Result<&mut Transaction> {
        self.active
            .txn
            .as_mut()
            .ok_or_else(|| Error::InvalidOperation("session transaction unavailable".into()))
    }

    /// Session view of a node
    pub(crate) fn read(&mut self, id: &Identity) -> Result<Option<Arc<GraphNode>>> {
        let inner = self.inner;
        Ok(inner.memory.get_node(self.txn()?, id))
    }

    /// Take the exclusive lock on a node
    pub(crate) fn lock(&mut self, id: &Identity) -> Result<()> {
        self.inner
            .acquire_for(self.active, LockKind::Exclusive, LockResource::from(id))
            .map(|_| ())
    }

    pub(crate) fn add(&mut self, node: GraphNode) -> Result<()> {
        self.lock(&node.id)?;
        let inner = self.inner;
        inner.memory.add_node(self.txn()?, node)
    }

    pub(crate) fn update(&mut self, node: GraphNode) -> Result<()> {
        self.lock(&node.id)?;
        let inner = self.inner;
        inner.memory.update_node(self.txn()?, node)
    }

    pub(crate) fn remove(&mut self, id: &Identity, throw_if_not_exists: bool) -> Result<bool> {
        self.lock(id)?;
        let inner = self.inner;
        inner.memory.remove_node(self.txn()?, id, throw_if_not_exists)
    }

    /// Record a change in the innermost session
    pub(crate) fn track(&mut self, node: &GraphNode, state: TrackingState) {
        self.active.current.tracking.record(TrackedElement {
            id: node.id.clone(),
            schema_id: node.schema_id.clone(),
            kind: node.kind,
            state,
        });
    }

    /// Record a domain event unless the session is loading
    pub(crate) fn emit(&mut self, kind: EventKind) {
        if !self.active.is_loading() {
            self.active.current.events.push(kind);
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Store`]
///
/// ```ignore
/// let store = Store::builder()
///     .schema(schema)
///     .setting(Setting::MaxTimeBeforeDeadlockInMs, 500)
///     .build()?;
/// ```
pub struct StoreBuilder {
    config: StoreConfig,
    settings: Vec<(Setting, Value)>,
    schema: Option<Arc<Schema>>,
    id_generator: Option<Arc<dyn IdGenerator>>,
}

impl StoreBuilder {
    /// Builder with the default configuration
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
            settings: Vec::new(),
            schema: None,
            id_generator: None,
        }
    }

    /// Use a static configuration
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Override one live setting
    pub fn setting(mut self, setting: Setting, value: impl Into<Value>) -> Self {
        self.settings.push((setting, value.into()));
        self
    }

    /// Use `schema` (primitives only by default)
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    /// Share a schema with other stores
    pub fn shared_schema(mut self, schema: Arc<Schema>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Use `generator` for identities created without a key
    pub fn id_generator(mut self, generator: impl IdGenerator + 'static) -> Self {
        self.id_generator = Some(Arc::new(generator));
        self
    }

    /// Build the store
    ///
    /// # Errors
    ///
    /// `Config` if the configuration or a setting is invalid.
    pub fn build(self) -> Result<Store> {
        self.config.validate()?;
        let schema = self
            .schema
            .unwrap_or_else(|| Arc::new(Schema::with_primitives()));
        let id_generator = self
            .id_generator
            .unwrap_or_else(|| Arc::new(UuidIdGenerator));
        let store = Store::from_parts(self.config, schema, id_generator);
        for (setting, value) in self.settings {
            store.settings().set(setting, value)?;
        }
        Ok(store)
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
