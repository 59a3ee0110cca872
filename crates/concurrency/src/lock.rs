//! Lock kinds, resource tokens and acquire options

use hyperstore_core::{CancellationToken, Identity};
use std::time::Duration;

/// Kind of lock requested or held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// Concurrent readers
    Shared,
    /// Sole writer
    Exclusive,
    /// Sole holder that waits its turn and learns whether a previous holder
    /// already did the work
    ExclusiveWait,
}

impl LockKind {
    /// Check if two holders of these kinds can coexist
    pub fn compatible_with(self, other: LockKind) -> bool {
        self == LockKind::Shared && other == LockKind::Shared
    }

    /// Check if holding `self` makes a request for `requested` a no-op
    pub fn covers(self, requested: LockKind) -> bool {
        match self {
            LockKind::Exclusive => true,
            LockKind::ExclusiveWait => requested != LockKind::Exclusive,
            LockKind::Shared => requested == LockKind::Shared,
        }
    }

    /// Strongest of two kinds held by one session
    pub fn combine(self, other: LockKind) -> LockKind {
        match (self, other) {
            (LockKind::Exclusive, _) | (_, LockKind::Exclusive) => LockKind::Exclusive,
            (LockKind::ExclusiveWait, _) | (_, LockKind::ExclusiveWait) => LockKind::ExclusiveWait,
            _ => LockKind::Shared,
        }
    }

    /// Check if this kind excludes every other holder
    pub fn is_exclusive(self) -> bool {
        self != LockKind::Shared
    }
}

/// Resource a lock is keyed by
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockResource {
    /// A graph node
    Node(Identity),
    /// An arbitrary named token
    Named(String),
}

impl std::fmt::Display for LockResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockResource::Node(id) => write!(f, "{}", id),
            LockResource::Named(name) => write!(f, "#{}", name),
        }
    }
}

impl From<Identity> for LockResource {
    fn from(id: Identity) -> Self {
        LockResource::Node(id)
    }
}

impl From<&Identity> for LockResource {
    fn from(id: &Identity) -> Self {
        LockResource::Node(id.clone())
    }
}

impl From<&str> for LockResource {
    fn from(name: &str) -> Self {
        LockResource::Named(name.to_string())
    }
}

impl From<String> for LockResource {
    fn from(name: String) -> Self {
        LockResource::Named(name)
    }
}

/// Outcome of a successful acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockGrant {
    /// Lock granted
    Acquired,
    /// ExclusiveWait granted after another holder released it through a
    /// committed session while this caller waited
    AlreadyHandled,
}

impl LockGrant {
    /// Check if the caller should run its exclusive logic
    pub fn should_run(self) -> bool {
        self == LockGrant::Acquired
    }
}

/// Per-call acquire options
#[derive(Debug, Clone, Default)]
pub struct AcquireOptions {
    /// Maximum wait before the acquire fails as a deadlock
    /// (the manager default when `None`)
    pub timeout: Option<Duration>,
    /// Commit clock returned by `LockManager::open_snapshot`; exclusive
    /// commits on the resource after this tick make an exclusive acquire fail
    pub snapshot: Option<u64>,
    /// Token observed while waiting
    pub cancel: Option<CancellationToken>,
    /// Granularity of cancellation checks (the manager default when `None`)
    pub poll_interval: Option<Duration>,
}

impl AcquireOptions {
    /// Options with the manager defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the wait timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the serializable snapshot
    pub fn snapshot(mut self, seq: u64) -> Self {
        self.snapshot = Some(seq);
        self
    }

    /// Set the cancellation token
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Set the cancellation poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval.max(Duration::from_millis(1)));
        self
    }
}
