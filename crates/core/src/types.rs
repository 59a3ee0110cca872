//! Core types shared by every layer of the store
//!
//! This module defines the small value types that cross crate boundaries:
//! - [`SessionId`]: Monotonically assigned identifier of a top-level session
//! - [`IsolationLevel`]: Visibility rule applied to reads inside a session
//! - [`CancellationToken`]: Cooperative cancellation flag carried by a session

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier of a session (transaction)
///
/// SessionId is used throughout the system to identify a unit of work:
/// - Lock ownership in the lock manager
/// - Pending write frames in the memory store
/// - Event correlation after commit
///
/// Nested sessions share the id of their outermost session, since locks and
/// pending versions belong to the whole transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw id
    pub const fn new(raw: u64) -> Self {
        SessionId(raw)
    }

    /// Raw numeric value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Allocator for session ids
///
/// Ids start at 1 and are never reused for the lifetime of the allocator.
#[derive(Debug, Default)]
pub struct SessionIdAllocator {
    next: AtomicU64,
}

impl SessionIdAllocator {
    /// Create a new allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id
    pub fn next_id(&self) -> SessionId {
        SessionId(self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Isolation level of a session
///
/// - `ReadCommitted`: every read observes the latest committed version at the
///   time of the read.
/// - `Serializable`: the first read of a resource pins the version visible for
///   the rest of the session, and writes fail if another session committed
///   the resource after the pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Always-latest-committed reads (default)
    #[default]
    ReadCommitted,
    /// Pinned snapshot reads plus write conflict detection
    Serializable,
}

impl IsolationLevel {
    /// Check if this is the serializable level
    pub fn is_serializable(&self) -> bool {
        matches!(self, IsolationLevel::Serializable)
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IsolationLevel::ReadCommitted => write!(f, "read-committed"),
            IsolationLevel::Serializable => write!(f, "serializable"),
        }
    }
}

/// Cooperative cancellation flag
///
/// Cloning shares the flag. Lock waits and the constraint pipeline poll it
/// and unwind through rollback when it is set.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the non-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
