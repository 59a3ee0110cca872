//! Lock manager for hyperstore sessions
//!
//! This crate serializes conflicting access to named resources:
//! - [`LockKind`]: Shared, Exclusive and ExclusiveWait locks
//! - [`LockManager`]: lock table with FIFO wait queues
//! - Deadlock detection by wait-for graph walk, with a timeout fallback
//! - Serializable conflict detection against a per-resource commit log

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lock;
pub mod manager;
pub mod wait_graph;

pub use lock::{AcquireOptions, LockGrant, LockKind, LockResource};
pub use manager::LockManager;
