//! Transactional memory store
//!
//! This crate holds the multi-version state of the graph:
//! - [`VersionChain`]: committed versions of one identity, oldest first
//! - [`Transaction`]: pending writes of one top-level session, one frame per
//!   nesting level, plus serializable read pins
//! - [`MemoryStore`]: DashMap of version chains with commit, rollback and
//!   version pruning

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod store;
pub mod transaction;

pub use chain::VersionChain;
pub use store::MemoryStore;
pub use transaction::{Transaction, WriteFrame};
