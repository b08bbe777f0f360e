//! Storage abstraction and implementations for the skill lifecycle.
//!
//! This crate provides a trait-based storage interface with in-memory and
//! JSON-file implementations, plus an optional SQLite backend, and the
//! read-only port through which closed decisions are consumed.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory;
pub mod json_storage;
pub mod feed;

#[cfg(feature = "sqlite")]
pub mod sqlite_storage;

pub use trait_::{AppliedOutcome, BucketCommit, Result, Storage, StorageError};
pub use memory::MemoryStorage;
pub use json_storage::JsonStorage;
pub use feed::{DecisionFeed, StaticDecisionFeed};

#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStorage;
