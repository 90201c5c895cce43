//! # Converge Store
//!
//! Dump persistence for the converge engine: one snapshot per
//! `(category, identity)` config container, carrying serialized state
//! and the relay message hashes the snapshot subsumes.
//!
//! ## Backends
//!
//! - [`SqliteDumpStore`]: the primary backend (rusqlite, bundled
//!   SQLite, spawn_blocking-wrapped).
//! - [`MemoryDumpStore`]: in-memory twin for tests, with write-failure
//!   injection.

pub mod dump;
pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use dump::{combine_hashes, split_hashes, ConfigDump, HASH_DELIMITER};
pub use error::{Result, StoreError};
pub use memory::MemoryDumpStore;
pub use sqlite::SqliteDumpStore;
pub use traits::DumpStore;
