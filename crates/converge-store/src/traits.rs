//! The dump persistence trait.

use std::collections::BTreeSet;

use async_trait::async_trait;

use converge_core::{ConfigCategory, Identity, MessageHash};

use crate::dump::ConfigDump;
use crate::error::Result;

/// Persistence abstraction for config dumps.
///
/// One logical row per `(category, identity)` pair. Saving a dump for a
/// pair that already has one replaces it atomically, so the store never
/// holds two snapshots of the same container.
///
/// Implementations must be safe to call from multiple tasks; the engine
/// never holds a container lock across any of these calls.
#[async_trait]
pub trait DumpStore: Send + Sync {
    /// Persist a dump, replacing any previous dump for the same pair.
    async fn save_dump(&self, dump: &ConfigDump) -> Result<()>;

    /// Load the dump for a pair, or `None` if never dumped.
    async fn load_dump(
        &self,
        category: ConfigCategory,
        identity: &Identity,
    ) -> Result<Option<ConfigDump>>;

    /// The subsumed message hashes recorded for a pair.
    ///
    /// Empty if the pair has never been dumped.
    async fn message_hashes(
        &self,
        category: ConfigCategory,
        identity: &Identity,
    ) -> Result<BTreeSet<MessageHash>>;

    /// Replace the recorded hash set without touching the dumped state.
    ///
    /// Used when a merge absorbed new relay messages but produced no
    /// state change worth re-dumping. Creates the row with empty state
    /// if the pair has never been dumped.
    async fn replace_message_hashes(
        &self,
        category: ConfigCategory,
        identity: &Identity,
        hashes: &BTreeSet<MessageHash>,
        last_mutation_ms: i64,
    ) -> Result<()>;

    /// All `(category, identity)` pairs with a stored dump.
    async fn list_dumped(&self) -> Result<Vec<(ConfigCategory, Identity)>>;

    /// Delete the dump for a pair. Returns whether a row existed.
    async fn delete_dump(&self, category: ConfigCategory, identity: &Identity) -> Result<bool>;
}
