//! In-memory implementation of the DumpStore trait.
//!
//! Used for testing and ephemeral sessions where nothing should touch
//! disk. Supports write-failure injection so callers can exercise their
//! persistence retry paths.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use converge_core::{ConfigCategory, Identity, MessageHash};

use crate::dump::ConfigDump;
use crate::error::{Result, StoreError};
use crate::traits::DumpStore;

/// In-memory dump store backed by a RwLock'd map.
#[derive(Default)]
pub struct MemoryDumpStore {
    dumps: RwLock<HashMap<(ConfigCategory, Identity), ConfigDump>>,
    fail_writes: AtomicBool,
}

impl MemoryDumpStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until cleared.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Background(
                "write failure injected".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DumpStore for MemoryDumpStore {
    async fn save_dump(&self, dump: &ConfigDump) -> Result<()> {
        self.check_writable()?;
        let mut dumps = self.dumps.write().unwrap();
        dumps.insert((dump.category, dump.identity.clone()), dump.clone());
        Ok(())
    }

    async fn load_dump(
        &self,
        category: ConfigCategory,
        identity: &Identity,
    ) -> Result<Option<ConfigDump>> {
        let dumps = self.dumps.read().unwrap();
        Ok(dumps.get(&(category, identity.clone())).cloned())
    }

    async fn message_hashes(
        &self,
        category: ConfigCategory,
        identity: &Identity,
    ) -> Result<BTreeSet<MessageHash>> {
        let dumps = self.dumps.read().unwrap();
        Ok(dumps
            .get(&(category, identity.clone()))
            .map(|d| d.message_hashes.clone())
            .unwrap_or_default())
    }

    async fn replace_message_hashes(
        &self,
        category: ConfigCategory,
        identity: &Identity,
        hashes: &BTreeSet<MessageHash>,
        last_mutation_ms: i64,
    ) -> Result<()> {
        self.check_writable()?;
        let mut dumps = self.dumps.write().unwrap();
        let entry = dumps
            .entry((category, identity.clone()))
            .or_insert_with(|| ConfigDump {
                category,
                identity: identity.clone(),
                serialized_state: Bytes::new(),
                message_hashes: BTreeSet::new(),
                last_mutation_ms,
            });
        entry.message_hashes = hashes.clone();
        entry.last_mutation_ms = last_mutation_ms;
        Ok(())
    }

    async fn list_dumped(&self) -> Result<Vec<(ConfigCategory, Identity)>> {
        let dumps = self.dumps.read().unwrap();
        let mut pairs: Vec<_> = dumps.keys().cloned().collect();
        pairs.sort();
        Ok(pairs)
    }

    async fn delete_dump(&self, category: ConfigCategory, identity: &Identity) -> Result<bool> {
        self.check_writable()?;
        let mut dumps = self.dumps.write().unwrap();
        Ok(dumps.remove(&(category, identity.clone())).is_some())
    }
}
