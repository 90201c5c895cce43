//! The in-memory map of loaded config handles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use converge_core::{CategoryConfig, ConfigCategory, Identity};

use crate::error::{EngineError, Result};

/// A loaded config container behind its exclusive lock.
///
/// Lock scope is a single operation; the lock is never held across
/// dump persistence or transport calls.
pub type ConfigHandle = Arc<Mutex<CategoryConfig>>;

/// Lock a handle, mapping poison to an engine error.
pub fn lock_handle(handle: &ConfigHandle) -> Result<MutexGuard<'_, CategoryConfig>> {
    handle.lock().map_err(|_| EngineError::HandlePoisoned)
}

/// Owns the `(category, identity) → handle` mapping.
///
/// The map lock is short-held and disjoint from individual handle
/// locks, so unrelated categories never serialize behind one another.
#[derive(Default)]
pub struct ConfigStateStore {
    handles: Mutex<HashMap<(ConfigCategory, Identity), ConfigHandle>>,
}

impl ConfigStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The existing handle for a pair; never creates.
    pub fn get(&self, category: ConfigCategory, identity: &Identity) -> Option<ConfigHandle> {
        let handles = self.handles.lock().ok()?;
        handles.get(&(category, identity.clone())).cloned()
    }

    /// Construct a handle from a cached dump, or empty state if absent.
    ///
    /// Replaces any existing handle for the pair; intended for startup.
    /// Fails with [`EngineError::ConfigInit`] if the codec rejects the
    /// cached bytes — the caller falls back to empty state and logs.
    pub fn load(
        &self,
        category: ConfigCategory,
        identity: &Identity,
        cached_dump: Option<&[u8]>,
    ) -> Result<ConfigHandle> {
        let config = match cached_dump {
            Some(bytes) => CategoryConfig::from_dump(category, bytes)
                .map_err(|e| EngineError::ConfigInit(e.to_string()))?,
            None => CategoryConfig::new(category),
        };

        let handle = Arc::new(Mutex::new(config));
        let mut handles = self.handles.lock().map_err(|_| EngineError::HandlePoisoned)?;
        handles.insert((category, identity.clone()), handle.clone());
        Ok(handle)
    }

    /// Get the handle for a pair, installing the given state on a miss.
    ///
    /// If another task installed a handle concurrently, that handle
    /// wins and the given state is discarded.
    pub fn get_or_insert(
        &self,
        category: ConfigCategory,
        identity: &Identity,
        config: CategoryConfig,
    ) -> Result<ConfigHandle> {
        let mut handles = self.handles.lock().map_err(|_| EngineError::HandlePoisoned)?;
        let handle = handles
            .entry((category, identity.clone()))
            .or_insert_with(|| Arc::new(Mutex::new(config)));
        Ok(handle.clone())
    }

    /// Forcibly discard a handle, returning the pair to Unloaded.
    pub fn remove(&self, category: ConfigCategory, identity: &Identity) -> Option<ConfigHandle> {
        let mut handles = self.handles.lock().ok()?;
        handles.remove(&(category, identity.clone()))
    }

    /// All identities with a loaded handle for the given category.
    pub fn loaded_identities(&self, category: ConfigCategory) -> Vec<Identity> {
        match self.handles.lock() {
            Ok(handles) => handles
                .keys()
                .filter(|(c, _)| *c == category)
                .map(|(_, id)| id.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
