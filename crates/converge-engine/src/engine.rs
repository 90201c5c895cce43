//! The reconciliation engine: merge, dump, and push cycles.
//!
//! Incoming wire messages are grouped by category, merged in fixed
//! priority order, run through a per-category reducer, then persisted
//! according to the codec's dirtiness predicates. Local edits enter
//! the same handles directly and flow into the same push/dump
//! decision point.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use converge_core::{
    CategoryConfig, ConfigCategory, ConfigCodec, Identity, IdentityKeys, MessageHash,
    WireConfigMessage,
};
use converge_groups::{apply_control, ClosedGroup, GroupControlMessage, RotationOutcome};
use converge_store::{ConfigDump, DumpStore};

use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::push::OutgoingPushResult;
use crate::state_store::{lock_handle, ConfigHandle, ConfigStateStore};

/// Drives the full reconciliation cycle for one account.
///
/// Safe to invoke concurrently from UI actions, poll completions, and
/// timers: handle locks cover single operations only, and no lock is
/// held across store or transport I/O.
pub struct ReconciliationEngine {
    keys: IdentityKeys,
    local: Identity,
    state: ConfigStateStore,
    store: Arc<dyn DumpStore>,
    groups: Mutex<HashMap<Identity, ClosedGroup>>,
    /// Hash unions a failed store write left unrecorded. Folded into
    /// every later write for the pair, so the stored set always covers
    /// the messages captured in the serialized state.
    unstored_hashes: Mutex<HashMap<(ConfigCategory, Identity), BTreeSet<MessageHash>>>,
    push_scheduled: AtomicBool,
    events: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl ReconciliationEngine {
    pub fn new(keys: IdentityKeys, store: Arc<dyn DumpStore>) -> Self {
        let local = keys.identity();
        Self {
            keys,
            local,
            state: ConfigStateStore::new(),
            store,
            groups: Mutex::new(HashMap::new()),
            unstored_hashes: Mutex::new(HashMap::new()),
            push_scheduled: AtomicBool::new(false),
            events: None,
        }
    }

    /// Attach an event sink. Events are fire-and-forget; a dropped
    /// receiver never blocks the engine.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn local_identity(&self) -> &Identity {
        &self.local
    }

    /// Install a group the account belongs to.
    pub fn register_group(&self, group: ClosedGroup) {
        let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        groups.insert(group.id.clone(), group);
    }

    /// Snapshot of one group's state.
    pub fn group(&self, id: &Identity) -> Option<ClosedGroup> {
        let groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        groups.get(id).cloned()
    }

    // ─── Incoming path ───────────────────────────────────────────────

    /// Merge a batch of fetched wire messages for one identity.
    ///
    /// Categories are processed in fixed priority order; a failure in
    /// one category is logged and never aborts its siblings.
    pub async fn handle_incoming(
        &self,
        identity: &Identity,
        messages: Vec<WireConfigMessage>,
    ) -> Result<()> {
        identity
            .require_non_empty()
            .map_err(|_| EngineError::EmptyIdentity)?;
        if messages.is_empty() {
            return Ok(());
        }

        let mut by_category: HashMap<ConfigCategory, Vec<WireConfigMessage>> = HashMap::new();
        for message in messages {
            by_category.entry(message.kind).or_default().push(message);
        }

        let mut any_needs_push = false;
        for category in ConfigCategory::in_priority_order() {
            let Some(batch) = by_category.remove(&category) else {
                continue;
            };
            match self.process_category(category, identity, batch).await {
                Ok(needs_push) => any_needs_push |= needs_push,
                Err(e) => {
                    tracing::warn!(
                        %category,
                        %identity,
                        error = %e,
                        "category processing failed, continuing with siblings"
                    );
                }
            }
        }

        if any_needs_push {
            self.schedule_push();
        }
        Ok(())
    }

    /// Merge one category's message group and persist the result.
    async fn process_category(
        &self,
        category: ConfigCategory,
        identity: &Identity,
        messages: Vec<WireConfigMessage>,
    ) -> Result<bool> {
        let handle = self.load_handle(category, identity).await?;

        let deltas: Vec<Bytes> = messages.iter().map(|m| m.payload.clone()).collect();
        let new_hashes: BTreeSet<MessageHash> =
            messages.iter().map(|m| m.server_hash.clone()).collect();
        let latest_sent = messages
            .iter()
            .map(|m| m.sent_timestamp_ms)
            .max()
            .unwrap_or(0);

        let outcome = {
            let mut config = lock_handle(&handle)?;
            config.merge_incoming(&deltas).map_err(|e| EngineError::Merge {
                category,
                reason: e.to_string(),
            })?
        };

        self.run_reducer(category, identity, &handle).await?;

        // Hash bookkeeping: the stored set only ever grows here; a
        // confirmed push is what trims it. Unstored leftovers from a
        // failed write ride along until they land.
        let prior = self.store.message_hashes(category, identity).await?;
        let mut all = prior.clone();
        all.extend(self.unstored_for(category, identity));
        all.extend(new_hashes);
        let changed = all != prior;

        let dumped = {
            let mut config = lock_handle(&handle)?;
            if config.needs_dump() {
                config.produce_dump()
            } else {
                None
            }
        };

        if let Some(state) = dumped {
            let dump = ConfigDump {
                category,
                identity: identity.clone(),
                serialized_state: Bytes::from(state),
                message_hashes: all,
                last_mutation_ms: latest_sent,
            };
            match self.store.save_dump(&dump).await {
                Ok(()) => {
                    lock_handle(&handle)?.confirm_dumped();
                    self.clear_unstored(category, identity);
                }
                Err(e) => {
                    // Dirty flag stays set and the batch's hashes are
                    // kept aside; a later cycle persists both.
                    self.stash_unstored(category, identity, dump.message_hashes.clone());
                    tracing::warn!(%category, %identity, error = %e, "dump persist failed");
                }
            }
        } else if changed {
            if let Err(e) = self
                .store
                .replace_message_hashes(category, identity, &all, latest_sent)
                .await
            {
                self.stash_unstored(category, identity, all);
                return Err(e.into());
            }
            self.clear_unstored(category, identity);
        }

        if outcome.merged > 0 {
            self.emit(EngineEvent::CategoryUpdated {
                category,
                identity: identity.clone(),
            });
        }

        let needs_push = lock_handle(&handle)?.needs_push();
        Ok(needs_push)
    }

    /// Category-specific post-merge reconciliation.
    ///
    /// Only UserGroups has durable side effects: the groups map is
    /// reconciled against the merged membership state, tearing down
    /// groups the local user no longer belongs to.
    async fn run_reducer(
        &self,
        category: ConfigCategory,
        identity: &Identity,
        handle: &ConfigHandle,
    ) -> Result<()> {
        if category != ConfigCategory::UserGroups || *identity != self.local {
            return Ok(());
        }

        let current_ids: BTreeSet<Identity> = {
            let config = lock_handle(handle)?;
            config
                .as_user_groups()
                .map(|g| g.group_ids().into_iter().collect())
                .unwrap_or_default()
        };

        let stale: Vec<Identity> = {
            let groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
            groups
                .keys()
                .filter(|id| !current_ids.contains(id))
                .cloned()
                .collect()
        };

        for id in stale {
            self.teardown_group(&id).await?;
        }
        Ok(())
    }

    // ─── Group control path ──────────────────────────────────────────

    /// Apply a group control message, driving key rotation.
    ///
    /// Returns the outcome so the caller can submit any key
    /// distributions as transport operations. A disband outcome has
    /// already torn the local group state down.
    pub async fn handle_group_control(
        &self,
        group_id: &Identity,
        sender: &Identity,
        sent_timestamp_ms: i64,
        message: &GroupControlMessage,
        now_ms: i64,
    ) -> Result<RotationOutcome> {
        let outcome = {
            let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
            let group = groups
                .get_mut(group_id)
                .ok_or_else(|| EngineError::IdentityUnknown(group_id.clone()))?;
            apply_control(
                group,
                &self.local,
                &self.keys,
                sender,
                sent_timestamp_ms,
                message,
                now_ms,
            )?
        };

        if outcome.disbanded {
            self.teardown_group(group_id).await?;
        } else if outcome.needs_push {
            // Rotation must reach the other devices: flag the local
            // UserGroups handle and schedule a push cycle.
            let handle = self
                .load_handle(ConfigCategory::UserGroups, &self.local)
                .await?;
            lock_handle(&handle)?.mark_needs_push();
            self.schedule_push();
        }

        Ok(outcome)
    }

    /// Tear down all local state for a group.
    async fn teardown_group(&self, group_id: &Identity) -> Result<()> {
        {
            let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
            groups.remove(group_id);
        }

        for category in ConfigCategory::in_priority_order() {
            self.state.remove(category, group_id);
            self.clear_unstored(category, group_id);
            self.store.delete_dump(category, group_id).await?;
        }

        tracing::info!(group = %group_id, "group state torn down");
        self.emit(EngineEvent::GroupDisbanded {
            group: group_id.clone(),
        });
        Ok(())
    }

    // ─── Local edit path ─────────────────────────────────────────────

    /// Apply a local edit to a config container.
    ///
    /// Loads the handle if needed, runs the closure under its lock,
    /// then schedules a push if the edit left unsynced state.
    pub async fn with_config<T>(
        &self,
        category: ConfigCategory,
        identity: &Identity,
        f: impl FnOnce(&mut CategoryConfig) -> T,
    ) -> Result<T> {
        identity
            .require_non_empty()
            .map_err(|_| EngineError::EmptyIdentity)?;
        let handle = self.load_handle(category, identity).await?;

        let (value, needs_push) = {
            let mut config = lock_handle(&handle)?;
            let value = f(&mut config);
            (value, config.needs_push())
        };

        if needs_push {
            self.schedule_push();
        }
        self.emit(EngineEvent::CategoryUpdated {
            category,
            identity: identity.clone(),
        });
        Ok(value)
    }

    // ─── Outgoing path ───────────────────────────────────────────────

    /// Collect every pending push for the local identity.
    ///
    /// Starts from the persisted set of dumped pairs, unioned with all
    /// categories for the local identity so a fresh install still
    /// attempts an initial push.
    pub async fn compute_pending_pushes(
        &self,
        identity: &Identity,
    ) -> Result<Vec<OutgoingPushResult>> {
        identity
            .require_non_empty()
            .map_err(|_| EngineError::EmptyIdentity)?;
        if *identity != self.local {
            return Err(EngineError::IdentityUnknown(identity.clone()));
        }

        // The scheduled cycle is now running; later mutations may
        // schedule a fresh one.
        self.push_scheduled.store(false, Ordering::SeqCst);

        let mut pairs: BTreeSet<(ConfigCategory, Identity)> =
            self.store.list_dumped().await?.into_iter().collect();
        for category in ConfigCategory::in_priority_order() {
            pairs.insert((category, identity.clone()));
            // Loaded-but-never-dumped state (e.g. fresh group volatile
            // edits) must still reach the relay.
            for loaded in self.state.loaded_identities(category) {
                pairs.insert((category, loaded));
            }
        }

        let mut results = Vec::new();
        for (category, destination) in pairs {
            let Some(handle) = self.state.get(category, &destination) else {
                continue;
            };
            let pending = {
                let mut config = lock_handle(&handle)?;
                if config.needs_push() {
                    config.produce_push()
                } else {
                    None
                }
            };
            let Some(push) = pending else {
                continue;
            };

            let mut obsolete = self.store.message_hashes(category, &destination).await?;
            obsolete.extend(self.unstored_for(category, &destination));
            results.push(OutgoingPushResult {
                category,
                namespace: category.namespace(),
                seq_no: push.seq_no,
                payload: push.payload,
                destination,
                obsolete_message_hashes: obsolete,
            });
        }
        Ok(results)
    }

    /// Confirm a push the transport accepted.
    ///
    /// Returns whether the handle now needs a fresh dump. An absent
    /// handle means the state is already gone (e.g. group departure);
    /// that is treated as already-acknowledged, not an error.
    pub async fn mark_pushed(&self, result: &OutgoingPushResult) -> Result<bool> {
        let Some(handle) = self.state.get(result.category, &result.destination) else {
            return Ok(false);
        };

        let mut config = lock_handle(&handle)?;
        config.confirm_pushed(result.seq_no);
        Ok(config.needs_dump())
    }

    /// Persist a dirty handle's state.
    ///
    /// `replacement_hashes` trims the stored hash set (the usual case
    /// after a confirmed push: only the new push's server hash remains
    /// relevant); `None` keeps the previously stored set plus any
    /// hashes an earlier failed write left unrecorded.
    pub async fn persist_if_dirty(
        &self,
        category: ConfigCategory,
        identity: &Identity,
        replacement_hashes: Option<BTreeSet<MessageHash>>,
    ) -> Result<bool> {
        let Some(handle) = self.state.get(category, identity) else {
            return Ok(false);
        };

        let dumped = {
            let mut config = lock_handle(&handle)?;
            if config.needs_dump() {
                config.produce_dump()
            } else {
                None
            }
        };
        let Some(state) = dumped else {
            return Ok(false);
        };

        let hashes = match replacement_hashes {
            Some(hashes) => hashes,
            None => {
                let mut stored = self.store.message_hashes(category, identity).await?;
                stored.extend(self.unstored_for(category, identity));
                stored
            }
        };

        let dump = ConfigDump {
            category,
            identity: identity.clone(),
            serialized_state: Bytes::from(state),
            message_hashes: hashes,
            last_mutation_ms: now_millis(),
        };
        if let Err(e) = self.store.save_dump(&dump).await {
            self.stash_unstored(category, identity, dump.message_hashes.clone());
            return Err(e.into());
        }
        lock_handle(&handle)?.confirm_dumped();
        self.clear_unstored(category, identity);
        Ok(true)
    }

    // ─── Shared plumbing ─────────────────────────────────────────────

    /// Get the loaded handle for a pair, loading from the dump store
    /// on a miss. A corrupt cached dump falls back to empty state.
    async fn load_handle(
        &self,
        category: ConfigCategory,
        identity: &Identity,
    ) -> Result<ConfigHandle> {
        if let Some(handle) = self.state.get(category, identity) {
            return Ok(handle);
        }

        let cached = self.store.load_dump(category, identity).await?;
        let config = match cached {
            Some(dump) => match CategoryConfig::from_dump(category, &dump.serialized_state) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(
                        %category,
                        %identity,
                        error = %e,
                        "corrupt cached dump, reinitializing empty state"
                    );
                    CategoryConfig::new(category)
                }
            },
            None => CategoryConfig::new(category),
        };

        self.state.get_or_insert(category, identity, config)
    }

    fn unstored_for(&self, category: ConfigCategory, identity: &Identity) -> BTreeSet<MessageHash> {
        let unstored = self.unstored_hashes.lock().unwrap_or_else(|e| e.into_inner());
        unstored
            .get(&(category, identity.clone()))
            .cloned()
            .unwrap_or_default()
    }

    fn stash_unstored(
        &self,
        category: ConfigCategory,
        identity: &Identity,
        hashes: BTreeSet<MessageHash>,
    ) {
        if hashes.is_empty() {
            return;
        }
        let mut unstored = self.unstored_hashes.lock().unwrap_or_else(|e| e.into_inner());
        unstored
            .entry((category, identity.clone()))
            .or_default()
            .extend(hashes);
    }

    fn clear_unstored(&self, category: ConfigCategory, identity: &Identity) {
        let mut unstored = self.unstored_hashes.lock().unwrap_or_else(|e| e.into_inner());
        unstored.remove(&(category, identity.clone()));
    }

    /// Flag that a push cycle is needed. Idempotent: scheduling twice
    /// before the cycle runs emits a single event.
    fn schedule_push(&self) {
        if !self.push_scheduled.swap(true, Ordering::SeqCst) {
            self.emit(EngineEvent::PushNeeded);
        }
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}
