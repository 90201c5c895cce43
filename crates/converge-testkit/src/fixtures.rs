//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use converge_core::{
    CategoryConfig, ConfigCategory, ConfigCodec, Identity, IdentityKeys, MessageHash,
    WireConfigMessage,
};
use converge_engine::{EngineEvent, ReconciliationEngine};
use converge_groups::{ClosedGroup, GroupKeyPair, GroupMember};
use converge_store::MemoryDumpStore;

/// A test account: deterministic keys plus an in-memory dump store.
pub struct TestAccount {
    pub seed: [u8; 32],
    pub keys: IdentityKeys,
    pub store: Arc<MemoryDumpStore>,
}

impl TestAccount {
    /// Create with a deterministic keypair from a seed byte.
    pub fn with_seed(seed: u8) -> Self {
        let seed = [seed; 32];
        Self {
            seed,
            keys: IdentityKeys::from_seed(&seed),
            store: Arc::new(MemoryDumpStore::new()),
        }
    }

    pub fn identity(&self) -> Identity {
        self.keys.identity()
    }

    /// Build an engine over this account's store.
    pub fn engine(&self) -> ReconciliationEngine {
        ReconciliationEngine::new(IdentityKeys::from_seed(&self.seed), self.store.clone())
    }

    /// Build an engine with an attached event channel.
    pub fn engine_with_events(
        &self,
    ) -> (ReconciliationEngine, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.engine().with_events(tx), rx)
    }
}

/// Produce a wire delta by editing a fresh container.
///
/// This is how a peer device's push payload looks on the wire.
pub fn delta_for(category: ConfigCategory, edit: impl FnOnce(&mut CategoryConfig)) -> Vec<u8> {
    let mut config = CategoryConfig::new(category);
    edit(&mut config);
    config
        .produce_push()
        .map(|push| push.payload)
        .unwrap_or_default()
}

/// Wrap a delta payload as a fetched wire message.
pub fn wire_message(
    category: ConfigCategory,
    sent_timestamp_ms: i64,
    server_hash: &str,
    payload: Vec<u8>,
    seq_no: u64,
) -> WireConfigMessage {
    WireConfigMessage::new(
        category,
        sent_timestamp_ms,
        MessageHash::new(server_hash),
        Bytes::from(payload),
        seq_no,
    )
}

/// Build a group from `(keys, admin)` members with one initial epoch.
pub fn group_of(
    id: &str,
    name: &str,
    members: &[(&IdentityKeys, bool)],
    formed_at_ms: i64,
) -> ClosedGroup {
    let mut group = ClosedGroup::new(Identity::new(id), name, formed_at_ms);
    for (keys, admin) in members {
        group.members.insert(
            keys.identity(),
            GroupMember {
                exchange_public: keys.exchange_public(),
                admin: *admin,
            },
        );
    }
    group.add_key_pair(GroupKeyPair::generate(formed_at_ms));
    group
}
