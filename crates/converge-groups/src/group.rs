//! Closed-group entities: membership and the group key history.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use converge_core::Identity;

/// One symmetric-epoch key pair in a group's key history.
///
/// Multiple pairs coexist so messages encrypted under a prior epoch
/// stay readable; the newest pair (by received timestamp) is the one
/// used for new encryption. Pairs are never deleted individually —
/// only the full history is cleared when the local user leaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupKeyPair {
    pub public: [u8; 32],
    pub secret: [u8; 32],
    /// When this device learned the pair (local wall clock, ms).
    pub received_at_ms: i64,
}

impl GroupKeyPair {
    /// Generate a fresh key pair for a new epoch.
    pub fn generate(received_at_ms: i64) -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        let public = PublicKey::from(&secret);
        Self {
            public: *public.as_bytes(),
            secret: secret.to_bytes(),
            received_at_ms,
        }
    }

    /// Key-material equality, ignoring the local receipt timestamp.
    ///
    /// Two devices learn the same pair at different times; the pair is
    /// still the same epoch.
    pub fn same_material(&self, other: &GroupKeyPair) -> bool {
        self.public == other.public && self.secret == other.secret
    }
}

/// A group member's public material and role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    /// X25519 public half, used to wrap key shares to this member.
    pub exchange_public: [u8; 32],
    pub admin: bool,
}

/// A closed group the local user belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedGroup {
    /// The group's public identity (also its relay address).
    pub id: Identity,
    pub name: String,
    pub members: BTreeMap<Identity, GroupMember>,
    /// Wall-clock ms when the group was formed. Control messages
    /// timestamped before this are stale.
    pub formed_at_ms: i64,
    /// Epoch key history, oldest first.
    pub key_pairs: Vec<GroupKeyPair>,
}

impl ClosedGroup {
    pub fn new(id: Identity, name: impl Into<String>, formed_at_ms: i64) -> Self {
        Self {
            id,
            name: name.into(),
            members: BTreeMap::new(),
            formed_at_ms,
            key_pairs: Vec::new(),
        }
    }

    pub fn is_member(&self, identity: &Identity) -> bool {
        self.members.contains_key(identity)
    }

    pub fn is_admin(&self, identity: &Identity) -> bool {
        self.members.get(identity).map(|m| m.admin).unwrap_or(false)
    }

    /// The admins currently in the group.
    pub fn admins(&self) -> impl Iterator<Item = &Identity> {
        self.members
            .iter()
            .filter(|(_, m)| m.admin)
            .map(|(id, _)| id)
    }

    pub fn admin_count(&self) -> usize {
        self.members.values().filter(|m| m.admin).count()
    }

    /// The newest key pair, authoritative for new encryption.
    pub fn latest_key_pair(&self) -> Option<&GroupKeyPair> {
        self.key_pairs.iter().max_by_key(|kp| kp.received_at_ms)
    }

    /// Add a key pair to the history. Returns whether it was new;
    /// a pair already present by key material is a no-op.
    pub fn add_key_pair(&mut self, pair: GroupKeyPair) -> bool {
        if self.key_pairs.iter().any(|kp| kp.same_material(&pair)) {
            return false;
        }
        self.key_pairs.push(pair);
        true
    }

    /// Drop the entire key history. Used on local departure only.
    pub fn clear_key_pairs(&mut self) {
        self.key_pairs.clear();
    }
}
