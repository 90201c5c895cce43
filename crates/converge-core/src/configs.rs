//! Typed category configs over the LWW register map.
//!
//! Each category gets a thin typed surface over [`LwwMap`]; field names
//! are stable wire identifiers, so two devices editing the same logical
//! field contend on the same register. [`CategoryConfig`] is the
//! exhaustive union the engine holds per (category, identity) pair.

use bytes::Bytes;

use crate::category::ConfigCategory;
use crate::codec::{ConfigCodec, MergeOutcome, PendingPush};
use crate::error::Result;
use crate::identity::Identity;
use crate::lww::{FieldValue, LwwMap};

/// The local user's profile: display name and avatar.
#[derive(Debug, Clone, Default)]
pub struct UserProfileConfig {
    map: LwwMap,
}

impl UserProfileConfig {
    pub fn display_name(&self) -> Option<&str> {
        self.map.get("profile/name").and_then(FieldValue::as_text)
    }

    pub fn set_display_name(&mut self, name: &str, now_ms: i64) {
        self.map
            .set("profile/name", FieldValue::Text(name.to_string()), now_ms);
    }

    pub fn avatar_url(&self) -> Option<&str> {
        self.map
            .get("profile/avatar_url")
            .and_then(FieldValue::as_text)
    }

    /// Avatar pointer: where the encrypted avatar lives, and the key
    /// needed to decrypt it. Set together so a merge can never pair a
    /// URL with the wrong key — both registers carry the same timestamp.
    pub fn set_avatar(&mut self, url: &str, key: &[u8], now_ms: i64) {
        self.map
            .set("profile/avatar_url", FieldValue::Text(url.to_string()), now_ms);
        self.map
            .set("profile/avatar_key", FieldValue::Bytes(key.to_vec()), now_ms);
    }

    pub fn avatar_key(&self) -> Option<&[u8]> {
        self.map
            .get("profile/avatar_key")
            .and_then(FieldValue::as_bytes)
    }
}

/// The contact list: per-contact names and moderation flags.
#[derive(Debug, Clone, Default)]
pub struct ContactsConfig {
    map: LwwMap,
}

impl ContactsConfig {
    fn key(contact: &Identity, field: &str) -> String {
        format!("contact/{}/{}", contact.as_str(), field)
    }

    pub fn name(&self, contact: &Identity) -> Option<&str> {
        self.map
            .get(&Self::key(contact, "name"))
            .and_then(FieldValue::as_text)
    }

    pub fn set_name(&mut self, contact: &Identity, name: &str, now_ms: i64) {
        self.map.set(
            &Self::key(contact, "name"),
            FieldValue::Text(name.to_string()),
            now_ms,
        );
    }

    pub fn nickname(&self, contact: &Identity) -> Option<&str> {
        self.map
            .get(&Self::key(contact, "nickname"))
            .and_then(FieldValue::as_text)
    }

    pub fn set_nickname(&mut self, contact: &Identity, nickname: &str, now_ms: i64) {
        self.map.set(
            &Self::key(contact, "nickname"),
            FieldValue::Text(nickname.to_string()),
            now_ms,
        );
    }

    pub fn is_approved(&self, contact: &Identity) -> bool {
        self.map
            .get(&Self::key(contact, "approved"))
            .and_then(FieldValue::as_bool)
            .unwrap_or(false)
    }

    pub fn set_approved(&mut self, contact: &Identity, approved: bool, now_ms: i64) {
        self.map.set(
            &Self::key(contact, "approved"),
            FieldValue::Bool(approved),
            now_ms,
        );
    }

    pub fn is_blocked(&self, contact: &Identity) -> bool {
        self.map
            .get(&Self::key(contact, "blocked"))
            .and_then(FieldValue::as_bool)
            .unwrap_or(false)
    }

    pub fn set_blocked(&mut self, contact: &Identity, blocked: bool, now_ms: i64) {
        self.map.set(
            &Self::key(contact, "blocked"),
            FieldValue::Bool(blocked),
            now_ms,
        );
    }

    /// Remove a contact entirely.
    pub fn remove(&mut self, contact: &Identity, now_ms: i64) {
        for field in ["name", "nickname", "approved", "blocked"] {
            self.map.remove(&Self::key(contact, field), now_ms);
        }
    }

    /// All contacts with at least one live field.
    pub fn contact_ids(&self) -> Vec<Identity> {
        let mut ids: Vec<Identity> = self
            .map
            .keys_with_prefix("contact/")
            .filter_map(|key| key.strip_prefix("contact/"))
            .filter_map(|rest| rest.split('/').next())
            .map(Identity::from)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Per-conversation volatile info: read markers and unread flags.
#[derive(Debug, Clone, Default)]
pub struct ConvoVolatileConfig {
    map: LwwMap,
}

impl ConvoVolatileConfig {
    fn key(convo: &Identity, field: &str) -> String {
        format!("convo/{}/{}", convo.as_str(), field)
    }

    pub fn last_read(&self, convo: &Identity) -> Option<i64> {
        self.map
            .get(&Self::key(convo, "last_read"))
            .and_then(FieldValue::as_int)
    }

    /// Advance the read marker. Regressions are dropped locally: a read
    /// marker only ever moves forward.
    pub fn set_last_read(&mut self, convo: &Identity, read_up_to_ms: i64, now_ms: i64) {
        if let Some(existing) = self.last_read(convo) {
            if read_up_to_ms <= existing {
                return;
            }
        }
        self.map.set(
            &Self::key(convo, "last_read"),
            FieldValue::Int(read_up_to_ms),
            now_ms,
        );
    }

    pub fn is_unread(&self, convo: &Identity) -> bool {
        self.map
            .get(&Self::key(convo, "unread"))
            .and_then(FieldValue::as_bool)
            .unwrap_or(false)
    }

    pub fn set_unread(&mut self, convo: &Identity, unread: bool, now_ms: i64) {
        self.map
            .set(&Self::key(convo, "unread"), FieldValue::Bool(unread), now_ms);
    }
}

/// Closed groups the local user belongs to, keyed by group identity.
///
/// Holds the group seed (from which the group's identity keys derive),
/// the display name, and the join time.
#[derive(Debug, Clone, Default)]
pub struct UserGroupsConfig {
    map: LwwMap,
}

impl UserGroupsConfig {
    fn key(group: &Identity, field: &str) -> String {
        format!("group/{}/{}", group.as_str(), field)
    }

    pub fn group_seed(&self, group: &Identity) -> Option<&[u8]> {
        self.map
            .get(&Self::key(group, "seed"))
            .and_then(FieldValue::as_bytes)
    }

    pub fn group_name(&self, group: &Identity) -> Option<&str> {
        self.map
            .get(&Self::key(group, "name"))
            .and_then(FieldValue::as_text)
    }

    pub fn joined_at(&self, group: &Identity) -> Option<i64> {
        self.map
            .get(&Self::key(group, "joined_at"))
            .and_then(FieldValue::as_int)
    }

    pub fn set_group(&mut self, group: &Identity, name: &str, seed: &[u8], now_ms: i64) {
        self.map
            .set(&Self::key(group, "seed"), FieldValue::Bytes(seed.to_vec()), now_ms);
        self.map.set(
            &Self::key(group, "name"),
            FieldValue::Text(name.to_string()),
            now_ms,
        );
        self.map
            .set(&Self::key(group, "joined_at"), FieldValue::Int(now_ms), now_ms);
    }

    /// Drop a group after departure or disbanding.
    pub fn remove_group(&mut self, group: &Identity, now_ms: i64) {
        for field in ["seed", "name", "joined_at"] {
            self.map.remove(&Self::key(group, field), now_ms);
        }
    }

    pub fn group_ids(&self) -> Vec<Identity> {
        let mut ids: Vec<Identity> = self
            .map
            .keys_with_prefix("group/")
            .filter_map(|key| key.strip_prefix("group/"))
            .filter_map(|rest| rest.split('/').next())
            .map(Identity::from)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Tagged union over the four category configs.
///
/// The engine stores one of these per (category, identity) handle and
/// drives it exclusively through [`ConfigCodec`]; reducers downcast via
/// the `as_*` accessors under the handle lock.
#[derive(Debug, Clone)]
pub enum CategoryConfig {
    UserProfile(UserProfileConfig),
    Contacts(ContactsConfig),
    ConvoVolatile(ConvoVolatileConfig),
    UserGroups(UserGroupsConfig),
}

impl CategoryConfig {
    /// Initialize empty state for a category.
    pub fn new(category: ConfigCategory) -> Self {
        match category {
            ConfigCategory::UserProfile => Self::UserProfile(UserProfileConfig::default()),
            ConfigCategory::Contacts => Self::Contacts(ContactsConfig::default()),
            ConfigCategory::ConvoVolatile => Self::ConvoVolatile(ConvoVolatileConfig::default()),
            ConfigCategory::UserGroups => Self::UserGroups(UserGroupsConfig::default()),
        }
    }

    /// Restore a category's state from a persisted dump.
    pub fn from_dump(category: ConfigCategory, bytes: &[u8]) -> Result<Self> {
        let map = LwwMap::from_dump(bytes)?;
        Ok(match category {
            ConfigCategory::UserProfile => Self::UserProfile(UserProfileConfig { map }),
            ConfigCategory::Contacts => Self::Contacts(ContactsConfig { map }),
            ConfigCategory::ConvoVolatile => Self::ConvoVolatile(ConvoVolatileConfig { map }),
            ConfigCategory::UserGroups => Self::UserGroups(UserGroupsConfig { map }),
        })
    }

    /// The category this state belongs to.
    pub fn category(&self) -> ConfigCategory {
        match self {
            Self::UserProfile(_) => ConfigCategory::UserProfile,
            Self::Contacts(_) => ConfigCategory::Contacts,
            Self::ConvoVolatile(_) => ConfigCategory::ConvoVolatile,
            Self::UserGroups(_) => ConfigCategory::UserGroups,
        }
    }

    fn map(&self) -> &LwwMap {
        match self {
            Self::UserProfile(c) => &c.map,
            Self::Contacts(c) => &c.map,
            Self::ConvoVolatile(c) => &c.map,
            Self::UserGroups(c) => &c.map,
        }
    }

    fn map_mut(&mut self) -> &mut LwwMap {
        match self {
            Self::UserProfile(c) => &mut c.map,
            Self::Contacts(c) => &mut c.map,
            Self::ConvoVolatile(c) => &mut c.map,
            Self::UserGroups(c) => &mut c.map,
        }
    }

    /// Force the push flag, for side effects decided outside a merge.
    pub fn mark_needs_push(&mut self) {
        self.map_mut().mark_needs_push();
    }

    pub fn as_profile(&self) -> Option<&UserProfileConfig> {
        match self {
            Self::UserProfile(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_profile_mut(&mut self) -> Option<&mut UserProfileConfig> {
        match self {
            Self::UserProfile(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_contacts(&self) -> Option<&ContactsConfig> {
        match self {
            Self::Contacts(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_contacts_mut(&mut self) -> Option<&mut ContactsConfig> {
        match self {
            Self::Contacts(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_convo_volatile(&self) -> Option<&ConvoVolatileConfig> {
        match self {
            Self::ConvoVolatile(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_convo_volatile_mut(&mut self) -> Option<&mut ConvoVolatileConfig> {
        match self {
            Self::ConvoVolatile(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_user_groups(&self) -> Option<&UserGroupsConfig> {
        match self {
            Self::UserGroups(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_user_groups_mut(&mut self) -> Option<&mut UserGroupsConfig> {
        match self {
            Self::UserGroups(c) => Some(c),
            _ => None,
        }
    }
}

impl ConfigCodec for CategoryConfig {
    fn merge_incoming(&mut self, deltas: &[Bytes]) -> Result<MergeOutcome> {
        self.map_mut().merge_incoming(deltas)
    }

    fn produce_push(&mut self) -> Option<PendingPush> {
        self.map_mut().produce_push()
    }

    fn confirm_pushed(&mut self, seq_no: u64) {
        self.map_mut().confirm_pushed(seq_no)
    }

    fn produce_dump(&mut self) -> Option<Vec<u8>> {
        self.map_mut().produce_dump()
    }

    fn confirm_dumped(&mut self) {
        self.map_mut().confirm_dumped()
    }

    fn needs_push(&self) -> bool {
        self.map().needs_push()
    }

    fn needs_dump(&self) -> bool {
        self.map().needs_dump()
    }
}
