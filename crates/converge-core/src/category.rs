//! The four independently-synced config domains.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// One of the four config state domains synced between devices.
///
/// The category determines the relay namespace a delta is stored under,
/// the processing priority when a fetched batch spans categories, and
/// which identity (self vs. group) the state is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfigCategory {
    /// The local user's profile: display name, avatar.
    UserProfile,
    /// The contact list: names, nicknames, approved/blocked flags.
    Contacts,
    /// Per-conversation volatile info: read markers, unread flags.
    ConvoVolatile,
    /// Closed-group membership seeds owned by the local user.
    UserGroups,
}

impl ConfigCategory {
    /// All categories in fixed processing priority order.
    ///
    /// UserGroups comes last because group membership side effects may
    /// depend on up-to-date profile and contact state.
    pub const fn in_priority_order() -> [ConfigCategory; 4] {
        [
            ConfigCategory::UserProfile,
            ConfigCategory::Contacts,
            ConfigCategory::ConvoVolatile,
            ConfigCategory::UserGroups,
        ]
    }

    /// The wire kind tag carried by relay messages of this category.
    pub const fn kind_tag(&self) -> u16 {
        match self {
            ConfigCategory::UserProfile => 1,
            ConfigCategory::Contacts => 2,
            ConfigCategory::ConvoVolatile => 3,
            ConfigCategory::UserGroups => 4,
        }
    }

    /// Parse a wire kind tag.
    pub fn from_kind_tag(tag: u16) -> Result<Self, CoreError> {
        match tag {
            1 => Ok(ConfigCategory::UserProfile),
            2 => Ok(ConfigCategory::Contacts),
            3 => Ok(ConfigCategory::ConvoVolatile),
            4 => Ok(ConfigCategory::UserGroups),
            other => Err(CoreError::UnknownKindTag(other)),
        }
    }

    /// The relay namespace deltas of this category are stored under.
    pub const fn namespace(&self) -> i16 {
        match self {
            ConfigCategory::UserProfile => 2,
            ConfigCategory::Contacts => 3,
            ConfigCategory::ConvoVolatile => 4,
            ConfigCategory::UserGroups => 5,
        }
    }

}

impl fmt::Display for ConfigCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigCategory::UserProfile => "user-profile",
            ConfigCategory::Contacts => "contacts",
            ConfigCategory::ConvoVolatile => "convo-volatile",
            ConfigCategory::UserGroups => "user-groups",
        };
        write!(f, "{}", name)
    }
}
