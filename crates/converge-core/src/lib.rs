//! # Converge Core
//!
//! Pure primitives for the converge reconciliation engine: config
//! categories, wire messages, and the per-category merge codec.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over mergeable config state.
//!
//! ## Key Types
//!
//! - [`ConfigCategory`] - The four independently-synced config domains
//! - [`Identity`] - Account or group identifier a config is scoped to
//! - [`WireConfigMessage`] - An opaque delta fetched from the relay
//! - [`ConfigCodec`] - The merge/push/dump contract every category
//!   implementation satisfies
//! - [`CategoryConfig`] - Tagged union over the four category configs
//!
//! ## Merge model
//!
//! Category state is a last-writer-wins register map (see [`lww`]).
//! Merging is commutative and idempotent: applying the same set of
//! deltas in any order, any number of times, converges to one state.

pub mod category;
pub mod codec;
pub mod configs;
pub mod error;
pub mod identity;
pub mod keys;
pub mod lww;
pub mod message;

pub use category::ConfigCategory;
pub use codec::{ConfigCodec, MergeOutcome, PendingPush};
pub use configs::{
    CategoryConfig, ContactsConfig, ConvoVolatileConfig, UserGroupsConfig, UserProfileConfig,
};
pub use error::CoreError;
pub use identity::{Identity, MessageHash};
pub use keys::{decrypt_envelope, encrypt_envelope, IdentityKeys};
pub use lww::{FieldValue, LwwMap};
pub use message::WireConfigMessage;
