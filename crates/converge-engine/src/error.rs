//! Engine error types.

use thiserror::Error;

use converge_core::{ConfigCategory, CoreError, Identity};
use converge_groups::GroupError;
use converge_store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Caller passed an empty identity. Contract violation, not retried.
    #[error("empty identity")]
    EmptyIdentity,

    /// No cryptographic material established for this identity.
    #[error("unknown identity: {0}")]
    IdentityUnknown(Identity),

    /// A cached dump was rejected by the codec at load time.
    #[error("config init failed: {0}")]
    ConfigInit(String),

    /// A category's merge failed; siblings are unaffected.
    #[error("merge failed for {category}: {reason}")]
    Merge {
        category: ConfigCategory,
        reason: String,
    },

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// A config handle's lock was poisoned by a panicking task.
    #[error("config handle lock poisoned")]
    HandlePoisoned,
}

pub type Result<T> = std::result::Result<T, EngineError>;
