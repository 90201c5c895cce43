//! Group protocol error types.

use thiserror::Error;

use converge_core::CoreError;

#[derive(Debug, Error)]
pub enum GroupError {
    /// The sender is not a member, or the message pre-dates formation.
    #[error("stale or unauthorized group update: {0}")]
    StaleOrUnauthorizedUpdate(String),

    /// The update is structurally valid but violates a group invariant.
    #[error("invalid group update: {0}")]
    InvalidGroupUpdate(String),

    /// A member addressed a request to themselves.
    #[error("self-directed group request")]
    InvalidSelfRequest,

    #[error("key share serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, GroupError>;
