//! Error types for converge core.

use thiserror::Error;

/// Errors from codec and key operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("identity must not be empty")]
    EmptyIdentity,

    #[error("unknown config kind tag: {0}")]
    UnknownKindTag(u16),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("corrupt config dump: {0}")]
    CorruptDump(String),

    #[error("envelope decryption failed")]
    DecryptionFailed,

    #[error("envelope encryption failed")]
    EncryptionFailed,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
