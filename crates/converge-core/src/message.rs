//! Wire message types consumed from the relay.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::category::ConfigCategory;
use crate::identity::MessageHash;

/// An opaque config delta fetched from the store-and-forward relay.
///
/// The relay offers no ordering guarantee beyond the sender-claimed
/// timestamp and the per-message hash; the merge engine must converge
/// regardless of fetch order or batching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireConfigMessage {
    /// Which category this delta belongs to (1:1 with the wire kind tag).
    pub kind: ConfigCategory,

    /// Sender-claimed send time (Unix ms).
    pub sent_timestamp_ms: i64,

    /// Relay-assigned hash for this stored message.
    pub server_hash: MessageHash,

    /// The serialized delta, opaque to everything but the codec.
    pub payload: Bytes,

    /// Sender-side push sequence number this delta was produced at.
    pub seq_no: u64,
}

impl WireConfigMessage {
    /// Construct a message for the given category.
    pub fn new(
        kind: ConfigCategory,
        sent_timestamp_ms: i64,
        server_hash: MessageHash,
        payload: impl Into<Bytes>,
        seq_no: u64,
    ) -> Self {
        Self {
            kind,
            sent_timestamp_ms,
            server_hash,
            payload: payload.into(),
            seq_no,
        }
    }
}
