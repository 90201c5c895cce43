//! Outgoing push packaging.

use std::collections::BTreeSet;

use converge_core::{ConfigCategory, Identity, MessageHash};

/// One outgoing push, packaged for transport submission.
///
/// Pushes for different categories are independent transport
/// operations; no cross-category ordering is implied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPushResult {
    pub category: ConfigCategory,
    /// The identity (account or group) this push is addressed to.
    pub destination: Identity,
    /// The relay namespace to store the payload under.
    pub namespace: i16,
    /// Sequence number; push confirmation is keyed by this.
    pub seq_no: u64,
    pub payload: Vec<u8>,
    /// Previously stored relay messages this push supersedes; the
    /// caller expires them once the push is confirmed.
    pub obsolete_message_hashes: BTreeSet<MessageHash>,
}
