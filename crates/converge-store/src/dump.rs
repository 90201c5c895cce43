//! The on-disk snapshot of one config container.

use std::collections::BTreeSet;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use converge_core::{ConfigCategory, Identity, MessageHash};

/// Delimiter used when the subsumed hash set is flattened into a single
/// text column. Relay hashes are base64-like tokens and never contain it.
pub const HASH_DELIMITER: char = '/';

/// A persisted snapshot of one `(category, identity)` config container.
///
/// Carries the serialized container state plus the set of relay message
/// hashes the snapshot subsumes, so a restarted client can resubscribe
/// without re-merging deltas it has already absorbed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDump {
    pub category: ConfigCategory,
    pub identity: Identity,
    /// Opaque container state as produced by `ConfigCodec::produce_dump`.
    pub serialized_state: Bytes,
    /// Relay message hashes whose content this snapshot subsumes.
    pub message_hashes: BTreeSet<MessageHash>,
    /// Wall-clock ms of the mutation that last dirtied the container.
    pub last_mutation_ms: i64,
}

impl ConfigDump {
    /// Flatten the hash set into the delimited persistence form.
    pub fn combined_hashes(&self) -> String {
        combine_hashes(&self.message_hashes)
    }
}

/// Join a hash set into a single `/`-delimited string.
pub fn combine_hashes(hashes: &BTreeSet<MessageHash>) -> String {
    let mut out = String::new();
    for hash in hashes {
        if !out.is_empty() {
            out.push(HASH_DELIMITER);
        }
        out.push_str(hash.as_str());
    }
    out
}

/// Split a `/`-delimited string back into a hash set.
///
/// Empty segments (from an empty column or stray delimiters) are dropped.
pub fn split_hashes(combined: &str) -> BTreeSet<MessageHash> {
    combined
        .split(HASH_DELIMITER)
        .filter(|segment| !segment.is_empty())
        .map(MessageHash::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_split_roundtrip() {
        let hashes: BTreeSet<MessageHash> = ["aaa", "bbb", "ccc"]
            .iter()
            .map(|h| MessageHash::new(*h))
            .collect();
        let combined = combine_hashes(&hashes);
        assert_eq!(combined, "aaa/bbb/ccc");
        assert_eq!(split_hashes(&combined), hashes);
    }

    #[test]
    fn test_split_empty_column() {
        assert!(split_hashes("").is_empty());
    }

    #[test]
    fn test_split_skips_empty_segments() {
        let hashes = split_hashes("aaa//bbb/");
        assert_eq!(hashes.len(), 2);
    }
}
