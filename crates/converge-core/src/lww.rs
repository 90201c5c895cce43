//! Last-writer-wins register map: the reference merge codec.
//!
//! Every category config is a map of named fields, each a register
//! carrying the sender-claimed write timestamp. Merging takes the
//! pointwise winner; ties on timestamp break deterministically on the
//! value, so all devices converge regardless of delta order.
//!
//! Deltas and dumps are deterministic CBOR. A delta is a full register
//! snapshot, which keeps merge state-based: applying any subset of a
//! device's deltas, in any order, any number of times, is safe.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::{MergeOutcome, PendingPush};
use crate::error::{CoreError, Result};

/// A field value. Tombstone marks deletion without losing the register,
/// so a delete can still win or lose against a concurrent write.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldValue {
    Tombstone,
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// The text content, if this is a live text field.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The boolean content, if this is a live bool field.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer content, if this is a live int field.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The byte content, if this is a live bytes field.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// One field register: value plus the write timestamp that placed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Register {
    ts: i64,
    value: FieldValue,
}

impl Register {
    /// LWW comparison: newer timestamp wins; equal timestamps break on
    /// the value ordering so the winner is the same on every device.
    fn beats(&self, other: &Register) -> bool {
        (self.ts, &self.value) > (other.ts, &other.value)
    }
}

/// Wire delta: a full register snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DeltaState {
    registers: BTreeMap<String, Register>,
}

/// Persisted dump: registers plus push bookkeeping, so dirtiness
/// survives a process restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DumpState {
    seq_no: u64,
    needs_push: bool,
    registers: BTreeMap<String, Register>,
}

/// The LWW register map with push/dump bookkeeping.
#[derive(Debug, Clone)]
pub struct LwwMap {
    registers: BTreeMap<String, Register>,
    /// Last produced push sequence number.
    seq_no: u64,
    /// Push produced but not yet confirmed by the relay.
    pending_push: Option<u64>,
    needs_push: bool,
    needs_dump: bool,
}

impl LwwMap {
    /// Create an empty map with clean flags.
    pub fn new() -> Self {
        Self {
            registers: BTreeMap::new(),
            seq_no: 0,
            pending_push: None,
            needs_push: false,
            needs_dump: false,
        }
    }

    /// Restore a map from a persisted dump.
    ///
    /// Fails with [`CoreError::CorruptDump`] on undecodable bytes; the
    /// caller falls back to an empty map.
    pub fn from_dump(bytes: &[u8]) -> Result<Self> {
        let dump: DumpState = ciborium::from_reader(bytes)
            .map_err(|e| CoreError::CorruptDump(e.to_string()))?;
        Ok(Self {
            registers: dump.registers,
            seq_no: dump.seq_no,
            pending_push: None,
            needs_push: dump.needs_push,
            needs_dump: false,
        })
    }

    /// Get a live field value. Tombstoned and absent fields are `None`.
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        match self.registers.get(key) {
            Some(Register {
                value: FieldValue::Tombstone,
                ..
            }) => None,
            Some(reg) => Some(&reg.value),
            None => None,
        }
    }

    /// Write a field with the given timestamp.
    ///
    /// The write only lands if it beats the existing register; returns
    /// whether it did. A landed write marks the map dirty both ways.
    pub fn set(&mut self, key: &str, value: FieldValue, ts_ms: i64) -> bool {
        let incoming = Register { ts: ts_ms, value };
        let wins = match self.registers.get(key) {
            Some(existing) => incoming.beats(existing),
            None => true,
        };
        if wins {
            self.registers.insert(key.to_string(), incoming);
            self.needs_push = true;
            self.needs_dump = true;
        }
        wins
    }

    /// Tombstone a field with the given timestamp.
    pub fn remove(&mut self, key: &str, ts_ms: i64) -> bool {
        self.set(key, FieldValue::Tombstone, ts_ms)
    }

    /// Iterate live keys under a prefix (used for keyed sub-records
    /// like `contact/<id>/name`).
    pub fn keys_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.registers
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .filter(|(_, reg)| reg.value != FieldValue::Tombstone)
            .map(|(k, _)| k.as_str())
    }

    /// Whether the map holds no registers at all.
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Iterate every register with its write timestamp, tombstones
    /// included. For state comparison and debugging.
    pub fn fields(&self) -> impl Iterator<Item = (&str, i64, &FieldValue)> {
        self.registers
            .iter()
            .map(|(key, reg)| (key.as_str(), reg.ts, &reg.value))
    }

    /// Force the push flag, for side effects decided outside the merge
    /// (e.g. a key rotation that must reach other devices).
    pub fn mark_needs_push(&mut self) {
        self.needs_push = true;
        self.needs_dump = true;
    }

    /// Merge a batch of incoming deltas.
    ///
    /// All-or-nothing: every delta is decoded before any is applied, so
    /// one malformed delta leaves the map untouched.
    pub fn merge_incoming(&mut self, deltas: &[Bytes]) -> Result<MergeOutcome> {
        let mut decoded = Vec::with_capacity(deltas.len());
        for delta in deltas {
            let state: DeltaState = ciborium::from_reader(delta.as_ref())
                .map_err(|e| CoreError::DecodingError(e.to_string()))?;
            decoded.push(state);
        }

        // Pointwise union of the incoming batch, so "is the peer set
        // behind us" is judged against everything we just received.
        let mut incoming: BTreeMap<String, Register> = BTreeMap::new();
        for state in decoded {
            for (key, reg) in state.registers {
                match incoming.get(&key) {
                    Some(existing) if !reg.beats(existing) => {}
                    _ => {
                        incoming.insert(key, reg);
                    }
                }
            }
        }

        let mut changed = false;
        for (key, reg) in &incoming {
            let wins = match self.registers.get(key) {
                Some(existing) => reg.beats(existing),
                None => true,
            };
            if wins {
                self.registers.insert(key.clone(), reg.clone());
                changed = true;
            }
        }

        // We hold state the peers have not seen if any local register
        // beats (or is absent from) the incoming union.
        let local_ahead = self.registers.iter().any(|(key, local)| {
            match incoming.get(key) {
                Some(remote) => local.beats(remote),
                None => true,
            }
        });

        if changed {
            self.needs_dump = true;
        }
        if local_ahead {
            self.needs_push = true;
        }

        Ok(MergeOutcome {
            merged: deltas.len(),
            needs_push: self.needs_push,
            needs_dump: self.needs_dump,
        })
    }

    /// Produce the next outgoing push, if unsynced state exists.
    pub fn produce_push(&mut self) -> Option<PendingPush> {
        if !self.needs_push {
            return None;
        }
        let delta = DeltaState {
            registers: self.registers.clone(),
        };
        let mut payload = Vec::new();
        // BTreeMap keys serialize in order, so encoding is deterministic.
        ciborium::into_writer(&delta, &mut payload).ok()?;

        self.seq_no += 1;
        self.pending_push = Some(self.seq_no);
        self.needs_push = false;
        Some(PendingPush {
            seq_no: self.seq_no,
            payload,
        })
    }

    /// Confirm a push by sequence number. Stale confirmations (the map
    /// has advanced past that sequence) are no-ops.
    pub fn confirm_pushed(&mut self, seq_no: u64) {
        if self.pending_push == Some(seq_no) {
            self.pending_push = None;
            // The confirmed baseline is new state worth persisting.
            self.needs_dump = true;
        }
    }

    /// Serialize for persistence, if dirty since the last dump.
    pub fn produce_dump(&mut self) -> Option<Vec<u8>> {
        if !self.needs_dump {
            return None;
        }
        let dump = DumpState {
            seq_no: self.seq_no,
            needs_push: self.needs_push,
            registers: self.registers.clone(),
        };
        let mut bytes = Vec::new();
        ciborium::into_writer(&dump, &mut bytes).ok()?;
        Some(bytes)
    }

    /// Clear the dump flag after a durable write.
    pub fn confirm_dumped(&mut self) {
        self.needs_dump = false;
    }

    pub fn needs_push(&self) -> bool {
        self.needs_push
    }

    pub fn needs_dump(&self) -> bool {
        self.needs_dump
    }
}

impl Default for LwwMap {
    fn default() -> Self {
        Self::new()
    }
}
