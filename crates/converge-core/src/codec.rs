//! The config codec contract.
//!
//! Every category implementation exposes the same small surface: merge
//! incoming deltas, produce an outgoing push, confirm a push or a dump,
//! and report the two dirtiness predicates. The reconciliation engine
//! depends only on this trait, never on category internals.

use bytes::Bytes;

use crate::error::Result;

/// Outcome of merging a batch of incoming deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    /// How many deltas were applied.
    pub merged: usize,
    /// Unsynced local state exists that peers have not seen.
    pub needs_push: bool,
    /// In-memory state diverges from the last persisted dump.
    pub needs_dump: bool,
}

/// A serialized outgoing delta awaiting transport submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPush {
    /// The push sequence number; confirmation is keyed by this.
    pub seq_no: u64,
    /// The serialized delta to submit.
    pub payload: Vec<u8>,
}

/// The merge/push/dump contract for one category's state.
///
/// # Contract
///
/// - `merge_incoming` is commutative and idempotent: any batching or
///   ordering of the same delta set converges to the same state, and a
///   merge is all-or-nothing (a failed call leaves state unchanged).
/// - `produce_push` yields `None` when nothing is pending; producing a
///   push clears `needs_push` until the next mutation.
/// - `confirm_pushed` is keyed by sequence number; confirming a stale
///   sequence is a no-op, so superseded push cycles need no cancellation.
/// - `produce_dump` yields `None` when state is unchanged since the
///   last confirmed dump; `confirm_dumped` clears `needs_dump` once the
///   snapshot is durably persisted, so a failed write retries later.
pub trait ConfigCodec: Send {
    /// Merge a batch of incoming serialized deltas into this state.
    fn merge_incoming(&mut self, deltas: &[Bytes]) -> Result<MergeOutcome>;

    /// Produce the next outgoing push, if unsynced local state exists.
    fn produce_push(&mut self) -> Option<PendingPush>;

    /// Confirm that the push with the given sequence number was stored
    /// by the relay. Stale sequence numbers are ignored.
    fn confirm_pushed(&mut self, seq_no: u64);

    /// Serialize the current state for persistence, if it diverges from
    /// the last confirmed dump.
    fn produce_dump(&mut self) -> Option<Vec<u8>>;

    /// Mark the last produced dump as durably persisted.
    fn confirm_dumped(&mut self);

    /// Unsynced local state exists.
    fn needs_push(&self) -> bool;

    /// In-memory state diverges from the last persisted snapshot.
    fn needs_dump(&self) -> bool;
}
