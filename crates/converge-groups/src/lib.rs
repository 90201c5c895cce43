//! # Converge Groups
//!
//! Closed-group membership and symmetric key rotation.
//!
//! A group owns a history of epoch key pairs. When membership shrinks,
//! the surviving admin mints a fresh pair and distributes it to every
//! survivor, so departed members cannot read new traffic. Growth only
//! re-distributes the current pair. Admin departure or self-removal
//! tears the local group state down entirely.
//!
//! ## Key Types
//!
//! - [`ClosedGroup`]: membership map plus key history
//! - [`GroupKeyPair`]: one epoch's key material
//! - [`KeyShare`]: a pair wrapped for one recipient
//! - [`GroupControlMessage`] / [`apply_control`]: the state machine

pub mod error;
pub mod group;
pub mod keyshare;
pub mod protocol;

pub use error::{GroupError, Result};
pub use group::{ClosedGroup, GroupKeyPair, GroupMember};
pub use keyshare::KeyShare;
pub use protocol::{apply_control, GroupControlMessage, RotationOutcome};
