//! # Converge Engine
//!
//! The reconciliation engine driving both sync directions for one
//! account: incoming wire messages are merged per category and
//! persisted, local edits and key rotations flag unsynced state, and
//! push cycles package it for transport.
//!
//! ## Key Types
//!
//! - [`ReconciliationEngine`]: the cycle driver
//! - [`ConfigStateStore`]: the `(category, identity) → handle` map
//! - [`OutgoingPushResult`]: one packaged push
//! - [`EngineEvent`]: outcome notifications for collaborators

pub mod engine;
pub mod error;
pub mod events;
pub mod push;
pub mod state_store;

pub use engine::ReconciliationEngine;
pub use error::{EngineError, Result};
pub use events::EngineEvent;
pub use push::OutgoingPushResult;
pub use state_store::{ConfigHandle, ConfigStateStore};
