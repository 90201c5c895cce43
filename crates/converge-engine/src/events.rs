//! Events the engine surfaces to collaborators.

use converge_core::{ConfigCategory, Identity};

/// Outcome notifications for the layers around the engine.
///
/// The engine never surfaces user-visible errors; collaborators decide
/// presentation from these events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A category's state changed; refresh dependent UI.
    CategoryUpdated {
        category: ConfigCategory,
        identity: Identity,
    },
    /// Unsynced state exists somewhere; schedule a push cycle.
    PushNeeded,
    /// A group's local state was torn down; unsubscribe its push channel.
    GroupDisbanded { group: Identity },
}
