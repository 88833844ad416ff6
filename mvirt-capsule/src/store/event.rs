//! Events emitted by store changes.

use crate::model::{Capsule, Container};

/// Events emitted when records change.
///
/// These are dispatched via a broadcast channel to subscribers, after the
/// change is visible to readers.
#[derive(Debug, Clone)]
pub enum Event {
    // Capsule events
    /// A new capsule record was created.
    CapsuleCreated(Capsule),
    /// A capsule record was saved.
    CapsuleUpdated {
        id: String,
        old: Capsule,
        new: Capsule,
    },
    /// A capsule record was destroyed.
    CapsuleDeleted { id: String },

    // Container events
    /// A new container record was created.
    ContainerCreated(Container),
    /// A container record was saved.
    ContainerUpdated {
        id: String,
        old: Container,
        new: Container,
    },
    /// A container record was destroyed.
    ContainerDeleted {
        id: String,
        capsule_uuid: Option<String>,
    },
}

impl Event {
    /// Get the resource type for this event.
    pub fn resource_type(&self) -> &'static str {
        match self {
            Event::CapsuleCreated(_) | Event::CapsuleUpdated { .. } | Event::CapsuleDeleted { .. } => {
                "capsule"
            }
            Event::ContainerCreated(_)
            | Event::ContainerUpdated { .. }
            | Event::ContainerDeleted { .. } => "container",
        }
    }

    /// Get the resource ID for this event.
    pub fn resource_id(&self) -> &str {
        match self {
            Event::CapsuleCreated(c) => &c.uuid,
            Event::CapsuleUpdated { id, .. } => id,
            Event::CapsuleDeleted { id } => id,
            Event::ContainerCreated(c) => &c.uuid,
            Event::ContainerUpdated { id, .. } => id,
            Event::ContainerDeleted { id, .. } => id,
        }
    }
}
