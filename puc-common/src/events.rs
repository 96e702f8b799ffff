// puc-common/src/events.rs
use serde::{Deserialize, Serialize};

use crate::error::PucError;
use crate::model::{AnnouncementId, CapabilityKind, WorkItemId};

/// Everything the container reports to its observability sink. Errors travel
/// as strings so events stay cheap to clone and serialise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContainerEvent {
    WorkItemDeclared {
        item: WorkItemId,
        kinds: Vec<CapabilityKind>,
    },
    WorkItemWithdrawn {
        item: WorkItemId,
    },
    /// A requirement could not be registered; the item stays waiting.
    RequirementRejected {
        item: WorkItemId,
        kind: CapabilityKind,
        error: String,
    },
    /// An announcement was left out of candidacy for a kind.
    AnnouncementIgnored {
        announcement: AnnouncementId,
        kind: CapabilityKind,
        reason: String,
    },
    Bound {
        item: WorkItemId,
        kind: CapabilityKind,
        announcement: AnnouncementId,
    },
    Unbound {
        item: WorkItemId,
        kind: CapabilityKind,
        announcement: AnnouncementId,
    },
    Activated {
        item: WorkItemId,
        selections: Vec<(CapabilityKind, AnnouncementId)>,
    },
    ActivationFailed {
        item: WorkItemId,
        error: String,
    },
    Deactivated {
        item: WorkItemId,
    },
}

impl ContainerEvent {
    pub fn requirement_rejected(item: WorkItemId, kind: CapabilityKind, error: &PucError) -> Self {
        ContainerEvent::RequirementRejected {
            item,
            kind,
            error: error.to_string(),
        }
    }

    pub fn activation_failed(item: WorkItemId, error: &PucError) -> Self {
        ContainerEvent::ActivationFailed {
            item,
            error: error.to_string(),
        }
    }

    /// The work item the event is about, if any.
    pub fn item(&self) -> Option<&WorkItemId> {
        match self {
            ContainerEvent::WorkItemDeclared { item, .. }
            | ContainerEvent::WorkItemWithdrawn { item }
            | ContainerEvent::RequirementRejected { item, .. }
            | ContainerEvent::Bound { item, .. }
            | ContainerEvent::Unbound { item, .. }
            | ContainerEvent::Activated { item, .. }
            | ContainerEvent::ActivationFailed { item, .. }
            | ContainerEvent::Deactivated { item } => Some(item),
            ContainerEvent::AnnouncementIgnored { .. } => None,
        }
    }
}
