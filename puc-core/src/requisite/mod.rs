// puc-core/src/requisite/mod.rs
//! Per-slot tracking of announced capabilities and of the work items waiting
//! on them.
use std::sync::Arc;

use puc_common::dependency::Requirement;
use puc_common::error::{PucError, Result};
use puc_common::model::{Announcement, AnnouncementId, CapabilityKind, Module, WorkItemId};

pub mod provider;
pub mod tracker;

pub use provider::{ProviderConstraint, ProviderSelectionResolver};
pub use tracker::{Predicate, RequirementTracker};

/// A change in what a work item has selected for one slot.
#[derive(Debug, Clone)]
pub enum Notification {
    /// `announcement` is now the selection, replacing any previous one.
    Bound {
        kind: CapabilityKind,
        announcement: Arc<Announcement>,
    },
    Unbound {
        kind: CapabilityKind,
        announcement: AnnouncementId,
    },
}

/// Receives selection changes. Implementations must not block and must not
/// call back into the tracker; they are invoked with the tracker lock held.
pub trait SelectionListener: Send + Sync {
    fn notify(&self, item: &WorkItemId, notification: Notification);
}

/// One work item asking one tracker for a slot.
#[derive(Clone)]
pub struct Registration {
    pub item: WorkItemId,
    pub module: Module,
    pub requirement: Requirement,
    pub listener: Arc<dyn SelectionListener>,
}

pub trait Requisite: Send + Sync {
    /// The slot this tracker fills.
    fn kind(&self) -> &CapabilityKind;

    /// The announced interface this tracker watches.
    fn interface(&self) -> &str;

    fn register(&self, registration: Registration) -> Result<()>;

    /// Registers a batch; returns the rejected items with their errors.
    fn register_all(&self, registrations: Vec<Registration>) -> Vec<(WorkItemId, PucError)> {
        registrations
            .into_iter()
            .filter_map(|r| {
                let item = r.item.clone();
                self.register(r).err().map(|e| (item, e))
            })
            .collect()
    }

    /// Forgets `item`. Unknown items are ignored.
    fn unregister(&self, item: &WorkItemId);

    fn unregister_all(&self, items: &[WorkItemId]) {
        for item in items {
            self.unregister(item);
        }
    }

    fn announcement_arrived(&self, announcement: Arc<Announcement>);

    fn announcement_removed(&self, id: AnnouncementId);

    fn selection(&self, item: &WorkItemId) -> Option<Arc<Announcement>>;
}
