// puc-common/src/model/mod.rs
pub mod capability;
pub mod version;
pub mod work_item;

// Re-export
pub use capability::{
    Announcement, AnnouncementId, CapabilityKind, Module, ModuleId, Properties, SERVICE_RANKING,
};
pub use version::{parse_version, VersionRange};
pub use work_item::{ActivationState, WorkItem, WorkItemId};
