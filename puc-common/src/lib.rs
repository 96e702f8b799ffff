// puc-common/src/lib.rs
pub mod config;
pub mod dependency;
pub mod error;
pub mod events;
pub mod model;

// Re-export key types
pub use config::Config;
pub use error::{BoxError, PucError, Result};
pub use events::ContainerEvent;
pub use model::{Announcement, AnnouncementId, CapabilityKind, WorkItem, WorkItemId};
