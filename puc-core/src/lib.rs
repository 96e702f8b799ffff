// puc-core/src/lib.rs

pub mod container;
pub mod coordinator;
pub mod intersect;
pub mod lifecycle;
pub mod ranking;
pub mod requisite;

// Re-export the types the binary and embedders work with
pub use container::{Container, ContainerBuilder};
pub use intersect::intersect;
pub use lifecycle::{
    Artifact, ArtifactFactory, LifecycleManager, PublicationHandle, Selections, ServiceRegistry,
};
pub use ranking::{Preference, RankingRule};
pub use requisite::{Notification, Requisite, SelectionListener};
