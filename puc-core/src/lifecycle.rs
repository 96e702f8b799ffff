// puc-core/src/lifecycle.rs
//! Turning a satisfied work item into a published artifact and back.
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use puc_common::dependency::definition::{PERSISTENCE_PROVIDER_PROPERTY, UNIT_NAME_PROPERTY};
use puc_common::error::{BoxError, PucError, Result};
use puc_common::model::{Announcement, CapabilityKind, Properties, WorkItem, WorkItemId};
use serde_json::Value;
use tracing::{debug, error, info, warn};

pub const UNIT_PROVIDER_PROPERTY: &str = "osgi.unit.provider";
pub const UNIT_VERSION_PROPERTY: &str = "osgi.unit.version";
pub const CONTAINER_MANAGED_PROPERTY: &str = "org.apache.aries.jpa.container.managed";

/// The frozen slot → announcement map an activation is built from.
pub type Selections = BTreeMap<CapabilityKind, Arc<Announcement>>;

/// The runtime object a work item produces once active.
pub trait Artifact: Send + Sync + fmt::Debug {
    /// Extra properties to publish the artifact with.
    fn properties(&self) -> Properties {
        Properties::new()
    }

    /// Releases whatever the artifact holds. Called once, after retraction.
    fn close(&self) {}
}

pub trait ArtifactFactory: Send + Sync {
    fn build(
        &self,
        item: &WorkItem,
        selections: &Selections,
    ) -> std::result::Result<Box<dyn Artifact>, BoxError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicationHandle(pub u64);

impl fmt::Display for PublicationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pub-{}", self.0)
    }
}

/// The registry side of a materialization: holding on to the selected
/// announcements and publishing the artifact.
pub trait ServiceRegistry: Send + Sync {
    /// Takes a reference on `announcement`; `false` if it is already gone.
    fn acquire(&self, _announcement: &Announcement) -> bool {
        true
    }

    fn release(&self, _announcement: &Announcement) {}

    fn publish(
        &self,
        item: &WorkItem,
        artifact: &dyn Artifact,
        properties: &Properties,
    ) -> std::result::Result<PublicationHandle, BoxError>;

    fn retract(&self, handle: PublicationHandle);
}

struct Materialization {
    artifact: Box<dyn Artifact>,
    handle: PublicationHandle,
    held: Vec<Arc<Announcement>>,
}

pub struct LifecycleManager {
    factory: Arc<dyn ArtifactFactory>,
    registry: Arc<dyn ServiceRegistry>,
    records: Mutex<HashMap<WorkItemId, Materialization>>,
}

impl LifecycleManager {
    pub fn new(factory: Arc<dyn ArtifactFactory>, registry: Arc<dyn ServiceRegistry>) -> Self {
        Self {
            factory,
            registry,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Builds, publishes and records the artifact of `item`. Every reference
    /// taken is released again when any step fails.
    pub fn activate(&self, item: &WorkItem, selections: &Selections) -> Result<PublicationHandle> {
        let id = item.id();
        if self.is_materialized(&id) {
            warn!("[{}] Already materialized, retracting before activating again", id);
            self.deactivate(&id);
        }

        let held = self.acquire_all(&id, selections)?;

        debug!("[{}] Building artifact from {} selections", id, selections.len());
        let built = panic::catch_unwind(AssertUnwindSafe(|| self.factory.build(item, selections)));
        let artifact = match built {
            Ok(Ok(artifact)) => artifact,
            Ok(Err(e)) => {
                self.release_all(&held);
                return Err(PucError::activation(e));
            }
            Err(payload) => {
                let message = get_panic_message(payload);
                error!("[{}] Artifact factory panicked: {}", id, message);
                self.release_all(&held);
                return Err(PucError::activation(
                    format!("artifact factory panicked: {message}").into(),
                ));
            }
        };

        let properties = publication_properties(item, selections, artifact.as_ref());
        let handle = match self.registry.publish(item, artifact.as_ref(), &properties) {
            Ok(handle) => handle,
            Err(e) => {
                artifact.close();
                self.release_all(&held);
                return Err(PucError::activation(e));
            }
        };

        info!("[{}] Published as {}", id, handle);
        self.records.lock().insert(
            id,
            Materialization {
                artifact,
                handle,
                held,
            },
        );
        Ok(handle)
    }

    /// Retracts and closes the artifact of `item` and releases its references.
    /// Returns `false` when nothing was materialized.
    pub fn deactivate(&self, id: &WorkItemId) -> bool {
        let Some(record) = self.records.lock().remove(id) else {
            debug!("[{}] Nothing to retract", id);
            return false;
        };
        self.registry.retract(record.handle);
        record.artifact.close();
        self.release_all(&record.held);
        info!("[{}] Retracted {}", id, record.handle);
        true
    }

    pub fn is_materialized(&self, id: &WorkItemId) -> bool {
        self.records.lock().contains_key(id)
    }

    pub fn publication(&self, id: &WorkItemId) -> Option<PublicationHandle> {
        self.records.lock().get(id).map(|r| r.handle)
    }

    fn acquire_all(&self, id: &WorkItemId, selections: &Selections) -> Result<Vec<Arc<Announcement>>> {
        let mut held = Vec::with_capacity(selections.len());
        for (kind, announcement) in selections {
            if !self.registry.acquire(announcement) {
                self.release_all(&held);
                return Err(PucError::activation(
                    format!("{kind} {} vanished before it could be acquired", announcement.id)
                        .into(),
                ));
            }
            held.push(Arc::clone(announcement));
        }
        debug!("[{}] Holding {} references", id, held.len());
        Ok(held)
    }

    fn release_all(&self, held: &[Arc<Announcement>]) {
        for announcement in held {
            self.registry.release(announcement);
        }
    }
}

fn publication_properties(
    item: &WorkItem,
    selections: &Selections,
    artifact: &dyn Artifact,
) -> Properties {
    let mut properties = artifact.properties();
    properties.insert(UNIT_NAME_PROPERTY.into(), Value::String(item.name.clone()));
    properties.insert(
        UNIT_VERSION_PROPERTY.into(),
        Value::String(item.module.version.to_string()),
    );
    if let Some(provider) = selections
        .get(&CapabilityKind::provider())
        .and_then(|p| p.property_str(PERSISTENCE_PROVIDER_PROPERTY))
    {
        properties.insert(UNIT_PROVIDER_PROPERTY.into(), Value::String(provider));
    }
    properties.insert(CONTAINER_MANAGED_PROPERTY.into(), Value::Bool(true));
    properties
}

pub(crate) fn get_panic_message(e: Box<dyn std::any::Any + Send>) -> String {
    match e.downcast_ref::<&'static str>() {
        Some(s) => (*s).to_string(),
        None => match e.downcast_ref::<String>() {
            Some(s) => s.clone(),
            None => "Unknown panic payload".to_string(),
        },
    }
}
