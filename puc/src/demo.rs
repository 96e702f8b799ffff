// puc/src/demo.rs
//! Stand-ins for the outside world when replaying a scenario: a factory that
//! builds inert persistence units and a registry that keeps publications in
//! memory.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use puc_common::dependency::definition::PERSISTENCE_PROVIDER_PROPERTY;
use puc_common::error::BoxError;
use puc_common::model::{Announcement, CapabilityKind, Properties};
use puc_common::{WorkItem, WorkItemId};
use puc_core::{Artifact, ArtifactFactory, PublicationHandle, Selections, ServiceRegistry};
use serde_json::Value;
use tracing::debug;

/// Provider class names the factory refuses to build with, e.g. to rehearse
/// an activation failure.
const BROKEN_PROVIDER_PREFIX: &str = "broken.";

#[derive(Debug)]
pub struct DemoUnit {
    item: WorkItemId,
    provider: Option<String>,
}

impl Artifact for DemoUnit {
    fn properties(&self) -> Properties {
        let mut props = Properties::new();
        if let Some(provider) = &self.provider {
            props.insert("puc.demo.provider".into(), Value::String(provider.clone()));
        }
        props
    }

    fn close(&self) {
        debug!("[{}] Demo unit closed", self.item);
    }
}

#[derive(Debug, Default)]
pub struct DemoFactory;

impl ArtifactFactory for DemoFactory {
    fn build(&self, item: &WorkItem, selections: &Selections) -> Result<Box<dyn Artifact>, BoxError> {
        let provider = selections
            .get(&CapabilityKind::provider())
            .and_then(|ann| ann.property_str(PERSISTENCE_PROVIDER_PROPERTY));
        if let Some(name) = provider.as_deref() {
            if name.starts_with(BROKEN_PROVIDER_PREFIX) {
                return Err(format!("provider {name} failed to create the unit").into());
            }
        }
        debug!("[{}] Building demo unit with {} selection(s)", item.id(), selections.len());
        Ok(Box::new(DemoUnit {
            item: item.id(),
            provider,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct Publication {
    pub item: WorkItemId,
    pub properties: Properties,
}

/// Keeps live publications and reference counts per announcement.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    next: AtomicU64,
    live: Mutex<BTreeMap<PublicationHandle, Publication>>,
    references: Mutex<BTreeMap<u64, usize>>,
}

impl InMemoryRegistry {
    pub fn live(&self) -> Vec<(PublicationHandle, Publication)> {
        self.live
            .lock()
            .iter()
            .map(|(handle, publication)| (*handle, publication.clone()))
            .collect()
    }

    pub fn references(&self) -> usize {
        self.references.lock().values().sum()
    }
}

impl ServiceRegistry for InMemoryRegistry {
    fn acquire(&self, announcement: &Announcement) -> bool {
        *self.references.lock().entry(announcement.id.0).or_default() += 1;
        true
    }

    fn release(&self, announcement: &Announcement) {
        let mut refs = self.references.lock();
        if let Some(count) = refs.get_mut(&announcement.id.0) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                refs.remove(&announcement.id.0);
            }
        }
    }

    fn publish(
        &self,
        item: &WorkItem,
        _artifact: &dyn Artifact,
        properties: &Properties,
    ) -> Result<PublicationHandle, BoxError> {
        let handle = PublicationHandle(self.next.fetch_add(1, Ordering::SeqCst) + 1);
        self.live.lock().insert(
            handle,
            Publication {
                item: item.id(),
                properties: properties.clone(),
            },
        );
        Ok(handle)
    }

    fn retract(&self, handle: PublicationHandle) {
        self.live.lock().remove(&handle);
    }
}
