#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use puc_common::error::BoxError;
use puc_common::model::{parse_version, Announcement, AnnouncementId, Module, Properties};
use puc_common::{Config, ContainerEvent, WorkItem, WorkItemId};
use puc_core::container::{
    DATA_SOURCE_FACTORY_INTERFACE, DATA_SOURCE_INTERFACE, PERSISTENCE_PROVIDER_INTERFACE,
    TRANSACTION_MANAGER_INTERFACE,
};
use puc_core::{Artifact, ArtifactFactory, Container, PublicationHandle, Selections, ServiceRegistry};
use serde_json::json;
use tokio::sync::broadcast;

pub const HIBERNATE: &str = "org.hibernate.jpa.HibernatePersistenceProvider";
pub const ECLIPSELINK: &str = "org.eclipse.persistence.jpa.PersistenceProvider";

#[derive(Debug)]
pub struct Unit;

impl Artifact for Unit {}

/// Extra condition checked on every build; a message names the breach.
pub type BuildCheck = Box<dyn Fn(&WorkItem, &Selections) -> Result<(), String> + Send + Sync>;

/// Factory that writes down every attempt and can be told to fail or to stall.
pub struct RecordingFactory {
    registry: Arc<RecordingRegistry>,
    pub failing: AtomicBool,
    pub attempts: Mutex<Vec<(WorkItemId, Vec<AnnouncementId>)>>,
    /// Items whose build blocks until `release` is set.
    pub stalled: Mutex<BTreeSet<String>>,
    pub release: AtomicBool,
    /// Builds currently blocked on `release`.
    pub waiting: AtomicUsize,
    pub check: Mutex<Option<BuildCheck>>,
    /// Every breach seen at build time.
    pub violations: Mutex<Vec<String>>,
}

impl RecordingFactory {
    pub fn new(registry: Arc<RecordingRegistry>) -> Self {
        Self {
            registry,
            failing: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
            stalled: Mutex::new(BTreeSet::new()),
            release: AtomicBool::new(false),
            waiting: AtomicUsize::new(0),
            check: Mutex::new(None),
            violations: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<(WorkItemId, Vec<AnnouncementId>)> {
        self.attempts.lock().clone()
    }

    pub fn attempts_for(&self, name: &str) -> Vec<Vec<AnnouncementId>> {
        self.attempts
            .lock()
            .iter()
            .filter(|(id, _)| id.name == name)
            .map(|(_, selected)| selected.clone())
            .collect()
    }

    pub fn stall(&self, name: &str) {
        self.stalled.lock().insert(name.to_string());
    }

    pub fn set_check(&self, check: BuildCheck) {
        *self.check.lock() = Some(check);
    }
}

impl ArtifactFactory for RecordingFactory {
    fn build(&self, item: &WorkItem, selections: &Selections) -> Result<Box<dyn Artifact>, BoxError> {
        let selected = selections.values().map(|a| a.id).collect();
        self.attempts.lock().push((item.id(), selected));

        for announcement in selections.values() {
            if !self.registry.is_held(announcement.id) {
                self.violations
                    .lock()
                    .push(format!("{} built with unheld {}", item.id(), announcement.id));
            }
        }
        if let Some(check) = self.check.lock().as_ref() {
            if let Err(breach) = check(item, selections) {
                self.violations.lock().push(breach);
            }
        }

        if self.stalled.lock().contains(&item.name) {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            while !self.release.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err("connection refused".into());
        }
        Ok(Box::new(Unit))
    }
}

/// Registry that keeps track of live publications and held references.
/// Announcements it has unregistered can no longer be acquired.
#[derive(Default)]
pub struct RecordingRegistry {
    next: AtomicU64,
    pub live: Mutex<BTreeSet<PublicationHandle>>,
    pub published: Mutex<Vec<(WorkItemId, Properties)>>,
    pub retracted: Mutex<Vec<PublicationHandle>>,
    pub held: Mutex<Vec<AnnouncementId>>,
    pub unregistered: Mutex<BTreeSet<AnnouncementId>>,
    /// Acquisitions refused because the announcement was already gone.
    pub refused: AtomicUsize,
    /// Most publications ever live at once.
    pub peak_live: AtomicUsize,
}

impl RecordingRegistry {
    pub fn retractions(&self) -> usize {
        self.retracted.lock().len()
    }

    pub fn is_held(&self, id: AnnouncementId) -> bool {
        self.held.lock().contains(&id)
    }

    pub fn unregister(&self, id: AnnouncementId) {
        self.unregistered.lock().insert(id);
    }
}

impl ServiceRegistry for RecordingRegistry {
    fn acquire(&self, announcement: &Announcement) -> bool {
        if self.unregistered.lock().contains(&announcement.id) {
            self.refused.fetch_add(1, Ordering::SeqCst);
            return false;
        }
        self.held.lock().push(announcement.id);
        true
    }

    fn release(&self, announcement: &Announcement) {
        let mut held = self.held.lock();
        if let Some(pos) = held.iter().position(|id| *id == announcement.id) {
            held.remove(pos);
        }
    }

    fn publish(
        &self,
        item: &WorkItem,
        _artifact: &dyn Artifact,
        properties: &Properties,
    ) -> Result<PublicationHandle, BoxError> {
        let handle = PublicationHandle(self.next.fetch_add(1, Ordering::SeqCst));
        let mut live = self.live.lock();
        live.insert(handle);
        self.peak_live.fetch_max(live.len(), Ordering::SeqCst);
        drop(live);
        self.published.lock().push((item.id(), properties.clone()));
        Ok(handle)
    }

    fn retract(&self, handle: PublicationHandle) {
        self.live.lock().remove(&handle);
        self.retracted.lock().push(handle);
    }
}

pub struct Harness {
    pub container: Container,
    pub factory: Arc<RecordingFactory>,
    pub registry: Arc<RecordingRegistry>,
    pub events: broadcast::Receiver<ContainerEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(config.with_worker_threads(4))
    }

    pub fn with_workers(workers: usize) -> Self {
        Self::build(Config::default().with_worker_threads(workers))
    }

    fn build(mut config: Config) -> Self {
        config.event_capacity = 4096;
        let registry = Arc::new(RecordingRegistry::default());
        let factory = Arc::new(RecordingFactory::new(registry.clone()));
        let container = Container::new(config, factory.clone(), registry.clone());
        let events = container.subscribe();
        Self {
            container,
            factory,
            registry,
            events,
        }
    }

    /// Waits for the lanes and returns the events published since last call.
    pub fn settle(&mut self) -> Vec<ContainerEvent> {
        self.container.wait_idle();
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// Unregisters `id` the way a registry does: the service is gone before
    /// listeners hear about it.
    pub fn unregister(&self, id: AnnouncementId) {
        self.registry.unregister(id);
        self.container.capability_removed(id);
    }
}

/// Polls `done` for up to five seconds.
pub fn eventually(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    done()
}

pub fn module(id: u64, name: &str) -> Module {
    Module::new(id, name, semver::Version::new(1, 0, 0))
}

fn announcement(id: u64, interface: &str, owner: Module, properties: serde_json::Value) -> Announcement {
    Announcement {
        id: AnnouncementId(id),
        interfaces: vec![interface.to_string()],
        properties: serde_json::from_value(properties).unwrap(),
        module: owner,
    }
}

pub fn provider(id: u64, class: &str, version: &str) -> Announcement {
    let owner = Module::new(1000 + id, "org.example.jpa", parse_version(version).unwrap());
    announcement(
        id,
        PERSISTENCE_PROVIDER_INTERFACE,
        owner,
        json!({ "javax.persistence.provider": class }),
    )
}

pub fn ranked_provider(id: u64, class: &str, version: &str, ranking: i64) -> Announcement {
    let mut ann = provider(id, class, version);
    ann.properties
        .insert("service.ranking".into(), serde_json::Value::from(ranking));
    ann
}

pub fn data_source(id: u64, jndi_name: &str) -> Announcement {
    announcement(
        id,
        DATA_SOURCE_INTERFACE,
        Module::new(2000 + id, "org.example.pool", semver::Version::new(1, 0, 0)),
        json!({ "osgi.jndi.service.name": jndi_name }),
    )
}

pub fn data_source_factory(id: u64, driver: &str) -> Announcement {
    announcement(
        id,
        DATA_SOURCE_FACTORY_INTERFACE,
        Module::new(3000 + id, "org.h2", semver::Version::new(1, 4, 0)),
        json!({ "osgi.jdbc.driver.class": driver }),
    )
}

pub fn transaction_manager(id: u64) -> Announcement {
    announcement(
        id,
        TRANSACTION_MANAGER_INTERFACE,
        Module::new(4000 + id, "org.example.tx", semver::Version::new(1, 0, 0)),
        json!({}),
    )
}

/// The events concerning `item`, in publication order.
pub fn events_for<'a>(events: &'a [ContainerEvent], item: &WorkItemId) -> Vec<&'a ContainerEvent> {
    events.iter().filter(|e| e.item() == Some(item)).collect()
}
