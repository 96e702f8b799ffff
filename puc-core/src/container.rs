// puc-core/src/container.rs
//! The entry points the module observer and the capability registry call.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use puc_common::config::Config;
use puc_common::dependency::UnitDescriptor;
use puc_common::error::PucError;
use puc_common::events::ContainerEvent;
use puc_common::model::{
    ActivationState, Announcement, AnnouncementId, CapabilityKind, Module, ModuleId, WorkItem,
    WorkItemId,
};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::coordinator::Coordinator;
use crate::lifecycle::{ArtifactFactory, LifecycleManager, Selections, ServiceRegistry};
use crate::ranking::RankingRule;
use crate::requisite::{
    ProviderSelectionResolver, Registration, Requisite, RequirementTracker, SelectionListener,
};

pub const PERSISTENCE_PROVIDER_INTERFACE: &str = "javax.persistence.spi.PersistenceProvider";
pub const TRANSACTION_MANAGER_INTERFACE: &str = "javax.transaction.TransactionManager";
pub const DATA_SOURCE_FACTORY_INTERFACE: &str = "org.osgi.service.jdbc.DataSourceFactory";
pub const DATA_SOURCE_INTERFACE: &str = "javax.sql.DataSource";

struct Slot {
    kind: CapabilityKind,
    interface: String,
    rule: RankingRule,
}

pub struct ContainerBuilder {
    config: Config,
    factory: Arc<dyn ArtifactFactory>,
    registry: Arc<dyn ServiceRegistry>,
    default_slots: bool,
    slots: Vec<Slot>,
}

impl ContainerBuilder {
    /// Adds a slot tracked by a plain requirement tracker. A slot named like a
    /// default slot replaces it.
    pub fn slot(
        mut self,
        kind: impl Into<CapabilityKind>,
        interface: impl Into<String>,
        rule: RankingRule,
    ) -> Self {
        self.slots.push(Slot {
            kind: kind.into(),
            interface: interface.into(),
            rule,
        });
        self
    }

    /// Keeps only the provider slot and the slots added explicitly.
    pub fn without_default_slots(mut self) -> Self {
        self.default_slots = false;
        self
    }

    pub fn build(self) -> Container {
        let (events, _) = broadcast::channel(self.config.event_capacity.max(1));

        let mut slots = Vec::new();
        if self.default_slots {
            slots.extend([
                Slot {
                    kind: CapabilityKind::TRANSACTION_MANAGER.into(),
                    interface: TRANSACTION_MANAGER_INTERFACE.into(),
                    rule: RankingRule::service_ranking(),
                },
                Slot {
                    kind: CapabilityKind::DATA_SOURCE_FACTORY.into(),
                    interface: DATA_SOURCE_FACTORY_INTERFACE.into(),
                    rule: RankingRule::data_source_factory(),
                },
                Slot {
                    kind: CapabilityKind::JTA_DATA_SOURCE.into(),
                    interface: DATA_SOURCE_INTERFACE.into(),
                    rule: RankingRule::arrival_order(),
                },
                Slot {
                    kind: CapabilityKind::NON_JTA_DATA_SOURCE.into(),
                    interface: DATA_SOURCE_INTERFACE.into(),
                    rule: RankingRule::arrival_order(),
                },
            ]);
        }
        slots.extend(self.slots);

        let mut requisites: BTreeMap<CapabilityKind, Arc<dyn Requisite>> = BTreeMap::new();
        requisites.insert(
            CapabilityKind::provider(),
            Arc::new(ProviderSelectionResolver::new(
                PERSISTENCE_PROVIDER_INTERFACE,
                RankingRule::persistence_provider(),
                self.config.default_provider.clone(),
                events.clone(),
            )),
        );
        for slot in slots {
            if slot.kind == CapabilityKind::provider() {
                warn!("The provider slot cannot be replaced, ignoring custom slot");
                continue;
            }
            debug!("Tracking slot {} on {}", slot.kind, slot.interface);
            requisites.insert(
                slot.kind.clone(),
                Arc::new(RequirementTracker::new(
                    slot.kind,
                    slot.interface,
                    slot.rule,
                    events.clone(),
                )),
            );
        }

        let lifecycle = LifecycleManager::new(self.factory, self.registry);
        Container {
            coordinator: Coordinator::new(self.config.worker_threads, lifecycle, events.clone()),
            requisites,
            announcements: Mutex::new(HashMap::new()),
            modules: Mutex::new(HashMap::new()),
            events,
            config: self.config,
        }
    }
}

/// Where an announcement stands between the registry and the slots.
#[derive(Debug)]
enum Indexed {
    /// Being handed to its slots. A removal coming in meanwhile sets
    /// `withdrawn` and the arriving thread takes the announcement back out.
    Arriving { withdrawn: bool },
    /// Held by every slot in `kinds`.
    Live(Vec<CapabilityKind>),
    /// Removed before its arrival was delivered; the arrival is dropped.
    Withdrawn,
}

/// A running container: feeds module and registry events through the slot
/// trackers into per-item lanes.
pub struct Container {
    coordinator: Coordinator,
    requisites: BTreeMap<CapabilityKind, Arc<dyn Requisite>>,
    /// Registry view per announcement id.
    announcements: Mutex<HashMap<AnnouncementId, Indexed>>,
    /// Declared work items per module.
    modules: Mutex<HashMap<ModuleId, Vec<WorkItemId>>>,
    events: broadcast::Sender<ContainerEvent>,
    config: Config,
}

impl Container {
    pub fn new(
        config: Config,
        factory: Arc<dyn ArtifactFactory>,
        registry: Arc<dyn ServiceRegistry>,
    ) -> Self {
        Self::builder(config, factory, registry).build()
    }

    pub fn builder(
        config: Config,
        factory: Arc<dyn ArtifactFactory>,
        registry: Arc<dyn ServiceRegistry>,
    ) -> ContainerBuilder {
        ContainerBuilder {
            config,
            factory,
            registry,
            default_slots: true,
            slots: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContainerEvent> {
        self.events.subscribe()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &CapabilityKind> {
        self.requisites.keys()
    }

    /// Declares a single work item, replacing an earlier declaration with the
    /// same id. Returns the requirements that could not be registered; the
    /// item stays waiting for those slots.
    #[instrument(skip_all, fields(item = %item.id()))]
    pub fn work_item_declared(&self, item: WorkItem) -> Vec<PucError> {
        let id = item.id();
        if self.is_declared(&id) {
            debug!("[{}] Re-declared, withdrawing the old declaration", id);
            self.work_item_withdrawn(&id);
        }
        self.modules
            .lock()
            .entry(item.module.id)
            .or_default()
            .push(id.clone());

        let module = item.module.clone();
        let registrations = self.registrations(&item, &module);
        self.register(registrations)
    }

    /// Declares every work item of `module` as one batch, replacing whatever
    /// the module declared before. Provider constraints of the batch are
    /// combined before any provider is judged.
    #[instrument(skip_all, fields(module = %module))]
    pub fn module_declared(&self, module: Module, items: Vec<WorkItem>) -> Vec<PucError> {
        if self.modules.lock().contains_key(&module.id) {
            debug!("Module {} re-declared, withdrawing its old work items", module);
            self.module_withdrawn(module.id);
        }
        info!("Module {} declares {} work item(s)", module, items.len());

        let mut errors = Vec::new();
        let mut ids = Vec::new();
        let mut registrations = Vec::new();
        for mut item in items {
            if item.module.id != module.id {
                warn!(
                    "[{}] Declared by {} but names module {}, reassigning",
                    item.id(),
                    module,
                    item.module
                );
            }
            item.module = module.clone();
            let id = item.id();
            if ids.contains(&id) {
                warn!("[{}] Declared twice in one batch, keeping the first", id);
                continue;
            }
            ids.push(id);
            registrations.extend(self.registrations(&item, &module));
        }
        self.modules.lock().insert(module.id, ids);
        errors.extend(self.register(registrations));
        errors
    }

    /// Declares the persistence units of `module`.
    pub fn units_declared(&self, module: Module, units: Vec<UnitDescriptor>) -> Vec<PucError> {
        let items = units
            .into_iter()
            .map(|unit| unit.into_work_item(module.clone()))
            .collect();
        self.module_declared(module, items)
    }

    #[instrument(skip_all, fields(item = %id))]
    pub fn work_item_withdrawn(&self, id: &WorkItemId) {
        let known = {
            let mut modules = self.modules.lock();
            let known = modules.get_mut(&id.module).is_some_and(|items| {
                let before = items.len();
                items.retain(|i| i != id);
                items.len() != before
            });
            if modules.get(&id.module).is_some_and(Vec::is_empty) {
                modules.remove(&id.module);
            }
            known
        };
        if !known {
            debug!("[{}] Not declared, nothing to withdraw", id);
            return;
        }
        self.withdraw(std::slice::from_ref(id));
    }

    #[instrument(skip_all, fields(module = %module))]
    pub fn module_withdrawn(&self, module: ModuleId) {
        let Some(items) = self.modules.lock().remove(&module) else {
            debug!("Module {} declared nothing", module);
            return;
        };
        info!("Module {} withdraws {} work item(s)", module, items.len());
        self.withdraw(&items);
    }

    /// Hands `announcement` to every slot watching one of its interfaces.
    /// Arrival and removal of the same id may be delivered from different
    /// threads in either order; the index reconciles them so a removed
    /// announcement never stays selected.
    #[instrument(skip_all, fields(announcement = %announcement.id))]
    pub fn capability_arrived(&self, announcement: Announcement) {
        let targets: Vec<Arc<dyn Requisite>> = self
            .requisites
            .values()
            .filter(|r| announcement.offers(r.interface()))
            .cloned()
            .collect();
        let kinds: Vec<CapabilityKind> = targets.iter().map(|r| r.kind().clone()).collect();
        {
            let mut index = self.announcements.lock();
            match index.get(&announcement.id) {
                Some(Indexed::Withdrawn) => {
                    index.remove(&announcement.id);
                    debug!("{} was removed before it arrived, dropping it", announcement.id);
                    return;
                }
                Some(_) => {
                    warn!("{} announced twice, ignoring the repeat", announcement.id);
                    return;
                }
                None => {}
            }
            if targets.is_empty() {
                index.insert(announcement.id, Indexed::Live(kinds));
                debug!(
                    "{} offers {:?}, which no slot watches",
                    announcement.id, announcement.interfaces
                );
                return;
            }
            index.insert(
                announcement.id,
                Indexed::Arriving { withdrawn: false },
            );
        }

        let id = announcement.id;
        let announcement = Arc::new(announcement);
        for requisite in &targets {
            requisite.announcement_arrived(Arc::clone(&announcement));
        }

        let withdrawn = {
            let mut index = self.announcements.lock();
            match index.remove(&id) {
                Some(Indexed::Arriving { withdrawn: true, .. }) => true,
                _ => {
                    index.insert(id, Indexed::Live(kinds));
                    false
                }
            }
        };
        if withdrawn {
            debug!("{} was removed while arriving, taking it back", id);
            for requisite in &targets {
                requisite.announcement_removed(id);
            }
        }
    }

    #[instrument(skip(self))]
    pub fn capability_removed(&self, id: AnnouncementId) {
        let kinds = {
            let mut index = self.announcements.lock();
            match index.remove(&id) {
                Some(Indexed::Live(kinds)) => kinds,
                Some(Indexed::Arriving { .. }) => {
                    index.insert(id, Indexed::Arriving { withdrawn: true });
                    return;
                }
                Some(Indexed::Withdrawn) => {
                    index.insert(id, Indexed::Withdrawn);
                    debug!("{} removed twice", id);
                    return;
                }
                None => {
                    debug!("{} removed before its arrival was seen", id);
                    index.insert(id, Indexed::Withdrawn);
                    return;
                }
            }
        };
        for kind in kinds {
            if let Some(requisite) = self.requisites.get(&kind) {
                requisite.announcement_removed(id);
            }
        }
    }

    /// Whether `id` is currently announced as far as the container knows.
    pub fn is_announced(&self, id: AnnouncementId) -> bool {
        matches!(
            self.announcements.lock().get(&id),
            Some(Indexed::Live(_)) | Some(Indexed::Arriving { withdrawn: false, .. })
        )
    }

    pub fn state(&self, id: &WorkItemId) -> Option<ActivationState> {
        self.coordinator.state(id)
    }

    pub fn selection(&self, id: &WorkItemId, kind: &CapabilityKind) -> Option<Arc<Announcement>> {
        self.requisites.get(kind)?.selection(id)
    }

    /// Current selection of every slot `id` holds one for.
    pub fn selections(&self, id: &WorkItemId) -> Selections {
        self.requisites
            .iter()
            .filter_map(|(kind, r)| r.selection(id).map(|a| (kind.clone(), a)))
            .collect()
    }

    pub fn declared_items(&self) -> Vec<WorkItemId> {
        let mut items: Vec<WorkItemId> = self.modules.lock().values().flatten().cloned().collect();
        items.sort();
        items
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        self.coordinator.lifecycle()
    }

    /// Blocks until every lane is drained.
    pub fn wait_idle(&self) {
        self.coordinator.wait_idle();
    }

    /// Withdraws every module and waits for the resulting deactivations.
    pub fn shutdown(&self) {
        let modules: Vec<ModuleId> = self.modules.lock().keys().copied().collect();
        info!("Shutting down, withdrawing {} module(s)", modules.len());
        for module in modules {
            self.module_withdrawn(module);
        }
        self.wait_idle();
    }

    fn is_declared(&self, id: &WorkItemId) -> bool {
        self.modules
            .lock()
            .get(&id.module)
            .is_some_and(|items| items.contains(id))
    }

    /// Queues the declaration of `item` and builds one registration per slot
    /// it requires.
    fn registrations(&self, item: &WorkItem, module: &Module) -> Vec<(CapabilityKind, Registration)> {
        let lane = self.coordinator.declare(item.clone());
        let listener: Arc<dyn SelectionListener> = lane;
        item.required_kinds()
            .into_iter()
            .filter_map(|kind| {
                let requirement = item.requirement(&kind)?.clone();
                Some((
                    kind,
                    Registration {
                        item: item.id(),
                        module: module.clone(),
                        requirement,
                        listener: Arc::clone(&listener),
                    },
                ))
            })
            .collect()
    }

    /// Hands registrations to their slots, one batch per slot.
    fn register(&self, registrations: Vec<(CapabilityKind, Registration)>) -> Vec<PucError> {
        let mut by_kind: BTreeMap<CapabilityKind, Vec<Registration>> = BTreeMap::new();
        for (kind, registration) in registrations {
            by_kind.entry(kind).or_default().push(registration);
        }

        let mut errors = Vec::new();
        for (kind, batch) in by_kind {
            let rejected = match self.requisites.get(&kind) {
                Some(requisite) => requisite.register_all(batch),
                None => batch
                    .into_iter()
                    .map(|r| {
                        let err = PucError::invalid_requirement(kind.as_str(), "no slot tracks this kind");
                        (r.item, err)
                    })
                    .collect(),
            };
            for (item, err) in rejected {
                warn!("[{}] Requirement {} rejected: {}", item, kind, err);
                let _ = self
                    .events
                    .send(ContainerEvent::requirement_rejected(item, kind.clone(), &err));
                errors.push(err);
            }
        }
        errors
    }

    fn withdraw(&self, items: &[WorkItemId]) {
        for requisite in self.requisites.values() {
            requisite.unregister_all(items);
        }
        for id in items {
            self.coordinator.withdraw(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use puc_common::dependency::{Constraint, Requirement};
    use puc_common::error::BoxError;
    use puc_common::model::Properties;
    use semver::Version;
    use serde_json::json;

    use super::*;
    use crate::lifecycle::{Artifact, PublicationHandle};

    #[derive(Debug)]
    struct Unit;

    impl Artifact for Unit {}

    struct Factory;

    impl ArtifactFactory for Factory {
        fn build(
            &self,
            _item: &WorkItem,
            _selections: &Selections,
        ) -> std::result::Result<Box<dyn Artifact>, BoxError> {
            Ok(Box::new(Unit))
        }
    }

    #[derive(Default)]
    struct Registry(AtomicU64);

    impl ServiceRegistry for Registry {
        fn publish(
            &self,
            _item: &WorkItem,
            _artifact: &dyn Artifact,
            _properties: &Properties,
        ) -> std::result::Result<PublicationHandle, BoxError> {
            Ok(PublicationHandle(self.0.fetch_add(1, Ordering::SeqCst)))
        }

        fn retract(&self, _handle: PublicationHandle) {}
    }

    fn container() -> Container {
        Container::new(
            Config::default().with_worker_threads(2),
            Arc::new(Factory),
            Arc::new(Registry::default()),
        )
    }

    fn module() -> Module {
        Module::new(1, "org.example.app", Version::new(1, 0, 0))
    }

    fn transaction_manager(id: u64) -> Announcement {
        Announcement {
            id: AnnouncementId(id),
            interfaces: vec![TRANSACTION_MANAGER_INTERFACE.into()],
            properties: Properties::new(),
            module: Module::new(50, "org.example.tm", Version::new(1, 0, 0)),
        }
    }

    #[test]
    fn test_default_slots() {
        let container = container();
        let kinds: Vec<&str> = container.kinds().map(CapabilityKind::as_str).collect();
        assert_eq!(
            kinds,
            vec![
                "data-source-factory",
                "jta-data-source",
                "non-jta-data-source",
                "persistence-provider",
                "transaction-manager"
            ]
        );
    }

    #[test]
    fn test_unknown_kind_is_rejected_and_item_waits() {
        let container = container();
        let item = WorkItem::new(module(), "orders")
            .with_requirement(Requirement::new("message-broker", Constraint::Any));
        let errors = container.work_item_declared(item.clone());
        container.wait_idle();
        assert!(matches!(errors[..], [PucError::InvalidRequirement { .. }]));
        assert_eq!(container.state(&item.id()), Some(ActivationState::Waiting));
    }

    #[test]
    fn test_item_without_requirements_activates_at_once() {
        let container = container();
        let item = WorkItem::new(module(), "bare");
        assert!(container.work_item_declared(item.clone()).is_empty());
        container.wait_idle();
        assert_eq!(container.state(&item.id()), Some(ActivationState::Active));

        container.work_item_withdrawn(&item.id());
        container.wait_idle();
        assert_eq!(container.state(&item.id()), None);
        assert!(!container.lifecycle().is_materialized(&item.id()));
    }

    #[test]
    fn test_duplicate_announcement_is_ignored() {
        let container = container();
        let item = WorkItem::new(module(), "orders").with_requirement(Requirement::new(
            CapabilityKind::TRANSACTION_MANAGER,
            Constraint::Any,
        ));
        container.work_item_declared(item.clone());
        container.capability_arrived(transaction_manager(1));
        container.capability_arrived(transaction_manager(1));
        container.wait_idle();
        assert_eq!(container.state(&item.id()), Some(ActivationState::Active));

        container.capability_removed(AnnouncementId(1));
        container.wait_idle();
        assert_eq!(container.state(&item.id()), Some(ActivationState::Waiting));
        assert!(container
            .selection(&item.id(), &CapabilityKind::new(CapabilityKind::TRANSACTION_MANAGER))
            .is_none());
    }

    #[test]
    fn test_removal_delivered_before_arrival_drops_the_arrival() {
        let container = container();
        let item = WorkItem::new(module(), "orders").with_requirement(Requirement::new(
            CapabilityKind::TRANSACTION_MANAGER,
            Constraint::Any,
        ));
        container.work_item_declared(item.clone());

        container.capability_removed(AnnouncementId(7));
        assert!(!container.is_announced(AnnouncementId(7)));
        container.capability_arrived(transaction_manager(7));
        container.wait_idle();

        assert!(!container.is_announced(AnnouncementId(7)));
        assert_eq!(container.state(&item.id()), Some(ActivationState::Waiting));
        assert!(!container.lifecycle().is_materialized(&item.id()));

        // the marker is spent; a later announcement binds normally
        container.capability_arrived(transaction_manager(8));
        container.wait_idle();
        assert!(container.is_announced(AnnouncementId(8)));
        assert_eq!(container.state(&item.id()), Some(ActivationState::Active));
    }

    #[test]
    fn test_custom_slot() {
        let container = Container::builder(
            Config::default(),
            Arc::new(Factory),
            Arc::new(Registry::default()),
        )
        .without_default_slots()
        .slot("message-broker", "javax.jms.ConnectionFactory", RankingRule::service_ranking())
        .build();
        assert_eq!(container.kinds().count(), 2);

        let item = WorkItem::new(module(), "events").with_requirement(Requirement::new(
            "message-broker",
            Constraint::Filter {
                filter: "(vendor=artemis)".into(),
            },
        ));
        container.work_item_declared(item.clone());
        container.capability_arrived(Announcement {
            id: AnnouncementId(3),
            interfaces: vec!["javax.jms.ConnectionFactory".into()],
            properties: serde_json::from_value(json!({ "vendor": "artemis" })).unwrap(),
            module: Module::new(60, "org.apache.activemq", Version::new(2, 0, 0)),
        });
        container.wait_idle();
        assert_eq!(container.state(&item.id()), Some(ActivationState::Active));
    }

    #[test]
    fn test_shutdown_withdraws_everything() {
        let container = container();
        container.module_declared(module(), vec![WorkItem::new(module(), "a"), WorkItem::new(module(), "b")]);
        container.wait_idle();
        assert_eq!(container.declared_items().len(), 2);

        container.shutdown();
        assert!(container.declared_items().is_empty());
        assert_eq!(container.state(&WorkItemId::new(ModuleId(1), "a")), None);
    }
}
