// puc-core/src/requisite/provider.rs
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use puc_common::dependency::definition::PERSISTENCE_PROVIDER_PROPERTY;
use puc_common::dependency::{Matcher, ProviderRequest};
use puc_common::error::{PucError, Result};
use puc_common::events::ContainerEvent;
use puc_common::model::{
    Announcement, AnnouncementId, CapabilityKind, Module, ModuleId, VersionRange, WorkItemId,
};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::tracker::{Predicate, Selector};
use super::{Registration, Requisite};
use crate::intersect::intersect;
use crate::ranking::RankingRule;

/// The provider every work item of one module has to share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConstraint {
    /// Required provider class; `None` accepts any.
    pub name: Option<String>,
    pub range: VersionRange,
}

impl ProviderConstraint {
    pub fn accepts(&self, announcement: &Announcement) -> bool {
        if !self.range.includes(&announcement.module.version) {
            return false;
        }
        match &self.name {
            Some(name) => {
                announcement.property_str(PERSISTENCE_PROVIDER_PROPERTY).as_deref()
                    == Some(name.as_str())
            }
            None => true,
        }
    }
}

impl fmt::Display for ProviderConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name.as_deref().unwrap_or("*"), self.range)
    }
}

struct Declared {
    request: ProviderRequest,
    matcher: Matcher,
}

struct ModuleDeclarations {
    module: Module,
    items: BTreeMap<WorkItemId, Declared>,
}

struct ProviderState {
    selector: Selector,
    modules: BTreeMap<ModuleId, ModuleDeclarations>,
}

/// Provider slot tracker. All work items of a module share one provider, so
/// the names and version ranges they declare are combined into a single
/// module-wide constraint before any candidate is judged.
pub struct ProviderSelectionResolver {
    kind: CapabilityKind,
    interface: String,
    default_provider: Option<String>,
    events: broadcast::Sender<ContainerEvent>,
    state: Mutex<ProviderState>,
}

impl ProviderSelectionResolver {
    pub fn new(
        interface: impl Into<String>,
        rule: RankingRule,
        default_provider: Option<String>,
        events: broadcast::Sender<ContainerEvent>,
    ) -> Self {
        Self {
            kind: CapabilityKind::provider(),
            interface: interface.into(),
            default_provider,
            state: Mutex::new(ProviderState {
                selector: Selector::new(CapabilityKind::provider(), rule, events.clone()),
                modules: BTreeMap::new(),
            }),
            events,
        }
    }

    /// The combined constraint currently applied to `module`'s work items.
    pub fn module_constraint(&self, module: ModuleId) -> Option<Result<ProviderConstraint>> {
        let state = self.state.lock();
        state
            .modules
            .get(&module)
            .map(|declarations| self.combine(declarations))
    }

    fn combine(&self, declarations: &ModuleDeclarations) -> Result<ProviderConstraint> {
        let ranges: Vec<VersionRange> = declarations
            .items
            .values()
            .filter_map(|d| d.request.range.clone())
            .collect();
        let range = intersect(&ranges)?;

        let names: BTreeSet<&str> = declarations
            .items
            .values()
            .filter_map(|d| d.request.name.as_deref())
            .collect();
        if names.len() > 1 {
            return Err(PucError::ConflictingProviderNames {
                module: declarations.module.to_string(),
                names: names.into_iter().map(str::to_string).collect(),
            });
        }
        let name = names
            .into_iter()
            .next()
            .map(str::to_string)
            .or_else(|| self.default_provider.clone());
        Ok(ProviderConstraint { name, range })
    }

    /// Recombines `module`'s constraint and re-judges all of its items. Items
    /// in `fresh` are reported back on failure; the others are announced as
    /// rejected on the event channel.
    fn resolve(
        &self,
        state: &mut ProviderState,
        module: ModuleId,
        fresh: &BTreeSet<WorkItemId>,
    ) -> Option<PucError> {
        let ProviderState { selector, modules } = state;
        let Some(declarations) = modules.get(&module) else {
            return None;
        };
        let outcome = self.combine(declarations);

        match &outcome {
            Ok(constraint) => debug!(
                "[{}] Module {} resolves to provider {}",
                selector.kind(),
                declarations.module,
                constraint
            ),
            Err(e) => warn!(
                "[{}] Module {} cannot share a provider: {}",
                selector.kind(),
                declarations.module,
                e
            ),
        }

        for (item, declared) in &declarations.items {
            let was_rejected = selector.is_rejected(item);
            let predicate = outcome.as_ref().ok().map(|constraint| Predicate {
                matcher: declared.matcher.clone(),
                provider: Some(constraint.clone()),
            });
            selector.set_predicate(item, predicate);

            if fresh.contains(item) {
                continue;
            }
            match &outcome {
                Err(e) if !was_rejected => {
                    let _ = self.events.send(ContainerEvent::requirement_rejected(
                        item.clone(),
                        selector.kind().clone(),
                        e,
                    ));
                }
                Ok(_) if was_rejected => {
                    info!("[{}] {} accepted again", selector.kind(), item);
                }
                _ => {}
            }
        }
        outcome.err()
    }

    /// Records the declared request of each registration. Returns the
    /// registrations that were stored and the ones refused outright.
    fn declare(
        &self,
        state: &mut ProviderState,
        registrations: Vec<Registration>,
    ) -> (Vec<Registration>, Vec<(WorkItemId, PucError)>) {
        let kind = &self.kind;
        let mut stored = Vec::new();
        let mut refused = Vec::new();

        for registration in registrations {
            let constraint = &registration.requirement.constraint;
            let compiled = constraint
                .compile(kind)
                .and_then(|matcher| Ok((matcher, constraint.provider_request(kind)?)));
            match compiled {
                Ok((matcher, request)) => {
                    debug!("[{}] {} asks for {}", kind, registration.item, request);
                    state
                        .modules
                        .entry(registration.module.id)
                        .or_insert_with(|| ModuleDeclarations {
                            module: registration.module.clone(),
                            items: BTreeMap::new(),
                        })
                        .items
                        .insert(registration.item.clone(), Declared { request, matcher });
                    stored.push(registration);
                }
                Err(e) => {
                    warn!("[{}] Rejecting {}: {}", kind, registration.item, e);
                    refused.push((registration.item, e));
                }
            }
        }
        (stored, refused)
    }

    #[instrument(skip_all, fields(count = registrations.len()))]
    fn register_batch(&self, registrations: Vec<Registration>) -> Vec<(WorkItemId, PucError)> {
        let mut state = self.state.lock();

        for registration in &registrations {
            if state.selector.remove(&registration.item) {
                forget(&mut state, &registration.item, registration.module.id);
            }
        }

        let (stored, mut refused) = self.declare(&mut state, registrations);
        let mut fresh_by_module: BTreeMap<ModuleId, BTreeSet<WorkItemId>> = BTreeMap::new();
        for registration in stored {
            fresh_by_module
                .entry(registration.module.id)
                .or_default()
                .insert(registration.item.clone());
            // starts rejected; `resolve` hands out the real predicate
            state
                .selector
                .insert(registration.item, None, registration.listener);
        }

        for (module, fresh) in fresh_by_module {
            if let Some(err) = self.resolve(&mut state, module, &fresh) {
                refused.extend(fresh.into_iter().map(|item| (item, err.clone())));
            }
        }
        refused
    }
}

fn forget(state: &mut ProviderState, item: &WorkItemId, module: ModuleId) {
    if let Some(declarations) = state.modules.get_mut(&module) {
        declarations.items.remove(item);
        if declarations.items.is_empty() {
            state.modules.remove(&module);
        }
    }
}

impl Requisite for ProviderSelectionResolver {
    fn kind(&self) -> &CapabilityKind {
        &self.kind
    }

    fn interface(&self) -> &str {
        &self.interface
    }

    fn register(&self, registration: Registration) -> Result<()> {
        match self.register_batch(vec![registration]).pop() {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    }

    fn register_all(&self, registrations: Vec<Registration>) -> Vec<(WorkItemId, PucError)> {
        self.register_batch(registrations)
    }

    fn unregister(&self, item: &WorkItemId) {
        self.unregister_all(std::slice::from_ref(item));
    }

    fn unregister_all(&self, items: &[WorkItemId]) {
        let mut state = self.state.lock();
        let mut touched = BTreeSet::new();
        for item in items {
            state.selector.remove(item);
            if state
                .modules
                .get(&item.module)
                .is_some_and(|d| d.items.contains_key(item))
            {
                forget(&mut state, item, item.module);
                touched.insert(item.module);
            }
        }
        for module in touched {
            self.resolve(&mut state, module, &BTreeSet::new());
        }
    }

    fn announcement_arrived(&self, announcement: Arc<Announcement>) {
        self.state.lock().selector.arrived(announcement);
    }

    fn announcement_removed(&self, id: AnnouncementId) {
        self.state.lock().selector.removed(id);
    }

    fn selection(&self, item: &WorkItemId) -> Option<Arc<Announcement>> {
        self.state.lock().selector.selection(item)
    }
}

#[cfg(test)]
mod tests {
    use puc_common::dependency::{Constraint, Requirement};
    use semver::Version;
    use serde_json::json;

    use super::*;
    use crate::requisite::tracker::tests::{announcement, Recorder};
    use crate::requisite::SelectionListener;

    const INTERFACE: &str = "javax.persistence.spi.PersistenceProvider";
    const HIBERNATE: &str = "org.hibernate.jpa.HibernatePersistenceProvider";
    const ECLIPSELINK: &str = "org.eclipse.persistence.jpa.PersistenceProvider";

    fn resolver(default_provider: Option<&str>) -> (ProviderSelectionResolver, broadcast::Receiver<ContainerEvent>) {
        let (events, rx) = broadcast::channel(64);
        let resolver = ProviderSelectionResolver::new(
            INTERFACE,
            RankingRule::persistence_provider(),
            default_provider.map(str::to_string),
            events,
        );
        (resolver, rx)
    }

    fn module() -> Module {
        Module::new(7, "org.example.shop", Version::new(1, 0, 0))
    }

    fn registration(
        name: &str,
        provider: Option<&str>,
        range: Option<&str>,
        recorder: &Arc<Recorder>,
    ) -> Registration {
        let module = module();
        Registration {
            item: WorkItemId::new(module.id, name),
            module,
            requirement: Requirement::new(
                CapabilityKind::PROVIDER,
                Constraint::Provider {
                    name: provider.map(str::to_string),
                    version_range: range.map(str::to_string),
                },
            ),
            listener: Arc::clone(recorder) as Arc<dyn SelectionListener>,
        }
    }

    fn provider(id: u64, name: &str, version: &str) -> Arc<Announcement> {
        announcement(
            id,
            INTERFACE,
            puc_common::model::parse_version(version).unwrap(),
            json!({ "javax.persistence.provider": name }),
        )
    }

    #[test]
    fn test_ranges_are_intersected_across_the_module() {
        let (resolver, _rx) = resolver(None);
        let recorder = Arc::new(Recorder::default());
        let rejected = resolver.register_all(vec![
            registration("orders", None, Some("[1.0,2.0)"), &recorder),
            registration("billing", None, Some("[1.5,3.0)"), &recorder),
        ]);
        assert!(rejected.is_empty());
        let constraint = resolver.module_constraint(ModuleId(7)).unwrap().unwrap();
        assert_eq!(constraint.range.to_string(), "[1.5.0,2.0.0)");

        resolver.announcement_arrived(provider(1, HIBERNATE, "2.5"));
        assert!(recorder.take().is_empty());
        resolver.announcement_arrived(provider(2, HIBERNATE, "1.8"));
        let mut bound = recorder.take();
        bound.sort();
        assert_eq!(bound, vec!["billing:bound:2", "orders:bound:2"]);
    }

    #[test]
    fn test_unconstrained_sibling_is_narrowed_too() {
        let (resolver, _rx) = resolver(None);
        let recorder = Arc::new(Recorder::default());
        resolver.announcement_arrived(provider(1, HIBERNATE, "3.0"));
        resolver
            .register(registration("plain", None, None, &recorder))
            .unwrap();
        assert_eq!(recorder.take(), vec!["plain:bound:1"]);

        resolver
            .register(registration("strict", None, Some("[1.0,2.0)"), &recorder))
            .unwrap();
        assert_eq!(recorder.take(), vec!["plain:unbound:1"]);
    }

    #[test]
    fn test_conflicting_names_reject_whole_module() {
        let (resolver, mut rx) = resolver(None);
        let recorder = Arc::new(Recorder::default());
        resolver.announcement_arrived(provider(1, HIBERNATE, "5.0"));
        resolver
            .register(registration("orders", Some(HIBERNATE), None, &recorder))
            .unwrap();
        assert_eq!(recorder.take(), vec!["orders:bound:1"]);

        let err = resolver
            .register(registration("billing", Some(ECLIPSELINK), None, &recorder))
            .unwrap_err();
        assert!(matches!(err, PucError::ConflictingProviderNames { ref names, .. } if names.len() == 2));
        assert_eq!(recorder.take(), vec!["orders:unbound:1"]);
        assert!(matches!(
            rx.try_recv().unwrap(),
            ContainerEvent::RequirementRejected { ref item, .. } if item.name == "orders"
        ));

        resolver.announcement_arrived(provider(2, ECLIPSELINK, "2.7"));
        assert!(recorder.take().is_empty());

        // withdrawing the odd one out lets the rest recover
        resolver.unregister(&WorkItemId::new(ModuleId(7), "billing"));
        assert_eq!(recorder.take(), vec!["orders:bound:1"]);
    }

    #[test]
    fn test_batch_conflict_rejects_every_item() {
        let (resolver, _rx) = resolver(None);
        let recorder = Arc::new(Recorder::default());
        resolver.announcement_arrived(provider(1, HIBERNATE, "5.0"));
        let rejected = resolver.register_all(vec![
            registration("orders", Some(HIBERNATE), None, &recorder),
            registration("billing", Some(ECLIPSELINK), None, &recorder),
        ]);
        assert_eq!(rejected.len(), 2);
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_incompatible_ranges_reject_module() {
        let (resolver, _rx) = resolver(None);
        let recorder = Arc::new(Recorder::default());
        let rejected = resolver.register_all(vec![
            registration("orders", None, Some("[1.0,2.0)"), &recorder),
            registration("billing", None, Some("[2.0,3.0)"), &recorder),
        ]);
        assert_eq!(rejected.len(), 2);
        assert!(matches!(rejected[0].1, PucError::IncompatibleRanges(_)));
    }

    #[test]
    fn test_default_provider_applies_when_nothing_is_named() {
        let (resolver, _rx) = resolver(Some(ECLIPSELINK));
        let recorder = Arc::new(Recorder::default());
        resolver.announcement_arrived(provider(1, HIBERNATE, "5.0"));
        resolver.announcement_arrived(provider(2, ECLIPSELINK, "2.7"));
        resolver
            .register(registration("orders", None, None, &recorder))
            .unwrap();
        assert_eq!(recorder.take(), vec!["orders:bound:2"]);
    }

    #[test]
    fn test_bad_range_is_invalid_requirement() {
        let (resolver, _rx) = resolver(None);
        let recorder = Arc::new(Recorder::default());
        let err = resolver
            .register(registration("orders", None, Some("[x,y)"), &recorder))
            .unwrap_err();
        assert!(matches!(err, PucError::InvalidRequirement { .. }));
        assert!(resolver.module_constraint(ModuleId(7)).is_none());
    }
}
