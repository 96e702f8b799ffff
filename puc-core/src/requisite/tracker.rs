// puc-core/src/requisite/tracker.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use puc_common::dependency::Matcher;
use puc_common::error::Result;
use puc_common::events::ContainerEvent;
use puc_common::model::{Announcement, AnnouncementId, CapabilityKind, WorkItemId};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::provider::ProviderConstraint;
use super::{Notification, Registration, Requisite, SelectionListener};
use crate::ranking::{self, Preference, RankingRule};

/// Compiled suitability test for one dependent.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub matcher: Matcher,
    /// Module-wide provider constraint, for the provider slot only.
    pub provider: Option<ProviderConstraint>,
}

impl Predicate {
    pub fn new(matcher: Matcher) -> Self {
        Self {
            matcher,
            provider: None,
        }
    }

    pub fn accepts(&self, announcement: &Announcement) -> bool {
        self.matcher.accepts(announcement)
            && self
                .provider
                .as_ref()
                .is_none_or(|p| p.accepts(announcement))
    }
}

struct Dependent {
    /// `None` while the item is rejected for this slot.
    predicate: Option<Predicate>,
    listener: Arc<dyn SelectionListener>,
    selected: Option<Arc<Announcement>>,
}

/// Candidate pool and per-item selections of one slot. Always used under the
/// owning tracker's lock.
pub(crate) struct Selector {
    kind: CapabilityKind,
    rule: RankingRule,
    pool: BTreeMap<AnnouncementId, Arc<Announcement>>,
    dependents: BTreeMap<WorkItemId, Dependent>,
    events: broadcast::Sender<ContainerEvent>,
}

impl Selector {
    pub(crate) fn new(
        kind: CapabilityKind,
        rule: RankingRule,
        events: broadcast::Sender<ContainerEvent>,
    ) -> Self {
        Self {
            kind,
            rule,
            pool: BTreeMap::new(),
            dependents: BTreeMap::new(),
            events,
        }
    }

    pub(crate) fn kind(&self) -> &CapabilityKind {
        &self.kind
    }

    pub(crate) fn insert(
        &mut self,
        item: WorkItemId,
        predicate: Option<Predicate>,
        listener: Arc<dyn SelectionListener>,
    ) {
        self.remove(&item);
        self.dependents.insert(
            item.clone(),
            Dependent {
                predicate,
                listener,
                selected: None,
            },
        );
        self.refresh(&item);
    }

    /// Swaps the predicate of a registered item and re-selects.
    pub(crate) fn set_predicate(&mut self, item: &WorkItemId, predicate: Option<Predicate>) {
        if let Some(dependent) = self.dependents.get_mut(item) {
            dependent.predicate = predicate;
            self.refresh(item);
        }
    }

    pub(crate) fn is_rejected(&self, item: &WorkItemId) -> bool {
        self.dependents
            .get(item)
            .is_some_and(|d| d.predicate.is_none())
    }

    pub(crate) fn remove(&mut self, item: &WorkItemId) -> bool {
        let Some(dependent) = self.dependents.remove(item) else {
            return false;
        };
        if let Some(selected) = dependent.selected {
            dependent.listener.notify(
                item,
                Notification::Unbound {
                    kind: self.kind.clone(),
                    announcement: selected.id,
                },
            );
        }
        true
    }

    pub(crate) fn arrived(&mut self, announcement: Arc<Announcement>) {
        if self.pool.contains_key(&announcement.id) {
            debug!("[{}] {} already pooled, ignoring", self.kind, announcement.id);
            return;
        }
        if !ranking::is_rankable(&announcement, &self.rule) {
            let reason = format!(
                "missing '{}' property",
                self.rule.required_property.as_deref().unwrap_or_default()
            );
            warn!("[{}] Ignoring {}: {}", self.kind, announcement.id, reason);
            let _ = self.events.send(ContainerEvent::AnnouncementIgnored {
                announcement: announcement.id,
                kind: self.kind.clone(),
                reason,
            });
            return;
        }

        debug!(
            "[{}] {} from {} joins the pool",
            self.kind, announcement.id, announcement.module
        );
        self.pool.insert(announcement.id, Arc::clone(&announcement));
        let interested: Vec<WorkItemId> = self
            .dependents
            .iter()
            .filter(|(_, d)| d.predicate.as_ref().is_some_and(|p| p.accepts(&announcement)))
            .map(|(id, _)| id.clone())
            .collect();
        for item in interested {
            self.refresh(&item);
        }
    }

    pub(crate) fn removed(&mut self, id: AnnouncementId) {
        if self.pool.remove(&id).is_none() {
            return;
        }
        debug!("[{}] {} left the pool", self.kind, id);
        let affected: Vec<WorkItemId> = self
            .dependents
            .iter()
            .filter(|(_, d)| d.selected.as_ref().is_some_and(|s| s.id == id))
            .map(|(item, _)| item.clone())
            .collect();
        for item in affected {
            self.refresh(&item);
        }
    }

    pub(crate) fn selection(&self, item: &WorkItemId) -> Option<Arc<Announcement>> {
        self.dependents.get(item)?.selected.clone()
    }

    /// Re-evaluates one dependent against the pool. A still-suitable selection
    /// is kept unless a candidate ranks strictly better; a lost selection is
    /// reported unbound before any replacement is bound.
    fn refresh(&mut self, item: &WorkItemId) {
        let Some(dependent) = self.dependents.get_mut(item) else {
            return;
        };
        let best = dependent.predicate.as_ref().and_then(|predicate| {
            ranking::best(
                self.pool.values().filter(|a| predicate.accepts(a)),
                &self.rule,
            )
            .cloned()
        });
        let kept = dependent.selected.clone().filter(|current| {
            self.pool.contains_key(&current.id)
                && dependent
                    .predicate
                    .as_ref()
                    .is_some_and(|p| p.accepts(current))
        });

        match (kept, best) {
            (Some(current), Some(candidate)) => {
                if candidate.id != current.id
                    && ranking::compare(&candidate, &current, &self.rule) == Preference::First
                {
                    dependent.selected = Some(Arc::clone(&candidate));
                    dependent.listener.notify(
                        item,
                        Notification::Bound {
                            kind: self.kind.clone(),
                            announcement: candidate,
                        },
                    );
                }
            }
            (Some(_), None) => {}
            (None, best) => {
                if let Some(lost) = dependent.selected.take() {
                    dependent.listener.notify(
                        item,
                        Notification::Unbound {
                            kind: self.kind.clone(),
                            announcement: lost.id,
                        },
                    );
                }
                if let Some(candidate) = best {
                    dependent.selected = Some(Arc::clone(&candidate));
                    dependent.listener.notify(
                        item,
                        Notification::Bound {
                            kind: self.kind.clone(),
                            announcement: candidate,
                        },
                    );
                }
            }
        }
    }
}

/// Tracker for a slot whose suitability depends only on each item's own
/// constraint.
pub struct RequirementTracker {
    kind: CapabilityKind,
    interface: String,
    state: Mutex<Selector>,
}

impl RequirementTracker {
    pub fn new(
        kind: impl Into<CapabilityKind>,
        interface: impl Into<String>,
        rule: RankingRule,
        events: broadcast::Sender<ContainerEvent>,
    ) -> Self {
        let kind = kind.into();
        Self {
            state: Mutex::new(Selector::new(kind.clone(), rule, events)),
            kind,
            interface: interface.into(),
        }
    }
}

impl Requisite for RequirementTracker {
    fn kind(&self) -> &CapabilityKind {
        &self.kind
    }

    fn interface(&self) -> &str {
        &self.interface
    }

    fn register(&self, registration: Registration) -> Result<()> {
        let matcher = registration.requirement.constraint.compile(&self.kind)?;
        debug!("[{}] Registering {}", self.kind, registration.item);
        self.state.lock().insert(
            registration.item,
            Some(Predicate::new(matcher)),
            registration.listener,
        );
        Ok(())
    }

    fn unregister(&self, item: &WorkItemId) {
        if self.state.lock().remove(item) {
            debug!("[{}] Unregistered {}", self.kind, item);
        }
    }

    fn announcement_arrived(&self, announcement: Arc<Announcement>) {
        self.state.lock().arrived(announcement);
    }

    fn announcement_removed(&self, id: AnnouncementId) {
        self.state.lock().removed(id);
    }

    fn selection(&self, item: &WorkItemId) -> Option<Arc<Announcement>> {
        self.state.lock().selection(item)
    }
}
