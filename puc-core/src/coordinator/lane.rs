// puc-core/src/coordinator/lane.rs
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use puc_common::events::ContainerEvent;
use puc_common::model::{ActivationState, Announcement, AnnouncementId, CapabilityKind, WorkItem, WorkItemId};
use tracing::{debug, error, info, instrument, warn};

use super::{CoordinatorInner, Transition, WorkItemState};
use crate::requisite::{Notification, SelectionListener};

const UNDECLARED: u8 = 0;
const WAITING: u8 = 1;
const ACTIVE: u8 = 2;

#[derive(Debug)]
pub(crate) enum LaneEvent {
    Declare(Box<WorkItem>),
    Bound {
        kind: CapabilityKind,
        announcement: Arc<Announcement>,
    },
    Unbound {
        kind: CapabilityKind,
        announcement: AnnouncementId,
    },
    Withdraw,
}

/// FIFO of one work item's events. At most one pool job drains a lane at any
/// time, so its events are handled strictly one after another.
pub(crate) struct Lane {
    id: WorkItemId,
    me: Weak<Lane>,
    tx: Sender<LaneEvent>,
    rx: Receiver<LaneEvent>,
    scheduled: AtomicBool,
    observed: AtomicU8,
    state: Mutex<Option<WorkItemState>>,
    coordinator: Weak<CoordinatorInner>,
}

impl Lane {
    pub(crate) fn new(id: WorkItemId, coordinator: Weak<CoordinatorInner>) -> Arc<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        Arc::new_cyclic(|me| Self {
            id,
            me: me.clone(),
            tx,
            rx,
            scheduled: AtomicBool::new(false),
            observed: AtomicU8::new(UNDECLARED),
            state: Mutex::new(None),
            coordinator,
        })
    }

    pub(crate) fn id(&self) -> &WorkItemId {
        &self.id
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.rx.is_empty()
    }

    pub(crate) fn state(&self) -> Option<ActivationState> {
        match self.observed.load(Ordering::Acquire) {
            WAITING => Some(ActivationState::Waiting),
            ACTIVE => Some(ActivationState::Active),
            _ => None,
        }
    }

    /// Appends `event` and makes sure a pool job is draining the lane.
    pub(crate) fn push(&self, event: LaneEvent) {
        // both ends live in `self`, so the send cannot fail
        let _ = self.tx.send(event);
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        match (self.me.upgrade(), self.coordinator.upgrade()) {
            (Some(lane), Some(coordinator)) => coordinator.execute(move || lane.drain()),
            _ => {
                self.scheduled.store(false, Ordering::Release);
                debug!("[{}] Coordinator gone, event dropped", self.id);
            }
        }
    }

    #[instrument(skip_all, fields(item = %self.id))]
    fn drain(self: Arc<Self>) {
        let Some(coordinator) = self.coordinator.upgrade() else {
            return;
        };
        loop {
            while let Ok(event) = self.rx.try_recv() {
                self.process(&coordinator, event);
            }
            self.scheduled.store(false, Ordering::Release);
            if self.rx.is_empty() {
                break;
            }
            // an event slipped in after the last receive; drain it unless a
            // fresh job already took over
            if self
                .scheduled
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                break;
            }
        }
    }

    fn process(self: &Arc<Self>, coordinator: &CoordinatorInner, event: LaneEvent) {
        let mut slot = self.state.lock();
        match event {
            LaneEvent::Declare(item) => {
                if let Some(mut previous) = slot.take() {
                    warn!("[{}] Declared again before withdrawal, replacing", self.id);
                    if previous.on_withdrawn() == Transition::Deactivate {
                        self.deactivate(coordinator);
                    }
                }
                let state = WorkItemState::new(*item);
                let _ = coordinator.events.send(ContainerEvent::WorkItemDeclared {
                    item: self.id.clone(),
                    kinds: state.item.required_kinds().into_iter().collect(),
                });
                debug!("[{}] Declared, waiting for {:?}", self.id, state.item.required_kinds());
                let transition = state.on_declared();
                let state = slot.insert(state);
                self.observed.store(WAITING, Ordering::Release);
                self.apply(coordinator, state, transition);
            }
            LaneEvent::Bound { kind, announcement } => {
                let Some(state) = slot.as_mut() else {
                    debug!("[{}] Bound {} after withdrawal, ignored", self.id, announcement.id);
                    return;
                };
                let _ = coordinator.events.send(ContainerEvent::Bound {
                    item: self.id.clone(),
                    kind: kind.clone(),
                    announcement: announcement.id,
                });
                debug!("[{}] {} bound to {}", self.id, kind, announcement.id);
                let transition = state.on_bound(kind, announcement);
                self.apply(coordinator, state, transition);
            }
            LaneEvent::Unbound { kind, announcement } => {
                let Some(state) = slot.as_mut() else {
                    return;
                };
                let _ = coordinator.events.send(ContainerEvent::Unbound {
                    item: self.id.clone(),
                    kind: kind.clone(),
                    announcement,
                });
                debug!("[{}] {} lost {}", self.id, kind, announcement);
                let transition = state.on_unbound(&kind, announcement);
                self.apply(coordinator, state, transition);
            }
            LaneEvent::Withdraw => {
                if let Some(mut state) = slot.take() {
                    if state.on_withdrawn() == Transition::Deactivate {
                        self.deactivate(coordinator);
                    }
                    self.observed.store(UNDECLARED, Ordering::Release);
                    let _ = coordinator.events.send(ContainerEvent::WorkItemWithdrawn {
                        item: self.id.clone(),
                    });
                    debug!("[{}] Withdrawn", self.id);
                }
                drop(slot);
                coordinator.retire(self);
            }
        }
    }

    fn apply(&self, coordinator: &CoordinatorInner, state: &mut WorkItemState, transition: Transition) {
        match transition {
            Transition::Stay => {}
            Transition::Activate => self.activate(coordinator, state),
            Transition::Deactivate => {
                self.deactivate(coordinator);
                self.observed.store(WAITING, Ordering::Release);
            }
            Transition::Restart => {
                debug!("[{}] Selection replaced while active, restarting", self.id);
                self.deactivate(coordinator);
                self.observed.store(WAITING, Ordering::Release);
                self.activate(coordinator, state);
            }
        }
    }

    fn activate(&self, coordinator: &CoordinatorInner, state: &mut WorkItemState) {
        let selections = state.selections();
        match coordinator.lifecycle.activate(&state.item, &selections) {
            Ok(_) => {
                state.state = ActivationState::Active;
                self.observed.store(ACTIVE, Ordering::Release);
                info!("[{}] Active", self.id);
                let _ = coordinator.events.send(ContainerEvent::Activated {
                    item: self.id.clone(),
                    selections: selections
                        .iter()
                        .map(|(kind, announcement)| (kind.clone(), announcement.id))
                        .collect(),
                });
            }
            Err(e) => {
                error!("[{}] Activation failed: {}", self.id, e);
                let _ = coordinator
                    .events
                    .send(ContainerEvent::activation_failed(self.id.clone(), &e));
            }
        }
    }

    fn deactivate(&self, coordinator: &CoordinatorInner) {
        if coordinator.lifecycle.deactivate(&self.id) {
            info!("[{}] Deactivated", self.id);
            let _ = coordinator.events.send(ContainerEvent::Deactivated {
                item: self.id.clone(),
            });
        }
    }
}

impl SelectionListener for Lane {
    fn notify(&self, item: &WorkItemId, notification: Notification) {
        debug_assert_eq!(item, &self.id);
        let event = match notification {
            Notification::Bound { kind, announcement } => LaneEvent::Bound { kind, announcement },
            Notification::Unbound { kind, announcement } => {
                LaneEvent::Unbound { kind, announcement }
            }
        };
        self.push(event);
    }
}
