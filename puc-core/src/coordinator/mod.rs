// puc-core/src/coordinator/mod.rs
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use puc_common::events::ContainerEvent;
use puc_common::model::{
    ActivationState, Announcement, AnnouncementId, CapabilityKind, WorkItem, WorkItemId,
};
use threadpool::ThreadPool;
use tokio::sync::broadcast;
use tracing::debug;

use crate::lifecycle::{LifecycleManager, Selections};

mod lane;

pub(crate) use lane::{Lane, LaneEvent};

/// What the lane has to do after a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Stay,
    Activate,
    Deactivate,
    /// Active with a replaced selection: retract, then activate again.
    Restart,
}

/// Bookkeeping of one declared work item.
#[derive(Debug)]
pub(crate) struct WorkItemState {
    pub(crate) item: WorkItem,
    required: BTreeSet<CapabilityKind>,
    bound: BTreeMap<CapabilityKind, Arc<Announcement>>,
    pub(crate) state: ActivationState,
}

impl WorkItemState {
    pub(crate) fn new(item: WorkItem) -> Self {
        Self {
            required: item.required_kinds(),
            item,
            bound: BTreeMap::new(),
            state: ActivationState::Waiting,
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.required.iter().all(|kind| self.bound.contains_key(kind))
    }

    pub(crate) fn selections(&self) -> Selections {
        self.bound.clone()
    }

    /// Entry check right after declaration; an item without requirements is
    /// ready at once.
    pub(crate) fn on_declared(&self) -> Transition {
        if self.is_complete() {
            Transition::Activate
        } else {
            Transition::Stay
        }
    }

    pub(crate) fn on_bound(
        &mut self,
        kind: CapabilityKind,
        announcement: Arc<Announcement>,
    ) -> Transition {
        if !self.required.contains(&kind) {
            return Transition::Stay;
        }
        let replaced = self.bound.insert(kind, Arc::clone(&announcement));
        match self.state {
            ActivationState::Active => match replaced {
                Some(previous) if previous.id == announcement.id => Transition::Stay,
                _ => {
                    self.state = ActivationState::Waiting;
                    Transition::Restart
                }
            },
            ActivationState::Waiting if self.is_complete() => Transition::Activate,
            ActivationState::Waiting => Transition::Stay,
        }
    }

    pub(crate) fn on_unbound(&mut self, kind: &CapabilityKind, id: AnnouncementId) -> Transition {
        if self.bound.get(kind).is_none_or(|current| current.id != id) {
            return Transition::Stay;
        }
        self.bound.remove(kind);
        match self.state {
            ActivationState::Active => {
                self.state = ActivationState::Waiting;
                Transition::Deactivate
            }
            ActivationState::Waiting => Transition::Stay,
        }
    }

    pub(crate) fn on_withdrawn(&mut self) -> Transition {
        match std::mem::replace(&mut self.state, ActivationState::Waiting) {
            ActivationState::Active => Transition::Deactivate,
            ActivationState::Waiting => Transition::Stay,
        }
    }
}

pub(crate) struct CoordinatorInner {
    /// Grows whenever every worker is busy, so a lane stuck in a slow
    /// factory call never keeps another lane waiting for a thread.
    pool: Mutex<ThreadPool>,
    lanes: Mutex<HashMap<WorkItemId, Arc<Lane>>>,
    pub(crate) lifecycle: LifecycleManager,
    pub(crate) events: broadcast::Sender<ContainerEvent>,
}

impl CoordinatorInner {
    pub(crate) fn execute(&self, job: impl FnOnce() + Send + 'static) {
        let mut pool = self.pool.lock();
        let workers = pool.max_count();
        if pool.active_count() + pool.queued_count() >= workers {
            debug!("All {} lane workers busy, adding one", workers);
            pool.set_num_threads(workers + 1);
        }
        pool.execute(job);
    }

    /// Drops `lane` from the table if it is still the registered lane and
    /// nothing new was queued on it.
    pub(crate) fn retire(&self, lane: &Arc<Lane>) {
        let mut lanes = self.lanes.lock();
        if lane.is_drained()
            && lanes
                .get(lane.id())
                .is_some_and(|current| Arc::ptr_eq(current, lane))
        {
            lanes.remove(lane.id());
            debug!("[{}] Lane retired", lane.id());
        }
    }
}

/// Serialises the events of each work item onto its own lane and runs the
/// lanes on a shared worker pool.
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    pub fn new(
        workers: usize,
        lifecycle: LifecycleManager,
        events: broadcast::Sender<ContainerEvent>,
    ) -> Self {
        let workers = workers.max(1);
        debug!("Coordinator worker pool started with {} workers.", workers);
        Self {
            inner: Arc::new(CoordinatorInner {
                pool: Mutex::new(ThreadPool::with_name("puc-lane".to_string(), workers)),
                lanes: Mutex::new(HashMap::new()),
                lifecycle,
                events,
            }),
        }
    }

    /// Queues the declaration of `item` and returns the lane the trackers
    /// report its selections to. A lane still draining a withdrawal of the
    /// same id is reused so the old activation is retracted first.
    pub(crate) fn declare(&self, item: WorkItem) -> Arc<Lane> {
        let id = item.id();
        let mut lanes = self.inner.lanes.lock();
        let lane = lanes
            .entry(id.clone())
            .or_insert_with(|| Lane::new(id, Arc::downgrade(&self.inner)))
            .clone();
        lane.push(LaneEvent::Declare(Box::new(item)));
        lane
    }

    pub(crate) fn withdraw(&self, id: &WorkItemId) {
        if let Some(lane) = self.inner.lanes.lock().get(id) {
            lane.push(LaneEvent::Withdraw);
        }
    }

    /// Last processed state of `id`, `None` once withdrawn.
    pub fn state(&self, id: &WorkItemId) -> Option<ActivationState> {
        self.inner.lanes.lock().get(id).and_then(|lane| lane.state())
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.inner.lifecycle
    }

    /// Blocks until every queued lane event has been processed.
    pub fn wait_idle(&self) {
        // a clone shares the workers; joining it leaves the lock free for
        // lanes scheduled meanwhile
        let pool = self.inner.pool.lock().clone();
        pool.join();
    }
}
