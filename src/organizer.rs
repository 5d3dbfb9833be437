//! Task organizer protocol.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::geometry::Rect;
use crate::services::{Services, SurfaceLeash};
use crate::task::{
    ActivityType, ConfigChanges, PinnedParams, ResizeMode, TaskConfiguration, TaskId, TaskRef,
    WindowingMode,
};

/// Identity of one registered organizer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OrganizerId(pub u64);

/// Snapshot of a task shipped to organizers.
#[derive(Clone, Debug, PartialEq)]
pub struct RunningTaskInfo {
    pub task_id: TaskId,
    pub activity_type: ActivityType,
    pub windowing_mode: WindowingMode,
    pub bounds: Rect,
    pub is_resizeable: bool,
    pub pinned_params: Option<PinnedParams>,
    pub description: Option<String>,
    pub config: TaskConfiguration,
}

impl RunningTaskInfo {
    /// Fill a snapshot from the task's current state.
    pub fn from_task(task: &TaskRef) -> Self {
        let task = task.borrow();
        Self {
            task_id: task.id,
            activity_type: task.activity_type(),
            windowing_mode: task.windowing_mode(),
            bounds: task.bounds,
            is_resizeable: task.resize_mode == ResizeMode::Resizeable,
            pinned_params: task.pinned_params.clone(),
            description: task.description.clone(),
            config: task.config.clone(),
        }
    }

    /// Check whether anything an organizer can react to differs.
    ///
    /// Field-level equality over the controllable fields plus a masked
    /// configuration diff; uncontrollable configuration churn never
    /// triggers a dispatch.
    fn controllable_change(&self, other: &RunningTaskInfo) -> bool {
        self.activity_type != other.activity_type
            || self.windowing_mode != other.windowing_mode
            || self.bounds != other.bounds
            || self.is_resizeable != other.is_resizeable
            || self.pinned_params != other.pinned_params
            || self.description != other.description
            || self
                .config
                .diff(&other.config)
                .intersects(ConfigChanges::CONTROLLABLE)
    }
}

/// Out-of-process delegate receiving task lifecycle callbacks.
pub trait TaskOrganizer {
    /// A task came under this organizer's control.
    fn on_task_appeared(&self, info: &RunningTaskInfo, leash: SurfaceLeash);

    /// A task left this organizer's control.
    fn on_task_vanished(&self, info: &RunningTaskInfo);

    /// A controllable property of an organized task changed.
    fn on_task_info_changed(&self, info: &RunningTaskInfo);

    /// Back was pressed on the root of an organized task.
    ///
    /// Returns whether the organizer consumed the event.
    fn on_back_pressed_on_task_root(&self, info: &RunningTaskInfo) -> bool;
}

/// Per-registration organizer record.
struct OrganizerState {
    id: OrganizerId,
    callbacks: Rc<dyn TaskOrganizer>,
    disposed: bool,
}

/// Result of a successful organizer registration.
///
/// Pre-existing tasks are delivered here instead of through callbacks so the
/// caller holds the organizer reference before the first event arrives.
pub struct TaskOrganizerRegistration {
    pub id: OrganizerId,
    pub existing: Vec<(RunningTaskInfo, SurfaceLeash)>,
}

/// Priority-ordered organizer registry.
///
/// The most recently registered live organizer owns every organized task;
/// when it goes away, tasks re-resolve against the remaining list and fall
/// back to unorganized.
pub struct TaskOrganizerController {
    /// Registration order; the last live entry has priority.
    organizers: Vec<OrganizerState>,

    next_id: u64,

    /// Snapshot last sent per task, for diffing.
    last_sent: HashMap<TaskId, RunningTaskInfo>,

    /// Dispatch is deferred while a batched relayout runs.
    deferred: bool,

    /// Tasks with queued info changes, flushed when layout completes.
    pending: Vec<TaskRef>,
}

impl Default for TaskOrganizerController {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskOrganizerController {
    pub fn new() -> Self {
        Self {
            organizers: Vec::new(),
            next_id: 0,
            last_sent: HashMap::new(),
            deferred: false,
            pending: Vec::new(),
        }
    }

    /// Register an organizer and hand it all currently organized tasks.
    pub fn register_task_organizer(
        &mut self,
        callbacks: Rc<dyn TaskOrganizer>,
        tasks: &[TaskRef],
        services: &Services,
    ) -> TaskOrganizerRegistration {
        self.next_id += 1;
        let id = OrganizerId(self.next_id);
        self.organizers.push(OrganizerState { id, callbacks, disposed: false });
        debug!("task organizer {id:?} registered");

        // Existing tasks are marked appeared without a callback and returned
        // with their leashes in the registration result itself.
        let mut existing = Vec::new();
        for task in tasks {
            if let Some((info, leash)) = self.adopt_task(task, services, false) {
                existing.push((info, leash));
            }
        }

        TaskOrganizerRegistration { id, existing }
    }

    /// Remove an organizer, handing its tasks to the next in line.
    pub fn unregister_task_organizer(
        &mut self,
        id: OrganizerId,
        tasks: &[TaskRef],
        services: &Services,
    ) {
        let state = match self.organizers.iter_mut().find(|state| state.id == id) {
            Some(state) => state,
            None => {
                warn!("unregister for unknown organizer {id:?}");
                return;
            },
        };
        state.disposed = true;
        debug!("task organizer {id:?} unregistered");

        // Orphaned tasks re-resolve against the remaining priority list.
        for task in tasks {
            if task.borrow().organizer == Some(id.0) {
                self.adopt_task(task, services, true);
            }
        }

        self.organizers.retain(|state| state.id != id);
    }

    /// The organizer's connection died; equivalent to unregistration.
    pub fn on_organizer_connection_closed(
        &mut self,
        id: OrganizerId,
        tasks: &[TaskRef],
        services: &Services,
    ) {
        warn!("task organizer {id:?} connection closed");
        self.unregister_task_organizer(id, tasks, services);
    }

    /// Hand a task to the current top-priority organizer.
    ///
    /// With `dispatch` the new owner is notified through its callback;
    /// otherwise the (info, leash) pair is returned for delivery in a
    /// registration result. Returns `None` when ownership did not change or
    /// no organizer remains.
    fn adopt_task(
        &mut self,
        task: &TaskRef,
        services: &Services,
        dispatch: bool,
    ) -> Option<(RunningTaskInfo, SurfaceLeash)> {
        let new_owner = self.top_organizer_id();
        let current = task.borrow().organizer;
        if current == new_owner.map(|id| id.0) {
            return None;
        }

        // The previous owner sees the task vanish first.
        if let Some(previous) = current {
            self.dispatch_vanished(OrganizerId(previous), task);
        }

        task.borrow_mut().organizer = new_owner.map(|id| id.0);

        let new_owner = new_owner?;
        let info = RunningTaskInfo::from_task(task);
        self.last_sent.insert(info.task_id, info.clone());
        let leash = services.create_leash(info.task_id);

        if !dispatch {
            return Some((info, leash));
        }

        if let Some(state) = self.live_organizer(new_owner) {
            state.callbacks.on_task_appeared(&info, leash);
        }
        None
    }

    /// A task joined the hierarchy.
    pub fn on_task_appeared(&mut self, task: &TaskRef, services: &Services) {
        self.adopt_task(task, services, true);
    }

    /// A task left the hierarchy.
    pub fn on_task_vanished(&mut self, task: &TaskRef) {
        if let Some(owner) = task.borrow().organizer {
            self.dispatch_vanished(OrganizerId(owner), task);
        }
        task.borrow_mut().organizer = None;
        self.last_sent.remove(&task.borrow().id);
        self.pending.retain(|pending| !Rc::ptr_eq(pending, task));
    }

    fn dispatch_vanished(&self, id: OrganizerId, task: &TaskRef) {
        let state = match self.live_organizer(id) {
            Some(state) => state,
            // Disposed organizers see nothing further.
            None => return,
        };

        let info = self
            .last_sent
            .get(&task.borrow().id)
            .cloned()
            .unwrap_or_else(|| RunningTaskInfo::from_task(task));
        state.callbacks.on_task_vanished(&info);
    }

    /// Send a diffed info-changed event for a task.
    ///
    /// While layout is deferred the change queues instead, so receivers
    /// never observe transient intermediate states of a multi-step reflow.
    pub fn dispatch_task_info_changed(&mut self, task: &TaskRef) {
        if task.borrow().organizer.is_none() {
            return;
        }

        if self.deferred {
            if !self.pending.iter().any(|pending| Rc::ptr_eq(pending, task)) {
                self.pending.push(task.clone());
            }
            return;
        }

        self.dispatch_info_now(task);
    }

    fn dispatch_info_now(&mut self, task: &TaskRef) {
        let owner = match task.borrow().organizer {
            Some(owner) => OrganizerId(owner),
            None => return,
        };

        let info = RunningTaskInfo::from_task(task);
        let unchanged = self
            .last_sent
            .get(&info.task_id)
            .is_some_and(|last| !last.controllable_change(&info));
        if unchanged {
            return;
        }

        self.last_sent.insert(info.task_id, info.clone());
        if let Some(state) = self.live_organizer(owner) {
            state.callbacks.on_task_info_changed(&info);
        }
    }

    /// Hold back info dispatch during a batched relayout.
    pub fn defer_dispatch(&mut self) {
        self.deferred = true;
    }

    /// Resume dispatch, flushing everything queued while deferred.
    pub fn continue_dispatch(&mut self) {
        if !self.deferred {
            return;
        }

        self.deferred = false;
        for task in std::mem::take(&mut self.pending) {
            self.dispatch_info_now(&task);
        }
    }

    /// Route a back press on a task root to its organizer.
    pub fn handle_back_pressed_on_task_root(&self, task: &TaskRef) -> bool {
        let owner = match task.borrow().organizer {
            Some(owner) => OrganizerId(owner),
            None => return false,
        };

        let state = match self.live_organizer(owner) {
            Some(state) => state,
            None => return false,
        };

        let info = RunningTaskInfo::from_task(task);
        state.callbacks.on_back_pressed_on_task_root(&info)
    }

    /// Organizer currently owning a task, if any.
    pub fn task_organizer(&self, task: &TaskRef) -> Option<OrganizerId> {
        task.borrow().organizer.map(OrganizerId)
    }

    /// Highest-priority live organizer.
    fn top_organizer_id(&self) -> Option<OrganizerId> {
        self.organizers.iter().rev().find(|state| !state.disposed).map(|state| state.id)
    }

    fn live_organizer(&self, id: OrganizerId) -> Option<&OrganizerState> {
        self.organizers.iter().find(|state| state.id == id && !state.disposed)
    }
}
