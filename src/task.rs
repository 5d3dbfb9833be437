//! Task containers.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use tracing::debug;

use crate::activity::{ActivityRef, ActivityState};
use crate::geometry::{Rect, Size};

/// Counter for task IDs.
static NEXT_TASK_ID: AtomicU32 = AtomicU32::new(1);

/// Shared handle to a task.
pub type TaskRef = Rc<RefCell<Task>>;

/// Process-lifetime-unique task ID.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u32);

/// Windowing mode of a container.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum WindowingMode {
    #[default]
    Undefined,
    Fullscreen,
    Pinned,
    SplitScreenPrimary,
    SplitScreenSecondary,
    Freeform,
}

/// Kind of content a task hosts.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ActivityType {
    #[default]
    Undefined,
    Standard,
    Home,
    Recents,
    Assistant,
    Dream,
}

/// Task reaction to bounds changes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ResizeMode {
    Unresizeable,
    #[default]
    Resizeable,
}

/// Parameters steering the pinned presentation of a task.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PinnedParams {
    pub aspect_ratio: Option<(u32, u32)>,
    pub auto_enter: bool,
}

bitflags! {
    /// Bits describing which parts of a task configuration changed.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct ConfigChanges: u32 {
        const BOUNDS = 1 << 0;
        const ORIENTATION = 1 << 1;
        const SCREEN_SIZE = 1 << 2;
        const DENSITY = 1 << 3;
        const FONT_SCALE = 1 << 4;
        const WINDOWING_MODE = 1 << 5;
    }
}

impl ConfigChanges {
    /// Changes an out-of-process organizer is allowed to react to.
    pub const CONTROLLABLE: Self = Self::BOUNDS
        .union(Self::ORIENTATION)
        .union(Self::SCREEN_SIZE)
        .union(Self::WINDOWING_MODE);
}

/// Bounds-independent configuration snapshot of a task.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskConfiguration {
    pub screen_size: Size,
    pub sideways: bool,
    pub density: u32,
    pub font_scale_pct: u32,
}

impl TaskConfiguration {
    /// Bits differing between two configurations.
    pub fn diff(&self, other: &TaskConfiguration) -> ConfigChanges {
        let mut changes = ConfigChanges::empty();
        if self.screen_size != other.screen_size {
            changes |= ConfigChanges::SCREEN_SIZE;
        }
        if self.sideways != other.sideways {
            changes |= ConfigChanges::ORIENTATION;
        }
        if self.density != other.density {
            changes |= ConfigChanges::DENSITY;
        }
        if self.font_scale_pct != other.font_scale_pct {
            changes |= ConfigChanges::FONT_SCALE;
        }
        changes
    }
}

/// Child slot of a task.
#[derive(Clone, Debug)]
pub enum TaskChild {
    Activity(ActivityRef),
    Task(TaskRef),
}

/// One logical task, or a stack of nested tasks.
///
/// Children are kept in z-order with index 0 at the bottom.
#[derive(Debug)]
pub struct Task {
    pub id: TaskId,

    windowing_mode: WindowingMode,
    activity_type: ActivityType,

    pub bounds: Rect,
    pub resize_mode: ResizeMode,
    pub created_by_organizer: bool,

    /// Z-order based rank used as an oom-score hint; `None` while invisible.
    pub layer_rank: Option<u32>,

    /// Bounds to restore when the task leaves pinned mode.
    pub last_non_fullscreen_bounds: Option<Rect>,

    /// Affinity of the task's root activity, fixed at creation.
    pub affinity: Option<String>,

    pub pinned_params: Option<PinnedParams>,
    pub description: Option<String>,

    /// Organizer currently owning this task's leash.
    pub organizer: Option<u64>,

    pub config: TaskConfiguration,

    children: Vec<TaskChild>,
}

impl Task {
    pub fn new(windowing_mode: WindowingMode, activity_type: ActivityType) -> Self {
        let id = TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed));
        debug!("created task {id:?} mode={windowing_mode:?} type={activity_type:?}");

        Self {
            id,
            windowing_mode,
            activity_type,
            bounds: Rect::default(),
            resize_mode: ResizeMode::default(),
            created_by_organizer: false,
            layer_rank: None,
            last_non_fullscreen_bounds: None,
            affinity: None,
            pinned_params: None,
            description: None,
            organizer: None,
            config: TaskConfiguration::default(),
            children: Vec::new(),
        }
    }

    /// Shared handle for a new task.
    pub fn new_ref(windowing_mode: WindowingMode, activity_type: ActivityType) -> TaskRef {
        Rc::new(RefCell::new(Self::new(windowing_mode, activity_type)))
    }

    pub fn windowing_mode(&self) -> WindowingMode {
        self.windowing_mode
    }

    /// Change the task's windowing mode.
    ///
    /// Entering pinned mode records the current bounds for later restore.
    pub fn set_windowing_mode(&mut self, mode: WindowingMode) {
        if self.windowing_mode == mode {
            return;
        }

        if mode == WindowingMode::Pinned && !self.bounds.is_empty() {
            self.last_non_fullscreen_bounds = Some(self.bounds);
        }

        debug!("task {:?} mode {:?} -> {mode:?}", self.id, self.windowing_mode);
        self.windowing_mode = mode;
    }

    pub fn activity_type(&self) -> ActivityType {
        self.activity_type
    }

    /// Resolve the task's activity type.
    ///
    /// A type resolved away from `Undefined` is immutable; changing it is a
    /// caller bug.
    pub fn set_activity_type(&mut self, activity_type: ActivityType) {
        if self.activity_type == activity_type {
            return;
        }

        assert!(
            self.activity_type == ActivityType::Undefined,
            "task {:?} activity type may not change from {:?} to {activity_type:?}",
            self.id,
            self.activity_type,
        );
        self.activity_type = activity_type;
    }

    /// Check this task against a launch request's mode and type.
    pub fn is_compatible_with(&self, mode: WindowingMode, activity_type: ActivityType) -> bool {
        let type_matches = activity_type == ActivityType::Undefined
            || self.activity_type == ActivityType::Undefined
            || self.activity_type == activity_type;
        let mode_matches = mode == WindowingMode::Undefined
            || self.windowing_mode == WindowingMode::Undefined
            || self.windowing_mode == mode;
        type_matches && mode_matches
    }

    /// Append an activity on top.
    pub fn push_activity(&mut self, activity: ActivityRef) {
        if self.affinity.is_none() && self.children.is_empty() {
            self.affinity = activity.borrow().task_affinity().map(String::from);
        }
        self.children.push(TaskChild::Activity(activity));
    }

    /// Insert an activity at a fixed z position.
    pub fn insert_activity(&mut self, index: usize, activity: ActivityRef) {
        let index = index.min(self.children.len());
        self.children.insert(index, TaskChild::Activity(activity));
    }

    /// Detach an activity; reports whether it was a child.
    pub fn remove_activity(&mut self, activity: &ActivityRef) -> bool {
        let old_len = self.children.len();
        self.children.retain(|child| match child {
            TaskChild::Activity(child) => !Rc::ptr_eq(child, activity),
            TaskChild::Task(_) => true,
        });
        old_len != self.children.len()
    }

    /// Append a child task on top.
    pub fn push_task(&mut self, task: TaskRef) {
        self.children.push(TaskChild::Task(task));
    }

    /// Attach a child task at the bottom of the z-order.
    pub fn push_task_to_bottom(&mut self, task: TaskRef) {
        self.children.insert(0, TaskChild::Task(task));
    }

    /// Detach a child task; reports whether it was a child.
    pub fn remove_task(&mut self, task: &TaskRef) -> bool {
        let old_len = self.children.len();
        self.children.retain(|child| match child {
            TaskChild::Task(child) => !Rc::ptr_eq(child, task),
            TaskChild::Activity(_) => true,
        });
        old_len != self.children.len()
    }

    /// Check if this task has no nested tasks.
    pub fn is_leaf(&self) -> bool {
        !self.children.iter().any(|child| matches!(child, TaskChild::Task(_)))
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Direct child activities, bottom to top.
    pub fn activities(&self) -> impl DoubleEndedIterator<Item = &ActivityRef> {
        self.children.iter().filter_map(|child| match child {
            TaskChild::Activity(activity) => Some(activity),
            TaskChild::Task(_) => None,
        })
    }

    /// Direct child activities, top to bottom, as owned handles.
    pub fn activities_top_down(&self) -> Vec<ActivityRef> {
        self.activities().rev().cloned().collect::<Vec<_>>()
    }

    /// Direct child tasks, bottom to top, as owned handles.
    pub fn child_tasks(&self) -> Vec<TaskRef> {
        self.children
            .iter()
            .filter_map(|child| match child {
                TaskChild::Task(task) => Some(task.clone()),
                TaskChild::Activity(_) => None,
            })
            .collect()
    }

    /// Number of direct children.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Activity child at a z position, if that slot holds an activity.
    pub fn activity_at(&self, index: usize) -> Option<ActivityRef> {
        match self.children.get(index) {
            Some(TaskChild::Activity(activity)) => Some(activity.clone()),
            _ => None,
        }
    }

    /// Z position of an activity among this task's children.
    pub fn position_of(&self, activity: &ActivityRef) -> Option<usize> {
        self.children.iter().position(|child| match child {
            TaskChild::Activity(child) => Rc::ptr_eq(child, activity),
            TaskChild::Task(_) => false,
        })
    }

    /// Number of activities not on their way out.
    pub fn running_activity_count(&self) -> usize {
        self.activities().filter(|activity| activity.borrow().is_running()).count()
    }

    /// Topmost activity matching the supplied filters.
    pub fn top_activity(&self, include_finishing: bool, include_overlays: bool) -> Option<ActivityRef> {
        self.activities().rev().find(|activity| {
            let activity = activity.borrow();
            (include_finishing || !activity.finishing)
                && (include_overlays || !activity.task_overlay)
        }).cloned()
    }

    /// Topmost activity still participating in resume.
    pub fn top_running_activity(&self) -> Option<ActivityRef> {
        self.activities()
            .rev()
            .find(|activity| activity.borrow().is_running())
            .cloned()
    }

    /// Bottom-most non-overlay activity; the task's logical root.
    pub fn root_activity(&self) -> Option<ActivityRef> {
        self.activities()
            .find(|activity| {
                let activity = activity.borrow();
                !activity.finishing && !activity.task_overlay
            })
            .cloned()
    }

    /// Check if this task currently wants any of its content visible.
    pub fn has_visible_content(&self) -> bool {
        self.top_running_activity()
            .is_some_and(|activity| activity.borrow().visible_requested)
    }

    /// Check if the task can take focus.
    pub fn is_focusable(&self) -> bool {
        self.top_running_activity().is_some()
    }

    /// Check if a resumed activity is on top of this task.
    pub fn has_resumed_activity(&self) -> bool {
        self.activities()
            .any(|activity| activity.borrow().state == ActivityState::Resumed)
    }
}

/// Collect all leaf tasks beneath (and including) a stack, bottom to top.
pub fn leaf_tasks(stack: &TaskRef) -> Vec<TaskRef> {
    let children = stack.borrow().child_tasks();
    if children.is_empty() {
        return vec![stack.clone()];
    }

    let mut leaves = Vec::new();
    for child in children {
        leaves.extend(leaf_tasks(&child));
    }
    leaves
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::activity::ActivityRecord;
    use crate::intent::{ActivityInfo, ApplicationInfo, ComponentName, Intent, UserId};

    pub(crate) fn activity(class: &str) -> ActivityRef {
        let component = ComponentName::new("org.example.app", class);
        let application = ApplicationInfo::new("org.example.app", 10_001, UserId(0));
        let info = ActivityInfo::new(component, application);
        let intent = Intent::for_component(info.component.clone());
        ActivityRecord::new_ref(info, intent, UserId(0))
    }

    #[test]
    fn ids_are_unique_and_monotonic() {
        let first = Task::new(WindowingMode::Fullscreen, ActivityType::Standard);
        let second = Task::new(WindowingMode::Fullscreen, ActivityType::Standard);
        assert!(second.id > first.id);
    }

    #[test]
    #[should_panic(expected = "activity type may not change")]
    fn activity_type_is_sticky() {
        let mut task = Task::new(WindowingMode::Fullscreen, ActivityType::Undefined);
        task.set_activity_type(ActivityType::Home);
        task.set_activity_type(ActivityType::Standard);
    }

    #[test]
    fn top_running_skips_finishing() {
        let task = Task::new_ref(WindowingMode::Fullscreen, ActivityType::Standard);
        let bottom = activity("Root");
        let top = activity("Detail");
        task.borrow_mut().push_activity(bottom.clone());
        task.borrow_mut().push_activity(top.clone());

        top.borrow_mut().finish();

        let running = task.borrow().top_running_activity().unwrap();
        assert!(Rc::ptr_eq(&running, &bottom));
    }

    #[test]
    fn pinned_mode_records_restore_bounds() {
        let mut task = Task::new(WindowingMode::Fullscreen, ActivityType::Standard);
        task.bounds = Rect::new((0, 0), (400, 600));

        task.set_windowing_mode(WindowingMode::Pinned);
        assert_eq!(task.last_non_fullscreen_bounds, Some(Rect::new((0, 0), (400, 600))));
    }

    #[test]
    fn leaf_collection_recurses() {
        let stack = Task::new_ref(WindowingMode::Fullscreen, ActivityType::Standard);
        let inner = Task::new_ref(WindowingMode::Fullscreen, ActivityType::Standard);
        let leaf_a = Task::new_ref(WindowingMode::Fullscreen, ActivityType::Standard);
        inner.borrow_mut().push_task(leaf_a.clone());
        stack.borrow_mut().push_task(inner);

        let leaves = leaf_tasks(&stack);
        assert_eq!(leaves.len(), 1);
        assert!(Rc::ptr_eq(&leaves[0], &leaf_a));
    }
}
