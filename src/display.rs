//! Display contents and task display areas.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use tracing::debug;

use crate::activity::ActivityRef;
use crate::config::Config;
use crate::frames::DisplayFrames;
use crate::geometry::{Insets, Rotation, Size};
use crate::policy::DisplayPolicy;
use crate::task::{leaf_tasks, ActivityType, Task, TaskId, TaskRef, WindowingMode};
use crate::window::WindowRef;

/// Identifier of one logical display.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DisplayId(pub u32);

/// The display that always exists and can never be removed.
pub const DEFAULT_DISPLAY: DisplayId = DisplayId(0);

/// Static properties of a display snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayInfo {
    /// Natural (rotation 0) logical size.
    pub size: Size,
    pub rotation: Rotation,
    pub cutout: Insets,

    /// Display hosts exactly one task per stack; extracted tasks reroute.
    pub single_task_instance: bool,
}

impl DisplayInfo {
    pub fn new(size: impl Into<Size>) -> Self {
        Self {
            size: size.into(),
            rotation: Rotation::default(),
            cutout: Insets::default(),
            single_task_instance: false,
        }
    }
}

/// App transition staged on a display.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransitionKind {
    ActivityOpen,
    ActivityClose,
    CrashingActivityClose,
    Sleep,
    Wake,
}

/// A logical region of a display hosting a z-ordered list of stacks.
#[derive(Debug)]
pub struct TaskDisplayArea {
    pub name: String,

    /// Area is a launch root and preferred for new stacks.
    pub launch_root: bool,

    /// Stacks in z-order, index 0 at the bottom.
    stacks: Vec<TaskRef>,
}

impl TaskDisplayArea {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), launch_root: false, stacks: Vec::new() }
    }

    /// Stacks from top of the z-order down, as owned handles.
    pub fn stacks_top_down(&self) -> Vec<TaskRef> {
        self.stacks.iter().rev().cloned().collect()
    }

    /// Topmost stack.
    pub fn top_stack(&self) -> Option<TaskRef> {
        self.stacks.last().cloned()
    }

    /// Bottom-most stack whose affinity matches.
    pub fn bottom_stack_with_affinity(&self, affinity: &str) -> Option<TaskRef> {
        self.stacks
            .iter()
            .find(|stack| stack.borrow().affinity.as_deref() == Some(affinity))
            .cloned()
    }

    /// Attach a stack on top.
    pub fn push_stack(&mut self, stack: TaskRef) {
        self.stacks.push(stack);
    }

    /// Attach a stack at the bottom of the z-order.
    pub fn push_stack_to_bottom(&mut self, stack: TaskRef) {
        self.stacks.insert(0, stack);
    }

    /// Detach a stack; reports whether it was attached here.
    pub fn remove_stack(&mut self, stack: &TaskRef) -> bool {
        let old_len = self.stacks.len();
        self.stacks.retain(|candidate| !Rc::ptr_eq(candidate, stack));
        old_len != self.stacks.len()
    }

    /// Raise a stack to the top of the z-order.
    pub fn move_stack_to_top(&mut self, stack: &TaskRef) {
        if self.remove_stack(stack) {
            self.stacks.push(stack.clone());
        }
    }

    /// Create a stack with the requested mode and type.
    pub fn create_stack(
        &mut self,
        windowing_mode: WindowingMode,
        activity_type: ActivityType,
        on_top: bool,
    ) -> TaskRef {
        let stack = Task::new_ref(windowing_mode, activity_type);
        if on_top {
            self.push_stack(stack.clone());
        } else {
            self.push_stack_to_bottom(stack.clone());
        }
        stack
    }

    /// Find an existing compatible stack, else create one.
    ///
    /// Organizer-created stacks are never reused for direct launches.
    pub fn get_or_create_stack(
        &mut self,
        windowing_mode: WindowingMode,
        activity_type: ActivityType,
        on_top: bool,
    ) -> TaskRef {
        let existing = self
            .stacks
            .iter()
            .rev()
            .find(|stack| {
                let stack = stack.borrow();
                !stack.created_by_organizer
                    && stack.is_compatible_with(windowing_mode, activity_type)
            })
            .cloned();
        match existing {
            Some(stack) => stack,
            None => self.create_stack(windowing_mode, activity_type, on_top),
        }
    }

    pub fn stack_count(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }
}

/// One physical or virtual display and everything attached to it.
#[derive(Debug)]
pub struct DisplayContent {
    pub id: DisplayId,
    pub info: DisplayInfo,

    /// Display is in its sleeping state.
    pub sleeping: bool,

    /// Keys of live sleep tokens held against this display.
    sleep_tokens: IndexSet<u64>,

    /// Task display areas in z-order, index 0 at the bottom.
    ///
    /// The area at index 0 is also the display's default area.
    areas: Vec<TaskDisplayArea>,

    pub policy: DisplayPolicy,
    pub frames: DisplayFrames,

    pub focused_window: Option<WindowRef>,
    pub focused_app: Option<ActivityRef>,
    focused_stack: Option<Weak<RefCell<Task>>>,

    /// Transition staged for the next placement pass.
    pub pending_transition: Option<TransitionKind>,
}

impl DisplayContent {
    pub fn new(id: DisplayId, info: DisplayInfo, config: &Config) -> Self {
        let frames = DisplayFrames::new(info.size, info.rotation, info.cutout);
        let policy = DisplayPolicy::new(id == DEFAULT_DISPLAY, config);

        Self {
            id,
            info,
            sleeping: false,
            sleep_tokens: IndexSet::new(),
            areas: vec![TaskDisplayArea::new("default")],
            policy,
            frames,
            focused_window: None,
            focused_app: None,
            focused_stack: None,
            pending_transition: None,
        }
    }

    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_DISPLAY
    }

    /// The display's default task display area.
    pub fn default_area(&self) -> &TaskDisplayArea {
        &self.areas[0]
    }

    pub fn default_area_mut(&mut self) -> &mut TaskDisplayArea {
        &mut self.areas[0]
    }

    /// All areas, bottom to top.
    pub fn areas(&self) -> &[TaskDisplayArea] {
        &self.areas
    }

    pub fn areas_mut(&mut self) -> &mut [TaskDisplayArea] {
        &mut self.areas
    }

    /// Attach an additional area above the existing ones.
    pub fn add_area(&mut self, area: TaskDisplayArea) {
        self.areas.push(area);
    }

    /// Area preferred for launches, honoring launch roots.
    pub fn launch_area_index(&self) -> usize {
        self.areas
            .iter()
            .rposition(|area| area.launch_root)
            .unwrap_or(0)
    }

    /// All stacks on the display from top of the z-order down.
    pub fn stacks_top_down(&self) -> Vec<TaskRef> {
        let mut stacks = Vec::new();
        for area in self.areas.iter().rev() {
            stacks.extend(area.stacks_top_down());
        }
        stacks
    }

    /// Find the area currently containing a stack.
    pub fn area_of_stack(&mut self, stack: &TaskRef) -> Option<&mut TaskDisplayArea> {
        self.areas.iter_mut().find(|area| {
            area.stacks.iter().any(|candidate| Rc::ptr_eq(candidate, stack))
        })
    }

    /// Find a task anywhere on this display by ID.
    pub fn find_task(&self, id: TaskId) -> Option<TaskRef> {
        for stack in self.stacks_top_down() {
            for leaf in leaf_tasks(&stack) {
                if leaf.borrow().id == id {
                    return Some(leaf);
                }
            }
            if stack.borrow().id == id {
                return Some(stack);
            }
        }
        None
    }

    /// Find the stack (root task) containing a task ID.
    pub fn stack_of_task(&self, id: TaskId) -> Option<TaskRef> {
        self.stacks_top_down().into_iter().find(|stack| {
            stack.borrow().id == id
                || leaf_tasks(stack).iter().any(|leaf| leaf.borrow().id == id)
        })
    }

    /// Recompute this display's focused window and focused app.
    ///
    /// The focused window is the topmost focusable window of a visible
    /// activity; the focused app may be set even when no window is ready
    /// yet. The expanded notification shade outranks app windows.
    pub fn update_focused_window(&mut self) {
        let mut focused_window = None;
        let mut focused_app = None;
        let mut focused_stack = None;

        if let Some(shade) = self.policy.notification_shade() {
            let grabs_focus = {
                let shade = shade.borrow();
                shade.visible && shade.can_receive_focus()
            };
            if grabs_focus {
                focused_window = Some(shade);
            }
        }

        if focused_window.is_none() {
            for stack in self.stacks_top_down() {
                let top = match stack.borrow().top_running_activity() {
                    Some(top) => top,
                    None => continue,
                };

                let (visible, window) = {
                    let top = top.borrow();
                    (top.visible_requested, top.focusable_window())
                };
                if !visible {
                    continue;
                }

                if focused_app.is_none() {
                    focused_app = Some(top.clone());
                    focused_stack = Some(Rc::downgrade(&stack));
                }

                if let Some(window) = window {
                    focused_window = Some(window);
                    focused_stack = Some(Rc::downgrade(&stack));
                    break;
                }
            }
        }

        self.policy.focus_changed(focused_window.clone());
        self.focused_window = focused_window;
        self.focused_app = focused_app;
        self.focused_stack = focused_stack;
    }

    /// Stack currently holding this display's focus.
    pub fn focused_stack(&self) -> Option<TaskRef> {
        self.focused_stack.as_ref().and_then(Weak::upgrade)
    }

    pub fn set_focused_stack(&mut self, stack: Option<&TaskRef>) {
        self.focused_stack = stack.map(Rc::downgrade);
    }

    /// Apply new display properties, rebuilding the frame snapshot.
    pub fn update_info(&mut self, info: DisplayInfo) {
        if self.info == info {
            return;
        }

        debug!("display {:?} info changed", self.id);
        self.info = info;
        self.frames =
            DisplayFrames::new(self.info.size, self.info.rotation, self.info.cutout);
    }

    /// Rotate the display content.
    pub fn set_rotation(&mut self, rotation: Rotation) {
        let mut info = self.info.clone();
        info.rotation = rotation;
        self.update_info(info);
    }

    // Sleep token accounting.

    /// Check if a sleep token forces this display asleep.
    pub fn should_sleep(&self) -> bool {
        !self.sleep_tokens.is_empty()
    }

    pub fn add_sleep_token(&mut self, key: u64) {
        self.sleep_tokens.insert(key);
    }

    /// Remove a sleep token key; reports whether it was the last one.
    pub fn remove_sleep_token(&mut self, key: u64) -> bool {
        self.sleep_tokens.shift_remove(&key) && self.sleep_tokens.is_empty()
    }

    pub fn sleep_token_count(&self) -> usize {
        self.sleep_tokens.len()
    }

    /// Stage a transition for the next placement pass.
    pub fn prepare_transition(&mut self, kind: TransitionKind) {
        self.pending_transition = Some(kind);
    }
}
