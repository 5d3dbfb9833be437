//! Task relaunch reset handling.

use std::rc::Rc;

use tracing::debug;

use crate::activity::ActivityRef;
use crate::intent::{ActivityFlags, LaunchMode};
use crate::task::{Task, TaskRef};

/// Single-pass helper reorganizing a stack when a task is relaunched with
/// reset semantics.
///
/// The helper is stateful and single-use: call [`ResetTargetTaskHelper::reset`]
/// before every [`ResetTargetTaskHelper::process`]. The order of operations is
/// load-bearing: reply-chain deferral happens before reparenting, reparenting
/// before finishing, so results are never delivered to destroyed activities.
#[derive(Debug, Default)]
pub struct ResetTargetTaskHelper {
    /// Activities deferred because they sit mid reply-chain.
    pending_reply_chain: Vec<ActivityRef>,

    /// Tasks created for extracted activities, placed later by the caller.
    created_tasks: Vec<TaskRef>,

    /// Stable insertion index for activities pulled into the target task.
    reparent_insert_position: Option<usize>,

    target_affinity: Option<String>,
    force_reset: bool,

    /// Any activity was finished or moved.
    changed: bool,
}

impl ResetTargetTaskHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all traversal state; required before each `process` call.
    pub fn reset(&mut self) {
        self.pending_reply_chain.clear();
        self.created_tasks.clear();
        self.reparent_insert_position = None;
        self.target_affinity = None;
        self.force_reset = false;
        self.changed = false;
    }

    /// Reorganize `stack` around a relaunch of `target`.
    ///
    /// Walks the stack's tasks from the top of the z-order down; tasks below
    /// the target are left untouched. Returns whether anything changed.
    pub fn process(&mut self, stack: &TaskRef, target: &TaskRef, force_reset: bool) -> bool {
        assert!(
            self.pending_reply_chain.is_empty() && self.created_tasks.is_empty(),
            "reset helper reused without reset()",
        );

        self.force_reset = force_reset;
        self.target_affinity = target.borrow().affinity.clone();

        let mut tasks = stack.borrow().child_tasks();
        if tasks.is_empty() && Rc::ptr_eq(stack, target) {
            tasks.push(stack.clone());
        }

        for task in tasks.iter().rev() {
            if Rc::ptr_eq(task, target) {
                self.process_target_task(stack, target);
                // Tasks below the target keep their state.
                break;
            }

            self.process_task_above_target(task, target);
        }

        self.changed
    }

    /// Tasks created for extracted activities, awaiting placement.
    pub fn take_created_tasks(&mut self) -> Vec<TaskRef> {
        std::mem::take(&mut self.created_tasks)
    }

    /// Walk the target task itself, top to bottom.
    fn process_target_task(&mut self, stack: &TaskRef, target: &TaskRef) {
        let root = target.borrow().root_activity();
        let target_affinity = target.borrow().affinity.clone();

        let activities = target.borrow().activities_top_down();
        for activity in activities {
            // The root activity is the sentinel ending the walk.
            if root.as_ref().is_some_and(|root| Rc::ptr_eq(root, &activity)) {
                break;
            }

            if activity.borrow().finishing {
                continue;
            }

            // Mid reply-chain activities must not be acted on in isolation.
            if activity.borrow().result_to.is_some() {
                self.pending_reply_chain.push(activity);
                continue;
            }

            let (reparenting, finish_on_launch, clear_on_reset, affinity) = {
                let activity = activity.borrow();
                (
                    activity.has_flag(ActivityFlags::ALLOW_TASK_REPARENTING),
                    activity.has_flag(ActivityFlags::FINISH_ON_TASK_LAUNCH),
                    activity.has_flag(ActivityFlags::CLEAR_WHEN_TASK_RESET),
                    activity.task_affinity().map(String::from),
                )
            };

            let foreign_affinity = match (&affinity, &target_affinity) {
                (Some(affinity), Some(target)) => affinity != target,
                (Some(_), None) => true,
                (None, _) => false,
            };

            if reparenting && foreign_affinity {
                self.reparent_out(stack, target, activity, affinity);
            } else if finish_on_launch || clear_on_reset || self.force_reset {
                self.finish_with_reply_chain(activity);
            } else {
                // The activity stays; anything replying to it stays with it.
                self.pending_reply_chain.clear();
            }
        }

        self.pending_reply_chain.clear();
    }

    /// Push an activity (and its deferred reply chain) out of the target.
    fn reparent_out(
        &mut self,
        stack: &TaskRef,
        target: &TaskRef,
        activity: ActivityRef,
        affinity: Option<String>,
    ) {
        let destination = affinity
            .as_deref()
            .and_then(|affinity| self.bottom_task_with_affinity(stack, target, affinity))
            .unwrap_or_else(|| self.create_extraction_task(target, affinity.clone()));

        debug!(
            "reset: reparenting {} into task {:?}",
            activity.borrow().component(),
            destination.borrow().id,
        );

        target.borrow_mut().remove_activity(&activity);
        destination.borrow_mut().push_activity(activity);

        // The reply chain above the mover belongs with it.
        for deferred in std::mem::take(&mut self.pending_reply_chain).into_iter().rev() {
            target.borrow_mut().remove_activity(&deferred);
            destination.borrow_mut().push_activity(deferred);
        }

        self.changed = true;
    }

    /// Finish an activity together with its entire pending reply chain.
    fn finish_with_reply_chain(&mut self, activity: ActivityRef) {
        debug!("reset: finishing {}", activity.borrow().component());
        activity.borrow_mut().finish();

        for deferred in std::mem::take(&mut self.pending_reply_chain) {
            deferred.borrow_mut().finish();
        }

        self.changed = true;
    }

    /// Pull affinity-matching activities from a task above the target.
    fn process_task_above_target(&mut self, task: &TaskRef, target: &TaskRef) {
        let target_affinity = match &self.target_affinity {
            Some(affinity) => affinity.clone(),
            None => return,
        };

        let activities = task.borrow().activities_top_down();
        for activity in activities {
            let matches = {
                let activity = activity.borrow();
                !activity.finishing
                    && activity.has_flag(ActivityFlags::ALLOW_TASK_REPARENTING)
                    && activity.task_affinity() == Some(target_affinity.as_str())
            };
            if !matches {
                continue;
            }

            self.reparent_into_target(task, target, activity);
        }
    }

    /// Move an activity into the target task at a stable position.
    fn reparent_into_target(&mut self, source: &TaskRef, target: &TaskRef, activity: ActivityRef) {
        let position = *self
            .reparent_insert_position
            .get_or_insert_with(|| target.borrow().child_count());

        debug!(
            "reset: pulling {} into target task {:?}",
            activity.borrow().component(),
            target.borrow().id,
        );

        source.borrow_mut().remove_activity(&activity);
        target.borrow_mut().insert_activity(position, activity.clone());
        self.changed = true;

        // Landing a single-top directly on its own component finishes the
        // one beneath.
        if activity.borrow().launch_mode() != LaunchMode::SingleTop || position == 0 {
            return;
        }

        let beneath = target.borrow().activity_at(position - 1);
        if let Some(beneath) = beneath {
            let duplicate = {
                let beneath_ref = beneath.borrow();
                !beneath_ref.finishing
                    && beneath_ref.component() == activity.borrow().component()
            };
            if duplicate {
                beneath.borrow_mut().finish();
            }
        }
    }

    /// Bottom-most task in the stack matching an affinity, excluding the
    /// target.
    fn bottom_task_with_affinity(
        &self,
        stack: &TaskRef,
        target: &TaskRef,
        affinity: &str,
    ) -> Option<TaskRef> {
        stack
            .borrow()
            .child_tasks()
            .into_iter()
            .filter(|task| !Rc::ptr_eq(task, target))
            .find(|task| task.borrow().affinity.as_deref() == Some(affinity))
    }

    /// Create a task for extracted activities; placed by the caller later.
    fn create_extraction_task(&mut self, target: &TaskRef, affinity: Option<String>) -> TaskRef {
        let (mode, activity_type) = {
            let target = target.borrow();
            (target.windowing_mode(), target.activity_type())
        };

        let task = Task::new_ref(mode, activity_type);
        task.borrow_mut().affinity = affinity;
        self.created_tasks.push(task.clone());
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityRecord;
    use crate::intent::{ActivityInfo, ApplicationInfo, ComponentName, Intent, UserId};
    use crate::task::{ActivityType, WindowingMode};

    fn activity_with(class: &str, flags: ActivityFlags, affinity: Option<&str>) -> ActivityRef {
        let component = ComponentName::new("org.example.app", class);
        let application = ApplicationInfo::new("org.example.app", 10_001, UserId(0));
        let mut info = ActivityInfo::new(component, application);
        info.flags = flags;
        info.task_affinity = affinity.map(String::from);
        let intent = Intent::for_component(info.component.clone());
        ActivityRecord::new_ref(info, intent, UserId(0))
    }

    fn task_with_affinity(affinity: &str) -> TaskRef {
        let task = Task::new_ref(WindowingMode::Fullscreen, ActivityType::Standard);
        task.borrow_mut().affinity = Some(affinity.into());
        task
    }

    /// Reply-chain coupling: finishing an activity takes its whole pending
    /// reply chain with it, never leaving a live result target behind.
    #[test]
    fn finish_takes_reply_chain_along() {
        let target = task_with_affinity("org.example.app");
        let root = activity_with("Root", ActivityFlags::empty(), Some("org.example.app"));
        let b = activity_with("B", ActivityFlags::FINISH_ON_TASK_LAUNCH, Some("org.example.app"));
        let a = activity_with("A", ActivityFlags::empty(), Some("org.example.app"));
        a.borrow_mut().result_to = Some(Rc::downgrade(&b));

        // Z-order bottom to top: root, B, A.
        target.borrow_mut().push_activity(root.clone());
        target.borrow_mut().push_activity(b.clone());
        target.borrow_mut().push_activity(a.clone());

        let mut helper = ResetTargetTaskHelper::new();
        helper.reset();
        assert!(helper.process(&target, &target, false));

        assert!(a.borrow().finishing);
        assert!(b.borrow().finishing);
        assert!(!root.borrow().finishing);
    }

    #[test]
    fn root_activity_is_a_sentinel() {
        let target = task_with_affinity("org.example.app");
        let root =
            activity_with("Root", ActivityFlags::FINISH_ON_TASK_LAUNCH, Some("org.example.app"));
        target.borrow_mut().push_activity(root.clone());

        let mut helper = ResetTargetTaskHelper::new();
        helper.reset();
        assert!(!helper.process(&target, &target, false));
        assert!(!root.borrow().finishing);
    }

    #[test]
    fn force_reset_clears_above_root() {
        let target = task_with_affinity("org.example.app");
        let root = activity_with("Root", ActivityFlags::empty(), Some("org.example.app"));
        let extra = activity_with("Extra", ActivityFlags::empty(), Some("org.example.app"));
        target.borrow_mut().push_activity(root.clone());
        target.borrow_mut().push_activity(extra.clone());

        let mut helper = ResetTargetTaskHelper::new();
        helper.reset();
        assert!(helper.process(&target, &target, true));

        assert!(extra.borrow().finishing);
        assert!(!root.borrow().finishing);
    }

    #[test]
    fn foreign_affinity_extracts_into_new_task() {
        let stack = Task::new_ref(WindowingMode::Fullscreen, ActivityType::Standard);
        let target = task_with_affinity("org.example.app");
        let root = activity_with("Root", ActivityFlags::empty(), Some("org.example.app"));
        let stray = activity_with(
            "Stray",
            ActivityFlags::ALLOW_TASK_REPARENTING,
            Some("org.example.other"),
        );
        target.borrow_mut().push_activity(root.clone());
        target.borrow_mut().push_activity(stray.clone());
        stack.borrow_mut().push_task(target.clone());

        let mut helper = ResetTargetTaskHelper::new();
        helper.reset();
        assert!(helper.process(&stack, &target, false));

        let created = helper.take_created_tasks();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].borrow().affinity.as_deref(), Some("org.example.other"));
        assert!(created[0].borrow().position_of(&stray).is_some());
        assert!(target.borrow().position_of(&stray).is_none());
    }

    #[test]
    fn foreign_affinity_merges_into_bottom_task() {
        let stack = Task::new_ref(WindowingMode::Fullscreen, ActivityType::Standard);
        let home_for_stray = task_with_affinity("org.example.other");
        let target = task_with_affinity("org.example.app");
        let root = activity_with("Root", ActivityFlags::empty(), Some("org.example.app"));
        let stray = activity_with(
            "Stray",
            ActivityFlags::ALLOW_TASK_REPARENTING,
            Some("org.example.other"),
        );
        target.borrow_mut().push_activity(root);
        target.borrow_mut().push_activity(stray.clone());
        stack.borrow_mut().push_task(home_for_stray.clone());
        stack.borrow_mut().push_task(target.clone());

        let mut helper = ResetTargetTaskHelper::new();
        helper.reset();
        assert!(helper.process(&stack, &target, false));

        assert!(helper.take_created_tasks().is_empty());
        assert!(home_for_stray.borrow().position_of(&stray).is_some());
    }

    #[test]
    fn above_target_movers_pull_into_target() {
        let stack = Task::new_ref(WindowingMode::Fullscreen, ActivityType::Standard);
        let target = task_with_affinity("org.example.app");
        let root = activity_with("Root", ActivityFlags::empty(), Some("org.example.app"));
        target.borrow_mut().push_activity(root);

        let above = task_with_affinity("org.example.other");
        let mover = activity_with(
            "Mover",
            ActivityFlags::ALLOW_TASK_REPARENTING,
            Some("org.example.app"),
        );
        above.borrow_mut().push_activity(mover.clone());

        stack.borrow_mut().push_task(target.clone());
        stack.borrow_mut().push_task(above.clone());

        let mut helper = ResetTargetTaskHelper::new();
        helper.reset();
        assert!(helper.process(&stack, &target, false));

        assert!(above.borrow().position_of(&mover).is_none());
        assert!(target.borrow().position_of(&mover).is_some());
    }

    #[test]
    fn single_top_mover_finishes_duplicate_beneath() {
        let stack = Task::new_ref(WindowingMode::Fullscreen, ActivityType::Standard);
        let target = task_with_affinity("org.example.app");
        let root = activity_with("Root", ActivityFlags::empty(), Some("org.example.app"));
        let duplicate = activity_with("Compose", ActivityFlags::empty(), Some("org.example.app"));
        target.borrow_mut().push_activity(root);
        target.borrow_mut().push_activity(duplicate.clone());

        let above = task_with_affinity("org.example.other");
        let mover = activity_with(
            "Compose",
            ActivityFlags::ALLOW_TASK_REPARENTING,
            Some("org.example.app"),
        );
        mover.borrow_mut().info.launch_mode = LaunchMode::SingleTop;
        above.borrow_mut().push_activity(mover.clone());

        stack.borrow_mut().push_task(target.clone());
        stack.borrow_mut().push_task(above);

        let mut helper = ResetTargetTaskHelper::new();
        helper.reset();
        assert!(helper.process(&stack, &target, false));

        assert!(duplicate.borrow().finishing);
        assert!(!mover.borrow().finishing);
    }

    #[test]
    #[should_panic(expected = "reset helper reused")]
    fn reuse_without_reset_is_a_bug() {
        let target = task_with_affinity("org.example.app");
        let stray = activity_with(
            "Stray",
            ActivityFlags::ALLOW_TASK_REPARENTING,
            Some("org.example.other"),
        );
        let root = activity_with("Root", ActivityFlags::empty(), Some("org.example.app"));
        target.borrow_mut().push_activity(root);
        target.borrow_mut().push_activity(stray);

        let mut helper = ResetTargetTaskHelper::new();
        helper.reset();
        helper.process(&target, &target, false);
        helper.process(&target, &target, false);
    }
}
