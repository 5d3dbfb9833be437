//! Root of the window container hierarchy.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::time::Instant;

use calloop::LoopHandle;
use tracing::{debug, info, warn};

use crate::activity::{ActivityRecord, ActivityRef, ActivityState};
use crate::config::Config;
use crate::display::{
    DisplayContent, DisplayId, DisplayInfo, TransitionKind, DEFAULT_DISPLAY,
};
use crate::intent::{ActivityInfo, Intent, LaunchMode, UserId};
use crate::organizer::{
    OrganizerId, TaskOrganizer, TaskOrganizerController, TaskOrganizerRegistration,
};
use crate::reset::ResetTargetTaskHelper;
use crate::services::Services;
use crate::shell::Atrium;
use crate::task::{leaf_tasks, ActivityType, TaskId, TaskRef, WindowingMode};

/// Intent action resolving the primary home activity.
pub const HOME_ACTION: &str = "home";

/// Intent action resolving the dedicated secondary-display home.
pub const SECONDARY_HOME_ACTION: &str = "secondary-home";

/// Upper bound on layout passes per placement call.
const MAX_PLACEMENT_PASSES: usize = 6;

/// Options steering a launch-stack lookup.
#[derive(Clone, Debug, Default)]
pub struct ActivityOptions {
    pub launch_task_id: Option<TaskId>,
    pub launch_display: Option<DisplayId>,
    /// Index of a task display area on the launch display.
    pub launch_area: Option<usize>,
    pub launch_windowing_mode: Option<WindowingMode>,
}

/// Accumulator for a find-task search.
///
/// Built fresh per search; an ideal match short-circuits the scan while a
/// plain candidate is retained as the best-effort fallback.
#[derive(Debug, Default)]
pub struct FindTaskResult {
    pub record: Option<ActivityRef>,
    pub task: Option<TaskRef>,
    pub ideal: bool,
}

impl FindTaskResult {
    fn set(&mut self, record: ActivityRef, task: TaskRef, ideal: bool) {
        self.record = Some(record);
        self.task = Some(task);
        self.ideal = ideal;
    }
}

/// Capability object keeping one display asleep.
///
/// Created through [`RootWindowContainer::create_sleep_token`]; the display
/// stays in forced sleep while at least one token against it is live.
#[derive(Debug)]
pub struct SleepToken {
    pub tag: String,
    pub display: DisplayId,
    key: u64,
}

/// Root of the display/task/activity hierarchy.
///
/// Owns focus resolution, visibility propagation, launch placement, sleep
/// coordination, and the surface-placement pass.
pub struct RootWindowContainer {
    /// Displays in z-order, index 0 at the bottom.
    displays: Vec<DisplayContent>,

    pub top_focused_display: DisplayId,
    focused_window_name: Option<String>,

    pub organizer: TaskOrganizerController,
    services: Services,
    config: Config,
    current_user: UserId,

    // Debounced task-layer ranking.
    task_layers_dirty: bool,
    rank_scheduled: bool,

    // Non-reentrancy guards.
    in_visibility_update: bool,
    in_surface_placement: bool,
    placement_requested: bool,

    /// Loop handle for deferred work; absent in unit tests.
    event_loop: Option<LoopHandle<'static, Atrium>>,
}

impl RootWindowContainer {
    pub fn new(services: Services, config: Config) -> Self {
        Self {
            displays: Vec::new(),
            top_focused_display: DEFAULT_DISPLAY,
            focused_window_name: None,
            organizer: TaskOrganizerController::new(),
            services,
            config,
            current_user: UserId(0),
            task_layers_dirty: false,
            rank_scheduled: false,
            in_visibility_update: false,
            in_surface_placement: false,
            placement_requested: false,
            event_loop: None,
        }
    }

    /// Attach the event loop used for deferred work.
    pub fn set_event_loop(&mut self, event_loop: LoopHandle<'static, Atrium>) {
        self.event_loop = Some(event_loop);
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn current_user(&self) -> UserId {
        self.current_user
    }

    // Display management.

    /// A display was attached.
    pub fn on_display_added(&mut self, id: DisplayId, info: DisplayInfo) {
        if self.display(id).is_some() {
            warn!("duplicate display-added for {id:?}");
            return;
        }

        info!("display {id:?} added");
        self.displays.push(DisplayContent::new(id, info, &self.config));
        self.update_focused_window();
    }

    /// A display's properties changed.
    pub fn on_display_changed(&mut self, id: DisplayId, info: DisplayInfo) {
        let display = match self.display_mut(id) {
            Some(display) => display,
            None => return,
        };

        display.update_info(info);
        self.perform_surface_placement();
    }

    /// A display was detached.
    ///
    /// The default display can never be removed; trying to is a caller bug.
    pub fn on_display_removed(&mut self, id: DisplayId) {
        assert!(id != DEFAULT_DISPLAY, "the default display may not be removed");

        let index = match self.displays.iter().position(|display| display.id == id) {
            Some(index) => index,
            None => return,
        };

        info!("display {id:?} removed");
        let display = self.displays.remove(index);
        for stack in display.stacks_top_down() {
            for leaf in leaf_tasks(&stack) {
                for activity in leaf.borrow().activities_top_down() {
                    activity.borrow_mut().finish();
                }
            }
            self.organizer.on_task_vanished(&stack);
        }

        self.update_focused_window();
    }

    pub fn display(&self, id: DisplayId) -> Option<&DisplayContent> {
        self.displays.iter().find(|display| display.id == id)
    }

    pub fn display_mut(&mut self, id: DisplayId) -> Option<&mut DisplayContent> {
        self.displays.iter_mut().find(|display| display.id == id)
    }

    pub fn default_display(&self) -> &DisplayContent {
        self.display(DEFAULT_DISPLAY).expect("default display missing")
    }

    /// Display IDs from the top of the z-order down.
    fn display_ids_top_down(&self) -> Vec<DisplayId> {
        self.displays.iter().rev().map(|display| display.id).collect()
    }

    /// All root stacks across displays, top of the z-order first.
    pub fn all_root_stacks(&self) -> Vec<TaskRef> {
        let mut stacks = Vec::new();
        for display in self.displays.iter().rev() {
            stacks.extend(display.stacks_top_down());
        }
        stacks
    }

    /// Find a task anywhere in the hierarchy.
    pub fn any_task_for_id(&self, id: TaskId) -> Option<TaskRef> {
        self.displays.iter().rev().find_map(|display| display.find_task(id))
    }

    /// Root stack containing a task ID.
    pub fn stack_of_task(&self, id: TaskId) -> Option<TaskRef> {
        self.displays.iter().rev().find_map(|display| display.stack_of_task(id))
    }

    /// Display hosting a stack.
    fn display_of_stack(&self, stack: &TaskRef) -> Option<DisplayId> {
        self.displays.iter().find_map(|display| {
            display
                .stacks_top_down()
                .iter()
                .any(|candidate| Rc::ptr_eq(candidate, stack))
                .then_some(display.id)
        })
    }

    /// Leaf task and display currently containing an activity.
    fn containers_of_activity(
        &self,
        activity: &ActivityRef,
    ) -> Option<(DisplayId, TaskRef, TaskRef)> {
        for display in self.displays.iter().rev() {
            for stack in display.stacks_top_down() {
                for leaf in leaf_tasks(&stack) {
                    if leaf.borrow().position_of(activity).is_some() {
                        return Some((display.id, stack.clone(), leaf));
                    }
                }
            }
        }
        None
    }

    // Focus resolution.

    /// Recompute the focused window across all displays.
    ///
    /// Iterates displays from the top of the z-order down; the first display
    /// with a focused window wins, with the first focused app as fallback.
    /// Idempotent: with no intervening mutation a second call reports no
    /// change. Input and status-bar policy are notified synchronously before
    /// returning.
    pub fn update_focused_window(&mut self) -> bool {
        let mut top_with_window = None;
        let mut top_with_app = None;

        for index in (0..self.displays.len()).rev() {
            let display = &mut self.displays[index];
            display.update_focused_window();

            if top_with_window.is_none() && display.focused_window.is_some() {
                top_with_window = Some(display.id);
            }
            if top_with_app.is_none() && display.focused_app.is_some() {
                top_with_app = Some(display.id);
            }
        }

        let new_top = top_with_window.or(top_with_app).unwrap_or(DEFAULT_DISPLAY);
        let window_name = self
            .display(new_top)
            .and_then(|display| display.focused_window.as_ref())
            .map(|window| window.borrow().name.clone());

        let changed = new_top != self.top_focused_display
            || window_name != self.focused_window_name;
        if changed {
            debug!("top focused display now {new_top:?} window {window_name:?}");
            self.top_focused_display = new_top;
            self.focused_window_name = window_name.clone();

            // Downstream consumers hear about it before we return.
            self.services.input.focused_display_changed(new_top);
            self.services.input.focused_window_changed(new_top, window_name.as_deref());
        }

        changed
    }

    /// Stack focused on the top focused display.
    pub fn top_display_focused_stack(&self) -> Option<TaskRef> {
        self.display(self.top_focused_display)?.focused_stack()
    }

    // Resume protocol.

    /// Make the top activity of every focusable stack active.
    pub fn resume_focused_stacks_top_activities(&mut self) -> bool {
        self.resume_focused_stacks_top_activities_with(None, None)
    }

    /// Resume a specific target first, then sweep all displays.
    ///
    /// Displays where no stack could be resumed fall back to starting home
    /// on their default area so a fresh boot or a crashed launcher always
    /// makes progress.
    pub fn resume_focused_stacks_top_activities_with(
        &mut self,
        target_stack: Option<&TaskRef>,
        target: Option<&ActivityRef>,
    ) -> bool {
        let mut result = false;

        // The target goes first when it already owns the top position.
        if let Some(stack) = target_stack {
            let top_of_area = self.stack_is_top_of_its_area(stack);
            let globally_focused = self
                .top_display_focused_stack()
                .is_some_and(|focused| Rc::ptr_eq(&focused, stack));
            if top_of_area || globally_focused {
                result |= self.resume_top_activity(stack);
            }
        }

        let resumed_target = target.cloned().or_else(|| {
            target_stack.and_then(|stack| stack.borrow().top_running_activity())
        });

        for display_id in self.display_ids_top_down() {
            let stacks = match self.display(display_id) {
                Some(display) => display.stacks_top_down(),
                None => continue,
            };

            let mut resumed_on_display = false;
            for stack in &stacks {
                let top = match stack.borrow().top_running_activity() {
                    Some(top) => top,
                    None => continue,
                };

                // Skip the freshly resumed target; a second launch attempt
                // could crash a dying process twice.
                let is_target = resumed_target
                    .as_ref()
                    .is_some_and(|target| Rc::ptr_eq(target, &top));
                if is_target || top.borrow().state == ActivityState::Resumed {
                    resumed_on_display = true;
                    continue;
                }

                resumed_on_display |= self.resume_top_activity(stack);
            }

            if !resumed_on_display {
                // Boot/launcher-crash recovery; without this the resume loop
                // could spin forever with no progress.
                result |= self.start_home_on_display(
                    self.current_user,
                    "empty-display-resume",
                    display_id,
                );
            }

            result |= resumed_on_display;
        }

        result
    }

    /// Try to resume the top running activity of one stack.
    ///
    /// Returns whether a resume action occurred. A dead client process is
    /// logged and treated as "nothing happened" so the caller continues
    /// with other candidates.
    pub fn resume_top_activity(&mut self, stack: &TaskRef) -> bool {
        let top = match stack.borrow().top_running_activity() {
            Some(top) => top,
            None => return false,
        };

        let (process, uid, state) = {
            let top = top.borrow();
            (top.info.process.clone(), top.info.application.uid, top.state)
        };

        if state == ActivityState::Resumed {
            return false;
        }

        if !self.services.process.is_process_alive(&process, uid) {
            warn!("not resuming {process}: process is gone");
            top.borrow_mut().app_alive = false;
            return false;
        }

        let display_id = self.display_of_stack(stack).unwrap_or(DEFAULT_DISPLAY);
        self.pause_other_resumed(display_id, &top);

        {
            let mut top = top.borrow_mut();
            top.visible_requested = true;
            top.set_state(ActivityState::Resumed);
        }

        if let Some(display) = self.display_mut(display_id) {
            display.prepare_transition(TransitionKind::ActivityOpen);
            display.set_focused_stack(Some(stack));
        }

        self.invalidate_task_layers();
        true
    }

    /// Send every other resumed activity on a display to paused.
    ///
    /// Keeps the single-resumed-activity invariant per display.
    fn pause_other_resumed(&mut self, display_id: DisplayId, except: &ActivityRef) {
        let stacks = match self.display(display_id) {
            Some(display) => display.stacks_top_down(),
            None => return,
        };

        for stack in stacks {
            for leaf in leaf_tasks(&stack) {
                for activity in leaf.borrow().activities_top_down() {
                    if Rc::ptr_eq(&activity, except) {
                        continue;
                    }
                    let mut activity = activity.borrow_mut();
                    if activity.state == ActivityState::Resumed {
                        activity.set_state(ActivityState::Pausing);
                        activity.set_state(ActivityState::Paused);
                    }
                }
            }
        }
    }

    fn stack_is_top_of_its_area(&self, stack: &TaskRef) -> bool {
        self.displays.iter().any(|display| {
            display.areas().iter().any(|area| {
                area.top_stack().is_some_and(|top| Rc::ptr_eq(&top, stack))
            })
        })
    }

    // Home resolution.

    /// Resolve the primary home activity for a user.
    ///
    /// The returned info carries a per-user copy of the application info.
    pub fn resolve_home_activity(&self, user: UserId) -> Option<(ActivityInfo, Intent)> {
        let mut intent = Intent::for_action(HOME_ACTION);
        intent.component = self.config.home_component.clone();

        let info = self.services.package.resolve_activity(&intent, user)?;
        let application = info.application.for_user(user);
        Some((info.with_application(application), intent))
    }

    /// Resolve home for a non-default display.
    ///
    /// Prefers a candidate from the primary home's package, then the first
    /// resolution, then the dedicated secondary-home fallback. Calling this
    /// for the default display is a caller bug.
    pub fn resolve_secondary_home_activity(
        &self,
        user: UserId,
        display: DisplayId,
    ) -> Option<(ActivityInfo, Intent)> {
        assert!(
            display != DEFAULT_DISPLAY,
            "resolve_secondary_home_activity called for the default display area",
        );

        let (primary, intent) = self.resolve_home_activity(user)?;
        let candidates = self.services.package.query_intent_activities(&intent, user);

        let same_package = candidates
            .iter()
            .find(|candidate| candidate.component == primary.component)
            .or_else(|| candidates.first());
        if let Some(info) = same_package {
            let application = info.application.for_user(user);
            return Some((info.with_application(application), intent));
        }

        // Last resort: the dedicated secondary-home intent.
        let mut fallback = Intent::for_action(SECONDARY_HOME_ACTION);
        fallback.component = self.config.secondary_home_component.clone();
        let info = self.services.package.resolve_activity(&fallback, user)?;
        let application = info.application.for_user(user);
        Some((info.with_application(application), fallback))
    }

    /// Start home on a display's default area.
    ///
    /// Returns whether a home start was issued.
    pub fn start_home_on_display(
        &mut self,
        user: UserId,
        reason: &str,
        display_id: DisplayId,
    ) -> bool {
        if self.display(display_id).is_none() {
            return false;
        }

        let resolved = if display_id == DEFAULT_DISPLAY {
            self.resolve_home_activity(user)
        } else {
            self.resolve_secondary_home_activity(user, display_id)
        };
        let (info, intent) = match resolved {
            Some(resolved) => resolved,
            None => {
                warn!("no home activity for display {display_id:?} ({reason})");
                return false;
            },
        };

        info!("starting home on display {display_id:?}: {reason}");

        let display = match self.display_mut(display_id) {
            Some(display) => display,
            None => return false,
        };
        let stack = display.default_area_mut().get_or_create_stack(
            WindowingMode::Fullscreen,
            ActivityType::Home,
            true,
        );

        let already_on_top = stack
            .borrow()
            .top_running_activity()
            .is_some_and(|top| top.borrow().component() == &info.component);
        if !already_on_top {
            let record = ActivityRecord::new_ref(info, intent, user);
            record.borrow_mut().visible_requested = true;
            stack.borrow_mut().push_activity(record);
            self.organizer.on_task_appeared(&stack, &self.services.clone());
        }

        self.resume_top_activity(&stack);
        true
    }

    /// Switch the current user, restarting home.
    pub fn switch_user(&mut self, user: UserId) {
        if self.current_user == user {
            return;
        }

        info!("switching user {:?} -> {user:?}", self.current_user);
        self.current_user = user;
        self.start_home_on_display(user, "user-switch", DEFAULT_DISPLAY);
        self.perform_surface_placement();
    }

    // Launch stack resolution.

    /// Select the destination stack for a launch request.
    pub fn get_launch_stack(
        &mut self,
        activity: Option<&ActivityRef>,
        options: &mut ActivityOptions,
        candidate_task: Option<&TaskRef>,
        on_top: bool,
    ) -> Option<TaskRef> {
        let activity_type = activity.map(activity_type_for).unwrap_or(ActivityType::Standard);
        let mode = options.launch_windowing_mode.unwrap_or(WindowingMode::Undefined);

        // An area token without a display to resolve it against is a caller
        // bug, not a recoverable state.
        assert!(
            options.launch_area.is_none() || options.launch_display.is_some(),
            "launch area specified without a launch display",
        );

        // An explicit task id wins; cleared during the lookup so re-entrant
        // resolution cannot loop on it.
        if let Some(task_id) = options.launch_task_id.take() {
            let found = self.stack_of_task(task_id);
            options.launch_task_id = Some(task_id);
            if let Some(stack) = found {
                return Some(stack);
            }
        }

        // An explicit display area or display next.
        if let Some(display_id) = options.launch_display {
            let launch_area = options.launch_area;
            if let Some(display) = self.display_mut(display_id) {
                let area_index = launch_area.unwrap_or_else(|| display.launch_area_index());
                if area_index < display.areas().len() {
                    let stack = display.areas_mut()[area_index].get_or_create_stack(
                        mode,
                        activity_type,
                        on_top,
                    );
                    return Some(stack);
                }
            }
        }

        // Reuse the stack the candidate task or activity already lives in.
        let current_stack = candidate_task
            .and_then(|task| self.stack_of_task(task.borrow().id))
            .or_else(|| {
                let activity = activity?;
                let (_, stack, _) = self.containers_of_activity(activity)?;
                Some(stack)
            });
        if let Some(stack) = current_stack {
            if self.is_valid_launch_stack(&stack, activity, mode, activity_type) {
                return Some(stack);
            }
        }

        // Fallback: the default area of the default display.
        let display = self.display_mut(DEFAULT_DISPLAY)?;
        Some(display.default_area_mut().get_or_create_stack(mode, activity_type, on_top))
    }

    /// Check whether a stack may receive a direct launch.
    pub fn is_valid_launch_stack(
        &self,
        stack: &TaskRef,
        activity: Option<&ActivityRef>,
        mode: WindowingMode,
        activity_type: ActivityType,
    ) -> bool {
        let stack_ref = stack.borrow();

        // Activity-typed stacks accept matching activity types only.
        match stack_ref.activity_type() {
            ActivityType::Home
            | ActivityType::Recents
            | ActivityType::Assistant
            | ActivityType::Dream => {
                if stack_ref.activity_type() != activity_type {
                    return false;
                }
            },
            _ => (),
        }

        // Organizer-created stacks refuse direct launch targeting.
        if stack_ref.created_by_organizer {
            return false;
        }

        if stack_ref.windowing_mode() == WindowingMode::SplitScreenPrimary {
            let supports_split = activity
                .map(|activity| activity.borrow().info.supports_split_screen)
                .unwrap_or(false);
            let mode_ok = matches!(
                mode,
                WindowingMode::SplitScreenPrimary | WindowingMode::Undefined
            );
            return supports_split && mode_ok;
        }

        stack_ref.is_compatible_with(mode, activity_type)
    }

    // Find-task search.

    /// Search for an existing task matching a launch request.
    ///
    /// The preferred display is scanned first and an ideal match returns
    /// early; remaining displays follow in focus order.
    pub fn find_task(
        &self,
        info: &ActivityInfo,
        intent: &Intent,
        user: UserId,
        preferred_display: DisplayId,
    ) -> FindTaskResult {
        let mut result = FindTaskResult::default();

        self.find_task_on_display(info, intent, user, preferred_display, &mut result);
        if result.ideal {
            return result;
        }

        let mut order = vec![self.top_focused_display];
        order.extend(self.display_ids_top_down());
        for display_id in order {
            if display_id == preferred_display {
                continue;
            }
            self.find_task_on_display(info, intent, user, display_id, &mut result);
            if result.ideal {
                break;
            }
        }

        result
    }

    fn find_task_on_display(
        &self,
        info: &ActivityInfo,
        intent: &Intent,
        user: UserId,
        display_id: DisplayId,
        result: &mut FindTaskResult,
    ) {
        let display = match self.display(display_id) {
            Some(display) => display,
            None => return,
        };

        let target_type = activity_type_for_info(info, intent);
        let target_document = document_of(intent);

        for stack in display.stacks_top_down() {
            for leaf in leaf_tasks(&stack) {
                let candidate = match leaf.borrow().top_activity(false, false) {
                    Some(candidate) => candidate,
                    None => continue,
                };
                let record = candidate.borrow();

                // Basic eligibility first.
                if record.user != user
                    || record.voice_session
                    || record.launch_mode() == LaunchMode::SingleInstance
                    || activity_type_for(&candidate) != target_type
                {
                    continue;
                }

                let task_document =
                    record.intent.data.clone().or_else(|| {
                        record.affinity_intent.as_ref().and_then(|intent| intent.data.clone())
                    });

                // Exact component plus identical document data: ideal.
                if record.component() == &info.component && task_document == target_document {
                    drop(record);
                    result.set(candidate, leaf, true);
                    return;
                }

                // Affinity-intent component match: equally ideal.
                let affinity_component_matches = record
                    .affinity_intent
                    .as_ref()
                    .and_then(|intent| intent.component.as_ref())
                    .is_some_and(|component| component == &info.component);
                if affinity_component_matches && task_document == target_document {
                    drop(record);
                    result.set(candidate, leaf, true);
                    return;
                }

                // Same root affinity: remember as a fallback, keep scanning.
                let non_document = !intent.is_document() && !record.intent.is_document();
                let affinity_matches = leaf.borrow().affinity.as_deref()
                    == info.task_affinity.as_deref()
                    && info.task_affinity.is_some();
                if non_document && affinity_matches && result.record.is_none() {
                    drop(record);
                    result.set(candidate, leaf.clone(), false);
                }
            }
        }
    }

    // Crash handling.

    /// Destroy every live activity of a crashed process.
    pub fn handle_app_crash(&mut self, process: &str, uid: u32) {
        info!("handling crash of {process}/{uid}");

        for index in 0..self.displays.len() {
            let stacks = self.displays[index].stacks_top_down();
            let mut any_destroyed = false;

            for stack in stacks {
                for leaf in leaf_tasks(&stack) {
                    for activity in leaf.borrow().activities_top_down() {
                        let matches = {
                            let activity = activity.borrow();
                            activity.info.process == process
                                && activity.info.application.uid == uid
                                && activity.state != ActivityState::Destroyed
                        };
                        if matches {
                            let mut activity = activity.borrow_mut();
                            activity.app_alive = false;
                            activity.destroy();
                            any_destroyed = true;
                        }
                    }
                }
            }

            if any_destroyed {
                self.displays[index]
                    .prepare_transition(TransitionKind::CrashingActivityClose);
            }
        }

        self.remove_destroyed_activities();
        self.update_focused_window();
    }

    /// Finish the topmost crashed activity of every stack.
    ///
    /// Returns the task id finished on the focused stack, else the first
    /// finished task id; callers use it to anchor crash-recovery UI.
    pub fn finish_top_crashed_activities(&mut self, process: &str, uid: u32) -> Option<TaskId> {
        let focused_stack = self.top_display_focused_stack();
        let mut focused_result = None;
        let mut first_result = None;

        for display_id in self.display_ids_top_down() {
            let stacks = match self.display(display_id) {
                Some(display) => display.stacks_top_down(),
                None => continue,
            };

            for stack in stacks {
                let top = match stack.borrow().top_activity(false, true) {
                    Some(top) => top,
                    None => continue,
                };

                let crashed = {
                    let top = top.borrow();
                    top.info.process == process && top.info.application.uid == uid
                };
                if !crashed {
                    continue;
                }

                top.borrow_mut().finish();
                let task_id = stack.borrow().id;

                let is_focused = focused_stack
                    .as_ref()
                    .is_some_and(|focused| Rc::ptr_eq(focused, &stack));
                if is_focused {
                    focused_result = Some(task_id);
                } else if first_result.is_none() {
                    first_result = Some(task_id);
                }
            }
        }

        focused_result.or(first_result)
    }

    /// The client process died without a crash report.
    pub fn handle_app_died(&mut self, process: &str, uid: u32) {
        for display in &mut self.displays {
            for stack in display.stacks_top_down() {
                for leaf in leaf_tasks(&stack) {
                    for activity in leaf.borrow().activities_top_down() {
                        let matches = {
                            let activity = activity.borrow();
                            activity.info.process == process
                                && activity.info.application.uid == uid
                        };
                        if matches {
                            activity.borrow_mut().destroy();
                        }
                    }
                }
            }
        }

        self.remove_destroyed_activities();
        self.update_focused_window();
    }

    // Sleep coordination.

    /// Create a token forcing a display asleep.
    ///
    /// Tokens are keyed by a (tag, display) hash; unknown displays are a
    /// caller bug.
    pub fn create_sleep_token(&mut self, tag: &str, display_id: DisplayId) -> SleepToken {
        let mut hasher = DefaultHasher::new();
        tag.hash(&mut hasher);
        display_id.0.hash(&mut hasher);
        let key = hasher.finish();

        let display = self
            .display_mut(display_id)
            .unwrap_or_else(|| panic!("sleep token for unknown display {display_id:?}"));
        display.add_sleep_token(key);
        debug!("sleep token '{tag}' created for {display_id:?}");

        SleepToken { tag: tag.into(), display: display_id, key }
    }

    /// Destroy a sleep token.
    ///
    /// Removing the last token of a display re-checks the sleep state.
    pub fn remove_sleep_token(&mut self, token: SleepToken) {
        let was_last = match self.display_mut(token.display) {
            Some(display) => display.remove_sleep_token(token.key),
            None => return,
        };

        debug!("sleep token '{}' removed from {:?}", token.tag, token.display);
        if was_last {
            self.apply_sleep_tokens(false);
        }
    }

    /// Reconcile each display's sleeping flag with its token set.
    ///
    /// Transitioning to sleep pauses everything, forcing invisibility only
    /// when no delay grace is allowed. Waking resumes the focused stack's
    /// top before visibility is re-ensured; the reverse order would push a
    /// stale orientation to the activity.
    pub fn apply_sleep_tokens(&mut self, allow_delay: bool) {
        for display_id in self.display_ids_top_down() {
            let (should_sleep, sleeping) = match self.display(display_id) {
                Some(display) => (display.should_sleep(), display.sleeping),
                None => continue,
            };
            if should_sleep == sleeping {
                continue;
            }

            if should_sleep {
                self.sleep_display(display_id, allow_delay);
            } else {
                self.wake_display(display_id);
            }
        }
    }

    fn sleep_display(&mut self, display_id: DisplayId, allow_delay: bool) {
        info!("display {display_id:?} going to sleep");

        let stacks = match self.display_mut(display_id) {
            Some(display) => {
                display.sleeping = true;
                display.prepare_transition(TransitionKind::Sleep);
                display.policy.screen_turned_off();
                display.stacks_top_down()
            },
            None => return,
        };

        self.defer_power_update(false);

        for stack in stacks {
            for leaf in leaf_tasks(&stack) {
                for activity in leaf.borrow().activities_top_down() {
                    let mut activity = activity.borrow_mut();
                    match activity.state {
                        ActivityState::Resumed | ActivityState::Pausing => {
                            activity.set_state(ActivityState::Pausing);
                            activity.set_state(ActivityState::Paused);
                        },
                        ActivityState::Paused => {
                            activity.set_state(ActivityState::Stopping);
                            activity.set_state(ActivityState::Stopped);
                        },
                        _ => (),
                    }

                    // The delay grace keeps windows up for the transition.
                    if !allow_delay {
                        activity.visible_requested = false;
                    }
                }
            }
        }

        self.invalidate_task_layers();
    }

    fn wake_display(&mut self, display_id: DisplayId) {
        info!("display {display_id:?} waking up");

        let keyguard_showing = match self.display_mut(display_id) {
            Some(display) => {
                display.sleeping = false;
                display.prepare_transition(TransitionKind::Wake);
                display.policy.screen_turned_on();
                display.policy.keyguard_showing()
            },
            None => return,
        };

        self.defer_power_update(true);

        if !keyguard_showing {
            // Resume first, then ensure visibility; see apply_sleep_tokens.
            self.resume_focused_stacks_top_activities();
            self.ensure_activities_visible();
        }
    }

    /// Push power state over the work queue, never synchronously.
    ///
    /// The power service has its own locking; calling it while mutating the
    /// hierarchy risks lock-order inversions on the other side.
    fn defer_power_update(&self, awake: bool) {
        let services = self.services.clone();
        let update = move || {
            if awake {
                services.power.set_user_activity_timeout(None);
            } else {
                services.power.set_brightness_override(None);
            }
        };

        match &self.event_loop {
            Some(event_loop) => {
                event_loop.insert_idle(move |_| update());
            },
            None => update(),
        }
    }

    // Visibility propagation.

    /// Propagate requested visibility down the hierarchy.
    ///
    /// Re-entrant calls during an ongoing pass are dropped, not queued.
    pub fn ensure_activities_visible(&mut self) {
        if self.in_visibility_update {
            return;
        }
        self.in_visibility_update = true;

        for index in 0..self.displays.len() {
            let sleeping = self.displays[index].sleeping;
            let stacks = self.displays[index].stacks_top_down();

            let mut occluded = false;
            for stack in &stacks {
                let mode = stack.borrow().windowing_mode();
                let mut stack_has_content = false;

                for leaf in leaf_tasks(stack) {
                    let activities = leaf.borrow().activities_top_down();
                    let mut top_found = false;
                    for activity in activities {
                        let mut activity = activity.borrow_mut();
                        if !activity.is_running() {
                            activity.visible_requested = false;
                            continue;
                        }

                        let visible = !sleeping && !occluded && !top_found;
                        top_found = true;
                        stack_has_content = true;
                        activity.visible_requested = visible;

                        if let Some(window) = activity.window.clone() {
                            let mut window = window.borrow_mut();
                            window.visible = visible && window.visible_requested;
                            self.displays[index].policy.apply_keyguard_policy(&mut window);
                        }
                    }
                }

                // A populated fullscreen stack occludes everything below it.
                if stack_has_content && mode == WindowingMode::Fullscreen {
                    occluded = true;
                }
            }
        }

        self.in_visibility_update = false;
        self.invalidate_task_layers();
    }

    // Task layer ranking.

    /// Mark task layer ranks dirty and schedule a recomputation.
    ///
    /// At most one recomputation is pending at a time; repeated
    /// invalidations coalesce into it.
    pub fn invalidate_task_layers(&mut self) {
        self.task_layers_dirty = true;
        if self.rank_scheduled {
            return;
        }
        self.rank_scheduled = true;

        if let Some(event_loop) = &self.event_loop {
            event_loop.insert_idle(|atrium| atrium.root.rank_task_layers_if_needed());
        }
    }

    /// Recompute z-order based layer ranks for leaf tasks.
    ///
    /// Only leaf tasks whose top activity wants to be visible get a rank;
    /// the rest are marked invisible. Owning processes of re-ranked tasks
    /// are told to refresh their oom scores.
    pub fn rank_task_layers_if_needed(&mut self) {
        self.rank_scheduled = false;
        if !self.task_layers_dirty {
            return;
        }
        self.task_layers_dirty = false;

        let mut rank = 0;
        let mut touched_processes = Vec::new();

        for display_id in self.display_ids_top_down() {
            let stacks = match self.display(display_id) {
                Some(display) => display.stacks_top_down(),
                None => continue,
            };

            for stack in stacks {
                for leaf in leaf_tasks(&stack).into_iter().rev() {
                    let new_rank = if leaf.borrow().has_visible_content() {
                        rank += 1;
                        Some(rank)
                    } else {
                        None
                    };

                    let mut leaf = leaf.borrow_mut();
                    if leaf.layer_rank != new_rank {
                        leaf.layer_rank = new_rank;
                        for activity in leaf.activities() {
                            let process = activity.borrow().info.process.clone();
                            if !touched_processes.contains(&process) {
                                touched_processes.push(process);
                            }
                        }
                    }
                }
            }
        }

        if !touched_processes.is_empty() {
            self.services.process.update_oom_adjustment(&touched_processes);
        }
    }

    /// Check whether a rank recomputation is pending.
    pub fn rank_recompute_pending(&self) -> bool {
        self.rank_scheduled
    }

    // Surface placement.

    /// Run layout to a fixed point across all displays.
    ///
    /// Safe to call re-entrantly; nested calls coalesce into a follow-up
    /// pass. Organizer dispatch is deferred for the duration so observers
    /// never see intermediate states.
    pub fn perform_surface_placement(&mut self) {
        if self.in_surface_placement {
            self.placement_requested = true;
            return;
        }
        self.in_surface_placement = true;

        loop {
            self.placement_requested = false;
            self.surface_placement_pass();
            if !self.placement_requested {
                break;
            }
        }

        self.in_surface_placement = false;
    }

    fn surface_placement_pass(&mut self) {
        self.organizer.defer_dispatch();
        let transaction = self.services.transaction_scope();

        let mut bars_dirty = Vec::new();
        for _ in 0..MAX_PLACEMENT_PASSES {
            let mut changed = self.update_focused_window();
            self.ensure_activities_visible();

            for display in &mut self.displays {
                display.policy.layout(&mut display.frames);
            }
            self.sync_task_configurations();

            let now = Instant::now();
            for display in &mut self.displays {
                if display.policy.update_system_ui_visibility(now) {
                    changed = true;
                    if !bars_dirty.contains(&display.id) {
                        bars_dirty.push(display.id);
                    }
                }
            }

            if !changed {
                break;
            }
        }

        // Staged transitions and bar state go out after the fixed point.
        for index in 0..self.displays.len() {
            let id = self.displays[index].id;
            if let Some(transition) = self.displays[index].pending_transition.take() {
                debug!("display {id:?} transition {transition:?}");
                self.services.status_bar.transition_starting(id);
                self.services.status_bar.transition_finished(id);
            }
            if bars_dirty.contains(&id) {
                let appearance = self.displays[index].policy.appearance();
                let disable_flags = self.displays[index].policy.disable_flags();
                self.services.status_bar.appearance_changed(id, appearance);
                self.services.status_bar.set_disable_flags(id, disable_flags);
            }
        }

        self.remove_destroyed_activities();
        transaction.end();
        self.organizer.continue_dispatch();
    }

    /// Push display-derived configuration and bounds into tasks.
    ///
    /// Fullscreen stacks track the display's content frame; every changed
    /// task is reported to its organizer (deferred while placement runs).
    fn sync_task_configurations(&mut self) {
        let mut changed_tasks = Vec::new();

        for index in 0..self.displays.len() {
            let (content, size, sideways) = {
                let frames = &self.displays[index].frames;
                (frames.content, frames.size(), frames.rotation.is_sideways())
            };

            let mut docked_bounds = crate::geometry::Rect::default();
            let stacks = self.displays[index].stacks_top_down();
            for stack in &stacks {
                for leaf in leaf_tasks(stack) {
                    let mut task_changed = false;
                    {
                        let mut leaf = leaf.borrow_mut();

                        if leaf.windowing_mode() == WindowingMode::Fullscreen
                            && leaf.bounds != content
                        {
                            leaf.bounds = content;
                            task_changed = true;
                        }

                        let mut config = leaf.config.clone();
                        config.screen_size = size;
                        config.sideways = sideways;
                        if config != leaf.config {
                            leaf.config = config;
                            task_changed = true;
                        }

                        if leaf.windowing_mode() == WindowingMode::SplitScreenPrimary {
                            docked_bounds = leaf.bounds;
                        }
                    }

                    if task_changed {
                        changed_tasks.push(leaf);
                    }
                }
            }

            self.displays[index].policy.set_stack_bounds(docked_bounds, content);
        }

        for task in changed_tasks {
            self.organizer.dispatch_task_info_changed(&task);
        }
    }

    /// Garbage-collect destroyed activities and empty stacks.
    fn remove_destroyed_activities(&mut self) {
        let mut vanished = Vec::new();

        for display in &mut self.displays {
            for area_index in 0..display.areas().len() {
                let stacks = display.areas()[area_index].stacks_top_down();
                for stack in stacks {
                    for leaf in leaf_tasks(&stack) {
                        let destroyed: Vec<_> = leaf
                            .borrow()
                            .activities_top_down()
                            .into_iter()
                            .filter(|activity| {
                                activity.borrow().state == ActivityState::Destroyed
                            })
                            .collect();
                        for activity in destroyed {
                            leaf.borrow_mut().remove_activity(&activity);
                        }

                        let leaf_empty = leaf.borrow().is_empty();
                        if leaf_empty && !Rc::ptr_eq(&leaf, &stack) {
                            stack.borrow_mut().remove_task(&leaf);
                        }
                    }

                    if stack.borrow().is_empty() {
                        display.areas_mut()[area_index].remove_stack(&stack);
                        vanished.push(stack);
                    }
                }
            }
        }

        for stack in vanished {
            self.organizer.on_task_vanished(&stack);
        }
    }

    /// Destroy every destroyable finishing activity; the idle sweep.
    pub fn destroy_all_destroyable_activities(&mut self) {
        for display in &self.displays {
            for stack in display.stacks_top_down() {
                for leaf in leaf_tasks(&stack) {
                    for activity in leaf.borrow().activities_top_down() {
                        let destroyable = {
                            let activity = activity.borrow();
                            activity.finishing && activity.is_destroyable()
                        };
                        if destroyable {
                            activity.borrow_mut().destroy();
                        }
                    }
                }
            }
        }

        self.remove_destroyed_activities();
    }

    /// Destroy one reclaimable background activity.
    ///
    /// Returns whether anything could be reclaimed; the caller decides how
    /// to surface exhaustion.
    pub fn release_some_activities(&mut self) -> bool {
        let mut victim = None;

        'search: for display_id in self.display_ids_top_down().into_iter().rev() {
            let stacks = match self.display(display_id) {
                Some(display) => display.stacks_top_down(),
                None => continue,
            };

            // Bottom of the z-order goes first.
            for stack in stacks.into_iter().rev() {
                for leaf in leaf_tasks(&stack) {
                    let activities = leaf.borrow().activities_top_down();
                    for activity in activities.into_iter().rev() {
                        let reclaimable = {
                            let activity = activity.borrow();
                            !activity.visible_requested && activity.is_destroyable()
                        };
                        if reclaimable {
                            victim = Some(activity);
                            break 'search;
                        }
                    }
                }
            }
        }

        let victim = match victim {
            Some(victim) => victim,
            None => return false,
        };

        victim.borrow_mut().destroy();
        self.remove_destroyed_activities();
        true
    }

    // Pinned (picture-in-picture) transitions.

    /// Move an activity into a pinned root task.
    ///
    /// A single-activity task is reused as the pinned stack; the activity
    /// gets the transition-safe intermediate windowing mode before the task
    /// turns pinned.
    pub fn move_activity_to_pinned_root_task(&mut self, activity: &ActivityRef) -> Option<TaskRef> {
        let (display_id, _stack, leaf) = self.containers_of_activity(activity)?;

        let pinned = if leaf.borrow().running_activity_count() == 1 {
            // Reuse the task itself; pin the current mode onto the activity
            // first so the transition never observes the pinned mode early.
            let current_mode = {
                let leaf = leaf.borrow();
                if leaf.windowing_mode() == WindowingMode::Undefined {
                    WindowingMode::Fullscreen
                } else {
                    leaf.windowing_mode()
                }
            };
            activity.borrow_mut().windowing_mode = current_mode;
            leaf.borrow_mut().set_windowing_mode(WindowingMode::Pinned);
            leaf
        } else {
            // Split the activity off into a fresh pinned stack.
            let display = self.display_mut(display_id)?;
            let pinned = display.default_area_mut().create_stack(
                WindowingMode::Pinned,
                ActivityType::Standard,
                true,
            );
            leaf.borrow_mut().remove_activity(activity);
            activity.borrow_mut().windowing_mode = WindowingMode::Pinned;
            pinned.borrow_mut().push_activity(activity.clone());
            self.organizer.on_task_appeared(&pinned, &self.services.clone());
            pinned
        };

        self.organizer.dispatch_task_info_changed(&pinned);
        self.perform_surface_placement();
        Some(pinned)
    }

    // Task reset.

    /// Apply task-launch reset semantics to a stack.
    pub fn reset_task_if_needed(&mut self, stack: &TaskRef, target: &TaskRef, force: bool) -> bool {
        let mut helper = ResetTargetTaskHelper::new();
        helper.reset();
        let changed = helper.process(stack, target, force);

        let created = helper.take_created_tasks();
        if !created.is_empty() {
            let single_task_instance = self
                .display_of_stack(stack)
                .and_then(|id| self.display(id))
                .map(|display| display.info.single_task_instance)
                .unwrap_or(false);

            for task in created {
                if single_task_instance {
                    // Single-task-instance displays reroute to the default
                    // display instead of stacking tasks locally.
                    if let Some(display) = self.display_mut(DEFAULT_DISPLAY) {
                        display.default_area_mut().push_stack_to_bottom(task.clone());
                        self.organizer.on_task_appeared(&task, &self.services.clone());
                    }
                } else {
                    stack.borrow_mut().push_task_to_bottom(task);
                }
            }
        }

        if changed {
            self.invalidate_task_layers();
        }
        changed
    }

    // Organizer plumbing.

    /// Register a task organizer, handing it all current root stacks.
    pub fn register_task_organizer(
        &mut self,
        callbacks: Rc<dyn TaskOrganizer>,
    ) -> TaskOrganizerRegistration {
        let stacks = self.all_root_stacks();
        let services = self.services.clone();
        self.organizer.register_task_organizer(callbacks, &stacks, &services)
    }

    /// Unregister a task organizer.
    pub fn unregister_task_organizer(&mut self, id: OrganizerId) {
        let stacks = self.all_root_stacks();
        let services = self.services.clone();
        self.organizer.unregister_task_organizer(id, &stacks, &services);
    }

    /// The organizer's connection went away.
    pub fn on_organizer_connection_closed(&mut self, id: OrganizerId) {
        let stacks = self.all_root_stacks();
        let services = self.services.clone();
        self.organizer.on_organizer_connection_closed(id, &stacks, &services);
    }

    /// Route a back press on a task's root activity.
    pub fn handle_task_back_pressed(&mut self, task_id: TaskId) -> bool {
        let task = match self.any_task_for_id(task_id) {
            Some(task) => task,
            None => return false,
        };
        self.organizer.handle_back_pressed_on_task_root(&task)
    }

    /// Update a task's bounds, dispatching the change to its organizer.
    pub fn set_task_bounds(&mut self, task_id: TaskId, bounds: crate::geometry::Rect) {
        let task = self
            .any_task_for_id(task_id)
            .unwrap_or_else(|| panic!("set_task_bounds for unknown task {task_id:?}"));

        task.borrow_mut().bounds = bounds;
        self.organizer.dispatch_task_info_changed(&task);
    }

    /// A client process attached; resume its pending visible activities.
    pub fn attach_application(&mut self, process: &str, uid: u32) -> bool {
        let mut resumed = false;

        for display_id in self.display_ids_top_down() {
            let stacks = match self.display(display_id) {
                Some(display) => display.stacks_top_down(),
                None => continue,
            };

            for stack in stacks {
                let top = match stack.borrow().top_running_activity() {
                    Some(top) => top,
                    None => continue,
                };

                let matches = {
                    let top = top.borrow();
                    top.info.process == process && top.info.application.uid == uid
                };
                if !matches {
                    continue;
                }

                top.borrow_mut().attached = true;
                if top.borrow().visible_requested {
                    resumed |= self.resume_top_activity(&stack);
                }
            }
        }

        resumed
    }
}

/// Activity type a record resolves to, derived from its intent.
fn activity_type_for(activity: &ActivityRef) -> ActivityType {
    let activity = activity.borrow();
    activity_type_for_info(&activity.info, &activity.intent)
}

fn activity_type_for_info(_info: &ActivityInfo, intent: &Intent) -> ActivityType {
    match intent.action.as_deref() {
        Some(HOME_ACTION) | Some(SECONDARY_HOME_ACTION) => ActivityType::Home,
        _ => ActivityType::Standard,
    }
}

/// Document data an intent carries, if any.
fn document_of(intent: &Intent) -> Option<crate::intent::Uri> {
    intent.data.clone()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::geometry::Rect;
    use crate::intent::{ApplicationInfo, ComponentName};
    use crate::services::{
        InProcessCompositor, LoggingInput, LoggingPowerService, LoggingStatusBar, ProcessService,
        StaticPackageService,
    };

    const HOME_COMPONENT: (&str, &str) = ("org.example.launcher", "Home");

    /// Process service double with scriptable liveness.
    #[derive(Default)]
    struct RecordingProcess {
        dead: RefCell<Vec<String>>,
        oom_updates: RefCell<Vec<Vec<String>>>,
    }

    impl ProcessService for RecordingProcess {
        fn kill_pids(&self, _pids: &[i32], _reason: &str) {}

        fn update_oom_adjustment(&self, processes: &[String]) {
            self.oom_updates.borrow_mut().push(processes.to_vec());
        }

        fn is_process_alive(&self, process: &str, _uid: u32) -> bool {
            !self.dead.borrow().iter().any(|dead| dead == process)
        }
    }

    fn home_info() -> ActivityInfo {
        let component = ComponentName::new(HOME_COMPONENT.0, HOME_COMPONENT.1);
        let application = ApplicationInfo::new(HOME_COMPONENT.0, 10_000, UserId(0));
        ActivityInfo::new(component, application)
    }

    fn test_root() -> (RootWindowContainer, Rc<RecordingProcess>) {
        let mut packages = StaticPackageService::new();
        packages.register(Some(HOME_ACTION), home_info());

        let process = Rc::new(RecordingProcess::default());
        let services = Services {
            package: Rc::new(packages),
            process: process.clone(),
            power: Rc::new(LoggingPowerService),
            compositor: Rc::new(InProcessCompositor::default()),
            status_bar: Rc::new(LoggingStatusBar),
            input: Rc::new(LoggingInput),
        };

        let mut root = RootWindowContainer::new(services, Config::default());
        root.on_display_added(DEFAULT_DISPLAY, DisplayInfo::new((400, 800)));
        (root, process)
    }

    fn record_with(
        component: ComponentName,
        affinity: Option<&str>,
        process: &str,
        uid: u32,
    ) -> ActivityRef {
        let mut info = ActivityInfo::new(
            component,
            ApplicationInfo::new(process, uid, UserId(0)),
        );
        info.process = process.into();
        info.task_affinity = affinity.map(String::from);
        let intent = Intent::for_component(info.component.clone());
        ActivityRecord::new_ref(info, intent, UserId(0))
    }

    fn push_activity(
        root: &mut RootWindowContainer,
        display_id: DisplayId,
        class: &str,
        process: &str,
    ) -> (TaskRef, ActivityRef) {
        let component = ComponentName::new(process, class);
        let activity = record_with(component, Some(process), process, 10_001);
        activity.borrow_mut().visible_requested = true;
        activity.borrow_mut().attach_window(format!("{process}/{class}"));

        let display = root.display_mut(display_id).unwrap();
        let stack = display.default_area_mut().create_stack(
            WindowingMode::Fullscreen,
            ActivityType::Standard,
            true,
        );
        stack.borrow_mut().push_activity(activity.clone());
        (stack, activity)
    }

    #[test]
    fn boot_into_empty_system_starts_home() {
        let (mut root, _) = test_root();

        assert!(root.start_home_on_display(UserId(0), "boot", DEFAULT_DISPLAY));

        let display = root.default_display();
        assert_eq!(display.default_area().stack_count(), 1);

        let stack = display.default_area().top_stack().unwrap();
        assert_eq!(stack.borrow().activity_type(), ActivityType::Home);

        let top = stack.borrow().top_running_activity().unwrap();
        assert_eq!(top.borrow().state, ActivityState::Resumed);
        assert_eq!(top.borrow().component().package, HOME_COMPONENT.0);
    }

    #[test]
    fn top_focused_display_defaults_to_default_display() {
        let (mut root, _) = test_root();
        root.on_display_added(DisplayId(2), DisplayInfo::new((1280, 720)));

        // Nothing focusable anywhere: the default display holds focus.
        root.update_focused_window();
        assert_eq!(root.top_focused_display, DEFAULT_DISPLAY);
        assert!(root.top_display_focused_stack().is_none());
    }

    #[test]
    fn focus_follows_topmost_display_with_window() {
        let (mut root, _) = test_root();
        root.on_display_added(DisplayId(2), DisplayInfo::new((1280, 720)));

        push_activity(&mut root, DEFAULT_DISPLAY, "Main", "org.example.mail");
        let (external_stack, _) =
            push_activity(&mut root, DisplayId(2), "Deck", "org.example.deck");

        root.update_focused_window();

        // The external display sits above the default one in z-order.
        assert_eq!(root.top_focused_display, DisplayId(2));
        let focused = root.top_display_focused_stack().unwrap();
        assert!(Rc::ptr_eq(&focused, &external_stack));
    }

    #[test]
    fn focus_recompute_is_idempotent() {
        let (mut root, _) = test_root();
        push_activity(&mut root, DEFAULT_DISPLAY, "Main", "org.example.mail");

        assert!(root.update_focused_window());
        assert!(!root.update_focused_window());
    }

    #[test]
    fn resume_falls_back_to_home_on_empty_display() {
        let (mut root, _) = test_root();

        // Fresh boot: no stack anywhere, yet resume makes progress.
        assert!(root.resume_focused_stacks_top_activities());

        let stack = root.default_display().default_area().top_stack().unwrap();
        assert_eq!(stack.borrow().activity_type(), ActivityType::Home);
        let top = stack.borrow().top_running_activity().unwrap();
        assert_eq!(top.borrow().state, ActivityState::Resumed);
    }

    #[test]
    fn resume_skips_dead_process() {
        let (mut root, process) = test_root();
        let (stack, activity) =
            push_activity(&mut root, DEFAULT_DISPLAY, "Main", "org.example.mail");

        process.dead.borrow_mut().push("org.example.mail".into());

        assert!(!root.resume_top_activity(&stack));
        assert_ne!(activity.borrow().state, ActivityState::Resumed);
        assert!(!activity.borrow().app_alive);
    }

    #[test]
    fn find_task_prefers_exact_match_over_affinity() {
        let (mut root, _) = test_root();

        // Exact-match task sits *below* the affinity-only task.
        let exact_component = ComponentName::new("org.example.mail", "Inbox");
        let exact = record_with(
            exact_component.clone(),
            Some("org.example.mail"),
            "org.example.mail",
            10_001,
        );
        let exact_stack = {
            let display = root.display_mut(DEFAULT_DISPLAY).unwrap();
            let stack = display.default_area_mut().create_stack(
                WindowingMode::Fullscreen,
                ActivityType::Standard,
                true,
            );
            stack.borrow_mut().push_activity(exact.clone());
            stack
        };

        let affinity_only = record_with(
            ComponentName::new("org.example.mail", "Compose"),
            Some("org.example.mail"),
            "org.example.mail",
            10_001,
        );
        {
            let display = root.display_mut(DEFAULT_DISPLAY).unwrap();
            let stack = display.default_area_mut().create_stack(
                WindowingMode::Fullscreen,
                ActivityType::Standard,
                true,
            );
            stack.borrow_mut().push_activity(affinity_only);
        }

        let mut target = ActivityInfo::new(
            exact_component.clone(),
            ApplicationInfo::new("org.example.mail", 10_001, UserId(0)),
        );
        target.task_affinity = Some("org.example.mail".into());
        let intent = Intent::for_component(exact_component);

        let result = root.find_task(&target, &intent, UserId(0), DEFAULT_DISPLAY);

        assert!(result.ideal);
        let record = result.record.unwrap();
        assert!(Rc::ptr_eq(&record, &exact));
        assert!(Rc::ptr_eq(&result.task.unwrap(), &exact_stack));
    }

    #[test]
    fn sleep_tokens_drive_display_sleep() {
        let (mut root, _) = test_root();
        let (_, activity) = push_activity(&mut root, DEFAULT_DISPLAY, "Main", "org.example.mail");
        activity.borrow_mut().set_state(ActivityState::Resumed);

        let token = root.create_sleep_token("power", DEFAULT_DISPLAY);
        root.apply_sleep_tokens(false);

        assert!(root.default_display().sleeping);
        assert_eq!(activity.borrow().state, ActivityState::Paused);
        assert!(!activity.borrow().visible_requested);

        // Removing the last token re-checks and wakes the display.
        root.remove_sleep_token(token);
        assert!(!root.default_display().sleeping);
        assert_eq!(activity.borrow().state, ActivityState::Resumed);
        assert!(activity.borrow().visible_requested);
    }

    #[test]
    fn sleep_grace_keeps_windows_visible() {
        let (mut root, _) = test_root();
        let (_, activity) = push_activity(&mut root, DEFAULT_DISPLAY, "Main", "org.example.mail");
        activity.borrow_mut().set_state(ActivityState::Resumed);

        let _token = root.create_sleep_token("transition", DEFAULT_DISPLAY);
        root.apply_sleep_tokens(true);

        assert_eq!(activity.borrow().state, ActivityState::Paused);
        // The grace period defers forcing invisibility.
        assert!(activity.borrow().visible_requested);
    }

    #[test]
    fn wake_respects_keyguard() {
        let (mut root, _) = test_root();
        let (_, activity) = push_activity(&mut root, DEFAULT_DISPLAY, "Main", "org.example.mail");
        activity.borrow_mut().set_state(ActivityState::Resumed);

        let token = root.create_sleep_token("lock", DEFAULT_DISPLAY);
        root.apply_sleep_tokens(false);

        root.display_mut(DEFAULT_DISPLAY).unwrap().policy.set_keyguard_showing(true, false);
        root.remove_sleep_token(token);

        assert!(!root.default_display().sleeping);
        // No resume behind the keyguard.
        assert_eq!(activity.borrow().state, ActivityState::Paused);
    }

    #[test]
    fn pinned_single_activity_task_is_reused() {
        let (mut root, _) = test_root();
        let (stack, activity) =
            push_activity(&mut root, DEFAULT_DISPLAY, "Player", "org.example.video");
        stack.borrow_mut().bounds = Rect::new((0, 0), (400, 800));
        let original_id = stack.borrow().id;

        let pinned = root.move_activity_to_pinned_root_task(&activity).unwrap();

        // Same task object, no new task created.
        assert_eq!(pinned.borrow().id, original_id);
        assert_eq!(pinned.borrow().windowing_mode(), WindowingMode::Pinned);
        assert_eq!(root.default_display().default_area().stack_count(), 1);

        // The transition-safe intermediate mode landed on the activity
        // before the task turned pinned.
        assert_eq!(activity.borrow().windowing_mode, WindowingMode::Fullscreen);
        assert_eq!(
            pinned.borrow().last_non_fullscreen_bounds,
            Some(Rect::new((0, 0), (400, 800)))
        );
    }

    #[test]
    fn launch_stack_honors_explicit_task_id() {
        let (mut root, _) = test_root();
        let (stack, _) = push_activity(&mut root, DEFAULT_DISPLAY, "Main", "org.example.mail");
        let task_id = stack.borrow().id;

        let mut options = ActivityOptions { launch_task_id: Some(task_id), ..Default::default() };
        let resolved = root.get_launch_stack(None, &mut options, None, true).unwrap();

        assert!(Rc::ptr_eq(&resolved, &stack));
        // The option survives the lookup.
        assert_eq!(options.launch_task_id, Some(task_id));
    }

    #[test]
    fn organizer_created_stack_refuses_direct_launch() {
        let (mut root, _) = test_root();
        let (stack, activity) =
            push_activity(&mut root, DEFAULT_DISPLAY, "Main", "org.example.mail");
        stack.borrow_mut().created_by_organizer = true;

        let mut options = ActivityOptions::default();
        let resolved = root
            .get_launch_stack(Some(&activity), &mut options, None, true)
            .unwrap();

        // The activity's own stack is rejected; a fresh one is created.
        assert!(!Rc::ptr_eq(&resolved, &stack));
    }

    #[test]
    fn split_primary_requires_split_capable_activity() {
        let (mut root, _) = test_root();
        let (stack, activity) =
            push_activity(&mut root, DEFAULT_DISPLAY, "Main", "org.example.mail");
        stack.borrow_mut().set_windowing_mode(WindowingMode::SplitScreenPrimary);

        assert!(!root.is_valid_launch_stack(
            &stack,
            Some(&activity),
            WindowingMode::Undefined,
            ActivityType::Standard,
        ));

        activity.borrow_mut().info.supports_split_screen = true;
        assert!(root.is_valid_launch_stack(
            &stack,
            Some(&activity),
            WindowingMode::Undefined,
            ActivityType::Standard,
        ));
        assert!(!root.is_valid_launch_stack(
            &stack,
            Some(&activity),
            WindowingMode::Freeform,
            ActivityType::Standard,
        ));
    }

    #[test]
    #[should_panic(expected = "launch area specified without a launch display")]
    fn launch_area_without_display_is_a_bug() {
        let (mut root, _) = test_root();
        let mut options = ActivityOptions { launch_area: Some(0), ..Default::default() };
        root.get_launch_stack(None, &mut options, None, true);
    }

    #[test]
    fn crash_reports_focused_task_first() {
        let (mut root, _) = test_root();
        let (bottom_stack, _) =
            push_activity(&mut root, DEFAULT_DISPLAY, "Doc", "org.example.crashy");
        let (top_stack, _) =
            push_activity(&mut root, DEFAULT_DISPLAY, "Main", "org.example.crashy");
        root.update_focused_window();

        let finished = root.finish_top_crashed_activities("org.example.crashy", 10_001);

        // Both tops crashed; the focused stack's task id wins.
        assert_eq!(finished, Some(top_stack.borrow().id));
        assert!(bottom_stack.borrow().top_activity(true, true).unwrap().borrow().finishing);
    }

    #[test]
    fn app_crash_destroys_records_and_stages_transition() {
        let (mut root, _) = test_root();
        let (_, activity) = push_activity(&mut root, DEFAULT_DISPLAY, "Main", "org.example.mail");

        root.handle_app_crash("org.example.mail", 10_001);

        assert_eq!(activity.borrow().state, ActivityState::Destroyed);
        // The stack lost its only activity and was reaped.
        assert_eq!(root.default_display().default_area().stack_count(), 0);
        assert_eq!(
            root.default_display().pending_transition,
            Some(TransitionKind::CrashingActivityClose)
        );
    }

    #[test]
    fn layer_ranks_follow_visibility() {
        let (mut root, process) = test_root();
        let (bottom, bottom_activity) =
            push_activity(&mut root, DEFAULT_DISPLAY, "Doc", "org.example.doc");
        let (top, _) = push_activity(&mut root, DEFAULT_DISPLAY, "Main", "org.example.mail");

        bottom_activity.borrow_mut().visible_requested = false;

        root.invalidate_task_layers();
        assert!(root.rank_recompute_pending());
        // Repeated invalidations coalesce into the pending recompute.
        root.invalidate_task_layers();

        root.rank_task_layers_if_needed();
        assert!(!root.rank_recompute_pending());

        assert_eq!(top.borrow().layer_rank, Some(1));
        assert_eq!(bottom.borrow().layer_rank, None);
        assert!(!process.oom_updates.borrow().is_empty());
    }

    #[test]
    fn visibility_pass_occludes_stacks_below_fullscreen() {
        let (mut root, _) = test_root();
        let (_, below) = push_activity(&mut root, DEFAULT_DISPLAY, "Doc", "org.example.doc");
        let (_, above) = push_activity(&mut root, DEFAULT_DISPLAY, "Main", "org.example.mail");

        root.ensure_activities_visible();

        assert!(above.borrow().visible_requested);
        assert!(!below.borrow().visible_requested);
    }

    #[test]
    fn placement_reaches_a_fixed_point() {
        let (mut root, _) = test_root();
        push_activity(&mut root, DEFAULT_DISPLAY, "Main", "org.example.mail");

        // Must terminate and be repeatable.
        root.perform_surface_placement();
        root.perform_surface_placement();
    }

    #[test]
    #[should_panic(expected = "default display may not be removed")]
    fn removing_default_display_panics() {
        let (mut root, _) = test_root();
        root.on_display_removed(DEFAULT_DISPLAY);
    }

    #[test]
    #[should_panic(expected = "called for the default display area")]
    fn secondary_home_on_default_display_panics() {
        let (root, _) = test_root();
        root.resolve_secondary_home_activity(UserId(0), DEFAULT_DISPLAY);
    }

    #[test]
    fn removing_secondary_display_finishes_its_activities() {
        let (mut root, _) = test_root();
        root.on_display_added(DisplayId(2), DisplayInfo::new((1280, 720)));
        let (_, activity) = push_activity(&mut root, DisplayId(2), "Deck", "org.example.deck");

        root.on_display_removed(DisplayId(2));

        assert!(root.display(DisplayId(2)).is_none());
        assert!(activity.borrow().finishing);
    }

    #[test]
    fn reset_extraction_reroutes_on_single_task_instance_displays() {
        let (mut root, _) = test_root();
        let mut info = DisplayInfo::new((1280, 720));
        info.single_task_instance = true;
        root.on_display_added(DisplayId(2), info);

        // Build a stack whose target task carries a stray foreign-affinity
        // activity marked for reparenting.
        let display = root.display_mut(DisplayId(2)).unwrap();
        let stack = display.default_area_mut().create_stack(
            WindowingMode::Fullscreen,
            ActivityType::Standard,
            true,
        );
        let target = crate::task::Task::new_ref(WindowingMode::Fullscreen, ActivityType::Standard);
        target.borrow_mut().affinity = Some("org.example.deck".into());
        let root_activity = record_with(
            ComponentName::new("org.example.deck", "Deck"),
            Some("org.example.deck"),
            "org.example.deck",
            10_004,
        );
        let stray = record_with(
            ComponentName::new("org.example.stray", "Stray"),
            Some("org.example.stray"),
            "org.example.stray",
            10_005,
        );
        stray.borrow_mut().info.flags = crate::intent::ActivityFlags::ALLOW_TASK_REPARENTING;
        target.borrow_mut().push_activity(root_activity);
        target.borrow_mut().push_activity(stray);
        stack.borrow_mut().push_task(target.clone());

        assert!(root.reset_task_if_needed(&stack, &target, false));

        // The extracted task landed on the default display, not locally.
        let default_stacks = root.default_display().default_area().stack_count();
        assert_eq!(default_stacks, 1);
        assert_eq!(stack.borrow().child_tasks().len(), 1);
    }

    #[test]
    fn rotation_propagates_to_organizers() {
        use crate::geometry::Rotation;
        use crate::organizer::{RunningTaskInfo, TaskOrganizer};
        use crate::services::SurfaceLeash;

        #[derive(Default)]
        struct InfoRecorder {
            infos: RefCell<Vec<RunningTaskInfo>>,
        }

        impl TaskOrganizer for InfoRecorder {
            fn on_task_appeared(&self, _info: &RunningTaskInfo, _leash: SurfaceLeash) {}
            fn on_task_vanished(&self, _info: &RunningTaskInfo) {}

            fn on_task_info_changed(&self, info: &RunningTaskInfo) {
                self.infos.borrow_mut().push(info.clone());
            }

            fn on_back_pressed_on_task_root(&self, _info: &RunningTaskInfo) -> bool {
                false
            }
        }

        let (mut root, _) = test_root();
        push_activity(&mut root, DEFAULT_DISPLAY, "Main", "org.example.mail");

        let recorder = Rc::new(InfoRecorder::default());
        let registration = root.register_task_organizer(recorder.clone());
        assert_eq!(registration.existing.len(), 1);

        // Settle the initial configuration sync.
        root.perform_surface_placement();
        recorder.infos.borrow_mut().clear();

        let mut info = DisplayInfo::new((400, 800));
        info.rotation = Rotation::Rotation90;
        root.on_display_changed(DEFAULT_DISPLAY, info);

        let infos = recorder.infos.borrow();
        let last = infos.last().expect("organizer saw the rotation");
        assert_eq!(last.config.screen_size, crate::geometry::Size::new(800, 400));
        assert!(last.config.sideways);
    }

    #[test]
    fn attach_application_resumes_visible_top() {
        let (mut root, _) = test_root();
        let (_, activity) = push_activity(&mut root, DEFAULT_DISPLAY, "Main", "org.example.mail");
        activity.borrow_mut().visible_requested = true;

        assert!(root.attach_application("org.example.mail", 10_001));
        assert!(activity.borrow().attached);
        assert_eq!(activity.borrow().state, ActivityState::Resumed);
    }
}
