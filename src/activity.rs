//! Activity lifecycle records.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::intent::{ActivityFlags, ActivityInfo, Intent, LaunchMode, UserId};
use crate::task::WindowingMode;
use crate::window::{WindowKind, WindowRef, WindowState};

/// Shared handle to an activity record.
pub type ActivityRef = Rc<RefCell<ActivityRecord>>;

/// Weak back-reference to an activity record.
pub type WeakActivityRef = Weak<RefCell<ActivityRecord>>;

/// Lifecycle state of one activity instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ActivityState {
    Initializing,
    Resumed,
    Pausing,
    Paused,
    Stopping,
    Stopped,
    Finishing,
    Destroyed,
}

/// One logical activity instance.
#[derive(Debug)]
pub struct ActivityRecord {
    pub info: ActivityInfo,
    pub intent: Intent,
    pub user: UserId,
    pub state: ActivityState,

    /// Activity is on its way out and excluded from matching/resume.
    pub finishing: bool,

    /// Visibility the hierarchy currently wants for this activity.
    pub visible_requested: bool,

    /// Activity that receives this activity's result, if any.
    ///
    /// Weak on purpose: a result target must never keep its caller alive.
    pub result_to: Option<WeakActivityRef>,

    /// Activity floats above its task and is skipped by task matching.
    pub task_overlay: bool,

    /// Activity belongs to an active voice interaction session.
    pub voice_session: bool,

    /// Hosting client process is believed alive.
    pub app_alive: bool,

    /// Hosting client process has attached.
    pub attached: bool,

    /// Windowing mode pinned directly onto the activity during transitions.
    pub windowing_mode: WindowingMode,

    /// Main window surface, if the client has created one.
    pub window: Option<WindowRef>,

    /// Intent recorded for affinity-based task matching.
    pub affinity_intent: Option<Intent>,
}

impl ActivityRecord {
    pub fn new(info: ActivityInfo, intent: Intent, user: UserId) -> Self {
        Self {
            info,
            intent,
            user,
            state: ActivityState::Initializing,
            finishing: false,
            visible_requested: false,
            result_to: None,
            task_overlay: false,
            voice_session: false,
            app_alive: true,
            attached: false,
            windowing_mode: WindowingMode::Undefined,
            window: None,
            affinity_intent: None,
        }
    }

    /// Shared handle for a new record.
    pub fn new_ref(info: ActivityInfo, intent: Intent, user: UserId) -> ActivityRef {
        Rc::new(RefCell::new(Self::new(info, intent, user)))
    }

    /// Component this record was resolved to.
    pub fn component(&self) -> &crate::intent::ComponentName {
        &self.info.component
    }

    /// Task affinity declared by the activity.
    pub fn task_affinity(&self) -> Option<&str> {
        self.info.task_affinity.as_deref()
    }

    /// Launch mode declared by the activity.
    pub fn launch_mode(&self) -> LaunchMode {
        self.info.launch_mode
    }

    /// Check a manifest behavior flag.
    pub fn has_flag(&self, flag: ActivityFlags) -> bool {
        self.info.flags.contains(flag)
    }

    /// Check if the activity still takes part in resume and matching.
    pub fn is_running(&self) -> bool {
        !self.finishing && self.state != ActivityState::Destroyed && self.app_alive
    }

    /// Check if the activity may be torn down by the idle-destroy sweep.
    pub fn is_destroyable(&self) -> bool {
        self.finishing
            || !matches!(self.state, ActivityState::Resumed | ActivityState::Pausing)
    }

    /// Move the record to a new lifecycle state.
    pub fn set_state(&mut self, state: ActivityState) {
        if self.state == state {
            return;
        }

        debug!("activity {} state {:?} -> {:?}", self.component(), self.state, state);
        self.state = state;

        if state == ActivityState::Finishing {
            self.finishing = true;
        }
    }

    /// Mark the activity as finishing without destroying it yet.
    pub fn finish(&mut self) {
        if self.finishing {
            return;
        }

        self.finishing = true;
        self.visible_requested = false;
        self.set_state(ActivityState::Finishing);
    }

    /// Tear the record down after its client is gone.
    pub fn destroy(&mut self) {
        self.finishing = true;
        self.visible_requested = false;
        if let Some(window) = &self.window {
            window.borrow_mut().mark_dead();
        }
        self.set_state(ActivityState::Destroyed);
    }

    /// Attach the client's main window surface.
    pub fn attach_window(&mut self, name: impl Into<String>) -> WindowRef {
        let window = WindowState::new_ref(WindowKind::App, name);
        window.borrow_mut().show_when_locked = self.has_flag(ActivityFlags::SHOW_WHEN_LOCKED);
        self.window = Some(window.clone());
        window
    }

    /// Window able to take focus for this activity, if any.
    pub fn focusable_window(&self) -> Option<WindowRef> {
        let window = self.window.as_ref()?;
        window.borrow().can_receive_focus().then(|| window.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{ApplicationInfo, ComponentName};

    fn record(name: &str) -> ActivityRecord {
        let component = ComponentName::new("org.example.app", name);
        let application = ApplicationInfo::new("org.example.app", 10_001, UserId(0));
        let info = ActivityInfo::new(component, application);
        ActivityRecord::new(info.clone(), Intent::for_component(info.component), UserId(0))
    }

    #[test]
    fn finishing_removes_from_running_set() {
        let mut activity = record("Main");
        assert!(activity.is_running());

        activity.finish();
        assert!(!activity.is_running());
        assert_eq!(activity.state, ActivityState::Finishing);
    }

    #[test]
    fn destroy_kills_window() {
        let mut activity = record("Main");
        let window = activity.attach_window("main-window");

        activity.destroy();
        assert!(!window.borrow().alive());
        assert_eq!(activity.state, ActivityState::Destroyed);
    }

    #[test]
    fn resumed_activity_is_not_destroyable() {
        let mut activity = record("Main");
        activity.set_state(ActivityState::Resumed);
        assert!(!activity.is_destroyable());

        activity.set_state(ActivityState::Stopped);
        assert!(activity.is_destroyable());
    }
}
