//! Launch intents and package metadata.

use std::fmt::{self, Display, Formatter};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// User identity owning an activity.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub u32);

/// Fully qualified activity component.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentName {
    pub package: String,
    pub class: String,
}

impl ComponentName {
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self { package: package.into(), class: class.into() }
    }
}

impl Display for ComponentName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.class)
    }
}

/// Document data reference carried by an intent.
///
/// Compared by full value, matching the document-task matching rules.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Uri(pub String);

bitflags! {
    /// Launch-time intent flags.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct IntentFlags: u32 {
        /// Start the activity in a new task.
        const NEW_TASK = 1 << 0;
        /// Treat the launch as a new document task.
        const NEW_DOCUMENT = 1 << 1;
        /// Relaunch carries task-reset semantics.
        const RESET_TASK_IF_NEEDED = 1 << 2;
    }
}

bitflags! {
    /// Static per-activity behavior flags from its manifest entry.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct ActivityFlags: u32 {
        /// Activity may migrate to a task matching its affinity.
        const ALLOW_TASK_REPARENTING = 1 << 0;
        /// Activity is finished whenever its task is re-launched.
        const FINISH_ON_TASK_LAUNCH = 1 << 1;
        /// Activity is cleared when its task is reset.
        const CLEAR_WHEN_TASK_RESET = 1 << 2;
        /// Activity may appear above the lock screen.
        const SHOW_WHEN_LOCKED = 1 << 3;
    }
}

/// Activity instantiation policy.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LaunchMode {
    #[default]
    Standard,
    SingleTop,
    SingleTask,
    SingleInstance,
}

/// Request to launch or match an activity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Intent {
    pub action: Option<String>,
    pub component: Option<ComponentName>,
    pub data: Option<Uri>,
    pub flags: IntentFlags,
}

impl Intent {
    /// Intent resolving to a specific component.
    pub fn for_component(component: ComponentName) -> Self {
        Self { component: Some(component), ..Default::default() }
    }

    /// Intent matched by action only.
    pub fn for_action(action: impl Into<String>) -> Self {
        Self { action: Some(action.into()), ..Default::default() }
    }

    /// Check if this intent launches a document task.
    pub fn is_document(&self) -> bool {
        self.flags.contains(IntentFlags::NEW_DOCUMENT) || self.data.is_some()
    }
}

/// Hosting application metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplicationInfo {
    pub package: String,
    pub uid: u32,
    pub user: UserId,
}

impl ApplicationInfo {
    pub fn new(package: impl Into<String>, uid: u32, user: UserId) -> Self {
        Self { package: package.into(), uid, user }
    }

    /// Copy of this application's metadata owned by another user.
    pub fn for_user(&self, user: UserId) -> Self {
        Self { package: self.package.clone(), uid: self.uid, user }
    }
}

/// Resolved activity metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityInfo {
    pub component: ComponentName,
    pub application: ApplicationInfo,
    pub process: String,
    pub task_affinity: Option<String>,
    pub launch_mode: LaunchMode,
    pub flags: ActivityFlags,
    pub resizeable: bool,
    pub supports_split_screen: bool,
}

impl ActivityInfo {
    pub fn new(component: ComponentName, application: ApplicationInfo) -> Self {
        let process = application.package.clone();
        Self {
            component,
            application,
            process,
            task_affinity: None,
            launch_mode: LaunchMode::default(),
            flags: ActivityFlags::default(),
            resizeable: true,
            supports_split_screen: false,
        }
    }

    /// Copy of this activity info re-homed onto a per-user application.
    pub fn with_application(&self, application: ApplicationInfo) -> Self {
        let mut info = self.clone();
        info.application = application;
        info
    }
}
