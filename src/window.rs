//! Window leaf state.

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;

use crate::geometry::Rect;

/// Shared handle to a window leaf.
pub type WindowRef = Rc<RefCell<WindowState>>;

bitflags! {
    /// System bar appearance requested by a window.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Appearance: u32 {
        const LIGHT_STATUS_BARS = 1 << 0;
        const LIGHT_NAVIGATION_BARS = 1 << 1;
        const OPAQUE_STATUS_BARS = 1 << 2;
        const OPAQUE_NAVIGATION_BARS = 1 << 3;
        const SEMI_TRANSPARENT_STATUS_BARS = 1 << 4;
        const SEMI_TRANSPARENT_NAVIGATION_BARS = 1 << 5;
        const LOW_PROFILE_BARS = 1 << 6;
    }
}

bitflags! {
    /// System bar interaction behavior requested by a window.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Behavior: u32 {
        /// Hidden bars reveal transiently on a swipe from their edge.
        const SHOW_TRANSIENT_BARS_BY_SWIPE = 1 << 0;
    }
}

bitflags! {
    /// System UI functionality disabled by the focused window.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct DisableFlags: u32 {
        const HOME = 1 << 0;
        const RECENTS = 1 << 1;
        const BACK = 1 << 2;
        const NOTIFICATION_ALERTS = 1 << 3;
        const SYSTEM_INFO = 1 << 4;
    }
}

bitflags! {
    /// System bar categories a window asks to keep visible.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct BarVisibility: u32 {
        const STATUS = 1 << 0;
        const NAVIGATION = 1 << 1;
    }
}

impl Default for BarVisibility {
    fn default() -> Self {
        BarVisibility::all()
    }
}

/// Role a window plays on its display.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WindowKind {
    /// Ordinary client window owned by an activity.
    App,
    /// The singleton status bar.
    StatusBar,
    /// The singleton navigation bar.
    NavigationBar,
    /// The singleton notification shade.
    NotificationShade,
    /// Flexible inset provider standing in for the status bar.
    AltStatusBar,
    /// Flexible inset provider standing in for the navigation bar.
    AltNavigationBar,
    /// Input method surface.
    Ime,
    /// Immersive-mode confirmation prompt.
    ImmersiveConfirmation,
    /// High-priority system error surface.
    SystemError,
}

impl WindowKind {
    /// Check if only one window of this kind may exist per display.
    pub fn is_singleton(self) -> bool {
        matches!(
            self,
            WindowKind::StatusBar | WindowKind::NavigationBar | WindowKind::NotificationShade
        )
    }
}

/// One window surface and the per-window state layout consults.
#[derive(Debug)]
pub struct WindowState {
    pub kind: WindowKind,

    /// Client-supplied identifier, used for logging and input handoff.
    pub name: String,

    /// Window wants to be shown.
    pub visible_requested: bool,

    /// Window is currently shown.
    pub visible: bool,

    /// Window accepts input focus.
    pub focusable: bool,

    /// Client has produced its first frame.
    pub drawn: bool,

    /// Window may show above the lock screen.
    pub show_when_locked: bool,

    /// Bar appearance requested while this window is focused.
    pub appearance: Appearance,

    /// Bar behavior requested while this window is focused.
    pub behavior: Behavior,

    /// System UI features disabled while this window is focused.
    pub disable_flags: DisableFlags,

    /// Bars this window requests to remain visible.
    pub requested_bars: BarVisibility,

    /// Frame assigned by the last layout pass.
    pub frame: Rect,

    /// Window liveliness override.
    dead: bool,
}

impl WindowState {
    pub fn new(kind: WindowKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            visible_requested: true,
            visible: false,
            focusable: matches!(kind, WindowKind::App | WindowKind::NotificationShade),
            drawn: false,
            show_when_locked: false,
            appearance: Appearance::default(),
            behavior: Behavior::default(),
            disable_flags: DisableFlags::default(),
            requested_bars: BarVisibility::default(),
            frame: Rect::default(),
            dead: false,
        }
    }

    /// Shared handle for a new window.
    pub fn new_ref(kind: WindowKind, name: impl Into<String>) -> WindowRef {
        Rc::new(RefCell::new(Self::new(kind, name)))
    }

    /// Check window liveliness.
    pub fn alive(&self) -> bool {
        !self.dead
    }

    /// Mark the window as dead, excluding it from layout and focus.
    pub fn mark_dead(&mut self) {
        self.dead = true;
        self.visible = false;
        self.visible_requested = false;
    }

    /// Check if this window can currently receive input focus.
    pub fn can_receive_focus(&self) -> bool {
        self.alive() && self.focusable && self.visible_requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_windows_refuse_focus() {
        let window = WindowState::new_ref(WindowKind::App, "mail");
        assert!(window.borrow().can_receive_focus());

        window.borrow_mut().mark_dead();
        assert!(!window.borrow().can_receive_focus());
    }

    #[test]
    fn singleton_kinds() {
        assert!(WindowKind::StatusBar.is_singleton());
        assert!(WindowKind::NotificationShade.is_singleton());
        assert!(!WindowKind::AltStatusBar.is_singleton());
        assert!(!WindowKind::App.is_singleton());
    }
}
