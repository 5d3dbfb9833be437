//! Per-display decor and inset policy.

use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::config::Config;
use crate::frames::DisplayFrames;
use crate::geometry::{Insets, Rect};
use crate::window::{
    Appearance, BarVisibility, Behavior, DisableFlags, WindowKind, WindowRef, WindowState,
};

/// Rejection reasons for decor window registration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WindowAddError {
    /// A live window already fills this singleton slot.
    MultipleSingletons,
    /// A provider for the same inset category is already alive.
    ConflictingInsetProvider,
}

/// Edge the navigation bar is laid out against.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum NavPosition {
    #[default]
    Bottom,
    Left,
    Right,
}

/// Screen edge a transient-reveal swipe started from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScreenEdge {
    Top,
    Bottom,
    Left,
    Right,
}

/// Decor state machine for a single display.
///
/// Owns the singleton status bar / navigation bar / notification shade
/// references (plus the flexible alt-bar providers), computes decor frames
/// and the resulting insets on every layout pass, and tracks the system-bar
/// appearance state needed to detect when another pass is required.
#[derive(Debug)]
pub struct DisplayPolicy {
    is_default_display: bool,
    config: Config,

    // Singleton decor windows.
    status_bar: Option<WindowRef>,
    navigation_bar: Option<WindowRef>,
    notification_shade: Option<WindowRef>,
    status_bar_alt: Option<WindowRef>,
    navigation_bar_alt: Option<WindowRef>,

    // Focus chain for appearance resolution.
    focused_window: Option<WindowRef>,
    last_focus_with_keys: Option<WindowRef>,

    // State compared across layout passes.
    nav_position: NavPosition,
    nav_visible: bool,
    nav_translucent: bool,
    nav_allowed_hidden: bool,
    last_disable_flags: DisableFlags,
    last_appearance: Appearance,
    last_fullscreen_appearance: Appearance,
    last_docked_appearance: Appearance,
    last_behavior: Behavior,
    last_docked_bounds: Rect,
    last_non_docked_bounds: Rect,
    docked_bounds: Rect,
    non_docked_bounds: Rect,

    // Transient bar reveals.
    transient_bars: BarVisibility,
    transient_deadline: Option<Instant>,

    /// Device setup finished; transient reveals stay disabled before that.
    setup_complete: bool,

    // Keyguard and power signals.
    keyguard_showing: bool,
    keyguard_occluded: bool,
    lock_animation_running: bool,
    draw_complete: bool,
    screen_on: bool,
}

impl DisplayPolicy {
    pub fn new(is_default_display: bool, config: &Config) -> Self {
        Self {
            is_default_display,
            config: config.clone(),
            status_bar: None,
            navigation_bar: None,
            notification_shade: None,
            status_bar_alt: None,
            navigation_bar_alt: None,
            focused_window: None,
            last_focus_with_keys: None,
            nav_position: NavPosition::default(),
            nav_visible: true,
            nav_translucent: false,
            nav_allowed_hidden: false,
            last_disable_flags: DisableFlags::default(),
            last_appearance: Appearance::default(),
            last_fullscreen_appearance: Appearance::default(),
            last_docked_appearance: Appearance::default(),
            last_behavior: Behavior::default(),
            last_docked_bounds: Rect::default(),
            last_non_docked_bounds: Rect::default(),
            docked_bounds: Rect::default(),
            non_docked_bounds: Rect::default(),
            transient_bars: BarVisibility::empty(),
            transient_deadline: None,
            setup_complete: false,
            keyguard_showing: false,
            keyguard_occluded: false,
            lock_animation_running: false,
            draw_complete: false,
            screen_on: true,
        }
    }

    /// Register a decor window with this display.
    ///
    /// Singleton slots reject duplicates while the current holder is alive;
    /// alt providers and classic bars for the same inset category exclude
    /// each other.
    pub fn add_window(&mut self, window: &WindowRef) -> Result<(), WindowAddError> {
        let kind = window.borrow().kind;
        match kind {
            WindowKind::StatusBar => {
                if slot_alive(&self.status_bar) {
                    return Err(WindowAddError::MultipleSingletons);
                }
                if slot_alive(&self.status_bar_alt) {
                    return Err(WindowAddError::ConflictingInsetProvider);
                }
                self.status_bar = Some(window.clone());
            },
            WindowKind::NavigationBar => {
                if slot_alive(&self.navigation_bar) {
                    return Err(WindowAddError::MultipleSingletons);
                }
                if slot_alive(&self.navigation_bar_alt) {
                    return Err(WindowAddError::ConflictingInsetProvider);
                }
                self.navigation_bar = Some(window.clone());
            },
            WindowKind::NotificationShade => {
                if slot_alive(&self.notification_shade) {
                    return Err(WindowAddError::MultipleSingletons);
                }
                self.notification_shade = Some(window.clone());
            },
            WindowKind::AltStatusBar => {
                if slot_alive(&self.status_bar) || slot_alive(&self.status_bar_alt) {
                    return Err(WindowAddError::ConflictingInsetProvider);
                }
                self.status_bar_alt = Some(window.clone());
            },
            WindowKind::AltNavigationBar => {
                if slot_alive(&self.navigation_bar) || slot_alive(&self.navigation_bar_alt) {
                    return Err(WindowAddError::ConflictingInsetProvider);
                }
                self.navigation_bar_alt = Some(window.clone());
            },
            // Ordinary windows are not tracked by the decor policy.
            _ => (),
        }

        debug!("decor window added: {kind:?}");
        Ok(())
    }

    /// Drop a decor window from its slot.
    pub fn remove_window(&mut self, window: &WindowRef) {
        for slot in [
            &mut self.status_bar,
            &mut self.navigation_bar,
            &mut self.notification_shade,
            &mut self.status_bar_alt,
            &mut self.navigation_bar_alt,
        ] {
            if slot.as_ref().is_some_and(|slotted| Rc::ptr_eq(slotted, window)) {
                *slot = None;
            }
        }

        if self.focused_window.as_ref().is_some_and(|focus| Rc::ptr_eq(focus, window)) {
            self.focused_window = None;
        }
        if self.last_focus_with_keys.as_ref().is_some_and(|focus| Rc::ptr_eq(focus, window)) {
            self.last_focus_with_keys = None;
        }
    }

    /// Update the policy's notion of the focused window.
    pub fn focus_changed(&mut self, window: Option<WindowRef>) {
        if let Some(window) = &window {
            if window.borrow().can_receive_focus() {
                self.last_focus_with_keys = Some(window.clone());
            }
        }
        self.focused_window = window;
    }

    /// Compute decor frames and insets for one layout pass.
    pub fn layout(&mut self, frames: &mut DisplayFrames) {
        frames.reset_for_layout();

        // Keep app content out of the cutout.
        frames.content = frames.cutout_safe;
        frames.stable = frames.cutout_safe;

        self.nav_position = self.navigation_bar_position(frames);

        self.layout_status_bar(frames);
        self.layout_navigation_bar(frames);

        // Docked tasks get whatever the decor left over.
        frames.dock = frames.content;

        // The shade overlays the whole display when it shows.
        if let Some(shade) = live_window(&self.notification_shade) {
            shade.borrow_mut().frame = frames.display;
        }
    }

    fn layout_status_bar(&mut self, frames: &mut DisplayFrames) {
        let bar = match live_window(&self.status_bar).or_else(|| live_window(&self.status_bar_alt))
        {
            Some(bar) => bar,
            None => return,
        };

        // The bar covers the cutout area when the notch is taller.
        let height = self.config.status_bar_height.max(frames.cutout.top);
        let frame = Rect::new((0, 0), (frames.display.size.w, height));

        let visible = self.status_bar_visible();
        {
            let mut bar = bar.borrow_mut();
            bar.frame = frame;
            bar.visible = visible;
        }

        // Stable space excludes the bar even while it is hidden.
        let stable_bottom = frames.stable.bottom();
        frames.stable.loc.y = frames.stable.loc.y.max(frame.bottom());
        frames.stable.size.h = (stable_bottom - frames.stable.loc.y).max(0);
        if visible {
            let content_bottom = frames.content.bottom();
            frames.content.loc.y = frames.content.loc.y.max(frame.bottom());
            frames.content.size.h = (content_bottom - frames.content.loc.y).max(0);
        }
    }

    fn layout_navigation_bar(&mut self, frames: &mut DisplayFrames) {
        let bar = match live_window(&self.navigation_bar)
            .or_else(|| live_window(&self.navigation_bar_alt))
        {
            Some(bar) => bar,
            None => return,
        };

        let display = frames.display;
        let inset = self.config.navigation_bar_height;
        let frame_depth = self.config.navigation_bar_frame_height.max(inset);
        let visible = self.navigation_bar_visible();

        // The frame is deeper than the content inset so gesture hit testing
        // can extend past the visible bar.
        let (frame, content_insets) = match self.nav_position {
            NavPosition::Bottom => (
                Rect::new(
                    (0, display.bottom() - frame_depth),
                    (display.size.w, frame_depth),
                ),
                Insets::new(0, 0, 0, inset),
            ),
            NavPosition::Right => (
                Rect::new(
                    (display.right() - frame_depth, 0),
                    (frame_depth, display.size.h),
                ),
                Insets::new(0, 0, inset, 0),
            ),
            NavPosition::Left => (
                Rect::new((0, 0), (frame_depth, display.size.h)),
                Insets::new(inset, 0, 0, 0),
            ),
        };

        {
            let mut bar = bar.borrow_mut();
            bar.frame = frame;
            bar.visible = visible;
        }

        frames.stable = frames.stable.inset(content_insets);
        if visible {
            frames.content = frames.content.inset(content_insets);
        }
    }

    /// Edge the navigation bar belongs to for the current display shape.
    pub fn navigation_bar_position(&self, frames: &DisplayFrames) -> NavPosition {
        if !self.config.navigation_bar_can_move {
            return NavPosition::Bottom;
        }

        let size = frames.size();
        if size.w <= size.h {
            return NavPosition::Bottom;
        }

        match frames.rotation {
            crate::geometry::Rotation::Rotation90 => NavPosition::Right,
            crate::geometry::Rotation::Rotation270 => NavPosition::Left,
            _ => NavPosition::Bottom,
        }
    }

    /// Recompute system-UI state from the focus chain.
    ///
    /// Returns whether anything changed that requires another layout pass;
    /// callers re-run layout until this reports `false`.
    pub fn update_system_ui_visibility(&mut self, now: Instant) -> bool {
        let mut changed = self.update_transient_bars(now);

        let target = self.appearance_target();
        let (appearance, behavior, disable_flags, requested_bars) = match &target {
            Some(window) => {
                let window = window.borrow();
                (window.appearance, window.behavior, window.disable_flags, window.requested_bars)
            },
            None => (
                Appearance::default(),
                Behavior::default(),
                DisableFlags::default(),
                BarVisibility::default(),
            ),
        };

        let nav_visible = self.keyguard_showing
            || requested_bars.contains(BarVisibility::NAVIGATION)
            || self.transient_bars.contains(BarVisibility::NAVIGATION);
        let nav_translucent =
            appearance.contains(Appearance::SEMI_TRANSPARENT_NAVIGATION_BARS);
        let nav_allowed_hidden = !requested_bars.contains(BarVisibility::NAVIGATION)
            && behavior.contains(Behavior::SHOW_TRANSIENT_BARS_BY_SWIPE);

        // Docked split halves carry their own light/dark content flags.
        let docked_appearance =
            if self.docked_bounds.is_empty() { Appearance::default() } else { appearance };

        changed |= self.nav_visible != nav_visible
            || self.nav_translucent != nav_translucent
            || self.nav_allowed_hidden != nav_allowed_hidden
            || self.last_appearance != appearance
            || self.last_fullscreen_appearance != appearance
            || self.last_docked_appearance != docked_appearance
            || self.last_behavior != behavior
            || self.last_disable_flags != disable_flags
            || self.last_docked_bounds != self.docked_bounds
            || self.last_non_docked_bounds != self.non_docked_bounds;

        self.nav_visible = nav_visible;
        self.nav_translucent = nav_translucent;
        self.nav_allowed_hidden = nav_allowed_hidden;
        self.last_appearance = appearance;
        self.last_fullscreen_appearance = appearance;
        self.last_docked_appearance = docked_appearance;
        self.last_behavior = behavior;
        self.last_disable_flags = disable_flags;
        self.last_docked_bounds = self.docked_bounds;
        self.last_non_docked_bounds = self.non_docked_bounds;

        if changed {
            trace!("system ui state changed, relayout required");
        }

        changed
    }

    /// Window whose appearance requests drive the system bars.
    ///
    /// The immersive confirmation prompt never controls appearance; it falls
    /// back to the shade while the keyguard shows, else to the last window
    /// that could receive keys.
    fn appearance_target(&self) -> Option<WindowRef> {
        let focus = live_window(&self.focused_window);
        let confirmation = focus
            .as_ref()
            .is_some_and(|window| window.borrow().kind == WindowKind::ImmersiveConfirmation);
        if !confirmation {
            return focus;
        }

        if self.keyguard_showing {
            if let Some(shade) = live_window(&self.notification_shade) {
                return Some(shade);
            }
        }

        live_window(&self.last_focus_with_keys)
    }

    /// Update the docked/non-docked stack bounds consulted by appearance
    /// diffing.
    pub fn set_stack_bounds(&mut self, docked: Rect, non_docked: Rect) {
        self.docked_bounds = docked;
        self.non_docked_bounds = non_docked;
    }

    /// Handle a directional swipe from a screen edge.
    ///
    /// Returns whether a transient reveal started.
    pub fn on_edge_swipe(&mut self, edge: ScreenEdge, now: Instant) -> bool {
        if !self.setup_complete {
            return false;
        }

        // No transient reveal while the locked shade controls the insets.
        if self.keyguard_showing && slot_alive(&self.notification_shade) {
            return false;
        }

        let bar = match edge {
            ScreenEdge::Top => {
                let has_status =
                    slot_alive(&self.status_bar) || slot_alive(&self.status_bar_alt);
                has_status.then_some(BarVisibility::STATUS)
            },
            ScreenEdge::Bottom if self.nav_position == NavPosition::Bottom => {
                Some(BarVisibility::NAVIGATION)
            },
            ScreenEdge::Left if self.nav_position == NavPosition::Left => {
                Some(BarVisibility::NAVIGATION)
            },
            ScreenEdge::Right if self.nav_position == NavPosition::Right => {
                Some(BarVisibility::NAVIGATION)
            },
            _ => None,
        };

        let bar = match bar {
            Some(bar) => bar,
            None => return false,
        };

        let has_nav = slot_alive(&self.navigation_bar) || slot_alive(&self.navigation_bar_alt);
        if bar == BarVisibility::NAVIGATION && !has_nav {
            return false;
        }

        self.show_transient_bars(bar, now);
        true
    }

    /// Recover from a misbehaving fullscreen app after a panic gesture.
    ///
    /// Reveals all system bars for a bounded window of time.
    pub fn on_panic_gesture(&mut self, now: Instant) {
        debug!("panic gesture, requesting transient bars");
        self.show_transient_bars(BarVisibility::all(), now);
    }

    fn show_transient_bars(&mut self, bars: BarVisibility, now: Instant) {
        self.transient_bars |= bars;
        let timeout = Duration::from_millis(self.config.transient_bar_timeout_ms);
        self.transient_deadline = Some(now + timeout);
    }

    /// Expire transient reveals past their deadline.
    fn update_transient_bars(&mut self, now: Instant) -> bool {
        let deadline = match self.transient_deadline {
            Some(deadline) => deadline,
            None => return false,
        };

        if now < deadline {
            return false;
        }

        self.transient_bars = BarVisibility::empty();
        self.transient_deadline = None;
        true
    }

    /// Abort transient reveals, e.g. when focus moves.
    pub fn abort_transient_bars(&mut self) {
        self.transient_bars = BarVisibility::empty();
        self.transient_deadline = None;
    }

    /// Check whether the keyguard hides the supplied window.
    pub fn should_be_hidden_by_keyguard(&self, window: &WindowState) -> bool {
        // Never show the keyboard before the unlock transition finished.
        if window.kind == WindowKind::Ime {
            return self.lock_animation_running
                || (self.is_default_display && !self.draw_complete);
        }

        if !self.keyguard_showing || self.keyguard_occluded {
            return false;
        }

        !window.show_when_locked && window.kind != WindowKind::SystemError
    }

    /// Force-hide a window the keyguard covers.
    pub fn apply_keyguard_policy(&self, window: &mut WindowState) {
        if self.should_be_hidden_by_keyguard(window) {
            window.visible = false;
        }
    }

    fn status_bar_visible(&self) -> bool {
        if self.keyguard_showing || self.transient_bars.contains(BarVisibility::STATUS) {
            return true;
        }

        match live_window(&self.focused_window) {
            Some(window) => window.borrow().requested_bars.contains(BarVisibility::STATUS),
            None => true,
        }
    }

    fn navigation_bar_visible(&self) -> bool {
        if self.keyguard_showing || self.transient_bars.contains(BarVisibility::NAVIGATION) {
            return true;
        }

        match live_window(&self.focused_window) {
            Some(window) => window.borrow().requested_bars.contains(BarVisibility::NAVIGATION),
            None => true,
        }
    }

    // Keyguard and power signals.

    pub fn set_keyguard_showing(&mut self, showing: bool, occluded: bool) {
        self.keyguard_showing = showing;
        self.keyguard_occluded = occluded;
    }

    pub fn keyguard_showing(&self) -> bool {
        self.keyguard_showing
    }

    pub fn set_lock_animation_running(&mut self, running: bool) {
        self.lock_animation_running = running;
    }

    pub fn on_draw_complete(&mut self) {
        self.draw_complete = true;
    }

    pub fn screen_turned_on(&mut self) {
        self.screen_on = true;
    }

    pub fn screen_turned_off(&mut self) {
        self.screen_on = false;
    }

    pub fn is_screen_on(&self) -> bool {
        self.screen_on
    }

    pub fn set_setup_complete(&mut self) {
        self.setup_complete = true;
    }

    // State read back by the root container for bar notifications.

    pub fn appearance(&self) -> Appearance {
        self.last_appearance
    }

    pub fn disable_flags(&self) -> DisableFlags {
        self.last_disable_flags
    }

    pub fn nav_position(&self) -> NavPosition {
        self.nav_position
    }

    pub fn transient_bars(&self) -> BarVisibility {
        self.transient_bars
    }

    pub fn status_bar(&self) -> Option<WindowRef> {
        live_window(&self.status_bar)
    }

    pub fn navigation_bar(&self) -> Option<WindowRef> {
        live_window(&self.navigation_bar)
    }

    pub fn notification_shade(&self) -> Option<WindowRef> {
        live_window(&self.notification_shade)
    }
}

/// Check if a decor slot holds a live window.
fn slot_alive(slot: &Option<WindowRef>) -> bool {
    slot.as_ref().is_some_and(|window| window.borrow().alive())
}

/// Get the slot's window while it is alive.
fn live_window(slot: &Option<WindowRef>) -> Option<WindowRef> {
    slot.as_ref().filter(|window| window.borrow().alive()).cloned()
}
