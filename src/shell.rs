//! Shell core state.

use std::error::Error;
use std::time::{Duration, Instant};

use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, LoopHandle};
use tracing::info;

use crate::config::Config;
use crate::display::{DisplayId, DisplayInfo, DEFAULT_DISPLAY};
use crate::geometry::Rotation;
use crate::intent::UserId;
use crate::policy::ScreenEdge;
use crate::root::RootWindowContainer;
use crate::sensitive::SensitiveContentPackages;
use crate::services::Services;

/// How often destroyable activities are swept up.
const IDLE_DESTROY_INTERVAL: Duration = Duration::from_secs(30);

/// Logical size used for the default display at startup.
const DEFAULT_DISPLAY_SIZE: (i32, i32) = (400, 800);

/// Shared shell state, owned by a single-threaded event loop.
///
/// Everything below the root container is single-writer by construction:
/// all mutation happens either synchronously from an inbound call or from a
/// callback the loop runs with exclusive access to this state.
pub struct Atrium {
    pub event_loop: LoopHandle<'static, Self>,
    pub root: RootWindowContainer,
    pub sensitive: SensitiveContentPackages,
}

impl Atrium {
    /// Initialize the shell core.
    pub fn new(
        event_loop: LoopHandle<'static, Self>,
        services: Services,
        config: Config,
    ) -> Self {
        let mut root = RootWindowContainer::new(services, config);
        root.set_event_loop(event_loop.clone());

        Self { event_loop, root, sensitive: SensitiveContentPackages::new() }
    }

    // Inbound platform events.

    /// A display was attached.
    pub fn on_display_added(&mut self, id: DisplayId, info: DisplayInfo) {
        self.root.on_display_added(id, info);
        self.root.perform_surface_placement();
    }

    /// A display's properties changed.
    pub fn on_display_changed(&mut self, id: DisplayId, info: DisplayInfo) {
        self.root.on_display_changed(id, info);
    }

    /// A display was detached.
    pub fn on_display_removed(&mut self, id: DisplayId) {
        self.root.on_display_removed(id);
        self.root.perform_surface_placement();
    }

    /// The display content rotated.
    pub fn on_rotation_changed(&mut self, id: DisplayId, rotation: Rotation) {
        if let Some(display) = self.root.display_mut(id) {
            display.set_rotation(rotation);
            self.root.perform_surface_placement();
        }
    }

    /// A transient-reveal swipe started from a screen edge.
    pub fn on_edge_swipe(&mut self, id: DisplayId, edge: ScreenEdge) {
        let revealed = match self.root.display_mut(id) {
            Some(display) => display.policy.on_edge_swipe(edge, Instant::now()),
            None => return,
        };

        if revealed {
            self.root.perform_surface_placement();
        }
    }

    /// Panic gesture: reveal all bars for a bounded window.
    pub fn on_panic_gesture(&mut self, id: DisplayId) {
        if let Some(display) = self.root.display_mut(id) {
            display.policy.on_panic_gesture(Instant::now());
            self.root.perform_surface_placement();
        }
    }

    /// Register a decor window with a display's policy.
    ///
    /// Duplicate singletons and conflicting inset providers are rejected
    /// with a distinguished error.
    pub fn add_decor_window(
        &mut self,
        id: DisplayId,
        window: &crate::window::WindowRef,
    ) -> Result<(), crate::policy::WindowAddError> {
        let display = match self.root.display_mut(id) {
            Some(display) => display,
            None => return Ok(()),
        };

        display.policy.add_window(window)?;
        self.root.perform_surface_placement();
        Ok(())
    }

    /// Drop a decor window from a display's policy.
    pub fn remove_decor_window(&mut self, id: DisplayId, window: &crate::window::WindowRef) {
        if let Some(display) = self.root.display_mut(id) {
            display.policy.remove_window(window);
            self.root.perform_surface_placement();
        }
    }

    /// A client process crashed.
    pub fn on_app_crash(&mut self, process: &str, uid: u32) -> Option<crate::task::TaskId> {
        self.root.handle_app_crash(process, uid);
        let finished = self.root.finish_top_crashed_activities(process, uid);
        self.root.perform_surface_placement();
        finished
    }

    /// A client process died without a crash report.
    pub fn on_app_died(&mut self, process: &str, uid: u32) {
        self.root.handle_app_died(process, uid);
        self.root.perform_surface_placement();
    }

    /// A client process finished attaching.
    pub fn on_app_attached(&mut self, process: &str, uid: u32) {
        if self.root.attach_application(process, uid) {
            self.root.perform_surface_placement();
        }
    }

    /// Check whether capture must be blocked on a display.
    ///
    /// Consults the sensitive-content registry for the focused app.
    pub fn should_block_screen_capture(&self, id: DisplayId) -> bool {
        let display = match self.root.display(id) {
            Some(display) => display,
            None => return false,
        };

        let focused = match &display.focused_app {
            Some(focused) => focused.borrow(),
            None => return false,
        };

        let application = &focused.info.application;
        self.sensitive.should_block_screen_capture(&application.package, application.uid)
    }

    /// Keyguard visibility changed.
    pub fn set_keyguard_showing(&mut self, id: DisplayId, showing: bool, occluded: bool) {
        if let Some(display) = self.root.display_mut(id) {
            display.policy.set_keyguard_showing(showing, occluded);
            self.root.perform_surface_placement();
        }
    }

    /// Request a placement pass from outside the lock-holder.
    ///
    /// The pass runs on the next loop iteration with exclusive state access.
    pub fn request_placement(&mut self) {
        self.event_loop.insert_idle(|atrium| atrium.root.perform_surface_placement());
    }
}

/// Run the shell on a fresh event loop until it is stopped.
pub fn run(config: Config, services: Services) -> Result<(), Box<dyn Error>> {
    let mut event_loop: EventLoop<'static, Atrium> = EventLoop::try_new()?;
    let mut atrium = Atrium::new(event_loop.handle(), services, config);

    // Bring up the default display and its home activity.
    atrium.on_display_added(DEFAULT_DISPLAY, DisplayInfo::new(DEFAULT_DISPLAY_SIZE));
    atrium.root.start_home_on_display(UserId(0), "startup", DEFAULT_DISPLAY);
    atrium.root.perform_surface_placement();

    // Periodic sweep tearing down finished activities.
    event_loop
        .handle()
        .insert_source(Timer::from_duration(IDLE_DESTROY_INTERVAL), |_, _, atrium| {
            atrium.root.destroy_all_destroyable_activities();
            TimeoutAction::ToDuration(IDLE_DESTROY_INTERVAL)
        })
        .map_err(|err| format!("register idle-destroy timer: {err}"))?;

    info!("atrium core up");
    event_loop.run(None, &mut atrium, |_| {})?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::intent::{ActivityInfo, ApplicationInfo, ComponentName};
    use crate::root::HOME_ACTION;
    use crate::services::StaticPackageService;

    fn test_setup() -> (EventLoop<'static, Atrium>, Atrium) {
        let mut packages = StaticPackageService::new();
        let component = ComponentName::new("org.example.launcher", "Home");
        let application = ApplicationInfo::new("org.example.launcher", 10_000, UserId(0));
        packages.register(Some(HOME_ACTION), ActivityInfo::new(component, application));

        let event_loop = EventLoop::try_new().unwrap();
        let atrium = Atrium::new(
            event_loop.handle(),
            Services::in_process(Rc::new(packages)),
            Config::default(),
        );
        (event_loop, atrium)
    }

    #[test]
    fn deferred_rank_recompute_runs_on_idle() {
        let (mut event_loop, mut atrium) = test_setup();
        atrium.on_display_added(DEFAULT_DISPLAY, DisplayInfo::new(DEFAULT_DISPLAY_SIZE));
        atrium.root.start_home_on_display(UserId(0), "test", DEFAULT_DISPLAY);

        atrium.root.invalidate_task_layers();
        assert!(atrium.root.rank_recompute_pending());

        // One loop turn drains the debounced recomputation.
        event_loop.dispatch(Some(Duration::ZERO), &mut atrium).unwrap();
        assert!(!atrium.root.rank_recompute_pending());

        let stack = atrium
            .root
            .default_display()
            .default_area()
            .top_stack()
            .unwrap();
        assert_eq!(stack.borrow().layer_rank, Some(1));
    }

    #[test]
    fn capture_blocking_consults_sensitive_registry() {
        use crate::sensitive::PackageInfo;

        let (_event_loop, mut atrium) = test_setup();
        atrium.on_display_added(DEFAULT_DISPLAY, DisplayInfo::new(DEFAULT_DISPLAY_SIZE));
        atrium.root.start_home_on_display(UserId(0), "test", DEFAULT_DISPLAY);
        atrium.root.perform_surface_placement();

        assert!(!atrium.should_block_screen_capture(DEFAULT_DISPLAY));

        atrium
            .sensitive
            .add_block_screen_capture([PackageInfo::new("org.example.launcher", 10_000)]);
        assert!(atrium.should_block_screen_capture(DEFAULT_DISPLAY));
    }

    #[test]
    fn decor_registration_rejects_duplicates() {
        use crate::policy::WindowAddError;
        use crate::window::{WindowKind, WindowState};

        let (_event_loop, mut atrium) = test_setup();
        atrium.on_display_added(DEFAULT_DISPLAY, DisplayInfo::new(DEFAULT_DISPLAY_SIZE));

        let first = WindowState::new_ref(WindowKind::StatusBar, "status");
        let second = WindowState::new_ref(WindowKind::StatusBar, "status-2");

        assert!(atrium.add_decor_window(DEFAULT_DISPLAY, &first).is_ok());
        assert_eq!(
            atrium.add_decor_window(DEFAULT_DISPLAY, &second),
            Err(WindowAddError::MultipleSingletons)
        );
    }

    #[test]
    fn startup_sequence_boots_home() {
        let (_event_loop, mut atrium) = test_setup();
        atrium.on_display_added(DEFAULT_DISPLAY, DisplayInfo::new(DEFAULT_DISPLAY_SIZE));
        assert!(atrium.root.start_home_on_display(UserId(0), "startup", DEFAULT_DISPLAY));
        atrium.root.perform_surface_placement();

        assert_eq!(atrium.root.top_focused_display, DEFAULT_DISPLAY);
    }
}
