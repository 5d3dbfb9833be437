//! External collaborator boundaries.
//!
//! The hierarchy core never talks to the platform directly; everything it
//! needs from the outside world goes through these narrow traits. The
//! default implementations log through `tracing` and keep the shell
//! runnable without a surrounding platform.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::display::DisplayId;
use crate::intent::{ActivityInfo, Intent, UserId};
use crate::task::TaskId;
use crate::window::{Appearance, DisableFlags};

/// Package resolution.
pub trait PackageService {
    /// Resolve the best activity for an intent.
    fn resolve_activity(&self, intent: &Intent, user: UserId) -> Option<ActivityInfo>;

    /// All activities matching an intent, resolution order first.
    fn query_intent_activities(&self, intent: &Intent, user: UserId) -> Vec<ActivityInfo>;
}

/// Client process control.
pub trait ProcessService {
    /// Kill a set of client pids.
    fn kill_pids(&self, pids: &[i32], reason: &str);

    /// Ask the process owners to recompute their oom-adjustment scores.
    fn update_oom_adjustment(&self, processes: &[String]);

    /// Check whether a client process is still believed alive.
    fn is_process_alive(&self, process: &str, uid: u32) -> bool;
}

/// Power and brightness control.
pub trait PowerService {
    fn set_brightness_override(&self, brightness: Option<f32>);
    fn set_user_activity_timeout(&self, timeout: Option<Duration>);
}

/// Compositor transaction and leash brokerage.
///
/// Transactions and leashes are scoped resources; the RAII wrappers below
/// keep open/close pairs balanced on every path.
pub trait CompositorService {
    fn begin_transaction(&self) -> u64;
    fn end_transaction(&self, transaction: u64);
    fn merge_transaction(&self, target: u64, source: u64);
    fn allocate_leash(&self, task: TaskId) -> u64;
    fn release_leash(&self, leash: u64);
    fn destroy_surface(&self, surface: u64);
}

/// System bar IPC.
pub trait StatusBarService {
    fn set_disable_flags(&self, display: DisplayId, flags: DisableFlags);
    fn appearance_changed(&self, display: DisplayId, appearance: Appearance);
    fn transition_pending(&self, display: DisplayId);
    fn transition_starting(&self, display: DisplayId);
    fn transition_finished(&self, display: DisplayId);
}

/// Input dispatcher notifications.
pub trait InputService {
    fn focused_display_changed(&self, display: DisplayId);
    fn focused_window_changed(&self, display: DisplayId, window: Option<&str>);
}

/// Bundle of all outbound service handles.
#[derive(Clone)]
pub struct Services {
    pub package: Rc<dyn PackageService>,
    pub process: Rc<dyn ProcessService>,
    pub power: Rc<dyn PowerService>,
    pub compositor: Rc<dyn CompositorService>,
    pub status_bar: Rc<dyn StatusBarService>,
    pub input: Rc<dyn InputService>,
}

impl Services {
    /// In-process services suitable for a standalone shell.
    pub fn in_process(package: Rc<dyn PackageService>) -> Self {
        Self {
            package,
            process: Rc::new(SystemProcessService),
            power: Rc::new(LoggingPowerService),
            compositor: Rc::new(InProcessCompositor::default()),
            status_bar: Rc::new(LoggingStatusBar),
            input: Rc::new(LoggingInput),
        }
    }

    /// Create a leash for a task surface.
    pub fn create_leash(&self, task: TaskId) -> SurfaceLeash {
        let id = self.compositor.allocate_leash(task);
        SurfaceLeash { id, task, compositor: self.compositor.clone(), released: false }
    }

    /// Open a compositor transaction scope.
    pub fn transaction_scope(&self) -> TransactionScope {
        let id = self.compositor.begin_transaction();
        TransactionScope { id, compositor: self.compositor.clone(), ended: false }
    }
}

/// Scoped handle to a task surface handed to an organizer.
pub struct SurfaceLeash {
    id: u64,
    task: TaskId,
    compositor: Rc<dyn CompositorService>,
    released: bool,
}

impl SurfaceLeash {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    /// Release the leash early.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.compositor.release_leash(self.id);
        }
    }
}

impl Drop for SurfaceLeash {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for SurfaceLeash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceLeash").field("id", &self.id).field("task", &self.task).finish()
    }
}

/// Scoped compositor transaction, closed even on early returns.
pub struct TransactionScope {
    id: u64,
    compositor: Rc<dyn CompositorService>,
    ended: bool,
}

impl TransactionScope {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Close the transaction.
    pub fn end(mut self) {
        self.end_once();
    }

    fn end_once(&mut self) {
        if !self.ended {
            self.ended = true;
            self.compositor.end_transaction(self.id);
        }
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        self.end_once();
    }
}

/// Package service resolving from a static activity table.
#[derive(Default)]
pub struct StaticPackageService {
    entries: Vec<(Option<String>, ActivityInfo)>,
}

impl StaticPackageService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an activity, optionally matched by an intent action.
    pub fn register(&mut self, action: Option<&str>, info: ActivityInfo) {
        self.entries.push((action.map(String::from), info));
    }
}

impl PackageService for StaticPackageService {
    fn resolve_activity(&self, intent: &Intent, _user: UserId) -> Option<ActivityInfo> {
        if let Some(component) = &intent.component {
            let found = self
                .entries
                .iter()
                .find(|(_, info)| &info.component == component)
                .map(|(_, info)| info.clone());
            if found.is_some() {
                return found;
            }
        }

        self.entries
            .iter()
            .find(|(action, _)| action.as_deref() == intent.action.as_deref() && action.is_some())
            .map(|(_, info)| info.clone())
    }

    fn query_intent_activities(&self, intent: &Intent, _user: UserId) -> Vec<ActivityInfo> {
        self.entries
            .iter()
            .filter(|(action, info)| {
                intent.component.as_ref().is_some_and(|component| component == &info.component)
                    || (action.is_some() && action.as_deref() == intent.action.as_deref())
            })
            .map(|(_, info)| info.clone())
            .collect()
    }
}

/// Process control backed by plain signals.
pub struct SystemProcessService;

impl ProcessService for SystemProcessService {
    fn kill_pids(&self, pids: &[i32], reason: &str) {
        info!("killing {pids:?}: {reason}");
        for &pid in pids {
            // Ignore processes that are already gone.
            unsafe { libc::kill(pid, libc::SIGKILL) };
        }
    }

    fn update_oom_adjustment(&self, processes: &[String]) {
        trace!("oom adjustment requested for {processes:?}");
    }

    fn is_process_alive(&self, _process: &str, _uid: u32) -> bool {
        true
    }
}

/// Power service that only records requests.
pub struct LoggingPowerService;

impl PowerService for LoggingPowerService {
    fn set_brightness_override(&self, brightness: Option<f32>) {
        debug!("brightness override: {brightness:?}");
    }

    fn set_user_activity_timeout(&self, timeout: Option<Duration>) {
        debug!("user activity timeout: {timeout:?}");
    }
}

/// Compositor stub handing out monotonic resource ids.
#[derive(Default)]
pub struct InProcessCompositor {
    next_id: Cell<u64>,
}

impl InProcessCompositor {
    fn next(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }
}

impl CompositorService for InProcessCompositor {
    fn begin_transaction(&self) -> u64 {
        let id = self.next();
        trace!("transaction {id} open");
        id
    }

    fn end_transaction(&self, transaction: u64) {
        trace!("transaction {transaction} closed");
    }

    fn merge_transaction(&self, target: u64, source: u64) {
        trace!("transaction {source} merged into {target}");
    }

    fn allocate_leash(&self, task: TaskId) -> u64 {
        let id = self.next();
        trace!("leash {id} allocated for task {task:?}");
        id
    }

    fn release_leash(&self, leash: u64) {
        trace!("leash {leash} released");
    }

    fn destroy_surface(&self, surface: u64) {
        trace!("surface {surface} destroyed");
    }
}

/// Status bar sink that only logs.
pub struct LoggingStatusBar;

impl StatusBarService for LoggingStatusBar {
    fn set_disable_flags(&self, display: DisplayId, flags: DisableFlags) {
        let did = display;
        debug!("display {did:?} disable flags {flags:?}");
    }

    fn appearance_changed(&self, display: DisplayId, appearance: Appearance) {
        let did = display;
        debug!("display {did:?} appearance {appearance:?}");
    }

    fn transition_pending(&self, display: DisplayId) {
        let did = display;
        trace!("display {did:?} transition pending");
    }

    fn transition_starting(&self, display: DisplayId) {
        let did = display;
        trace!("display {did:?} transition starting");
    }

    fn transition_finished(&self, display: DisplayId) {
        let did = display;
        trace!("display {did:?} transition finished");
    }
}

/// Input dispatcher sink that only logs.
pub struct LoggingInput;

impl InputService for LoggingInput {
    fn focused_display_changed(&self, display: DisplayId) {
        let did = display;
        debug!("focused display now {did:?}");
    }

    fn focused_window_changed(&self, display: DisplayId, window: Option<&str>) {
        let did = display;
        debug!("display {did:?} focused window now {window:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Compositor double counting open resources.
    #[derive(Default)]
    pub(crate) struct CountingCompositor {
        next_id: Cell<u64>,
        pub open_transactions: RefCell<Vec<u64>>,
        pub open_leashes: RefCell<Vec<u64>>,
    }

    impl CompositorService for CountingCompositor {
        fn begin_transaction(&self) -> u64 {
            let id = self.next_id.get() + 1;
            self.next_id.set(id);
            self.open_transactions.borrow_mut().push(id);
            id
        }

        fn end_transaction(&self, transaction: u64) {
            self.open_transactions.borrow_mut().retain(|&id| id != transaction);
        }

        fn merge_transaction(&self, _target: u64, _source: u64) {}

        fn allocate_leash(&self, _task: TaskId) -> u64 {
            let id = self.next_id.get() + 1;
            self.next_id.set(id);
            self.open_leashes.borrow_mut().push(id);
            id
        }

        fn release_leash(&self, leash: u64) {
            self.open_leashes.borrow_mut().retain(|&id| id != leash);
        }

        fn destroy_surface(&self, _surface: u64) {}
    }

    #[test]
    fn leash_release_is_balanced_on_drop() {
        let compositor = Rc::new(CountingCompositor::default());
        let services = Services {
            package: Rc::new(StaticPackageService::new()),
            process: Rc::new(SystemProcessService),
            power: Rc::new(LoggingPowerService),
            compositor: compositor.clone(),
            status_bar: Rc::new(LoggingStatusBar),
            input: Rc::new(LoggingInput),
        };

        {
            let _leash = services.create_leash(TaskId(7));
            assert_eq!(compositor.open_leashes.borrow().len(), 1);
        }
        assert!(compositor.open_leashes.borrow().is_empty());

        let leash = services.create_leash(TaskId(8));
        leash.release();
        assert!(compositor.open_leashes.borrow().is_empty());
    }

    #[test]
    fn transaction_scope_closes_on_drop() {
        let compositor = Rc::new(CountingCompositor::default());
        let services = Services {
            package: Rc::new(StaticPackageService::new()),
            process: Rc::new(SystemProcessService),
            power: Rc::new(LoggingPowerService),
            compositor: compositor.clone(),
            status_bar: Rc::new(LoggingStatusBar),
            input: Rc::new(LoggingInput),
        };

        {
            let _scope = services.transaction_scope();
            assert_eq!(compositor.open_transactions.borrow().len(), 1);
        }
        assert!(compositor.open_transactions.borrow().is_empty());
    }

    #[test]
    fn static_resolution_prefers_component_match() {
        use crate::intent::{ApplicationInfo, ComponentName};

        let mut packages = StaticPackageService::new();
        let home = ActivityInfo::new(
            ComponentName::new("org.example.launcher", "Home"),
            ApplicationInfo::new("org.example.launcher", 10_000, UserId(0)),
        );
        let mail = ActivityInfo::new(
            ComponentName::new("org.example.mail", "Inbox"),
            ApplicationInfo::new("org.example.mail", 10_001, UserId(0)),
        );
        packages.register(Some("home"), home.clone());
        packages.register(None, mail.clone());

        let by_action = packages.resolve_activity(&Intent::for_action("home"), UserId(0));
        assert_eq!(by_action.unwrap().component, home.component);

        let by_component =
            packages.resolve_activity(&Intent::for_component(mail.component.clone()), UserId(0));
        assert_eq!(by_component.unwrap().component, mail.component);
    }
}
