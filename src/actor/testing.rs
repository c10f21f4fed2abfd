//! In-memory stand-ins for the external ports.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::common::collections::{HashMap, HashSet, VecDeque};
use crate::common::config::Config;
use crate::model::{ProjectDescriptor, WindowId, WindowRecord, WorkspaceName};
use crate::sys::geometry::Rect;
use crate::sys::launch::{AppLauncher, LaunchRequest};
use crate::sys::modifiers::ModifierState;
use crate::sys::positioner::{PositionerError, WindowHandle, WindowPositioner};
use crate::sys::window_service::{TransportError, TransportResult, WindowService};

pub const EDITOR: &str = "com.microsoft.VSCode";
pub const BROWSER: &str = "com.google.Chrome";
pub const TERMINAL: &str = "com.apple.Terminal";

pub fn window(id: i64, app: &str, workspace: &str, title: &str) -> WindowRecord {
    WindowRecord {
        window_id: WindowId::new(id),
        app_bundle_id: app.to_string(),
        workspace: WorkspaceName::new(workspace),
        title: Some(title.to_string()),
    }
}

pub fn project(id: &str, name: &str) -> ProjectDescriptor {
    ProjectDescriptor {
        id: id.to_string(),
        name: name.to_string(),
        path: format!("/src/{id}"),
        color_tag: String::new(),
    }
}

/// Default config with two projects; both apps put the token in their args
/// so created windows carry it in their titles.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.projects = vec![project("demo", "Demo"), project("other", "Other Thing")];
    config.settings.editor.args = vec!["--title={token}".to_string(), "{path}".to_string()];
    config
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListWindows {
        workspace: Option<WorkspaceName>,
        app: Option<String>,
    },
    ListFocused,
    ListAll,
    Focus(WindowId),
    Move(WindowId, WorkspaceName),
    FocusedWorkspace,
    WorkspaceExists(WorkspaceName),
    Switch(WorkspaceName),
    Create(WorkspaceName),
    Close(WorkspaceName),
}

struct Pending {
    visible_at: Instant,
    record: WindowRecord,
    focus: bool,
}

#[derive(Default)]
pub struct ServiceState {
    pub windows: Vec<WindowRecord>,
    pub workspaces: Vec<WorkspaceName>,
    pub focused_workspace: Option<WorkspaceName>,
    pub focused_window: Option<WindowId>,
    /// Switch requests are accepted but have no effect.
    pub ignore_switches: bool,
    pub calls: Vec<Call>,
    pub move_errors: HashMap<WindowId, TransportError>,
    pub list_all_error: Option<TransportError>,
    pub focus_error: Option<TransportError>,
    /// Errors returned, in order, by the next focused-window queries.
    pub focused_errors: VecDeque<TransportError>,
    /// Errors returned, in order, by the next scoped window listings.
    pub list_errors: VecDeque<TransportError>,
    /// Cancelled as soon as a move command is received.
    pub cancel_on_move: Option<CancellationToken>,
    /// Latency of every window listing filtered by application.
    pub list_delay: Option<Duration>,
    pending: Vec<Pending>,
}

#[derive(Default)]
pub struct FakeWindowService {
    state: Mutex<ServiceState>,
}

impl FakeWindowService {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub fn with_windows(windows: Vec<WindowRecord>) -> Arc<Self> {
        let service = Self::default();
        {
            let mut state = service.state.lock();
            for w in &windows {
                if !state.workspaces.contains(&w.workspace) {
                    state.workspaces.push(w.workspace.clone());
                }
            }
            state.windows = windows;
        }
        Arc::new(service)
    }

    pub fn update(&self, f: impl FnOnce(&mut ServiceState)) { f(&mut self.state.lock()) }

    pub fn calls(&self) -> Vec<Call> { self.state.lock().calls.clone() }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn windows(&self) -> Vec<WindowRecord> { self.state.lock().windows.clone() }

    pub fn workspace_of(&self, id: i64) -> Option<WorkspaceName> {
        let state = self.state.lock();
        state.windows.iter().find(|w| w.window_id == WindowId::new(id)).map(|w| w.workspace.clone())
    }

    /// Makes `record` appear `after` from now, optionally taking focus.
    pub fn schedule_window(&self, record: WindowRecord, after: Duration, focus: bool) {
        self.state.lock().pending.push(Pending {
            visible_at: Instant::now() + after,
            record,
            focus,
        });
    }

    fn enter(&self, call: Call) -> parking_lot::MutexGuard<'_, ServiceState> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let (ready, waiting): (Vec<_>, Vec<_>) =
            std::mem::take(&mut state.pending).into_iter().partition(|p| p.visible_at <= now);
        state.pending = waiting;
        for p in ready {
            if p.focus {
                state.focused_window = Some(p.record.window_id);
            }
            if !state.workspaces.contains(&p.record.workspace) {
                state.workspaces.push(p.record.workspace.clone());
            }
            state.windows.push(p.record);
        }
        state.calls.push(call);
        state
    }
}

impl WindowService for FakeWindowService {
    async fn list_windows(
        &self,
        workspace: Option<&WorkspaceName>,
        app_bundle_id: Option<&str>,
    ) -> TransportResult<Vec<WindowRecord>> {
        let delay = self.state.lock().list_delay.filter(|_| app_bundle_id.is_some());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.enter(Call::ListWindows {
            workspace: workspace.cloned(),
            app: app_bundle_id.map(str::to_string),
        });
        if let Some(err) = state.list_errors.pop_front() {
            return Err(err);
        }
        Ok(state
            .windows
            .iter()
            .filter(|w| workspace.is_none_or(|ws| &w.workspace == ws))
            .filter(|w| app_bundle_id.is_none_or(|app| w.app_bundle_id == app))
            .cloned()
            .collect())
    }

    async fn list_windows_focused(&self) -> TransportResult<Vec<WindowRecord>> {
        let mut state = self.enter(Call::ListFocused);
        if let Some(err) = state.focused_errors.pop_front() {
            return Err(err);
        }
        let focused = state.focused_window;
        Ok(state.windows.iter().filter(|w| Some(w.window_id) == focused).cloned().collect())
    }

    async fn list_windows_all(&self) -> TransportResult<Vec<WindowRecord>> {
        let state = self.enter(Call::ListAll);
        if let Some(err) = state.list_all_error.clone() {
            return Err(err);
        }
        Ok(state.windows.clone())
    }

    async fn focus_window(&self, window_id: WindowId) -> TransportResult<()> {
        let mut state = self.enter(Call::Focus(window_id));
        if let Some(err) = state.focus_error.clone() {
            return Err(err);
        }
        state.focused_window = Some(window_id);
        Ok(())
    }

    async fn move_window(
        &self,
        window_id: WindowId,
        to_workspace: &WorkspaceName,
    ) -> TransportResult<()> {
        let mut state = self.enter(Call::Move(window_id, to_workspace.clone()));
        if let Some(token) = &state.cancel_on_move {
            token.cancel();
        }
        if let Some(err) = state.move_errors.get(&window_id).cloned() {
            return Err(err);
        }
        match state.windows.iter_mut().find(|w| w.window_id == window_id) {
            Some(w) => {
                w.workspace = to_workspace.clone();
                Ok(())
            }
            None => Err(TransportError::NonZeroExit {
                command: format!("move-node-to-workspace --window-id {window_id}"),
                status: 1,
                stderr: "Invalid window id".to_string(),
            }),
        }
    }

    async fn focused_workspace(&self) -> TransportResult<WorkspaceName> {
        let state = self.enter(Call::FocusedWorkspace);
        Ok(state.focused_workspace.clone().unwrap_or_else(|| WorkspaceName::new("1")))
    }

    async fn workspace_exists(&self, name: &WorkspaceName) -> TransportResult<bool> {
        let state = self.enter(Call::WorkspaceExists(name.clone()));
        Ok(state.workspaces.contains(name))
    }

    async fn switch_workspace(&self, name: &WorkspaceName) -> TransportResult<()> {
        let mut state = self.enter(Call::Switch(name.clone()));
        if !state.ignore_switches {
            state.focused_workspace = Some(name.clone());
        }
        Ok(())
    }

    async fn create_workspace(&self, name: &WorkspaceName) -> TransportResult<()> {
        let mut state = self.enter(Call::Create(name.clone()));
        if !state.workspaces.contains(name) {
            state.workspaces.push(name.clone());
        }
        Ok(())
    }

    async fn close_workspace(&self, name: &WorkspaceName) -> TransportResult<()> {
        let mut state = self.enter(Call::Close(name.clone()));
        state.windows.retain(|w| &w.workspace != name);
        state.workspaces.retain(|ws| ws != name);
        Ok(())
    }
}

/// Where a launched window shows up, and how fast.
#[derive(Debug, Clone)]
pub struct PlannedWindow {
    pub id: i64,
    pub workspace: String,
    pub after: Duration,
    pub focus: bool,
    /// Title to use; `None` means "the launch arguments, joined".
    pub title: Option<String>,
}

impl PlannedWindow {
    pub fn in_workspace(id: i64, workspace: &str, after_ms: u64) -> Self {
        Self {
            id,
            workspace: workspace.to_string(),
            after: Duration::from_millis(after_ms),
            focus: true,
            title: None,
        }
    }
}

pub struct FakeAppLauncher {
    service: Arc<FakeWindowService>,
    installed: HashSet<String>,
    plans: Mutex<HashMap<String, VecDeque<Vec<PlannedWindow>>>>,
    opened: Mutex<Vec<LaunchRequest>>,
}

impl FakeAppLauncher {
    pub fn new(service: Arc<FakeWindowService>) -> Arc<Self> {
        Arc::new(Self {
            service,
            installed: [EDITOR, BROWSER, TERMINAL].into_iter().map(str::to_string).collect(),
            plans: Mutex::new(HashMap::default()),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn without(service: Arc<FakeWindowService>, missing: &str) -> Arc<Self> {
        let mut launcher = Self {
            service,
            installed: [EDITOR, BROWSER, TERMINAL].into_iter().map(str::to_string).collect(),
            plans: Mutex::new(HashMap::default()),
            opened: Mutex::new(Vec::new()),
        };
        launcher.installed.remove(missing);
        Arc::new(launcher)
    }

    /// Windows produced by the next `open` of `app`. An empty plan opens
    /// nothing.
    pub fn plan(&self, app: &str, windows: Vec<PlannedWindow>) {
        self.plans.lock().entry(app.to_string()).or_default().push_back(windows);
    }

    pub fn opened(&self) -> Vec<LaunchRequest> { self.opened.lock().clone() }
}

impl AppLauncher for FakeAppLauncher {
    async fn resolve(&self, bundle_id: &str) -> Option<PathBuf> {
        self.installed
            .contains(bundle_id)
            .then(|| PathBuf::from(format!("/Applications/{bundle_id}.app")))
    }

    async fn open(&self, request: &LaunchRequest) -> TransportResult<()> {
        self.opened.lock().push(request.clone());
        let planned = self
            .plans
            .lock()
            .get_mut(&request.bundle_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        for plan in planned {
            let title = plan.title.unwrap_or_else(|| request.args.join(" "));
            self.service.schedule_window(
                window(plan.id, &request.bundle_id, &plan.workspace, &title),
                plan.after,
                plan.focus,
            );
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct PositionerState {
    pub visible_frame: Option<Rect>,
    pub handles: HashMap<String, WindowHandle>,
    pub failing: HashSet<WindowHandle>,
    pub frames: Vec<(WindowHandle, Rect)>,
    pub lookups: Vec<(String, String)>,
    /// Titles reported by `read_title`; unknown handles read as `None`.
    pub titles: HashMap<WindowHandle, String>,
}

#[derive(Default)]
pub struct FakePositioner {
    state: Mutex<PositionerState>,
}

impl FakePositioner {
    /// 1000x800 visible frame; editor and browser are both findable.
    pub fn standard() -> Arc<Self> {
        let positioner = Self::default();
        {
            let mut state = positioner.state.lock();
            state.visible_frame = Some(Rect::new(0.0, 0.0, 1000.0, 800.0));
            state.handles.insert(EDITOR.to_string(), WindowHandle { pid: 1, index: 0 });
            state.handles.insert(BROWSER.to_string(), WindowHandle { pid: 2, index: 0 });
        }
        Arc::new(positioner)
    }

    pub fn update(&self, f: impl FnOnce(&mut PositionerState)) { f(&mut self.state.lock()) }

    pub fn frames(&self) -> Vec<(WindowHandle, Rect)> { self.state.lock().frames.clone() }

    pub fn lookups(&self, bundle_id: &str) -> usize {
        self.state.lock().lookups.iter().filter(|(app, _)| app == bundle_id).count()
    }
}

impl WindowPositioner for FakePositioner {
    async fn find_window(
        &self,
        bundle_id: &str,
        title_or_token: &str,
    ) -> Result<Option<WindowHandle>, PositionerError> {
        let mut state = self.state.lock();
        state.lookups.push((bundle_id.to_string(), title_or_token.to_string()));
        Ok(state.handles.get(bundle_id).copied())
    }

    async fn set_frame(&self, handle: WindowHandle, frame: Rect) -> Result<(), PositionerError> {
        let mut state = self.state.lock();
        if state.failing.contains(&handle) {
            return Err(PositionerError::Failed("AXError -25200".to_string()));
        }
        state.frames.push((handle, frame));
        Ok(())
    }

    async fn read_title(&self, handle: WindowHandle) -> Option<String> {
        self.state.lock().titles.get(&handle).cloned()
    }

    async fn visible_frame(&self) -> Option<Rect> { self.state.lock().visible_frame }
}

#[derive(Default)]
pub struct FakeModifiers {
    held: AtomicBool,
}

impl FakeModifiers {
    pub fn held() -> Arc<Self> {
        let modifiers = Self::default();
        modifiers.held.store(true, Ordering::SeqCst);
        Arc::new(modifiers)
    }

    pub fn release(&self) { self.held.store(false, Ordering::SeqCst) }
}

impl ModifierState for FakeModifiers {
    fn is_held(&self) -> bool { self.held.load(Ordering::SeqCst) }
}
