//! Session owner: the one place that knows which activation is current.
//!
//! Workers run as tokio tasks and report over the actor channel, every event
//! tagged with the [`RequestId`] it belongs to. Starting a new activation
//! cancels the previous one and makes its remaining events stale; stale
//! events are dropped in [`Controller::next_update`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use super::activation::{
    ActivationEngine, ActivationError, ActivationOptions, ActivationProgress, ActivationReport,
};
use super::cycle::WindowCycler;
use super::recovery::{RecoveryError, RecoveryManager, RecoveryResult};
use super::{Receiver, Sender, channel};
use crate::common::config::Config;
use crate::model::state::{FocusEntry, FocusHistory};
use crate::model::{WindowRecord, WorkspaceName};
use crate::sys::launch::AppLauncher;
use crate::sys::modifiers::ModifierState;
use crate::sys::positioner::WindowPositioner;
use crate::sys::window_service::WindowService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    ActivationProgress {
        request: RequestId,
        project_id: String,
        progress: ActivationProgress,
    },
    ActivationFinished {
        request: RequestId,
        project_id: String,
        result: Result<ActivationReport, ActivationError>,
    },
    RecoveryProgress {
        request: RequestId,
        processed: usize,
        total: usize,
    },
    RecoveryFinished {
        request: RequestId,
        result: Result<RecoveryResult, RecoveryError>,
    },
}

impl ControllerEvent {
    pub fn request(&self) -> RequestId {
        match self {
            ControllerEvent::ActivationProgress { request, .. }
            | ControllerEvent::ActivationFinished { request, .. }
            | ControllerEvent::RecoveryProgress { request, .. }
            | ControllerEvent::RecoveryFinished { request, .. } => *request,
        }
    }
}

struct InFlight {
    request: RequestId,
    project_id: String,
    cancel: CancellationToken,
}

fn focus_entry(record: &WindowRecord) -> FocusEntry {
    FocusEntry {
        app_bundle_id: record.app_bundle_id.clone(),
        workspace: record.workspace.clone(),
        title: record.title.clone(),
    }
}

pub struct Controller<S, A, P, M> {
    service: Arc<S>,
    apps: Arc<A>,
    positioner: Arc<P>,
    config: Arc<Config>,
    cycler: WindowCycler<S, M>,
    next_request: u64,
    activation: Option<InFlight>,
    recovery: Option<RequestId>,
    focus_snapshot: Option<WindowRecord>,
    history: FocusHistory,
    state_path: PathBuf,
    events_tx: Sender<ControllerEvent>,
    events_rx: Receiver<ControllerEvent>,
}

impl<S, A, P, M> Controller<S, A, P, M>
where
    S: WindowService + 'static,
    A: AppLauncher + 'static,
    P: WindowPositioner + 'static,
    M: ModifierState + 'static,
{
    pub fn new(
        service: Arc<S>,
        apps: Arc<A>,
        positioner: Arc<P>,
        modifiers: Arc<M>,
        config: Arc<Config>,
        state_path: PathBuf,
    ) -> Result<Self, ActivationError> {
        let history = FocusHistory::load(&state_path)
            .map_err(|err| ActivationError::StateLoadFailed(err.to_string()))?;
        let settings = &config.settings;
        let cycler = WindowCycler::new(
            service.clone(),
            modifiers,
            settings.cycle_excluded_bundle_ids.clone(),
            settings.timing.cycle_watchdog,
        );
        let (events_tx, events_rx) = channel();
        Ok(Self {
            service,
            apps,
            positioner,
            config,
            cycler,
            next_request: 0,
            activation: None,
            recovery: None,
            focus_snapshot: None,
            history,
            state_path,
            events_tx,
            events_rx,
        })
    }

    pub fn cycler(&self) -> &WindowCycler<S, M> { &self.cycler }

    pub fn history(&self) -> &FocusHistory { &self.history }

    pub fn current_activation(&self) -> Option<RequestId> {
        self.activation.as_ref().map(|a| a.request)
    }

    fn next_request_id(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId(self.next_request)
    }

    /// Starts activating `project_id` in the background, superseding any
    /// activation still in flight. New windows are tagged with the request
    /// number unless `options` names an attempt.
    pub async fn start_activation(
        &mut self,
        project_id: &str,
        mut options: ActivationOptions,
    ) -> RequestId {
        if let Some(previous) = self.activation.take() {
            debug!(
                request = %previous.request,
                project = %previous.project_id,
                "superseding activation"
            );
            previous.cancel.cancel();
        }
        let request = self.next_request_id();
        options.attempt.get_or_insert(request.0);

        match self.service.list_windows_focused().await {
            Ok(focused) => {
                if let Some(window) = focused.into_iter().next() {
                    self.focus_snapshot = Some(window);
                }
            }
            Err(err) => warn!(%err, "could not record focus before activation"),
        }

        let cancel = CancellationToken::new();
        self.activation = Some(InFlight {
            request,
            project_id: project_id.to_string(),
            cancel: cancel.clone(),
        });

        let service = self.service.clone();
        let apps = self.apps.clone();
        let positioner = self.positioner.clone();
        let config = self.config.clone();
        let events = self.events_tx.clone();
        let project_id = project_id.to_string();
        let span = info_span!("activation", %request, project = %project_id);
        tokio::spawn(
            async move {
                let engine = ActivationEngine::new(&*service, &*apps, &*positioner, &config);
                let progress_events = events.clone();
                let result = engine
                    .activate(
                        &project_id,
                        &options,
                        |progress| {
                            progress_events.send(ControllerEvent::ActivationProgress {
                                request,
                                project_id: project_id.clone(),
                                progress,
                            })
                        },
                        &cancel,
                    )
                    .await;
                events.send(ControllerEvent::ActivationFinished { request, project_id, result });
            }
            .instrument(span),
        );
        request
    }

    /// Cancels the in-flight activation and puts focus back where it was.
    /// Returns false when nothing was in flight.
    pub async fn cancel_activation(&mut self) -> bool {
        let Some(current) = self.activation.take() else {
            return false;
        };
        info!(request = %current.request, project = %current.project_id, "cancelling activation");
        current.cancel.cancel();
        if let Some(snapshot) = self.focus_snapshot.take() {
            if let Err(err) = self.service.focus_window(snapshot.window_id).await {
                warn!(window_id = %snapshot.window_id, %err, "could not restore focus");
            }
        }
        true
    }

    /// Next event that still matters. Events of superseded or cancelled
    /// requests are dropped.
    pub async fn next_update(&mut self) -> Option<ControllerEvent> {
        loop {
            let (span, event) = self.events_rx.recv().await?;
            if let Some(event) = span.in_scope(|| self.accept(event)) {
                return Some(event);
            }
        }
    }

    fn accept(&mut self, event: ControllerEvent) -> Option<ControllerEvent> {
        let current = match &event {
            ControllerEvent::ActivationProgress { .. }
            | ControllerEvent::ActivationFinished { .. } => self.activation.as_ref().map(|a| a.request),
            ControllerEvent::RecoveryProgress { .. } | ControllerEvent::RecoveryFinished { .. } => {
                self.recovery
            }
        };
        if current != Some(event.request()) {
            trace!(request = %event.request(), "dropping stale event");
            return None;
        }

        match event {
            ControllerEvent::ActivationFinished { request, project_id, mut result } => {
                self.activation = None;
                let snapshot = self.focus_snapshot.take();
                if let Ok(report) = &mut result {
                    if let Err(err) = self.remember(snapshot, report) {
                        warn!(%err, "activation succeeded but state was not saved");
                        report.warnings.push(err.user_message());
                    }
                }
                Some(ControllerEvent::ActivationFinished { request, project_id, result })
            }
            ControllerEvent::RecoveryFinished { .. } => {
                self.recovery = None;
                Some(event)
            }
            event => Some(event),
        }
    }

    fn remember(
        &mut self,
        snapshot: Option<WindowRecord>,
        report: &ActivationReport,
    ) -> Result<(), ActivationError> {
        if let Some(snapshot) = snapshot.filter(|s| !s.is_in(&report.workspace_name)) {
            self.history.record(focus_entry(&snapshot));
        }
        self.history.record(FocusEntry {
            app_bundle_id: self.config.settings.editor.bundle_id.clone(),
            workspace: report.workspace_name.clone(),
            title: None,
        });
        self.history
            .save(&self.state_path)
            .map_err(|err| ActivationError::StateSaveFailed(err.to_string()))
    }

    /// Waits for `request` to finish, forwarding its progress.
    pub async fn wait_activation(
        &mut self,
        request: RequestId,
        mut on_progress: impl FnMut(ActivationProgress),
    ) -> Result<ActivationReport, ActivationError> {
        if self.current_activation() != Some(request) {
            return Err(ActivationError::Cancelled);
        }
        while let Some(event) = self.next_update().await {
            match event {
                ControllerEvent::ActivationProgress { request: r, progress, .. } if r == request => {
                    on_progress(progress)
                }
                ControllerEvent::ActivationFinished { request: r, result, .. } if r == request => {
                    return result;
                }
                _ => {}
            }
            if self.current_activation() != Some(request) {
                break;
            }
        }
        Err(ActivationError::Cancelled)
    }

    /// Puts focus back outside the project, then closes its workspace.
    pub async fn close_project(&mut self, project_id: &str) -> Result<(), ActivationError> {
        let project = self
            .config
            .project(project_id)
            .ok_or_else(|| ActivationError::UnknownProject(project_id.to_string()))?;
        let workspace = self.config.workspace_for(project);
        if self.activation.as_ref().is_some_and(|a| a.project_id == project.id) {
            self.cancel_activation().await;
        }

        let prefix = &self.config.settings.workspace_prefix;
        let previous = self
            .history
            .entries()
            .find(|e| e.workspace.project_id(prefix).is_none())
            .or_else(|| self.history.most_recent_outside(&workspace))
            .cloned();
        if let Some(entry) = previous {
            self.restore_focus(&entry).await;
        }

        info!(%workspace, "closing project workspace");
        self.service.close_workspace(&workspace).await.map_err(|source| {
            ActivationError::CommandFailed { stage: ActivationProgress::Finishing, source }
        })
    }

    async fn restore_focus(&self, entry: &FocusEntry) {
        let windows = match self
            .service
            .list_windows(Some(&entry.workspace), Some(&entry.app_bundle_id))
            .await
        {
            Ok(windows) => windows,
            Err(err) => {
                warn!(%err, "could not look up previous focus");
                return;
            }
        };
        let target = windows
            .iter()
            .find(|w| entry.title.is_some() && w.title == entry.title)
            .or_else(|| windows.iter().min_by_key(|w| w.window_id));
        let result = match target {
            Some(window) => self.service.focus_window(window.window_id).await,
            None => self.service.switch_workspace(&entry.workspace).await,
        };
        if let Err(err) = result {
            warn!(workspace = %entry.workspace, %err, "could not restore previous focus");
        }
    }

    /// Runs recovery in the background; `workspace` narrows it to one
    /// workspace.
    pub fn start_recovery(
        &mut self,
        workspace: Option<WorkspaceName>,
        reapply_layout: bool,
    ) -> RequestId {
        let request = self.next_request_id();
        self.recovery = Some(request);

        let service = self.service.clone();
        let positioner = self.positioner.clone();
        let config = self.config.clone();
        let events = self.events_tx.clone();
        let span = info_span!("recovery", %request);
        tokio::spawn(
            async move {
                let manager =
                    RecoveryManager::new(&*service, &*positioner, &config).with_layout(reapply_layout);
                let result = match &workspace {
                    Some(workspace) => manager.recover_workspace(workspace).await,
                    None => {
                        let progress_events = events.clone();
                        manager
                            .recover_all(|processed, total| {
                                progress_events.send(ControllerEvent::RecoveryProgress {
                                    request,
                                    processed,
                                    total,
                                })
                            })
                            .await
                    }
                };
                events.send(ControllerEvent::RecoveryFinished { request, result });
            }
            .instrument(span),
        );
        request
    }
}
