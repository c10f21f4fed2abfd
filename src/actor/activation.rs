//! Drives one project switch end to end: workspace, required windows,
//! layout, focus.
//!
//! Stages run strictly in [`ActivationProgress`] order. Cancellation is
//! checked around every blocking call and stops the saga where it is; nothing
//! already done is undone.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::launcher::{
    LaunchError, LaunchOptions, LaunchOutcome, LaunchSpec, LaunchTiming, Launcher, TitleClaim,
};
use super::ownership::ProjectClassifier;
use crate::common::config::{AppSpec, Config};
use crate::layout_engine::compute_layout;
use crate::model::{ProjectDescriptor, WindowId, WindowToken, WorkspaceName};
use crate::sys::geometry::Rect;
use crate::sys::launch::AppLauncher;
use crate::sys::positioner::{PositionerError, WindowHandle, WindowPositioner};
use crate::sys::window_service::{TransportError, WindowService};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::EnumIter,
)]
pub enum ActivationProgress {
    SwitchingWorkspace,
    ConfirmingWorkspace,
    ResolvingWindows,
    MovingWindows,
    ApplyingLayout,
    ResizingEditor,
    FocusingEditor,
    Finishing,
}

impl ActivationProgress {
    pub fn label(self) -> &'static str {
        match self {
            ActivationProgress::SwitchingWorkspace => "Switching workspace",
            ActivationProgress::ConfirmingWorkspace => "Confirming workspace",
            ActivationProgress::ResolvingWindows => "Opening windows",
            ActivationProgress::MovingWindows => "Moving windows",
            ActivationProgress::ApplyingLayout => "Applying layout",
            ActivationProgress::ResizingEditor => "Resizing editor",
            ActivationProgress::FocusingEditor => "Focusing editor",
            ActivationProgress::Finishing => "Finishing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationOptions {
    pub apply_layout: bool,
    /// Tag newly created windows with this attempt number.
    pub attempt: Option<u64>,
}

impl Default for ActivationOptions {
    fn default() -> Self { Self { apply_layout: true, attempt: None } }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub workspace_name: WorkspaceName,
    pub editor_window_id: WindowId,
    pub browser_window_id: WindowId,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActivationError {
    #[error("unknown project {0:?}")]
    UnknownProject(String),
    #[error("workspace {expected} did not become focused (focused: {observed})")]
    WorkspaceNotFocused { expected: WorkspaceName, observed: String },
    #[error("required {app} window is missing: {source}")]
    RequiredWindowMissing { app: String, source: LaunchError },
    #[error("ambiguous {app} windows: {source}")]
    AmbiguousWindows { app: String, source: LaunchError },
    #[error("could not move window {window_id} to {workspace}: {source}")]
    MoveFailed {
        window_id: WindowId,
        workspace: WorkspaceName,
        source: TransportError,
    },
    #[error("could not apply layout: {0}")]
    LayoutFailed(String),
    #[error("could not resize the editor: {0}")]
    ResizeFailed(String),
    #[error("screen metrics are unavailable")]
    ScreenMetricsUnavailable,
    #[error("{stage} failed: {source}")]
    CommandFailed {
        stage: ActivationProgress,
        source: TransportError,
    },
    #[error("could not load state: {0}")]
    StateLoadFailed(String),
    #[error("could not save state: {0}")]
    StateSaveFailed(String),
    #[error("activation cancelled")]
    Cancelled,
}

impl ActivationError {
    /// One line suitable for a notification.
    pub fn user_message(&self) -> String {
        match self {
            ActivationError::UnknownProject(id) => format!("No project named \"{id}\"."),
            ActivationError::WorkspaceNotFocused { expected, .. } => {
                format!("Could not switch to workspace {expected}.")
            }
            ActivationError::RequiredWindowMissing { app, .. } => {
                format!("Could not open a window for {app}.")
            }
            ActivationError::AmbiguousWindows { app, .. } => {
                format!("Several {app} windows belong to this project; close the extras.")
            }
            ActivationError::MoveFailed { workspace, .. } => {
                format!("Could not move a window to {workspace}.")
            }
            ActivationError::LayoutFailed(_) => "Could not arrange the windows.".to_string(),
            ActivationError::ResizeFailed(_) => "Could not resize the editor.".to_string(),
            ActivationError::ScreenMetricsUnavailable => {
                "Could not read the screen size; is accessibility access granted?".to_string()
            }
            ActivationError::CommandFailed { source, .. } => match source {
                TransportError::NotReady { .. } => "AeroSpace is not running.".to_string(),
                TransportError::TimedOut { .. } => "AeroSpace did not respond.".to_string(),
                _ => "A window manager command failed.".to_string(),
            },
            ActivationError::StateLoadFailed(_) => "Could not load saved state.".to_string(),
            ActivationError::StateSaveFailed(_) => "Could not save state.".to_string(),
            ActivationError::Cancelled => "Cancelled.".to_string(),
        }
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), ActivationError> {
    if cancel.is_cancelled() {
        debug!("cancelled");
        return Err(ActivationError::Cancelled);
    }
    Ok(())
}

async fn pause(cancel: &CancellationToken, duration: Duration) -> Result<(), ActivationError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ActivationError::Cancelled),
        _ = sleep(duration) => Ok(()),
    }
}

fn command_failed(stage: ActivationProgress) -> impl FnOnce(TransportError) -> ActivationError {
    move |source| ActivationError::CommandFailed { stage, source }
}

/// Where the required windows go and how they are recognized.
struct Target<'t> {
    workspace: &'t WorkspaceName,
    token: &'t WindowToken,
    project: &'t ProjectDescriptor,
    classifier: &'t Arc<ProjectClassifier>,
}

pub struct ActivationEngine<'a, S, A, P> {
    service: &'a S,
    apps: &'a A,
    positioner: &'a P,
    config: &'a Config,
}

impl<'a, S, A, P> ActivationEngine<'a, S, A, P>
where
    S: WindowService,
    A: AppLauncher,
    P: WindowPositioner,
{
    pub fn new(service: &'a S, apps: &'a A, positioner: &'a P, config: &'a Config) -> Self {
        Self { service, apps, positioner, config }
    }

    #[instrument(skip_all, fields(project = %project_id))]
    pub async fn activate(
        &self,
        project_id: &str,
        options: &ActivationOptions,
        mut progress: impl FnMut(ActivationProgress) + Send,
        cancel: &CancellationToken,
    ) -> Result<ActivationReport, ActivationError> {
        let project = self
            .config
            .project(project_id)
            .ok_or_else(|| ActivationError::UnknownProject(project_id.to_string()))?;
        let workspace = self.config.workspace_for(project);
        let token = match options.attempt {
            Some(attempt) => WindowToken::for_attempt(&project.id, attempt),
            None => WindowToken::for_project(&project.id),
        };
        let settings = &self.config.settings;
        let classifier = Arc::new(ProjectClassifier::new(self.config));
        let mut warnings = Vec::new();

        checkpoint(cancel)?;
        progress(ActivationProgress::SwitchingWorkspace);
        self.switch(&workspace).await?;
        checkpoint(cancel)?;

        progress(ActivationProgress::ConfirmingWorkspace);
        self.confirm(&workspace, cancel).await?;
        checkpoint(cancel)?;

        progress(ActivationProgress::ResolvingWindows);
        let target = Target {
            workspace: &workspace,
            token: &token,
            project,
            classifier: &classifier,
        };
        let editor =
            self.resolve(&target, &settings.editor, LaunchOptions::default(), cancel).await?;
        checkpoint(cancel)?;
        let browser_options = LaunchOptions {
            refocus_target: Some(editor.window_id()),
            ..LaunchOptions::default()
        };
        let browser = self.resolve(&target, &settings.browser, browser_options, cancel).await?;
        checkpoint(cancel)?;
        warnings.extend(editor.warning(&settings.editor.bundle_id));
        warnings.extend(browser.warning(&settings.browser.bundle_id));

        progress(ActivationProgress::MovingWindows);
        for outcome in [&editor, &browser] {
            if let LaunchOutcome::Existing { window_id, workspace: found, .. } = outcome {
                if found != &workspace {
                    debug!(%window_id, from = %found, "bringing window back");
                    self.service.move_window(*window_id, &workspace).await.map_err(|source| {
                        ActivationError::MoveFailed {
                            window_id: *window_id,
                            workspace: workspace.clone(),
                            source,
                        }
                    })?;
                    checkpoint(cancel)?;
                }
            }
        }

        if options.apply_layout {
            progress(ActivationProgress::ApplyingLayout);
            let visible = self
                .positioner
                .visible_frame()
                .await
                .ok_or(ActivationError::ScreenMetricsUnavailable)?;
            let layout = compute_layout(visible, &settings.layout).ok_or_else(|| {
                ActivationError::LayoutFailed(format!("visible frame {visible:?} is too small"))
            })?;
            let family = token.family();
            self.place(&settings.browser.bundle_id, &[family.as_str()], layout.browser)
                .await
                .map_err(ActivationError::LayoutFailed)?;
            checkpoint(cancel)?;

            progress(ActivationProgress::ResizingEditor);
            let needles = [family.as_str(), project.name.as_str()];
            if let Err(reason) =
                self.place(&settings.editor.bundle_id, &needles, layout.editor).await
            {
                let err = ActivationError::ResizeFailed(reason);
                warn!(%err, "continuing without resizing the editor");
                warnings.push(err.to_string());
            }
            checkpoint(cancel)?;
        }

        progress(ActivationProgress::FocusingEditor);
        if let Err(err) = self.service.focus_window(editor.window_id()).await {
            warn!(%err, "could not focus the editor");
            warnings.push(format!("could not focus the editor: {err}"));
        }
        checkpoint(cancel)?;

        progress(ActivationProgress::Finishing);
        info!(
            editor = %editor.window_id(),
            browser = %browser.window_id(),
            warnings = warnings.len(),
            "activated"
        );
        Ok(ActivationReport {
            workspace_name: workspace,
            editor_window_id: editor.window_id(),
            browser_window_id: browser.window_id(),
            warnings,
        })
    }

    async fn switch(&self, workspace: &WorkspaceName) -> Result<(), ActivationError> {
        let stage = ActivationProgress::SwitchingWorkspace;
        let exists =
            self.service.workspace_exists(workspace).await.map_err(command_failed(stage))?;
        if !exists {
            debug!(%workspace, "creating workspace");
            self.service.create_workspace(workspace).await.map_err(command_failed(stage))?;
        }
        self.service.switch_workspace(workspace).await.map_err(command_failed(stage))
    }

    /// Switches are applied asynchronously, so poll until the focused
    /// workspace catches up.
    async fn confirm(
        &self,
        workspace: &WorkspaceName,
        cancel: &CancellationToken,
    ) -> Result<(), ActivationError> {
        let timing = &self.config.settings.timing;
        let deadline = Instant::now() + timing.confirm_timeout;
        let mut observed = None;
        loop {
            match self.service.focused_workspace().await {
                Ok(focused) if &focused == workspace => return Ok(()),
                Ok(focused) => observed = Some(focused),
                Err(err) if err.is_retryable() => debug!(%err, "focused workspace unavailable"),
                Err(source) => {
                    return Err(ActivationError::CommandFailed {
                        stage: ActivationProgress::ConfirmingWorkspace,
                        source,
                    });
                }
            }
            checkpoint(cancel)?;
            if Instant::now() >= deadline {
                return Err(ActivationError::WorkspaceNotFocused {
                    expected: workspace.clone(),
                    observed: observed.map_or_else(|| "unknown".to_string(), |ws| ws.to_string()),
                });
            }
            pause(cancel, timing.poll_interval).await?;
        }
    }

    /// Applications whose launch arguments cannot carry the token are also
    /// matched by project name.
    async fn resolve(
        &self,
        target: &Target<'_>,
        app: &AppSpec,
        options: LaunchOptions,
        cancel: &CancellationToken,
    ) -> Result<LaunchOutcome, ActivationError> {
        let timing = LaunchTiming::from_settings(&self.config.settings.timing);
        let launcher = Launcher::new(self.service, self.apps, timing);
        let claim = (!app.embeds_token()).then(|| TitleClaim {
            project_id: target.project.id.clone(),
            classifier: target.classifier.clone(),
        });
        let spec = LaunchSpec {
            bundle_id: app.bundle_id.clone(),
            args: app.render_args(target.token, target.project),
            claim,
        };
        let launched =
            launcher.ensure_window(target.workspace, target.token, &spec, options, cancel).await;
        launched.map_err(|err| {
            let app = app.bundle_id.clone();
            match err {
                LaunchError::Cancelled => ActivationError::Cancelled,
                LaunchError::AppNotFound(_) | LaunchError::WindowNotDetected(_) => {
                    ActivationError::RequiredWindowMissing { app, source: err }
                }
                LaunchError::AlreadyExists { .. } | LaunchError::Ambiguous { .. } => {
                    ActivationError::AmbiguousWindows { app, source: err }
                }
                LaunchError::Transport(source) => ActivationError::CommandFailed {
                    stage: ActivationProgress::ResolvingWindows,
                    source,
                },
            }
        })
    }

    /// Finds the window by the first needle that matches and sets its frame.
    async fn place(&self, bundle_id: &str, needles: &[&str], frame: Rect) -> Result<(), String> {
        let mut handle = None;
        for needle in needles {
            handle = self.locate(bundle_id, needle).await.map_err(|e| e.to_string())?;
            if handle.is_some() {
                break;
            }
        }
        let handle = handle.ok_or_else(|| format!("no accessible {bundle_id} window"))?;
        self.positioner.set_frame(handle, frame).await.map_err(|e| e.to_string())
    }

    /// Handles are list positions, so one taken while windows are still
    /// opening can point at a neighbour. Look again once if the title at the
    /// handle no longer shows `needle`.
    async fn locate(
        &self,
        bundle_id: &str,
        needle: &str,
    ) -> Result<Option<WindowHandle>, PositionerError> {
        let Some(handle) = self.positioner.find_window(bundle_id, needle).await? else {
            return Ok(None);
        };
        match self.positioner.read_title(handle).await {
            Some(title) if !title.contains(needle) => {
                debug!(?handle, %title, needle, "stale accessibility handle");
                self.positioner.find_window(bundle_id, needle).await
            }
            _ => Ok(Some(handle)),
        }
    }
}
