//! Finds or creates exactly one tagged window of an application.
//!
//! A window is ours when its title carries the project's [`WindowToken`].
//! Existing tagged windows are reused; otherwise the application is asked for
//! a new window and we wait for it to show up, first by scanning the target
//! workspace for new ids, then by watching the focused window.
//!
//! Every wait races the caller's cancellation token. A cancelled launch stops
//! issuing commands at once and reports [`LaunchError::Cancelled`].

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::ownership::ProjectClassifier;
use crate::common::collections::HashSet;
use crate::common::config::TimingSettings;
use crate::model::{WindowId, WindowRecord, WindowToken, WorkspaceName};
use crate::sys::launch::{AppLauncher, LaunchRequest};
use crate::sys::window_service::{TransportError, WindowService};

#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub bundle_id: String,
    pub args: Vec<String>,
    /// Set for applications that cannot show the token in their titles.
    pub claim: Option<TitleClaim>,
}

/// Recognizes a project's windows by title when they carry no token.
#[derive(Debug, Clone)]
pub struct TitleClaim {
    pub project_id: String,
    pub classifier: Arc<ProjectClassifier>,
}

impl TitleClaim {
    fn claims(&self, window: &WindowRecord) -> bool {
        self.classifier.is_owned_by(window, &self.project_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Reuse an existing tagged window instead of failing.
    pub allow_reuse: bool,
    /// Accept several candidates (keeping the lowest id) instead of failing.
    pub allow_ambiguous: bool,
    /// Window to focus again once a new window has settled.
    pub refocus_target: Option<WindowId>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            allow_reuse: true,
            allow_ambiguous: true,
            refocus_target: None,
        }
    }
}

/// Which detection stage found a newly launched window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DetectionTier {
    WorkspaceScan,
    FocusedWindow,
    FocusedWindowRetry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// A tagged window already existed. `workspace` is where it was found,
    /// which may not be the requested one.
    Existing {
        window_id: WindowId,
        workspace: WorkspaceName,
        discarded: Vec<WindowId>,
    },
    /// A new window was launched and is now in the requested workspace.
    Created {
        window_id: WindowId,
        tier: DetectionTier,
        discarded: Vec<WindowId>,
    },
}

impl LaunchOutcome {
    pub fn window_id(&self) -> WindowId {
        match self {
            LaunchOutcome::Existing { window_id, .. } | LaunchOutcome::Created { window_id, .. } => {
                *window_id
            }
        }
    }

    pub fn discarded(&self) -> &[WindowId] {
        match self {
            LaunchOutcome::Existing { discarded, .. } | LaunchOutcome::Created { discarded, .. } => {
                discarded
            }
        }
    }

    pub fn is_created(&self) -> bool { matches!(self, LaunchOutcome::Created { .. }) }

    /// Non-fatal note for the user when several candidates matched.
    pub fn warning(&self, app: &str) -> Option<String> {
        let discarded = self.discarded();
        if discarded.is_empty() {
            return None;
        }
        let ignored: Vec<String> = discarded.iter().map(ToString::to_string).collect();
        Some(format!(
            "{app}: several matching windows; using {} and ignoring {}",
            self.window_id(),
            ignored.join(", ")
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LaunchError {
    #[error("application {0} is not installed")]
    AppNotFound(String),
    #[error("window {window_id} already carries {token}")]
    AlreadyExists { token: WindowToken, window_id: WindowId },
    #[error("several windows carry {token}: {window_ids:?}")]
    Ambiguous { token: WindowToken, window_ids: Vec<WindowId> },
    #[error("no window carrying {0} appeared after launch")]
    WindowNotDetected(WindowToken),
    #[error("launch cancelled")]
    Cancelled,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Time budgets for launching and detecting one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchTiming {
    pub total: Duration,
    pub poll_interval: Duration,
    pub secondary: Duration,
    pub settle: Duration,
}

impl LaunchTiming {
    pub fn from_settings(timing: &TimingSettings) -> Self {
        Self {
            total: timing.launch_timeout,
            poll_interval: timing.poll_interval,
            secondary: timing.secondary_budget,
            settle: timing.settle_delay,
        }
    }

    fn workspace_budget(&self) -> Duration { self.total / 2 }

    fn focused_budget(&self) -> Duration {
        self.total.saturating_sub(self.workspace_budget()).saturating_sub(self.secondary)
    }
}

impl Default for LaunchTiming {
    fn default() -> Self { Self::from_settings(&TimingSettings::default()) }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), LaunchError> {
    if cancel.is_cancelled() {
        return Err(LaunchError::Cancelled);
    }
    Ok(())
}

async fn pause(cancel: &CancellationToken, duration: Duration) -> Result<(), LaunchError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(LaunchError::Cancelled),
        _ = sleep(duration) => Ok(()),
    }
}

/// Deadline-bounded polling. The first attempt always happens.
struct PollBudget {
    deadline: Instant,
    interval: Duration,
}

impl PollBudget {
    fn until(deadline: Instant, interval: Duration) -> Self { Self { deadline, interval } }

    /// Sleeps until the next attempt. `Ok(false)` once the deadline has
    /// passed.
    async fn next_attempt(&self, cancel: &CancellationToken) -> Result<bool, LaunchError> {
        let now = Instant::now();
        if now >= self.deadline {
            return Ok(false);
        }
        pause(cancel, self.interval.min(self.deadline - now)).await?;
        Ok(true)
    }
}

pub struct Launcher<'a, S, A> {
    service: &'a S,
    apps: &'a A,
    timing: LaunchTiming,
}

impl<'a, S: WindowService, A: AppLauncher> Launcher<'a, S, A> {
    pub fn new(service: &'a S, apps: &'a A, timing: LaunchTiming) -> Self {
        Self { service, apps, timing }
    }

    /// Returns the one window of `spec.bundle_id` tagged for this project.
    ///
    /// Existing windows match on the project-wide token, or on `spec.claim`
    /// when no window carries it; a freshly launched window must carry
    /// `token` exactly.
    #[instrument(skip_all, fields(workspace = %workspace, token = %token, app = %spec.bundle_id))]
    pub async fn ensure_window(
        &self,
        workspace: &WorkspaceName,
        token: &WindowToken,
        spec: &LaunchSpec,
        options: LaunchOptions,
        cancel: &CancellationToken,
    ) -> Result<LaunchOutcome, LaunchError> {
        let family = token.family();
        let claim = spec.claim.as_ref();
        checkpoint(cancel)?;
        let scoped = self.service.list_windows(Some(workspace), Some(&spec.bundle_id)).await?;
        if let Some(outcome) = reuse(&family, claim, &scoped, options)? {
            debug!(window_id = %outcome.window_id(), "reusing tagged window");
            return Ok(outcome);
        }

        // A tagged window that wandered off is still ours; the caller moves it back.
        let elsewhere: Vec<WindowRecord> = self
            .service
            .list_windows(None, Some(&spec.bundle_id))
            .await?
            .into_iter()
            .filter(|w| !w.is_in(workspace))
            .collect();
        if let Some(outcome) = reuse(&family, claim, &elsewhere, options)? {
            debug!(window_id = %outcome.window_id(), "reusing tagged window from another workspace");
            return Ok(outcome);
        }

        let app_path = self
            .apps
            .resolve(&spec.bundle_id)
            .await
            .ok_or_else(|| LaunchError::AppNotFound(spec.bundle_id.clone()))?;
        let known: HashSet<WindowId> =
            scoped.iter().chain(elsewhere.iter()).map(|w| w.window_id).collect();
        checkpoint(cancel)?;
        self.apps
            .open(&LaunchRequest {
                bundle_id: spec.bundle_id.clone(),
                app_path,
                args: spec.args.clone(),
            })
            .await?;
        info!("requested a new window");

        let Some((record, tier, discarded)) =
            self.detect(workspace, token, spec, &known, options, cancel).await?
        else {
            warn!("launched window never showed up");
            return Err(LaunchError::WindowNotDetected(token.clone()));
        };
        info!(window_id = %record.window_id, %tier, "detected new window");

        checkpoint(cancel)?;
        if !record.is_in(workspace) {
            debug!(window_id = %record.window_id, from = %record.workspace, "new window opened elsewhere");
            self.service.move_window(record.window_id, workspace).await?;
        }
        if let Some(target) = options.refocus_target {
            self.refocus(target, cancel).await?;
        }
        Ok(LaunchOutcome::Created {
            window_id: record.window_id,
            tier,
            discarded,
        })
    }

    /// All tier deadlines hang off one start instant so slow listings eat
    /// into the overall budget instead of extending it.
    async fn detect(
        &self,
        workspace: &WorkspaceName,
        token: &WindowToken,
        spec: &LaunchSpec,
        known: &HashSet<WindowId>,
        options: LaunchOptions,
        cancel: &CancellationToken,
    ) -> Result<Option<(WindowRecord, DetectionTier, Vec<WindowId>)>, LaunchError> {
        let start = Instant::now();
        let interval = self.timing.poll_interval;
        let scan_end = start + self.timing.workspace_budget();
        let focused_end = scan_end + self.timing.focused_budget();
        let end = start + self.timing.total;

        let budget = PollBudget::until(scan_end, interval);
        loop {
            match self.service.list_windows(Some(workspace), Some(&spec.bundle_id)).await {
                Ok(windows) => {
                    if let Some((record, discarded)) = pick_new(windows, known, token) {
                        if !discarded.is_empty() {
                            if !options.allow_ambiguous {
                                let mut window_ids = vec![record.window_id];
                                window_ids.extend(discarded);
                                return Err(LaunchError::Ambiguous {
                                    token: token.clone(),
                                    window_ids,
                                });
                            }
                            warn!(kept = %record.window_id, ?discarded, "several new windows appeared");
                        }
                        return Ok(Some((record, DetectionTier::WorkspaceScan, discarded)));
                    }
                }
                Err(err) => absorb(DetectionTier::WorkspaceScan, err)?,
            }
            if !budget.next_attempt(cancel).await? {
                break;
            }
        }

        for (tier, deadline) in [
            (DetectionTier::FocusedWindow, focused_end),
            (DetectionTier::FocusedWindowRetry, end),
        ] {
            let budget = PollBudget::until(deadline, interval);
            let found = self.poll_focused(tier, &budget, token, spec, known, cancel).await?;
            if let Some(record) = found {
                return Ok(Some((record, tier, Vec::new())));
            }
        }
        Ok(None)
    }

    async fn poll_focused(
        &self,
        tier: DetectionTier,
        budget: &PollBudget,
        token: &WindowToken,
        spec: &LaunchSpec,
        known: &HashSet<WindowId>,
        cancel: &CancellationToken,
    ) -> Result<Option<WindowRecord>, LaunchError> {
        loop {
            checkpoint(cancel)?;
            match self.service.list_windows_focused().await {
                Ok(focused) => {
                    let found = focused.into_iter().find(|w| {
                        w.app_bundle_id == spec.bundle_id
                            && !known.contains(&w.window_id)
                            && (token.matches_record(w)
                                || spec.claim.as_ref().is_some_and(|c| c.claims(w)))
                    });
                    if found.is_some() {
                        return Ok(found);
                    }
                }
                Err(err) => absorb(tier, err)?,
            }
            if !budget.next_attempt(cancel).await? {
                return Ok(None);
            }
        }
    }

    async fn refocus(
        &self,
        target: WindowId,
        cancel: &CancellationToken,
    ) -> Result<(), LaunchError> {
        pause(cancel, self.timing.settle).await?;
        if let Err(err) = self.service.focus_window(target).await {
            warn!(%target, %err, "could not restore focus after launch");
        }
        Ok(())
    }
}

/// Tagged windows first; title claims only when nothing carries the token.
fn reuse(
    family: &WindowToken,
    claim: Option<&TitleClaim>,
    candidates: &[WindowRecord],
    options: LaunchOptions,
) -> Result<Option<LaunchOutcome>, LaunchError> {
    let mut matches: Vec<&WindowRecord> =
        candidates.iter().filter(|w| family.matches_record(w)).collect();
    if matches.is_empty() {
        if let Some(claim) = claim {
            matches = candidates.iter().filter(|w| claim.claims(w)).collect();
        }
    }
    matches.sort_by_key(|w| w.window_id);
    let Some(first) = matches.first() else {
        return Ok(None);
    };
    let window_ids: Vec<WindowId> = matches.iter().map(|w| w.window_id).collect();

    if !options.allow_reuse {
        return Err(match window_ids.as_slice() {
            [window_id] => LaunchError::AlreadyExists {
                token: family.clone(),
                window_id: *window_id,
            },
            _ => LaunchError::Ambiguous { token: family.clone(), window_ids },
        });
    }
    if window_ids.len() > 1 && !options.allow_ambiguous {
        return Err(LaunchError::Ambiguous { token: family.clone(), window_ids });
    }

    let discarded = window_ids[1..].to_vec();
    if !discarded.is_empty() {
        warn!(kept = %first.window_id, ?discarded, "several windows carry the token");
    }
    Ok(Some(LaunchOutcome::Existing {
        window_id: first.window_id,
        workspace: first.workspace.clone(),
        discarded,
    }))
}

/// Lowest new id, preferring windows that already show the token. Titles
/// often lag behind window creation, so an untagged new window still counts;
/// one showing another token never does.
fn pick_new(
    windows: Vec<WindowRecord>,
    known: &HashSet<WindowId>,
    token: &WindowToken,
) -> Option<(WindowRecord, Vec<WindowId>)> {
    let fresh: Vec<WindowRecord> = windows
        .into_iter()
        .filter(|w| !known.contains(&w.window_id))
        .filter(|w| !w.title.as_deref().is_some_and(|title| token.is_foreign(title)))
        .collect();
    let (tagged, untagged): (Vec<_>, Vec<_>) =
        fresh.into_iter().partition(|w| token.matches_record(w));
    let mut pool = if tagged.is_empty() { untagged } else { tagged };
    if pool.is_empty() {
        return None;
    }
    pool.sort_by_key(|w| w.window_id);
    let chosen = pool.remove(0);
    Some((chosen, pool.into_iter().map(|w| w.window_id).collect()))
}

fn absorb(tier: DetectionTier, err: TransportError) -> Result<(), LaunchError> {
    if err.is_retryable() {
        debug!(%tier, %err, "transient error while waiting for window");
        Ok(())
    } else {
        Err(err.into())
    }
}
