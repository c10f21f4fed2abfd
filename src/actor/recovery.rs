//! Puts project windows that drifted to other workspaces back where they
//! belong.
//!
//! Best effort: one enumeration, then sequential moves. A failed move is
//! recorded and the batch carries on.

use tracing::{debug, info, instrument, warn};

use super::ownership::ProjectClassifier;
use crate::common::collections::BTreeSet;
use crate::common::config::Config;
use crate::layout_engine::compute_layout;
use crate::model::{ProjectDescriptor, WindowId, WindowRecord, WindowToken, WorkspaceName};
use crate::sys::positioner::WindowPositioner;
use crate::sys::window_service::{TransportError, WindowService};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecoveryError {
    #[error("could not list windows: {0}")]
    EnumerationFailed(TransportError),
    #[error("could not move window {window_id} to {target}: {source}")]
    MoveFailed {
        window_id: WindowId,
        target: WorkspaceName,
        source: TransportError,
    },
    #[error("could not re-apply layout in {workspace}: {reason}")]
    LayoutFailed { workspace: WorkspaceName, reason: String },
}

impl RecoveryError {
    pub fn user_message(&self) -> String {
        match self {
            RecoveryError::EnumerationFailed(_) => "Could not list windows.".to_string(),
            RecoveryError::MoveFailed { target, .. } => {
                format!("Could not move a window to {target}.")
            }
            RecoveryError::LayoutFailed { workspace, .. } => {
                format!("Could not arrange {workspace}.")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    pub windows_processed: usize,
    pub windows_recovered: usize,
    pub errors: Vec<RecoveryError>,
}

impl RecoveryResult {
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Recovered {} of {} windows.",
            self.windows_recovered, self.windows_processed
        );
        if !self.errors.is_empty() {
            out.push_str(&format!(" {} failed.", self.errors.len()));
        }
        out
    }
}

pub struct RecoveryManager<'a, S, P> {
    service: &'a S,
    positioner: &'a P,
    config: &'a Config,
    reapply_layout: bool,
}

impl<'a, S: WindowService, P: WindowPositioner> RecoveryManager<'a, S, P> {
    pub fn new(service: &'a S, positioner: &'a P, config: &'a Config) -> Self {
        Self {
            service,
            positioner,
            config,
            reapply_layout: false,
        }
    }

    /// Re-apply the project layout in every workspace that received windows.
    pub fn with_layout(mut self, reapply_layout: bool) -> Self {
        self.reapply_layout = reapply_layout;
        self
    }

    /// Every window on every workspace. `progress(processed, total)` fires
    /// after each window.
    #[instrument(skip_all)]
    pub async fn recover_all(
        &self,
        progress: impl FnMut(usize, usize) + Send,
    ) -> Result<RecoveryResult, RecoveryError> {
        let windows =
            self.service.list_windows_all().await.map_err(RecoveryError::EnumerationFailed)?;
        Ok(self.reconcile(windows, progress).await)
    }

    /// Windows sitting in `workspace` plus the windows of its own project that
    /// are elsewhere.
    #[instrument(skip_all, fields(workspace = %workspace))]
    pub async fn recover_workspace(
        &self,
        workspace: &WorkspaceName,
    ) -> Result<RecoveryResult, RecoveryError> {
        let own = self.config.project_for_workspace(workspace).map(|p| p.id.as_str());
        let classifier = ProjectClassifier::new(self.config);
        let windows: Vec<WindowRecord> = self
            .service
            .list_windows_all()
            .await
            .map_err(RecoveryError::EnumerationFailed)?
            .into_iter()
            .filter(|w| {
                w.is_in(workspace)
                    || own.is_some_and(|id| classifier.is_owned_by(w, id))
            })
            .collect();
        Ok(self.reconcile(windows, |_, _| {}).await)
    }

    async fn reconcile(
        &self,
        windows: Vec<WindowRecord>,
        mut progress: impl FnMut(usize, usize) + Send,
    ) -> RecoveryResult {
        let classifier = ProjectClassifier::new(self.config);
        let total = windows.len();
        let mut result = RecoveryResult::default();
        let mut touched = BTreeSet::new();

        for window in &windows {
            let owner = classifier.owner(window).and_then(|id| self.config.project(id));
            if let Some(project) = owner {
                let target = self.config.workspace_for(project);
                if !window.is_in(&target) {
                    debug!(
                        window_id = %window.window_id,
                        from = %window.workspace,
                        to = %target,
                        "moving window home"
                    );
                    match self.service.move_window(window.window_id, &target).await {
                        Ok(()) => {
                            result.windows_recovered += 1;
                            touched.insert(project.id.as_str());
                        }
                        Err(source) => {
                            warn!(window_id = %window.window_id, %source, "could not move window");
                            result.errors.push(RecoveryError::MoveFailed {
                                window_id: window.window_id,
                                target,
                                source,
                            });
                        }
                    }
                }
            }
            result.windows_processed += 1;
            progress(result.windows_processed, total);
        }

        if self.reapply_layout {
            for project_id in touched {
                if let Some(project) = self.config.project(project_id) {
                    if let Err(err) = self.apply_layout(project).await {
                        warn!(%err, "layout not re-applied");
                        result.errors.push(err);
                    }
                }
            }
        }

        info!(
            processed = result.windows_processed,
            recovered = result.windows_recovered,
            failed = result.errors.len(),
            "recovery finished"
        );
        result
    }

    async fn apply_layout(&self, project: &ProjectDescriptor) -> Result<(), RecoveryError> {
        let workspace = self.config.workspace_for(project);
        let failed = |reason: String| RecoveryError::LayoutFailed {
            workspace: workspace.clone(),
            reason,
        };
        let visible = self
            .positioner
            .visible_frame()
            .await
            .ok_or_else(|| failed("screen metrics are unavailable".to_string()))?;
        let layout = compute_layout(visible, &self.config.settings.layout)
            .ok_or_else(|| failed(format!("visible frame {visible:?} is too small")))?;

        let token = WindowToken::for_project(&project.id);
        let settings = &self.config.settings;
        let placements = [
            (&settings.editor.bundle_id, layout.editor),
            (&settings.browser.bundle_id, layout.browser),
        ];
        for (bundle_id, frame) in placements {
            let handle = self
                .positioner
                .find_window(bundle_id, token.as_str())
                .await
                .map_err(|e| failed(e.to_string()))?;
            match handle {
                Some(handle) => self
                    .positioner
                    .set_frame(handle, frame)
                    .await
                    .map_err(|e| failed(e.to_string()))?,
                None => debug!(bundle_id, "no tagged window to place"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::actor::testing::*;

    fn ws(name: &str) -> WorkspaceName { WorkspaceName::new(name) }

    fn moves(service: &FakeWindowService) -> Vec<(WindowId, WorkspaceName)> {
        service
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Move(id, ws) => Some((id, ws)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn moves_exactly_the_misplaced_windows() {
        let service = FakeWindowService::with_windows(vec![
            window(1, EDITOR, "ap-demo", "AP:demo"),
            window(2, BROWSER, "1", "AP:demo - Docs"),
            window(3, EDITOR, "2", "lib.rs - Other Thing"),
            window(4, TERMINAL, "ap-demo", "AP:other"),
            window(5, TERMINAL, "1", "Demo"),
            window(6, BROWSER, "ap-other", "Demo and Other Thing"),
        ]);
        let positioner = FakePositioner::standard();
        let config = test_config();
        let mut seen = Vec::new();

        let result = RecoveryManager::new(&*service, &*positioner, &config)
            .recover_all(|done, total| seen.push((done, total)))
            .await
            .unwrap();

        assert_eq!(
            result,
            RecoveryResult { windows_processed: 6, windows_recovered: 3, errors: vec![] }
        );
        assert_eq!(
            moves(&service),
            vec![
                (WindowId::new(2), ws("ap-demo")),
                (WindowId::new(3), ws("ap-other")),
                (WindowId::new(4), ws("ap-other")),
            ]
        );
        assert_eq!(seen, (1..=6).map(|i| (i, 6)).collect::<Vec<_>>());
        assert!(positioner.frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_move_does_not_stop_the_batch() {
        let service = FakeWindowService::with_windows(vec![
            window(1, BROWSER, "1", "AP:demo"),
            window(2, BROWSER, "1", "AP:other"),
        ]);
        let err = TransportError::NonZeroExit {
            command: "aerospace move-node-to-workspace".into(),
            status: 1,
            stderr: "nope".into(),
        };
        service.update(|s| {
            s.move_errors.insert(WindowId::new(1), err.clone());
        });
        let positioner = FakePositioner::standard();
        let config = test_config();

        let result = RecoveryManager::new(&*service, &*positioner, &config)
            .recover_all(|_, _| {})
            .await
            .unwrap();

        assert_eq!(result.windows_processed, 2);
        assert_eq!(result.windows_recovered, 1);
        assert_eq!(
            result.errors,
            vec![RecoveryError::MoveFailed {
                window_id: WindowId::new(1),
                target: ws("ap-demo"),
                source: err,
            }]
        );
        assert_eq!(service.workspace_of(2), Some(ws("ap-other")));
        assert_eq!(result.summary(), "Recovered 1 of 2 windows. 1 failed.");
    }

    #[tokio::test(start_paused = true)]
    async fn enumeration_failure_is_fatal() {
        let service = FakeWindowService::new();
        let err = TransportError::NotReady { reason: "not running".into() };
        service.update(|s| s.list_all_error = Some(err.clone()));
        let positioner = FakePositioner::standard();
        let config = test_config();

        let result =
            RecoveryManager::new(&*service, &*positioner, &config).recover_all(|_, _| {}).await;

        assert_eq!(result, Err(RecoveryError::EnumerationFailed(err)));
    }

    #[tokio::test(start_paused = true)]
    async fn single_workspace() {
        let service = FakeWindowService::with_windows(vec![
            window(1, BROWSER, "1", "AP:demo"),
            window(2, BROWSER, "ap-demo", "AP:other"),
            window(3, BROWSER, "1", "AP:other"),
        ]);
        let positioner = FakePositioner::standard();
        let config = test_config();

        let result = RecoveryManager::new(&*service, &*positioner, &config)
            .recover_workspace(&ws("ap-demo"))
            .await
            .unwrap();

        assert_eq!(result.windows_processed, 2);
        assert_eq!(result.windows_recovered, 2);
        assert_eq!(service.workspace_of(1), Some(ws("ap-demo")));
        assert_eq!(service.workspace_of(2), Some(ws("ap-other")));
        assert_eq!(service.workspace_of(3), Some(ws("1")));
    }

    #[tokio::test(start_paused = true)]
    async fn reapplies_layout_where_windows_arrived() {
        let service = FakeWindowService::with_windows(vec![
            window(1, EDITOR, "1", "AP:demo"),
            window(2, BROWSER, "ap-demo", "AP:demo"),
        ]);
        let positioner = FakePositioner::standard();
        let config = test_config();

        let result = RecoveryManager::new(&*service, &*positioner, &config)
            .with_layout(true)
            .recover_all(|_, _| {})
            .await
            .unwrap();

        assert!(result.errors.is_empty());
        assert_eq!(positioner.frames().len(), 2);

        positioner.update(|s| s.visible_frame = None);
        service.update(|s| s.windows[0].workspace = ws("1"));
        let result = RecoveryManager::new(&*service, &*positioner, &config)
            .with_layout(true)
            .recover_all(|_, _| {})
            .await
            .unwrap();
        assert_eq!(result.windows_recovered, 1);
        assert!(matches!(result.errors.as_slice(), [RecoveryError::LayoutFailed { .. }]));
    }
}
