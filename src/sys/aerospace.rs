//! [`WindowService`] over the `aerospace` command-line client.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use super::command;
use super::window_service::{TransportError, TransportResult, WindowService};
use crate::model::{WindowId, WindowRecord, WorkspaceName};

const DEFAULT_PROGRAM: &str = "aerospace";
const WINDOW_FORMAT: &str = "%{window-id} %{app-bundle-id} %{workspace} %{window-title}";

pub struct AerospaceCli {
    program: String,
    timeout: Duration,
}

impl AerospaceCli {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            timeout,
        }
    }

    pub fn with_program(program: impl Into<String>, timeout: Duration) -> Self {
        Self { program: program.into(), timeout }
    }

    async fn exec(&self, args: Vec<String>) -> TransportResult<String> {
        match command::run(&self.program, &args, self.timeout).await {
            Ok(output) => Ok(output.stdout),
            Err(TransportError::NonZeroExit { stderr, .. }) if server_unreachable(&stderr) => {
                Err(TransportError::NotReady { reason: stderr })
            }
            Err(err) => Err(err),
        }
    }

    async fn query_windows(
        &self,
        scope: Vec<String>,
        app_bundle_id: Option<&str>,
        default_workspace: Option<&WorkspaceName>,
    ) -> TransportResult<Vec<WindowRecord>> {
        let mut args = vec!["list-windows".to_string()];
        args.extend(scope);
        if let Some(app) = app_bundle_id {
            args.push("--app-bundle-id".to_string());
            args.push(app.to_string());
        }
        args.extend(["--json".to_string(), "--format".to_string(), WINDOW_FORMAT.to_string()]);
        let stdout = self.exec(args.clone()).await?;
        decode_windows(&command::describe(&self.program, &args), &stdout, default_workspace)
    }

    async fn workspace_names(&self, scope: &str) -> TransportResult<Vec<WorkspaceName>> {
        let stdout = self.exec(vec!["list-workspaces".to_string(), scope.to_string()]).await?;
        Ok(decode_workspace_names(&stdout))
    }
}

fn server_unreachable(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("can't connect") || lower.contains("is aerospace.app running")
}

#[derive(Deserialize)]
struct RawWindow {
    #[serde(rename = "window-id")]
    window_id: i64,
    #[serde(rename = "app-bundle-id", default)]
    app_bundle_id: Option<String>,
    #[serde(default)]
    workspace: Option<String>,
    #[serde(rename = "window-title", default)]
    window_title: serde_json::Value,
}

pub(crate) fn decode_windows(
    command: &str,
    stdout: &str,
    default_workspace: Option<&WorkspaceName>,
) -> TransportResult<Vec<WindowRecord>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let raw: Vec<RawWindow> =
        serde_json::from_str(stdout).map_err(|err| TransportError::DecodingFailed {
            command: command.to_string(),
            reason: err.to_string(),
        })?;

    raw.into_iter()
        .map(|w| {
            let workspace = match (w.workspace, default_workspace) {
                (Some(ws), _) if !ws.is_empty() => WorkspaceName::new(ws),
                (_, Some(ws)) => ws.clone(),
                _ => {
                    return Err(TransportError::DecodingFailed {
                        command: command.to_string(),
                        reason: format!("window {} has no workspace", w.window_id),
                    });
                }
            };
            let title = match w.window_title {
                serde_json::Value::String(title) => Some(title),
                other => {
                    debug!(window_id = w.window_id, title = %other, "undecodable window title");
                    None
                }
            };
            Ok(WindowRecord {
                window_id: WindowId::new(w.window_id),
                app_bundle_id: w.app_bundle_id.unwrap_or_default(),
                workspace,
                title,
            })
        })
        .collect()
}

fn decode_workspace_names(stdout: &str) -> Vec<WorkspaceName> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(WorkspaceName::new)
        .collect()
}

impl WindowService for AerospaceCli {
    async fn list_windows(
        &self,
        workspace: Option<&WorkspaceName>,
        app_bundle_id: Option<&str>,
    ) -> TransportResult<Vec<WindowRecord>> {
        let scope = match workspace {
            Some(ws) => vec!["--workspace".to_string(), ws.to_string()],
            None => vec!["--all".to_string()],
        };
        self.query_windows(scope, app_bundle_id, workspace).await
    }

    async fn list_windows_focused(&self) -> TransportResult<Vec<WindowRecord>> {
        self.query_windows(vec!["--focused".to_string()], None, None).await
    }

    async fn list_windows_all(&self) -> TransportResult<Vec<WindowRecord>> {
        self.query_windows(vec!["--all".to_string()], None, None).await
    }

    async fn focus_window(&self, window_id: WindowId) -> TransportResult<()> {
        self.exec(vec!["focus".to_string(), "--window-id".to_string(), window_id.to_string()])
            .await
            .map(drop)
    }

    async fn move_window(
        &self,
        window_id: WindowId,
        to_workspace: &WorkspaceName,
    ) -> TransportResult<()> {
        self.exec(vec![
            "move-node-to-workspace".to_string(),
            "--window-id".to_string(),
            window_id.to_string(),
            to_workspace.to_string(),
        ])
        .await
        .map(drop)
    }

    async fn focused_workspace(&self) -> TransportResult<WorkspaceName> {
        let command = format!("{} list-workspaces --focused", self.program);
        let mut names = self.workspace_names("--focused").await?;
        match names.len() {
            1 => Ok(names.remove(0)),
            _ => Err(TransportError::UnexpectedOutput {
                command,
                output: names.iter().map(WorkspaceName::as_str).collect::<Vec<_>>().join(", "),
            }),
        }
    }

    async fn workspace_exists(&self, name: &WorkspaceName) -> TransportResult<bool> {
        Ok(self.workspace_names("--all").await?.contains(name))
    }

    async fn switch_workspace(&self, name: &WorkspaceName) -> TransportResult<()> {
        self.exec(vec!["workspace".to_string(), name.to_string()]).await.map(drop)
    }

    /// AeroSpace materializes a workspace the first time it is shown, so
    /// creation is a switch.
    async fn create_workspace(&self, name: &WorkspaceName) -> TransportResult<()> {
        self.switch_workspace(name).await
    }

    /// Workspaces disappear once empty and unfocused: close every window in
    /// it. All windows are attempted; the first failure is reported.
    async fn close_workspace(&self, name: &WorkspaceName) -> TransportResult<()> {
        let windows = self.list_windows(Some(name), None).await?;
        let mut first_err = None;
        for window in windows {
            let args =
                vec!["close".to_string(), "--window-id".to_string(), window.window_id.to_string()];
            if let Err(err) = self.exec(args).await {
                warn!(window_id = %window.window_id, %err, "failed to close window");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
