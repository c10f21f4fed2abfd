//! Spawning applications with arguments.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, warn};

use super::command;
use super::window_service::{TransportError, TransportResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub bundle_id: String,
    pub app_path: PathBuf,
    pub args: Vec<String>,
}

pub trait AppLauncher: Send + Sync {
    /// Location of the application bundle, `None` if it is not installed.
    fn resolve(&self, bundle_id: &str) -> impl Future<Output = Option<PathBuf>> + Send;

    /// Asks the OS for a new instance window. A non-zero exit is
    /// `LaunchFailed`.
    fn open(&self, request: &LaunchRequest) -> impl Future<Output = TransportResult<()>> + Send;
}

/// Launches through `open(1)` and resolves bundles through Spotlight.
pub struct OpenCommandLauncher {
    timeout: Duration,
}

impl OpenCommandLauncher {
    pub fn new(timeout: Duration) -> Self { Self { timeout } }
}

impl AppLauncher for OpenCommandLauncher {
    async fn resolve(&self, bundle_id: &str) -> Option<PathBuf> {
        let query = format!("kMDItemCFBundleIdentifier == '{bundle_id}'");
        match command::run("mdfind", &[query], self.timeout).await {
            Ok(output) => {
                let path = output
                    .stdout
                    .lines()
                    .map(str::trim)
                    .find(|line| line.ends_with(".app"))
                    .map(PathBuf::from);
                debug!(bundle_id, ?path, "resolved application");
                path
            }
            Err(err) => {
                warn!(bundle_id, %err, "could not resolve application");
                None
            }
        }
    }

    async fn open(&self, request: &LaunchRequest) -> TransportResult<()> {
        let mut args = vec![
            "-n".to_string(),
            "-a".to_string(),
            request.app_path.display().to_string(),
        ];
        if !request.args.is_empty() {
            args.push("--args".to_string());
            args.extend(request.args.iter().cloned());
        }
        match command::run("open", &args, self.timeout).await {
            Ok(_) => Ok(()),
            Err(TransportError::NonZeroExit { command, status, stderr }) => {
                Err(TransportError::LaunchFailed {
                    command,
                    reason: format!("exit status {status}: {stderr}"),
                })
            }
            Err(err) => Err(err),
        }
    }
}
