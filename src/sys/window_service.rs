use std::future::Future;

use crate::model::{WindowId, WindowRecord, WorkspaceName};

/// Failure talking to the window service (or any other external command).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("`{command}` timed out after {timeout_ms} ms")]
    TimedOut { command: String, timeout_ms: u64 },
    #[error("the window service is not ready: {reason}")]
    NotReady { reason: String },
    #[error("could not launch `{command}`: {reason}")]
    LaunchFailed { command: String, reason: String },
    #[error("could not decode the output of `{command}`: {reason}")]
    DecodingFailed { command: String, reason: String },
    #[error("unexpected output from `{command}`: {output}")]
    UnexpectedOutput { command: String, output: String },
    #[error("`{command}` exited with status {status}: {stderr}")]
    NonZeroExit { command: String, status: i32, stderr: String },
}

impl TransportError {
    /// Timeouts and a not-yet-ready service are worth another attempt inside a
    /// poll loop; everything else is fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::TimedOut { .. } | TransportError::NotReady { .. })
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Typed view of the external tiling window manager.
///
/// Every call carries its own timeout. Nothing here is transactional: two
/// command sequences issued concurrently may interleave arbitrarily.
pub trait WindowService: Send + Sync {
    /// Windows filtered by workspace and/or application. `None` for both
    /// lists every window.
    fn list_windows(
        &self,
        workspace: Option<&WorkspaceName>,
        app_bundle_id: Option<&str>,
    ) -> impl Future<Output = TransportResult<Vec<WindowRecord>>> + Send;

    /// The focused window, if any (zero or one record).
    fn list_windows_focused(&self)
    -> impl Future<Output = TransportResult<Vec<WindowRecord>>> + Send;

    fn list_windows_all(&self) -> impl Future<Output = TransportResult<Vec<WindowRecord>>> + Send;

    fn focus_window(&self, window_id: WindowId)
    -> impl Future<Output = TransportResult<()>> + Send;

    fn move_window(
        &self,
        window_id: WindowId,
        to_workspace: &WorkspaceName,
    ) -> impl Future<Output = TransportResult<()>> + Send;

    fn focused_workspace(&self) -> impl Future<Output = TransportResult<WorkspaceName>> + Send;

    fn workspace_exists(
        &self,
        name: &WorkspaceName,
    ) -> impl Future<Output = TransportResult<bool>> + Send;

    fn switch_workspace(
        &self,
        name: &WorkspaceName,
    ) -> impl Future<Output = TransportResult<()>> + Send;

    fn create_workspace(
        &self,
        name: &WorkspaceName,
    ) -> impl Future<Output = TransportResult<()>> + Send;

    fn close_workspace(
        &self,
        name: &WorkspaceName,
    ) -> impl Future<Output = TransportResult<()>> + Send;
}
