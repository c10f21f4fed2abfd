use std::future::Future;

use super::geometry::Rect;

/// Reference to one accessibility window of a running application.
///
/// `index` is the position in the application's window list at lookup time,
/// so a handle goes stale as soon as the application opens or closes a
/// window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle {
    pub pid: i32,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionerError {
    #[error("accessibility access has not been granted")]
    PermissionDenied,
    #[error("the window is gone")]
    WindowGone,
    #[error("accessibility call failed: {0}")]
    Failed(String),
}

pub trait WindowPositioner: Send + Sync {
    fn find_window(
        &self,
        bundle_id: &str,
        title_or_token: &str,
    ) -> impl Future<Output = Result<Option<WindowHandle>, PositionerError>> + Send;

    fn set_frame(
        &self,
        handle: WindowHandle,
        frame: Rect,
    ) -> impl Future<Output = Result<(), PositionerError>> + Send;

    fn read_title(&self, handle: WindowHandle) -> impl Future<Output = Option<String>> + Send;

    /// Visible frame of the main screen (menu bar and dock excluded).
    fn visible_frame(&self) -> impl Future<Output = Option<Rect>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub struct AxCandidate {
    pub handle: WindowHandle,
    pub title: String,
    pub enumeration_index: usize,
}

/// Picks among accessibility windows whose title contains `needle`.
///
/// The OS does not document its enumeration order, so ties are broken by
/// title and then by enumeration index. This is stable in practice but not
/// guaranteed when two windows carry the same title.
pub fn pick_candidate(candidates: &[AxCandidate], needle: &str) -> Option<WindowHandle> {
    candidates
        .iter()
        .filter(|c| c.title.contains(needle))
        .min_by(|a, b| {
            a.title.cmp(&b.title).then(a.enumeration_index.cmp(&b.enumeration_index))
        })
        .map(|c| c.handle)
}
