use std::fmt;

use serde::{Deserialize, Serialize};

use super::WorkspaceName;

/// Identifier the window service assigns to a live window.
///
/// Only valid while the window exists; never persisted.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct WindowId(i64);

impl WindowId {
    pub const fn new(id: i64) -> Self { Self(id) }

    pub const fn get(self) -> i64 { self.0 }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WindowRecord {
    pub window_id: WindowId,
    pub app_bundle_id: String,
    pub workspace: WorkspaceName,
    /// `None` when the service reported a title that could not be decoded.
    pub title: Option<String>,
}

impl WindowRecord {
    pub fn is_in(&self, workspace: &WorkspaceName) -> bool { &self.workspace == workspace }

    pub fn title_or_empty(&self) -> &str { self.title.as_deref().unwrap_or_default() }
}
