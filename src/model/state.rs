//! Small persisted record of where the user was before switching into a
//! project, so that closing or cancelling can put focus back.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::WorkspaceName;
use crate::common::collections::VecDeque;

const MAX_ENTRIES: usize = 20;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FocusEntry {
    pub app_bundle_id: String,
    pub workspace: WorkspaceName,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FocusHistory {
    entries: VecDeque<FocusEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("could not read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("could not parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
    #[error("could not write {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },
}

impl FocusHistory {
    /// A missing file is an empty history.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        let buf = match std::fs::read_to_string(path) {
            Ok(buf) => buf,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no focus history yet");
                return Ok(Self::default());
            }
            Err(source) => return Err(StateError::Read { path: path.to_owned(), source }),
        };
        ron::from_str(&buf).map_err(|err| StateError::Parse {
            path: path.to_owned(),
            reason: err.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let write_err = |reason: String| StateError::Write { path: path.to_owned(), reason };
        let buf = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|err| write_err(err.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| write_err(err.to_string()))?;
            }
        }
        std::fs::write(path, buf.as_bytes()).map_err(|err| write_err(err.to_string()))
    }

    /// Pushes `entry` to the front, dropping an older duplicate.
    pub fn record(&mut self, entry: FocusEntry) {
        self.entries.retain(|e| {
            !(e.app_bundle_id == entry.app_bundle_id && e.workspace == entry.workspace)
        });
        self.entries.push_front(entry);
        self.entries.truncate(MAX_ENTRIES);
    }

    pub fn entries(&self) -> impl Iterator<Item = &FocusEntry> { self.entries.iter() }

    /// Most recent entry that is not in `workspace`.
    pub fn most_recent_outside(&self, workspace: &WorkspaceName) -> Option<&FocusEntry> {
        self.entries.iter().find(|e| &e.workspace != workspace)
    }
}
