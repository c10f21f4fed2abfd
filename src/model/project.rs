use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProjectDescriptor {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default, rename = "color")]
    pub color_tag: String,
}

impl ProjectDescriptor {
    pub fn workspace(&self, prefix: &str) -> WorkspaceName { WorkspaceName::for_project(prefix, &self.id) }
}

/// Name of a workspace in the window service.
///
/// Project workspaces are `prefix + project_id`; anything else the service
/// reports (the user's own workspaces) is carried through verbatim.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct WorkspaceName(String);

impl WorkspaceName {
    pub fn new(name: impl Into<String>) -> Self { Self(name.into()) }

    pub fn for_project(prefix: &str, project_id: &str) -> Self {
        Self(format!("{prefix}{project_id}"))
    }

    pub fn as_str(&self) -> &str { &self.0 }

    /// Inverse of [`WorkspaceName::for_project`].
    pub fn project_id(&self, prefix: &str) -> Option<&str> {
        self.0.strip_prefix(prefix).filter(|id| !id.is_empty())
    }
}

impl fmt::Display for WorkspaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for WorkspaceName {
    fn from(name: &str) -> Self { Self::new(name) }
}
