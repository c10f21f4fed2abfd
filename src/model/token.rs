use std::fmt;

use serde::{Deserialize, Serialize};

use super::WindowRecord;

pub const TOKEN_PREFIX: &str = "AP:";
const ATTEMPT_SEPARATOR: char = '#';

/// Marker embedded in a window title when we create the window.
///
/// `AP:<project_id>` identifies the project; `AP:<project_id>#<attempt>`
/// additionally pins one activation attempt so that a window left behind by
/// an abandoned attempt is never mistaken for the one we just asked for.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct WindowToken(String);

impl WindowToken {
    pub fn for_project(project_id: &str) -> Self { Self(format!("{TOKEN_PREFIX}{project_id}")) }

    pub fn for_attempt(project_id: &str, attempt: u64) -> Self {
        Self(format!("{TOKEN_PREFIX}{project_id}{ATTEMPT_SEPARATOR}{attempt}"))
    }

    pub fn as_str(&self) -> &str { &self.0 }

    pub fn project_id(&self) -> &str {
        let body = self.0.strip_prefix(TOKEN_PREFIX).unwrap_or(&self.0);
        body.split_once(ATTEMPT_SEPARATOR).map_or(body, |(id, _)| id)
    }

    /// The project-wide token this one belongs to. Identity for project tokens.
    pub fn family(&self) -> WindowToken { Self::for_project(self.project_id()) }

    /// Substring containment, anchored on the right so that `AP:demo` does
    /// not match a title carrying `AP:demo2`.
    pub fn matches(&self, title: &str) -> bool {
        title.match_indices(self.0.as_str()).any(|(start, needle)| {
            title[start + needle.len()..].chars().next().is_none_or(|c| !is_token_char(c))
        })
    }

    /// True when `title` carries some token, but not this one.
    pub fn is_foreign(&self, title: &str) -> bool {
        title.contains(TOKEN_PREFIX) && !self.matches(title)
    }

    /// Undecodable titles never match.
    pub fn matches_record(&self, record: &WindowRecord) -> bool {
        record.title.as_deref().is_some_and(|title| self.matches(title))
    }
}

fn is_token_char(c: char) -> bool { c.is_alphanumeric() || matches!(c, '-' | '_' | '.') }

impl fmt::Display for WindowToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{WindowId, WorkspaceName};

    #[test]
    fn matches_embedded_token() {
        let token = WindowToken::for_project("demo");
        assert!(token.matches("AP:demo - Visual Studio Code"));
        assert!(token.matches("main.rs — [AP:demo]"));
        assert!(token.matches("AP:demo"));
        assert!(!token.matches("demo - Visual Studio Code"));
    }

    #[test]
    fn does_not_match_other_project_with_shared_prefix() {
        let token = WindowToken::for_project("demo");
        assert!(!token.matches("AP:demo2 - Chrome"));
        assert!(!token.matches("AP:demo-app - Chrome"));
        assert!(token.matches("AP:demo2 AP:demo"));
    }

    #[test]
    fn attempt_tokens_belong_to_their_project() {
        let attempt = WindowToken::for_attempt("demo", 7);
        assert_eq!(attempt.as_str(), "AP:demo#7");
        assert_eq!(attempt.project_id(), "demo");
        assert_eq!(attempt.family(), WindowToken::for_project("demo"));

        assert!(attempt.family().matches("AP:demo#7 - Chrome"));
        assert!(attempt.matches("AP:demo#7 - Chrome"));
        assert!(!attempt.matches("AP:demo#71 - Chrome"));
        assert!(!attempt.matches("AP:demo#6 - Chrome"));
    }

    #[test]
    fn foreign_tokens() {
        let attempt = WindowToken::for_attempt("demo", 2);
        assert!(attempt.is_foreign("AP:other - Chrome"));
        assert!(attempt.is_foreign("AP:demo#1 - Chrome"));
        assert!(!attempt.is_foreign("AP:demo#2 - Chrome"));
        assert!(!attempt.is_foreign("New Tab - Chrome"));
    }

    #[test]
    fn undecodable_title_never_matches() {
        let record = WindowRecord {
            window_id: WindowId::new(1),
            app_bundle_id: "com.google.Chrome".to_string(),
            workspace: WorkspaceName::new("ap-demo"),
            title: None,
        };
        assert!(!WindowToken::for_project("demo").matches_record(&record));
    }
}
