//! Which project a window belongs to, judged from its title.

use regex::Regex;

use crate::common::config::Config;
use crate::model::{WindowRecord, WindowToken};

#[derive(Debug, Clone)]
struct Candidate {
    project_id: String,
    token: WindowToken,
    name: Option<Regex>,
}

/// The token wins. Without one, an editor or browser window belongs to the
/// single project whose name appears in its title as a whole word.
#[derive(Debug, Clone)]
pub struct ProjectClassifier {
    projects: Vec<Candidate>,
    app_ids: [String; 2],
}

impl ProjectClassifier {
    pub fn new(config: &Config) -> Self {
        let projects = config
            .projects
            .iter()
            .map(|p| {
                let name = p.name.trim();
                Candidate {
                    project_id: p.id.clone(),
                    token: WindowToken::for_project(&p.id),
                    name: (!name.is_empty())
                        .then(|| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(name))).ok())
                        .flatten(),
                }
            })
            .collect();
        let settings = &config.settings;
        Self {
            projects,
            app_ids: [settings.editor.bundle_id.clone(), settings.browser.bundle_id.clone()],
        }
    }

    /// Id of the owning project.
    pub fn owner(&self, window: &WindowRecord) -> Option<&str> {
        let title = window.title.as_deref()?;
        if let Some(tagged) = self.projects.iter().find(|c| c.token.matches(title)) {
            return Some(tagged.project_id.as_str());
        }
        if !self.app_ids.iter().any(|id| id == &window.app_bundle_id) {
            return None;
        }
        let mut named = self
            .projects
            .iter()
            .filter(|c| c.name.as_ref().is_some_and(|re| re.is_match(title)));
        match (named.next(), named.next()) {
            (Some(only), None) => Some(only.project_id.as_str()),
            _ => None,
        }
    }

    pub fn is_owned_by(&self, window: &WindowRecord, project_id: &str) -> bool {
        self.owner(window) == Some(project_id)
    }
}
