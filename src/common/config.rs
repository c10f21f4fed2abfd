use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

use super::collections::HashSet;
use crate::model::{ProjectDescriptor, WindowToken, WorkspaceName};

const MIN_EDITOR_RATIO: f64 = 0.1;
const MAX_EDITOR_RATIO: f64 = 0.9;

fn home_dir() -> PathBuf { dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")) }

pub fn data_dir() -> PathBuf { home_dir().join(".agentpanel") }
pub fn state_file() -> PathBuf { data_dir().join("state.ron") }
pub fn config_file() -> PathBuf {
    home_dir().join(".config").join("agentpanel").join("config.toml")
}

/// How to open a new window of an application.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AppSpec {
    /// Application bundle identifier (e.g. "com.google.Chrome")
    pub bundle_id: String,
    /// Launch arguments. `{token}`, `{path}` and `{name}` are substituted.
    #[serde(default)]
    pub args: Vec<String>,
}

impl AppSpec {
    /// Whether windows opened with these arguments show the token.
    pub fn embeds_token(&self) -> bool { self.args.iter().any(|arg| arg.contains("{token}")) }

    pub fn render_args(&self, token: &WindowToken, project: &ProjectDescriptor) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{token}", token.as_str())
                    .replace("{path}", &project.path)
                    .replace("{name}", &project.name)
            })
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum EditorSide {
    #[default]
    Left,
    Right,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct LayoutSettings {
    #[serde(default)]
    pub editor_side: EditorSide,
    /// Fraction of the visible width given to the editor.
    #[serde(default = "default_editor_ratio")]
    pub editor_ratio: f64,
    #[serde(default)]
    pub gap: f64,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            editor_side: EditorSide::Left,
            editor_ratio: default_editor_ratio(),
            gap: 0.0,
        }
    }
}

impl LayoutSettings {
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if !(MIN_EDITOR_RATIO..=MAX_EDITOR_RATIO).contains(&self.editor_ratio) {
            issues.push(format!(
                "layout.editor_ratio must be between {MIN_EDITOR_RATIO} and {MAX_EDITOR_RATIO}, got {}",
                self.editor_ratio
            ));
        }

        if self.gap < 0.0 {
            issues.push(format!("layout.gap must be non-negative, got {}", self.gap));
        }

        issues
    }

    pub fn auto_fix_values(&mut self) -> usize {
        let mut fixes = 0;

        if !(MIN_EDITOR_RATIO..=MAX_EDITOR_RATIO).contains(&self.editor_ratio) {
            self.editor_ratio = default_editor_ratio();
            fixes += 1;
        }

        if self.gap < 0.0 {
            self.gap = 0.0;
            fixes += 1;
        }

        fixes
    }
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct TimingSettings {
    /// Per-call timeout for window service commands.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "command_timeout_ms", default = "default_command_timeout")]
    pub command_timeout: Duration,
    /// Overall budget for a newly launched window to show up.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "launch_timeout_ms", default = "default_launch_timeout")]
    pub launch_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "poll_interval_ms", default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// Budget of the last focused-window poll, carved out of `launch_timeout`.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "secondary_budget_ms", default = "default_secondary_budget")]
    pub secondary_budget: Duration,
    /// Delay before re-focusing a window after another one was created.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "settle_delay_ms", default = "default_settle_delay")]
    pub settle_delay: Duration,
    /// How long a workspace switch may take to be reflected.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "confirm_timeout_ms", default = "default_confirm_timeout")]
    pub confirm_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "cycle_watchdog_ms", default = "default_cycle_watchdog")]
    pub cycle_watchdog: Duration,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            command_timeout: default_command_timeout(),
            launch_timeout: default_launch_timeout(),
            poll_interval: default_poll_interval(),
            secondary_budget: default_secondary_budget(),
            settle_delay: default_settle_delay(),
            confirm_timeout: default_confirm_timeout(),
            cycle_watchdog: default_cycle_watchdog(),
        }
    }
}

impl TimingSettings {
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for (name, value) in [
            ("command_timeout_ms", self.command_timeout),
            ("launch_timeout_ms", self.launch_timeout),
            ("poll_interval_ms", self.poll_interval),
            ("confirm_timeout_ms", self.confirm_timeout),
            ("cycle_watchdog_ms", self.cycle_watchdog),
        ] {
            if value.is_zero() {
                issues.push(format!("timing.{name} must be greater than zero"));
            }
        }

        if self.poll_interval > self.launch_timeout {
            issues.push(format!(
                "timing.poll_interval_ms ({}) must not exceed timing.launch_timeout_ms ({})",
                self.poll_interval.as_millis(),
                self.launch_timeout.as_millis()
            ));
        }

        if self.secondary_budget >= self.launch_timeout {
            issues.push(
                "timing.secondary_budget_ms must be smaller than timing.launch_timeout_ms"
                    .to_string(),
            );
        }

        issues
    }

    pub fn auto_fix_values(&mut self) -> usize {
        let mut fixes = 0;
        let defaults = TimingSettings::default();

        for (value, default) in [
            (&mut self.command_timeout, defaults.command_timeout),
            (&mut self.launch_timeout, defaults.launch_timeout),
            (&mut self.poll_interval, defaults.poll_interval),
            (&mut self.confirm_timeout, defaults.confirm_timeout),
            (&mut self.cycle_watchdog, defaults.cycle_watchdog),
        ] {
            if value.is_zero() {
                *value = default;
                fixes += 1;
            }
        }

        if self.poll_interval > self.launch_timeout {
            self.poll_interval = self.launch_timeout;
            fixes += 1;
        }

        if self.secondary_budget >= self.launch_timeout {
            self.secondary_budget = self.launch_timeout / 5;
            fixes += 1;
        }

        fixes
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_workspace_prefix")]
    pub workspace_prefix: String,
    /// Applications whose windows never show up in the cycle overlay.
    #[serde(default)]
    pub cycle_excluded_bundle_ids: Vec<String>,
    #[serde(default = "default_editor")]
    pub editor: AppSpec,
    #[serde(default = "default_browser")]
    pub browser: AppSpec,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub layout: LayoutSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workspace_prefix: default_workspace_prefix(),
            cycle_excluded_bundle_ids: Vec::new(),
            editor: default_editor(),
            browser: default_browser(),
            timing: TimingSettings::default(),
            layout: LayoutSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.workspace_prefix.is_empty() {
            issues.push("workspace_prefix must not be empty".to_string());
        }

        for (name, app) in [("editor", &self.editor), ("browser", &self.browser)] {
            if app.bundle_id.is_empty() {
                issues.push(format!("{name}.bundle_id must not be empty"));
            } else if !app.bundle_id.contains('.') {
                issues.push(format!(
                    "{name}.bundle_id '{}' does not look like a bundle identifier",
                    app.bundle_id
                ));
            }
        }

        if self.editor.bundle_id == self.browser.bundle_id {
            issues.push("editor and browser must be different applications".to_string());
        }

        issues.extend(self.timing.validate());
        issues.extend(self.layout.validate());
        issues
    }
}

fn default_workspace_prefix() -> String { "ap-".to_string() }

fn default_editor() -> AppSpec {
    AppSpec {
        bundle_id: "com.microsoft.VSCode".to_string(),
        args: vec!["--new-window".to_string(), "{path}".to_string()],
    }
}

fn default_browser() -> AppSpec {
    AppSpec {
        bundle_id: "com.google.Chrome".to_string(),
        args: vec!["--new-window".to_string(), "--window-name={token}".to_string()],
    }
}

fn default_editor_ratio() -> f64 { 0.6 }

fn default_command_timeout() -> Duration { Duration::from_millis(2000) }
fn default_launch_timeout() -> Duration { Duration::from_millis(5000) }
fn default_poll_interval() -> Duration { Duration::from_millis(200) }
fn default_secondary_budget() -> Duration { Duration::from_millis(1000) }
fn default_settle_delay() -> Duration { Duration::from_millis(150) }
fn default_confirm_timeout() -> Duration { Duration::from_millis(1000) }
fn default_cycle_watchdog() -> Duration { Duration::from_millis(30) }

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub projects: Vec<ProjectDescriptor>,
}

impl Config {
    pub fn read(path: &Path) -> anyhow::Result<Config> {
        let buf = std::fs::read_to_string(path)?;
        Self::parse(&buf)
    }

    pub fn default() -> Config { Self::parse(include_str!("../../agentpanel.default.toml")).unwrap() }

    pub fn parse(buf: &str) -> anyhow::Result<Config> { Ok(toml::from_str(buf)?) }

    /// Save the current config to a file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, toml_string.as_bytes())?;
        Ok(())
    }

    pub fn project(&self, id: &str) -> Option<&ProjectDescriptor> {
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn workspace_for(&self, project: &ProjectDescriptor) -> WorkspaceName {
        project.workspace(&self.settings.workspace_prefix)
    }

    /// The project owning `workspace`, if it is a project workspace.
    pub fn project_for_workspace(&self, workspace: &WorkspaceName) -> Option<&ProjectDescriptor> {
        workspace
            .project_id(&self.settings.workspace_prefix)
            .and_then(|id| self.project(id))
    }

    /// Validates the entire configuration and returns a list of issues found.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = self.settings.validate();

        let mut seen_ids = HashSet::default();
        for (index, project) in self.projects.iter().enumerate() {
            if project.id.is_empty() {
                issues.push(format!("project {index} has an empty id"));
                continue;
            }
            if project.id.chars().any(|c| c.is_whitespace() || c == '#') {
                issues.push(format!(
                    "project id '{}' cannot be used in a workspace name",
                    project.id
                ));
            }
            if !seen_ids.insert(project.id.as_str()) {
                issues.push(format!("duplicate project id '{}'", project.id));
            }
            if project.name.trim().is_empty() {
                issues.push(format!("project '{}' has an empty name", project.id));
            }
        }

        issues
    }

    /// Attempts to fix configuration values automatically.
    /// Returns the number of fixes applied.
    pub fn auto_fix_values(&mut self) -> usize {
        self.settings.timing.auto_fix_values() + self.settings.layout.auto_fix_values()
    }
}
