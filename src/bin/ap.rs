use std::path::PathBuf;
use std::sync::Arc;

use agentpanel::actor::activation::ActivationOptions;
use agentpanel::actor::controller::{Controller, ControllerEvent};
use agentpanel::actor::cycle::CycleDirection;
use agentpanel::common::config::{self, Config};
use agentpanel::common::log;
use agentpanel::model::WorkspaceName;
use agentpanel::sys::aerospace::AerospaceCli;
use agentpanel::sys::launch::OpenCommandLauncher;
use agentpanel::sys::modifiers::NeverHeld;
use agentpanel::sys::osascript::OsaScriptPositioner;
use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "ap", version, about = "Per-project workspaces on top of AeroSpace")]
struct Cli {
    /// Config file (default: ~/.config/agentpanel/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Switch to a project's workspace, opening and arranging its windows.
    Activate {
        project: String,
        /// Leave window frames alone.
        #[arg(long)]
        no_layout: bool,
    },
    /// Return focus to where it was and close a project's workspace.
    Close { project: String },
    /// Move project windows back to their workspaces.
    Recover {
        #[arg(long)]
        workspace: Option<String>,
        /// Re-apply the layout in workspaces that received windows.
        #[arg(long)]
        layout: bool,
    },
    /// Focus the next or previous window.
    Cycle { direction: Direction },
    /// List configured projects.
    Projects,
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate the config file.
    Check,
}

#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    Next,
    Prev,
}

impl From<Direction> for CycleDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Next => CycleDirection::Next,
            Direction::Prev => CycleDirection::Previous,
        }
    }
}

type LiveController = Controller<AerospaceCli, OpenCommandLauncher, OsaScriptPositioner, NeverHeld>;

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let (path, explicit) = match path {
        Some(path) => (path.clone(), true),
        None => (config::config_file(), false),
    };
    if !explicit && !path.exists() {
        debug!(path = %path.display(), "no config file; using defaults");
        return Ok(Config::default());
    }
    let mut config =
        Config::read(&path).with_context(|| format!("reading {}", path.display()))?;
    let fixed = config.auto_fix_values();
    if fixed > 0 {
        warn!("fixed {fixed} out-of-range config values");
    }
    Ok(config)
}

fn controller(config: Config) -> anyhow::Result<LiveController> {
    let timeout = config.settings.timing.command_timeout;
    let launch_timeout = config.settings.timing.launch_timeout;
    Controller::new(
        Arc::new(AerospaceCli::new(timeout)),
        Arc::new(OpenCommandLauncher::new(launch_timeout)),
        Arc::new(OsaScriptPositioner::new(timeout)),
        Arc::new(NeverHeld),
        Arc::new(config),
        config::state_file(),
    )
    .map_err(|err| anyhow::anyhow!(err.user_message()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sigpipe::reset();
    log::init_logging();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Projects => {
            for project in &config.projects {
                println!("{}\t{}\t{}", project.id, config.workspace_for(project), project.name);
            }
        }
        Command::Config(ConfigCommand::Check) => {
            let issues = config.validate();
            if !issues.is_empty() {
                for issue in &issues {
                    eprintln!("{issue}");
                }
                bail!("{} config issue(s)", issues.len());
            }
            println!("config ok ({} projects)", config.projects.len());
        }
        Command::Activate { project, no_layout } => {
            let mut ctl = controller(config)?;
            let options = ActivationOptions {
                apply_layout: !no_layout,
                ..ActivationOptions::default()
            };
            let request = ctl.start_activation(&project, options).await;
            let report = ctl
                .wait_activation(request, |progress| eprintln!("{}", progress.label()))
                .await
                .map_err(|err| anyhow::anyhow!(err.user_message()))?;
            for warning in &report.warnings {
                eprintln!("warning: {warning}");
            }
            println!("{}", report.workspace_name);
        }
        Command::Close { project } => {
            let mut ctl = controller(config)?;
            ctl.close_project(&project).await.map_err(|err| anyhow::anyhow!(err.user_message()))?;
        }
        Command::Recover { workspace, layout } => {
            let mut ctl = controller(config)?;
            let request = ctl.start_recovery(workspace.map(WorkspaceName::new), layout);
            while let Some(event) = ctl.next_update().await {
                match event {
                    ControllerEvent::RecoveryProgress { processed, total, .. } => {
                        debug!(processed, total, "recovering");
                    }
                    ControllerEvent::RecoveryFinished { request: r, result } if r == request => {
                        let result = result.map_err(|err| anyhow::anyhow!(err.user_message()))?;
                        for error in &result.errors {
                            eprintln!("{error}");
                        }
                        println!("{}", result.summary());
                        if !result.errors.is_empty() {
                            bail!("{} window(s) could not be recovered", result.errors.len());
                        }
                        break;
                    }
                    _ => {}
                }
            }
        }
        Command::Cycle { direction } => {
            let ctl = controller(config)?;
            let focused = ctl
                .cycler()
                .cycle_once(direction.into())
                .await
                .context("cycling windows")?;
            if let Some(window_id) = focused {
                debug!(%window_id, "focused");
            }
        }
    }
    Ok(())
}
