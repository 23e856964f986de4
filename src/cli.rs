//! Command-line interface for tidydesk.
//!
//! Parses arguments with clap and wires the configuration, organizer, monitor,
//! vault, workspace store and scheduler together for each command.

use crate::config::{AppConfig, ConfigError};
use crate::file_category::CategoryConfig;
use crate::file_organizer::{OrganizeError, Organizer, validate_directory};
use crate::logging;
use crate::monitor::{EventCallback, FileMonitor, MonitorError};
use crate::notification::{ConsoleNotifier, Notifier};
use crate::output::OutputFormatter;
use crate::rules::RuleSet;
use crate::scheduler::{SchedulerError, TaskScheduler};
use crate::vault::{FileKeyStore, Vault, VaultError};
use crate::workspace::{WorkspaceConfig, WorkspaceError, WorkspaceStore};
use clap::{Args, Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "tidydesk")]
#[command(about = "Keeps a desktop sorted into category folders")]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: ./.tidydeskrc.toml, then the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Workspace database (default: <data dir>/tidydesk/workspaces.db)
    #[arg(long, global = true)]
    pub workspace_db: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sort a directory into category folders
    Organize {
        /// Directory to organize (default: desktop)
        dir: Option<PathBuf>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Show where files would go without moving anything
        #[arg(long)]
        dry_run: bool,

        /// Extra rule document applied after the configured rules
        #[arg(long)]
        rules: Option<PathBuf>,

        #[command(flatten)]
        workspace: WorkspaceArg,
    },

    /// Organize new files as they appear, until Enter is pressed
    Watch {
        /// Directories to watch (default: desktop)
        dirs: Vec<PathBuf>,

        #[command(flatten)]
        workspace: WorkspaceArg,
    },

    /// Encrypt a file to FILE.enc and remove the original
    Encrypt {
        file: PathBuf,

        #[arg(short, long, env = "TIDYDESK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Decrypt a .enc file and remove the encrypted copy
    Decrypt {
        file: PathBuf,

        #[arg(
            short,
            long,
            env = "TIDYDESK_PASSWORD",
            hide_env_values = true,
            conflicts_with = "stored_key"
        )]
        password: Option<String>,

        /// Use the key recorded when the file was encrypted
        #[arg(long)]
        stored_key: bool,
    },

    /// Manage named workspaces
    Workspace {
        #[command(subcommand)]
        action: WorkspaceAction,
    },

    /// Organize a directory on a schedule, until Enter is pressed
    Schedule {
        /// Directory to organize (default: desktop)
        dir: Option<PathBuf>,

        /// Run every N minutes
        #[arg(
            long,
            value_name = "MINUTES",
            conflicts_with = "daily",
            required_unless_present = "daily"
        )]
        every: Option<u64>,

        /// Run every day at HH:MM
        #[arg(long, value_name = "HH:MM")]
        daily: Option<String>,

        #[command(flatten)]
        workspace: WorkspaceArg,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct WorkspaceArg {
    /// Use the categories and rules of a saved workspace
    #[arg(short, long)]
    pub workspace: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum WorkspaceAction {
    /// Save a workspace from category and rule documents
    Save {
        name: String,

        /// Category document (default: built-in categories)
        #[arg(long)]
        categories: Option<PathBuf>,

        /// Rule document
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// Print a workspace as JSON
    Show { name: String },
    /// List saved workspaces
    List,
    /// Delete a workspace
    Delete { name: String },
}

/// Errors surfaced by a command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Organize(#[from] OrganizeError),

    #[error("Configuration load failed: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Usage(String),
}

impl CliError {
    /// Process exit code: 2 for a bad directory, 3 for configuration load failures.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Organize(OrganizeError::InvalidDirectory { .. }) => 2,
            CliError::Organize(OrganizeError::Config(_)) | CliError::Config(_) => 3,
            _ => 1,
        }
    }
}

/// Runs a parsed command, reading confirmations from stdin.
pub fn run(cli: Cli) -> Result<(), CliError> {
    let stdin = io::stdin();
    run_with_input(cli, &mut stdin.lock())
}

/// Runs a parsed command, reading confirmations and the stop signal from `input`.
pub fn run_with_input(cli: Cli, input: &mut dyn BufRead) -> Result<(), CliError> {
    let config = AppConfig::load(cli.config.as_deref())?;
    logging::init_with_config(&logging::apply_verbosity(&config.logging, cli.verbose));

    let workspace_db = cli
        .workspace_db
        .clone()
        .unwrap_or_else(WorkspaceStore::default_path);

    match cli.command {
        Command::Organize {
            dir,
            yes,
            dry_run,
            rules,
            workspace,
        } => {
            let dir = resolve_directory(dir)?;
            let organizer = build_organizer(&config, &workspace, &workspace_db)?;
            let extra_rules = rules.as_deref().map(|path| RuleSet::load(Some(path)));
            organize_directory(&organizer, &dir, extra_rules.as_ref(), yes, dry_run, input)
        }
        Command::Watch { dirs, workspace } => {
            let dirs = if dirs.is_empty() {
                vec![resolve_directory(None)?]
            } else {
                dirs
            };
            let organizer = build_organizer(&config, &workspace, &workspace_db)?;
            watch_directories(organizer, &config, &dirs, input)
        }
        Command::Encrypt { file, password } => {
            let password = require_password(password)?;
            let vault = open_vault(&config)?;
            let encrypted = vault.encrypt(&file, &password)?;
            vault.flush_keys()?;
            OutputFormatter::success(&format!("Encrypted to {}", encrypted.display()));
            Ok(())
        }
        Command::Decrypt {
            file,
            password,
            stored_key,
        } => {
            let vault = open_vault(&config)?;
            let decrypted = if stored_key {
                if config.vault.keystore.is_none() {
                    return Err(CliError::Usage(
                        "--stored-key needs a key store: set [vault] keystore in the configuration".to_string(),
                    ));
                }
                vault.decrypt_with_stored_key(&file)?
            } else {
                vault.decrypt(&file, &require_password(password)?)?
            };
            vault.flush_keys()?;
            OutputFormatter::success(&format!("Decrypted to {}", decrypted.display()));
            Ok(())
        }
        Command::Workspace { action } => {
            let store = WorkspaceStore::open(&workspace_db)?;
            run_workspace_action(&store, action)
        }
        Command::Schedule {
            dir,
            every,
            daily,
            workspace,
        } => {
            let dir = resolve_directory(dir)?;
            validate_directory(&dir)?;
            let organizer = build_organizer(&config, &workspace, &workspace_db)?;
            schedule_organize(organizer, &dir, every, daily.as_deref(), input)
        }
    }
}

/// Runs one organize pass over `dir`, after confirmation unless `assume_yes`.
pub fn organize_directory(
    organizer: &Organizer,
    dir: &Path,
    extra_rules: Option<&RuleSet>,
    assume_yes: bool,
    dry_run: bool,
    input: &mut dyn BufRead,
) -> Result<(), CliError> {
    validate_directory(dir)?;

    if dry_run {
        OutputFormatter::dry_run_notice(&format!("Planning organization of {}", dir.display()));
        OutputFormatter::plan(&organizer.plan(dir)?);
        return Ok(());
    }

    if !assume_yes {
        let prompt = format!(
            "Organize {}? Existing subfolders will be flattened first.",
            dir.display()
        );
        if !confirm(&prompt, input)? {
            OutputFormatter::warning("Cancelled");
            return Ok(());
        }
    }

    OutputFormatter::info(&format!("Organizing {}", dir.display()));
    let progress = OutputFormatter::create_progress_bar(0);
    let report = organizer.organize_with_progress(dir, extra_rules, &progress)?;
    flush_vault(organizer);

    OutputFormatter::organize_report(&report);
    if report.is_complete_success() {
        OutputFormatter::success("Organization complete");
    } else {
        OutputFormatter::warning("Some files could not be organized; see the failures above");
    }
    Ok(())
}

/// Asks a yes/no question; anything but `y`/`yes` is a no.
pub fn confirm(prompt: &str, input: &mut dyn BufRead) -> io::Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn watch_directories(
    organizer: Organizer,
    config: &AppConfig,
    dirs: &[PathBuf],
    input: &mut dyn BufRead,
) -> Result<(), CliError> {
    let organizer = Arc::new(organizer);
    let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier);
    let mut monitor = FileMonitor::new(organizer.clone(), notifier, config.monitor.clone());

    let callback: EventCallback = Arc::new(|path: &Path| {
        tracing::debug!("[cli] organized {}", path.display());
    });
    monitor.start(dirs, Some(callback))?;

    let watched = monitor.watched_paths();
    if watched.is_empty() {
        monitor.stop();
        return Err(CliError::Usage("none of the given directories can be watched".to_string()));
    }
    for dir in &watched {
        OutputFormatter::info(&format!("Watching {}", dir.display()));
    }
    OutputFormatter::plain("Press Enter to stop.");

    wait_for_enter(input)?;
    monitor.stop();
    flush_vault(&organizer);
    OutputFormatter::success("Stopped watching");
    Ok(())
}

fn schedule_organize(
    organizer: Organizer,
    dir: &Path,
    every: Option<u64>,
    daily: Option<&str>,
    input: &mut dyn BufRead,
) -> Result<(), CliError> {
    let organizer = Arc::new(organizer);
    let task = {
        let organizer = organizer.clone();
        let dir = dir.to_path_buf();
        Box::new(move || match organizer.organize(&dir) {
            Ok(report) => {
                flush_vault(&organizer);
                OutputFormatter::notice(
                    "Scheduled Organize",
                    &format!("{} files organized in {}", report.moved.len(), dir.display()),
                );
            }
            Err(e) => tracing::error!("[scheduler] organize of {} failed: {e}", dir.display()),
        })
    };

    let mut scheduler = TaskScheduler::new();
    match (every, daily) {
        (Some(minutes), _) => {
            scheduler.add_interval_task(Duration::from_secs(minutes.saturating_mul(60)), task)?;
            OutputFormatter::info(&format!("Organizing {} every {minutes} minutes", dir.display()));
        }
        (None, Some(time)) => {
            scheduler.add_daily_task(time, task)?;
            OutputFormatter::info(&format!("Organizing {} daily at {time}", dir.display()));
        }
        (None, None) => return Err(CliError::Usage("pass --every or --daily".to_string())),
    }

    scheduler.start()?;
    OutputFormatter::plain("Press Enter to stop.");
    wait_for_enter(input)?;
    scheduler.stop();
    OutputFormatter::success("Scheduler stopped");
    Ok(())
}

/// Runs one workspace subcommand against `store`.
pub fn run_workspace_action(
    store: &WorkspaceStore,
    action: WorkspaceAction,
) -> Result<(), CliError> {
    match action {
        WorkspaceAction::Save {
            name,
            categories,
            rules,
        } => {
            let config = WorkspaceConfig {
                categories: CategoryConfig::load_or_default(categories.as_deref())?,
                rules: RuleSet::load(rules.as_deref()).to_rules(),
            };
            store.save(&name, &config)?;
            OutputFormatter::success(&format!("Saved workspace '{name}'"));
        }
        WorkspaceAction::Show { name } => {
            let config = store.require(&name)?;
            let json = serde_json::to_string_pretty(&config).map_err(WorkspaceError::from)?;
            OutputFormatter::plain(&json);
        }
        WorkspaceAction::List => {
            let workspaces = store.list()?;
            if workspaces.is_empty() {
                OutputFormatter::info("No workspaces saved");
            }
            for workspace in workspaces {
                OutputFormatter::plain(&format!(
                    "{}  (created {})",
                    workspace.name, workspace.created_at
                ));
            }
        }
        WorkspaceAction::Delete { name } => {
            if store.delete(&name)? {
                OutputFormatter::success(&format!("Deleted workspace '{name}'"));
            } else {
                return Err(WorkspaceError::NotFound(name).into());
            }
        }
    }
    Ok(())
}

/// Builds the organizer from configuration, or from a saved workspace when named.
pub fn build_organizer(
    config: &AppConfig,
    workspace: &WorkspaceArg,
    workspace_db: &Path,
) -> Result<Organizer, CliError> {
    let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier);
    match &workspace.workspace {
        Some(name) => {
            let saved = WorkspaceStore::open(workspace_db)?.require(name)?;
            tracing::info!("[cli] using workspace '{name}'");
            Ok(Organizer::from_parts(config, saved.categories.clone(), saved.rule_set(), notifier)?)
        }
        None => Ok(Organizer::from_config(config, notifier)?),
    }
}

fn open_vault(config: &AppConfig) -> Result<Vault, CliError> {
    let vault = match &config.vault.keystore {
        Some(path) => {
            let vault = Vault::with_key_store(Box::new(FileKeyStore::new(path)));
            vault.load_keys()?;
            vault
        }
        None => Vault::new(),
    };
    Ok(vault.with_iterations(config.vault.iterations))
}

fn flush_vault(organizer: &Organizer) {
    if let Err(e) = organizer.vault().flush_keys() {
        tracing::warn!("[vault] failed to save keys: {e}");
    }
}

fn require_password(password: Option<String>) -> Result<String, CliError> {
    password.filter(|p| !p.is_empty()).ok_or_else(|| {
        CliError::Usage(
            "a password is required: pass --password or set TIDYDESK_PASSWORD".to_string(),
        )
    })
}

fn resolve_directory(dir: Option<PathBuf>) -> Result<PathBuf, CliError> {
    dir.or_else(dirs::desktop_dir).ok_or_else(|| {
        CliError::Usage("no directory given and no desktop directory found".to_string())
    })
}

fn wait_for_enter(input: &mut dyn BufRead) -> io::Result<()> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_confirm_accepts_yes_only() {
        assert!(confirm("Go?", &mut Cursor::new("y\n")).unwrap());
        assert!(confirm("Go?", &mut Cursor::new("YES\n")).unwrap());
        assert!(!confirm("Go?", &mut Cursor::new("n\n")).unwrap());
        assert!(!confirm("Go?", &mut Cursor::new("")).unwrap());
    }

    #[test]
    fn test_exit_codes() {
        let invalid = CliError::from(OrganizeError::InvalidDirectory {
            path: PathBuf::from("/missing"),
            reason: "does not exist".to_string(),
        });
        assert_eq!(invalid.exit_code(), 2);

        let config = CliError::from(ConfigError::ConfigNotFound(PathBuf::from("/missing.toml")));
        assert_eq!(config.exit_code(), 3);

        let wrapped = CliError::from(OrganizeError::Config(ConfigError::ConfigInvalid(
            "bad".to_string(),
        )));
        assert_eq!(wrapped.exit_code(), 3);

        assert_eq!(CliError::Usage("nope".to_string()).exit_code(), 1);
    }

    #[test]
    fn test_parse_organize_flags() {
        let cli = Cli::try_parse_from([
            "tidydesk", "-vv", "organize", "/tmp/desk", "--yes", "--dry-run",
        ])
        .expect("Failed to parse arguments");

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Organize { dir, yes, dry_run, .. } => {
                assert_eq!(dir, Some(PathBuf::from("/tmp/desk")));
                assert!(yes);
                assert!(dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_schedule_requires_a_trigger() {
        assert!(Cli::try_parse_from(["tidydesk", "schedule", "/tmp/desk"]).is_err());
        assert!(
            Cli::try_parse_from([
                "tidydesk", "schedule", "/tmp/desk", "--every", "5", "--daily", "09:00",
            ])
            .is_err()
        );
        assert!(
            Cli::try_parse_from(["tidydesk", "schedule", "/tmp/desk", "--daily", "09:00"]).is_ok()
        );
    }

    #[test]
    fn test_require_password_rejects_empty() {
        assert!(require_password(None).is_err());
        assert!(require_password(Some(String::new())).is_err());
        assert_eq!(require_password(Some("pw".to_string())).unwrap(), "pw");
    }
}
