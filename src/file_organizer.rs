/// File organization system for sorting a directory into category containers.
///
/// A full pass over a directory runs four phases:
/// 1. Reset: flatten every subdirectory back into the directory
/// 2. Provision: create one container per configured category, with a `.meta` descriptor
/// 3. Categorize: move every eligible top-level file into its category container
/// 4. Rules: apply supplementary rules to each file at its new location
///
/// [`Organizer::process_single`] runs phases 3 and 4 for one file and is what the
/// file monitor calls per event.
///
/// A pass is synchronous and is not safe to run concurrently with another pass or
/// with a file monitor on the same directory: both may race on file existence.
use crate::config::{AppConfig, CompiledFilters, ConfigError};
use crate::file_category::{CategoryConfig, Categorizer};
use crate::notification::{LogNotifier, Notifier};
use crate::rules::{RuleEngine, RuleError, RuleSet};
use crate::vault::{FileKeyStore, Vault, VaultError};
use indicatif::ProgressBar;
use serde_json::json;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Name of the display descriptor written into each container.
pub const META_FILE: &str = ".meta";

/// Errors that can occur during file organization operations.
#[derive(Debug, Error)]
pub enum OrganizeError {
    /// The directory to organize does not exist or is not a directory.
    #[error("Invalid directory {}: {reason}", .path.display())]
    InvalidDirectory { path: PathBuf, reason: String },

    /// Category tables, filters or settings could not be loaded.
    #[error("Configuration load failed: {0}")]
    Config(#[from] ConfigError),

    /// Failed to create a category directory.
    #[error("Failed to create directory {}: {source}", .path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    /// Failed to move a file.
    #[error("Failed to move {} to {}: {source}", .file.display(), .destination.display())]
    FileMoveFailure {
        file: PathBuf,
        destination: PathBuf,
        source: io::Error,
    },

    /// Any other per-file IO failure.
    #[error("IO error on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    /// The configured key store exists but could not be read. Flushing an
    /// unloaded store would overwrite the keys it holds.
    #[error("Failed to load vault keys from {}: {source}", .path.display())]
    KeyStoreLoad { path: PathBuf, source: VaultError },
}

/// Result type for file organization operations.
pub type OrganizeResult<T> = Result<T, OrganizeError>;

/// What happened to a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Moved into a category container.
    Moved {
        category: String,
        destination: PathBuf,
    },
    /// Left in place on purpose.
    Skipped { reason: SkipReason },
    /// The file was gone before it could be handled.
    Vanished,
}

/// Why a file was left where it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Hidden,
    Directory,
    Encrypted,
    Filtered,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            SkipReason::Hidden => "hidden file",
            SkipReason::Directory => "directory",
            SkipReason::Encrypted => "encrypted",
            SkipReason::Filtered => "excluded by filters",
        };
        f.write_str(reason)
    }
}

/// A file moved into a category container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovedFile {
    pub original_path: PathBuf,
    pub new_path: PathBuf,
    pub category: String,
}

/// Summary of one organize pass.
#[derive(Debug, Default)]
pub struct OrganizeReport {
    /// Entries moved back to the directory root by the reset phase.
    pub restored: usize,
    /// Files moved into containers.
    pub moved: Vec<MovedFile>,
    /// Files deliberately left in place.
    pub skipped: Vec<(PathBuf, SkipReason)>,
    /// Per-file failures in any phase.
    pub failures: Vec<(PathBuf, String)>,
    /// Rule failures, by file.
    pub rule_failures: Vec<(PathBuf, String)>,
}

impl OrganizeReport {
    /// Number of moved files per category.
    pub fn category_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for moved in &self.moved {
            *counts.entry(moved.category.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// True when no file failed to move and no rule failed.
    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty() && self.rule_failures.is_empty()
    }

    fn fail(&mut self, path: &Path, reason: impl ToString) {
        let reason = reason.to_string();
        tracing::error!("[organizer] {}: {reason}", display_name(path));
        self.failures.push((path.to_path_buf(), reason));
    }
}

/// A planned categorization, for dry runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub path: PathBuf,
    pub category: String,
}

/// Organizes directories into category containers.
pub struct Organizer {
    categorizer: Categorizer,
    filters: CompiledFilters,
    rules: RuleSet,
    vault: Arc<Vault>,
    engine: RuleEngine,
    reserved_dirs: HashSet<String>,
}

impl Organizer {
    /// Creates an organizer with default filters, no rules and an in-memory vault.
    pub fn new(categorizer: Categorizer) -> Self {
        let vault = Arc::new(Vault::new());
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
        let defaults = AppConfig::default();
        Self {
            categorizer,
            filters: CompiledFilters::default(),
            rules: RuleSet::default(),
            engine: RuleEngine::new(vault.clone(), notifier, defaults.vault.default_password),
            vault,
            reserved_dirs: defaults.organizer.reserved_dirs.into_iter().collect(),
        }
    }

    /// Builds an organizer from application configuration.
    ///
    /// The category document, filters and key store must load; the rule document
    /// degrades to an empty rule set when it cannot be read.
    pub fn from_config(config: &AppConfig, notifier: Arc<dyn Notifier>) -> OrganizeResult<Self> {
        let categories = CategoryConfig::load_or_default(config.organizer.categories.as_deref())?;
        let rules = RuleSet::load(config.organizer.rules.as_deref());
        Self::from_parts(config, categories, rules, notifier)
    }

    /// Builds an organizer from explicit tables and rules, taking the remaining
    /// settings from `config`.
    pub fn from_parts(
        config: &AppConfig,
        categories: CategoryConfig,
        rules: RuleSet,
        notifier: Arc<dyn Notifier>,
    ) -> OrganizeResult<Self> {
        let filters = config.compile_filters()?;

        let vault = match &config.vault.keystore {
            Some(path) => {
                let vault = Vault::with_key_store(Box::new(FileKeyStore::new(path)));
                vault
                    .load_keys()
                    .map_err(|source| OrganizeError::KeyStoreLoad {
                        path: path.clone(),
                        source,
                    })?;
                vault
            }
            None => Vault::new(),
        };
        let vault = Arc::new(vault.with_iterations(config.vault.iterations));

        Ok(Self {
            categorizer: categories.compile(),
            filters,
            rules,
            engine: RuleEngine::new(vault.clone(), notifier, config.vault.default_password.clone()),
            vault,
            reserved_dirs: config.organizer.reserved_dirs.iter().cloned().collect(),
        })
    }

    /// Replaces the rule set.
    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    /// Replaces the filters.
    pub fn with_filters(mut self, filters: CompiledFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Replaces the vault and the notifier used by rule actions.
    pub fn with_vault(
        mut self,
        vault: Arc<Vault>,
        notifier: Arc<dyn Notifier>,
        default_password: &str,
    ) -> Self {
        self.engine = RuleEngine::new(vault.clone(), notifier, default_password);
        self.vault = vault;
        self
    }

    pub fn categorizer(&self) -> &Categorizer {
        &self.categorizer
    }

    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Runs a full pass over `directory` with the configured rules.
    pub fn organize(&self, directory: &Path) -> OrganizeResult<OrganizeReport> {
        self.organize_with_progress(directory, None, &ProgressBar::hidden())
    }

    /// Runs a full pass with extra rules appended after the configured ones.
    pub fn organize_with_rules(
        &self,
        directory: &Path,
        extra_rules: &RuleSet,
    ) -> OrganizeResult<OrganizeReport> {
        self.organize_with_progress(directory, Some(extra_rules), &ProgressBar::hidden())
    }

    /// Runs a full pass, advancing `progress` once per categorized file.
    pub fn organize_with_progress(
        &self,
        directory: &Path,
        extra_rules: Option<&RuleSet>,
        progress: &ProgressBar,
    ) -> OrganizeResult<OrganizeReport> {
        validate_directory(directory)?;
        tracing::info!("[organizer] organizing {}", directory.display());

        let mut report = OrganizeReport::default();
        self.reset(directory, &mut report);
        self.provision_containers(directory, &mut report);

        let rules = self.combined_rules(extra_rules);
        let files = self.top_level_files(directory, &mut report);
        progress.set_length(files.len() as u64);

        for file in files {
            match self.categorize_file(directory, &file, &rules) {
                Ok((FileOutcome::Moved { category, destination }, rule_errors)) => {
                    report.moved.push(MovedFile {
                        original_path: file.clone(),
                        new_path: destination.clone(),
                        category,
                    });
                    for error in rule_errors {
                        report.rule_failures.push((destination.clone(), error.to_string()));
                    }
                }
                Ok((FileOutcome::Skipped { reason }, _)) => {
                    report.skipped.push((file.clone(), reason))
                }
                Ok((FileOutcome::Vanished, _)) => {
                    tracing::debug!("[organizer] {} vanished before handling", display_name(&file));
                }
                Err(e) => report.fail(&file, e),
            }
            progress.inc(1);
        }

        progress.finish_and_clear();
        tracing::info!(
            "[organizer] moved {} files, {} skipped, {} failed",
            report.moved.len(),
            report.skipped.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Categorizes and moves exactly one file of `directory`, then applies rules to it.
    pub fn process_single(&self, directory: &Path, file: &Path) -> OrganizeResult<FileOutcome> {
        validate_directory(directory)?;
        let rules = self.combined_rules(None);
        let (outcome, _) = self.categorize_file(directory, file, &rules)?;
        Ok(outcome)
    }

    /// Reports where each eligible top-level file would go, without touching anything.
    pub fn plan(&self, directory: &Path) -> OrganizeResult<Vec<PlannedMove>> {
        validate_directory(directory)?;
        let mut scratch = OrganizeReport::default();
        let plan = self
            .top_level_files(directory, &mut scratch)
            .into_iter()
            .filter(|file| self.skip_reason(file).is_none())
            .map(|file| PlannedMove {
                category: self.categorizer.categorize_path(&file).to_string(),
                path: file,
            })
            .collect();
        Ok(plan)
    }

    /// Moves every entry of every non-reserved subdirectory back to `directory`
    /// and removes the emptied subdirectories.
    ///
    /// Nested directories lifted to the root are flattened in the same sweep.
    /// Hidden entries stay where they are, and so does the folder holding them.
    fn reset(&self, directory: &Path, report: &mut OrganizeReport) {
        let mut pending: VecDeque<PathBuf> = self.subdirectories(directory, report).into();

        while let Some(folder) = pending.pop_front() {
            let entries = match fs::read_dir(&folder) {
                Ok(entries) => entries,
                Err(e) => {
                    report.fail(&folder, format!("reset could not read folder: {e}"));
                    continue;
                }
            };

            let mut kept_hidden = false;
            for entry in entries.flatten() {
                let path = entry.path();
                let name = entry.file_name();
                if name == META_FILE {
                    if let Err(e) = fs::remove_file(&path) {
                        report.fail(&path, format!("could not remove descriptor: {e}"));
                    }
                    continue;
                }
                if name.to_string_lossy().starts_with('.') {
                    kept_hidden = true;
                    continue;
                }

                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                match move_into(&path, directory) {
                    Ok(restored) => {
                        report.restored += 1;
                        if is_dir {
                            pending.push_back(restored);
                        }
                    }
                    Err(e) => report.fail(&path, format!("reset failed: {e}")),
                }
            }

            if kept_hidden {
                tracing::debug!(
                    "[organizer] keeping {}: holds hidden entries",
                    display_name(&folder)
                );
            } else if let Err(e) = fs::remove_dir(&folder) {
                report.fail(&folder, format!("folder removal failed: {e}"));
            }
        }
    }

    /// Creates one container per configured category and writes its descriptor.
    fn provision_containers(&self, directory: &Path, report: &mut OrganizeReport) {
        for entry in self.categorizer.table().entries() {
            let container = directory.join(&entry.name);
            if let Err(e) = self.ensure_container(&container, &entry.name) {
                report.fail(&container, e);
            }
        }
    }

    fn ensure_container(&self, container: &Path, category: &str) -> OrganizeResult<()> {
        if !container.is_dir() {
            fs::create_dir_all(container).map_err(|e| OrganizeError::DirectoryCreationFailed {
                path: container.to_path_buf(),
                source: e,
            })?;
        }

        if let Some(entry) = self.categorizer.table().get(category) {
            let meta_path = container.join(META_FILE);
            let descriptor = json!({ "color": entry.color, "icon": entry.icon });
            fs::write(&meta_path, descriptor.to_string()).map_err(|e| OrganizeError::Io {
                path: meta_path.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Moves one file into its container and runs rules on the result.
    fn categorize_file(
        &self,
        directory: &Path,
        file: &Path,
        rules: &RuleSet,
    ) -> OrganizeResult<(FileOutcome, Vec<RuleError>)> {
        if !file.exists() {
            return Ok((FileOutcome::Vanished, Vec::new()));
        }
        if let Some(reason) = self.skip_reason(file) {
            tracing::debug!("[organizer] skipping {}: {reason}", display_name(file));
            return Ok((FileOutcome::Skipped { reason }, Vec::new()));
        }

        let category = self.categorizer.categorize_path(file).to_string();
        let container = directory.join(&category);
        self.ensure_container(&container, &category)?;

        let destination = move_into(file, &container).map_err(|e| OrganizeError::FileMoveFailure {
            file: file.to_path_buf(),
            destination: container.clone(),
            source: e,
        })?;
        tracing::debug!("[organizer] {} -> {category}/", display_name(file));

        let rule_errors = if rules.is_empty() {
            Vec::new()
        } else {
            self.engine
                .apply(&destination, rules)
                .failures
                .into_iter()
                .map(|(_, e)| e)
                .collect()
        };

        Ok((
            FileOutcome::Moved {
                category,
                destination,
            },
            rule_errors,
        ))
    }

    fn skip_reason(&self, file: &Path) -> Option<SkipReason> {
        let name = display_name(file);
        if file.is_dir() {
            Some(SkipReason::Directory)
        } else if name.starts_with('.') && !self.filters.includes_hidden() {
            Some(SkipReason::Hidden)
        } else if self.vault.is_encrypted(file) {
            Some(SkipReason::Encrypted)
        } else if !self.filters.should_include(file) {
            Some(SkipReason::Filtered)
        } else {
            None
        }
    }

    fn combined_rules(&self, extra: Option<&RuleSet>) -> RuleSet {
        let mut rules = self.rules.clone();
        if let Some(extra) = extra {
            rules.extend(extra);
        }
        rules
    }

    fn top_level_files(&self, directory: &Path, report: &mut OrganizeReport) -> Vec<PathBuf> {
        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) => {
                report.fail(directory, format!("could not list directory: {e}"));
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.path())
            .collect();
        files.sort();
        files
    }

    fn subdirectories(&self, directory: &Path, report: &mut OrganizeReport) -> Vec<PathBuf> {
        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) => {
                report.fail(directory, format!("could not list directory: {e}"));
                return Vec::new();
            }
        };

        entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                !name.starts_with('.') && !self.reserved_dirs.contains(&name)
            })
            .map(|entry| entry.path())
            .collect()
    }
}

/// Fails unless `directory` exists and is a directory.
pub fn validate_directory(directory: &Path) -> OrganizeResult<()> {
    if !directory.exists() {
        return Err(OrganizeError::InvalidDirectory {
            path: directory.to_path_buf(),
            reason: "does not exist".to_string(),
        });
    }
    if !directory.is_dir() {
        return Err(OrganizeError::InvalidDirectory {
            path: directory.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    Ok(())
}

/// Moves `path` into `target_dir` (created if absent) and returns the new path.
///
/// Uses a plain rename, so a move across volumes fails instead of copying. When the
/// name is taken, a timestamp suffix is added before the extension, then a counter.
pub fn move_into(path: &Path, target_dir: &Path) -> io::Result<PathBuf> {
    if !target_dir.is_dir() {
        fs::create_dir_all(target_dir)?;
    }

    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no name component")
    })?;

    let mut destination = target_dir.join(file_name);
    if destination.exists() {
        destination = generate_unique_path(&destination);
    }

    fs::rename(path, &destination)?;
    Ok(destination)
}

/// Generates a free path next to `taken` by appending a timestamp to its stem.
///
/// Example: `notes.txt` becomes `notes_20251109-143052.txt`, then
/// `notes_20251109-143052_1.txt` if that is taken too.
fn generate_unique_path(taken: &Path) -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let stem = taken
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let extension = taken
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = taken.parent().unwrap_or_else(|| Path::new("."));

    let mut candidate = parent.join(format!("{stem}_{timestamp}{extension}"));
    let mut counter = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{stem}_{timestamp}_{counter}{extension}"));
        counter += 1;
    }
    candidate
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
