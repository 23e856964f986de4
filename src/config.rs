//! Application configuration and file filtering.
//!
//! Settings are loaded from a TOML file and cover:
//! - File filtering (hidden files, exact names, globs, extensions, regex, whitelist)
//! - Where the organizer finds its category table and rule document
//! - File monitor tuning (quiet interval, ledger size, event queue size)
//! - Vault tuning (key derivation cost, default rule password, key store file)
//! - Log levels
//!
//! # Configuration File Format
//!
//! ```toml
//! [filters]
//! enable_hidden_files = false
//!
//! [filters.exclude]
//! filenames = ["desktop.ini", "Thumbs.db"]
//! patterns = ["*.part", "*.crdownload"]
//! extensions = ["tmp"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//!
//! [organizer]
//! categories = "~/.config/tidydesk/categories.json"
//! rules = "~/.config/tidydesk/rules.json"
//!
//! [monitor]
//! quiet_interval_secs = 5
//!
//! [vault]
//! iterations = 600000
//!
//! [logging]
//! default = "warn"
//! ```

use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the per-directory configuration file.
pub const LOCAL_CONFIG_FILE: &str = ".tidydeskrc.toml";

/// Errors that can occur while loading configuration.
///
/// Every variant is fatal to whatever was being constructed from the configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// Invalid TOML/JSON syntax or structure.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    /// Invalid glob pattern provided.
    #[error("Invalid glob pattern '{0}': expected a file name pattern such as *.part")]
    InvalidGlobPattern(String),
    /// Invalid regex pattern provided with the actual error reason.
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern {
        /// The regex pattern that failed to compile.
        pattern: String,
        /// The reason why the pattern is invalid.
        reason: String,
    },
    /// IO error while reading configuration.
    #[error("IO error reading configuration: {0}")]
    IoError(String),
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub filters: FilterRules,
    #[serde(default)]
    pub organizer: OrganizerSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub vault: VaultSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Root-level filter rules configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRules {
    /// Whether to include hidden files (starting with "."). Defaults to false.
    #[serde(default = "default_enable_hidden_files")]
    pub enable_hidden_files: bool,

    /// Rules for excluding files.
    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Rules for including files (whitelist, overrides exclude rules).
    #[serde(default)]
    pub include: IncludeRules,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            enable_hidden_files: default_enable_hidden_files(),
            exclude: ExcludeRules::default(),
            include: IncludeRules::default(),
        }
    }
}

fn default_enable_hidden_files() -> bool {
    false
}

/// Rules for excluding files from organization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// Exact filenames to exclude (e.g., "desktop.ini", "Thumbs.db").
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns to exclude (e.g., "*.part").
    #[serde(default)]
    pub patterns: Vec<String>,

    /// File extensions to exclude (e.g., "tmp", "crdownload").
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Regex patterns to exclude, matched against the file name.
    #[serde(default)]
    pub regex: Vec<String>,
}

/// Rules for including files, overriding exclude rules (whitelist).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeRules {
    /// Glob patterns that override exclude rules.
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Where the organizer reads its tables from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizerSettings {
    /// Category table document (JSON). Built-in tables are used when absent.
    #[serde(default)]
    pub categories: Option<PathBuf>,
    /// Rule document (JSON). No rules when absent.
    #[serde(default)]
    pub rules: Option<PathBuf>,
    /// Subdirectory names the reset phase never touches.
    #[serde(default = "default_reserved_dirs")]
    pub reserved_dirs: Vec<String>,
}

impl Default for OrganizerSettings {
    fn default() -> Self {
        Self {
            categories: None,
            rules: None,
            reserved_dirs: default_reserved_dirs(),
        }
    }
}

fn default_reserved_dirs() -> Vec<String> {
    vec![
        "System Volume Information".to_string(),
        "$RECYCLE.BIN".to_string(),
    ]
}

/// File monitor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Events for the same file name closer together than this are dropped.
    #[serde(default = "default_quiet_interval_secs")]
    pub quiet_interval_secs: u64,
    /// Maximum number of file names remembered by the debounce ledger.
    #[serde(default = "default_ledger_capacity")]
    pub ledger_capacity: usize,
    /// Capacity of the queue between the watcher and the handling thread.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl MonitorSettings {
    pub fn quiet_interval(&self) -> Duration {
        Duration::from_secs(self.quiet_interval_secs)
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            quiet_interval_secs: default_quiet_interval_secs(),
            ledger_capacity: default_ledger_capacity(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_quiet_interval_secs() -> u64 {
    5
}

fn default_ledger_capacity() -> usize {
    1024
}

fn default_queue_capacity() -> usize {
    256
}

/// Vault tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSettings {
    /// PBKDF2 iteration count.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Password used by `encrypt` rules that do not name one.
    #[serde(default = "default_password")]
    pub default_password: String,
    /// Key store file. Keys live in memory only when absent.
    #[serde(default)]
    pub keystore: Option<PathBuf>,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            default_password: default_password(),
            keystore: None,
        }
    }
}

fn default_iterations() -> u32 {
    600_000
}

fn default_password() -> String {
    "default".to_string()
}

/// Log levels: a default plus per-module overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub default: String,
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl AppConfig {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.tidydeskrc.toml` in the current directory
    /// 3. Look for `tidydesk/config.toml` in the user's config directory
    /// 4. Fall back to default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is explicitly provided but cannot be read,
    /// or if a discovered file is invalid.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("tidydesk").join("config.toml");
            if user_config.exists() {
                return Self::load_from_file(&user_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Compile the filter section into matchers.
    ///
    /// # Errors
    ///
    /// Returns an error if any regex or glob patterns are invalid.
    pub fn compile_filters(&self) -> Result<CompiledFilters, ConfigError> {
        CompiledFilters::new(self.filters.clone())
    }
}

/// Compiled filter structures for matching top-level files.
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

impl CompiledFilters {
    /// Create compiled filters from filter rules.
    ///
    /// # Errors
    ///
    /// Returns an error if any glob or regex patterns are invalid.
    pub fn new(rules: FilterRules) -> Result<Self, ConfigError> {
        let exclude_patterns = compile_globs(&rules.exclude.patterns)?;
        let include_patterns = compile_globs(&rules.include.patterns)?;

        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: rules.exclude.filenames.into_iter().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns,
            exclude_regexes,
            include_patterns,
        })
    }

    /// Whether hidden files are organized like any other file.
    pub fn includes_hidden(&self) -> bool {
        self.enable_hidden_files
    }

    /// Check if a file should be organized (not excluded).
    ///
    /// Checks are performed in this order, with early termination:
    /// 1. Include patterns (whitelist) - if matched, always include
    /// 2. Hidden file filter - if hidden and disabled, exclude
    /// 3. Exact filename match - if matched, exclude
    /// 4. File extension match - if matched, exclude
    /// 5. Glob pattern match against the file name - if matched, exclude
    /// 6. Regex pattern match - if matched, exclude
    /// 7. Default: include
    pub fn should_include(&self, file_path: &Path) -> bool {
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if self.include_patterns.iter().any(|p| p.matches(&file_name)) {
            return true;
        }

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name.as_ref()) {
            return false;
        }

        if let Some(ext) = file_path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            if self.exclude_extensions.contains(&ext_lower) {
                return false;
            }
        }

        if self.exclude_patterns.iter().any(|p| p.matches(&file_name)) {
            return false;
        }

        !self
            .exclude_regexes
            .iter()
            .any(|regex| regex.is_match(&file_name))
    }
}

impl Default for CompiledFilters {
    fn default() -> Self {
        Self {
            enable_hidden_files: false,
            exclude_filenames: HashSet::new(),
            exclude_extensions: HashSet::new(),
            exclude_patterns: Vec::new(),
            exclude_regexes: Vec::new(),
            include_patterns: Vec::new(),
        }
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters_with(exclude: ExcludeRules, include: IncludeRules) -> CompiledFilters {
        CompiledFilters::new(FilterRules {
            enable_hidden_files: true,
            exclude,
            include,
        })
        .unwrap()
    }

    #[test]
    fn test_default_config_values() {
        let config = AppConfig::default();
        assert!(!config.filters.enable_hidden_files);
        assert_eq!(config.monitor.quiet_interval(), Duration::from_secs(5));
        assert_eq!(config.monitor.ledger_capacity, 1024);
        assert_eq!(config.vault.iterations, 600_000);
        assert_eq!(config.logging.default, "warn");
        assert!(
            config
                .organizer
                .reserved_dirs
                .contains(&"System Volume Information".to_string())
        );
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [monitor]
            quiet_interval_secs = 2

            [organizer]
            rules = "rules.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.monitor.quiet_interval_secs, 2);
        assert_eq!(config.monitor.queue_capacity, 256);
        assert_eq!(config.organizer.rules, Some(PathBuf::from("rules.json")));
        assert!(config.organizer.categories.is_none());
    }

    #[test]
    fn test_load_explicit_missing_file_is_error() {
        let result = AppConfig::load(Some(Path::new("/non/existent/config.toml")));
        assert!(matches!(result, Err(ConfigError::ConfigNotFound(_))));
    }

    #[test]
    fn test_load_invalid_toml_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[monitor\nquiet_interval_secs = ").unwrap();

        let result = AppConfig::load(Some(&path));
        assert!(matches!(result, Err(ConfigError::ConfigInvalid(_))));
    }

    #[test]
    fn test_hidden_file_excluded_by_default() {
        let compiled = AppConfig::default().compile_filters().unwrap();

        assert!(!compiled.should_include(Path::new(".DS_Store")));
        assert!(!compiled.should_include(Path::new("/desk/.hidden")));
        assert!(compiled.should_include(Path::new("/desk/notes.txt")));
    }

    #[test]
    fn test_exclude_exact_filename() {
        let compiled = filters_with(
            ExcludeRules {
                filenames: vec!["Thumbs.db".to_string(), "desktop.ini".to_string()],
                ..Default::default()
            },
            IncludeRules::default(),
        );

        assert!(!compiled.should_include(Path::new("/desk/Thumbs.db")));
        assert!(compiled.should_include(Path::new("/desk/image.jpg")));
    }

    #[test]
    fn test_exclude_extensions() {
        let compiled = filters_with(
            ExcludeRules {
                extensions: vec![".part".to_string(), "tmp".to_string()],
                ..Default::default()
            },
            IncludeRules::default(),
        );

        assert!(!compiled.should_include(Path::new("movie.part")));
        assert!(!compiled.should_include(Path::new("file.TMP")));
        assert!(compiled.should_include(Path::new("file.txt")));
    }

    #[test]
    fn test_exclude_glob_patterns() {
        let compiled = filters_with(
            ExcludeRules {
                patterns: vec!["*.crdownload".to_string(), "[0-9]*.log".to_string()],
                ..Default::default()
            },
            IncludeRules::default(),
        );

        assert!(!compiled.should_include(Path::new("/desk/setup.exe.crdownload")));
        assert!(!compiled.should_include(Path::new("/desk/99debug.log")));
        assert!(compiled.should_include(Path::new("/desk/debug.log")));
    }

    #[test]
    fn test_include_overrides_exclude() {
        let compiled = CompiledFilters::new(FilterRules {
            enable_hidden_files: false,
            exclude: ExcludeRules::default(),
            include: IncludeRules {
                patterns: vec![".important".to_string()],
            },
        })
        .unwrap();

        assert!(compiled.should_include(Path::new(".important")));
        assert!(!compiled.should_include(Path::new(".other")));
    }

    #[test]
    fn test_exclude_regex() {
        let compiled = filters_with(
            ExcludeRules {
                regex: vec![r"^~\$.*\.docx$".to_string()],
                ..Default::default()
            },
            IncludeRules::default(),
        );

        assert!(!compiled.should_include(Path::new("~$report.docx")));
        assert!(compiled.should_include(Path::new("report.docx")));
    }

    #[test]
    fn test_invalid_patterns_return_error() {
        let bad_regex = CompiledFilters::new(FilterRules {
            exclude: ExcludeRules {
                regex: vec!["[invalid(".to_string()],
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(matches!(
            bad_regex,
            Err(ConfigError::InvalidRegexPattern { .. })
        ));

        let bad_glob = CompiledFilters::new(FilterRules {
            exclude: ExcludeRules {
                patterns: vec!["[invalid".to_string()],
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(matches!(bad_glob, Err(ConfigError::InvalidGlobPattern(_))));
        let message = bad_glob.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("file name pattern"));
        assert!(!message.contains('/'));
    }
}
