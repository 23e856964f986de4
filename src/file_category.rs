//! File categorization system for sorting files into category containers.
//!
//! This module maps a file name and extension to a category label using an ordered
//! category table (category → extensions) and an ordered executable table
//! (category → name patterns). Both tables are loaded once, normally from a JSON
//! document, and are immutable afterwards.
//!
//! # Examples
//!
//! ```
//! use tidydesk::file_category::CategoryConfig;
//!
//! let categorizer = CategoryConfig::default().compile();
//! assert_eq!(categorizer.categorize("report.pdf", Some("pdf")), "Documents");
//! assert_eq!(categorizer.categorize("steam.exe", Some("exe")), "Game_Launchers");
//! assert_eq!(categorizer.categorize("random.xyz", Some("xyz")), "Others");
//! ```

use crate::config::ConfigError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Catch-all category for files no table entry claims.
pub const DEFAULT_FALLBACK: &str = "Others";

/// Category for executables no executable rule claims.
pub const DEFAULT_EXECUTABLE_FALLBACK: &str = "Executables";

const EXECUTABLE_EXTENSION: &str = "exe";

/// Display metadata and recognized extensions for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    /// Extensions claimed by this category, with or without a leading dot.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Container color shown by front ends.
    #[serde(default = "default_color")]
    pub color: String,
    /// Container icon shown by front ends.
    #[serde(default = "default_icon")]
    pub icon: String,
}

fn default_color() -> String {
    "#9e9e9e".to_string()
}

fn default_icon() -> String {
    "folder".to_string()
}

fn default_fallback() -> String {
    DEFAULT_FALLBACK.to_string()
}

fn default_executable_fallback() -> String {
    DEFAULT_EXECUTABLE_FALLBACK.to_string()
}

/// The category document as it is stored on disk or in a workspace.
///
/// ```json
/// {
///   "categories": {
///     "Documents": { "extensions": [".pdf", ".txt"], "color": "#2196f3", "icon": "file-text" }
///   },
///   "executable_rules": { "Game_Launchers": ["steam", "epic"] },
///   "fallback": "Others",
///   "executable_fallback": "Executables"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub categories: IndexMap<String, CategorySpec>,
    #[serde(default)]
    pub executable_rules: IndexMap<String, Vec<String>>,
    #[serde(default = "default_fallback")]
    pub fallback: String,
    #[serde(default = "default_executable_fallback")]
    pub executable_fallback: String,
}

impl CategoryConfig {
    /// Loads a category document from a JSON file.
    ///
    /// # Errors
    ///
    /// Any failure here is a configuration load failure: the file is missing,
    /// unreadable, or not a valid category document.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Loads from `path` when given, otherwise returns the built-in tables.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Normalizes the tables into a [`Categorizer`], logging every ambiguous claim.
    pub fn compile(self) -> Categorizer {
        let table = CategoryTable::new(
            self.categories
                .into_iter()
                .map(|(name, spec)| CategoryEntry::new(name, spec))
                .collect(),
            self.fallback,
        );
        let executable_rules = ExecutableRules::new(
            self.executable_rules.into_iter().collect(),
            self.executable_fallback,
        );

        let categorizer = Categorizer {
            table,
            executable_rules,
        };
        for ambiguity in categorizer.ambiguities() {
            tracing::warn!(
                "[config] '{}' is claimed by both '{}' and '{}'; '{}' wins",
                ambiguity.key,
                ambiguity.first,
                ambiguity.second,
                ambiguity.first
            );
        }
        categorizer
    }
}

impl Default for CategoryConfig {
    fn default() -> Self {
        let mut categories = IndexMap::new();
        let mut add = |name: &str, extensions: &[&str], color: &str, icon: &str| {
            categories.insert(
                name.to_string(),
                CategorySpec {
                    extensions: extensions.iter().map(|e| e.to_string()).collect(),
                    color: color.to_string(),
                    icon: icon.to_string(),
                },
            );
        };

        add(
            "Documents",
            &[
                ".pdf", ".doc", ".docx", ".txt", ".xls", ".xlsx", ".ppt", ".pptx", ".odt", ".md",
                ".rtf", ".csv",
            ],
            "#2196f3",
            "file-text",
        );
        add(
            "Pictures",
            &[".jpg", ".jpeg", ".png", ".gif", ".bmp", ".svg", ".tiff", ".webp", ".heic"],
            "#4caf50",
            "image",
        );
        add(
            "Videos",
            &[".mp4", ".mkv", ".mov", ".avi", ".flv", ".wmv", ".webm"],
            "#f44336",
            "film",
        );
        add(
            "Music",
            &[".mp3", ".wav", ".aac", ".flac", ".ogg", ".m4a", ".wma"],
            "#9c27b0",
            "music",
        );
        add("Programs", &[".msi", ".bat", ".sh", ".cmd", ".lnk"], "#ff9800", "terminal");
        add(
            "Compressed",
            &[".zip", ".rar", ".tar", ".gz", ".7z", ".bz2", ".xz"],
            "#795548",
            "archive",
        );
        add(DEFAULT_FALLBACK, &[], "#9e9e9e", "folder");

        let mut executable_rules = IndexMap::new();
        executable_rules.insert(
            "Game_Launchers".to_string(),
            ["steam", "epic", "origin", "battle.net", "uplay", "gog", "riot"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        );
        executable_rules.insert(
            "Browsers".to_string(),
            ["chrome", "firefox", "edge", "opera", "brave"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        );
        executable_rules.insert(
            "Installers".to_string(),
            ["setup", "install", "update"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        );

        Self {
            categories,
            executable_rules,
            fallback: default_fallback(),
            executable_fallback: default_executable_fallback(),
        }
    }
}

/// One row of the category table with its extensions normalized.
#[derive(Debug, Clone)]
pub struct CategoryEntry {
    pub name: String,
    pub color: String,
    pub icon: String,
    extensions: Vec<String>,
    extension_set: HashSet<String>,
}

impl CategoryEntry {
    fn new(name: String, spec: CategorySpec) -> Self {
        let extensions: Vec<String> = spec
            .extensions
            .iter()
            .map(|ext| normalize_extension(ext))
            .filter(|ext| !ext.is_empty())
            .collect();
        Self {
            name,
            color: spec.color,
            icon: spec.icon,
            extension_set: extensions.iter().cloned().collect(),
            extensions,
        }
    }

    /// Returns true if this category claims the (already normalized) extension.
    pub fn claims(&self, extension: &str) -> bool {
        self.extension_set.contains(extension)
    }
}

/// Ordered mapping from category name to its extensions and display metadata.
#[derive(Debug, Clone)]
pub struct CategoryTable {
    entries: Vec<CategoryEntry>,
    fallback: String,
}

impl CategoryTable {
    fn new(entries: Vec<CategoryEntry>, fallback: String) -> Self {
        Self { entries, fallback }
    }

    /// Category entries in table order.
    pub fn entries(&self) -> &[CategoryEntry] {
        &self.entries
    }

    /// Looks up an entry by category name.
    pub fn get(&self, name: &str) -> Option<&CategoryEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Name of the catch-all category.
    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Returns true if `name` is a category this table would provision.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Ordered mapping from category name to substring patterns for executable stems.
#[derive(Debug, Clone)]
pub struct ExecutableRules {
    entries: Vec<(String, Vec<String>)>,
    fallback: String,
}

impl ExecutableRules {
    fn new(entries: Vec<(String, Vec<String>)>, fallback: String) -> Self {
        let entries = entries
            .into_iter()
            .map(|(name, patterns)| {
                let patterns = patterns
                    .into_iter()
                    .map(|p| p.to_lowercase())
                    .filter(|p| !p.is_empty())
                    .collect();
                (name, patterns)
            })
            .collect();
        Self { entries, fallback }
    }

    /// Name of the category for unmatched executables.
    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// First category whose patterns occur in the lowercased stem.
    fn match_stem(&self, stem: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| stem.contains(p.as_str())))
            .map(|(name, _)| name.as_str())
    }
}

/// An extension or pattern claimed by more than one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ambiguity {
    pub key: String,
    /// The category that wins (earlier in table order).
    pub first: String,
    pub second: String,
}

/// Strips a leading dot and lowercases an extension.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}

/// Determines the category label for a file.
///
/// Executables (`.exe`, any case) are matched by lowercased stem against the
/// executable rules; everything else is matched by extension against the category
/// table. Table order decides ties; unmatched files get the respective fallback.
pub fn categorize<'a>(
    file_name: &str,
    extension: Option<&str>,
    table: &'a CategoryTable,
    executable_rules: &'a ExecutableRules,
) -> &'a str {
    let extension = extension.map(normalize_extension).unwrap_or_default();

    if extension == EXECUTABLE_EXTENSION {
        let stem = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        return executable_rules
            .match_stem(&stem)
            .unwrap_or(executable_rules.fallback());
    }

    if !extension.is_empty()
        && let Some(entry) = table.entries.iter().find(|entry| entry.claims(&extension))
    {
        return &entry.name;
    }

    table.fallback()
}

/// The compiled category and executable tables.
#[derive(Debug, Clone)]
pub struct Categorizer {
    table: CategoryTable,
    executable_rules: ExecutableRules,
}

impl Categorizer {
    pub fn table(&self) -> &CategoryTable {
        &self.table
    }

    pub fn executable_rules(&self) -> &ExecutableRules {
        &self.executable_rules
    }

    /// Categorizes by file name and extension. See [`categorize`].
    pub fn categorize(&self, file_name: &str, extension: Option<&str>) -> &str {
        categorize(file_name, extension, &self.table, &self.executable_rules)
    }

    /// Categorizes a path by its final component.
    pub fn categorize_path(&self, path: &Path) -> &str {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = path.extension().map(|e| e.to_string_lossy().to_string());
        self.categorize(&file_name, extension.as_deref())
    }

    /// Every extension or executable pattern claimed by two categories.
    pub fn ambiguities(&self) -> Vec<Ambiguity> {
        let mut found = Vec::new();

        let mut owners: HashMap<&str, &str> = HashMap::new();
        for entry in &self.table.entries {
            for ext in &entry.extensions {
                match owners.get(ext.as_str()) {
                    Some(first) if *first != entry.name => found.push(Ambiguity {
                        key: ext.clone(),
                        first: first.to_string(),
                        second: entry.name.clone(),
                    }),
                    Some(_) => {}
                    None => {
                        owners.insert(ext.as_str(), entry.name.as_str());
                    }
                }
            }
        }

        let mut pattern_owners: HashMap<&str, &str> = HashMap::new();
        for (name, patterns) in &self.executable_rules.entries {
            for pattern in patterns {
                match pattern_owners.get(pattern.as_str()) {
                    Some(first) if *first != name.as_str() => found.push(Ambiguity {
                        key: pattern.clone(),
                        first: first.to_string(),
                        second: name.clone(),
                    }),
                    Some(_) => {}
                    None => {
                        pattern_owners.insert(pattern.as_str(), name.as_str());
                    }
                }
            }
        }

        found
    }
}

impl Default for Categorizer {
    fn default() -> Self {
        CategoryConfig::default().compile()
    }
}
