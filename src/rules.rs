//! Declarative condition/action rules applied after categorization.
//!
//! A rule document is a JSON array:
//!
//! ```json
//! [
//!   {
//!     "conditions": { "name_pattern": "^invoice", "extensions": [".pdf"], "min_size": 1024 },
//!     "action": { "type": "move", "destination": "Invoices" }
//!   },
//!   { "conditions": { "extensions": [".key"] }, "action": { "type": "encrypt" } },
//!   { "action": { "type": "notify", "message": "New file: {file}" } }
//! ]
//! ```
//!
//! Absent conditions always match. Every matching rule runs its action, in order.
//! Rules see the path the file had when evaluation started; once an action has moved
//! or encrypted the file, later actions fail with a stale-reference error.

use crate::file_organizer::move_into;
use crate::notification::{Notifier, deliver};
use crate::vault::{Vault, VaultError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("{} no longer exists at its expected path", .path.display())]
    StaleFileReference { path: PathBuf },

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("Invalid name pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Conditions of a rule; each present condition must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    /// Regular expression searched for anywhere in the file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_pattern: Option<String>,
    /// Accepted extensions, with or without a leading dot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
    /// Minimum size in bytes, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u64>,
    /// Maximum size in bytes, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
}

/// What a matching rule does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    /// Move into a subfolder of the file's current parent.
    Move { destination: String },
    /// Encrypt through the vault; the configured default password applies when absent.
    Encrypt {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    /// Send a notification; `{file}` in the message is replaced by the file name.
    Notify { message: String },
}

/// One rule as written in a rule document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub conditions: Conditions,
    pub action: Action,
}

/// A rule with its pattern compiled and extensions normalized.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: Rule,
    name_regex: Option<Regex>,
    extensions: Option<Vec<String>>,
}

impl CompiledRule {
    pub fn new(rule: Rule) -> Result<Self, RuleError> {
        let name_regex = rule
            .conditions
            .name_pattern
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| RuleError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;
        let extensions = rule.conditions.extensions.as_ref().map(|exts| {
            exts.iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect()
        });

        Ok(Self {
            rule,
            name_regex,
            extensions,
        })
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn action(&self) -> &Action {
        &self.rule.action
    }

    /// Checks every present condition against the file at `path`.
    ///
    /// Size conditions read metadata; a file that has disappeared is a stale reference.
    pub fn matches(&self, path: &Path) -> Result<bool, RuleError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if let Some(regex) = &self.name_regex
            && !regex.is_match(&file_name)
        {
            return Ok(false);
        }

        if let Some(extensions) = &self.extensions {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !extensions.contains(&ext) {
                return Ok(false);
            }
        }

        let conditions = &self.rule.conditions;
        if conditions.min_size.is_some() || conditions.max_size.is_some() {
            let size = file_size(path)?;
            if conditions.min_size.is_some_and(|min| size < min) {
                return Ok(false);
            }
            if conditions.max_size.is_some_and(|max| size > max) {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// An ordered list of compiled rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles rules, dropping (and logging) any whose name pattern is invalid.
    pub fn from_rules(rules: Vec<Rule>) -> Self {
        let rules = rules
            .into_iter()
            .enumerate()
            .filter_map(|(index, rule)| match CompiledRule::new(rule) {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    tracing::warn!("[rules] skipping rule #{index}: {e}");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    /// Loads a rule document. A missing, unreadable or malformed document
    /// yields an empty rule set.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("[rules] cannot read {}: {e}; no rules loaded", path.display());
                return Self::default();
            }
        };

        match serde_json::from_str::<Vec<Rule>>(&content) {
            Ok(rules) => {
                let set = Self::from_rules(rules);
                tracing::debug!("[rules] loaded {} rules from {}", set.len(), path.display());
                set
            }
            Err(e) => {
                tracing::warn!(
                    "[rules] invalid rule document {}: {e}; no rules loaded",
                    path.display()
                );
                Self::default()
            }
        }
    }

    /// Appends another rule set after this one.
    pub fn extend(&mut self, other: &RuleSet) {
        self.rules.extend(other.rules.iter().cloned());
    }

    /// The rule records, for persisting into a workspace.
    pub fn to_rules(&self) -> Vec<Rule> {
        self.rules.iter().map(|r| r.rule.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// What an executed action did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Moved(PathBuf),
    Encrypted(PathBuf),
    Notified,
}

/// Results of applying a rule set to one file.
#[derive(Debug, Default)]
pub struct RuleReport {
    /// Index of each rule that fired, with its outcome.
    pub applied: Vec<(usize, RuleOutcome)>,
    /// Index of each rule that failed, with the reason.
    pub failures: Vec<(usize, RuleError)>,
}

/// Evaluates rules against a file and executes matching actions.
pub struct RuleEngine {
    vault: Arc<Vault>,
    notifier: Arc<dyn Notifier>,
    default_password: String,
}

impl RuleEngine {
    pub fn new(
        vault: Arc<Vault>,
        notifier: Arc<dyn Notifier>,
        default_password: impl Into<String>,
    ) -> Self {
        Self {
            vault,
            notifier,
            default_password: default_password.into(),
        }
    }

    /// Applies every rule in order to the file at `file`.
    ///
    /// Failures are logged and collected; they never stop later rules from being
    /// evaluated.
    pub fn apply(&self, file: &Path, rules: &RuleSet) -> RuleReport {
        let mut report = RuleReport::default();
        let name = display_name(file);

        for (index, rule) in rules.iter().enumerate() {
            let result = rule
                .matches(file)
                .and_then(|matched| {
                    if matched {
                        self.execute(file, rule.action()).map(Some)
                    } else {
                        Ok(None)
                    }
                });

            match result {
                Ok(Some(outcome)) => {
                    tracing::debug!("[rules] rule #{index} applied to {name}: {outcome:?}");
                    report.applied.push((index, outcome));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("[rules] rule #{index} failed for {name}: {e}");
                    report.failures.push((index, e));
                }
            }
        }

        report
    }

    fn execute(&self, file: &Path, action: &Action) -> Result<RuleOutcome, RuleError> {
        if !file.is_file() {
            return Err(RuleError::StaleFileReference {
                path: file.to_path_buf(),
            });
        }

        match action {
            Action::Move { destination } => {
                let parent = file.parent().unwrap_or_else(|| Path::new("."));
                let target_dir = parent.join(destination);
                let moved = move_into(file, &target_dir).map_err(|source| RuleError::Io {
                    path: file.to_path_buf(),
                    source,
                })?;
                Ok(RuleOutcome::Moved(moved))
            }
            Action::Encrypt { password } => {
                let password = match password {
                    Some(password) => password.as_str(),
                    None => {
                        tracing::warn!(
                            "[rules] encrypting {} with the default password",
                            display_name(file)
                        );
                        self.default_password.as_str()
                    }
                };
                let encrypted = self.vault.encrypt(file, password)?;
                Ok(RuleOutcome::Encrypted(encrypted))
            }
            Action::Notify { message } => {
                let message = message.replace("{file}", &display_name(file));
                deliver(self.notifier.as_ref(), "File Action", &message);
                Ok(RuleOutcome::Notified)
            }
        }
    }
}

fn file_size(path: &Path) -> Result<u64, RuleError> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RuleError::StaleFileReference {
            path: path.to_path_buf(),
        }),
        Err(source) => Err(RuleError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotifyError;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<(String, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError> {
            self.messages
                .lock()
                .push((title.to_string(), message.to_string()));
            Ok(())
        }
    }

    fn engine(notifier: Arc<RecordingNotifier>) -> RuleEngine {
        RuleEngine::new(
            Arc::new(Vault::new().with_iterations(1_000)),
            notifier,
            "default",
        )
    }

    fn rules(json: &str) -> RuleSet {
        RuleSet::from_rules(serde_json::from_str(json).expect("valid rule document"))
    }

    #[test]
    fn test_rule_without_conditions_matches_everything() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("anything.bin");
        fs::write(&file, "x").unwrap();

        let set = rules(r#"[{ "action": { "type": "notify", "message": "saw {file}" } }]"#);
        let notifier = Arc::new(RecordingNotifier::default());
        let report = engine(notifier.clone()).apply(&file, &set);

        assert_eq!(report.applied, vec![(0, RuleOutcome::Notified)]);
        assert_eq!(
            notifier.messages.lock()[0],
            ("File Action".to_string(), "saw anything.bin".to_string())
        );
    }

    #[test]
    fn test_conditions_are_conjunctive() {
        let temp_dir = TempDir::new().unwrap();
        let invoice = temp_dir.path().join("invoice_2024.pdf");
        let small_invoice = temp_dir.path().join("invoice_small.pdf");
        let other = temp_dir.path().join("holiday.pdf");
        fs::write(&invoice, vec![0u8; 2048]).unwrap();
        fs::write(&small_invoice, vec![0u8; 10]).unwrap();
        fs::write(&other, vec![0u8; 2048]).unwrap();

        let set = rules(
            r#"[{
                "conditions": { "name_pattern": "invoice", "extensions": [".PDF"], "min_size": 1024, "max_size": 4096 },
                "action": { "type": "notify", "message": "{file}" }
            }]"#,
        );
        let rule = set.iter().next().unwrap();

        assert!(rule.matches(&invoice).unwrap());
        assert!(!rule.matches(&small_invoice).unwrap());
        assert!(!rule.matches(&other).unwrap());
    }

    #[test]
    fn test_name_pattern_is_a_search() {
        let set = rules(
            r#"[{ "conditions": { "name_pattern": "scan\\d+" }, "action": { "type": "notify", "message": "" } }]"#,
        );
        let rule = set.iter().next().unwrap();
        assert!(rule.matches(Path::new("/desk/my_scan42_final.png")).unwrap());
        assert!(!rule.matches(Path::new("/desk/scanner.png")).unwrap());
    }

    #[test]
    fn test_move_action_creates_destination() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("invoice.pdf");
        fs::write(&file, "pdf").unwrap();

        let set = rules(r#"[{ "action": { "type": "move", "destination": "Invoices" } }]"#);
        let report = engine(Arc::default()).apply(&file, &set);

        let expected = temp_dir.path().join("Invoices").join("invoice.pdf");
        assert_eq!(report.applied, vec![(0, RuleOutcome::Moved(expected.clone()))]);
        assert!(expected.exists());
        assert!(!file.exists());
    }

    #[test]
    fn test_actions_after_move_see_stale_reference() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("big.iso");
        fs::write(&file, vec![0u8; 100]).unwrap();

        let set = rules(
            r#"[
                { "action": { "type": "move", "destination": "Images" } },
                { "conditions": { "min_size": 1 }, "action": { "type": "notify", "message": "{file}" } },
                { "action": { "type": "encrypt", "password": "pw" } }
            ]"#,
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let report = engine(notifier.clone()).apply(&file, &set);

        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.failures.len(), 2);
        assert!(
            report
                .failures
                .iter()
                .all(|(_, e)| matches!(e, RuleError::StaleFileReference { .. }))
        );
        assert!(notifier.messages.lock().is_empty());
        assert!(temp_dir.path().join("Images").join("big.iso").exists());
    }

    #[test]
    fn test_encrypt_action_without_password_uses_default() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("diary.txt");
        fs::write(&file, "dear diary").unwrap();

        let vault = Arc::new(Vault::new().with_iterations(1_000));
        let engine = RuleEngine::new(
            vault.clone(),
            Arc::new(RecordingNotifier::default()),
            "fallback-pw",
        );
        let set = rules(
            r#"[{ "conditions": { "extensions": ["txt"] }, "action": { "type": "encrypt" } }]"#,
        );
        let report = engine.apply(&file, &set);

        let encrypted = temp_dir.path().join("diary.txt.enc");
        assert_eq!(report.applied, vec![(0, RuleOutcome::Encrypted(encrypted.clone()))]);
        let restored = vault.decrypt(&encrypted, "fallback-pw").unwrap();
        assert_eq!(fs::read_to_string(restored).unwrap(), "dear diary");
    }

    #[test]
    fn test_invalid_pattern_rule_is_dropped() {
        let set = rules(
            r#"[
                { "conditions": { "name_pattern": "([" }, "action": { "type": "notify", "message": "" } },
                { "action": { "type": "move", "destination": "x" } }
            ]"#,
        );
        assert_eq!(set.len(), 1);
        assert!(matches!(set.iter().next().unwrap().action(), Action::Move { .. }));
    }

    #[test]
    fn test_load_degrades_to_empty() {
        let temp_dir = TempDir::new().unwrap();
        assert!(RuleSet::load(None).is_empty());
        assert!(RuleSet::load(Some(&temp_dir.path().join("missing.json"))).is_empty());

        let broken = temp_dir.path().join("rules.json");
        fs::write(&broken, "[{ \"action\": { \"type\": \"teleport\" } }]").unwrap();
        assert!(RuleSet::load(Some(&broken)).is_empty());
    }

    #[test]
    fn test_unknown_action_type_is_rejected() {
        let parsed: Result<Rule, _> =
            serde_json::from_str(r#"{ "action": { "type": "delete" } }"#);
        assert!(parsed.is_err());
    }
}
