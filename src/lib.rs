//! tidydesk - keeps a desktop (or any directory) sorted into category folders
//!
//! The library sorts files into category containers by extension and executable
//! name, applies user rules (move, encrypt, notify) after sorting, gates encrypted
//! files out of sorting, and watches directories to sort new files as they arrive.
//! Named workspaces and a scheduler round out the command line front end.

pub mod cli;
pub mod config;
pub mod debounce;
pub mod file_category;
pub mod file_organizer;
pub mod logging;
pub mod monitor;
pub mod notification;
pub mod output;
pub mod rules;
pub mod scheduler;
pub mod vault;
pub mod workspace;

pub use config::{AppConfig, CompiledFilters, ConfigError};
pub use file_category::{CategoryConfig, Categorizer, categorize};
pub use file_organizer::{FileOutcome, OrganizeError, OrganizeReport, Organizer};
pub use monitor::{FileMonitor, FileProcessor};
pub use notification::Notifier;
pub use rules::{Action, Rule, RuleEngine, RuleSet};
pub use vault::{Vault, VaultError};
pub use workspace::{WorkspaceConfig, WorkspaceStore};

pub use cli::{Cli, run};
