//! Named workspace configurations persisted in SQLite.
//!
//! A workspace is a snapshot of a category document and a rule list that can be
//! applied to an organize or watch run by name.

use crate::file_category::CategoryConfig;
use crate::rules::{Rule, RuleSet};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Workspace database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Workspace '{name}' holds an unreadable configuration: {source}")]
    Corrupt {
        name: String,
        source: serde_json::Error,
    },

    #[error("Failed to serialize workspace: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Workspace '{0}' not found")]
    NotFound(String),

    #[error("Workspace '{0}' already exists")]
    AlreadyExists(String),

    #[error("Cannot create workspace store at {}: {source}", .path.display())]
    Io { path: PathBuf, source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;

/// The configuration blob stored per workspace.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub categories: CategoryConfig,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl WorkspaceConfig {
    pub fn rule_set(&self) -> RuleSet {
        RuleSet::from_rules(self.rules.clone())
    }
}

/// Listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceSummary {
    pub name: String,
    pub created_at: String,
}

/// SQLite-backed workspace store.
pub struct WorkspaceStore {
    conn: Connection,
}

impl WorkspaceStore {
    /// Opens (creating if needed) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| WorkspaceError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    /// `<data_dir>/tidydesk/workspaces.db`, or `./workspaces.db` without a data dir.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .map(|dir| dir.join("tidydesk").join("workspaces.db"))
            .unwrap_or_else(|| PathBuf::from("workspaces.db"))
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS workspaces (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                config TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )?;
        Ok(Self { conn })
    }

    /// Stores a new workspace. Fails if the name is taken.
    pub fn create(&self, name: &str, config: &WorkspaceConfig) -> Result<()> {
        if self.exists(name)? {
            return Err(WorkspaceError::AlreadyExists(name.to_string()));
        }
        let blob = serde_json::to_string(config)?;
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO workspaces (name, config, created_at) VALUES (?1, ?2, ?3)",
            params![name, blob, now],
        )?;
        tracing::info!("[workspace] created '{name}'");
        Ok(())
    }

    /// Stores a workspace, replacing the configuration of an existing one.
    pub fn save(&self, name: &str, config: &WorkspaceConfig) -> Result<()> {
        let blob = serde_json::to_string(config)?;
        let changed = self.conn.execute(
            "UPDATE workspaces SET config = ?1 WHERE name = ?2",
            params![blob, name],
        )?;
        if changed == 0 {
            return self.create(name, config);
        }
        tracing::info!("[workspace] updated '{name}'");
        Ok(())
    }

    /// Returns the configuration stored under `name`, if any.
    pub fn get(&self, name: &str) -> Result<Option<WorkspaceConfig>> {
        let blob: Option<String> = self
            .conn
            .query_row(
                "SELECT config FROM workspaces WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        blob.map(|blob| {
            serde_json::from_str(&blob).map_err(|e| WorkspaceError::Corrupt {
                name: name.to_string(),
                source: e,
            })
        })
        .transpose()
    }

    /// Like [`get`](Self::get), but a missing workspace is an error.
    pub fn require(&self, name: &str) -> Result<WorkspaceConfig> {
        self.get(name)?
            .ok_or_else(|| WorkspaceError::NotFound(name.to_string()))
    }

    /// All workspaces, oldest first.
    pub fn list(&self) -> Result<Vec<WorkspaceSummary>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, created_at FROM workspaces ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(WorkspaceSummary {
                    name: row.get(0)?,
                    created_at: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Deletes a workspace. Returns false if it did not exist.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM workspaces WHERE name = ?1", params![name])?;
        if changed > 0 {
            tracing::info!("[workspace] deleted '{name}'");
        }
        Ok(changed > 0)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM workspaces WHERE name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}
