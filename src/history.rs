//! Conversation turns and their JSON persistence.
//!
//! A history key is a directory. The live conversation is kept in
//! `<key>/history.json`; archived conversations sit next to it as
//! `<key>/history_<timestamp>.json`.

use crate::error::{Error, Result};
use crate::writer::write_atomic;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const HISTORY_FILE: &str = "history.json";
const ARCHIVE_PREFIX: &str = "history_";
const ARCHIVE_TIMESTAMP: &str = "%Y%m%d%H%M%S";

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Prompt sent to the model
    User,
    /// Reply produced by the model
    Model,
}

impl Role {
    /// Returns the wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who produced the message
    pub role: Role,
    /// Message text
    pub content: String,
}

impl Turn {
    /// Creates a user turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates a model turn.
    #[must_use]
    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
        }
    }
}

/// Directive applied to the history before a chat turn is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryFlag {
    /// Load the stored history and keep accumulating
    SaveChat,
    /// Load the stored history, then drop it from memory
    ReadAndClear,
    /// Load the stored history, archive it and start empty
    ReadAndStartNew,
    /// Drop the history without loading it
    Clear,
    /// Archive whatever is in memory and start empty
    StartNew,
}

impl HistoryFlag {
    /// Returns the flag's configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SaveChat => "save_chat",
            Self::ReadAndClear => "read_and_clear",
            Self::ReadAndStartNew => "read_and_start_new",
            Self::Clear => "clear",
            Self::StartNew => "start_new",
        }
    }

    /// Whether the stored history is read before the flag takes effect.
    #[must_use]
    pub const fn loads(self) -> bool {
        matches!(
            self,
            Self::SaveChat | Self::ReadAndClear | Self::ReadAndStartNew
        )
    }
}

/// JSON persistence for one history key.
///
/// The store holds no turns itself; callers own the in-memory sequence and
/// hand it in on every write.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    /// Opens the store for a history key. Nothing is touched on disk.
    #[must_use]
    pub fn open(key: impl Into<PathBuf>) -> Self {
        Self { dir: key.into() }
    }

    /// Path of the live history file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    /// Path an archive taken at `at` is written to.
    #[must_use]
    pub fn archive_path(&self, at: NaiveDateTime) -> PathBuf {
        self.dir
            .join(format!("{ARCHIVE_PREFIX}{}.json", at.format(ARCHIVE_TIMESTAMP)))
    }

    /// Reads the stored turns.
    ///
    /// A missing file yields an empty history. A file that cannot be
    /// parsed is logged and also yields an empty history.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn load(&self) -> Result<Vec<Turn>> {
        let path = self.path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let raw = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        match serde_json::from_str::<Vec<Turn>>(&raw) {
            Ok(turns) => {
                debug!("Loaded {} turns from {}", turns.len(), path.display());
                Ok(turns)
            }
            Err(e) => {
                warn!("Discarding unreadable history {}: {}", path.display(), e);
                Ok(Vec::new())
            }
        }
    }

    /// Overwrites the live file with `turns`. An empty sequence writes
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, turns: &[Turn]) -> Result<()> {
        if turns.is_empty() {
            return Ok(());
        }
        let path = self.path();
        write_json(&path, turns)?;
        debug!("Saved {} turns to {}", turns.len(), path.display());
        Ok(())
    }

    /// Writes `turns` to a timestamped sibling and removes the live file.
    ///
    /// Returns the archive path, or `None` when there was nothing to archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be written or the live file
    /// cannot be removed.
    pub fn archive(&self, turns: &[Turn], at: NaiveDateTime) -> Result<Option<PathBuf>> {
        if turns.is_empty() {
            return Ok(None);
        }
        let archive = self.archive_path(at);
        write_json(&archive, turns)?;
        self.remove_live()?;
        debug!("Archived {} turns to {}", turns.len(), archive.display());
        Ok(Some(archive))
    }

    /// Deletes the live file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<()> {
        self.remove_live()
    }

    fn remove_live(&self) -> Result<()> {
        let path = self.path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(&path, e)),
        }
    }
}

/// Append-only JSON Lines log of one-shot exchanges.
#[derive(Debug, Clone)]
pub struct DialogueLog {
    path: PathBuf,
}

impl DialogueLog {
    /// Creates a log writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Appends one exchange as a single JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if the log file cannot be opened or written.
    pub fn append(&self, exchange: &[Turn]) -> Result<()> {
        ensure_parent(&self.path)?;
        let mut line = serde_json::to_string(exchange)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| Error::io(&self.path, e))
    }
}

fn write_json(path: &Path, turns: &[Turn]) -> Result<()> {
    let json = serde_json::to_string_pretty(turns)?;
    write_atomic(path, &json)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    Ok(())
}
