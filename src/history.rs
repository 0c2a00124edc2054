//! Recently extracted codes, newest first.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A code extracted from one message.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeEntry {
    /// The one-time passcode, 4 to 8 digits.
    pub code: String,
    /// Sender display name from the `From` header.
    pub sender: String,
    /// Resolved provider label.
    pub provider: String,
    /// When the code was extracted.
    pub timestamp: DateTime<Utc>,
    /// Mailbox-assigned message id.
    pub message_id: String,
}

impl std::fmt::Debug for CodeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeEntry")
            .field("code", &"******")
            .field("sender", &self.sender)
            .field("provider", &self.provider)
            .field("timestamp", &self.timestamp)
            .field("message_id", &self.message_id)
            .finish()
    }
}

impl CodeEntry {
    fn same_code(&self, message_id: &str, code: &str) -> bool {
        self.message_id == message_id && self.code == code
    }
}

/// Bounded, most-recent-first list of [`CodeEntry`].
#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<CodeEntry>,
    capacity: usize,
}

impl History {
    /// Creates an empty history holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity.max(1) + 1),
            capacity: capacity.max(1),
        }
    }

    /// Creates a history seeded from previously saved entries.
    #[must_use]
    pub fn with_entries(capacity: usize, entries: Vec<CodeEntry>) -> Self {
        let mut history = Self::new(capacity);
        history.entries = entries;
        history.entries.truncate(history.capacity);
        history
    }

    /// Returns `true` if an entry for this `(message_id, code)` pair is held.
    #[must_use]
    pub fn contains(&self, message_id: &str, code: &str) -> bool {
        self.entries.iter().any(|e| e.same_code(message_id, code))
    }

    /// Prepends `entry` unless its `(message_id, code)` pair is already held.
    ///
    /// Returns `true` if the entry was added. The oldest entries are dropped once
    /// the list exceeds its capacity.
    pub fn record(&mut self, entry: CodeEntry) -> bool {
        if self.contains(&entry.message_id, &entry.code) {
            return false;
        }
        self.entries.insert(0, entry);
        self.entries.truncate(self.capacity);
        true
    }

    /// Entries, newest first.
    #[must_use]
    pub fn entries(&self) -> &[CodeEntry] {
        &self.entries
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Maximum number of entries kept.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// JSON file the history is saved to between runs.
#[derive(Debug, Clone)]
pub struct HistoryFile {
    path: PathBuf,
}

impl HistoryFile {
    /// Creates a handle for `path`. Nothing is read or written yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads saved entries. A missing file yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::History`] if the file cannot be read and
    /// [`Error::Decode`] if its contents are not a valid entry list.
    pub async fn load(&self) -> Result<Vec<CodeEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(Error::History { source }),
        };
        let entries: Vec<CodeEntry> =
            serde_json::from_str(&content).map_err(|e| Error::Decode {
                what: "history file",
                message: e.to_string(),
            })?;
        debug!(path = %self.path.display(), count = entries.len(), "Loaded history");
        Ok(entries)
    }

    /// Loads saved entries, logging and discarding any failure.
    pub async fn load_or_empty(&self) -> Vec<CodeEntry> {
        match self.load().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable history file");
                Vec::new()
            }
        }
    }

    /// Writes `entries`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::History`] if the file cannot be written.
    pub async fn save(&self, entries: &[CodeEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| Error::History { source })?;
        }
        let json = serde_json::to_string_pretty(entries).map_err(|e| Error::Decode {
            what: "history entries",
            message: e.to_string(),
        })?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|source| Error::History { source })
    }

    /// Deletes the file. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::History`] if the file exists but cannot be removed.
    pub async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::History { source }),
        }
    }
}
