//! Process logging plus the durable JSON-line bootstrap journal.

use crate::types::{EpochNumber, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Journal file written under the data directory.
pub const JOURNAL_FILE: &str = "bootstrap.jsonl";

/// Installs the global `tracing` subscriber (`RUST_LOG`, default `info`).
/// Later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size-based rotation: `bootstrap.jsonl` rolls to `bootstrap.jsonl.1`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalRotationPolicy {
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for JournalRotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 16 << 20,
            max_files: 4,
        }
    }
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub ts_ms: u64,
    pub level: LogLevel,
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<EpochNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("failed to serialize journal record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("journal i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Append-only JSON-line journal of state transitions and fatal errors.
#[derive(Debug)]
pub struct ProgressJournal {
    path: PathBuf,
    policy: JournalRotationPolicy,
    level: LogLevel,
    file: File,
    bytes_written: u64,
}

impl ProgressJournal {
    /// Opens (or creates) the journal in `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>, policy: JournalRotationPolicy) -> Result<Self, JournalError> {
        let path = data_dir.as_ref().join(JOURNAL_FILE);
        let file = open_append(&path)?;
        let bytes_written = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|source| JournalError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            policy,
            level: LogLevel::Info,
            file,
            bytes_written,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn set_level(&mut self, level: LogLevel) {
        self.level = level;
    }

    pub fn record(
        &mut self,
        level: LogLevel,
        component: &str,
        epoch: Option<EpochNumber>,
        version: Option<Version>,
        message: &str,
    ) -> Result<(), JournalError> {
        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        self.append(JournalRecord {
            ts_ms,
            level,
            component: component.to_string(),
            epoch,
            version,
            message: message.to_string(),
        })
    }

    /// Appends a prepared record, honouring the level filter and rotation.
    pub fn append(&mut self, record: JournalRecord) -> Result<(), JournalError> {
        if record.level < self.level {
            return Ok(());
        }
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        self.rotate_if_needed(line.len() as u64)?;
        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.sync_data())
            .map_err(|source| JournalError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.bytes_written = self.bytes_written.saturating_add(line.len() as u64);
        Ok(())
    }

    /// Reads the active journal file back.
    pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<JournalRecord>, JournalError> {
        let path = path.as_ref();
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(JournalError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(JournalError::from))
            .collect()
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate_if_needed(&mut self, next_line_len: u64) -> Result<(), JournalError> {
        if self.bytes_written == 0 || self.bytes_written + next_line_len <= self.policy.max_bytes {
            return Ok(());
        }
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| JournalError::Io { path, source }
        };
        if self.policy.max_files == 0 {
            fs::remove_file(&self.path).map_err(io_err(&self.path))?;
        } else {
            let oldest = self.rotated_path(self.policy.max_files);
            if oldest.exists() {
                fs::remove_file(&oldest).map_err(io_err(&oldest))?;
            }
            for index in (1..self.policy.max_files).rev() {
                let from = self.rotated_path(index);
                if from.exists() {
                    fs::rename(&from, self.rotated_path(index + 1)).map_err(io_err(&from))?;
                }
            }
            fs::rename(&self.path, self.rotated_path(1)).map_err(io_err(&self.path))?;
        }
        self.file = open_append(&self.path)?;
        self.bytes_written = 0;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File, JournalError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| JournalError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| JournalError::Io {
            path: path.to_path_buf(),
            source,
        })
}
