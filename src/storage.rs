//! Durable state written by the restore pipeline: the watermark record and
//! the staged/committed ledger units it points at.

use crate::types::{EpochNumber, HashValue, RestoreWatermark, Version};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Fixed process-wide key of the watermark record.
pub const WATERMARK_KEY: &str = "restore-watermark";
const WATERMARK_FORMAT: u32 = 1;
const STAGING_DIR: &str = "staging";
const LEDGER_DIR: &str = "ledger";

/// Storage-layer failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("watermark moved underneath us: expected {expected:?}, found {observed:?}")]
    Conflict {
        expected: Option<Version>,
        observed: Option<Version>,
    },
    #[error("persisted record is corrupt: {0}")]
    Corrupt(String),
}

impl StorageError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        StorageError::Io {
            context: context.into(),
            source,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WatermarkRecord {
    key: String,
    format: u32,
    watermark: RestoreWatermark,
}

/// Single-writer durable home of the [`RestoreWatermark`].
pub trait WatermarkStore: Send {
    fn load(&self) -> Result<Option<RestoreWatermark>, StorageError>;

    /// Atomically replaces the record, failing with `Conflict` when the
    /// persisted value is not `expected`.
    fn compare_and_swap(
        &mut self,
        expected: Option<&RestoreWatermark>,
        next: &RestoreWatermark,
    ) -> Result<(), StorageError>;
}

/// Watermark kept as a JSON file replaced via write-to-temp + rename.
#[derive(Debug, Clone)]
pub struct FileWatermarkStore {
    path: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(format!("{WATERMARK_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WatermarkStore for FileWatermarkStore {
    fn load(&self) -> Result<Option<RestoreWatermark>, StorageError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(StorageError::io(
                    format!("reading {}", self.path.display()),
                    err,
                ))
            }
        };
        let record: WatermarkRecord = serde_json::from_slice(&bytes)
            .map_err(|err| StorageError::Corrupt(format!("{}: {err}", self.path.display())))?;
        if record.key != WATERMARK_KEY || record.format != WATERMARK_FORMAT {
            return Err(StorageError::Corrupt(format!(
                "unexpected record {}@{} in {}",
                record.key,
                record.format,
                self.path.display()
            )));
        }
        Ok(Some(record.watermark))
    }

    fn compare_and_swap(
        &mut self,
        expected: Option<&RestoreWatermark>,
        next: &RestoreWatermark,
    ) -> Result<(), StorageError> {
        let observed = self.load()?;
        if observed.as_ref() != expected {
            return Err(StorageError::Conflict {
                expected: expected.map(|wm| wm.restored_through_version),
                observed: observed.map(|wm| wm.restored_through_version),
            });
        }
        let record = WatermarkRecord {
            key: WATERMARK_KEY.to_string(),
            format: WATERMARK_FORMAT,
            watermark: next.clone(),
        };
        let encoded = serde_json::to_vec_pretty(&record)
            .map_err(|err| StorageError::Corrupt(format!("encoding watermark: {err}")))?;
        replace_file(&self.path, &encoded)
    }
}

/// Writes `bytes` next to `path`, fsyncs, renames over `path`, then fsyncs the directory.
fn replace_file(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .map_err(|err| StorageError::io(format!("creating {}", dir.display()), err))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|err| StorageError::io(format!("temp file in {}", dir.display()), err))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|err| StorageError::io(format!("writing {}", path.display()), err))?;
    tmp.persist(path)
        .map_err(|err| StorageError::io(format!("renaming onto {}", path.display()), err.error))?;
    sync_dir(dir)
}

fn sync_dir(dir: &Path) -> Result<(), StorageError> {
    // Directory fsync is not supported everywhere; the rename is already atomic.
    if let Ok(handle) = File::open(dir) {
        if let Err(err) = handle.sync_all() {
            debug!(dir = %dir.display(), error = %err, "directory fsync unsupported");
        }
    }
    Ok(())
}

/// What a staged unit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagedKind {
    Segment,
    Delta,
}

/// Verified payload ready to be staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedUnit {
    pub kind: StagedKind,
    pub epoch: EpochNumber,
    pub first_version: Version,
    pub last_version: Version,
    pub hash: HashValue,
    pub payload: Vec<u8>,
}

/// Metadata stored next to a staged or committed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedMeta {
    pub kind: StagedKind,
    pub epoch: EpochNumber,
    pub first_version: Version,
    pub last_version: Version,
    pub hash: HashValue,
    pub bytes: usize,
}

impl StagedMeta {
    fn of(unit: &StagedUnit) -> Self {
        Self {
            kind: unit.kind,
            epoch: unit.epoch,
            first_version: unit.first_version,
            last_version: unit.last_version,
            hash: unit.hash,
            bytes: unit.payload.len(),
        }
    }

    fn stem(&self) -> String {
        format!("{:020}-{:020}", self.first_version, self.last_version)
    }
}

/// Handle to a staged unit, consumed by `promote` or `discard`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTicket {
    meta: StagedMeta,
}

impl StageTicket {
    pub fn meta(&self) -> &StagedMeta {
        &self.meta
    }
}

/// What recovery did with leftovers from an interrupted apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub promoted: Vec<StagedMeta>,
    pub discarded: usize,
}

/// Minimal contract the restore pipeline needs from the ledger storage engine.
pub trait LedgerStore: Send {
    /// Writes the unit to the staging area behind a durability barrier.
    fn stage(&mut self, unit: &StagedUnit) -> Result<StageTicket, StorageError>;

    /// Makes a staged unit part of the ledger and releases its staging space.
    fn promote(&mut self, ticket: StageTicket) -> Result<(), StorageError>;

    /// Drops a staged unit without touching the ledger.
    fn discard(&mut self, ticket: StageTicket) -> Result<(), StorageError>;

    /// Resolves leftovers: units covered by `watermark` are promoted, the rest discarded.
    fn recover(&mut self, watermark: Option<&RestoreWatermark>) -> Result<RecoveryReport, StorageError>;

    /// Committed units in version order.
    fn committed(&self) -> Result<Vec<StagedMeta>, StorageError>;
}

/// Ledger units stored as payload + JSON sidecar files.
#[derive(Debug, Clone)]
pub struct FileLedgerStore {
    staging: PathBuf,
    ledger: PathBuf,
}

impl FileLedgerStore {
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let staging = data_dir.as_ref().join(STAGING_DIR);
        let ledger = data_dir.as_ref().join(LEDGER_DIR);
        for dir in [&staging, &ledger] {
            fs::create_dir_all(dir)
                .map_err(|err| StorageError::io(format!("creating {}", dir.display()), err))?;
        }
        Ok(Self { staging, ledger })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    fn paths(dir: &Path, meta: &StagedMeta) -> (PathBuf, PathBuf) {
        let stem = meta.stem();
        (dir.join(format!("{stem}.bin")), dir.join(format!("{stem}.json")))
    }

    fn read_metas(dir: &Path) -> Result<(Vec<StagedMeta>, Vec<PathBuf>), StorageError> {
        let mut metas = Vec::new();
        let mut orphans = Vec::new();
        let entries = fs::read_dir(dir)
            .map_err(|err| StorageError::io(format!("listing {}", dir.display()), err))?;
        for entry in entries {
            let entry =
                entry.map_err(|err| StorageError::io(format!("listing {}", dir.display()), err))?;
            let path = entry.path();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("json") => {
                    let bytes = fs::read(&path)
                        .map_err(|err| StorageError::io(format!("reading {}", path.display()), err))?;
                    match serde_json::from_slice::<StagedMeta>(&bytes) {
                        Ok(meta) => metas.push(meta),
                        Err(_) => orphans.push(path),
                    }
                }
                Some("bin") => {
                    if !path.with_extension("json").exists() {
                        orphans.push(path);
                    }
                }
                _ => orphans.push(path),
            }
        }
        metas.sort_by_key(|meta| (meta.first_version, meta.last_version));
        Ok((metas, orphans))
    }

    fn remove_if_exists(path: &Path) -> Result<(), StorageError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::io(format!("removing {}", path.display()), err)),
        }
    }
}

impl LedgerStore for FileLedgerStore {
    fn stage(&mut self, unit: &StagedUnit) -> Result<StageTicket, StorageError> {
        let meta = StagedMeta::of(unit);
        let (payload_path, meta_path) = Self::paths(&self.staging, &meta);
        write_synced(&payload_path, &unit.payload)?;
        let encoded = serde_json::to_vec(&meta)
            .map_err(|err| StorageError::Corrupt(format!("encoding staged meta: {err}")))?;
        // The sidecar is written last; a payload without one is an incomplete stage.
        write_synced(&meta_path, &encoded)?;
        sync_dir(&self.staging)?;
        Ok(StageTicket { meta })
    }

    /// Moves payload then sidecar; re-running after a crash between the two
    /// renames finishes the move.
    fn promote(&mut self, ticket: StageTicket) -> Result<(), StorageError> {
        let (staged_payload, staged_meta) = Self::paths(&self.staging, &ticket.meta);
        let (ledger_payload, ledger_meta) = Self::paths(&self.ledger, &ticket.meta);
        move_into(&staged_payload, &ledger_payload)?;
        move_into(&staged_meta, &ledger_meta)?;
        sync_dir(&self.ledger)?;
        sync_dir(&self.staging)
    }

    fn discard(&mut self, ticket: StageTicket) -> Result<(), StorageError> {
        let (payload, meta) = Self::paths(&self.staging, &ticket.meta);
        Self::remove_if_exists(&meta)?;
        Self::remove_if_exists(&payload)?;
        sync_dir(&self.staging)
    }

    fn recover(&mut self, watermark: Option<&RestoreWatermark>) -> Result<RecoveryReport, StorageError> {
        let (metas, orphans) = Self::read_metas(&self.staging)?;
        let mut report = RecoveryReport::default();
        for path in orphans {
            Self::remove_if_exists(&path)?;
            report.discarded += 1;
        }
        let covered_through = watermark.map(|wm| wm.restored_through_version);
        for meta in metas {
            let ticket = StageTicket { meta: meta.clone() };
            if covered_through.is_some_and(|through| meta.last_version <= through) {
                info!(
                    first_version = meta.first_version,
                    last_version = meta.last_version,
                    "promoting staged unit already covered by the watermark"
                );
                self.promote(ticket)?;
                report.promoted.push(meta);
            } else {
                warn!(
                    first_version = meta.first_version,
                    last_version = meta.last_version,
                    "discarding staged unit beyond the watermark"
                );
                self.discard(ticket)?;
                report.discarded += 1;
            }
        }
        Ok(report)
    }

    fn committed(&self) -> Result<Vec<StagedMeta>, StorageError> {
        Self::read_metas(&self.ledger).map(|(metas, _)| metas)
    }
}

/// Renames `from` onto `to`. A missing `from` with `to` already present was moved earlier.
fn move_into(from: &Path, to: &Path) -> Result<(), StorageError> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound && to.exists() => {
            debug!(path = %to.display(), "already promoted");
            Ok(())
        }
        Err(err) => Err(StorageError::io(format!("promoting {}", from.display()), err)),
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let mut file = File::create(path)
        .map_err(|err| StorageError::io(format!("creating {}", path.display()), err))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|err| StorageError::io(format!("writing {}", path.display()), err))
}
