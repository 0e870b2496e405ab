//! Untrusted data sources: epoch archives and live peers.
//!
//! Both kinds sit behind [`DataSource`], a cursor-based capability, so the
//! retry and rotation logic does not care where bytes come from.

use crate::types::{ArchiveSegment, EpochNumber, LedgerDelta, Version};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File holding the archive's advertised tip and snapshot epochs.
pub const ARCHIVE_MANIFEST_FILE: &str = "manifest.json";

/// Failure surfaced by a data source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The requested item does not exist (yet) at this source.
    #[error("{source_name}: {what} not found")]
    NotFound { source_name: String, what: String },
    /// Transport or server failure; worth retrying.
    #[error("{source_name}: unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },
    /// The source answered with bytes that do not decode.
    #[error("{source_name}: malformed response: {reason}")]
    Malformed { source_name: String, reason: String },
}

impl SourceError {
    /// Missing and unavailable items are retried with backoff; malformed answers are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::NotFound { .. } | SourceError::Unavailable { .. }
        )
    }
}

/// Archive of hash-chained epoch segments.
pub trait ArchiveSource: Send + Sync {
    fn name(&self) -> &str;

    fn fetch_segment(&self, epoch: EpochNumber) -> Result<ArchiveSegment, SourceError>;

    fn latest_available_epoch(&self) -> Result<EpochNumber, SourceError>;

    /// Epochs for which the archive publishes a full state snapshot.
    fn snapshot_epochs(&self) -> Result<Vec<EpochNumber>, SourceError> {
        Ok(Vec::new())
    }
}

/// Network peer serving post-archive deltas.
pub trait PeerSource: Send + Sync {
    fn name(&self) -> &str;

    /// Deltas starting at `from_version`, in any order, at most `limit` of them.
    fn fetch_deltas(&self, from_version: Version, limit: u64) -> Result<Vec<LedgerDelta>, SourceError>;

    fn head_version(&self) -> Result<Version, SourceError>;
}

/// Source-agnostic capability: fetch the unit at a cursor, report the head cursor.
pub trait DataSource {
    type Item;

    fn source_name(&self) -> &str;

    fn fetch_next(&self, cursor: u64) -> Result<Self::Item, SourceError>;

    fn current_head(&self) -> Result<u64, SourceError>;
}

/// Epoch-cursor view of an archive.
pub struct ArchiveCursor<'a> {
    archive: &'a dyn ArchiveSource,
}

impl<'a> ArchiveCursor<'a> {
    pub fn new(archive: &'a dyn ArchiveSource) -> Self {
        Self { archive }
    }
}

impl DataSource for ArchiveCursor<'_> {
    type Item = ArchiveSegment;

    fn source_name(&self) -> &str {
        self.archive.name()
    }

    fn fetch_next(&self, cursor: u64) -> Result<ArchiveSegment, SourceError> {
        self.archive.fetch_segment(cursor)
    }

    fn current_head(&self) -> Result<u64, SourceError> {
        self.archive.latest_available_epoch()
    }
}

/// Version-cursor view of a peer.
pub struct PeerCursor<'a> {
    peer: &'a dyn PeerSource,
    batch_limit: u64,
}

impl<'a> PeerCursor<'a> {
    pub fn new(peer: &'a dyn PeerSource, batch_limit: u64) -> Self {
        Self {
            peer,
            batch_limit: batch_limit.max(1),
        }
    }
}

impl DataSource for PeerCursor<'_> {
    type Item = Vec<LedgerDelta>;

    fn source_name(&self) -> &str {
        self.peer.name()
    }

    fn fetch_next(&self, cursor: u64) -> Result<Vec<LedgerDelta>, SourceError> {
        self.peer.fetch_deltas(cursor, self.batch_limit)
    }

    fn current_head(&self) -> Result<u64, SourceError> {
        self.peer.head_version()
    }
}

/// Archive-level metadata published next to the segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub latest_epoch: Option<EpochNumber>,
    #[serde(default)]
    pub snapshot_epochs: Vec<EpochNumber>,
}

fn segment_file_name(epoch: EpochNumber) -> String {
    format!("epoch_{epoch}.json")
}

/// Archive laid out on a local filesystem (or a mounted mirror).
#[derive(Debug, Clone)]
pub struct DirectoryArchive {
    name: String,
    root: PathBuf,
}

impl DirectoryArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: format!("dir:{}", root.display()),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn unavailable(&self, err: io::Error) -> SourceError {
        SourceError::Unavailable {
            source_name: self.name.clone(),
            reason: err.to_string(),
        }
    }

    fn malformed(&self, err: serde_json::Error) -> SourceError {
        SourceError::Malformed {
            source_name: self.name.clone(),
            reason: err.to_string(),
        }
    }

    pub fn manifest(&self) -> Result<ArchiveManifest, SourceError> {
        let path = self.root.join(ARCHIVE_MANIFEST_FILE);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| self.malformed(err)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(ArchiveManifest::default()),
            Err(err) => Err(self.unavailable(err)),
        }
    }

    /// Publishes a segment and advances the manifest tip.
    pub fn write_segment(&self, segment: &ArchiveSegment) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        let encoded = serde_json::to_vec_pretty(segment)?;
        write_atomically(&self.root.join(segment_file_name(segment.epoch_number)), &encoded)?;
        let mut manifest = self.manifest().unwrap_or_default();
        manifest.latest_epoch = Some(
            manifest
                .latest_epoch
                .map_or(segment.epoch_number, |tip| tip.max(segment.epoch_number)),
        );
        self.write_manifest(&manifest)
    }

    /// Marks `epoch` as a published state snapshot.
    pub fn publish_snapshot(&self, epoch: EpochNumber) -> io::Result<()> {
        let mut manifest = self.manifest().unwrap_or_default();
        if !manifest.snapshot_epochs.contains(&epoch) {
            manifest.snapshot_epochs.push(epoch);
            manifest.snapshot_epochs.sort_unstable();
        }
        self.write_manifest(&manifest)
    }

    fn write_manifest(&self, manifest: &ArchiveManifest) -> io::Result<()> {
        let encoded = serde_json::to_vec_pretty(manifest)?;
        write_atomically(&self.root.join(ARCHIVE_MANIFEST_FILE), &encoded)
    }
}

impl ArchiveSource for DirectoryArchive {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_segment(&self, epoch: EpochNumber) -> Result<ArchiveSegment, SourceError> {
        let path = self.root.join(segment_file_name(epoch));
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound {
                    source_name: self.name.clone(),
                    what: format!("epoch {epoch}"),
                })
            }
            Err(err) => return Err(self.unavailable(err)),
        };
        serde_json::from_slice(&bytes).map_err(|err| self.malformed(err))
    }

    fn latest_available_epoch(&self) -> Result<EpochNumber, SourceError> {
        self.manifest()?
            .latest_epoch
            .ok_or_else(|| SourceError::NotFound {
                source_name: self.name.clone(),
                what: "latest epoch".to_string(),
            })
    }

    fn snapshot_epochs(&self) -> Result<Vec<EpochNumber>, SourceError> {
        Ok(self.manifest()?.snapshot_epochs)
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn http_client(source_name: &str, timeout: Duration) -> Result<Client, SourceError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| SourceError::Unavailable {
            source_name: source_name.to_string(),
            reason: format!("http client build failed: {err}"),
        })
}

fn http_get_json<T: for<'de> Deserialize<'de>>(
    client: &Client,
    source_name: &str,
    url: &str,
    what: &str,
) -> Result<T, SourceError> {
    let response = client.get(url).send().map_err(|err| SourceError::Unavailable {
        source_name: source_name.to_string(),
        reason: format!("GET {url} failed: {err}"),
    })?;
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(SourceError::NotFound {
            source_name: source_name.to_string(),
            what: what.to_string(),
        });
    }
    if !status.is_success() {
        return Err(SourceError::Unavailable {
            source_name: source_name.to_string(),
            reason: format!("GET {url} returned status {status}"),
        });
    }
    response.json().map_err(|err| SourceError::Malformed {
        source_name: source_name.to_string(),
        reason: format!("decode of {what} failed: {err}"),
    })
}

/// Archive mirror served over HTTP with the same layout as [`DirectoryArchive`].
#[derive(Debug, Clone)]
pub struct HttpArchive {
    name: String,
    base_url: String,
    client: Client,
}

impl HttpArchive {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let name = format!("http:{base_url}");
        if base_url.is_empty() {
            return Err(SourceError::Unavailable {
                source_name: name,
                reason: "archive url must not be empty".to_string(),
            });
        }
        let client = http_client(&name, timeout)?;
        Ok(Self {
            name,
            base_url,
            client,
        })
    }

    fn manifest(&self) -> Result<ArchiveManifest, SourceError> {
        let url = format!("{}/{}", self.base_url, ARCHIVE_MANIFEST_FILE);
        http_get_json(&self.client, &self.name, &url, "archive manifest")
    }
}

impl ArchiveSource for HttpArchive {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_segment(&self, epoch: EpochNumber) -> Result<ArchiveSegment, SourceError> {
        let url = format!("{}/{}", self.base_url, segment_file_name(epoch));
        http_get_json(&self.client, &self.name, &url, &format!("epoch {epoch}"))
    }

    fn latest_available_epoch(&self) -> Result<EpochNumber, SourceError> {
        self.manifest()?
            .latest_epoch
            .ok_or_else(|| SourceError::NotFound {
                source_name: self.name.clone(),
                what: "latest epoch".to_string(),
            })
    }

    fn snapshot_epochs(&self) -> Result<Vec<EpochNumber>, SourceError> {
        Ok(self.manifest()?.snapshot_epochs)
    }
}

#[derive(Debug, Deserialize)]
struct WireHead {
    version: Version,
}

#[derive(Debug, Deserialize)]
struct WireDeltas {
    deltas: Vec<LedgerDelta>,
}

/// Full-node peer exposing `/v1/head` and `/v1/deltas`.
#[derive(Debug, Clone)]
pub struct HttpPeer {
    name: String,
    base_url: String,
    client: Client,
}

impl HttpPeer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let name = format!("peer:{base_url}");
        if base_url.is_empty() {
            return Err(SourceError::Unavailable {
                source_name: name,
                reason: "peer url must not be empty".to_string(),
            });
        }
        let client = http_client(&name, timeout)?;
        Ok(Self {
            name,
            base_url,
            client,
        })
    }
}

impl PeerSource for HttpPeer {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_deltas(&self, from_version: Version, limit: u64) -> Result<Vec<LedgerDelta>, SourceError> {
        let url = format!(
            "{}/v1/deltas?from={from_version}&limit={limit}",
            self.base_url
        );
        let wire: WireDeltas = http_get_json(
            &self.client,
            &self.name,
            &url,
            &format!("deltas from {from_version}"),
        )?;
        Ok(wire.deltas)
    }

    fn head_version(&self) -> Result<Version, SourceError> {
        let url = format!("{}/v1/head", self.base_url);
        let wire: WireHead = http_get_json(&self.client, &self.name, &url, "head version")?;
        Ok(wire.version)
    }
}
