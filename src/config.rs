//! JSON configuration for the bootstrap binary.

use crate::prefetch::PrefetchConfig;
use crate::retry::RetryPolicy;
use crate::source::{ArchiveSource, DirectoryArchive, HttpArchive, HttpPeer, PeerSource, SourceError};
use crate::tracker::TrackerConfig;
use crate::types::{HashValue, TargetEpoch, Waypoint};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Where an archive mirror lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArchiveEndpoint {
    Directory { path: PathBuf },
    Http { url: String },
}

impl ArchiveEndpoint {
    pub fn connect(&self, timeout: Duration) -> Result<Arc<dyn ArchiveSource>, SourceError> {
        Ok(match self {
            ArchiveEndpoint::Directory { path } => Arc::new(DirectoryArchive::new(path.clone())),
            ArchiveEndpoint::Http { url } => Arc::new(HttpArchive::new(url.clone(), timeout)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeBootstrapConfig {
    pub data_dir: PathBuf,
    /// Archive mirrors in preference order.
    #[serde(default)]
    pub archives: Vec<ArchiveEndpoint>,
    /// Peer base URLs in preference order.
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default)]
    pub target_epoch: TargetEpoch,
    /// Digest of the validator set trusted for epoch 0.
    pub genesis_validator_set_digest: HashValue,
    /// Trusted snapshot to start from instead of genesis on an empty ledger.
    #[serde(default)]
    pub snapshot: Option<Waypoint>,
    #[serde(default = "default_lag_threshold")]
    pub lag_threshold: u64,
    #[serde(default = "default_live_confirmations")]
    pub live_confirmations: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_delta_batch_limit")]
    pub delta_batch_limit: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_storage_retry")]
    pub storage_retry: RetryPolicy,
    #[serde(default)]
    pub prefetch: PrefetchConfig,
}

fn default_lag_threshold() -> u64 {
    TrackerConfig::default().lag_threshold
}

fn default_live_confirmations() -> u32 {
    TrackerConfig::default().live_confirmations
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_delta_batch_limit() -> u64 {
    500
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

fn default_storage_retry() -> RetryPolicy {
    RetryPolicy::new(3, 50, 1_000)
}

impl NodeBootstrapConfig {
    /// Minimal config with defaults for every knob.
    pub fn new(data_dir: impl Into<PathBuf>, genesis_validator_set_digest: HashValue) -> Self {
        Self {
            data_dir: data_dir.into(),
            archives: Vec::new(),
            peers: Vec::new(),
            target_epoch: TargetEpoch::Latest,
            genesis_validator_set_digest,
            snapshot: None,
            lag_threshold: default_lag_threshold(),
            live_confirmations: default_live_confirmations(),
            poll_interval_ms: default_poll_interval_ms(),
            delta_batch_limit: default_delta_batch_limit(),
            http_timeout_ms: default_http_timeout_ms(),
            retry: RetryPolicy::default(),
            storage_retry: default_storage_retry(),
            prefetch: PrefetchConfig::default(),
        }
    }

    /// Reads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir must not be empty".into()));
        }
        if self.archives.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one archive endpoint is required".into(),
            ));
        }
        for endpoint in &self.archives {
            if let ArchiveEndpoint::Http { url } = endpoint {
                if url.trim().is_empty() {
                    return Err(ConfigError::Invalid("archive url must not be empty".into()));
                }
            }
        }
        if self.peers.iter().any(|peer| peer.trim().is_empty()) {
            return Err(ConfigError::Invalid("peer url must not be empty".into()));
        }
        if self.lag_threshold == 0 {
            return Err(ConfigError::Invalid("lag_threshold must be positive".into()));
        }
        if self.live_confirmations == 0 {
            return Err(ConfigError::Invalid(
                "live_confirmations must be positive".into(),
            ));
        }
        if self.delta_batch_limit == 0 {
            return Err(ConfigError::Invalid(
                "delta_batch_limit must be positive".into(),
            ));
        }
        if self.prefetch.workers == 0 || self.prefetch.window == 0 {
            return Err(ConfigError::Invalid(
                "prefetch workers and window must be positive".into(),
            ));
        }
        for (name, policy) in [("retry", &self.retry), ("storage_retry", &self.storage_retry)] {
            if policy.max_attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}.max_attempts must be positive"
                )));
            }
            if policy.initial_backoff_ms > policy.max_backoff_ms {
                return Err(ConfigError::Invalid(format!(
                    "{name}.initial_backoff_ms exceeds max_backoff_ms"
                )));
            }
        }
        Ok(())
    }

    pub fn tracker(&self) -> TrackerConfig {
        TrackerConfig {
            lag_threshold: self.lag_threshold,
            live_confirmations: self.live_confirmations,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_archives(&self) -> Result<Vec<Arc<dyn ArchiveSource>>, SourceError> {
        self.archives
            .iter()
            .map(|endpoint| endpoint.connect(self.http_timeout()))
            .collect()
    }

    pub fn connect_peers(&self) -> Result<Vec<Arc<dyn PeerSource>>, SourceError> {
        self.peers
            .iter()
            .map(|url| {
                HttpPeer::new(url.clone(), self.http_timeout())
                    .map(|peer| Arc::new(peer) as Arc<dyn PeerSource>)
            })
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("config is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
