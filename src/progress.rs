use crate::tracker::SyncState;
use crate::types::{EpochNumber, RestoreWatermark, Version, Waypoint};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const RESTORE_IN_PROGRESS_REASON: &str = "restore_in_progress";
pub const LAG_EXCEEDED_REASON: &str = "lag_exceeded";
pub const SEGMENT_UNAVAILABLE_REASON: &str = "segment_unavailable";
pub const PEER_UNRESPONSIVE_REASON: &str = "peer_unresponsive";
pub const VERIFICATION_FAILED_REASON: &str = "verification_failed";
pub const STORAGE_DEGRADED_REASON: &str = "storage_degraded";

/// Counters exported alongside the progress snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressCounters {
    pub segments_applied: u64,
    pub deltas_applied: u64,
    pub fetch_retries: u64,
    pub verification_failures: u64,
    pub deltas_rejected: u64,
    pub mirror_rotations: u64,
    pub peer_rotations: u64,
}

/// Point-in-time view of bootstrap progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub state: SyncState,
    pub restored_through_epoch: Option<EpochNumber>,
    pub restored_through_version: Option<Version>,
    pub archive_latest_epoch: Option<EpochNumber>,
    pub known_head_version: Option<Version>,
    pub lag: Option<u64>,
    pub waypoint: Option<Waypoint>,
    pub reasons: BTreeSet<String>,
    pub counters: ProgressCounters,
}

impl ProgressSnapshot {
    fn new() -> Self {
        Self {
            state: SyncState::Restoring,
            restored_through_epoch: None,
            restored_through_version: None,
            archive_latest_epoch: None,
            known_head_version: None,
            lag: None,
            waypoint: None,
            reasons: BTreeSet::new(),
            counters: ProgressCounters::default(),
        }
    }

    /// Ready once live with no outstanding reasons.
    pub fn is_ready(&self) -> bool {
        self.state == SyncState::Live && self.reasons.is_empty()
    }
}

/// Shared, cloneable handle to the progress snapshot.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    inner: Arc<Mutex<ProgressSnapshot>>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProgressSnapshot::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().clone()
    }

    pub fn set_state(&self, state: SyncState) {
        let mut guard = self.lock();
        guard.state = state;
        if state == SyncState::Restoring {
            guard.reasons.insert(RESTORE_IN_PROGRESS_REASON.to_string());
        } else {
            guard.reasons.remove(RESTORE_IN_PROGRESS_REASON);
        }
    }

    pub fn record_watermark(&self, watermark: &RestoreWatermark) {
        let mut guard = self.lock();
        guard.restored_through_epoch = Some(watermark.restored_through_epoch);
        guard.restored_through_version = Some(watermark.restored_through_version);
        Self::refresh_lag(&mut guard);
    }

    pub fn record_archive_tip(&self, epoch: EpochNumber) {
        self.lock().archive_latest_epoch = Some(epoch);
    }

    /// Records the latest observed head and whether the lag is above threshold.
    pub fn record_head(&self, head_version: Version, lag_threshold: u64) {
        let mut guard = self.lock();
        guard.known_head_version = Some(head_version);
        Self::refresh_lag(&mut guard);
        match guard.lag {
            Some(lag) if lag >= lag_threshold => {
                guard.reasons.insert(LAG_EXCEEDED_REASON.to_string());
            }
            _ => {
                guard.reasons.remove(LAG_EXCEEDED_REASON);
            }
        }
    }

    pub fn record_waypoint(&self, waypoint: Waypoint) {
        self.lock().waypoint = Some(waypoint);
    }

    fn refresh_lag(snapshot: &mut ProgressSnapshot) {
        snapshot.lag = match (snapshot.known_head_version, snapshot.restored_through_version) {
            (Some(head), Some(applied)) => Some(head.saturating_sub(applied)),
            (Some(head), None) => Some(head.saturating_add(1)),
            _ => None,
        };
    }

    pub fn add_reason(&self, reason: &str) {
        if !reason.trim().is_empty() {
            self.lock().reasons.insert(reason.to_string());
        }
    }

    pub fn clear_reason(&self, reason: &str) {
        self.lock().reasons.remove(reason);
    }

    pub fn segment_applied(&self) {
        self.lock().counters.segments_applied += 1;
    }

    pub fn delta_applied(&self) {
        self.lock().counters.deltas_applied += 1;
    }

    pub fn fetch_retried(&self) {
        self.lock().counters.fetch_retries += 1;
    }

    pub fn verification_failed(&self) {
        let mut guard = self.lock();
        guard.counters.verification_failures += 1;
        guard.reasons.insert(VERIFICATION_FAILED_REASON.to_string());
    }

    pub fn delta_rejected(&self) {
        self.lock().counters.deltas_rejected += 1;
    }

    pub fn mirror_rotated(&self) {
        self.lock().counters.mirror_rotations += 1;
    }

    pub fn peer_rotated(&self) {
        self.lock().counters.peer_rotations += 1;
    }

    /// Counter samples as `(metric name, value)` pairs.
    pub fn metrics(&self) -> Vec<(&'static str, u64)> {
        let guard = self.lock();
        let counters = &guard.counters;
        vec![
            ("ol_bootstrap_segments_applied_total", counters.segments_applied),
            ("ol_bootstrap_deltas_applied_total", counters.deltas_applied),
            ("ol_bootstrap_fetch_retries_total", counters.fetch_retries),
            (
                "ol_bootstrap_verification_failures_total",
                counters.verification_failures,
            ),
            ("ol_bootstrap_deltas_rejected_total", counters.deltas_rejected),
            ("ol_bootstrap_mirror_rotations_total", counters.mirror_rotations),
            ("ol_bootstrap_peer_rotations_total", counters.peer_rotations),
            ("ol_bootstrap_lag_versions", guard.lag.unwrap_or(0)),
        ]
    }
}
