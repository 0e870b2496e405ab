//! Restoring → Syncing → Live decisions.
//!
//! [`next_state`] is a pure function; [`CatchUpTracker`] only remembers the
//! last position so callers can detect transitions.

use crate::types::{EpochNumber, RestoreWatermark, Version};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse node bootstrap state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Restoring,
    Syncing,
    Live,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Restoring => "restoring",
            SyncState::Syncing => "syncing",
            SyncState::Live => "live",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_lag_threshold")]
    pub lag_threshold: u64,
    #[serde(default = "default_live_confirmations")]
    pub live_confirmations: u32,
}

fn default_lag_threshold() -> u64 {
    100
}

fn default_live_confirmations() -> u32 {
    1
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            lag_threshold: default_lag_threshold(),
            live_confirmations: default_live_confirmations(),
        }
    }
}

/// Inputs for one tracker decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LagObservation {
    pub restored_through_epoch: Option<EpochNumber>,
    pub applied_version: Option<Version>,
    pub archive_latest_epoch: EpochNumber,
    pub head_version: Version,
}

impl LagObservation {
    pub fn new(
        watermark: Option<&RestoreWatermark>,
        archive_latest_epoch: EpochNumber,
        head_version: Version,
    ) -> Self {
        Self {
            restored_through_epoch: watermark.map(|wm| wm.restored_through_epoch),
            applied_version: watermark.map(|wm| wm.restored_through_version),
            archive_latest_epoch,
            head_version,
        }
    }

    /// Versions the node is behind the observed head.
    pub fn lag(&self) -> u64 {
        match self.applied_version {
            Some(applied) => self.head_version.saturating_sub(applied),
            None => self.head_version.saturating_add(1),
        }
    }

    pub fn archive_restored(&self) -> bool {
        self.restored_through_epoch
            .is_some_and(|epoch| epoch >= self.archive_latest_epoch)
    }
}

/// State plus the run of consecutive below-threshold checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerPosition {
    pub state: SyncState,
    pub confirmations: u32,
}

impl TrackerPosition {
    pub fn new(state: SyncState) -> Self {
        Self {
            state,
            confirmations: 0,
        }
    }
}

/// Pure transition function.
///
/// `Restoring` holds until the archive tip is restored and then yields
/// `Syncing`; the archive tip is not consulted again after that. `Syncing`
/// becomes `Live` after `live_confirmations` consecutive observations with
/// lag below the threshold, and `Live` falls back to `Syncing` as soon as lag
/// reaches the threshold again.
pub fn next_state(
    position: TrackerPosition,
    observation: &LagObservation,
    config: &TrackerConfig,
) -> TrackerPosition {
    let below = observation.lag() < config.lag_threshold;
    match position.state {
        SyncState::Restoring if observation.archive_restored() => {
            TrackerPosition::new(SyncState::Syncing)
        }
        SyncState::Restoring => TrackerPosition::new(SyncState::Restoring),
        SyncState::Syncing if below => {
            let confirmations = position.confirmations.saturating_add(1);
            if confirmations >= config.live_confirmations.max(1) {
                TrackerPosition {
                    state: SyncState::Live,
                    confirmations,
                }
            } else {
                TrackerPosition {
                    state: SyncState::Syncing,
                    confirmations,
                }
            }
        }
        SyncState::Syncing => TrackerPosition::new(SyncState::Syncing),
        SyncState::Live if below => position,
        SyncState::Live => TrackerPosition::new(SyncState::Syncing),
    }
}

/// Observed state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SyncState,
    pub to: SyncState,
    pub lag: u64,
}

#[derive(Debug, Clone)]
pub struct CatchUpTracker {
    config: TrackerConfig,
    position: TrackerPosition,
}

impl CatchUpTracker {
    pub fn new(initial: SyncState, config: TrackerConfig) -> Self {
        Self {
            config,
            position: TrackerPosition::new(initial),
        }
    }

    pub fn state(&self) -> SyncState {
        self.position.state
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Feeds one observation; returns the transition when the state changed.
    pub fn observe(&mut self, observation: &LagObservation) -> Option<Transition> {
        let previous = self.position.state;
        self.position = next_state(self.position, observation, &self.config);
        (self.position.state != previous).then(|| Transition {
            from: previous,
            to: self.position.state,
            lag: observation.lag(),
        })
    }
}
