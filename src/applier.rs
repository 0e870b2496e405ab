//! Single-writer application of verified segments and live deltas.
//!
//! Every unit goes through the same staged commit: write to staging behind a
//! durability barrier, compare-and-swap the watermark, then promote. A crash
//! at any point leaves either the old or the new watermark, and recovery on
//! open reconciles staging against whichever one survived.

use crate::crypto::{verify_quorum, QuorumError};
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use crate::storage::{
    LedgerStore, RecoveryReport, StagedKind, StagedUnit, StorageError, WatermarkStore,
};
use crate::test_hooks::{CrashPoint, TestHookRegistry};
use crate::types::{
    ArchiveCheckpoint, EpochNumber, HashValue, LedgerDelta, RestoreWatermark, Version,
};
use crate::verifier::VerifiedSegment;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Rejection of a live delta by consensus validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusValidationError {
    #[error("delta at version {first_version} carries no transactions")]
    EmptyDelta { first_version: Version },
    #[error("delta starts at version {got}, expected {expected}")]
    VersionGap { expected: Version, got: Version },
    #[error("delta parent {got} does not match last verified hash {expected}")]
    ParentMismatch { expected: HashValue, got: HashValue },
    #[error("delta proof is for epoch {got}, active epoch is {expected}")]
    WrongEpoch {
        expected: EpochNumber,
        got: EpochNumber,
    },
    #[error("delta reconfiguration announces an empty validator set")]
    EmptyNextValidatorSet,
    #[error("delta proof rejected: {0}")]
    Quorum(#[from] QuorumError),
}

/// Failure while applying a unit.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("storage failure after {attempts} attempts: {source}")]
    StorageIO {
        attempts: u32,
        #[source]
        source: StorageError,
    },
    #[error("watermark conflict: expected version {expected:?}, observed {observed:?}")]
    WatermarkConflict {
        expected: Option<Version>,
        observed: Option<Version>,
    },
    #[error("epoch {got} cannot be applied, next expected epoch is {expected}")]
    OutOfOrder {
        expected: EpochNumber,
        got: EpochNumber,
    },
    #[error("segment for epoch {epoch} does not extend the watermark: {reason}")]
    Discontinuity { epoch: EpochNumber, reason: String },
    #[error("no watermark yet; deltas apply only after the archive restore")]
    NotRestored,
    #[error(transparent)]
    InvalidDelta(#[from] ConsensusValidationError),
    #[error("injected crash {point} for epoch {epoch}")]
    InjectedCrash {
        point: &'static str,
        epoch: EpochNumber,
    },
}

/// Result of a successful `apply`/`apply_delta` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The unit was committed and the watermark advanced.
    Applied(RestoreWatermark),
    /// The unit was already covered by the watermark; nothing changed.
    AlreadyApplied(RestoreWatermark),
    /// Peer deltas already applied every version of the segment; only the
    /// archive checkpoint moved.
    Anchored(RestoreWatermark),
    /// The segment starts inside versions applied from peers and ends past
    /// them; it cannot be applied whole and nothing changed.
    Overlapping(RestoreWatermark),
}

impl ApplyOutcome {
    pub fn watermark(&self) -> &RestoreWatermark {
        match self {
            ApplyOutcome::Applied(watermark)
            | ApplyOutcome::AlreadyApplied(watermark)
            | ApplyOutcome::Anchored(watermark)
            | ApplyOutcome::Overlapping(watermark) => watermark,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied(_))
    }
}

/// Validates a delta's linkage and consensus proof against the watermark.
pub fn validate_delta(
    watermark: &RestoreWatermark,
    delta: &LedgerDelta,
) -> Result<(), ConsensusValidationError> {
    if delta.transaction_count == 0 {
        return Err(ConsensusValidationError::EmptyDelta {
            first_version: delta.first_version,
        });
    }
    if delta.first_version != watermark.next_version() {
        return Err(ConsensusValidationError::VersionGap {
            expected: watermark.next_version(),
            got: delta.first_version,
        });
    }
    if delta.parent_hash != watermark.last_verified_hash {
        return Err(ConsensusValidationError::ParentMismatch {
            expected: watermark.last_verified_hash,
            got: delta.parent_hash,
        });
    }
    if delta.consensus_proof.epoch != watermark.active_epoch() {
        return Err(ConsensusValidationError::WrongEpoch {
            expected: watermark.active_epoch(),
            got: delta.consensus_proof.epoch,
        });
    }
    if matches!(&delta.consensus_proof.next_validator_set, Some(next) if next.is_empty()) {
        return Err(ConsensusValidationError::EmptyNextValidatorSet);
    }
    verify_quorum(
        &watermark.active_validator_set,
        &delta.signing_message(),
        &delta.consensus_proof.certificate,
    )?;
    Ok(())
}

/// Owns the ledger and watermark stores; the only writer of either.
pub struct StateApplier<L: LedgerStore, W: WatermarkStore> {
    ledger: L,
    watermarks: W,
    watermark: Option<RestoreWatermark>,
    storage_retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    hooks: TestHookRegistry,
    recovery: RecoveryReport,
}

impl<L: LedgerStore, W: WatermarkStore> StateApplier<L, W> {
    /// Loads the watermark and reconciles any staging left by a crash.
    pub fn open(ledger: L, watermarks: W) -> Result<Self, ApplyError> {
        Self::open_with(
            ledger,
            watermarks,
            RetryPolicy::default(),
            Arc::new(ThreadSleeper),
            TestHookRegistry::new(),
        )
    }

    pub fn open_with(
        mut ledger: L,
        watermarks: W,
        storage_retry: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
        hooks: TestHookRegistry,
    ) -> Result<Self, ApplyError> {
        let watermark = retry_storage(&storage_retry, sleeper.as_ref(), || watermarks.load())?;
        let recovery = retry_storage(&storage_retry, sleeper.as_ref(), || {
            ledger.recover(watermark.as_ref())
        })?;
        if !recovery.promoted.is_empty() || recovery.discarded > 0 {
            info!(
                promoted = recovery.promoted.len(),
                discarded = recovery.discarded,
                "reconciled staging area"
            );
        }
        Ok(Self {
            ledger,
            watermarks,
            watermark,
            storage_retry,
            sleeper,
            hooks,
            recovery,
        })
    }

    pub fn watermark(&self) -> Option<&RestoreWatermark> {
        self.watermark.as_ref()
    }

    /// What recovery did when the applier was opened.
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Applies one verified archive segment.
    ///
    /// Segments chain from the archive checkpoint, which lags the tip once
    /// live deltas were applied. A segment whose versions are all applied
    /// already only moves the checkpoint.
    pub fn apply(&mut self, verified: &VerifiedSegment) -> Result<ApplyOutcome, ApplyError> {
        let segment = verified.segment();
        let epoch = segment.epoch_number;
        match &self.watermark {
            Some(current) if epoch <= current.archive_epoch() => {
                debug!(epoch, "segment already covered by watermark");
                return Ok(ApplyOutcome::AlreadyApplied(current.clone()));
            }
            Some(current) => {
                let expected = current.archive_epoch().saturating_add(1);
                if epoch != expected {
                    return Err(ApplyError::OutOfOrder {
                        expected,
                        got: epoch,
                    });
                }
                if segment.prev_segment_hash != current.archive_hash() {
                    return Err(ApplyError::Discontinuity {
                        epoch,
                        reason: format!(
                            "segment links to {}, archive checkpoint is {}",
                            segment.prev_segment_hash,
                            current.archive_hash()
                        ),
                    });
                }
                if segment.last_version() <= current.restored_through_version {
                    let mut next = current.clone();
                    next.archive_checkpoint = Some(ArchiveCheckpoint::of(segment));
                    // The segment closes the epoch the deltas left open.
                    if epoch > current.restored_through_epoch
                        && segment.last_version() == current.restored_through_version
                    {
                        next.restored_through_epoch = epoch;
                        next.active_validator_set = segment.next_validator_set.clone();
                    }
                    self.swap_watermark(&next)?;
                    self.watermark = Some(next.clone());
                    info!(
                        epoch,
                        last_version = segment.last_version(),
                        "archive checkpoint advanced over peer-applied versions"
                    );
                    return Ok(ApplyOutcome::Anchored(next));
                }
                if segment.start_version < current.next_version() {
                    debug!(
                        epoch,
                        start_version = segment.start_version,
                        applied_through = current.restored_through_version,
                        "segment overlaps peer-applied versions"
                    );
                    return Ok(ApplyOutcome::Overlapping(current.clone()));
                }
                if segment.start_version != current.next_version() {
                    return Err(ApplyError::Discontinuity {
                        epoch,
                        reason: format!(
                            "segment starts at {}, watermark ends at {}",
                            segment.start_version, current.restored_through_version
                        ),
                    });
                }
            }
            None if !verified.from_snapshot() && epoch != 0 => {
                return Err(ApplyError::OutOfOrder {
                    expected: 0,
                    got: epoch,
                });
            }
            None => {}
        }

        let next = RestoreWatermark {
            restored_through_epoch: epoch,
            restored_through_version: segment.last_version(),
            last_verified_hash: segment.content_hash,
            active_validator_set: segment.next_validator_set.clone(),
            archive_checkpoint: Some(ArchiveCheckpoint::of(segment)),
        };
        let unit = StagedUnit {
            kind: StagedKind::Segment,
            epoch,
            first_version: segment.start_version,
            last_version: segment.last_version(),
            hash: segment.content_hash,
            payload: segment.payload.clone(),
        };
        self.commit(unit, next)
    }

    /// Applies one live delta after validating it against the watermark.
    pub fn apply_delta(&mut self, delta: &LedgerDelta) -> Result<ApplyOutcome, ApplyError> {
        let current = self.watermark.as_ref().ok_or(ApplyError::NotRestored)?;
        if delta.transaction_count > 0 && delta.last_version() <= current.restored_through_version
        {
            return Ok(ApplyOutcome::AlreadyApplied(current.clone()));
        }
        validate_delta(current, delta)?;

        let chained = delta.chained_hash();
        let next = match &delta.consensus_proof.next_validator_set {
            Some(next_set) => RestoreWatermark {
                restored_through_epoch: current.active_epoch(),
                restored_through_version: delta.last_version(),
                last_verified_hash: chained,
                active_validator_set: next_set.clone(),
                archive_checkpoint: current.archive_checkpoint.clone(),
            },
            None => RestoreWatermark {
                restored_through_epoch: current.restored_through_epoch,
                restored_through_version: delta.last_version(),
                last_verified_hash: chained,
                active_validator_set: current.active_validator_set.clone(),
                archive_checkpoint: current.archive_checkpoint.clone(),
            },
        };
        let unit = StagedUnit {
            kind: StagedKind::Delta,
            epoch: delta.consensus_proof.epoch,
            first_version: delta.first_version,
            last_version: delta.last_version(),
            hash: chained,
            payload: delta.payload.clone(),
        };
        self.commit(unit, next)
    }

    fn commit(
        &mut self,
        unit: StagedUnit,
        next: RestoreWatermark,
    ) -> Result<ApplyOutcome, ApplyError> {
        let policy = self.storage_retry.clone();
        let sleeper = Arc::clone(&self.sleeper);
        let epoch = unit.epoch;

        let ticket = retry_storage(&policy, sleeper.as_ref(), || self.ledger.stage(&unit))?;
        if self.hooks.crash_at(CrashPoint::AfterStage, epoch) {
            return Err(ApplyError::InjectedCrash {
                point: CrashPoint::AfterStage.as_str(),
                epoch,
            });
        }

        if let Err(err) = self.swap_watermark(&next) {
            if let Err(discard_err) = self.ledger.discard(ticket) {
                warn!(epoch, error = %discard_err, "failed to discard staged unit");
            }
            return Err(err);
        }
        self.watermark = Some(next.clone());
        if self.hooks.crash_at(CrashPoint::AfterWatermarkCommit, epoch) {
            return Err(ApplyError::InjectedCrash {
                point: CrashPoint::AfterWatermarkCommit.as_str(),
                epoch,
            });
        }

        retry_storage(&policy, sleeper.as_ref(), || self.ledger.promote(ticket.clone()))?;
        info!(
            epoch,
            kind = ?unit.kind,
            version = next.restored_through_version,
            hash = %next.last_verified_hash,
            "watermark advanced"
        );
        Ok(ApplyOutcome::Applied(next))
    }

    /// Compare-and-swaps the persisted watermark from the in-memory one to `next`.
    fn swap_watermark(&mut self, next: &RestoreWatermark) -> Result<(), ApplyError> {
        let policy = self.storage_retry.clone();
        let sleeper = Arc::clone(&self.sleeper);
        let expected = self.watermark.clone();
        let swapped = retry_storage(&policy, sleeper.as_ref(), || {
            self.watermarks.compare_and_swap(expected.as_ref(), next)
        });
        match swapped {
            // A retried swap may have landed before its error surfaced.
            Err(ApplyError::WatermarkConflict { .. })
                if matches!(self.watermarks.load(), Ok(Some(ref persisted)) if persisted == next) =>
            {
                Ok(())
            }
            other => other,
        }
    }
}

/// Retries transient storage I/O with backoff; conflicts and corruption surface at once.
fn retry_storage<T>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut op: impl FnMut() -> Result<T, StorageError>,
) -> Result<T, ApplyError> {
    let attempts = policy.attempts();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(StorageError::Conflict { expected, observed }) => {
                return Err(ApplyError::WatermarkConflict { expected, observed })
            }
            Err(err @ StorageError::Corrupt(_)) => {
                return Err(ApplyError::StorageIO {
                    attempts: attempt,
                    source: err,
                })
            }
            Err(err) if attempt >= attempts => {
                return Err(ApplyError::StorageIO {
                    attempts: attempt,
                    source: err,
                })
            }
            Err(err) => {
                let delay = policy.backoff(attempt);
                warn!(attempt, ?delay, error = %err, "storage write failed, retrying");
                sleeper.sleep(delay);
            }
        }
    }
}
