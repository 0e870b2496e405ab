//! Integrity, linkage and attestation checks for archive segments.
//!
//! Segments arrive over an untrusted channel. Nothing reaches the state
//! applier unless it is wrapped in a [`VerifiedSegment`], which only this
//! module can construct.

use crate::crypto::{verify_quorum, QuorumError};
use crate::types::{ArchiveSegment, EpochNumber, HashValue, RestoreWatermark, Version, Waypoint};
use thiserror::Error;
use tracing::debug;

/// Rejection raised while verifying an archive segment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// Segment does not link to the last verified checkpoint.
    #[error("epoch {epoch} does not extend the verified chain: {reason}")]
    ChainMismatch { epoch: EpochNumber, reason: String },
    /// Attestation missing or not backed by the trusted validator set.
    #[error("epoch {epoch} is not attested by the trusted validator set: {reason}")]
    UntrustedSegment { epoch: EpochNumber, reason: String },
    /// Payload does not match its advertised digest.
    #[error("epoch {epoch} payload is corrupt: {reason}")]
    CorruptPayload { epoch: EpochNumber, reason: String },
}

impl VerificationError {
    pub fn epoch(&self) -> EpochNumber {
        match self {
            VerificationError::ChainMismatch { epoch, .. }
            | VerificationError::UntrustedSegment { epoch, .. }
            | VerificationError::CorruptPayload { epoch, .. } => *epoch,
        }
    }

    /// Short label used by logs and progress reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            VerificationError::ChainMismatch { .. } => "chain_mismatch",
            VerificationError::UntrustedSegment { .. } => "untrusted_segment",
            VerificationError::CorruptPayload { .. } => "corrupt_payload",
        }
    }
}

/// Predecessor state a segment must extend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainAnchor {
    pub expected_epoch: EpochNumber,
    pub expected_prev_hash: HashValue,
    pub expected_start_version: Version,
    pub validator_set_digest: HashValue,
}

impl ChainAnchor {
    /// Anchor for epoch 0, trusted through the configured genesis validator digest.
    pub fn genesis(validator_set_digest: HashValue) -> Self {
        Self {
            expected_epoch: 0,
            expected_prev_hash: HashValue::ZERO,
            expected_start_version: 0,
            validator_set_digest,
        }
    }

    /// Anchor for the archive epoch after the watermark's archive checkpoint.
    ///
    /// Without a checkpoint the watermark tip itself is the anchor.
    pub fn from_watermark(watermark: &RestoreWatermark) -> Self {
        match &watermark.archive_checkpoint {
            Some(checkpoint) => Self {
                expected_epoch: checkpoint.epoch.saturating_add(1),
                expected_prev_hash: checkpoint.content_hash,
                expected_start_version: checkpoint.last_version.saturating_add(1),
                validator_set_digest: checkpoint.next_validator_set_digest,
            },
            None => Self {
                expected_epoch: watermark.active_epoch(),
                expected_prev_hash: watermark.last_verified_hash,
                expected_start_version: watermark.next_version(),
                validator_set_digest: watermark.active_validator_set.digest(),
            },
        }
    }

    /// Anchor for the epoch immediately after `segment`.
    pub fn after(segment: &ArchiveSegment) -> Self {
        Self {
            expected_epoch: segment.epoch_number.saturating_add(1),
            expected_prev_hash: segment.content_hash,
            expected_start_version: segment.start_version.saturating_add(segment.transaction_count),
            validator_set_digest: segment.next_validator_set.digest(),
        }
    }
}

/// Segment that passed every check; the only input the applier accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSegment {
    segment: ArchiveSegment,
    from_snapshot: bool,
}

impl VerifiedSegment {
    pub fn segment(&self) -> &ArchiveSegment {
        &self.segment
    }

    pub fn epoch_number(&self) -> EpochNumber {
        self.segment.epoch_number
    }

    /// True when trust came from a configured waypoint rather than chain linkage.
    pub fn from_snapshot(&self) -> bool {
        self.from_snapshot
    }

    pub fn into_segment(self) -> ArchiveSegment {
        self.segment
    }
}

/// Stateless verifier; callers own the retry policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestVerifier;

impl ManifestVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Verifies integrity, chain continuity and the validator attestation, in that order.
    pub fn verify(
        &self,
        segment: ArchiveSegment,
        anchor: &ChainAnchor,
    ) -> Result<VerifiedSegment, VerificationError> {
        self.check_integrity(&segment)?;
        self.check_linkage(&segment, anchor)?;
        self.check_attestation(&segment, &anchor.validator_set_digest)?;
        debug!(
            epoch = segment.epoch_number,
            hash = %segment.content_hash,
            "segment verified"
        );
        Ok(VerifiedSegment {
            segment,
            from_snapshot: false,
        })
    }

    /// Verifies a snapshot segment against a trusted waypoint instead of a predecessor.
    pub fn verify_snapshot(
        &self,
        segment: ArchiveSegment,
        waypoint: &Waypoint,
    ) -> Result<VerifiedSegment, VerificationError> {
        self.check_integrity(&segment)?;
        let epoch = segment.epoch_number;
        if epoch != waypoint.epoch {
            return Err(VerificationError::ChainMismatch {
                epoch,
                reason: format!("waypoint is pinned to epoch {}", waypoint.epoch),
            });
        }
        if segment.content_hash != waypoint.segment_hash {
            return Err(VerificationError::ChainMismatch {
                epoch,
                reason: format!(
                    "content hash {} differs from waypoint {}",
                    segment.content_hash, waypoint.segment_hash
                ),
            });
        }
        if segment.last_version() != waypoint.version {
            return Err(VerificationError::ChainMismatch {
                epoch,
                reason: format!(
                    "segment ends at version {} but waypoint is at {}",
                    segment.last_version(),
                    waypoint.version
                ),
            });
        }
        let next_digest = segment.next_validator_set.digest();
        if next_digest != waypoint.validator_set_digest {
            return Err(VerificationError::ChainMismatch {
                epoch,
                reason: format!(
                    "next validator set {next_digest} differs from waypoint {}",
                    waypoint.validator_set_digest
                ),
            });
        }
        // The waypoint pins payload, range and successor set; the segment's own
        // set must still certify it.
        self.check_attestation(&segment, &segment.validator_set.digest())?;
        Ok(VerifiedSegment {
            segment,
            from_snapshot: true,
        })
    }

    fn check_integrity(&self, segment: &ArchiveSegment) -> Result<(), VerificationError> {
        let epoch = segment.epoch_number;
        let recomputed = HashValue::digest(&segment.payload);
        if recomputed != segment.content_hash {
            return Err(VerificationError::CorruptPayload {
                epoch,
                reason: format!(
                    "payload digest {recomputed} does not match advertised {}",
                    segment.content_hash
                ),
            });
        }
        if segment.transaction_count == 0 {
            return Err(VerificationError::CorruptPayload {
                epoch,
                reason: "segment carries no transactions".to_string(),
            });
        }
        if segment.next_validator_set.is_empty() {
            return Err(VerificationError::CorruptPayload {
                epoch,
                reason: "segment does not reveal the next validator set".to_string(),
            });
        }
        Ok(())
    }

    fn check_linkage(
        &self,
        segment: &ArchiveSegment,
        anchor: &ChainAnchor,
    ) -> Result<(), VerificationError> {
        let epoch = segment.epoch_number;
        if epoch != anchor.expected_epoch {
            return Err(VerificationError::ChainMismatch {
                epoch,
                reason: format!("expected epoch {}", anchor.expected_epoch),
            });
        }
        if segment.prev_segment_hash != anchor.expected_prev_hash {
            return Err(VerificationError::ChainMismatch {
                epoch,
                reason: format!(
                    "prev_segment_hash {} != verified {}",
                    segment.prev_segment_hash, anchor.expected_prev_hash
                ),
            });
        }
        if segment.start_version != anchor.expected_start_version {
            return Err(VerificationError::ChainMismatch {
                epoch,
                reason: format!(
                    "start_version {} != expected {}",
                    segment.start_version, anchor.expected_start_version
                ),
            });
        }
        Ok(())
    }

    fn check_attestation(
        &self,
        segment: &ArchiveSegment,
        trusted_digest: &HashValue,
    ) -> Result<(), VerificationError> {
        let epoch = segment.epoch_number;
        let untrusted = |reason: String| VerificationError::UntrustedSegment { epoch, reason };
        let digest = segment.validator_set.digest();
        if digest != *trusted_digest {
            return Err(untrusted(format!(
                "validator set digest {digest} is not the trusted {trusted_digest}"
            )));
        }
        let certificate = segment
            .attestation
            .as_ref()
            .ok_or_else(|| untrusted("attestation missing".to_string()))?;
        verify_quorum(&segment.validator_set, &segment.signing_message(), certificate)
            .map_err(|err: QuorumError| untrusted(err.to_string()))
    }
}
