//! Producer side of the archive format: builds signed, hash-chained segments
//! and deltas from a running ledger history.

use crate::crypto::{certify, validator_set_of, ValidatorSigner};
use crate::types::{
    ArchiveSegment, ConsensusProof, EpochNumber, HashValue, LedgerDelta, ValidatorSet, Version,
    Waypoint,
};

/// Tracks the chain tip and current validator set while exporting.
#[derive(Debug, Clone)]
pub struct SegmentExporter {
    signers: Vec<ValidatorSigner>,
    next_epoch: EpochNumber,
    next_version: Version,
    prev_hash: HashValue,
}

impl SegmentExporter {
    /// Exporter for epoch 0 signed by `signers`.
    pub fn genesis(signers: Vec<ValidatorSigner>) -> Self {
        Self {
            signers,
            next_epoch: 0,
            next_version: 0,
            prev_hash: HashValue::ZERO,
        }
    }

    /// Validator set governing the next epoch to export.
    pub fn validator_set(&self) -> ValidatorSet {
        validator_set_of(&self.signers)
    }

    pub fn next_epoch(&self) -> EpochNumber {
        self.next_epoch
    }

    pub fn next_version(&self) -> Version {
        self.next_version
    }

    /// Hash the next exported unit must link to.
    pub fn tip_hash(&self) -> HashValue {
        self.prev_hash
    }

    /// Anchor describing everything exported so far. Meaningless before the first epoch closes.
    pub fn waypoint(&self) -> Waypoint {
        Waypoint {
            epoch: self.next_epoch.saturating_sub(1),
            version: self.next_version.saturating_sub(1),
            segment_hash: self.prev_hash,
            validator_set_digest: self.validator_set().digest(),
        }
    }

    /// Closes the current epoch with the same validators carrying over.
    pub fn export_segment(&mut self, payload: Vec<u8>, transaction_count: u64) -> ArchiveSegment {
        let next = self.signers.clone();
        self.export_segment_rotating(payload, transaction_count, next)
    }

    /// Closes the current epoch and hands over to `next_signers`.
    pub fn export_segment_rotating(
        &mut self,
        payload: Vec<u8>,
        transaction_count: u64,
        next_signers: Vec<ValidatorSigner>,
    ) -> ArchiveSegment {
        let mut segment = ArchiveSegment {
            epoch_number: self.next_epoch,
            start_version: self.next_version,
            transaction_count,
            content_hash: HashValue::digest(&payload),
            prev_segment_hash: self.prev_hash,
            validator_set: self.validator_set(),
            next_validator_set: validator_set_of(&next_signers),
            attestation: None,
            payload,
        };
        segment.attestation = Some(certify(&self.signers, &segment.signing_message()));
        self.next_epoch += 1;
        self.next_version = self.next_version.saturating_add(transaction_count);
        self.prev_hash = segment.content_hash;
        self.signers = next_signers;
        segment
    }

    /// Delta inside the currently open epoch.
    pub fn export_delta(&mut self, payload: Vec<u8>, transaction_count: u64) -> LedgerDelta {
        self.build_delta(payload, transaction_count, None)
    }

    /// Delta carrying the reconfiguration that closes the open epoch.
    pub fn export_closing_delta(
        &mut self,
        payload: Vec<u8>,
        transaction_count: u64,
        next_signers: Vec<ValidatorSigner>,
    ) -> LedgerDelta {
        self.build_delta(payload, transaction_count, Some(next_signers))
    }

    fn build_delta(
        &mut self,
        payload: Vec<u8>,
        transaction_count: u64,
        next_signers: Option<Vec<ValidatorSigner>>,
    ) -> LedgerDelta {
        let mut delta = LedgerDelta {
            first_version: self.next_version,
            transaction_count,
            parent_hash: self.prev_hash,
            consensus_proof: ConsensusProof {
                epoch: self.next_epoch,
                certificate: Default::default(),
                next_validator_set: next_signers.as_deref().map(validator_set_of),
            },
            payload,
        };
        delta.consensus_proof.certificate = certify(&self.signers, &delta.signing_message());
        self.next_version = self.next_version.saturating_add(transaction_count);
        self.prev_hash = delta.chained_hash();
        if let Some(next) = next_signers {
            self.next_epoch += 1;
            self.signers = next;
        }
        delta
    }
}
