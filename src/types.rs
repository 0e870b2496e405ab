//! Ledger-side data model shared by the verifier, applier and tracker.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Ledger version (transaction index, inclusive positions).
pub type Version = u64;
/// Epoch number, strictly increasing along the archive chain.
pub type EpochNumber = u64;

/// 32-byte SHA-256 digest rendered as lowercase hex on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct HashValue([u8; HashValue::LENGTH]);

impl HashValue {
    pub const LENGTH: usize = 32;
    /// Predecessor hash of the genesis segment.
    pub const ZERO: HashValue = HashValue([0u8; HashValue::LENGTH]);

    pub fn new(bytes: [u8; HashValue::LENGTH]) -> Self {
        Self(bytes)
    }

    /// SHA-256 of the provided bytes.
    pub fn digest(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    pub fn as_bytes(&self) -> &[u8; HashValue::LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(raw: &str) -> Result<Self, HashParseError> {
        let bytes = hex::decode(raw.trim()).map_err(|_| HashParseError(raw.to_string()))?;
        let array: [u8; HashValue::LENGTH] = bytes
            .try_into()
            .map_err(|_| HashParseError(raw.to_string()))?;
        Ok(Self(array))
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Debug for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashValue({})", self.to_hex())
    }
}

impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for HashValue {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for HashValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for HashValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        HashValue::from_hex(&raw).map_err(D::Error::custom)
    }
}

/// Raised when a hex digest cannot be decoded into 32 bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid 32-byte hex digest: {0:?}")]
pub struct HashParseError(pub String);

/// One member of a validator set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub account: String,
    /// Hex-encoded ed25519 verifying key.
    pub public_key: String,
    pub voting_power: u64,
}

impl ValidatorInfo {
    pub fn new(account: impl Into<String>, public_key: impl Into<String>, voting_power: u64) -> Self {
        Self {
            account: account.into(),
            public_key: public_key.into(),
            voting_power,
        }
    }
}

/// Validator set governing one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ValidatorSet {
    pub validators: Vec<ValidatorInfo>,
}

impl ValidatorSet {
    pub fn new(validators: Vec<ValidatorInfo>) -> Self {
        Self { validators }
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn total_voting_power(&self) -> u128 {
        self.validators
            .iter()
            .map(|validator| u128::from(validator.voting_power))
            .sum()
    }

    /// Strictly more than two thirds of the total voting power.
    pub fn quorum_voting_power(&self) -> u128 {
        self.total_voting_power() * 2 / 3 + 1
    }

    pub fn find(&self, account: &str) -> Option<&ValidatorInfo> {
        self.validators
            .iter()
            .find(|validator| validator.account == account)
    }

    /// Canonical digest: length-prefixed account, key bytes and big-endian power per member.
    pub fn digest(&self) -> HashValue {
        let mut hasher = Sha256::new();
        hasher.update((self.validators.len() as u64).to_be_bytes());
        for validator in &self.validators {
            hasher.update((validator.account.len() as u64).to_be_bytes());
            hasher.update(validator.account.as_bytes());
            hasher.update((validator.public_key.len() as u64).to_be_bytes());
            hasher.update(validator.public_key.to_ascii_lowercase().as_bytes());
            hasher.update(validator.voting_power.to_be_bytes());
        }
        HashValue(hasher.finalize().into())
    }
}

/// Signature contributed by a single validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSignature {
    pub account: String,
    /// Hex-encoded 64-byte ed25519 signature.
    pub signature: String,
}

/// Quorum attestation over a signing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QuorumCertificate {
    pub signatures: Vec<ValidatorSignature>,
}

/// Derived epoch metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Epoch {
    pub epoch_number: EpochNumber,
    pub start_version: Version,
    /// Exclusive upper bound, unknown while the epoch is open.
    pub end_version: Option<Version>,
    pub validator_set_digest: HashValue,
}

/// One epoch's exported state as published by an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSegment {
    pub epoch_number: EpochNumber,
    pub start_version: Version,
    pub transaction_count: u64,
    pub content_hash: HashValue,
    pub prev_segment_hash: HashValue,
    pub validator_set: ValidatorSet,
    pub next_validator_set: ValidatorSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation: Option<QuorumCertificate>,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl ArchiveSegment {
    /// Last version (inclusive) covered by this segment.
    pub fn last_version(&self) -> Version {
        self.start_version
            .saturating_add(self.transaction_count)
            .saturating_sub(1)
    }

    pub fn epoch(&self) -> Epoch {
        Epoch {
            epoch_number: self.epoch_number,
            start_version: self.start_version,
            end_version: Some(self.start_version.saturating_add(self.transaction_count)),
            validator_set_digest: self.validator_set.digest(),
        }
    }

    /// Message signed by the epoch's validator set.
    pub fn signing_message(&self) -> HashValue {
        let mut hasher = Sha256::new();
        hasher.update(b"ol-bootstrap/segment");
        hasher.update(self.epoch_number.to_be_bytes());
        hasher.update(self.start_version.to_be_bytes());
        hasher.update(self.transaction_count.to_be_bytes());
        hasher.update(self.content_hash.as_bytes());
        hasher.update(self.prev_segment_hash.as_bytes());
        hasher.update(self.next_validator_set.digest().as_bytes());
        HashValue(hasher.finalize().into())
    }
}

/// Consensus evidence accompanying a live delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusProof {
    pub epoch: EpochNumber,
    pub certificate: QuorumCertificate,
    /// Present when the delta carries the reconfiguration that closes `epoch`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_validator_set: Option<ValidatorSet>,
}

/// Post-archive unit of committed transactions received from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDelta {
    pub first_version: Version,
    pub transaction_count: u64,
    pub parent_hash: HashValue,
    pub consensus_proof: ConsensusProof,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl LedgerDelta {
    /// Inclusive version range covered by the delta.
    pub fn version_range(&self) -> std::ops::RangeInclusive<Version> {
        self.first_version..=self.last_version()
    }

    pub fn last_version(&self) -> Version {
        self.first_version
            .saturating_add(self.transaction_count)
            .saturating_sub(1)
    }

    pub fn payload_hash(&self) -> HashValue {
        HashValue::digest(&self.payload)
    }

    /// Hash the delta contributes to the chain once applied.
    pub fn chained_hash(&self) -> HashValue {
        let mut hasher = Sha256::new();
        hasher.update(b"ol-bootstrap/delta");
        hasher.update(self.parent_hash.as_bytes());
        hasher.update(self.first_version.to_be_bytes());
        hasher.update(self.transaction_count.to_be_bytes());
        hasher.update(self.payload_hash().as_bytes());
        HashValue(hasher.finalize().into())
    }

    /// Message signed by the active validator set.
    pub fn signing_message(&self) -> HashValue {
        let mut hasher = Sha256::new();
        hasher.update(b"ol-bootstrap/delta-proof");
        hasher.update(self.consensus_proof.epoch.to_be_bytes());
        hasher.update(self.chained_hash().as_bytes());
        match &self.consensus_proof.next_validator_set {
            Some(next) => hasher.update(next.digest().as_bytes()),
            None => hasher.update(HashValue::ZERO.as_bytes()),
        }
        HashValue(hasher.finalize().into())
    }

    pub fn closes_epoch(&self) -> bool {
        self.consensus_proof.next_validator_set.is_some()
    }
}

/// Last archive segment the local history is anchored to.
///
/// Live deltas move `last_verified_hash` off the archive chain, so the next
/// archive segment links here instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveCheckpoint {
    pub epoch: EpochNumber,
    pub last_version: Version,
    pub content_hash: HashValue,
    pub next_validator_set_digest: HashValue,
}

impl ArchiveCheckpoint {
    pub fn of(segment: &ArchiveSegment) -> Self {
        Self {
            epoch: segment.epoch_number,
            last_version: segment.last_version(),
            content_hash: segment.content_hash,
            next_validator_set_digest: segment.next_validator_set.digest(),
        }
    }
}

/// Durable progress marker owned by the state applier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreWatermark {
    pub restored_through_epoch: EpochNumber,
    /// Last applied version, inclusive.
    pub restored_through_version: Version,
    pub last_verified_hash: HashValue,
    /// Validator set governing epoch `restored_through_epoch + 1`.
    pub active_validator_set: ValidatorSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_checkpoint: Option<ArchiveCheckpoint>,
}

impl RestoreWatermark {
    /// Last archive epoch the history is anchored to.
    pub fn archive_epoch(&self) -> EpochNumber {
        self.archive_checkpoint
            .as_ref()
            .map_or(self.restored_through_epoch, |checkpoint| checkpoint.epoch)
    }

    /// Hash the next archive segment must link to.
    pub fn archive_hash(&self) -> HashValue {
        self.archive_checkpoint
            .as_ref()
            .map_or(self.last_verified_hash, |checkpoint| checkpoint.content_hash)
    }

    pub fn next_version(&self) -> Version {
        self.restored_through_version.saturating_add(1)
    }

    /// Epoch currently open on top of the watermark.
    pub fn active_epoch(&self) -> EpochNumber {
        self.restored_through_epoch.saturating_add(1)
    }

    pub fn waypoint(&self) -> Waypoint {
        Waypoint {
            epoch: self.restored_through_epoch,
            version: self.restored_through_version,
            segment_hash: self.last_verified_hash,
            validator_set_digest: self.active_validator_set.digest(),
        }
    }
}

/// Trusted anchor for snapshot starts and consensus handoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waypoint {
    pub epoch: EpochNumber,
    pub version: Version,
    pub segment_hash: HashValue,
    pub validator_set_digest: HashValue,
}

impl fmt::Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.version, self.segment_hash)
    }
}

/// Target requested from the planner; `"latest"` or an epoch number on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetEpoch {
    #[default]
    Latest,
    Epoch(EpochNumber),
}

impl TargetEpoch {
    /// Resolves the target against the archive's advertised latest epoch.
    pub fn resolve(self, latest_available: EpochNumber) -> EpochNumber {
        match self {
            TargetEpoch::Latest => latest_available,
            TargetEpoch::Epoch(epoch) => epoch.min(latest_available),
        }
    }
}

impl Serialize for TargetEpoch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TargetEpoch::Latest => serializer.serialize_str("latest"),
            TargetEpoch::Epoch(epoch) => serializer.serialize_u64(*epoch),
        }
    }
}

impl<'de> Deserialize<'de> for TargetEpoch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(EpochNumber),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(epoch) => Ok(TargetEpoch::Epoch(epoch)),
            Raw::Text(text) if text.eq_ignore_ascii_case("latest") => Ok(TargetEpoch::Latest),
            Raw::Text(text) => text
                .parse()
                .map(TargetEpoch::Epoch)
                .map_err(|_| D::Error::custom(format!("invalid target epoch {text:?}"))),
        }
    }
}

pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(raw.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
