use crate::types::{HashValue, QuorumCertificate, ValidatorInfo, ValidatorSet, ValidatorSignature};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::collections::BTreeSet;
use thiserror::Error;

/// Reason a quorum certificate was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuorumError {
    #[error("validator set is empty")]
    EmptyValidatorSet,
    #[error("signer {account} is not part of the validator set")]
    UnknownSigner { account: String },
    #[error("signer {account} appears more than once")]
    DuplicateSigner { account: String },
    #[error("validator {account} has a malformed public key")]
    MalformedKey { account: String },
    #[error("signature from {account} is malformed")]
    MalformedSignature { account: String },
    #[error("signature from {account} does not verify")]
    InvalidSignature { account: String },
    #[error("voting power {collected} below quorum {required}")]
    InsufficientVotingPower { collected: u128, required: u128 },
}

/// Checks that `certificate` carries valid signatures over `message` from a
/// quorum of `validators`.
pub fn verify_quorum(
    validators: &ValidatorSet,
    message: &HashValue,
    certificate: &QuorumCertificate,
) -> Result<(), QuorumError> {
    if validators.is_empty() || validators.total_voting_power() == 0 {
        return Err(QuorumError::EmptyValidatorSet);
    }
    let mut seen = BTreeSet::new();
    let mut collected: u128 = 0;
    for entry in &certificate.signatures {
        let validator =
            validators
                .find(&entry.account)
                .ok_or_else(|| QuorumError::UnknownSigner {
                    account: entry.account.clone(),
                })?;
        if !seen.insert(entry.account.as_str()) {
            return Err(QuorumError::DuplicateSigner {
                account: entry.account.clone(),
            });
        }
        let key = verifying_key(validator)?;
        let signature = decode_signature(entry)?;
        key.verify(message.as_bytes(), &signature)
            .map_err(|_| QuorumError::InvalidSignature {
                account: entry.account.clone(),
            })?;
        collected = collected.saturating_add(u128::from(validator.voting_power));
    }
    let required = validators.quorum_voting_power();
    if collected < required {
        return Err(QuorumError::InsufficientVotingPower {
            collected,
            required,
        });
    }
    Ok(())
}

fn verifying_key(validator: &ValidatorInfo) -> Result<VerifyingKey, QuorumError> {
    let malformed = || QuorumError::MalformedKey {
        account: validator.account.clone(),
    };
    let bytes = hex::decode(&validator.public_key).map_err(|_| malformed())?;
    let array: [u8; 32] = bytes.try_into().map_err(|_| malformed())?;
    VerifyingKey::from_bytes(&array).map_err(|_| malformed())
}

fn decode_signature(entry: &ValidatorSignature) -> Result<Signature, QuorumError> {
    let malformed = || QuorumError::MalformedSignature {
        account: entry.account.clone(),
    };
    let bytes = hex::decode(&entry.signature).map_err(|_| malformed())?;
    let array: [u8; 64] = bytes.try_into().map_err(|_| malformed())?;
    Ok(Signature::from_bytes(&array))
}

/// Validator identity able to sign segments and deltas.
#[derive(Debug, Clone)]
pub struct ValidatorSigner {
    account: String,
    key: SigningKey,
    voting_power: u64,
}

impl ValidatorSigner {
    pub fn new(account: impl Into<String>, key: SigningKey, voting_power: u64) -> Self {
        Self {
            account: account.into(),
            key,
            voting_power,
        }
    }

    /// Deterministic signer derived from a 32-byte seed.
    pub fn from_seed(account: impl Into<String>, seed: [u8; 32], voting_power: u64) -> Self {
        Self::new(account, SigningKey::from_bytes(&seed), voting_power)
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn info(&self) -> ValidatorInfo {
        ValidatorInfo::new(
            self.account.clone(),
            hex::encode(self.key.verifying_key().to_bytes()),
            self.voting_power,
        )
    }

    pub fn sign(&self, message: &HashValue) -> ValidatorSignature {
        ValidatorSignature {
            account: self.account.clone(),
            signature: hex::encode(self.key.sign(message.as_bytes()).to_bytes()),
        }
    }
}

/// Builds the validator set described by `signers`.
pub fn validator_set_of(signers: &[ValidatorSigner]) -> ValidatorSet {
    ValidatorSet::new(signers.iter().map(ValidatorSigner::info).collect())
}

/// Collects signatures from every signer over `message`.
pub fn certify(signers: &[ValidatorSigner], message: &HashValue) -> QuorumCertificate {
    QuorumCertificate {
        signatures: signers.iter().map(|signer| signer.sign(message)).collect(),
    }
}
