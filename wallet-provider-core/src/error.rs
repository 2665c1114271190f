//! Error taxonomy for the wallet provider
//!
//! Every failure is classified into one of a small number of kinds so that the
//! HTTP layer can map it to a status code without inspecting messages.

use std::fmt;

use thiserror::Error;

use crate::attestation::AttestationType;

/// Challenge lifecycle failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("challenge not found")]
    NotFound,

    #[error("challenge expired")]
    Expired,

    #[error("challenge already consumed")]
    AlreadyConsumed,

    #[error("secure random generator unavailable")]
    RandomnessUnavailable,

    #[error("no free challenge slot")]
    StoreFull,
}

/// A device-integrity flag that a policy can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyFlag {
    StrongBoxRequired,
    UnlockedBootloader,
    RollbackResistanceRequired,
    AttestationStatementValidity,
}

impl fmt::Display for PolicyFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StrongBoxRequired => "StrongBox required",
            Self::UnlockedBootloader => "bootloader unlocked",
            Self::RollbackResistanceRequired => "rollback resistance required",
            Self::AttestationStatementValidity => "attestation statement outside validity window",
        };
        f.write_str(name)
    }
}

/// Attestation evidence rejection reasons.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttestationError {
    /// Evidence is malformed or does not chain to a trust anchor.
    #[error("attestation chain invalid: {0}")]
    ChainInvalid(String),

    #[error("attestation certificate expired")]
    CertificateExpired,

    #[error("attestation certificate not yet valid")]
    NotYetValid,

    #[error("attested challenge does not match the issued challenge")]
    ChallengeMismatch,

    #[error("attested key does not match the presented public key")]
    KeyMismatch,

    #[error("application is not in the allow-list")]
    ApplicationNotAllowed,

    #[error("attestation policy violated: {0}")]
    PolicyViolation(PolicyFlag),

    #[error("attestation security level not accepted: {0}")]
    SecurityLevelNotAccepted(AttestationType),
}

impl AttestationError {
    pub fn chain_invalid(reason: impl Into<String>) -> Self {
        Self::ChainInvalid(reason.into())
    }
}

/// Token issuance failures. Both are server-side faults.
#[derive(Error, Debug)]
pub enum IssuanceError {
    #[error("signing key unavailable: {0}")]
    SigningKeyUnavailable(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// Configuration rejected at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("challenge length must be between {min} and {max} bytes, got {actual}")]
    InvalidChallengeLength { actual: usize, min: usize, max: usize },

    #[error("challenge capacity must be positive")]
    ZeroChallengeCapacity,

    #[error("{0} must be a positive duration")]
    NonPositiveDuration(&'static str),

    #[error("{0} must not be blank")]
    Blank(&'static str),

    #[error("application {0} has no signing certificate digests")]
    EmptyDigestSet(String),

    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid trust anchor: {0}")]
    InvalidTrustAnchor(String),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level error returned by [`crate::WalletProvider`].
#[derive(Error, Debug)]
pub enum WalletProviderError {
    /// The request itself is malformed (bad encoding, unusable key).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    #[error(transparent)]
    Attestation(#[from] AttestationError),

    #[error(transparent)]
    Issuance(#[from] IssuanceError),

    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

impl WalletProviderError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Stable machine-readable code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Challenge(e) => match e {
                ChallengeError::NotFound => "CHALLENGE_NOT_FOUND",
                ChallengeError::Expired => "CHALLENGE_EXPIRED",
                ChallengeError::AlreadyConsumed => "CHALLENGE_ALREADY_CONSUMED",
                ChallengeError::RandomnessUnavailable => "RANDOMNESS_UNAVAILABLE",
                ChallengeError::StoreFull => "CHALLENGE_STORE_FULL",
            },
            Self::Attestation(e) => match e {
                AttestationError::ChainInvalid(_) => "ATTESTATION_CHAIN_INVALID",
                AttestationError::CertificateExpired => "ATTESTATION_CERTIFICATE_EXPIRED",
                AttestationError::NotYetValid => "ATTESTATION_CERTIFICATE_NOT_YET_VALID",
                AttestationError::ChallengeMismatch => "ATTESTATION_CHALLENGE_MISMATCH",
                AttestationError::KeyMismatch => "ATTESTATION_KEY_MISMATCH",
                AttestationError::ApplicationNotAllowed => "APPLICATION_NOT_ALLOWED",
                AttestationError::PolicyViolation(_) => "ATTESTATION_POLICY_VIOLATION",
                AttestationError::SecurityLevelNotAccepted(_) => "SECURITY_LEVEL_NOT_ACCEPTED",
            },
            Self::Issuance(e) => match e {
                IssuanceError::SigningKeyUnavailable(_) => "SIGNING_KEY_UNAVAILABLE",
                IssuanceError::SigningFailed(_) => "SIGNING_FAILED",
            },
            Self::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, WalletProviderError>;
