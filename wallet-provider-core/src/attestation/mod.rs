//! Device attestation
//!
//! Evidence arrives tagged with its platform and is dispatched to the matching
//! verifier. When verification is disabled in configuration every request is
//! accepted without looking at the evidence. That mode exists for development
//! environments only and nothing in code prevents it from being deployed.

pub mod android;
pub mod ios;
pub mod x509;

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::to_delta;
use crate::config::AttestationVerificationConfiguration;
use crate::error::{AttestationError, ConfigError};
use crate::jwk::DeviceKey;

pub use android::AndroidVerifier;
pub use ios::IosVerifier;
pub use x509::TrustAnchor;

/// How much of an Android attestation is backed by secure hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttestationType {
    /// Key and attestation both produced in a TEE or StrongBox.
    Hardware,
    /// Key in secure hardware, attestation signed in software (Android 7).
    Nougat,
    Software,
}

impl fmt::Display for AttestationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hardware => "hardware",
            Self::Nougat => "nougat",
            Self::Software => "software",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Android,
    Ios,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Android => "android",
            Self::Ios => "ios",
        })
    }
}

/// Attestation evidence as submitted by a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "snake_case")]
pub enum PlatformEvidence {
    /// Key attestation certificate chain, leaf first, each entry base64 DER.
    Android { certificate_chain: Vec<String> },
    /// Base64 CBOR App Attest object and the base64 key identifier.
    Ios { attestation: String, key_id: String },
}

impl PlatformEvidence {
    pub fn platform(&self) -> Platform {
        match self {
            Self::Android { .. } => Platform::Android,
            Self::Ios { .. } => Platform::Ios,
        }
    }
}

/// Outcome of a successful policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Verification is disabled; the evidence was not inspected.
    Bypassed,
    Verified(Platform),
}

/// The configured attestation policy, ready to verify evidence.
#[derive(Debug)]
pub enum AttestationPolicy {
    Disabled,
    Enabled {
        android: AndroidVerifier,
        ios: IosVerifier,
    },
}

impl AttestationPolicy {
    /// Builds the verifiers, loading trust anchors from disk where configured.
    pub fn from_configuration(
        config: &AttestationVerificationConfiguration,
    ) -> Result<Self, ConfigError> {
        match config {
            AttestationVerificationConfiguration::Disabled => {
                tracing::warn!(
                    "Attestation verification is DISABLED, any evidence will be accepted"
                );
                Ok(Self::Disabled)
            }
            AttestationVerificationConfiguration::Enabled(enabled) => {
                let skew = enabled.verification_time_skew;
                Ok(Self::Enabled {
                    android: AndroidVerifier::new(&enabled.android, skew)?,
                    ios: IosVerifier::new(&enabled.ios, skew)?,
                })
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    /// Checks `evidence` against the policy at time `now`.
    ///
    /// `challenge` must already have been consumed by the caller.
    pub fn verify(
        &self,
        evidence: Option<&PlatformEvidence>,
        challenge: &[u8],
        key: &DeviceKey,
        now: DateTime<Utc>,
    ) -> Result<Verdict, AttestationError> {
        let (android, ios) = match self {
            Self::Disabled => return Ok(Verdict::Bypassed),
            Self::Enabled { android, ios } => (android, ios),
        };
        let evidence = evidence
            .ok_or_else(|| AttestationError::chain_invalid("attestation evidence is required"))?;

        let platform = evidence.platform();
        let result = match evidence {
            PlatformEvidence::Android { certificate_chain } => {
                android.verify(certificate_chain, challenge, key, now)
            }
            PlatformEvidence::Ios {
                attestation,
                key_id,
            } => ios.verify(attestation, key_id, challenge, key, now),
        };

        match &result {
            Ok(()) => tracing::info!(%platform, "Attestation verified"),
            Err(e) => tracing::warn!(%platform, error = %e, "Attestation rejected"),
        }
        result.map(|()| Verdict::Verified(platform))
    }
}

/// The larger of the shared and the platform-specific skew.
pub(crate) fn effective_skew(global: Duration, platform: Duration) -> TimeDelta {
    to_delta(global.max(platform))
}

/// Decodes standard or URL-safe base64, padded or not.
pub(crate) fn decode_base64(value: &str, what: &str) -> Result<Vec<u8>, AttestationError> {
    let value = value.trim();
    STANDARD
        .decode(value)
        .or_else(|_| STANDARD_NO_PAD.decode(value))
        .or_else(|_| URL_SAFE_NO_PAD.decode(value))
        .or_else(|_| URL_SAFE.decode(value))
        .map_err(|_| AttestationError::chain_invalid(format!("{what} is not valid base64")))
}

/// Trust anchors from a configured PEM file, or the built-in bundle.
pub(crate) fn load_trust_anchors(
    path: Option<&std::path::Path>,
    builtin: &[u8],
) -> Result<Vec<TrustAnchor>, ConfigError> {
    match path {
        Some(path) => {
            let pem = std::fs::read(path)?;
            let anchors = TrustAnchor::from_pem_bundle(&pem)?;
            tracing::info!(path = %path.display(), count = anchors.len(), "Loaded trust anchors");
            Ok(anchors)
        }
        None => TrustAnchor::from_pem_bundle(builtin),
    }
}
