//! Issuance orchestration
//!
//! A request moves through consume, verify, assemble and sign. The challenge
//! is consumed before any evidence is inspected, so a replayed challenge never
//! reaches a verifier. Any failure rejects the request and no token is produced.
//!
//! Wallet instance attestations skip the challenge and evidence steps, so they
//! are only issued while platform attestation is disabled.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::{Jwk, JwkSet};
use serde_json::value::RawValue;

use crate::attestation::{AttestationPolicy, PlatformEvidence, Verdict};
use crate::challenge::{Challenge, ChallengeStore};
use crate::claims::{ClaimsAssembler, INSTANCE_TOKEN_TYPE, TOKEN_TYPE};
use crate::clock::{Clock, SystemClock};
use crate::config::WalletProviderConfiguration;
use crate::error::{AttestationError, Result, WalletProviderError};
use crate::jwk::DeviceKey;
use crate::signing::SigningKey;

/// Everything a wallet submits to obtain a token.
#[derive(Debug, Clone)]
pub struct IssuanceRequest {
    /// The challenge as handed out, base64url.
    pub challenge: String,
    pub evidence: Option<PlatformEvidence>,
    pub device_key: Jwk,
    /// Raw JSON text, embedded unchanged.
    pub wallet_metadata: Option<Box<RawValue>>,
}

/// A wallet instance attestation request: a key and optional metadata.
#[derive(Debug, Clone)]
pub struct InstanceAttestationRequest {
    pub device_key: Jwk,
    pub wallet_metadata: Option<Box<RawValue>>,
}

/// A compact JWS together with the values callers usually log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    token: String,
    subject: String,
    expires_at: DateTime<Utc>,
}

impl SignedToken {
    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn into_string(self) -> String {
        self.token
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// The wallet provider: challenge store, attestation policy and signer.
#[derive(Debug)]
pub struct WalletProvider {
    challenges: ChallengeStore,
    attestation: AttestationPolicy,
    claims: ClaimsAssembler,
    signing_key: SigningKey,
    clock: Arc<dyn Clock>,
}

impl WalletProvider {
    pub fn new(config: &WalletProviderConfiguration) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Builds the provider with an explicit time source.
    ///
    /// Fails if the signing key cannot be loaded or a trust anchor bundle is
    /// unreadable.
    pub fn with_clock(config: &WalletProviderConfiguration, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let signing_key = SigningKey::from_configuration(&config.signing_key)?;
        let attestation = AttestationPolicy::from_configuration(&config.attestation_verification)?;
        let challenges = ChallengeStore::new(
            config.challenge.length,
            config.challenge.validity,
            clock.clone(),
        )
        .with_capacity(config.challenge.capacity);

        tracing::info!(
            algorithm = %signing_key.algorithm(),
            kid = signing_key.key_id(),
            attestation_enabled = attestation.is_enabled(),
            "Wallet provider initialized"
        );

        Ok(Self {
            challenges,
            attestation,
            claims: ClaimsAssembler::new(&config.wallet_application_attestation),
            signing_key,
            clock,
        })
    }

    /// Replaces the attestation policy built from configuration.
    pub fn with_attestation_policy(mut self, policy: AttestationPolicy) -> Self {
        self.attestation = policy;
        self
    }

    pub fn request_challenge(&self) -> Result<Challenge> {
        Ok(self.challenges.issue()?)
    }

    /// Consumes the challenge, verifies the evidence and signs a token.
    pub fn verify_and_issue(&self, request: IssuanceRequest) -> Result<SignedToken> {
        let IssuanceRequest {
            challenge,
            evidence,
            device_key,
            wallet_metadata,
        } = request;

        let challenge = URL_SAFE_NO_PAD
            .decode(challenge.trim_end_matches('='))
            .map_err(|_| WalletProviderError::invalid_request("challenge is not base64url"))?;
        let key = DeviceKey::from_jwk(device_key).map_err(WalletProviderError::invalid_request)?;

        if let Err(e) = self.challenges.consume(&challenge) {
            tracing::warn!(error = %e, "Challenge rejected");
            return Err(e.into());
        }

        let now = self.clock.now();
        let verdict = self
            .attestation
            .verify(evidence.as_ref(), &challenge, &key, now)?;
        if verdict == Verdict::Bypassed {
            tracing::debug!("Attestation bypassed by configuration");
        }

        let token = self.sign_claims(TOKEN_TYPE, &key, wallet_metadata, now)?;
        tracing::info!(subject = %token.subject, "Issued wallet application attestation");
        Ok(token)
    }

    /// Signs a wallet instance attestation for the presented key.
    ///
    /// No challenge or evidence is involved, so this is refused whenever the
    /// attestation policy is enabled.
    pub fn issue_instance_attestation(&self, request: InstanceAttestationRequest) -> Result<SignedToken> {
        let InstanceAttestationRequest {
            device_key,
            wallet_metadata,
        } = request;

        let key = DeviceKey::from_jwk(device_key).map_err(WalletProviderError::invalid_request)?;
        if self.attestation.is_enabled() {
            tracing::warn!("Instance attestation refused: platform attestation is required");
            return Err(AttestationError::chain_invalid("attestation evidence is required").into());
        }

        let token = self.sign_claims(INSTANCE_TOKEN_TYPE, &key, wallet_metadata, self.clock.now())?;
        tracing::info!(subject = %token.subject, "Issued wallet instance attestation");
        Ok(token)
    }

    fn sign_claims(
        &self,
        typ: &str,
        key: &DeviceKey,
        wallet_metadata: Option<Box<RawValue>>,
        now: DateTime<Utc>,
    ) -> Result<SignedToken> {
        let claims = self.claims.assemble(key, wallet_metadata, now);
        let token = self.signing_key.sign(typ, &claims)?;
        let expires_at = DateTime::from_timestamp(claims.exp, 0).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Ok(SignedToken {
            token,
            subject: claims.sub,
            expires_at,
        })
    }

    /// Drops expired challenges. Returns how many were removed.
    pub fn purge_expired_challenges(&self) -> usize {
        self.challenges.purge_expired()
    }

    pub fn pending_challenges(&self) -> usize {
        self.challenges.len()
    }

    pub fn attestation_enabled(&self) -> bool {
        self.attestation.is_enabled()
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Public key set for token verification.
    pub fn jwks(&self) -> JwkSet {
        self.signing_key.jwks()
    }
}
