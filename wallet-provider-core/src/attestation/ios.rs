//! iOS App Attest
//!
//! An attestation object is CBOR with the WebAuthn layout: a format string,
//! an `x5c` certificate chain and the authenticator data. See
//! <https://developer.apple.com/documentation/devicecheck/validating-apps-that-connect-to-your-server>.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use ciborium::Value;
use ring::digest::{digest, SHA256};
use x509_parser::der_parser::error::BerError;
use x509_parser::der_parser::parse_der;

use super::x509::{
    check_validity, find_extension, parse_certificate, verify_chain, TrustAnchor,
    MAX_CHAIN_LENGTH,
};
use super::{decode_base64, effective_skew, load_trust_anchors};
use crate::config::{AppAttestEnvironment, IosAttestationConfiguration};
use crate::error::{AttestationError, ConfigError};
use crate::jwk::DeviceKey;

const APPLE_ROOTS: &[u8] = include_bytes!("../../resources/apple-app-attestation-root.pem");

pub const NONCE_EXTENSION_OID: &str = "1.2.840.113635.100.8.2";

/// Maximum decoded size of an attestation object.
pub const MAX_ATTESTATION_SIZE: usize = 64 * 1024;

const FORMAT: &str = "apple-appattest";

const AAGUID_DEVELOPMENT: &[u8; 16] = b"appattestdevelop";
const AAGUID_PRODUCTION: &[u8; 16] = b"appattest\0\0\0\0\0\0\0";

/// rpIdHash, flags, counter, AAGUID and the credential id length.
const AUTH_DATA_HEADER_LEN: usize = 55;

impl AppAttestEnvironment {
    pub fn aaguid(self) -> &'static [u8; 16] {
        match self {
            Self::Production => AAGUID_PRODUCTION,
            Self::Development => AAGUID_DEVELOPMENT,
        }
    }
}

/// Decoded attestation object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationObject {
    pub certificates: Vec<Vec<u8>>,
    pub auth_data: Vec<u8>,
}

impl AttestationObject {
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, AttestationError> {
        let value: Value = ciborium::from_reader(bytes).map_err(|e| {
            AttestationError::chain_invalid(format!("attestation object is not CBOR: {e}"))
        })?;
        let entries = value
            .as_map()
            .ok_or_else(|| AttestationError::chain_invalid("attestation object is not a map"))?;

        let format = map_get(entries, "fmt").and_then(Value::as_text);
        if format != Some(FORMAT) {
            return Err(AttestationError::chain_invalid(format!(
                "unexpected attestation format {format:?}"
            )));
        }

        let certificates = map_get(entries, "attStmt")
            .and_then(Value::as_map)
            .and_then(|statement| map_get(statement, "x5c"))
            .and_then(Value::as_array)
            .ok_or_else(|| AttestationError::chain_invalid("missing attStmt.x5c"))?
            .iter()
            .map(|cert| {
                cert.as_bytes()
                    .cloned()
                    .ok_or_else(|| AttestationError::chain_invalid("x5c entry is not a byte string"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let auth_data = map_get(entries, "authData")
            .and_then(Value::as_bytes)
            .cloned()
            .ok_or_else(|| AttestationError::chain_invalid("missing authData"))?;

        Ok(Self {
            certificates,
            auth_data,
        })
    }
}

fn map_get<'a>(entries: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    entries
        .iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

/// Fixed-layout view of WebAuthn authenticator data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatorData<'a> {
    pub rp_id_hash: &'a [u8],
    pub counter: u32,
    pub aaguid: &'a [u8],
    pub credential_id: &'a [u8],
}

impl<'a> AuthenticatorData<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, AttestationError> {
        if bytes.len() < AUTH_DATA_HEADER_LEN {
            return Err(AttestationError::chain_invalid(format!(
                "authenticator data has {} bytes, at least {AUTH_DATA_HEADER_LEN} required",
                bytes.len()
            )));
        }
        let counter = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);
        let credential_len = usize::from(u16::from_be_bytes([bytes[53], bytes[54]]));
        let credential_id = bytes
            .get(AUTH_DATA_HEADER_LEN..AUTH_DATA_HEADER_LEN + credential_len)
            .ok_or_else(|| AttestationError::chain_invalid("credential id exceeds authenticator data"))?;
        Ok(Self {
            rp_id_hash: &bytes[..32],
            counter,
            aaguid: &bytes[37..53],
            credential_id,
        })
    }
}

/// Reads the nonce from the credential certificate extension,
/// `SEQUENCE { [1] EXPLICIT OCTET STRING }`.
fn extension_nonce(value: &[u8]) -> Result<Vec<u8>, BerError> {
    let (_, sequence) = parse_der(value)?;
    let tagged = sequence
        .as_sequence()?
        .first()
        .ok_or(BerError::InvalidLength)?;
    let (_, octets) = parse_der(tagged.as_slice()?)?;
    Ok(octets.as_slice()?.to_vec())
}

#[derive(Debug)]
struct AllowedApp {
    app_id: String,
    rp_id_hash: Vec<u8>,
    environment: AppAttestEnvironment,
}

/// Verifies App Attest objects against the configured apps.
#[derive(Debug)]
pub struct IosVerifier {
    applications: Vec<AllowedApp>,
    statement_skew: TimeDelta,
    trust_anchors: Vec<TrustAnchor>,
}

impl IosVerifier {
    pub fn new(
        config: &IosAttestationConfiguration,
        global_skew: Duration,
    ) -> Result<Self, ConfigError> {
        let applications = config
            .applications
            .iter()
            .map(|app| {
                let app_id = app.app_id();
                AllowedApp {
                    rp_id_hash: digest(&SHA256, app_id.as_bytes()).as_ref().to_vec(),
                    app_id,
                    environment: app.environment,
                }
            })
            .collect();
        Ok(Self {
            applications,
            statement_skew: effective_skew(global_skew, config.attestation_statement_validity_skew),
            trust_anchors: load_trust_anchors(config.trust_anchors.as_deref(), APPLE_ROOTS)?,
        })
    }

    /// Replaces the trust anchors.
    pub fn with_trust_anchors(mut self, anchors: Vec<TrustAnchor>) -> Self {
        self.trust_anchors = anchors;
        self
    }

    pub fn verify(
        &self,
        attestation: &str,
        key_id: &str,
        challenge: &[u8],
        key: &DeviceKey,
        now: DateTime<Utc>,
    ) -> Result<(), AttestationError> {
        if attestation.len() > MAX_ATTESTATION_SIZE.div_ceil(3) * 4 + 4 {
            return Err(AttestationError::chain_invalid("attestation object too large"));
        }
        let raw = decode_base64(attestation, "attestation")?;
        if raw.len() > MAX_ATTESTATION_SIZE {
            return Err(AttestationError::chain_invalid("attestation object too large"));
        }
        let object = AttestationObject::from_cbor(&raw)?;
        if object.certificates.len() > MAX_CHAIN_LENGTH {
            return Err(AttestationError::chain_invalid("too many certificates in x5c"));
        }

        let anchor = verify_chain(&object.certificates, &self.trust_anchors)?;
        tracing::debug!(anchor = anchor.subject(), "App Attest chain verified");
        let leaf = parse_certificate(&object.certificates[0])?;
        let auth_data = AuthenticatorData::parse(&object.auth_data)?;

        let app = self
            .applications
            .iter()
            .find(|app| {
                app.rp_id_hash == auth_data.rp_id_hash
                    && app.environment.aaguid().as_slice() == auth_data.aaguid
            })
            .ok_or(AttestationError::ApplicationNotAllowed)?;
        tracing::debug!(app_id = %app.app_id, "App Attest application matched");

        let client_data_hash = digest(&SHA256, challenge);
        let mut signed = object.auth_data.clone();
        signed.extend_from_slice(client_data_hash.as_ref());
        let expected_nonce = digest(&SHA256, &signed);
        let extension = find_extension(&leaf, NONCE_EXTENSION_OID)
            .ok_or_else(|| AttestationError::chain_invalid("missing App Attest nonce extension"))?;
        let nonce = extension_nonce(extension)
            .map_err(|e| AttestationError::chain_invalid(format!("malformed nonce extension: {e}")))?;
        if nonce != expected_nonce.as_ref() {
            return Err(AttestationError::ChallengeMismatch);
        }

        let key_hash = digest(&SHA256, &leaf.public_key().subject_public_key.data);
        let key_id = decode_base64(key_id, "key_id").map_err(|_| AttestationError::KeyMismatch)?;
        if key_hash.as_ref() != key_id.as_slice()
            || key_hash.as_ref() != auth_data.credential_id
            || !key.matches_spki(leaf.public_key())
        {
            return Err(AttestationError::KeyMismatch);
        }

        check_validity(&leaf, now, self.statement_skew)?;

        if auth_data.counter != 0 {
            return Err(AttestationError::chain_invalid(format!(
                "sign counter must be 0, got {}",
                auth_data.counter
            )));
        }
        Ok(())
    }
}
