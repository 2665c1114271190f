//! Certificate chain validation
//!
//! Chains are built from the leaf toward a pinned trust anchor by matching issuer
//! and subject names, then every link is checked with ring. Certificates in the
//! presented chain that are not needed to reach an anchor are ignored.

use chrono::{DateTime, TimeDelta, Utc};
use ring::signature::{self, UnparsedPublicKey};
use x509_parser::pem::Pem;
use x509_parser::prelude::*;

use crate::clock::{add_saturating, sub_saturating};
use crate::error::{AttestationError, ConfigError};

/// Maximum number of certificates accepted in one chain.
pub const MAX_CHAIN_LENGTH: usize = 10;

/// Maximum DER size of a single certificate.
pub const MAX_CERTIFICATE_SIZE: usize = 16 * 1024;

const OID_ECDSA_SHA256: &str = "1.2.840.10045.4.3.2";
const OID_ECDSA_SHA384: &str = "1.2.840.10045.4.3.3";
const OID_RSA_SHA256: &str = "1.2.840.113549.1.1.11";
const OID_RSA_SHA384: &str = "1.2.840.113549.1.1.12";
const OID_RSA_SHA512: &str = "1.2.840.113549.1.1.13";
const OID_ED25519: &str = "1.3.101.112";

/// A pinned root certificate.
#[derive(Clone)]
pub struct TrustAnchor {
    der: Vec<u8>,
    subject_raw: Vec<u8>,
    subject_display: String,
}

impl TrustAnchor {
    pub fn from_der(der: Vec<u8>) -> Result<Self, ConfigError> {
        let (subject_raw, subject_display) = {
            let (_, cert) = parse_x509_certificate(&der)
                .map_err(|e| ConfigError::InvalidTrustAnchor(format!("parse certificate: {e}")))?;
            (cert.subject().as_raw().to_vec(), cert.subject().to_string())
        };
        Ok(Self {
            der,
            subject_raw,
            subject_display,
        })
    }

    /// Every certificate in a PEM bundle.
    pub fn from_pem_bundle(pem: &[u8]) -> Result<Vec<Self>, ConfigError> {
        let anchors = Pem::iter_from_buffer(pem)
            .map(|block| {
                let block =
                    block.map_err(|e| ConfigError::InvalidTrustAnchor(format!("PEM: {e}")))?;
                Self::from_der(block.contents)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if anchors.is_empty() {
            return Err(ConfigError::InvalidTrustAnchor(
                "no certificates in PEM bundle".into(),
            ));
        }
        Ok(anchors)
    }

    pub fn subject(&self) -> &str {
        &self.subject_display
    }
}

impl std::fmt::Debug for TrustAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustAnchor")
            .field("subject", &self.subject_display)
            .finish()
    }
}

/// Rejects chains that exceed the size bounds before any parsing happens.
pub fn check_chain_bounds(chain: &[Vec<u8>]) -> Result<(), AttestationError> {
    if chain.is_empty() {
        return Err(AttestationError::chain_invalid("empty certificate chain"));
    }
    if chain.len() > MAX_CHAIN_LENGTH {
        return Err(AttestationError::chain_invalid(format!(
            "chain has {} certificates, at most {MAX_CHAIN_LENGTH} allowed",
            chain.len()
        )));
    }
    if let Some(oversized) = chain.iter().find(|der| der.len() > MAX_CERTIFICATE_SIZE) {
        return Err(AttestationError::chain_invalid(format!(
            "certificate of {} bytes exceeds {MAX_CERTIFICATE_SIZE}",
            oversized.len()
        )));
    }
    Ok(())
}

pub fn parse_certificate(der: &[u8]) -> Result<X509Certificate<'_>, AttestationError> {
    parse_x509_certificate(der)
        .map(|(_, cert)| cert)
        .map_err(|e| AttestationError::chain_invalid(format!("parse certificate: {e}")))
}

/// Verifies that `chain[0]` chains to one of `anchors`.
///
/// Returns the subject of the anchor that terminated the chain.
pub fn verify_chain<'a>(
    chain: &[Vec<u8>],
    anchors: &'a [TrustAnchor],
) -> Result<&'a TrustAnchor, AttestationError> {
    check_chain_bounds(chain)?;

    let leaf = parse_certificate(&chain[0])?;
    let mut ordered: Vec<&[u8]> = vec![chain[0].as_slice()];
    let mut remaining: Vec<&[u8]> = chain[1..].iter().map(Vec::as_slice).collect();
    let mut issuer_raw = leaf.issuer().as_raw().to_vec();

    for _ in 0..=remaining.len() {
        if let Some(anchor) = find_anchor(&issuer_raw, anchors) {
            verify_links(&ordered, anchor)?;
            return Ok(anchor);
        }

        let position = remaining.iter().position(|der| {
            parse_x509_certificate(der)
                .map(|(_, cert)| cert.subject().as_raw() == issuer_raw.as_slice())
                .unwrap_or(false)
        });
        let Some(idx) = position else { break };

        let parent_der = remaining.swap_remove(idx);
        let parent = parse_certificate(parent_der)?;
        issuer_raw = parent.issuer().as_raw().to_vec();
        ordered.push(parent_der);
    }

    Err(AttestationError::chain_invalid(
        "chain does not terminate at a trusted root",
    ))
}

fn find_anchor<'a>(subject_raw: &[u8], anchors: &'a [TrustAnchor]) -> Option<&'a TrustAnchor> {
    anchors
        .iter()
        .find(|anchor| anchor.subject_raw.as_slice() == subject_raw)
}

fn verify_links(ordered: &[&[u8]], anchor: &TrustAnchor) -> Result<(), AttestationError> {
    let root = parse_certificate(&anchor.der)?;
    let mut parent_subject = root.subject().as_raw().to_vec();
    let mut parent_key = root.public_key().subject_public_key.data.to_vec();

    for (idx, der) in ordered.iter().enumerate().rev() {
        let cert = parse_certificate(der)?;
        let role = if idx == 0 { "leaf" } else { "intermediate" };

        if cert.issuer().as_raw() != parent_subject.as_slice() {
            return Err(AttestationError::chain_invalid(format!(
                "issuer mismatch ({role})"
            )));
        }
        if idx != 0 {
            ensure_ca(&cert)?;
        }

        let algorithm = verification_algorithm(&cert, &parent_key)?;
        UnparsedPublicKey::new(algorithm, &parent_key)
            .verify(cert.tbs_certificate.as_ref(), cert.signature_value.data.as_ref())
            .map_err(|_| {
                AttestationError::chain_invalid(format!("signature verification failed ({role})"))
            })?;

        parent_subject = cert.subject().as_raw().to_vec();
        parent_key = cert.public_key().subject_public_key.data.to_vec();
    }
    Ok(())
}

fn ensure_ca(cert: &X509Certificate<'_>) -> Result<(), AttestationError> {
    let constraints = cert
        .basic_constraints()
        .map_err(|e| AttestationError::chain_invalid(format!("basicConstraints: {e}")))?;
    match constraints {
        Some(bc) if bc.value.ca => Ok(()),
        _ => Err(AttestationError::chain_invalid(
            "intermediate certificate is not a CA",
        )),
    }
}

/// Picks the ring verifier from the signature OID and the issuer key size.
fn verification_algorithm(
    cert: &X509Certificate<'_>,
    issuer_key: &[u8],
) -> Result<&'static dyn signature::VerificationAlgorithm, AttestationError> {
    let oid = cert.signature_algorithm.algorithm.to_id_string();
    // Uncompressed SEC1 points: 65 bytes for P-256, 97 for P-384.
    let p384 = issuer_key.len() == 97;
    let algorithm: &'static dyn signature::VerificationAlgorithm = match oid.as_str() {
        OID_ECDSA_SHA256 if p384 => &signature::ECDSA_P384_SHA256_ASN1,
        OID_ECDSA_SHA256 => &signature::ECDSA_P256_SHA256_ASN1,
        OID_ECDSA_SHA384 if p384 => &signature::ECDSA_P384_SHA384_ASN1,
        OID_ECDSA_SHA384 => &signature::ECDSA_P256_SHA384_ASN1,
        OID_RSA_SHA256 => &signature::RSA_PKCS1_2048_8192_SHA256,
        OID_RSA_SHA384 => &signature::RSA_PKCS1_2048_8192_SHA384,
        OID_RSA_SHA512 => &signature::RSA_PKCS1_2048_8192_SHA512,
        OID_ED25519 => &signature::ED25519,
        other => {
            return Err(AttestationError::chain_invalid(format!(
                "unsupported certificate signature algorithm {other}"
            )))
        }
    };
    Ok(algorithm)
}

/// Checks `not_before - skew <= now <= not_after + skew`.
pub fn check_validity(
    cert: &X509Certificate<'_>,
    now: DateTime<Utc>,
    skew: TimeDelta,
) -> Result<(), AttestationError> {
    let validity = cert.validity();
    let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    if add_saturating(now, skew) < not_before {
        return Err(AttestationError::NotYetValid);
    }
    if sub_saturating(now, skew) > not_after {
        return Err(AttestationError::CertificateExpired);
    }
    Ok(())
}

/// Raw value of the extension with the given dotted OID.
pub fn find_extension<'a>(cert: &'a X509Certificate<'_>, oid: &str) -> Option<&'a [u8]> {
    cert.extensions()
        .iter()
        .find(|ext| ext.oid.to_id_string() == oid)
        .map(|ext| ext.value)
}
