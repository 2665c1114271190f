//! Device public keys
//!
//! A wallet presents its key as a JWK. Attestation binds it by comparing the JWK
//! against the attested certificate's SubjectPublicKeyInfo, and the token subject
//! is the key's RFC 7638 thumbprint. The thumbprint is computed from the
//! decoded key bytes, so padding or redundant leading zero octets in the
//! presented members do not change it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, EllipticCurve, EllipticCurveKeyParameters,
    EllipticCurveKeyType, Jwk, OctetKeyPairParameters, OctetKeyPairType, PublicKeyUse,
    RSAKeyParameters, RSAKeyType,
};
use ring::digest;
use x509_parser::prelude::SubjectPublicKeyInfo;
use x509_parser::public_key::PublicKey;

/// Raw key material extracted from a JWK.
#[derive(Debug, Clone, PartialEq, Eq)]
enum KeyMaterial {
    /// Uncompressed SEC1 point, `04 || x || y`.
    Ec { curve: &'static str, point: Vec<u8> },
    /// Big-endian integers without leading zero octets.
    Rsa { modulus: Vec<u8>, exponent: Vec<u8> },
    Ed25519 { public: Vec<u8> },
}

/// A validated device public key.
#[derive(Debug, Clone)]
pub struct DeviceKey {
    jwk: Jwk,
    material: KeyMaterial,
}

impl DeviceKey {
    /// Accepts EC (P-256, P-384, P-521), RSA and Ed25519 public keys.
    pub fn from_jwk(jwk: Jwk) -> Result<Self, String> {
        let material = match &jwk.algorithm {
            AlgorithmParameters::EllipticCurve(params) => {
                let (curve, size) = match params.curve {
                    EllipticCurve::P256 => ("P-256", 32),
                    EllipticCurve::P384 => ("P-384", 48),
                    EllipticCurve::P521 => ("P-521", 66),
                    ref other => return Err(format!("unsupported EC curve {other:?}")),
                };
                let x = decode_member(&params.x, "x")?;
                let y = decode_member(&params.y, "y")?;
                if x.len() != size || y.len() != size {
                    return Err(format!("{curve} coordinates must be {size} bytes"));
                }
                let mut point = Vec::with_capacity(1 + 2 * size);
                point.push(0x04);
                point.extend_from_slice(&x);
                point.extend_from_slice(&y);
                KeyMaterial::Ec { curve, point }
            }
            AlgorithmParameters::RSA(params) => {
                let modulus = strip_leading_zeros(&decode_member(&params.n, "n")?).to_vec();
                let exponent = strip_leading_zeros(&decode_member(&params.e, "e")?).to_vec();
                if modulus.is_empty() || exponent.is_empty() {
                    return Err("RSA modulus and exponent must be non-zero".to_string());
                }
                KeyMaterial::Rsa { modulus, exponent }
            }
            AlgorithmParameters::OctetKeyPair(params) if params.curve == EllipticCurve::Ed25519 => {
                let public = decode_member(&params.x, "x")?;
                if public.len() != 32 {
                    return Err("Ed25519 public key must be 32 bytes".to_string());
                }
                KeyMaterial::Ed25519 { public }
            }
            _ => return Err("unsupported key type, expected EC, RSA or Ed25519".to_string()),
        };
        Ok(Self { jwk, material })
    }

    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    /// Whether the certificate key is the same public key.
    pub fn matches_spki(&self, spki: &SubjectPublicKeyInfo<'_>) -> bool {
        let raw = spki.subject_public_key.data.as_ref();
        match &self.material {
            KeyMaterial::Ec { point, .. } => raw == point.as_slice(),
            KeyMaterial::Ed25519 { public } => raw == public.as_slice(),
            KeyMaterial::Rsa { modulus, exponent } => match spki.parsed() {
                Ok(PublicKey::RSA(rsa)) => {
                    strip_leading_zeros(rsa.modulus) == modulus.as_slice()
                        && strip_leading_zeros(rsa.exponent) == exponent.as_slice()
                }
                _ => false,
            },
        }
    }

    /// RFC 7638 SHA-256 thumbprint, base64url without padding.
    pub fn thumbprint(&self) -> String {
        let canonical = match &self.material {
            KeyMaterial::Ec { curve, point } => {
                let (x, y) = point[1..].split_at((point.len() - 1) / 2);
                let (x, y) = (URL_SAFE_NO_PAD.encode(x), URL_SAFE_NO_PAD.encode(y));
                format!(r#"{{"crv":"{curve}","kty":"EC","x":"{x}","y":"{y}"}}"#)
            }
            KeyMaterial::Rsa { modulus, exponent } => {
                let (n, e) = (URL_SAFE_NO_PAD.encode(modulus), URL_SAFE_NO_PAD.encode(exponent));
                format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#)
            }
            KeyMaterial::Ed25519 { public } => {
                let x = URL_SAFE_NO_PAD.encode(public);
                format!(r#"{{"crv":"Ed25519","kty":"OKP","x":"{x}"}}"#)
            }
        };
        URL_SAFE_NO_PAD.encode(digest::digest(&digest::SHA256, canonical.as_bytes()))
    }
}

fn decode_member(value: &str, member: &str) -> Result<Vec<u8>, String> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| format!("JWK member {member} is not base64url: {e}"))
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

fn signing_common(key_id: Option<String>) -> CommonParameters {
    CommonParameters {
        public_key_use: Some(PublicKeyUse::Signature),
        key_id,
        ..Default::default()
    }
}

pub(crate) fn ec_jwk(curve: EllipticCurve, x: &[u8], y: &[u8], key_id: Option<String>) -> Jwk {
    Jwk {
        common: signing_common(key_id),
        algorithm: AlgorithmParameters::EllipticCurve(EllipticCurveKeyParameters {
            key_type: EllipticCurveKeyType::EC,
            curve,
            x: URL_SAFE_NO_PAD.encode(x),
            y: URL_SAFE_NO_PAD.encode(y),
        }),
    }
}

pub(crate) fn rsa_jwk(n: &[u8], e: &[u8], key_id: Option<String>) -> Jwk {
    Jwk {
        common: signing_common(key_id),
        algorithm: AlgorithmParameters::RSA(RSAKeyParameters {
            key_type: RSAKeyType::RSA,
            n: URL_SAFE_NO_PAD.encode(n),
            e: URL_SAFE_NO_PAD.encode(e),
        }),
    }
}

pub(crate) fn ed25519_jwk(x: &[u8], key_id: Option<String>) -> Jwk {
    Jwk {
        common: signing_common(key_id),
        algorithm: AlgorithmParameters::OctetKeyPair(OctetKeyPairParameters {
            key_type: OctetKeyPairType::OctetKeyPair,
            curve: EllipticCurve::Ed25519,
            x: URL_SAFE_NO_PAD.encode(x),
        }),
    }
}
