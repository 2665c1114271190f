//! Token signing key
//!
//! The provider signs every Wallet Application Attestation with one key, either
//! generated at startup or loaded from a PKCS#12 keystore. The public half is
//! published as a JWK so relying parties can verify tokens.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::jwk::{EllipticCurve, Jwk, JwkSet};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use openssl::bn::BigNumContext;
use openssl::ec::PointConversionForm;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{Id, PKey, Private};
use openssl::x509::X509Ref;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde::{Deserialize, Serialize};

use crate::config::{KeystoreConfiguration, KeystoreType, SigningKeyConfiguration};
use crate::error::{ConfigError, IssuanceError};
use crate::jwk::{ec_jwk, ed25519_jwk, rsa_jwk, DeviceKey};

/// JWS algorithms the provider can sign with.
///
/// ES512 is not offered since ring cannot sign with P-521.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum SigningAlgorithm {
    Es256,
    Es384,
    Rs256,
    Rs384,
    Rs512,
    Ps256,
    Ps384,
    Ps512,
    EdDsa,
}

impl SigningAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Es256 => "ES256",
            Self::Es384 => "ES384",
            Self::Rs256 => "RS256",
            Self::Rs384 => "RS384",
            Self::Rs512 => "RS512",
            Self::Ps256 => "PS256",
            Self::Ps384 => "PS384",
            Self::Ps512 => "PS512",
            Self::EdDsa => "EdDSA",
        }
    }

    fn is_rsa(&self) -> bool {
        matches!(
            self,
            Self::Rs256 | Self::Rs384 | Self::Rs512 | Self::Ps256 | Self::Ps384 | Self::Ps512
        )
    }
}

impl From<SigningAlgorithm> for Algorithm {
    fn from(value: SigningAlgorithm) -> Self {
        match value {
            SigningAlgorithm::Es256 => Algorithm::ES256,
            SigningAlgorithm::Es384 => Algorithm::ES384,
            SigningAlgorithm::Rs256 => Algorithm::RS256,
            SigningAlgorithm::Rs384 => Algorithm::RS384,
            SigningAlgorithm::Rs512 => Algorithm::RS512,
            SigningAlgorithm::Ps256 => Algorithm::PS256,
            SigningAlgorithm::Ps384 => Algorithm::PS384,
            SigningAlgorithm::Ps512 => Algorithm::PS512,
            SigningAlgorithm::EdDsa => Algorithm::EdDSA,
        }
    }
}

impl FromStr for SigningAlgorithm {
    type Err = ConfigError;

    /// Accepts JOSE names and the JCA-style aliases used by Java keystores.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let algorithm = match s {
            "ES256" | "ECDSAwithSHA256" | "SHA256withECDSA" => Self::Es256,
            "ES384" | "ECDSAwithSHA384" | "SHA384withECDSA" => Self::Es384,
            "RS256" | "RSAwithSHA256PKCS1" | "SHA256withRSA" => Self::Rs256,
            "RS384" | "RSAwithSHA384PKCS1" | "SHA384withRSA" => Self::Rs384,
            "RS512" | "RSAwithSHA512PKCS1" | "SHA512withRSA" => Self::Rs512,
            "PS256" | "RSAwithSHA256PSS" => Self::Ps256,
            "PS384" | "RSAwithSHA384PSS" => Self::Ps384,
            "PS512" | "RSAwithSHA512PSS" => Self::Ps512,
            "EdDSA" | "Ed25519" => Self::EdDsa,
            other => return Err(ConfigError::UnsupportedAlgorithm(other.to_string())),
        };
        Ok(algorithm)
    }
}

impl TryFrom<String> for SigningAlgorithm {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The provider's signing key and its published public half.
pub struct SigningKey {
    algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    public_jwk: Jwk,
    key_id: String,
    /// Base64 DER, leaf first. Only present for keystore-backed keys.
    certificate_chain: Option<Vec<String>>,
}

impl SigningKey {
    /// Builds the key described by the configuration.
    pub fn from_configuration(config: &SigningKeyConfiguration) -> Result<Self, IssuanceError> {
        match config {
            SigningKeyConfiguration::GenerateRandom => Self::generate(),
            SigningKeyConfiguration::LoadFromKeystore(keystore) => Self::from_keystore(keystore),
        }
    }

    /// Generates an ephemeral ES256 key.
    pub fn generate() -> Result<Self, IssuanceError> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|_| unavailable("failed to generate ES256 key"))?;
        let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
            .map_err(|_| unavailable("generated ES256 key is unusable"))?;
        let point = pair.public_key().as_ref();
        let jwk = ec_jwk(EllipticCurve::P256, &point[1..33], &point[33..65], None);

        tracing::warn!("Using a randomly generated signing key; tokens will not verify after restart");
        Self::assemble(
            SigningAlgorithm::Es256,
            EncodingKey::from_ec_der(pkcs8.as_ref()),
            jwk,
            None,
        )
    }

    /// Loads a key from the PKCS#12 keystore named in the configuration.
    pub fn from_keystore(config: &KeystoreConfiguration) -> Result<Self, IssuanceError> {
        if config.keystore_type == KeystoreType::Jks {
            return Err(unavailable(
                "JKS keystores are not supported, convert the keystore to PKCS#12",
            ));
        }
        let der = std::fs::read(&config.keystore_file).map_err(|e| {
            unavailable(format!(
                "cannot read keystore {}: {e}",
                config.keystore_file.display()
            ))
        })?;
        Self::from_pkcs12_der(&der, config)
    }

    /// Loads a key from PKCS#12 bytes, checking the alias and algorithm.
    pub fn from_pkcs12_der(der: &[u8], config: &KeystoreConfiguration) -> Result<Self, IssuanceError> {
        let pkcs12 = Pkcs12::from_der(der).map_err(|e| unavailable(format!("invalid keystore: {e}")))?;

        let passwords: Vec<&str> = [&config.keystore_password, &config.key_password]
            .into_iter()
            .flatten()
            .map(|secret| secret.expose())
            .chain(std::iter::once(""))
            .collect();
        let parsed = passwords
            .iter()
            .find_map(|password| pkcs12.parse2(password).ok())
            .ok_or_else(|| unavailable("keystore could not be opened with the configured password"))?;

        let cert = parsed
            .cert
            .ok_or_else(|| unavailable("keystore contains no certificate"))?;
        match cert.alias() {
            Some(alias) if alias == config.key_alias.as_bytes() => {}
            _ => {
                return Err(unavailable(format!(
                    "keystore has no entry with alias {}",
                    config.key_alias
                )))
            }
        }
        let pkey = parsed
            .pkey
            .ok_or_else(|| unavailable("keystore entry has no private key"))?;

        let (encoding_key, jwk) = key_material(&pkey, config.algorithm)?;

        let mut chain = vec![encode_certificate(&cert)?];
        if let Some(ca) = parsed.ca {
            for cert in ca.iter() {
                chain.push(encode_certificate(cert)?);
            }
        }

        tracing::info!(
            alias = %config.key_alias,
            algorithm = %config.algorithm,
            chain_length = chain.len(),
            "Loaded signing key from keystore"
        );
        Self::assemble(config.algorithm, encoding_key, jwk, Some(chain))
    }

    fn assemble(
        algorithm: SigningAlgorithm,
        encoding_key: EncodingKey,
        mut public_jwk: Jwk,
        certificate_chain: Option<Vec<String>>,
    ) -> Result<Self, IssuanceError> {
        let key_id = DeviceKey::from_jwk(public_jwk.clone())
            .map_err(unavailable)?
            .thumbprint();
        public_jwk.common.key_id = Some(key_id.clone());
        if let Some(chain) = &certificate_chain {
            public_jwk.common.x509_chain = Some(chain.clone());
        }
        Ok(Self {
            algorithm,
            encoding_key,
            public_jwk,
            key_id,
            certificate_chain,
        })
    }

    /// Signs `claims` as a compact JWS with the given `typ` header.
    pub fn sign<T: Serialize>(&self, typ: &str, claims: &T) -> Result<String, IssuanceError> {
        let mut header = Header::new(self.algorithm.into());
        header.typ = Some(typ.to_string());
        header.kid = Some(self.key_id.clone());
        header.x5c = self.certificate_chain.clone();

        jsonwebtoken::encode(&header, claims, &self.encoding_key)
            .map_err(|e| IssuanceError::SigningFailed(e.to_string()))
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// RFC 7638 thumbprint of the public key, used as `kid`.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn public_jwk(&self) -> &Jwk {
        &self.public_jwk
    }

    pub fn jwks(&self) -> JwkSet {
        JwkSet {
            keys: vec![self.public_jwk.clone()],
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("algorithm", &self.algorithm)
            .field("key_id", &self.key_id)
            .field("has_certificate_chain", &self.certificate_chain.is_some())
            .finish()
    }
}

fn unavailable(message: impl Into<String>) -> IssuanceError {
    IssuanceError::SigningKeyUnavailable(message.into())
}

fn encode_certificate(cert: &X509Ref) -> Result<String, IssuanceError> {
    cert.to_der()
        .map(|der| STANDARD.encode(der))
        .map_err(|e| unavailable(format!("cannot encode certificate: {e}")))
}

/// Converts an openssl private key into a signing key plus its public JWK,
/// rejecting keys that do not fit the configured algorithm.
fn key_material(
    pkey: &PKey<Private>,
    algorithm: SigningAlgorithm,
) -> Result<(EncodingKey, Jwk), IssuanceError> {
    let openssl_err = |e: openssl::error::ErrorStack| unavailable(format!("openssl: {e}"));
    let mismatch = || unavailable(format!("keystore key does not match algorithm {algorithm}"));

    let id = pkey.id();
    if id == Id::EC {
        let ec = pkey.ec_key().map_err(openssl_err)?;
        let (nid, curve, size) = match algorithm {
            SigningAlgorithm::Es256 => (Nid::X9_62_PRIME256V1, EllipticCurve::P256, 32),
            SigningAlgorithm::Es384 => (Nid::SECP384R1, EllipticCurve::P384, 48),
            _ => return Err(mismatch()),
        };
        if ec.group().curve_name() != Some(nid) {
            return Err(mismatch());
        }
        let mut ctx = BigNumContext::new().map_err(openssl_err)?;
        let point = ec
            .public_key()
            .to_bytes(ec.group(), PointConversionForm::UNCOMPRESSED, &mut ctx)
            .map_err(openssl_err)?;
        if point.len() != 1 + 2 * size {
            return Err(mismatch());
        }
        let jwk = ec_jwk(curve, &point[1..=size], &point[size + 1..], None);
        let pem = pkey.private_key_to_pem_pkcs8().map_err(openssl_err)?;
        let key = EncodingKey::from_ec_pem(&pem)
            .map_err(|e| unavailable(format!("unusable EC key: {e}")))?;
        Ok((key, jwk))
    } else if id == Id::RSA && algorithm.is_rsa() {
        let rsa = pkey.rsa().map_err(openssl_err)?;
        let jwk = rsa_jwk(&rsa.n().to_vec(), &rsa.e().to_vec(), None);
        let pem = rsa.private_key_to_pem().map_err(openssl_err)?;
        let key = EncodingKey::from_rsa_pem(&pem)
            .map_err(|e| unavailable(format!("unusable RSA key: {e}")))?;
        Ok((key, jwk))
    } else if id == Id::ED25519 && algorithm == SigningAlgorithm::EdDsa {
        let public = pkey.raw_public_key().map_err(openssl_err)?;
        let jwk = ed25519_jwk(&public, None);
        let pem = pkey.private_key_to_pem_pkcs8().map_err(openssl_err)?;
        let key = EncodingKey::from_ed_pem(&pem)
            .map_err(|e| unavailable(format!("unusable Ed25519 key: {e}")))?;
        Ok((key, jwk))
    } else {
        Err(mismatch())
    }
}

/// Builds a PKCS#12 keystore holding a fresh self-signed P-256 key.
///
/// **WARNING**: for tests only.
#[cfg(test)]
pub(crate) fn generate_test_keystore(alias: &str, password: &str) -> Result<Vec<u8>, openssl::error::ErrorStack> {
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::x509::{X509Builder, X509NameBuilder, X509};

    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let private_key = PKey::from_ec_key(EcKey::generate(&group)?)?;

    let mut x509_builder = X509Builder::new()?;
    x509_builder.set_version(2)?;
    let serial = BigNum::from_u32(7)?.to_asn1_integer()?;
    x509_builder.set_serial_number(&serial)?;
    let mut name_builder = X509NameBuilder::new()?;
    name_builder.append_entry_by_text("CN", "Wallet Provider Test Signer")?;
    let name = name_builder.build();
    x509_builder.set_subject_name(&name)?;
    x509_builder.set_issuer_name(&name)?;
    let not_before: Asn1Time = Asn1Time::days_from_now(0)?;
    let not_after: Asn1Time = Asn1Time::days_from_now(30)?;
    x509_builder.set_not_before(&not_before)?;
    x509_builder.set_not_after(&not_after)?;
    x509_builder.set_pubkey(&private_key)?;
    x509_builder.sign(&private_key, MessageDigest::sha256())?;
    let cert: X509 = x509_builder.build();

    Pkcs12::builder()
        .name(alias)
        .pkey(&private_key)
        .cert(&cert)
        .build2(password)?
        .to_der()
}
