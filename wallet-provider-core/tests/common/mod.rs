//! Fixtures shared by the integration tests: certificate authorities,
//! Android key descriptions and App Attest objects, all generated with openssl.

#![allow(dead_code)]

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use ciborium::Value;
use jsonwebtoken::jwk::Jwk;
use openssl::asn1::{Asn1Object, Asn1OctetString, Asn1Time};
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey, PointConversionForm};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::BasicConstraints;
use openssl::x509::{X509Builder, X509Extension, X509NameBuilder, X509};
use ring::digest::{digest, SHA256};
use wallet_provider_core::TrustAnchor;

/// Fixed "now" for deterministic validity checks (2025-10-09T08:53:20Z).
pub const NOW: i64 = 1_760_000_000;
pub const DAY: i64 = 86_400;

pub const KEY_DESCRIPTION_OID: &str = "1.3.6.1.4.1.11129.2.1.17";
pub const APP_ATTEST_NONCE_OID: &str = "1.2.840.113635.100.8.2";

pub fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(NOW, 0).unwrap()
}

pub fn p256_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn serial() -> BigNum {
    let random = RandomState::new().build_hasher().finish() as u32;
    BigNum::from_u32(random | 1).unwrap()
}

pub struct TestCa {
    pub key: PKey<Private>,
    pub cert: X509,
}

impl TestCa {
    pub fn root(cn: &str) -> Self {
        let key = p256_key();
        let cert = build_certificate(cn, None, &key, true, NOW - 365 * DAY, NOW + 3650 * DAY, &[]);
        Self { key, cert }
    }

    pub fn intermediate(&self, cn: &str) -> Self {
        let key = p256_key();
        let cert = build_certificate(cn, Some(self), &key, true, NOW - 365 * DAY, NOW + 3650 * DAY, &[]);
        Self { key, cert }
    }

    pub fn anchor(&self) -> TrustAnchor {
        TrustAnchor::from_der(self.cert.to_der().unwrap()).unwrap()
    }

    /// Issues an end-entity certificate for `key`.
    pub fn issue_leaf(
        &self,
        key: &PKey<Private>,
        not_before: i64,
        not_after: i64,
        extensions: &[(&str, Vec<u8>)],
    ) -> X509 {
        build_certificate("Test Attested Key", Some(self), key, false, not_before, not_after, extensions)
    }
}

fn build_certificate(
    cn: &str,
    issuer: Option<&TestCa>,
    key: &PKey<Private>,
    ca: bool,
    not_before: i64,
    not_after: i64,
    extensions: &[(&str, Vec<u8>)],
) -> X509 {
    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&serial().to_asn1_integer().unwrap())
        .unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    let name = name.build();
    builder.set_subject_name(&name).unwrap();
    match issuer {
        Some(issuer) => builder.set_issuer_name(issuer.cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&name).unwrap(),
    }

    builder
        .set_not_before(&Asn1Time::from_unix(not_before).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(not_after).unwrap())
        .unwrap();
    builder.set_pubkey(key).unwrap();

    if ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
    }
    for (oid, der) in extensions {
        let oid = Asn1Object::from_str(oid).unwrap();
        let value = Asn1OctetString::new_from_bytes(der).unwrap();
        builder
            .append_extension(X509Extension::new_from_der(&oid, false, &value).unwrap())
            .unwrap();
    }

    let signer = issuer.map(|ca| &ca.key).unwrap_or(key);
    builder.sign(signer, MessageDigest::sha256()).unwrap();
    builder.build()
}

pub fn b64(cert: &X509) -> String {
    STANDARD.encode(cert.to_der().unwrap())
}

/// Uncompressed SEC1 point of a P-256 key.
pub fn ec_point(key: &PKey<Private>) -> Vec<u8> {
    let ec = key.ec_key().unwrap();
    let mut ctx = BigNumContext::new().unwrap();
    ec.public_key()
        .to_bytes(ec.group(), PointConversionForm::UNCOMPRESSED, &mut ctx)
        .unwrap()
}

pub fn jwk_for(key: &PKey<Private>) -> Jwk {
    let point = ec_point(key);
    serde_json::from_value(serde_json::json!({
        "kty": "EC",
        "crv": "P-256",
        "x": URL_SAFE_NO_PAD.encode(&point[1..33]),
        "y": URL_SAFE_NO_PAD.encode(&point[33..65]),
    }))
    .unwrap()
}

// Minimal DER encoder.

fn length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes: Vec<u8> = len
        .to_be_bytes()
        .into_iter()
        .skip_while(|b| *b == 0)
        .collect();
    let mut out = vec![0x80 | bytes.len() as u8];
    out.extend(bytes);
    out
}

pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(length(content.len()));
    out.extend_from_slice(content);
    out
}

/// `[number] EXPLICIT`, using the high-tag-number form when needed.
pub fn explicit(number: u32, inner: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    if number < 31 {
        out.push(0xa0 | number as u8);
    } else {
        out.push(0xbf);
        let mut groups = Vec::new();
        let mut n = number;
        loop {
            groups.push((n & 0x7f) as u8);
            n >>= 7;
            if n == 0 {
                break;
            }
        }
        groups.reverse();
        let last = groups.len() - 1;
        for (i, group) in groups.into_iter().enumerate() {
            out.push(if i == last { group } else { group | 0x80 });
        }
    }
    out.extend(length(inner.len()));
    out.extend_from_slice(inner);
    out
}

pub fn integer(value: u64) -> Vec<u8> {
    let mut bytes: Vec<u8> = value
        .to_be_bytes()
        .into_iter()
        .skip_while(|b| *b == 0)
        .collect();
    if bytes.is_empty() || bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0);
    }
    tlv(0x02, &bytes)
}

pub fn enumerated(value: u8) -> Vec<u8> {
    tlv(0x0a, &[value])
}

pub fn boolean(value: bool) -> Vec<u8> {
    tlv(0x01, &[if value { 0xff } else { 0x00 }])
}

pub fn octets(value: &[u8]) -> Vec<u8> {
    tlv(0x04, value)
}

pub fn null() -> Vec<u8> {
    tlv(0x05, &[])
}

pub fn sequence(parts: &[Vec<u8>]) -> Vec<u8> {
    tlv(0x30, &parts.concat())
}

pub fn set(parts: &[Vec<u8>]) -> Vec<u8> {
    let mut sorted = parts.to_vec();
    sorted.sort();
    tlv(0x31, &sorted.concat())
}

pub const SOFTWARE: u8 = 0;
pub const TRUSTED_ENVIRONMENT: u8 = 1;
pub const STRONG_BOX: u8 = 2;

/// Inputs for a synthetic key description extension.
#[derive(Debug, Clone)]
pub struct KeyDescriptionParams {
    pub attestation_level: u8,
    pub keymint_level: u8,
    pub challenge: Vec<u8>,
    pub package_name: String,
    pub digests: Vec<Vec<u8>>,
    pub root_of_trust: Option<(bool, u8)>,
    pub rollback_resistant: bool,
    pub creation_time_ms: Option<u64>,
}

impl KeyDescriptionParams {
    /// StrongBox key of `com.example.wallet` on a locked, verified device,
    /// created at [`NOW`].
    pub fn strongbox(challenge: &[u8], digest: &[u8]) -> Self {
        Self {
            attestation_level: STRONG_BOX,
            keymint_level: STRONG_BOX,
            challenge: challenge.to_vec(),
            package_name: "com.example.wallet".into(),
            digests: vec![digest.to_vec()],
            root_of_trust: Some((true, 0)),
            rollback_resistant: false,
            creation_time_ms: Some(NOW as u64 * 1000),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let application_id = sequence(&[
            set(&[sequence(&[octets(self.package_name.as_bytes()), integer(1)])]),
            set(&self.digests.iter().map(|d| octets(d)).collect::<Vec<_>>()),
        ]);

        let mut software = Vec::new();
        if let Some(ms) = self.creation_time_ms {
            software.push(explicit(701, &integer(ms)));
        }
        software.push(explicit(709, &octets(&application_id)));

        let mut hardware = vec![explicit(1, &set(&[integer(2)])), explicit(2, &integer(3))];
        if self.rollback_resistant {
            hardware.push(explicit(703, &null()));
        }
        if let Some((locked, state)) = self.root_of_trust {
            hardware.push(explicit(
                704,
                &sequence(&[
                    octets(&[0x11; 32]),
                    boolean(locked),
                    enumerated(state),
                    octets(&[0x22; 32]),
                ]),
            ));
        }

        sequence(&[
            integer(300),
            enumerated(self.attestation_level),
            integer(300),
            enumerated(self.keymint_level),
            octets(&self.challenge),
            octets(&[]),
            sequence(&software),
            sequence(&hardware),
        ])
    }
}

/// Root, intermediate and device key of a synthetic Android attestation.
pub struct AndroidFixture {
    pub root: TestCa,
    pub intermediate: TestCa,
    pub device_key: PKey<Private>,
}

impl AndroidFixture {
    pub fn new() -> Self {
        let root = TestCa::root("Test Attestation Root");
        let intermediate = root.intermediate("Test StrongBox Intermediate");
        Self {
            root,
            intermediate,
            device_key: p256_key(),
        }
    }

    pub fn chain(&self, params: &KeyDescriptionParams) -> Vec<String> {
        self.chain_with_validity(params, NOW - DAY, NOW + 365 * DAY)
    }

    pub fn chain_with_validity(
        &self,
        params: &KeyDescriptionParams,
        not_before: i64,
        not_after: i64,
    ) -> Vec<String> {
        let leaf = self.intermediate.issue_leaf(
            &self.device_key,
            not_before,
            not_after,
            &[(KEY_DESCRIPTION_OID, params.encode())],
        );
        vec![b64(&leaf), b64(&self.intermediate.cert), b64(&self.root.cert)]
    }

    pub fn device_jwk(&self) -> Jwk {
        jwk_for(&self.device_key)
    }
}

impl Default for AndroidFixture {
    fn default() -> Self {
        Self::new()
    }
}

pub const AAGUID_PRODUCTION: &[u8; 16] = b"appattest\0\0\0\0\0\0\0";
pub const AAGUID_DEVELOPMENT: &[u8; 16] = b"appattestdevelop";

/// Inputs for a synthetic App Attest object.
pub struct AppAttestParams<'a> {
    pub app_id: &'a str,
    pub aaguid: &'a [u8; 16],
    pub challenge: &'a [u8],
    pub counter: u32,
    pub not_before: i64,
    pub not_after: i64,
}

/// Root, intermediate and device key of a synthetic App Attest flow.
pub struct AppAttestFixture {
    pub root: TestCa,
    pub intermediate: TestCa,
    pub device_key: PKey<Private>,
}

impl AppAttestFixture {
    pub fn new() -> Self {
        let root = TestCa::root("Test App Attestation Root CA");
        let intermediate = root.intermediate("Test App Attestation CA 1");
        Self {
            root,
            intermediate,
            device_key: p256_key(),
        }
    }

    /// Key id as the platform reports it: base64 SHA-256 of the public point.
    pub fn key_id(&self) -> String {
        STANDARD.encode(digest(&SHA256, &ec_point(&self.device_key)))
    }

    /// Returns the base64 attestation object.
    pub fn attestation(&self, params: &AppAttestParams<'_>) -> String {
        let credential_id = digest(&SHA256, &ec_point(&self.device_key));

        let mut auth_data = digest(&SHA256, params.app_id.as_bytes()).as_ref().to_vec();
        auth_data.push(0x40);
        auth_data.extend_from_slice(&params.counter.to_be_bytes());
        auth_data.extend_from_slice(params.aaguid);
        auth_data.extend_from_slice(&(credential_id.as_ref().len() as u16).to_be_bytes());
        auth_data.extend_from_slice(credential_id.as_ref());
        // COSE key placeholder; the verifier reads the key from the certificate.
        auth_data.extend_from_slice(&[0xa0]);

        let mut signed = auth_data.clone();
        signed.extend_from_slice(digest(&SHA256, params.challenge).as_ref());
        let nonce = digest(&SHA256, &signed);
        let extension = sequence(&[explicit(1, &octets(nonce.as_ref()))]);

        let leaf = self.intermediate.issue_leaf(
            &self.device_key,
            params.not_before,
            params.not_after,
            &[(APP_ATTEST_NONCE_OID, extension)],
        );

        let object = Value::Map(vec![
            (Value::Text("fmt".into()), Value::Text("apple-appattest".into())),
            (
                Value::Text("attStmt".into()),
                Value::Map(vec![
                    (
                        Value::Text("x5c".into()),
                        Value::Array(vec![
                            Value::Bytes(leaf.to_der().unwrap()),
                            Value::Bytes(self.intermediate.cert.to_der().unwrap()),
                        ]),
                    ),
                    (Value::Text("receipt".into()), Value::Bytes(vec![0x30, 0x00])),
                ]),
            ),
            (Value::Text("authData".into()), Value::Bytes(auth_data)),
        ]);
        let mut encoded = Vec::new();
        ciborium::into_writer(&object, &mut encoded).unwrap();
        STANDARD.encode(encoded)
    }

    pub fn device_jwk(&self) -> Jwk {
        jwk_for(&self.device_key)
    }
}

impl Default for AppAttestFixture {
    fn default() -> Self {
        Self::new()
    }
}
