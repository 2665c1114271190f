//! Android key attestation against a real device chain and synthetic chains.

mod common;

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::*;
use wallet_provider_core::attestation::AndroidVerifier;
use wallet_provider_core::config::{
    AndroidApplication, AndroidAttestationConfiguration, AttestationStatementValidity,
    CertificateDigest,
};
use wallet_provider_core::{AttestationError, AttestationType, DeviceKey, PolicyFlag};

const GALAXY_CHAIN: &str = include_str!("data/galaxy-s25-strongbox-chain.txt");
const GALAXY_CHALLENGE: &[u8] = b"INdGT5ahPwBSIASvphcj5UiS4f3N8W4BBqLOiBPCksXW";
const GALAXY_PACKAGE: &str = "com.exampleapp";
const GALAXY_DIGEST: &str = "-sYXRdwJA3hvue3mKpYrOZ9zSPC7b4mbgzJmdZEDO5w";

const WALLET_DIGEST: [u8; 32] = [0xab; 32];

fn galaxy_chain() -> Vec<String> {
    GALAXY_CHAIN.lines().map(str::to_owned).collect()
}

fn galaxy_key() -> DeviceKey {
    DeviceKey::from_jwk(
        serde_json::from_value(serde_json::json!({
            "kty": "EC",
            "crv": "P-256",
            "x": "fnab4BvnjoHlIdIf6-4aJE15w2xwjWkZj4H51PMST7Q",
            "y": "js95sViCnKqXr8UELl7AIEIZ5BHOu9gcarR-PeuEWZg"
        }))
        .unwrap(),
    )
    .unwrap()
}

/// Shortly after the key was created on the device.
fn galaxy_now() -> DateTime<Utc> {
    "2025-09-26T06:44:00Z".parse().unwrap()
}

fn galaxy_verifier() -> AndroidVerifier {
    let config = AndroidAttestationConfiguration {
        applications: vec![AndroidApplication {
            package_name: GALAXY_PACKAGE.into(),
            signing_certificate_digests: vec![GALAXY_DIGEST.to_string().try_into().unwrap()],
        }],
        strong_box_required: true,
        ..Default::default()
    };
    AndroidVerifier::new(&config, Duration::ZERO).unwrap()
}

fn wallet_config() -> AndroidAttestationConfiguration {
    AndroidAttestationConfiguration {
        applications: vec![AndroidApplication {
            package_name: "com.example.wallet".into(),
            signing_certificate_digests: vec![CertificateDigest::new(WALLET_DIGEST)],
        }],
        ..Default::default()
    }
}

fn verifier(fixture: &AndroidFixture, config: AndroidAttestationConfiguration) -> AndroidVerifier {
    AndroidVerifier::new(&config, Duration::ZERO)
        .unwrap()
        .with_trust_anchors(vec![fixture.root.anchor()])
}

fn device_key(fixture: &AndroidFixture) -> DeviceKey {
    DeviceKey::from_jwk(fixture.device_jwk()).unwrap()
}

fn verify(
    fixture: &AndroidFixture,
    config: AndroidAttestationConfiguration,
    params: &KeyDescriptionParams,
) -> Result<(), AttestationError> {
    verifier(fixture, config).verify(
        &fixture.chain(params),
        &params.challenge,
        &device_key(fixture),
        now(),
    )
}

fn challenge() -> Vec<u8> {
    (0..128u8).collect()
}

// ============================================================================
// Real device chain
// ============================================================================

#[test]
fn test_galaxy_s25_strongbox_chain_verifies() {
    galaxy_verifier()
        .verify(&galaxy_chain(), GALAXY_CHALLENGE, &galaxy_key(), galaxy_now())
        .unwrap();
}

#[test]
fn test_galaxy_s25_wrong_challenge() {
    let mut challenge = GALAXY_CHALLENGE.to_vec();
    challenge[0] ^= 1;
    let err = galaxy_verifier()
        .verify(&galaxy_chain(), &challenge, &galaxy_key(), galaxy_now())
        .unwrap_err();
    assert_eq!(err, AttestationError::ChallengeMismatch);
}

#[test]
fn test_galaxy_s25_stale_statement() {
    let later = galaxy_now() + TimeDelta::hours(1);
    let err = galaxy_verifier()
        .verify(&galaxy_chain(), GALAXY_CHALLENGE, &galaxy_key(), later)
        .unwrap_err();
    assert_eq!(
        err,
        AttestationError::PolicyViolation(PolicyFlag::AttestationStatementValidity)
    );
}

#[test]
fn test_galaxy_s25_untrusted_with_other_roots() {
    let other = TestCa::root("Unrelated Root");
    let err = galaxy_verifier()
        .with_trust_anchors(vec![other.anchor()])
        .verify(&galaxy_chain(), GALAXY_CHALLENGE, &galaxy_key(), galaxy_now())
        .unwrap_err();
    assert!(matches!(err, AttestationError::ChainInvalid(_)));
}

#[test]
fn test_galaxy_s25_other_package_rejected() {
    let config = AndroidAttestationConfiguration {
        applications: vec![AndroidApplication {
            package_name: "com.example.wallet".into(),
            signing_certificate_digests: vec![GALAXY_DIGEST.to_string().try_into().unwrap()],
        }],
        ..Default::default()
    };
    let err = AndroidVerifier::new(&config, Duration::ZERO)
        .unwrap()
        .verify(&galaxy_chain(), GALAXY_CHALLENGE, &galaxy_key(), galaxy_now())
        .unwrap_err();
    assert_eq!(err, AttestationError::ApplicationNotAllowed);
}

// ============================================================================
// Synthetic chains
// ============================================================================

#[test]
fn test_strongbox_wallet_accepted() {
    let fixture = AndroidFixture::new();
    let params = KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST);
    let config = AndroidAttestationConfiguration {
        strong_box_required: true,
        ..wallet_config()
    };
    verify(&fixture, config, &params).unwrap();
}

#[test]
fn test_chain_order_does_not_matter() {
    let fixture = AndroidFixture::new();
    let params = KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST);
    let mut chain = fixture.chain(&params);
    chain.swap(1, 2);
    verifier(&fixture, wallet_config())
        .verify(&chain, &params.challenge, &device_key(&fixture), now())
        .unwrap();
}

#[test]
fn test_chain_without_root_certificate() {
    let fixture = AndroidFixture::new();
    let params = KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST);
    let mut chain = fixture.chain(&params);
    chain.pop();
    verifier(&fixture, wallet_config())
        .verify(&chain, &params.challenge, &device_key(&fixture), now())
        .unwrap();
}

#[test]
fn test_untrusted_root_rejected() {
    let fixture = AndroidFixture::new();
    let params = KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST);
    let err = AndroidVerifier::new(&wallet_config(), Duration::ZERO)
        .unwrap()
        .with_trust_anchors(vec![TestCa::root("Test Attestation Root").anchor()])
        .verify(&fixture.chain(&params), &params.challenge, &device_key(&fixture), now())
        .unwrap_err();
    assert!(matches!(err, AttestationError::ChainInvalid(_)), "{err}");
}

#[test]
fn test_leaf_signed_by_foreign_key_rejected() {
    let fixture = AndroidFixture::new();
    let impostor = TestCa {
        key: p256_key(),
        cert: fixture.intermediate.cert.clone(),
    };
    let params = KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST);
    let leaf = impostor.issue_leaf(
        &fixture.device_key,
        NOW - DAY,
        NOW + DAY,
        &[(KEY_DESCRIPTION_OID, params.encode())],
    );
    let chain = vec![b64(&leaf), b64(&fixture.intermediate.cert), b64(&fixture.root.cert)];
    let err = verifier(&fixture, wallet_config())
        .verify(&chain, &params.challenge, &device_key(&fixture), now())
        .unwrap_err();
    assert!(matches!(err, AttestationError::ChainInvalid(ref m) if m.contains("signature")));
}

#[test]
fn test_garbage_chain_rejected() {
    let fixture = AndroidFixture::new();
    let key = device_key(&fixture);
    let verifier = verifier(&fixture, wallet_config());

    for chain in [vec![], vec!["%%%".to_string()], vec!["AAAA".to_string()]] {
        let err = verifier.verify(&chain, &challenge(), &key, now()).unwrap_err();
        assert!(matches!(err, AttestationError::ChainInvalid(_)));
    }
}

#[test]
fn test_missing_key_description_rejected() {
    let fixture = AndroidFixture::new();
    let leaf = fixture
        .intermediate
        .issue_leaf(&fixture.device_key, NOW - DAY, NOW + DAY, &[]);
    let chain = vec![b64(&leaf), b64(&fixture.intermediate.cert)];
    let err = verifier(&fixture, wallet_config())
        .verify(&chain, &challenge(), &device_key(&fixture), now())
        .unwrap_err();
    assert!(matches!(err, AttestationError::ChainInvalid(ref m) if m.contains("key description")));
}

#[test]
fn test_challenge_mismatch() {
    let fixture = AndroidFixture::new();
    let params = KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST);
    let mut presented = challenge();
    presented[127] ^= 0x80;
    let err = verifier(&fixture, wallet_config())
        .verify(&fixture.chain(&params), &presented, &device_key(&fixture), now())
        .unwrap_err();
    assert_eq!(err, AttestationError::ChallengeMismatch);
}

#[test]
fn test_key_mismatch() {
    let fixture = AndroidFixture::new();
    let params = KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST);
    let other = DeviceKey::from_jwk(jwk_for(&p256_key())).unwrap();
    let err = verifier(&fixture, wallet_config())
        .verify(&fixture.chain(&params), &params.challenge, &other, now())
        .unwrap_err();
    assert_eq!(err, AttestationError::KeyMismatch);
}

#[test]
fn test_application_allow_list() {
    let fixture = AndroidFixture::new();

    let mut other_package = KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST);
    other_package.package_name = "com.example.other".into();
    assert_eq!(
        verify(&fixture, wallet_config(), &other_package).unwrap_err(),
        AttestationError::ApplicationNotAllowed
    );

    let other_digest = KeyDescriptionParams::strongbox(&challenge(), &[0xcd; 32]);
    assert_eq!(
        verify(&fixture, wallet_config(), &other_digest).unwrap_err(),
        AttestationError::ApplicationNotAllowed
    );

    let mut rotated = KeyDescriptionParams::strongbox(&challenge(), &[0xcd; 32]);
    rotated.digests.push(WALLET_DIGEST.to_vec());
    verify(&fixture, wallet_config(), &rotated).unwrap();

    let empty = AndroidAttestationConfiguration::default();
    assert_eq!(
        verify(
            &fixture,
            empty,
            &KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST)
        )
        .unwrap_err(),
        AttestationError::ApplicationNotAllowed
    );
}

#[test]
fn test_strongbox_required_rejects_tee() {
    let fixture = AndroidFixture::new();
    let mut params = KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST);
    params.attestation_level = TRUSTED_ENVIRONMENT;
    params.keymint_level = TRUSTED_ENVIRONMENT;

    verify(&fixture, wallet_config(), &params).unwrap();

    let strict = AndroidAttestationConfiguration {
        strong_box_required: true,
        ..wallet_config()
    };
    assert_eq!(
        verify(&fixture, strict, &params).unwrap_err(),
        AttestationError::PolicyViolation(PolicyFlag::StrongBoxRequired)
    );
}

#[test]
fn test_unlocked_bootloader() {
    let fixture = AndroidFixture::new();
    let mut params = KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST);
    let unlocked = AttestationError::PolicyViolation(PolicyFlag::UnlockedBootloader);

    params.root_of_trust = Some((false, 0));
    assert_eq!(verify(&fixture, wallet_config(), &params).unwrap_err(), unlocked);

    params.root_of_trust = Some((true, 2));
    assert_eq!(verify(&fixture, wallet_config(), &params).unwrap_err(), unlocked);

    params.root_of_trust = None;
    assert_eq!(verify(&fixture, wallet_config(), &params).unwrap_err(), unlocked);

    let lenient = AndroidAttestationConfiguration {
        unlocked_bootloader_allowed: true,
        ..wallet_config()
    };
    verify(&fixture, lenient, &params).unwrap();
}

#[test]
fn test_rollback_resistance_required() {
    let fixture = AndroidFixture::new();
    let config = || AndroidAttestationConfiguration {
        rollback_resistance_required: true,
        ..wallet_config()
    };
    let mut params = KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST);
    assert_eq!(
        verify(&fixture, config(), &params).unwrap_err(),
        AttestationError::PolicyViolation(PolicyFlag::RollbackResistanceRequired)
    );

    params.rollback_resistant = true;
    verify(&fixture, config(), &params).unwrap();
}

#[test]
fn test_attestation_type_toggles() {
    let fixture = AndroidFixture::new();

    let mut nougat = KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST);
    nougat.attestation_level = SOFTWARE;
    nougat.keymint_level = TRUSTED_ENVIRONMENT;
    assert_eq!(
        verify(&fixture, wallet_config(), &nougat).unwrap_err(),
        AttestationError::SecurityLevelNotAccepted(AttestationType::Nougat)
    );
    let nougat_enabled = AndroidAttestationConfiguration {
        nougat_attestation_enabled: true,
        ..wallet_config()
    };
    verify(&fixture, nougat_enabled, &nougat).unwrap();

    let mut software = KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST);
    software.attestation_level = SOFTWARE;
    software.keymint_level = SOFTWARE;
    assert_eq!(
        verify(&fixture, wallet_config(), &software).unwrap_err(),
        AttestationError::SecurityLevelNotAccepted(AttestationType::Software)
    );
    let software_enabled = AndroidAttestationConfiguration {
        software_attestation_enabled: true,
        ..wallet_config()
    };
    verify(&fixture, software_enabled, &software).unwrap();

    let hardware_disabled = AndroidAttestationConfiguration {
        hardware_attestation_enabled: false,
        ..wallet_config()
    };
    assert_eq!(
        verify(
            &fixture,
            hardware_disabled,
            &KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST)
        )
        .unwrap_err(),
        AttestationError::SecurityLevelNotAccepted(AttestationType::Hardware)
    );
}

#[test]
fn test_leaf_validity_window() {
    let fixture = AndroidFixture::new();
    let params = KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST);
    let key = device_key(&fixture);

    let expired = fixture.chain_with_validity(&params, NOW - 30 * DAY, NOW - 60);
    let err = verifier(&fixture, wallet_config())
        .verify(&expired, &params.challenge, &key, now())
        .unwrap_err();
    assert_eq!(err, AttestationError::CertificateExpired);

    let future = fixture.chain_with_validity(&params, NOW + 60, NOW + 30 * DAY);
    let err = verifier(&fixture, wallet_config())
        .verify(&future, &params.challenge, &key, now())
        .unwrap_err();
    assert_eq!(err, AttestationError::NotYetValid);

    let skewed = AndroidAttestationConfiguration {
        verification_skew: Duration::from_secs(120),
        ..wallet_config()
    };
    verifier(&fixture, skewed)
        .verify(&expired, &params.challenge, &key, now())
        .unwrap();

    let ignored = AndroidAttestationConfiguration {
        leaf_certificate_validity_ignored: true,
        ..wallet_config()
    };
    verifier(&fixture, ignored)
        .verify(&future, &params.challenge, &key, now())
        .unwrap();
}

#[test]
fn test_global_skew_extends_platform_skew() {
    let fixture = AndroidFixture::new();
    let params = KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST);
    let expired = fixture.chain_with_validity(&params, NOW - 30 * DAY, NOW - 60);

    AndroidVerifier::new(&wallet_config(), Duration::from_secs(120))
        .unwrap()
        .with_trust_anchors(vec![fixture.root.anchor()])
        .verify(&expired, &params.challenge, &device_key(&fixture), now())
        .unwrap();
}

#[test]
fn test_statement_creation_time() {
    let fixture = AndroidFixture::new();
    let stale = AttestationError::PolicyViolation(PolicyFlag::AttestationStatementValidity);

    let mut old = KeyDescriptionParams::strongbox(&challenge(), &WALLET_DIGEST);
    old.creation_time_ms = Some((NOW as u64 - 600) * 1000);
    assert_eq!(verify(&fixture, wallet_config(), &old).unwrap_err(), stale);

    let mut recent = old.clone();
    recent.creation_time_ms = Some((NOW as u64 - 240) * 1000);
    verify(&fixture, wallet_config(), &recent).unwrap();

    let mut missing = old.clone();
    missing.creation_time_ms = None;
    assert_eq!(verify(&fixture, wallet_config(), &missing).unwrap_err(), stale);

    let wide = AndroidAttestationConfiguration {
        attestation_statement_validity: AttestationStatementValidity::Enforced {
            skew: Duration::from_secs(900),
        },
        ..wallet_config()
    };
    verify(&fixture, wide, &old).unwrap();

    let ignored = AndroidAttestationConfiguration {
        attestation_statement_validity: AttestationStatementValidity::Ignored,
        ..wallet_config()
    };
    verify(&fixture, ignored, &missing).unwrap();
}
