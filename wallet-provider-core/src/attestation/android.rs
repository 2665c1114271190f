//! Android key attestation
//!
//! The leaf of an Android attestation chain carries a key description
//! extension describing the attested key, the app that created it and the
//! state of the device. See
//! <https://source.android.com/docs/security/features/keystore/attestation>.

use std::time::Duration;

use asn1_rs::Tag;
use chrono::{DateTime, TimeDelta, Utc};
use x509_parser::der_parser::ber::BerObject;
use x509_parser::der_parser::error::BerError;
use x509_parser::der_parser::parse_der;

use super::x509::{
    check_validity, find_extension, parse_certificate, verify_chain, TrustAnchor,
    MAX_CERTIFICATE_SIZE, MAX_CHAIN_LENGTH,
};
use super::{decode_base64, effective_skew, load_trust_anchors, AttestationType};
use crate::clock::{add_saturating, sub_saturating};
use crate::config::{AndroidApplication, AndroidAttestationConfiguration, AttestationStatementValidity};
use crate::error::{AttestationError, ConfigError, PolicyFlag};
use crate::jwk::DeviceKey;

const GOOGLE_ROOTS: &[u8] = include_bytes!("../../resources/google-hardware-attestation-root.pem");

pub const KEY_DESCRIPTION_OID: &str = "1.3.6.1.4.1.11129.2.1.17";

const TAG_ROLLBACK_RESISTANCE: Tag = Tag(303);
const TAG_CREATION_DATE_TIME: Tag = Tag(701);
const TAG_ROLLBACK_RESISTANT: Tag = Tag(703);
const TAG_ROOT_OF_TRUST: Tag = Tag(704);
const TAG_ATTESTATION_APPLICATION_ID: Tag = Tag(709);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    Software,
    TrustedEnvironment,
    StrongBox,
}

impl SecurityLevel {
    pub fn is_hardware(self) -> bool {
        !matches!(self, Self::Software)
    }
}

impl TryFrom<u32> for SecurityLevel {
    type Error = BerError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Software),
            1 => Ok(Self::TrustedEnvironment),
            2 => Ok(Self::StrongBox),
            _ => Err(BerError::BerValueError),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifiedBootState {
    Verified,
    SelfSigned,
    Unverified,
    Failed,
}

impl TryFrom<u32> for VerifiedBootState {
    type Error = BerError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Verified),
            1 => Ok(Self::SelfSigned),
            2 => Ok(Self::Unverified),
            3 => Ok(Self::Failed),
            _ => Err(BerError::BerValueError),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootOfTrust {
    pub device_locked: bool,
    pub verified_boot_state: VerifiedBootState,
}

/// Package names and signing certificate digests of the attested app.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttestationApplicationId {
    pub package_names: Vec<String>,
    pub signature_digests: Vec<Vec<u8>>,
}

/// The parts of the key description this service acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescription {
    pub attestation_version: u32,
    pub attestation_security_level: SecurityLevel,
    pub keymint_security_level: SecurityLevel,
    pub challenge: Vec<u8>,
    pub application_id: Option<AttestationApplicationId>,
    pub root_of_trust: Option<RootOfTrust>,
    pub rollback_resistant: bool,
    pub creation_time: Option<DateTime<Utc>>,
}

impl KeyDescription {
    pub fn parse(der: &[u8]) -> Result<Self, AttestationError> {
        parse_key_description(der).map_err(|e| {
            AttestationError::chain_invalid(format!("malformed key description: {e}"))
        })
    }

    pub fn attestation_type(&self) -> AttestationType {
        match (
            self.attestation_security_level.is_hardware(),
            self.keymint_security_level.is_hardware(),
        ) {
            (true, true) => AttestationType::Hardware,
            (false, true) => AttestationType::Nougat,
            _ => AttestationType::Software,
        }
    }

    /// Locked only when the device says so and verified boot succeeded.
    /// A missing root of trust counts as unlocked.
    pub fn bootloader_locked(&self) -> bool {
        self.root_of_trust.is_some_and(|rot| {
            rot.device_locked && rot.verified_boot_state == VerifiedBootState::Verified
        })
    }
}

fn parse_key_description(der: &[u8]) -> Result<KeyDescription, BerError> {
    let (_, object) = parse_der(der)?;
    let fields = object.as_sequence()?;
    if fields.len() < 8 {
        return Err(BerError::InvalidLength);
    }

    let software_enforced = fields[6].as_sequence()?;
    let hardware_enforced = fields[7].as_sequence()?;
    // Hardware-enforced values win when a tag appears in both lists.
    let tagged = |tag: Tag| {
        hardware_enforced
            .iter()
            .chain(software_enforced.iter())
            .find(|entry| entry.tag() == tag)
    };

    let application_id = tagged(TAG_ATTESTATION_APPLICATION_ID)
        .map(parse_application_id)
        .transpose()?;
    let root_of_trust = tagged(TAG_ROOT_OF_TRUST)
        .map(parse_root_of_trust)
        .transpose()?;
    let creation_time = tagged(TAG_CREATION_DATE_TIME)
        .map(|entry| {
            let millis = explicit_inner(entry)?.as_u64()?;
            let millis = i64::try_from(millis).map_err(|_| BerError::IntegerTooLarge)?;
            DateTime::from_timestamp_millis(millis).ok_or(BerError::BerValueError)
        })
        .transpose()?;
    let rollback_resistant =
        tagged(TAG_ROLLBACK_RESISTANCE).is_some() || tagged(TAG_ROLLBACK_RESISTANT).is_some();

    Ok(KeyDescription {
        attestation_version: fields[0].as_u32()?,
        attestation_security_level: fields[1].as_u32()?.try_into()?,
        keymint_security_level: fields[3].as_u32()?.try_into()?,
        challenge: fields[4].as_slice()?.to_vec(),
        application_id,
        root_of_trust,
        rollback_resistant,
        creation_time,
    })
}

/// Content of an explicitly tagged authorization list entry.
fn explicit_inner<'a>(entry: &BerObject<'a>) -> Result<BerObject<'a>, BerError> {
    let (_, inner) = parse_der(entry.as_slice()?)?;
    Ok(inner)
}

fn parse_application_id(entry: &BerObject<'_>) -> Result<AttestationApplicationId, BerError> {
    // The id is DER wrapped in an OCTET STRING inside the explicit tag.
    let wrapped = explicit_inner(entry)?;
    let (_, application_id) = parse_der(wrapped.as_slice()?)?;
    let parts = application_id.as_sequence()?;
    if parts.len() != 2 {
        return Err(BerError::InvalidLength);
    }

    let package_names = parts[0]
        .as_set()?
        .iter()
        .map(|package_info| {
            let info = package_info.as_sequence()?;
            let name = info.first().ok_or(BerError::InvalidLength)?.as_slice()?;
            Ok(String::from_utf8_lossy(name).into_owned())
        })
        .collect::<Result<Vec<_>, BerError>>()?;

    let signature_digests = parts[1]
        .as_set()?
        .iter()
        .map(|digest| digest.as_slice().map(<[u8]>::to_vec))
        .collect::<Result<Vec<_>, BerError>>()?;

    Ok(AttestationApplicationId {
        package_names,
        signature_digests,
    })
}

fn parse_root_of_trust(entry: &BerObject<'_>) -> Result<RootOfTrust, BerError> {
    let inner = explicit_inner(entry)?;
    let fields = inner.as_sequence()?;
    if fields.len() < 3 {
        return Err(BerError::InvalidLength);
    }
    Ok(RootOfTrust {
        device_locked: fields[1].as_bool()?,
        verified_boot_state: fields[2].as_u32()?.try_into()?,
    })
}

/// Verifies Android key attestation chains against the configured policy.
#[derive(Debug)]
pub struct AndroidVerifier {
    applications: Vec<AndroidApplication>,
    strong_box_required: bool,
    unlocked_bootloader_allowed: bool,
    rollback_resistance_required: bool,
    leaf_certificate_validity_ignored: bool,
    verification_skew: TimeDelta,
    /// `None` when statement validity is ignored.
    statement_skew: Option<TimeDelta>,
    hardware_attestation_enabled: bool,
    nougat_attestation_enabled: bool,
    software_attestation_enabled: bool,
    trust_anchors: Vec<TrustAnchor>,
}

impl AndroidVerifier {
    pub fn new(
        config: &AndroidAttestationConfiguration,
        global_skew: Duration,
    ) -> Result<Self, ConfigError> {
        let trust_anchors = load_trust_anchors(config.trust_anchors.as_deref(), GOOGLE_ROOTS)?;
        let statement_skew = match config.attestation_statement_validity {
            AttestationStatementValidity::Enforced { skew } => {
                Some(effective_skew(global_skew, skew))
            }
            AttestationStatementValidity::Ignored => None,
        };
        Ok(Self {
            applications: config.applications.clone(),
            strong_box_required: config.strong_box_required,
            unlocked_bootloader_allowed: config.unlocked_bootloader_allowed,
            rollback_resistance_required: config.rollback_resistance_required,
            leaf_certificate_validity_ignored: config.leaf_certificate_validity_ignored,
            verification_skew: effective_skew(global_skew, config.verification_skew),
            statement_skew,
            hardware_attestation_enabled: config.hardware_attestation_enabled,
            nougat_attestation_enabled: config.nougat_attestation_enabled,
            software_attestation_enabled: config.software_attestation_enabled,
            trust_anchors,
        })
    }

    /// Replaces the trust anchors.
    pub fn with_trust_anchors(mut self, anchors: Vec<TrustAnchor>) -> Self {
        self.trust_anchors = anchors;
        self
    }

    pub fn verify(
        &self,
        certificate_chain: &[String],
        challenge: &[u8],
        key: &DeviceKey,
        now: DateTime<Utc>,
    ) -> Result<(), AttestationError> {
        let chain = decode_chain(certificate_chain)?;
        let anchor = verify_chain(&chain, &self.trust_anchors)?;
        tracing::debug!(anchor = anchor.subject(), "Android chain verified");

        let leaf = parse_certificate(&chain[0])?;
        if !self.leaf_certificate_validity_ignored {
            check_validity(&leaf, now, self.verification_skew)?;
        }

        let extension = find_extension(&leaf, KEY_DESCRIPTION_OID)
            .ok_or_else(|| AttestationError::chain_invalid("missing key description extension"))?;
        let description = KeyDescription::parse(extension)?;

        if description.challenge != challenge {
            return Err(AttestationError::ChallengeMismatch);
        }
        if !key.matches_spki(leaf.public_key()) {
            return Err(AttestationError::KeyMismatch);
        }
        if !self.application_allowed(description.application_id.as_ref()) {
            return Err(AttestationError::ApplicationNotAllowed);
        }
        self.check_device_flags(&description)?;
        self.check_attestation_type(description.attestation_type())?;
        self.check_statement_validity(description.creation_time, now)
    }

    fn application_allowed(&self, attested: Option<&AttestationApplicationId>) -> bool {
        let Some(attested) = attested else {
            return false;
        };
        self.applications.iter().any(|app| {
            attested.package_names.contains(&app.package_name)
                && app.signing_certificate_digests.iter().any(|allowed| {
                    attested
                        .signature_digests
                        .iter()
                        .any(|digest| digest.as_slice() == allowed.as_bytes())
                })
        })
    }

    fn check_device_flags(&self, description: &KeyDescription) -> Result<(), AttestationError> {
        if self.strong_box_required
            && description.keymint_security_level != SecurityLevel::StrongBox
        {
            return Err(AttestationError::PolicyViolation(PolicyFlag::StrongBoxRequired));
        }
        if !self.unlocked_bootloader_allowed && !description.bootloader_locked() {
            return Err(AttestationError::PolicyViolation(PolicyFlag::UnlockedBootloader));
        }
        if self.rollback_resistance_required && !description.rollback_resistant {
            return Err(AttestationError::PolicyViolation(
                PolicyFlag::RollbackResistanceRequired,
            ));
        }
        Ok(())
    }

    fn check_attestation_type(&self, attestation_type: AttestationType) -> Result<(), AttestationError> {
        let accepted = match attestation_type {
            AttestationType::Hardware => self.hardware_attestation_enabled,
            AttestationType::Nougat => self.nougat_attestation_enabled,
            AttestationType::Software => self.software_attestation_enabled,
        };
        if accepted {
            Ok(())
        } else {
            Err(AttestationError::SecurityLevelNotAccepted(attestation_type))
        }
    }

    fn check_statement_validity(
        &self,
        creation_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), AttestationError> {
        let Some(skew) = self.statement_skew else {
            return Ok(());
        };
        let violation = AttestationError::PolicyViolation(PolicyFlag::AttestationStatementValidity);
        let created = creation_time.ok_or(violation.clone())?;
        if created < sub_saturating(now, skew) || created > add_saturating(now, skew) {
            return Err(violation);
        }
        Ok(())
    }
}

/// Decodes the base64 chain, rejecting oversized input before decoding it.
fn decode_chain(encoded: &[String]) -> Result<Vec<Vec<u8>>, AttestationError> {
    if encoded.is_empty() {
        return Err(AttestationError::chain_invalid("empty certificate chain"));
    }
    if encoded.len() > MAX_CHAIN_LENGTH {
        return Err(AttestationError::chain_invalid(format!(
            "chain has {} certificates, at most {MAX_CHAIN_LENGTH} allowed",
            encoded.len()
        )));
    }
    let max_encoded = MAX_CERTIFICATE_SIZE.div_ceil(3) * 4 + 4;
    encoded
        .iter()
        .map(|cert| {
            if cert.len() > max_encoded {
                return Err(AttestationError::chain_invalid("certificate too large"));
            }
            decode_base64(cert, "certificate")
        })
        .collect()
}
