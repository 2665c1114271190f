//! Wallet provider configuration
//!
//! Deserialized from JSON. Durations are whole seconds. Sum types carry an
//! internal tag (`mode` for on/off switches, `type` for alternatives), for example:
//!
//! ```json
//! {
//!   "challenge": { "length": 128, "validity": 300 },
//!   "signing_key": { "type": "generate_random" },
//!   "attestation_verification": { "mode": "disabled" },
//!   "wallet_application_attestation": {
//!     "issuer": "eudi-srv-wallet-provider",
//!     "validity": { "type": "arf_max" },
//!     "wallet_information": {
//!       "general_info": {
//!         "wallet_provider_name": "Example Provider",
//!         "wallet_solution_id": "example-wallet",
//!         "wallet_solution_version": "1.0.0",
//!         "wallet_solution_certification_information": "https://example.com/cert"
//!       }
//!     }
//!   }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Deserializer};
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::challenge::DEFAULT_CHALLENGE_CAPACITY;
use crate::claims::WalletInformation;
use crate::error::ConfigError;
use crate::signing::SigningAlgorithm;

/// Upper bound on the configured challenge length in bytes.
pub const MAX_CHALLENGE_LENGTH: usize = 128;

/// Lower bound on the configured challenge length in bytes.
pub const MIN_CHALLENGE_LENGTH: usize = 16;

const DEFAULT_ISSUER: &str = "eudi-srv-wallet-provider";
const FIVE_MINUTES: Duration = Duration::from_secs(300);

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletProviderConfiguration {
    #[serde(default)]
    pub challenge: ChallengeConfiguration,
    #[serde(default)]
    pub signing_key: SigningKeyConfiguration,
    #[serde(default)]
    pub attestation_verification: AttestationVerificationConfiguration,
    pub wallet_application_attestation: WalletApplicationAttestationConfiguration,
}

impl WalletProviderConfiguration {
    /// Reads and validates a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make the service unsafe or unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.challenge.validate()?;
        if let SigningKeyConfiguration::LoadFromKeystore(keystore) = &self.signing_key {
            require_non_blank(&keystore.key_alias, "signing_key.key_alias")?;
        }
        if let AttestationVerificationConfiguration::Enabled(enabled) =
            &self.attestation_verification
        {
            enabled.validate()?;
        }
        self.wallet_application_attestation.validate()
    }
}

/// Challenge issuance parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChallengeConfiguration {
    /// Number of random bytes per challenge.
    pub length: usize,
    #[serde(deserialize_with = "duration_secs")]
    pub validity: Duration,
    /// Most challenges held at once, consumed or not.
    pub capacity: usize,
}

impl Default for ChallengeConfiguration {
    fn default() -> Self {
        Self {
            length: MAX_CHALLENGE_LENGTH,
            validity: FIVE_MINUTES,
            capacity: DEFAULT_CHALLENGE_CAPACITY,
        }
    }
}

impl ChallengeConfiguration {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CHALLENGE_LENGTH..=MAX_CHALLENGE_LENGTH).contains(&self.length) {
            return Err(ConfigError::InvalidChallengeLength {
                actual: self.length,
                min: MIN_CHALLENGE_LENGTH,
                max: MAX_CHALLENGE_LENGTH,
            });
        }
        if self.capacity == 0 {
            return Err(ConfigError::ZeroChallengeCapacity);
        }
        require_positive(self.validity, "challenge.validity")
    }
}

/// Where the token signing key comes from.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SigningKeyConfiguration {
    /// Fresh ES256 key per process. Tokens do not survive a restart.
    #[default]
    GenerateRandom,
    LoadFromKeystore(KeystoreConfiguration),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeystoreType {
    #[default]
    Pkcs12,
    Jks,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeystoreConfiguration {
    pub keystore_file: PathBuf,
    #[serde(default)]
    pub keystore_password: Option<Secret>,
    #[serde(default)]
    pub keystore_type: KeystoreType,
    pub key_alias: String,
    #[serde(default)]
    pub key_password: Option<Secret>,
    pub algorithm: SigningAlgorithm,
}

/// A password that is wiped from memory on drop and never printed.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Master switch for device attestation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AttestationVerificationConfiguration {
    /// Any evidence is accepted. Development only.
    #[default]
    Disabled,
    Enabled(EnabledAttestationConfiguration),
}

/// Policy sections reject unknown keys so a misspelled flag cannot fall back
/// to its default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnabledAttestationConfiguration {
    pub android: AndroidAttestationConfiguration,
    pub ios: IosAttestationConfiguration,
    /// Applies to every platform. The larger of this and a platform skew wins.
    #[serde(deserialize_with = "duration_secs")]
    pub verification_time_skew: Duration,
}

impl EnabledAttestationConfiguration {
    fn validate(&self) -> Result<(), ConfigError> {
        for app in &self.android.applications {
            require_non_blank(&app.package_name, "android.applications.package_name")?;
            if app.signing_certificate_digests.is_empty() {
                return Err(ConfigError::EmptyDigestSet(app.package_name.clone()));
            }
        }
        for app in &self.ios.applications {
            require_non_blank(&app.team, "ios.applications.team")?;
            require_non_blank(&app.bundle, "ios.applications.bundle")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AndroidAttestationConfiguration {
    pub applications: Vec<AndroidApplication>,
    pub strong_box_required: bool,
    pub unlocked_bootloader_allowed: bool,
    pub rollback_resistance_required: bool,
    pub leaf_certificate_validity_ignored: bool,
    #[serde(deserialize_with = "duration_secs")]
    pub verification_skew: Duration,
    pub attestation_statement_validity: AttestationStatementValidity,
    pub hardware_attestation_enabled: bool,
    pub nougat_attestation_enabled: bool,
    pub software_attestation_enabled: bool,
    /// PEM bundle replacing the built-in Google roots.
    pub trust_anchors: Option<PathBuf>,
}

impl Default for AndroidAttestationConfiguration {
    fn default() -> Self {
        Self {
            applications: Vec::new(),
            strong_box_required: false,
            unlocked_bootloader_allowed: false,
            rollback_resistance_required: false,
            leaf_certificate_validity_ignored: false,
            verification_skew: Duration::ZERO,
            attestation_statement_validity: AttestationStatementValidity::default(),
            hardware_attestation_enabled: true,
            nougat_attestation_enabled: false,
            software_attestation_enabled: false,
            trust_anchors: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AndroidApplication {
    pub package_name: String,
    pub signing_certificate_digests: Vec<CertificateDigest>,
}

/// Raw bytes of a signing certificate digest, configured as base64url.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct CertificateDigest(Vec<u8>);

impl CertificateDigest {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<String> for CertificateDigest {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        URL_SAFE_NO_PAD
            .decode(value.trim_end_matches('='))
            .or_else(|_| URL_SAFE.decode(&value))
            .map(Self)
            .map_err(|e| format!("invalid base64url certificate digest {value:?}: {e}"))
    }
}

/// Freshness check on the attestation statement itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case", deny_unknown_fields)]
pub enum AttestationStatementValidity {
    Enforced {
        #[serde(default = "five_minutes", deserialize_with = "duration_secs")]
        skew: Duration,
    },
    Ignored,
}

impl Default for AttestationStatementValidity {
    fn default() -> Self {
        Self::Enforced { skew: FIVE_MINUTES }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IosAttestationConfiguration {
    pub applications: Vec<IosApplication>,
    #[serde(deserialize_with = "duration_secs")]
    pub attestation_statement_validity_skew: Duration,
    /// PEM bundle replacing the built-in Apple App Attestation root.
    pub trust_anchors: Option<PathBuf>,
}

impl Default for IosAttestationConfiguration {
    fn default() -> Self {
        Self {
            applications: Vec::new(),
            attestation_statement_validity_skew: FIVE_MINUTES,
            trust_anchors: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IosApplication {
    /// Apple developer team identifier.
    pub team: String,
    pub bundle: String,
    #[serde(default)]
    pub environment: AppAttestEnvironment,
}

impl IosApplication {
    /// `<team>.<bundle>`, the value hashed into the authenticator data.
    pub fn app_id(&self) -> String {
        format!("{}.{}", self.team, self.bundle)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppAttestEnvironment {
    #[default]
    Production,
    Development,
}

/// Token contents and lifetime.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletApplicationAttestationConfiguration {
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default)]
    pub validity: TokenValidity,
    #[serde(default)]
    pub wallet_name: Option<String>,
    #[serde(default)]
    pub wallet_link: Option<Url>,
    pub wallet_information: WalletInformation,
}

impl WalletApplicationAttestationConfiguration {
    fn validate(&self) -> Result<(), ConfigError> {
        require_non_blank(&self.issuer, "wallet_application_attestation.issuer")?;
        if let Some(name) = &self.wallet_name {
            require_non_blank(name, "wallet_application_attestation.wallet_name")?;
        }
        if let TokenValidity::Fixed { duration } = self.validity {
            require_positive(duration, "wallet_application_attestation.validity")?;
        }
        let general = &self.wallet_information.general_info;
        require_non_blank(&general.wallet_provider_name, "wallet_provider_name")?;
        require_non_blank(&general.wallet_solution_id, "wallet_solution_id")?;
        require_non_blank(&general.wallet_solution_version, "wallet_solution_version")
    }
}

/// Token lifetime policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TokenValidity {
    /// The longest lifetime the ARF allows for a WUA/WIA (24 hours).
    #[default]
    ArfMax,
    Fixed {
        #[serde(deserialize_with = "duration_secs")]
        duration: Duration,
    },
}

impl TokenValidity {
    pub const ARF_MAX: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn duration(&self) -> Duration {
        match self {
            Self::ArfMax => Self::ARF_MAX,
            Self::Fixed { duration } => *duration,
        }
    }
}

fn duration_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

fn five_minutes() -> Duration {
    FIVE_MINUTES
}

fn default_issuer() -> String {
    DEFAULT_ISSUER.to_string()
}

fn require_non_blank(value: &str, field: &'static str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Blank(field));
    }
    Ok(())
}

fn require_positive(value: Duration, field: &'static str) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::NonPositiveDuration(field));
    }
    Ok(())
}
