//! Wallet Provider Core - Wallet Application Attestation issuance
//!
//! A wallet asks for a single-use challenge, has its platform attest a key
//! bound to that challenge, and presents the evidence together with the public
//! key. When the evidence satisfies the configured policy the provider signs a
//! Wallet Application Attestation token binding that key.
//!
//! # Features
//!
//! - Single-use challenges with atomic consumption
//! - Android key attestation (hardware, Nougat hybrid and software levels)
//! - iOS App Attest verification
//! - JWT signing with a generated key or a PKCS#12 keystore
//! - Wallet instance attestations for deployments without platform attestation
//!
//! # Example
//!
//! ```no_run
//! use wallet_provider_core::{IssuanceRequest, WalletProvider, WalletProviderConfiguration};
//!
//! # fn example(device_key: jsonwebtoken::jwk::Jwk) -> Result<(), Box<dyn std::error::Error>> {
//! let config = WalletProviderConfiguration::from_json_file("wallet-provider.json")?;
//! let provider = WalletProvider::new(&config)?;
//!
//! let challenge = provider.request_challenge()?;
//! // ... the wallet attests a key bound to `challenge.encoded()` ...
//! let token = provider.verify_and_issue(IssuanceRequest {
//!     challenge: challenge.encoded(),
//!     evidence: None,
//!     device_key,
//!     wallet_metadata: None,
//! })?;
//! println!("{}", token.as_str());
//! # Ok(())
//! # }
//! ```

pub mod attestation;
pub mod challenge;
pub mod claims;
pub mod clock;
pub mod config;
pub mod error;
pub mod issuance;
pub mod jwk;
pub mod signing;

pub use attestation::{
    AttestationPolicy, AttestationType, Platform, PlatformEvidence, TrustAnchor, Verdict,
};
pub use challenge::{Challenge, ChallengeStore};
pub use claims::{
    WalletApplicationAttestationClaims, WalletInformation, INSTANCE_TOKEN_TYPE, TOKEN_TYPE,
};
pub use clock::{Clock, SystemClock};
pub use config::WalletProviderConfiguration;
pub use error::{
    AttestationError, ChallengeError, ConfigError, IssuanceError, PolicyFlag, Result,
    WalletProviderError,
};
pub use issuance::{InstanceAttestationRequest, IssuanceRequest, SignedToken, WalletProvider};
pub use jwk::DeviceKey;
pub use signing::{SigningAlgorithm, SigningKey};
