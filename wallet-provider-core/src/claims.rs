//! Wallet Application Attestation claims
//!
//! Builds the payload signed into each token. The wallet information block is
//! static per deployment; wallet metadata is whatever JSON the client sent and
//! is embedded without modification. It is carried as raw JSON text so numbers
//! keep their exact spelling.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::Jwk;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use url::Url;

use crate::clock::{add_saturating, to_delta};
use crate::config::{TokenValidity, WalletApplicationAttestationConfiguration};
use crate::jwk::DeviceKey;

/// JOSE `typ` of an issued token.
pub const TOKEN_TYPE: &str = "oauth-client-attestation+jwt";

/// JOSE `typ` of a wallet instance attestation.
pub const INSTANCE_TOKEN_TYPE: &str = "wallet-attestation+jwt";

/// `eudi_wallet_info` claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletInformation {
    pub general_info: GeneralInformation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wscd_info: Option<WscdInformation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralInformation {
    pub wallet_provider_name: String,
    pub wallet_solution_id: String,
    pub wallet_solution_version: String,
    pub wallet_solution_certification_information: Value,
}

/// Wallet secure cryptographic device description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WscdInformation {
    pub wscd_type: String,
    pub wscd_certification_information: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    pub jwk: Jwk,
}

/// The signed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletApplicationAttestationClaims {
    pub iss: String,
    /// RFC 7638 thumbprint of the confirmed key.
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub cnf: Confirmation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_link: Option<Url>,
    pub eudi_wallet_info: WalletInformation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_metadata: Option<Box<RawValue>>,
}

/// Fills the claim set from deployment settings and a verified key.
#[derive(Debug, Clone)]
pub struct ClaimsAssembler {
    issuer: String,
    validity: Duration,
    wallet_name: Option<String>,
    wallet_link: Option<Url>,
    wallet_information: WalletInformation,
}

impl ClaimsAssembler {
    pub fn new(config: &WalletApplicationAttestationConfiguration) -> Self {
        Self {
            issuer: config.issuer.clone(),
            validity: config.validity.duration().min(TokenValidity::ARF_MAX),
            wallet_name: config.wallet_name.clone(),
            wallet_link: config.wallet_link.clone(),
            wallet_information: config.wallet_information.clone(),
        }
    }

    /// Token lifetime after capping at the ARF maximum.
    pub fn validity(&self) -> Duration {
        self.validity
    }

    pub fn assemble(
        &self,
        key: &DeviceKey,
        wallet_metadata: Option<Box<RawValue>>,
        now: DateTime<Utc>,
    ) -> WalletApplicationAttestationClaims {
        let expires_at = add_saturating(now, to_delta(self.validity));
        WalletApplicationAttestationClaims {
            iss: self.issuer.clone(),
            sub: key.thumbprint(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            cnf: Confirmation {
                jwk: key.jwk().clone(),
            },
            wallet_name: self.wallet_name.clone(),
            wallet_link: self.wallet_link.clone(),
            eudi_wallet_info: self.wallet_information.clone(),
            wallet_metadata,
        }
    }
}
