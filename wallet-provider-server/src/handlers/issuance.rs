//! Wallet Application Attestation issuance handler
//!
//! Handles POST /wallet-application-attestation requests. Evidence
//! verification parses certificates and checks signatures, so it runs on the
//! blocking pool. Evidence is only parsed when attestation is enabled; with
//! attestation disabled it is ignored whatever its shape.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::jwk::Jwk;
use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::Value;
use utoipa::ToSchema;
use wallet_provider_core::{AttestationError, IssuanceRequest, PlatformEvidence, WalletProviderError};

use crate::error::ApiError;
use crate::state::AppState;

/// Media type of the issued token.
pub const APPLICATION_JWT: &str = "application/jwt";

/// Request body for token issuance.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WalletApplicationAttestationRequest {
    /// The challenge exactly as returned by `POST /challenge`
    #[schema(example = "bS1yWkNxT0VoV2V5bU1rM3Z0c0Z4Zw")]
    pub challenge: String,

    /// Public key to bind into the token (`cnf.jwk`)
    #[schema(value_type = Object)]
    pub jwk: Jwk,

    /// Platform attestation evidence. Either
    /// `{"platform": "android", "certificate_chain": [...]}` or
    /// `{"platform": "ios", "attestation": "...", "key_id": "..."}`.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub evidence: Option<Value>,

    /// Arbitrary JSON embedded verbatim as the `wallet_metadata` claim
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub wallet_metadata: Option<Box<RawValue>>,
}

impl WalletApplicationAttestationRequest {
    /// Converts to a core request, parsing evidence only if it will be checked.
    pub fn into_issuance_request(self, attestation_enabled: bool) -> Result<IssuanceRequest, ApiError> {
        let evidence = match self.evidence {
            Some(raw) if attestation_enabled => Some(
                serde_json::from_value::<PlatformEvidence>(raw).map_err(|e| {
                    WalletProviderError::from(AttestationError::chain_invalid(format!(
                        "malformed evidence: {e}"
                    )))
                })?,
            ),
            Some(_) => {
                tracing::debug!("Ignoring evidence, attestation disabled");
                None
            }
            None => None,
        };

        Ok(IssuanceRequest {
            challenge: self.challenge,
            evidence,
            device_key: self.jwk,
            wallet_metadata: self.wallet_metadata,
        })
    }
}

/// Issue a Wallet Application Attestation
///
/// Consumes the challenge, verifies the evidence against the attestation
/// policy and returns a signed token binding the presented key.
#[utoipa::path(
    post,
    path = "/wallet-application-attestation",
    tag = "Issuance",
    request_body = WalletApplicationAttestationRequest,
    responses(
        (status = 200, description = "Signed token", body = String, content_type = "application/jwt"),
        (status = 400, description = "Malformed request, unusable challenge or malformed evidence"),
        (status = 403, description = "Evidence rejected by the attestation policy"),
        (status = 500, description = "Token could not be signed")
    )
)]
pub async fn issue_handler(
    State(state): State<AppState>,
    payload: Result<Json<WalletApplicationAttestationRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let request = request.into_issuance_request(state.provider.attestation_enabled())?;

    let provider = state.provider.clone();
    let token = tokio::task::spawn_blocking(move || provider.verify_and_issue(request))
        .await
        .map_err(|e| ApiError::internal(format!("Verification task failed: {e}")))??;

    Ok(([(header::CONTENT_TYPE, APPLICATION_JWT)], token.into_string()).into_response())
}
