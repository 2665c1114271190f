//! Wallet Instance Attestation handler
//!
//! Handles POST /wallet-instance-attestation/jwk requests. No challenge or
//! platform evidence is involved, so the provider refuses these while
//! attestation is enabled.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::jwk::Jwk;
use serde::Deserialize;
use serde_json::value::RawValue;
use utoipa::ToSchema;
use wallet_provider_core::InstanceAttestationRequest;

use crate::error::ApiError;
use crate::handlers::issuance::APPLICATION_JWT;
use crate::state::AppState;

/// Request body for a wallet instance attestation.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WalletInstanceAttestationRequest {
    /// Public key to bind into the token (`cnf.jwk`)
    #[schema(value_type = Object)]
    pub jwk: Jwk,

    /// Arbitrary JSON embedded verbatim as the `wallet_metadata` claim
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub wallet_metadata: Option<Box<RawValue>>,
}

impl From<WalletInstanceAttestationRequest> for InstanceAttestationRequest {
    fn from(request: WalletInstanceAttestationRequest) -> Self {
        Self {
            device_key: request.jwk,
            wallet_metadata: request.wallet_metadata,
        }
    }
}

/// Issue a Wallet Instance Attestation
///
/// Signs a token binding the presented key. Only available while platform
/// attestation is disabled.
#[utoipa::path(
    post,
    path = "/wallet-instance-attestation/jwk",
    tag = "Issuance",
    request_body = WalletInstanceAttestationRequest,
    responses(
        (status = 200, description = "Signed token", body = String, content_type = "application/jwt"),
        (status = 400, description = "Malformed request or unusable key, or attestation is enforced"),
        (status = 500, description = "Token could not be signed")
    )
)]
pub async fn instance_attestation_handler(
    State(state): State<AppState>,
    payload: Result<Json<WalletInstanceAttestationRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let token = state.provider.issue_instance_attestation(request.into())?;

    Ok(([(header::CONTENT_TYPE, APPLICATION_JWT)], token.into_string()).into_response())
}
