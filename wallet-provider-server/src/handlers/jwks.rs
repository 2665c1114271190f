//! Signing key publication
//!
//! Handles GET /jwks so relying parties can verify issued tokens.

use axum::{extract::State, Json};
use jsonwebtoken::jwk::JwkSet;

use crate::state::AppState;

/// Public key set of the token signer
#[utoipa::path(
    get,
    path = "/jwks",
    tag = "Issuance",
    responses(
        (status = 200, description = "JWK set containing the active signing key", content_type = "application/json")
    )
)]
pub async fn jwks_handler(State(state): State<AppState>) -> Json<JwkSet> {
    Json(state.provider.jwks())
}
