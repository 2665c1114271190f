//! Challenge handler
//!
//! Handles POST /challenge requests.

use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::state::AppState;

/// A freshly issued single-use challenge.
#[derive(Serialize, ToSchema)]
pub struct ChallengeResponse {
    /// Challenge bytes, base64url without padding. The wallet binds its
    /// attested key to the decoded bytes.
    #[schema(example = "bS1yWkNxT0VoV2V5bU1rM3Z0c0Z4Zw")]
    pub challenge: String,
    /// Expiry, seconds since the Unix epoch
    #[schema(example = 1760000300)]
    pub expires_at: i64,
}

/// Issue a challenge
///
/// The challenge must be presented once, before it expires, together with
/// attestation evidence bound to it.
#[utoipa::path(
    post,
    path = "/challenge",
    tag = "Issuance",
    responses(
        (status = 200, description = "Challenge issued", body = ChallengeResponse),
        (status = 503, description = "Secure random generator unavailable")
    )
)]
pub async fn challenge_handler(
    State(state): State<AppState>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let challenge = state.provider.request_challenge()?;
    Ok(Json(ChallengeResponse {
        challenge: challenge.encoded(),
        expires_at: challenge.expires_at().timestamp(),
    }))
}
