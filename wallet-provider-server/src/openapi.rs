//! OpenAPI documentation configuration
//!
//! Generates the OpenAPI 3 document served at `/api-docs/openapi.json`.

use utoipa::OpenApi;

use crate::handlers::{
    ChallengeResponse, HealthResponse, ReadyResponse, WalletApplicationAttestationRequest,
    WalletInstanceAttestationRequest,
};

/// Wallet Provider API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Wallet Provider API",
        description = r#"
## Wallet Application Attestation issuance

A wallet instance proves that it runs as a genuine, allow-listed application
on a trustworthy device and receives a signed attestation token binding one
of its keys.

### How It Works

1. Request a single-use challenge via `POST /challenge`
2. Generate a key on the device with the challenge bound into its platform
   attestation (Android key attestation or iOS App Attest)
3. Present the challenge, the public key and the evidence via
   `POST /wallet-application-attestation`
4. Verify the returned token against `GET /jwks`

Deployments running without platform attestation can also issue a Wallet
Instance Attestation directly via `POST /wallet-instance-attestation/jwk`.
"#
    ),
    tags(
        (name = "Issuance", description = "Challenge issuance and Wallet Application Attestation signing"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::health::ready,
        crate::handlers::challenge::challenge_handler,
        crate::handlers::issuance::issue_handler,
        crate::handlers::instance::instance_attestation_handler,
        crate::handlers::jwks::jwks_handler,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            ChallengeResponse,
            WalletApplicationAttestationRequest,
            WalletInstanceAttestationRequest,
        )
    )
)]
pub struct ApiDoc;
