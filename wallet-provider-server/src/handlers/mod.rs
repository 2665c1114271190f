//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod challenge;
pub mod health;
pub mod instance;
pub mod issuance;
pub mod jwks;

pub use crate::state::AppState;
pub use challenge::{challenge_handler, ChallengeResponse};
pub use health::{health, ready, HealthResponse, ReadyResponse};
pub use instance::{instance_attestation_handler, WalletInstanceAttestationRequest};
pub use issuance::{issue_handler, WalletApplicationAttestationRequest, APPLICATION_JWT};
pub use jwks::jwks_handler;
