//! API error handling module
//!
//! Maps wallet provider failures onto HTTP status codes and a JSON body of the
//! form `{"error": ..., "code": ...}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use wallet_provider_core::{AttestationError, ChallengeError, WalletProviderError};

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - the body could not be read as an issuance request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error - unexpected server-side failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Failure reported by the wallet provider
    #[error(transparent)]
    WalletProvider(#[from] WalletProviderError),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create an internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::WalletProvider(e) => match e {
                WalletProviderError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                WalletProviderError::Challenge(
                    ChallengeError::RandomnessUnavailable | ChallengeError::StoreFull,
                ) => StatusCode::SERVICE_UNAVAILABLE,
                WalletProviderError::Challenge(_) => StatusCode::BAD_REQUEST,
                // Malformed or unverifiable evidence
                WalletProviderError::Attestation(AttestationError::ChainInvalid(_)) => {
                    StatusCode::BAD_REQUEST
                }
                WalletProviderError::Attestation(_) => StatusCode::FORBIDDEN,
                WalletProviderError::Issuance(_) | WalletProviderError::Configuration(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Get the error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_REQUEST",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::WalletProvider(e) => e.kind(),
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal server error".to_string(),
            Self::WalletProvider(WalletProviderError::Issuance(_))
            | Self::WalletProvider(WalletProviderError::Configuration(_)) => {
                "Token issuance failed".to_string()
            }
            Self::WalletProvider(WalletProviderError::Challenge(
                ChallengeError::RandomnessUnavailable | ChallengeError::StoreFull,
            )) => "Challenge generation unavailable".to_string(),
            _ => self.to_string(),
        }
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) | Self::WalletProvider(WalletProviderError::InvalidRequest(_)) => {
                "bad_request"
            }
            Self::Internal(_) => "internal",
            Self::WalletProvider(WalletProviderError::Challenge(_)) => "challenge",
            Self::WalletProvider(WalletProviderError::Attestation(_)) => "attestation",
            Self::WalletProvider(WalletProviderError::Issuance(_)) => "issuance",
            Self::WalletProvider(WalletProviderError::Configuration(_)) => "configuration",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Server error"
            );
        } else if status == StatusCode::FORBIDDEN {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Attestation rejected"
            );
        } else {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Client error"
            );
        }

        let body = serde_json::json!({
            "error": client_message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}
