//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;

use wallet_provider_core::WalletProvider;

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// Challenge store, attestation policy and signer
    pub provider: Arc<WalletProvider>,
}

impl AppState {
    pub fn new(provider: Arc<WalletProvider>) -> Self {
        Self { provider }
    }
}
