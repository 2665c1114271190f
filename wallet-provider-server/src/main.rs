//! Wallet Provider Server entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wallet_provider_core::{WalletProvider, WalletProviderConfiguration};
use wallet_provider_server::{
    create_router_with_config, spawn_challenge_sweeper, AppState, Config,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = Config::from_env();

    let Some(path) = config.wallet_provider_config.as_ref() else {
        tracing::error!("WALLET_PROVIDER_CONFIG is not set");
        return Err("WALLET_PROVIDER_CONFIG must name the wallet provider JSON configuration".into());
    };

    let provider_config = WalletProviderConfiguration::from_json_file(path)?;
    let provider = Arc::new(WalletProvider::new(&provider_config)?);

    tracing::info!(
        config = %path.display(),
        attestation_enabled = provider.attestation_enabled(),
        signing_key = provider.signing_key().key_id(),
        algorithm = provider.signing_key().algorithm().as_str(),
        "Wallet provider initialized"
    );

    let sweeper = spawn_challenge_sweeper(
        provider.clone(),
        Duration::from_secs(config.challenge_sweep_interval_secs),
    );

    let app = create_router_with_config(AppState::new(provider), &config);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
