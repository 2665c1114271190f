//! Background removal of expired challenges

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use wallet_provider_core::WalletProvider;

/// Purges expired challenges every `period` until the handle is aborted.
pub fn spawn_challenge_sweeper(provider: Arc<WalletProvider>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = provider.purge_expired_challenges();
            if removed > 0 {
                tracing::debug!(removed, remaining = provider.pending_challenges(), "Swept expired challenges");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta};
    use wallet_provider_core::clock::ManualClock;
    use wallet_provider_core::WalletProviderConfiguration;

    const CONFIG: &str = r#"{
        "challenge": { "length": 16, "validity": 60 },
        "wallet_application_attestation": {
            "wallet_information": {
                "general_info": {
                    "wallet_provider_name": "Example Provider",
                    "wallet_solution_id": "example-wallet",
                    "wallet_solution_version": "1.0.0",
                    "wallet_solution_certification_information": "https://example.com/cert"
                }
            }
        }
    }"#;

    #[tokio::test]
    async fn test_sweeper_purges_expired_challenges() {
        let clock = Arc::new(ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap()));
        let config = WalletProviderConfiguration::from_json_str(CONFIG).unwrap();
        let provider = Arc::new(WalletProvider::with_clock(&config, clock.clone()).unwrap());

        provider.request_challenge().unwrap();
        provider.request_challenge().unwrap();
        assert_eq!(provider.pending_challenges(), 2);

        let handle = spawn_challenge_sweeper(provider.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(provider.pending_challenges(), 2);

        clock.advance(TimeDelta::seconds(61));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(provider.pending_challenges(), 0);

        handle.abort();
    }
}
