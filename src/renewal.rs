//! Proactive token renewal on a fixed long interval.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::token_manager::TokenManager;

pub struct RenewalScheduler {
    tokens: TokenManager,
    interval: Duration,
}

impl RenewalScheduler {
    pub fn new(tokens: TokenManager, interval: Duration) -> Self {
        Self { tokens, interval }
    }

    /// Sleep `interval`, renew, repeat until cancelled. Renewal happens even if
    /// the collector renewed recently; failures are logged and the loop goes on.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(interval = ?self.interval, "Token renewal task started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            tracing::info!("Scheduled token renewal");
            if let Err(e) = self.tokens.renew().await {
                tracing::warn!("Scheduled token renewal failed, keeping previous token: {}", e);
            }
        }

        tracing::info!("Token renewal task stopped");
    }
}
