//! Periodic power-data collection.
//!
//! Every cycle fetches once from the gateway (renewing the token and retrying
//! once if the gateway reports it expired) and appends exactly one record,
//! whether the fetch succeeded or not.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::Upstream;
use crate::error::{AuthError, FetchError, StoreError};
use crate::store::{FetchRecord, RecordStore};
use crate::token_manager::TokenManager;
use crate::types::{Envelope, error_payload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Fetching,
    Saving,
    Stopped,
}

impl CollectorState {
    pub fn is_running(self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl fmt::Display for CollectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Fetching => write!(f, "fetching"),
            Self::Saving => write!(f, "saving"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

pub struct Collector {
    tokens: TokenManager,
    upstream: Arc<dyn Upstream>,
    store: Arc<dyn RecordStore>,
    interval: Duration,
    state: watch::Sender<CollectorState>,
    cycles: AtomicU64,
}

impl Collector {
    pub fn new(
        tokens: TokenManager,
        upstream: Arc<dyn Upstream>,
        store: Arc<dyn RecordStore>,
        interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(CollectorState::Stopped);
        Self {
            tokens,
            upstream,
            store,
            interval,
            state,
            cycles: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> CollectorState {
        *self.state.borrow()
    }

    /// Records appended since startup, by the loop and by on-demand fetches.
    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Run the collection loop until `cancel` fires. The interval is measured
    /// from the end of one cycle to the start of the next.
    pub async fn run(&self, cancel: CancellationToken) {
        self.state.send_replace(CollectorState::Idle);
        tracing::info!(interval = ?self.interval, "Background data collection started");

        while !cancel.is_cancelled() {
            if let Err(e) = self.cycle(true).await {
                tracing::error!("Error collecting data: {}", e);
            }
            self.state.send_replace(CollectorState::Idle);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.state.send_replace(CollectorState::Stopped);
        tracing::info!("Background data collection stopped");
    }

    /// One fetch-and-save cycle outside the loop (used by the fetch-now route).
    pub async fn collect_once(&self) -> Result<FetchRecord, StoreError> {
        self.cycle(false).await
    }

    async fn cycle(&self, publish_state: bool) -> Result<FetchRecord, StoreError> {
        if publish_state {
            self.state.send_replace(CollectorState::Fetching);
        }
        tracing::info!("Fetching power data from gateway");

        let payload = match self.fetch().await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(kind = e.kind(), "Power data fetch failed: {}", e);
                error_payload(e.kind(), &e.to_string())
            }
        };

        if publish_state {
            self.state.send_replace(CollectorState::Saving);
        }
        let record = self.store.append(&payload).await?;
        self.cycles.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            record_id = record.id,
            result_code = %record.result_code,
            "Data saved"
        );
        Ok(record)
    }

    /// Fetch power data, renewing the token and retrying exactly once when the
    /// gateway reports it invalid. A second invalid response is returned as is.
    pub async fn fetch(&self) -> Result<Value, FetchError> {
        let credentials = self
            .tokens
            .credentials()
            .ok_or(AuthError::MissingCredentials)?;
        let token = self.tokens.token_or_renew().await?;

        let body = self.upstream.fetch_power_data(&token, credentials).await?;
        if !Envelope::from_value(&body).is_token_invalid() {
            return Ok(body);
        }

        tracing::warn!("Token invalid, renewing");
        let token = self
            .tokens
            .renew()
            .await
            .map_err(FetchError::TokenInvalidAtFetch)?;

        let body = self.upstream.fetch_power_data(&token, credentials).await?;
        if Envelope::from_value(&body).is_token_invalid() {
            tracing::warn!("Token still rejected after renewal; recording response");
        }
        Ok(body)
    }
}
