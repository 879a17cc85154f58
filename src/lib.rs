pub mod api;
pub mod client;
pub mod collector;
pub mod config;
pub mod credential;
pub mod error;
pub mod renewal;
pub mod store;
pub mod token_manager;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{Upstream, UpstreamClient};
pub use collector::{Collector, CollectorState};
pub use config::{GatewayConfig, Settings};
pub use credential::{Credentials, Token};
pub use error::{AuthError, FetchError, StoreError, UpstreamError};
pub use renewal::RenewalScheduler;
pub use store::{FetchRecord, RecordStore, SqliteRecordStore};
pub use token_manager::TokenManager;
pub use types::{Envelope, TokenLocation};
