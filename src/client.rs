use async_trait::async_trait;
use reqwest::{Client, header};
use serde::Serialize;
use serde_json::Value;

use crate::config::GatewayConfig;
use crate::credential::{Credentials, Token};
use crate::error::UpstreamError;
use crate::types::{LoginRequest, PowerDataRequest};

const LOGIN_PATH: &str = "/openapi/login";
const POWER_DATA_PATH: &str = "/openapi/getPowerStationInfoPowerByCodeList";

/// The two calls this service makes against the gateway.
///
/// Both return the raw JSON body; interpreting `result_code` is up to the caller.
/// Neither call retries.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<Value, UpstreamError>;

    async fn fetch_power_data(
        &self,
        token: &Token,
        credentials: &Credentials,
    ) -> Result<Value, UpstreamError>;
}

/// HTTP client for the iSolarCloud gateway.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http_client: Client,
    config: GatewayConfig,
}

impl UpstreamClient {
    pub fn new(config: GatewayConfig) -> Result<Self, UpstreamError> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        access_key: &str,
        body: &B,
    ) -> Result<Value, UpstreamError> {
        let url = format!("{}{}", self.config.base_url, path);

        let response = self
            .http_client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-access-key", access_key)
            .header("sys_code", &self.config.sys_code)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%url, status = status.as_u16(), "Gateway returned error status");
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Upstream for UpstreamClient {
    async fn login(&self, credentials: &Credentials) -> Result<Value, UpstreamError> {
        let request = LoginRequest {
            appkey: &credentials.app_key,
            user_account: &credentials.account,
            user_password: &credentials.password,
        };
        self.post(LOGIN_PATH, &credentials.access_key, &request).await
    }

    async fn fetch_power_data(
        &self,
        token: &Token,
        credentials: &Credentials,
    ) -> Result<Value, UpstreamError> {
        let request = PowerDataRequest {
            token: token.as_str(),
            appkey: &credentials.app_key,
        };
        self.post(POWER_DATA_PATH, &credentials.access_key, &request)
            .await
    }
}
