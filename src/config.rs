//! Process configuration read from the environment (and an optional `.env` file).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::credential::Credentials;

pub const DEFAULT_GATEWAY_URL: &str = "https://gateway.isolarcloud.com.hk";
pub const DEFAULT_SYS_CODE: &str = "901";
pub const DEFAULT_DATABASE_URL: &str = "sqlite:power_data.db?mode=rwc";
pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(300);
/// 23h59m, just under the gateway's ~24h token lifetime.
pub const DEFAULT_TOKEN_RENEWAL_INTERVAL: Duration = Duration::from_secs(86_340);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway connection settings shared by the client and the CLI.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub sys_code: String,
    pub request_timeout: Duration,
}

/// Full server settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; `["*"]` means any.
    pub cors_origins: Vec<String>,
    pub database_url: String,
    pub gateway: GatewayConfig,
    pub fetch_interval: Duration,
    pub token_renewal_interval: Duration,
    /// `None` when any credential variable is missing or empty.
    pub credentials: Option<Credentials>,
}

impl Settings {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            tracing::warn!("Failed to load .env file: {}", e);
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let credentials = Credentials::from_parts(
            lookup("API_ACCESS_KEY"),
            lookup("API_APPKEY"),
            lookup("USER_ACCOUNT"),
            lookup("USER_PASSWORD"),
        );

        let cors_origins = lookup("CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty())
            .unwrap_or_else(|| vec!["*".to_string()]);

        Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 8000),
            cors_origins,
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            gateway: GatewayConfig {
                base_url: lookup("GATEWAY_URL")
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
                sys_code: lookup("SYS_CODE").unwrap_or_else(|| DEFAULT_SYS_CODE.to_string()),
                request_timeout: secs_or(&lookup, "REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT),
            },
            fetch_interval: secs_or(&lookup, "FETCH_INTERVAL_SECS", DEFAULT_FETCH_INTERVAL),
            token_renewal_interval: secs_or(
                &lookup,
                "TOKEN_RENEWAL_INTERVAL_SECS",
                DEFAULT_TOKEN_RENEWAL_INTERVAL,
            ),
            credentials,
        }
    }
}

fn parse_or<T: FromStr + Copy>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value for {}: {:?}, using default", key, raw);
            default
        }),
        None => default,
    }
}

/// Whole seconds; zero is rejected like any other unparsable value.
fn secs_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    match parse_or(lookup, key, default.as_secs()) {
        0 => {
            tracing::warn!("Invalid value for {}: must be at least 1 second, using default", key);
            default
        }
        secs => Duration::from_secs(secs),
    }
}
