//! Error types for the gateway client, token lifecycle, collector and record store.

use thiserror::Error;

/// Failure of a single HTTP call against the gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("gateway returned HTTP {0}")]
    Status(u16),

    #[error("failed to decode gateway response: {0}")]
    Decode(String),
}

impl UpstreamError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transport(_) => "transport",
            Self::Status(_) => "http_status",
            Self::Decode(_) => "decode",
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Outcome of a failed token renewal.
///
/// Cloneable so that every waiter of a coalesced renewal receives the same error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credentials: API_ACCESS_KEY, API_APPKEY, USER_ACCOUNT and USER_PASSWORD are required")]
    MissingCredentials,

    #[error("login request failed: {0}")]
    Transport(#[from] UpstreamError),

    #[error("login rejected (result_code {code}): {message}")]
    LoginFailed { code: String, message: String },

    #[error("login succeeded but no token was found in the response")]
    EmptyToken,
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing_credentials",
            Self::Transport(_) => "transport",
            Self::LoginFailed { .. } => "login_failed",
            Self::EmptyToken => "empty_token",
        }
    }
}

/// Failure of one collection cycle before anything could be persisted.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("failed to obtain token: {0}")]
    Auth(#[from] AuthError),

    #[error("power data request failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("token expired during fetch and renewal failed: {0}")]
    TokenInvalidAtFetch(AuthError),
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(err) => err.kind(),
            Self::Upstream(err) => err.kind(),
            Self::TokenInvalidAtFetch(_) => "token_invalid",
        }
    }
}

/// Record store failure.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid stored timestamp: {0}")]
    Timestamp(String),
}
