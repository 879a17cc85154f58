use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `result_code` the gateway uses for a successful login.
pub const LOGIN_SUCCESS_CODE: &str = "1";
/// `result_code` the gateway returns when the session token has expired.
pub const TOKEN_INVALID_CODE: &str = "E00003";
/// `result_msg` that accompanies an expired session token.
pub const TOKEN_INVALID_MSG: &str = "er_token_login_invalid";
/// `result_code` written for locally produced error payloads and placeholders.
pub const LOCAL_ERROR_CODE: &str = "0";

/// Login request body.
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub appkey: &'a str,
    pub user_account: &'a str,
    pub user_password: &'a str,
}

/// Power-station data request body.
#[derive(Debug, Serialize)]
pub struct PowerDataRequest<'a> {
    pub token: &'a str,
    pub appkey: &'a str,
}

/// Response envelope shared by every gateway endpoint.
///
/// Only the envelope fields are interpreted; the full body is kept as a raw
/// [`Value`] for persistence.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    #[serde(default, deserialize_with = "lenient_string")]
    pub result_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub result_msg: Option<String>,
    #[serde(default)]
    pub result_data: Option<Value>,
    #[serde(default)]
    pub token: Option<Value>,
}

/// Where a login response carried its token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLocation {
    /// `result_data.token` with `result_data` an object.
    Nested(String),
    /// Top-level `token`.
    TopLevel(String),
    /// `result_data` is the token string itself.
    StringPayload(String),
    Absent,
}

impl TokenLocation {
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Nested(t) | Self::TopLevel(t) | Self::StringPayload(t) => Some(t),
            Self::Absent => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Nested(_) => "result_data.token",
            Self::TopLevel(_) => "token",
            Self::StringPayload(_) => "result_data (string)",
            Self::Absent => "absent",
        }
    }
}

impl Envelope {
    /// Parse the envelope out of a raw body. Bodies that are not JSON objects
    /// yield an empty envelope.
    pub fn from_value(value: &Value) -> Self {
        if !value.is_object() {
            return Self::default();
        }
        Self::deserialize(value).unwrap_or_default()
    }

    pub fn code(&self) -> &str {
        self.result_code.as_deref().unwrap_or(LOCAL_ERROR_CODE)
    }

    pub fn is_login_success(&self) -> bool {
        self.result_code.as_deref() == Some(LOGIN_SUCCESS_CODE)
    }

    /// Whether the gateway rejected the request because the token expired.
    pub fn is_token_invalid(&self) -> bool {
        self.result_code.as_deref() == Some(TOKEN_INVALID_CODE)
            || self.result_msg.as_deref() == Some(TOKEN_INVALID_MSG)
    }

    /// Resolve the token location. First non-empty match wins, in the order
    /// nested object field, top-level field, string payload.
    pub fn token_location(&self) -> TokenLocation {
        if let Some(Value::Object(data)) = &self.result_data
            && let Some(token) = non_empty_str(data.get("token"))
        {
            return TokenLocation::Nested(token);
        }
        if let Some(token) = non_empty_str(self.token.as_ref()) {
            return TokenLocation::TopLevel(token);
        }
        if let Some(token) = non_empty_str(self.result_data.as_ref()) {
            return TokenLocation::StringPayload(token);
        }
        TokenLocation::Absent
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Accept a string field that the gateway sometimes sends as a bare number.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

/// Payload recorded when a cycle fails before the gateway returned a body.
pub fn error_payload(kind: &str, message: &str) -> Value {
    serde_json::json!({
        "error": message,
        "error_kind": kind,
        "result_code": LOCAL_ERROR_CODE,
    })
}
