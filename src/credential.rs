//! Gateway credentials and the bearer token obtained with them.

use std::fmt;
use std::sync::Arc;

/// Account credentials for the gateway, loaded once at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub app_key: String,
    pub account: String,
    pub password: String,
}

impl Credentials {
    /// Build credentials only when every field is present and non-empty.
    pub fn from_parts(
        access_key: Option<String>,
        app_key: Option<String>,
        account: Option<String>,
        password: Option<String>,
    ) -> Option<Self> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Some(Self {
            access_key: non_empty(access_key)?,
            app_key: non_empty(app_key)?,
            account: non_empty(account)?,
            password: non_empty(password)?,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &preview(&self.access_key, 10))
            .field("app_key", &preview(&self.app_key, 10))
            .field("account", &self.account)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Opaque bearer token. Cheap to clone; replaced wholesale on renewal.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(Arc<str>);

impl Token {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 20 characters, for logs.
    pub fn preview(&self) -> String {
        preview(&self.0, 20)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({}..., len {})", self.preview(), self.0.len())
    }
}

fn preview(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
