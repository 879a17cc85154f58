//! Shared bearer-token holder with single-flight renewal.
//!
//! One [`TokenManager`] exists per process and is cloned into the collector,
//! the renewal scheduler and the HTTP handlers. Readers take a snapshot of the
//! current token through a read lock and never wait on each other. Renewal runs
//! under a separate mutex: a caller that finds the mutex held queues on it and,
//! once it is released, picks up the outcome of the attempt that held it
//! instead of logging in again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, RwLock};

use crate::client::Upstream;
use crate::credential::{Credentials, Token};
use crate::error::AuthError;
use crate::types::{Envelope, TokenLocation};

#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<TokenManagerInner>,
}

struct TokenManagerInner {
    upstream: Arc<dyn Upstream>,
    credentials: Option<Credentials>,
    current: RwLock<Option<Token>>,
    renewal: Mutex<RenewalState>,
    successes: AtomicU64,
}

#[derive(Default)]
struct RenewalState {
    /// Outcome of the most recent finished attempt. Cleared when an attempt
    /// starts so an abandoned login never hands out a stale result.
    last_outcome: Option<Result<Token, AuthError>>,
}

impl TokenManager {
    /// Create a manager with no token. `credentials` is `None` when the
    /// environment did not provide a complete set.
    pub fn new(upstream: Arc<dyn Upstream>, credentials: Option<Credentials>) -> Self {
        Self {
            inner: Arc::new(TokenManagerInner {
                upstream,
                credentials,
                current: RwLock::new(None),
                renewal: Mutex::new(RenewalState::default()),
                successes: AtomicU64::new(0),
            }),
        }
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.inner.credentials.as_ref()
    }

    /// The last successfully obtained token, if any.
    pub async fn current_token(&self) -> Option<Token> {
        self.inner.current.read().await.clone()
    }

    /// Number of successful renewals since startup.
    pub fn successful_renewals(&self) -> u64 {
        self.inner.successes.load(Ordering::Relaxed)
    }

    /// Log in again and replace the current token.
    ///
    /// On failure the previous token is left in place. Concurrent callers are
    /// coalesced: only one login request is made per overlapping batch and
    /// every caller in the batch receives its outcome.
    pub async fn renew(&self) -> Result<Token, AuthError> {
        let mut state = match self.inner.renewal.try_lock() {
            Ok(state) => state,
            Err(_) => {
                // Held by an attempt in flight; wait for it and share its outcome.
                let state = self.inner.renewal.lock().await;
                if let Some(outcome) = &state.last_outcome {
                    tracing::debug!("Joining result of concurrent token renewal");
                    return outcome.clone();
                }
                state
            }
        };
        self.lead_renewal(&mut state).await
    }

    async fn lead_renewal(&self, state: &mut RenewalState) -> Result<Token, AuthError> {
        state.last_outcome = None;
        let outcome = self.login().await;
        match &outcome {
            Ok(token) => {
                *self.inner.current.write().await = Some(token.clone());
                self.inner.successes.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    token = %token.preview(),
                    length = token.as_str().len(),
                    "Token renewed successfully"
                );
            }
            Err(e) => {
                tracing::error!(kind = e.kind(), "Token renewal failed: {}", e);
            }
        }

        state.last_outcome = Some(outcome.clone());
        outcome
    }

    /// Return the current token, renewing first when none has been obtained yet.
    pub async fn token_or_renew(&self) -> Result<Token, AuthError> {
        if let Some(token) = self.current_token().await {
            return Ok(token);
        }
        tracing::warn!("No token available, attempting to renew");
        self.renew().await
    }

    async fn login(&self) -> Result<Token, AuthError> {
        let credentials = self
            .inner
            .credentials
            .as_ref()
            .ok_or(AuthError::MissingCredentials)?;

        tracing::info!("Attempting to renew token");
        let body = self.inner.upstream.login(credentials).await?;
        let envelope = Envelope::from_value(&body);

        tracing::debug!(
            result_code = envelope.code(),
            result_msg = envelope.result_msg.as_deref().unwrap_or("N/A"),
            "Login response received"
        );

        if !envelope.is_login_success() {
            return Err(AuthError::LoginFailed {
                code: envelope.code().to_string(),
                message: envelope
                    .result_msg
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string()),
            });
        }

        let location = envelope.token_location();
        let Some(raw) = location.token() else {
            let keys: Vec<&String> = body
                .as_object()
                .map(|obj| obj.keys().collect())
                .unwrap_or_default();
            tracing::warn!(?keys, "Login response carried no token");
            return Err(AuthError::EmptyToken);
        };

        tracing::debug!(location = location.describe(), "Token found");
        Ok(Token::new(raw))
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("credentials", &self.inner.credentials)
            .finish_non_exhaustive()
    }
}

/// How a token was extracted; used by the `solar-proxy` CLI.
pub fn locate_token(body: &serde_json::Value) -> TokenLocation {
    Envelope::from_value(body).token_location()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use crate::testing::{ScriptedUpstream, credentials, login_ok};
    use futures::future::join_all;
    use serde_json::json;
    use std::time::Duration;

    fn manager(upstream: &Arc<ScriptedUpstream>) -> TokenManager {
        TokenManager::new(upstream.clone(), Some(credentials()))
    }

    #[tokio::test]
    async fn test_starts_without_token() {
        let upstream = Arc::new(ScriptedUpstream::new());
        let tokens = manager(&upstream);
        assert!(tokens.current_token().await.is_none());
        assert_eq!(upstream.login_calls(), 0);
    }

    #[tokio::test]
    async fn test_renew_sets_nested_token() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_login(Ok(
            json!({"result_code": "1", "result_data": {"token": "abc123"}}),
        ));
        let tokens = manager(&upstream);

        let token = tokens.renew().await.unwrap();
        assert_eq!(token.as_str(), "abc123");
        assert_eq!(tokens.current_token().await.unwrap().as_str(), "abc123");
        assert_eq!(tokens.successful_renewals(), 1);
    }

    #[tokio::test]
    async fn test_login_failed_keeps_previous_token() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream
            .push_login(login_ok("first"))
            .push_login(Ok(json!({"result_code": "0", "result_msg": "bad creds"})));
        let tokens = manager(&upstream);

        tokens.renew().await.unwrap();
        let err = tokens.renew().await.unwrap_err();
        assert_eq!(
            err,
            AuthError::LoginFailed {
                code: "0".into(),
                message: "bad creds".into()
            }
        );
        assert_eq!(tokens.current_token().await.unwrap().as_str(), "first");
    }

    #[tokio::test]
    async fn test_login_failed_without_prior_token() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_login(Ok(json!({"result_code": "0", "result_msg": "bad creds"})));
        let tokens = manager(&upstream);

        assert!(matches!(
            tokens.renew().await,
            Err(AuthError::LoginFailed { .. })
        ));
        assert!(tokens.current_token().await.is_none());
    }

    #[tokio::test]
    async fn test_success_without_token_is_empty_token() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_login(Ok(json!({"result_code": "1", "result_data": {}})));
        let tokens = manager(&upstream);

        assert_eq!(tokens.renew().await.unwrap_err(), AuthError::EmptyToken);
        assert!(tokens.current_token().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_credentials_skips_network() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_login(login_ok("never"));
        let tokens = TokenManager::new(upstream.clone(), None);

        assert_eq!(
            tokens.renew().await.unwrap_err(),
            AuthError::MissingCredentials
        );
        assert_eq!(upstream.login_calls(), 0);
    }

    #[tokio::test]
    async fn test_transport_error() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_login(Err(UpstreamError::Timeout));
        let tokens = manager(&upstream);

        assert_eq!(
            tokens.renew().await.unwrap_err(),
            AuthError::Transport(UpstreamError::Timeout)
        );
    }

    #[tokio::test]
    async fn test_concurrent_renewals_share_one_login() {
        let upstream = Arc::new(ScriptedUpstream::new().with_login_delay(Duration::from_millis(50)));
        upstream.push_login(login_ok("shared"));
        let tokens = manager(&upstream);

        let results = join_all((0..8).map(|_| tokens.renew())).await;

        assert_eq!(upstream.login_calls(), 1);
        for result in results {
            assert_eq!(result.unwrap().as_str(), "shared");
        }
        assert_eq!(tokens.successful_renewals(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_shared() {
        let upstream = Arc::new(ScriptedUpstream::new().with_login_delay(Duration::from_millis(50)));
        upstream.push_login(Err(UpstreamError::Status(502)));
        let tokens = manager(&upstream);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tokens = tokens.clone();
                tokio::spawn(async move { tokens.renew().await })
            })
            .collect();
        let results = join_all(handles).await;

        assert_eq!(upstream.login_calls(), 1);
        for result in results {
            assert_eq!(
                result.unwrap().unwrap_err(),
                AuthError::Transport(UpstreamError::Status(502))
            );
        }
    }

    #[tokio::test]
    async fn test_sequential_renewals_each_log_in() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_login(login_ok("one")).push_login(login_ok("two"));
        let tokens = manager(&upstream);

        assert_eq!(tokens.renew().await.unwrap().as_str(), "one");
        assert_eq!(tokens.renew().await.unwrap().as_str(), "two");
        assert_eq!(upstream.login_calls(), 2);
        assert_eq!(tokens.current_token().await.unwrap().as_str(), "two");
    }

    #[tokio::test]
    async fn test_token_or_renew_reuses_current() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_login(login_ok("cached"));
        let tokens = manager(&upstream);

        tokens.token_or_renew().await.unwrap();
        tokens.token_or_renew().await.unwrap();
        assert_eq!(upstream.login_calls(), 1);
    }

    #[tokio::test]
    async fn test_late_caller_joins_in_flight_renewal() {
        let upstream = Arc::new(ScriptedUpstream::new().with_login_delay(Duration::from_millis(50)));
        upstream.push_login(login_ok("joined")).push_login(login_ok("unused"));
        let tokens = manager(&upstream);

        let leader = tokio::spawn({
            let tokens = tokens.clone();
            async move { tokens.renew().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(tokens.renew().await.unwrap().as_str(), "joined");
        assert_eq!(leader.await.unwrap().unwrap().as_str(), "joined");
        assert_eq!(upstream.login_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_renewal_does_not_leak_stale_outcome() {
        let upstream = Arc::new(ScriptedUpstream::new().with_login_delay(Duration::from_millis(50)));
        upstream.push_login(login_ok("old")).push_login(login_ok("new"));
        let tokens = manager(&upstream);
        assert_eq!(tokens.renew().await.unwrap().as_str(), "old");

        let leader = tokio::spawn({
            let tokens = tokens.clone();
            async move { tokens.renew().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let follower = tokio::spawn({
            let tokens = tokens.clone();
            async move { tokens.renew().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();

        assert_eq!(follower.await.unwrap().unwrap().as_str(), "new");
        assert_eq!(upstream.login_calls(), 3);
        assert_eq!(tokens.current_token().await.unwrap().as_str(), "new");
    }
}
