//! Test doubles shared by unit tests across modules.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use crate::client::Upstream;
use crate::credential::{Credentials, Token};
use crate::error::{StoreError, UpstreamError};
use crate::store::{FetchRecord, RecordStore, clamp_limit};
use crate::types::Envelope;

pub fn credentials() -> Credentials {
    Credentials {
        access_key: "access-key".into(),
        app_key: "app-key".into(),
        account: "user".into(),
        password: "secret".into(),
    }
}

pub fn login_ok(token: &str) -> Result<Value, UpstreamError> {
    Ok(json!({"result_code": "1", "result_msg": "success", "result_data": {"token": token}}))
}

pub fn token_invalid() -> Result<Value, UpstreamError> {
    Ok(json!({"result_code": "E00003", "result_msg": "er_token_login_invalid"}))
}

pub fn power_data(marker: &str) -> Result<Value, UpstreamError> {
    Ok(json!({
        "result_code": "1",
        "result_msg": "success",
        "result_data": {"marker": marker}
    }))
}

/// Gateway fake answering from queued responses. When a queue runs dry the
/// last response popped from it is repeated.
#[derive(Default)]
pub struct ScriptedUpstream {
    logins: Mutex<VecDeque<Result<Value, UpstreamError>>>,
    fetches: Mutex<VecDeque<Result<Value, UpstreamError>>>,
    last_login: Mutex<Option<Result<Value, UpstreamError>>>,
    last_fetch: Mutex<Option<Result<Value, UpstreamError>>>,
    login_delay: Option<Duration>,
    login_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    fetch_tokens: Mutex<Vec<String>>,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = Some(delay);
        self
    }

    pub fn push_login(&self, response: Result<Value, UpstreamError>) -> &Self {
        self.logins.lock().unwrap().push_back(response);
        self
    }

    pub fn push_fetch(&self, response: Result<Value, UpstreamError>) -> &Self {
        self.fetches.lock().unwrap().push_back(response);
        self
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Tokens presented to `fetch_power_data`, in call order.
    pub fn fetch_tokens(&self) -> Vec<String> {
        self.fetch_tokens.lock().unwrap().clone()
    }

    fn next(
        queue: &Mutex<VecDeque<Result<Value, UpstreamError>>>,
        last: &Mutex<Option<Result<Value, UpstreamError>>>,
    ) -> Result<Value, UpstreamError> {
        let mut last = last.lock().unwrap();
        if let Some(response) = queue.lock().unwrap().pop_front() {
            *last = Some(response);
        }
        last.clone()
            .unwrap_or_else(|| Err(UpstreamError::Transport("no scripted response".into())))
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn login(&self, _credentials: &Credentials) -> Result<Value, UpstreamError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.login_delay {
            tokio::time::sleep(delay).await;
        }
        Self::next(&self.logins, &self.last_login)
    }

    async fn fetch_power_data(
        &self,
        token: &Token,
        _credentials: &Credentials,
    ) -> Result<Value, UpstreamError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_tokens
            .lock()
            .unwrap()
            .push(token.as_str().to_string());
        Self::next(&self.fetches, &self.last_fetch)
    }
}

/// Record store kept in memory; never blocks.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<FetchRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Records in insertion order.
    pub fn records(&self) -> Vec<FetchRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn append(&self, payload: &Value) -> Result<FetchRecord, StoreError> {
        let envelope = Envelope::from_value(payload);
        let mut records = self.records.lock().unwrap();
        let record = FetchRecord {
            id: records.len() as i64 + 1,
            timestamp: Utc::now(),
            result_code: envelope.code().to_string(),
            result_msg: envelope.result_msg.clone(),
            raw_payload: payload.clone(),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn latest(&self) -> Result<Option<FetchRecord>, StoreError> {
        Ok(self.history(1).await?.into_iter().next())
    }

    async fn history(&self, limit: i64) -> Result<Vec<FetchRecord>, StoreError> {
        let mut records = self.records();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        records.truncate(clamp_limit(limit) as usize);
        Ok(records)
    }
}

/// Record store whose every operation fails.
pub struct FailingStore;

#[async_trait]
impl RecordStore for FailingStore {
    async fn append(&self, _payload: &Value) -> Result<FetchRecord, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolClosed))
    }

    async fn latest(&self) -> Result<Option<FetchRecord>, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolClosed))
    }

    async fn history(&self, _limit: i64) -> Result<Vec<FetchRecord>, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolClosed))
    }
}
