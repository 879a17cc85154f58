//! Append-only log of fetch outcomes, backed by SQLite.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::error::StoreError;
use crate::types::Envelope;

/// Default number of records returned by a history query.
pub const DEFAULT_HISTORY_LIMIT: i64 = 100;
/// Upper bound on records returned by a history query.
pub const MAX_HISTORY_LIMIT: i64 = 1000;

/// One persisted outcome of a collection cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub result_code: String,
    pub result_msg: Option<String>,
    /// Raw response (or error descriptor), verbatim.
    #[serde(rename = "data")]
    pub raw_payload: Value,
}

/// Record store operations.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a payload captured now. `result_code` and `result_msg` are taken
    /// from the payload envelope; the code defaults to `"0"`.
    async fn append(&self, payload: &Value) -> Result<FetchRecord, StoreError>;

    /// Most recent record.
    async fn latest(&self) -> Result<Option<FetchRecord>, StoreError>;

    /// Up to `limit` records, newest first.
    async fn history(&self, limit: i64) -> Result<Vec<FetchRecord>, StoreError>;
}

/// Clamp a requested history size into `0..=MAX_HISTORY_LIMIT`.
pub fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(0, MAX_HISTORY_LIMIT)
}

/// SQLx implementation of [`RecordStore`].
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Open (creating if needed) the database at `database_url` and ensure the
    /// schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // A single connection keeps writes serialized and lets `sqlite::memory:`
        // behave as one database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS power_data_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                raw_data TEXT NOT NULL,
                result_code TEXT NOT NULL,
                result_msg TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_power_data_records_timestamp ON power_data_records (timestamp)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a payload with an explicit capture time.
    pub async fn append_at(
        &self,
        payload: &Value,
        timestamp: DateTime<Utc>,
    ) -> Result<FetchRecord, StoreError> {
        let timestamp = timestamp.trunc_subsecs(6);
        let envelope = Envelope::from_value(payload);
        let result_code = envelope.code().to_string();
        let result_msg = envelope.result_msg.clone();
        let raw_data = serde_json::to_string(payload)?;

        let row = sqlx::query(
            r#"
            INSERT INTO power_data_records (timestamp, raw_data, result_code, result_msg)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(format_timestamp(&timestamp))
        .bind(&raw_data)
        .bind(&result_code)
        .bind(&result_msg)
        .fetch_one(&self.pool)
        .await?;

        Ok(FetchRecord {
            id: row.try_get("id")?,
            timestamp,
            result_code,
            result_msg,
            raw_payload: payload.clone(),
        })
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn append(&self, payload: &Value) -> Result<FetchRecord, StoreError> {
        self.append_at(payload, Utc::now()).await
    }

    async fn latest(&self) -> Result<Option<FetchRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM power_data_records ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn history(&self, limit: i64) -> Result<Vec<FetchRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM power_data_records ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }
}

/// Fixed-width RFC 3339 so that text order equals time order.
fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn record_from_row(row: &SqliteRow) -> Result<FetchRecord, StoreError> {
    let raw_timestamp: String = row.try_get("timestamp")?;
    let timestamp = DateTime::parse_from_rfc3339(&raw_timestamp)
        .map_err(|e| StoreError::Timestamp(format!("{raw_timestamp}: {e}")))?
        .with_timezone(&Utc);
    let raw_data: String = row.try_get("raw_data")?;

    Ok(FetchRecord {
        id: row.try_get("id")?,
        timestamp,
        result_code: row.try_get("result_code")?,
        result_msg: row.try_get("result_msg")?,
        raw_payload: serde_json::from_str(&raw_data)?,
    })
}
