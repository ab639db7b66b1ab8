use crate::models::value::decode_details;
use crate::models::{
    ActivityEntry, IpSummary, LogRecord, LogSample, SampleFilter, StoreValue, StoredLog,
};
use crate::storage::trait_def::prepare_append;
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Column, PgPool, Row, TypeInfo, ValueRef};
use std::sync::Arc;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS logs (
                id BIGSERIAL PRIMARY KEY,
                timestamp TEXT NOT NULL,
                ip TEXT NOT NULL,
                injection_detected BOOLEAN NOT NULL DEFAULT FALSE,
                matched_rules JSONB NOT NULL DEFAULT '[]'::jsonb,
                analysis_details TEXT,
                details TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_ip ON logs(ip)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                enabled BOOLEAN NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn append_log(&self, record: &LogRecord) -> StorageResult<()> {
        let prepared = prepare_append(record)?;

        sqlx::query(
            r#"
            INSERT INTO logs (timestamp, ip, injection_detected, matched_rules, analysis_details, details)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&prepared.timestamp)
        .bind(&prepared.ip)
        .bind(prepared.injection_detected)
        .bind(Json(&prepared.matched_rules))
        .bind(&prepared.analysis_details)
        .bind(&prepared.details)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        Ok(())
    }

    async fn recent_logs(&self, since: Option<&str>, limit: i64) -> Result<Vec<StoredLog>> {
        let rows = sqlx::query(
            r#"
            SELECT *
            FROM logs
            WHERE ($1::TEXT IS NULL OR timestamp > $1)
            ORDER BY timestamp DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.iter().map(stored_log_from_row).collect()
    }

    async fn scan_samples(&self, filter: &SampleFilter) -> Result<Vec<LogSample>> {
        let samples = sqlx::query_as::<_, LogSample>(
            r#"
            SELECT timestamp, ip, injection_detected, matched_rules
            FROM logs
            WHERE ($1::TEXT IS NULL OR timestamp >= $1)
              AND ($2::TEXT IS NULL OR timestamp <= $2)
              AND (NOT $3 OR injection_detected)
            ORDER BY timestamp DESC, id DESC
            "#,
        )
        .bind(filter.from.as_deref())
        .bind(filter.to.as_deref())
        .bind(filter.flagged_only)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(samples)
    }

    async fn flagged_ip_summaries(&self) -> Result<Vec<IpSummary>> {
        let summaries = sqlx::query_as::<_, IpSummary>(
            r#"
            SELECT ip,
                   COUNT(*) AS total_requests,
                   COUNT(*) FILTER (WHERE injection_detected) AS anomalous_requests,
                   MAX(timestamp) AS last_seen
            FROM logs
            GROUP BY ip
            HAVING bool_or(injection_detected)
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(summaries)
    }

    async fn flagged_samples_for(&self, ips: &[String]) -> Result<Vec<LogSample>> {
        if ips.is_empty() {
            return Ok(Vec::new());
        }

        let samples = sqlx::query_as::<_, LogSample>(
            r#"
            SELECT timestamp, ip, injection_detected, matched_rules
            FROM logs
            WHERE injection_detected AND ip = ANY($1)
            ORDER BY timestamp DESC, id DESC
            "#,
        )
        .bind(ips)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(samples)
    }

    async fn count_logs(&self, filter: &SampleFilter) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM logs
            WHERE ($1::TEXT IS NULL OR timestamp >= $1)
              AND ($2::TEXT IS NULL OR timestamp <= $2)
              AND (NOT $3 OR injection_detected)
            "#,
        )
        .bind(filter.from.as_deref())
        .bind(filter.to.as_deref())
        .bind(filter.flagged_only)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn latest_activity(&self, limit: i64) -> Result<Vec<ActivityEntry>> {
        let entries = sqlx::query_as::<_, (String, bool)>(
            r#"
            SELECT timestamp, injection_detected
            FROM logs
            ORDER BY timestamp DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?
        .into_iter()
        .map(|(timestamp, detected)| ActivityEntry::new(timestamp, detected))
        .collect();

        Ok(entries)
    }

    async fn get_flag(&self, key: &str) -> Result<Option<bool>> {
        let enabled = sqlx::query_scalar::<_, bool>("SELECT enabled FROM config WHERE key = $1")
            .bind(key)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(enabled)
    }

    async fn put_flag(&self, key: &str, enabled: bool) -> Result<()> {
        let now = crate::timestamp::format_canonical(&Utc::now());

        sqlx::query(
            r#"
            INSERT INTO config (key, enabled, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET
                enabled = EXCLUDED.enabled,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(key)
        .bind(enabled)
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

const CORE_COLUMNS: [&str; 7] = [
    "id",
    "timestamp",
    "ip",
    "injection_detected",
    "matched_rules",
    "analysis_details",
    "details",
];

fn stored_log_from_row(row: &PgRow) -> Result<StoredLog> {
    let Json(matched_rules) = row.try_get::<Json<Vec<String>>, _>("matched_rules")?;
    let analysis_details: Option<String> = row.try_get("analysis_details")?;
    let details: Option<String> = row.try_get("details")?;

    let mut fields = decode_details("details", details.as_deref());

    for (idx, column) in row.columns().iter().enumerate() {
        if CORE_COLUMNS.contains(&column.name()) {
            continue;
        }
        fields.insert(column.name().to_string(), decode_column(row, idx)?);
    }

    Ok(StoredLog {
        timestamp: row.try_get("timestamp")?,
        ip: row.try_get("ip")?,
        injection_detected: row.try_get("injection_detected")?,
        matched_rules,
        analysis_fields: decode_details("analysis_details", analysis_details.as_deref()),
        fields,
    })
}

/// Decode a column added by another writer according to its declared type
fn decode_column(row: &PgRow, idx: usize) -> Result<StoreValue> {
    let type_name = {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(StoreValue::Null);
        }
        raw.type_info().name().to_string()
    };

    let value = match type_name.as_str() {
        "BOOL" => StoreValue::Bool(row.try_get(idx)?),
        "INT2" => StoreValue::Integer(row.try_get::<i16, _>(idx)?.into()),
        "INT4" => StoreValue::Integer(row.try_get::<i32, _>(idx)?.into()),
        "INT8" => StoreValue::Integer(row.try_get(idx)?),
        "FLOAT4" => StoreValue::Real(row.try_get::<f32, _>(idx)?.into()),
        "FLOAT8" => StoreValue::Real(row.try_get(idx)?),
        "JSON" | "JSONB" => StoreValue::Json(row.try_get(idx)?),
        "BYTEA" => StoreValue::Bytes(row.try_get(idx)?),
        "TIMESTAMPTZ" => StoreValue::Timestamp(row.try_get::<DateTime<Utc>, _>(idx)?),
        "TIMESTAMP" => StoreValue::Timestamp(row.try_get::<NaiveDateTime, _>(idx)?.and_utc()),
        _ => match row.try_get::<String, _>(idx) {
            Ok(text) => StoreValue::Text(text),
            Err(err) => {
                tracing::debug!(column = idx, type_name = %type_name, error = %err, "undecodable column");
                StoreValue::Text(format!("<{}>", type_name.to_lowercase()))
            }
        },
    };

    Ok(value)
}
