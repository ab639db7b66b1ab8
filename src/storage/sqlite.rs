use crate::models::value::decode_details;
use crate::models::{
    ActivityEntry, IpSummary, LogRecord, LogSample, SampleFilter, StoreValue, StoredLog,
};
use crate::storage::trait_def::prepare_append;
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Column, QueryBuilder, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use std::sync::Arc;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        // Create logs table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                ip TEXT NOT NULL,
                injection_detected INTEGER NOT NULL DEFAULT 0,
                matched_rules TEXT NOT NULL DEFAULT '[]',
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

        // Create config table holding runtime flags such as prevention mode
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL,
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
        let matched_rules = serde_json::to_string(&prepared.matched_rules)
            .map_err(|e| StorageError::Other(e.into()))?;

        sqlx::query(
            r#"
            INSERT INTO logs (timestamp, ip, injection_detected, matched_rules, analysis_details, details)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&prepared.timestamp)
        .bind(&prepared.ip)
        .bind(prepared.injection_detected)
        .bind(matched_rules)
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
            WHERE (?1 IS NULL OR timestamp > ?1)
            ORDER BY timestamp DESC, id DESC
            LIMIT ?2
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
            WHERE (?1 IS NULL OR timestamp >= ?1)
              AND (?2 IS NULL OR timestamp <= ?2)
              AND (?3 = 0 OR injection_detected = 1)
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
                   SUM(injection_detected) AS anomalous_requests,
                   MAX(timestamp) AS last_seen
            FROM logs
            GROUP BY ip
            HAVING SUM(injection_detected) > 0
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

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT timestamp, ip, injection_detected, matched_rules FROM logs \
             WHERE injection_detected = 1 AND ip IN (",
        );
        let mut separated = builder.separated(", ");
        for ip in ips {
            separated.push_bind(ip.as_str());
        }
        separated.push_unseparated(") ORDER BY timestamp DESC, id DESC");

        let samples = builder
            .build_query_as::<LogSample>()
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(samples)
    }

    async fn count_logs(&self, filter: &SampleFilter) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM logs
            WHERE (?1 IS NULL OR timestamp >= ?1)
              AND (?2 IS NULL OR timestamp <= ?2)
              AND (?3 = 0 OR injection_detected = 1)
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
            LIMIT ?
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
        let enabled = sqlx::query_scalar::<_, bool>("SELECT enabled FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(enabled)
    }

    async fn put_flag(&self, key: &str, enabled: bool) -> Result<()> {
        let now = crate::timestamp::format_canonical(&chrono::Utc::now());

        sqlx::query(
            r#"
            INSERT INTO config (key, enabled, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET
                enabled = excluded.enabled,
                updated_at = excluded.updated_at
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

fn stored_log_from_row(row: &SqliteRow) -> Result<StoredLog> {
    let matched_rules: String = row.try_get("matched_rules")?;
    let matched_rules = serde_json::from_str::<Vec<String>>(&matched_rules)
        .context("matched_rules column is not a JSON list of strings")?;

    let analysis_details: Option<String> = row.try_get("analysis_details")?;
    let details: Option<String> = row.try_get("details")?;

    let mut fields = decode_details("details", details.as_deref());

    // Columns added to the table by other writers are passed through as-is
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

/// Decode a column by its runtime storage class
fn decode_column(row: &SqliteRow, idx: usize) -> Result<StoreValue> {
    let type_name = {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(StoreValue::Null);
        }
        raw.type_info().name().to_string()
    };

    let value = match type_name.as_str() {
        "INTEGER" => StoreValue::Integer(row.try_get(idx)?),
        "REAL" => StoreValue::Real(row.try_get(idx)?),
        "BLOB" => StoreValue::Bytes(row.try_get(idx)?),
        _ => StoreValue::Text(row.try_get(idx)?),
    };

    Ok(value)
}
