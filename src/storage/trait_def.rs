use crate::models::{ActivityEntry, IpSummary, LogRecord, LogSample, SampleFilter, StoredLog};
use anyhow::{Context, Result};
use serde_json::{Map, Value};
use async_trait::async_trait;
use thiserror::Error;

/// Config key holding the prevention-mode flag
pub const PREVENTION_MODE_KEY: &str = "prevention_mode";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid log record: {0}")]
    InvalidRecord(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Append a log record; the timestamp is stored in canonical form
    async fn append_log(&self, record: &LogRecord) -> StorageResult<()>;

    /// Most recent log records, newest first
    /// If `since` is set (canonical form) only records strictly newer are returned
    async fn recent_logs(&self, since: Option<&str>, limit: i64) -> Result<Vec<StoredLog>>;

    /// Lightweight projection of every record matching the filter, newest first
    async fn scan_samples(&self, filter: &SampleFilter) -> Result<Vec<LogSample>>;

    /// Request counts grouped by address, for addresses with at least one
    /// flagged request
    async fn flagged_ip_summaries(&self) -> Result<Vec<IpSummary>>;

    /// Flagged records of the given addresses, newest first
    async fn flagged_samples_for(&self, ips: &[String]) -> Result<Vec<LogSample>>;

    /// Count records matching the filter
    async fn count_logs(&self, filter: &SampleFilter) -> Result<i64>;

    /// Timestamp and verdict of the most recent records, newest first
    async fn latest_activity(&self, limit: i64) -> Result<Vec<ActivityEntry>>;

    /// Read a boolean config flag; None if it was never written
    async fn get_flag(&self, key: &str) -> Result<Option<bool>>;

    /// Insert or overwrite a boolean config flag
    async fn put_flag(&self, key: &str, enabled: bool) -> Result<()>;

    /// Close the underlying connection pool
    async fn close(&self);
}

/// Validate a record for insertion and return its canonical timestamp
pub(crate) fn prepare_append(record: &LogRecord) -> StorageResult<PreparedLog> {
    let timestamp = crate::timestamp::canonicalize(&record.timestamp).ok_or_else(|| {
        StorageError::InvalidRecord(format!("unparseable timestamp '{}'", record.timestamp))
    })?;

    let ip = record.ip.trim();
    if ip.is_empty() {
        return Err(StorageError::InvalidRecord("ip must not be empty".to_string()));
    }

    let mut fields = record.fields.clone();
    for key in crate::models::log::INTERNAL_ID_FIELDS {
        fields.remove(key);
    }

    Ok(PreparedLog {
        timestamp,
        ip: ip.to_string(),
        injection_detected: record.analysis_result.injection_detected,
        matched_rules: record.analysis_result.matched_rules.clone(),
        analysis_details: json_object_or_none(&record.analysis_result.fields)?,
        details: json_object_or_none(&fields)?,
    })
}

/// A validated record ready to be bound into an INSERT
#[derive(Debug, Clone)]
pub(crate) struct PreparedLog {
    pub timestamp: String,
    pub ip: String,
    pub injection_detected: bool,
    pub matched_rules: Vec<String>,
    pub analysis_details: Option<String>,
    pub details: Option<String>,
}

fn json_object_or_none(fields: &Map<String, Value>) -> StorageResult<Option<String>> {
    if fields.is_empty() {
        return Ok(None);
    }
    let encoded = serde_json::to_string(fields).context("failed to encode log fields")?;
    Ok(Some(encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisResult;
    use serde_json::json;

    fn record(timestamp: &str, ip: &str) -> LogRecord {
        LogRecord {
            timestamp: timestamp.to_string(),
            ip: ip.to_string(),
            analysis_result: AnalysisResult::default(),
            fields: Map::new(),
        }
    }

    #[test]
    fn test_prepare_canonicalizes_timestamp() {
        let prepared = prepare_append(&record("2024-01-01 10:00:00", " 1.2.3.4 ")).unwrap();
        assert_eq!(prepared.timestamp, "2024-01-01T10:00:00.000000Z");
        assert_eq!(prepared.ip, "1.2.3.4");
        assert!(prepared.details.is_none());
    }

    #[test]
    fn test_prepare_strips_internal_ids() {
        let mut rec = record("2024-01-01T10:00:00Z", "1.2.3.4");
        rec.fields.insert("_id".into(), json!("65a1f"));
        rec.fields.insert("path".into(), json!("/login"));

        let prepared = prepare_append(&rec).unwrap();
        assert_eq!(prepared.details.as_deref(), Some(r#"{"path":"/login"}"#));
    }

    #[test]
    fn test_prepare_rejects_bad_input() {
        assert!(matches!(
            prepare_append(&record("not a time", "1.2.3.4")),
            Err(StorageError::InvalidRecord(_))
        ));
        assert!(matches!(
            prepare_append(&record("2024-01-01T10:00:00Z", "  ")),
            Err(StorageError::InvalidRecord(_))
        ));
    }
}
