use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::value::{into_wire_map, StoreValue};

/// Keys that identify a record inside some store and never leave the crate
pub const INTERNAL_ID_FIELDS: [&str; 2] = ["_id", "id"];

/// A single observed HTTP request, as served to dashboard clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub ip: String,
    #[serde(default)]
    pub analysis_result: AnalysisResult,
    /// Any other fields recorded upstream (method, path, payload, ...)
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub injection_detected: bool,
    #[serde(default)]
    pub matched_rules: Vec<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A log record as read back from the store, before wire normalization
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLog {
    pub timestamp: String,
    pub ip: String,
    pub injection_detected: bool,
    pub matched_rules: Vec<String>,
    pub analysis_fields: BTreeMap<String, StoreValue>,
    pub fields: BTreeMap<String, StoreValue>,
}

impl StoredLog {
    pub fn into_record(self) -> LogRecord {
        LogRecord {
            timestamp: self.timestamp,
            ip: self.ip,
            analysis_result: AnalysisResult {
                injection_detected: self.injection_detected,
                matched_rules: self.matched_rules,
                fields: into_wire_map(self.analysis_fields),
            },
            fields: into_wire_map(self.fields),
        }
    }
}

/// The slice of a log record the aggregators work on
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct LogSample {
    pub timestamp: String,
    pub ip: String,
    pub injection_detected: bool,
    #[sqlx(json)]
    pub matched_rules: Vec<String>,
}

impl LogSample {
    /// Rules that count towards analytics; empty unless the request was flagged
    pub fn flagged_rules(&self) -> &[String] {
        if self.injection_detected {
            &self.matched_rules
        } else {
            &[]
        }
    }
}

/// Per-address request counts computed by the store
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct IpSummary {
    pub ip: String,
    pub total_requests: i64,
    pub anomalous_requests: i64,
    /// Newest canonical timestamp seen for the address
    pub last_seen: String,
}

/// Which records a sample scan should return
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleFilter {
    /// Inclusive lower bound, canonical timestamp
    pub from: Option<String>,
    /// Inclusive upper bound, canonical timestamp
    pub to: Option<String>,
    pub flagged_only: bool,
}

impl SampleFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: String, to: String) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            flagged_only: false,
        }
    }

    pub fn flagged_since(from: String) -> Self {
        Self {
            from: Some(from),
            to: None,
            flagged_only: true,
        }
    }
}

/// Timestamp and verdict of a recent request, for the status summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: String,
    pub analysis_result: ActivityVerdict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityVerdict {
    pub injection_detected: bool,
}

impl ActivityEntry {
    pub fn new(timestamp: String, injection_detected: bool) -> Self {
        Self {
            timestamp,
            analysis_result: ActivityVerdict { injection_detected },
        }
    }
}
