//! Prevention-mode flag
//!
//! The persisted flag is the source of truth. Writing it must succeed; telling
//! the enforcement service about the change is best effort and never changes
//! the outcome reported to the caller.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::enforcement::EnforcementSink;
use crate::error::DashboardError;
use crate::models::{ActivityEntry, SampleFilter};
use crate::retry::{with_retry, RetryPolicy};
use crate::storage::{Storage, PREVENTION_MODE_KEY};

/// Number of recent requests included in the status summary
pub const LATEST_ACTIVITY_LIMIT: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreventionState {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreventionUpdate {
    pub enabled: bool,
    pub status: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSummary {
    pub total_requests: i64,
    pub attacks_detected: i64,
    pub prevention_mode: bool,
    pub latest_activity: Vec<ActivityEntry>,
}

/// Interpret the `enabled` field of a prevention-mode update.
///
/// Booleans are taken as-is, numbers are true when non-zero and null is
/// false. Strings are accepted when they spell out a boolean. Anything else,
/// or a body without the field, is rejected.
pub fn coerce_enabled(body: &Value) -> Result<bool, DashboardError> {
    let missing = || DashboardError::InvalidInput("Missing enabled parameter".to_string());

    let value = body.as_object().and_then(|o| o.get("enabled")).ok_or_else(missing)?;

    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" | "" => Ok(false),
            _ => Err(DashboardError::InvalidInput(format!(
                "enabled must be a boolean, got '{s}'"
            ))),
        },
        Value::Array(_) | Value::Object(_) => Err(DashboardError::InvalidInput(
            "enabled must be a boolean".to_string(),
        )),
    }
}

pub struct PreventionController {
    storage: Arc<dyn Storage>,
    enforcer: Option<Arc<dyn EnforcementSink>>,
    retry: RetryPolicy,
}

impl PreventionController {
    pub fn new(
        storage: Arc<dyn Storage>,
        enforcer: Option<Arc<dyn EnforcementSink>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            enforcer,
            retry,
        }
    }

    /// Current flag; a flag that was never written reads as disabled
    pub async fn get(&self) -> Result<PreventionState, DashboardError> {
        let enabled = self.read_flag().await?;
        Ok(PreventionState { enabled })
    }

    pub async fn set(&self, enabled: bool) -> Result<PreventionUpdate, DashboardError> {
        with_retry(&self.retry, "put_flag", || {
            self.storage.put_flag(PREVENTION_MODE_KEY, enabled)
        })
        .await
        .map_err(|e| DashboardError::store("failed to persist prevention mode", e))?;

        info!(enabled, "prevention mode updated");

        match &self.enforcer {
            Some(enforcer) => {
                if let Err(err) = enforcer.set_prevention(enabled).await {
                    warn!(enabled, error = %err, "failed to forward prevention mode to the WAF; local state kept");
                }
            }
            None => warn!(enabled, "no enforcement service configured; prevention mode only persisted"),
        }

        Ok(PreventionUpdate {
            enabled,
            status: "success",
        })
    }

    pub async fn status(&self) -> Result<StatusSummary, DashboardError> {
        let all = SampleFilter::all();
        let flagged = SampleFilter {
            flagged_only: true,
            ..SampleFilter::all()
        };

        let (total_requests, attacks_detected, prevention_mode, latest_activity) = tokio::try_join!(
            async {
                with_retry(&self.retry, "count_logs", || self.storage.count_logs(&all))
                    .await
                    .map_err(|e| DashboardError::store("failed to count requests", e))
            },
            async {
                with_retry(&self.retry, "count_attacks", || self.storage.count_logs(&flagged))
                    .await
                    .map_err(|e| DashboardError::store("failed to count attacks", e))
            },
            self.read_flag(),
            async {
                with_retry(&self.retry, "latest_activity", || {
                    self.storage.latest_activity(LATEST_ACTIVITY_LIMIT)
                })
                .await
                .map_err(|e| DashboardError::store("failed to read latest activity", e))
            },
        )?;

        Ok(StatusSummary {
            total_requests,
            attacks_detected,
            prevention_mode,
            latest_activity,
        })
    }

    async fn read_flag(&self) -> Result<bool, DashboardError> {
        let flag = with_retry(&self.retry, "get_flag", || {
            self.storage.get_flag(PREVENTION_MODE_KEY)
        })
        .await
        .map_err(|e| DashboardError::store("failed to read prevention mode", e))?;

        Ok(flag.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcement::EnforcementError;
    use crate::models::{AnalysisResult, LogRecord};
    use crate::storage::SqliteStorage;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl EnforcementSink for RecordingSink {
        async fn set_prevention(&self, enabled: bool) -> Result<(), EnforcementError> {
            self.seen.lock().unwrap().push(enabled);
            Ok(())
        }
    }

    struct DownSink;

    #[async_trait]
    impl EnforcementSink for DownSink {
        async fn set_prevention(&self, _enabled: bool) -> Result<(), EnforcementError> {
            Err(EnforcementError::Status("503 Service Unavailable: ".to_string()))
        }
    }

    async fn storage() -> Arc<dyn Storage> {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        Arc::new(storage)
    }

    #[test]
    fn test_coerce_enabled() {
        assert!(coerce_enabled(&json!({"enabled": true})).unwrap());
        assert!(!coerce_enabled(&json!({"enabled": false})).unwrap());
        assert!(coerce_enabled(&json!({"enabled": 1})).unwrap());
        assert!(!coerce_enabled(&json!({"enabled": 0})).unwrap());
        assert!(!coerce_enabled(&json!({"enabled": null})).unwrap());
        assert!(coerce_enabled(&json!({"enabled": "on"})).unwrap());
        assert!(!coerce_enabled(&json!({"enabled": "False"})).unwrap());

        for bad in [
            json!({}),
            json!(null),
            json!([true]),
            json!({"enabled": "maybe"}),
            json!({"enabled": [1]}),
            json!({"Enabled": true}),
        ] {
            assert!(
                matches!(coerce_enabled(&bad), Err(DashboardError::InvalidInput(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_flag_reads_disabled() {
        let controller = PreventionController::new(storage().await, None, RetryPolicy::no_retry());
        assert_eq!(controller.get().await.unwrap(), PreventionState { enabled: false });
    }

    #[tokio::test]
    async fn test_set_forwards_to_enforcer() {
        let sink = Arc::new(RecordingSink::default());
        let controller =
            PreventionController::new(storage().await, Some(sink.clone()), RetryPolicy::no_retry());

        let update = controller.set(true).await.unwrap();
        assert_eq!(update, PreventionUpdate { enabled: true, status: "success" });
        controller.set(false).await.unwrap();

        assert_eq!(*sink.seen.lock().unwrap(), vec![true, false]);
        assert!(!controller.get().await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_enforcer_failure_keeps_local_state() {
        let controller =
            PreventionController::new(storage().await, Some(Arc::new(DownSink)), RetryPolicy::no_retry());

        let update = controller.set(true).await.unwrap();
        assert!(update.enabled);
        assert!(controller.get().await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_status_summary() {
        let storage = storage().await;
        for i in 0..12 {
            let record = LogRecord {
                timestamp: format!("2024-01-01T10:{i:02}:00Z"),
                ip: "10.0.0.1".to_string(),
                analysis_result: AnalysisResult {
                    injection_detected: i % 4 == 0,
                    matched_rules: vec![],
                    fields: Map::new(),
                },
                fields: Map::new(),
            };
            storage.append_log(&record).await.unwrap();
        }

        let controller = PreventionController::new(storage, None, RetryPolicy::no_retry());
        controller.set(true).await.unwrap();

        let status = controller.status().await.unwrap();
        assert_eq!(status.total_requests, 12);
        assert_eq!(status.attacks_detected, 3);
        assert!(status.prevention_mode);
        assert_eq!(status.latest_activity.len(), 10);
        assert_eq!(status.latest_activity[0].timestamp, "2024-01-01T10:11:00.000000Z");
        assert!(status.latest_activity[3].analysis_result.injection_detected);
    }
}
