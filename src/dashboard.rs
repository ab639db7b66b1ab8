//! Read side of the dashboard
//!
//! Every store read goes through [`with_retry`]. What happens once retries
//! are exhausted depends on the view: the log feed, the counters and the
//! origins map report the failure, while the timeline and the anomalous-IP
//! table fall back to an empty list so the rest of the dashboard still
//! renders.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::analytics::{
    aggregate_origins, attach_rules, build_timeline, rank_ip_summaries, CountryOrigin,
    GeoResolver, IpThreatEntry, TimelineBucket,
};
use crate::config::AnalyticsConfig;
use crate::error::DashboardError;
use crate::models::{LogRecord, SampleFilter};
use crate::retry::{with_retry, RetryPolicy};
use crate::storage::Storage;
use crate::timestamp;

/// Hard cap on records returned by one log read
pub const LOG_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogPage {
    pub records: Vec<LogRecord>,
    /// Newest timestamp in `records`; pass it back as `since` to poll for newer ones
    pub latest_timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub total_logs: i64,
    pub total_attacks: i64,
    /// Flagged requests within the trailing timeline window
    pub recent_attacks: i64,
}

pub struct DashboardService {
    storage: Arc<dyn Storage>,
    geo: Arc<dyn GeoResolver>,
    retry: RetryPolicy,
    analytics: AnalyticsConfig,
}

impl DashboardService {
    pub fn new(
        storage: Arc<dyn Storage>,
        geo: Arc<dyn GeoResolver>,
        retry: RetryPolicy,
        analytics: AnalyticsConfig,
    ) -> Self {
        Self {
            storage,
            geo,
            retry,
            analytics,
        }
    }

    /// Up to [`LOG_PAGE_LIMIT`] records, newest first.
    ///
    /// A `since` that does not parse as a timestamp is ignored rather than
    /// rejected.
    pub async fn logs(&self, since: Option<&str>) -> Result<LogPage, DashboardError> {
        let cursor = since.and_then(|raw| {
            let parsed = timestamp::canonicalize(raw);
            if parsed.is_none() {
                debug!(since = raw, "ignoring unparseable cursor");
            }
            parsed
        });

        let stored = with_retry(&self.retry, "recent_logs", || {
            self.storage.recent_logs(cursor.as_deref(), LOG_PAGE_LIMIT)
        })
        .await
        .map_err(|e| DashboardError::store("failed to fetch logs", e))?;

        let latest_timestamp = stored.iter().map(|log| log.timestamp.clone()).max();
        let records = stored.into_iter().map(|log| log.into_record()).collect();

        Ok(LogPage {
            records,
            latest_timestamp,
        })
    }

    pub async fn stats(&self) -> Result<Stats, DashboardError> {
        let recent_from = window_start(Utc::now(), self.analytics.timeline_hours)?;
        let all = SampleFilter::all();
        let flagged = SampleFilter {
            flagged_only: true,
            ..SampleFilter::all()
        };
        let recent = SampleFilter::flagged_since(recent_from);

        let (total_logs, total_attacks, recent_attacks) = tokio::try_join!(
            self.count("count_logs", &all),
            self.count("count_attacks", &flagged),
            self.count("count_recent_attacks", &recent),
        )?;

        Ok(Stats {
            total_logs,
            total_attacks,
            recent_attacks,
        })
    }

    /// Hourly request and attack counts over the trailing window.
    ///
    /// Degrades to an empty list when the store cannot be read.
    pub async fn attack_timeline(
        &self,
        hours: Option<i64>,
    ) -> Result<Vec<TimelineBucket>, DashboardError> {
        let now = Utc::now();
        let from = window_start(now, hours.unwrap_or(self.analytics.timeline_hours))?;
        let filter = SampleFilter::between(from, timestamp::format_canonical(&now));

        match with_retry(&self.retry, "timeline_samples", || self.storage.scan_samples(&filter)).await {
            Ok(samples) => Ok(build_timeline(&samples, self.analytics.timeline_offset())),
            Err(err) => {
                warn!(error = %err, "attack timeline unavailable, serving empty timeline");
                Ok(Vec::new())
            }
        }
    }

    /// Addresses with flagged traffic, most suspicious first.
    ///
    /// Degrades to an empty list when the store cannot be read.
    pub async fn anomalous_ips(&self) -> Vec<IpThreatEntry> {
        let summaries =
            match with_retry(&self.retry, "threat_summaries", || self.storage.flagged_ip_summaries())
                .await
            {
                Ok(summaries) => summaries,
                Err(err) => {
                    warn!(error = %err, "anomalous IP ranking unavailable, serving empty list");
                    return Vec::new();
                }
            };

        let mut entries = rank_ip_summaries(&summaries, Some(self.analytics.anomalous_ip_limit));
        if entries.is_empty() {
            return entries;
        }

        // Rules are only needed for the addresses that made the cut
        let ips: Vec<String> = entries.iter().map(|e| e.ip.clone()).collect();
        match with_retry(&self.retry, "threat_rules", || self.storage.flagged_samples_for(&ips)).await {
            Ok(samples) => {
                attach_rules(&mut entries, &samples);
                entries
            }
            Err(err) => {
                warn!(error = %err, "matched rules unavailable, serving empty list");
                Vec::new()
            }
        }
    }

    /// Flagged traffic in the trailing window, grouped by country
    pub async fn attack_origins(
        &self,
        hours: Option<i64>,
    ) -> Result<Vec<CountryOrigin>, DashboardError> {
        let from = window_start(Utc::now(), hours.unwrap_or(self.analytics.origins_default_hours))?;
        let filter = SampleFilter::flagged_since(from);

        let samples = with_retry(&self.retry, "origin_samples", || self.storage.scan_samples(&filter))
            .await
            .map_err(|e| DashboardError::store("failed to fetch attack origins", e))?;

        Ok(aggregate_origins(&samples, self.geo.as_ref()).await)
    }

    async fn count(&self, label: &str, filter: &SampleFilter) -> Result<i64, DashboardError> {
        with_retry(&self.retry, label, || self.storage.count_logs(filter))
            .await
            .map_err(|e| DashboardError::store("failed to compute statistics", e))
    }
}

/// Canonical timestamp `hours` before `now`
fn window_start(now: DateTime<Utc>, hours: i64) -> Result<String, DashboardError> {
    if hours <= 0 {
        return Err(DashboardError::InvalidInput(format!(
            "hours must be a positive integer, got {hours}"
        )));
    }

    TimeDelta::try_hours(hours)
        .and_then(|window| now.checked_sub_signed(window))
        .map(|start| timestamp::format_canonical(&start))
        .ok_or_else(|| DashboardError::InvalidInput(format!("hours value {hours} is out of range")))
}
