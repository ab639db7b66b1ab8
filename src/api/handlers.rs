use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::analytics::{CountryOrigin, IpThreatEntry, TimelineBucket};
use crate::dashboard::{DashboardService, Stats};
use crate::error::DashboardError;
use crate::prevention::{coerce_enabled, PreventionController, PreventionState, PreventionUpdate, StatusSummary};

pub const LATEST_TIMESTAMP_HEADER: HeaderName = HeaderName::from_static("x-latest-timestamp");

pub struct AppState {
    pub dashboard: Arc<DashboardService>,
    pub prevention: Arc<PreventionController>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub since: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub hours: Option<String>,
}

impl WindowQuery {
    /// Requested window in hours.
    ///
    /// A value that is not an integer counts as absent, so the configured
    /// default applies. Non-positive integers are passed through and rejected
    /// downstream.
    pub fn hours(&self) -> Option<i64> {
        let raw = self.hours.as_deref()?;
        match raw.trim().parse::<i64>() {
            Ok(hours) => Some(hours),
            Err(err) => {
                debug!(hours = %raw, error = %err, "ignoring non-integer hours parameter");
                None
            }
        }
    }
}

/// Most recent log records, optionally only those newer than `since`
pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Result<Response, DashboardError> {
    let page = state.dashboard.logs(query.since.as_deref()).await?;

    let mut response = Json(page.records).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    if let Some(latest) = page.latest_timestamp {
        match HeaderValue::from_str(&latest) {
            Ok(value) => {
                headers.insert(LATEST_TIMESTAMP_HEADER, value);
            }
            Err(err) => warn!(timestamp = %latest, error = %err, "latest timestamp is not a valid header value"),
        }
    }

    Ok(response)
}

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<Stats>, DashboardError> {
    Ok(Json(state.dashboard.stats().await?))
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusSummary>, DashboardError> {
    Ok(Json(state.prevention.status().await?))
}

pub async fn get_attack_timeline(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Vec<TimelineBucket>>, DashboardError> {
    Ok(Json(state.dashboard.attack_timeline(query.hours()).await?))
}

pub async fn get_anomalous_ips(State(state): State<Arc<AppState>>) -> Json<Vec<IpThreatEntry>> {
    Json(state.dashboard.anomalous_ips().await)
}

pub async fn get_attack_origins(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Vec<CountryOrigin>>, DashboardError> {
    Ok(Json(state.dashboard.attack_origins(query.hours()).await?))
}

pub async fn get_prevention_mode(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PreventionState>, DashboardError> {
    Ok(Json(state.prevention.get().await?))
}

/// Persist a new prevention mode and forward it to the WAF
///
/// A body that is not JSON is treated like one without `enabled`.
pub async fn set_prevention_mode(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<PreventionUpdate>, DashboardError> {
    let body = payload.map(|Json(body)| body).unwrap_or(Value::Null);
    let enabled = coerce_enabled(&body)?;

    Ok(Json(state.prevention.set(enabled).await?))
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}
