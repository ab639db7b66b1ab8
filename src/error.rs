//! Errors reported to dashboard clients

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::timestamp;

#[derive(Debug, Error)]
pub enum DashboardError {
    /// The log store could not be read or written, after retries
    #[error("{context}: {source}")]
    StoreUnavailable {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },
    /// A request parameter or body was rejected
    #[error("{0}")]
    InvalidInput(String),
}

impl DashboardError {
    pub fn store(context: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::StoreUnavailable {
            context,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::InvalidInput(_) => "invalid_input",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::StoreUnavailable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn summary(&self) -> String {
        match self {
            Self::StoreUnavailable { context, .. } => context.to_string(),
            Self::InvalidInput(message) => message.clone(),
        }
    }

    fn details(&self) -> String {
        match self {
            Self::StoreUnavailable { source, .. } => format!("{source:#}"),
            Self::InvalidInput(message) => message.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
    pub details: String,
    pub timestamp: String,
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "request failed");
        }

        let body = ErrorBody {
            error: self.summary(),
            kind: self.kind(),
            details: self.details(),
            timestamp: timestamp::format_canonical(&chrono::Utc::now()),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_kinds_and_status_codes() {
        let invalid = DashboardError::InvalidInput("Missing enabled parameter".into());
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(invalid.kind(), "invalid_input");

        let store = DashboardError::store("failed to read logs", anyhow!("connection refused"));
        assert_eq!(store.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(store.kind(), "store_unavailable");
        assert_eq!(store.details(), "connection refused");
        assert_eq!(store.to_string(), "failed to read logs: connection refused");
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = DashboardError::InvalidInput("bad".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "bad");
        assert_eq!(body["kind"], "invalid_input");
        assert_eq!(body["details"], "bad");
        assert!(crate::timestamp::parse(body["timestamp"].as_str().unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_store_failure_body_keeps_context_and_cause() {
        let source = anyhow!("connection refused").context("pool timed out");
        let response = DashboardError::store("failed to fetch logs", source).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "failed to fetch logs");
        assert_eq!(body["kind"], "store_unavailable");
        assert_eq!(body["details"], "pool timed out: connection refused");
    }
}
