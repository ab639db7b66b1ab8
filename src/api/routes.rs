use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::config::CorsConfig;

use super::handlers::{
    get_anomalous_ips, get_attack_origins, get_attack_timeline, get_logs, get_prevention_mode,
    get_stats, get_status, health_check, set_prevention_mode, AppState, LATEST_TIMESTAMP_HEADER,
};

pub fn create_api_router(state: Arc<AppState>, cors: &CorsConfig) -> Router {
    let api_routes = Router::new()
        .route("/logs", get(get_logs))
        .route("/stats", get(get_stats))
        .route("/status", get(get_status))
        .route("/attack-timeline", get(get_attack_timeline))
        .route("/anomalous-ips", get(get_anomalous_ips))
        .route("/attack-origins", get(get_attack_origins))
        .route(
            "/waf/prevention",
            get(get_prevention_mode).post(set_prevention_mode),
        )
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .layer(cors_layer(cors))
}

/// Browser access for the dashboard frontend
///
/// Credentials are only allowed when origins are listed explicitly.
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::CACHE_CONTROL])
        .expose_headers([
            LATEST_TIMESTAMP_HEADER,
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
        ])
        .max_age(Duration::from_secs(3600));

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        layer.allow_origin(AllowOrigin::any())
    } else {
        layer
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
    }
}
