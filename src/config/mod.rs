use anyhow::Context;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub geoip: GeoIpConfig,
    pub enforcement: EnforcementConfig,
    pub retry: RetryConfig,
    pub analytics: AnalyticsConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoIpConfig {
    /// Path to a MaxMind GeoLite2-City or GeoIP2-City .mmdb file
    /// If None, every lookup fails and attack origins come back empty
    pub city_db_path: Option<String>,
    pub cache_max_entries: u64,
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementConfig {
    /// Base URL of the WAF enforcement service (e.g. `http://waf:8000`)
    /// If None, prevention mode changes are only persisted locally
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Trailing window of the attack timeline and the recent-attack count
    pub timeline_hours: i64,
    /// Reference offset (seconds east of UTC) used to align timeline buckets
    pub timeline_utc_offset_secs: i32,
    /// Maximum number of entries returned by the anomalous IP ranking
    pub anomalous_ip_limit: usize,
    pub origins_default_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins; empty means any origin
    pub allowed_origins: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            timeline_hours: 24,
            timeline_utc_offset_secs: 0,
            anomalous_ip_limit: 15,
            origins_default_hours: 24,
        }
    }
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            city_db_path: None,
            cache_max_entries: 10_000,
            cache_ttl_secs: 3600,
        }
    }
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 5,
        }
    }
}

impl AnalyticsConfig {
    pub fn timeline_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.timeline_utc_offset_secs).unwrap_or_else(|| Utc.fix())
    }
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{name} has an invalid value '{raw}'")),
        _ => Ok(default),
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            "sqlite" => DatabaseBackend::Sqlite,
            other => {
                tracing::warn!(
                    "Unknown DATABASE_BACKEND '{other}', falling back to 'sqlite'. Supported values: sqlite, postgres"
                );
                DatabaseBackend::Sqlite
            }
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./wafwatch.db?mode=rwc".to_string());
        let max_connections = env_or("DATABASE_MAX_CONNECTIONS", 10u32)?;

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let api_port = env_or("API_PORT", 5000u16)?;

        let geoip = GeoIpConfig {
            city_db_path: env_opt("GEOIP_CITY_DB_PATH"),
            cache_max_entries: env_or("GEOIP_CACHE_MAX_ENTRIES", 10_000u64)?,
            cache_ttl_secs: env_or("GEOIP_CACHE_TTL_SECS", 3600u64)?,
        };

        let enforcement = EnforcementConfig {
            base_url: env_opt("WAF_API_URL").map(|url| url.trim_end_matches('/').to_string()),
            timeout_secs: env_or("WAF_API_TIMEOUT_SECS", 5u64)?,
        };

        let retry = RetryConfig {
            max_attempts: env_or("RETRY_MAX_ATTEMPTS", 3u32)?,
            base_delay_ms: env_or("RETRY_BASE_DELAY_MS", 500u64)?,
            backoff_multiplier: env_or("RETRY_BACKOFF_MULTIPLIER", 2.0f64)?,
        };

        let analytics = AnalyticsConfig {
            timeline_hours: env_or("TIMELINE_HOURS", 24i64)?,
            timeline_utc_offset_secs: env_or("TIMELINE_UTC_OFFSET", Utc.fix())?.local_minus_utc(),
            anomalous_ip_limit: env_or("ANOMALOUS_IP_LIMIT", 15usize)?,
            origins_default_hours: env_or("ORIGINS_DEFAULT_HOURS", 24i64)?,
        };

        let allowed_origins = env_opt("CORS_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            geoip,
            enforcement,
            retry,
            analytics,
            cors: CorsConfig { allowed_origins },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_dashboard_contract() {
        let analytics = AnalyticsConfig::default();
        assert_eq!(analytics.timeline_hours, 24);
        assert_eq!(analytics.anomalous_ip_limit, 15);
        assert_eq!(analytics.timeline_offset().local_minus_utc(), 0);

        let retry = RetryConfig::default();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.base_delay_ms, 500);

        assert_eq!(EnforcementConfig::default().timeout_secs, 5);
    }

    #[test]
    fn test_offset_parses_from_env_form() {
        let offset: FixedOffset = "-06:00".parse().unwrap();
        assert_eq!(offset.local_minus_utc(), -6 * 3600);

        let analytics = AnalyticsConfig {
            timeline_utc_offset_secs: offset.local_minus_utc(),
            ..AnalyticsConfig::default()
        };
        assert_eq!(analytics.timeline_offset(), offset);
    }
}
