//! GeoIP lookup service using MaxMind GeoLite2/GeoIP2 MMDB
//!
//! This module provides thread-safe IP geolocation using a memory-mapped
//! MaxMind City database, plus a read-through cache that can wrap any
//! resolver.

use anyhow::{Context, Result};
use async_trait::async_trait;
use maxminddb::{geoip2, Mmap, Reader};
use moka::future::Cache;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::analytics::models::GeoLocation;

#[derive(Debug, Clone, Error)]
pub enum GeoLookupError {
    #[error("no GeoIP database is configured")]
    DatabaseUnavailable,
    #[error("'{0}' is not a valid IP address")]
    InvalidAddress(String),
    #[error("no GeoIP record for {0}")]
    NotFound(IpAddr),
    #[error("GeoIP lookup for {ip} failed: {reason}")]
    Lookup { ip: IpAddr, reason: String },
}

/// Resolves a source address to a location
#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn resolve(&self, ip: &str) -> Result<GeoLocation, GeoLookupError>;
}

/// Parse an address the way it appears in log records
pub fn parse_ip(ip: &str) -> Result<IpAddr, GeoLookupError> {
    ip.trim()
        .parse::<IpAddr>()
        .map_err(|_| GeoLookupError::InvalidAddress(ip.to_string()))
}

/// GeoIP lookup service backed by a City database
#[derive(Clone)]
pub struct GeoIpService {
    city_reader: Option<Arc<Reader<Mmap>>>,
}

impl GeoIpService {
    /// Create a new GeoIP service from an MMDB file path
    ///
    /// # Arguments
    /// * `city_path` - Optional path to the MaxMind GeoLite2-City or GeoIP2-City .mmdb file
    pub fn new(city_path: Option<&str>) -> Result<Self> {
        let city_reader = if let Some(path) = city_path {
            let reader = unsafe { Reader::open_mmap(path) }
                .with_context(|| format!("Failed to open GeoIP City database at {}", path))?;
            Some(Arc::new(reader))
        } else {
            None
        };

        Ok(Self { city_reader })
    }

    pub fn is_available(&self) -> bool {
        self.city_reader.is_some()
    }

    /// Lookup the location of an IP address
    pub fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoLookupError> {
        let reader = self
            .city_reader
            .as_ref()
            .ok_or(GeoLookupError::DatabaseUnavailable)?;

        let result = reader.lookup(ip).map_err(|e| GeoLookupError::Lookup {
            ip,
            reason: e.to_string(),
        })?;

        let city = result
            .decode::<geoip2::City>()
            .map_err(|e| GeoLookupError::Lookup {
                ip,
                reason: e.to_string(),
            })?
            .ok_or(GeoLookupError::NotFound(ip))?;

        Ok(GeoLocation {
            country_name: city.country.names.english.map(|s| s.to_string()),
            latitude: city.location.latitude,
            longitude: city.location.longitude,
        })
    }
}

#[async_trait]
impl GeoResolver for GeoIpService {
    async fn resolve(&self, ip: &str) -> Result<GeoLocation, GeoLookupError> {
        self.lookup(parse_ip(ip)?)
    }
}

/// Read-through cache of successful lookups
///
/// Failures are not cached so a transient miss is retried on the next request.
pub struct CachedGeoResolver {
    inner: Arc<dyn GeoResolver>,
    cache: Cache<IpAddr, GeoLocation>,
}

impl CachedGeoResolver {
    pub fn new(inner: Arc<dyn GeoResolver>, max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { inner, cache }
    }
}

#[async_trait]
impl GeoResolver for CachedGeoResolver {
    async fn resolve(&self, ip: &str) -> Result<GeoLocation, GeoLookupError> {
        let addr = parse_ip(ip)?;

        if let Some(cached) = self.cache.get(&addr).await {
            return Ok(cached);
        }

        let location = self.inner.resolve(ip).await?;
        self.cache.insert(addr, location.clone()).await;
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GeoResolver for CountingResolver {
        async fn resolve(&self, ip: &str) -> Result<GeoLocation, GeoLookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if ip.starts_with("10.") {
                return Err(GeoLookupError::NotFound(parse_ip(ip)?));
            }
            Ok(GeoLocation {
                country_name: Some("Germany".to_string()),
                latitude: Some(51.0),
                longitude: Some(9.0),
            })
        }
    }

    #[test]
    fn test_geoip_service_creation_invalid_path() {
        let result = GeoIpService::new(Some("/nonexistent/path.mmdb"));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_geoip_service_without_database_fails_lookups() {
        let service = GeoIpService::new(None).unwrap();
        assert!(!service.is_available());
        assert!(matches!(
            service.resolve("8.8.8.8").await,
            Err(GeoLookupError::DatabaseUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected() {
        let service = GeoIpService::new(None).unwrap();
        assert!(matches!(
            service.resolve("not-an-ip").await,
            Err(GeoLookupError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_lookups() {
        let inner = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedGeoResolver::new(inner.clone(), 100, Duration::from_secs(60));

        for _ in 0..3 {
            let geo = cached.resolve("5.6.7.8").await.unwrap();
            assert_eq!(geo.country_name.as_deref(), Some("Germany"));
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        // Failures go back to the inner resolver every time
        assert!(cached.resolve("10.0.0.1").await.is_err());
        assert!(cached.resolve("10.0.0.1").await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }
}
