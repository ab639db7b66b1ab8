//! Data models for attack analytics

use serde::{Deserialize, Serialize};

/// Geographic location information derived from an IP address
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// Country name in English; None when the database has no country for the network
    pub country_name: Option<String>,

    /// Approximate latitude of the network
    pub latitude: Option<f64>,

    /// Approximate longitude of the network
    pub longitude: Option<f64>,
}

/// Requests per hour-aligned window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineBucket {
    /// Start of the hour, RFC3339 in the configured reference offset
    pub bucket_start: String,
    pub total_requests: u64,
    pub attack_count: u64,
}

/// Threat summary for a single source address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpThreatEntry {
    pub ip: String,
    pub total_requests: u64,
    pub anomalous_requests: u64,
    /// Percentage of the address's requests that were flagged, in (0, 100]
    pub threat_level: f64,
    pub last_detected: String,
    pub matched_rules: Vec<String>,
}

/// A detection rule and how often it fired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCount {
    pub rule: String,
    pub count: u64,
}

/// Attack volume attributed to one country
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryOrigin {
    pub country: String,
    pub attack_count: u64,
    pub unique_ip_count: usize,
    pub last_attack: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub top_attack_types: Vec<RuleCount>,
}
