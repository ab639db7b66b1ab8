//! Attack analytics
//!
//! Aggregations over log samples that power the dashboard: the hourly attack
//! timeline, per-address threat ranking and attack origins by country. The
//! aggregators are plain functions over already-fetched samples; fetching,
//! retrying and failure policy live in [`crate::dashboard`].

pub mod geoip;
pub mod models;
pub mod origins;
pub mod threats;
pub mod timeline;

pub use geoip::{CachedGeoResolver, GeoIpService, GeoLookupError, GeoResolver};
pub use models::{CountryOrigin, GeoLocation, IpThreatEntry, RuleCount, TimelineBucket};
pub use origins::aggregate_origins;
pub use threats::{attach_rules, rank_ip_summaries};
pub use timeline::build_timeline;
