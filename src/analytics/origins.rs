//! Attack origins grouped by country

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::analytics::geoip::GeoResolver;
use crate::analytics::models::{CountryOrigin, RuleCount};
use crate::models::LogSample;

pub const UNKNOWN_COUNTRY: &str = "Unknown";
pub const TOP_ATTACK_TYPES: usize = 5;

#[derive(Debug, Default)]
struct IpAttacks {
    attacks: u64,
    last_attack: Option<String>,
    rule_counts: HashMap<String, u64>,
}

#[derive(Debug, Default)]
struct CountryAttacks {
    attacks: u64,
    unique_ips: BTreeSet<String>,
    last_attack: Option<String>,
    rule_counts: HashMap<String, u64>,
}

fn keep_latest(current: &mut Option<String>, candidate: Option<&String>) {
    if let Some(candidate) = candidate {
        if current.as_ref().is_none_or(|c| candidate > c) {
            *current = Some(candidate.clone());
        }
    }
}

fn merge_counts(into: &mut HashMap<String, u64>, from: &HashMap<String, u64>) {
    for (rule, count) in from {
        *into.entry(rule.clone()).or_insert(0) += count;
    }
}

/// Most frequent rules, ties broken by rule id
pub fn top_rules(counts: &HashMap<String, u64>, n: usize) -> Vec<RuleCount> {
    let mut ranked: Vec<RuleCount> = counts
        .iter()
        .map(|(rule, count)| RuleCount {
            rule: rule.clone(),
            count: *count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.rule.cmp(&b.rule)));
    ranked.truncate(n);
    ranked
}

/// Attribute flagged requests to countries.
///
/// An address that cannot be resolved is left out of every count, including
/// `unique_ip_count`; it never fails the whole aggregation. Coordinates come
/// from the lowest address in each country's set and are null when that
/// lookup fails.
pub async fn aggregate_origins(
    samples: &[LogSample],
    resolver: &dyn GeoResolver,
) -> Vec<CountryOrigin> {
    let mut by_ip: BTreeMap<&str, IpAttacks> = BTreeMap::new();
    for sample in samples.iter().filter(|s| s.injection_detected) {
        let entry = by_ip.entry(sample.ip.as_str()).or_default();
        entry.attacks += 1;
        keep_latest(&mut entry.last_attack, Some(&sample.timestamp));
        for rule in sample.flagged_rules() {
            *entry.rule_counts.entry(rule.clone()).or_insert(0) += 1;
        }
    }

    let mut by_country: BTreeMap<String, CountryAttacks> = BTreeMap::new();
    for (ip, attacks) in &by_ip {
        let location = match resolver.resolve(ip).await {
            Ok(location) => location,
            Err(err) => {
                warn!(ip = %ip, error = %err, "skipping attacker that could not be geolocated");
                continue;
            }
        };

        let country = location
            .country_name
            .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string());
        let stats = by_country.entry(country).or_default();
        stats.attacks += attacks.attacks;
        stats.unique_ips.insert(ip.to_string());
        keep_latest(&mut stats.last_attack, attacks.last_attack.as_ref());
        merge_counts(&mut stats.rule_counts, &attacks.rule_counts);
    }

    let mut origins = Vec::with_capacity(by_country.len());
    for (country, stats) in by_country {
        let (latitude, longitude) = match stats.unique_ips.first() {
            Some(representative) => match resolver.resolve(representative).await {
                Ok(location) => (location.latitude, location.longitude),
                Err(err) => {
                    debug!(country = %country, ip = %representative, error = %err, "no coordinates for country");
                    (None, None)
                }
            },
            None => (None, None),
        };

        origins.push(CountryOrigin {
            top_attack_types: top_rules(&stats.rule_counts, TOP_ATTACK_TYPES),
            unique_ip_count: stats.unique_ips.len(),
            attack_count: stats.attacks,
            last_attack: stats.last_attack,
            latitude,
            longitude,
            country,
        });
    }

    origins.sort_by(|a, b| {
        b.attack_count
            .cmp(&a.attack_count)
            .then_with(|| a.country.cmp(&b.country))
    });
    origins
}
