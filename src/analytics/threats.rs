//! Per-address threat scoring

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use crate::analytics::models::IpThreatEntry;
use crate::models::{IpSummary, LogSample};

/// Rank source addresses by the share of their traffic that was flagged.
///
/// Summaries without a single flagged request are left out. Ties on threat
/// level are broken by address so the output is stable for identical input.
/// `limit` of None returns every qualifying address. Entries come back with
/// empty `matched_rules`; see [`attach_rules`].
pub fn rank_ip_summaries(summaries: &[IpSummary], limit: Option<usize>) -> Vec<IpThreatEntry> {
    let mut entries: Vec<IpThreatEntry> = summaries
        .iter()
        .filter(|s| s.anomalous_requests > 0 && s.total_requests > 0)
        .map(|s| {
            let total = s.total_requests.unsigned_abs();
            let anomalous = s.anomalous_requests.unsigned_abs().min(total);
            IpThreatEntry {
                ip: s.ip.clone(),
                total_requests: total,
                anomalous_requests: anomalous,
                threat_level: 100.0 * anomalous as f64 / total as f64,
                last_detected: s.last_seen.clone(),
                matched_rules: Vec::new(),
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        b.threat_level
            .partial_cmp(&a.threat_level)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.ip.cmp(&b.ip))
    });

    if let Some(limit) = limit {
        entries.truncate(limit);
    }

    entries
}

/// Fill each entry's rule list from the address's flagged samples.
///
/// Rules are deduplicated and sorted; samples that were not flagged
/// contribute nothing.
pub fn attach_rules(entries: &mut [IpThreatEntry], samples: &[LogSample]) {
    let mut by_ip: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for sample in samples {
        by_ip
            .entry(sample.ip.as_str())
            .or_default()
            .extend(sample.flagged_rules().iter().map(String::as_str));
    }

    for entry in entries {
        if let Some(rules) = by_ip.get(entry.ip.as_str()) {
            entry.matched_rules = rules.iter().map(|r| r.to_string()).collect();
        }
    }
}
