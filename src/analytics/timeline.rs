//! Hourly attack timeline

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Timelike};
use std::collections::BTreeMap;
use tracing::debug;

use crate::analytics::models::TimelineBucket;
use crate::models::LogSample;
use crate::timestamp;

#[derive(Debug, Default, Clone, Copy)]
struct BucketCounts {
    total: u64,
    attacks: u64,
}

/// Truncate a timestamp to the start of its hour in `offset`
pub fn hour_bucket(ts: &DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    let naive = ts
        .date_naive()
        .and_time(NaiveTime::from_hms_opt(ts.hour(), 0, 0)?);
    ts.offset().from_local_datetime(&naive).single()
}

/// Group samples into hour buckets, ascending by bucket start
///
/// Samples are expected to be pre-filtered to the window of interest.
/// Samples whose timestamp cannot be parsed are skipped.
pub fn build_timeline(samples: &[LogSample], offset: FixedOffset) -> Vec<TimelineBucket> {
    let mut buckets: BTreeMap<DateTime<FixedOffset>, BucketCounts> = BTreeMap::new();

    for sample in samples {
        let Some(bucket) = timestamp::parse(&sample.timestamp)
            .map(|ts| ts.with_timezone(&offset))
            .and_then(|ts| hour_bucket(&ts))
        else {
            debug!(timestamp = %sample.timestamp, "skipping sample with unparseable timestamp");
            continue;
        };

        let counts = buckets.entry(bucket).or_default();
        counts.total += 1;
        if sample.injection_detected {
            counts.attacks += 1;
        }
    }

    buckets
        .into_iter()
        .map(|(start, counts)| TimelineBucket {
            bucket_start: start.to_rfc3339(),
            total_requests: counts.total,
            attack_count: counts.attacks,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: &str, detected: bool) -> LogSample {
        LogSample {
            timestamp: ts.to_string(),
            ip: "1.2.3.4".to_string(),
            injection_detected: detected,
            matched_rules: vec![],
        }
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_buckets_are_hour_aligned_and_sorted() {
        let samples = vec![
            sample("2024-01-01T11:59:59.000000Z", true),
            sample("2024-01-01T10:05:00.000000Z", false),
            sample("2024-01-01T10:45:00.000000Z", true),
            sample("2024-01-01T11:00:00.000000Z", false),
        ];

        let timeline = build_timeline(&samples, utc());
        assert_eq!(
            timeline,
            vec![
                TimelineBucket {
                    bucket_start: "2024-01-01T10:00:00+00:00".to_string(),
                    total_requests: 2,
                    attack_count: 1,
                },
                TimelineBucket {
                    bucket_start: "2024-01-01T11:00:00+00:00".to_string(),
                    total_requests: 2,
                    attack_count: 1,
                },
            ]
        );
    }

    #[test]
    fn test_totals_match_input_size() {
        let samples: Vec<_> = (0..50)
            .map(|i| sample(&format!("2024-01-01T{:02}:{:02}:00Z", i % 24, i % 60), i % 3 == 0))
            .collect();

        let timeline = build_timeline(&samples, utc());
        let total: u64 = timeline.iter().map(|b| b.total_requests).sum();
        let attacks: u64 = timeline.iter().map(|b| b.attack_count).sum();
        assert_eq!(total, 50);
        assert_eq!(attacks, 17);
    }

    #[test]
    fn test_reference_offset_shifts_buckets() {
        let chicago_winter = FixedOffset::west_opt(6 * 3600).unwrap();
        let samples = vec![sample("2024-01-02T03:30:00Z", true)];

        let timeline = build_timeline(&samples, chicago_winter);
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].bucket_start, "2024-01-01T21:00:00-06:00");
    }

    #[test]
    fn test_half_hour_offsets_align_to_local_hour() {
        let india = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let samples = vec![sample("2024-01-01T00:10:00Z", false)];

        let timeline = build_timeline(&samples, india);
        assert_eq!(timeline[0].bucket_start, "2024-01-01T05:00:00+05:30");
    }

    #[test]
    fn test_empty_and_unparseable_input() {
        assert!(build_timeline(&[], utc()).is_empty());
        assert!(build_timeline(&[sample("garbage", true)], utc()).is_empty());
    }
}
