//! Hourly statistics aggregation.
//!
//! Turns a batch of raw readings, plus the optional prior state of a
//! series, into an ordered sequence of statistic points that extends the
//! persisted history without ever duplicating it. Consumption and cost
//! are built independently from the same readings by passing a different
//! value function.

use crate::model::{AggregationState, Reading, StatisticPoint};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use std::collections::BTreeMap;

/// Returns the start of the hour bucket owning a reading timestamp.
///
/// The portal labels each line with the end of the interval it covers, so
/// a reading at the exact top of an hour belongs to the previous hour's
/// bucket; any other timestamp belongs to the hour it falls in.
pub fn bucket_start(timestamp: NaiveDateTime) -> DateTime<Utc> {
    // and_hms_opt with an hour taken from a valid timestamp cannot fail
    let truncated = timestamp
        .date()
        .and_hms_opt(timestamp.hour(), 0, 0)
        .unwrap();
    let start = if timestamp.minute() == 0 && timestamp.second() == 0 {
        truncated - Duration::hours(1)
    } else {
        truncated
    };
    Utc.from_utc_datetime(&start)
}

/// Builds one statistic series from a batch of readings.
///
/// Readings are grouped into ascending hour buckets; each bucket's value
/// is the sum of `value_of(usage)` over its readings, and the cumulative
/// sum continues from the prior state's sum (or zero on a cold start).
/// When prior state exists, readings whose owning bucket is not strictly
/// after the prior bucket start are discarded, so replaying an
/// overlapping fetch window never double counts.
///
/// An empty result is not an error; it means the window held no new data.
pub fn build_series<F>(
    readings: &[Reading],
    prior: Option<&AggregationState>,
    value_of: F,
) -> Vec<StatisticPoint>
where
    F: Fn(f64) -> f64,
{
    // BTreeMap keys double as the ascending sort over buckets.
    let mut buckets: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
    for reading in readings {
        let bucket = bucket_start(reading.timestamp);
        if let Some(state) = prior {
            if bucket <= state.last_bucket_start {
                continue;
            }
        }
        *buckets.entry(bucket).or_insert(0.0) += value_of(reading.usage);
    }

    let mut cumulative = prior.map_or(0.0, |state| state.cumulative_sum);
    buckets
        .into_iter()
        .map(|(bucket, value)| {
            cumulative += value;
            StatisticPoint {
                bucket_start: bucket,
                value,
                cumulative_sum: cumulative,
            }
        })
        .collect()
}

/// State to resume from after committing the given points.
pub fn state_after(points: &[StatisticPoint]) -> Option<AggregationState> {
    points.last().map(|point| AggregationState {
        last_bucket_start: point.bucket_start,
        cumulative_sum: point.cumulative_sum,
    })
}
