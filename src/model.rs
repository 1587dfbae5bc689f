//! Core data types shared between the portal client, the statistics
//! aggregator and the InfluxDB writer.

use crate::error::StorageError;
use chrono::{DateTime, NaiveDateTime, Utc};
use influxdb2::models::DataPoint;
use std::fmt;

/// A single hourly meter reading as parsed from the portal payload.
///
/// The timestamp is the portal's wall clock with minute precision; it is
/// only interpreted as a point on the UTC timeline when the reading is
/// bucketed (see `stats::bucket_start`).
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp: NaiveDateTime,
    /// Consumption in liters; non-negative.
    pub usage: f64,
    /// Whether the portal marked the value as estimated rather than read.
    pub estimated: bool,
}

/// Outcome of fetching one day of usage.
///
/// The utility publishes readings with a 2-3 day lag, so a day without
/// data is an expected state, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum DayResult {
    Available(Vec<Reading>),
    Unavailable,
}

/// The statistic series this forwarder maintains.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Series {
    /// Hourly water consumption in liters.
    Consumption,
    /// Hourly water cost derived via the liter rate.
    Cost,
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Series::Consumption => write!(f, "water_consumption"),
            Series::Cost => write!(f, "water_cost"),
        }
    }
}

/// The last persisted position of one series.
///
/// Read once at the start of a run and never mutated; the aggregator
/// derives fresh points strictly after `last_bucket_start`, seeding its
/// running total with `cumulative_sum`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationState {
    pub last_bucket_start: DateTime<Utc>,
    pub cumulative_sum: f64,
}

/// One hour bucket of a statistic series.
///
/// Points are emitted in ascending `bucket_start` order, one per non-empty
/// hour bucket; `cumulative_sum` carries the series total including any
/// seeded prior state.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticPoint {
    pub bucket_start: DateTime<Utc>,
    pub value: f64,
    pub cumulative_sum: f64,
}

impl StatisticPoint {
    /// Converts the point into an InfluxDB data point for the given series.
    ///
    /// The bucket start becomes the point timestamp; `value` and `sum`
    /// are written as fields so the next run can resume from `last()` of
    /// the `sum` field.
    pub fn to_point(&self, series: Series, meter: &str) -> Result<DataPoint, StorageError> {
        DataPoint::builder(series.to_string().as_str())
            .tag("meter", meter)
            .field("value", self.value)
            .field("sum", self.cumulative_sum)
            .timestamp(self.bucket_start.timestamp_nanos_opt().unwrap_or_default())
            .build()
            .map_err(|e| StorageError::InvalidDataPoint(e.to_string()))
    }
}

/// What one aggregation run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub consumption_points: usize,
    pub cost_points: usize,
    /// Total usage of the most recent day that had data, in liters.
    pub current_reading: Option<f64>,
    pub days_with_data: usize,
    pub days_unavailable: usize,
    pub days_failed: usize,
}
