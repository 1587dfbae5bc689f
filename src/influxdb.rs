//! InfluxDB2 storage for the statistic series.
//!
//! Besides writing points, the store answers the one question a resumable
//! run needs: where did each series leave off? That lookup is bounded by
//! a short timeout so an unreachable InfluxDB degrades the run to a cold
//! start instead of hanging it.

use crate::config::InfluxConfig;
use crate::error::StorageError;
use crate::model::{AggregationState, Series, StatisticPoint};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use futures::prelude::stream;
use influxdb2::models::{DataPoint, Query};
use influxdb2::FromDataPoint;
use std::time::Duration;

pub struct Client {
    client: influxdb2::Client,
    bucket: String,
}

/// Row shape of the `last()` state query.
#[derive(Debug, FromDataPoint)]
struct StatRow {
    value: f64,
    time: DateTime<FixedOffset>,
}

impl Default for StatRow {
    fn default() -> Self {
        Self {
            value: 0.0,
            time: DateTime::from_naive_utc_and_offset(
                NaiveDateTime::default(),
                FixedOffset::east_opt(0).unwrap(),
            ),
        }
    }
}

impl Client {
    pub fn new(config: InfluxConfig) -> Self {
        let client = influxdb2::Client::new(config.url, config.org, config.token);
        Self {
            client,
            bucket: config.bucket,
        }
    }

    /// Writes one series' statistic points.
    pub async fn write_statistics(
        &self,
        series: Series,
        meter: &str,
        points: &[StatisticPoint],
    ) -> Result<(), StorageError> {
        let data_points = points
            .iter()
            .map(|point| point.to_point(series, meter))
            .collect::<Result<Vec<DataPoint>, StorageError>>()?;
        self.client
            .write(self.bucket.as_str(), stream::iter(data_points))
            .await?;
        Ok(())
    }

    /// Writes the most recent day's total usage as a standalone gauge.
    pub async fn write_current_reading(
        &self,
        meter: &str,
        liters: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let point = DataPoint::builder("water_current_usage")
            .tag("meter", meter)
            .field("value", liters)
            .timestamp(timestamp.timestamp_nanos_opt().unwrap_or_default())
            .build()
            .map_err(|e| StorageError::InvalidDataPoint(e.to_string()))?;
        self.client
            .write(self.bucket.as_str(), stream::iter([point]))
            .await?;
        Ok(())
    }

    /// Looks up the last persisted position of a series.
    ///
    /// Returns `Ok(None)` when the series has no history yet. A slow or
    /// unreachable InfluxDB is reported as `LookupTimeout` so the caller
    /// can fall back to a cold start.
    pub async fn last_state(
        &self,
        series: Series,
        timeout: Duration,
    ) -> Result<Option<AggregationState>, StorageError> {
        let flux = format!(
            r#"from(bucket: "{}")
  |> range(start: 0)
  |> filter(fn: (r) => r._measurement == "{}" and r._field == "sum")
  |> last()"#,
            self.bucket, series
        );
        let rows: Vec<StatRow> = tokio::time::timeout(
            timeout,
            self.client.query::<StatRow>(Some(Query::new(flux))),
        )
        .await
        .map_err(|_| StorageError::LookupTimeout {
            seconds: timeout.as_secs(),
        })??;

        Ok(rows.into_iter().next().map(|row| AggregationState {
            last_bucket_start: row.time.with_timezone(&Utc),
            cumulative_sum: row.value,
        }))
    }
}
