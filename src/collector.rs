//! One aggregation run: resume state, fetch days, aggregate, commit.
//!
//! The run absorbs everything that can go wrong on a single day (HTTP
//! errors, unavailable data, malformed lines) and keeps going; only a
//! failed login aborts it, because without authentication no data could
//! have been fetched at all. Statistics derived from the days that did
//! succeed are always committed.

use crate::config::CollectorConfig;
use crate::cost::CostCalculator;
use crate::error::{Error, StorageError, UsageError};
use crate::influxdb;
use crate::model::{AggregationState, DayResult, Reading, RunSummary, Series};
use crate::portal::UsageClient;
use crate::stats;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::time::Duration;

/// Drives the portal client and the statistics pipeline for one account.
///
/// The scheduler owns exactly one `Forwarder` and never runs it
/// concurrently, which also guarantees the session is never authenticated
/// twice at the same time.
pub struct Forwarder {
    usage: UsageClient,
    store: influxdb::Client,
    cost: CostCalculator,
    config: CollectorConfig,
}

/// Resolves the two state lookups into the seeds the run will use.
///
/// A lookup that failed or timed out leaves the paired series' position
/// unknowable, so any failure forces a cold start for both series rather
/// than guessing; two successful lookups each seed their own series even
/// when one of them has no history yet.
fn seed_states(
    consumption: Result<Option<AggregationState>, StorageError>,
    cost: Result<Option<AggregationState>, StorageError>,
) -> (Option<AggregationState>, Option<AggregationState>) {
    match (consumption, cost) {
        (Ok(consumption), Ok(cost)) => (consumption, cost),
        (consumption, cost) => {
            if let Err(err) = &consumption {
                tracing::warn!("consumption state lookup failed: {}", err);
            }
            if let Err(err) = &cost {
                tracing::warn!("cost state lookup failed: {}", err);
            }
            tracing::warn!("falling back to a cold start for both series");
            (None, None)
        }
    }
}

/// The day range a run fetches, both ends inclusive.
///
/// The window is anchored `lag_days` behind today because the utility
/// publishes readings late. It reaches back to the last persisted bucket
/// (replayed days are deduplicated by the aggregator) or, on a cold
/// start, `initial_days` further.
fn fetch_window(
    today: NaiveDate,
    prior: Option<&AggregationState>,
    lag_days: u64,
    initial_days: u64,
) -> (NaiveDate, NaiveDate) {
    let end = today - ChronoDuration::days(lag_days as i64);
    let start = match prior {
        Some(state) => state.last_bucket_start.date_naive(),
        None => end - ChronoDuration::days(initial_days as i64),
    };
    (start, end)
}

impl Forwarder {
    pub fn new(
        usage: UsageClient,
        store: influxdb::Client,
        cost: CostCalculator,
        config: CollectorConfig,
    ) -> Self {
        Self {
            usage,
            store,
            cost,
            config,
        }
    }

    /// Executes one aggregation run for the given current date.
    pub async fn run_once(&mut self, today: NaiveDate) -> Result<RunSummary, Error> {
        let timeout = Duration::from_secs(self.config.state_lookup_timeout_seconds);
        let consumption_lookup = self.store.last_state(Series::Consumption, timeout).await;
        let cost_lookup = self.store.last_state(Series::Cost, timeout).await;
        let (consumption_seed, cost_seed) = seed_states(consumption_lookup, cost_lookup);

        let (start, end) = fetch_window(
            today,
            consumption_seed.as_ref(),
            self.config.lag_days,
            self.config.initial_days,
        );
        tracing::info!("aggregation run over {} to {}", start, end);

        let mut summary = RunSummary::default();
        let mut readings: Vec<Reading> = Vec::new();
        let mut date = start;
        while date <= end {
            match self.usage.fetch_day(date).await {
                Ok(DayResult::Available(day_readings)) => {
                    summary.days_with_data += 1;
                    let day_total: f64 = day_readings.iter().map(|r| r.usage).sum();
                    if day_total > 0.0 {
                        summary.current_reading = Some(day_total);
                    }
                    readings.extend(day_readings);
                }
                Ok(DayResult::Unavailable) => {
                    tracing::debug!("no data available yet for {}", date);
                    summary.days_unavailable += 1;
                }
                Err(UsageError::Auth(err)) => {
                    // Without authentication nothing was fetched; the run
                    // has nothing to commit.
                    return Err(Error::Auth(err));
                }
                Err(err) => {
                    tracing::warn!("skipping {}: {}", date, err);
                    summary.days_failed += 1;
                }
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        tracing::info!(
            "fetched {} readings across {} days",
            readings.len(),
            summary.days_with_data
        );

        let consumption_points = stats::build_series(&readings, consumption_seed.as_ref(), |v| v);
        let cost_points =
            stats::build_series(&readings, cost_seed.as_ref(), |v| self.cost.cost(v));
        if consumption_points.is_empty() && cost_points.is_empty() {
            tracing::info!("no new readings available");
            return Ok(summary);
        }

        let meter = self.usage.meter_id().to_string();
        self.store
            .write_statistics(Series::Consumption, &meter, &consumption_points)
            .await?;
        self.store
            .write_statistics(Series::Cost, &meter, &cost_points)
            .await?;
        if let Some(current) = summary.current_reading {
            self.store
                .write_current_reading(&meter, current, Utc::now())
                .await?;
        }

        summary.consumption_points = consumption_points.len();
        summary.cost_points = cost_points.len();
        tracing::info!(
            "committed {} consumption and {} cost points",
            summary.consumption_points,
            summary.cost_points
        );
        Ok(summary)
    }
}
