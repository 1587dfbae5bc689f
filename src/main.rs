//! Thames Water to InfluxDB2 Forwarder
//!
//! This application logs in to the Thames Water consumer portal by
//! replaying its browser login flow, fetches hourly smart-water-meter
//! readings day by day, and forwards them to InfluxDB2 as two resumable
//! statistic series (consumption and derived cost).
//!
//! # Architecture
//!
//! A single scheduler task runs one aggregation run at each configured
//! hour of day (the utility publishes readings a few days late, so a
//! couple of runs per day is plenty). Each run resumes from the last
//! persisted cumulative sums, so restarts and overlapping fetch windows
//! never double count.
//!
//! # Features
//!
//! - Automatic restart of a crashed scheduler task
//! - Graceful shutdown on SIGTERM/SIGINT
//! - 30-day backfill on the first run
//! - Timeout protection for hung runs

mod collector;
mod config;
mod cost;
mod error;
mod influxdb;
mod model;
mod portal;
mod stats;

#[cfg(test)]
mod test_utils;

use crate::collector::Forwarder;
use crate::cost::CostCalculator;
use crate::portal::{AuthSession, PortalHttp, UsageClient};
use chrono::{DateTime, Local, TimeZone};
use rand::Rng;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::signal::ctrl_c;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tokio::time;
use tokio::time::{sleep, Duration};

/// Application entry point.
///
/// Initializes configuration, wires the portal client, cost calculator
/// and store together, and supervises the scheduler task with signal
/// handling for graceful shutdown.
#[tokio::main]
async fn main() {
    let app_config = config::load_app_config().expect("Failed to load AppConfig");
    tracing_subscriber::fmt()
        .with_max_level(app_config.log_level())
        .init();

    let portal_config = config::load_portal_config().expect("Failed to load PortalConfig");
    let collector_config = config::load_collector_config().expect("Failed to load CollectorConfig");
    let cost_config = config::load_cost_config().expect("Failed to load CostConfig");
    let influx_config = config::load_influx_config().expect("Failed to load InfluxConfig");

    let fetch_hours = collector_config
        .fetch_hours()
        .expect("Invalid COLLECTOR_FETCH_HOURS");
    let run_on_startup = collector_config.run_on_startup;
    let task_timeout_seconds = collector_config.task_timeout_seconds;

    let portal_http = PortalHttp::new(portal_config).expect("Failed to build portal HTTP client");
    let usage_client = UsageClient::new(AuthSession::new(portal_http));
    let influx_client = influxdb::Client::new(influx_config);
    let mut cost_calculator = CostCalculator::new(&cost_config).expect("Invalid CostConfig");
    cost_calculator.on_update(Box::new(|rate| {
        tracing::info!("liter cost updated to {}", rate);
    }));

    // One forwarder behind a mutex: runs are strictly one at a time, so a
    // second authentication attempt can never race the first.
    let forwarder = Arc::new(Mutex::new(Forwarder::new(
        usage_client,
        influx_client,
        cost_calculator,
        collector_config,
    )));

    // Spread runs a little past the hour so restarts don't all hit the
    // portal at the exact same minute.
    let run_minute = rand::thread_rng().gen_range(0..=10);

    let create_scheduler_task = |startup_run: bool| -> tokio::task::JoinHandle<()> {
        tokio::spawn(run_scheduler(
            Arc::clone(&forwarder),
            fetch_hours.clone(),
            run_minute,
            startup_run,
            task_timeout_seconds,
        ))
    };
    let mut scheduler_task = create_scheduler_task(run_on_startup);

    let mut sig_term = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    tracing::info!("Running... Press Ctrl-C or send SIGTERM to terminate.");
    // Main event loop with signal handling and task supervision
    loop {
        tokio::select! {
            // Handle SIGTERM for graceful shutdown in containers
            _ = sig_term.recv() => {
                tracing::info!("Received SIGTERM. Exiting...");
                break;
            }
            // Handle Ctrl-C for manual termination
            _ = ctrl_c() => {
                tracing::info!("Received SIGINT. Exiting...");
                break;
            }
            // Monitor the scheduler task and restart on failure; the
            // startup run is not repeated after a crash.
            result = &mut scheduler_task => {
                handle_task_result("scheduler", result);
                scheduler_task = create_scheduler_task(false);
            }
        }
    }
}

/// Runs aggregation runs forever at the configured hours of day.
async fn run_scheduler(
    forwarder: Arc<Mutex<Forwarder>>,
    hours: Vec<u32>,
    minute: u32,
    run_on_startup: bool,
    timeout_seconds: u64,
) {
    if run_on_startup {
        run_forwarder_once(&forwarder, timeout_seconds).await;
    }
    loop {
        let delay = next_run_delay(Local::now(), &hours, minute);
        tracing::debug!("next aggregation run in {:?}", delay);
        sleep(delay).await;
        run_forwarder_once(&forwarder, timeout_seconds).await;
    }
}

/// Executes a single aggregation run with timeout protection.
async fn run_forwarder_once(forwarder: &Arc<Mutex<Forwarder>>, timeout_seconds: u64) {
    with_timeout(
        "aggregation_run",
        async {
            let mut forwarder = forwarder.lock().await;
            let today = Local::now().date_naive();
            match forwarder.run_once(today).await {
                Ok(summary) => tracing::info!(
                    "Aggregation run finished: {} consumption points, {} cost points, {} days without data",
                    summary.consumption_points,
                    summary.cost_points,
                    summary.days_unavailable,
                ),
                Err(e) => tracing::error!("Aggregation run failed: {:#}", e),
            }
        },
        timeout_seconds,
    )
    .await;
}

/// Time until the next configured run slot.
///
/// Considers every configured hour today and tomorrow at the given
/// minute and picks the nearest one strictly in the future.
fn next_run_delay(now: DateTime<Local>, hours: &[u32], minute: u32) -> Duration {
    let mut next: Option<DateTime<Local>> = None;
    for day_offset in 0..=1i64 {
        let date = now.date_naive() + chrono::Duration::days(day_offset);
        for &hour in hours {
            let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                continue;
            };
            let Some(candidate) = Local.from_local_datetime(&naive).earliest() else {
                continue;
            };
            if candidate > now && next.map_or(true, |best| candidate < best) {
                next = Some(candidate);
            }
        }
    }
    match next {
        Some(candidate) => (candidate - now)
            .to_std()
            .unwrap_or(Duration::from_secs(60)),
        // hours are validated as non-empty; keep a sane fallback anyway
        None => Duration::from_secs(3600),
    }
}

/// Wraps a future with a timeout to prevent tasks from hanging indefinitely.
///
/// Logs an error if the task times out but doesn't propagate the error;
/// the scheduler simply moves on to the next slot.
async fn with_timeout<F>(task_name: &'static str, future: F, timeout_seconds: u64)
where
    F: IntoFuture,
{
    let timeout_duration = Duration::from_secs(timeout_seconds);

    match time::timeout(timeout_duration, future).await {
        Ok(_) => {}
        Err(_) => tracing::error!("Task {} timed out.", task_name),
    }
}

/// Handles the result of a tokio task, logging success or failure.
///
/// Failures (panics, cancellation) are logged at error level; the main
/// loop restarts the task afterwards.
fn handle_task_result(task_name: &str, result: Result<(), JoinError>) {
    match result {
        Ok(_) => {
            tracing::debug!("Task {} completed.", task_name);
        }
        Err(e) => {
            tracing::error!("Task {} failed: {:?}", task_name, e);
        }
    }
}
