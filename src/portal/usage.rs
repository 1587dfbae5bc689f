//! Per-day meter usage fetching and parsing.

use crate::error::UsageError;
use crate::model::{DayResult, Reading};
use crate::portal::auth::AuthSession;
use chrono::{Datelike, NaiveDate};
use flate2::read::GzDecoder;
use reqwest::header::{CONTENT_ENCODING, REFERER};
use serde_derive::Deserialize;
use std::io::Read;

const USAGE_PATH: &str = "/ajax/waterMeter/getSmartWaterMeterConsumptions";

/// The usage endpoint's JSON payload.
///
/// Only the fields the forwarder consumes are modeled; the endpoint
/// returns more, and unknown fields are ignored. Everything is defaulted
/// because the portal omits fields freely on unavailable days.
#[derive(Deserialize, Debug, Default)]
#[serde(default, rename_all = "PascalCase")]
pub struct MeterUsagePayload {
    pub is_error: bool,
    pub is_data_available: bool,
    pub is_consumption_available: bool,
    pub target_usage: f64,
    pub average_usage: f64,
    pub actual_usage: f64,
    pub lines: Vec<UsageLine>,
}

/// One hourly line item of a day's usage.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default, rename_all = "PascalCase")]
pub struct UsageLine {
    /// Interval label formatted `HH:MM`.
    pub label: String,
    /// Consumption in liters.
    pub usage: f64,
    /// Meter register reading.
    pub read: f64,
    pub is_estimated: bool,
    pub meter_serial_number_his: String,
}

/// Fetches per-day hourly usage through an authenticated session.
///
/// The session is owned exclusively; authentication happens lazily on the
/// first fetch and is then reused for every subsequent day of the run.
/// There is no automatic re-login; a caller that suspects the session
/// expired (for instance after a streak of unavailable days) can reset it
/// via `session_mut().invalidate()`.
pub struct UsageClient {
    session: AuthSession,
}

impl UsageClient {
    pub fn new(session: AuthSession) -> Self {
        Self { session }
    }

    pub fn session_mut(&mut self) -> &mut AuthSession {
        &mut self.session
    }

    pub fn meter_id(&self) -> &str {
        &self.session.http().config().meter_id
    }

    /// Fetches one day of hourly usage.
    ///
    /// The day is requested as a single-day start/end range with hourly
    /// granularity. An `IsError` or `IsDataAvailable=false` payload is a
    /// normal `Unavailable` outcome, not an error: the utility publishes
    /// readings with a 2-3 day lag. Line items with unparsable labels are
    /// skipped and logged without failing the day.
    pub async fn fetch_day(&mut self, date: NaiveDate) -> Result<DayResult, UsageError> {
        if !self.session.is_authenticated() {
            self.session.authenticate().await?;
        }

        let http = self.session.http();
        let config = http.config();
        let url = http.account_url(USAGE_PATH);
        let referer = http.account_url("/mydashboard/my-meters-usage");
        let day = format!("{:02}", date.day());
        let month = format!("{:02}", date.month());
        let year = date.year().to_string();

        tracing::debug!("fetching usage for {}", date);
        let response = http
            .get(&url)
            .query(&[
                ("meter", config.meter_id.as_str()),
                ("startDate", day.as_str()),
                ("startMonth", month.as_str()),
                ("startYear", year.as_str()),
                ("endDate", day.as_str()),
                ("endMonth", month.as_str()),
                ("endYear", year.as_str()),
                ("granularity", "H"),
                ("premiseId", ""),
                ("isForC4C", "false"),
            ])
            .header(REFERER, referer.as_str())
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UsageError::Api {
                status: status.as_u16(),
            });
        }

        let content_encoding = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let raw = response.bytes().await?;
        let body = decode_body(content_encoding.as_deref(), &raw);
        let payload: MeterUsagePayload =
            serde_json::from_slice(&body).map_err(|e| UsageError::Decode(e.to_string()))?;

        if payload.is_error || !payload.is_data_available {
            return Ok(DayResult::Unavailable);
        }
        Ok(DayResult::Available(readings_for_day(date, &payload.lines)))
    }
}

/// Undoes the response's content encoding where necessary.
///
/// The endpoint sometimes serves gzip bodies regardless of the request's
/// accept headers. A gzip body is recognized by the `Content-Encoding`
/// header or the gzip magic bytes; if inflating fails anyway, the raw
/// body is assumed to be already decoded.
fn decode_body(content_encoding: Option<&str>, raw: &[u8]) -> Vec<u8> {
    let looks_gzip = content_encoding
        .map_or(false, |encoding| encoding.eq_ignore_ascii_case("gzip"))
        || raw.starts_with(&[0x1f, 0x8b]);
    if looks_gzip {
        let mut decoded = Vec::new();
        match GzDecoder::new(raw).read_to_end(&mut decoded) {
            Ok(_) => return decoded,
            Err(err) => {
                tracing::debug!("gzip decode failed, treating body as plain: {}", err)
            }
        }
    }
    raw.to_vec()
}

fn parse_label(label: &str) -> Result<(u32, u32), UsageError> {
    let bad_label = || UsageError::parse("Label", format!("expected HH:MM, got '{}'", label));
    let (hour, minute) = label.split_once(':').ok_or_else(bad_label)?;
    let hour: u32 = hour.trim().parse().map_err(|_| bad_label())?;
    let minute: u32 = minute.trim().parse().map_err(|_| bad_label())?;
    if hour > 23 || minute > 59 {
        return Err(UsageError::parse(
            "Label",
            format!("'{}' is out of range", label),
        ));
    }
    Ok((hour, minute))
}

/// Turns a day's line items into readings with synthesized timestamps.
///
/// A line whose label cannot be parsed is logged and skipped; the rest of
/// the day is still returned.
fn readings_for_day(date: NaiveDate, lines: &[UsageLine]) -> Vec<Reading> {
    let mut readings = Vec::with_capacity(lines.len());
    for line in lines {
        let (hour, minute) = match parse_label(&line.label) {
            Ok(parts) => parts,
            Err(err) => {
                tracing::warn!("skipping line for {}: {}", date, err);
                continue;
            }
        };
        // parse_label bounds hour and minute, so the timestamp exists
        let Some(timestamp) = date.and_hms_opt(hour, minute, 0) else {
            continue;
        };
        readings.push(Reading {
            timestamp,
            usage: line.usage,
            estimated: line.is_estimated,
        });
    }
    readings
}
