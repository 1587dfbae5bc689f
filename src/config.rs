use crate::error::ConfigError;
use anyhow::{anyhow, Result};
use serde_derive::Deserialize;
use std::str::FromStr;

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl AppConfig {
    pub fn log_level(&self) -> tracing::Level {
        tracing::Level::from_str(self.log_level.as_str()).unwrap_or(tracing::Level::INFO)
    }
}

pub(crate) fn load_app_config() -> Result<AppConfig> {
    match envy::from_env::<AppConfig>() {
        Ok(config) => Ok(config),
        Err(err) => Err(anyhow!("Failed to load AppConfig: {}", err)),
    }
}

fn default_client_id() -> String {
    // The MSAL client id the portal's own web frontend uses.
    "cedfde2d-79a7-44fd-9833-cae769640d3d".to_string()
}

fn default_login_base_url() -> String {
    "https://login.thameswater.co.uk/identity.thameswater.co.uk".to_string()
}

fn default_account_base_url() -> String {
    "https://myaccount.thameswater.co.uk".to_string()
}

fn default_website_base_url() -> String {
    "https://www.thameswater.co.uk".to_string()
}

/// Credentials and endpoints for the Thames Water portal.
///
/// The base URLs default to the production portal hosts; tests point them
/// at a local mock server. Credentials are immutable for the lifetime of a
/// run.
#[derive(Deserialize, Debug, Clone)]
pub struct PortalConfig {
    pub email: String,
    pub password: String,
    pub account_number: String,
    pub meter_id: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_login_base_url")]
    pub login_base_url: String,
    #[serde(default = "default_account_base_url")]
    pub account_base_url: String,
    #[serde(default = "default_website_base_url")]
    pub website_base_url: String,
}

impl PortalConfig {
    /// The OAuth redirect target registered for the portal's client id.
    pub fn redirect_uri(&self) -> String {
        format!("{}/login", self.website_base_url)
    }
}

pub(crate) fn load_portal_config() -> Result<PortalConfig> {
    match envy::prefixed("TW_").from_env::<PortalConfig>() {
        Ok(config) => Ok(config),
        Err(err) => Err(anyhow!("Failed to load PortalConfig: {}", err)),
    }
}

fn default_fetch_hours() -> String {
    "15,23".to_string()
}

fn default_lag_days() -> u64 {
    3
}

fn default_initial_days() -> u64 {
    30
}

fn default_run_on_startup() -> bool {
    true
}

fn default_task_timeout_seconds() -> u64 {
    300
}

fn default_state_lookup_timeout_seconds() -> u64 {
    5
}

#[derive(Deserialize, Debug, Clone)]
pub struct CollectorConfig {
    // hours of day (0-23) at which an aggregation run fires
    #[serde(default = "default_fetch_hours")]
    pub fetch_hours: String,
    // the utility reports usage with a 2-3 day lag
    #[serde(default = "default_lag_days")]
    pub lag_days: u64,
    // lookback window for a cold start
    #[serde(default = "default_initial_days")]
    pub initial_days: u64,
    #[serde(default = "default_run_on_startup")]
    pub run_on_startup: bool,
    #[serde(default = "default_task_timeout_seconds")]
    pub task_timeout_seconds: u64,
    #[serde(default = "default_state_lookup_timeout_seconds")]
    pub state_lookup_timeout_seconds: u64,
}

impl CollectorConfig {
    /// Parses `fetch_hours` into a validated list of hours of day.
    pub fn fetch_hours(&self) -> Result<Vec<u32>, ConfigError> {
        let mut hours = Vec::new();
        for part in self.fetch_hours.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let hour: u32 = part
                .parse()
                .map_err(|_| ConfigError::invalid("fetch_hours", format!("'{}' is not an hour", part)))?;
            if hour > 23 {
                return Err(ConfigError::invalid(
                    "fetch_hours",
                    format!("{} is out of range 0-23", hour),
                ));
            }
            hours.push(hour);
        }
        if hours.is_empty() {
            return Err(ConfigError::invalid("fetch_hours", "no hours configured"));
        }
        hours.sort_unstable();
        hours.dedup();
        Ok(hours)
    }
}

pub fn load_collector_config() -> Result<CollectorConfig> {
    match envy::prefixed("COLLECTOR_").from_env::<CollectorConfig>() {
        Ok(config) => Ok(config),
        Err(err) => Err(anyhow!("Failed to load CollectorConfig: {}", err)),
    }
}

fn default_liter_cost() -> f64 {
    0.0030682
}

fn default_currency() -> String {
    "GBP".to_string()
}

/// Raw cost settings; validated when building the `CostCalculator`.
#[derive(Deserialize, Debug, Clone)]
pub struct CostConfig {
    #[serde(default = "default_liter_cost")]
    pub liter_cost: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

pub fn load_cost_config() -> Result<CostConfig> {
    match envy::prefixed("COST_").from_env::<CostConfig>() {
        Ok(config) => Ok(config),
        Err(err) => Err(anyhow!("Failed to load CostConfig: {}", err)),
    }
}

#[derive(Deserialize, Debug)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

pub fn load_influx_config() -> Result<InfluxConfig> {
    match envy::prefixed("INFLUXDB_").from_env::<InfluxConfig>() {
        Ok(config) => Ok(config),
        Err(err) => Err(anyhow!("Failed to load InfluxConfig: {}", err)),
    }
}
