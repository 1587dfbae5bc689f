//! Water cost calculation.
//!
//! The cost series is a pure scaling of the consumption series: each liter
//! costs a fixed configurable rate. The rate is bounded so a typo in the
//! configuration cannot silently produce nonsense statistics.

use crate::config::CostConfig;
use crate::error::ConfigError;
use std::fmt;

/// Lower bound of the accepted cost per liter.
pub const MIN_LITER_COST: f64 = 0.00005;

/// Upper bound of the accepted cost per liter.
pub const MAX_LITER_COST: f64 = 1.0;

/// Callback invoked after a successful rate update, with the new rate.
pub type RateUpdateHook = Box<dyn Fn(f64) + Send + Sync>;

/// Maps water volume to cost under a bounded per-liter rate.
pub struct CostCalculator {
    liter_cost: f64,
    currency: String,
    on_update: Option<RateUpdateHook>,
}

impl fmt::Debug for CostCalculator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CostCalculator")
            .field("liter_cost", &self.liter_cost)
            .field("currency", &self.currency)
            .field("on_update", &self.on_update.is_some())
            .finish()
    }
}

fn validate_liter_cost(value: f64) -> Result<(), ConfigError> {
    if !(MIN_LITER_COST..=MAX_LITER_COST).contains(&value) {
        return Err(ConfigError::invalid(
            "liter_cost",
            format!(
                "{} is outside the accepted range {} to {}",
                value, MIN_LITER_COST, MAX_LITER_COST
            ),
        ));
    }
    Ok(())
}

impl CostCalculator {
    /// Builds a calculator from raw configuration, validating the rate.
    pub fn new(config: &CostConfig) -> Result<Self, ConfigError> {
        validate_liter_cost(config.liter_cost)?;
        Ok(Self {
            liter_cost: config.liter_cost,
            currency: config.currency.clone(),
            on_update: None,
        })
    }

    /// Cost of the given volume in the configured currency.
    pub fn cost(&self, volume_liters: f64) -> f64 {
        volume_liters * self.liter_cost
    }

    pub fn liter_cost(&self) -> f64 {
        self.liter_cost
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Registers a hook invoked with the new rate after each successful
    /// update. Collaborators use this to persist the change.
    pub fn on_update(&mut self, hook: RateUpdateHook) {
        self.on_update = Some(hook);
    }

    /// Replaces the per-liter rate, re-validating the bound.
    ///
    /// On success the registered update hook (if any) is invoked with the
    /// new rate; on failure the rate is left untouched and the hook does
    /// not fire.
    pub fn update_liter_cost(&mut self, new_cost: f64) -> Result<(), ConfigError> {
        validate_liter_cost(new_cost)?;
        self.liter_cost = new_cost;
        if let Some(hook) = &self.on_update {
            hook(new_cost);
        }
        Ok(())
    }
}
