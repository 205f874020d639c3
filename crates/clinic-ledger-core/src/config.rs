//! Ledger configuration.
//!
//! Every threshold the dashboards and the dispensing path depend on lives here
//! instead of being scattered through the code. The forecast lookback in
//! particular is one parameter: views that disagree on it should be configured,
//! not forked.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::CivilCalendar;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What to do when a dispense asks for more than is on the shelf.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallPolicy {
    /// Fail the whole operation and leave stock untouched.
    #[default]
    Reject,
    /// Consume what is available and report the shortfall.
    PartialFill,
}

/// Thresholds for the stock alert panel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    /// Aggregate stock at or below this (and above zero) is LOW
    pub low_stock_at_or_below: i64,
    /// Number of alerts shown before "show all"
    pub preview_limit: usize,
    /// Window for the expiring-soon list
    pub expiring_within_days: u32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            low_stock_at_or_below: 30,
            preview_limit: 5,
            expiring_within_days: 30,
        }
    }
}

/// Demand forecast parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForecastConfig {
    /// Trailing window used for the daily average
    pub lookback_days: u32,
    /// Stock strictly above this is Stable
    pub stable_above: i64,
    /// Stock at or below this is LowStock
    pub low_stock_at_or_below: i64,
    /// How many months the restock projection looks ahead
    pub restock_horizon_months: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            lookback_days: 90,
            stable_above: 100,
            low_stock_at_or_below: 30,
            restock_horizon_months: 12,
        }
    }
}

/// Dispensing behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispensingConfig {
    pub shortfall_policy: ShortfallPolicy,
    /// Retries after a lot version conflict before giving up
    pub max_conflict_retries: u32,
}

impl Default for DispensingConfig {
    fn default() -> Self {
        Self {
            shortfall_policy: ShortfallPolicy::Reject,
            max_conflict_retries: 3,
        }
    }
}

/// Storage tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// How long a connection waits on another writer's lock
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Fixed civil offset in minutes east of UTC (+08:00 by default)
    pub timezone_offset_minutes: i32,
    pub alerts: AlertConfig,
    pub forecast: ForecastConfig,
    pub dispensing: DispensingConfig,
    pub storage: StorageConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            timezone_offset_minutes: 480,
            alerts: AlertConfig::default(),
            forecast: ForecastConfig::default(),
            dispensing: DispensingConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if CivilCalendar::from_offset_minutes(self.timezone_offset_minutes).is_none() {
            return Err(ConfigError::Invalid(format!(
                "timezone_offset_minutes out of range: {}",
                self.timezone_offset_minutes
            )));
        }
        if self.forecast.lookback_days == 0 {
            return Err(ConfigError::Invalid("forecast.lookback_days must be > 0".into()));
        }
        if self.forecast.low_stock_at_or_below >= self.forecast.stable_above {
            return Err(ConfigError::Invalid(format!(
                "forecast.low_stock_at_or_below ({}) must be below forecast.stable_above ({})",
                self.forecast.low_stock_at_or_below, self.forecast.stable_above
            )));
        }
        if self.alerts.low_stock_at_or_below < 0 {
            return Err(ConfigError::Invalid(
                "alerts.low_stock_at_or_below must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Calendar for the configured civil zone.
    pub fn calendar(&self) -> CivilCalendar {
        CivilCalendar::from_offset_minutes(self.timezone_offset_minutes)
            .unwrap_or_else(CivilCalendar::utc)
    }
}
