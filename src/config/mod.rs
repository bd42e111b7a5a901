//! Configuration management for the CAPM bot.
//!
//! Loads settings from environment variables and config files.

use crate::venue::{SecurityId, VenueLimits};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Risk model and optimizer parameters
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    /// Mode selection thresholds and timers
    #[serde(default)]
    pub decision: DecisionConfig,
    /// Closing-window market-making parameters
    #[serde(default)]
    pub quoting: QuotingConfig,
    /// Venue trading constraints
    #[serde(default)]
    pub venue: VenueLimits,
    /// Tick loop settings
    #[serde(default)]
    pub bot: BotConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// CAPM risk-aversion coefficient λ (> 0)
    #[serde(default = "default_risk_aversion")]
    pub risk_aversion: f64,
    /// Number of observations kept per security
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Aligned observations required before optimizing
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
    /// Relative pivot size below which the covariance is treated as singular
    #[serde(default = "default_singular_tolerance")]
    pub singular_tolerance: f64,
}

/// How a deviation from the target is measured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "threshold", rename_all = "lowercase")]
pub enum Materiality {
    /// Absolute deviation in units
    Units(Decimal),
    /// Absolute deviation in units × price
    Value(Decimal),
}

impl Materiality {
    pub fn threshold(&self) -> Decimal {
        match self {
            Materiality::Units(t) | Materiality::Value(t) => *t,
        }
    }

    /// Whether a unit deviation at the given price exceeds the threshold.
    pub fn is_material(&self, deviation: Decimal, price: Decimal) -> bool {
        match self {
            Materiality::Units(t) => deviation.abs() > *t,
            Materiality::Value(t) => (deviation * price).abs() > *t,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Minimum deviation that triggers rebalancing
    #[serde(default = "default_materiality")]
    pub materiality: Materiality,
    /// Seconds between two reactive batches
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Seconds before session close during which market making is allowed
    #[serde(default = "default_closing_window_secs")]
    pub closing_window_secs: u64,
    /// Largest quantity of a single rebalancing order
    #[serde(default = "default_max_order_size")]
    pub max_order_size: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotingConfig {
    /// Half-spread around fair value as a fraction of it (0.01 = 1%)
    #[serde(default = "default_half_spread_pct")]
    pub half_spread_pct: Decimal,
    /// Quantity of each quote leg
    #[serde(default = "default_quote_size")]
    pub quote_size: Decimal,
    /// Absolute position limit per security for quoting
    #[serde(default = "default_max_inventory_units")]
    pub max_inventory_units: Decimal,
    /// Drop quote legs whose fill would lower the CAPM performance score
    #[serde(default)]
    pub require_performance_gain: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Securities to trade (empty = everything the venue lists)
    #[serde(default)]
    pub securities: Vec<SecurityId>,
    /// Age in seconds after which an unfilled order is cancelled
    #[serde(default = "default_stale_order_secs")]
    pub stale_order_secs: u64,
    /// Seconds between ticks in live and replay loops
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

// Default value functions
fn default_risk_aversion() -> f64 {
    0.007
}

fn default_history_window() -> usize {
    60
}

fn default_min_observations() -> usize {
    10
}

fn default_singular_tolerance() -> f64 {
    1e-10
}

fn default_materiality() -> Materiality {
    Materiality::Units(Decimal::ONE)
}

fn default_cooldown_secs() -> u64 {
    20
}

fn default_closing_window_secs() -> u64 {
    300 // Last 5 minutes
}

fn default_max_order_size() -> Decimal {
    Decimal::new(10, 0)
}

fn default_half_spread_pct() -> Decimal {
    Decimal::new(1, 2) // 0.01 (1%)
}

fn default_quote_size() -> Decimal {
    Decimal::ONE
}

fn default_max_inventory_units() -> Decimal {
    Decimal::new(50, 0)
}

fn default_stale_order_secs() -> u64 {
    30
}

fn default_tick_interval_secs() -> u64 {
    5
}

impl DecisionConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn closing_window(&self) -> Duration {
        Duration::from_secs(self.closing_window_secs)
    }
}

impl BotConfig {
    pub fn stale_order_age(&self) -> Duration {
        Duration::from_secs(self.stale_order_secs)
    }
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("CAPM"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.optimizer.risk_aversion > 0.0 && self.optimizer.risk_aversion.is_finite(),
            "risk_aversion must be positive"
        );

        anyhow::ensure!(
            self.optimizer.min_observations >= 2
                && self.optimizer.min_observations <= self.optimizer.history_window,
            "min_observations must be >= 2 and <= history_window"
        );

        anyhow::ensure!(
            self.decision.materiality.threshold() > Decimal::ZERO,
            "materiality threshold must be positive"
        );

        anyhow::ensure!(
            self.decision.max_order_size > Decimal::ZERO,
            "max_order_size must be positive"
        );

        anyhow::ensure!(
            self.quoting.half_spread_pct > Decimal::ZERO && self.quoting.half_spread_pct < Decimal::ONE,
            "half_spread_pct must be between 0 and 1"
        );

        anyhow::ensure!(
            self.quoting.quote_size > Decimal::ZERO,
            "quote_size must be positive"
        );

        anyhow::ensure!(
            self.venue.tick_size > Decimal::ZERO && self.venue.lot_size > Decimal::ZERO,
            "tick_size and lot_size must be positive"
        );

        anyhow::ensure!(
            self.venue.min_price > Decimal::ZERO && self.venue.min_price <= self.venue.max_price,
            "price bounds must satisfy 0 < min_price <= max_price"
        );

        anyhow::ensure!(
            self.venue.short_capacity >= Decimal::ZERO,
            "short_capacity must not be negative"
        );

        anyhow::ensure!(
            self.bot.tick_interval_secs > 0,
            "tick_interval_secs must be positive"
        );

        Ok(())
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            risk_aversion: default_risk_aversion(),
            history_window: default_history_window(),
            min_observations: default_min_observations(),
            singular_tolerance: default_singular_tolerance(),
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            materiality: default_materiality(),
            cooldown_secs: default_cooldown_secs(),
            closing_window_secs: default_closing_window_secs(),
            max_order_size: default_max_order_size(),
        }
    }
}

impl Default for QuotingConfig {
    fn default() -> Self {
        Self {
            half_spread_pct: default_half_spread_pct(),
            quote_size: default_quote_size(),
            max_inventory_units: default_max_inventory_units(),
            require_performance_gain: false,
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            securities: Vec::new(),
            stale_order_secs: default_stale_order_secs(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.optimizer.risk_aversion, 0.007);
        assert_eq!(config.decision.cooldown(), Duration::from_secs(20));
        assert_eq!(config.decision.closing_window(), Duration::from_secs(300));
        assert_eq!(config.venue.tick_size, dec!(0.01));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.optimizer.risk_aversion = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.optimizer.min_observations = 100;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.venue.min_price = dec!(10);
        config.venue.max_price = dec!(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_materiality_modes() {
        let units = Materiality::Units(dec!(1));
        assert!(units.is_material(dec!(-2), dec!(100)));
        assert!(!units.is_material(dec!(0.5), dec!(100)));

        let value = Materiality::Value(dec!(50));
        assert!(value.is_material(dec!(0.6), dec!(100)));
        assert!(!value.is_material(dec!(2), dec!(10)));
    }

    #[test]
    fn test_materiality_threshold_is_exclusive() {
        let units = Materiality::Units(dec!(10));
        assert!(!units.is_material(dec!(10), dec!(1)));
        assert!(!units.is_material(dec!(-10), dec!(1)));
        assert!(units.is_material(dec!(10.5), dec!(1)));

        let value = Materiality::Value(dec!(50));
        assert!(!value.is_material(dec!(-5), dec!(10)));
        assert!(value.is_material(dec!(6), dec!(10)));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                "[decision]\ncooldown_secs = 5\n\n[venue]\ntick_size = \"0.05\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.decision.cooldown_secs, 5);
        assert_eq!(config.decision.closing_window_secs, 300);
        assert_eq!(config.venue.tick_size, dec!(0.05));
        assert_eq!(config.venue.lot_size, dec!(1));
        assert_eq!(config.optimizer.history_window, 60);
    }
}
