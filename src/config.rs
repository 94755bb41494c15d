//! Engine configuration
//!
//! Loaded from an optional TOML file layered with `ENGINE__*` environment variables.

use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub rebalance: RebalanceConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub providers: ProviderConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub events: EventConfig,
}

impl Config {
    /// Load configuration from `path` (if it exists) and the environment
    pub fn load(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("ENGINE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let mut config: Config = settings.try_deserialize()?;
        config.database.path = shellexpand::tilde(&config.database.path).into_owned();
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the engine's math meaningless
    pub fn validate(&self) -> Result<()> {
        let r = &self.risk;
        if r.confidence_level <= dec!(0.5) || r.confidence_level >= Decimal::ONE {
            return Err(EngineError::InvalidConfiguration(format!(
                "risk.confidence_level must be in (0.5, 1), got {}",
                r.confidence_level
            )));
        }
        if r.horizon_days == 0 || r.annualization_factor == 0 {
            return Err(EngineError::InvalidConfiguration(
                "risk.horizon_days and risk.annualization_factor must be positive".into(),
            ));
        }
        if self.correlation.min_observations < 2 {
            return Err(EngineError::InvalidConfiguration(format!(
                "correlation.min_observations must be at least 2, got {}",
                self.correlation.min_observations
            )));
        }
        if self.correlation.lookback < self.correlation.min_observations {
            return Err(EngineError::InvalidConfiguration(format!(
                "correlation.lookback ({}) is shorter than min_observations ({})",
                self.correlation.lookback, self.correlation.min_observations
            )));
        }
        let rb = &self.rebalance;
        if rb.drift_threshold < Decimal::ZERO || rb.high_urgency_threshold < rb.drift_threshold {
            return Err(EngineError::InvalidConfiguration(format!(
                "rebalance thresholds must satisfy 0 <= drift ({}) <= high urgency ({})",
                rb.drift_threshold, rb.high_urgency_threshold
            )));
        }
        if self.monitor.concentration_ceiling <= Decimal::ZERO
            || self.monitor.concentration_ceiling > Decimal::ONE
        {
            return Err(EngineError::InvalidConfiguration(format!(
                "monitor.concentration_ceiling must be in (0, 1], got {}",
                self.monitor.concentration_ceiling
            )));
        }
        if self.providers.timeout_ms == 0 {
            return Err(EngineError::InvalidConfiguration(
                "providers.timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Allocation optimizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Method used when the caller does not name one
    #[serde(default = "default_method")]
    pub default_method: String,
    #[serde(default = "default_objective")]
    pub default_objective: String,
    /// Annual risk-free rate used by the max-Sharpe objective
    #[serde(default)]
    pub risk_free_rate: Decimal,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: Decimal,
}

fn default_method() -> String {
    "insight_weighted".to_string()
}

fn default_objective() -> String {
    "max_sharpe".to_string()
}

fn default_max_iterations() -> usize {
    1000
}

fn default_tolerance() -> Decimal {
    dec!(0.0000000001)
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            default_method: default_method(),
            default_objective: default_objective(),
            risk_free_rate: Decimal::ZERO,
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Symbols with fewer return observations are excluded from the universe
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
    /// Most recent observations used per series
    #[serde(default = "default_lookback")]
    pub lookback: usize,
}

fn default_min_observations() -> usize {
    20
}

fn default_lookback() -> usize {
    90
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            min_observations: default_min_observations(),
            lookback: default_lookback(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Absolute weight drift that must be exceeded before a trade is planned
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: Decimal,
    /// Drift at or above which a trade is marked high urgency
    #[serde(default = "default_high_urgency_threshold")]
    pub high_urgency_threshold: Decimal,
}

fn default_drift_threshold() -> Decimal {
    dec!(0.01)
}

fn default_high_urgency_threshold() -> Decimal {
    dec!(0.05)
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            drift_threshold: default_drift_threshold(),
            high_urgency_threshold: default_high_urgency_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_confidence_level")]
    pub confidence_level: Decimal,
    /// VaR horizon in trading days
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
    /// Trading periods per year (252 for daily data)
    #[serde(default = "default_annualization_factor")]
    pub annualization_factor: u32,
}

fn default_confidence_level() -> Decimal {
    dec!(0.95)
}

fn default_horizon_days() -> u32 {
    1
}

fn default_annualization_factor() -> u32 {
    252
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            confidence_level: default_confidence_level(),
            horizon_days: default_horizon_days(),
            annualization_factor: default_annualization_factor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Herfindahl index above which a concentration alert is raised
    #[serde(default = "default_concentration_ceiling")]
    pub concentration_ceiling: Decimal,
}

fn default_concentration_ceiling() -> Decimal {
    dec!(0.30)
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            concentration_ceiling: default_concentration_ceiling(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Per-call timeout for market data, insight and execution collaborators
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "data/portfolios.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}
