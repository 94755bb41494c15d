//! # Risk Analyzer
//!
//! Parametric risk metrics for an allocation:
//! - Portfolio volatility from the correlation matrix and per-asset volatility
//! - Value at Risk and Expected Shortfall (normal, closed form)
//! - Risk budget: marginal, component and percent contribution per symbol
//! - Concentration (Herfindahl) and position-weighted correlation risk
//! - Liquidity risk and stress results from pluggable sources


use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::RiskConfig;
use crate::correlation::CorrelationMatrix;
use crate::math;
use crate::types::{herfindahl, AllocationWeight};

/// Per-symbol liquidity scores supplied from outside the engine.
/// A score of 1 means fully liquid, 0 means illiquid.
pub trait LiquiditySource: Send + Sync {
    fn liquidity_score(&self, symbol: &str) -> Option<Decimal>;
}

/// Fixed liquidity scores
#[derive(Debug, Clone, Default)]
pub struct StaticLiquidity {
    scores: HashMap<String, Decimal>,
}

impl StaticLiquidity {
    pub fn new(scores: impl IntoIterator<Item = (String, Decimal)>) -> Self {
        Self {
            scores: scores.into_iter().collect(),
        }
    }
}

impl LiquiditySource for StaticLiquidity {
    fn liquidity_score(&self, symbol: &str) -> Option<Decimal> {
        self.scores
            .get(symbol)
            .copied()
            .map(|s| s.max(Decimal::ZERO).min(Decimal::ONE))
    }
}

/// A stress scenario: a return shock per symbol
pub trait StressScenario: Send + Sync {
    fn name(&self) -> &str;
    /// Shocked return for `symbol` (e.g. -0.30), `None` when the scenario leaves it unchanged
    fn shock(&self, symbol: &str) -> Option<Decimal>;
}

/// Caller-supplied shocks with an optional default for unlisted symbols
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShockScenario {
    pub name: String,
    pub shocks: HashMap<String, Decimal>,
    #[serde(default)]
    pub default_shock: Option<Decimal>,
}

impl StressScenario for ShockScenario {
    fn name(&self) -> &str {
        &self.name
    }

    fn shock(&self, symbol: &str) -> Option<Decimal> {
        self.shocks.get(symbol).copied().or(self.default_shock)
    }
}

/// Risk contribution of one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBudgetEntry {
    pub symbol: String,
    pub weight: Decimal,
    /// ∂σ/∂w_i (daily)
    pub marginal_contribution: Decimal,
    /// w_i · marginal; components sum to daily portfolio volatility
    pub component_contribution: Decimal,
    /// component / σ
    pub percent_of_risk: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressResult {
    pub scenario: String,
    /// Dollar P&L under the scenario
    pub pnl: Decimal,
    /// P&L as a fraction of total value
    pub pnl_pct: Decimal,
}

/// Risk metrics for one allocation.
///
/// VaR and expected shortfall are horizon figures on a daily volatility basis:
/// σ_h = σ_daily · √horizon_days. `annualized_volatility` is reported alongside and is not
/// used in either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAnalysis {
    /// Dollar VaR over `horizon_days`, from daily volatility
    pub value_at_risk: Decimal,
    /// Dollar expected shortfall over the horizon, never below VaR
    pub expected_shortfall: Decimal,
    pub confidence_level: Decimal,
    pub horizon_days: u32,
    pub total_value: Decimal,
    pub daily_volatility: Decimal,
    pub annualized_volatility: Decimal,
    pub risk_budget: Vec<RiskBudgetEntry>,
    /// Position-weighted average off-diagonal correlation
    pub correlation_risk: Decimal,
    /// Herfindahl index of the weights
    pub concentration_risk: Decimal,
    /// Weighted illiquidity, when a liquidity source scores any held symbol
    pub liquidity_risk: Option<Decimal>,
    #[serde(default)]
    pub stress_results: Vec<StressResult>,
}

impl RiskAnalysis {
    /// VaR as a fraction of total value
    pub fn var_ratio(&self) -> Decimal {
        if self.total_value > Decimal::ZERO {
            self.value_at_risk / self.total_value
        } else {
            Decimal::ZERO
        }
    }
}

/// Parametric risk analyzer
#[derive(Clone)]
pub struct RiskAnalyzer {
    confidence_level: Decimal,
    horizon_days: u32,
    annualization_factor: u32,
    liquidity: Option<Arc<dyn LiquiditySource>>,
    scenarios: Vec<Arc<dyn StressScenario>>,
}

impl Default for RiskAnalyzer {
    fn default() -> Self {
        Self::from_config(&RiskConfig::default())
    }
}

impl RiskAnalyzer {
    pub fn from_config(config: &RiskConfig) -> Self {
        assert!(
            config.confidence_level > Decimal::ZERO && config.confidence_level < Decimal::ONE,
            "confidence level must be in (0, 1)"
        );
        Self {
            confidence_level: config.confidence_level,
            horizon_days: config.horizon_days.max(1),
            annualization_factor: config.annualization_factor.max(1),
            liquidity: None,
            scenarios: Vec::new(),
        }
    }

    pub fn with_liquidity_source(mut self, source: Arc<dyn LiquiditySource>) -> Self {
        self.liquidity = Some(source);
        self
    }

    pub fn with_scenario(mut self, scenario: Arc<dyn StressScenario>) -> Self {
        self.scenarios.push(scenario);
        self
    }

    pub fn confidence_level(&self) -> Decimal {
        self.confidence_level
    }

    /// Analyze `allocation` (weights of total value) worth `total_value`.
    /// `volatilities` holds daily volatility per symbol; symbols without one are treated as
    /// riskless.
    pub fn analyze(
        &self,
        allocation: &[AllocationWeight],
        correlation: &CorrelationMatrix,
        volatilities: &HashMap<String, Decimal>,
        total_value: Decimal,
    ) -> RiskAnalysis {
        let n = allocation.len();
        let weights: Vec<Decimal> = allocation.iter().map(|a| a.weight).collect();
        let vols: Vec<Decimal> = allocation
            .iter()
            .map(|a| match volatilities.get(&a.symbol) {
                Some(v) => *v,
                None => {
                    debug!("No volatility for {}; treating as riskless", a.symbol);
                    Decimal::ZERO
                }
            })
            .collect();

        // Σ_ij = ρ_ij · σ_i · σ_j
        let covariance: Vec<Vec<Decimal>> = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| {
                        correlation.get(&allocation[i].symbol, &allocation[j].symbol)
                            * vols[i]
                            * vols[j]
                    })
                    .collect()
            })
            .collect();

        let mut variance = Decimal::ZERO;
        let mut sigma_w = vec![Decimal::ZERO; n];
        for i in 0..n {
            for j in 0..n {
                sigma_w[i] += covariance[i][j] * weights[j];
            }
            variance += weights[i] * sigma_w[i];
        }
        let daily_volatility = math::sqrt(variance);
        let annualized_volatility =
            daily_volatility * math::sqrt(Decimal::from(self.annualization_factor));

        // VaR = z·σ_h·V, ES = V·σ_h·φ(z)/(1−c)
        let horizon_volatility = daily_volatility * math::sqrt(Decimal::from(self.horizon_days));
        let z = math::normal_quantile(self.confidence_level);
        let value_at_risk = z * horizon_volatility * total_value;
        let expected_shortfall = total_value * horizon_volatility * math::normal_pdf(z)
            / (Decimal::ONE - self.confidence_level);
        assert!(
            expected_shortfall >= value_at_risk,
            "expected shortfall {} below VaR {}",
            expected_shortfall,
            value_at_risk
        );

        let risk_budget = allocation
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let (marginal, component, percent) = if daily_volatility > Decimal::ZERO {
                    let marginal = sigma_w[i] / daily_volatility;
                    let component = weights[i] * marginal;
                    (marginal, component, component / daily_volatility)
                } else {
                    (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
                };
                RiskBudgetEntry {
                    symbol: a.symbol.clone(),
                    weight: a.weight,
                    marginal_contribution: marginal,
                    component_contribution: component,
                    percent_of_risk: percent,
                }
            })
            .collect();

        RiskAnalysis {
            value_at_risk,
            expected_shortfall,
            confidence_level: self.confidence_level,
            horizon_days: self.horizon_days,
            total_value,
            daily_volatility,
            annualized_volatility,
            risk_budget,
            correlation_risk: weighted_correlation(allocation, correlation),
            concentration_risk: herfindahl(weights.iter().copied()),
            liquidity_risk: self.liquidity_risk(allocation),
            stress_results: self.stress(allocation, total_value),
        }
    }

    fn liquidity_risk(&self, allocation: &[AllocationWeight]) -> Option<Decimal> {
        let source = self.liquidity.as_ref()?;
        let mut weighted = Decimal::ZERO;
        let mut covered = Decimal::ZERO;
        for a in allocation {
            if let Some(score) = source.liquidity_score(&a.symbol) {
                weighted += a.weight * (Decimal::ONE - score);
                covered += a.weight;
            }
        }
        if covered > Decimal::ZERO {
            Some(weighted / covered)
        } else {
            None
        }
    }

    fn stress(&self, allocation: &[AllocationWeight], total_value: Decimal) -> Vec<StressResult> {
        self.scenarios
            .iter()
            .map(|scenario| {
                let pnl_pct: Decimal = allocation
                    .iter()
                    .map(|a| a.weight * scenario.shock(&a.symbol).unwrap_or(Decimal::ZERO))
                    .sum();
                StressResult {
                    scenario: scenario.name().to_string(),
                    pnl: pnl_pct * total_value,
                    pnl_pct,
                }
            })
            .collect()
    }
}

/// Σ_{i≠j} w_i w_j ρ_ij / Σ_{i≠j} w_i w_j
pub fn weighted_correlation(
    allocation: &[AllocationWeight],
    correlation: &CorrelationMatrix,
) -> Decimal {
    let mut numerator = Decimal::ZERO;
    let mut denominator = Decimal::ZERO;
    for (i, a) in allocation.iter().enumerate() {
        for (j, b) in allocation.iter().enumerate() {
            if i == j {
                continue;
            }
            let pair = a.weight * b.weight;
            numerator += pair * correlation.get(&a.symbol, &b.symbol);
            denominator += pair;
        }
    }
    if denominator > Decimal::ZERO {
        numerator / denominator
    } else {
        Decimal::ZERO
    }
}
