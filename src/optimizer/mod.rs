//! # Allocation Optimizer
//!
//! Turns a screened symbol universe into a normalized target-weight vector.
//!
//! Methods:
//! - Risk parity (inverse volatility)
//! - Insight weighted (sentiment, confidence, price target, diversification)
//! - Mean-variance (min risk / max Sharpe / max return under a position cap)
//! - Equal weight
//! - Equal risk contribution (full covariance risk budgeting)
//!
//! Every method returns weights summing to 1, which are then scaled by the investable
//! fraction `1 - min_cash_reserve`.

mod insight;
mod mean_variance;
mod universe;

pub use insight::{insight_score, InsightScore};
pub use universe::{AssetStats, ExcludedSymbol, ExclusionKind, SymbolData, Universe};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::config::OptimizerConfig;
use crate::error::EngineError;
use crate::math;
use crate::risk::RiskAnalysis;
use crate::types::{AllocationWeight, Portfolio, RebalancingTrade};

/// Allowed gap between the raw weight sum and 1 before scaling
const NORMALIZATION_TOLERANCE: Decimal = dec!(0.000000001);

/// Allocation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMethod {
    /// weight ∝ 1 / volatility
    RiskParity,
    /// Score-weighted using external insights ("ai_enhanced")
    InsightWeighted,
    MeanVariance,
    EqualWeight,
    /// Equal risk contribution using the full covariance matrix
    EqualRiskContribution,
}

impl OptimizationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RiskParity => "risk_parity",
            Self::InsightWeighted => "insight_weighted",
            Self::MeanVariance => "mean_variance",
            Self::EqualWeight => "equal_weight",
            Self::EqualRiskContribution => "equal_risk_contribution",
        }
    }

    /// Parse a method name, falling back to `InsightWeighted` for unknown names.
    /// The second value is `true` when the fallback was used.
    pub fn parse_or_default(raw: &str) -> (Self, bool) {
        match raw.parse() {
            Ok(method) => (method, false),
            Err(e) => {
                warn!("{}; falling back to insight_weighted", e);
                (Self::InsightWeighted, true)
            }
        }
    }
}

impl FromStr for OptimizationMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "risk_parity" => Ok(Self::RiskParity),
            "insight_weighted" | "ai_enhanced" => Ok(Self::InsightWeighted),
            "mean_variance" => Ok(Self::MeanVariance),
            "equal_weight" => Ok(Self::EqualWeight),
            "equal_risk_contribution" | "erc" => Ok(Self::EqualRiskContribution),
            other => Err(EngineError::InvalidConfiguration(format!(
                "unknown optimization method '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for OptimizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What mean-variance optimizes for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    MinRisk,
    MaxSharpe,
    MaxReturn,
}

impl Objective {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MinRisk => "min_risk",
            Self::MaxSharpe => "max_sharpe",
            Self::MaxReturn => "max_return",
        }
    }

    /// Parse an objective name, falling back to `MaxSharpe` for unknown names
    pub fn parse_or_default(raw: &str) -> (Self, bool) {
        match raw.parse() {
            Ok(objective) => (objective, false),
            Err(e) => {
                warn!("{}; falling back to max_sharpe", e);
                (Self::MaxSharpe, true)
            }
        }
    }
}

impl FromStr for Objective {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "min_risk" | "min_variance" => Ok(Self::MinRisk),
            "max_sharpe" => Ok(Self::MaxSharpe),
            "max_return" => Ok(Self::MaxReturn),
            other => Err(EngineError::InvalidConfiguration(format!(
                "unknown optimization objective '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable note attached to an optimization result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub symbol: Option<String>,
    pub message: String,
}

impl Recommendation {
    pub fn general(message: impl Into<String>) -> Self {
        Self {
            symbol: None,
            message: message.into(),
        }
    }

    pub fn for_symbol(symbol: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            symbol: Some(symbol.into()),
            message: message.into(),
        }
    }
}

/// Weights chosen by the optimizer for one universe
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationPlan {
    pub method: OptimizationMethod,
    pub objective: Objective,
    /// Scaled weights, universe order, summing to `1 - min_cash_reserve`
    pub weights: Vec<AllocationWeight>,
    /// Annualized expected return of the scaled allocation
    pub expected_return: Decimal,
    /// Annualized volatility of the scaled allocation
    pub expected_risk: Decimal,
    pub sharpe_ratio: Decimal,
    pub notes: Vec<Recommendation>,
}

/// Outcome of one optimization call. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub id: String,
    pub portfolio_id: String,
    pub method: OptimizationMethod,
    pub objective: Objective,
    pub current_allocation: Vec<AllocationWeight>,
    pub optimized_allocation: Vec<AllocationWeight>,
    pub expected_return: Decimal,
    pub expected_risk: Decimal,
    pub sharpe_ratio: Decimal,
    pub rebalancing_trades: Vec<RebalancingTrade>,
    pub risk_metrics: RiskAnalysis,
    pub recommendations: Vec<Recommendation>,
    pub excluded: Vec<ExcludedSymbol>,
    pub created_at: DateTime<Utc>,
}

impl OptimizationResult {
    pub fn optimized_weight(&self, symbol: &str) -> Decimal {
        crate::types::weight_of(&self.optimized_allocation, symbol)
    }

    pub fn total_optimized_weight(&self) -> Decimal {
        self.optimized_allocation.iter().map(|w| w.weight).sum()
    }
}

/// Stateless allocation optimizer
#[derive(Debug, Clone)]
pub struct AllocationOptimizer {
    /// Annual risk-free rate
    risk_free_rate: Decimal,
    max_iterations: usize,
    tolerance: Decimal,
    /// Periods per year of the volatility inputs
    annualization_factor: u32,
}

impl Default for AllocationOptimizer {
    fn default() -> Self {
        Self::new(&OptimizerConfig::default(), 252)
    }
}

impl AllocationOptimizer {
    pub fn new(config: &OptimizerConfig, annualization_factor: u32) -> Self {
        Self {
            risk_free_rate: config.risk_free_rate,
            max_iterations: config.max_iterations.max(1),
            tolerance: config.tolerance,
            annualization_factor: annualization_factor.max(1),
        }
    }

    /// Choose weights for `universe` under `method` / `objective`
    pub fn optimize(
        &self,
        portfolio: &Portfolio,
        universe: &Universe,
        method: OptimizationMethod,
        objective: Objective,
    ) -> AllocationPlan {
        let mut notes = Vec::new();

        if universe.is_empty() {
            notes.push(Recommendation::general(
                "No eligible symbols after screening; allocation stays in cash",
            ));
            return AllocationPlan {
                method,
                objective,
                weights: Vec::new(),
                expected_return: Decimal::ZERO,
                expected_risk: Decimal::ZERO,
                sharpe_ratio: Decimal::ZERO,
                notes,
            };
        }

        let raw = match method {
            OptimizationMethod::RiskParity => self.risk_parity(&universe.assets),
            OptimizationMethod::EqualWeight => self.equal_weight(universe.len()),
            OptimizationMethod::InsightWeighted => {
                self.insight_weighted(universe, &mut notes)
            }
            OptimizationMethod::MeanVariance => {
                let cap = self.position_cap(portfolio, universe.len(), &mut notes);
                let covariance = self.covariance(universe);
                let returns: Vec<Decimal> =
                    universe.assets.iter().map(|a| a.expected_return).collect();
                let solver = mean_variance::MeanVariance::new(
                    &covariance,
                    cap,
                    self.max_iterations,
                    self.tolerance,
                );
                match objective {
                    Objective::MinRisk => solver.min_variance(),
                    Objective::MaxSharpe => {
                        let excess: Vec<Decimal> =
                            returns.iter().map(|r| *r - self.risk_free_rate).collect();
                        if excess.iter().all(|e| *e <= Decimal::ZERO) {
                            notes.push(Recommendation::general(
                                "No asset has a positive excess return; using the minimum-variance portfolio",
                            ));
                            solver.min_variance()
                        } else {
                            solver.max_sharpe(&excess)
                        }
                    }
                    Objective::MaxReturn => solver.max_return(&returns),
                }
            }
            OptimizationMethod::EqualRiskContribution => {
                let covariance = self.covariance(universe);
                self.equal_risk_contribution(&covariance)
            }
        };

        let weights = finalize(raw, portfolio.constraints.investable_fraction());
        debug!(
            "Optimized {} symbols with {}/{}",
            universe.len(),
            method,
            objective
        );

        let allocation: Vec<AllocationWeight> = universe
            .assets
            .iter()
            .zip(weights.iter())
            .map(|(a, &w)| AllocationWeight::new(a.symbol.clone(), w))
            .collect();

        let expected_return: Decimal = universe
            .assets
            .iter()
            .zip(weights.iter())
            .map(|(a, &w)| w * a.expected_return)
            .sum();
        let expected_risk = self.annualized_volatility(universe, &weights);
        let sharpe_ratio = if expected_risk > Decimal::ZERO {
            expected_return / expected_risk
        } else {
            Decimal::ZERO
        };

        review_against_profile(portfolio, universe, &allocation, expected_risk, &mut notes);

        AllocationPlan {
            method,
            objective,
            weights: allocation,
            expected_return,
            expected_risk,
            sharpe_ratio,
            notes,
        }
    }

    /// Equal weight portfolio (1/N)
    fn equal_weight(&self, n: usize) -> Vec<Decimal> {
        if n == 0 {
            return Vec::new();
        }
        let w = Decimal::ONE / Decimal::from(n as u64);
        vec![w; n]
    }

    /// Inverse-volatility weights, so that `weight_i * vol_i` is the same for every asset
    fn risk_parity(&self, assets: &[AssetStats]) -> Vec<Decimal> {
        let inverse: Vec<Decimal> = assets
            .iter()
            .map(|a| Decimal::ONE / a.volatility)
            .collect();
        normalize(inverse)
    }

    fn insight_weighted(
        &self,
        universe: &Universe,
        notes: &mut Vec<Recommendation>,
    ) -> Vec<Decimal> {
        let parity = self.risk_parity(&universe.assets);

        let scores: Vec<Option<InsightScore>> = universe
            .assets
            .iter()
            .map(|a| {
                a.insight
                    .as_ref()
                    .map(|i| insight_score(a, i, &universe.correlation))
            })
            .collect();

        if scores.iter().all(Option::is_none) {
            notes.push(Recommendation::general(
                "No insights available; weights follow risk parity",
            ));
            return parity;
        }

        for (asset, score) in universe.assets.iter().zip(scores.iter()) {
            match score {
                Some(s) => notes.push(Recommendation::for_symbol(
                    &asset.symbol,
                    format!(
                        "Insight score {:.4} (sentiment {}, confidence {}, implied return {:.2}%)",
                        s.clamped,
                        asset.insight.as_ref().map(|i| i.sentiment).unwrap_or_default(),
                        asset.insight.as_ref().map(|i| i.confidence).unwrap_or_default(),
                        s.implied_return * dec!(100)
                    ),
                )),
                None => notes.push(Recommendation::for_symbol(
                    &asset.symbol,
                    "No insight; weighted by risk parity",
                )),
            }
        }

        let total_score: Decimal = scores.iter().flatten().map(|s| s.clamped).sum();
        if total_score <= Decimal::ZERO {
            warn!("All insight scores clamped to zero; using equal weights");
            notes.push(Recommendation::general(
                "All insight scores are non-positive; falling back to equal weights",
            ));
            return self.equal_weight(universe.len());
        }

        // Symbols without insight keep their risk-parity share; the rest is split by score.
        let uninformed_share: Decimal = parity
            .iter()
            .zip(scores.iter())
            .filter(|(_, s)| s.is_none())
            .map(|(w, _)| *w)
            .sum();
        let informed_share = Decimal::ONE - uninformed_share;

        let weights = parity
            .iter()
            .zip(scores.iter())
            .map(|(&p, s)| match s {
                Some(score) => informed_share * score.clamped / total_score,
                None => p,
            })
            .collect();
        normalize(weights)
    }

    /// Risk budgeting with equal budgets, multiplicative fixed-point iteration
    fn equal_risk_contribution(&self, covariance: &[Vec<Decimal>]) -> Vec<Decimal> {
        let n = covariance.len();
        let mut weights: Vec<Decimal> = normalize(
            (0..n)
                .map(|i| {
                    let vol = math::sqrt(covariance[i][i]);
                    if vol > Decimal::ZERO {
                        Decimal::ONE / vol
                    } else {
                        Decimal::ONE
                    }
                })
                .collect(),
        );

        for _ in 0..self.max_iterations {
            let contributions = risk_contributions(covariance, &weights);
            let total: Decimal = contributions.iter().sum();
            if total <= Decimal::ZERO {
                break;
            }
            let target = total / Decimal::from(n as u64);

            let max_diff = contributions
                .iter()
                .map(|&rc| (rc - target).abs())
                .max()
                .unwrap_or(Decimal::ZERO);
            if max_diff < self.tolerance * dec!(100) {
                break;
            }

            for (w, &rc) in weights.iter_mut().zip(contributions.iter()) {
                if rc > Decimal::ZERO {
                    *w *= math::sqrt(target / rc);
                }
            }
            weights = normalize(weights);
        }

        weights
    }

    /// Position cap from the risk profile, relaxed to 1/n when it cannot be met
    fn position_cap(
        &self,
        portfolio: &Portfolio,
        n: usize,
        notes: &mut Vec<Recommendation>,
    ) -> Decimal {
        let cap = portfolio.risk_profile.max_position_size.min(Decimal::ONE);
        let floor = Decimal::ONE / Decimal::from(n as u64);
        if cap < floor {
            warn!(
                "max_position_size {} infeasible for {} symbols; relaxing to {}",
                cap, n, floor
            );
            notes.push(Recommendation::general(format!(
                "Position cap {} cannot fully invest {} symbols; relaxed to {:.4}",
                cap, n, floor
            )));
            floor
        } else {
            cap
        }
    }

    /// Annualized covariance matrix: rho_ij * vol_i * vol_j * periods
    fn covariance(&self, universe: &Universe) -> Vec<Vec<Decimal>> {
        let factor = Decimal::from(self.annualization_factor);
        universe
            .daily_covariance()
            .into_iter()
            .map(|row| row.into_iter().map(|c| c * factor).collect())
            .collect()
    }

    fn annualized_volatility(&self, universe: &Universe, weights: &[Decimal]) -> Decimal {
        let daily = portfolio_volatility(&universe.daily_covariance(), weights);
        daily * math::sqrt(Decimal::from(self.annualization_factor))
    }
}

/// Scale weights to sum to 1. A zero vector becomes equal weights.
pub fn normalize(weights: Vec<Decimal>) -> Vec<Decimal> {
    let n = weights.len();
    let sum: Decimal = weights.iter().sum();
    if sum > Decimal::ZERO {
        weights.into_iter().map(|w| w / sum).collect()
    } else if n > 0 {
        vec![Decimal::ONE / Decimal::from(n as u64); n]
    } else {
        weights
    }
}

/// Normalize to 1, check, then scale to the investable fraction
pub fn finalize(raw: Vec<Decimal>, investable: Decimal) -> Vec<Decimal> {
    let weights = normalize(raw.into_iter().map(|w| w.max(Decimal::ZERO)).collect());
    if !weights.is_empty() {
        let sum: Decimal = weights.iter().sum();
        assert!(
            (sum - Decimal::ONE).abs() <= NORMALIZATION_TOLERANCE,
            "optimizer weights sum to {} after normalization",
            sum
        );
    }
    weights.into_iter().map(|w| w * investable).collect()
}

/// sqrt(w' Σ w)
pub fn portfolio_volatility(covariance: &[Vec<Decimal>], weights: &[Decimal]) -> Decimal {
    let mut variance = Decimal::ZERO;
    for (i, &wi) in weights.iter().enumerate() {
        for (j, &wj) in weights.iter().enumerate() {
            variance += wi * wj * covariance[i][j];
        }
    }
    math::sqrt(variance)
}

/// RC_i = w_i * (Σw)_i / σ_p
pub fn risk_contributions(covariance: &[Vec<Decimal>], weights: &[Decimal]) -> Vec<Decimal> {
    let n = weights.len();
    let vol = portfolio_volatility(covariance, weights);
    if vol <= Decimal::ZERO {
        return vec![Decimal::ZERO; n];
    }
    (0..n)
        .map(|i| {
            let marginal: Decimal = (0..n).map(|j| covariance[i][j] * weights[j]).sum();
            weights[i] * marginal / vol
        })
        .collect()
}

/// Allocation targets of a result, for adoption by the portfolio
pub fn targets_of(allocation: &[AllocationWeight]) -> Vec<crate::types::AllocationTarget> {
    allocation
        .iter()
        .map(|w| crate::types::AllocationTarget {
            symbol: w.symbol.clone(),
            weight: w.weight,
        })
        .collect()
}

/// Flag where an allocation exceeds the owner's risk profile
fn review_against_profile(
    portfolio: &Portfolio,
    universe: &Universe,
    allocation: &[AllocationWeight],
    expected_risk: Decimal,
    notes: &mut Vec<Recommendation>,
) {
    let profile = &portfolio.risk_profile;

    if expected_risk > profile.target_volatility {
        notes.push(Recommendation::general(format!(
            "Expected annualized volatility {:.4} exceeds target {}",
            expected_risk, profile.target_volatility
        )));
    }

    for w in allocation {
        if w.weight > profile.max_position_size {
            notes.push(Recommendation::for_symbol(
                &w.symbol,
                format!(
                    "Weight {:.4} exceeds max position size {}",
                    w.weight, profile.max_position_size
                ),
            ));
        }
        let avg = universe.correlation.average_correlation(&w.symbol);
        if avg > profile.max_correlation {
            notes.push(Recommendation::for_symbol(
                &w.symbol,
                format!(
                    "Average correlation {:.4} exceeds max correlation {}",
                    avg, profile.max_correlation
                ),
            ));
        }
    }
}
