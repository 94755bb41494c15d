//! Core portfolio types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{EngineError, Result};

/// Relative gap under which a sell is treated as closing the whole position
const CLOSE_OUT_TOLERANCE: Decimal = dec!(0.000000001);

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// How soon a rebalancing trade should be worked
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTolerance {
    Conservative,
    Moderate,
    Aggressive,
}

/// Owner-defined risk limits. The engine reads these but never edits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub risk_tolerance: RiskTolerance,
    /// Maximum tolerated loss as a fraction of total value
    pub max_drawdown: Decimal,
    /// Maximum weight of a single position
    pub max_position_size: Decimal,
    /// Maximum tolerated position-weighted correlation
    pub max_correlation: Decimal,
    /// Drift beyond which a position needs rebalancing
    pub rebalance_threshold: Decimal,
    /// Annualized volatility target
    pub target_volatility: Decimal,
}

impl RiskProfile {
    pub fn for_tolerance(tolerance: RiskTolerance) -> Self {
        match tolerance {
            RiskTolerance::Conservative => Self {
                risk_tolerance: tolerance,
                max_drawdown: dec!(0.10),
                max_position_size: dec!(0.20),
                max_correlation: dec!(0.60),
                rebalance_threshold: dec!(0.03),
                target_volatility: dec!(0.10),
            },
            RiskTolerance::Moderate => Self {
                risk_tolerance: tolerance,
                max_drawdown: dec!(0.20),
                max_position_size: dec!(0.30),
                max_correlation: dec!(0.70),
                rebalance_threshold: dec!(0.05),
                target_volatility: dec!(0.15),
            },
            RiskTolerance::Aggressive => Self {
                risk_tolerance: tolerance,
                max_drawdown: dec!(0.35),
                max_position_size: dec!(0.50),
                max_correlation: dec!(0.85),
                rebalance_threshold: dec!(0.08),
                target_volatility: dec!(0.30),
            },
        }
    }
}

impl Default for RiskProfile {
    fn default() -> Self {
        Self::for_tolerance(RiskTolerance::Moderate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioConstraints {
    /// Fraction of total value that must stay uninvested
    pub min_cash_reserve: Decimal,
    pub max_leverage: Decimal,
    #[serde(default)]
    pub excluded_symbols: Vec<String>,
    /// Dollar floor below which a trade is not worth executing
    pub min_trade_size: Decimal,
    /// Maximum traded notional per rebalance, as a fraction of total value
    pub max_turnover: Decimal,
}

impl PortfolioConstraints {
    pub fn is_excluded(&self, symbol: &str) -> bool {
        self.excluded_symbols.iter().any(|s| s.eq_ignore_ascii_case(symbol))
    }

    /// Weight available for positions once the cash reserve is set aside
    pub fn investable_fraction(&self) -> Decimal {
        (Decimal::ONE - self.min_cash_reserve).max(Decimal::ZERO)
    }
}

impl Default for PortfolioConstraints {
    fn default() -> Self {
        Self {
            min_cash_reserve: dec!(0.05),
            max_leverage: Decimal::ONE,
            excluded_symbols: Vec::new(),
            min_trade_size: dec!(100),
            max_turnover: Decimal::ONE,
        }
    }
}

/// Target weight for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationTarget {
    pub symbol: String,
    pub weight: Decimal,
}

/// A symbol's weight in an allocation (current or optimized)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationWeight {
    pub symbol: String,
    pub weight: Decimal,
}

impl AllocationWeight {
    pub fn new(symbol: impl Into<String>, weight: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            weight,
        }
    }
}

/// Lookup a symbol's weight, zero when absent
pub fn weight_of(allocation: &[AllocationWeight], symbol: &str) -> Decimal {
    allocation
        .iter()
        .find(|w| w.symbol == symbol)
        .map(|w| w.weight)
        .unwrap_or(Decimal::ZERO)
}

/// Sum of squared weights
pub fn herfindahl(weights: impl IntoIterator<Item = Decimal>) -> Decimal {
    weights.into_iter().map(|w| w * w).sum()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Units held
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub current_price: Decimal,
    #[serde(default)]
    pub market_value: Decimal,
    #[serde(default)]
    pub weight: Decimal,
    #[serde(default)]
    pub target_weight: Decimal,
    /// target_weight - weight
    #[serde(default)]
    pub drift: Decimal,
}

impl Position {
    pub fn new(symbol: impl Into<String>, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            average_price: price,
            current_price: price,
            market_value: quantity * price,
            weight: Decimal::ZERO,
            target_weight: Decimal::ZERO,
            drift: Decimal::ZERO,
        }
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.current_price - self.average_price) * self.quantity
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    pub initial_value: Decimal,
    pub peak_value: Decimal,
    pub total_return: Decimal,
    /// Decline from peak value, as a fraction of the peak
    pub current_drawdown: Decimal,
    pub max_drawdown_observed: Decimal,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Planned trade. Never mutated after planning; execution yields an `ExecutedTrade`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancingTrade {
    pub symbol: String,
    pub side: Side,
    /// Dollar notional
    pub quantity: Decimal,
    pub estimated_price: Decimal,
    pub urgency: Urgency,
    pub reasoning: String,
}

impl RebalancingTrade {
    /// Units implied by the notional at the estimated price
    pub fn units(&self) -> Decimal {
        if self.estimated_price > Decimal::ZERO {
            self.quantity / self.estimated_price
        } else {
            Decimal::ZERO
        }
    }
}

/// Fill produced by a trade executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedTrade {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    /// Dollar notional actually traded
    pub notional: Decimal,
    pub units: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub executed_at: DateTime<Utc>,
}

/// Portfolio aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: String,
    #[serde(default)]
    pub total_value: Decimal,
    pub cash: Decimal,
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub target_allocation: Vec<AllocationTarget>,
    #[serde(default)]
    pub risk_profile: RiskProfile,
    #[serde(default)]
    pub constraints: PortfolioConstraints,
    #[serde(default)]
    pub metrics: PortfolioMetrics,
    #[serde(default)]
    pub last_rebalanced: Option<DateTime<Utc>>,
}

impl Portfolio {
    pub fn new(
        id: impl Into<String>,
        cash: Decimal,
        risk_profile: RiskProfile,
        constraints: PortfolioConstraints,
    ) -> Self {
        let mut portfolio = Self {
            id: id.into(),
            total_value: cash,
            cash,
            positions: Vec::new(),
            target_allocation: Vec::new(),
            risk_profile,
            constraints,
            metrics: PortfolioMetrics {
                initial_value: cash,
                peak_value: cash,
                ..Default::default()
            },
            last_rebalanced: None,
        };
        portfolio.recalculate();
        portfolio
    }

    /// Add a position directly (seeding an existing book)
    pub fn with_position(mut self, symbol: &str, quantity: Decimal, price: Decimal) -> Self {
        if quantity != Decimal::ZERO {
            self.positions.push(Position::new(symbol, quantity, price));
            self.recalculate();
            self.metrics.initial_value = self.total_value;
            self.metrics.peak_value = self.total_value;
        }
        self
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }

    pub fn target_weight(&self, symbol: &str) -> Decimal {
        self.target_allocation
            .iter()
            .find(|t| t.symbol == symbol)
            .map(|t| t.weight)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn invested_weight(&self) -> Decimal {
        self.positions.iter().map(|p| p.weight).sum()
    }

    /// Recompute market values, total value, weights, drift and metrics
    pub fn recalculate(&mut self) {
        for pos in &mut self.positions {
            pos.market_value = pos.quantity * pos.current_price;
        }
        let invested: Decimal = self.positions.iter().map(|p| p.market_value).sum();
        self.total_value = self.cash + invested;

        let total = self.total_value;
        let targets: HashMap<&str, Decimal> = self
            .target_allocation
            .iter()
            .map(|t| (t.symbol.as_str(), t.weight))
            .collect();
        for pos in &mut self.positions {
            pos.weight = if total > Decimal::ZERO {
                pos.market_value / total
            } else {
                Decimal::ZERO
            };
            pos.target_weight = targets.get(pos.symbol.as_str()).copied().unwrap_or(Decimal::ZERO);
            pos.drift = pos.target_weight - pos.weight;
        }

        self.update_metrics();
    }

    fn update_metrics(&mut self) {
        let m = &mut self.metrics;
        if self.total_value > m.peak_value {
            m.peak_value = self.total_value;
        }
        m.total_return = if m.initial_value > Decimal::ZERO {
            (self.total_value - m.initial_value) / m.initial_value
        } else {
            Decimal::ZERO
        };
        m.current_drawdown = if m.peak_value > Decimal::ZERO {
            ((m.peak_value - self.total_value) / m.peak_value).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };
        m.max_drawdown_observed = m.max_drawdown_observed.max(m.current_drawdown);
        m.updated_at = Some(Utc::now());
    }

    /// Explicit valuation refresh from a price map; unknown symbols keep their last price
    pub fn mark_prices(&mut self, prices: &HashMap<String, Decimal>) {
        for pos in &mut self.positions {
            if let Some(&price) = prices.get(&pos.symbol) {
                if price > Decimal::ZERO {
                    pos.current_price = price;
                }
            }
        }
        self.recalculate();
    }

    /// Record a fill. Buys that exceed available cash and sells of units not held are rejected
    /// and leave the portfolio untouched.
    pub fn apply_fill(&mut self, fill: &ExecutedTrade) -> Result<()> {
        if fill.units <= Decimal::ZERO || fill.price <= Decimal::ZERO {
            return Err(EngineError::execution(
                &fill.symbol,
                format!("invalid fill: {} units @ {}", fill.units, fill.price),
            ));
        }

        match fill.side {
            Side::Buy => {
                let cost = fill.notional + fill.fee;
                if cost > self.cash {
                    return Err(EngineError::execution(
                        &fill.symbol,
                        format!("insufficient cash: need {:.2}, have {:.2}", cost, self.cash),
                    ));
                }
                self.cash -= cost;
                match self.positions.iter_mut().find(|p| p.symbol == fill.symbol) {
                    Some(pos) => {
                        let new_qty = pos.quantity + fill.units;
                        pos.average_price =
                            (pos.average_price * pos.quantity + fill.price * fill.units) / new_qty;
                        pos.quantity = new_qty;
                        pos.current_price = fill.price;
                    }
                    None => {
                        self.positions
                            .push(Position::new(&fill.symbol, fill.units, fill.price));
                    }
                }
            }
            Side::Sell => {
                let idx = self
                    .positions
                    .iter()
                    .position(|p| p.symbol == fill.symbol)
                    .ok_or_else(|| {
                        EngineError::execution(&fill.symbol, "no position to sell")
                    })?;
                let held = self.positions[idx].quantity;
                // A sell within rounding of the full position closes it
                let units = if (held - fill.units).abs() <= held * CLOSE_OUT_TOLERANCE {
                    held
                } else {
                    fill.units
                };
                if units > held {
                    return Err(EngineError::execution(
                        &fill.symbol,
                        format!("cannot sell {} units, only {} held", fill.units, held),
                    ));
                }
                self.cash += fill.notional - fill.fee;
                let pos = &mut self.positions[idx];
                pos.quantity -= units;
                pos.current_price = fill.price;
                if pos.quantity == Decimal::ZERO {
                    self.positions.remove(idx);
                }
            }
        }

        self.recalculate();
        Ok(())
    }

    /// Current weights for `symbols`, in the given order (zero for symbols not held)
    pub fn current_allocation(&self, symbols: &[String]) -> Vec<AllocationWeight> {
        symbols
            .iter()
            .map(|s| {
                AllocationWeight::new(
                    s.clone(),
                    self.position(s).map(|p| p.weight).unwrap_or(Decimal::ZERO),
                )
            })
            .collect()
    }

    /// Check `total_value == cash + sum(market_value)`
    pub fn check_invariants(&self) -> Result<()> {
        let invested: Decimal = self.positions.iter().map(|p| p.market_value).sum();
        if self.total_value != self.cash + invested {
            return Err(EngineError::Internal(format!(
                "portfolio {} total value {} != cash {} + positions {}",
                self.id, self.total_value, self.cash, invested
            )));
        }
        if self.positions.iter().any(|p| p.quantity == Decimal::ZERO) {
            return Err(EngineError::Internal(format!(
                "portfolio {} holds a zero-quantity position",
                self.id
            )));
        }
        Ok(())
    }

    /// Whether positions exceed the weight allowed by the cash reserve
    pub fn breaches_cash_reserve(&self) -> bool {
        self.invested_weight() > self.constraints.investable_fraction()
    }
}
