//! # Rebalancing Planner
//!
//! Diffs current against optimized weights and emits the trades that close the gap.
//! A trade is planned only when its drift exceeds the drift threshold and its dollar
//! notional exceeds the portfolio's minimum trade size. Trades come back largest drift
//! first, so a partially executed plan fixes the worst misallocations first.


use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::RebalanceConfig;
use crate::types::{weight_of, AllocationWeight, Portfolio, RebalancingTrade, Side, Urgency};

#[derive(Debug, Clone)]
pub struct RebalancePlanner {
    /// Strictly exceeded before a trade is planned
    drift_threshold: Decimal,
    /// At or above this drift a trade is high urgency
    high_urgency_threshold: Decimal,
}

impl Default for RebalancePlanner {
    fn default() -> Self {
        Self::from_config(&RebalanceConfig::default())
    }
}

impl RebalancePlanner {
    pub fn from_config(config: &RebalanceConfig) -> Self {
        Self {
            drift_threshold: config.drift_threshold,
            high_urgency_threshold: config.high_urgency_threshold,
        }
    }

    /// Plan trades moving `current` to `optimized`.
    ///
    /// Prices come from `prices`, falling back to the position's last price. Symbols with no
    /// known price are skipped.
    pub fn plan(
        &self,
        current: &[AllocationWeight],
        optimized: &[AllocationWeight],
        portfolio: &Portfolio,
        prices: &HashMap<String, Decimal>,
    ) -> Vec<RebalancingTrade> {
        let total_value = portfolio.total_value;
        let min_trade = portfolio.constraints.min_trade_size;

        let mut symbols: Vec<&str> = optimized.iter().map(|w| w.symbol.as_str()).collect();
        for w in current {
            if !symbols.contains(&w.symbol.as_str()) {
                symbols.push(&w.symbol);
            }
        }

        let mut candidates: Vec<(Decimal, RebalancingTrade)> = Vec::new();
        for symbol in symbols {
            let current_weight = weight_of(current, symbol);
            let target_weight = weight_of(optimized, symbol);
            let drift = target_weight - current_weight;
            let magnitude = drift.abs();
            let notional = magnitude * total_value;

            if magnitude <= self.drift_threshold || notional <= min_trade {
                continue;
            }

            let price = prices
                .get(symbol)
                .copied()
                .filter(|p| *p > Decimal::ZERO)
                .or_else(|| portfolio.position(symbol).map(|p| p.current_price));
            let Some(price) = price else {
                warn!("No price for {}; skipping rebalancing trade", symbol);
                continue;
            };

            let side = if drift > Decimal::ZERO { Side::Buy } else { Side::Sell };
            let urgency = if magnitude >= self.high_urgency_threshold {
                Urgency::High
            } else {
                Urgency::Medium
            };

            candidates.push((
                magnitude,
                RebalancingTrade {
                    symbol: symbol.to_string(),
                    side,
                    quantity: notional,
                    estimated_price: price,
                    urgency,
                    reasoning: format!(
                        "{} from {:.2}% to {:.2}% of portfolio (drift {:+.2}%)",
                        if side == Side::Buy { "Increase" } else { "Reduce" },
                        current_weight * dec!(100),
                        target_weight * dec!(100),
                        drift * dec!(100)
                    ),
                },
            ));
        }

        candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.symbol.cmp(&b.1.symbol)));
        let trades: Vec<RebalancingTrade> = candidates.into_iter().map(|(_, t)| t).collect();

        let trades = apply_turnover_budget(
            trades,
            portfolio.constraints.max_turnover * total_value,
            min_trade,
        );
        debug!("Planned {} rebalancing trades for {}", trades.len(), portfolio.id);
        trades
    }
}

/// Keep trades largest-first until `budget` notional is used. The trade crossing the budget
/// is shrunk to the remainder when that still clears `min_trade`.
fn apply_turnover_budget(
    trades: Vec<RebalancingTrade>,
    budget: Decimal,
    min_trade: Decimal,
) -> Vec<RebalancingTrade> {
    let mut used = Decimal::ZERO;
    let mut kept = Vec::with_capacity(trades.len());

    for mut trade in trades {
        let remaining = budget - used;
        if trade.quantity <= remaining {
            used += trade.quantity;
            kept.push(trade);
        } else if remaining > min_trade {
            debug!(
                "Turnover budget shrinks {} trade from {:.2} to {:.2}",
                trade.symbol, trade.quantity, remaining
            );
            trade.reasoning = format!(
                "{}; reduced from ${:.2} by turnover limit",
                trade.reasoning, trade.quantity
            );
            trade.quantity = remaining;
            used = budget;
            kept.push(trade);
        } else {
            debug!("Turnover budget exhausted; dropping {} trade", trade.symbol);
        }
    }
    kept
}
