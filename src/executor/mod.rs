//! Trade execution
//!
//! The engine hands planned trades to a `TradeExecutor` and records whatever comes back.
//! Real venues live outside the crate; `PaperExecutor` fills deterministically.


use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::types::{ExecutedTrade, RebalancingTrade, Side};

/// Executes one rebalancing trade
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute(&self, trade: &RebalancingTrade) -> Result<ExecutedTrade>;
}

/// Fills every trade at its estimated price, charging `fee_rate` on notional
#[derive(Debug, Clone, Default)]
pub struct PaperExecutor {
    fee_rate: Decimal,
}

impl PaperExecutor {
    pub fn new(fee_rate: Decimal) -> Self {
        Self {
            fee_rate: fee_rate.max(Decimal::ZERO),
        }
    }
}

#[async_trait]
impl TradeExecutor for PaperExecutor {
    async fn execute(&self, trade: &RebalancingTrade) -> Result<ExecutedTrade> {
        if trade.estimated_price <= Decimal::ZERO {
            return Err(EngineError::execution(
                &trade.symbol,
                format!("no usable price ({})", trade.estimated_price),
            ));
        }
        if trade.quantity <= Decimal::ZERO {
            return Err(EngineError::execution(&trade.symbol, "empty trade"));
        }

        let units = trade.units();
        let fee = (trade.quantity * self.fee_rate).round_dp(8);
        info!(
            "[PAPER] {} {:.8} {} @ {:.4} (notional {:.2}, fee {:.2})",
            trade.side, units, trade.symbol, trade.estimated_price, trade.quantity, fee
        );

        Ok(ExecutedTrade {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: trade.symbol.clone(),
            side: trade.side,
            notional: trade.quantity,
            units,
            price: trade.estimated_price,
            fee,
            executed_at: Utc::now(),
        })
    }
}

/// Outcome of running a trade list. Execution is never all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebalanceReport {
    pub executed: Vec<ExecutedTrade>,
    pub failed: Vec<FailedTrade>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTrade {
    pub trade: RebalancingTrade,
    pub reason: String,
}

impl RebalanceReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn record_failure(&mut self, trade: &RebalancingTrade, err: &EngineError) {
        warn!("Trade {} {} failed: {}", trade.side, trade.symbol, err);
        self.failed.push(FailedTrade {
            trade: trade.clone(),
            reason: err.to_string(),
        });
    }

    /// Total notional of executed buys minus sells
    pub fn net_notional(&self) -> Decimal {
        self.executed
            .iter()
            .map(|t| match t.side {
                Side::Buy => t.notional,
                Side::Sell => -t.notional,
            })
            .sum()
    }
}
