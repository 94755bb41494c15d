//! Collaborator contracts consumed by the engine
//!
//! Market data and insights arrive through injected providers. Every call is made per
//! symbol so that a failure or timeout only removes that symbol from the universe.

mod fixture;
#[cfg(test)]
mod tests;

pub use fixture::{Fixture, StaticInsights, StaticMarketData};

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Price history snapshot for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub symbol: String,
    pub price: Decimal,
    /// Per-period (daily) volatility of returns
    pub volatility: Decimal,
    /// Per-period returns, oldest first
    pub historical_returns: Vec<Decimal>,
    pub volume: Decimal,
}

/// Numeric output of an external insight generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InsightData {
    /// -1 (bearish) to 1 (bullish)
    pub sentiment: Decimal,
    /// 0 to 1
    pub confidence: Decimal,
    pub price_target: Decimal,
    pub timeframe: String,
}

impl InsightData {
    /// Implied return of the price target against `price`
    pub fn implied_return(&self, price: Decimal) -> Decimal {
        if price > Decimal::ZERO {
            self.price_target / price - Decimal::ONE
        } else {
            Decimal::ZERO
        }
    }

    pub fn validate(&self) -> std::result::Result<(), InsightParseError> {
        if self.sentiment < -Decimal::ONE || self.sentiment > Decimal::ONE {
            return Err(InsightParseError::OutOfRange {
                field: "sentiment",
                value: self.sentiment.to_string(),
            });
        }
        if self.confidence < Decimal::ZERO || self.confidence > Decimal::ONE {
            return Err(InsightParseError::OutOfRange {
                field: "confidence",
                value: self.confidence.to_string(),
            });
        }
        if self.price_target <= Decimal::ZERO {
            return Err(InsightParseError::OutOfRange {
                field: "price_target",
                value: self.price_target.to_string(),
            });
        }
        if self.timeframe.trim().is_empty() {
            return Err(InsightParseError::OutOfRange {
                field: "timeframe",
                value: self.timeframe.clone(),
            });
        }
        Ok(())
    }
}

/// Rejection of an insight payload at the boundary
#[derive(Error, Debug)]
pub enum InsightParseError {
    #[error("malformed insight payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: String },
}

/// Parse and validate a raw insight payload (e.g. JSON produced by a language model).
///
/// The payload may be wrapped in a markdown code fence; anything else outside the
/// JSON object is rejected.
pub fn parse_insight(raw: &str) -> std::result::Result<InsightData, InsightParseError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let insight: InsightData = serde_json::from_str(body)?;
    insight.validate()?;
    Ok(insight)
}

/// Market data collaborator. Fails per symbol with `DataUnavailable`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_history(&self, symbol: &str) -> Result<MarketData>;
}

/// Insight collaborator. `Ok(None)` means no insight exists for the symbol.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InsightProvider: Send + Sync {
    async fn get_insight(&self, symbol: &str) -> Result<Option<InsightData>>;
}

/// Provider that never has insights
pub struct NoInsights;

#[async_trait]
impl InsightProvider for NoInsights {
    async fn get_insight(&self, _symbol: &str) -> Result<Option<InsightData>> {
        Ok(None)
    }
}

/// Await a collaborator call, mapping a timeout to `DataUnavailable` for `symbol`
pub async fn with_timeout<T, F>(symbol: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::data_unavailable(
            symbol,
            format!("timed out after {}ms", timeout.as_millis()),
        )),
    }
}
