//! Deterministic in-memory feeds
//!
//! Used by tests and by the CLI, which loads everything from a JSON fixture file.

use super::{parse_insight, InsightData, InsightProvider, MarketData, MarketDataProvider};
use crate::error::{EngineError, Result};
use crate::types::Portfolio;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Market data served from memory
#[derive(Debug, Clone, Default)]
pub struct StaticMarketData {
    data: HashMap<String, MarketData>,
}

impl StaticMarketData {
    pub fn new(items: impl IntoIterator<Item = MarketData>) -> Self {
        Self {
            data: items.into_iter().map(|m| (m.symbol.clone(), m)).collect(),
        }
    }

    pub fn insert(&mut self, data: MarketData) {
        self.data.insert(data.symbol.clone(), data);
    }

    /// Symbols with data, sorted
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

#[async_trait]
impl MarketDataProvider for StaticMarketData {
    async fn get_history(&self, symbol: &str) -> Result<MarketData> {
        self.data
            .get(symbol)
            .cloned()
            .ok_or_else(|| EngineError::data_unavailable(symbol, "no market data"))
    }
}

/// Insights served from memory
#[derive(Debug, Clone, Default)]
pub struct StaticInsights {
    insights: HashMap<String, InsightData>,
}

impl StaticInsights {
    pub fn new(items: impl IntoIterator<Item = (String, InsightData)>) -> Self {
        Self {
            insights: items.into_iter().collect(),
        }
    }

    /// Build from raw provider payloads. Payloads failing validation are dropped.
    pub fn from_raw<'a>(payloads: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut insights = HashMap::new();
        for (symbol, raw) in payloads {
            match parse_insight(raw) {
                Ok(insight) => {
                    insights.insert(symbol.to_string(), insight);
                }
                Err(e) => warn!("Rejected insight for {}: {}", symbol, e),
            }
        }
        Self { insights }
    }

    pub fn insert(&mut self, symbol: impl Into<String>, insight: InsightData) {
        self.insights.insert(symbol.into(), insight);
    }
}

#[async_trait]
impl InsightProvider for StaticInsights {
    async fn get_insight(&self, symbol: &str) -> Result<Option<InsightData>> {
        Ok(self.insights.get(symbol).cloned())
    }
}

#[derive(Debug, Deserialize)]
struct RawFixture {
    portfolio: Portfolio,
    #[serde(default)]
    market: Vec<MarketData>,
    #[serde(default)]
    insights: HashMap<String, serde_json::Value>,
}

/// A portfolio plus the data needed to run the engine against it
pub struct Fixture {
    pub portfolio: Portfolio,
    pub market: StaticMarketData,
    pub insights: StaticInsights,
}

impl Fixture {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::Internal(format!("reading {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let raw: RawFixture = serde_json::from_str(content)?;

        let payloads: Vec<(String, String)> = raw
            .insights
            .into_iter()
            .map(|(symbol, value)| {
                let payload = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (symbol, payload)
            })
            .collect();

        let mut portfolio = raw.portfolio;
        portfolio.recalculate();
        if portfolio.metrics.initial_value == rust_decimal::Decimal::ZERO {
            portfolio.metrics.initial_value = portfolio.total_value;
            portfolio.metrics.peak_value = portfolio.total_value;
        }

        Ok(Self {
            portfolio,
            market: StaticMarketData::new(raw.market),
            insights: StaticInsights::from_raw(
                payloads.iter().map(|(s, p)| (s.as_str(), p.as_str())),
            ),
        })
    }
}
