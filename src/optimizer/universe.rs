//! Screening of the requested symbols into an optimization universe

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::correlation::{CorrelationEngine, CorrelationMatrix};
use crate::data::{InsightData, MarketData};
use crate::error::Result;
use crate::types::PortfolioConstraints;

/// Per-asset inputs to the optimizer
#[derive(Debug, Clone, PartialEq)]
pub struct AssetStats {
    pub symbol: String,
    pub price: Decimal,
    /// Daily volatility
    pub volatility: Decimal,
    /// Insight-implied return when an insight exists, annualized historical mean otherwise
    pub expected_return: Decimal,
    pub volume: Decimal,
    pub insight: Option<InsightData>,
}

impl AssetStats {
    pub fn from_market(
        market: &MarketData,
        insight: Option<InsightData>,
        annualization_factor: u32,
    ) -> Self {
        let expected_return = match &insight {
            Some(i) => i.implied_return(market.price),
            None if market.historical_returns.is_empty() => Decimal::ZERO,
            None => {
                let mean = market.historical_returns.iter().sum::<Decimal>()
                    / Decimal::from(market.historical_returns.len() as u64);
                mean * Decimal::from(annualization_factor)
            }
        };
        Self {
            symbol: market.symbol.clone(),
            price: market.price,
            volatility: market.volatility,
            expected_return,
            volume: market.volume,
            insight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionKind {
    /// Listed in the portfolio's excluded symbols
    Constraint,
    /// Missing, invalid or too-short market data
    Data,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedSymbol {
    pub symbol: String,
    pub kind: ExclusionKind,
    pub reason: String,
}

/// Collaborator output for one requested symbol
#[derive(Debug)]
pub struct SymbolData {
    pub symbol: String,
    pub market: Result<MarketData>,
    pub insight: Option<InsightData>,
}

/// Eligible assets plus their correlation matrix, in request order
#[derive(Debug, Clone)]
pub struct Universe {
    pub assets: Vec<AssetStats>,
    pub correlation: CorrelationMatrix,
    pub excluded: Vec<ExcludedSymbol>,
}

impl Universe {
    /// Universe with a given correlation matrix and no screening
    pub fn from_parts(assets: Vec<AssetStats>, correlation: CorrelationMatrix) -> Self {
        let symbols: Vec<String> = assets.iter().map(|a| a.symbol.clone()).collect();
        Self {
            assets,
            correlation: correlation.subset(&symbols),
            excluded: Vec::new(),
        }
    }

    /// Screen `requested` symbols. Symbols excluded by constraints, with failed or invalid
    /// market data, or with too little history are dropped and recorded with a reason.
    pub fn build(
        requested: &[String],
        constraints: &PortfolioConstraints,
        fetched: Vec<SymbolData>,
        correlation_engine: &CorrelationEngine,
        annualization_factor: u32,
    ) -> Self {
        let mut by_symbol: HashMap<String, SymbolData> =
            fetched.into_iter().map(|d| (d.symbol.clone(), d)).collect();

        let mut seen = HashSet::new();
        let mut excluded = Vec::new();
        let mut candidates: Vec<(MarketData, Option<InsightData>)> = Vec::new();

        for symbol in requested {
            if !seen.insert(symbol.clone()) {
                continue;
            }
            if constraints.is_excluded(symbol) {
                excluded.push(ExcludedSymbol {
                    symbol: symbol.clone(),
                    kind: ExclusionKind::Constraint,
                    reason: "excluded by portfolio constraints".to_string(),
                });
                continue;
            }
            let Some(data) = by_symbol.remove(symbol) else {
                excluded.push(data_exclusion(symbol, "no market data returned".to_string()));
                continue;
            };
            match data.market {
                Err(e) => excluded.push(data_exclusion(symbol, e.to_string())),
                Ok(m) if m.price <= Decimal::ZERO => excluded.push(data_exclusion(
                    symbol,
                    format!("non-positive price {}", m.price),
                )),
                Ok(m) if m.volatility <= Decimal::ZERO => excluded.push(data_exclusion(
                    symbol,
                    format!("non-positive volatility {}", m.volatility),
                )),
                Ok(m) => candidates.push((m, data.insight)),
            }
        }

        let series: Vec<(String, Vec<Decimal>)> = candidates
            .iter()
            .map(|(m, _)| (m.symbol.clone(), m.historical_returns.clone()))
            .collect();
        let output = correlation_engine.build(&series);
        for (symbol, reason) in output.excluded {
            excluded.push(data_exclusion(&symbol, reason));
        }

        let eligible: HashSet<&String> = output.matrix.symbols.iter().collect();
        let assets: Vec<AssetStats> = candidates
            .iter()
            .filter(|(m, _)| eligible.contains(&m.symbol))
            .map(|(m, i)| AssetStats::from_market(m, i.clone(), annualization_factor))
            .collect();

        for e in &excluded {
            warn!("Excluding {} from optimization: {}", e.symbol, e.reason);
        }

        Self {
            assets,
            correlation: output.matrix,
            excluded,
        }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.assets.iter().map(|a| a.symbol.clone()).collect()
    }

    pub fn get(&self, symbol: &str) -> Option<&AssetStats> {
        self.assets.iter().find(|a| a.symbol == symbol)
    }

    /// Excluded for data reasons (not by constraints)
    pub fn data_excluded(&self) -> impl Iterator<Item = &ExcludedSymbol> {
        self.excluded.iter().filter(|e| e.kind == ExclusionKind::Data)
    }

    /// Daily covariance: rho_ij * vol_i * vol_j
    pub fn daily_covariance(&self) -> Vec<Vec<Decimal>> {
        self.assets
            .iter()
            .map(|a| {
                self.assets
                    .iter()
                    .map(|b| {
                        self.correlation.get(&a.symbol, &b.symbol) * a.volatility * b.volatility
                    })
                    .collect()
            })
            .collect()
    }
}

fn data_exclusion(symbol: &str, reason: String) -> ExcludedSymbol {
    ExcludedSymbol {
        symbol: symbol.to_string(),
        kind: ExclusionKind::Data,
        reason,
    }
}
