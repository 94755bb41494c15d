//! # Correlation Engine
//!
//! Builds a symmetric Pearson correlation matrix from per-symbol return series.
//! Symbols with too little history are excluded rather than given a made-up correlation.
//! The matrix is rebuilt for every optimization call and never cached.

#[cfg(test)]
mod tests;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::config::CorrelationConfig;
use crate::math;

/// Symmetric correlation matrix, indexed in `symbols` order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub symbols: Vec<String>,
    pub values: Vec<Vec<Decimal>>,
}

impl CorrelationMatrix {
    /// Identity matrix: every pair uncorrelated
    pub fn identity(symbols: Vec<String>) -> Self {
        let n = symbols.len();
        let values = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| if i == j { Decimal::ONE } else { Decimal::ZERO })
                    .collect()
            })
            .collect();
        Self { symbols, values }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn index_of(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }

    /// Correlation between two symbols. Unknown symbols correlate 0 (1 with themselves).
    pub fn get(&self, a: &str, b: &str) -> Decimal {
        if a == b {
            return Decimal::ONE;
        }
        match (self.index_of(a), self.index_of(b)) {
            (Some(i), Some(j)) => self.values[i][j],
            _ => Decimal::ZERO,
        }
    }

    /// Mean correlation of `symbol` against every other symbol in the matrix
    pub fn average_correlation(&self, symbol: &str) -> Decimal {
        let Some(i) = self.index_of(symbol) else {
            return Decimal::ZERO;
        };
        let others = self.len().saturating_sub(1);
        if others == 0 {
            return Decimal::ZERO;
        }
        let sum: Decimal = self.values[i]
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, &c)| c)
            .sum();
        sum / Decimal::from(others as u64)
    }

    /// Restrict to `keep`, preserving the order given
    pub fn subset(&self, keep: &[String]) -> Self {
        let idx: Vec<Option<usize>> = keep.iter().map(|s| self.index_of(s)).collect();
        let values = idx
            .iter()
            .enumerate()
            .map(|(a, ia)| {
                idx.iter()
                    .enumerate()
                    .map(|(b, ib)| match (ia, ib) {
                        _ if a == b => Decimal::ONE,
                        (Some(i), Some(j)) => self.values[*i][*j],
                        _ => Decimal::ZERO,
                    })
                    .collect()
            })
            .collect();
        Self {
            symbols: keep.to_vec(),
            values,
        }
    }
}

/// Matrix plus the symbols left out for lack of history
#[derive(Debug, Clone)]
pub struct CorrelationOutput {
    pub matrix: CorrelationMatrix,
    /// (symbol, reason)
    pub excluded: Vec<(String, String)>,
}

/// Pearson correlation over a trailing window of returns
#[derive(Debug, Clone)]
pub struct CorrelationEngine {
    min_observations: usize,
    lookback: usize,
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::from_config(&CorrelationConfig::default())
    }
}

impl CorrelationEngine {
    pub fn new(min_observations: usize, lookback: usize) -> Self {
        Self {
            min_observations: min_observations.max(2),
            lookback: lookback.max(min_observations.max(2)),
        }
    }

    pub fn from_config(config: &CorrelationConfig) -> Self {
        Self::new(config.min_observations, config.lookback)
    }

    pub fn min_observations(&self) -> usize {
        self.min_observations
    }

    /// Build the matrix for `series` (symbol, returns oldest first).
    ///
    /// Accepted series are aligned on their most recent common observations, capped at the
    /// lookback window.
    pub fn build(&self, series: &[(String, Vec<Decimal>)]) -> CorrelationOutput {
        let mut excluded = Vec::new();
        let mut accepted: Vec<(&String, &Vec<Decimal>)> = Vec::new();

        for (symbol, returns) in series {
            if returns.len() < self.min_observations {
                debug!(
                    "Excluding {} from correlation: {} observations < {}",
                    symbol,
                    returns.len(),
                    self.min_observations
                );
                excluded.push((
                    symbol.clone(),
                    format!(
                        "insufficient history: {} observations, need {}",
                        returns.len(),
                        self.min_observations
                    ),
                ));
            } else {
                accepted.push((symbol, returns));
            }
        }

        let window = accepted
            .iter()
            .map(|(_, r)| r.len())
            .min()
            .unwrap_or(0)
            .min(self.lookback);

        let aligned: Vec<&[Decimal]> = accepted
            .iter()
            .map(|(_, r)| &r[r.len() - window..])
            .collect();

        let n = accepted.len();
        let mut values = vec![vec![Decimal::ZERO; n]; n];
        for i in 0..n {
            values[i][i] = Decimal::ONE;
            for j in (i + 1)..n {
                let rho = pearson(aligned[i], aligned[j]);
                values[i][j] = rho;
                values[j][i] = rho;
            }
        }

        CorrelationOutput {
            matrix: CorrelationMatrix {
                symbols: accepted.iter().map(|(s, _)| (*s).clone()).collect(),
                values,
            },
            excluded,
        }
    }

    /// Same as `build` but keyed by symbol
    pub fn build_from_map(&self, series: &HashMap<String, Vec<Decimal>>) -> CorrelationOutput {
        let mut ordered: Vec<(String, Vec<Decimal>)> =
            series.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        ordered.sort_by(|a, b| a.0.cmp(&b.0));
        self.build(&ordered)
    }
}

/// Pearson correlation of two equal-length series, clamped to [-1, 1].
/// Zero when either series has no variance.
pub fn pearson(x: &[Decimal], y: &[Decimal]) -> Decimal {
    let n = x.len().min(y.len());
    if n < 2 {
        return Decimal::ZERO;
    }
    let n_dec = Decimal::from(n as u64);
    let mean_x: Decimal = x[..n].iter().sum::<Decimal>() / n_dec;
    let mean_y: Decimal = y[..n].iter().sum::<Decimal>() / n_dec;

    let mut cov = Decimal::ZERO;
    let mut var_x = Decimal::ZERO;
    let mut var_y = Decimal::ZERO;
    for k in 0..n {
        let dx = x[k] - mean_x;
        let dy = y[k] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x <= Decimal::ZERO || var_y <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let denom = math::sqrt(var_x * var_y);
    if denom <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (cov / denom).max(-Decimal::ONE).min(Decimal::ONE)
}
