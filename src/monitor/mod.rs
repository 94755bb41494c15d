//! Monitoring and alerting
//!
//! Evaluation is triggered by the caller; nothing here schedules itself. Alerts are plain
//! data and the caller decides what to notify or execute.


use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::config::MonitorConfig;
use crate::risk::RiskAnalysis;
use crate::types::{herfindahl, Portfolio};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A position drifted past the rebalance threshold
    Drift,
    /// VaR exceeds the tolerated drawdown
    Risk,
    /// Herfindahl index above the ceiling, or a position above the size limit
    Concentration,
    /// Drawdown from peak above the tolerated drawdown
    Performance,
    /// Position-weighted correlation above the limit
    Correlation,
    /// Invested weight eats into the cash reserve
    CashReserve,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertKind::Drift => "drift",
            AlertKind::Risk => "risk",
            AlertKind::Concentration => "concentration",
            AlertKind::Performance => "performance",
            AlertKind::Correlation => "correlation",
            AlertKind::CashReserve => "cash_reserve",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub symbol: Option<String>,
    pub message: String,
    /// Observed value
    pub value: Decimal,
    /// Limit that was crossed
    pub threshold: Decimal,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    fn new(
        kind: AlertKind,
        severity: Severity,
        symbol: Option<&str>,
        value: Decimal,
        threshold: Decimal,
        message: String,
    ) -> Self {
        Self {
            kind,
            severity,
            symbol: symbol.map(str::to_string),
            message,
            value,
            threshold,
            raised_at: Utc::now(),
        }
    }
}

/// Checks a portfolio against its risk profile and constraints
#[derive(Debug, Clone)]
pub struct PortfolioMonitor {
    concentration_ceiling: Decimal,
}

impl Default for PortfolioMonitor {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

impl PortfolioMonitor {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            concentration_ceiling: config.concentration_ceiling,
        }
    }

    /// Evaluate `portfolio`. `risk` is the analysis of its current holdings, when available;
    /// without it the risk and correlation checks are skipped.
    pub fn evaluate(&self, portfolio: &Portfolio, risk: Option<&RiskAnalysis>) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let profile = &portfolio.risk_profile;

        self.check_drift(portfolio, &mut alerts);

        if let Some(risk) = risk {
            let var_ratio = risk.var_ratio();
            if var_ratio > profile.max_drawdown {
                alerts.push(Alert::new(
                    AlertKind::Risk,
                    Severity::Critical,
                    None,
                    var_ratio,
                    profile.max_drawdown,
                    format!(
                        "VaR is {:.2}% of portfolio value, above the {:.2}% drawdown limit",
                        var_ratio * Decimal::ONE_HUNDRED,
                        profile.max_drawdown * Decimal::ONE_HUNDRED
                    ),
                ));
            }
            if risk.correlation_risk > profile.max_correlation {
                alerts.push(Alert::new(
                    AlertKind::Correlation,
                    Severity::Warning,
                    None,
                    risk.correlation_risk,
                    profile.max_correlation,
                    format!(
                        "Position-weighted correlation {:.2} above limit {:.2}",
                        risk.correlation_risk, profile.max_correlation
                    ),
                ));
            }
        }

        let hhi = herfindahl(portfolio.positions.iter().map(|p| p.weight));
        if hhi > self.concentration_ceiling {
            alerts.push(Alert::new(
                AlertKind::Concentration,
                Severity::Warning,
                None,
                hhi,
                self.concentration_ceiling,
                format!(
                    "Herfindahl index {:.4} above ceiling {:.4}",
                    hhi, self.concentration_ceiling
                ),
            ));
        }
        for pos in &portfolio.positions {
            if pos.weight > profile.max_position_size {
                alerts.push(Alert::new(
                    AlertKind::Concentration,
                    Severity::Warning,
                    Some(&pos.symbol),
                    pos.weight,
                    profile.max_position_size,
                    format!(
                        "{} is {:.2}% of the portfolio, above the {:.2}% position limit",
                        pos.symbol,
                        pos.weight * Decimal::ONE_HUNDRED,
                        profile.max_position_size * Decimal::ONE_HUNDRED
                    ),
                ));
            }
        }

        let drawdown = portfolio.metrics.current_drawdown;
        if drawdown > profile.max_drawdown {
            alerts.push(Alert::new(
                AlertKind::Performance,
                Severity::Critical,
                None,
                drawdown,
                profile.max_drawdown,
                format!(
                    "Drawdown {:.2}% from peak exceeds {:.2}%",
                    drawdown * Decimal::ONE_HUNDRED,
                    profile.max_drawdown * Decimal::ONE_HUNDRED
                ),
            ));
        }

        if portfolio.breaches_cash_reserve() {
            let invested = portfolio.invested_weight();
            let limit = portfolio.constraints.investable_fraction();
            alerts.push(Alert::new(
                AlertKind::CashReserve,
                Severity::Warning,
                None,
                invested,
                limit,
                format!(
                    "Invested weight {:.2}% leaves less than the {:.2}% cash reserve",
                    invested * Decimal::ONE_HUNDRED,
                    portfolio.constraints.min_cash_reserve * Decimal::ONE_HUNDRED
                ),
            ));
        }

        if !alerts.is_empty() {
            info!("Portfolio {} raised {} alerts", portfolio.id, alerts.len());
        }
        alerts
    }

    /// Drift is only meaningful once a target allocation exists
    fn check_drift(&self, portfolio: &Portfolio, alerts: &mut Vec<Alert>) {
        if portfolio.target_allocation.is_empty() {
            return;
        }
        let threshold = portfolio.risk_profile.rebalance_threshold;

        let mut symbols: Vec<&str> = portfolio
            .target_allocation
            .iter()
            .map(|t| t.symbol.as_str())
            .collect();
        for p in &portfolio.positions {
            if !symbols.contains(&p.symbol.as_str()) {
                symbols.push(&p.symbol);
            }
        }

        for symbol in symbols {
            let weight = portfolio.position(symbol).map(|p| p.weight).unwrap_or(Decimal::ZERO);
            let drift = portfolio.target_weight(symbol) - weight;
            if drift.abs() > threshold {
                let severity = if drift.abs() > threshold * Decimal::TWO {
                    Severity::Critical
                } else {
                    Severity::Warning
                };
                alerts.push(Alert::new(
                    AlertKind::Drift,
                    severity,
                    Some(symbol),
                    drift,
                    threshold,
                    format!(
                        "{} drifted {:+.2}% from target",
                        symbol,
                        drift * Decimal::ONE_HUNDRED
                    ),
                ));
            }
        }
    }
}
