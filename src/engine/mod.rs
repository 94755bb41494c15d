//! # Allocation Engine
//!
//! Orchestrates one optimization request end to end:
//!
//! 1. Fetch market data and insights for every requested symbol, concurrently, with a timeout
//! 2. Screen the symbols into a `Universe` (constraints, data quality, correlation)
//! 3. Optimize, plan rebalancing trades, analyze the risk of the optimized allocation
//! 4. Record the result in the portfolio's history and publish events
//!
//! Workflows that touch a portfolio hold its lock from the store for their whole duration.

use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::correlation::CorrelationEngine;
use crate::data::{with_timeout, InsightProvider, MarketDataProvider};
use crate::error::{EngineError, Result};
use crate::executor::{RebalanceReport, TradeExecutor};
use crate::monitor::{Alert, PortfolioMonitor};
use crate::optimizer::{
    targets_of, AllocationOptimizer, Objective, OptimizationMethod, OptimizationResult,
    Recommendation, SymbolData, Universe,
};
use crate::portfolio::PortfolioStore;
use crate::rebalance::RebalancePlanner;
use crate::risk::{RiskAnalysis, RiskAnalyzer};
use crate::types::{Portfolio, RebalancingTrade, Side};

/// Published on the engine's broadcast channel
#[derive(Debug, Clone)]
pub enum EngineEvent {
    PortfolioOptimized {
        portfolio_id: String,
        result: Box<OptimizationResult>,
    },
    RebalancingPlanned {
        portfolio_id: String,
        trades: Vec<RebalancingTrade>,
    },
    RebalancingExecuted {
        portfolio_id: String,
        report: RebalanceReport,
    },
    PortfolioAlerts {
        portfolio_id: String,
        alerts: Vec<Alert>,
    },
}

pub struct AllocationEngine {
    store: Arc<PortfolioStore>,
    market: Arc<dyn MarketDataProvider>,
    insights: Arc<dyn InsightProvider>,
    executor: Arc<dyn TradeExecutor>,
    correlation: CorrelationEngine,
    optimizer: AllocationOptimizer,
    planner: RebalancePlanner,
    risk: RiskAnalyzer,
    monitor: PortfolioMonitor,
    default_method: String,
    default_objective: String,
    annualization_factor: u32,
    timeout: Duration,
    events: broadcast::Sender<EngineEvent>,
}

impl AllocationEngine {
    pub fn new(
        config: &Config,
        store: Arc<PortfolioStore>,
        market: Arc<dyn MarketDataProvider>,
        insights: Arc<dyn InsightProvider>,
        executor: Arc<dyn TradeExecutor>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.events.capacity.max(1));
        Self {
            store,
            market,
            insights,
            executor,
            correlation: CorrelationEngine::from_config(&config.correlation),
            optimizer: AllocationOptimizer::new(
                &config.optimizer,
                config.risk.annualization_factor,
            ),
            planner: RebalancePlanner::from_config(&config.rebalance),
            risk: RiskAnalyzer::from_config(&config.risk),
            monitor: PortfolioMonitor::from_config(&config.monitor),
            default_method: config.optimizer.default_method.clone(),
            default_objective: config.optimizer.default_objective.clone(),
            annualization_factor: config.risk.annualization_factor.max(1),
            timeout: Duration::from_millis(config.providers.timeout_ms.max(1)),
            events,
        }
    }

    /// Replace the risk analyzer, e.g. to plug in liquidity data or stress scenarios
    pub fn with_risk_analyzer(mut self, risk: RiskAnalyzer) -> Self {
        self.risk = risk;
        self
    }

    pub fn store(&self) -> &Arc<PortfolioStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Optimize with method and objective given by name. Unknown names fall back to the
    /// defaults and the fallback is noted in the result. Empty names use the configured defaults.
    pub async fn optimize(
        &self,
        portfolio_id: &str,
        symbols: &[String],
        method: &str,
        objective: &str,
    ) -> Result<OptimizationResult> {
        let method = if method.trim().is_empty() {
            self.default_method.as_str()
        } else {
            method
        };
        let objective = if objective.trim().is_empty() {
            self.default_objective.as_str()
        } else {
            objective
        };

        let mut notes = Vec::new();
        let (method_parsed, method_fallback) = OptimizationMethod::parse_or_default(method);
        if method_fallback {
            notes.push(Recommendation::general(format!(
                "Unknown method '{}'; used {}",
                method, method_parsed
            )));
        }
        let (objective_parsed, objective_fallback) = Objective::parse_or_default(objective);
        if objective_fallback {
            notes.push(Recommendation::general(format!(
                "Unknown objective '{}'; used {}",
                objective, objective_parsed
            )));
        }

        self.run_optimization(portfolio_id, symbols, method_parsed, objective_parsed, notes)
            .await
    }

    pub async fn optimize_with(
        &self,
        portfolio_id: &str,
        symbols: &[String],
        method: OptimizationMethod,
        objective: Objective,
    ) -> Result<OptimizationResult> {
        self.run_optimization(portfolio_id, symbols, method, objective, Vec::new())
            .await
    }

    async fn run_optimization(
        &self,
        portfolio_id: &str,
        symbols: &[String],
        method: OptimizationMethod,
        objective: Objective,
        mut recommendations: Vec<Recommendation>,
    ) -> Result<OptimizationResult> {
        let _guard = self.store.lock(portfolio_id).await;
        let portfolio = self.store.get(portfolio_id).await?;
        let requested = dedup(symbols);

        let (fetched, rejected_insights) = self.fetch(&requested).await;
        recommendations.extend(rejected_insights);
        let universe = Universe::build(
            &requested,
            &portfolio.constraints,
            fetched,
            &self.correlation,
            self.annualization_factor,
        );

        let plan = self.optimizer.optimize(&portfolio, &universe, method, objective);

        // Constraint-excluded holdings stay in the current allocation so they get sold;
        // symbols without usable data are left untouched.
        let unusable: HashSet<&str> = universe.data_excluded().map(|e| e.symbol.as_str()).collect();
        let current_symbols: Vec<String> = requested
            .iter()
            .filter(|s| !unusable.contains(s.as_str()))
            .cloned()
            .collect();
        let current_allocation = portfolio.current_allocation(&current_symbols);

        let prices: HashMap<String, Decimal> = universe
            .assets
            .iter()
            .map(|a| (a.symbol.clone(), a.price))
            .collect();
        let trades = self
            .planner
            .plan(&current_allocation, &plan.weights, &portfolio, &prices);

        let risk_metrics = self.risk.analyze(
            &plan.weights,
            &universe.correlation,
            &daily_volatilities(&universe),
            portfolio.total_value,
        );

        recommendations.extend(plan.notes);
        for e in &universe.excluded {
            recommendations.push(Recommendation::for_symbol(
                &e.symbol,
                format!("Excluded: {}", e.reason),
            ));
        }

        let result = OptimizationResult {
            id: uuid::Uuid::new_v4().to_string(),
            portfolio_id: portfolio.id.clone(),
            method: plan.method,
            objective: plan.objective,
            current_allocation,
            optimized_allocation: plan.weights,
            expected_return: plan.expected_return,
            expected_risk: plan.expected_risk,
            sharpe_ratio: plan.sharpe_ratio,
            rebalancing_trades: trades,
            risk_metrics,
            recommendations,
            excluded: universe.excluded,
            created_at: chrono::Utc::now(),
        };

        self.store.record_optimization(&result).await?;
        info!(
            "Optimized {} with {}/{}: {} symbols, {} trades, expected risk {:.4}",
            portfolio_id,
            result.method,
            result.objective,
            result.optimized_allocation.len(),
            result.rebalancing_trades.len(),
            result.expected_risk
        );

        self.emit(EngineEvent::PortfolioOptimized {
            portfolio_id: portfolio_id.to_string(),
            result: Box::new(result.clone()),
        });
        if !result.rebalancing_trades.is_empty() {
            self.emit(EngineEvent::RebalancingPlanned {
                portfolio_id: portfolio_id.to_string(),
                trades: result.rebalancing_trades.clone(),
            });
        }

        Ok(result)
    }

    /// Execute the trades of `result`: sells first, then buys, each side in planned order
    /// (largest drift first) so sale proceeds fund the buys. A failed trade is reported and
    /// skipped; the rest still run. Afterwards the optimized allocation becomes the
    /// portfolio's target.
    pub async fn execute_rebalance(
        &self,
        portfolio_id: &str,
        result: &OptimizationResult,
    ) -> Result<RebalanceReport> {
        if result.portfolio_id != portfolio_id {
            return Err(EngineError::InvalidConfiguration(format!(
                "optimization {} belongs to portfolio {}, not {}",
                result.id, result.portfolio_id, portfolio_id
            )));
        }

        let _guard = self.store.lock(portfolio_id).await;
        let mut portfolio = self.store.get(portfolio_id).await?;
        let mut report = RebalanceReport::default();

        for planned in execution_order(&result.rebalancing_trades) {
            let trade = match fit_to_holdings(&portfolio, planned) {
                Ok(t) => t,
                Err(e) => {
                    report.record_failure(planned, &e);
                    continue;
                }
            };

            let execution = tokio::time::timeout(self.timeout, self.executor.execute(&trade));
            let fill = match execution.await {
                Ok(Ok(fill)) => fill,
                Ok(Err(e)) => {
                    report.record_failure(planned, &e);
                    continue;
                }
                Err(_) => {
                    let e = EngineError::execution(
                        &trade.symbol,
                        format!("timed out after {}ms", self.timeout.as_millis()),
                    );
                    report.record_failure(planned, &e);
                    continue;
                }
            };

            match portfolio.apply_fill(&fill) {
                Ok(()) => report.executed.push(fill),
                Err(e) => report.record_failure(planned, &e),
            }
        }

        portfolio.target_allocation = targets_of(&result.optimized_allocation);
        portfolio.last_rebalanced = Some(chrono::Utc::now());
        portfolio.recalculate();
        self.store.save(&portfolio).await?;

        info!(
            "Rebalanced {}: {} executed, {} failed",
            portfolio_id,
            report.executed.len(),
            report.failed.len()
        );
        self.emit(EngineEvent::RebalancingExecuted {
            portfolio_id: portfolio_id.to_string(),
            report: report.clone(),
        });
        Ok(report)
    }

    /// Evaluate the current holdings against the risk profile and publish any alerts
    pub async fn evaluate_alerts(&self, portfolio_id: &str) -> Result<Vec<Alert>> {
        let portfolio = self.store.get(portfolio_id).await?;
        let risk = self.holdings_risk(&portfolio).await;
        let alerts = self.monitor.evaluate(&portfolio, risk.as_ref());

        if !alerts.is_empty() {
            self.emit(EngineEvent::PortfolioAlerts {
                portfolio_id: portfolio_id.to_string(),
                alerts: alerts.clone(),
            });
        }
        Ok(alerts)
    }

    /// Risk of what the portfolio holds now. `None` when nothing is held.
    ///
    /// Holdings without market data or with too little history for correlation are left out of
    /// the analysis; their weight is not counted as risk.
    pub async fn holdings_risk(&self, portfolio: &Portfolio) -> Option<RiskAnalysis> {
        if portfolio.positions.is_empty() {
            return None;
        }
        let symbols: Vec<String> = portfolio.positions.iter().map(|p| p.symbol.clone()).collect();

        let mut series = Vec::new();
        let mut volatilities = HashMap::new();
        for (symbol, market) in self.fetch_market(&symbols).await {
            match market {
                Ok(m) => {
                    volatilities.insert(symbol.clone(), m.volatility);
                    series.push((symbol, m.historical_returns));
                }
                Err(e) => warn!("Risk of holdings computed without {}: {}", symbol, e),
            }
        }

        let output = self.correlation.build(&series);
        for (symbol, reason) in &output.excluded {
            warn!("Risk of holdings computed without {}: {}", symbol, reason);
        }
        let analyzed: Vec<String> = symbols
            .into_iter()
            .filter(|s| output.matrix.index_of(s).is_some())
            .collect();

        Some(self.risk.analyze(
            &portfolio.current_allocation(&analyzed),
            &output.matrix,
            &volatilities,
            portfolio.total_value,
        ))
    }

    /// Mark held positions to the latest market prices and persist
    pub async fn refresh_valuation(&self, portfolio_id: &str) -> Result<Portfolio> {
        let _guard = self.store.lock(portfolio_id).await;
        let portfolio = self.store.get(portfolio_id).await?;
        let symbols: Vec<String> = portfolio.positions.iter().map(|p| p.symbol.clone()).collect();

        let prices: HashMap<String, Decimal> = self
            .fetch_market(&symbols)
            .await
            .into_iter()
            .filter_map(|(symbol, market)| match market {
                Ok(m) => Some((symbol, m.price)),
                Err(e) => {
                    warn!("Keeping last price for {}: {}", symbol, e);
                    None
                }
            })
            .collect();

        self.store.refresh_valuation(portfolio_id, &prices).await
    }

    /// Market data and insights for every symbol, all requests in flight at once.
    /// Insights failing validation are dropped and noted.
    async fn fetch(&self, symbols: &[String]) -> (Vec<SymbolData>, Vec<Recommendation>) {
        let requests = symbols.iter().map(|symbol| async move {
            let (market, insight) = tokio::join!(
                with_timeout(symbol, self.timeout, self.market.get_history(symbol)),
                with_timeout(symbol, self.timeout, self.insights.get_insight(symbol)),
            );
            let mut note = None;
            let insight = match insight {
                Ok(Some(i)) => match i.validate() {
                    Ok(()) => Some(i),
                    Err(e) => {
                        warn!("Rejecting insight for {}: {}", symbol, e);
                        note = Some(Recommendation::for_symbol(
                            symbol.as_str(),
                            format!("Insight rejected: {}", e),
                        ));
                        None
                    }
                },
                Ok(None) => None,
                Err(e) => {
                    warn!("Ignoring insight for {}: {}", symbol, e);
                    None
                }
            };
            let data = SymbolData {
                symbol: symbol.clone(),
                market,
                insight,
            };
            (data, note)
        });

        let mut fetched = Vec::with_capacity(symbols.len());
        let mut notes = Vec::new();
        for (data, note) in join_all(requests).await {
            fetched.push(data);
            notes.extend(note);
        }
        (fetched, notes)
    }

    async fn fetch_market(
        &self,
        symbols: &[String],
    ) -> Vec<(String, Result<crate::data::MarketData>)> {
        let requests = symbols.iter().map(|symbol| async move {
            let market = with_timeout(symbol, self.timeout, self.market.get_history(symbol)).await;
            (symbol.clone(), market)
        });
        join_all(requests).await
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}

/// Sells before buys; the planner's order is kept within each side
fn execution_order(trades: &[RebalancingTrade]) -> impl Iterator<Item = &RebalancingTrade> {
    let sells = trades.iter().filter(|t| t.side == Side::Sell);
    let buys = trades.iter().filter(|t| t.side == Side::Buy);
    sells.chain(buys)
}

/// Sells are capped at the units held
fn fit_to_holdings(portfolio: &Portfolio, trade: &RebalancingTrade) -> Result<RebalancingTrade> {
    if trade.side == Side::Buy {
        return Ok(trade.clone());
    }
    let held = portfolio
        .position(&trade.symbol)
        .map(|p| p.quantity)
        .unwrap_or(Decimal::ZERO);
    if held <= Decimal::ZERO {
        return Err(EngineError::execution(&trade.symbol, "no position to sell"));
    }

    if trade.units() > held {
        let mut capped = trade.clone();
        capped.quantity = held * trade.estimated_price;
        return Ok(capped);
    }
    Ok(trade.clone())
}

fn daily_volatilities(universe: &Universe) -> HashMap<String, Decimal> {
    universe
        .assets
        .iter()
        .map(|a| (a.symbol.clone(), a.volatility))
        .collect()
}

fn dedup(symbols: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    symbols
        .iter()
        .filter(|s| seen.insert(s.as_str()))
        .cloned()
        .collect()
}
