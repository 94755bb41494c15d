//! End-to-end tests: engine, store, providers and executor wired together

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::data::{
        InsightData, MarketData, MarketDataProvider, StaticInsights, StaticMarketData,
    };
    use crate::engine::{AllocationEngine, EngineEvent};
    use crate::error::{EngineError, Result};
    use crate::executor::{MockTradeExecutor, PaperExecutor, TradeExecutor};
    use crate::monitor::AlertKind;
    use crate::optimizer::{ExclusionKind, Objective, OptimizationMethod};
    use crate::portfolio::PortfolioStore;
    use crate::storage::InMemoryRepository;
    use crate::types::{ExecutedTrade, Portfolio, PortfolioConstraints, RiskProfile, Side, Urgency};
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;

    const EPS: Decimal = dec!(0.000000001);

    const PATTERN: [Decimal; 10] = [
        dec!(1.0),
        dec!(-1.0),
        dec!(0.5),
        dec!(-0.5),
        dec!(0.8),
        dec!(-1.2),
        dec!(0.3),
        dec!(0.2),
        dec!(-0.4),
        dec!(0.6),
    ];

    /// 30 daily returns scaled by `vol`, phase-shifted per symbol
    fn market(symbol: &str, price: Decimal, vol: Decimal, phase: usize) -> MarketData {
        MarketData {
            symbol: symbol.to_string(),
            price,
            volatility: vol,
            historical_returns: (0..30)
                .map(|i| PATTERN[(i + phase) % PATTERN.len()] * vol)
                .collect(),
            volume: dec!(1000000),
        }
    }

    fn feed() -> StaticMarketData {
        StaticMarketData::new(vec![
            market("BTC", dec!(40000), dec!(0.04), 0),
            market("ETH", dec!(2000), dec!(0.05), 3),
            market("SOL", dec!(100), dec!(0.07), 7),
        ])
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// $60k cash + 1 BTC @ $40k
    fn seeded(id: &str) -> Portfolio {
        Portfolio::new(id, dec!(60000), RiskProfile::default(), PortfolioConstraints::default())
            .with_position("BTC", dec!(1), dec!(40000))
    }

    async fn engine_with(
        config: Config,
        market: Arc<dyn MarketDataProvider>,
        executor: Arc<dyn TradeExecutor>,
        portfolios: Vec<Portfolio>,
    ) -> AllocationEngine {
        let store = Arc::new(PortfolioStore::new(Arc::new(InMemoryRepository::new())));
        for p in portfolios {
            store.create(p).await.unwrap();
        }
        AllocationEngine::new(
            &config,
            store,
            market,
            Arc::new(StaticInsights::default()),
            executor,
        )
    }

    async fn engine(portfolios: Vec<Portfolio>) -> AllocationEngine {
        engine_with(
            Config::default(),
            Arc::new(feed()),
            Arc::new(PaperExecutor::default()),
            portfolios,
        )
        .await
    }

    /// Market data that stalls for one symbol
    struct StallingMarket {
        inner: StaticMarketData,
        stalled: &'static str,
    }

    #[async_trait]
    impl MarketDataProvider for StallingMarket {
        async fn get_history(&self, symbol: &str) -> Result<MarketData> {
            if symbol == self.stalled {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            self.inner.get_history(symbol).await
        }
    }

    #[tokio::test]
    async fn test_optimize_then_rebalance_single_symbol() {
        let engine = engine(vec![seeded("pf-1")]).await;

        let result = engine
            .optimize_with(
                "pf-1",
                &symbols(&["BTC"]),
                OptimizationMethod::RiskParity,
                Objective::MaxSharpe,
            )
            .await
            .unwrap();

        assert_eq!(result.current_allocation[0].weight, dec!(0.4));
        assert_eq!(result.optimized_weight("BTC"), dec!(0.95));
        assert_eq!(result.rebalancing_trades.len(), 1);
        let trade = &result.rebalancing_trades[0];
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.quantity, dec!(55000));
        assert_eq!(trade.urgency, Urgency::High);
        assert!(result.risk_metrics.expected_shortfall >= result.risk_metrics.value_at_risk);

        let report = engine.execute_rebalance("pf-1", &result).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.executed.len(), 1);

        let pf = engine.store().get("pf-1").await.unwrap();
        assert_eq!(pf.cash, dec!(5000));
        assert_eq!(pf.position("BTC").unwrap().quantity, dec!(2.375));
        assert_eq!(pf.position("BTC").unwrap().weight, dec!(0.95));
        assert_eq!(pf.target_weight("BTC"), dec!(0.95));
        assert!(pf.last_rebalanced.is_some());
        assert!(pf.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_names_fall_back_with_notes() {
        let engine = engine(vec![seeded("pf-1")]).await;
        let result = engine
            .optimize("pf-1", &symbols(&["BTC", "ETH"]), "black_magic", "moon")
            .await
            .unwrap();

        assert_eq!(result.method, OptimizationMethod::InsightWeighted);
        assert_eq!(result.objective, Objective::MaxSharpe);
        assert!(result.recommendations.iter().any(|r| r.message.contains("Unknown method")));
        assert!(result.recommendations.iter().any(|r| r.message.contains("Unknown objective")));
        assert!((result.total_optimized_weight() - dec!(0.95)).abs() < EPS);
    }

    #[tokio::test]
    async fn test_empty_names_use_configured_defaults() {
        let mut config = Config::default();
        config.optimizer.default_method = "equal_weight".to_string();
        let engine = engine_with(
            config,
            Arc::new(feed()),
            Arc::new(PaperExecutor::default()),
            vec![seeded("pf-1")],
        )
        .await;

        let result = engine.optimize("pf-1", &symbols(&["BTC", "ETH"]), "", "").await.unwrap();
        assert_eq!(result.method, OptimizationMethod::EqualWeight);
        assert_eq!(result.optimized_weight("ETH"), dec!(0.475));
        assert!(!result.recommendations.iter().any(|r| r.message.contains("Unknown")));
    }

    #[tokio::test]
    async fn test_stalled_provider_excludes_only_that_symbol() {
        let mut config = Config::default();
        config.providers.timeout_ms = 50;
        let mut inner = feed();
        inner.insert(market("SLOW", dec!(10), dec!(0.03), 5));
        let engine = engine_with(
            config,
            Arc::new(StallingMarket { inner, stalled: "SLOW" }),
            Arc::new(PaperExecutor::default()),
            vec![seeded("pf-1")],
        )
        .await;

        let result = engine
            .optimize_with(
                "pf-1",
                &symbols(&["BTC", "SLOW", "ETH"]),
                OptimizationMethod::RiskParity,
                Objective::MaxSharpe,
            )
            .await
            .unwrap();

        let slow = result.excluded.iter().find(|e| e.symbol == "SLOW").unwrap();
        assert_eq!(slow.kind, ExclusionKind::Data);
        assert!(slow.reason.contains("timed out"));
        assert_eq!(result.optimized_weight("SLOW"), Decimal::ZERO);
        assert!(result.current_allocation.iter().all(|w| w.symbol != "SLOW"));
        assert!((result.total_optimized_weight() - dec!(0.95)).abs() < EPS);
        assert!(result.optimized_weight("BTC") > result.optimized_weight("ETH"));
    }

    #[tokio::test]
    async fn test_failed_trade_does_not_stop_the_rest() {
        let mut executor = MockTradeExecutor::new();
        executor.expect_execute().times(3).returning(|t| {
            if t.symbol == "ETH" {
                return Err(EngineError::execution(&t.symbol, "venue rejected order"));
            }
            Ok(ExecutedTrade {
                id: format!("fill-{}", t.symbol),
                symbol: t.symbol.clone(),
                side: t.side,
                notional: t.quantity,
                units: t.units(),
                price: t.estimated_price,
                fee: Decimal::ZERO,
                executed_at: Utc::now(),
            })
        });

        let cash_only = Portfolio::new(
            "pf-cash",
            dec!(100000),
            RiskProfile::default(),
            PortfolioConstraints::default(),
        );
        let engine = engine_with(
            Config::default(),
            Arc::new(feed()),
            Arc::new(executor),
            vec![cash_only],
        )
        .await;

        let result = engine
            .optimize_with(
                "pf-cash",
                &symbols(&["BTC", "ETH", "SOL"]),
                OptimizationMethod::EqualWeight,
                Objective::MaxSharpe,
            )
            .await
            .unwrap();
        assert_eq!(result.rebalancing_trades.len(), 3);

        let report = engine.execute_rebalance("pf-cash", &result).await.unwrap();
        assert_eq!(report.executed.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].trade.symbol, "ETH");
        assert!(report.failed[0].reason.contains("venue rejected"));

        let pf = engine.store().get("pf-cash").await.unwrap();
        assert!(pf.position("BTC").is_some());
        assert!(pf.position("ETH").is_none());
        assert!(pf.position("SOL").is_some());
        // Target adopted even though execution was partial
        assert_eq!(pf.target_allocation.len(), 3);
        assert!(pf.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn test_constraint_excluded_holding_is_sold() {
        let mut constraints = PortfolioConstraints::default();
        constraints.excluded_symbols = vec!["DOGE".to_string()];
        let pf = Portfolio::new("pf-doge", dec!(60000), RiskProfile::default(), constraints)
            .with_position("DOGE", dec!(100000), dec!(0.1));
        let engine = engine(vec![pf]).await;

        let result = engine
            .optimize_with(
                "pf-doge",
                &symbols(&["BTC", "DOGE"]),
                OptimizationMethod::RiskParity,
                Objective::MaxSharpe,
            )
            .await
            .unwrap();

        let doge = result.excluded.iter().find(|e| e.symbol == "DOGE").unwrap();
        assert_eq!(doge.kind, ExclusionKind::Constraint);
        let sell = result.rebalancing_trades.iter().find(|t| t.symbol == "DOGE").unwrap();
        assert_eq!(sell.side, Side::Sell);
        assert!((sell.quantity - dec!(10000)).abs() < dec!(0.000001));
        assert_eq!(sell.estimated_price, dec!(0.1));
    }

    #[tokio::test]
    async fn test_events_published() {
        let engine = engine(vec![seeded("pf-1")]).await;
        let mut events = engine.subscribe();

        let result = engine
            .optimize_with(
                "pf-1",
                &symbols(&["BTC"]),
                OptimizationMethod::RiskParity,
                Objective::MaxSharpe,
            )
            .await
            .unwrap();
        engine.execute_rebalance("pf-1", &result).await.unwrap();

        match events.try_recv().unwrap() {
            EngineEvent::PortfolioOptimized { portfolio_id, result: published } => {
                assert_eq!(portfolio_id, "pf-1");
                assert_eq!(published.id, result.id);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            events.try_recv().unwrap(),
            EngineEvent::RebalancingPlanned { ref trades, .. } if trades.len() == 1
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            EngineEvent::RebalancingExecuted { ref report, .. } if report.executed.len() == 1
        ));
    }

    #[tokio::test]
    async fn test_history_is_append_only() {
        let engine = engine(vec![seeded("pf-1")]).await;
        let first = engine
            .optimize_with(
                "pf-1",
                &symbols(&["BTC"]),
                OptimizationMethod::RiskParity,
                Objective::MaxSharpe,
            )
            .await
            .unwrap();
        let second = engine
            .optimize_with(
                "pf-1",
                &symbols(&["BTC", "ETH"]),
                OptimizationMethod::EqualWeight,
                Objective::MinRisk,
            )
            .await
            .unwrap();

        let history = engine.store().history("pf-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], first);
        assert_eq!(history[1], second);
    }

    #[tokio::test]
    async fn test_unknown_portfolio_is_not_found() {
        let engine = engine(Vec::new()).await;
        let err = engine
            .optimize("ghost", &symbols(&["BTC"]), "risk_parity", "max_sharpe")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert!(matches!(engine.evaluate_alerts("ghost").await, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rebalance_rejects_foreign_result() {
        let engine = engine(vec![seeded("pf-1"), seeded("pf-2")]).await;
        let result = engine
            .optimize_with(
                "pf-1",
                &symbols(&["BTC"]),
                OptimizationMethod::RiskParity,
                Objective::MaxSharpe,
            )
            .await
            .unwrap();
        let err = engine.execute_rebalance("pf-2", &result).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_alerts_for_concentrated_holdings() {
        // $10k cash + 2.25 BTC @ $40k: BTC is 90% of the portfolio
        let pf = Portfolio::new(
            "pf-conc",
            dec!(10000),
            RiskProfile::default(),
            PortfolioConstraints::default(),
        )
        .with_position("BTC", dec!(2.25), dec!(40000));
        let engine = engine(vec![pf]).await;
        let mut events = engine.subscribe();

        let alerts = engine.evaluate_alerts("pf-conc").await.unwrap();
        assert!(alerts.iter().any(|a| a.kind == AlertKind::Concentration && a.symbol.is_none()));
        assert!(alerts
            .iter()
            .any(|a| a.kind == AlertKind::Concentration && a.symbol.as_deref() == Some("BTC")));
        assert!(!alerts.iter().any(|a| a.kind == AlertKind::Risk));

        assert!(matches!(
            events.try_recv().unwrap(),
            EngineEvent::PortfolioAlerts { ref alerts, .. } if !alerts.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_refresh_valuation_marks_to_market() {
        let pf = Portfolio::new(
            "pf-val",
            dec!(60000),
            RiskProfile::default(),
            PortfolioConstraints::default(),
        )
        .with_position("BTC", dec!(1), dec!(50000));
        let engine = engine(vec![pf]).await;

        let refreshed = engine.refresh_valuation("pf-val").await.unwrap();
        assert_eq!(refreshed.total_value, dec!(100000));
        assert_eq!(refreshed.position("BTC").unwrap().current_price, dec!(40000));
        assert_eq!(refreshed.metrics.current_drawdown, dec!(10000) / dec!(110000));
    }

    #[tokio::test]
    async fn test_insights_flow_into_recommendations() {
        let insights = StaticInsights::new(vec![(
            "ETH".to_string(),
            InsightData {
                sentiment: dec!(0.6),
                confidence: dec!(0.9),
                price_target: dec!(2400),
                timeframe: "1w".to_string(),
            },
        )]);
        let store = Arc::new(PortfolioStore::new(Arc::new(InMemoryRepository::new())));
        store.create(seeded("pf-1")).await.unwrap();
        let engine = AllocationEngine::new(
            &Config::default(),
            store,
            Arc::new(feed()),
            Arc::new(insights),
            Arc::new(PaperExecutor::default()),
        );

        let result = engine
            .optimize("pf-1", &symbols(&["BTC", "ETH"]), "insight_weighted", "max_sharpe")
            .await
            .unwrap();
        assert!(result
            .recommendations
            .iter()
            .any(|r| r.symbol.as_deref() == Some("ETH") && r.message.contains("Insight score")));
        assert!((result.total_optimized_weight() - dec!(0.95)).abs() < EPS);
    }

    #[tokio::test]
    async fn test_sells_fund_a_buy_larger_than_cash() {
        // $5k cash, BTC 5%, ETH 45%, SOL 45% of $100k
        let pf = Portfolio::new(
            "pf-skew",
            dec!(5000),
            RiskProfile::default(),
            PortfolioConstraints::default(),
        )
        .with_position("BTC", dec!(0.125), dec!(40000))
        .with_position("ETH", dec!(22.5), dec!(2000))
        .with_position("SOL", dec!(450), dec!(100));
        let engine = engine(vec![pf]).await;

        let result = engine
            .optimize_with(
                "pf-skew",
                &symbols(&["BTC", "ETH", "SOL"]),
                OptimizationMethod::RiskParity,
                Objective::MaxSharpe,
            )
            .await
            .unwrap();
        let largest = &result.rebalancing_trades[0];
        assert_eq!(largest.symbol, "BTC");
        assert_eq!(largest.side, Side::Buy);
        assert!(largest.quantity > dec!(5000));

        let report = engine.execute_rebalance("pf-skew", &result).await.unwrap();
        assert!(report.is_complete(), "failed: {:?}", report.failed);
        let sides: Vec<Side> = report.executed.iter().map(|f| f.side).collect();
        let first_buy = sides.iter().position(|s| *s == Side::Buy).unwrap();
        assert!(sides[..first_buy].iter().all(|s| *s == Side::Sell));
        assert!(sides[first_buy..].iter().all(|s| *s == Side::Buy));

        let pf = engine.store().get("pf-skew").await.unwrap();
        let btc = pf.position("BTC").unwrap().weight;
        assert!((btc - result.optimized_weight("BTC")).abs() < dec!(0.0001));
        assert!((pf.cash - dec!(5000)).abs() < dec!(0.01));
        assert!(pf.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn test_out_of_range_insight_is_rejected() {
        let valid = |target: Decimal| InsightData {
            sentiment: dec!(0.1),
            confidence: dec!(0.5),
            price_target: target,
            timeframe: "1w".to_string(),
        };
        let mut insights = StaticInsights::new(vec![
            ("BTC".to_string(), valid(dec!(41000))),
            ("ETH".to_string(), valid(dec!(2050))),
        ]);
        let without_sol = insights.clone();
        insights.insert(
            "SOL",
            InsightData {
                sentiment: dec!(50),
                confidence: dec!(7),
                price_target: Decimal::ZERO,
                timeframe: String::new(),
            },
        );

        let mut results = Vec::new();
        for provider in [insights, without_sol] {
            let store = Arc::new(PortfolioStore::new(Arc::new(InMemoryRepository::new())));
            store.create(seeded("pf-1")).await.unwrap();
            let engine = AllocationEngine::new(
                &Config::default(),
                store,
                Arc::new(feed()),
                Arc::new(provider),
                Arc::new(PaperExecutor::default()),
            );
            let result = engine
                .optimize_with(
                    "pf-1",
                    &symbols(&["BTC", "ETH", "SOL"]),
                    OptimizationMethod::InsightWeighted,
                    Objective::MaxSharpe,
                )
                .await
                .unwrap();
            results.push(result);
        }

        let (rejected, absent) = (&results[0], &results[1]);
        assert_eq!(rejected.optimized_allocation, absent.optimized_allocation);
        assert!(rejected
            .recommendations
            .iter()
            .any(|r| r.symbol.as_deref() == Some("SOL") && r.message.contains("Insight rejected")));
        assert!(!absent.recommendations.iter().any(|r| r.message.contains("Insight rejected")));
    }

    #[tokio::test]
    async fn test_holdings_risk_leaves_out_short_history() {
        let mut feed = feed();
        let mut young = market("NEW", dec!(10), dec!(0.09), 2);
        young.historical_returns.truncate(5);
        feed.insert(young);
        let engine = engine_with(
            Config::default(),
            Arc::new(feed),
            Arc::new(PaperExecutor::default()),
            Vec::new(),
        )
        .await;

        let pf = seeded("pf-1").with_position("NEW", dec!(1000), dec!(10));
        let risk = engine.holdings_risk(&pf).await.unwrap();
        let analyzed: Vec<&str> = risk.risk_budget.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(analyzed, vec!["BTC"]);
        // $40k BTC of $110k total
        let expected = dec!(0.04) * dec!(40000) / dec!(110000);
        assert!((risk.daily_volatility - expected).abs() < dec!(0.0000001));
    }
}
