#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::correlation::CorrelationMatrix;
    use crate::optimizer::{Objective, OptimizationMethod};
    use crate::risk::RiskAnalyzer;
    use crate::types::{AllocationWeight, PortfolioConstraints, RiskProfile};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn portfolio(id: &str) -> Portfolio {
        Portfolio::new(id, dec!(60000), RiskProfile::default(), PortfolioConstraints::default())
            .with_position("BTC", dec!(1), dec!(40000))
    }

    fn result(portfolio_id: &str, id: &str) -> OptimizationResult {
        let optimized = vec![AllocationWeight::new("BTC", dec!(0.95))];
        let risk = RiskAnalyzer::default().analyze(
            &optimized,
            &CorrelationMatrix::identity(vec!["BTC".into()]),
            &[("BTC".to_string(), dec!(0.04))].into_iter().collect(),
            dec!(100000),
        );
        OptimizationResult {
            id: id.to_string(),
            portfolio_id: portfolio_id.to_string(),
            method: OptimizationMethod::RiskParity,
            objective: Objective::MaxSharpe,
            current_allocation: vec![AllocationWeight::new("BTC", dec!(0.4))],
            optimized_allocation: optimized,
            expected_return: dec!(0.2),
            expected_risk: dec!(0.6),
            sharpe_ratio: dec!(0.3333),
            rebalancing_trades: Vec::new(),
            risk_metrics: risk,
            recommendations: Vec::new(),
            excluded: Vec::new(),
            created_at: Utc::now(),
        }
    }

    async fn exercise(repo: &dyn PortfolioRepository) {
        assert!(repo.load("pf-1").await.unwrap().is_none());

        let mut pf = portfolio("pf-1");
        repo.save(&pf).await.unwrap();
        repo.save(&portfolio("pf-0")).await.unwrap();
        assert_eq!(repo.load("pf-1").await.unwrap().unwrap(), pf);

        pf.cash = dec!(59000);
        pf.recalculate();
        repo.save(&pf).await.unwrap();
        assert_eq!(repo.load("pf-1").await.unwrap().unwrap().cash, dec!(59000));
        assert_eq!(repo.list_ids().await.unwrap(), vec!["pf-0".to_string(), "pf-1".to_string()]);

        repo.append_history(&result("pf-1", "opt-a")).await.unwrap();
        repo.append_history(&result("pf-1", "opt-b")).await.unwrap();
        repo.append_history(&result("pf-0", "opt-c")).await.unwrap();

        let history = repo.history("pf-1").await.unwrap();
        let ids: Vec<&str> = history.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["opt-a", "opt-b"]);
        assert_eq!(history[0].optimized_weight("BTC"), dec!(0.95));
        assert!(repo.history("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_repository() {
        exercise(&InMemoryRepository::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_in_memory_repository() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        exercise(&repo).await;
    }

    #[tokio::test]
    async fn test_sqlite_file_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("portfolios.db");
        let path = path.to_str().unwrap();

        {
            let repo = SqliteRepository::connect(path).await.unwrap();
            repo.save(&portfolio("pf-durable")).await.unwrap();
            repo.append_history(&result("pf-durable", "opt-1")).await.unwrap();
        }

        let reopened = SqliteRepository::connect(path).await.unwrap();
        let pf = reopened.load("pf-durable").await.unwrap().unwrap();
        assert_eq!(pf.total_value, dec!(100000));
        assert_eq!(pf.position("BTC").unwrap().quantity, dec!(1));
        assert_eq!(reopened.history("pf-durable").await.unwrap().len(), 1);
    }
}
