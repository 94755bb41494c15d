//! # Portfolio Store
//!
//! Owns the `Portfolio` aggregates. Reads and writes go through a `PortfolioRepository`;
//! the store adds per-portfolio serialization on top of it.
//!
//! Mutating workflows take the portfolio's lock for their whole duration so that an
//! optimization and a rebalance of the same portfolio never interleave:
//!
//! ```rust,ignore
//! let _guard = store.lock("pf-1").await;
//! let mut portfolio = store.get("pf-1").await?;
//! portfolio.apply_fill(&fill)?;
//! store.save(&portfolio).await?;
//! ```
//!
//! Store methods never take the lock themselves; it is not reentrant.


use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::optimizer::OptimizationResult;
use crate::storage::PortfolioRepository;
use crate::types::Portfolio;

/// Held for the duration of a mutating workflow on one portfolio
pub type PortfolioGuard = OwnedMutexGuard<()>;

pub struct PortfolioStore {
    repository: Arc<dyn PortfolioRepository>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PortfolioStore {
    pub fn new(repository: Arc<dyn PortfolioRepository>) -> Self {
        Self {
            repository,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the per-portfolio lock. Different portfolios never contend.
    pub async fn lock(&self, portfolio_id: &str) -> PortfolioGuard {
        let lock = self
            .locks
            .lock()
            .entry(portfolio_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Register a new portfolio. Fails if the id is taken.
    pub async fn create(&self, mut portfolio: Portfolio) -> Result<Portfolio> {
        if self.repository.load(&portfolio.id).await?.is_some() {
            return Err(EngineError::InvalidConfiguration(format!(
                "portfolio {} already exists",
                portfolio.id
            )));
        }
        portfolio.recalculate();
        portfolio.check_invariants()?;
        self.repository.save(&portfolio).await?;
        info!(
            "Created portfolio {} with value {:.2}",
            portfolio.id, portfolio.total_value
        );
        Ok(portfolio)
    }

    pub async fn get(&self, portfolio_id: &str) -> Result<Portfolio> {
        self.repository
            .load(portfolio_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(portfolio_id.to_string()))
    }

    /// Persist `portfolio` after checking the value invariant
    pub async fn save(&self, portfolio: &Portfolio) -> Result<()> {
        portfolio.check_invariants()?;
        self.repository.save(portfolio).await
    }

    pub async fn list_ids(&self) -> Result<Vec<String>> {
        self.repository.list_ids().await
    }

    /// Explicit valuation refresh: mark positions to `prices` and persist.
    /// Symbols without a price keep their last known price.
    pub async fn refresh_valuation(
        &self,
        portfolio_id: &str,
        prices: &HashMap<String, Decimal>,
    ) -> Result<Portfolio> {
        let mut portfolio = self.get(portfolio_id).await?;
        portfolio.mark_prices(prices);
        self.save(&portfolio).await?;
        debug!(
            "Revalued {} at {:.2} (drawdown {:.4})",
            portfolio.id, portfolio.total_value, portfolio.metrics.current_drawdown
        );
        Ok(portfolio)
    }

    /// Append an optimization to the portfolio's history
    pub async fn record_optimization(&self, result: &OptimizationResult) -> Result<()> {
        self.repository.append_history(result).await
    }

    /// Optimization history, oldest first
    pub async fn history(&self, portfolio_id: &str) -> Result<Vec<OptimizationResult>> {
        self.repository.history(portfolio_id).await
    }
}
