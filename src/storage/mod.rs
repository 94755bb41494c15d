//! Portfolio persistence
//!
//! The engine keeps portfolios in memory for the duration of a call and hands durability to
//! a `PortfolioRepository`. Two backends: in-memory and SQLite.

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::optimizer::OptimizationResult;
use crate::types::Portfolio;

/// Durable home of portfolio aggregates and their optimization history
#[async_trait]
pub trait PortfolioRepository: Send + Sync {
    async fn load(&self, portfolio_id: &str) -> Result<Option<Portfolio>>;
    async fn save(&self, portfolio: &Portfolio) -> Result<()>;
    async fn list_ids(&self) -> Result<Vec<String>>;
    /// Append to the portfolio's optimization history. Entries are never rewritten.
    async fn append_history(&self, result: &OptimizationResult) -> Result<()>;
    /// History oldest first
    async fn history(&self, portfolio_id: &str) -> Result<Vec<OptimizationResult>>;
}

/// Process-local repository
#[derive(Default)]
pub struct InMemoryRepository {
    portfolios: RwLock<HashMap<String, Portfolio>>,
    history: RwLock<HashMap<String, Vec<OptimizationResult>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PortfolioRepository for InMemoryRepository {
    async fn load(&self, portfolio_id: &str) -> Result<Option<Portfolio>> {
        Ok(self.portfolios.read().get(portfolio_id).cloned())
    }

    async fn save(&self, portfolio: &Portfolio) -> Result<()> {
        self.portfolios
            .write()
            .insert(portfolio.id.clone(), portfolio.clone());
        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.portfolios.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn append_history(&self, result: &OptimizationResult) -> Result<()> {
        self.history
            .write()
            .entry(result.portfolio_id.clone())
            .or_default()
            .push(result.clone());
        Ok(())
    }

    async fn history(&self, portfolio_id: &str) -> Result<Vec<OptimizationResult>> {
        Ok(self
            .history
            .read()
            .get(portfolio_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// SQLite repository. Aggregates are stored as JSON documents.
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open (creating if needed) the database at `path`
    pub async fn connect(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    EngineError::Internal(format!("creating {}: {}", parent.display(), e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let repo = Self { pool };
        repo.initialize_schema().await?;
        info!("Opened portfolio database at {}", path);
        Ok(repo)
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let repo = Self { pool };
        repo.initialize_schema().await?;
        Ok(repo)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolios (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS optimization_history (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                portfolio_id TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_history_portfolio ON optimization_history (portfolio_id, seq)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl PortfolioRepository for SqliteRepository {
    async fn load(&self, portfolio_id: &str) -> Result<Option<Portfolio>> {
        let row = sqlx::query("SELECT data FROM portfolios WHERE id = ?")
            .bind(portfolio_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let data: String = row.try_get("data")?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, portfolio: &Portfolio) -> Result<()> {
        let data = serde_json::to_string(portfolio)?;
        sqlx::query(
            r#"
            INSERT INTO portfolios (id, data, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
            "#,
        )
        .bind(&portfolio.id)
        .bind(data)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        debug!("Saved portfolio {}", portfolio.id);
        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM portfolios ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("id").map_err(EngineError::from))
            .collect()
    }

    async fn append_history(&self, result: &OptimizationResult) -> Result<()> {
        let data = serde_json::to_string(result)?;
        sqlx::query(
            "INSERT INTO optimization_history (id, portfolio_id, data, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&result.id)
        .bind(&result.portfolio_id)
        .bind(data)
        .bind(result.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history(&self, portfolio_id: &str) -> Result<Vec<OptimizationResult>> {
        let rows = sqlx::query(
            "SELECT data FROM optimization_history WHERE portfolio_id = ? ORDER BY seq",
        )
        .bind(portfolio_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<OptimizationResult> {
                let data: String = r.try_get("data")?;
                Ok(serde_json::from_str(&data)?)
            })
            .collect()
    }
}
