//! Error types for the allocation engine

use thiserror::Error;

/// Engine error
///
/// `DataUnavailable` and `Execution` are normally recovered locally (the symbol is
/// excluded, the trade is reported as failed). `NotFound` is surfaced to the caller.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Portfolio not found: {0}")]
    NotFound(String),

    #[error("Data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("Execution failed for {symbol}: {reason}")]
    Execution { symbol: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Insight rejected: {0}")]
    InsightParse(#[from] crate::data::InsightParseError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn data_unavailable(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::DataUnavailable {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }

    pub fn execution(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Execution {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error only affects a single symbol and can be recovered by exclusion
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::DataUnavailable { .. }
                | EngineError::Execution { .. }
                | EngineError::InsightParse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
