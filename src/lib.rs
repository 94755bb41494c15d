//! Portfolio Allocation & Risk Engine
//!
//! Decides how much of each asset a portfolio should hold, when the live allocation has
//! drifted far enough to act, which trades restore it, and how much tail risk the result
//! carries.
//!
//! ## Architecture
//!
//! ```text
//! MarketData / Insights ─→ Correlation ─→ Optimizer ─→ Rebalance Planner ─→ Executor
//!                                             │                                │
//!                                             └──→ Risk Analyzer ──→ Monitor    │
//!                                                                              ↓
//!                                   Portfolio Store (locks, history) ←── fills
//! ```

pub mod config;
pub mod correlation;
pub mod data;
pub mod engine;
pub mod error;
pub mod executor;
pub mod math;
pub mod monitor;
pub mod optimizer;
pub mod portfolio;
pub mod rebalance;
pub mod risk;
pub mod storage;
pub mod types;

#[cfg(test)]
mod integration_tests;
