//! Portfolio allocation engine CLI
//!
//! Runs the engine against a JSON fixture (portfolio, market data, insights).

use allocation_engine::{
    config::Config,
    data::Fixture,
    engine::AllocationEngine,
    executor::PaperExecutor,
    portfolio::PortfolioStore,
    storage::{InMemoryRepository, PortfolioRepository, SqliteRepository},
};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "allocation-engine")]
#[command(about = "Portfolio allocation, rebalancing and risk engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Fixture with the portfolio, market data and insights
    #[arg(short, long, default_value = "demos/portfolio.json")]
    fixture: String,

    /// Persist portfolios and history in the configured sqlite database
    #[arg(long)]
    persist: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize the portfolio and plan rebalancing trades
    Optimize {
        /// Comma-separated symbols (defaults to every symbol in the fixture)
        #[arg(short, long, value_delimiter = ',')]
        symbols: Vec<String>,
        /// risk_parity, insight_weighted, mean_variance, equal_weight, equal_risk_contribution
        #[arg(short, long, default_value = "")]
        method: String,
        /// min_risk, max_sharpe, max_return
        #[arg(short, long, default_value = "")]
        objective: String,
        /// Paper-execute the planned trades
        #[arg(long)]
        execute: bool,
        /// Fee rate for paper execution
        #[arg(long, default_value = "0")]
        fee_rate: Decimal,
    },
    /// Risk analysis of the current holdings
    Risk,
    /// Evaluate monitoring alerts for the current holdings
    Alerts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let fixture = Fixture::load(&cli.fixture)?;

    let repository: Arc<dyn PortfolioRepository> = if cli.persist {
        Arc::new(SqliteRepository::connect(&config.database.path).await?)
    } else {
        Arc::new(InMemoryRepository::new())
    };
    let store = Arc::new(PortfolioStore::new(repository));

    let portfolio_id = fixture.portfolio.id.clone();
    let fixture_symbols = fixture.market.symbols();
    if store.get(&portfolio_id).await.is_err() {
        store.create(fixture.portfolio).await?;
    }

    let fee_rate = match &cli.command {
        Commands::Optimize { fee_rate, .. } => *fee_rate,
        _ => Decimal::ZERO,
    };
    let engine = AllocationEngine::new(
        &config,
        store,
        Arc::new(fixture.market),
        Arc::new(fixture.insights),
        Arc::new(PaperExecutor::new(fee_rate)),
    );

    match cli.command {
        Commands::Optimize {
            symbols,
            method,
            objective,
            execute,
            ..
        } => {
            let symbols = if symbols.is_empty() { fixture_symbols } else { symbols };
            let result = engine.optimize(&portfolio_id, &symbols, &method, &objective).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);

            if execute {
                let report = engine.execute_rebalance(&portfolio_id, &result).await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                if !report.is_complete() {
                    tracing::warn!("{} trades failed", report.failed.len());
                }
            }
        }
        Commands::Risk => {
            let portfolio = engine.store().get(&portfolio_id).await?;
            match engine.holdings_risk(&portfolio).await {
                Some(risk) => println!("{}", serde_json::to_string_pretty(&risk)?),
                None => println!("Portfolio {} holds no positions", portfolio_id),
            }
        }
        Commands::Alerts => {
            let alerts = engine.evaluate_alerts(&portfolio_id).await?;
            if alerts.is_empty() {
                println!("No alerts for {}", portfolio_id);
            }
            for alert in alerts {
                println!(
                    "[{:?}] {} {}: {}",
                    alert.severity,
                    alert.kind,
                    alert.symbol.as_deref().unwrap_or("-"),
                    alert.message
                );
            }
        }
    }

    Ok(())
}
