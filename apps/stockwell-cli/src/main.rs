//! # Stockwell CLI
//!
//! Operator command line for the inventory ledger.
//!
//! ## Typical Session
//! ```text
//! stockwell product add MILK-1L "Whole Milk 1L"
//! stockwell receive --sku MILK-1L --batch B1 --expiry 2025-01-01 \
//!                   --quantity 5 --cost 60 --price 100
//! stockwell allocate MILK-1L 8                       (advisory FEFO plan)
//! stockwell order place --item MILK-1L=8             (draft -> pending)
//! stockwell order transition ORD-000001 shipping
//! stockwell history --sku MILK-1L
//! ```
//!
//! ## Exit Codes
//! - `0` success
//! - `1` the request failed and retrying it unchanged will fail again
//! - `75` the database stayed busy through every retry; try again
//! - `78` configuration could not be loaded

mod commands;
mod config;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::commands::{
    AllocateArgs, Context, HistoryArgs, LedgerArgs, OrderCommand, ProductCommand, ReceiveArgs,
};
use crate::config::StockwellConfig;
use crate::output::Output;
use stockwell_db::DbError;

const EXIT_TEMPFAIL: u8 = 75;
const EXIT_CONFIG: u8 = 78;

/// Stockwell - batch inventory ledger and order fulfillment
#[derive(Parser)]
#[command(name = "stockwell")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Use JSON output format
    #[arg(long, global = true)]
    json: bool,

    /// Config file path (default: ./stockwell.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the product catalog
    #[command(subcommand)]
    Product(ProductCommand),

    /// Receive a batch onto the shelf
    Receive(ReceiveArgs),

    /// Show which batches would supply a quantity (reserves nothing)
    Allocate(AllocateArgs),

    /// Create, place and transition orders
    #[command(subcommand)]
    Order(OrderCommand),

    /// Show a batch's ledger entry
    Ledger(LedgerArgs),

    /// Page through the movement log
    History(HistoryArgs),

    /// Stock totals for a product
    Stock { sku: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let output = Output::new(cli.json);

    let config = match StockwellConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            output.error(&e.to_string());
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    init_tracing(&config);

    match run(cli.command, config, output).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output.error(&format!("{:#}", e));
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_tracing(config: &StockwellConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Commands, config: StockwellConfig, output: Output) -> Result<()> {
    debug!(database = %config.database_path.display(), "Configuration loaded");

    let ctx = Context::open(config, output).await?;
    info!(business_date = %ctx.service.today(), "Stockwell ready");

    let result = match command {
        Commands::Product(cmd) => commands::product(cmd, &ctx).await,
        Commands::Receive(args) => commands::receive(args, &ctx).await,
        Commands::Allocate(args) => commands::allocate(args, &ctx).await,
        Commands::Order(cmd) => commands::order(cmd, &ctx).await,
        Commands::Ledger(args) => commands::ledger(args, &ctx).await,
        Commands::History(args) => commands::history(args, &ctx).await,
        Commands::Stock { sku } => commands::stock(sku, &ctx).await,
    };

    ctx.db.close().await;
    result
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<DbError>() {
        Some(db_err) if db_err.is_retryable() => EXIT_TEMPFAIL,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_order_place() {
        let cli = Cli::try_parse_from([
            "stockwell", "--json", "order", "place", "--item", "MILK-1L=3", "--item", "EGGS-12=1", "--pos",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Order(OrderCommand::Place { items, pos, .. }) => {
                assert!(pos);
                assert_eq!(items, vec![("MILK-1L".to_string(), 3), ("EGGS-12".to_string(), 1)]);
            }
            _ => panic!("expected order place"),
        }
    }

    #[test]
    fn test_transition_status_is_parsed() {
        let cli = Cli::try_parse_from(["stockwell", "order", "transition", "ORD-000001", "shipping"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Order(OrderCommand::Transition { status: stockwell_core::OrderStatus::Shipping, .. })
        ));

        assert!(Cli::try_parse_from(["stockwell", "order", "transition", "ORD-000001", "lost"]).is_err());
    }

    #[test]
    fn test_history_needs_a_scope() {
        assert!(Cli::try_parse_from(["stockwell", "history"]).is_err());
        assert!(Cli::try_parse_from(["stockwell", "history", "--batch", "B1", "--sku", "MILK-1L"]).is_err());
        assert!(Cli::try_parse_from(["stockwell", "history", "--sku", "MILK-1L", "--limit", "10"]).is_ok());
    }

    #[test]
    fn test_retryable_errors_get_tempfail() {
        let busy = anyhow::Error::new(DbError::Contention("database is locked".to_string()));
        assert_eq!(exit_code_for(&busy), EXIT_TEMPFAIL);

        let other = anyhow::anyhow!("No product with SKU X");
        assert_eq!(exit_code_for(&other), 1);
    }
}
