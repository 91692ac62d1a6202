//! Trendr: a multi-bot trend-following trading service.
//!
//! Each bot runs an EMA-crossover strategy with ATR-based risk controls
//! against the Binance spot API, managed over a small HTTP interface and
//! reporting to an external log collector over WebSocket.

mod api;
mod logger;
mod models;
mod registry;
mod server;
mod trading;
mod util;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::BinanceClient;
use crate::registry::BotRegistry;
use crate::trading::{RiskConfig, ServiceConfig};

/// Trend-following bot service CLI.
#[derive(Parser)]
#[command(name = "trendr")]
#[command(about = "Run EMA-crossover trading bots against Binance spot", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// WebSocket URL of the external log collector
    #[arg(long, env = "COLLECTOR_URL", default_value = "ws://localhost:8080")]
    collector_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Bind port
        #[arg(short, long, default_value = "5001")]
        port: u16,

        /// Directory for bot snapshots written on stop
        #[arg(long, default_value = "snapshots")]
        snapshot_dir: String,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            snapshot_dir,
        } => {
            let config = ServiceConfig {
                collector_url: cli.collector_url,
                snapshot_dir,
                ..ServiceConfig::default()
            };
            let gateway = Arc::new(BinanceClient::from_env()?);
            let registry = Arc::new(BotRegistry::new(gateway, config));

            info!(port, "starting trendr");
            server::run(registry, &host, port).await?;
        }

        Commands::Config => {
            let service = ServiceConfig {
                collector_url: cli.collector_url,
                ..ServiceConfig::default()
            };
            let risk = RiskConfig::default();

            println!("Service:");
            println!("  Short / long EMA:   {} / {}", service.short_ema_window, service.long_ema_window);
            println!("  ATR window:         {}", service.atr_window);
            println!("  Kline limit:        {}", service.kline_limit);
            println!("  Collector URL:      {}", service.collector_url);
            println!("  Reconnect delay:    {}s", service.reconnect_delay_secs);
            println!("  Stop join timeout:  {}s", service.stop_join_timeout_secs);
            println!("\nRisk defaults:");
            println!("  Stop loss:          {}%", risk.stop_loss_pct);
            println!("  Take profit:        {}%", risk.take_profit_pct);
            println!("  ATR band:           {} - {}", risk.atr_threshold_low, risk.atr_threshold_high);
            println!("  Trailing stop:      {}%", risk.base_trailing_stop_pct);
            println!("  Min allocation:     {}", risk.min_trade_allocation);
            println!("  Fallback fee rate:  {}", risk.fallback_fee_rate);
        }
    }

    Ok(())
}
