//! Gridspot - main entry point
//!
//! This binary provides four subcommands:
//! - backtest: Replay a historical price series through the grid engine
//! - sweep: Parallel parameter sweep over backtest configurations
//! - live: Run the polling trade loop (paper or real)
//! - download: Download historical klines from Bybit

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "gridspot")]
#[command(about = "Grid spot trading bot with backtesting, parameter sweeps, and live trading", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a historical price series through the grid engine
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/btcusdt.json")]
        config: String,

        /// Price data file (overrides config file)
        #[arg(short, long)]
        data: Option<String>,

        /// Replay start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// Replay end date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,

        /// Initial quote balance
        #[arg(long)]
        balance: Option<f64>,
    },

    /// Sweep grid parameters over parallel backtests
    Sweep {
        /// Path to base configuration file
        #[arg(short, long, default_value = "configs/btcusdt.json")]
        config: String,

        /// Price data file (overrides config file)
        #[arg(short, long)]
        data: Option<String>,

        /// Number of top results to show
        #[arg(short, long, default_value = "10")]
        top: usize,

        /// Sort results by metric (balance, profit, trades)
        #[arg(long, default_value = "balance")]
        sort_by: String,

        /// Run sequentially instead of parallel
        #[arg(long)]
        sequential: bool,

        /// Sweep axis override, e.g. "levels=10,20,30" or "lookback=14,30"
        /// or "zone=0.30,0.49" (repeatable)
        #[arg(short = 'g', long = "grid")]
        overrides: Vec<String>,

        /// Results output file (defaults to <results_dir>/sweep_results.json)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Run the live polling loop
    Live {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/btcusdt.json")]
        config: String,

        /// Live trading mode (CAUTION - REAL MONEY!); paper mode otherwise
        #[arg(long)]
        live: bool,

        /// Polling interval in seconds (overrides config)
        #[arg(long)]
        interval: Option<u64>,

        /// Order state database path
        #[arg(long, default_value = "state/orders.db")]
        state_db: String,
    },

    /// Download historical price data from Bybit
    Download {
        /// Spot trading pair, e.g. BTCUSDT
        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,

        /// Number of days of history to fetch
        #[arg(short, long, default_value = "365")]
        days: i64,

        /// Kline interval in minutes
        #[arg(short, long, default_value = "15")]
        interval: u32,

        /// Output file (.json or .csv; defaults to data/<symbol>_prices.json)
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // For sweeps: only log to file, keep console clean for progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Sweep { .. } => ("sweep", true), // File-only for clean progress bar
        Commands::Live { .. } => ("live", false),
        Commands::Download { .. } => ("download", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Backtest {
            config,
            data,
            start,
            end,
            balance,
        } => commands::backtest::run(config, data, start, end, balance),

        Commands::Sweep {
            config,
            data,
            top,
            sort_by,
            sequential,
            overrides,
            output,
        } => commands::sweep::run(config, data, top, sort_by, sequential, overrides, output),

        Commands::Live {
            config,
            live,
            interval,
            state_db,
        } => commands::live::run(config, live, interval, state_db).await,

        Commands::Download {
            symbol,
            days,
            interval,
            output,
        } => commands::download::run(symbol, days, interval, output).await,
    }
}
