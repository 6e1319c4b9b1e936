//! Backtest command implementation

use anyhow::{bail, Result};
use tracing::{info, warn};

use gridspot::backtest::Backtester;
use gridspot::{data, Config};

pub fn run(
    config_path: String,
    data_override: Option<String>,
    start_override: Option<String>,
    end_override: Option<String>,
    balance_override: Option<f64>,
) -> Result<()> {
    info!("Starting backtest");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(data_file) = data_override {
        info!("Overriding data file to: {}", data_file);
        config.backtest.data_file = data_file;
    }
    if let Some(start) = start_override {
        info!("Overriding start date to: {}", start);
        config.backtest.start_date = Some(start);
    }
    if let Some(end) = end_override {
        info!("Overriding end date to: {}", end);
        config.backtest.end_date = Some(end);
    }
    if let Some(balance) = balance_override {
        info!("Overriding initial balance to: {:.2}", balance);
        config.trading.initial_balance = balance;
    }

    let mut points = data::load_prices(&config.backtest.data_file)?;
    data::sort_and_dedup(&mut points);
    info!("Loaded {} price points from {}", points.len(), config.backtest.data_file);

    let validation = data::validate_prices(&points);
    for warning in &validation.warnings {
        warn!("{}", warning);
    }
    if !validation.is_valid() {
        bail!("Price data failed validation: {}", validation.errors.join("; "));
    }

    let backtester = Backtester::new(config.clone());

    info!("Running backtest...");
    let result = match (&config.backtest.start_date, &config.backtest.end_date) {
        (None, None) => backtester.run_all(&points),
        (start, end) => {
            let first = points.first().map(|p| p.timestamp).unwrap_or(0);
            let last = points.last().map(|p| p.timestamp).unwrap_or(0);
            let start = match start {
                Some(s) => super::parse_date_ms(s)?,
                None => first + config.grid.lookback_ms(),
            };
            let end = match end {
                Some(e) => super::parse_date_ms(e)?,
                None => last,
            };
            backtester.run(&points, start, end)
        }
    }?;

    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS");
    println!("{}", "=".repeat(60));
    println!("Symbol:              {}", config.trading.symbol);
    println!("Initial Balance:     {:.2}", result.initial_balance);
    println!("Final Quote Balance: {:.2}", result.portfolio.quote_balance);
    println!(
        "Open Positions:      {} (value {:.2}, bought for {:.2})",
        result.open_orders.len(),
        result.portfolio.positions_value,
        result.portfolio.bought_value
    );
    println!("Total Balance:       {:.2}", result.portfolio.total_balance);
    println!("Closed Trades:       {}", result.trades.len());
    println!("Total Profit:        {:.2}", result.total_profit);
    println!("Buy Decisions:       {}", result.buy_count());
    println!("Sell Decisions:      {}", result.sell_count());
    println!("Grid Recalculations: {}", result.recalc_count);
    println!("{}", "=".repeat(60));

    info!("Backtest completed successfully");
    Ok(())
}
