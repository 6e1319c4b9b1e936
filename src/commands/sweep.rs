//! Parameter sweep command implementation

use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tracing::{info, warn};

use gridspot::sweep::{self, SweepConfig};
use gridspot::{data, Config};

pub fn run(
    config_path: String,
    data_override: Option<String>,
    top: usize,
    sort_by: String,
    sequential: bool,
    overrides: Vec<String>,
    output: Option<String>,
) -> Result<()> {
    info!("Starting parameter sweep");

    let mut config = Config::from_file(&config_path)?;
    if let Some(data_file) = data_override {
        config.backtest.data_file = data_file;
    }

    let mut sweep_config = config.sweep.clone().unwrap_or_else(SweepConfig::default);
    for override_str in &overrides {
        sweep::apply_override(&mut sweep_config, override_str)?;
    }

    let mut points = data::load_prices(&config.backtest.data_file)?;
    data::sort_and_dedup(&mut points);
    let validation = data::validate_prices(&points);
    if !validation.is_valid() {
        bail!("Price data failed validation: {}", validation.errors.join("; "));
    }
    info!("Loaded {} price points", points.len());

    // One shared replay range so every combination is comparable; the
    // widest lookback in the sweep decides where the range can begin
    let first = points[0].timestamp;
    let last = points[points.len() - 1].timestamp;
    let max_lookback_days = *sweep_config.lookback_days.iter().max().unwrap_or(&30);
    let start = match &config.backtest.start_date {
        Some(s) => super::parse_date_ms(s)?,
        None => first + max_lookback_days * 24 * 60 * 60 * 1000,
    };
    let end = match &config.backtest.end_date {
        Some(e) => super::parse_date_ms(e)?,
        None => last,
    };
    if start >= end {
        bail!("sweep range is empty: the series is shorter than the widest lookback");
    }

    let configs = sweep::generate_configs(&config, &sweep_config);
    info!("Sweeping {} combinations over [{}, {}]", configs.len(), start, end);

    let mut results = if sequential {
        sweep::run_sequential(&configs, &points, start, end)
    } else {
        let progress = ProgressBar::new(configs.len() as u64);
        progress.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )?
            .progress_chars("#>-"),
        );
        let results = sweep::run_parallel(&configs, &points, start, end, Some(&progress));
        progress.finish_and_clear();
        results
    };

    if results.is_empty() {
        bail!("every sweep combination failed; check lookback ranges against the data");
    }
    sweep::sort_results(&mut results, &sort_by);

    println!("\n{}", "=".repeat(72));
    println!("SWEEP RESULTS (top {} by {})", top.min(results.len()), sort_by);
    println!("{}", "=".repeat(72));
    println!(
        "{:>7} {:>10} {:>6} {:>14} {:>12} {:>8} {:>6}",
        "levels", "lookback", "zone", "total balance", "profit", "trades", "open"
    );
    for result in results.iter().take(top) {
        println!(
            "{:>7} {:>9}d {:>6.2} {:>14.2} {:>12.2} {:>8} {:>6}",
            result.level_count,
            result.lookback_days,
            result.zone_fraction,
            result.total_balance,
            result.total_profit,
            result.trades,
            result.open_orders
        );
    }
    println!("{}", "=".repeat(72));

    let output_path = output.unwrap_or_else(|| {
        Path::new(&config.backtest.results_dir)
            .join("sweep_results.json")
            .to_string_lossy()
            .into_owned()
    });
    if let Some(parent) = Path::new(&output_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    match serde_json::to_string_pretty(&results) {
        Ok(json) => {
            std::fs::write(&output_path, json)?;
            info!("Results written to {}", output_path);
        }
        Err(e) => warn!("Failed to serialize results: {}", e),
    }

    Ok(())
}
