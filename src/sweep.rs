//! Parameter sweep backtesting
//!
//! Expands sweep ranges into concrete configurations and backtests them in
//! parallel. Each run owns an independent in-memory store and balance, so
//! combinations are embarrassingly parallel; only result aggregation is
//! serialized by the collecting iterator.

use anyhow::{bail, Result};
use indicatif::ProgressBar;
use itertools::iproduct;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::backtest::Backtester;
use crate::config::Config;
use crate::types::PricePoint;

/// Sweep ranges; the cartesian product of all three axes is tested
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub level_counts: Vec<usize>,
    pub lookback_days: Vec<i64>,
    pub zone_fractions: Vec<f64>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            level_counts: vec![20],
            lookback_days: (14..=90).collect(),
            zone_fractions: vec![0.49],
        }
    }
}

impl SweepConfig {
    pub fn total_combinations(&self) -> usize {
        self.level_counts.len() * self.lookback_days.len() * self.zone_fractions.len()
    }
}

/// Result of one parameter combination
#[derive(Debug, Clone, Serialize)]
pub struct SweepResult {
    pub level_count: usize,
    pub lookback_days: i64,
    pub zone_fraction: f64,
    pub total_balance: f64,
    pub total_profit: f64,
    pub trades: usize,
    pub open_orders: usize,
}

/// One derived config per combination of sweep parameters
pub fn generate_configs(base: &Config, sweep: &SweepConfig) -> Vec<Config> {
    iproduct!(
        &sweep.level_counts,
        &sweep.lookback_days,
        &sweep.zone_fractions
    )
    .map(|(&level_count, &lookback_days, &zone_fraction)| {
        let mut config = base.clone();
        config.grid.level_count = level_count;
        config.grid.lookback_days = lookback_days;
        config.strategy.zone_fraction = zone_fraction;
        config.sweep = None;
        config
    })
    .collect()
}

fn run_one(config: &Config, points: &[PricePoint], start: i64, end: i64) -> Option<SweepResult> {
    match Backtester::new(config.clone()).run(points, start, end) {
        Ok(result) => Some(SweepResult {
            level_count: config.grid.level_count,
            lookback_days: config.grid.lookback_days,
            zone_fraction: config.strategy.zone_fraction,
            total_balance: result.portfolio.total_balance,
            total_profit: result.total_profit,
            trades: result.trades.len(),
            open_orders: result.open_orders.len(),
        }),
        Err(e) => {
            warn!(
                "Sweep combination (levels={}, lookback={}d, zone={}) skipped: {}",
                config.grid.level_count, config.grid.lookback_days, config.strategy.zone_fraction, e
            );
            None
        }
    }
}

/// Backtest every config in parallel over the same `[start, end]` range
pub fn run_parallel(
    configs: &[Config],
    points: &[PricePoint],
    start: i64,
    end: i64,
    progress: Option<&ProgressBar>,
) -> Vec<SweepResult> {
    tracing::info!("Testing {} parameter combinations", configs.len());

    configs
        .par_iter()
        .filter_map(|config| {
            let result = run_one(config, points, start, end);
            if let Some(pb) = progress {
                pb.inc(1);
            }
            result
        })
        .collect()
}

/// Sequential variant for debugging
pub fn run_sequential(
    configs: &[Config],
    points: &[PricePoint],
    start: i64,
    end: i64,
) -> Vec<SweepResult> {
    tracing::info!("Testing {} parameter combinations sequentially", configs.len());

    configs
        .iter()
        .filter_map(|config| run_one(config, points, start, end))
        .collect()
}

/// Sort results best-first by the given metric
pub fn sort_results(results: &mut [SweepResult], sort_by: &str) {
    results.sort_by(|a, b| {
        let (va, vb) = match sort_by {
            "profit" => (a.total_profit, b.total_profit),
            "trades" => (a.trades as f64, b.trades as f64),
            _ => (a.total_balance, b.total_balance),
        };
        vb.partial_cmp(&va).unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Apply a CLI override of the form `axis=v1,v2,...` where axis is one of
/// `levels`, `lookback`, `zone`
pub fn apply_override(sweep: &mut SweepConfig, s: &str) -> Result<()> {
    let Some((key, values)) = s.split_once('=') else {
        bail!("invalid sweep override '{}', expected axis=v1,v2,...", s);
    };

    match key.trim() {
        "levels" => sweep.level_counts = parse_list(values)?,
        "lookback" => sweep.lookback_days = parse_list(values)?,
        "zone" => sweep.zone_fractions = parse_list(values)?,
        other => bail!("unknown sweep axis '{}' (expected levels, lookback, zone)", other),
    }
    Ok(())
}

fn parse_list<T: std::str::FromStr>(values: &str) -> Result<Vec<T>> {
    let parsed: Vec<T> = values
        .split(',')
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .filter_map(|v| v.parse().ok())
        .collect();
    if parsed.is_empty() {
        bail!("no parseable values in '{}'", values);
    }
    Ok(parsed)
}
