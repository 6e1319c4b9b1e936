//! Configuration management
//!
//! Loads the JSON configuration file and overlays API credentials from the
//! environment. One explicit `Config` value is constructed at startup and
//! passed into each component; there is no ambient global settings object.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::grid::BoundMethod;

const MS_PER_HOUR: i64 = 60 * 60 * 1000;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    /// Parameter sweep ranges (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep: Option<crate::sweep::SweepConfig>,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        // Load API credentials from environment if not set
        if let Ok(api_key) = std::env::var("BYBIT_API_KEY") {
            config.exchange.api_key = Some(api_key);
        }
        if let Ok(api_secret) = std::env::var("BYBIT_API_SECRET") {
            config.exchange.api_secret = Some(api_secret);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot operate on
    pub fn validate(&self) -> Result<()> {
        if self.grid.level_count < 2 {
            bail!("grid.level_count must be at least 2, got {}", self.grid.level_count);
        }
        if !(0.0..=0.5).contains(&self.strategy.zone_fraction) || self.strategy.zone_fraction == 0.0
        {
            bail!(
                "strategy.zone_fraction must be in (0.0, 0.5], got {}",
                self.strategy.zone_fraction
            );
        }
        if self.strategy.buy_percentage <= 0.0 || self.strategy.buy_percentage > 1.0 {
            bail!(
                "strategy.buy_percentage must be in (0.0, 1.0], got {}",
                self.strategy.buy_percentage
            );
        }
        if self.trading.initial_balance < 0.0 {
            bail!("trading.initial_balance cannot be negative");
        }
        if self.grid.lookback_days <= 0 {
            bail!("grid.lookback_days must be positive");
        }
        if self.grid.recalc_interval_hours <= 0 {
            bail!("grid.recalc_interval_hours must be positive");
        }
        Ok(())
    }
}

/// Exchange connectivity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    pub base_url: String,
    pub recv_window_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            api_key: None,
            api_secret: None,
            base_url: "https://api.bybit.com".to_string(),
            recv_window_ms: 5000,
        }
    }
}

/// Trading pair and account configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub symbol: String,
    /// Starting quote-currency balance for backtests and paper trading
    pub initial_balance: f64,
    /// Live polling delay between ticks
    pub poll_interval_secs: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            symbol: "BTCUSDT".to_string(),
            initial_balance: 1000.0,
            poll_interval_secs: 60,
        }
    }
}

/// Decision engine parameters
///
/// `zone_fraction` and the sell predicate are tuning parameters that changed
/// several times in production; both stay configurable and are never
/// hard-coded in the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Fraction of the inter-level distance forming the buy/sell zones
    pub zone_fraction: f64,
    /// Fraction of the free balance spent per buy
    pub buy_percentage: f64,
    /// Floor on the quote amount spent per buy
    pub min_transaction_amount: f64,
    /// Decimal places the bought quantity is truncated to
    pub qty_precision: u32,
    /// Minimum absolute profit a sell match must realize; `None` matches any
    /// order whose entry price is below the current price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_profit: Option<f64>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig {
            zone_fraction: 0.49,
            buy_percentage: 0.1,
            min_transaction_amount: 5.0,
            qty_precision: 6,
            min_profit: None,
        }
    }
}

/// Grid bound method selector, mapped onto `grid::BoundMethod` together
/// with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundMethodName {
    Percentile,
    StdDev,
    Bollinger,
}

/// Grid recalculation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub level_count: usize,
    pub method: BoundMethodName,
    /// σ multiplier for the std_dev method
    pub std_dev_k: f64,
    /// Window length for the bollinger method
    pub bollinger_points: usize,
    /// σ multiplier for the bollinger method
    pub bollinger_k: f64,
    /// Trailing history window fed into each recalculation
    pub lookback_days: i64,
    /// Fixed recalculation cadence
    pub recalc_interval_hours: i64,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            level_count: 20,
            method: BoundMethodName::Percentile,
            std_dev_k: 2.0,
            bollinger_points: 20,
            bollinger_k: 2.0,
            lookback_days: 30,
            recalc_interval_hours: 24,
        }
    }
}

impl GridConfig {
    pub fn bound_method(&self) -> BoundMethod {
        match self.method {
            BoundMethodName::Percentile => BoundMethod::Percentile,
            BoundMethodName::StdDev => BoundMethod::StdDev { k: self.std_dev_k },
            BoundMethodName::Bollinger => BoundMethod::Bollinger {
                n: self.bollinger_points,
                k: self.bollinger_k,
            },
        }
    }

    pub fn lookback_ms(&self) -> i64 {
        self.lookback_days * MS_PER_DAY
    }

    pub fn recalc_interval_ms(&self) -> i64 {
        self.recalc_interval_hours * MS_PER_HOUR
    }
}

/// Backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub data_file: String,
    pub results_dir: String,
    /// Replay start (YYYY-MM-DD); defaults to wherever the seed window ends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    /// Replay end (YYYY-MM-DD); defaults to the end of the data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            data_file: "data/BTCUSDT_prices.json".to_string(),
            results_dir: "results".to_string(),
            start_date: None,
            end_date: None,
        }
    }
}
