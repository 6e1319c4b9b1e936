//! Backtesting engine
//!
//! Replays a historical price series through the shared `GridRunner`
//! protocol with a simulated order store, reproducing bit-for-bit the
//! decision sequence the live loop would have produced over the same data.

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::config::Config;
use crate::data;
use crate::replay::GridRunner;
use crate::store::{MemoryOrderStore, OrderStore};
use crate::types::{Decision, Order, PortfolioBalance, PricePoint, TradeResult};

/// Backtest engine
pub struct Backtester {
    config: Config,
}

impl Backtester {
    pub fn new(config: Config) -> Self {
        Backtester { config }
    }

    /// Replay `[start, end]` (millisecond timestamps, inclusive).
    ///
    /// The series before `start` seeds the initial grid; recalculations only
    /// ever read data strictly before their trigger timestamp, so future
    /// prices cannot leak into any decision.
    pub fn run(&self, points: &[PricePoint], start: i64, end: i64) -> Result<BacktestResult> {
        let replay_start = points.partition_point(|p| p.timestamp < start);
        let replay_end = points.partition_point(|p| p.timestamp <= end);
        let replay = &points[replay_start..replay_end];

        if replay.is_empty() {
            bail!("no price data inside the backtest range");
        }

        let mut runner = GridRunner::new(
            self.config.grid.clone(),
            self.config.strategy.clone(),
            self.config.trading.initial_balance,
        );
        runner
            .seed_grid(points, replay[0].timestamp)
            .context("not enough history before the backtest start to seed a grid")?;

        let mut store = MemoryOrderStore::simulated();

        info!(
            "Replaying {} ticks from {} to {}",
            replay.len(),
            replay[0].timestamp,
            replay[replay.len() - 1].timestamp
        );

        for point in replay {
            runner.on_price(point, points, &mut store)?;
        }

        let last_price = replay[replay.len() - 1].price;
        let open_orders = store.list()?;
        let portfolio = PortfolioBalance::compute(runner.balance, &open_orders, last_price);
        let total_profit = runner.trades.iter().map(|t| t.profit).sum();

        info!(
            "Backtest complete: {} decisions, {} closed trades, total profit {:.2}",
            runner.decisions.len(),
            runner.trades.len(),
            total_profit
        );

        let recalc_count = runner.recalc_count();
        Ok(BacktestResult {
            initial_balance: self.config.trading.initial_balance,
            decisions: runner.decisions,
            trades: runner.trades,
            open_orders,
            portfolio,
            total_profit,
            recalc_count,
        })
    }

    /// Replay everything after the first full lookback window
    pub fn run_all(&self, points: &[PricePoint]) -> Result<BacktestResult> {
        let Some(first) = points.first() else {
            bail!("no price data loaded");
        };
        let last = points[points.len() - 1];
        let start = first.timestamp + self.config.grid.lookback_ms();
        if start > last.timestamp {
            bail!("price series shorter than the grid lookback window");
        }
        self.run(points, start, last.timestamp)
    }
}

/// Everything a backtest run produced
#[derive(Debug)]
pub struct BacktestResult {
    pub initial_balance: f64,
    pub decisions: Vec<Decision>,
    pub trades: Vec<TradeResult>,
    pub open_orders: Vec<Order>,
    /// Account snapshot at the final replayed price
    pub portfolio: PortfolioBalance,
    pub total_profit: f64,
    pub recalc_count: usize,
}

impl BacktestResult {
    pub fn buy_count(&self) -> usize {
        self.decisions.len() - self.sell_count()
    }

    pub fn sell_count(&self) -> usize {
        self.decisions.iter().filter(|d| d.is_sell()).count()
    }
}
