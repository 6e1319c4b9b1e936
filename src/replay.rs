//! Shared recalculation/decision loop
//!
//! `GridRunner` drives the engine through one protocol used identically by
//! the live polling loop and the backtest replay, so the two modes cannot
//! diverge in behavior: the same recalculation cadence, the same stale-grid
//! tolerance, the same decision bookkeeping.

use anyhow::{bail, Result};
use tracing::{error, info, warn};

use crate::config::{GridConfig, StrategyConfig};
use crate::data;
use crate::engine::GridEngine;
use crate::grid::{self, GridError, GridLevels};
use crate::store::OrderStore;
use crate::types::{Decision, PricePoint, TradeResult};

pub struct GridRunner {
    engine: GridEngine,
    grid_cfg: GridConfig,
    grid: Option<GridLevels>,
    /// Next recalculation trigger; advanced by the fixed interval on every
    /// trigger, never resynced to the current tick, so missed windows
    /// compound instead of silently shifting the cadence
    next_recalc: Option<i64>,
    recalc_count: usize,
    pub balance: f64,
    pub decisions: Vec<Decision>,
    pub trades: Vec<TradeResult>,
}

impl GridRunner {
    pub fn new(grid_cfg: GridConfig, strategy_cfg: StrategyConfig, initial_balance: f64) -> Self {
        GridRunner {
            engine: GridEngine::new(strategy_cfg),
            grid_cfg,
            grid: None,
            next_recalc: None,
            recalc_count: 0,
            balance: initial_balance,
            decisions: Vec::new(),
            trades: Vec::new(),
        }
    }

    pub fn grid(&self) -> Option<&GridLevels> {
        self.grid.as_ref()
    }

    /// Successful grid recomputations so far, the seed excluded
    pub fn recalc_count(&self) -> usize {
        self.recalc_count
    }

    /// Compute the initial grid from the lookback window ending at `at`.
    ///
    /// Both modes seed before their first tick; a failure here means there
    /// is not enough history to run at all.
    pub fn seed_grid(&mut self, history: &[PricePoint], at: i64) -> Result<(), GridError> {
        let window = data::prices_in_window(history, at - self.grid_cfg.lookback_ms(), at);
        let grid = grid::compute(&window, self.grid_cfg.level_count, self.grid_cfg.bound_method())?;
        info!(
            "Grid seeded from {} samples: min={:.2}, max={:.2}",
            window.len(),
            grid.min,
            grid.max
        );
        self.grid = Some(grid);
        Ok(())
    }

    /// Process one price tick: recalculate the grid if the cadence says so,
    /// then run the decision engine against the current grid.
    ///
    /// `history` is the full available series (already-replayed backtest
    /// prices or freshly fetched live history); only data strictly before
    /// the tick timestamp is ever used for recalculation.
    pub fn on_price(
        &mut self,
        point: &PricePoint,
        history: &[PricePoint],
        store: &mut dyn OrderStore,
    ) -> Result<Option<Decision>> {
        let next = *self.next_recalc.get_or_insert(point.timestamp);
        if point.timestamp >= next {
            self.recalculate(point.timestamp, history)?;
            self.next_recalc = Some(next + self.grid_cfg.recalc_interval_ms());
        }

        let Some(grid) = self.grid.as_ref() else {
            bail!("no grid available; refusing to trade without one");
        };

        let decision =
            self.engine
                .decide(point.price, point.timestamp, &mut self.balance, grid, store)?;

        if let Some(d) = &decision {
            if let Some(trade) = TradeResult::from_sell(d, point.timestamp) {
                self.trades.push(trade);
            }
            self.decisions.push(d.clone());
        }

        Ok(decision)
    }

    fn recalculate(&mut self, timestamp: i64, history: &[PricePoint]) -> Result<()> {
        let from = timestamp - self.grid_cfg.lookback_ms();
        let window = data::prices_in_window(history, from, timestamp);

        if window.is_empty() {
            if self.grid.is_none() {
                bail!("cannot compute initial grid: recalculation window is empty");
            }
            warn!(timestamp, "Empty recalculation window, keeping previous grid");
            return Ok(());
        }

        match grid::compute(&window, self.grid_cfg.level_count, self.grid_cfg.bound_method()) {
            Ok(g) => {
                self.recalc_count += 1;
                info!(
                    timestamp,
                    "Grid recalculated from {} samples: min={:.2}, max={:.2}",
                    window.len(),
                    g.min,
                    g.max
                );
                self.grid = Some(g);
                Ok(())
            }
            Err(e @ GridError::InsufficientData { .. }) if self.grid.is_some() => {
                error!(timestamp, "Grid recalculation failed, keeping previous grid: {}", e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
