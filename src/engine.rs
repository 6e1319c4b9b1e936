//! Grid threshold decision engine
//!
//! Maps a live price, the current grid, the free balance, and the open-order
//! inventory into at most one buy or sell decision per tick. The engine is a
//! stateless function over externally-held state: thresholds are derived
//! fresh on every call and nothing is cached between ticks.

use anyhow::Result;
use std::cmp::Ordering;
use tracing::{debug, info, warn};

use crate::config::StrategyConfig;
use crate::grid::GridLevels;
use crate::store::OrderStore;
use crate::types::{truncate_qty, Decision, Order};

/// Per-tick derived thresholds; never stored across calls
#[derive(Debug, Clone, Copy)]
struct GridThresholds {
    lower_grid: f64,
    upper_grid: f64,
    buy_zone_bound: f64,
    sell_zone_bound: f64,
    spend_amount: f64,
}

/// The decision state machine
pub struct GridEngine {
    config: StrategyConfig,
}

impl GridEngine {
    pub fn new(config: StrategyConfig) -> Self {
        GridEngine { config }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Decide whether to buy, sell, or do nothing at the given price.
    ///
    /// Mutates `balance` and the store only when a decision is emitted.
    /// Business non-events (out of range, zero-width zone, rounding to zero,
    /// no eligible sell candidate) yield `Ok(None)`; the `Result` carries
    /// store I/O failures only.
    pub fn decide(
        &self,
        price: f64,
        timestamp: i64,
        balance: &mut f64,
        grid: &GridLevels,
        store: &mut dyn OrderStore,
    ) -> Result<Option<Decision>> {
        let Some((lower_grid, upper_grid)) = grid.bracket(price) else {
            debug!(timestamp, "Price {:.2} is out of grid range, no action", price);
            return Ok(None);
        };

        if lower_grid == upper_grid {
            // Price sits exactly on a level: zero grid distance, both zone
            // bounds collapse onto the price itself
            debug!(timestamp, "Price {:.2} exactly on grid level, no action", price);
            return Ok(None);
        }

        let t = self.thresholds(lower_grid, upper_grid, *balance);

        if t.lower_grid <= price && price < t.buy_zone_bound && *balance >= t.spend_amount {
            return self.try_buy(price, timestamp, balance, &t, store);
        }

        if t.upper_grid >= price && price > t.sell_zone_bound {
            return self.try_sell(price, timestamp, balance, store);
        }

        Ok(None)
    }

    fn thresholds(&self, lower_grid: f64, upper_grid: f64, balance: f64) -> GridThresholds {
        let grid_distance = upper_grid - lower_grid;
        GridThresholds {
            lower_grid,
            upper_grid,
            buy_zone_bound: lower_grid + grid_distance * self.config.zone_fraction,
            sell_zone_bound: upper_grid - grid_distance * self.config.zone_fraction,
            spend_amount: (balance * self.config.buy_percentage)
                .max(self.config.min_transaction_amount),
        }
    }

    fn try_buy(
        &self,
        price: f64,
        timestamp: i64,
        balance: &mut f64,
        t: &GridThresholds,
        store: &mut dyn OrderStore,
    ) -> Result<Option<Decision>> {
        let raw_amount = t.spend_amount / price;
        let amount = truncate_qty(raw_amount, self.config.qty_precision);

        if amount <= 0.0 {
            debug!(
                timestamp,
                "Buy skipped, amount truncated to zero: price={:.2}, spend={:.2}",
                price,
                t.spend_amount
            );
            return Ok(None);
        }

        if amount * price > *balance {
            debug!(timestamp, "Buy skipped, spend would exceed balance {:.2}", *balance);
            return Ok(None);
        }

        let order = Order::open(amount, price);
        let order_id = order.id.clone();
        store.add(order)?;
        *balance -= t.spend_amount;

        info!(
            timestamp,
            "Buy executed @ {:.7}, amount: {:.6}, remaining balance: {:.2}",
            price,
            amount,
            *balance
        );

        Ok(Some(Decision::Buy {
            price,
            amount,
            order_id,
        }))
    }

    fn try_sell(
        &self,
        price: f64,
        timestamp: i64,
        balance: &mut f64,
        store: &mut dyn OrderStore,
    ) -> Result<Option<Decision>> {
        // Cheapest entry first: realize the most reliably profitable
        // position and free its capital before touching later fills
        let mut candidates: Vec<Order> = store
            .list()?
            .into_iter()
            .filter(|o| o.sellable)
            .collect();
        candidates.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(Ordering::Equal));

        let Some(order) = candidates
            .into_iter()
            .find(|o| self.sell_predicate(price, o))
        else {
            return Ok(None);
        };

        if !store.remove(&order.id)? {
            warn!(
                timestamp,
                "Order {} vanished before removal, skipping sell", order.id
            );
            return Ok(None);
        }

        let sale_amount = order.amount * price;
        let profit = (price - order.price) * order.amount;
        *balance += sale_amount;

        info!(
            timestamp,
            "Sell executed @ {:.7}, profit: {:.2}, sold amount: {:.2}, updated balance: {:.2}",
            price,
            profit,
            sale_amount,
            *balance
        );

        Ok(Some(Decision::Sell {
            price,
            amount: order.amount,
            entry_price: order.price,
            closed_order_id: order.id,
        }))
    }

    fn sell_predicate(&self, price: f64, order: &Order) -> bool {
        match self.config.min_profit {
            Some(min_profit) => (price - order.price) * order.amount > min_profit,
            None => price > order.price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryOrderStore;
    use crate::types::{OrderId, OrderPatch};
    use approx::assert_relative_eq;

    fn test_grid() -> GridLevels {
        GridLevels {
            levels: vec![90.0, 100.0, 110.0, 120.0],
            min: 90.0,
            max: 120.0,
        }
    }

    fn test_engine() -> GridEngine {
        GridEngine::new(StrategyConfig {
            zone_fraction: 0.49,
            buy_percentage: 0.1,
            min_transaction_amount: 5.0,
            qty_precision: 6,
            min_profit: None,
        })
    }

    fn sellable_order(amount: f64, price: f64) -> Order {
        Order {
            id: OrderId::random(),
            amount,
            price,
            sellable: true,
            back_reference: None,
        }
    }

    #[test]
    fn test_buy_in_lower_zone() {
        let engine = test_engine();
        let grid = test_grid();
        let mut store = MemoryOrderStore::simulated();
        let mut balance = 1000.0;

        let decision = engine
            .decide(91.0, 1, &mut balance, &grid, &mut store)
            .unwrap()
            .expect("price 91 is inside the buy zone [90, 94.9)");

        // spend = max(1000 * 0.1, 5) = 100, amount = trunc(100/91, 6)
        match decision {
            Decision::Buy { price, amount, .. } => {
                assert_relative_eq!(price, 91.0);
                assert_relative_eq!(amount, truncate_qty(100.0 / 91.0, 6));
                assert!(amount * price <= 1000.0);
            }
            other => panic!("expected Buy, got {:?}", other),
        }
        assert_relative_eq!(balance, 900.0);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_sell_in_upper_zone() {
        let engine = test_engine();
        let grid = test_grid();
        let mut store = MemoryOrderStore::new();
        let order = sellable_order(1.0526, 95.0);
        let order_id = order.id.clone();
        store.add(order).unwrap();
        let mut balance = 0.0;

        let decision = engine
            .decide(119.0, 2, &mut balance, &grid, &mut store)
            .unwrap()
            .expect("price 119 is inside the sell zone (115.1, 120]");

        match decision {
            Decision::Sell {
                price,
                amount,
                entry_price,
                closed_order_id,
            } => {
                assert_relative_eq!(price, 119.0);
                assert_relative_eq!(amount, 1.0526);
                assert_relative_eq!(entry_price, 95.0);
                assert_eq!(closed_order_id, order_id);
                assert_relative_eq!((price - entry_price) * amount, 25.2624, epsilon = 1e-9);
            }
            other => panic!("expected Sell, got {:?}", other),
        }
        assert_relative_eq!(balance, 1.0526 * 119.0);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_out_of_range_is_no_action() {
        let engine = test_engine();
        let grid = test_grid();
        let mut store = MemoryOrderStore::simulated();
        let mut balance = 1000.0;

        for price in [89.0, 120.5, 0.1] {
            let decision = engine
                .decide(price, 3, &mut balance, &grid, &mut store)
                .unwrap();
            assert!(decision.is_none(), "price {} should be out of range", price);
        }
        assert_relative_eq!(balance, 1000.0);
    }

    #[test]
    fn test_price_exactly_on_level_is_no_action() {
        let engine = test_engine();
        let grid = test_grid();
        let mut store = MemoryOrderStore::simulated();
        let mut balance = 1000.0;

        for level in [90.0, 100.0, 110.0, 120.0] {
            let decision = engine
                .decide(level, 4, &mut balance, &grid, &mut store)
                .unwrap();
            assert!(decision.is_none(), "price {} sits on a level", level);
        }
        assert_relative_eq!(balance, 1000.0);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_dead_zone_between_thresholds() {
        let engine = test_engine();
        let grid = test_grid();
        let mut store = MemoryOrderStore::simulated();
        store.add(sellable_order(1.0, 90.0)).unwrap();
        let mut balance = 1000.0;

        // 95.0 is above buy bound 94.9 and below sell bound 95.1
        let decision = engine
            .decide(95.0, 5, &mut balance, &grid, &mut store)
            .unwrap();
        assert!(decision.is_none());
    }

    #[test]
    fn test_buy_rejected_when_balance_below_spend() {
        let engine = test_engine();
        let grid = test_grid();
        let mut store = MemoryOrderStore::simulated();
        // spend = max(4 * 0.1, 5) = 5 > balance
        let mut balance = 4.0;

        let decision = engine
            .decide(91.0, 6, &mut balance, &grid, &mut store)
            .unwrap();
        assert!(decision.is_none());
        assert_relative_eq!(balance, 4.0);
    }

    #[test]
    fn test_buy_abstains_when_amount_truncates_to_zero() {
        let engine = GridEngine::new(StrategyConfig {
            qty_precision: 0,
            ..StrategyConfig::default()
        });
        let grid = test_grid();
        let mut store = MemoryOrderStore::simulated();
        // spend = max(50 * 0.1, 5) = 5; 5 / 91 truncated to 0 decimals = 0
        let mut balance = 50.0;

        let decision = engine
            .decide(91.0, 7, &mut balance, &grid, &mut store)
            .unwrap();
        assert!(decision.is_none());
        assert_relative_eq!(balance, 50.0);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_sell_matches_cheapest_entry_first() {
        let engine = test_engine();
        let grid = test_grid();
        let mut store = MemoryOrderStore::new();
        store.add(sellable_order(1.0, 95.0)).unwrap();
        let cheap = sellable_order(1.0, 92.0);
        let cheap_id = cheap.id.clone();
        store.add(cheap).unwrap();
        let mut balance = 0.0;

        let decision = engine
            .decide(119.0, 8, &mut balance, &grid, &mut store)
            .unwrap()
            .unwrap();

        match decision {
            Decision::Sell {
                closed_order_id,
                entry_price,
                ..
            } => {
                assert_eq!(closed_order_id, cheap_id);
                assert_relative_eq!(entry_price, 92.0);
            }
            other => panic!("expected Sell, got {:?}", other),
        }
        // At most one order matched per tick
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_sell_ignores_unconfirmed_orders() {
        let engine = test_engine();
        let grid = test_grid();
        let mut store = MemoryOrderStore::new();
        let mut pending = sellable_order(1.0, 95.0);
        pending.sellable = false;
        store.add(pending).unwrap();
        let mut balance = 0.0;

        let decision = engine
            .decide(119.0, 9, &mut balance, &grid, &mut store)
            .unwrap();
        assert!(decision.is_none());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_sell_requires_profitable_entry() {
        let engine = test_engine();
        let grid = test_grid();
        let mut store = MemoryOrderStore::new();
        store.add(sellable_order(1.0, 119.5)).unwrap();
        let mut balance = 0.0;

        let decision = engine
            .decide(119.0, 10, &mut balance, &grid, &mut store)
            .unwrap();
        assert!(decision.is_none());
    }

    #[test]
    fn test_min_profit_threshold_variant() {
        let engine = GridEngine::new(StrategyConfig {
            min_profit: Some(0.12),
            ..StrategyConfig::default()
        });
        let grid = test_grid();
        let mut store = MemoryOrderStore::new();
        // Projected profit (119 - 118.95) * 1.0 = 0.05 < 0.12
        store.add(sellable_order(1.0, 118.95)).unwrap();
        let mut balance = 0.0;

        let decision = engine
            .decide(119.0, 11, &mut balance, &grid, &mut store)
            .unwrap();
        assert!(decision.is_none());

        // A deeper entry clears the threshold
        store.add(sellable_order(1.0, 110.0)).unwrap();
        let decision = engine
            .decide(119.0, 12, &mut balance, &grid, &mut store)
            .unwrap();
        assert!(decision.is_some());
    }

    #[test]
    fn test_vanished_order_logs_and_abstains() {
        // Store whose removals always report not-found, standing in for a
        // concurrent external deletion between list() and remove()
        struct VanishingStore(MemoryOrderStore);

        impl OrderStore for VanishingStore {
            fn add(&mut self, order: Order) -> Result<()> {
                self.0.add(order)
            }
            fn remove(&mut self, _id: &OrderId) -> Result<bool> {
                Ok(false)
            }
            fn update(&mut self, id: &OrderId, patch: OrderPatch) -> Result<bool> {
                self.0.update(id, patch)
            }
            fn list(&self) -> Result<Vec<Order>> {
                self.0.list()
            }
            fn get(&self, id: &OrderId) -> Result<Option<Order>> {
                self.0.get(id)
            }
        }

        let engine = test_engine();
        let grid = test_grid();
        let mut store = VanishingStore(MemoryOrderStore::new());
        store.add(sellable_order(1.0, 95.0)).unwrap();
        let mut balance = 100.0;

        let decision = engine
            .decide(119.0, 13, &mut balance, &grid, &mut store)
            .unwrap();
        assert!(decision.is_none());
        // Balance must not be credited for a sell that did not happen
        assert_relative_eq!(balance, 100.0);
    }
}
