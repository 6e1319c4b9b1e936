//! Order lifecycle store
//!
//! Open positions live behind the `OrderStore` trait so the engine never
//! depends on the backing technology. Two implementations: an in-memory
//! store for backtests and parameter sweeps, and a SQLite store that
//! survives process restarts for live trading.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::types::{Order, OrderId, OrderPatch, TradeResult};

/// Minimal contract the decision engine requires of order persistence.
///
/// `list` is treated as a consistent snapshot for the duration of one
/// decision call. `remove` and `update` report a missing id as `Ok(false)`
/// so a concurrent external mutation is logged by the caller instead of
/// crashing the tick.
pub trait OrderStore: Send {
    fn add(&mut self, order: Order) -> Result<()>;

    /// Returns false when no order with this id exists
    fn remove(&mut self, id: &OrderId) -> Result<bool>;

    /// Returns false when no order with this id exists
    fn update(&mut self, id: &OrderId, patch: OrderPatch) -> Result<bool>;

    fn list(&self) -> Result<Vec<Order>>;

    fn get(&self, id: &OrderId) -> Result<Option<Order>>;

    /// Flip the fill-confirmation flag, making the order eligible for
    /// matching against a future sell decision
    fn mark_sellable(&mut self, id: &OrderId) -> Result<bool> {
        self.update(id, OrderPatch::sellable(true))
    }
}

fn apply_patch(order: &mut Order, patch: &OrderPatch) {
    if let Some(amount) = patch.amount {
        order.amount = amount;
    }
    if let Some(price) = patch.price {
        order.price = price;
    }
    if let Some(sellable) = patch.sellable {
        order.sellable = sellable;
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Plain in-memory store.
///
/// The simulated variant marks every order sellable the moment it is added,
/// modeling instantly-filled buys in backtests; the plain variant leaves
/// orders pending external fill confirmation.
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    orders: Vec<Order>,
    fill_on_add: bool,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        MemoryOrderStore::default()
    }

    /// Store for backtest/paper mode: buys fill instantly
    pub fn simulated() -> Self {
        MemoryOrderStore {
            orders: Vec::new(),
            fill_on_add: true,
        }
    }
}

impl OrderStore for MemoryOrderStore {
    fn add(&mut self, mut order: Order) -> Result<()> {
        if self.fill_on_add {
            order.sellable = true;
        }
        self.orders.push(order);
        Ok(())
    }

    fn remove(&mut self, id: &OrderId) -> Result<bool> {
        let before = self.orders.len();
        self.orders.retain(|o| o.id != *id);
        Ok(self.orders.len() < before)
    }

    fn update(&mut self, id: &OrderId, patch: OrderPatch) -> Result<bool> {
        match self.orders.iter_mut().find(|o| o.id == *id) {
            Some(order) => {
                apply_patch(order, &patch);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list(&self) -> Result<Vec<Order>> {
        Ok(self.orders.clone())
    }

    fn get(&self, id: &OrderId) -> Result<Option<Order>> {
        Ok(self.orders.iter().find(|o| o.id == *id).cloned())
    }
}

// ============================================================================
// SQLite store
// ============================================================================

/// SQLite-backed store for live trading.
///
/// Open positions are keyed by order id; realized trades go into an
/// append-only `trades` table that doubles as the profit ledger across
/// restarts.
#[derive(Clone)]
pub struct SqliteOrderStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteOrderStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        info!("SQLite order store initialized: {}", db_path.display());
        Ok(store)
    }

    /// Transient database, used by tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS orders (
                order_id TEXT PRIMARY KEY,
                amount REAL NOT NULL,
                price REAL NOT NULL,
                sellable INTEGER NOT NULL DEFAULT 0,
                back_reference TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                amount REAL NOT NULL,
                profit REAL NOT NULL,
                timestamp INTEGER NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_orders_sellable ON orders(sellable)",
            [],
        )?;

        debug!("Database schema created/verified");
        Ok(())
    }

    fn row_to_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<Order> {
        Ok(Order {
            id: OrderId::new(row.get::<_, String>(0)?),
            amount: row.get(1)?,
            price: row.get(2)?,
            sellable: row.get::<_, i64>(3)? != 0,
            back_reference: row.get::<_, Option<String>>(4)?.map(OrderId::new),
        })
    }

    /// Append one realized trade to the persistent ledger
    pub fn record_trade(&self, trade: &TradeResult) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO trades (entry_price, exit_price, amount, profit, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                trade.entry_price,
                trade.exit_price,
                trade.amount,
                trade.profit,
                trade.timestamp,
            ],
        )?;
        info!(
            "Trade recorded: {:.6} @ {:.2} -> {:.2} | profit {:.2}",
            trade.amount, trade.entry_price, trade.exit_price, trade.profit
        );
        Ok(())
    }

    /// Load the full trade ledger, oldest first
    pub fn load_trades(&self) -> Result<Vec<TradeResult>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT entry_price, exit_price, amount, profit, timestamp FROM trades ORDER BY id",
        )?;
        let trades = stmt
            .query_map([], |row| {
                Ok(TradeResult {
                    entry_price: row.get(0)?,
                    exit_price: row.get(1)?,
                    amount: row.get(2)?,
                    profit: row.get(3)?,
                    timestamp: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(trades)
    }
}

impl OrderStore for SqliteOrderStore {
    fn add(&mut self, order: Order) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO orders (order_id, amount, price, sellable, back_reference)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                order.id.as_str(),
                order.amount,
                order.price,
                order.sellable as i64,
                order.back_reference.as_ref().map(|r| r.as_str()),
            ],
        )?;
        debug!(
            "Order {} added: qty={:.6} @ {:.2}",
            order.id, order.amount, order.price
        );
        Ok(())
    }

    fn remove(&mut self, id: &OrderId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute("DELETE FROM orders WHERE order_id = ?1", params![id.as_str()])?;
        Ok(affected > 0)
    }

    fn update(&mut self, id: &OrderId, patch: OrderPatch) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let existing = conn
            .query_row(
                "SELECT order_id, amount, price, sellable, back_reference
                 FROM orders WHERE order_id = ?1",
                params![id.as_str()],
                Self::row_to_order,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some(mut order) = existing else {
            return Ok(false);
        };
        apply_patch(&mut order, &patch);

        conn.execute(
            "UPDATE orders SET amount = ?2, price = ?3, sellable = ?4 WHERE order_id = ?1",
            params![
                order.id.as_str(),
                order.amount,
                order.price,
                order.sellable as i64
            ],
        )?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<Order>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT order_id, amount, price, sellable, back_reference FROM orders ORDER BY created_at",
        )?;
        let orders = stmt
            .query_map([], Self::row_to_order)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(orders)
    }

    fn get(&self, id: &OrderId) -> Result<Option<Order>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT order_id, amount, price, sellable, back_reference
             FROM orders WHERE order_id = ?1",
            params![id.as_str()],
            Self::row_to_order,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(amount: f64, price: f64) -> Order {
        Order::open(amount, price)
    }

    fn exercise_store(store: &mut dyn OrderStore) {
        let a = order(1.5, 100.0);
        let a_id = a.id.clone();
        let b = order(0.5, 95.0);
        let b_id = b.id.clone();

        store.add(a).unwrap();
        store.add(b).unwrap();
        assert_eq!(store.list().unwrap().len(), 2);

        let fetched = store.get(&a_id).unwrap().unwrap();
        assert_eq!(fetched.amount, 1.5);

        assert!(store.mark_sellable(&a_id).unwrap());
        assert!(store.get(&a_id).unwrap().unwrap().sellable);

        assert!(store.remove(&a_id).unwrap());
        // Removing an id twice reports not-found instead of failing
        assert!(!store.remove(&a_id).unwrap());

        assert!(!store.update(&a_id, OrderPatch::sellable(true)).unwrap());
        assert!(store
            .update(
                &b_id,
                OrderPatch {
                    price: Some(96.0),
                    ..Default::default()
                }
            )
            .unwrap());
        assert_eq!(store.get(&b_id).unwrap().unwrap().price, 96.0);

        assert!(store.get(&a_id).unwrap().is_none());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_memory_store_contract() {
        let mut store = MemoryOrderStore::new();
        exercise_store(&mut store);
    }

    #[test]
    fn test_sqlite_store_contract() {
        let mut store = SqliteOrderStore::in_memory().unwrap();
        exercise_store(&mut store);
    }

    #[test]
    fn test_memory_store_pending_until_marked() {
        let mut store = MemoryOrderStore::new();
        let o = order(1.0, 100.0);
        let id = o.id.clone();
        store.add(o).unwrap();
        assert!(!store.get(&id).unwrap().unwrap().sellable);
    }

    #[test]
    fn test_simulated_store_fills_on_add() {
        let mut store = MemoryOrderStore::simulated();
        let o = order(1.0, 100.0);
        let id = o.id.clone();
        store.add(o).unwrap();
        assert!(store.get(&id).unwrap().unwrap().sellable);
    }

    #[test]
    fn test_sqlite_trade_ledger_appends() {
        let store = SqliteOrderStore::in_memory().unwrap();
        let trade = TradeResult {
            entry_price: 95.0,
            exit_price: 119.0,
            amount: 1.0526,
            profit: (119.0 - 95.0) * 1.0526,
            timestamp: 1_700_000_000_000,
        };
        store.record_trade(&trade).unwrap();
        store.record_trade(&trade).unwrap();

        let trades = store.load_trades().unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0], trade);
    }
}
