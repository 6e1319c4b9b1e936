//! Live trading command
//!
//! Polling loop sharing the exact recalculation/decision protocol with the
//! backtester through `GridRunner`. Paper mode (the default) simulates fills
//! against an in-memory store; live mode places real limit orders and keeps
//! its positions in SQLite so a restart recovers them.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use gridspot::exchange::{BybitClient, MarketDataSource};
use gridspot::replay::GridRunner;
use gridspot::store::{MemoryOrderStore, OrderStore, SqliteOrderStore};
use gridspot::types::{Decision, Order, OrderId, PortfolioBalance, PricePoint};
use gridspot::Config;

/// Kline interval used to build the lookback history
const HISTORY_INTERVAL_MINUTES: u32 = 15;
/// Portfolio snapshot logged every this many cycles
const PORTFOLIO_LOG_CYCLES: u64 = 10;

pub async fn run(
    config_path: String,
    live: bool,
    interval_override: Option<u64>,
    state_db: String,
) -> Result<()> {
    let mut config = Config::from_file(&config_path)?;
    if let Some(secs) = interval_override {
        config.trading.poll_interval_secs = secs;
    }

    if live && (config.exchange.api_key.is_none() || config.exchange.api_secret.is_none()) {
        bail!("live mode requires BYBIT_API_KEY and BYBIT_API_SECRET");
    }

    let client = BybitClient::new(&config.exchange);
    let symbol = config.trading.symbol.clone();

    // Live keeps positions in SQLite across restarts; paper simulates
    // instantly-filled buys in memory
    let (mut store, ledger): (Box<dyn OrderStore>, Option<SqliteOrderStore>) = if live {
        let sqlite = SqliteOrderStore::open(&state_db)?;
        let recovered = sqlite.list()?;
        if !recovered.is_empty() {
            info!("Recovered {} open positions from {}", recovered.len(), state_db);
        }
        (Box::new(sqlite.clone()), Some(sqlite))
    } else {
        info!("Paper mode: orders are simulated, no real money moves");
        (Box::new(MemoryOrderStore::simulated()), None)
    };

    let balance = if live {
        let coin = quote_coin(&symbol);
        let balance = client
            .wallet_balance(coin)
            .await
            .context("Failed to fetch wallet balance")?;
        info!("Available {} balance: {:.2}", coin, balance);
        balance
    } else {
        config.trading.initial_balance
    };

    let now = Utc::now().timestamp_millis();
    let mut history = client
        .historical_prices(
            &symbol,
            now - config.grid.lookback_ms(),
            now,
            HISTORY_INTERVAL_MINUTES,
        )
        .await
        .context("Failed to fetch seed history")?;
    info!("Fetched {} historical points for {}", history.len(), symbol);

    let mut runner = GridRunner::new(config.grid.clone(), config.strategy.clone(), balance);
    runner
        .seed_grid(&history, now)
        .context("Not enough history to seed the initial grid")?;

    info!(
        "Starting {} loop for {} (poll every {}s)",
        if live { "live" } else { "paper" },
        symbol,
        config.trading.poll_interval_secs
    );

    let poll_delay = Duration::from_secs(config.trading.poll_interval_secs);
    let mut cycle_count: u64 = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested, stopping after {} cycles", cycle_count);
                break;
            }
            _ = sleep(poll_delay) => {}
        }
        cycle_count += 1;

        let price = match client.current_price(&symbol).await {
            Ok(price) => price,
            Err(e) => {
                error!("Failed to fetch current price: {}", e);
                continue;
            }
        };
        let timestamp = Utc::now().timestamp_millis();
        let point = PricePoint::new(timestamp, price);
        history.push(point);
        prune_history(&mut history, timestamp, &config);

        if live {
            if let Err(e) = confirm_fills(&client, &symbol, store.as_mut()).await {
                error!("Fill confirmation failed: {}", e);
            }
        }

        let decision = match runner.on_price(&point, &history, store.as_mut()) {
            Ok(decision) => decision,
            Err(e) => {
                error!("Tick failed: {}", e);
                continue;
            }
        };

        if let Some(decision) = &decision {
            if live {
                execute(&client, &symbol, decision, &runner, &ledger).await;
            }
        }

        if cycle_count % PORTFOLIO_LOG_CYCLES == 0 {
            match store.list() {
                Ok(orders) => {
                    let portfolio = PortfolioBalance::compute(runner.balance, &orders, price);
                    info!(
                        "Portfolio: quote={:.2}, positions={:.2} ({} open), total={:.2}, realized trades={}",
                        portfolio.quote_balance,
                        portfolio.positions_value,
                        orders.len(),
                        portfolio.total_balance,
                        runner.trades.len()
                    );
                }
                Err(e) => warn!("Failed to snapshot portfolio: {}", e),
            }
        }
    }

    Ok(())
}

/// Flip `sellable` on every pending order the exchange reports as filled
async fn confirm_fills(
    client: &BybitClient,
    symbol: &str,
    store: &mut dyn OrderStore,
) -> Result<()> {
    for order in store.list()? {
        if order.sellable {
            continue;
        }
        match client.is_order_filled(symbol, order.id.as_str()).await {
            Ok(true) => {
                info!("Order {} filled, marking sellable", order.id);
                if !store.mark_sellable(&order.id)? {
                    warn!("Order {} vanished before it could be marked sellable", order.id);
                }
            }
            Ok(false) => {}
            Err(e) => warn!("Fill check for {} failed: {}", order.id, e),
        }
    }
    Ok(())
}

/// Mirror an engine decision onto the exchange as a resting limit order
async fn execute(
    client: &BybitClient,
    symbol: &str,
    decision: &Decision,
    runner: &GridRunner,
    ledger: &Option<SqliteOrderStore>,
) {
    match decision {
        Decision::Buy {
            price,
            amount,
            order_id,
        } => {
            match client
                .place_limit_order(symbol, "Buy", *amount, *price, order_id.as_str())
                .await
            {
                Ok(exchange_id) => info!("Buy order {} placed ({})", order_id, exchange_id),
                Err(e) => error!("Failed to place buy order {}: {}", order_id, e),
            }
        }
        Decision::Sell {
            price,
            amount,
            closed_order_id,
            ..
        } => {
            let sell_order = Order {
                id: OrderId::random(),
                amount: *amount,
                price: *price,
                sellable: false,
                back_reference: Some(closed_order_id.clone()),
            };
            match client
                .place_limit_order(symbol, "Sell", *amount, *price, sell_order.id.as_str())
                .await
            {
                Ok(exchange_id) => info!(
                    "Sell order {} placed ({}), closing {}",
                    sell_order.id, exchange_id, closed_order_id
                ),
                Err(e) => error!("Failed to place sell order {}: {}", sell_order.id, e),
            }

            if let (Some(db), Some(trade)) = (ledger, runner.trades.last()) {
                if let Err(e) = db.record_trade(trade) {
                    warn!("Failed to persist trade: {}", e);
                }
            }
        }
    }
}

/// Drop history older than the lookback window plus one recalc interval of
/// slack; the series only ever grows by one tick per poll
fn prune_history(history: &mut Vec<PricePoint>, now: i64, config: &Config) {
    let cutoff = now - config.grid.lookback_ms() - config.grid.recalc_interval_ms();
    let keep_from = history.partition_point(|p| p.timestamp < cutoff);
    if keep_from > 0 {
        history.drain(..keep_from);
    }
}

fn quote_coin(symbol: &str) -> &str {
    for quote in ["USDT", "USDC", "EUR", "USD", "BTC"] {
        if symbol.len() > quote.len() && symbol.ends_with(quote) {
            return &symbol[symbol.len() - quote.len()..];
        }
    }
    "USDT"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_coin() {
        assert_eq!(quote_coin("BTCUSDT"), "USDT");
        assert_eq!(quote_coin("ETHBTC"), "BTC");
        assert_eq!(quote_coin("WEIRD"), "USDT");
    }

    #[test]
    fn test_prune_history_keeps_window() {
        let config = Config::default();
        let now = 1_700_000_000_000;
        let slack = config.grid.lookback_ms() + config.grid.recalc_interval_ms();

        let mut history = vec![
            PricePoint::new(now - slack - 2, 1.0),
            PricePoint::new(now - slack - 1, 2.0),
            PricePoint::new(now - slack + 1, 3.0),
            PricePoint::new(now, 4.0),
        ];
        prune_history(&mut history, now, &config);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].price, 3.0);
    }
}
