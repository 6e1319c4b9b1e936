//! Bybit exchange API client
//!
//! Market data and order endpoints for the Bybit v5 spot API. The core
//! consumes this through the narrow `MarketDataSource` contract and receives
//! already-resolved values or a propagated error; retry and backoff policy
//! belongs to the caller, never in here.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use crate::config::ExchangeConfig;
use crate::data;
use crate::types::PricePoint;

type HmacSha256 = Hmac<Sha256>;

const KLINE_PAGE_LIMIT: usize = 1000;

/// Market data contract the trading loop consumes
///
/// Implementations must return `historical_prices` sorted ascending by
/// timestamp and free of duplicate timestamps, with pagination handled
/// internally.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn current_price(&self, symbol: &str) -> Result<f64>;

    async fn historical_prices(
        &self,
        symbol: &str,
        from: i64,
        to: i64,
        interval_minutes: u32,
    ) -> Result<Vec<PricePoint>>;
}

#[derive(Debug, Clone)]
pub struct BybitClient {
    api_key: String,
    api_secret: String,
    base_url: String,
    recv_window_ms: u64,
    client: reqwest::Client,
}

/// Standard Bybit v5 response envelope
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<T>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T> {
        if self.ret_code != 0 {
            bail!("API error {}: {}", self.ret_code, self.ret_msg);
        }
        self.result.context("API response missing result payload")
    }
}

#[derive(Debug, Deserialize)]
struct TickerList {
    list: Vec<Ticker>,
}

#[derive(Debug, Deserialize)]
struct Ticker {
    #[serde(rename = "lastPrice")]
    last_price: String,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    list: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct OrderList {
    list: Vec<OrderStatusRow>,
}

#[derive(Debug, Deserialize)]
struct OrderStatusRow {
    #[serde(rename = "orderLinkId")]
    order_link_id: String,
    #[serde(rename = "orderStatus")]
    order_status: String,
}

#[derive(Debug, Deserialize)]
struct PlacedOrder {
    #[serde(rename = "orderId")]
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct WalletList {
    list: Vec<WalletAccount>,
}

#[derive(Debug, Deserialize)]
struct WalletAccount {
    coin: Vec<WalletCoin>,
}

#[derive(Debug, Deserialize)]
struct WalletCoin {
    coin: String,
    #[serde(rename = "walletBalance")]
    wallet_balance: String,
    locked: String,
}

impl BybitClient {
    pub fn new(config: &ExchangeConfig) -> Self {
        BybitClient {
            api_key: config.api_key.clone().unwrap_or_default(),
            api_secret: config.api_secret.clone().unwrap_or_default(),
            base_url: config.base_url.clone(),
            recv_window_ms: config.recv_window_ms,
            client: reqwest::Client::new(),
        }
    }

    /// Bybit v5 signature: HMAC-SHA256 over
    /// `timestamp + api_key + recv_window + payload`, hex-encoded
    fn sign(&self, timestamp: i64, payload: &str) -> String {
        let message = format!(
            "{}{}{}{}",
            timestamp, self.api_key, self.recv_window_ms, payload
        );
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn get_public<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<T> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response: ApiResponse<T> = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send request")?
            .json()
            .await
            .context("Failed to parse response")?;
        response.into_result()
    }

    async fn get_signed<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<T> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let signature = self.sign(timestamp, query);
        let url = format!("{}{}?{}", self.base_url, path, query);

        let response: ApiResponse<T> = self
            .client
            .get(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", self.recv_window_ms.to_string())
            .header("X-BAPI-SIGN", signature)
            .send()
            .await
            .context("Failed to send request")?
            .json()
            .await
            .context("Failed to parse response")?;
        response.into_result()
    }

    async fn post_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let payload = serde_json::to_string(body)?;
        let signature = self.sign(timestamp, &payload);
        let url = format!("{}{}", self.base_url, path);

        let response: ApiResponse<T> = self
            .client
            .post(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", self.recv_window_ms.to_string())
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .context("Failed to send request")?
            .json()
            .await
            .context("Failed to parse response")?;
        response.into_result()
    }

    /// Last traded price of a spot symbol
    pub async fn last_price(&self, symbol: &str) -> Result<f64> {
        let query = format!("category=spot&symbol={}", symbol);
        let tickers: TickerList = self.get_public("/v5/market/tickers", &query).await?;

        let ticker = tickers
            .list
            .into_iter()
            .next()
            .context(format!("Ticker not found for {}", symbol))?;
        ticker
            .last_price
            .parse()
            .context("Failed to parse last price")
    }

    /// Close prices of spot klines in `[from, to]`, paginated, ascending and
    /// deduplicated
    pub async fn kline_closes(
        &self,
        symbol: &str,
        interval_minutes: u32,
        from: i64,
        to: i64,
    ) -> Result<Vec<PricePoint>> {
        let interval_ms = interval_minutes as i64 * 60_000;
        let mut all_points: Vec<PricePoint> = Vec::new();
        let mut cursor = from;
        let mut last_newest: Option<i64> = None;

        while cursor < to {
            let query = format!(
                "category=spot&symbol={}&interval={}&start={}&end={}&limit={}",
                symbol, interval_minutes, cursor, to, KLINE_PAGE_LIMIT
            );
            let result: KlineResult = self.get_public("/v5/market/kline", &query).await?;

            if result.list.is_empty() {
                break;
            }

            let points = parse_kline_rows(&result.list)?;
            let newest = points.iter().map(|p| p.timestamp).max().unwrap_or(cursor);

            // A cursor that stops advancing means no more data is coming
            if last_newest == Some(newest) {
                break;
            }
            last_newest = Some(newest);

            debug!(
                "Fetched {} klines for {}, newest: {}",
                points.len(),
                symbol,
                newest
            );
            all_points.extend(points);
            cursor = newest + interval_ms;
        }

        data::sort_and_dedup(&mut all_points);
        all_points.retain(|p| p.timestamp >= from && p.timestamp <= to);
        Ok(all_points)
    }

    /// Free wallet balance of a coin on the unified account
    pub async fn wallet_balance(&self, coin: &str) -> Result<f64> {
        let query = format!("accountType=UNIFIED&coin={}", coin);
        let wallet: WalletList = self
            .get_signed("/v5/account/wallet-balance", &query)
            .await?;

        for account in wallet.list {
            for item in account.coin {
                if item.coin == coin {
                    let balance: f64 = item
                        .wallet_balance
                        .parse()
                        .context("Failed to parse wallet balance")?;
                    let locked: f64 = item.locked.parse().unwrap_or(0.0);
                    return Ok(balance - locked);
                }
            }
        }
        Ok(0.0)
    }

    /// Place a resting spot limit order; returns the exchange order id
    pub async fn place_limit_order(
        &self,
        symbol: &str,
        side: &str,
        qty: f64,
        price: f64,
        order_link_id: &str,
    ) -> Result<String> {
        let body = serde_json::json!({
            "category": "spot",
            "symbol": symbol,
            "side": side,
            "orderType": "Limit",
            "qty": qty.to_string(),
            "price": price.to_string(),
            "timeInForce": "GTC",
            "orderLinkId": order_link_id,
        });

        let placed: PlacedOrder = self.post_signed("/v5/order/create", &body).await?;
        Ok(placed.order_id)
    }

    /// Whether the order with this client id has been fully filled.
    ///
    /// An order absent from the response is reported as not filled; the
    /// caller simply checks again on a later tick.
    pub async fn is_order_filled(&self, symbol: &str, order_link_id: &str) -> Result<bool> {
        let query = format!(
            "category=spot&symbol={}&orderLinkId={}",
            symbol, order_link_id
        );
        let orders: OrderList = self.get_signed("/v5/order/realtime", &query).await?;

        match orders
            .list
            .iter()
            .find(|o| o.order_link_id == order_link_id)
        {
            Some(order) => Ok(order.order_status == "Filled"),
            None => {
                debug!("Order {} not found in response, assuming not filled", order_link_id);
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl MarketDataSource for BybitClient {
    async fn current_price(&self, symbol: &str) -> Result<f64> {
        self.last_price(symbol).await
    }

    async fn historical_prices(
        &self,
        symbol: &str,
        from: i64,
        to: i64,
        interval_minutes: u32,
    ) -> Result<Vec<PricePoint>> {
        self.kline_closes(symbol, interval_minutes, from, to).await
    }
}

/// Kline rows come as arrays of strings, newest first:
/// `[startTime, open, high, low, close, volume, turnover]`
fn parse_kline_rows(rows: &[Vec<String>]) -> Result<Vec<PricePoint>> {
    rows.iter()
        .map(|row| {
            let timestamp: i64 = row
                .first()
                .context("Kline row missing start time")?
                .parse()
                .context("Failed to parse kline start time")?;
            let price: f64 = row
                .get(4)
                .context("Kline row missing close price")?
                .parse()
                .context("Failed to parse kline close price")?;
            Ok(PricePoint { timestamp, price })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> BybitClient {
        BybitClient::new(&ExchangeConfig {
            api_key: Some("key".to_string()),
            api_secret: Some("secret".to_string()),
            ..ExchangeConfig::default()
        })
    }

    #[test]
    fn test_signature_is_deterministic_hex() {
        let c = client();
        let a = c.sign(1_700_000_000_000, "category=spot&symbol=BTCUSDT");
        let b = c.sign(1_700_000_000_000, "category=spot&symbol=BTCUSDT");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));

        // Any payload or timestamp change must change the signature
        assert_ne!(a, c.sign(1_700_000_000_001, "category=spot&symbol=BTCUSDT"));
        assert_ne!(a, c.sign(1_700_000_000_000, "category=spot&symbol=ETHUSDT"));
    }

    #[test]
    fn test_envelope_error_propagates() {
        let response: ApiResponse<TickerList> = serde_json::from_str(
            r#"{"retCode": 10001, "retMsg": "params error", "result": null}"#,
        )
        .unwrap();
        let err = response.into_result().unwrap_err();
        assert!(err.to_string().contains("params error"));
    }

    #[test]
    fn test_envelope_ok() {
        let response: ApiResponse<TickerList> = serde_json::from_str(
            r#"{"retCode": 0, "retMsg": "OK", "result": {"list": [{"lastPrice": "42000.5"}]}}"#,
        )
        .unwrap();
        let tickers = response.into_result().unwrap();
        assert_eq!(tickers.list[0].last_price, "42000.5");
    }

    #[test]
    fn test_parse_kline_rows() {
        let rows = vec![
            vec![
                "1700000900000".to_string(),
                "100".to_string(),
                "101".to_string(),
                "99".to_string(),
                "100.5".to_string(),
                "12".to_string(),
                "1206".to_string(),
            ],
            vec![
                "1700000000000".to_string(),
                "99".to_string(),
                "100".to_string(),
                "98".to_string(),
                "99.5".to_string(),
                "10".to_string(),
                "995".to_string(),
            ],
        ];

        let points = parse_kline_rows(&rows).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].timestamp, 1_700_000_900_000);
        assert_eq!(points[0].price, 100.5);
    }

    #[test]
    fn test_parse_kline_rows_rejects_garbage() {
        let rows = vec![vec!["not-a-number".to_string()]];
        assert!(parse_kline_rows(&rows).is_err());
    }
}
