//! Historical data download command

use anyhow::{bail, Result};
use chrono::Utc;
use tracing::info;

use gridspot::config::ExchangeConfig;
use gridspot::exchange::BybitClient;
use gridspot::{data, PricePoint};

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

pub async fn run(symbol: String, days: i64, interval: u32, output: Option<String>) -> Result<()> {
    // Kline endpoints are public, no credentials needed
    let client = BybitClient::new(&ExchangeConfig::default());

    let end = Utc::now().timestamp_millis();
    let start = end - days * MS_PER_DAY;

    info!(
        "Downloading {} klines for {} over the last {} days",
        interval_label(interval),
        symbol,
        days
    );

    let points: Vec<PricePoint> = client.kline_closes(&symbol, interval, start, end).await?;
    if points.is_empty() {
        bail!("No data fetched for {}", symbol);
    }
    info!(
        "Fetched {} points from {} to {}",
        points.len(),
        points[0].timestamp,
        points[points.len() - 1].timestamp
    );

    let output_path = output.unwrap_or_else(|| format!("data/{}_prices.json", symbol));
    if output_path.ends_with(".csv") {
        data::save_csv_prices(&output_path, &points)?;
    } else {
        data::save_json_prices(&output_path, &points)?;
    }

    println!("Saved {} price points to {}", points.len(), output_path);
    Ok(())
}

fn interval_label(minutes: u32) -> String {
    if minutes % 60 == 0 {
        format!("{}h", minutes / 60)
    } else {
        format!("{}m", minutes)
    }
}
