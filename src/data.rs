//! Price history loading and management
//!
//! Handles price series stored as JSON (the shape produced by the download
//! command and older exports) or CSV, plus the validation and window-slicing
//! helpers the replay driver builds on.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::types::PricePoint;

// =============================================================================
// File loading
// =============================================================================

/// Load a price series, dispatching on the file extension
pub fn load_prices(path: impl AsRef<Path>) -> Result<Vec<PricePoint>> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => load_csv_prices(path),
        _ => load_json_prices(path),
    }
}

/// Load prices from a JSON array of `{"timestamp": ms, "price": f}` objects
/// (`close_price` is accepted as a field alias)
pub fn load_json_prices(path: impl AsRef<Path>) -> Result<Vec<PricePoint>> {
    let file = File::open(path.as_ref())
        .with_context(|| format!("Failed to open price file: {}", path.as_ref().display()))?;
    let points: Vec<PricePoint> =
        serde_json::from_reader(BufReader::new(file)).context("Failed to parse price JSON")?;
    Ok(points)
}

/// Save prices as pretty-printed JSON
pub fn save_json_prices(path: impl AsRef<Path>, points: &[PricePoint]) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path.as_ref()).context("Failed to create output file")?;
    serde_json::to_writer_pretty(BufWriter::new(file), points)
        .context("Failed to write price JSON")?;
    info!("Saved {} price points to {}", points.len(), path.as_ref().display());
    Ok(())
}

/// Load prices from a `timestamp,price` CSV file
pub fn load_csv_prices(path: impl AsRef<Path>) -> Result<Vec<PricePoint>> {
    let mut reader = csv::Reader::from_path(path.as_ref()).context("Failed to open CSV file")?;

    let mut points = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.context(format!("Failed to read row {}", row_idx + 1))?;

        let timestamp: i64 = record
            .get(0)
            .context("Missing timestamp column")?
            .trim()
            .parse()
            .context(format!("Failed to parse timestamp in row {}", row_idx + 1))?;
        let price: f64 = record
            .get(1)
            .context("Missing price column")?
            .trim()
            .parse()
            .context(format!("Failed to parse price in row {}", row_idx + 1))?;

        points.push(PricePoint { timestamp, price });
    }

    Ok(points)
}

/// Save prices as `timestamp,price` CSV
pub fn save_csv_prices(path: impl AsRef<Path>, points: &[PricePoint]) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = BufWriter::new(File::create(path.as_ref()).context("Failed to create output file")?);

    writeln!(file, "timestamp,price")?;
    for point in points {
        writeln!(file, "{},{}", point.timestamp, point.price)?;
    }

    info!("Saved {} rows to {}", points.len(), path.as_ref().display());
    Ok(())
}

// =============================================================================
// Series utilities
// =============================================================================

/// Sort by timestamp and drop duplicate timestamps, keeping the first
/// occurrence
pub fn sort_and_dedup(points: &mut Vec<PricePoint>) {
    points.sort_by_key(|p| p.timestamp);
    points.dedup_by_key(|p| p.timestamp);
}

/// The contiguous slice of a sorted series with timestamps in `[from, to)`
pub fn slice_window(points: &[PricePoint], from: i64, to: i64) -> &[PricePoint] {
    let start = points.partition_point(|p| p.timestamp < from);
    let end = points.partition_point(|p| p.timestamp < to);
    &points[start..end]
}

/// Prices of a sorted series with timestamps in `[from, to)`
pub fn prices_in_window(points: &[PricePoint], from: i64, to: i64) -> Vec<f64> {
    slice_window(points, from, to)
        .iter()
        .map(|p| p.price)
        .collect()
}

// =============================================================================
// Validation
// =============================================================================

/// Validate a price series for the assumptions the core makes: ascending
/// unique timestamps and positive prices
pub fn validate_prices(points: &[PricePoint]) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if points.is_empty() {
        errors.push("No price points provided".to_string());
        return ValidationResult { errors, warnings };
    }

    for (i, point) in points.iter().enumerate() {
        if point.price <= 0.0 {
            errors.push(format!("Point {}: invalid price ({})", i, point.price));
        }
        if !point.price.is_finite() {
            errors.push(format!("Point {}: non-finite price", i));
        }
        if i > 0 {
            let prev = &points[i - 1];
            if point.timestamp == prev.timestamp {
                errors.push(format!("Point {}: duplicate timestamp {}", i, point.timestamp));
            } else if point.timestamp < prev.timestamp {
                errors.push(format!("Point {}: not chronological", i));
            }
            if prev.price > 0.0 && (point.price - prev.price).abs() / prev.price > 0.5 {
                warnings.push(format!(
                    "Point {}: price moved more than 50% in one step ({} -> {})",
                    i, prev.price, point.price
                ));
            }
        }
    }

    ValidationResult { errors, warnings }
}

/// Result of data validation
#[derive(Debug)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series() -> Vec<PricePoint> {
        (0..10)
            .map(|i| PricePoint::new(1000 + i * 100, 50.0 + i as f64))
            .collect()
    }

    #[test]
    fn test_slice_window_half_open() {
        let points = series();
        let window = slice_window(&points, 1200, 1500);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].timestamp, 1200);
        assert_eq!(window.last().unwrap().timestamp, 1400);
    }

    #[test]
    fn test_slice_window_empty() {
        let points = series();
        assert!(slice_window(&points, 2000, 3000).is_empty());
        assert!(slice_window(&points, 1200, 1200).is_empty());
    }

    #[test]
    fn test_prices_in_window() {
        let points = series();
        let prices = prices_in_window(&points, 1000, 1300);
        assert_eq!(prices, vec![50.0, 51.0, 52.0]);
    }

    #[test]
    fn test_sort_and_dedup() {
        let mut points = vec![
            PricePoint::new(300, 3.0),
            PricePoint::new(100, 1.0),
            PricePoint::new(300, 3.5),
            PricePoint::new(200, 2.0),
        ];
        sort_and_dedup(&mut points);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].timestamp, 100);
        assert_eq!(points[2].timestamp, 300);
    }

    #[test]
    fn test_validate_prices() {
        assert!(validate_prices(&series()).is_valid());
        assert!(!validate_prices(&[]).is_valid());

        let bad = vec![PricePoint::new(100, 1.0), PricePoint::new(100, 2.0)];
        assert!(!validate_prices(&bad).is_valid());

        let negative = vec![PricePoint::new(100, -1.0)];
        assert!(!validate_prices(&negative).is_valid());
    }
}
