//! Grid level calculation
//!
//! Turns a historical price sample into a bounded ladder of equally spaced
//! price levels. Three interchangeable bound strategies are supported; the
//! calculator itself is a pure function of its inputs.

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};
use thiserror::Error;

/// Errors from grid level calculation
#[derive(Debug, Error)]
pub enum GridError {
    #[error("insufficient historical data: got {got} samples, need at least {need}")]
    InsufficientData { got: usize, need: usize },

    #[error("grid level count must be at least 2, got {0}")]
    InvalidLevelCount(usize),
}

/// Bound selection strategy for the grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundMethod {
    /// 5th/95th percentile of the full sample; resistant to outliers
    Percentile,
    /// mean ± k·σ over the full sample
    StdDev { k: f64 },
    /// mean ± k·σ over the most recent `n` points only
    Bollinger { n: usize, k: f64 },
}

impl Default for BoundMethod {
    fn default() -> Self {
        BoundMethod::Percentile
    }
}

/// An ascending ladder of reference prices
///
/// Invariants: `levels` is non-decreasing, `levels[0] == min`,
/// `levels[last] == max`, `levels.len()` equals the requested count.
/// Recomputed wholesale on every recalculation tick, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridLevels {
    pub levels: Vec<f64>,
    pub min: f64,
    pub max: f64,
}

impl GridLevels {
    pub fn contains(&self, price: f64) -> bool {
        price >= self.min && price <= self.max
    }

    /// Nearest levels bracketing `price`: (greatest level <= price,
    /// least level >= price). `None` when the price is out of range.
    ///
    /// A price sitting exactly on a level brackets to itself on both sides.
    pub fn bracket(&self, price: f64) -> Option<(f64, f64)> {
        if !self.contains(price) {
            return None;
        }
        let up_idx = self.levels.partition_point(|l| *l < price);
        let lo_idx = self.levels.partition_point(|l| *l <= price);
        Some((self.levels[lo_idx - 1], self.levels[up_idx]))
    }
}

/// Compute grid levels from a historical price sample.
///
/// `level_count` values are linearly interpolated between the lower and
/// upper bound inclusive; both endpoints are exact.
pub fn compute(
    prices: &[f64],
    level_count: usize,
    method: BoundMethod,
) -> Result<GridLevels, GridError> {
    if level_count < 2 {
        return Err(GridError::InvalidLevelCount(level_count));
    }

    let (min, max) = match method {
        BoundMethod::Percentile => {
            require_samples(prices, 2)?;
            let mut data = Data::new(prices.to_vec());
            (data.percentile(5), data.percentile(95))
        }
        BoundMethod::StdDev { k } => {
            require_samples(prices, 2)?;
            let mean = prices.mean();
            let std_dev = prices.population_std_dev();
            (mean - k * std_dev, mean + k * std_dev)
        }
        BoundMethod::Bollinger { n, k } => {
            require_samples(prices, n)?;
            let recent = &prices[prices.len() - n..];
            let mean = recent.mean();
            let std_dev = recent.population_std_dev();
            (mean - k * std_dev, mean + k * std_dev)
        }
    };

    let levels = linspace(min, max, level_count);

    tracing::debug!(
        "Grid calculated via {:?}: min={:.2}, max={:.2}, levels={}",
        method,
        min,
        max,
        levels.len()
    );

    Ok(GridLevels { levels, min, max })
}

fn require_samples(prices: &[f64], need: usize) -> Result<(), GridError> {
    // A degenerate lower bound still needs two points for any spread at all
    let need = need.max(2);
    if prices.len() < need {
        return Err(GridError::InsufficientData {
            got: prices.len(),
            need,
        });
    }
    Ok(())
}

/// `count` equally spaced values from `start` to `end` inclusive
fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    let step = (end - start) / (count - 1) as f64;
    let mut levels: Vec<f64> = (0..count).map(|i| start + step * i as f64).collect();
    // Pin the endpoints so accumulated float error cannot shift them
    levels[0] = start;
    levels[count - 1] = end;
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_prices() -> Vec<f64> {
        (0..100).map(|i| 100.0 + (i % 10) as f64).collect()
    }

    #[test]
    fn test_level_count_and_bounds_exact() {
        for count in [2, 3, 5, 20, 101] {
            let grid = compute(&sample_prices(), count, BoundMethod::Percentile).unwrap();
            assert_eq!(grid.levels.len(), count);
            assert_eq!(grid.levels[0], grid.min);
            assert_eq!(*grid.levels.last().unwrap(), grid.max);
        }
    }

    #[test]
    fn test_levels_non_decreasing() {
        let grid = compute(&sample_prices(), 20, BoundMethod::Percentile).unwrap();
        for pair in grid.levels.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn test_insufficient_data() {
        assert!(matches!(
            compute(&[100.0], 5, BoundMethod::Percentile),
            Err(GridError::InsufficientData { got: 1, need: 2 })
        ));
        assert!(matches!(
            compute(&[], 5, BoundMethod::StdDev { k: 2.0 }),
            Err(GridError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_invalid_level_count() {
        assert!(matches!(
            compute(&sample_prices(), 1, BoundMethod::Percentile),
            Err(GridError::InvalidLevelCount(1))
        ));
    }

    #[test]
    fn test_std_dev_bounds_symmetric_around_mean() {
        let prices = vec![90.0, 100.0, 110.0];
        let grid = compute(&prices, 5, BoundMethod::StdDev { k: 2.0 }).unwrap();
        let mean = 100.0;
        assert_relative_eq!(mean - grid.min, grid.max - mean, epsilon = 1e-9);
    }

    #[test]
    fn test_std_dev_uses_population_sigma() {
        // Population σ of [90, 100, 110] is sqrt(200/3), not sqrt(100)
        let prices = vec![90.0, 100.0, 110.0];
        let grid = compute(&prices, 3, BoundMethod::StdDev { k: 1.0 }).unwrap();
        let sigma = (200.0_f64 / 3.0).sqrt();
        assert_relative_eq!(grid.max, 100.0 + sigma, epsilon = 1e-9);
    }

    #[test]
    fn test_bollinger_uses_recent_window_only() {
        // Old prices near 10, last 20 near 100: bounds must reflect the
        // recent regime, not the full sample
        let mut prices: Vec<f64> = (0..80).map(|i| 10.0 + (i % 3) as f64).collect();
        prices.extend((0..20).map(|i| 100.0 + (i % 3) as f64));

        let grid = compute(&prices, 10, BoundMethod::Bollinger { n: 20, k: 2.0 }).unwrap();
        assert!(grid.min > 90.0, "lower bound {} ignores the old regime", grid.min);
    }

    #[test]
    fn test_bollinger_requires_n_points() {
        let prices: Vec<f64> = (0..19).map(|i| 100.0 + i as f64).collect();
        assert!(matches!(
            compute(&prices, 10, BoundMethod::Bollinger { n: 20, k: 2.0 }),
            Err(GridError::InsufficientData { got: 19, need: 20 })
        ));
    }

    #[test]
    fn test_percentile_resists_outliers() {
        let mut prices: Vec<f64> = (0..99).map(|i| 100.0 + (i % 10) as f64).collect();
        prices.push(10_000.0);

        let grid = compute(&prices, 10, BoundMethod::Percentile).unwrap();
        assert!(grid.max < 200.0, "95th percentile bound {} chased the outlier", grid.max);
    }

    #[test]
    fn test_bracket() {
        let grid = GridLevels {
            levels: vec![90.0, 100.0, 110.0, 120.0],
            min: 90.0,
            max: 120.0,
        };

        assert_eq!(grid.bracket(95.0), Some((90.0, 100.0)));
        assert_eq!(grid.bracket(119.0), Some((110.0, 120.0)));
        // Exactly on a level: zero-width bracket
        assert_eq!(grid.bracket(100.0), Some((100.0, 100.0)));
        // Endpoints
        assert_eq!(grid.bracket(90.0), Some((90.0, 90.0)));
        assert_eq!(grid.bracket(120.0), Some((120.0, 120.0)));
        // Out of range
        assert_eq!(grid.bracket(89.99), None);
        assert_eq!(grid.bracket(120.01), None);
    }
}
