//! CLI subcommand implementations

pub mod backtest;
pub mod download;
pub mod live;
pub mod sweep;

use anyhow::{Context, Result};

/// Parse a YYYY-MM-DD date into a millisecond epoch at UTC midnight
pub(crate) fn parse_date_ms(s: &str) -> Result<i64> {
    let date = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))?;
    let midnight = date.and_hms_opt(0, 0, 0).context("Invalid midnight time")?;
    Ok(midnight.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_ms() {
        assert_eq!(parse_date_ms("1970-01-02").unwrap(), 86_400_000);
        assert!(parse_date_ms("not-a-date").is_err());
        assert!(parse_date_ms("2024-13-01").is_err());
    }
}
