use super::fund::FundCode;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Ticker used for a fund's uninvested cash position.
pub const CASH_TICKER: &str = "UNINVESTED_CASH";

/// Name paired with [`CASH_TICKER`].
pub const CASH_NAME: &str = "Uninvested Cash";

/// One position of one fund on one date.
///
/// `(date, fund, ticker)` is the natural key. `weight` is a fraction of total
/// fund assets, so a complete snapshot sums to roughly 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingRow {
    pub date: NaiveDate,
    pub fund: FundCode,
    pub ticker: String,
    pub name: String,
    pub shares: f64,
    pub market_value: f64,
    pub weight: f64,
}

impl HoldingRow {
    pub fn key(&self) -> (NaiveDate, FundCode, &str) {
        (self.date, self.fund, self.ticker.as_str())
    }

    pub fn is_cash(&self) -> bool {
        self.ticker == CASH_TICKER
    }
}

/// Sum of weights across a set of rows.
pub fn weight_sum(rows: &[HoldingRow]) -> f64 {
    rows.iter().map(|r| r.weight).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ticker: &str, weight: f64) -> HoldingRow {
        HoldingRow {
            date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            fund: FundCode::Yyy,
            ticker: ticker.into(),
            name: ticker.into(),
            shares: 1.0,
            market_value: 1.0,
            weight,
        }
    }

    #[test]
    fn cash_row_detected_by_ticker() {
        assert!(row(CASH_TICKER, 0.1).is_cash());
        assert!(!row("PDI", 0.1).is_cash());
    }

    #[test]
    fn weight_sum_adds_all_rows() {
        let rows = vec![row("A", 0.25), row("B", 0.75)];
        assert!((weight_sum(&rows) - 1.0).abs() < 1e-12);
    }
}
