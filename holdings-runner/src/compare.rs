//! Snapshot comparison: what a fund added, removed and changed between two dates.

use chrono::NaiveDate;
use holdings_core::data::{HoldingStore, StoreError};
use holdings_core::{FundCode, HoldingRow};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;

/// Relative tolerance for treating two stored values as equal.
pub const VALUE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("no holdings stored for {fund} on {date}")]
    NoData { fund: FundCode, date: NaiveDate },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A position held on both dates whose figures moved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangedPosition {
    pub ticker: String,
    /// Name on the later date.
    pub name: String,
    pub shares_before: f64,
    pub shares_after: f64,
    pub shares_delta: f64,
    pub market_value_before: f64,
    pub market_value_after: f64,
    pub market_value_delta: f64,
    pub weight_before: f64,
    pub weight_after: f64,
    pub weight_delta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComparisonTotals {
    pub market_value_before: f64,
    pub market_value_after: f64,
    pub market_value_delta: f64,
    pub positions_before: usize,
    pub positions_after: usize,
    pub positions_delta: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub fund: FundCode,
    pub date_before: NaiveDate,
    pub date_after: NaiveDate,
    /// Held on the later date only, largest market value first.
    pub added: Vec<HoldingRow>,
    /// Held on the earlier date only, largest market value first.
    pub removed: Vec<HoldingRow>,
    /// Held on both, largest market value gain first.
    pub changed: Vec<ChangedPosition>,
    pub totals: ComparisonTotals,
}

impl Comparison {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Compare the stored snapshots of `fund` on `date_before` and `date_after`.
pub fn compare(
    store: &HoldingStore,
    fund: FundCode,
    date_before: NaiveDate,
    date_after: NaiveDate,
) -> Result<Comparison, CompareError> {
    let before = store.rows_for(fund, date_before)?;
    if before.is_empty() {
        return Err(CompareError::NoData {
            fund,
            date: date_before,
        });
    }
    let after = store.rows_for(fund, date_after)?;
    if after.is_empty() {
        return Err(CompareError::NoData {
            fund,
            date: date_after,
        });
    }

    Ok(compare_rows(fund, date_before, &before, date_after, &after))
}

/// Diff two in-memory snapshots of one fund.
pub fn compare_rows(
    fund: FundCode,
    date_before: NaiveDate,
    before: &[HoldingRow],
    date_after: NaiveDate,
    after: &[HoldingRow],
) -> Comparison {
    let before_by_ticker: BTreeMap<&str, &HoldingRow> =
        before.iter().map(|r| (r.ticker.as_str(), r)).collect();
    let after_by_ticker: BTreeMap<&str, &HoldingRow> =
        after.iter().map(|r| (r.ticker.as_str(), r)).collect();

    let mut added: Vec<HoldingRow> = after
        .iter()
        .filter(|r| !before_by_ticker.contains_key(r.ticker.as_str()))
        .cloned()
        .collect();
    let mut removed: Vec<HoldingRow> = before
        .iter()
        .filter(|r| !after_by_ticker.contains_key(r.ticker.as_str()))
        .cloned()
        .collect();

    let mut changed: Vec<ChangedPosition> = after_by_ticker
        .iter()
        .filter_map(|(ticker, new)| {
            let old = before_by_ticker.get(ticker)?;
            let moved = differs(old.shares, new.shares)
                || differs(old.market_value, new.market_value)
                || differs(old.weight, new.weight);
            moved.then(|| ChangedPosition {
                ticker: ticker.to_string(),
                name: new.name.clone(),
                shares_before: old.shares,
                shares_after: new.shares,
                shares_delta: new.shares - old.shares,
                market_value_before: old.market_value,
                market_value_after: new.market_value,
                market_value_delta: new.market_value - old.market_value,
                weight_before: old.weight,
                weight_after: new.weight,
                weight_delta: new.weight - old.weight,
            })
        })
        .collect();

    let by_value = |a: &HoldingRow, b: &HoldingRow| {
        descending(a.market_value, b.market_value).then_with(|| a.ticker.cmp(&b.ticker))
    };
    added.sort_by(by_value);
    removed.sort_by(by_value);
    changed.sort_by(|a, b| {
        descending(a.market_value_delta, b.market_value_delta).then_with(|| a.ticker.cmp(&b.ticker))
    });

    let market_value_before: f64 = before.iter().map(|r| r.market_value).sum();
    let market_value_after: f64 = after.iter().map(|r| r.market_value).sum();
    let totals = ComparisonTotals {
        market_value_before,
        market_value_after,
        market_value_delta: market_value_after - market_value_before,
        positions_before: before.len(),
        positions_after: after.len(),
        positions_delta: after.len() as i64 - before.len() as i64,
    };

    Comparison {
        fund,
        date_before,
        date_after,
        added,
        removed,
        changed,
        totals,
    }
}

/// Whether `a` and `b` differ beyond [`VALUE_TOLERANCE`], scaled by magnitude.
fn differs(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() > VALUE_TOLERANCE * scale
}

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}
