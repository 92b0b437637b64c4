//! Parquet-backed holdings store.
//!
//! All funds and dates live in one file. Writes replace whole
//! `(fund, date)` snapshots:
//!
//! 1. collect the `(fund, date)` pairs present in the batch
//! 2. drop every stored row with one of those pairs
//! 3. append the batch and write to `{file}.tmp`
//! 4. rename the temp file into place
//!
//! A position that disappears upstream therefore disappears from the stored
//! snapshot too, and re-ingesting the same data is a no-op.

use super::schema::{HoldingSchema, SchemaError};
use crate::domain::{FundCode, HoldingRow};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error at {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("parquet error: {0}")]
    ParquetError(String),

    #[error("store schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("corrupt store row {row}: {reason}")]
    Corrupt { row: usize, reason: String },

    #[error("refusing to write an empty batch")]
    EmptyBatch,

    #[error("batch contains {ticker} twice for {fund} on {date}")]
    DuplicateKey {
        fund: FundCode,
        date: NaiveDate,
        ticker: String,
    },
}

/// Row selection for [`HoldingStore::query`]. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HoldingFilter {
    pub fund: Option<FundCode>,
    pub date: Option<NaiveDate>,
    /// Inclusive lower bound.
    pub from: Option<NaiveDate>,
    /// Inclusive upper bound.
    pub to: Option<NaiveDate>,
}

impl HoldingFilter {
    pub fn fund(fund: FundCode) -> Self {
        Self {
            fund: Some(fund),
            ..Default::default()
        }
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }
}

/// What an upsert changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    /// Stored rows removed because their snapshot was replaced.
    pub replaced: usize,
    pub inserted: usize,
    /// Rows in the store after the write.
    pub total: usize,
}

/// Aggregates of one fund snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SnapshotTotals {
    pub market_value: f64,
    pub positions: usize,
}

pub struct HoldingStore {
    path: PathBuf,
}

impl HoldingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Insert or replace the snapshots contained in `rows`.
    pub fn upsert(&self, rows: &[HoldingRow]) -> Result<UpsertReport, StoreError> {
        if rows.is_empty() {
            return Err(StoreError::EmptyBatch);
        }

        let mut keys = HashSet::with_capacity(rows.len());
        for row in rows {
            if !keys.insert(row.key()) {
                return Err(StoreError::DuplicateKey {
                    fund: row.fund,
                    date: row.date,
                    ticker: row.ticker.clone(),
                });
            }
        }

        let snapshots: HashSet<(FundCode, NaiveDate)> =
            rows.iter().map(|r| (r.fund, r.date)).collect();

        let existing = self.load_all()?;
        let before = existing.len();
        let mut merged: Vec<HoldingRow> = existing
            .into_iter()
            .filter(|r| !snapshots.contains(&(r.fund, r.date)))
            .collect();
        let replaced = before - merged.len();

        merged.extend(rows.iter().cloned());
        sort_rows(&mut merged);
        self.write_all(&merged)?;

        let report = UpsertReport {
            replaced,
            inserted: rows.len(),
            total: merged.len(),
        };
        info!(
            path = %self.path.display(),
            snapshots = snapshots.len(),
            replaced = report.replaced,
            inserted = report.inserted,
            "store updated"
        );
        Ok(report)
    }

    /// Rows matching `filter`, sorted by date, fund, ticker.
    pub fn query(&self, filter: &HoldingFilter) -> Result<Vec<HoldingRow>, StoreError> {
        let Some(df) = self.load_frame()? else {
            return Ok(Vec::new());
        };

        let mut lazy = df.lazy();
        if let Some(fund) = filter.fund {
            lazy = lazy.filter(col("fund").eq(lit(fund.as_str())));
        }
        if let Some(date) = filter.date {
            lazy = lazy.filter(date_days().eq(lit(days_since_epoch(date))));
        }
        if let Some(from) = filter.from {
            lazy = lazy.filter(date_days().gt_eq(lit(days_since_epoch(from))));
        }
        if let Some(to) = filter.to {
            lazy = lazy.filter(date_days().lt_eq(lit(days_since_epoch(to))));
        }
        let filtered = lazy
            .collect()
            .map_err(|e| StoreError::ParquetError(format!("filter: {e}")))?;

        let mut rows = dataframe_to_rows(&filtered)?;
        sort_rows(&mut rows);
        Ok(rows)
    }

    /// Every stored row.
    pub fn load_all(&self) -> Result<Vec<HoldingRow>, StoreError> {
        match self.load_frame()? {
            Some(df) => dataframe_to_rows(&df),
            None => Ok(Vec::new()),
        }
    }

    pub fn rows_for(&self, fund: FundCode, date: NaiveDate) -> Result<Vec<HoldingRow>, StoreError> {
        self.query(&HoldingFilter::fund(fund).on(date))
    }

    /// Distinct snapshot dates for `fund`, ascending.
    pub fn available_dates(&self, fund: FundCode) -> Result<Vec<NaiveDate>, StoreError> {
        let dates: BTreeSet<NaiveDate> = self
            .query(&HoldingFilter::fund(fund))?
            .into_iter()
            .map(|r| r.date)
            .collect();
        Ok(dates.into_iter().collect())
    }

    /// Funds with at least one stored row.
    pub fn available_funds(&self) -> Result<Vec<FundCode>, StoreError> {
        let funds: BTreeSet<FundCode> = self.load_all()?.into_iter().map(|r| r.fund).collect();
        Ok(funds.into_iter().collect())
    }

    pub fn totals_for(
        &self,
        fund: FundCode,
        date: NaiveDate,
    ) -> Result<SnapshotTotals, StoreError> {
        let rows = self.rows_for(fund, date)?;
        Ok(SnapshotTotals {
            market_value: rows.iter().map(|r| r.market_value).sum(),
            positions: rows.len(),
        })
    }

    /// Read and validate the store file. `None` when it does not exist yet.
    fn load_frame(&self) -> Result<Option<DataFrame>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let file = fs::File::open(&self.path).map_err(|e| self.io_error(e))?;
        let mut df = ParquetReader::new(file)
            .finish()
            .map_err(|e| StoreError::ParquetError(format!("read: {e}")))?;

        if HoldingSchema::fill_legacy_fund(&mut df)? {
            debug!(
                path = %self.path.display(),
                fund = %FundCode::LEGACY_DEFAULT,
                "store predates the fund column"
            );
        }
        HoldingSchema::validate(&df)?;
        Ok(Some(df))
    }

    fn write_all(&self, rows: &[HoldingRow]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let df = rows_to_dataframe(rows)?;
        let tmp_path = self.path.with_extension("parquet.tmp");
        write_parquet(&df, &tmp_path)?;

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            self.io_error(e)
        })
    }

    fn io_error(&self, e: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

fn sort_rows(rows: &mut [HoldingRow]) {
    rows.sort_by(|a, b| {
        (a.date, a.fund, a.ticker.as_str()).cmp(&(b.date, b.fund, b.ticker.as_str()))
    });
}

/// `NaiveDate::default()` is 1970-01-01.
fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

/// Inverse of [`days_since_epoch`]; `None` outside chrono's date range.
fn date_from_days(days: i32) -> Option<NaiveDate> {
    epoch().checked_add_signed(chrono::Duration::days(i64::from(days)))
}

fn date_days() -> Expr {
    col("date").cast(DataType::Int32)
}

// ── Parquet I/O helpers ──────────────────────────────────────────

fn rows_to_dataframe(rows: &[HoldingRow]) -> Result<DataFrame, StoreError> {
    let dates: Vec<i32> = rows.iter().map(|r| days_since_epoch(r.date)).collect();
    let funds: Vec<&str> = rows.iter().map(|r| r.fund.as_str()).collect();
    let tickers: Vec<&str> = rows.iter().map(|r| r.ticker.as_str()).collect();
    let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
    let shares: Vec<f64> = rows.iter().map(|r| r.shares).collect();
    let market_values: Vec<f64> = rows.iter().map(|r| r.market_value).collect();
    let weights: Vec<f64> = rows.iter().map(|r| r.weight).collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| StoreError::ParquetError(format!("date cast: {e}")))?,
        Column::new("fund".into(), funds),
        Column::new("ticker".into(), tickers),
        Column::new("name".into(), names),
        Column::new("shares".into(), shares),
        Column::new("market_value".into(), market_values),
        Column::new("weight".into(), weights),
    ])
    .map_err(|e| StoreError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), StoreError> {
    let file = fs::File::create(path).map_err(|e| StoreError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| StoreError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

fn dataframe_to_rows(df: &DataFrame) -> Result<Vec<HoldingRow>, StoreError> {
    let column = |name: &str| {
        df.column(name)
            .map_err(|e| StoreError::ParquetError(format!("column read: {e}")))
    };
    let type_err = |name: &'static str| {
        move |e: PolarsError| StoreError::ParquetError(format!("{name} column type: {e}"))
    };

    let date_ca = column("date")?.date().map_err(type_err("date"))?;
    let fund_ca = column("fund")?.str().map_err(type_err("fund"))?;
    let ticker_ca = column("ticker")?.str().map_err(type_err("ticker"))?;
    let name_ca = column("name")?.str().map_err(type_err("name"))?;
    let shares_ca = column("shares")?.f64().map_err(type_err("shares"))?;
    let mv_ca = column("market_value")?.f64().map_err(type_err("market_value"))?;
    let weight_ca = column("weight")?.f64().map_err(type_err("weight"))?;

    let corrupt = |row: usize, reason: &str| StoreError::Corrupt {
        row,
        reason: reason.to_string(),
    };

    let n = df.height();
    let mut rows = Vec::with_capacity(n);
    for i in 0..n {
        let days = date_ca.get(i).ok_or_else(|| corrupt(i, "null date"))?;
        let fund_text = fund_ca.get(i).ok_or_else(|| corrupt(i, "null fund"))?;
        let fund: FundCode = fund_text
            .parse()
            .map_err(|e: crate::domain::UnknownFund| corrupt(i, &e.to_string()))?;
        let ticker = ticker_ca.get(i).ok_or_else(|| corrupt(i, "null ticker"))?;
        let date = date_from_days(days).ok_or_else(|| corrupt(i, "date out of range"))?;

        rows.push(HoldingRow {
            date,
            fund,
            ticker: ticker.to_string(),
            name: name_ca.get(i).unwrap_or_default().to_string(),
            shares: shares_ca.get(i).unwrap_or(f64::NAN),
            market_value: mv_ca.get(i).unwrap_or(f64::NAN),
            weight: weight_ca.get(i).unwrap_or(f64::NAN),
        });
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    fn row(fund: FundCode, date: NaiveDate, ticker: &str, value: f64) -> HoldingRow {
        HoldingRow {
            date,
            fund,
            ticker: ticker.into(),
            name: format!("{ticker} Fund"),
            shares: value / 10.0,
            market_value: value,
            weight: 0.5,
        }
    }

    fn store_in(dir: &TempDir) -> HoldingStore {
        HoldingStore::new(dir.path().join("holdings.parquet"))
    }

    #[test]
    fn absent_file_is_an_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(!store.exists());
        assert!(store.load_all().unwrap().is_empty());
        assert!(store.rows_for(FundCode::Yyy, d(3)).unwrap().is_empty());
        assert!(store.available_dates(FundCode::Yyy).unwrap().is_empty());
        assert!(store.available_funds().unwrap().is_empty());
        assert_eq!(
            store.totals_for(FundCode::Yyy, d(3)).unwrap(),
            SnapshotTotals {
                market_value: 0.0,
                positions: 0
            }
        );
    }

    #[test]
    fn write_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let rows = vec![
            row(FundCode::Yyy, d(3), "PDI", 200.0),
            row(FundCode::Yyy, d(3), "UTF", 100.0),
        ];

        let report = store.upsert(&rows).unwrap();
        assert_eq!(
            report,
            UpsertReport {
                replaced: 0,
                inserted: 2,
                total: 2
            }
        );
        assert_eq!(store.load_all().unwrap(), rows);
        assert!(!dir.path().join("holdings.parquet.tmp").exists());
    }

    #[test]
    fn upsert_replaces_whole_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store
            .upsert(&[
                row(FundCode::Yyy, d(3), "PDI", 200.0),
                row(FundCode::Yyy, d(3), "UTF", 100.0),
            ])
            .unwrap();

        let report = store.upsert(&[row(FundCode::Yyy, d(3), "PDI", 250.0)]).unwrap();
        assert_eq!(report.replaced, 2);
        assert_eq!(report.total, 1);

        let rows = store.rows_for(FundCode::Yyy, d(3)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].market_value, 250.0);
    }

    #[test]
    fn upsert_leaves_other_snapshots_alone() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.upsert(&[row(FundCode::Yyy, d(3), "PDI", 1.0)]).unwrap();
        store.upsert(&[row(FundCode::Pcef, d(3), "PDI", 2.0)]).unwrap();
        store.upsert(&[row(FundCode::Yyy, d(4), "PDI", 3.0)]).unwrap();
        store.upsert(&[row(FundCode::Yyy, d(4), "UTF", 4.0)]).unwrap();

        assert_eq!(store.load_all().unwrap().len(), 3);
        assert_eq!(store.available_dates(FundCode::Yyy).unwrap(), vec![d(3), d(4)]);
        assert_eq!(store.available_dates(FundCode::Pcef).unwrap(), vec![d(3)]);
        assert_eq!(
            store.available_funds().unwrap(),
            vec![FundCode::Pcef, FundCode::Yyy]
        );
        assert_eq!(store.rows_for(FundCode::Yyy, d(4)).unwrap()[0].ticker, "UTF");
    }

    #[test]
    fn repeated_upsert_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let rows = vec![
            row(FundCode::Pcef, d(5), "BST", 10.0),
            row(FundCode::Pcef, d(5), "PDI", 20.0),
        ];
        store.upsert(&rows).unwrap();
        let first = store.load_all().unwrap();
        store.upsert(&rows).unwrap();
        assert_eq!(store.load_all().unwrap(), first);
    }

    #[test]
    fn empty_and_duplicate_batches_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(matches!(store.upsert(&[]), Err(StoreError::EmptyBatch)));

        let dup = row(FundCode::Yyy, d(3), "PDI", 1.0);
        assert!(matches!(
            store.upsert(&[dup.clone(), dup]),
            Err(StoreError::DuplicateKey { .. })
        ));
        assert!(!store.exists());
    }

    #[test]
    fn query_filters_by_range() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let rows: Vec<HoldingRow> = (3..=7)
            .map(|day| row(FundCode::Yyy, d(day), "PDI", day as f64))
            .collect();
        store.upsert(&rows).unwrap();

        let window = store
            .query(&HoldingFilter::fund(FundCode::Yyy).between(d(4), d(6)))
            .unwrap();
        let dates: Vec<NaiveDate> = window.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![d(4), d(5), d(6)]);

        let everything = store.query(&HoldingFilter::default()).unwrap();
        assert_eq!(everything.len(), 5);
    }

    #[test]
    fn totals_sum_market_value() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store
            .upsert(&[
                row(FundCode::Yyy, d(3), "PDI", 200.0),
                row(FundCode::Yyy, d(3), "UTF", 100.0),
            ])
            .unwrap();
        let totals = store.totals_for(FundCode::Yyy, d(3)).unwrap();
        assert_eq!(totals.market_value, 300.0);
        assert_eq!(totals.positions, 2);
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = TempDir::new().unwrap();
        let store = HoldingStore::new(dir.path().join("nested/deeper/holdings.parquet"));
        store.upsert(&[row(FundCode::Yyy, d(3), "PDI", 1.0)]).unwrap();
        assert!(store.exists());
    }

    #[test]
    fn legacy_file_without_fund_column_loads_as_default_fund() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.parquet");
        let mut df = rows_to_dataframe(&[row(FundCode::Yyy, d(3), "PDI", 1.0)]).unwrap();
        df.drop_in_place("fund").unwrap();
        write_parquet(&df, &path).unwrap();

        let store = HoldingStore::new(&path);
        let rows = store.load_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fund, FundCode::LEGACY_DEFAULT);

        store.upsert(&[row(FundCode::Pcef, d(3), "BST", 2.0)]).unwrap();
        assert_eq!(store.load_all().unwrap().len(), 2);
    }

    #[test]
    fn out_of_range_dates_are_corrupt_not_a_panic() {
        assert_eq!(date_from_days(days_since_epoch(d(3))), Some(d(3)));
        assert_eq!(date_from_days(i32::MAX), None);

        let mut df = rows_to_dataframe(&[row(FundCode::Yyy, d(3), "PDI", 1.0)]).unwrap();
        let far = Column::new("date".into(), [i32::MAX])
            .cast(&DataType::Date)
            .unwrap();
        df.with_column(far).unwrap();

        let err = dataframe_to_rows(&df).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { row: 0, .. }));
    }

    #[test]
    fn file_with_wrong_schema_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.parquet");
        let df = DataFrame::new(vec![Column::new("ticker".into(), &["PDI"])]).unwrap();
        write_parquet(&df, &path).unwrap();

        let err = HoldingStore::new(&path).load_all().unwrap_err();
        assert!(matches!(err, StoreError::Schema(SchemaError::MissingColumn(_))));
    }
}
