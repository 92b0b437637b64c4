//! Normalization of raw payloads into canonical holding rows.
//!
//! Each source names its columns differently; they are matched by normalized
//! name against an ordered candidate list. Rows that cannot be salvaged are
//! dropped with a [`NormalizationWarning`] instead of failing the batch.

use super::number::parse_number;
use super::provider::RawPayload;
use super::table::RawTable;
use crate::domain::{weight_sum, FundCode, HoldingRow, CASH_NAME, CASH_TICKER};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

const TICKER_COLUMNS: [&str; 4] = ["ticker", "symbol", "holdingticker", "stockticker"];
const TICKER_FALLBACK_COLUMNS: [&str; 1] = ["cusip"];
const NAME_COLUMNS: [&str; 6] = [
    "name",
    "issuername",
    "holding",
    "holdingname",
    "security",
    "securityname",
];
const NAME_FALLBACK_COLUMNS: [&str; 1] = ["securitytypename"];
const SHARES_COLUMNS: [&str; 4] = ["shares", "units", "shs", "sharesparvalue"];
const MARKET_VALUE_COLUMNS: [&str; 3] = ["marketvalue", "marketvaluebase", "marketvalueusd"];
const WEIGHT_COLUMNS: [&str; 9] = [
    "weight",
    "weighting",
    "weightings",
    "percentofnav",
    "weightofnav",
    "percentofnetassets",
    "percentageoftotalnetassets",
    "pctofnav",
    "percentmarketvalue",
];
const ACCOUNT_COLUMNS: [&str; 3] = ["account", "accountticker", "fundticker"];
const AS_OF_COLUMNS: [&str; 3] = ["date", "asofdate", "asof"];

/// Cell values that mean "no value".
const MISSING_MARKERS: [&str; 8] = ["", "NAN", "NONE", "NULL", "-", "--", "N/A", "NA"];

/// Upstream identifiers for their own uninvested-cash placeholder.
const CASH_PLACEHOLDER_TICKER: &str = "BNYMLEND";
const CASH_PLACEHOLDER_NAME: &str = "UNINVESTIBLE CASH";

const UNSPECIFIED_NAME: &str = "Unspecified Position";

/// Parsed weights summing above this are percentages, not fractions.
const PERCENT_SCALE_THRESHOLD: f64 = 1.5;

/// Allowed drift of a snapshot's weight sum from 1 before a warning is logged.
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.05;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<&'static str>),

    #[error("no usable holdings for {fund} after normalization")]
    Empty { fund: FundCode },
}

/// A source row that was dropped. Non-fatal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizationWarning {
    /// 1-based data row (header excluded).
    pub row: usize,
    pub ticker: Option<String>,
    pub reason: String,
}

impl fmt::Display for NormalizationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ticker {
            Some(t) => write!(f, "row {} ({t}): {}", self.row, self.reason),
            None => write!(f, "row {}: {}", self.row, self.reason),
        }
    }
}

/// Output of one normalization call.
#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    pub fund: FundCode,
    pub date: NaiveDate,
    pub rows: Vec<HoldingRow>,
    pub warnings: Vec<NormalizationWarning>,
}

impl NormalizedBatch {
    pub fn weight_sum(&self) -> f64 {
        weight_sum(&self.rows)
    }

    /// Whether the weight sum is within [`WEIGHT_SUM_TOLERANCE`] of 1.
    pub fn weights_reconcile(&self) -> bool {
        (self.weight_sum() - 1.0).abs() <= WEIGHT_SUM_TOLERANCE
    }

    /// BLAKE3 hash over the rows in ticker order; identical snapshots hash equal.
    pub fn content_hash(&self) -> String {
        let mut rows: Vec<&HoldingRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        let bytes = serde_json::to_vec(&rows).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}

/// Resolved column positions for one table.
#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    ticker: usize,
    ticker_fallback: Option<usize>,
    name: usize,
    name_fallback: Option<usize>,
    shares: usize,
    market_value: usize,
    weight: Option<usize>,
}

impl ColumnMap {
    fn resolve(table: &RawTable) -> Result<Self, NormalizeError> {
        let ticker = table.find_column(&TICKER_COLUMNS);
        let name = table.find_column(&NAME_COLUMNS);
        let shares = table.find_column(&SHARES_COLUMNS);
        let market_value = table.find_column(&MARKET_VALUE_COLUMNS);

        let mut missing = Vec::new();
        if ticker.is_none() {
            missing.push("ticker");
        }
        if name.is_none() {
            missing.push("name");
        }
        if shares.is_none() {
            missing.push("shares");
        }
        if market_value.is_none() {
            missing.push("market_value");
        }

        match (ticker, name, shares, market_value) {
            (Some(ticker), Some(name), Some(shares), Some(market_value)) => Ok(Self {
                ticker,
                ticker_fallback: table.find_column(&TICKER_FALLBACK_COLUMNS),
                name,
                name_fallback: table.find_column(&NAME_FALLBACK_COLUMNS),
                shares,
                market_value,
                weight: table.find_column(&WEIGHT_COLUMNS).or_else(|| {
                    table.find_column_by(|c| {
                        c.contains("weight") && !c.contains("average") && !c.contains("avg")
                    })
                }),
            }),
            _ => Err(NormalizeError::MissingColumns(missing)),
        }
    }
}

/// Row after field extraction, before weight fill and de-duplication.
struct Candidate {
    row: usize,
    ticker: String,
    name: String,
    shares: f64,
    market_value: f64,
    weight: Option<f64>,
}

/// Normalizer for raw holdings payloads.
pub struct Normalizer;

impl Normalizer {
    /// Normalize a payload into canonical rows for `fund`.
    ///
    /// The snapshot date is `as_of` when given, else the date the payload
    /// publishes, else today.
    pub fn normalize(
        fund: FundCode,
        payload: &RawPayload,
        as_of: Option<NaiveDate>,
    ) -> Result<NormalizedBatch, NormalizeError> {
        let mut table = RawTable::from_payload(payload)?;
        retain_fund_rows(&mut table, fund);

        let date = as_of
            .or_else(|| table_as_of(&table))
            .unwrap_or_else(|| chrono::Local::now().date_naive());

        let columns = ColumnMap::resolve(&table)?;
        let mut warnings = std::mem::take(&mut table.skipped);

        let mut candidates = Vec::with_capacity(table.len());
        for i in 0..table.len() {
            match extract_row(&table, &columns, i) {
                Ok(candidate) => candidates.push(candidate),
                Err(w) => warnings.push(w),
            }
        }

        let rows = finish_rows(fund, date, candidates, &mut warnings);

        for w in &warnings {
            warn!(%fund, %date, "dropped holding {w}");
        }
        if rows.is_empty() {
            return Err(NormalizeError::Empty { fund });
        }

        let batch = NormalizedBatch {
            fund,
            date,
            rows,
            warnings,
        };
        if !batch.weights_reconcile() {
            warn!(
                %fund,
                %date,
                weight_sum = batch.weight_sum(),
                "snapshot weights do not sum to 1"
            );
        }
        Ok(batch)
    }

    /// Snapshot date published inside the payload, if any.
    pub fn payload_as_of(fund: FundCode, payload: &RawPayload) -> Option<NaiveDate> {
        let mut table = RawTable::from_payload(payload).ok()?;
        retain_fund_rows(&mut table, fund);
        table_as_of(&table)
    }
}

/// Keep only rows belonging to `fund` when the table covers several funds.
fn retain_fund_rows(table: &mut RawTable, fund: FundCode) {
    if let Some(col) = table.find_column(&ACCOUNT_COLUMNS) {
        table.retain_rows(|row| {
            row.get(col)
                .and_then(|c| c.as_deref())
                .is_some_and(|v| v.trim().eq_ignore_ascii_case(fund.as_str()))
        });
    }
}

fn table_as_of(table: &RawTable) -> Option<NaiveDate> {
    if let Some(col) = table.find_column(&AS_OF_COLUMNS) {
        let found = (0..table.len())
            .filter_map(|i| table.cell(i, col))
            .find_map(parse_date_text);
        if found.is_some() {
            return found;
        }
    }
    table.as_of_hint.as_deref().and_then(parse_date_text)
}

/// Parse the date formats the sources publish (ISO, US, compact, ISO datetime).
///
/// Slash dates pick their format from the shape of the year field, since
/// `%Y` would read `03/03/25` as year 25.
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    let date_part = text.split(['T', ' ']).next().unwrap_or(text);
    let parts: Vec<&str> = date_part.split('/').collect();
    let formats: &[&str] = match parts.as_slice() {
        [year, _, _] if year.len() == 4 => &["%Y/%m/%d"],
        [_, _, year] if year.len() == 4 => &["%m/%d/%Y"],
        [_, _, year] if year.len() == 2 => &["%m/%d/%y"],
        [_, _, _] => &[],
        _ => &["%Y-%m-%d", "%Y%m%d"],
    };
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

fn present(text: Option<&str>) -> Option<String> {
    let trimmed = text?.trim();
    let upper = trimmed.to_ascii_uppercase();
    (!MISSING_MARKERS.contains(&upper.as_str())).then(|| trimmed.to_string())
}

fn extract_row(
    table: &RawTable,
    columns: &ColumnMap,
    i: usize,
) -> Result<Candidate, NormalizationWarning> {
    let row = table.source_row(i);
    let cell = |col: usize| table.cell(i, col);
    let fallback = |col: Option<usize>| col.and_then(|c| present(cell(c)));

    let ticker = present(cell(columns.ticker))
        .or_else(|| fallback(columns.ticker_fallback))
        .map(|t| t.to_ascii_uppercase());
    let name = present(cell(columns.name));

    let dropped = |ticker: Option<&str>, reason: String| NormalizationWarning {
        row,
        ticker: ticker.map(str::to_string),
        reason,
    };

    if ticker.as_deref() == Some("TOTAL") {
        return Err(dropped(ticker.as_deref(), "summary row".into()));
    }

    let market_value_text = cell(columns.market_value);
    let market_value = match market_value_text.and_then(parse_number) {
        Some(v) => v,
        None => {
            return Err(dropped(
                ticker.as_deref(),
                format!(
                    "unparsable market value {:?}",
                    market_value_text.unwrap_or_default()
                ),
            ))
        }
    };

    let (ticker, name) = match ticker {
        Some(t) => {
            let name = name
                .or_else(|| fallback(columns.name_fallback))
                .unwrap_or_else(|| UNSPECIFIED_NAME.to_string());
            if t == CASH_PLACEHOLDER_TICKER || name.eq_ignore_ascii_case(CASH_PLACEHOLDER_NAME) {
                (CASH_TICKER.to_string(), CASH_NAME.to_string())
            } else {
                (t, name)
            }
        }
        None if market_value != 0.0 => (CASH_TICKER.to_string(), CASH_NAME.to_string()),
        None => {
            return Err(dropped(None, "no ticker and no market value".into()));
        }
    };

    let shares_text = cell(columns.shares);
    let shares = match shares_text.and_then(parse_number) {
        Some(v) => v,
        // Cash is held 1:1 with its value when the source leaves shares blank.
        None if ticker == CASH_TICKER && present(shares_text).is_none() => market_value,
        None => {
            return Err(dropped(
                Some(ticker.as_str()),
                format!("unparsable shares {:?}", shares_text.unwrap_or_default()),
            ))
        }
    };

    let weight = columns.weight.and_then(|c| cell(c)).and_then(parse_number);

    Ok(Candidate {
        row,
        ticker,
        name,
        shares,
        market_value,
        weight,
    })
}

/// Scale weights to fractions, fill missing ones, merge duplicate tickers.
fn finish_rows(
    fund: FundCode,
    date: NaiveDate,
    mut candidates: Vec<Candidate>,
    warnings: &mut Vec<NormalizationWarning>,
) -> Vec<HoldingRow> {
    let parsed_sum: f64 = candidates.iter().filter_map(|c| c.weight).sum();
    if parsed_sum > PERCENT_SCALE_THRESHOLD {
        for c in &mut candidates {
            c.weight = c.weight.map(|w| w / 100.0);
        }
    }

    let total_market_value: f64 = candidates.iter().map(|c| c.market_value).sum();

    let mut rows: Vec<HoldingRow> = Vec::with_capacity(candidates.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for c in candidates {
        let weight = match c.weight {
            Some(w) => w,
            None if total_market_value != 0.0 => c.market_value / total_market_value,
            None => {
                warnings.push(NormalizationWarning {
                    row: c.row,
                    ticker: Some(c.ticker),
                    reason: "no weight and no market value total to derive it from".into(),
                });
                continue;
            }
        };

        match index.get(&c.ticker) {
            Some(&pos) => {
                let existing = &mut rows[pos];
                existing.shares += c.shares;
                existing.market_value += c.market_value;
                existing.weight += weight;
            }
            None => {
                index.insert(c.ticker.clone(), rows.len());
                rows.push(HoldingRow {
                    date,
                    fund,
                    ticker: c.ticker,
                    name: c.name,
                    shares: c.shares,
                    market_value: c.market_value,
                    weight,
                });
            }
        }
    }

    rows
}
