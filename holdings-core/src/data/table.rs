//! Flattening of raw payloads into a string table.
//!
//! CSV feeds and JSON holdings arrays are both reduced to named columns of
//! optional string cells, so one column-mapping pass can handle every source.

use super::normalize::{NormalizationWarning, NormalizeError};
use super::provider::RawPayload;
use serde_json::Value;

/// Keys that carry the snapshot date at the top level of a JSON payload.
const JSON_AS_OF_KEYS: [&str; 3] = ["effectiveDate", "asOfDate", "date"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    /// 1-based position of each row in the source payload.
    pub source_rows: Vec<usize>,
    /// Snapshot date published outside the rows (JSON `effectiveDate`).
    pub as_of_hint: Option<String>,
    /// Records the reader could not parse.
    pub skipped: Vec<NormalizationWarning>,
}

/// Lower-case a column name and strip everything but ASCII letters and digits.
pub fn normalize_column(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl RawTable {
    pub fn from_payload(payload: &RawPayload) -> Result<Self, NormalizeError> {
        match payload {
            RawPayload::Csv(text) => Self::from_csv(text),
            RawPayload::Json(value) => Self::from_json(value),
        }
    }

    pub fn from_csv(text: &str) -> Result<Self, NormalizeError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.trim_start_matches('\u{feff}').as_bytes());

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| NormalizeError::MalformedPayload(format!("unreadable CSV header: {e}")))?
            .iter()
            .map(|h| h.to_string())
            .collect();
        if columns.iter().all(|c| c.is_empty()) {
            return Err(NormalizeError::MalformedPayload("CSV has no header".into()));
        }

        let mut table = RawTable {
            columns,
            ..Default::default()
        };

        for (idx, record) in reader.records().enumerate() {
            let row_number = idx + 1;
            match record {
                Ok(record) => {
                    let mut cells: Vec<Option<String>> = record
                        .iter()
                        .map(|cell| (!cell.is_empty()).then(|| cell.to_string()))
                        .collect();
                    if cells.iter().all(Option::is_none) {
                        continue;
                    }
                    cells.resize(table.columns.len(), None);
                    table.rows.push(cells);
                    table.source_rows.push(row_number);
                }
                Err(e) => table.skipped.push(NormalizationWarning {
                    row: row_number,
                    ticker: None,
                    reason: format!("CSV parse error: {e}"),
                }),
            }
        }

        Ok(table)
    }

    pub fn from_json(value: &Value) -> Result<Self, NormalizeError> {
        let holdings = match value.get("holdings") {
            Some(Value::Array(items)) if !items.is_empty() => items,
            _ => {
                return Err(NormalizeError::MalformedPayload(
                    "JSON payload has no holdings".into(),
                ))
            }
        };

        let mut columns: Vec<String> = Vec::new();
        for item in holdings {
            if let Value::Object(map) = item {
                for key in map.keys() {
                    if !columns.iter().any(|c| c == key) {
                        columns.push(key.clone());
                    }
                }
            }
        }

        let mut table = RawTable {
            as_of_hint: JSON_AS_OF_KEYS
                .iter()
                .find_map(|k| value.get(*k).and_then(json_cell)),
            ..Default::default()
        };

        for (idx, item) in holdings.iter().enumerate() {
            let Value::Object(map) = item else {
                table.skipped.push(NormalizationWarning {
                    row: idx + 1,
                    ticker: None,
                    reason: "holding entry is not an object".into(),
                });
                continue;
            };
            let cells = columns
                .iter()
                .map(|col| {
                    let cell = map.get(col).and_then(json_cell);
                    if col == "issuerName" {
                        cell.map(|s| decode_html_entities(&s))
                    } else {
                        cell
                    }
                })
                .collect();
            table.rows.push(cells);
            table.source_rows.push(idx + 1);
        }
        table.columns = columns;

        Ok(table)
    }

    /// Index of the first column whose normalized name is in `candidates`,
    /// honouring candidate order.
    pub fn find_column(&self, candidates: &[&str]) -> Option<usize> {
        let normalized: Vec<String> = self.columns.iter().map(|c| normalize_column(c)).collect();
        candidates
            .iter()
            .find_map(|cand| normalized.iter().position(|n| n == cand))
    }

    /// First column whose normalized name satisfies `pred`.
    pub fn find_column_by(&self, pred: impl Fn(&str) -> bool) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| pred(&normalize_column(c)))
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .and_then(|c| c.as_deref())
    }

    /// Source row number of the `row`-th retained row.
    pub fn source_row(&self, row: usize) -> usize {
        self.source_rows.get(row).copied().unwrap_or(row + 1)
    }

    /// Keep the rows matching `keep`, with their source row numbers.
    pub fn retain_rows(&mut self, mut keep: impl FnMut(&[Option<String>]) -> bool) {
        let rows = std::mem::take(&mut self.rows);
        let source_rows = std::mem::take(&mut self.source_rows);
        for (i, row) in rows.into_iter().enumerate() {
            if keep(&row) {
                self.source_rows.push(source_rows.get(i).copied().unwrap_or(i + 1));
                self.rows.push(row);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn json_cell(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Decode the HTML entities the holdings API leaves in issuer names.
fn decode_html_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let decoded = tail.find(';').and_then(|end| {
            let entity = &tail[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, end))
        });
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
