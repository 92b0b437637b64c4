//! Historical backfill from saved holdings files.
//!
//! Accepts a single file or a directory of `.csv` / `.json` exports. Each file
//! is one snapshot and goes through the same normalize → upsert path as a live
//! ingest. The snapshot date comes from, in order: the caller's override, the
//! date published inside the file, a date in the file name.

use crate::ingest::{ingest_payload, IngestError, IngestOutcome};
use chrono::NaiveDate;
use holdings_core::data::{HoldingStore, Normalizer, RawPayload};
use holdings_core::FundCode;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const FILE_SOURCE: &str = "file_import";

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("backfill path does not exist: {0}")]
    NotFound(PathBuf),

    #[error("cannot list {path}: {reason}")]
    Scan { path: PathBuf, reason: String },
}

/// Why a single file could not be imported.
#[derive(Debug, Error)]
pub enum FileImportError {
    #[error("unsupported file type (expected .csv or .json)")]
    UnsupportedType,

    #[error("read failed: {0}")]
    Read(String),

    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("no snapshot date: pass --date, or name the file with YYYY-MM-DD")]
    NoDate,

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BackfillOptions {
    /// Date applied to every file, overriding anything found in them.
    pub as_of: Option<NaiveDate>,
    /// Descend into subdirectories.
    pub recursive: bool,
}

/// Summary of a backfill run.
#[derive(Debug)]
pub struct BackfillSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<IngestOutcome>,
    pub errors: Vec<(PathBuf, FileImportError)>,
}

impl BackfillSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Import every holdings file under `path` for `fund`.
///
/// Files are processed in sorted path order, so when two files resolve to the
/// same date the later one wins.
pub fn backfill(
    store: &HoldingStore,
    fund: FundCode,
    path: &Path,
    options: &BackfillOptions,
) -> Result<BackfillSummary, BackfillError> {
    let files = collect_files(path, options.recursive)?;
    debug!(%fund, path = %path.display(), files = files.len(), "backfill scan");

    let mut outcomes = Vec::new();
    let mut errors = Vec::new();
    for file in &files {
        match import_file(store, fund, file, options.as_of) {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                warn!(%fund, file = %file.display(), error = %e, "backfill file skipped");
                errors.push((file.clone(), e));
            }
        }
    }

    Ok(BackfillSummary {
        total: files.len(),
        succeeded: outcomes.len(),
        failed: errors.len(),
        outcomes,
        errors,
    })
}

/// Import one file as one snapshot.
pub fn import_file(
    store: &HoldingStore,
    fund: FundCode,
    file: &Path,
    as_of: Option<NaiveDate>,
) -> Result<IngestOutcome, FileImportError> {
    let payload = read_payload(file)?;
    let date = as_of
        .or_else(|| Normalizer::payload_as_of(fund, &payload))
        .or_else(|| date_from_file_name(file))
        .ok_or(FileImportError::NoDate)?;

    let origin = file.display().to_string();
    Ok(ingest_payload(store, fund, &payload, Some(date), FILE_SOURCE, &origin)?)
}

fn read_payload(file: &Path) -> Result<RawPayload, FileImportError> {
    let kind = extension(file).ok_or(FileImportError::UnsupportedType)?;
    let text = fs::read_to_string(file).map_err(|e| FileImportError::Read(e.to_string()))?;
    match kind {
        Kind::Csv => Ok(RawPayload::Csv(text)),
        Kind::Json => serde_json::from_str(&text)
            .map(RawPayload::Json)
            .map_err(|e| FileImportError::Json(e.to_string())),
    }
}

enum Kind {
    Csv,
    Json,
}

fn extension(file: &Path) -> Option<Kind> {
    let ext = file.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "csv" => Some(Kind::Csv),
        "json" => Some(Kind::Json),
        _ => None,
    }
}

/// Files to import, sorted. A file path is returned as-is whatever its type.
fn collect_files(path: &Path, recursive: bool) -> Result<Vec<PathBuf>, BackfillError> {
    if !path.exists() {
        return Err(BackfillError::NotFound(path.to_path_buf()));
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let scan_err = |e: std::io::Error| BackfillError::Scan {
            path: dir.clone(),
            reason: e.to_string(),
        };
        for entry in fs::read_dir(&dir).map_err(scan_err)? {
            let entry_path = entry.map_err(scan_err)?.path();
            if entry_path.is_dir() {
                if recursive {
                    pending.push(entry_path);
                }
            } else if extension(&entry_path).is_some() {
                files.push(entry_path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Find a `YYYY-MM-DD` or `YYYYMMDD` date in a file name.
pub fn date_from_file_name(file: &Path) -> Option<NaiveDate> {
    let stem = file.file_stem()?.to_str()?;
    let bytes = stem.as_bytes();

    for start in 0..bytes.len() {
        if start > 0 && bytes[start - 1].is_ascii_digit() {
            continue;
        }
        let Some(rest) = stem.get(start..) else {
            continue;
        };
        if let Some(dashed) = rest.get(..10) {
            if let Ok(date) = NaiveDate::parse_from_str(dashed, "%Y-%m-%d") {
                return Some(date);
            }
        }
        if let Some(compact) = rest.get(..8) {
            let bounded = !rest.as_bytes().get(8).is_some_and(u8::is_ascii_digit);
            if bounded && compact.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(date) = NaiveDate::parse_from_str(compact, "%Y%m%d") {
                    return Some(date);
                }
            }
        }
    }
    None
}
