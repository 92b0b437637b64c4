//! Ingest orchestrator: fetches, normalizes and stores each fund independently.
//!
//! One fund failing (network down, upstream format change, unusable payload)
//! is recorded in the summary and never stops the remaining funds.

use chrono::NaiveDate;
use holdings_core::data::{
    FetchError, HoldingStore, NormalizeError, Normalizer, RawPayload, SourceRegistry, StoreError,
};
use holdings_core::FundCode;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("normalization failed: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("store write failed: {0}")]
    Store(#[from] StoreError),
}

/// Result of one successful fund (or file) ingest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub fund: FundCode,
    pub date: NaiveDate,
    /// Adapter name, or `file_import` for backfills.
    pub source: String,
    /// URL or file path the payload came from.
    pub origin: String,
    pub rows: usize,
    pub warnings: usize,
    /// Stored rows replaced by this snapshot.
    pub replaced: usize,
    pub weight_sum: f64,
    /// BLAKE3 of the normalized rows; unchanged across identical re-ingests.
    pub content_hash: String,
}

/// Progress callback for multi-fund ingests.
pub trait IngestProgress: Send {
    /// Called when starting to ingest a fund.
    fn on_start(&self, fund: FundCode, index: usize, total: usize);

    /// Called when a fund ingest completes.
    fn on_complete(
        &self,
        fund: FundCode,
        index: usize,
        total: usize,
        result: &Result<IngestOutcome, IngestError>,
    );

    /// Called when every fund has been attempted.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Simple progress reporter that prints to stdout.
pub struct StdoutProgress;

impl IngestProgress for StdoutProgress {
    fn on_start(&self, fund: FundCode, index: usize, total: usize) {
        println!("[{}/{}] Ingesting {fund}...", index + 1, total);
    }

    fn on_complete(
        &self,
        fund: FundCode,
        _index: usize,
        _total: usize,
        result: &Result<IngestOutcome, IngestError>,
    ) {
        match result {
            Ok(outcome) => {
                println!(
                    "  OK: {fund} {}: {} rows, weight sum {:.4}",
                    outcome.date, outcome.rows, outcome.weight_sum
                );
                if outcome.warnings > 0 {
                    println!("      {} row(s) dropped during normalization", outcome.warnings);
                }
            }
            Err(e) => println!("  FAIL: {fund}: {e}"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        println!("\nIngest complete: {succeeded}/{total} succeeded, {failed} failed");
    }
}

/// Reporter that stays quiet; outcomes are still in the summary.
pub struct SilentProgress;

impl IngestProgress for SilentProgress {
    fn on_start(&self, _fund: FundCode, _index: usize, _total: usize) {}

    fn on_complete(
        &self,
        _fund: FundCode,
        _index: usize,
        _total: usize,
        _result: &Result<IngestOutcome, IngestError>,
    ) {
    }

    fn on_batch_complete(&self, _succeeded: usize, _failed: usize, _total: usize) {}
}

/// Summary of a multi-fund ingest.
#[derive(Debug)]
pub struct IngestSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<IngestOutcome>,
    pub errors: Vec<(FundCode, IngestError)>,
}

impl IngestSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Ingest every fund in `funds`, each on its own.
///
/// `as_of` overrides the snapshot date; otherwise the payload's own date is
/// used, falling back to today.
pub fn ingest_funds(
    registry: &SourceRegistry,
    store: &HoldingStore,
    funds: &[FundCode],
    as_of: Option<NaiveDate>,
    progress: &dyn IngestProgress,
) -> IngestSummary {
    let total = funds.len();
    let mut outcomes = Vec::new();
    let mut errors = Vec::new();

    for (i, &fund) in funds.iter().enumerate() {
        progress.on_start(fund, i, total);

        let result = ingest_fund(registry, store, fund, as_of);
        progress.on_complete(fund, i, total, &result);

        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                warn!(%fund, error = %e, "fund ingest failed");
                errors.push((fund, e));
            }
        }
    }

    let summary = IngestSummary {
        total,
        succeeded: outcomes.len(),
        failed: errors.len(),
        outcomes,
        errors,
    };
    progress.on_batch_complete(summary.succeeded, summary.failed, total);
    summary
}

/// Ingest a single fund: fetch → normalize → upsert.
pub fn ingest_fund(
    registry: &SourceRegistry,
    store: &HoldingStore,
    fund: FundCode,
    as_of: Option<NaiveDate>,
) -> Result<IngestOutcome, IngestError> {
    let source = registry
        .get(fund)
        .map(|a| a.name().to_string())
        .ok_or(FetchError::NoAdapter { fund })?;
    let fetched = registry.fetch(fund, as_of)?;
    ingest_payload(store, fund, &fetched.payload, as_of, &source, &fetched.origin)
}

/// Normalize an already-fetched payload and upsert it.
pub fn ingest_payload(
    store: &HoldingStore,
    fund: FundCode,
    payload: &RawPayload,
    as_of: Option<NaiveDate>,
    source: &str,
    origin: &str,
) -> Result<IngestOutcome, IngestError> {
    let batch = Normalizer::normalize(fund, payload, as_of)?;
    let report = store.upsert(&batch.rows)?;

    let outcome = IngestOutcome {
        fund,
        date: batch.date,
        source: source.to_string(),
        origin: origin.to_string(),
        rows: batch.rows.len(),
        warnings: batch.warnings.len(),
        replaced: report.replaced,
        weight_sum: batch.weight_sum(),
        content_hash: batch.content_hash(),
    };
    info!(
        %fund,
        date = %outcome.date,
        rows = outcome.rows,
        dropped = outcome.warnings,
        hash = %&outcome.content_hash[..12],
        "ingested holdings"
    );
    Ok(outcome)
}
