//! Holdings Runner: ingestion orchestration, historical backfill and snapshot comparison.
//!
//! This crate builds on `holdings-core` to provide:
//! - Multi-fund ingest with per-fund isolation and progress reporting
//! - Backfill of saved CSV/JSON exports into the store
//! - Date-to-date comparison of a fund's stored holdings

pub mod backfill;
pub mod compare;
pub mod ingest;

pub use backfill::{
    backfill, date_from_file_name, import_file, BackfillError, BackfillOptions, BackfillSummary,
    FileImportError,
};
pub use compare::{
    compare, compare_rows, ChangedPosition, CompareError, Comparison, ComparisonTotals,
};
pub use ingest::{
    ingest_fund, ingest_funds, ingest_payload, IngestError, IngestOutcome, IngestProgress,
    IngestSummary, SilentProgress, StdoutProgress,
};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn outcome_types_are_send_sync() {
        assert_send::<IngestOutcome>();
        assert_sync::<IngestOutcome>();
        assert_send::<IngestSummary>();
        assert_sync::<IngestSummary>();
        assert_send::<BackfillSummary>();
        assert_sync::<BackfillSummary>();
    }

    #[test]
    fn comparison_is_send_sync() {
        assert_send::<Comparison>();
        assert_sync::<Comparison>();
    }

    #[test]
    fn progress_reporters_are_send() {
        assert_send::<StdoutProgress>();
        assert_send::<SilentProgress>();
    }
}
