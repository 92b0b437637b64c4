//! Source adapter trait and fetch error types.
//!
//! The SourceAdapter trait abstracts over upstream holdings publishers (a CSV
//! feed, a JSON API, files on disk) so the orchestrator can swap
//! implementations and tests can inject fakes.

use crate::domain::FundCode;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw holdings payload as published upstream, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    Csv(String),
    Json(serde_json::Value),
}

impl RawPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            RawPayload::Csv(_) => "csv",
            RawPayload::Json(_) => "json",
        }
    }
}

/// Structured error types for fetch operations.
///
/// These are designed to be displayable as per-fund status messages.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("invalid source URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("no source adapter registered for {fund}")]
    NoAdapter { fund: FundCode },

    #[error("failed to read {path}: {reason}")]
    Io { path: String, reason: String },
}

impl FetchError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return FetchError::HttpStatus {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        if err.is_decode() || err.is_body() {
            return FetchError::ResponseFormatChanged(err.to_string());
        }
        FetchError::NetworkUnreachable(err.to_string())
    }
}

/// Where a payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    AmplifyFeed,
    InvescoApi,
    FileImport,
}

/// Result of a successful fetch for a single fund.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub fund: FundCode,
    pub payload: RawPayload,
    pub source: DataSource,
    /// URL or file path the payload was read from.
    pub origin: String,
}

/// Trait for holdings sources.
///
/// Neither upstream accepts a date: `as_of` is passed through for adapters
/// that can honour it, and is otherwise only the label the caller stores the
/// snapshot under.
pub trait SourceAdapter: Send + Sync {
    /// Human-readable name of this adapter.
    fn name(&self) -> &str;

    /// Fetch the raw holdings payload for a fund.
    fn fetch(&self, fund: FundCode, as_of: Option<NaiveDate>) -> Result<FetchResult, FetchError>;
}
