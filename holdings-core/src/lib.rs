//! Holdings Core: domain types, source adapters, normalization and the Parquet store.
//!
//! This crate contains everything needed to turn an upstream holdings
//! publication into stored, queryable snapshots:
//! - Domain types (funds, holding rows, the uninvested-cash sentinel)
//! - Source adapters for each fund's upstream, behind one trait
//! - A normalizer mapping heterogeneous columns onto one schema
//! - A single-file Parquet store with snapshot-level upserts
//! - TOML configuration for URLs, HTTP and store location

pub mod config;
pub mod data;
pub mod domain;

pub use config::{ConfigError, HoldingsConfig};
pub use data::{
    FetchError, HoldingFilter, HoldingStore, NormalizeError, NormalizedBatch, Normalizer,
    RawPayload, SourceAdapter, SourceRegistry, StoreError,
};
pub use domain::{FundCode, HoldingRow, CASH_NAME, CASH_TICKER};
