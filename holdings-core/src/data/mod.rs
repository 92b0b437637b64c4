//! Fetching, normalizing and storing holdings snapshots

pub mod amplify;
pub mod http;
pub mod invesco;
pub mod normalize;
pub mod number;
pub mod provider;
pub mod registry;
pub mod schema;
pub mod store;
pub mod table;

pub use amplify::AmplifyFeedAdapter;
pub use invesco::InvescoApiAdapter;
pub use normalize::{
    parse_date_text, NormalizationWarning, NormalizeError, NormalizedBatch, Normalizer,
};
pub use provider::{DataSource, FetchError, FetchResult, RawPayload, SourceAdapter};
pub use registry::SourceRegistry;
pub use schema::{HoldingSchema, SchemaError};
pub use store::{HoldingFilter, HoldingStore, SnapshotTotals, StoreError, UpsertReport};
pub use table::RawTable;
