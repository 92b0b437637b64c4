//! Domain types for the holdings pipeline

pub mod fund;
pub mod holding;

pub use fund::{FundCode, SourceFormat, UnknownFund};
pub use holding::{weight_sum, HoldingRow, CASH_NAME, CASH_TICKER};
