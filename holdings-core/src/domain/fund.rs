use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Funds the pipeline knows how to fetch and normalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FundCode {
    /// Invesco CEF Income Composite ETF, served by a JSON holdings API.
    Pcef,
    /// Amplify High Income ETF, published as a multi-fund CSV feed.
    Yyy,
}

/// How a fund's upstream publishes its holdings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    Csv,
    Json,
}

impl FundCode {
    /// Every supported fund, sorted by code.
    pub const ALL: [FundCode; 2] = [FundCode::Pcef, FundCode::Yyy];

    /// Fund used for legacy store files written before the `fund` column existed.
    pub const LEGACY_DEFAULT: FundCode = FundCode::Yyy;

    pub fn as_str(&self) -> &'static str {
        match self {
            FundCode::Yyy => "YYY",
            FundCode::Pcef => "PCEF",
        }
    }

    /// Full marketing name of the fund.
    pub fn display_name(&self) -> &'static str {
        match self {
            FundCode::Yyy => "Amplify High Income ETF",
            FundCode::Pcef => "Invesco CEF Income Composite ETF",
        }
    }

    pub fn source_format(&self) -> SourceFormat {
        match self {
            FundCode::Yyy => SourceFormat::Csv,
            FundCode::Pcef => SourceFormat::Json,
        }
    }

    /// Comma-separated list of supported codes, for error messages and help text.
    pub fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for FundCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported fund ticker '{input}'. Supported values: {supported}")]
pub struct UnknownFund {
    pub input: String,
    pub supported: String,
}

impl FromStr for FundCode {
    type Err = UnknownFund;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "YYY" => Ok(FundCode::Yyy),
            "PCEF" => Ok(FundCode::Pcef),
            _ => Err(UnknownFund {
                input: s.to_string(),
                supported: FundCode::supported_list(),
            }),
        }
    }
}
