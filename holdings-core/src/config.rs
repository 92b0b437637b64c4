//! Pipeline configuration.
//!
//! Loaded from an optional TOML file. Every field has a built-in default, so an
//! empty file (or no file at all) reproduces the stock setup:
//!
//! ```toml
//! [store]
//! path = "holdings.parquet"
//!
//! [http]
//! timeout_secs = 30
//!
//! [funds.PCEF]
//! url = "https://dng-api.invesco.com/..."
//!
//! [funds.YYY]
//! url = "https://amplifyetfs.com/.../Holdings.csv"
//! page_url = "https://amplifyetfs.com/yyy-holdings/"
//! ```

use crate::domain::FundCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_STORE_PATH: &str = "holdings.parquet";

const AMPLIFY_PAGE_URL: &str = "https://amplifyetfs.com/yyy-holdings/";
const AMPLIFY_FEED_URL: &str =
    "https://amplifyetfs.com/wp-content/uploads/feeds/AmplifyWeb.40XL.XL_Holdings.csv";
const INVESCO_API_URL: &str = "https://dng-api.invesco.com/cache/v1/accounts/en_US/shareclasses/46138E404/holdings/fund?idType=cusip&productType=ETF";
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HoldingsConfig {
    pub store: StoreConfig,
    pub http: HttpConfig,
    /// Per-fund source overrides, keyed by fund code (`YYY`, `PCEF`).
    pub funds: BTreeMap<String, FundSourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// User-Agent sent to upstreams that expect a browser.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: BROWSER_USER_AGENT.to_string(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Where one fund's holdings are published.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FundSourceConfig {
    pub url: String,
    /// Holdings page searched for a CSV download link before `url` is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
}

impl FundSourceConfig {
    pub fn default_for(fund: FundCode) -> Self {
        match fund {
            FundCode::Yyy => Self {
                url: AMPLIFY_FEED_URL.to_string(),
                page_url: Some(AMPLIFY_PAGE_URL.to_string()),
            },
            FundCode::Pcef => Self {
                url: INVESCO_API_URL.to_string(),
                page_url: None,
            },
        }
    }
}

impl HoldingsConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::Invalid("http.timeout_secs must be > 0".into()));
        }
        for (fund, source) in &self.funds {
            fund.parse::<FundCode>()
                .map_err(|e| ConfigError::Invalid(format!("funds.{fund}: {e}")))?;
            if source.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("funds.{fund}.url is empty")));
            }
        }
        Ok(())
    }

    /// Source settings for a fund, falling back to the built-in URL.
    pub fn source(&self, fund: FundCode) -> FundSourceConfig {
        self.funds
            .iter()
            .find(|(code, _)| code.parse::<FundCode>().ok() == Some(fund))
            .map(|(_, source)| source.clone())
            .unwrap_or_else(|| FundSourceConfig::default_for(fund))
    }

    /// Replace the source URL for one fund. The URL is fetched directly, with
    /// no holdings-page lookup.
    pub fn override_url(&mut self, fund: FundCode, url: impl Into<String>) {
        self.funds
            .retain(|code, _| code.parse::<FundCode>().ok() != Some(fund));
        let source = FundSourceConfig {
            url: url.into(),
            page_url: None,
        };
        self.funds.insert(fund.to_string(), source);
    }

    /// Replace the store path.
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store.path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = HoldingsConfig::from_toml("").unwrap();
        assert_eq!(config, HoldingsConfig::default());
        assert_eq!(config.store.path, PathBuf::from(DEFAULT_STORE_PATH));
        assert_eq!(config.http.timeout(), Duration::from_secs(30));
        assert!(config.source(FundCode::Yyy).url.ends_with(".csv"));
    }

    #[test]
    fn fund_urls_override_defaults() {
        let config = HoldingsConfig::from_toml(
            r#"
            [store]
            path = "/tmp/other.parquet"

            [funds.PCEF]
            url = "http://localhost:9000/holdings.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.store.path, PathBuf::from("/tmp/other.parquet"));
        assert_eq!(
            config.source(FundCode::Pcef).url,
            "http://localhost:9000/holdings.json"
        );
        assert_eq!(
            config.source(FundCode::Yyy),
            FundSourceConfig::default_for(FundCode::Yyy)
        );
    }

    #[test]
    fn unknown_fund_section_is_rejected() {
        let result = HoldingsConfig::from_toml("[funds.SPY]\nurl = \"http://x\"\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn lower_case_fund_keys_are_accepted() {
        let config =
            HoldingsConfig::from_toml("[funds.yyy]\nurl = \"http://x/feed.csv\"\n").unwrap();
        assert_eq!(config.source(FundCode::Yyy).url, "http://x/feed.csv");
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let result = HoldingsConfig::from_toml("[http]\ntimeout_secs = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn override_url_replaces_source() {
        let mut config = HoldingsConfig::default();
        assert!(config.source(FundCode::Yyy).page_url.is_some());

        config.override_url(FundCode::Yyy, "http://localhost/feed.csv");
        let source = config.source(FundCode::Yyy);
        assert_eq!(source.url, "http://localhost/feed.csv");
        assert_eq!(source.page_url, None);
    }

    #[test]
    fn page_url_is_optional_in_toml() {
        let config = HoldingsConfig::from_toml(
            r#"
            [funds.YYY]
            url = "http://localhost/feed.csv"
            page_url = "http://localhost/yyy-holdings/"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.source(FundCode::Yyy).page_url.as_deref(),
            Some("http://localhost/yyy-holdings/")
        );

        let bare = HoldingsConfig::from_toml("[funds.PCEF]\nurl = \"http://x/h\"\n").unwrap();
        assert_eq!(bare.source(FundCode::Pcef).page_url, None);
    }
}
