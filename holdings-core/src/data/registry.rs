//! Fund → source adapter mapping.

use super::amplify::AmplifyFeedAdapter;
use super::http::build_client;
use super::invesco::InvescoApiAdapter;
use super::provider::{FetchError, FetchResult, SourceAdapter};
use crate::config::HoldingsConfig;
use crate::domain::FundCode;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Holds one adapter per fund.
#[derive(Default)]
pub struct SourceRegistry {
    adapters: BTreeMap<FundCode, Box<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry wired to the real upstreams described by `config`.
    pub fn from_config(config: &HoldingsConfig) -> Result<Self, FetchError> {
        let client = build_client(&config.http)?;
        let user_agent = config.http.user_agent.as_str();

        let mut registry = Self::new();
        for fund in FundCode::ALL {
            let source = config.source(fund);
            let adapter: Box<dyn SourceAdapter> = match fund {
                FundCode::Yyy => {
                    let feed = AmplifyFeedAdapter::new(client.clone(), source.url, user_agent);
                    match source.page_url {
                        Some(page) => Box::new(feed.with_page_url(page)),
                        None => Box::new(feed),
                    }
                }
                FundCode::Pcef => {
                    Box::new(InvescoApiAdapter::new(client.clone(), source.url, user_agent))
                }
            };
            registry.register(fund, adapter);
        }
        Ok(registry)
    }

    pub fn register(&mut self, fund: FundCode, adapter: Box<dyn SourceAdapter>) {
        self.adapters.insert(fund, adapter);
    }

    pub fn with_adapter(mut self, fund: FundCode, adapter: Box<dyn SourceAdapter>) -> Self {
        self.register(fund, adapter);
        self
    }

    pub fn get(&self, fund: FundCode) -> Option<&dyn SourceAdapter> {
        self.adapters.get(&fund).map(|a| a.as_ref())
    }

    /// Funds with a registered adapter, sorted by code.
    pub fn funds(&self) -> Vec<FundCode> {
        self.adapters.keys().copied().collect()
    }

    /// Fetch through the fund's adapter.
    pub fn fetch(
        &self,
        fund: FundCode,
        as_of: Option<NaiveDate>,
    ) -> Result<FetchResult, FetchError> {
        let adapter = self.get(fund).ok_or(FetchError::NoAdapter { fund })?;
        adapter.fetch(fund, as_of)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::{DataSource, RawPayload};

    struct StaticCsv;

    impl SourceAdapter for StaticCsv {
        fn name(&self) -> &str {
            "static"
        }

        fn fetch(
            &self,
            fund: FundCode,
            _as_of: Option<NaiveDate>,
        ) -> Result<FetchResult, FetchError> {
            Ok(FetchResult {
                fund,
                payload: RawPayload::Csv("Ticker\nPDI\n".into()),
                source: DataSource::FileImport,
                origin: "memory".into(),
            })
        }
    }

    #[test]
    fn from_config_registers_every_fund() {
        let registry = SourceRegistry::from_config(&HoldingsConfig::default()).unwrap();
        assert_eq!(registry.funds(), FundCode::ALL.to_vec());
        assert_eq!(registry.get(FundCode::Yyy).unwrap().name(), "amplify_feed");
        assert_eq!(registry.get(FundCode::Pcef).unwrap().name(), "invesco_api");
    }

    #[test]
    fn missing_adapter_is_a_fetch_error() {
        let registry = SourceRegistry::new().with_adapter(FundCode::Yyy, Box::new(StaticCsv));
        assert!(registry.fetch(FundCode::Yyy, None).is_ok());
        assert!(matches!(
            registry.fetch(FundCode::Pcef, None),
            Err(FetchError::NoAdapter {
                fund: FundCode::Pcef
            })
        ));
    }
}
