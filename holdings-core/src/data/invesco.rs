//! Invesco holdings API adapter.
//!
//! The API takes no date and always answers with the latest snapshot:
//!
//! ```json
//! { "effectiveDate": "2025-03-03", "holdings": [ { "ticker": "PDI", ... } ] }
//! ```
//!
//! The endpoint sits behind a CDN cache, so every request carries a fresh
//! `cb` query parameter. It also answers 406 to some browser-like header
//! sets, so the request goes out bare first and with a User-Agent second.

use super::http::send_checked;
use super::provider::{DataSource, FetchError, FetchResult, RawPayload, SourceAdapter};
use crate::domain::FundCode;
use chrono::NaiveDate;
use reqwest::blocking::Client;
use reqwest::Url;
use serde_json::Value;
use tracing::debug;

pub struct InvescoApiAdapter {
    client: Client,
    url: String,
    user_agent: String,
}

impl InvescoApiAdapter {
    pub fn new(client: Client, url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            user_agent: user_agent.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Request the payload once with the given header variant.
    fn request_json(&self, url: &Url, user_agent: Option<&str>) -> Result<Value, FetchError> {
        let resp = send_checked(self.client.get(url.clone()), user_agent)?;
        let payload: Value = resp.json().map_err(|e| {
            FetchError::ResponseFormatChanged(format!("holdings API returned invalid JSON: {e}"))
        })?;
        check_holdings(&payload)?;
        Ok(payload)
    }
}

impl SourceAdapter for InvescoApiAdapter {
    fn name(&self) -> &str {
        "invesco_api"
    }

    fn fetch(
        &self,
        fund: FundCode,
        _as_of: Option<NaiveDate>,
    ) -> Result<FetchResult, FetchError> {
        let salt = chrono::Utc::now().timestamp_millis();
        let url = with_cache_buster(&self.url, salt)?;

        let mut last_error = None;
        for user_agent in [None, Some(self.user_agent.as_str())] {
            debug!(%fund, %url, with_user_agent = user_agent.is_some(), "requesting holdings API");
            match self.request_json(&url, user_agent) {
                Ok(payload) => {
                    return Ok(FetchResult {
                        fund,
                        payload: RawPayload::Json(payload),
                        source: DataSource::InvescoApi,
                        origin: self.url.clone(),
                    });
                }
                Err(e) => {
                    debug!(%fund, error = %e, "holdings API request rejected");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| FetchError::ResponseFormatChanged("no request was sent".into())))
    }
}

/// Replace (or add) the `cb` query parameter.
fn with_cache_buster(url: &str, salt: i64) -> Result<Url, FetchError> {
    let mut parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != "cb")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut pairs = parsed.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair("cb", &salt.to_string());
    }
    Ok(parsed)
}

fn check_holdings(payload: &Value) -> Result<(), FetchError> {
    match payload.get("holdings") {
        Some(Value::Array(items)) if !items.is_empty() => Ok(()),
        Some(Value::Array(_)) => Err(FetchError::ResponseFormatChanged(
            "holdings array is empty".into(),
        )),
        _ => Err(FetchError::ResponseFormatChanged(
            "response has no holdings array".into(),
        )),
    }
}
