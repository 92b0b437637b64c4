//! Amplify holdings feed adapter.
//!
//! Amplify publishes one CSV covering all of its funds at a static URL. The
//! feed is always the latest snapshot; rows for other funds are filtered out
//! later by the normalizer using the account column.
//!
//! When a holdings page is configured it is tried first: the page either is a
//! CSV itself or links to one. Any failure on that route falls back to the
//! static feed.

use super::http::send_checked;
use super::provider::{DataSource, FetchError, FetchResult, RawPayload, SourceAdapter};
use crate::domain::FundCode;
use chrono::NaiveDate;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use tracing::debug;

const CSV_LINK_PATTERN: &str = r#"(?i)href\s*=\s*["']([^"']+\.csv[^"']*)["']"#;

pub struct AmplifyFeedAdapter {
    client: Client,
    url: String,
    page_url: Option<String>,
    user_agent: String,
}

impl AmplifyFeedAdapter {
    pub fn new(client: Client, url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            page_url: None,
            user_agent: user_agent.into(),
        }
    }

    /// Look for a CSV link on `page_url` before using the static feed.
    pub fn with_page_url(mut self, page_url: impl Into<String>) -> Self {
        self.page_url = Some(page_url.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn page_url(&self) -> Option<&str> {
        self.page_url.as_deref()
    }

    fn get_csv(&self, url: &str) -> Result<String, FetchError> {
        let resp = send_checked(self.client.get(url), Some(&self.user_agent))?;
        let text = resp.text().map_err(FetchError::from_reqwest)?;
        non_empty(text, url)
    }

    /// `Ok(None)` when the page loads but offers no CSV.
    fn fetch_from_page(&self, page_url: &str) -> Result<Option<(String, String)>, FetchError> {
        let resp = send_checked(self.client.get(page_url), Some(&self.user_agent))?;
        let is_csv = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/csv"))
            || page_url.to_ascii_lowercase().ends_with(".csv");
        let body = resp.text().map_err(FetchError::from_reqwest)?;

        if is_csv {
            return non_empty(body, page_url).map(|text| Some((text, page_url.to_string())));
        }

        let Some(link) = find_csv_link(&body, page_url) else {
            return Ok(None);
        };
        debug!(page = %page_url, link = %link, "following CSV link from holdings page");
        let text = self.get_csv(link.as_str())?;
        Ok(Some((text, link.to_string())))
    }
}

impl SourceAdapter for AmplifyFeedAdapter {
    fn name(&self) -> &str {
        "amplify_feed"
    }

    fn fetch(
        &self,
        fund: FundCode,
        _as_of: Option<NaiveDate>,
    ) -> Result<FetchResult, FetchError> {
        if let Some(page_url) = &self.page_url {
            debug!(%fund, page = %page_url, "fetching holdings page");
            match self.fetch_from_page(page_url) {
                Ok(Some((text, origin))) => {
                    return Ok(FetchResult {
                        fund,
                        payload: RawPayload::Csv(text),
                        source: DataSource::AmplifyFeed,
                        origin,
                    });
                }
                Ok(None) => debug!(%fund, "no CSV link on holdings page, using feed"),
                Err(e) => debug!(%fund, error = %e, "holdings page route failed, using feed"),
            }
        }

        debug!(%fund, url = %self.url, "fetching holdings feed");
        let text = self.get_csv(&self.url)?;
        Ok(FetchResult {
            fund,
            payload: RawPayload::Csv(text),
            source: DataSource::AmplifyFeed,
            origin: self.url.clone(),
        })
    }
}

fn non_empty(text: String, url: &str) -> Result<String, FetchError> {
    if text.trim().is_empty() {
        return Err(FetchError::ResponseFormatChanged(format!(
            "empty holdings feed from {url}"
        )));
    }
    Ok(text)
}

/// First `.csv` link in `html`, resolved against the page URL.
fn find_csv_link(html: &str, page_url: &str) -> Option<Url> {
    let pattern = Regex::new(CSV_LINK_PATTERN).ok()?;
    let href = pattern.captures(html)?.get(1)?.as_str();
    let base = Url::parse(page_url).ok()?;
    base.join(href.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://amplifyetfs.com/yyy-holdings/";

    #[test]
    fn relative_csv_links_resolve_against_the_page() {
        let html = r#"<a class="btn" href="/uploads/feeds/YYY_Holdings.csv">Download</a>"#;
        assert_eq!(
            find_csv_link(html, PAGE).unwrap().as_str(),
            "https://amplifyetfs.com/uploads/feeds/YYY_Holdings.csv"
        );
    }

    #[test]
    fn absolute_links_and_query_strings_are_kept() {
        let html = "<p>x</p><A HREF='https://cdn.example.test/h.CSV?v=3'>csv</A>";
        assert_eq!(
            find_csv_link(html, PAGE).unwrap().as_str(),
            "https://cdn.example.test/h.CSV?v=3"
        );
    }

    #[test]
    fn pages_without_csv_links_yield_nothing() {
        assert!(find_csv_link(r#"<a href="/holdings.pdf">PDF</a>"#, PAGE).is_none());
        assert!(find_csv_link(r#"<a href="/x.csv">x</a>"#, "not a url").is_none());
    }

    #[test]
    fn blank_feeds_are_rejected() {
        assert!(matches!(
            non_empty(" \n".into(), "http://x"),
            Err(FetchError::ResponseFormatChanged(_))
        ));
        assert_eq!(non_empty("a,b\n".into(), "http://x").unwrap(), "a,b\n");
    }
}
