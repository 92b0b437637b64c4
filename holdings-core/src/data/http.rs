//! Shared blocking HTTP client.

use super::provider::FetchError;
use crate::config::HttpConfig;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::USER_AGENT;

/// Build the client shared by all adapters.
///
/// No default User-Agent is set: some upstreams reject browser-like headers,
/// so each adapter decides per request.
pub fn build_client(config: &HttpConfig) -> Result<Client, FetchError> {
    Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| FetchError::NetworkUnreachable(format!("failed to build HTTP client: {e}")))
}

/// Send a request, optionally with a User-Agent, and require a 2xx status.
pub(crate) fn send_checked(
    request: RequestBuilder,
    user_agent: Option<&str>,
) -> Result<Response, FetchError> {
    let request = match user_agent {
        Some(ua) => request.header(USER_AGENT, ua),
        None => request,
    };
    let resp = request.send().map_err(FetchError::from_reqwest)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus {
            status: status.as_u16(),
            url: resp.url().to_string(),
        });
    }
    Ok(resp)
}
