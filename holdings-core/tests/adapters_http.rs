//! Adapters against a local HTTP server that replays canned responses.

use holdings_core::config::HttpConfig;
use holdings_core::data::http::build_client;
use holdings_core::data::{
    AmplifyFeedAdapter, DataSource, FetchError, InvescoApiAdapter, RawPayload, SourceAdapter,
};
use holdings_core::FundCode;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread::{self, JoinHandle};

const TEST_AGENT: &str = "holdings-test-agent/1.0";

/// Serve `responses` in order, one connection each, and hand back the
/// request heads that were received.
fn serve(
    responses: Vec<(u16, &'static str, &'static str)>,
) -> (SocketAddr, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let mut requests = Vec::new();
        for (status, content_type, body) in responses {
            let (mut stream, _) = listener.accept().unwrap();

            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            requests.push(String::from_utf8_lossy(&head).into_owned());

            let response = format!(
                "HTTP/1.1 {status} Status\r\nContent-Type: {content_type}\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
        }
        requests
    });

    (addr, handle)
}

fn client() -> reqwest::blocking::Client {
    build_client(&HttpConfig::default()).unwrap()
}

fn request_line(request: &str) -> &str {
    request.lines().next().unwrap_or_default()
}

fn has_user_agent(request: &str) -> bool {
    request
        .to_ascii_lowercase()
        .contains(&format!("user-agent: {}", TEST_AGENT.to_ascii_lowercase()))
}

const HOLDINGS_JSON: &str =
    r#"{"effectiveDate":"2025-03-03","holdings":[{"ticker":"PDI","issuerName":"PIMCO"}]}"#;

#[test]
fn invesco_sends_user_agent_after_bare_request_is_rejected() {
    let (addr, server) = serve(vec![
        (406, "text/plain", "Not Acceptable"),
        (200, "application/json", HOLDINGS_JSON),
    ]);
    let url = format!("http://{addr}/holdings/fund?idType=ticker&productType=ETF");
    let adapter = InvescoApiAdapter::new(client(), url.clone(), TEST_AGENT);

    let fetched = adapter.fetch(FundCode::Pcef, None).unwrap();
    let requests = server.join().unwrap();

    assert_eq!(fetched.fund, FundCode::Pcef);
    assert_eq!(fetched.source, DataSource::InvescoApi);
    assert_eq!(fetched.origin, url);
    match &fetched.payload {
        RawPayload::Json(value) => assert_eq!(value["holdings"][0]["ticker"], "PDI"),
        other => panic!("expected JSON payload, got {}", other.kind()),
    }

    assert_eq!(requests.len(), 2);
    assert!(!has_user_agent(&requests[0]), "first request goes out bare");
    assert!(has_user_agent(&requests[1]), "second request carries the User-Agent");
    for request in &requests {
        let line = request_line(request);
        assert!(line.contains("productType=ETF"), "query kept: {line}");
        assert!(line.contains("&cb="), "cache buster on the wire: {line}");
    }
}

#[test]
fn invesco_reports_the_last_rejection() {
    let (addr, server) = serve(vec![
        (406, "text/plain", "Not Acceptable"),
        (406, "text/plain", "Not Acceptable"),
    ]);
    let adapter = InvescoApiAdapter::new(client(), format!("http://{addr}/holdings"), TEST_AGENT);

    let err = adapter.fetch(FundCode::Pcef, None).unwrap_err();
    assert_eq!(server.join().unwrap().len(), 2);
    assert!(matches!(err, FetchError::HttpStatus { status: 406, .. }));
}

#[test]
fn invesco_payload_without_holdings_is_a_format_change() {
    let (addr, server) = serve(vec![
        (200, "application/json", r#"{"holdings":[]}"#),
        (200, "application/json", r#"{"message":"moved"}"#),
    ]);
    let adapter = InvescoApiAdapter::new(client(), format!("http://{addr}/holdings"), TEST_AGENT);

    let err = adapter.fetch(FundCode::Pcef, None).unwrap_err();
    server.join().unwrap();
    assert!(matches!(err, FetchError::ResponseFormatChanged(_)));
}

#[test]
fn amplify_feed_arrives_as_csv_with_user_agent() {
    let feed = "Date,Account,StockTicker,SecurityName,Shares,MarketValue\n\
                03/03/2025,YYY,PDI,PIMCO,10,100\n";
    let (addr, server) = serve(vec![(200, "text/csv", feed)]);
    let url = format!("http://{addr}/feed.csv");
    let adapter = AmplifyFeedAdapter::new(client(), url.clone(), TEST_AGENT);

    let fetched = adapter.fetch(FundCode::Yyy, None).unwrap();
    let requests = server.join().unwrap();

    assert_eq!(fetched.source, DataSource::AmplifyFeed);
    assert_eq!(fetched.origin, url);
    assert_eq!(fetched.payload, RawPayload::Csv(feed.to_string()));
    assert_eq!(requests.len(), 1);
    assert!(request_line(&requests[0]).starts_with("GET /feed.csv "));
    assert!(has_user_agent(&requests[0]));
}

#[test]
fn amplify_empty_feed_is_a_format_change() {
    let (addr, server) = serve(vec![(200, "text/csv", "  \n")]);
    let adapter = AmplifyFeedAdapter::new(client(), format!("http://{addr}/feed.csv"), TEST_AGENT);

    let err = adapter.fetch(FundCode::Yyy, None).unwrap_err();
    server.join().unwrap();
    assert!(matches!(err, FetchError::ResponseFormatChanged(_)));
}

#[test]
fn amplify_server_error_is_an_http_status() {
    let (addr, server) = serve(vec![(503, "text/plain", "down")]);
    let adapter = AmplifyFeedAdapter::new(client(), format!("http://{addr}/feed.csv"), TEST_AGENT);

    let err = adapter.fetch(FundCode::Yyy, None).unwrap_err();
    server.join().unwrap();
    assert!(matches!(err, FetchError::HttpStatus { status: 503, .. }));
}

const FEED: &str = "Account,StockTicker,SecurityName,Shares,MarketValue\nYYY,PDI,PIMCO,10,100\n";

#[test]
fn amplify_follows_the_csv_link_on_the_holdings_page() {
    let page = r#"<html><body><a href="/files/yyy_holdings.csv">Download</a></body></html>"#;
    let (addr, server) = serve(vec![(200, "text/html", page), (200, "text/csv", FEED)]);
    let adapter = AmplifyFeedAdapter::new(client(), format!("http://{addr}/feed.csv"), TEST_AGENT)
        .with_page_url(format!("http://{addr}/yyy-holdings/"));

    let fetched = adapter.fetch(FundCode::Yyy, None).unwrap();
    let requests = server.join().unwrap();

    assert_eq!(fetched.origin, format!("http://{addr}/files/yyy_holdings.csv"));
    assert_eq!(fetched.payload, RawPayload::Csv(FEED.to_string()));
    assert_eq!(requests.len(), 2);
    assert!(request_line(&requests[0]).starts_with("GET /yyy-holdings/ "));
    assert!(request_line(&requests[1]).starts_with("GET /files/yyy_holdings.csv "));
}

#[test]
fn amplify_page_serving_csv_is_used_directly() {
    let (addr, server) = serve(vec![(200, "text/csv; charset=utf-8", FEED)]);
    let page_url = format!("http://{addr}/yyy-holdings/");
    let adapter = AmplifyFeedAdapter::new(client(), format!("http://{addr}/feed.csv"), TEST_AGENT)
        .with_page_url(page_url.clone());

    let fetched = adapter.fetch(FundCode::Yyy, None).unwrap();
    assert_eq!(server.join().unwrap().len(), 1);
    assert_eq!(fetched.origin, page_url);
}

#[test]
fn amplify_falls_back_to_feed_when_page_fails_or_has_no_link() {
    for (status, page) in [(500, "error"), (200, "<html><p>No downloads</p></html>")] {
        let (addr, server) = serve(vec![(status, "text/html", page), (200, "text/csv", FEED)]);
        let feed_url = format!("http://{addr}/feed.csv");
        let adapter = AmplifyFeedAdapter::new(client(), feed_url.clone(), TEST_AGENT)
            .with_page_url(format!("http://{addr}/yyy-holdings/"));

        let fetched = adapter.fetch(FundCode::Yyy, None).unwrap();
        let requests = server.join().unwrap();

        assert_eq!(fetched.origin, feed_url, "page answered {status}");
        assert_eq!(requests.len(), 2);
        assert!(request_line(&requests[1]).starts_with("GET /feed.csv "));
    }
}
