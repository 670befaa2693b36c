//! Integration tests for HttpFetcher using wiremock
//!
//! These tests validate conditional GETs, redirect handling, size limits,
//! and the retry policy against mock origins.

mod common;

use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use jangma::fetch::{FetchError, FetchOutcome, FetchRequest, Fetcher, HttpFetcher};
use jangma::models::UrlRecord;

fn fetcher_for(server: &MockServer) -> HttpFetcher {
    let config = common::fast_config([format!("{}/", server.uri())]);
    HttpFetcher::new(&config).unwrap()
}

fn request(server: &MockServer, path: &str) -> FetchRequest {
    FetchRequest::unconditional(UrlRecord::seed(&format!("{}{path}", server.uri())))
}

#[tokio::test]
async fn test_fetch_success_returns_body_and_validators() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/article"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>hello</html>")
                .insert_header("etag", "\"v1\"")
                .insert_header("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
        )
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server);
    let outcome = fetcher.fetch_url(&request(&mock_server, "/article")).await.unwrap();

    let FetchOutcome::Fetched(doc) = outcome else {
        panic!("expected a fetched document");
    };
    assert_eq!(doc.status, 200);
    assert_eq!(&doc.body[..], b"<html>hello</html>");
    assert_eq!(doc.etag.as_deref(), Some("\"v1\""));
    assert_eq!(
        doc.last_modified.as_deref(),
        Some("Wed, 21 Oct 2015 07:28:00 GMT")
    );
    assert_eq!(doc.attempts, 1);
}

#[tokio::test]
async fn test_conditional_get_304_reads_no_body() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server);
    let mut req = request(&mock_server, "/doc");
    req.if_none_match = Some("\"v1\"".to_string());

    let outcome = fetcher.fetch_url(&req).await.unwrap();
    let FetchOutcome::NotModified { url, etag, .. } = outcome else {
        panic!("expected NotModified");
    };
    assert!(url.ends_with("/doc"));
    assert_eq!(etag.as_deref(), Some("\"v1\""));
}

#[tokio::test]
async fn test_server_error_retries_then_succeeds() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server);
    let outcome = fetcher.fetch_url(&request(&mock_server, "/flaky")).await.unwrap();

    let FetchOutcome::Fetched(doc) = outcome else {
        panic!("expected a fetched document");
    };
    assert_eq!(doc.attempts, 2);
}

#[tokio::test]
async fn test_404_is_not_retried() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1) // exactly one attempt, no retry
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server);
    let err = fetcher
        .fetch_url(&request(&mock_server, "/missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::ClientError(404)));
}

#[tokio::test]
async fn test_max_retries_exceeded() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2) // initial attempt + max_retries(1)
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server);
    let err = fetcher
        .fetch_url(&request(&mock_server, "/down"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::MaxRetriesExceeded { .. }));
}

/// 429 with Retry-After: exactly two attempts, at least the advertised
/// delay between them
#[tokio::test]
async fn test_429_honours_retry_after() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(200).set_body_string("late"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server);
    let started = Instant::now();
    let outcome = fetcher
        .fetch_url(&request(&mock_server, "/limited"))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    let FetchOutcome::Fetched(doc) = outcome else {
        panic!("expected a fetched document");
    };
    assert_eq!(doc.attempts, 2);
    assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn test_redirects_followed_to_final_url() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved here"))
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server);
    let outcome = fetcher.fetch_url(&request(&mock_server, "/old")).await.unwrap();

    let FetchOutcome::Fetched(doc) = outcome else {
        panic!("expected a fetched document");
    };
    assert!(doc.url.ends_with("/old"));
    assert!(doc.final_url.ends_with("/new"));
    assert_eq!(&doc.body[..], b"moved here");
}

#[tokio::test]
async fn test_redirect_loop_fails_after_limit() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/loop"))
        .mount(&mock_server)
        .await;

    let fetcher = fetcher_for(&mock_server);
    let err = fetcher
        .fetch_url(&request(&mock_server, "/loop"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::TooManyRedirects));
}

#[tokio::test]
async fn test_oversized_body_aborts_as_too_large() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64 * 1024]))
        .mount(&mock_server)
        .await;

    let mut config = common::fast_config([format!("{}/", mock_server.uri())]);
    config.max_file_bytes = 1024;
    let fetcher = HttpFetcher::new(&config).unwrap();

    let err = fetcher
        .fetch_url(&request(&mock_server, "/big"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::TooLarge { limit: 1024 }));
}
