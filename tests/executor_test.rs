//! End-to-end executor scenarios against a mock origin

mod common;

use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{build_executor, fast_config};
use jangma::config::CrawlStrategy;
use jangma::events::EventKind;
use jangma::iteration::IterationMode;
use jangma::state::CrawlState;

/// Baseline then incremental over three URLs, one modified: the unchanged
/// URLs answer 304 and only the modified one downloads a body
#[tokio::test]
async fn test_baseline_then_incremental_one_modified() {
    let mock_server = MockServer::start().await;

    // Conditional mocks first: matching order makes 304s win once the
    // incremental iteration sends validators
    Mock::given(method("GET"))
        .and(path("/a"))
        .and(header("if-none-match", "\"a0\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .and(header("if-none-match", "\"b0\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/c"))
        .and(header("if-none-match", "\"c0\""))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("c1")
                .insert_header("etag", "\"c1\""),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    // Unconditional bodies: hit exactly once each, in the baseline
    for (route, body, etag) in [("/a", "a0", "\"a0\""), ("/b", "b0", "\"b0\""), ("/c", "c0", "\"c0\"")] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(body)
                    .insert_header("etag", etag),
            )
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let executor = build_executor(dir.path());
    let seeds: Vec<String> = ["/a", "/b", "/c"]
        .iter()
        .map(|p| format!("{}{p}", mock_server.uri()))
        .collect();

    let crawl_id = executor.start(fast_config(seeds.clone())).await.unwrap();
    let status = executor.wait(crawl_id).await.unwrap();
    assert_eq!(status.state, CrawlState::Completed);
    assert_eq!(status.progress.urls_crawled, 3);

    let iteration = executor
        .next_iteration(crawl_id, IterationMode::Incremental)
        .await
        .unwrap();
    assert_eq!(iteration.iteration_number, 1);
    let status = executor.wait(crawl_id).await.unwrap();
    assert_eq!(status.state, CrawlState::Completed);
    // Exactly one body download in the incremental iteration
    assert_eq!(status.progress.urls_crawled, 1);
    assert_eq!(status.progress.urls_skipped_unchanged, 2);

    let iterations = executor.iterations().iterations_for(crawl_id);
    assert_eq!(iterations.len(), 2);
    let diff = executor
        .iterations()
        .compare(iterations[0].iteration_id, iterations[1].iteration_id)
        .unwrap();
    assert!(diff.new.is_empty());
    assert_eq!(diff.modified, vec![seeds[2].clone()]);
    assert_eq!(
        diff.unchanged,
        vec![seeds[0].clone(), seeds[1].clone()]
    );
    assert!(diff.deleted.is_empty());
}

/// Robots denial is recorded per URL, not fatal to the crawl
#[tokio::test]
async fn test_robots_denial_recorded_not_fatal() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /blocked\n"),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blocked"))
        .respond_with(ResponseTemplate::new(200).set_body_string("never served"))
        .expect(0)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/open"))
        .respond_with(ResponseTemplate::new(200).set_body_string("served"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let executor = build_executor(dir.path());
    let mut config = fast_config([
        format!("{}/blocked", mock_server.uri()),
        format!("{}/open", mock_server.uri()),
    ]);
    config.respect_robots = true;

    let crawl_id = executor.start(config).await.unwrap();
    let status = executor.wait(crawl_id).await.unwrap();

    assert_eq!(status.state, CrawlState::Completed);
    assert_eq!(status.progress.urls_crawled, 1);
    assert_eq!(status.progress.urls_failed, 1);

    let denials: Vec<_> = executor
        .runtime()
        .bus
        .history(crawl_id)
        .into_iter()
        .filter(|e| {
            e.event_type == EventKind::UrlFailed && e.data["reason"] == "robots_denied"
        })
        .collect();
    assert_eq!(denials.len(), 1);
    assert!(denials[0].data["url"].as_str().unwrap().ends_with("/blocked"));
}

/// Cancel is idempotent and always terminal: the second cancel changes
/// nothing and emits no further events
#[tokio::test]
async fn test_cancel_idempotent_and_terminal() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/slow/\d+$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("slow")
                .set_delay(Duration::from_millis(250)),
        )
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let executor = build_executor(dir.path());
    let seeds: Vec<String> = (0..40)
        .map(|i| format!("{}/slow/{i}", mock_server.uri()))
        .collect();
    let mut config = fast_config(seeds);
    config.concurrent_requests = 2;

    let crawl_id = executor.start(config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    executor.cancel(crawl_id).await.unwrap();
    let status = executor.status(crawl_id).await.unwrap();
    assert_eq!(status.state, CrawlState::Cancelled);

    // Second cancel: success, no state change, no new cancelled event
    executor.cancel(crawl_id).await.unwrap();
    let status = executor.status(crawl_id).await.unwrap();
    assert_eq!(status.state, CrawlState::Cancelled);

    let history = executor.runtime().bus.history(crawl_id);
    let cancelled_events = history
        .iter()
        .filter(|e| e.event_type == EventKind::Cancelled)
        .count();
    assert_eq!(cancelled_events, 1);
    // Nothing after the cancelled event except its own checkpoint record
    let cancel_idx = history
        .iter()
        .position(|e| e.event_type == EventKind::Cancelled)
        .unwrap();
    assert!(history[cancel_idx + 1..]
        .iter()
        .all(|e| e.event_type == EventKind::CheckpointCreated));
}

/// Recursive strategy discovers links and respects max_depth
#[tokio::test]
async fn test_recursive_discovery_with_depth_limit() {
    let mock_server = MockServer::start().await;
    let page = |links: &[&str]| {
        let anchors: String = links
            .iter()
            .map(|l| format!("<a href=\"{l}\">link</a>"))
            .collect();
        format!("<html><head><title>t</title></head><body><p>some paragraph text</p>{anchors}</body></html>")
    };

    Mock::given(method("GET"))
        .and(path("/index"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(page(&["/level1"]))
                .insert_header("content-type", "text/html"),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/level1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(page(&["/level2"]))
                .insert_header("content-type", "text/html"),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/level2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(page(&["/level3"]))
                .insert_header("content-type", "text/html"),
        )
        .expect(0) // beyond max_depth
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let executor = build_executor(dir.path());
    let mut config = fast_config([format!("{}/index", mock_server.uri())]);
    config.strategy = CrawlStrategy::Recursive;
    config.max_depth = 1;

    let crawl_id = executor.start(config).await.unwrap();
    let status = executor.wait(crawl_id).await.unwrap();

    assert_eq!(status.state, CrawlState::Completed);
    // index (depth 0) and level1 (depth 1); level2 would be depth 2
    assert_eq!(status.progress.urls_crawled, 2);
}

/// max_pages stops dispatch once the budget is spent
#[tokio::test]
async fn test_max_pages_limit() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/p/\d+$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("page"))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let executor = build_executor(dir.path());
    let seeds: Vec<String> = (0..20)
        .map(|i| format!("{}/p/{i}", mock_server.uri()))
        .collect();
    let mut config = fast_config(seeds);
    config.concurrent_requests = 1;
    config.max_pages = Some(5);

    let crawl_id = executor.start(config).await.unwrap();
    let status = executor.wait(crawl_id).await.unwrap();

    assert_eq!(status.state, CrawlState::Completed);
    assert!(status.progress.urls_crawled >= 5);
    assert!(status.progress.urls_crawled < 20);
}

/// Per-URL failures never fail the crawl
#[tokio::test]
async fn test_failures_are_isolated() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fine"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let executor = build_executor(dir.path());
    let crawl_id = executor
        .start(fast_config([
            format!("{}/ok", mock_server.uri()),
            format!("{}/gone", mock_server.uri()),
        ]))
        .await
        .unwrap();
    let status = executor.wait(crawl_id).await.unwrap();

    assert_eq!(status.state, CrawlState::Completed);
    assert_eq!(status.progress.urls_crawled, 1);
    assert_eq!(status.progress.urls_failed, 1);
    assert!((status.progress.success_rate() - 0.5).abs() < 0.01);
}

/// Event stream carries the lifecycle in order for subscribers
#[tokio::test]
async fn test_event_stream_lifecycle_order() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/only"))
        .respond_with(ResponseTemplate::new(200).set_body_string("body"))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let executor = build_executor(dir.path());
    let crawl_id = executor
        .start(fast_config([format!("{}/only", mock_server.uri())]))
        .await
        .unwrap();
    executor.wait(crawl_id).await.unwrap();

    let history = executor.runtime().bus.history(crawl_id);
    let kinds: Vec<EventKind> = history.iter().map(|e| e.event_type).collect();

    // Monotonic event ids
    for window in history.windows(2) {
        assert!(window[0].event_id < window[1].event_id);
    }
    assert!(kinds.contains(&EventKind::CrawlStarted));
    assert!(kinds.contains(&EventKind::IterationStarted));
    assert!(kinds.contains(&EventKind::UrlFetched));
    assert!(kinds.contains(&EventKind::IterationCompleted));

    // iteration_started precedes url_fetched precedes iteration_completed
    let pos = |k: EventKind| kinds.iter().position(|x| *x == k).unwrap();
    assert!(pos(EventKind::IterationStarted) < pos(EventKind::UrlFetched));
    assert!(pos(EventKind::UrlFetched) < pos(EventKind::IterationCompleted));
}
