//! Iteration chain invariants and change-detection properties

mod common;

use proptest::prelude::*;
use std::collections::HashMap;
use tempfile::TempDir;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{build_executor, fast_config};
use jangma::fingerprint::{
    content_hash, ChangeClass, ChangeDetector, FetchDecision, Fingerprint, ProbeHeaders,
};
use jangma::iteration::IterationMode;
use jangma::state::CrawlState;

/// Chain integrity: iteration N has parent N-1 and baseline 0
#[tokio::test]
async fn test_iteration_chain_integrity() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/i/\d+$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("stable"))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let executor = build_executor(dir.path());
    let seeds: Vec<String> = (0..3).map(|i| format!("{}/i/{i}", mock_server.uri())).collect();

    let crawl_id = executor.start(fast_config(seeds)).await.unwrap();
    executor.wait(crawl_id).await.unwrap();
    for _ in 0..2 {
        executor
            .next_iteration(crawl_id, IterationMode::Incremental)
            .await
            .unwrap();
        let status = executor.wait(crawl_id).await.unwrap();
        assert_eq!(status.state, CrawlState::Completed);
    }

    let iterations = executor.iterations().iterations_for(crawl_id);
    assert_eq!(iterations.len(), 3);
    let baseline = &iterations[0];
    assert_eq!(baseline.iteration_number, 0);
    assert_eq!(baseline.mode, IterationMode::Baseline);
    assert!(baseline.parent_iteration_id.is_none());

    for iteration in &iterations[1..] {
        let parent_id = iteration.parent_iteration_id.expect("has parent");
        let parent = executor.iterations().get(parent_id).unwrap();
        assert_eq!(parent.iteration_number, iteration.iteration_number - 1);
        assert_eq!(
            iteration.baseline_iteration_id,
            Some(baseline.iteration_id)
        );
    }
}

/// Fingerprint uniqueness: one fingerprint per (iteration, url), and the
/// set matches what was crawled
#[tokio::test]
async fn test_fingerprints_unique_per_iteration() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/u/\d+$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("unique"))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let executor = build_executor(dir.path());
    let seeds: Vec<String> = (0..8).map(|i| format!("{}/u/{i}", mock_server.uri())).collect();

    let crawl_id = executor.start(fast_config(seeds.clone())).await.unwrap();
    let status = executor.wait(crawl_id).await.unwrap();
    assert_eq!(status.progress.urls_crawled, 8);

    let iteration = executor.iterations().latest(crawl_id).unwrap();
    let fingerprints = executor
        .iterations()
        .get_fingerprints(iteration.iteration_id)
        .unwrap();
    assert_eq!(fingerprints.len(), seeds.len());
    for seed in &seeds {
        let fp = fingerprints.get(seed).expect("fingerprint recorded");
        assert_eq!(fp.content_hash, content_hash(b"unique"));
        assert_eq!(fp.byte_size, 6);
    }
}

/// Full mode re-fetches everything and still compares against the chain
#[tokio::test]
async fn test_full_mode_refetches_everything() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/f/\d+$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("same body")
                .insert_header("etag", "\"fixed\""),
        )
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let executor = build_executor(dir.path());
    let seeds: Vec<String> = (0..4).map(|i| format!("{}/f/{i}", mock_server.uri())).collect();

    let crawl_id = executor.start(fast_config(seeds)).await.unwrap();
    executor.wait(crawl_id).await.unwrap();
    executor
        .next_iteration(crawl_id, IterationMode::Full)
        .await
        .unwrap();
    let status = executor.wait(crawl_id).await.unwrap();

    // Full mode sends no validators, so all bodies download again
    assert_eq!(status.progress.urls_crawled, 4);
    assert_eq!(status.progress.urls_skipped_unchanged, 0);

    // But the comparison still sees everything as unchanged
    let iterations = executor.iterations().iterations_for(crawl_id);
    let diff = executor
        .iterations()
        .compare(iterations[0].iteration_id, iterations[1].iteration_id)
        .unwrap();
    assert_eq!(diff.summary.unchanged, 4);
    assert_eq!(diff.summary.modified, 0);
}

proptest! {
    /// Change-class soundness: hash equality decides the classification
    #[test]
    fn prop_classify_soundness(
        url in "[a-z]{1,8}",
        parent_body in proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
        new_body in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let url = format!("https://example.com/{url}");
        let detector = ChangeDetector::new();
        let mut parents = HashMap::new();
        if let Some(body) = &parent_body {
            parents.insert(url.clone(), Fingerprint::from_body(&url, body, None, None));
        }

        let class = detector.classify(&url, &new_body, &parents);
        match parent_body {
            None => prop_assert_eq!(class, ChangeClass::New),
            Some(body) if content_hash(&body) == content_hash(&new_body) => {
                prop_assert_eq!(class, ChangeClass::Unchanged)
            }
            Some(_) => prop_assert_eq!(class, ChangeClass::Modified),
        }
    }

    /// Strong equal ETags always skip; weak tags never match
    #[test]
    fn prop_etag_skip_policy(tag in "\"[a-z0-9]{1,12}\"", weak in any::<bool>()) {
        let url = "https://example.com/p";
        let detector = ChangeDetector::new();
        let stored = if weak { format!("W/{tag}") } else { tag.clone() };

        let mut parents = HashMap::new();
        parents.insert(
            url.to_string(),
            Fingerprint::from_body(url, b"body", Some(stored.clone()), None),
        );
        let probe = ProbeHeaders {
            etag: Some(stored),
            last_modified: None,
        };

        let decision = detector.should_fetch(url, &parents, Some(&probe));
        if weak {
            prop_assert_eq!(decision, FetchDecision::Fetch);
        } else {
            prop_assert_eq!(decision, FetchDecision::Skip);
        }
    }

    /// deleted_set is exactly the parent keys minus the seen keys
    #[test]
    fn prop_deleted_set(
        parent_urls in proptest::collection::btree_set("[a-z]{1,6}", 0..12),
        seen_urls in proptest::collection::btree_set("[a-z]{1,6}", 0..12),
    ) {
        let detector = ChangeDetector::new();
        let parents: HashMap<_, _> = parent_urls
            .iter()
            .map(|u| (u.clone(), Fingerprint::from_body(u, b"x", None, None)))
            .collect();

        let deleted = detector.deleted_set(&parents, &seen_urls);
        for url in &deleted {
            prop_assert!(parent_urls.contains(url));
            prop_assert!(!seen_urls.contains(url));
        }
        let expected = parent_urls.difference(&seen_urls).count();
        prop_assert_eq!(deleted.len(), expected);
    }
}
