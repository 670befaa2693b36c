//! Shared helpers for integration tests

// Each test binary uses a subset of these helpers
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use jangma::config::{CrawlConfig, CrawlStrategy};
use jangma::executor::CrawlExecutor;
use jangma::processor::LinkExtractor;
use jangma::runtime::Runtime;
use jangma::state::CrawlState;

/// A config tuned for fast tests: no politeness delay, no robots, focused
/// strategy over the given seeds
pub fn fast_config<I, S>(seeds: I) -> CrawlConfig
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut config = CrawlConfig::with_seeds(seeds);
    config.strategy = CrawlStrategy::Focused;
    config.delay_seconds = 0.0;
    config.respect_robots = false;
    config.timeout_seconds = 10;
    config.max_retries = 1;
    config
}

/// Build an executor over a data directory with the default link extractor
pub fn build_executor(data_dir: &Path) -> CrawlExecutor {
    CrawlExecutor::new(data_dir, Runtime::new(), Arc::new(LinkExtractor::new()))
        .expect("executor opens")
}

/// Poll a crawl's status until the predicate holds or the timeout expires
pub async fn wait_for_state(
    executor: &CrawlExecutor,
    crawl_id: jangma::models::CrawlId,
    predicate: impl Fn(CrawlState) -> bool,
    timeout: Duration,
) -> CrawlState {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = executor.status(crawl_id).await.expect("status");
        if predicate(status.state) {
            return status.state;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting; last state {}",
            status.state
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
