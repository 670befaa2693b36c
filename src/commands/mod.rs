//! CLI command implementations

pub mod checkpoint;
pub mod crawl;
pub mod iter;

use std::path::Path;
use std::sync::Arc;

use jangma::error::{ConfigError, Error};
use jangma::executor::CrawlExecutor;
use jangma::models::CrawlId;
use jangma::processor::LinkExtractor;
use jangma::runtime::Runtime;

/// Build an executor rooted at the CLI's data directory
pub fn build_executor(data_dir: &Path) -> jangma::Result<CrawlExecutor> {
    CrawlExecutor::new(data_dir, Runtime::new(), Arc::new(LinkExtractor::new()))
}

/// Parse a crawl id argument; bad ids are invalid-argument errors
pub fn parse_crawl_id(raw: &str) -> jangma::Result<CrawlId> {
    uuid::Uuid::parse_str(raw)
        .map_err(|_| Error::Config(ConfigError::new(format!("invalid crawl id: {raw}"))))
}
