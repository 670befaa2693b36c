//! jangma - Resumable multi-pass crawl engine
//!
//! A web crawling core built around durable, resumable, incrementally
//! updatable crawls: a typed lifecycle state machine, fingerprint-based
//! change detection, compressed checkpoints, and a politeness-aware
//! concurrent fetch pipeline, wired together by an observable executor.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Crawl configuration and validation
//! - [`models`] - Core data structures and types
//! - [`fingerprint`] - Content identity and change detection
//! - [`iteration`] - Iteration chains and fingerprint sets
//! - [`checkpoint`] - Compressed durable snapshots
//! - [`events`] - Per-crawl pub/sub with bounded history
//! - [`metrics`] - Counters, gauges, and rolling windows
//! - [`state`] - The crawl lifecycle state machine
//! - [`fetch`] - Concurrent fetching with politeness and retries
//! - [`executor`] - The orchestrator tying everything together
//! - [`planner`] / [`processor`] - Boundary traits for planning and extraction
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use jangma::config::CrawlConfig;
//! use jangma::executor::CrawlExecutor;
//! use jangma::processor::LinkExtractor;
//! use jangma::runtime::Runtime;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let executor = CrawlExecutor::new(
//!         Path::new("./data"),
//!         Runtime::new(),
//!         Arc::new(LinkExtractor::new()),
//!     )?;
//!     let config = CrawlConfig::with_seeds(["https://example.com/"]);
//!     let crawl_id = executor.start(config).await?;
//!     executor.wait(crawl_id).await?;
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod fetch;
pub mod fingerprint;
pub mod iteration;
pub mod metrics;
pub mod models;
pub mod planner;
pub mod processor;
pub mod runtime;
pub mod state;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::checkpoint::{Checkpoint, CheckpointKind, CheckpointStore};
    pub use crate::config::{CrawlConfig, CrawlStrategy};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::events::{CrawlEvent, EventBus, EventKind};
    pub use crate::executor::{CrawlExecutor, CrawlStatus};
    pub use crate::fingerprint::{ChangeClass, ChangeDetector, Fingerprint};
    pub use crate::iteration::{Iteration, IterationMode, IterationStore};
    pub use crate::models::{Crawl, CrawlId, UrlRecord};
    pub use crate::runtime::Runtime;
    pub use crate::state::{CrawlState, CrawlSubstate, StateMachine};
}

// Direct re-exports for convenience
pub use config::CrawlConfig;
pub use error::{Error, Result};
pub use models::{Crawl, CrawlId};
