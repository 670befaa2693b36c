//! Unified error handling for the jangma crawl engine
//!
//! Domain modules define their own error enums; this module re-exports them
//! and wraps everything in a single [`Error`] for cross-domain call sites.
//!
//! # Error Hierarchy
//!
//! ```text
//! Error (unified)
//! ├── Fetch (FetchError: network, protocol subcodes)
//! ├── State (StateError: IllegalTransition, ...)
//! ├── Iteration (IterationError: Sealed, chain violations)
//! ├── Checkpoint (CheckpointError: Corrupt, SchemaMismatch, Terminal)
//! ├── Content (processor failure, recorded per URL)
//! ├── Storage (anyhow::Error, retried then fatal)
//! ├── Config (rejected synchronously at start)
//! └── Other (anyhow::Error)
//! ```
//!
//! Per-URL errors are recovered locally by the executor and recorded in the
//! failed set; state and storage errors propagate and fail the crawl.

use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::checkpoint::CheckpointError;
pub use crate::fetch::FetchError;
pub use crate::iteration::IterationError;
pub use crate::state::StateError;

use crate::models::CrawlId;

/// Unified result type for jangma operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error category for metrics and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Transient network/HTTP transport failures
    Network,
    /// Non-retryable HTTP protocol outcomes (4xx, robots, limits)
    Protocol,
    /// Content processor failures
    Content,
    /// Lifecycle violations (illegal transition, sealed iteration, terminal checkpoint)
    State,
    /// Persistence failures
    Storage,
    /// Configuration errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Get category name as string
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Content => "content",
            ErrorCategory::State => "state",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Config => "config",
            ErrorCategory::Other => "other",
        }
    }
}

/// Configuration error, surfaced synchronously when a crawl is submitted
#[derive(Error, Debug)]
#[error("config error: {0}")]
pub struct ConfigError(String);

impl ConfigError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Unified error type for cross-domain operations
#[derive(Error, Debug)]
pub enum Error {
    /// Fetch pipeline errors
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// State machine violations
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Iteration store violations
    #[error("iteration error: {0}")]
    Iteration(#[from] IterationError),

    /// Checkpoint store errors
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Content processor failure for a single URL
    #[error("content error: {0}")]
    Content(String),

    /// Persistence failure after retries
    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),

    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Operation referenced a crawl this executor does not know
    #[error("unknown crawl: {0}")]
    UnknownCrawl(CrawlId),

    /// Generic errors with context
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a storage error
    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        Error::Storage(err.into())
    }

    /// Create a content error
    pub fn content(msg: impl Into<String>) -> Self {
        Error::Content(msg.into())
    }

    /// Check if this error is recoverable (the crawl can continue)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Fetch(e) => e.is_recoverable(),
            Error::Content(_) => true, // recorded per URL, crawl continues
            Error::Storage(_) => false, // already past the retry budget
            Error::State(_) => false,
            Error::Iteration(_) => false,
            Error::Checkpoint(e) => e.is_recoverable(),
            Error::Config(_) => false,
            Error::UnknownCrawl(_) => false,
            Error::Other(_) => false,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Fetch(e) => e.category(),
            Error::Content(_) => ErrorCategory::Content,
            Error::State(_) | Error::Iteration(_) => ErrorCategory::State,
            Error::Checkpoint(CheckpointError::Io(_)) => ErrorCategory::Storage,
            Error::Checkpoint(_) => ErrorCategory::State,
            Error::Storage(_) => ErrorCategory::Storage,
            Error::Config(_) => ErrorCategory::Config,
            Error::UnknownCrawl(_) => ErrorCategory::State,
            Error::Other(_) => ErrorCategory::Other,
        }
    }

    /// Map to the CLI exit code contract
    ///
    /// `0` success, `2` invalid arguments/config, `3` unknown crawl,
    /// `4` illegal state for the requested operation, `5` corrupt checkpoint,
    /// `1` anything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 2,
            Error::UnknownCrawl(_) => 3,
            Error::Checkpoint(CheckpointError::Corrupt { .. }) => 5,
            Error::Checkpoint(CheckpointError::SchemaMismatch { .. }) => 5,
            Error::Checkpoint(CheckpointError::Terminal(_)) => 4,
            Error::State(_) | Error::Iteration(_) => 4,
            _ => 1,
        }
    }
}
