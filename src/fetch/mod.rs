//! Concurrent fetch pipeline with politeness, robots handling, and retries
//!
//! The pipeline is a pool of workers fed over a bounded channel by the
//! executor's coordinator. Each worker takes one [`FetchRequest`] at a time,
//! so the pool size is the global in-flight cap; a per-host semaphore and a
//! keyed rate limiter enforce the per-host cap and minimum delay.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  fetch_request   ┌─────────────┐   fetch_result   ┌──────────────┐
//! │ Coordinator  │─────────────────▶│ Fetch       │─────────────────▶│ Coordinator  │
//! │ (frontier)   │   mpsc channel   │ Workers xN  │   mpsc channel   │ (visited)    │
//! └──────────────┘                  └─────────────┘                  └──────────────┘
//!                                     │        │
//!                                robots.txt  politeness
//! ```

pub mod client;
pub mod pipeline;
pub mod politeness;
pub mod robots;

pub use client::HttpFetcher;
pub use pipeline::{FetchPipeline, FetchResult};
pub use politeness::PolitenessGate;
pub use robots::RobotsGate;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::error::ErrorCategory;
use crate::models::{FailureReason, UrlRecord};

/// Redirect hops followed before giving up
pub const REDIRECT_LIMIT: u32 = 5;

/// A fetch job handed to a worker
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub record: UrlRecord,

    /// `If-None-Match` value from the parent fingerprint
    pub if_none_match: Option<String>,

    /// `If-Modified-Since` value from the parent fingerprint
    pub if_modified_since: Option<String>,
}

impl FetchRequest {
    /// A plain request without conditional headers
    pub fn unconditional(record: UrlRecord) -> Self {
        Self {
            record,
            if_none_match: None,
            if_modified_since: None,
        }
    }

    pub fn is_conditional(&self) -> bool {
        self.if_none_match.is_some() || self.if_modified_since.is_some()
    }
}

/// A successfully downloaded body plus the validators that came with it
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: String,

    /// URL after redirects; equals `url` when none were followed
    pub final_url: String,

    pub status: u16,
    pub body: Bytes,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,

    /// Total request attempts, including the successful one
    pub attempts: u32,
}

/// What a fetch produced
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// A 2xx response with a (possibly empty) body
    Fetched(FetchedDocument),

    /// `304 Not Modified`; no body was read
    NotModified {
        url: String,
        etag: Option<String>,
        last_modified: Option<String>,
    },
}

/// Errors from the fetch pipeline
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP transport failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Request timed out
    #[error("request timeout")]
    Timeout,

    /// Non-retryable 4xx response
    #[error("client error: {0}")]
    ClientError(u16),

    /// 5xx response (retryable)
    #[error("server error: {0}")]
    ServerError(u16),

    /// More than [`REDIRECT_LIMIT`] redirects
    #[error("too many redirects")]
    TooManyRedirects,

    /// Body exceeded the configured size limit
    #[error("body exceeded {limit} bytes")]
    TooLarge { limit: u64 },

    /// robots.txt disallowed the URL (or a redirect target)
    #[error("denied by robots.txt")]
    RobotsDenied,

    /// Retry budget exhausted; wraps the final attempt's failure
    #[error("maximum retry attempts exceeded: {last}")]
    MaxRetriesExceeded { last: String },

    /// URL could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_builder() && !e.is_redirect(),
            Self::Timeout | Self::ServerError(_) => true,
            Self::ClientError(status) => matches!(status, 408 | 429),
            Self::TooManyRedirects
            | Self::TooLarge { .. }
            | Self::RobotsDenied
            | Self::MaxRetriesExceeded { .. }
            | Self::InvalidUrl(_) => false,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Http(_) | Self::Timeout | Self::ServerError(_) | Self::MaxRetriesExceeded { .. } => {
                ErrorCategory::Network
            }
            Self::ClientError(_)
            | Self::TooManyRedirects
            | Self::TooLarge { .. }
            | Self::RobotsDenied
            | Self::InvalidUrl(_) => ErrorCategory::Protocol,
        }
    }

    /// The per-URL failure reason recorded in the failed set
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::ClientError(_) => FailureReason::ClientError,
            Self::RobotsDenied => FailureReason::RobotsDenied,
            Self::TooLarge { .. } => FailureReason::TooLarge,
            Self::TooManyRedirects => FailureReason::TooManyRedirects,
            Self::Timeout => FailureReason::Timeout,
            Self::Http(_) | Self::ServerError(_) | Self::MaxRetriesExceeded { .. } => {
                FailureReason::Network
            }
            Self::InvalidUrl(_) => FailureReason::ClientError,
        }
    }
}

/// Capability set a fetcher implementation provides
///
/// The executor depends only on this trait; the bundled [`HttpFetcher`] is a
/// plain reqwest implementation, and rendering fetchers can be swapped in
/// without touching the pipeline.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch one URL, following redirects and applying retry policy
    async fn fetch_url(&self, request: &FetchRequest) -> Result<FetchOutcome, FetchError>;

    /// Whether this fetcher executes JavaScript before returning the body
    fn can_render_javascript(&self) -> bool {
        false
    }

    /// Whether conditional requests (`If-None-Match`/`If-Modified-Since`)
    /// are honoured end to end
    fn supports_conditional_get(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_recoverability() {
        assert!(FetchError::Timeout.is_recoverable());
        assert!(FetchError::ServerError(503).is_recoverable());
        assert!(FetchError::ClientError(429).is_recoverable());
        assert!(FetchError::ClientError(408).is_recoverable());

        assert!(!FetchError::ClientError(404).is_recoverable());
        assert!(!FetchError::RobotsDenied.is_recoverable());
        assert!(!FetchError::TooManyRedirects.is_recoverable());
        assert!(!FetchError::TooLarge { limit: 1024 }.is_recoverable());
    }

    #[test]
    fn test_failure_reason_mapping() {
        assert_eq!(
            FetchError::ClientError(404).failure_reason(),
            FailureReason::ClientError
        );
        assert_eq!(
            FetchError::RobotsDenied.failure_reason(),
            FailureReason::RobotsDenied
        );
        assert_eq!(
            FetchError::TooLarge { limit: 1 }.failure_reason(),
            FailureReason::TooLarge
        );
        assert_eq!(
            FetchError::MaxRetriesExceeded {
                last: "503".into()
            }
            .failure_reason(),
            FailureReason::Network
        );
    }

    #[test]
    fn test_fetch_request_conditional() {
        let record = UrlRecord::seed("https://e.com/");
        assert!(!FetchRequest::unconditional(record.clone()).is_conditional());

        let conditional = FetchRequest {
            record,
            if_none_match: Some("\"v1\"".into()),
            if_modified_since: None,
        };
        assert!(conditional.is_conditional());
    }
}
