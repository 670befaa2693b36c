// Core data structures for the jangma crawl engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CrawlConfig;

/// Identifier of a crawl
pub type CrawlId = Uuid;

/// Identifier of an iteration within a crawl
pub type IterationId = Uuid;

/// Identifier of a checkpoint
pub type CheckpointId = Uuid;

/// A crawl: identity, immutable config, and iteration chain pointers
///
/// Iterations and checkpoints reference the crawl by id; the crawl itself
/// only stores ids back, never pointers, so the object graph stays acyclic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crawl {
    pub crawl_id: CrawlId,
    pub config: CrawlConfig,
    pub created_at: DateTime<Utc>,

    /// Most recent iteration of this crawl, if any
    pub current_iteration_id: Option<IterationId>,

    /// Iteration 0 of the chain, set when the baseline is created
    pub baseline_iteration_id: Option<IterationId>,
}

impl Crawl {
    /// Create a new crawl with a fresh id
    pub fn new(config: CrawlConfig) -> Self {
        Self {
            crawl_id: Uuid::new_v4(),
            config,
            created_at: Utc::now(),
            current_iteration_id: None,
            baseline_iteration_id: None,
        }
    }
}

/// Frontier element: a URL waiting to be fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url: String,

    /// Link depth from the seed that led here (seeds are depth 0)
    pub depth: u32,

    /// URL of the page this one was discovered on, if any
    pub discovered_from: Option<String>,

    pub enqueued_at: DateTime<Utc>,

    /// Fetch attempts made so far
    pub attempt_count: u32,
}

impl UrlRecord {
    /// Create a seed record at depth 0
    pub fn seed(url: &str) -> Self {
        Self {
            url: url.to_string(),
            depth: 0,
            discovered_from: None,
            enqueued_at: Utc::now(),
            attempt_count: 0,
        }
    }

    /// Create a record for a URL discovered on `parent` at `depth`
    pub fn discovered(url: &str, parent: &str, depth: u32) -> Self {
        Self {
            url: url.to_string(),
            depth,
            discovered_from: Some(parent.to_string()),
            enqueued_at: Utc::now(),
            attempt_count: 0,
        }
    }
}

/// Why a URL ended up in the failed set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Non-retryable 4xx response
    ClientError,
    /// robots.txt disallowed the URL
    RobotsDenied,
    /// Body exceeded `max_file_bytes`
    TooLarge,
    /// More than the redirect limit
    TooManyRedirects,
    /// Transport-level failure after retries were exhausted
    Network,
    /// Request timed out after retries were exhausted
    Timeout,
    /// Discovery dropped the URL because the frontier hit its soft cap
    FrontierFull,
    /// Content processor reported a failure
    Processor,
    /// Fingerprint persistence failed
    Storage,
}

impl FailureReason {
    /// Stable string form used in events and persisted records
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientError => "client_error",
            Self::RobotsDenied => "robots_denied",
            Self::TooLarge => "too_large",
            Self::TooManyRedirects => "too_many_redirects",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::FrontierFull => "frontier_full",
            Self::Processor => "processor",
            Self::Storage => "storage",
        }
    }

    /// Failures that were caused by the origin rather than by policy
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::ClientError | Self::Network | Self::Timeout | Self::TooManyRedirects
        )
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-URL failure record kept in the crawl's failed set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub url: String,
    pub reason: FailureReason,

    /// Human-readable detail (status code, error text)
    pub detail: String,

    pub attempts: u32,
    pub last_attempt_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(url: &str, reason: FailureReason, detail: impl Into<String>, attempts: u32) -> Self {
        Self {
            url: url.to_string(),
            reason,
            detail: detail.into(),
            attempts,
            last_attempt_at: Utc::now(),
        }
    }
}

/// A document emitted by a content processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub url: String,

    /// URL after redirects, when it differs from the requested one
    pub final_url: Option<String>,

    pub title: Option<String>,

    /// Extracted text content
    pub text: String,

    /// Quality score in 0.0..=1.0 as judged by the processor
    pub quality_score: f64,

    /// Size of the raw fetched body
    pub byte_size: u64,

    pub processed_at: DateTime<Utc>,
}

/// Progress counters for a crawl, checkpointed and reported in status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlProgress {
    pub urls_crawled: u64,
    pub urls_failed: u64,
    pub urls_skipped_unchanged: u64,
    pub documents_found: u64,
    pub bytes_downloaded: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CrawlProgress {
    /// Fraction of attempted URLs that succeeded
    pub fn success_rate(&self) -> f64 {
        let attempted = self.urls_crawled + self.urls_failed;
        if attempted == 0 {
            return 1.0;
        }
        self.urls_crawled as f64 / attempted as f64
    }

    /// URLs handled per minute since the crawl started
    pub fn throughput_per_min(&self) -> f64 {
        let Some(started) = self.started_at else {
            return 0.0;
        };
        let elapsed = (Utc::now() - started).num_seconds().max(1) as f64;
        (self.urls_crawled as f64 / elapsed) * 60.0
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlConfig;

    #[test]
    fn test_crawl_new_has_no_iterations() {
        let crawl = Crawl::new(CrawlConfig::with_seeds(["https://example.com/"]));
        assert!(crawl.current_iteration_id.is_none());
        assert!(crawl.baseline_iteration_id.is_none());
    }

    #[test]
    fn test_url_record_seed() {
        let record = UrlRecord::seed("https://example.com/");
        assert_eq!(record.depth, 0);
        assert!(record.discovered_from.is_none());
        assert_eq!(record.attempt_count, 0);
    }

    #[test]
    fn test_url_record_discovered() {
        let record = UrlRecord::discovered("https://example.com/a", "https://example.com/", 2);
        assert_eq!(record.depth, 2);
        assert_eq!(
            record.discovered_from.as_deref(),
            Some("https://example.com/")
        );
    }

    #[test]
    fn test_failure_reason_strings() {
        assert_eq!(FailureReason::RobotsDenied.as_str(), "robots_denied");
        assert_eq!(FailureReason::TooManyRedirects.as_str(), "too_many_redirects");
        assert_eq!(FailureReason::FrontierFull.as_str(), "frontier_full");
    }

    #[test]
    fn test_failure_reason_serde_snake_case() {
        let json = serde_json::to_string(&FailureReason::TooLarge).unwrap();
        assert_eq!(json, "\"too_large\"");
    }

    #[test]
    fn test_progress_success_rate() {
        let progress = CrawlProgress {
            urls_crawled: 95,
            urls_failed: 5,
            ..Default::default()
        };
        assert!((progress.success_rate() - 0.95).abs() < 0.001);

        let empty = CrawlProgress::default();
        assert!((empty.success_rate() - 1.0).abs() < f64::EPSILON);
    }
}
