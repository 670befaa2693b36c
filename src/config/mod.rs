//! Configuration management for jangma crawls
//!
//! This module defines the immutable [`CrawlConfig`] that a planner hands to
//! the executor, plus loading from TOML files, environment variables, and
//! validation. Unknown keys are rejected at load time so a crawl never starts
//! with silently ignored options.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Crawl strategy selecting how the frontier is grown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStrategy {
    /// Crawl the seed URLs only, no link following
    Focused,
    /// Follow discovered links up to `max_depth`
    Recursive,
    /// Expand seeds via sitemap URLs before crawling
    Sitemap,
    /// Seeds come from an external search step
    SearchBased,
    /// Seeds are API endpoints, fetched as-is
    Api,
}

impl CrawlStrategy {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Focused => "focused",
            Self::Recursive => "recursive",
            Self::Sitemap => "sitemap",
            Self::SearchBased => "search_based",
            Self::Api => "api",
        }
    }

    /// Whether this strategy follows links discovered in fetched documents
    pub fn follows_links(&self) -> bool {
        matches!(self, Self::Recursive | Self::Sitemap)
    }
}

impl std::fmt::Display for CrawlStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable configuration for a single crawl
///
/// Constructed by a [`crate::planner::Planner`], validated once at start, and
/// never mutated afterwards. Every option maps to an enumerated key; unknown
/// keys fail deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrawlConfig {
    /// Seed URL list (at least one)
    pub seeds: Vec<String>,

    /// Frontier growth strategy
    #[serde(default = "defaults::strategy")]
    pub strategy: CrawlStrategy,

    /// Maximum in-flight requests across all hosts (1..=200)
    #[serde(default = "defaults::concurrent_requests")]
    pub concurrent_requests: usize,

    /// Maximum in-flight requests to a single host
    #[serde(default = "defaults::per_host_cap")]
    pub per_host_cap: usize,

    /// Minimum delay between requests to the same host, in seconds
    #[serde(default = "defaults::delay_seconds")]
    pub delay_seconds: f64,

    /// Per-request timeout in seconds
    #[serde(default = "defaults::timeout_seconds")]
    pub timeout_seconds: u64,

    /// Maximum retry attempts per URL (0..=10)
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Maximum pages to fetch (None = unbounded)
    #[serde(default)]
    pub max_pages: Option<u64>,

    /// Maximum documents to emit (None = unbounded)
    #[serde(default)]
    pub max_documents: Option<u64>,

    /// Maximum link depth from a seed
    #[serde(default = "defaults::max_depth")]
    pub max_depth: u32,

    /// Maximum bytes for a single body; larger reads abort as `too_large`
    #[serde(default = "defaults::max_file_bytes")]
    pub max_file_bytes: u64,

    /// Maximum total bytes downloaded across the crawl (None = unbounded)
    #[serde(default)]
    pub max_total_bytes: Option<u64>,

    /// Overall crawl timeout in minutes; expiry cancels the crawl
    #[serde(default)]
    pub max_duration_minutes: Option<u64>,

    /// Honour robots.txt
    #[serde(default = "defaults::respect_robots")]
    pub respect_robots: bool,

    /// User-Agent header value
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Allowed file extensions (empty = all)
    #[serde(default)]
    pub allowed_file_types: BTreeSet<String>,

    /// Keyword filters applied to discovered links (empty = all)
    #[serde(default)]
    pub keyword_filters: Vec<String>,

    /// Minimum quality score a processor result must reach (0.0..=1.0)
    #[serde(default)]
    pub min_quality_score: f64,

    /// Write an automatic checkpoint every N completed fetches
    #[serde(default = "defaults::checkpoint_every_n")]
    pub checkpoint_every_n: u64,

    /// Soft cap on frontier size; discovery above it drops URLs
    #[serde(default = "defaults::frontier_soft_cap")]
    pub frontier_soft_cap: usize,

    /// Optional quality guard: pause when success rate drops below this
    /// threshold, evaluated at auto-checkpoint boundaries
    #[serde(default)]
    pub pause_on_success_rate_below: Option<f64>,
}

mod defaults {
    use super::CrawlStrategy;

    pub fn strategy() -> CrawlStrategy {
        CrawlStrategy::Recursive
    }
    pub fn concurrent_requests() -> usize {
        8
    }
    pub fn per_host_cap() -> usize {
        4
    }
    pub fn delay_seconds() -> f64 {
        1.0
    }
    pub fn timeout_seconds() -> u64 {
        30
    }
    pub fn max_retries() -> u32 {
        3
    }
    pub fn max_depth() -> u32 {
        3
    }
    pub fn max_file_bytes() -> u64 {
        10 * 1024 * 1024
    }
    pub fn respect_robots() -> bool {
        true
    }
    pub fn user_agent() -> String {
        format!("jangma/{}", env!("CARGO_PKG_VERSION"))
    }
    pub fn checkpoint_every_n() -> u64 {
        50
    }
    pub fn frontier_soft_cap() -> usize {
        1_000_000
    }
}

impl CrawlConfig {
    /// Create a config for the given seeds with default options
    pub fn with_seeds<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seeds: seeds.into_iter().map(Into::into).collect(),
            strategy: defaults::strategy(),
            concurrent_requests: defaults::concurrent_requests(),
            per_host_cap: defaults::per_host_cap(),
            delay_seconds: defaults::delay_seconds(),
            timeout_seconds: defaults::timeout_seconds(),
            max_retries: defaults::max_retries(),
            max_pages: None,
            max_documents: None,
            max_depth: defaults::max_depth(),
            max_file_bytes: defaults::max_file_bytes(),
            max_total_bytes: None,
            max_duration_minutes: None,
            respect_robots: defaults::respect_robots(),
            user_agent: defaults::user_agent(),
            allowed_file_types: BTreeSet::new(),
            keyword_filters: Vec::new(),
            min_quality_score: 0.0,
            checkpoint_every_n: defaults::checkpoint_every_n(),
            frontier_soft_cap: defaults::frontier_soft_cap(),
            pause_on_success_rate_below: None,
        }
    }

    /// Load configuration from a TOML file
    ///
    /// Unknown keys in the file are rejected with [`ConfigError`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::new(format!("failed to read config file {}: {e}", path.display()))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            ConfigError::new(format!("failed to parse config file {}: {e}", path.display()))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `JANGMA_*` environment variable overrides
    ///
    /// Recognized keys mirror the config fields: `JANGMA_CONCURRENT_REQUESTS`,
    /// `JANGMA_PER_HOST_CAP`, `JANGMA_DELAY_SECONDS`, `JANGMA_TIMEOUT_SECONDS`,
    /// `JANGMA_MAX_RETRIES`, `JANGMA_USER_AGENT`, `JANGMA_RESPECT_ROBOTS`,
    /// `JANGMA_MAX_FILE_BYTES`, `JANGMA_MAX_TOTAL_BYTES`, `JANGMA_MAX_PAGES`,
    /// `JANGMA_MAX_DOCUMENTS`, `JANGMA_MAX_DEPTH`, `JANGMA_CHECKPOINT_EVERY_N`,
    /// `JANGMA_FRONTIER_SOFT_CAP`.
    pub fn apply_env_overrides(&mut self) {
        fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }

        if let Some(v) = parse_env("JANGMA_CONCURRENT_REQUESTS") {
            self.concurrent_requests = v;
        }
        if let Some(v) = parse_env("JANGMA_PER_HOST_CAP") {
            self.per_host_cap = v;
        }
        if let Some(v) = parse_env("JANGMA_DELAY_SECONDS") {
            self.delay_seconds = v;
        }
        if let Some(v) = parse_env("JANGMA_TIMEOUT_SECONDS") {
            self.timeout_seconds = v;
        }
        if let Some(v) = parse_env("JANGMA_MAX_RETRIES") {
            self.max_retries = v;
        }
        if let Ok(v) = std::env::var("JANGMA_USER_AGENT") {
            self.user_agent = v;
        }
        if let Some(v) = parse_env("JANGMA_RESPECT_ROBOTS") {
            self.respect_robots = v;
        }
        if let Some(v) = parse_env("JANGMA_MAX_FILE_BYTES") {
            self.max_file_bytes = v;
        }
        if let Some(v) = parse_env("JANGMA_MAX_TOTAL_BYTES") {
            self.max_total_bytes = Some(v);
        }
        if let Some(v) = parse_env("JANGMA_MAX_PAGES") {
            self.max_pages = Some(v);
        }
        if let Some(v) = parse_env("JANGMA_MAX_DOCUMENTS") {
            self.max_documents = Some(v);
        }
        if let Some(v) = parse_env("JANGMA_MAX_DEPTH") {
            self.max_depth = v;
        }
        if let Some(v) = parse_env("JANGMA_CHECKPOINT_EVERY_N") {
            self.checkpoint_every_n = v;
        }
        if let Some(v) = parse_env("JANGMA_FRONTIER_SOFT_CAP") {
            self.frontier_soft_cap = v;
        }
    }

    /// Validate configuration values and ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seeds.is_empty() {
            return Err(ConfigError::new("seeds must not be empty"));
        }
        for seed in &self.seeds {
            url::Url::parse(seed)
                .map_err(|e| ConfigError::new(format!("invalid seed URL {seed}: {e}")))?;
        }
        if !(1..=200).contains(&self.concurrent_requests) {
            return Err(ConfigError::new(format!(
                "concurrent_requests must be in 1..=200, got {}",
                self.concurrent_requests
            )));
        }
        if self.per_host_cap == 0 {
            return Err(ConfigError::new("per_host_cap must be greater than 0"));
        }
        if self.delay_seconds < 0.0 || !self.delay_seconds.is_finite() {
            return Err(ConfigError::new("delay_seconds must be finite and >= 0"));
        }
        if self.timeout_seconds == 0 {
            return Err(ConfigError::new("timeout_seconds must be greater than 0"));
        }
        if self.max_retries > 10 {
            return Err(ConfigError::new(format!(
                "max_retries must be in 0..=10, got {}",
                self.max_retries
            )));
        }
        if !(0.0..=1.0).contains(&self.min_quality_score) {
            return Err(ConfigError::new("min_quality_score must be in 0.0..=1.0"));
        }
        if self.checkpoint_every_n == 0 {
            return Err(ConfigError::new("checkpoint_every_n must be greater than 0"));
        }
        if let Some(threshold) = self.pause_on_success_rate_below {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::new(
                    "pause_on_success_rate_below must be in 0.0..=1.0",
                ));
            }
        }
        Ok(())
    }

    /// Get per-request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Get per-host delay as Duration
    #[must_use]
    pub fn host_delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_seconds)
    }

    /// Get the overall crawl deadline as a Duration, if configured
    #[must_use]
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_minutes.map(|m| Duration::from_secs(m * 60))
    }
}
