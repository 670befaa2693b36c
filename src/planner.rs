//! Planner boundary
//!
//! Turning user intent into a [`CrawlConfig`] is an external concern; the
//! engine only depends on this trait. [`SeedListPlanner`] is the bundled
//! implementation for pre-planned configs (CLI, tests).

use async_trait::async_trait;

use crate::config::CrawlConfig;
use crate::error::ConfigError;

/// Produces a validated crawl configuration from free-form intent
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, intent: &str) -> Result<CrawlConfig, ConfigError>;
}

/// Planner that ignores the intent and returns a fixed, validated config
pub struct SeedListPlanner {
    config: CrawlConfig,
}

impl SeedListPlanner {
    pub fn new(config: CrawlConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }
}

#[async_trait]
impl Planner for SeedListPlanner {
    async fn plan(&self, _intent: &str) -> Result<CrawlConfig, ConfigError> {
        Ok(self.config.clone())
    }
}
