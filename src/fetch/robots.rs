//! robots.txt fetching, caching, and matching
//!
//! Before the first fetch to a host, its `robots.txt` is downloaded and
//! cached with a TTL. URLs disallowed for the configured user agent are not
//! fetched; the pipeline records them as `robots_denied` without retrying.
//! A missing or unfetchable robots file allows everything.

use robotstxt::DefaultMatcher;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::utils::host_key;

/// Cache TTL for robots.txt bodies
const ROBOTS_TTL: Duration = Duration::from_secs(3600);
/// Timeout for fetching the robots file itself
const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

struct CachedRobots {
    /// None when the host has no usable robots.txt
    content: Option<String>,
    fetched_at: Instant,
}

impl CachedRobots {
    fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() > ROBOTS_TTL
    }
}

/// Per-host robots.txt gate
pub struct RobotsGate {
    client: reqwest::Client,
    user_agent: String,
    /// When false, every URL is allowed without fetching robots files
    enabled: bool,
    cache: RwLock<HashMap<String, CachedRobots>>,
}

impl RobotsGate {
    /// Create a gate; `enabled = false` bypasses all checks
    pub fn new(user_agent: &str, enabled: bool) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(ROBOTS_FETCH_TIMEOUT)
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
            enabled,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// A gate that allows everything (respect_robots = false)
    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            user_agent: String::new(),
            enabled: false,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Check whether `url` may be fetched
    pub async fn is_allowed(&self, url: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let Some(host) = host_key(url) else {
            // Unparseable URLs fail later in the client with a clearer error
            return true;
        };

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&host) {
                if !cached.is_expired() {
                    return self.matches(cached.content.as_deref(), url);
                }
            }
        }

        let content = self.fetch_robots(url, &host).await;
        let allowed = self.matches(content.as_deref(), url);
        self.cache.write().await.insert(
            host,
            CachedRobots {
                content,
                fetched_at: Instant::now(),
            },
        );
        allowed
    }

    fn matches(&self, robots: Option<&str>, url: &str) -> bool {
        let Some(content) = robots else {
            return true;
        };
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(content, &self.user_agent, url)
    }

    async fn fetch_robots(&self, url: &str, host: &str) -> Option<String> {
        let parsed = url::Url::parse(url).ok()?;
        let robots_url = format!(
            "{}://{}/robots.txt",
            parsed.scheme(),
            parsed.port().map_or_else(
                || parsed.host_str().unwrap_or_default().to_string(),
                |p| format!("{}:{p}", parsed.host_str().unwrap_or_default())
            )
        );

        match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(text) => {
                    tracing::debug!(host, bytes = text.len(), "robots.txt cached");
                    Some(text)
                }
                Err(e) => {
                    tracing::debug!(host, error = %e, "robots.txt body unreadable; allowing");
                    None
                }
            },
            Ok(response) => {
                tracing::debug!(host, status = %response.status(), "no usable robots.txt; allowing");
                None
            }
            Err(e) => {
                tracing::debug!(host, error = %e, "robots.txt fetch failed; allowing");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_gate_allows_everything() {
        let gate = RobotsGate::disabled();
        assert!(gate.is_allowed("https://example.com/secret").await);
    }

    #[test]
    fn test_matcher_disallow_rule() {
        let gate = RobotsGate::new("jangma/test", true).unwrap();
        let robots = "User-agent: *\nDisallow: /private/\n";
        assert!(!gate.matches(Some(robots), "https://example.com/private/page"));
        assert!(gate.matches(Some(robots), "https://example.com/public/page"));
    }

    #[test]
    fn test_missing_robots_allows() {
        let gate = RobotsGate::new("jangma/test", true).unwrap();
        assert!(gate.matches(None, "https://example.com/anything"));
    }

    #[test]
    fn test_agent_specific_rules() {
        let gate = RobotsGate::new("jangma", true).unwrap();
        let robots = "User-agent: jangma\nDisallow: /blocked\n\nUser-agent: *\nDisallow:\n";
        assert!(!gate.matches(Some(robots), "https://example.com/blocked"));
        assert!(gate.matches(Some(robots), "https://example.com/open"));
    }
}
