//! reqwest-backed fetcher implementation
//!
//! Handles conditional GETs, a manual redirect loop (so redirect targets can
//! be checked against robots rules), streamed body reads capped at
//! `max_file_bytes`, and retry with exponential backoff. `429` responses
//! honour `Retry-After` up to the backoff cap.

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, LOCATION, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;

use super::robots::RobotsGate;
use super::{FetchError, FetchOutcome, FetchRequest, FetchedDocument, Fetcher, REDIRECT_LIMIT};
use crate::config::CrawlConfig;

/// Base delay for the first retry
const BACKOFF_BASE_MS: u64 = 1_000;
/// Exponential backoff cap
const BACKOFF_CAP_MS: u64 = 60_000;

/// Plain HTTP fetcher over reqwest
pub struct HttpFetcher {
    client: Client,
    user_agent: String,
    max_file_bytes: u64,
    max_retries: u32,
    /// Consulted for redirect targets; the pipeline checks the initial URL
    robots: Option<Arc<RobotsGate>>,
}

/// One attempt's failure, with an optional server-requested delay
struct AttemptFailure {
    error: FetchError,
    retry_after: Option<Duration>,
}

impl From<FetchError> for AttemptFailure {
    fn from(error: FetchError) -> Self {
        Self {
            error,
            retry_after: None,
        }
    }
}

impl HttpFetcher {
    /// Build a fetcher from the crawl config
    pub fn new(config: &CrawlConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            max_file_bytes: config.max_file_bytes,
            max_retries: config.max_retries,
            robots: None,
        })
    }

    /// Attach a robots gate used to vet redirect targets
    pub fn with_robots(mut self, robots: Arc<RobotsGate>) -> Self {
        self.robots = Some(robots);
        self
    }

    /// Delay before retry `attempt` (1-based): exponential with ±20% jitter,
    /// capped at 60 s. A `Retry-After` hint overrides the exponential delay
    /// but is still capped.
    fn backoff_delay(attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(Duration::from_millis(BACKOFF_CAP_MS));
        }
        let exponential = (BACKOFF_BASE_MS as f64) * 2f64.powi(attempt.saturating_sub(1) as i32);
        let capped = exponential.min(BACKOFF_CAP_MS as f64);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        Duration::from_millis((capped * jitter) as u64)
    }

    fn parse_retry_after(response: &Response) -> Option<Duration> {
        let value = response.headers().get(RETRY_AFTER)?.to_str().ok()?;
        if let Ok(secs) = value.trim().parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        // HTTP-date form
        let when = chrono::DateTime::parse_from_rfc2822(value.trim()).ok()?;
        let delta = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
        delta.to_std().ok()
    }

    fn header_string(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Read the body in chunks, aborting once it exceeds the size limit
    async fn read_body(&self, mut response: Response) -> Result<bytes::Bytes, FetchError> {
        let mut buf = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if (buf.len() + chunk.len()) as u64 > self.max_file_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_file_bytes,
                });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(bytes::Bytes::from(buf))
    }

    /// One attempt: the full redirect chain for a single request
    async fn attempt(&self, request: &FetchRequest) -> Result<FetchOutcome, AttemptFailure> {
        let original_url = request.record.url.clone();
        let mut current_url = original_url.clone();

        for hop in 0..=REDIRECT_LIMIT {
            let parsed = url::Url::parse(&current_url)
                .map_err(|e| FetchError::InvalidUrl(format!("{current_url}: {e}")))?;

            // Redirect targets obey the same robots rules as direct fetches
            if hop > 0 {
                if let Some(robots) = &self.robots {
                    if !robots.is_allowed(&current_url).await {
                        return Err(FetchError::RobotsDenied.into());
                    }
                }
            }

            let mut builder = self
                .client
                .get(parsed)
                .header(USER_AGENT, &self.user_agent);
            if let Some(etag) = &request.if_none_match {
                builder = builder.header(IF_NONE_MATCH, etag);
            }
            if let Some(date) = &request.if_modified_since {
                builder = builder.header(IF_MODIFIED_SINCE, date);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Http(e)
                }
            })?;
            let status = response.status();

            if status == StatusCode::NOT_MODIFIED {
                // No body is read for a 304
                return Ok(FetchOutcome::NotModified {
                    etag: Self::header_string(&response, ETAG)
                        .or_else(|| request.if_none_match.clone()),
                    last_modified: Self::header_string(&response, LAST_MODIFIED)
                        .or_else(|| request.if_modified_since.clone()),
                    url: original_url,
                });
            }

            if status.is_redirection() {
                let Some(location) = Self::header_string(&response, LOCATION) else {
                    return Err(FetchError::ClientError(status.as_u16()).into());
                };
                let base = url::Url::parse(&current_url)
                    .map_err(|e| FetchError::InvalidUrl(format!("{current_url}: {e}")))?;
                current_url = base
                    .join(&location)
                    .map_err(|e| FetchError::InvalidUrl(format!("{location}: {e}")))?
                    .to_string();
                continue;
            }

            if status.is_success() {
                let etag = Self::header_string(&response, ETAG);
                let last_modified = Self::header_string(&response, LAST_MODIFIED);
                let content_type = Self::header_string(&response, reqwest::header::CONTENT_TYPE);
                let body = self.read_body(response).await?;
                return Ok(FetchOutcome::Fetched(FetchedDocument {
                    url: original_url,
                    final_url: current_url,
                    status: status.as_u16(),
                    body,
                    etag,
                    last_modified,
                    content_type,
                    attempts: 1, // rewritten by the retry loop
                }));
            }

            if status.is_client_error() {
                let retry_after = Self::parse_retry_after(&response);
                return Err(AttemptFailure {
                    error: FetchError::ClientError(status.as_u16()),
                    retry_after,
                });
            }

            let retry_after = Self::parse_retry_after(&response);
            return Err(AttemptFailure {
                error: FetchError::ServerError(status.as_u16()),
                retry_after,
            });
        }

        Err(FetchError::TooManyRedirects.into())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_url(&self, request: &FetchRequest) -> Result<FetchOutcome, FetchError> {
        let mut retry_after = None;
        let mut last_error: Option<FetchError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Self::backoff_delay(attempt, retry_after.take());
                tracing::debug!(
                    url = %request.record.url,
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Retrying fetch after delay"
                );
                tokio::time::sleep(delay).await;
            }

            match self.attempt(request).await {
                Ok(FetchOutcome::Fetched(mut doc)) => {
                    doc.attempts = attempt + 1;
                    return Ok(FetchOutcome::Fetched(doc));
                }
                Ok(outcome) => return Ok(outcome),
                Err(failure) => {
                    if !failure.error.is_recoverable() {
                        return Err(failure.error);
                    }
                    retry_after = failure.retry_after;
                    tracing::warn!(
                        url = %request.record.url,
                        attempt,
                        max_retries = self.max_retries,
                        error = %failure.error,
                        "Fetch attempt failed"
                    );
                    last_error = Some(failure.error);
                }
            }
        }

        Err(FetchError::MaxRetriesExceeded {
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}
