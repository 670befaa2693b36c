//! Common utilities and helpers

pub mod retry;

pub use retry::{with_retry, with_retry_if, RetryConfig};

/// Extract the lowercased `host[:port]` key of a URL, used for politeness
/// buckets and robots caching
pub fn host_key(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    match parsed.port() {
        Some(port) => Some(format!("{host}:{port}")),
        None => Some(host),
    }
}
