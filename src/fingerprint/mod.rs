//! Content fingerprints and change detection
//!
//! A fingerprint is the identity of a fetched document: the SHA-256 of the
//! raw body plus the HTTP cache validators the origin sent with it. Given the
//! fingerprint set of a parent iteration, the change detector decides whether
//! a URL needs to be fetched at all, and classifies the result of a fetch as
//! new, modified, or unchanged.
//!
//! Hashes are computed over the body exactly as received, before any decoding
//! or extraction, so classification stays stable when extractors change.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

/// Classification of a URL relative to a parent iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeClass {
    /// No parent fingerprint exists for the URL
    New,
    /// Parent fingerprint exists and the content hash differs
    Modified,
    /// Parent fingerprint exists and the content hash matches
    Unchanged,
    /// URL present in the parent but absent from the current iteration
    Deleted,
}

impl ChangeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Modified => "modified",
            Self::Unchanged => "unchanged",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ChangeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The identity of a fetched document
///
/// Never mutated after it is written; for a given `(iteration, url)` at most
/// one fingerprint exists. Field encodings are wire-stable: `content_hash` is
/// 64 lowercase hex chars, `last_modified` the verbatim RFC 1123 header value,
/// `fetched_at` RFC 3339.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub url: String,

    /// SHA-256 of the raw body, lowercase hex
    pub content_hash: String,

    /// Verbatim `ETag` header value, if the origin sent one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// Verbatim `Last-Modified` header value, if the origin sent one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,

    pub byte_size: u64,

    pub fetched_at: DateTime<Utc>,

    /// Free-form extra metadata recorded by processors
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Fingerprint {
    /// Build a fingerprint from a raw body and optional validators
    pub fn from_body(
        url: &str,
        body: &[u8],
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> Self {
        Self {
            url: url.to_string(),
            content_hash: content_hash(body),
            etag,
            last_modified,
            byte_size: body.len() as u64,
            fetched_at: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Whether this fingerprint carries a strong ETag
    pub fn has_strong_etag(&self) -> bool {
        self.etag.as_deref().is_some_and(|t| !t.is_empty() && !is_weak_etag(t))
    }
}

/// Validators observed on a HEAD or conditional-GET probe response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeHeaders {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Outcome of the pre-fetch decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
    /// The URL must be fetched
    Fetch,
    /// Validators prove the content is unchanged; skip the download
    Skip,
}

/// Compute the SHA-256 content hash of a raw body, lowercase hex
pub fn content_hash(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("{:x}", hasher.finalize())
}

fn is_weak_etag(tag: &str) -> bool {
    tag.starts_with("W/") || tag.starts_with("w/")
}

/// Parse an HTTP date (RFC 1123 / RFC 2822 shape) to an instant
fn parse_http_date(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc2822(value.trim()).ok()
}

/// Change detector over a parent iteration's fingerprint set
///
/// Stateless; all inputs are passed per call so the detector can be shared
/// freely between the coordinator and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector;

impl ChangeDetector {
    pub fn new() -> Self {
        Self
    }

    /// Decide whether `url` must be fetched in the current iteration
    ///
    /// Policy, in order:
    /// 1. no parent fingerprint → fetch;
    /// 2. parent has a non-empty strong `ETag` and the probe `ETag` matches
    ///    byte-for-byte (both strong) → skip;
    /// 3. parent has `Last-Modified` and the probe value parses to the same
    ///    instant → skip;
    /// 4. otherwise → fetch. Unparseable dates fall through to the hash
    ///    comparison after the fetch.
    pub fn should_fetch(
        &self,
        url: &str,
        parent_fingerprints: &HashMap<String, Fingerprint>,
        probe: Option<&ProbeHeaders>,
    ) -> FetchDecision {
        let Some(parent) = parent_fingerprints.get(url) else {
            return FetchDecision::Fetch;
        };
        let Some(probe) = probe else {
            return FetchDecision::Fetch;
        };

        if let (Some(parent_tag), Some(probe_tag)) = (parent.etag.as_deref(), probe.etag.as_deref())
        {
            if !parent_tag.is_empty()
                && !is_weak_etag(parent_tag)
                && !is_weak_etag(probe_tag)
                && parent_tag == probe_tag
            {
                return FetchDecision::Skip;
            }
        }

        if let (Some(parent_lm), Some(probe_lm)) =
            (parent.last_modified.as_deref(), probe.last_modified.as_deref())
        {
            if let (Some(a), Some(b)) = (parse_http_date(parent_lm), parse_http_date(probe_lm)) {
                if a == b {
                    return FetchDecision::Skip;
                }
            }
        }

        FetchDecision::Fetch
    }

    /// Classify a freshly fetched body against the parent iteration
    pub fn classify(
        &self,
        url: &str,
        new_body: &[u8],
        parent_fingerprints: &HashMap<String, Fingerprint>,
    ) -> ChangeClass {
        match parent_fingerprints.get(url) {
            None => ChangeClass::New,
            Some(parent) if parent.content_hash == content_hash(new_body) => ChangeClass::Unchanged,
            Some(_) => ChangeClass::Modified,
        }
    }

    /// URLs present in the parent iteration but not seen in the current one
    ///
    /// Computed only at iteration completion; returns a sorted set so the
    /// result is deterministic.
    pub fn deleted_set(
        &self,
        parent_fingerprints: &HashMap<String, Fingerprint>,
        seen_in_current: &BTreeSet<String>,
    ) -> BTreeSet<String> {
        parent_fingerprints
            .keys()
            .filter(|url| !seen_in_current.contains(*url))
            .cloned()
            .collect()
    }
}
