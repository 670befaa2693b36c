//! Content processor boundary
//!
//! Rich extraction (PDF, OCR, tables) lives outside the engine; fetched
//! payloads are handed to a [`ContentProcessor`] which returns a typed
//! outcome — never a panic or an unwound exception. Processors may report
//! discovered URLs; the executor applies depth and target limits before
//! enqueueing them.

pub mod links;

pub use links::LinkExtractor;

use async_trait::async_trait;
use chrono::Utc;

use crate::models::Document;

/// A fetched payload handed to a processor
#[derive(Debug, Clone)]
pub struct ProcessInput {
    pub url: String,

    /// URL after redirects
    pub final_url: String,

    /// Raw body bytes as fetched
    pub body: bytes::Bytes,

    pub content_type: Option<String>,

    /// Link depth of the fetched URL
    pub depth: u32,
}

/// Typed processor result; the executor never relies on unwinding
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// A document was produced, possibly with newly discovered URLs
    Document {
        document: Document,
        discovered: Vec<String>,
    },
    /// The payload is not a document worth keeping
    Skip { reason: String },
    /// Processing failed; recorded per URL, the crawl continues
    Fail { error: String },
}

/// Post-fetch content processing
#[async_trait]
pub trait ContentProcessor: Send + Sync {
    async fn process(&self, input: ProcessInput) -> ProcessOutcome;
}

/// Pass-through processor used when no extractor is configured
///
/// Emits a minimal document per fetched payload and discovers nothing.
pub struct NoopProcessor;

#[async_trait]
impl ContentProcessor for NoopProcessor {
    async fn process(&self, input: ProcessInput) -> ProcessOutcome {
        ProcessOutcome::Document {
            document: Document {
                url: input.url.clone(),
                final_url: (input.final_url != input.url).then_some(input.final_url),
                title: None,
                text: String::new(),
                quality_score: 1.0,
                byte_size: input.body.len() as u64,
                processed_at: Utc::now(),
            },
            discovered: Vec::new(),
        }
    }
}
