//! Default HTML processor: title, text, and link discovery
//!
//! Parses HTML with `scraper`, extracts the title and paragraph text, and
//! reports absolute `http(s)` links for the executor to enqueue. Non-HTML
//! payloads are skipped.

use async_trait::async_trait;
use chrono::Utc;
use scraper::{Html, Selector};

use super::{ContentProcessor, ProcessInput, ProcessOutcome};
use crate::models::Document;
use crate::utils::host_key;

/// Text length at which the quality score saturates
const QUALITY_SATURATION_CHARS: usize = 2000;

/// HTML link/text extractor
pub struct LinkExtractor {
    /// Only report links on the same host as the fetched page
    same_host_only: bool,
}

impl Default for LinkExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkExtractor {
    pub fn new() -> Self {
        Self {
            same_host_only: true,
        }
    }

    /// Allow links to other hosts to be reported
    pub fn allow_cross_host(mut self) -> Self {
        self.same_host_only = false;
        self
    }

    fn looks_like_html(content_type: Option<&str>, body: &[u8]) -> bool {
        if let Some(ct) = content_type {
            let ct = ct.to_ascii_lowercase();
            if ct.contains("text/html") || ct.contains("application/xhtml") {
                return true;
            }
            if ct.contains("text/") || ct.contains("json") || ct.contains("xml") {
                return false;
            }
        }
        let head = &body[..body.len().min(512)];
        let head = String::from_utf8_lossy(head).to_ascii_lowercase();
        head.contains("<html") || head.contains("<!doctype html")
    }

    /// Parse synchronously; `Html` is kept out of the async state machine
    fn extract(
        &self,
        body: &[u8],
        base_url: &str,
    ) -> (Option<String>, String, Vec<String>) {
        let html = Html::parse_document(&String::from_utf8_lossy(body));

        let title_selector = Selector::parse("title").expect("static selector");
        let title = html
            .select(&title_selector)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());

        let text_selector = Selector::parse("p, h1, h2, h3, li").expect("static selector");
        let mut text = String::new();
        for node in html.select(&text_selector) {
            let fragment: String = node.text().collect();
            let fragment = fragment.trim();
            if !fragment.is_empty() {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(fragment);
            }
        }

        let base = url::Url::parse(base_url).ok();
        let base_host = host_key(base_url);
        let link_selector = Selector::parse("a[href]").expect("static selector");
        let mut links = Vec::new();
        for anchor in html.select(&link_selector) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let resolved = match &base {
                Some(base) => base.join(href).ok(),
                None => url::Url::parse(href).ok(),
            };
            let Some(mut resolved) = resolved else {
                continue;
            };
            if !matches!(resolved.scheme(), "http" | "https") {
                continue;
            }
            resolved.set_fragment(None);
            if self.same_host_only && host_key(resolved.as_str()) != base_host {
                continue;
            }
            let link = resolved.to_string();
            if !links.contains(&link) {
                links.push(link);
            }
        }

        (title, text, links)
    }
}

#[async_trait]
impl ContentProcessor for LinkExtractor {
    async fn process(&self, input: ProcessInput) -> ProcessOutcome {
        if !Self::looks_like_html(input.content_type.as_deref(), &input.body) {
            return ProcessOutcome::Skip {
                reason: "not html".to_string(),
            };
        }

        let (title, text, discovered) = self.extract(&input.body, &input.final_url);
        let quality_score =
            (text.len() as f64 / QUALITY_SATURATION_CHARS as f64).clamp(0.0, 1.0);

        ProcessOutcome::Document {
            document: Document {
                url: input.url.clone(),
                final_url: (input.final_url != input.url).then_some(input.final_url),
                title,
                text,
                quality_score,
                byte_size: input.body.len() as u64,
                processed_at: Utc::now(),
            },
            discovered,
        }
    }
}
