//! Prometheus export bridge
//!
//! Registers a gauge/counter per crawl metric and mirrors
//! [`super::MetricsSnapshot`] values into them for scraping or text dumps.
//!
//! Call [`init_metrics`] once at application startup. If initialization
//! fails, all update operations become no-ops.

use prometheus::{register_gauge, Encoder, Gauge, TextEncoder};
use std::sync::OnceLock;

use super::MetricsSnapshot;

/// Container for all exported crawl metrics
struct CrawlMetrics {
    urls_crawled: Gauge,
    urls_failed: Gauge,
    urls_queued: Gauge,
    documents_found: Gauge,
    bytes_downloaded: Gauge,
    retries: Gauge,
    robots_denies: Gauge,
    cache_hits: Gauge,
    active_fetches: Gauge,
    frontier_size: Gauge,
    throughput_per_min: Gauge,
    success_rate: Gauge,
}

/// Global storage for exported metrics
static CRAWL_METRICS: OnceLock<CrawlMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

/// Initialize all Prometheus metrics
///
/// Idempotent; returns `Ok(())` when already initialized.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = CrawlMetrics {
        urls_crawled: register_gauge!("jangma_urls_crawled_total", "URLs fetched successfully")?,
        urls_failed: register_gauge!("jangma_urls_failed_total", "URLs that ended in the failed set")?,
        urls_queued: register_gauge!("jangma_urls_queued_total", "URLs ever enqueued to the frontier")?,
        documents_found: register_gauge!("jangma_documents_found_total", "Documents emitted by processors")?,
        bytes_downloaded: register_gauge!("jangma_bytes_downloaded_total", "Raw body bytes downloaded")?,
        retries: register_gauge!("jangma_retries_total", "Fetch retry attempts")?,
        robots_denies: register_gauge!("jangma_robots_denies_total", "URLs denied by robots.txt")?,
        cache_hits: register_gauge!(
            "jangma_cache_hits_total",
            "Fetches avoided by validators or 304 responses"
        )?,
        active_fetches: register_gauge!("jangma_active_fetches", "Requests currently in flight")?,
        frontier_size: register_gauge!("jangma_frontier_size", "URLs currently queued")?,
        throughput_per_min: register_gauge!(
            "jangma_throughput_per_min",
            "URLs crawled per minute over the 5-minute window"
        )?,
        success_rate: register_gauge!("jangma_success_rate", "Crawled / attempted ratio")?,
    };

    CRAWL_METRICS
        .set(metrics)
        .map_err(|_| "crawl metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    CRAWL_METRICS.get().is_some()
}

/// Mirror a snapshot into the exported gauges
pub fn update_from_snapshot(snapshot: &MetricsSnapshot) {
    let Some(m) = CRAWL_METRICS.get() else {
        return;
    };

    m.urls_crawled.set(snapshot.urls_crawled as f64);
    m.urls_failed.set(snapshot.urls_failed as f64);
    m.urls_queued.set(snapshot.urls_queued as f64);
    m.documents_found.set(snapshot.documents_found as f64);
    m.bytes_downloaded.set(snapshot.bytes_downloaded as f64);
    m.retries.set(snapshot.retries as f64);
    m.robots_denies.set(snapshot.robots_denies as f64);
    m.cache_hits.set(snapshot.cache_hits as f64);
    m.active_fetches.set(snapshot.active_fetches as f64);
    m.frontier_size.set(snapshot.frontier_size as f64);
    m.throughput_per_min.set(snapshot.throughput_per_min);
    m.success_rate.set(snapshot.success_rate);
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
