//! Crawl metrics: counters, gauges, and rolling windows
//!
//! Counter and gauge updates are plain atomic operations so the publish path
//! never takes a lock. A sampler records one time-stamped sample per second
//! into bounded rings covering the last 5 minutes and 1 hour, plus one
//! sample per minute for the last 24 hours. [`MetricsCollector::snapshot`]
//! reads everything under a short lock so no torn reads are observed across
//! counters.
//!
//! A prometheus export bridge lives in [`prom`].

pub mod prom;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Samples kept for the 5-minute window (1 Hz)
const FIVE_MIN_CAPACITY: usize = 300;
/// Samples kept for the 1-hour window (1 Hz)
const ONE_HOUR_CAPACITY: usize = 3600;
/// Samples kept for the 24-hour window (1 per minute)
const DAY_CAPACITY: usize = 1440;

/// One time-stamped reading of all counters and gauges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    pub at: DateTime<Utc>,
    pub urls_crawled: u64,
    pub urls_failed: u64,
    pub urls_queued: u64,
    pub documents_found: u64,
    pub bytes_downloaded: u64,
    pub retries: u64,
    pub robots_denies: u64,
    pub cache_hits: u64,
    pub active_fetches: u64,
    pub frontier_size: u64,
}

/// Consistent view of all metrics plus derived rates
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub urls_crawled: u64,
    pub urls_failed: u64,
    pub urls_queued: u64,
    pub documents_found: u64,
    pub bytes_downloaded: u64,
    pub retries: u64,
    pub robots_denies: u64,
    pub cache_hits: u64,
    pub active_fetches: u64,
    pub frontier_size: u64,
    /// URLs crawled per minute over the 5-minute window
    pub throughput_per_min: f64,
    /// urls_crawled / (urls_crawled + urls_failed); 1.0 when nothing attempted
    pub success_rate: f64,
    pub sampled_at: DateTime<Utc>,
}

#[derive(Default)]
struct Counters {
    urls_crawled: AtomicU64,
    urls_failed: AtomicU64,
    urls_queued: AtomicU64,
    documents_found: AtomicU64,
    bytes_downloaded: AtomicU64,
    retries: AtomicU64,
    robots_denies: AtomicU64,
    cache_hits: AtomicU64,
    active_fetches: AtomicU64,
    frontier_size: AtomicU64,
}

struct Windows {
    five_min: VecDeque<MetricsSample>,
    one_hour: VecDeque<MetricsSample>,
    day: VecDeque<MetricsSample>,
    /// 1 Hz ticks since the last 24-hour sample
    ticks_since_day_sample: u32,
}

impl Windows {
    fn new() -> Self {
        Self {
            five_min: VecDeque::with_capacity(FIVE_MIN_CAPACITY),
            one_hour: VecDeque::with_capacity(ONE_HOUR_CAPACITY),
            day: VecDeque::with_capacity(DAY_CAPACITY),
            ticks_since_day_sample: 0,
        }
    }

    fn push_bounded(ring: &mut VecDeque<MetricsSample>, capacity: usize, sample: MetricsSample) {
        if ring.len() == capacity {
            ring.pop_front();
        }
        ring.push_back(sample);
    }
}

/// Thread-safe metrics collector, shared through [`crate::runtime::Runtime`]
pub struct MetricsCollector {
    counters: Counters,
    windows: Mutex<Windows>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
            windows: Mutex::new(Windows::new()),
        }
    }

    // -- counter updates (lock-free) --

    pub fn record_url_crawled(&self) {
        self.counters.urls_crawled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_url_failed(&self) {
        self.counters.urls_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_url_queued(&self) {
        self.counters.urls_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_document_found(&self) {
        self.counters.documents_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_downloaded(&self, bytes: u64) {
        self.counters
            .bytes_downloaded
            .fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.counters.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_robots_deny(&self) {
        self.counters.robots_denies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    // -- gauges --

    pub fn fetch_started(&self) {
        self.counters.active_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fetch_finished(&self) {
        // Saturating decrement; a stray extra call must not wrap
        let _ = self
            .counters
            .active_fetches
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn set_frontier_size(&self, size: u64) {
        self.counters.frontier_size.store(size, Ordering::Relaxed);
    }

    fn read_sample(&self) -> MetricsSample {
        MetricsSample {
            at: Utc::now(),
            urls_crawled: self.counters.urls_crawled.load(Ordering::Relaxed),
            urls_failed: self.counters.urls_failed.load(Ordering::Relaxed),
            urls_queued: self.counters.urls_queued.load(Ordering::Relaxed),
            documents_found: self.counters.documents_found.load(Ordering::Relaxed),
            bytes_downloaded: self.counters.bytes_downloaded.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            robots_denies: self.counters.robots_denies.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            active_fetches: self.counters.active_fetches.load(Ordering::Relaxed),
            frontier_size: self.counters.frontier_size.load(Ordering::Relaxed),
        }
    }

    /// Record one sample into the rolling windows (the 1 Hz tick)
    pub fn sample_now(&self) {
        let sample = self.read_sample();
        let mut windows = self.windows.lock().expect("windows lock");
        Windows::push_bounded(&mut windows.five_min, FIVE_MIN_CAPACITY, sample.clone());
        Windows::push_bounded(&mut windows.one_hour, ONE_HOUR_CAPACITY, sample.clone());
        windows.ticks_since_day_sample += 1;
        if windows.ticks_since_day_sample >= 60 || windows.day.is_empty() {
            windows.ticks_since_day_sample = 0;
            Windows::push_bounded(&mut windows.day, DAY_CAPACITY, sample);
        }
    }

    /// Spawn the 1 Hz sampler task; aborts when the handle is dropped/aborted
    pub fn start_sampler(self: &Arc<Self>) -> JoinHandle<()> {
        let collector = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                collector.sample_now();
            }
        })
    }

    /// A consistent snapshot of counters, gauges, and derived rates
    pub fn snapshot(&self) -> MetricsSnapshot {
        let windows = self.windows.lock().expect("windows lock");
        let current = self.read_sample();

        let throughput_per_min = match (windows.five_min.front(), windows.five_min.back()) {
            (Some(oldest), Some(newest)) if newest.at > oldest.at => {
                let delta_urls = current.urls_crawled.saturating_sub(oldest.urls_crawled) as f64;
                let delta_secs = (current.at - oldest.at).num_milliseconds().max(1) as f64 / 1000.0;
                delta_urls / delta_secs * 60.0
            }
            _ => 0.0,
        };

        let attempted = current.urls_crawled + current.urls_failed;
        let success_rate = if attempted == 0 {
            1.0
        } else {
            current.urls_crawled as f64 / attempted as f64
        };

        MetricsSnapshot {
            urls_crawled: current.urls_crawled,
            urls_failed: current.urls_failed,
            urls_queued: current.urls_queued,
            documents_found: current.documents_found,
            bytes_downloaded: current.bytes_downloaded,
            retries: current.retries,
            robots_denies: current.robots_denies,
            cache_hits: current.cache_hits,
            active_fetches: current.active_fetches,
            frontier_size: current.frontier_size,
            throughput_per_min,
            success_rate,
            sampled_at: current.at,
        }
    }

    /// The most recent `n` samples of the 5-minute window, oldest first
    ///
    /// Checkpoints embed these so a resumed crawl's status is not blank.
    pub fn recent_samples(&self, n: usize) -> Vec<MetricsSample> {
        let windows = self.windows.lock().expect("windows lock");
        windows
            .five_min
            .iter()
            .rev()
            .take(n)
            .rev()
            .cloned()
            .collect()
    }

    /// Samples of the 24-hour window, oldest first
    pub fn day_samples(&self) -> Vec<MetricsSample> {
        let windows = self.windows.lock().expect("windows lock");
        windows.day.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = MetricsCollector::new();
        metrics.record_url_crawled();
        metrics.record_url_crawled();
        metrics.record_url_failed();
        metrics.record_bytes_downloaded(1024);
        metrics.record_robots_deny();
        metrics.record_cache_hit();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.urls_crawled, 2);
        assert_eq!(snapshot.urls_failed, 1);
        assert_eq!(snapshot.bytes_downloaded, 1024);
        assert_eq!(snapshot.robots_denies, 1);
        assert_eq!(snapshot.cache_hits, 1);
    }

    #[test]
    fn test_success_rate() {
        let metrics = MetricsCollector::new();
        assert!((metrics.snapshot().success_rate - 1.0).abs() < f64::EPSILON);

        for _ in 0..9 {
            metrics.record_url_crawled();
        }
        metrics.record_url_failed();
        assert!((metrics.snapshot().success_rate - 0.9).abs() < 0.001);
    }

    #[test]
    fn test_active_fetches_gauge_saturates() {
        let metrics = MetricsCollector::new();
        metrics.fetch_started();
        metrics.fetch_finished();
        metrics.fetch_finished(); // extra call must not wrap
        assert_eq!(metrics.snapshot().active_fetches, 0);
    }

    #[test]
    fn test_five_min_window_bounded() {
        let metrics = MetricsCollector::new();
        for _ in 0..(FIVE_MIN_CAPACITY + 50) {
            metrics.sample_now();
        }
        assert_eq!(metrics.recent_samples(usize::MAX).len(), FIVE_MIN_CAPACITY);
    }

    #[test]
    fn test_day_window_samples_once_per_minute() {
        let metrics = MetricsCollector::new();
        // The first tick seeds the ring; afterwards one sample per 60 ticks,
        // so 120 ticks land samples at ticks 1 and 61
        for _ in 0..120 {
            metrics.sample_now();
        }
        assert_eq!(metrics.day_samples().len(), 2);
    }

    #[test]
    fn test_recent_samples_ordered_oldest_first() {
        let metrics = MetricsCollector::new();
        metrics.record_url_crawled();
        metrics.sample_now();
        metrics.record_url_crawled();
        metrics.sample_now();

        let samples = metrics.recent_samples(2);
        assert_eq!(samples.len(), 2);
        assert!(samples[0].urls_crawled <= samples[1].urls_crawled);
    }

    #[tokio::test]
    async fn test_sampler_task_runs() {
        let metrics = Arc::new(MetricsCollector::new());
        let handle = metrics.start_sampler();
        // The first interval tick fires immediately
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();
        assert!(!metrics.recent_samples(10).is_empty());
    }
}
