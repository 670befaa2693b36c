//! Fetch worker pool
//!
//! Workers receive [`FetchRequest`]s from the coordinator over a bounded
//! channel and send back [`FetchResult`]s. Each worker handles one request
//! at a time, so the pool size equals the global in-flight cap. Cancellation
//! is cooperative: workers watch a signal and abandon in-flight work at the
//! next await point.

use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use super::politeness::PolitenessGate;
use super::robots::RobotsGate;
use super::{FetchError, FetchOutcome, FetchRequest, Fetcher};
use crate::metrics::MetricsCollector;
use crate::models::UrlRecord;
use crate::utils::host_key;

/// Result of one fetch job, sent back to the coordinator
#[derive(Debug)]
pub struct FetchResult {
    pub record: UrlRecord,
    pub outcome: Result<FetchOutcome, FetchError>,
}

/// The worker pool half of the fetch pipeline
pub struct FetchPipeline {
    fetcher: Arc<dyn Fetcher>,
    politeness: Arc<PolitenessGate>,
    robots: Arc<RobotsGate>,
    metrics: Arc<MetricsCollector>,
    workers: usize,
}

impl FetchPipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        politeness: Arc<PolitenessGate>,
        robots: Arc<RobotsGate>,
        metrics: Arc<MetricsCollector>,
        workers: usize,
    ) -> Self {
        Self {
            fetcher,
            politeness,
            robots,
            metrics,
            workers: workers.max(1),
        }
    }

    /// Spawn the worker tasks
    ///
    /// Workers exit when the request channel closes or the cancel signal
    /// turns true. The result channel is dropped with the last worker.
    pub fn spawn(
        &self,
        request_rx: mpsc::Receiver<FetchRequest>,
        result_tx: mpsc::Sender<FetchResult>,
        cancel: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let request_rx = Arc::new(Mutex::new(request_rx));
        let mut handles = Vec::with_capacity(self.workers);

        for worker_id in 0..self.workers {
            let request_rx = Arc::clone(&request_rx);
            let result_tx = result_tx.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let politeness = Arc::clone(&self.politeness);
            let robots = Arc::clone(&self.robots);
            let metrics = Arc::clone(&self.metrics);
            let mut cancel = cancel.clone();

            let handle = tokio::spawn(async move {
                loop {
                    if *cancel.borrow() {
                        break;
                    }

                    let request = {
                        let mut rx = request_rx.lock().await;
                        tokio::select! {
                            request = rx.recv() => request,
                            _ = cancel.changed() => None,
                        }
                    };
                    let Some(request) = request else {
                        break; // channel closed or cancelled
                    };

                    let result = Self::run_one(
                        &request,
                        fetcher.as_ref(),
                        &politeness,
                        &robots,
                        &metrics,
                        &mut cancel,
                    )
                    .await;

                    let Some(result) = result else {
                        break; // cancelled mid-request; work abandoned
                    };
                    if result_tx.send(result).await.is_err() {
                        tracing::error!(worker_id, "Result channel closed");
                        break;
                    }
                }

                tracing::debug!(worker_id, "Fetch worker shutting down");
            });

            handles.push(handle);
        }

        handles
    }

    /// Process a single request; `None` means cancellation struck mid-flight
    async fn run_one(
        request: &FetchRequest,
        fetcher: &dyn Fetcher,
        politeness: &PolitenessGate,
        robots: &RobotsGate,
        metrics: &MetricsCollector,
        cancel: &mut watch::Receiver<bool>,
    ) -> Option<FetchResult> {
        let url = &request.record.url;

        // robots.txt first; denied URLs are never fetched and never retried
        let allowed = tokio::select! {
            allowed = robots.is_allowed(url) => allowed,
            _ = cancel.changed() => return None,
        };
        if !allowed {
            metrics.record_robots_deny();
            return Some(FetchResult {
                record: request.record.clone(),
                outcome: Err(FetchError::RobotsDenied),
            });
        }

        let Some(host) = host_key(url) else {
            return Some(FetchResult {
                record: request.record.clone(),
                outcome: Err(FetchError::InvalidUrl(url.clone())),
            });
        };

        let _permit = tokio::select! {
            permit = politeness.acquire(&host) => permit,
            _ = cancel.changed() => return None,
        };

        metrics.fetch_started();
        let outcome = tokio::select! {
            outcome = fetcher.fetch_url(request) => outcome,
            _ = cancel.changed() => {
                metrics.fetch_finished();
                return None;
            }
        };
        metrics.fetch_finished();

        match &outcome {
            Ok(FetchOutcome::Fetched(doc)) => {
                for _ in 1..doc.attempts {
                    metrics.record_retry();
                }
            }
            Ok(FetchOutcome::NotModified { .. }) => {
                metrics.record_cache_hit();
            }
            Err(_) => {}
        }

        Some(FetchResult {
            record: request.record.clone(),
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchedDocument;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fetcher double that returns canned bodies
    struct StubFetcher {
        calls: AtomicU32,
        delay: Duration,
    }

    impl StubFetcher {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                calls: AtomicU32::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch_url(&self, request: &FetchRequest) -> Result<FetchOutcome, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(FetchOutcome::Fetched(FetchedDocument {
                url: request.record.url.clone(),
                final_url: request.record.url.clone(),
                status: 200,
                body: bytes::Bytes::from_static(b"body"),
                etag: None,
                last_modified: None,
                content_type: Some("text/html".to_string()),
                attempts: 1,
            }))
        }
    }

    fn pipeline(fetcher: Arc<dyn Fetcher>, workers: usize) -> FetchPipeline {
        FetchPipeline::new(
            fetcher,
            Arc::new(PolitenessGate::new(Duration::ZERO, 4)),
            Arc::new(RobotsGate::disabled()),
            Arc::new(MetricsCollector::new()),
            workers,
        )
    }

    #[tokio::test]
    async fn test_workers_process_all_requests() {
        let fetcher = Arc::new(StubFetcher::new());
        let pipeline = pipeline(Arc::clone(&fetcher) as Arc<dyn Fetcher>, 3);

        let (request_tx, request_rx) = mpsc::channel(16);
        let (result_tx, mut result_rx) = mpsc::channel(16);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let handles = pipeline.spawn(request_rx, result_tx, cancel_rx);

        for i in 0..10 {
            request_tx
                .send(FetchRequest::unconditional(UrlRecord::seed(&format!(
                    "https://example.com/{i}"
                ))))
                .await
                .unwrap();
        }
        drop(request_tx);

        let mut received = 0;
        while let Some(result) = result_rx.recv().await {
            assert!(result.outcome.is_ok());
            received += 1;
        }
        assert_eq!(received, 10);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 10);

        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_cancel_abandons_in_flight_work() {
        let fetcher = Arc::new(StubFetcher::slow(Duration::from_secs(30)));
        let pipeline = pipeline(Arc::clone(&fetcher) as Arc<dyn Fetcher>, 2);

        let (request_tx, request_rx) = mpsc::channel(16);
        let (result_tx, mut result_rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handles = pipeline.spawn(request_rx, result_tx, cancel_rx);

        request_tx
            .send(FetchRequest::unconditional(UrlRecord::seed(
                "https://example.com/slow",
            )))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel_tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("worker exits promptly on cancel")
                .unwrap();
        }
        // The abandoned request produced no result
        assert!(result_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_url_reported_not_fetched() {
        let fetcher = Arc::new(StubFetcher::new());
        let pipeline = pipeline(Arc::clone(&fetcher) as Arc<dyn Fetcher>, 1);

        let (request_tx, request_rx) = mpsc::channel(4);
        let (result_tx, mut result_rx) = mpsc::channel(4);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        pipeline.spawn(request_rx, result_tx, cancel_rx);

        request_tx
            .send(FetchRequest::unconditional(UrlRecord::seed("::not-a-url::")))
            .await
            .unwrap();
        drop(request_tx);

        let result = result_rx.recv().await.unwrap();
        assert!(matches!(result.outcome, Err(FetchError::InvalidUrl(_))));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }
}
