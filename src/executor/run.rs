//! The per-crawl coordinator task
//!
//! One [`CrawlRun`] value owns all mutable crawl state: frontier, visited
//! and failed sets, progress, and the state machine. Fetch workers only ever
//! see cloned requests over channels, so nothing here needs a lock. The run
//! reacts to pause/cancel signals at its select points, writes checkpoints on
//! schedule, and seals the iteration when the frontier drains.

use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::frontier::{Frontier, PushOutcome};
use super::SharedStatus;
use crate::checkpoint::{CheckpointKind, CheckpointStore, StateBundle};
use crate::error::{Error, Result};
use crate::events::EventKind;
use crate::fetch::{
    FetchOutcome, FetchPipeline, FetchRequest, FetchResult, Fetcher, HttpFetcher, PolitenessGate,
    RobotsGate,
};
use crate::fingerprint::{ChangeClass, ChangeDetector, FetchDecision, Fingerprint};
use crate::iteration::{Iteration, IterationMode, IterationStats, IterationStore};
use crate::models::{Crawl, CrawlProgress, Document, FailureReason, FailureRecord, UrlRecord};
use crate::processor::{ContentProcessor, ProcessInput, ProcessOutcome};
use crate::runtime::Runtime;
use crate::state::{CrawlState, CrawlSubstate, StateMachine};
use crate::utils::retry::{with_retry, RetryConfig};

/// Outstanding work is abandoned this long after a cancel signal
const CANCEL_DEADLINE: Duration = Duration::from_secs(5);

/// How the crawl loop ended
enum LoopExit {
    /// Frontier drained; proceed to the finishing phases
    Drained,
    /// Cancelled; terminal state already entered
    Cancelled,
    /// The owning executor dropped its control channels while the crawl was
    /// paused; exit quietly, the pause checkpoint carries the state
    Detached,
}

/// How a pause ended
enum PauseOutcome {
    Resumed,
    Cancelled,
    Detached,
}

pub(super) struct CrawlRun {
    pub crawl: Crawl,
    pub iteration: Iteration,
    pub parent_fps: Arc<HashMap<String, Fingerprint>>,
    pub machine: StateMachine,
    pub runtime: Runtime,
    pub iterations: Arc<IterationStore>,
    pub checkpoints: Arc<CheckpointStore>,
    pub processor: Arc<dyn ContentProcessor>,
    pub shared: Arc<SharedStatus>,
    pub pause_rx: watch::Receiver<bool>,
    pub cancel_rx: watch::Receiver<bool>,
    pub restore: Option<StateBundle>,

    pub detector: ChangeDetector,
    pub frontier: Frontier,
    pub visited: BTreeSet<String>,
    pub failed: BTreeMap<String, FailureRecord>,
    pub completed_documents: Vec<Document>,
    pub progress: CrawlProgress,
    pub iter_stats: IterationStats,
    pub fetches_since_checkpoint: u64,
    /// Dispatched but unresolved requests; folded into checkpoints so a kill
    /// mid-flight loses nothing
    pub in_flight: HashMap<String, UrlRecord>,
    /// Set by the quality guard; behaves like an operator pause
    pub self_pause: bool,
}

impl CrawlRun {
    /// Entry point for the spawned coordinator task
    pub async fn run(mut self) {
        let crawl_id = self.crawl.crawl_id;
        match self.execute().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!(crawl_id = %crawl_id, error = %e, "Crawl failed");
                *self.shared.last_error.lock().expect("status lock") = Some(e.to_string());

                if !self.machine.current().is_terminal() {
                    // Error checkpoint first (still resumable), then Failed
                    if let Err(cp_err) = self.write_checkpoint(CheckpointKind::Error).await {
                        tracing::error!(crawl_id = %crawl_id, error = %cp_err, "Error checkpoint failed");
                    }
                    let _ = self.machine.transition(CrawlState::Failed);
                }
                self.publish(EventKind::Error, json!({ "message": e.to_string() }));
                self.sync_shared();
            }
        }
    }

    fn publish(&self, kind: EventKind, data: serde_json::Value) {
        self.runtime.bus.publish(self.crawl.crawl_id, kind, data);
    }

    fn sync_shared(&self) {
        *self.shared.state.lock().expect("status lock") =
            (self.machine.current(), self.machine.substate());
        *self.shared.progress.lock().expect("status lock") = self.progress.clone();
        self.shared
            .iteration_number
            .store(self.iteration.iteration_number, Ordering::Relaxed);
    }

    async fn execute(&mut self) -> Result<()> {
        let config = self.crawl.config.clone();
        let restoring = self.restore.is_some();

        self.publish(
            EventKind::CrawlStarted,
            json!({
                "seeds": config.seeds.len(),
                "iteration_number": self.iteration.iteration_number,
                "mode": self.iteration.mode.as_str(),
                "restored": restoring,
            }),
        );

        if let Some(bundle) = self.restore.take() {
            self.frontier = Frontier::from_records(bundle.frontier, config.frontier_soft_cap);
            self.visited = bundle.visited;
            self.failed = bundle.failed;
            self.completed_documents = bundle.completed_documents;
            self.progress = bundle.progress;
        } else {
            self.machine.transition(CrawlState::Initializing)?;
            for seed in &config.seeds {
                self.push_frontier(UrlRecord::seed(seed));
            }
            if self.frontier.is_empty() {
                return Err(Error::content("no reachable seeds"));
            }
        }
        if self.progress.started_at.is_none() {
            self.progress.started_at = Some(self.runtime.clock.now());
        }
        self.sync_shared();
        self.publish(
            EventKind::IterationStarted,
            json!({
                "iteration_id": self.iteration.iteration_id,
                "iteration_number": self.iteration.iteration_number,
                "mode": self.iteration.mode.as_str(),
            }),
        );

        // Fetch pipeline wiring
        let robots = if config.respect_robots {
            Arc::new(
                RobotsGate::new(&config.user_agent, true)
                    .map_err(|e| Error::content(format!("robots client: {e}")))?,
            )
        } else {
            Arc::new(RobotsGate::disabled())
        };
        let fetcher: Arc<dyn Fetcher> = Arc::new(
            HttpFetcher::new(&config)
                .map_err(Error::Fetch)?
                .with_robots(Arc::clone(&robots)),
        );
        let politeness = Arc::new(PolitenessGate::new(
            config.host_delay(),
            config.per_host_cap,
        ));
        let pipeline = FetchPipeline::new(
            fetcher,
            politeness,
            robots,
            Arc::clone(&self.runtime.metrics),
            config.concurrent_requests,
        );

        let (request_tx, request_rx) = mpsc::channel(config.concurrent_requests.max(2));
        let (result_tx, mut result_rx) = mpsc::channel(config.concurrent_requests * 2);
        let (worker_cancel_tx, worker_cancel_rx) = watch::channel(false);
        let workers = pipeline.spawn(request_rx, result_tx, worker_cancel_rx);

        if !restoring || self.machine.current() == CrawlState::Initializing {
            self.machine.transition(CrawlState::Crawling)?;
        }
        if self.machine.current() == CrawlState::Crawling && self.machine.substate().is_none() {
            self.machine.set_substate(CrawlSubstate::Discovering)?;
        }
        self.sync_shared();

        let exit = self
            .crawl_loop(&request_tx, &mut result_rx, &worker_cancel_tx, &workers)
            .await?;

        if matches!(exit, LoopExit::Cancelled | LoopExit::Detached) {
            return Ok(());
        }

        // Shut the pipeline down; the request channel closing ends the workers
        drop(request_tx);
        while let Some(result) = result_rx.recv().await {
            self.handle_result(result).await?;
        }
        for worker in workers {
            let _ = worker.await;
        }

        self.finish_phases().await
    }

    /// The Crawling phase: dispatch, collect, checkpoint, obey signals
    async fn crawl_loop(
        &mut self,
        request_tx: &mpsc::Sender<FetchRequest>,
        result_rx: &mut mpsc::Receiver<FetchResult>,
        worker_cancel_tx: &watch::Sender<bool>,
        workers: &[JoinHandle<()>],
    ) -> Result<LoopExit> {
        let config = self.crawl.config.clone();
        let conditional = self.iteration.mode == IterationMode::Incremental;
        let deadline = config.max_duration().map(|d| Instant::now() + d);
        let mut pause_rx = self.pause_rx.clone();
        let mut cancel_rx = self.cancel_rx.clone();
        let mut pause_alive = true;
        let mut cancel_alive = true;

        loop {
            if *cancel_rx.borrow() {
                self.finish_cancelled(worker_cancel_tx, workers, result_rx)
                    .await?;
                return Ok(LoopExit::Cancelled);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    tracing::warn!(crawl_id = %self.crawl.crawl_id, "Crawl duration limit reached");
                    self.finish_cancelled(worker_cancel_tx, workers, result_rx)
                        .await?;
                    return Ok(LoopExit::Cancelled);
                }
            }

            if *pause_rx.borrow() || self.self_pause {
                match self
                    .enter_pause(result_rx, &mut pause_rx, &mut cancel_rx)
                    .await?
                {
                    PauseOutcome::Resumed => {}
                    PauseOutcome::Cancelled => continue, // handled at loop top
                    PauseOutcome::Detached => return Ok(LoopExit::Detached),
                }
            }

            let stopping = self.limits_reached(&config);
            if !stopping {
                self.dispatch_ready(request_tx, conditional, &config).await?;
            }

            if self.in_flight.is_empty() && (self.frontier.is_empty() || stopping) {
                return Ok(LoopExit::Drained);
            }

            // A far-future instant stands in when no duration limit is set
            let wake_at =
                deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));
            tokio::select! {
                maybe = result_rx.recv() => {
                    match maybe {
                        Some(result) => self.handle_result(result).await?,
                        None => return Ok(LoopExit::Drained), // workers gone
                    }
                }
                // A closed watch channel means the executor is gone; stop
                // watching it and keep draining results
                changed = pause_rx.changed(), if pause_alive => {
                    pause_alive = changed.is_ok();
                }
                changed = cancel_rx.changed(), if cancel_alive => {
                    cancel_alive = changed.is_ok();
                }
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    fn limits_reached(&self, config: &crate::config::CrawlConfig) -> bool {
        if let Some(max_pages) = config.max_pages {
            if self.progress.urls_crawled + self.progress.urls_skipped_unchanged >= max_pages {
                return true;
            }
        }
        if let Some(max_documents) = config.max_documents {
            if self.progress.documents_found >= max_documents {
                return true;
            }
        }
        if let Some(max_total) = config.max_total_bytes {
            if self.progress.bytes_downloaded >= max_total {
                return true;
            }
        }
        false
    }

    /// Dispatch frontier URLs up to the worker capacity
    async fn dispatch_ready(
        &mut self,
        request_tx: &mpsc::Sender<FetchRequest>,
        conditional: bool,
        config: &crate::config::CrawlConfig,
    ) -> Result<()> {
        while self.in_flight.len() < config.concurrent_requests {
            let Some(record) = self.frontier.pop() else {
                break;
            };
            self.runtime
                .metrics
                .set_frontier_size(self.frontier.len() as u64);

            if self.visited.contains(&record.url) || self.failed.contains_key(&record.url) {
                continue;
            }

            // Validator fast path; without probe headers this decides Fetch
            // and the conditional GET settles it via a 304
            if conditional {
                let decision = self
                    .detector
                    .should_fetch(&record.url, &self.parent_fps, None);
                if decision == FetchDecision::Skip {
                    self.record_unchanged(&record.url, None, None).await?;
                    continue;
                }
            }

            let parent = self.parent_fps.get(&record.url);
            let request = FetchRequest {
                if_none_match: conditional
                    .then(|| parent.and_then(|p| p.etag.clone()))
                    .flatten(),
                if_modified_since: conditional
                    .then(|| parent.and_then(|p| p.last_modified.clone()))
                    .flatten(),
                record: record.clone(),
            };

            if self.machine.substate() == Some(CrawlSubstate::Discovering) {
                self.machine.set_substate(CrawlSubstate::DownloadingPages)?;
            }
            self.in_flight.insert(record.url.clone(), record);
            if request_tx.send(request).await.is_err() {
                return Err(Error::content("fetch pipeline closed unexpectedly"));
            }
        }
        Ok(())
    }

    /// Pause: drain in-flight fetches, checkpoint, wait for resume/cancel
    async fn enter_pause(
        &mut self,
        result_rx: &mut mpsc::Receiver<FetchResult>,
        pause_rx: &mut watch::Receiver<bool>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<PauseOutcome> {
        // A guard-initiated pause (pause_rx already false) waits for an
        // explicit resume signal rather than for the flag to clear
        let operator_initiated = *pause_rx.borrow();

        while !self.in_flight.is_empty() {
            match result_rx.recv().await {
                Some(result) => self.handle_result(result).await?,
                None => break,
            }
        }

        // The checkpoint captures the pre-pause state so resume lands there
        self.write_checkpoint(CheckpointKind::Pause).await?;
        self.machine.pause().map_err(Error::State)?;
        self.self_pause = false;
        self.sync_shared();
        tracing::info!(crawl_id = %self.crawl.crawl_id, "Crawl paused");

        loop {
            if *cancel_rx.borrow() {
                return Ok(PauseOutcome::Cancelled);
            }
            if operator_initiated && !*pause_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = pause_rx.changed() => {
                    if changed.is_err() {
                        // The executor dropped its handle; the pause
                        // checkpoint already carries everything needed
                        return Ok(PauseOutcome::Detached);
                    }
                    if !*pause_rx.borrow() {
                        break;
                    }
                }
                changed = cancel_rx.changed() => {
                    if changed.is_err() {
                        return Ok(PauseOutcome::Detached);
                    }
                }
            }
        }

        self.machine.resume().map_err(Error::State)?;
        self.sync_shared();
        tracing::info!(crawl_id = %self.crawl.crawl_id, "Crawl resumed");
        Ok(PauseOutcome::Resumed)
    }

    /// Cancel: signal workers, wait out the deadline, final checkpoint
    async fn finish_cancelled(
        &mut self,
        worker_cancel_tx: &watch::Sender<bool>,
        workers: &[JoinHandle<()>],
        result_rx: &mut mpsc::Receiver<FetchResult>,
    ) -> Result<()> {
        let _ = worker_cancel_tx.send(true);

        // Collect whatever results arrive before the deadline; the rest is
        // abandoned work and stays in the checkpoint's in-flight fold-in
        let deadline = Instant::now() + CANCEL_DEADLINE;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || workers.iter().all(|w| w.is_finished()) {
                break;
            }
            match tokio::time::timeout(remaining, result_rx.recv()).await {
                Ok(Some(result)) => self.handle_result(result).await?,
                Ok(None) => break,
                Err(_) => break,
            }
        }

        self.machine.cancel().map_err(Error::State)?;
        self.write_checkpoint(CheckpointKind::Manual).await?;
        self.sync_shared();
        tracing::info!(crawl_id = %self.crawl.crawl_id, "Crawl cancelled");
        Ok(())
    }

    /// Extract/process phases, then seal the iteration
    async fn finish_phases(&mut self) -> Result<()> {
        if self.machine.current() == CrawlState::Crawling {
            self.machine.transition(CrawlState::Extracting)?;
        }
        if self.machine.current() == CrawlState::Extracting {
            // No staged extractor in the pipeline: extraction happened inline
            // in the processor, so this pass is bookkeeping only
            self.machine.set_substate(CrawlSubstate::TextExtraction)?;
            self.machine.transition(CrawlState::Processing)?;
        }
        if self.machine.current() == CrawlState::Processing {
            for substate in [
                CrawlSubstate::Metadata,
                CrawlSubstate::QualityScoring,
                CrawlSubstate::Deduplication,
                CrawlSubstate::Export,
            ] {
                self.machine.set_substate(substate)?;
            }
            self.machine.transition(CrawlState::Completed)?;
        }
        self.sync_shared();

        // Deleted set: parent URLs never seen in this iteration
        let seen: BTreeSet<String> = self
            .iterations
            .get_fingerprints(self.iteration.iteration_id)
            .map_err(|e| Error::storage(anyhow::Error::from(e)))?
            .keys()
            .cloned()
            .collect();
        let deleted = self.detector.deleted_set(&self.parent_fps, &seen);

        // Progress counters are per iteration and survive resume, so they
        // are the authoritative stats at seal time
        self.iter_stats = IterationStats {
            urls_fetched: self.progress.urls_crawled,
            urls_unchanged: self.progress.urls_skipped_unchanged,
            urls_failed: self.progress.urls_failed,
            documents_found: self.progress.documents_found,
            bytes_downloaded: self.progress.bytes_downloaded,
        };
        let sealed = self
            .iterations
            .complete(self.iteration.iteration_id, self.iter_stats.clone())
            .map_err(Error::Iteration)?;
        self.iteration = sealed;

        self.publish(
            EventKind::IterationCompleted,
            json!({
                "iteration_id": self.iteration.iteration_id,
                "iteration_number": self.iteration.iteration_number,
                "urls_fetched": self.iter_stats.urls_fetched,
                "urls_unchanged": self.iter_stats.urls_unchanged,
                "urls_failed": self.iter_stats.urls_failed,
                "deleted": deleted.len(),
            }),
        );
        tracing::info!(
            crawl_id = %self.crawl.crawl_id,
            iteration = self.iteration.iteration_number,
            fetched = self.iter_stats.urls_fetched,
            unchanged = self.iter_stats.urls_unchanged,
            failed = self.iter_stats.urls_failed,
            deleted = deleted.len(),
            "Crawl completed"
        );
        Ok(())
    }

    /// Fold one fetch result into the crawl state
    async fn handle_result(&mut self, result: FetchResult) -> Result<()> {
        let record = result.record;
        self.in_flight.remove(&record.url);

        match result.outcome {
            Ok(FetchOutcome::Fetched(doc)) => {
                let change = self
                    .detector
                    .classify(&doc.url, &doc.body, &self.parent_fps);
                let fingerprint = Fingerprint::from_body(
                    &doc.url,
                    &doc.body,
                    doc.etag.clone(),
                    doc.last_modified.clone(),
                );
                self.record_fingerprint_durably(fingerprint).await?;

                self.visited.insert(doc.url.clone());
                self.progress.urls_crawled += 1;
                self.progress.bytes_downloaded += doc.body.len() as u64;
                self.progress.touch();
                self.runtime.metrics.record_url_crawled();
                self.runtime
                    .metrics
                    .record_bytes_downloaded(doc.body.len() as u64);

                self.publish(
                    EventKind::UrlFetched,
                    json!({
                        "url": doc.url,
                        "status": doc.status,
                        "bytes": doc.body.len(),
                        "change": change.as_str(),
                        "attempts": doc.attempts,
                    }),
                );

                self.process_document(&record, doc, change).await?;
            }
            Ok(FetchOutcome::NotModified {
                url,
                etag,
                last_modified,
            }) => {
                self.record_unchanged(&url, etag, last_modified).await?;
            }
            Err(e) => {
                let reason = e.failure_reason();
                let attempts = match &e {
                    crate::fetch::FetchError::MaxRetriesExceeded { .. } => {
                        self.crawl.config.max_retries + 1
                    }
                    _ => record.attempt_count + 1,
                };
                self.failed.insert(
                    record.url.clone(),
                    FailureRecord::new(&record.url, reason, e.to_string(), attempts),
                );
                self.progress.urls_failed += 1;
                self.progress.touch();
                self.runtime.metrics.record_url_failed();

                self.publish(
                    EventKind::UrlFailed,
                    json!({
                        "url": record.url,
                        "reason": reason.as_str(),
                        "detail": e.to_string(),
                    }),
                );
            }
        }

        self.fetches_since_checkpoint += 1;
        if self.fetches_since_checkpoint >= self.crawl.config.checkpoint_every_n {
            self.fetches_since_checkpoint = 0;
            self.write_checkpoint(CheckpointKind::Auto).await?;
            self.evaluate_quality_guard();
        }
        self.sync_shared();
        Ok(())
    }

    /// Run the content processor and fold in its outcome
    async fn process_document(
        &mut self,
        record: &UrlRecord,
        doc: crate::fetch::FetchedDocument,
        change: ChangeClass,
    ) -> Result<()> {
        let config = self.crawl.config.clone();
        let input = ProcessInput {
            url: doc.url.clone(),
            final_url: doc.final_url.clone(),
            body: doc.body,
            content_type: doc.content_type,
            depth: record.depth,
        };

        match self.processor.process(input).await {
            ProcessOutcome::Document {
                document,
                discovered,
            } => {
                if document.quality_score >= config.min_quality_score {
                    self.publish(
                        EventKind::DocumentFound,
                        json!({
                            "url": document.url,
                            "title": document.title,
                            "quality_score": document.quality_score,
                        }),
                    );
                    self.publish(
                        EventKind::DocumentProcessed,
                        json!({
                            "url": document.url,
                            "bytes": document.byte_size,
                            "change": change.as_str(),
                        }),
                    );
                    self.progress.documents_found += 1;
                    self.runtime.metrics.record_document_found();
                    self.completed_documents.push(document);
                } else {
                    tracing::debug!(
                        url = %document.url,
                        score = document.quality_score,
                        threshold = config.min_quality_score,
                        "Document below quality threshold"
                    );
                }

                if config.strategy.follows_links() && record.depth < config.max_depth {
                    for link in discovered {
                        self.enqueue_discovered(&link, &record.url, record.depth + 1);
                    }
                }
            }
            ProcessOutcome::Skip { reason } => {
                tracing::debug!(url = %record.url, reason = %reason, "Processor skipped payload");
            }
            ProcessOutcome::Fail { error } => {
                // Recovered locally: the page stays visited, the failure is
                // recorded, the crawl continues
                self.failed.insert(
                    record.url.clone(),
                    FailureRecord::new(&record.url, FailureReason::Processor, error.clone(), 1),
                );
                self.publish(
                    EventKind::Error,
                    json!({ "url": record.url, "message": error }),
                );
            }
        }
        Ok(())
    }

    /// Enqueue a URL, publishing the event and updating the frontier gauge
    ///
    /// A push over the soft cap drops the URL for good; it is recorded as
    /// `frontier_full` and never retried.
    fn push_frontier(&mut self, record: UrlRecord) {
        let url = record.url.clone();
        let depth = record.depth;
        let discovered_from = record.discovered_from.clone();
        match self.frontier.push(record) {
            PushOutcome::Queued => {
                self.runtime.metrics.record_url_queued();
                self.runtime
                    .metrics
                    .set_frontier_size(self.frontier.len() as u64);
                self.publish(
                    EventKind::UrlEnqueued,
                    json!({ "url": url, "depth": depth, "discovered_from": discovered_from }),
                );
            }
            PushOutcome::Duplicate => {}
            PushOutcome::Full => {
                self.failed.insert(
                    url.clone(),
                    FailureRecord::new(&url, FailureReason::FrontierFull, "frontier soft cap", 0),
                );
                self.publish(
                    EventKind::UrlFailed,
                    json!({ "url": url, "reason": FailureReason::FrontierFull.as_str() }),
                );
            }
        }
    }

    /// Admit a discovered link to the frontier, applying the config filters
    fn enqueue_discovered(&mut self, link: &str, parent: &str, depth: u32) {
        if self.visited.contains(link)
            || self.failed.contains_key(link)
            || self.frontier.contains(link)
        {
            return;
        }
        let config = &self.crawl.config;
        if !config.keyword_filters.is_empty()
            && !config.keyword_filters.iter().any(|k| link.contains(k))
        {
            return;
        }
        if !config.allowed_file_types.is_empty() {
            if let Some(ext) = url_extension(link) {
                if !config.allowed_file_types.contains(&ext) {
                    return;
                }
            }
        }

        self.push_frontier(UrlRecord::discovered(link, parent, depth));
    }

    /// Record an unchanged URL: parent fingerprint carried forward, zero
    /// bytes downloaded
    async fn record_unchanged(
        &mut self,
        url: &str,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> Result<()> {
        let Some(parent) = self.parent_fps.get(url) else {
            tracing::warn!(url, "304 without a parent fingerprint; ignoring");
            return Ok(());
        };
        let mut fingerprint = parent.clone();
        fingerprint.fetched_at = self.runtime.clock.now();
        if etag.is_some() {
            fingerprint.etag = etag;
        }
        if last_modified.is_some() {
            fingerprint.last_modified = last_modified;
        }
        self.record_fingerprint_durably(fingerprint).await?;

        self.visited.insert(url.to_string());
        self.progress.urls_skipped_unchanged += 1;
        self.progress.touch();

        self.publish(
            EventKind::DocumentProcessed,
            json!({
                "url": url,
                "bytes": 0,
                "change": ChangeClass::Unchanged.as_str(),
            }),
        );
        Ok(())
    }

    /// Persist a fingerprint, retrying transient storage failures
    async fn record_fingerprint_durably(&self, fingerprint: Fingerprint) -> Result<()> {
        let iteration_id = self.iteration.iteration_id;
        let store = Arc::clone(&self.iterations);
        let retry = RetryConfig::storage();
        with_retry(&retry, || {
            let fingerprint = fingerprint.clone();
            let store = Arc::clone(&store);
            async move {
                store
                    .record_fingerprint(iteration_id, fingerprint)
                    .map_err(anyhow::Error::from)
            }
        })
        .await
        .map_err(Error::storage)
    }

    /// Capture and durably write a checkpoint, retrying transient failures
    async fn write_checkpoint(&mut self, kind: CheckpointKind) -> Result<()> {
        let bundle = self.capture_bundle();
        let crawl_id = self.crawl.crawl_id;
        let store = Arc::clone(&self.checkpoints);
        let retry = RetryConfig::storage();
        let checkpoint = with_retry(&retry, || {
            let bundle = bundle.clone();
            let store = Arc::clone(&store);
            async move {
                store
                    .snapshot(crawl_id, bundle, kind)
                    .map_err(anyhow::Error::from)
            }
        })
        .await
        .map_err(Error::storage)?;

        self.publish(
            EventKind::CheckpointCreated,
            json!({
                "checkpoint_id": checkpoint.checkpoint_id,
                "sequence_number": checkpoint.sequence_number,
                "kind": kind.as_str(),
            }),
        );
        Ok(())
    }

    fn capture_bundle(&self) -> StateBundle {
        // In-flight URLs rejoin the frontier snapshot so a kill between
        // dispatch and result loses no work (at-least-once processing)
        let mut frontier = self.frontier.snapshot();
        frontier.extend(self.in_flight.values().cloned());

        StateBundle {
            state: self.machine.current(),
            substate: self.machine.substate(),
            frontier,
            visited: self.visited.clone(),
            failed: self.failed.clone(),
            completed_documents: self.completed_documents.clone(),
            progress: self.progress.clone(),
            metrics: self.runtime.metrics.recent_samples(60),
            config: self.crawl.config.clone(),
            current_iteration_id: Some(self.iteration.iteration_id),
            baseline_iteration_id: self.crawl.baseline_iteration_id,
        }
    }

    /// Quality guard, evaluated only at auto-checkpoint boundaries
    fn evaluate_quality_guard(&mut self) {
        let Some(threshold) = self.crawl.config.pause_on_success_rate_below else {
            return;
        };
        let attempted = self.progress.urls_crawled + self.progress.urls_failed;
        if attempted >= 10 && self.progress.success_rate() < threshold {
            tracing::warn!(
                crawl_id = %self.crawl.crawl_id,
                success_rate = self.progress.success_rate(),
                threshold,
                "Success rate below guard threshold; pausing"
            );
            self.self_pause = true;
        }
    }
}

/// Lowercased file extension of a URL path, if it has one
fn url_extension(link: &str) -> Option<String> {
    let parsed = url::Url::parse(link).ok()?;
    let path = parsed.path();
    let name = path.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_extension() {
        assert_eq!(
            url_extension("https://e.com/doc.PDF").as_deref(),
            Some("pdf")
        );
        assert_eq!(url_extension("https://e.com/page"), None);
        assert_eq!(url_extension("https://e.com/a.b/c"), None);
        assert_eq!(
            url_extension("https://e.com/archive.tar.gz").as_deref(),
            Some("gz")
        );
    }
}
