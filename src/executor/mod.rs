//! Crawl executor: the top-level orchestrator
//!
//! Owns the registry of crawls in this process. Each started crawl runs as a
//! spawned coordinator task (see [`run`]); the executor talks to it over
//! pause/cancel watch channels and reads a small shared status block. All
//! durable state goes through the iteration and checkpoint stores, so a
//! crawl survives process restarts via [`CrawlExecutor::resume`].

pub mod frontier;
mod run;

pub use frontier::{Frontier, PushOutcome};

use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::checkpoint::{Checkpoint, CheckpointStore, StateBundle};
use crate::config::CrawlConfig;
use crate::error::{Error, Result};
use crate::events::{EventKind, EventSubscriber};
use crate::fingerprint::Fingerprint;
use crate::iteration::{Iteration, IterationMode, IterationStats, IterationStore};
use crate::models::{CheckpointId, Crawl, CrawlId, CrawlProgress};
use crate::processor::ContentProcessor;
use crate::runtime::Runtime;
use crate::state::{CrawlState, CrawlSubstate, StateMachine};

use run::CrawlRun;

/// How long `cancel` waits for the coordinator after the workers' own 5 s
/// cancellation deadline
const CANCEL_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Point-in-time view of a crawl, for status queries and the CLI
#[derive(Debug, Clone, Serialize)]
pub struct CrawlStatus {
    pub crawl_id: CrawlId,
    pub state: CrawlState,
    pub substate: Option<CrawlSubstate>,
    pub progress: CrawlProgress,
    pub iteration_number: u32,
    pub last_error: Option<String>,
}

/// Status block shared between a coordinator task and the executor
pub(crate) struct SharedStatus {
    pub state: Mutex<(CrawlState, Option<CrawlSubstate>)>,
    pub progress: Mutex<CrawlProgress>,
    pub iteration_number: AtomicU32,
    pub last_error: Mutex<Option<String>>,
}

impl SharedStatus {
    fn new() -> Self {
        Self {
            state: Mutex::new((CrawlState::Queued, None)),
            progress: Mutex::new(CrawlProgress::default()),
            iteration_number: AtomicU32::new(0),
            last_error: Mutex::new(None),
        }
    }

    fn current_state(&self) -> CrawlState {
        self.state.lock().expect("status lock").0
    }
}

struct CrawlEntry {
    pause_tx: watch::Sender<bool>,
    cancel_tx: watch::Sender<bool>,
    shared: Arc<SharedStatus>,
    join: Option<JoinHandle<()>>,
}

impl CrawlEntry {
    fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }
}

/// The crawl executor
pub struct CrawlExecutor {
    data_dir: PathBuf,
    runtime: Runtime,
    iterations: Arc<IterationStore>,
    checkpoints: Arc<CheckpointStore>,
    processor: Arc<dyn ContentProcessor>,
    crawls: tokio::sync::Mutex<HashMap<CrawlId, CrawlEntry>>,
    /// 1 Hz metrics sampler; aborted when the executor drops
    sampler: JoinHandle<()>,
}

impl Drop for CrawlExecutor {
    fn drop(&mut self) {
        self.sampler.abort();
    }
}

impl CrawlExecutor {
    /// Open an executor rooted at `data_dir`
    ///
    /// Must be called from within a Tokio runtime; the metrics sampler task
    /// is spawned here.
    pub fn new(
        data_dir: &Path,
        runtime: Runtime,
        processor: Arc<dyn ContentProcessor>,
    ) -> Result<Self> {
        fs::create_dir_all(data_dir.join("crawls")).map_err(Error::storage)?;
        let iterations =
            Arc::new(IterationStore::open(data_dir).map_err(|e| Error::storage(anyhow::Error::from(e)))?);
        let checkpoints =
            Arc::new(CheckpointStore::open(data_dir).map_err(|e| Error::storage(anyhow::Error::from(e)))?);
        let sampler = runtime.metrics.start_sampler();

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            runtime,
            iterations,
            checkpoints,
            processor,
            crawls: tokio::sync::Mutex::new(HashMap::new()),
            sampler,
        })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn iterations(&self) -> &Arc<IterationStore> {
        &self.iterations
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointStore> {
        &self.checkpoints
    }

    /// Subscribe to a crawl's event stream
    pub fn subscribe(&self, crawl_id: CrawlId) -> EventSubscriber {
        self.runtime.bus.subscribe(crawl_id)
    }

    // -- crawl record persistence --

    fn crawl_path(&self, crawl_id: CrawlId) -> PathBuf {
        self.data_dir
            .join("crawls")
            .join(crawl_id.to_string())
            .join("crawl.json")
    }

    fn save_crawl(&self, crawl: &Crawl) -> Result<()> {
        let path = self.crawl_path(crawl.crawl_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::storage)?;
        }
        let temp = path.with_extension("json.tmp");
        fs::write(
            &temp,
            serde_json::to_vec_pretty(crawl).map_err(Error::storage)?,
        )
        .map_err(Error::storage)?;
        fs::rename(&temp, &path).map_err(Error::storage)?;
        Ok(())
    }

    fn load_crawl(&self, crawl_id: CrawlId) -> Result<Crawl> {
        let path = self.crawl_path(crawl_id);
        if !path.exists() {
            return Err(Error::UnknownCrawl(crawl_id));
        }
        let content = fs::read_to_string(&path).map_err(Error::storage)?;
        serde_json::from_str(&content).map_err(Error::storage)
    }

    // -- lifecycle operations --

    /// Submit a crawl: validates the config, creates the baseline iteration,
    /// and starts execution asynchronously
    pub async fn start(&self, config: CrawlConfig) -> Result<CrawlId> {
        config.validate()?;

        let mut crawl = Crawl::new(config);
        let baseline = self
            .iterations
            .create_baseline(crawl.crawl_id)
            .map_err(Error::Iteration)?;
        crawl.baseline_iteration_id = Some(baseline.iteration_id);
        crawl.current_iteration_id = Some(baseline.iteration_id);
        self.save_crawl(&crawl)?;

        let crawl_id = crawl.crawl_id;
        self.spawn_run(crawl, baseline, Arc::new(HashMap::new()), None)
            .await;
        tracing::info!(crawl_id = %crawl_id, "Crawl started");
        Ok(crawl_id)
    }

    /// Cooperative pause: in-flight fetches drain, then a pause checkpoint
    /// is written and the crawl transitions to `Paused`
    pub async fn pause(&self, crawl_id: CrawlId) -> Result<()> {
        let crawls = self.crawls.lock().await;
        let Some(entry) = crawls.get(&crawl_id) else {
            drop(crawls);
            // Exists on disk but is not running: pausing makes no sense
            self.load_crawl(crawl_id)?;
            return Err(Error::State(crate::state::StateError::IllegalTransition {
                from: CrawlState::Queued,
                to: CrawlState::Paused,
            }));
        };

        let state = entry.shared.current_state();
        if state.is_terminal() {
            return Err(Error::State(crate::state::StateError::IllegalTransition {
                from: state,
                to: CrawlState::Paused,
            }));
        }
        let _ = entry.pause_tx.send(true);
        Ok(())
    }

    /// Resume a paused crawl, in memory if possible, otherwise from the
    /// latest resumable checkpoint
    pub async fn resume(&self, crawl_id: CrawlId) -> Result<()> {
        {
            let crawls = self.crawls.lock().await;
            if let Some(entry) = crawls.get(&crawl_id) {
                if entry.is_running() {
                    let state = entry.shared.current_state();
                    if state == CrawlState::Paused || *entry.pause_tx.borrow() {
                        let _ = entry.pause_tx.send(false);
                        return Ok(());
                    }
                    return Err(Error::State(crate::state::StateError::NothingToResume));
                }
            }
        }
        self.resume_from_bundle(crawl_id, None).await
    }

    /// Resume from a specific checkpoint id
    pub async fn resume_from(&self, crawl_id: CrawlId, checkpoint_id: CheckpointId) -> Result<()> {
        let checkpoint = self
            .checkpoints
            .restore(crawl_id, checkpoint_id)
            .map_err(Error::Checkpoint)?;
        self.resume_from_bundle(crawl_id, Some(checkpoint)).await
    }

    async fn resume_from_bundle(
        &self,
        crawl_id: CrawlId,
        checkpoint: Option<Checkpoint>,
    ) -> Result<()> {
        let crawl = self.load_crawl(crawl_id)?;
        let checkpoint = match checkpoint {
            Some(cp) => cp,
            None => self
                .checkpoints
                .latest_resumable(crawl_id)
                .map_err(Error::Checkpoint)?
                .ok_or_else(|| {
                    Error::Checkpoint(crate::checkpoint::CheckpointError::NotFound(
                        "no resumable checkpoint".to_string(),
                    ))
                })?,
        };

        let bundle = checkpoint.bundle.clone();
        let iteration_id = bundle.current_iteration_id.ok_or_else(|| {
            Error::storage(anyhow::anyhow!("checkpoint has no iteration pointer"))
        })?;
        let iteration = self.iterations.get(iteration_id).map_err(Error::Iteration)?;
        let parent_fps = self.parent_fingerprints(&iteration)?;

        self.runtime.bus.publish(
            crawl_id,
            EventKind::CheckpointRestored,
            serde_json::json!({
                "checkpoint_id": checkpoint.checkpoint_id,
                "sequence_number": checkpoint.sequence_number,
            }),
        );
        tracing::info!(
            crawl_id = %crawl_id,
            sequence = checkpoint.sequence_number,
            "Resuming from checkpoint"
        );

        self.spawn_run(crawl, iteration, parent_fps, Some(bundle)).await;
        Ok(())
    }

    /// Cancel a crawl; always honoured, idempotent, never an error for a
    /// known crawl
    pub async fn cancel(&self, crawl_id: CrawlId) -> Result<()> {
        let join = {
            let mut crawls = self.crawls.lock().await;
            if let Some(entry) = crawls.get_mut(&crawl_id) {
                if entry.shared.current_state().is_terminal() {
                    return Ok(()); // second cancel: no state change
                }
                let _ = entry.cancel_tx.send(true);
                entry.join.take()
            } else {
                None
            }
        };

        if let Some(join) = join {
            let _ = tokio::time::timeout(CANCEL_JOIN_TIMEOUT, join).await;
            return Ok(());
        }

        // Not running here: mark the durable state cancelled
        self.load_crawl(crawl_id)?;
        if let Some(latest) = self
            .checkpoints
            .latest(crawl_id)
            .map_err(Error::Checkpoint)?
        {
            if latest.bundle.state.is_terminal() {
                return Ok(());
            }
            let mut bundle = latest.bundle;
            bundle.state = CrawlState::Cancelled;
            bundle.substate = None;
            self.checkpoints
                .snapshot(crawl_id, bundle, crate::checkpoint::CheckpointKind::Manual)
                .map_err(Error::Checkpoint)?;
        }
        self.runtime
            .bus
            .publish(crawl_id, EventKind::Cancelled, serde_json::json!({}));
        Ok(())
    }

    /// Create and start the next iteration of a crawl
    ///
    /// Requires the previous iteration to be completed, unless `mode` is
    /// `Full`, which may fork from an incomplete run.
    pub async fn next_iteration(
        &self,
        crawl_id: CrawlId,
        mode: IterationMode,
    ) -> Result<Iteration> {
        {
            let crawls = self.crawls.lock().await;
            if let Some(entry) = crawls.get(&crawl_id) {
                if entry.is_running() && !entry.shared.current_state().is_terminal() {
                    return Err(Error::Iteration(
                        crate::iteration::IterationError::PreviousNotCompleted(
                            entry.shared.iteration_number.load(Ordering::Relaxed),
                        ),
                    ));
                }
            }
        }

        let mut crawl = self.load_crawl(crawl_id)?;
        let child = self
            .iterations
            .create_child(crawl_id, mode, mode == IterationMode::Full)
            .map_err(Error::Iteration)?;
        crawl.current_iteration_id = Some(child.iteration_id);
        self.save_crawl(&crawl)?;

        let parent_fps = self.parent_fingerprints(&child)?;
        self.spawn_run(crawl, child.clone(), parent_fps, None).await;
        tracing::info!(
            crawl_id = %crawl_id,
            iteration = child.iteration_number,
            mode = %mode,
            "Next iteration started"
        );
        Ok(child)
    }

    /// The parent iteration's fingerprints, for change detection
    ///
    /// `full` mode still loads them (classification and the deleted set need
    /// a reference point) but the run does not send validators.
    fn parent_fingerprints(
        &self,
        iteration: &Iteration,
    ) -> Result<Arc<HashMap<String, Fingerprint>>> {
        match iteration.parent_iteration_id {
            Some(parent_id) => {
                let fps = self
                    .iterations
                    .get_fingerprints(parent_id)
                    .map_err(Error::Iteration)?;
                Ok(Arc::new(fps.as_ref().clone()))
            }
            None => Ok(Arc::new(HashMap::new())),
        }
    }

    /// Current status of a crawl, running or durable
    pub async fn status(&self, crawl_id: CrawlId) -> Result<CrawlStatus> {
        {
            let crawls = self.crawls.lock().await;
            if let Some(entry) = crawls.get(&crawl_id) {
                let (state, substate) = *entry.shared.state.lock().expect("status lock");
                return Ok(CrawlStatus {
                    crawl_id,
                    state,
                    substate,
                    progress: entry.shared.progress.lock().expect("status lock").clone(),
                    iteration_number: entry.shared.iteration_number.load(Ordering::Relaxed),
                    last_error: entry.shared.last_error.lock().expect("status lock").clone(),
                });
            }
        }

        self.load_crawl(crawl_id)?;
        let latest = self
            .checkpoints
            .latest(crawl_id)
            .map_err(Error::Checkpoint)?;
        let iteration_number = self
            .iterations
            .latest(crawl_id)
            .map(|i| i.iteration_number)
            .unwrap_or(0);
        match latest {
            Some(cp) => Ok(CrawlStatus {
                crawl_id,
                state: cp.bundle.state,
                substate: cp.bundle.substate,
                progress: cp.bundle.progress,
                iteration_number,
                last_error: None,
            }),
            None => Ok(CrawlStatus {
                crawl_id,
                state: CrawlState::Queued,
                substate: None,
                progress: CrawlProgress::default(),
                iteration_number,
                last_error: None,
            }),
        }
    }

    /// Wait for a crawl's coordinator task to finish and return its status
    pub async fn wait(&self, crawl_id: CrawlId) -> Result<CrawlStatus> {
        let join = {
            let mut crawls = self.crawls.lock().await;
            crawls
                .get_mut(&crawl_id)
                .ok_or(Error::UnknownCrawl(crawl_id))?
                .join
                .take()
        };
        if let Some(join) = join {
            let _ = join.await;
        }
        self.status(crawl_id).await
    }

    /// Write a manual checkpoint from the latest durable state
    pub async fn manual_checkpoint(&self, crawl_id: CrawlId) -> Result<Checkpoint> {
        self.load_crawl(crawl_id)?;
        let latest = self
            .checkpoints
            .latest(crawl_id)
            .map_err(Error::Checkpoint)?
            .ok_or_else(|| {
                Error::Checkpoint(crate::checkpoint::CheckpointError::NotFound(
                    "no checkpoint to copy".to_string(),
                ))
            })?;
        let checkpoint = self
            .checkpoints
            .snapshot(
                crawl_id,
                latest.bundle,
                crate::checkpoint::CheckpointKind::Manual,
            )
            .map_err(Error::Checkpoint)?;
        Ok(checkpoint)
    }

    async fn spawn_run(
        &self,
        crawl: Crawl,
        iteration: Iteration,
        parent_fps: Arc<HashMap<String, Fingerprint>>,
        restore: Option<StateBundle>,
    ) {
        let crawl_id = crawl.crawl_id;
        let shared = Arc::new(SharedStatus::new());
        let (pause_tx, pause_rx) = watch::channel(false);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let machine = match &restore {
            Some(bundle) => {
                // Paused/early states restart in Crawling; the frontier and
                // visited set carry the real position
                let state = match bundle.state {
                    CrawlState::Paused | CrawlState::Queued | CrawlState::Initializing => {
                        CrawlState::Crawling
                    }
                    s => s,
                };
                let substate = bundle.substate.filter(|sub| sub.parent_state() == state);
                StateMachine::restored(crawl_id, Arc::clone(&self.runtime.bus), state, substate)
            }
            None => StateMachine::new(crawl_id, Arc::clone(&self.runtime.bus)),
        };

        let soft_cap = crawl.config.frontier_soft_cap;
        let run = CrawlRun {
            crawl,
            iteration,
            parent_fps,
            machine,
            runtime: self.runtime.clone(),
            iterations: Arc::clone(&self.iterations),
            checkpoints: Arc::clone(&self.checkpoints),
            processor: Arc::clone(&self.processor),
            shared: Arc::clone(&shared),
            pause_rx,
            cancel_rx,
            restore,
            detector: crate::fingerprint::ChangeDetector::new(),
            frontier: Frontier::new(soft_cap),
            visited: Default::default(),
            failed: Default::default(),
            completed_documents: Vec::new(),
            progress: CrawlProgress::default(),
            iter_stats: IterationStats::default(),
            fetches_since_checkpoint: 0,
            in_flight: HashMap::new(),
            self_pause: false,
        };

        let join = tokio::spawn(run.run());
        let mut crawls = self.crawls.lock().await;
        crawls.insert(
            crawl_id,
            CrawlEntry {
                pause_tx,
                cancel_tx,
                shared,
                join: Some(join),
            },
        );
    }
}
