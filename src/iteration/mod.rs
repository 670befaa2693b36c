//! Iteration store: the iteration graph and its fingerprint sets
//!
//! A crawl is a chain of iterations. Iteration 0 is the baseline; every later
//! iteration points at its direct parent and at the baseline. Fingerprints
//! recorded during an iteration are appended to a per-iteration log, one JSON
//! record per line, so a crash can lose at most the line being written — the
//! torn tail is detected and ignored on load, which makes writes atomic at
//! the fingerprint level. Sealing an iteration freezes its fingerprint set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use uuid::Uuid;

use crate::fingerprint::Fingerprint;
use crate::models::{CrawlId, IterationId};

/// How an iteration treats the parent's fingerprints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationMode {
    /// First crawl of the chain; everything is new
    Baseline,
    /// Skip URLs whose validators or hashes prove them unchanged
    Incremental,
    /// Re-fetch everything, but still compare against the baseline
    Full,
}

impl IterationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Incremental => "incremental",
            Self::Full => "full",
        }
    }

    /// Parse from CLI/user input
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "baseline" => Some(Self::Baseline),
            "incremental" => Some(Self::Incremental),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

impl std::fmt::Display for IterationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counters sealed into an iteration on completion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationStats {
    pub urls_fetched: u64,
    pub urls_unchanged: u64,
    pub urls_failed: u64,
    pub documents_found: u64,
    pub bytes_downloaded: u64,
}

/// One iteration of a crawl
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    pub iteration_id: IterationId,
    pub crawl_id: CrawlId,
    pub iteration_number: u32,
    pub parent_iteration_id: Option<IterationId>,
    pub baseline_iteration_id: Option<IterationId>,
    pub mode: IterationMode,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: IterationStats,
}

impl Iteration {
    /// Whether the iteration has been sealed
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Iteration store violations
#[derive(Error, Debug)]
pub enum IterationError {
    #[error("baseline iteration already exists for crawl {0}")]
    BaselineExists(CrawlId),

    #[error("no baseline iteration exists for crawl {0}")]
    NoBaseline(CrawlId),

    #[error("previous iteration {0} is not completed")]
    PreviousNotCompleted(u32),

    #[error("iteration {0} is sealed; fingerprints can no longer be recorded")]
    Sealed(IterationId),

    #[error("iteration {0} not found")]
    NotFound(IterationId),

    #[error("iteration storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("iteration record is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Deterministic difference between two iterations' fingerprint sets
///
/// URL lists are sorted, and field order is fixed, so serializing the same
/// two inputs always yields byte-identical JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationDiff {
    pub new: Vec<String>,
    pub modified: Vec<String>,
    pub unchanged: Vec<String>,
    pub deleted: Vec<String>,
    pub summary: DiffSummary,
}

/// Count summary of an [`IterationDiff`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub new: usize,
    pub modified: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

struct StoreInner {
    /// Iterations per crawl, ordered by iteration_number
    by_crawl: HashMap<CrawlId, Vec<Iteration>>,
    by_id: HashMap<IterationId, Iteration>,
    /// Open (unsealed) fingerprint sets, write-through to the log file
    open_fingerprints: HashMap<IterationId, HashMap<String, Fingerprint>>,
    /// Lazily loaded snapshots of sealed fingerprint sets
    sealed_cache: HashMap<IterationId, Arc<HashMap<String, Fingerprint>>>,
}

/// Filesystem-backed store for iterations and their fingerprint sets
///
/// Layout under the root directory:
/// `iterations/<iteration_id>/meta.json` and
/// `iterations/<iteration_id>/fingerprints.jsonl`.
pub struct IterationStore {
    root: PathBuf,
    inner: RwLock<StoreInner>,
}

impl IterationStore {
    /// Open a store rooted at `root`, scanning any existing iterations
    pub fn open(root: &Path) -> Result<Self, IterationError> {
        let iterations_dir = root.join("iterations");
        fs::create_dir_all(&iterations_dir)?;

        let mut by_crawl: HashMap<CrawlId, Vec<Iteration>> = HashMap::new();
        let mut by_id = HashMap::new();

        for entry in fs::read_dir(&iterations_dir)? {
            let meta_path = entry?.path().join("meta.json");
            if !meta_path.exists() {
                continue;
            }
            let content = fs::read_to_string(&meta_path)?;
            match serde_json::from_str::<Iteration>(&content) {
                Ok(iteration) => {
                    by_crawl
                        .entry(iteration.crawl_id)
                        .or_default()
                        .push(iteration.clone());
                    by_id.insert(iteration.iteration_id, iteration);
                }
                Err(e) => {
                    tracing::warn!(path = %meta_path.display(), error = %e, "Skipping unreadable iteration metadata");
                }
            }
        }
        for iterations in by_crawl.values_mut() {
            iterations.sort_by_key(|i| i.iteration_number);
        }

        Ok(Self {
            root: root.to_path_buf(),
            inner: RwLock::new(StoreInner {
                by_crawl,
                by_id,
                open_fingerprints: HashMap::new(),
                sealed_cache: HashMap::new(),
            }),
        })
    }

    fn iteration_dir(&self, iteration_id: IterationId) -> PathBuf {
        self.root.join("iterations").join(iteration_id.to_string())
    }

    fn fingerprint_log_path(&self, iteration_id: IterationId) -> PathBuf {
        self.iteration_dir(iteration_id).join("fingerprints.jsonl")
    }

    /// Write iteration metadata atomically (temp file + rename)
    fn persist_meta(&self, iteration: &Iteration) -> Result<(), IterationError> {
        let dir = self.iteration_dir(iteration.iteration_id);
        fs::create_dir_all(&dir)?;
        let path = dir.join("meta.json");
        let temp_path = dir.join("meta.json.tmp");
        fs::write(&temp_path, serde_json::to_vec_pretty(iteration)?)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// Create iteration 0 of a crawl; fails if a baseline already exists
    pub fn create_baseline(&self, crawl_id: CrawlId) -> Result<Iteration, IterationError> {
        let mut inner = self.inner.write().expect("store lock");
        if inner
            .by_crawl
            .get(&crawl_id)
            .is_some_and(|iters| !iters.is_empty())
        {
            return Err(IterationError::BaselineExists(crawl_id));
        }

        let iteration = Iteration {
            iteration_id: Uuid::new_v4(),
            crawl_id,
            iteration_number: 0,
            parent_iteration_id: None,
            baseline_iteration_id: None,
            mode: IterationMode::Baseline,
            started_at: Utc::now(),
            completed_at: None,
            stats: IterationStats::default(),
        };
        self.persist_meta(&iteration)?;

        inner
            .by_crawl
            .entry(crawl_id)
            .or_default()
            .push(iteration.clone());
        inner.by_id.insert(iteration.iteration_id, iteration.clone());
        inner
            .open_fingerprints
            .insert(iteration.iteration_id, HashMap::new());

        tracing::info!(crawl_id = %crawl_id, iteration_id = %iteration.iteration_id, "Baseline iteration created");
        Ok(iteration)
    }

    /// Create iteration N+1; the parent is the previous iteration
    ///
    /// Fails when the previous iteration is not completed, unless `mode` is
    /// `Full` and `allow_fork_from_incomplete` permits forking.
    pub fn create_child(
        &self,
        crawl_id: CrawlId,
        mode: IterationMode,
        allow_fork_from_incomplete: bool,
    ) -> Result<Iteration, IterationError> {
        let mut inner = self.inner.write().expect("store lock");
        let chain = inner
            .by_crawl
            .get(&crawl_id)
            .filter(|iters| !iters.is_empty())
            .ok_or(IterationError::NoBaseline(crawl_id))?;

        let previous = chain.last().expect("non-empty chain");
        if !previous.is_completed()
            && !(mode == IterationMode::Full && allow_fork_from_incomplete)
        {
            return Err(IterationError::PreviousNotCompleted(
                previous.iteration_number,
            ));
        }

        let baseline = &chain[0];
        let iteration = Iteration {
            iteration_id: Uuid::new_v4(),
            crawl_id,
            iteration_number: previous.iteration_number + 1,
            parent_iteration_id: Some(previous.iteration_id),
            baseline_iteration_id: Some(baseline.iteration_id),
            mode,
            started_at: Utc::now(),
            completed_at: None,
            stats: IterationStats::default(),
        };
        self.persist_meta(&iteration)?;

        inner
            .by_crawl
            .entry(crawl_id)
            .or_default()
            .push(iteration.clone());
        inner.by_id.insert(iteration.iteration_id, iteration.clone());
        inner
            .open_fingerprints
            .insert(iteration.iteration_id, HashMap::new());

        tracing::info!(
            crawl_id = %crawl_id,
            iteration_id = %iteration.iteration_id,
            number = iteration.iteration_number,
            mode = %mode,
            "Child iteration created"
        );
        Ok(iteration)
    }

    /// Fetch an iteration by id
    pub fn get(&self, iteration_id: IterationId) -> Result<Iteration, IterationError> {
        self.inner
            .read()
            .expect("store lock")
            .by_id
            .get(&iteration_id)
            .cloned()
            .ok_or(IterationError::NotFound(iteration_id))
    }

    /// All iterations of a crawl, ordered by iteration number
    pub fn iterations_for(&self, crawl_id: CrawlId) -> Vec<Iteration> {
        self.inner
            .read()
            .expect("store lock")
            .by_crawl
            .get(&crawl_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The most recent iteration of a crawl
    pub fn latest(&self, crawl_id: CrawlId) -> Option<Iteration> {
        self.inner
            .read()
            .expect("store lock")
            .by_crawl
            .get(&crawl_id)
            .and_then(|iters| iters.last().cloned())
    }

    /// Record a fingerprint for an open iteration
    ///
    /// Idempotent on `(iteration_id, url)`: recording an identical
    /// fingerprint again is a no-op; a different fingerprint for the same URL
    /// replaces the previous one (last write wins within the iteration).
    pub fn record_fingerprint(
        &self,
        iteration_id: IterationId,
        fingerprint: Fingerprint,
    ) -> Result<(), IterationError> {
        let mut inner = self.inner.write().expect("store lock");
        let iteration = inner
            .by_id
            .get(&iteration_id)
            .ok_or(IterationError::NotFound(iteration_id))?;
        if iteration.is_completed() {
            return Err(IterationError::Sealed(iteration_id));
        }

        // An open iteration seen for the first time after a restart is
        // hydrated from its log so idempotency still holds
        if !inner.open_fingerprints.contains_key(&iteration_id) {
            let existing = self.load_fingerprint_log(iteration_id)?;
            inner.open_fingerprints.insert(iteration_id, existing);
        }
        let set = inner
            .open_fingerprints
            .get_mut(&iteration_id)
            .expect("just inserted");
        if set.get(&fingerprint.url) == Some(&fingerprint) {
            return Ok(());
        }

        // One record per line; a torn tail from a crash is skipped on load
        let mut line = serde_json::to_vec(&fingerprint)?;
        line.push(b'\n');
        let path = self.fingerprint_log_path(iteration_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&line)?;

        set.insert(fingerprint.url.clone(), fingerprint);
        Ok(())
    }

    /// Read-only snapshot of an iteration's fingerprint set
    ///
    /// Open iterations return the current in-memory set; sealed iterations
    /// are loaded lazily from the log and cached.
    pub fn get_fingerprints(
        &self,
        iteration_id: IterationId,
    ) -> Result<Arc<HashMap<String, Fingerprint>>, IterationError> {
        let completed = {
            let inner = self.inner.read().expect("store lock");
            let iteration = inner
                .by_id
                .get(&iteration_id)
                .ok_or(IterationError::NotFound(iteration_id))?;
            if let Some(set) = inner.open_fingerprints.get(&iteration_id) {
                return Ok(Arc::new(set.clone()));
            }
            if let Some(cached) = inner.sealed_cache.get(&iteration_id) {
                return Ok(Arc::clone(cached));
            }
            iteration.is_completed()
        };

        let loaded = self.load_fingerprint_log(iteration_id)?;
        let mut inner = self.inner.write().expect("store lock");
        if completed {
            let loaded = Arc::new(loaded);
            inner
                .sealed_cache
                .insert(iteration_id, Arc::clone(&loaded));
            Ok(loaded)
        } else {
            // Open iteration reopened after a restart: it stays mutable
            let set = inner
                .open_fingerprints
                .entry(iteration_id)
                .or_insert(loaded);
            Ok(Arc::new(set.clone()))
        }
    }

    /// Replay the append-only fingerprint log; later lines win
    fn load_fingerprint_log(
        &self,
        iteration_id: IterationId,
    ) -> Result<HashMap<String, Fingerprint>, IterationError> {
        let path = self.fingerprint_log_path(iteration_id);
        let mut set = HashMap::new();
        if !path.exists() {
            return Ok(set);
        }

        let content = fs::read_to_string(&path)?;
        let line_count = content.lines().count();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Fingerprint>(line) {
                Ok(fp) => {
                    set.insert(fp.url.clone(), fp);
                }
                Err(e) if idx + 1 == line_count => {
                    // Torn tail from an interrupted append
                    tracing::warn!(
                        iteration_id = %iteration_id,
                        error = %e,
                        "Ignoring torn trailing fingerprint record"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        iteration_id = %iteration_id,
                        line = idx + 1,
                        error = %e,
                        "Skipping malformed fingerprint record"
                    );
                }
            }
        }
        Ok(set)
    }

    /// Seal an iteration with its final stats
    ///
    /// After sealing, `record_fingerprint` fails with [`IterationError::Sealed`].
    pub fn complete(
        &self,
        iteration_id: IterationId,
        stats: IterationStats,
    ) -> Result<Iteration, IterationError> {
        let mut inner = self.inner.write().expect("store lock");
        let iteration = inner
            .by_id
            .get_mut(&iteration_id)
            .ok_or(IterationError::NotFound(iteration_id))?;
        if iteration.is_completed() {
            return Err(IterationError::Sealed(iteration_id));
        }

        iteration.completed_at = Some(Utc::now());
        iteration.stats = stats;
        let sealed = iteration.clone();

        // Move the open set into the sealed cache
        if let Some(set) = inner.open_fingerprints.remove(&iteration_id) {
            inner.sealed_cache.insert(iteration_id, Arc::new(set));
        }
        if let Some(chain) = inner.by_crawl.get_mut(&sealed.crawl_id) {
            if let Some(slot) = chain
                .iter_mut()
                .find(|i| i.iteration_id == iteration_id)
            {
                *slot = sealed.clone();
            }
        }
        drop(inner);

        self.persist_meta(&sealed)?;
        tracing::info!(iteration_id = %iteration_id, "Iteration sealed");
        Ok(sealed)
    }

    /// Compare two iterations' fingerprint sets
    ///
    /// URLs are visited in sorted order so the result (and its JSON form) is
    /// deterministic for identical inputs.
    pub fn compare(
        &self,
        a: IterationId,
        b: IterationId,
    ) -> Result<IterationDiff, IterationError> {
        let set_a = self.get_fingerprints(a)?;
        let set_b = self.get_fingerprints(b)?;

        let mut urls: Vec<&String> = set_a.keys().chain(set_b.keys()).collect();
        urls.sort();
        urls.dedup();

        let mut diff = IterationDiff {
            new: Vec::new(),
            modified: Vec::new(),
            unchanged: Vec::new(),
            deleted: Vec::new(),
            summary: DiffSummary {
                new: 0,
                modified: 0,
                unchanged: 0,
                deleted: 0,
            },
        };

        for url in urls {
            match (set_a.get(url), set_b.get(url)) {
                (None, Some(_)) => diff.new.push(url.clone()),
                (Some(_), None) => diff.deleted.push(url.clone()),
                (Some(fa), Some(fb)) if fa.content_hash == fb.content_hash => {
                    diff.unchanged.push(url.clone())
                }
                (Some(_), Some(_)) => diff.modified.push(url.clone()),
                (None, None) => unreachable!("url came from one of the sets"),
            }
        }

        diff.summary = DiffSummary {
            new: diff.new.len(),
            modified: diff.modified.len(),
            unchanged: diff.unchanged.len(),
            deleted: diff.deleted.len(),
        };
        Ok(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn fp(url: &str, body: &[u8]) -> Fingerprint {
        Fingerprint::from_body(url, body, None, None)
    }

    #[test]
    fn test_create_baseline_once() {
        let dir = TempDir::new().unwrap();
        let store = IterationStore::open(dir.path()).unwrap();
        let crawl_id = Uuid::new_v4();

        let baseline = store.create_baseline(crawl_id).unwrap();
        assert_eq!(baseline.iteration_number, 0);
        assert_eq!(baseline.mode, IterationMode::Baseline);
        assert!(baseline.parent_iteration_id.is_none());

        assert!(matches!(
            store.create_baseline(crawl_id),
            Err(IterationError::BaselineExists(_))
        ));
    }

    #[test]
    fn test_child_requires_completed_parent() {
        let dir = TempDir::new().unwrap();
        let store = IterationStore::open(dir.path()).unwrap();
        let crawl_id = Uuid::new_v4();
        store.create_baseline(crawl_id).unwrap();

        let err = store
            .create_child(crawl_id, IterationMode::Incremental, false)
            .unwrap_err();
        assert!(matches!(err, IterationError::PreviousNotCompleted(0)));

        // Full mode with fork policy may proceed
        let forked = store
            .create_child(crawl_id, IterationMode::Full, true)
            .unwrap();
        assert_eq!(forked.iteration_number, 1);
    }

    #[test]
    fn test_chain_pointers() {
        let dir = TempDir::new().unwrap();
        let store = IterationStore::open(dir.path()).unwrap();
        let crawl_id = Uuid::new_v4();

        let baseline = store.create_baseline(crawl_id).unwrap();
        store
            .complete(baseline.iteration_id, IterationStats::default())
            .unwrap();
        let first = store
            .create_child(crawl_id, IterationMode::Incremental, false)
            .unwrap();
        store
            .complete(first.iteration_id, IterationStats::default())
            .unwrap();
        let second = store
            .create_child(crawl_id, IterationMode::Incremental, false)
            .unwrap();

        assert_eq!(second.iteration_number, 2);
        assert_eq!(second.parent_iteration_id, Some(first.iteration_id));
        assert_eq!(second.baseline_iteration_id, Some(baseline.iteration_id));
        assert_eq!(first.baseline_iteration_id, Some(baseline.iteration_id));
    }

    #[test]
    fn test_record_fingerprint_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = IterationStore::open(dir.path()).unwrap();
        let crawl_id = Uuid::new_v4();
        let baseline = store.create_baseline(crawl_id).unwrap();

        let fingerprint = fp("https://e.com/a", b"body");
        store
            .record_fingerprint(baseline.iteration_id, fingerprint.clone())
            .unwrap();
        store
            .record_fingerprint(baseline.iteration_id, fingerprint.clone())
            .unwrap();

        let set = store.get_fingerprints(baseline.iteration_id).unwrap();
        assert_eq!(set.len(), 1);

        // Identical rewrite did not grow the log
        let log = std::fs::read_to_string(
            dir.path()
                .join("iterations")
                .join(baseline.iteration_id.to_string())
                .join("fingerprints.jsonl"),
        )
        .unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    #[test]
    fn test_last_write_wins_within_iteration() {
        let dir = TempDir::new().unwrap();
        let store = IterationStore::open(dir.path()).unwrap();
        let crawl_id = Uuid::new_v4();
        let baseline = store.create_baseline(crawl_id).unwrap();

        store
            .record_fingerprint(baseline.iteration_id, fp("https://e.com/a", b"v1"))
            .unwrap();
        let second = fp("https://e.com/a", b"v2");
        store
            .record_fingerprint(baseline.iteration_id, second.clone())
            .unwrap();

        let set = store.get_fingerprints(baseline.iteration_id).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.get("https://e.com/a").unwrap().content_hash,
            second.content_hash
        );
    }

    #[test]
    fn test_sealed_iteration_rejects_fingerprints() {
        let dir = TempDir::new().unwrap();
        let store = IterationStore::open(dir.path()).unwrap();
        let crawl_id = Uuid::new_v4();
        let baseline = store.create_baseline(crawl_id).unwrap();

        store
            .complete(baseline.iteration_id, IterationStats::default())
            .unwrap();
        let err = store
            .record_fingerprint(baseline.iteration_id, fp("https://e.com/a", b"x"))
            .unwrap_err();
        assert!(matches!(err, IterationError::Sealed(_)));
    }

    #[test]
    fn test_fingerprints_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let crawl_id = Uuid::new_v4();
        let iteration_id;
        {
            let store = IterationStore::open(dir.path()).unwrap();
            let baseline = store.create_baseline(crawl_id).unwrap();
            iteration_id = baseline.iteration_id;
            store
                .record_fingerprint(iteration_id, fp("https://e.com/a", b"a"))
                .unwrap();
            store
                .record_fingerprint(iteration_id, fp("https://e.com/b", b"b"))
                .unwrap();
            store
                .complete(iteration_id, IterationStats::default())
                .unwrap();
        }

        let store = IterationStore::open(dir.path()).unwrap();
        let iteration = store.get(iteration_id).unwrap();
        assert!(iteration.is_completed());
        let set = store.get_fingerprints(iteration_id).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let dir = TempDir::new().unwrap();
        let crawl_id = Uuid::new_v4();
        let iteration_id;
        {
            let store = IterationStore::open(dir.path()).unwrap();
            let baseline = store.create_baseline(crawl_id).unwrap();
            iteration_id = baseline.iteration_id;
            store
                .record_fingerprint(iteration_id, fp("https://e.com/a", b"a"))
                .unwrap();
            store
                .complete(iteration_id, IterationStats::default())
                .unwrap();
        }

        // Simulate a crash mid-append
        let log_path = dir
            .path()
            .join("iterations")
            .join(iteration_id.to_string())
            .join("fingerprints.jsonl");
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        file.write_all(b"{\"url\":\"https://e.com/torn\",\"conte").unwrap();
        drop(file);

        let store = IterationStore::open(dir.path()).unwrap();
        let set = store.get_fingerprints(iteration_id).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains_key("https://e.com/a"));
    }

    #[test]
    fn test_compare_classifies_and_sorts() {
        let dir = TempDir::new().unwrap();
        let store = IterationStore::open(dir.path()).unwrap();
        let crawl_id = Uuid::new_v4();

        let baseline = store.create_baseline(crawl_id).unwrap();
        store
            .record_fingerprint(baseline.iteration_id, fp("https://e.com/a", b"a0"))
            .unwrap();
        store
            .record_fingerprint(baseline.iteration_id, fp("https://e.com/b", b"b0"))
            .unwrap();
        store
            .record_fingerprint(baseline.iteration_id, fp("https://e.com/gone", b"g0"))
            .unwrap();
        store
            .complete(baseline.iteration_id, IterationStats::default())
            .unwrap();

        let next = store
            .create_child(crawl_id, IterationMode::Incremental, false)
            .unwrap();
        store
            .record_fingerprint(next.iteration_id, fp("https://e.com/a", b"a0"))
            .unwrap();
        store
            .record_fingerprint(next.iteration_id, fp("https://e.com/b", b"b1"))
            .unwrap();
        store
            .record_fingerprint(next.iteration_id, fp("https://e.com/new", b"n0"))
            .unwrap();
        store
            .complete(next.iteration_id, IterationStats::default())
            .unwrap();

        let diff = store
            .compare(baseline.iteration_id, next.iteration_id)
            .unwrap();
        assert_eq!(diff.unchanged, vec!["https://e.com/a"]);
        assert_eq!(diff.modified, vec!["https://e.com/b"]);
        assert_eq!(diff.new, vec!["https://e.com/new"]);
        assert_eq!(diff.deleted, vec!["https://e.com/gone"]);
        assert_eq!(
            diff.summary,
            DiffSummary {
                new: 1,
                modified: 1,
                unchanged: 1,
                deleted: 1
            }
        );
    }

    #[test]
    fn test_compare_deterministic_json() {
        let dir = TempDir::new().unwrap();
        let store = IterationStore::open(dir.path()).unwrap();
        let crawl_id = Uuid::new_v4();

        let baseline = store.create_baseline(crawl_id).unwrap();
        for i in 0..20 {
            store
                .record_fingerprint(
                    baseline.iteration_id,
                    fp(&format!("https://e.com/{i}"), format!("body{i}").as_bytes()),
                )
                .unwrap();
        }
        store
            .complete(baseline.iteration_id, IterationStats::default())
            .unwrap();
        let next = store
            .create_child(crawl_id, IterationMode::Full, false)
            .unwrap();
        for i in 5..25 {
            store
                .record_fingerprint(
                    next.iteration_id,
                    fp(&format!("https://e.com/{i}"), format!("body{i}x").as_bytes()),
                )
                .unwrap();
        }
        store
            .complete(next.iteration_id, IterationStats::default())
            .unwrap();

        let first = serde_json::to_string(
            &store
                .compare(baseline.iteration_id, next.iteration_id)
                .unwrap(),
        )
        .unwrap();
        let second = serde_json::to_string(
            &store
                .compare(baseline.iteration_id, next.iteration_id)
                .unwrap(),
        )
        .unwrap();
        assert_eq!(first, second);
    }
}
