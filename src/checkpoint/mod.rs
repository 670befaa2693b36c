//! Durable checkpoints for resumable crawling
//!
//! A checkpoint is a self-contained, compressed snapshot of the executor
//! state for one crawl, written under a monotonically increasing sequence
//! number. Each snapshot has an uncompressed metadata sidecar carrying the
//! SHA-256 checksum of the compressed payload; a snapshot whose checksum does
//! not verify is never silently treated as missing — it is skipped with a
//! warning by [`CheckpointStore::latest`] and rejected with
//! [`CheckpointError::Corrupt`] by [`CheckpointStore::restore`].
//!
//! Writes go to a temp file first and are renamed into place, so a partial
//! file is never observed as a valid checkpoint.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::config::CrawlConfig;
use crate::fingerprint::content_hash;
use crate::metrics::MetricsSample;
use crate::models::{CheckpointId, CrawlId, CrawlProgress, Document, FailureRecord, IterationId, UrlRecord};
use crate::state::{CrawlState, CrawlSubstate};

/// Version of the checkpoint payload schema
pub const SCHEMA_VERSION: u32 = 1;

/// Why a checkpoint was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    /// Scheduled checkpoint every `checkpoint_every_n` fetches
    Auto,
    /// Explicitly requested by the operator
    Manual,
    /// Written when the crawl pauses
    Pause,
    /// Written while transitioning to `Failed`
    Error,
}

impl CheckpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Pause => "pause",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The authoritative executor state captured by a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateBundle {
    pub state: CrawlState,
    pub substate: Option<CrawlSubstate>,

    /// Queued URLs in frontier order
    pub frontier: Vec<UrlRecord>,

    pub visited: BTreeSet<String>,
    pub failed: BTreeMap<String, FailureRecord>,
    pub completed_documents: Vec<Document>,
    pub progress: CrawlProgress,

    /// Last metric samples at checkpoint time
    pub metrics: Vec<MetricsSample>,

    pub config: CrawlConfig,
    pub current_iteration_id: Option<IterationId>,
    pub baseline_iteration_id: Option<IterationId>,
}

/// A checkpoint: identity plus the captured state bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: CheckpointId,
    pub crawl_id: CrawlId,
    pub sequence_number: u64,
    pub kind: CheckpointKind,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
    pub bundle: StateBundle,
}

/// Uncompressed sidecar describing a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub checkpoint_id: CheckpointId,
    pub crawl_id: CrawlId,
    pub sequence_number: u64,
    pub kind: CheckpointKind,
    pub created_at: DateTime<Utc>,
    pub state: CrawlState,
    pub schema_version: u32,
    /// SHA-256 hex of the compressed payload
    pub checksum: String,
}

/// Checkpoint store errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// The snapshot payload does not match its recorded checksum
    #[error("checkpoint {sequence_number} is corrupt: {detail}")]
    Corrupt { sequence_number: u64, detail: String },

    /// The payload was written by an unknown schema version
    #[error("checkpoint schema version {found} is not supported (expected {SCHEMA_VERSION})")]
    SchemaMismatch { found: u32 },

    /// A checkpoint written in a terminal state cannot be resumed
    #[error("checkpoint captured terminal state {0}; not resumable")]
    Terminal(CrawlState),

    #[error("checkpoint not found: {0}")]
    NotFound(String),

    #[error("checkpoint storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint payload is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CheckpointError {
    /// A corrupt snapshot is recoverable by falling back to an older one
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

/// Filesystem-backed checkpoint store
///
/// Layout: `checkpoints/<crawl_id>/cp_<seq>.snapshot.gz` plus
/// `cp_<seq>.meta.json`. One store instance serializes writes per crawl via
/// an internal lock; reads may run concurrently.
pub struct CheckpointStore {
    root: PathBuf,
    /// Next sequence number per crawl, initialized from a directory scan
    sequences: RwLock<HashMap<CrawlId, u64>>,
}

impl CheckpointStore {
    pub fn open(root: &Path) -> Result<Self, CheckpointError> {
        fs::create_dir_all(root.join("checkpoints"))?;
        Ok(Self {
            root: root.to_path_buf(),
            sequences: RwLock::new(HashMap::new()),
        })
    }

    fn crawl_dir(&self, crawl_id: CrawlId) -> PathBuf {
        self.root.join("checkpoints").join(crawl_id.to_string())
    }

    fn snapshot_path(&self, crawl_id: CrawlId, seq: u64) -> PathBuf {
        self.crawl_dir(crawl_id).join(format!("cp_{seq:06}.snapshot.gz"))
    }

    fn meta_path(&self, crawl_id: CrawlId, seq: u64) -> PathBuf {
        self.crawl_dir(crawl_id).join(format!("cp_{seq:06}.meta.json"))
    }

    fn next_sequence(&self, crawl_id: CrawlId) -> Result<u64, CheckpointError> {
        {
            let mut sequences = self.sequences.write().expect("sequence lock");
            if let Some(slot) = sequences.get_mut(&crawl_id) {
                let assigned = *slot;
                *slot += 1;
                return Ok(assigned);
            }
        }

        // First use for this crawl in this process: scan existing sidecars
        let highest = self
            .list(crawl_id)?
            .last()
            .map(|meta| meta.sequence_number + 1)
            .unwrap_or(0);
        let mut sequences = self.sequences.write().expect("sequence lock");
        let slot = sequences.entry(crawl_id).or_insert(highest);
        let assigned = *slot;
        *slot += 1;
        Ok(assigned)
    }

    /// Serialize, compress, checksum, and durably write a snapshot
    pub fn snapshot(
        &self,
        crawl_id: CrawlId,
        bundle: StateBundle,
        kind: CheckpointKind,
    ) -> Result<Checkpoint, CheckpointError> {
        let sequence_number = self.next_sequence(crawl_id)?;
        let checkpoint = Checkpoint {
            checkpoint_id: Uuid::new_v4(),
            crawl_id,
            sequence_number,
            kind,
            created_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
            bundle,
        };

        let payload = serde_json::to_vec(&checkpoint)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload)?;
        let compressed = encoder.finish()?;
        let checksum = content_hash(&compressed);

        let dir = self.crawl_dir(crawl_id);
        fs::create_dir_all(&dir)?;

        // Payload first, sidecar second; a checkpoint without a sidecar is
        // invisible, so a crash between the two renames loses the snapshot
        // cleanly instead of exposing a partial one.
        let snapshot_path = self.snapshot_path(crawl_id, sequence_number);
        let temp_snapshot = snapshot_path.with_extension("gz.tmp");
        fs::write(&temp_snapshot, &compressed)?;
        fs::rename(&temp_snapshot, &snapshot_path)?;

        let meta = CheckpointMeta {
            checkpoint_id: checkpoint.checkpoint_id,
            crawl_id,
            sequence_number,
            kind,
            created_at: checkpoint.created_at,
            state: checkpoint.bundle.state,
            schema_version: SCHEMA_VERSION,
            checksum,
        };
        let meta_path = self.meta_path(crawl_id, sequence_number);
        let temp_meta = meta_path.with_extension("json.tmp");
        fs::write(&temp_meta, serde_json::to_vec_pretty(&meta)?)?;
        fs::rename(&temp_meta, &meta_path)?;

        tracing::debug!(
            crawl_id = %crawl_id,
            sequence = sequence_number,
            kind = %kind,
            compressed_bytes = compressed.len(),
            "Checkpoint written"
        );
        Ok(checkpoint)
    }

    /// All sidecars for a crawl, ordered by sequence number
    pub fn list(&self, crawl_id: CrawlId) -> Result<Vec<CheckpointMeta>, CheckpointError> {
        let dir = self.crawl_dir(crawl_id);
        let mut metas = Vec::new();
        if !dir.exists() {
            return Ok(metas);
        }

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".meta.json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(CheckpointError::from)
                .and_then(|c| serde_json::from_str::<CheckpointMeta>(&c).map_err(Into::into))
            {
                Ok(meta) => metas.push(meta),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint sidecar");
                }
            }
        }
        metas.sort_by_key(|m| m.sequence_number);
        Ok(metas)
    }

    /// Load and verify the snapshot a sidecar points to
    fn load_verified(&self, meta: &CheckpointMeta) -> Result<Checkpoint, CheckpointError> {
        let path = self.snapshot_path(meta.crawl_id, meta.sequence_number);
        let mut compressed = Vec::new();
        File::open(&path)
            .map_err(|e| CheckpointError::Corrupt {
                sequence_number: meta.sequence_number,
                detail: format!("snapshot missing: {e}"),
            })?
            .read_to_end(&mut compressed)?;

        let actual = content_hash(&compressed);
        if actual != meta.checksum {
            return Err(CheckpointError::Corrupt {
                sequence_number: meta.sequence_number,
                detail: "checksum mismatch".to_string(),
            });
        }
        if meta.schema_version != SCHEMA_VERSION {
            return Err(CheckpointError::SchemaMismatch {
                found: meta.schema_version,
            });
        }

        let mut payload = Vec::new();
        GzDecoder::new(&compressed[..])
            .read_to_end(&mut payload)
            .map_err(|e| CheckpointError::Corrupt {
                sequence_number: meta.sequence_number,
                detail: format!("decompression failed: {e}"),
            })?;
        let checkpoint: Checkpoint =
            serde_json::from_slice(&payload).map_err(|e| CheckpointError::Corrupt {
                sequence_number: meta.sequence_number,
                detail: format!("payload not valid JSON: {e}"),
            })?;
        Ok(checkpoint)
    }

    /// The highest-sequence checkpoint with an intact payload
    ///
    /// Corrupt snapshots are skipped with a warning, never silently treated
    /// as missing.
    pub fn latest(&self, crawl_id: CrawlId) -> Result<Option<Checkpoint>, CheckpointError> {
        let metas = self.list(crawl_id)?;
        for meta in metas.iter().rev() {
            match self.load_verified(meta) {
                Ok(checkpoint) => return Ok(Some(checkpoint)),
                Err(CheckpointError::Corrupt { sequence_number, detail }) => {
                    tracing::warn!(
                        crawl_id = %crawl_id,
                        sequence = sequence_number,
                        detail = %detail,
                        "Skipping corrupt checkpoint"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// The highest-sequence intact checkpoint whose state is resumable
    pub fn latest_resumable(
        &self,
        crawl_id: CrawlId,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        let metas = self.list(crawl_id)?;
        for meta in metas.iter().rev() {
            if meta.state.is_terminal() {
                continue;
            }
            match self.load_verified(meta) {
                Ok(checkpoint) => return Ok(Some(checkpoint)),
                Err(CheckpointError::Corrupt { sequence_number, detail }) => {
                    tracing::warn!(
                        crawl_id = %crawl_id,
                        sequence = sequence_number,
                        detail = %detail,
                        "Skipping corrupt checkpoint"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Restore a specific checkpoint by id
    ///
    /// Fails with [`CheckpointError::Corrupt`] on checksum mismatch,
    /// [`CheckpointError::SchemaMismatch`] on an unknown schema version, and
    /// [`CheckpointError::Terminal`] when the captured state is terminal.
    pub fn restore(
        &self,
        crawl_id: CrawlId,
        checkpoint_id: CheckpointId,
    ) -> Result<Checkpoint, CheckpointError> {
        let metas = self.list(crawl_id)?;
        let meta = metas
            .iter()
            .find(|m| m.checkpoint_id == checkpoint_id)
            .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.to_string()))?;

        let checkpoint = self.load_verified(meta)?;
        if checkpoint.bundle.state.is_terminal() {
            return Err(CheckpointError::Terminal(checkpoint.bundle.state));
        }
        Ok(checkpoint)
    }

    /// Delete all but the `keep_last_n` most recent checkpoints
    pub fn cleanup(&self, crawl_id: CrawlId, keep_last_n: usize) -> Result<usize, CheckpointError> {
        let metas = self.list(crawl_id)?;
        if metas.len() <= keep_last_n {
            return Ok(0);
        }

        let mut removed = 0;
        let cutoff = metas.len() - keep_last_n;
        for meta in &metas[..cutoff] {
            let snapshot = self.snapshot_path(crawl_id, meta.sequence_number);
            let sidecar = self.meta_path(crawl_id, meta.sequence_number);
            // Sidecar first so a crash mid-cleanup never leaves a sidecar
            // pointing at a deleted payload
            if sidecar.exists() {
                fs::remove_file(&sidecar)?;
            }
            if snapshot.exists() {
                fs::remove_file(&snapshot)?;
            }
            removed += 1;
        }

        tracing::debug!(crawl_id = %crawl_id, removed, "Checkpoint cleanup");
        Ok(removed)
    }
}
