//! Crawl lifecycle state machine
//!
//! Top-level states form a pipeline `Queued → Initializing → Crawling →
//! Extracting → Processing → Completed`, with `Paused` reachable from and
//! back to every non-terminal state, and `Failed`/`Cancelled` reachable from
//! every non-terminal state. Transitions outside this graph are rejected
//! with [`StateError::IllegalTransition`]; history is append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::events::{EventBus, EventKind};
use crate::models::CrawlId;

/// Top-level crawl state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlState {
    Queued,
    Initializing,
    Crawling,
    Extracting,
    Processing,
    Completed,
    Paused,
    Failed,
    Cancelled,
}

impl CrawlState {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Initializing => "initializing",
            Self::Crawling => "crawling",
            Self::Extracting => "extracting",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Paused => "paused",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// The next state in the forward pipeline, if any
    pub fn pipeline_successor(&self) -> Option<CrawlState> {
        match self {
            Self::Queued => Some(Self::Initializing),
            Self::Initializing => Some(Self::Crawling),
            Self::Crawling => Some(Self::Extracting),
            Self::Extracting => Some(Self::Processing),
            Self::Processing => Some(Self::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for CrawlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Substate within `Crawling`, `Extracting`, or `Processing`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlSubstate {
    // Crawling
    Discovering,
    DownloadingPages,
    DownloadingDocs,
    // Extracting
    TextExtraction,
    TableDetection,
    Ocr,
    // Processing
    Metadata,
    QualityScoring,
    Deduplication,
    Export,
}

impl CrawlSubstate {
    /// The top-level state this substate belongs to
    pub fn parent_state(&self) -> CrawlState {
        match self {
            Self::Discovering | Self::DownloadingPages | Self::DownloadingDocs => {
                CrawlState::Crawling
            }
            Self::TextExtraction | Self::TableDetection | Self::Ocr => CrawlState::Extracting,
            Self::Metadata | Self::QualityScoring | Self::Deduplication | Self::Export => {
                CrawlState::Processing
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovering => "discovering",
            Self::DownloadingPages => "downloading_pages",
            Self::DownloadingDocs => "downloading_docs",
            Self::TextExtraction => "text_extraction",
            Self::TableDetection => "table_detection",
            Self::Ocr => "ocr",
            Self::Metadata => "metadata",
            Self::QualityScoring => "quality_scoring",
            Self::Deduplication => "deduplication",
            Self::Export => "export",
        }
    }
}

impl std::fmt::Display for CrawlSubstate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State machine violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The requested edge is not in the transition graph
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: CrawlState, to: CrawlState },

    /// The substate does not belong to the current top-level state
    #[error("substate {substate} is not valid in state {state}")]
    IllegalSubstate {
        state: CrawlState,
        substate: CrawlSubstate,
    },

    /// Resume was requested but no pre-pause state was captured
    #[error("no captured state to resume to")]
    NothingToResume,
}

/// One recorded transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: CrawlState,
    pub to: CrawlState,
    pub at: DateTime<Utc>,
    /// Time spent in `from` before this transition
    pub duration_in_from: Duration,
}

/// Check whether the edge `from -> to` is in the transition graph
pub fn can_transition(from: CrawlState, to: CrawlState) -> bool {
    if from.is_terminal() || from == to {
        return false;
    }
    match to {
        // Any non-terminal state may fail or be cancelled
        CrawlState::Failed | CrawlState::Cancelled => true,
        // Any non-terminal state may pause
        CrawlState::Paused => true,
        // Resuming from pause may go to any non-terminal state; the machine
        // itself restricts this further to the captured state
        _ if from == CrawlState::Paused => !to.is_terminal(),
        // Forward pipeline edges
        _ => from.pipeline_successor() == Some(to),
    }
}

/// The state machine for one crawl
///
/// Owns the current state, the pause capture, and the append-only history.
/// Every accepted transition publishes a `state_transitioned` event on the
/// injected bus.
pub struct StateMachine {
    crawl_id: CrawlId,
    bus: Arc<EventBus>,
    current: CrawlState,
    substate: Option<CrawlSubstate>,
    /// State and substate captured by the last pause
    paused_from: Option<(CrawlState, Option<CrawlSubstate>)>,
    entered_at: DateTime<Utc>,
    history: Vec<TransitionRecord>,
}

impl StateMachine {
    /// Create a machine in `Queued`
    pub fn new(crawl_id: CrawlId, bus: Arc<EventBus>) -> Self {
        Self {
            crawl_id,
            bus,
            current: CrawlState::Queued,
            substate: None,
            paused_from: None,
            entered_at: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Create a machine restored to a checkpointed state
    ///
    /// Used on resume; history starts empty because event history is not
    /// restored across restarts.
    pub fn restored(
        crawl_id: CrawlId,
        bus: Arc<EventBus>,
        state: CrawlState,
        substate: Option<CrawlSubstate>,
    ) -> Self {
        Self {
            crawl_id,
            bus,
            current: state,
            substate,
            paused_from: None,
            entered_at: Utc::now(),
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> CrawlState {
        self.current
    }

    pub fn substate(&self) -> Option<CrawlSubstate> {
        self.substate
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// The state captured by the last pause, if currently paused
    pub fn paused_from(&self) -> Option<CrawlState> {
        self.paused_from.map(|(state, _)| state)
    }

    /// Transition to `to`, rejecting edges outside the graph
    pub fn transition(&mut self, to: CrawlState) -> Result<&TransitionRecord, StateError> {
        if !can_transition(self.current, to) {
            return Err(StateError::IllegalTransition {
                from: self.current,
                to,
            });
        }

        let now = Utc::now();
        let from = self.current;
        let duration_in_from = (now - self.entered_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let record = TransitionRecord {
            from,
            to,
            at: now,
            duration_in_from,
        };

        tracing::debug!(
            crawl_id = %self.crawl_id,
            from = %record.from,
            to = %record.to,
            "State transition"
        );

        self.current = to;
        self.entered_at = now;
        if to != CrawlState::Paused {
            // Substate only survives a pause round-trip
            self.substate = None;
        }
        self.history.push(record);

        self.bus.publish(
            self.crawl_id,
            EventKind::StateTransitioned,
            json!({
                "from": from.as_str(),
                "to": to.as_str(),
            }),
        );

        Ok(self.history.last().expect("just pushed"))
    }

    /// Set the substate within the current top-level state
    pub fn set_substate(&mut self, substate: CrawlSubstate) -> Result<(), StateError> {
        if substate.parent_state() != self.current {
            return Err(StateError::IllegalSubstate {
                state: self.current,
                substate,
            });
        }
        if self.substate == Some(substate) {
            return Ok(());
        }
        self.substate = Some(substate);
        self.bus.publish(
            self.crawl_id,
            EventKind::SubstateTransitioned,
            json!({
                "state": self.current.as_str(),
                "substate": substate.as_str(),
            }),
        );
        Ok(())
    }

    /// Pause, capturing the current state and substate for resume
    pub fn pause(&mut self) -> Result<(), StateError> {
        let captured = (self.current, self.substate);
        self.transition(CrawlState::Paused)?;
        self.paused_from = Some(captured);
        self.substate = captured.1;
        self.bus
            .publish(self.crawl_id, EventKind::Paused, json!({ "from": captured.0.as_str() }));
        Ok(())
    }

    /// Resume to exactly the state captured by the last pause
    pub fn resume(&mut self) -> Result<CrawlState, StateError> {
        let Some((state, substate)) = self.paused_from else {
            return Err(StateError::NothingToResume);
        };
        self.transition(state)?;
        self.substate = substate;
        self.paused_from = None;
        self.bus
            .publish(self.crawl_id, EventKind::Resumed, json!({ "to": state.as_str() }));
        Ok(state)
    }

    /// Cancel the crawl; idempotent and irreversible
    ///
    /// A second cancel is a successful no-op and emits no further events.
    pub fn cancel(&mut self) -> Result<(), StateError> {
        if self.current == CrawlState::Cancelled {
            return Ok(());
        }
        self.transition(CrawlState::Cancelled)?;
        self.bus
            .publish(self.crawl_id, EventKind::Cancelled, json!({}));
        Ok(())
    }
}
