//! In-process publish/subscribe for crawl events
//!
//! One writer per crawl (the executor), any number of subscribers. Delivery
//! is asynchronous with a bounded buffer per subscriber; when a subscriber
//! falls behind, its oldest buffered events are dropped and it observes a
//! synthetic `subscriber_lagged` event instead. The publisher never blocks.
//!
//! Events of a given crawl carry a monotonic `event_id` and are delivered in
//! publish order (modulo drops). The last [`HISTORY_CAPACITY`] events per
//! crawl are retained in a ring buffer for late subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;

use crate::models::CrawlId;

/// Events retained per crawl for late subscribers
pub const HISTORY_CAPACITY: usize = 1000;

/// Default bound of each subscriber's buffer
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 1024;

/// Kind of a crawl event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CrawlStarted,
    StateTransitioned,
    SubstateTransitioned,
    UrlEnqueued,
    UrlFetched,
    UrlFailed,
    DocumentFound,
    DocumentProcessed,
    CheckpointCreated,
    CheckpointRestored,
    IterationStarted,
    IterationCompleted,
    Paused,
    Resumed,
    Cancelled,
    Error,
    /// Synthetic: a subscriber's buffer overflowed and events were dropped
    SubscriberLagged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrawlStarted => "crawl_started",
            Self::StateTransitioned => "state_transitioned",
            Self::SubstateTransitioned => "substate_transitioned",
            Self::UrlEnqueued => "url_enqueued",
            Self::UrlFetched => "url_fetched",
            Self::UrlFailed => "url_failed",
            Self::DocumentFound => "document_found",
            Self::DocumentProcessed => "document_processed",
            Self::CheckpointCreated => "checkpoint_created",
            Self::CheckpointRestored => "checkpoint_restored",
            Self::IterationStarted => "iteration_started",
            Self::IterationCompleted => "iteration_completed",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
            Self::SubscriberLagged => "subscriber_lagged",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single crawl event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlEvent {
    /// Monotonic per crawl, starting at 0
    pub event_id: u64,
    pub crawl_id: CrawlId,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventKind,
    pub data: serde_json::Value,
}

/// Per-crawl topic: broadcast channel, id counter, and history ring
struct CrawlTopic {
    sender: broadcast::Sender<CrawlEvent>,
    next_event_id: AtomicU64,
    history: Mutex<VecDeque<CrawlEvent>>,
}

impl CrawlTopic {
    fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        Self {
            sender,
            next_event_id: AtomicU64::new(0),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }
}

/// Event bus carrying all crawls of a process
///
/// Constructed once at process init and injected into the executor and state
/// machines through [`crate::runtime::Runtime`].
pub struct EventBus {
    topics: RwLock<HashMap<CrawlId, Arc<CrawlTopic>>>,
    subscriber_buffer: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Create a bus with a custom per-subscriber buffer bound
    pub fn with_buffer(subscriber_buffer: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            subscriber_buffer: subscriber_buffer.max(1),
        }
    }

    fn topic(&self, crawl_id: CrawlId) -> Arc<CrawlTopic> {
        if let Some(topic) = self.topics.read().expect("topics lock").get(&crawl_id) {
            return Arc::clone(topic);
        }
        let mut topics = self.topics.write().expect("topics lock");
        Arc::clone(
            topics
                .entry(crawl_id)
                .or_insert_with(|| Arc::new(CrawlTopic::new(self.subscriber_buffer))),
        )
    }

    /// Publish an event for a crawl
    ///
    /// Never blocks. Returns the assigned `event_id`.
    pub fn publish(&self, crawl_id: CrawlId, kind: EventKind, data: serde_json::Value) -> u64 {
        let topic = self.topic(crawl_id);
        let event_id = topic.next_event_id.fetch_add(1, Ordering::Relaxed);
        let event = CrawlEvent {
            event_id,
            crawl_id,
            timestamp: Utc::now(),
            event_type: kind,
            data,
        };

        {
            let mut history = topic.history.lock().expect("history lock");
            if history.len() == HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // A send error only means there is no subscriber right now; the
        // event is still in the history ring.
        let _ = topic.sender.send(event);
        event_id
    }

    /// Subscribe to a crawl's live event stream
    pub fn subscribe(&self, crawl_id: CrawlId) -> EventSubscriber {
        let topic = self.topic(crawl_id);
        EventSubscriber {
            crawl_id,
            receiver: topic.sender.subscribe(),
        }
    }

    /// Snapshot of the retained history for a crawl, oldest first
    pub fn history(&self, crawl_id: CrawlId) -> Vec<CrawlEvent> {
        let topic = self.topic(crawl_id);
        let history = topic.history.lock().expect("history lock");
        history.iter().cloned().collect()
    }

    /// History snapshot plus a live subscription taken atomically enough for
    /// late subscribers: events published after the snapshot arrive on the
    /// subscription (the caller may see an overlap and should dedupe on
    /// `event_id`).
    pub fn subscribe_with_history(&self, crawl_id: CrawlId) -> (Vec<CrawlEvent>, EventSubscriber) {
        let subscriber = self.subscribe(crawl_id);
        let history = self.history(crawl_id);
        (history, subscriber)
    }

    /// Drop a crawl's topic and history
    pub fn forget(&self, crawl_id: CrawlId) {
        self.topics.write().expect("topics lock").remove(&crawl_id);
    }
}

/// A subscriber handle for one crawl's event stream
pub struct EventSubscriber {
    crawl_id: CrawlId,
    receiver: broadcast::Receiver<CrawlEvent>,
}

impl EventSubscriber {
    /// Receive the next event
    ///
    /// When this subscriber lagged and events were dropped, a synthetic
    /// `subscriber_lagged` event reporting the drop count is returned in
    /// their place; the stream then continues with the oldest retained
    /// event. Returns `None` once the publisher is gone and the buffer is
    /// drained.
    pub async fn recv(&mut self) -> Option<CrawlEvent> {
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => Some(CrawlEvent {
                event_id: 0,
                crawl_id: self.crawl_id,
                timestamp: Utc::now(),
                event_type: EventKind::SubscriberLagged,
                data: serde_json::json!({ "missed": missed }),
            }),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-blocking receive; `None` when no event is buffered
    pub fn try_recv(&mut self) -> Option<CrawlEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => Some(CrawlEvent {
                event_id: 0,
                crawl_id: self.crawl_id,
                timestamp: Utc::now(),
                event_type: EventKind::SubscriberLagged,
                data: serde_json::json!({ "missed": missed }),
            }),
            Err(_) => None,
        }
    }
}
