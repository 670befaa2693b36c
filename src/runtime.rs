//! Process-wide collaborators, explicitly constructed and injected
//!
//! There are no global singletons: the event bus, metrics collector, and
//! clock are built once at process init and handed to the executor as one
//! [`Runtime`] value.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::events::EventBus;
use crate::metrics::MetricsCollector;

/// Time source; swapped for a fixed clock in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The three collaborators every crawl shares
#[derive(Clone)]
pub struct Runtime {
    pub bus: Arc<EventBus>,
    pub metrics: Arc<MetricsCollector>,
    pub clock: Arc<dyn Clock>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            bus: Arc::new(EventBus::new()),
            metrics: Arc::new(MetricsCollector::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock (tests)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
