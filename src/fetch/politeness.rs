//! Per-host politeness: minimum delay plus an in-flight cap
//!
//! Two independent constraints per host:
//! - a keyed rate limiter enforcing at least `delay_seconds` between request
//!   starts to the same host, with an added jitter in `[0, delay/2]`;
//! - a semaphore capping concurrent in-flight requests to the host.
//!
//! Workers call [`PolitenessGate::acquire`] before every request and hold the
//! returned permit for the duration of the request.

use governor::{
    clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Jitter, Quota, RateLimiter,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

type HostLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Holds a host's in-flight slot for the duration of one request
pub struct HostPermit {
    _permit: OwnedSemaphorePermit,
}

/// Politeness gate shared by all fetch workers of a crawl
pub struct PolitenessGate {
    /// None when the configured delay is zero
    limiter: Option<HostLimiter>,
    jitter: Duration,
    per_host_cap: usize,
    slots: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl PolitenessGate {
    /// Create a gate with the given per-host delay and in-flight cap
    pub fn new(delay: Duration, per_host_cap: usize) -> Self {
        let limiter = Quota::with_period(delay).map(RateLimiter::keyed);
        Self {
            limiter,
            jitter: delay / 2,
            per_host_cap: per_host_cap.max(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut slots = self.slots.lock().expect("slots lock");
        Arc::clone(
            slots
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_cap))),
        )
    }

    /// Wait for an in-flight slot and for the host's rate window
    pub async fn acquire(&self, host: &str) -> HostPermit {
        let semaphore = self.host_semaphore(host);
        let permit = semaphore
            .acquire_owned()
            .await
            .expect("host semaphore never closed");

        if let Some(limiter) = &self.limiter {
            let key = host.to_string();
            if self.jitter.is_zero() {
                limiter.until_key_ready(&key).await;
            } else {
                limiter
                    .until_key_ready_with_jitter(&key, Jitter::up_to(self.jitter))
                    .await;
            }
        }

        HostPermit { _permit: permit }
    }

    /// Currently available in-flight slots for a host (cap when unseen)
    pub fn available_slots(&self, host: &str) -> usize {
        let slots = self.slots.lock().expect("slots lock");
        slots
            .get(host)
            .map(|s| s.available_permits())
            .unwrap_or(self.per_host_cap)
    }
}
