//! Availability breaker for the cache backend.
//!
//! A single failure opens the breaker for the full cool-down window. There is
//! no half-open state: once the window has elapsed the failure timestamp is
//! cleared and the next operation decides by succeeding or failing again.

use std::sync::{Arc, Mutex};

use metrics::counter;
use tracing::{info, warn};

use crate::util::lock::mutex_lock;

use super::clock::Clock;

const SOURCE: &str = "cache::breaker";
const METRIC_BREAKER_OPEN: &str = "catalogcache_breaker_open_total";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BreakerState {
    last_failure: Option<i64>,
}

/// Gate consulted before every backend operation.
#[derive(Debug)]
pub struct AvailabilityBreaker {
    configured: bool,
    cool_down: i64,
    state: Mutex<BreakerState>,
    clock: Arc<dyn Clock>,
}

impl AvailabilityBreaker {
    /// Create a closed breaker. `configured = false` means no backend exists
    /// and the breaker never lets anything through.
    pub fn new(configured: bool, cool_down_secs: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            configured,
            cool_down: cool_down_secs,
            state: Mutex::new(BreakerState::default()),
            clock,
        }
    }

    /// Whether the backend may be used right now.
    pub fn available(&self) -> bool {
        if !self.configured {
            return false;
        }

        let now = self.clock.now();
        let mut state = mutex_lock(&self.state, SOURCE, "available");
        match state.last_failure {
            Some(failed_at) if now.saturating_sub(failed_at) < self.cool_down => false,
            Some(failed_at) => {
                state.last_failure = None;
                info!(failed_at, now, "Cache backend retry window elapsed");
                true
            }
            None => true,
        }
    }

    /// Open the breaker as of the clock's current time.
    pub fn report_failure(&self) {
        self.report_failure_at(self.clock.now());
    }

    /// Open the breaker as of `now`.
    pub fn report_failure_at(&self, now: i64) {
        if !self.configured {
            return;
        }

        mutex_lock(&self.state, SOURCE, "report_failure").last_failure = Some(now);
        counter!(METRIC_BREAKER_OPEN).increment(1);
        warn!(
            failed_at = now,
            cool_down_secs = self.cool_down,
            "Cache backend marked unavailable"
        );
    }

    /// Timestamp of the failure holding the breaker open, if any.
    pub fn last_failure(&self) -> Option<i64> {
        mutex_lock(&self.state, SOURCE, "last_failure").last_failure
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
