// =============================================================================
// Rate-Limit Tracker: keeps brokerage REST usage under the per-minute caps
// =============================================================================
//
// The brokerage enforces:
//   - Market-data / account requests: 120 per minute.
//   - Order placement:                  60 per minute.
//
// Counters are atomics so the client can check them without locking; only
// the one-minute window start sits behind a mutex.
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Requests allowed per rolling minute.
const REQUESTS_PER_MINUTE: u32 = 120;
/// Warn once usage crosses this share of the budget.
const REQUEST_WARN_THRESHOLD: u32 = 100;
/// Orders allowed per rolling minute.
const ORDERS_PER_MINUTE: u32 = 60;

const WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimitTracker {
    requests: AtomicU32,
    orders: AtomicU32,
    window_started: Mutex<Instant>,
}

/// Point-in-time view of the counters, logged when a live session ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub requests_this_minute: u32,
    pub orders_this_minute: u32,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            requests: AtomicU32::new(0),
            orders: AtomicU32::new(0),
            window_started: Mutex::new(Instant::now()),
        }
    }

    /// Reset both counters once a full minute has elapsed.
    fn roll_window(&self) {
        let mut started = self.window_started.lock();
        if started.elapsed() >= WINDOW {
            *started = Instant::now();
            self.requests.store(0, Ordering::Relaxed);
            self.orders.store(0, Ordering::Relaxed);
            debug!("rate-limit window rolled");
        }
    }

    // -------------------------------------------------------------------------
    // Pre-flight checks
    // -------------------------------------------------------------------------

    /// Reserve one request slot.  Returns `false` when the minute's budget is
    /// spent.
    pub fn try_acquire_request(&self) -> bool {
        self.roll_window();
        let used = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        if used > REQUESTS_PER_MINUTE {
            self.requests.fetch_sub(1, Ordering::Relaxed);
            warn!(
                used = used - 1,
                limit = REQUESTS_PER_MINUTE,
                "request blocked: per-minute budget exhausted"
            );
            return false;
        }
        if used == REQUEST_WARN_THRESHOLD {
            warn!(used, limit = REQUESTS_PER_MINUTE, "request usage crossed warning threshold");
        }
        true
    }

    /// Reserve one order slot.
    pub fn try_acquire_order(&self) -> bool {
        self.roll_window();
        let used = self.orders.fetch_add(1, Ordering::Relaxed) + 1;
        if used > ORDERS_PER_MINUTE {
            self.orders.fetch_sub(1, Ordering::Relaxed);
            warn!(limit = ORDERS_PER_MINUTE, "order blocked: per-minute order budget exhausted");
            return false;
        }
        true
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            requests_this_minute: self.requests.load(Ordering::Relaxed),
            orders_this_minute: self.orders.load(Ordering::Relaxed),
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("requests", &self.requests.load(Ordering::Relaxed))
            .field("orders", &self.orders.load(Ordering::Relaxed))
            .finish()
    }
}
