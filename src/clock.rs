//! Time source abstraction
//! Mission: Let token expiry and rate-limit windows run against an injectable clock

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock time source in milliseconds since UNIX epoch.
///
/// Production code injects [`SystemClock`]. Tests inject [`ManualClock`]
/// to step time deterministically across expiry and window boundaries.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_ms(&self) -> u64;

    fn now_secs(&self) -> u64 {
        self.now_ms() / 1000
    }
}

/// Shared handle to a clock.
pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now_ms: Arc<Mutex<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(Mutex::new(start_ms)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now_ms.lock() += by.as_millis() as u64;
    }

    pub fn set(&self, now_ms: u64) {
        *self.now_ms.lock() = now_ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        *self.now_ms.lock()
    }
}
