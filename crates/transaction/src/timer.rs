use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

/// A millisecond deadline shared across threads without a lock, in the
/// manner of the reference workspace's session timers.
pub(crate) struct Timer(AtomicU64);

impl Timer {
    pub fn new(deadline_ms: u64) -> Self {
        Self(AtomicU64::new(deadline_ms))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, deadline_ms: u64) {
        self.0.store(deadline_ms, Ordering::Relaxed);
    }

    pub fn has_elapsed(&self, now: u64) -> bool {
        now >= self.get()
    }
}
