use std::time::{Duration, Instant};

/// Time base shared by pose prediction and dispatch scheduling.
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> u64;
    /// Blocks until `now_ns() >= deadline_ns`. Returns immediately for past deadlines.
    fn sleep_until(&self, deadline_ns: u64);
}

/// Monotonic nanoseconds since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn sleep_until(&self, deadline_ns: u64) {
        let target = self.origin + Duration::from_nanos(deadline_ns);
        if let Some(wait) = target.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }
}
