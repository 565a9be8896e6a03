use std::time::Instant;

/// Source of monotonic seconds for the engine. All timer and throttle math in
/// this crate is done in integer seconds against this clock, matching the
/// source implementation's use of `int(time())` rather than wall-clock
/// arithmetic.
pub trait MonotonicClock: Send + Sync {
    fn now_secs(&self) -> i64;
}

/// Real clock, anchored to process start so `now_secs` fits comfortably in an
/// `i64` without caring about the wall-clock epoch.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    fn now_secs(&self) -> i64 {
        self.start.elapsed().as_secs() as i64
    }
}

/// Deterministic clock for tests: advances only when told to. Uses an atomic
/// rather than a `Cell` so it stays `Sync` and can satisfy `MonotonicClock`
/// when shared behind an `Arc` across test helper structs.
#[cfg(test)]
pub struct FakeClock {
    now: std::sync::atomic::AtomicI64,
}

#[cfg(test)]
impl FakeClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: std::sync::atomic::AtomicI64::new(start),
        }
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set(&self, secs: i64) {
        self.now.store(secs, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl MonotonicClock for FakeClock {
    fn now_secs(&self) -> i64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }
}
