use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Monotonic clock shared by the event loop and every timer deadline.
#[derive(Debug, Clone, Copy)]
pub struct TimeBase {
    start: Instant,
}

impl TimeBase {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Monotonic microseconds since start.
    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// The `Instant` a deadline expressed in monotonic microseconds refers to,
    /// or `None` if it lies beyond what the platform clock can represent.
    pub fn instant_at(&self, us: u64) -> Option<Instant> {
        self.start.checked_add(Duration::from_micros(us))
    }

    /// Wall-clock microseconds since Unix epoch (for cross-process logs only).
    pub fn unix_us(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn duration_us(duration: Duration) -> u64 {
    duration.as_micros().min(u64::MAX as u128) as u64
}
