//! Deadline timers driven by the monitor's event loop.
//!
//! Timers never call back on their own. The owner asks for the earliest
//! deadline, and the loop fires whatever has expired by the time it wakes.
//! Because firing is just another serialized call on the loop, a callback
//! always re-checks live state before acting.

use crate::timebase::duration_us;
use std::time::Duration;

/// One-shot timer over the monotonic microsecond clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timer {
    deadline_us: Option<u64>,
}

impl Timer {
    pub const fn new() -> Self {
        Self { deadline_us: None }
    }

    /// Arm the timer `duration` from `now_us`, replacing any pending deadline.
    pub fn start(&mut self, now_us: u64, duration: Duration) {
        self.deadline_us = Some(now_us.saturating_add(duration_us(duration)));
    }

    /// Disarm. Stopping a stopped timer is a no-op.
    pub fn stop(&mut self) {
        self.deadline_us = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline_us.is_some()
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline_us
    }

    pub fn expired(&self, now_us: u64) -> bool {
        matches!(self.deadline_us, Some(deadline) if deadline <= now_us)
    }

    /// Consume an expired deadline. Returns false if the timer was not due,
    /// which is how a callback queued before a `stop()` finds out it is stale.
    pub fn take_expired(&mut self, now_us: u64) -> bool {
        if self.expired(now_us) {
            self.deadline_us = None;
            true
        } else {
            false
        }
    }
}

/// Periodic timer that re-arms itself each time it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatingTimer {
    interval: Duration,
    enabled: bool,
    deadline_us: u64,
}

impl RepeatingTimer {
    /// Created disabled; nothing fires until `set_enabled(true)`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            enabled: false,
            deadline_us: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Restart the current period so the next expiry is a full interval away.
    pub fn reset_remaining(&mut self, now_us: u64) {
        self.deadline_us = now_us.saturating_add(duration_us(self.interval));
    }

    pub fn deadline(&self) -> Option<u64> {
        self.enabled.then_some(self.deadline_us)
    }

    /// Fire if due. The next period runs from the missed deadline so ticks do
    /// not drift, unless a whole period was missed: then it runs from
    /// `now_us` and the missed ticks collapse into this one.
    pub fn take_expired(&mut self, now_us: u64) -> bool {
        if !self.enabled || self.deadline_us > now_us {
            return false;
        }
        let interval = duration_us(self.interval).max(1);
        let next = self.deadline_us.saturating_add(interval);
        self.deadline_us = if next <= now_us {
            now_us.saturating_add(interval)
        } else {
            next
        };
        true
    }
}
