//! Boundaries between the fault-detection core and the rest of the system.

use crate::error::{NotifyError, ReadError};
use crate::status::{FanStatus, SensorStatus};
use crate::trust::TrustEvaluator;

/// Synchronous reads of published properties.
pub trait PropertySource {
    fn tach_input(&self, sensor: &str) -> Result<f64, ReadError>;
    fn tach_target(&self, sensor: &str, interface: &str) -> Result<u64, ReadError>;
    fn fan_present(&self, fan: &str) -> Result<bool, ReadError>;
}

/// Receiver of fan-level functional state. Delivery is fire-and-forget:
/// an error is logged by the caller and never rolls back in-memory state.
pub trait Inventory {
    fn notify(&mut self, fan: &str, functional: bool) -> Result<(), NotifyError>;
}

/// Chassis-side policy hooks (power-off rules, error logs, fault LEDs).
pub trait Coordinator {
    /// `skip_rules` is set for the power-on reset, where the change is
    /// bookkeeping rather than a new fault.
    fn fan_status_change(&mut self, fan: &FanStatus, skip_rules: bool);
    fn sensor_error_timer_expired(&mut self, fan: &FanStatus, sensor: &SensorStatus);
    fn fan_missing_error_timer_expired(&mut self, fan: &FanStatus);
}

/// Everything a fan needs from the outside world for one callback.
pub struct Context<'a> {
    pub now_us: u64,
    pub power_on: bool,
    pub source: &'a dyn PropertySource,
    pub trust: &'a dyn TrustEvaluator,
    pub inventory: &'a mut dyn Inventory,
    pub coordinator: &'a mut dyn Coordinator,
}

impl Context<'_> {
    /// Trust gate for one sensor this cycle; passes when no evaluator is active.
    pub fn trusted(&self, sensor: &str) -> bool {
        !self.trust.active() || self.trust.check_trust(sensor)
    }
}
