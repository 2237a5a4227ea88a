use crate::error::ReadError;
use crate::system::PropertySource;
use std::collections::HashMap;

/// In-memory store of the latest published sensor and inventory values.
///
/// The daemon fills it from the event feed before dispatching each event, so
/// force-evaluation at monitor start sees exactly what has been published.
/// Anything never published reads back as [`ReadError::Unavailable`].
#[derive(Debug, Clone, Default)]
pub struct PropertyCache {
    inputs: HashMap<String, f64>,
    targets: HashMap<String, u64>,
    presence: HashMap<String, bool>,
}

impl PropertyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_input(&mut self, sensor: &str, value: f64) {
        self.inputs.insert(sensor.to_string(), value);
    }

    pub fn set_target(&mut self, sensor: &str, target: u64) {
        self.targets.insert(sensor.to_string(), target);
    }

    pub fn set_present(&mut self, fan: &str, present: bool) {
        self.presence.insert(fan.to_string(), present);
    }

    /// Forget a sensor, as when its owning service goes away.
    pub fn remove_sensor(&mut self, sensor: &str) {
        self.inputs.remove(sensor);
        self.targets.remove(sensor);
    }
}

impl PropertySource for PropertyCache {
    fn tach_input(&self, sensor: &str) -> Result<f64, ReadError> {
        self.inputs
            .get(sensor)
            .copied()
            .ok_or_else(|| ReadError::Unavailable {
                path: format!("sensors/fan_tach/{sensor}"),
            })
    }

    fn tach_target(&self, sensor: &str, interface: &str) -> Result<u64, ReadError> {
        self.targets
            .get(sensor)
            .copied()
            .ok_or_else(|| ReadError::Unavailable {
                path: format!("sensors/fan_tach/{sensor}:{interface}.Target"),
            })
    }

    fn fan_present(&self, fan: &str) -> Result<bool, ReadError> {
        self.presence
            .get(fan)
            .copied()
            .ok_or_else(|| ReadError::Unavailable {
                path: format!("inventory/{fan}"),
            })
    }
}
