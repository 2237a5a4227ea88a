//! Daemon-side collaborators of the monitor: the inventory sink and the
//! chassis coordinator. Both report through tracing, metrics and the
//! optional audit trail.

use crate::infra::audit::{Audit, AuditEventType};
use fan_core::{Coordinator, FanStatus, Inventory, NotifyError, SensorStatus};
use fan_io::metrics::{
    FAN_MISSING_ERRORS, FAN_TRANSITIONS, NOTIFY_FAILURES, SENSOR_ERRORS, SENSOR_TRANSITIONS,
};
use std::collections::HashMap;
use tracing::{error, info};

/// Publishes fan-level functional state. The audit trail is the inventory of
/// record here, so a failed write is a failed notification.
pub struct ChassisInventory {
    audit: Audit,
    published: HashMap<String, bool>,
}

impl ChassisInventory {
    pub fn new(audit: Audit) -> Self {
        Self {
            audit,
            published: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn published(&self, fan: &str) -> Option<bool> {
        self.published.get(fan).copied()
    }
}

impl Inventory for ChassisInventory {
    fn notify(&mut self, fan: &str, functional: bool) -> Result<(), NotifyError> {
        let previous = self.published.insert(fan.to_string(), functional);
        if previous.is_some_and(|p| p != functional) {
            FAN_TRANSITIONS.inc();
        }
        info!(fan = %fan, functional, "Publishing fan functional state");

        self.audit
            .record(
                AuditEventType::InventoryNotify,
                serde_json::json!({ "fan": fan, "functional": functional }),
            )
            .map_err(|e| {
                NOTIFY_FAILURES.inc();
                NotifyError::Unreachable(e.to_string())
            })
    }
}

/// Chassis policy hooks. Tracks the last sensor states it was shown so
/// transitions can be counted.
pub struct ChassisCoordinator {
    audit: Audit,
    sensor_states: HashMap<String, bool>,
}

impl ChassisCoordinator {
    pub fn new(audit: Audit) -> Self {
        Self {
            audit,
            sensor_states: HashMap::new(),
        }
    }
}

impl Coordinator for ChassisCoordinator {
    fn fan_status_change(&mut self, fan: &FanStatus, skip_rules: bool) {
        for sensor in &fan.sensors {
            let previous = self
                .sensor_states
                .insert(sensor.name.clone(), sensor.functional);
            // Sensors start functional, so an unseen one counts as a
            // transition only when it is already failed.
            if previous.unwrap_or(true) != sensor.functional {
                SENSOR_TRANSITIONS.inc();
            }
        }

        info!(
            fan = %fan.name,
            present = fan.present,
            functional = fan.functional,
            nonfunctional_sensors = fan.nonfunctional_sensors,
            skip_rules,
            "Fan status change"
        );
        self.audit.record_or_warn(
            AuditEventType::FanStatusChange,
            serde_json::json!({ "status": fan, "skip_rules": skip_rules }),
        );
    }

    fn sensor_error_timer_expired(&mut self, fan: &FanStatus, sensor: &SensorStatus) {
        SENSOR_ERRORS.inc();
        error!(
            fan = %fan.name,
            sensor = %sensor.name,
            input = ?sensor.input,
            target = sensor.target,
            "Fan sensor nonfunctional past error delay"
        );
        self.audit.record_or_warn(
            AuditEventType::SensorError,
            serde_json::json!({ "fan": fan.name, "sensor": sensor }),
        );
    }

    fn fan_missing_error_timer_expired(&mut self, fan: &FanStatus) {
        FAN_MISSING_ERRORS.inc();
        error!(fan = %fan.name, "Fan missing past error delay");
        self.audit.record_or_warn(
            AuditEventType::FanMissingError,
            serde_json::json!({ "fan": fan.name }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::audit::AuditLogger;
    use fan_core::TimeBase;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn status(functional_sensor: bool) -> FanStatus {
        FanStatus {
            name: "fan0".into(),
            present: true,
            functional: functional_sensor,
            monitor_ready: true,
            nonfunctional_sensors: usize::from(!functional_sensor),
            sensors: vec![SensorStatus {
                name: "fan0_0".into(),
                functional: functional_sensor,
                input: Some(500.0),
                target: 1000,
                method: "timebased",
                counter: 0,
                timer_running: false,
            }],
        }
    }

    #[test]
    fn inventory_tracks_published_state() {
        let mut inventory = ChassisInventory::new(Audit::new(None, TimeBase::new()));
        inventory.notify("fan0", true).unwrap();
        inventory.notify("fan0", false).unwrap();
        assert_eq!(inventory.published("fan0"), Some(false));
        assert_eq!(inventory.published("fan1"), None);
    }

    #[test]
    fn coordinator_writes_audit_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = Arc::new(AuditLogger::new(&path).unwrap());
        let audit = Audit::new(Some(logger), TimeBase::new());

        let mut coordinator = ChassisCoordinator::new(audit.clone());
        let failed = status(false);
        coordinator.fan_status_change(&failed, false);
        coordinator.sensor_error_timer_expired(&failed, &failed.sensors[0]);
        coordinator.fan_missing_error_timer_expired(&failed);

        let mut inventory = ChassisInventory::new(audit);
        inventory.notify("fan0", false).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let events: Vec<String> = content
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["event_type"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(
            events,
            [
                "fan_status_change",
                "sensor_error",
                "fan_missing_error",
                "inventory_notify"
            ]
        );
    }
}
