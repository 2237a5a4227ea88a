use serde::Serialize;

/// Point-in-time view of one tach sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorStatus {
    pub name: String,
    pub functional: bool,
    pub input: Option<f64>,
    pub target: u64,
    pub method: &'static str,
    pub counter: u32,
    pub timer_running: bool,
}

/// Point-in-time view of a fan assembly, handed to the coordinator and the
/// metrics exporter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FanStatus {
    pub name: String,
    pub present: bool,
    pub functional: bool,
    pub monitor_ready: bool,
    pub nonfunctional_sensors: usize,
    pub sensors: Vec<SensorStatus>,
}

impl FanStatus {
    pub fn sensor(&self, name: &str) -> Option<&SensorStatus> {
        self.sensors.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_for_export() {
        let status = FanStatus {
            name: "fan0".into(),
            present: true,
            functional: false,
            monitor_ready: true,
            nonfunctional_sensors: 1,
            sensors: vec![SensorStatus {
                name: "fan0_0".into(),
                functional: false,
                input: None,
                target: 1000,
                method: "timebased",
                counter: 0,
                timer_running: false,
            }],
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["name"], "fan0");
        assert_eq!(json["sensors"][0]["method"], "timebased");
        assert!(json["sensors"][0]["input"].is_null());
        assert_eq!(status.sensor("fan0_0").map(|s| s.target), Some(1000));
    }
}
