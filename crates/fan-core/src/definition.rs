use crate::error::DefinitionError;
use std::collections::HashSet;
use std::time::Duration;

/// How a sensor decides it has been out of range for too long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Out of range continuously for `timeout` before going non-functional.
    Timebased { timeout: Duration },
    /// Fault counter checked on the fan's periodic tick; non-functional at
    /// `threshold`, functional again once it drains to zero.
    Count { threshold: u32, step: u32 },
}

impl Method {
    pub fn is_count(&self) -> bool {
        matches!(self, Method::Count { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Timebased { .. } => "timebased",
            Method::Count { .. } => "count",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorDefinition {
    pub name: String,
    pub has_target: bool,
    pub target_interface: String,
    pub factor: f64,
    pub offset: f64,
    pub method: Method,
    /// Time a non-functional time-based sensor must stay in range to recover.
    pub functional_delay: Duration,
}

impl SensorDefinition {
    pub fn timebased(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            has_target: true,
            target_interface: String::new(),
            factor: 1.0,
            offset: 0.0,
            method: Method::Timebased { timeout },
            functional_delay: Duration::ZERO,
        }
    }

    pub fn count(name: impl Into<String>, threshold: u32) -> Self {
        Self {
            name: name.into(),
            has_target: true,
            target_interface: String::new(),
            factor: 1.0,
            offset: 0.0,
            method: Method::Count { threshold, step: 1 },
            functional_delay: Duration::ZERO,
        }
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        if !self.factor.is_finite() || !self.offset.is_finite() {
            return Err(DefinitionError::NonFiniteScale {
                sensor: self.name.clone(),
            });
        }
        if let Method::Count { threshold, step } = self.method {
            if threshold == 0 {
                return Err(DefinitionError::ZeroThreshold {
                    sensor: self.name.clone(),
                });
            }
            if step == 0 {
                return Err(DefinitionError::ZeroStep {
                    sensor: self.name.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FanDefinition {
    pub name: String,
    /// Allowed deviation from target as a fraction (0.15 = 15%).
    pub deviation: f64,
    /// Non-functional sensors needed to mark the fan non-functional.
    /// Zero leaves the fan-level state alone.
    pub num_sensor_fails_for_nonfunc: usize,
    pub sensors: Vec<SensorDefinition>,
    pub monitor_start_delay: Duration,
    pub fan_missing_error_delay: Option<Duration>,
    pub nonfunc_rotor_error_delay: Option<Duration>,
    pub count_interval: Duration,
}

impl FanDefinition {
    pub fn new(name: impl Into<String>, deviation: f64, sensors: Vec<SensorDefinition>) -> Self {
        Self {
            name: name.into(),
            deviation,
            num_sensor_fails_for_nonfunc: 0,
            sensors,
            monitor_start_delay: Duration::ZERO,
            fan_missing_error_delay: None,
            nonfunc_rotor_error_delay: None,
            count_interval: Duration::from_secs(1),
        }
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        if !(0.0..=1.0).contains(&self.deviation) {
            return Err(DefinitionError::InvalidDeviation {
                fan: self.name.clone(),
                deviation: self.deviation,
            });
        }
        if self.sensors.is_empty() {
            return Err(DefinitionError::NoSensors {
                fan: self.name.clone(),
            });
        }
        let uses_count = self.sensors.iter().any(|s| s.method.is_count());
        if uses_count && self.count_interval.is_zero() {
            return Err(DefinitionError::ZeroCountInterval {
                fan: self.name.clone(),
            });
        }
        let mut seen = HashSet::new();
        for sensor in &self.sensors {
            sensor.validate()?;
            if !seen.insert(sensor.name.as_str()) {
                return Err(DefinitionError::DuplicateSensor(sensor.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fan() -> FanDefinition {
        FanDefinition::new(
            "fan0",
            0.15,
            vec![
                SensorDefinition::timebased("fan0_0", Duration::from_secs(30)),
                SensorDefinition::count("fan0_1", 5),
            ],
        )
    }

    #[test]
    fn accepts_valid_definition() {
        assert!(fan().validate().is_ok());
    }

    #[test]
    fn rejects_deviation_above_one() {
        let mut def = fan();
        def.deviation = 1.5;
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::InvalidDeviation { .. })
        ));
    }

    #[test]
    fn rejects_zero_count_threshold() {
        let mut def = fan();
        def.sensors[1] = SensorDefinition::count("fan0_1", 0);
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::ZeroThreshold { .. })
        ));
    }

    #[test]
    fn rejects_zero_interval_only_with_count_sensors() {
        let mut def = fan();
        def.count_interval = Duration::ZERO;
        assert!(def.validate().is_err());

        def.sensors.truncate(1);
        assert!(def.validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_sensor() {
        let mut def = fan();
        def.sensors[1].name = "fan0_0".into();
        assert_eq!(
            def.validate(),
            Err(DefinitionError::DuplicateSensor("fan0_0".into()))
        );
    }

    #[test]
    fn rejects_nan_factor() {
        let mut def = fan();
        def.sensors[0].factor = f64::NAN;
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::NonFiniteScale { .. })
        ));
    }
}
