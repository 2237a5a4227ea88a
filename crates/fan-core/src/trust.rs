//! Trust gate consulted before a sensor reading is evaluated.
//!
//! The cross-sensor consistency algorithm that decides trust lives outside
//! this crate. The core only needs the yes/no answer for each cycle.

use std::collections::HashSet;

pub trait TrustEvaluator {
    /// Whether trust checking applies at all right now.
    fn active(&self) -> bool;
    /// Whether this sensor's reading may be evaluated this cycle.
    fn check_trust(&self, sensor: &str) -> bool;
}

/// Evaluator that is never active; every reading is evaluated.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTrust;

impl TrustEvaluator for NoTrust {
    fn active(&self) -> bool {
        false
    }

    fn check_trust(&self, _sensor: &str) -> bool {
        true
    }
}

/// Static deny list: active while at least one sensor is distrusted.
#[derive(Debug, Clone, Default)]
pub struct StaticTrust {
    distrusted: HashSet<String>,
}

impl StaticTrust {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn distrust(&mut self, sensor: impl Into<String>) {
        self.distrusted.insert(sensor.into());
    }

    pub fn restore(&mut self, sensor: &str) {
        self.distrusted.remove(sensor);
    }
}

impl TrustEvaluator for StaticTrust {
    fn active(&self) -> bool {
        !self.distrusted.is_empty()
    }

    fn check_trust(&self, sensor: &str) -> bool {
        !self.distrusted.contains(sensor)
    }
}
