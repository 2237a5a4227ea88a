use thiserror::Error;

/// A property read that could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    /// The property owner has not published the value yet.
    #[error("property {path} is not published yet")]
    Unavailable { path: String },
}

/// Failure to deliver a functional-state update to the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("inventory rejected update for {fan}: {reason}")]
    Rejected { fan: String, reason: String },
    #[error("inventory unreachable: {0}")]
    Unreachable(String),
}

/// Invalid fan or sensor definition, detected at construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DefinitionError {
    #[error("fan {fan}: deviation {deviation} outside 0.0..=1.0")]
    InvalidDeviation { fan: String, deviation: f64 },
    #[error("fan {fan} has no sensors")]
    NoSensors { fan: String },
    #[error("sensor {sensor}: count threshold must be at least 1")]
    ZeroThreshold { sensor: String },
    #[error("sensor {sensor}: count step must be at least 1")]
    ZeroStep { sensor: String },
    #[error("fan {fan}: count interval must be non-zero")]
    ZeroCountInterval { fan: String },
    #[error("sensor {sensor}: factor and offset must be finite")]
    NonFiniteScale { sensor: String },
    #[error("duplicate fan name {0}")]
    DuplicateFan(String),
    #[error("duplicate sensor name {0}")]
    DuplicateSensor(String),
}
