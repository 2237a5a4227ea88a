//! Line-delimited JSON messages accepted on the event feed.

use fan_core::FanStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed feed line: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("feed line has no message type")]
    MissingType,
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    #[error("invalid tach value {value} for sensor {sensor}")]
    InvalidValue { sensor: String, value: f64 },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TachMsg {
    pub sensor: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TargetMsg {
    pub sensor: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresenceMsg {
    pub fan: String,
    pub present: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PowerMsg {
    pub on: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Tach(TachMsg),
    Target(TargetMsg),
    Presence(PresenceMsg),
    Power(PowerMsg),
    /// Request for a status snapshot on the same connection.
    Status,
}

impl FeedMessage {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        let msg_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ProtocolError::MissingType)?;
        match msg_type {
            "tach" => {
                let msg: TachMsg = serde_json::from_value(value)?;
                if !msg.value.is_finite() || msg.value < 0.0 {
                    return Err(ProtocolError::InvalidValue {
                        sensor: msg.sensor,
                        value: msg.value,
                    });
                }
                Ok(FeedMessage::Tach(msg))
            }
            "target" => Ok(FeedMessage::Target(serde_json::from_value(value)?)),
            "presence" => Ok(FeedMessage::Presence(serde_json::from_value(value)?)),
            "power" => Ok(FeedMessage::Power(serde_json::from_value(value)?)),
            "status" => Ok(FeedMessage::Status),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

/// Reply to a status request.
#[derive(Debug, Clone, Serialize)]
pub struct StatusMsg {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub power_on: bool,
    pub fans: Vec<FanStatus>,
}

impl StatusMsg {
    pub fn new(power_on: bool, fans: Vec<FanStatus>) -> Self {
        Self {
            msg_type: "status",
            power_on,
            fans,
        }
    }
}
