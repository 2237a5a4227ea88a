//! JSONL audit trail of fan fault decisions.
//!
//! Status changes, inventory updates, error timer expiries and power
//! transitions are appended one object per line, stamped with the monotonic
//! clock the monitor runs on plus wall-clock time and a sequence number.

use fan_core::TimeBase;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    SystemStart,
    SystemShutdown,
    /// Presence or sensor states of a fan changed
    FanStatusChange,
    /// Fan-level functional state published
    InventoryNotify,
    /// Sensor still nonfunctional when its error delay ran out
    SensorError,
    /// Fan still missing when its error delay ran out
    FanMissingError,
    PowerChange,
}

#[derive(Serialize)]
struct Line<'a> {
    seq: u64,
    timestamp_us: u64,
    unix_us: u64,
    event_type: AuditEventType,
    details: &'a serde_json::Value,
}

struct Sink {
    writer: BufWriter<File>,
    seq: u64,
}

/// Append-only JSONL file shared by every reporter in the daemon.
pub struct AuditLogger {
    sink: Mutex<Sink>,
}

impl AuditLogger {
    /// Open `path` for appending, creating parent directories.
    pub fn new(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            sink: Mutex::new(Sink {
                writer: BufWriter::new(file),
                seq: 0,
            }),
        })
    }

    /// Write one entry and flush it. The sequence number only advances when
    /// the line reached the file.
    pub fn append(
        &self,
        timestamp_us: u64,
        unix_us: u64,
        event_type: AuditEventType,
        details: &serde_json::Value,
    ) -> std::io::Result<u64> {
        // Keep logging after a poisoned lock.
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        let line = Line {
            seq: sink.seq,
            timestamp_us,
            unix_us,
            event_type,
            details,
        };
        serde_json::to_writer(&mut sink.writer, &line)?;
        sink.writer.write_all(b"\n")?;
        sink.writer.flush()?;
        sink.seq += 1;
        Ok(line.seq)
    }
}

/// Cloneable handle stamping entries from the monitor's time base. Without a
/// logger every record is a no-op.
#[derive(Clone)]
pub struct Audit {
    logger: Option<Arc<AuditLogger>>,
    timebase: TimeBase,
}

impl Audit {
    pub fn new(logger: Option<Arc<AuditLogger>>, timebase: TimeBase) -> Self {
        Self { logger, timebase }
    }

    pub fn record(
        &self,
        event_type: AuditEventType,
        details: serde_json::Value,
    ) -> std::io::Result<()> {
        let Some(logger) = &self.logger else {
            return Ok(());
        };
        logger
            .append(
                self.timebase.now_us(),
                self.timebase.unix_us(),
                event_type,
                &details,
            )
            .map(drop)
    }

    /// Record, logging rather than returning a write failure.
    pub fn record_or_warn(&self, event_type: AuditEventType, details: serde_json::Value) {
        if let Err(e) = self.record(event_type, details) {
            warn!(error = %e, event = ?event_type, "Failed to write audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn entries_are_sequenced_jsonl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/audit.jsonl");
        let logger = AuditLogger::new(&path).unwrap();

        let first = logger
            .append(1_000, 1_704_067_200_000_000, AuditEventType::SystemStart, &json!({"fans": 2}))
            .unwrap();
        let second = logger
            .append(
                2_000,
                1_704_067_200_001_000,
                AuditEventType::InventoryNotify,
                &json!({"fan": "fan0", "functional": false}),
            )
            .unwrap();
        assert_eq!((first, second), (0, 1));

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["seq"], 1);
        assert_eq!(lines[1]["timestamp_us"], 2_000);
        assert_eq!(lines[1]["event_type"], "inventory_notify");
        assert_eq!(lines[1]["details"]["fan"], "fan0");
    }

    #[test]
    fn reopening_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        for _ in 0..2 {
            let audit = Audit::new(Some(Arc::new(AuditLogger::new(&path).unwrap())), TimeBase::new());
            audit
                .record(AuditEventType::PowerChange, json!({"on": true}))
                .unwrap();
        }
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l["event_type"] == "power_change"));
    }

    #[test]
    fn disabled_audit_is_a_no_op() {
        let audit = Audit::new(None, TimeBase::new());
        assert!(audit.record(AuditEventType::SystemShutdown, json!({})).is_ok());
    }
}
