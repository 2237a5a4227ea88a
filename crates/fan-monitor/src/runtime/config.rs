use fan_core::{DefinitionError, FanDefinition, Method, SensorDefinition};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub config_path: PathBuf,
    pub run_seconds: Option<u64>,
    pub bind_addr: String,
    pub feed_enabled: bool,
    pub power_on: bool,
    pub json_logs: bool,
    pub metrics_addr: Option<String>,
    pub audit_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            config_path: PathBuf::from("/etc/fan-monitor/config.json"),
            run_seconds: None,
            bind_addr: "127.0.0.1:7100".to_string(),
            feed_enabled: true,
            power_on: false,
            json_logs: false,
            metrics_addr: None,
            audit_path: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    /// Parse `args` (program name first). Unknown flags are ignored and a
    /// flag missing its value keeps the default.
    pub fn from_args(args: &[String]) -> Self {
        let mut cfg = RuntimeConfig::default();
        let mut args = args.iter().skip(1);
        while let Some(flag) = args.next() {
            let mut value = || args.next().cloned();
            match flag.as_str() {
                "--config" => {
                    if let Some(path) = value() {
                        cfg.config_path = PathBuf::from(path);
                    }
                }
                "--run-seconds" => {
                    if let Some(secs) = value() {
                        cfg.run_seconds = secs.parse().ok();
                    }
                }
                "--bind" => {
                    if let Some(addr) = value() {
                        cfg.bind_addr = addr;
                    }
                }
                "--metrics-addr" => cfg.metrics_addr = value().or(cfg.metrics_addr),
                "--audit-log" => cfg.audit_path = value().map(PathBuf::from).or(cfg.audit_path),
                "--no-feed" => cfg.feed_enabled = false,
                "--power-on" => cfg.power_on = true,
                "--json-logs" => cfg.json_logs = true,
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                _ => {}
            }
        }
        cfg
    }

    pub fn print_help() {
        println!(
            r#"fan-monitor - Fan tach fault monitor

USAGE:
    fan-monitor [OPTIONS]

OPTIONS:
    --config <PATH>         Monitor configuration (JSON) [default: /etc/fan-monitor/config.json]
    --bind <ADDR>           Event feed TCP bind address [default: 127.0.0.1:7100]
    --no-feed               Disable the event feed
    --power-on              Start with chassis power on (otherwise off until a power event)
    --run-seconds <SECS>    Run for a fixed duration then exit
    --json-logs             Output logs in JSON format (for log aggregation)
    --metrics-addr <ADDR>   Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --audit-log <PATH>      Enable audit logging to specified JSONL file
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log filter (e.g., RUST_LOG=debug,fan_core=trace)

EXAMPLES:
    # Monitor with metrics
    fan-monitor --config ./fans.json --metrics-addr 0.0.0.0:9090

    # Production run with all observability
    fan-monitor --json-logs --metrics-addr 0.0.0.0:9090 --audit-log /var/log/fan-monitor/audit.jsonl

    # Short test run, chassis already powered
    fan-monitor --config ./fans.json --power-on --run-seconds 10
"#
        );
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("fan {fan}: deviation {deviation}% outside 0..=100")]
    Deviation { fan: String, deviation: f64 },
    #[error("sensor {sensor}: timebased method requires a timeout")]
    MissingTimeout { sensor: String },
    #[error("sensor {sensor}: count method requires a threshold")]
    MissingThreshold { sensor: String },
    #[error("invalid fan definition: {0}")]
    Definition(#[from] DefinitionError),
}

const DEFAULT_TARGET_INTERFACE: &str = "xyz.openbmc_project.Control.FanSpeed";

fn default_factor() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_step() -> u32 {
    1
}

fn default_count_interval() -> u64 {
    1
}

fn default_target_interface() -> String {
    DEFAULT_TARGET_INTERFACE.to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    #[default]
    Timebased,
    Count,
}

/// One tach sensor entry. Delays are whole seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub has_target: bool,
    #[serde(default = "default_target_interface")]
    pub target_interface: String,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub method: MethodKind,
    pub timeout: Option<u64>,
    #[serde(default)]
    pub functional_delay: u64,
    pub threshold: Option<u32>,
    #[serde(default = "default_step")]
    pub step: u32,
}

impl SensorConfig {
    fn definition(&self) -> Result<SensorDefinition, ConfigError> {
        let method = match self.method {
            MethodKind::Timebased => Method::Timebased {
                timeout: Duration::from_secs(self.timeout.ok_or_else(|| {
                    ConfigError::MissingTimeout {
                        sensor: self.name.clone(),
                    }
                })?),
            },
            MethodKind::Count => Method::Count {
                threshold: self.threshold.ok_or_else(|| ConfigError::MissingThreshold {
                    sensor: self.name.clone(),
                })?,
                step: self.step,
            },
        };
        Ok(SensorDefinition {
            name: self.name.clone(),
            has_target: self.has_target,
            target_interface: self.target_interface.clone(),
            factor: self.factor,
            offset: self.offset,
            method,
            functional_delay: Duration::from_secs(self.functional_delay),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FanConfig {
    /// Inventory name of the fan; also the name presence events use.
    pub inventory: String,
    /// Allowed deviation from target, in percent.
    pub deviation: f64,
    #[serde(default)]
    pub num_sensors_nonfunc_for_fan_nonfunc: usize,
    #[serde(default)]
    pub monitor_start_delay: u64,
    pub fan_missing_error_delay: Option<u64>,
    pub nonfunc_rotor_error_delay: Option<u64>,
    #[serde(default = "default_count_interval")]
    pub count_interval: u64,
    pub sensors: Vec<SensorConfig>,
}

impl FanConfig {
    fn definition(&self) -> Result<FanDefinition, ConfigError> {
        if !(0.0..=100.0).contains(&self.deviation) {
            return Err(ConfigError::Deviation {
                fan: self.inventory.clone(),
                deviation: self.deviation,
            });
        }
        let sensors = self
            .sensors
            .iter()
            .map(SensorConfig::definition)
            .collect::<Result<Vec<_>, _>>()?;

        let mut def = FanDefinition::new(self.inventory.clone(), self.deviation / 100.0, sensors);
        def.num_sensor_fails_for_nonfunc = self.num_sensors_nonfunc_for_fan_nonfunc;
        def.monitor_start_delay = Duration::from_secs(self.monitor_start_delay);
        def.fan_missing_error_delay = self.fan_missing_error_delay.map(Duration::from_secs);
        def.nonfunc_rotor_error_delay = self.nonfunc_rotor_error_delay.map(Duration::from_secs);
        def.count_interval = Duration::from_secs(self.count_interval);
        def.validate()?;
        Ok(def)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub fans: Vec<FanConfig>,
}

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validated fan definitions, in file order.
    pub fn definitions(&self) -> Result<Vec<FanDefinition>, ConfigError> {
        self.fans.iter().map(FanConfig::definition).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    const SAMPLE: &str = r#"{ "fans": [ {
        "inventory": "system/chassis/motherboard/fan0",
        "deviation": 15,
        "num_sensors_nonfunc_for_fan_nonfunc": 1,
        "monitor_start_delay": 30,
        "fan_missing_error_delay": 20,
        "count_interval": 2,
        "sensors": [
            { "name": "fan0_0", "has_target": true, "method": "timebased",
              "timeout": 10, "functional_delay": 3, "factor": 1.5, "offset": 100 },
            { "name": "fan0_1", "has_target": false, "method": "count",
              "threshold": 30 }
        ] } ] }"#;

    #[test]
    fn parses_args() {
        let args: Vec<String> = [
            "fan-monitor",
            "--config",
            "/tmp/fans.json",
            "--power-on",
            "--no-feed",
            "--run-seconds",
            "5",
            "--metrics-addr",
            "0.0.0.0:9090",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let cfg = RuntimeConfig::from_args(&args);
        assert_eq!(cfg.config_path, PathBuf::from("/tmp/fans.json"));
        assert!(cfg.power_on);
        assert!(!cfg.feed_enabled);
        assert_eq!(cfg.run_seconds, Some(5));
        assert_eq!(cfg.metrics_addr.as_deref(), Some("0.0.0.0:9090"));
        assert_eq!(cfg.bind_addr, "127.0.0.1:7100");
    }

    #[test]
    fn loads_sample_config() {
        let file = write_config(SAMPLE);
        let defs = MonitorConfig::load(file.path())
            .unwrap()
            .definitions()
            .unwrap();
        assert_eq!(defs.len(), 1);

        let fan = &defs[0];
        assert_eq!(fan.name, "system/chassis/motherboard/fan0");
        assert!((fan.deviation - 0.15).abs() < 1e-9);
        assert_eq!(fan.monitor_start_delay, Duration::from_secs(30));
        assert_eq!(fan.fan_missing_error_delay, Some(Duration::from_secs(20)));
        assert_eq!(fan.nonfunc_rotor_error_delay, None);
        assert_eq!(fan.count_interval, Duration::from_secs(2));

        assert_eq!(
            fan.sensors[0].method,
            Method::Timebased {
                timeout: Duration::from_secs(10)
            }
        );
        assert_eq!(fan.sensors[0].target_interface, DEFAULT_TARGET_INTERFACE);
        assert_eq!(fan.sensors[0].functional_delay, Duration::from_secs(3));
        assert_eq!(
            fan.sensors[1].method,
            Method::Count {
                threshold: 30,
                step: 1
            }
        );
        assert!(!fan.sensors[1].has_target);
        assert_eq!(fan.sensors[1].factor, 1.0);
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = MonitorConfig::load(Path::new("/nonexistent/fans.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn unknown_method_is_parse_error() {
        let file = write_config(
            r#"{"fans":[{"inventory":"fan0","deviation":10,
                "sensors":[{"name":"fan0_0","method":"magic"}]}]}"#,
        );
        assert!(matches!(
            MonitorConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn count_sensor_requires_threshold() {
        let file = write_config(
            r#"{"fans":[{"inventory":"fan0","deviation":10,
                "sensors":[{"name":"fan0_0","method":"count"}]}]}"#,
        );
        let config = MonitorConfig::load(file.path()).unwrap();
        assert!(matches!(
            config.definitions(),
            Err(ConfigError::MissingThreshold { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_deviation_and_zero_threshold() {
        let file = write_config(
            r#"{"fans":[{"inventory":"fan0","deviation":150,
                "sensors":[{"name":"fan0_0","timeout":5}]}]}"#,
        );
        let config = MonitorConfig::load(file.path()).unwrap();
        assert!(matches!(
            config.definitions(),
            Err(ConfigError::Deviation { .. })
        ));

        let file = write_config(
            r#"{"fans":[{"inventory":"fan0","deviation":10,
                "sensors":[{"name":"fan0_0","method":"count","threshold":0}]}]}"#,
        );
        let config = MonitorConfig::load(file.path()).unwrap();
        assert!(matches!(
            config.definitions(),
            Err(ConfigError::Definition(DefinitionError::ZeroThreshold { .. }))
        ));
    }
}
