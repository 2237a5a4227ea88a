use crate::infra::audit::{Audit, AuditEventType, AuditLogger};
use crate::infra::chassis::{ChassisCoordinator, ChassisInventory};
use crate::runtime::config::{ConfigError, MonitorConfig, RuntimeConfig};
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use fan_core::{DefinitionError, Monitor, NoTrust, PropertyCache, TimeBase};
use fan_io::feed::{self, FeedConfig, FeedEvent};
use fan_io::protocol::{FeedMessage, StatusMsg};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info};

type FanMonitor = Monitor<PropertyCache, ChassisInventory, ChassisCoordinator, NoTrust>;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid monitor setup: {0}")]
    Definition(#[from] DefinitionError),
    #[error("audit log {path}: {source}")]
    Audit {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("event feed on {addr}: {source}")]
    Feed {
        addr: String,
        source: std::io::Error,
    },
    #[error("async runtime: {0}")]
    Runtime(std::io::Error),
}

pub fn run_from_args() -> ExitCode {
    let config = RuntimeConfig::from_env();
    if config.show_help {
        RuntimeConfig::print_help();
        return ExitCode::SUCCESS;
    }
    if let Err(e) = init_tracing(config.json_logs) {
        eprintln!("fan-monitor: tracing already initialized: {e}");
    }
    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Fan monitor failed");
            ExitCode::FAILURE
        }
    }
}

pub fn run(config: RuntimeConfig) -> Result<(), RunError> {
    telemetry::init();
    let metrics_enabled = config.metrics_addr.is_some();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    let definitions = MonitorConfig::load(&config.config_path)?.definitions()?;
    let timebase = TimeBase::new();
    let audit = Audit::new(init_audit_logger(config.audit_path.as_ref())?, timebase);

    audit.record_or_warn(
        AuditEventType::SystemStart,
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "fans": definitions.len(),
            "power_on": config.power_on,
            "feed_enabled": config.feed_enabled,
            "metrics_enabled": metrics_enabled,
        }),
    );

    let mut monitor = Monitor::new(
        &definitions,
        config.power_on,
        PropertyCache::new(),
        ChassisInventory::new(audit.clone()),
        ChassisCoordinator::new(audit.clone()),
        NoTrust,
        timebase.now_us(),
    )?;

    info!(
        config = %config.config_path.display(),
        fans = definitions.len(),
        power_on = config.power_on,
        "Fan monitor started"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(RunError::Runtime)?;
    runtime.block_on(event_loop(&mut monitor, &config, timebase, &audit))?;

    let status = monitor.status();
    let nonfunctional_fans = status.iter().filter(|f| !f.functional).count();
    info!(nonfunctional_fans, "Fan monitor stopped");
    audit.record_or_warn(
        AuditEventType::SystemShutdown,
        serde_json::json!({ "fans": status }),
    );
    Ok(())
}

/// Single task that owns the monitor: feed events and timer expiries are
/// applied one at a time, in the order they occur.
async fn event_loop(
    monitor: &mut FanMonitor,
    config: &RuntimeConfig,
    timebase: TimeBase,
    audit: &Audit,
) -> Result<(), RunError> {
    let feed_config = FeedConfig {
        bind_addr: config.bind_addr.clone(),
        ..FeedConfig::default()
    };
    let (tx, mut events) = mpsc::channel(feed_config.channel_capacity);
    if config.feed_enabled {
        let listener = feed::bind(&feed_config)
            .await
            .map_err(|source| RunError::Feed {
                addr: feed_config.bind_addr.clone(),
                source,
            })?;
        tokio::spawn(feed::run_feed(listener, tx));
    } else {
        info!("Event feed disabled");
        drop(tx);
    }

    let mut feed_open = config.feed_enabled;
    let mut power_known = config.power_on;
    let stop_at = config
        .run_seconds
        .map(|seconds| Instant::now() + Duration::from_secs(seconds));

    loop {
        monitor.run_expired(timebase.now_us());
        telemetry::update(power_known.then(|| monitor.power_on()), &monitor.status());

        let wake = monitor
            .next_deadline()
            .and_then(|deadline| timebase.instant_at(deadline))
            .map(Instant::from_std);

        tokio::select! {
            event = events.recv(), if feed_open => match event {
                Some(event) => {
                    if matches!(event, FeedEvent::Update(FeedMessage::Power(_))) {
                        power_known = true;
                    }
                    let now = timebase.now_us();
                    monitor.run_expired(now);
                    apply(monitor, event, now, audit);
                }
                None => feed_open = false,
            },
            _ = sleep_until(wake) => {}
            _ = sleep_until(stop_at) => {
                info!(seconds = config.run_seconds, "Run duration elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }
    Ok(())
}

/// Publish the event into the property cache, then dispatch it.
fn apply(monitor: &mut FanMonitor, event: FeedEvent, now_us: u64, audit: &Audit) {
    match event {
        FeedEvent::Update(FeedMessage::Tach(msg)) => {
            monitor.source_mut().set_input(&msg.sensor, msg.value);
            monitor.on_tach_changed(&msg.sensor, msg.value, now_us);
        }
        FeedEvent::Update(FeedMessage::Target(msg)) => {
            monitor.source_mut().set_target(&msg.sensor, msg.value);
            monitor.on_target_changed(&msg.sensor, msg.value, now_us);
        }
        FeedEvent::Update(FeedMessage::Presence(msg)) => {
            monitor.source_mut().set_present(&msg.fan, msg.present);
            monitor.on_presence_changed(&msg.fan, msg.present, now_us);
        }
        FeedEvent::Update(FeedMessage::Power(msg)) => {
            if msg.on != monitor.power_on() {
                audit.record_or_warn(
                    AuditEventType::PowerChange,
                    serde_json::json!({ "on": msg.on }),
                );
            }
            monitor.on_power_state_changed(msg.on, now_us);
        }
        FeedEvent::Update(FeedMessage::Status) => {
            debug!("Status request without a reply channel ignored");
        }
        FeedEvent::Status(reply) => {
            if reply
                .send(StatusMsg::new(monitor.power_on(), monitor.status()))
                .is_err()
            {
                debug!("Status requester disconnected before the reply");
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn init_audit_logger(audit_path: Option<&PathBuf>) -> Result<Option<Arc<AuditLogger>>, RunError> {
    audit_path
        .map(|path| match AuditLogger::new(path) {
            Ok(logger) => {
                info!(path = %path.display(), "Audit logging enabled");
                Ok(Arc::new(logger))
            }
            Err(source) => Err(RunError::Audit {
                path: path.clone(),
                source,
            }),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fan_core::{FanDefinition, SensorDefinition};
    use fan_io::protocol::{PowerMsg, PresenceMsg, TachMsg, TargetMsg};
    use tokio::sync::oneshot;

    const SEC: u64 = 1_000_000;

    fn monitor() -> (FanMonitor, Audit) {
        let mut def = FanDefinition::new(
            "fan0",
            0.1,
            vec![SensorDefinition::timebased("fan0_0", Duration::from_secs(2))],
        );
        def.num_sensor_fails_for_nonfunc = 1;
        let audit = Audit::new(None, TimeBase::new());
        let monitor = Monitor::new(
            &[def],
            false,
            PropertyCache::new(),
            ChassisInventory::new(audit.clone()),
            ChassisCoordinator::new(audit.clone()),
            NoTrust,
            0,
        )
        .unwrap();
        (monitor, audit)
    }

    fn update(msg: FeedMessage) -> FeedEvent {
        FeedEvent::Update(msg)
    }

    #[test]
    fn feed_events_drive_the_monitor() {
        let (mut monitor, audit) = monitor();

        apply(&mut monitor, update(FeedMessage::Power(PowerMsg { on: true })), 0, &audit);
        apply(
            &mut monitor,
            update(FeedMessage::Target(TargetMsg {
                sensor: "fan0_0".into(),
                value: 1000,
            })),
            0,
            &audit,
        );
        apply(
            &mut monitor,
            update(FeedMessage::Tach(TachMsg {
                sensor: "fan0_0".into(),
                value: 400.0,
            })),
            0,
            &audit,
        );
        apply(
            &mut monitor,
            update(FeedMessage::Presence(PresenceMsg {
                fan: "fan0".into(),
                present: true,
            })),
            0,
            &audit,
        );

        // Monitoring starts from what the feed published into the cache.
        monitor.run_expired(0);
        let fan = monitor.fan("fan0").unwrap();
        assert!(fan.monitor_ready());
        assert!(fan.sensors()[0].functional());
        assert_eq!(monitor.next_deadline(), Some(2 * SEC));

        monitor.run_expired(3 * SEC);

        let fan = monitor.fan("fan0").unwrap();
        assert!(!fan.functional());
        assert_eq!(monitor.inventory().published("fan0"), Some(false));
    }

    #[test]
    fn status_request_is_answered_from_the_monitor() {
        let (mut monitor, audit) = monitor();
        let (reply_tx, mut reply_rx) = oneshot::channel();

        apply(&mut monitor, FeedEvent::Status(reply_tx), 0, &audit);

        let status = reply_rx.try_recv().unwrap();
        assert!(!status.power_on);
        assert_eq!(status.fans.len(), 1);
        assert_eq!(status.fans[0].name, "fan0");
    }

    #[test]
    fn status_request_from_departed_client_is_dropped() {
        let (mut monitor, audit) = monitor();
        let (reply_tx, reply_rx) = oneshot::channel();
        drop(reply_rx);

        apply(&mut monitor, FeedEvent::Status(reply_tx), 0, &audit);
        assert!(!monitor.power_on());
    }
}
