//! Prometheus metrics for fan fault monitoring.

use fan_core::FanStatus;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder, TEXT_FORMAT};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Header, Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Set once the first chassis power state is known.
static POWER_STATE_KNOWN: AtomicBool = AtomicBool::new(false);

fn counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("valid counter definition");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("counter registered once");
    counter
}

fn gauge(name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("valid gauge definition");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("gauge registered once");
    gauge
}

// ============================================================================
// Fault state
// ============================================================================

pub static SENSOR_TRANSITIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "fanmon_sensor_transitions_total",
        "Tach sensor functional state transitions",
    )
});

pub static FAN_TRANSITIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "fanmon_fan_transitions_total",
        "Fan-level functional state transitions",
    )
});

pub static NONFUNCTIONAL_SENSORS: LazyLock<IntGauge> = LazyLock::new(|| {
    gauge(
        "fanmon_nonfunctional_sensors",
        "Tach sensors currently nonfunctional",
    )
});

pub static NONFUNCTIONAL_FANS: LazyLock<IntGauge> = LazyLock::new(|| {
    gauge("fanmon_nonfunctional_fans", "Fans currently nonfunctional")
});

pub static POWER_ON: LazyLock<IntGauge> = LazyLock::new(|| {
    gauge("fanmon_power_on", "Chassis power state (1=on, 0=off)")
});

// ============================================================================
// Errors
// ============================================================================

/// Inventory updates that could not be delivered
pub static NOTIFY_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "fanmon_notify_failures_total",
        "Inventory functional-state updates that failed",
    )
});

pub static FAN_MISSING_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "fanmon_fan_missing_errors_total",
        "Fans missing for longer than the missing-fan error delay",
    )
});

pub static SENSOR_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "fanmon_sensor_errors_total",
        "Sensors nonfunctional for longer than the rotor error delay",
    )
});

// ============================================================================
// Event feed
// ============================================================================

pub static FEED_MESSAGES: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "fanmon_feed_messages_total",
        "Event feed messages accepted",
    )
});

pub static FEED_REJECTED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "fanmon_feed_rejected_total",
        "Event feed lines rejected as malformed",
    )
});

/// Record the chassis power state; the first call makes `/ready` succeed.
pub fn set_power_state(on: bool) {
    POWER_ON.set(i64::from(on));
    POWER_STATE_KNOWN.store(true, Ordering::Relaxed);
}

/// Refresh the fault gauges from a monitor snapshot.
pub fn record_status(fans: &[FanStatus]) {
    let sensors: usize = fans.iter().map(|f| f.nonfunctional_sensors).sum();
    let failed_fans = fans.iter().filter(|f| !f.functional).count();
    NONFUNCTIONAL_SENSORS.set(sensors as i64);
    NONFUNCTIONAL_FANS.set(failed_fans as i64);
}

// ============================================================================
// Metrics HTTP Server
// ============================================================================

struct Reply {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Reply {
    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.as_bytes().to_vec(),
        }
    }
}

fn route(path: &str) -> Reply {
    match path {
        "/metrics" => {
            let encoder = TextEncoder::new();
            let mut body = Vec::new();
            match encoder.encode(&REGISTRY.gather(), &mut body) {
                Ok(()) => Reply {
                    status: 200,
                    content_type: TEXT_FORMAT,
                    body,
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode metrics");
                    Reply::text(500, "Internal Server Error")
                }
            }
        }
        "/health" => Reply::text(200, "OK"),
        "/ready" if POWER_STATE_KNOWN.load(Ordering::Relaxed) => Reply::text(200, "Ready"),
        "/ready" => Reply::text(503, "Waiting for power state"),
        _ => Reply::text(404, "Not Found"),
    }
}

/// Serve `/metrics`, `/health` and `/ready` on a background thread.
/// `/ready` answers 503 until the chassis power state is known.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(server) => server,
            Err(e) => {
                tracing::error!(addr = %bind_addr, error = %e, "Metrics server failed to bind");
                return;
            }
        };
        tracing::info!(addr = %bind_addr, "Metrics server listening");

        for request in server.incoming_requests() {
            let reply = route(request.url());
            let mut response = Response::from_data(reply.body).with_status_code(reply.status);
            if let Ok(header) =
                Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes())
            {
                response.add_header(header);
            }
            if let Err(e) = request.respond(response) {
                tracing::debug!(error = %e, "Metrics client went away");
            }
        }
    })
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = SENSOR_TRANSITIONS.get();
    let _ = FAN_TRANSITIONS.get();
    let _ = NONFUNCTIONAL_SENSORS.get();
    let _ = NONFUNCTIONAL_FANS.get();
    let _ = POWER_ON.get();
    let _ = NOTIFY_FAILURES.get();
    let _ = FAN_MISSING_ERRORS.get();
    let _ = SENSOR_ERRORS.get();
    let _ = FEED_MESSAGES.get();
    let _ = FEED_REJECTED.get();
}
