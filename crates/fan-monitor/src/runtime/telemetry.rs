use fan_core::FanStatus;
use fan_io::metrics::{init_metrics, record_status, serve_metrics, set_power_state};
use std::thread;
use tracing::info;

pub fn init() {
    init_metrics();
}

pub fn start_metrics_server(addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone())
    })
}

/// Mirror the monitor's state into the exported gauges.
pub fn update(power_on: Option<bool>, fans: &[FanStatus]) {
    if let Some(on) = power_on {
        set_power_state(on);
    }
    record_status(fans);
}
