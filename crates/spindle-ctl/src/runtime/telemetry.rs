use spindle_io::metrics::{init_metrics, serve_metrics};
use spindle_io::MetricsSink;
use std::thread;
use tracing::info;

/// Registers the gauges and starts the HTTP endpoint when an address is set.
pub fn start_metrics(addr: &Option<String>) -> Option<(MetricsSink, thread::JoinHandle<()>)> {
    addr.as_ref().map(|addr| {
        init_metrics();
        info!(addr = %addr, "Starting metrics server");
        (MetricsSink::new(), serve_metrics(addr.clone()))
    })
}
