//! Prometheus metrics for the spindle controller.
//!
//! Status fields are exported as gauges through [`MetricsSink`], which the
//! status publisher drives like any other display.

use prometheus::{Encoder, Gauge, IntCounter, Registry, TextEncoder};
use spindle_core::tags::{self, Tag};
use spindle_core::StatusSink;
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Header, Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn status_gauge(tag: Tag, help: &str) -> Gauge {
    let gauge = Gauge::new(tag.metric, help).expect("valid gauge definition");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("gauge registered once");
    gauge
}

// ============================================================================
// Status Metrics
// ============================================================================

pub static RPM: LazyLock<Gauge> =
    LazyLock::new(|| status_gauge(tags::RPM, "Smoothed spindle speed in RPM"));

pub static ENGINE_ENERGIZED: LazyLock<Gauge> = LazyLock::new(|| {
    status_gauge(
        tags::ENGINE_ENERGIZED,
        "Engine energized (1=energized, 0=otherwise)",
    )
});

pub static MAIN_POWER: LazyLock<Gauge> =
    LazyLock::new(|| status_gauge(tags::MAIN_POWER, "Main power present"));

pub static DIRECTION_FORWARD: LazyLock<Gauge> =
    LazyLock::new(|| status_gauge(tags::DIRECTION_FORWARD, "Forward direction selected"));

pub static DIRECTION_BACKWARD: LazyLock<Gauge> =
    LazyLock::new(|| status_gauge(tags::DIRECTION_BACKWARD, "Backward direction selected"));

pub static LIGHT: LazyLock<Gauge> = LazyLock::new(|| status_gauge(tags::LIGHT, "Work light on"));

pub static BACKLIGHT: LazyLock<Gauge> =
    LazyLock::new(|| status_gauge(tags::BACKLIGHT, "Display backlight on"));

pub static LUBRICATION: LazyLock<Gauge> =
    LazyLock::new(|| status_gauge(tags::LUBRICATION, "Lubrication pump on"));

pub static WARNING: LazyLock<Gauge> = LazyLock::new(|| {
    status_gauge(
        tags::WARNING,
        "Deferred direction change or confirmation timeout pending",
    )
});

pub static EMERGENCY: LazyLock<Gauge> =
    LazyLock::new(|| status_gauge(tags::EMERGENCY, "Emergency stop asserted"));

/// Total status calls received from the publisher
pub static STATUS_UPDATES: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "spindle_status_updates_total",
        "Status field updates pushed by the publisher",
    )
    .expect("valid counter definition");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("counter registered once");
    counter
});

fn flag(on: bool) -> f64 {
    if on {
        1.0
    } else {
        0.0
    }
}

/// Status sink that mirrors every field into the gauges above.
#[derive(Debug, Default)]
pub struct MetricsSink;

impl MetricsSink {
    pub fn new() -> Self {
        init_metrics();
        Self
    }
}

impl StatusSink for MetricsSink {
    fn write_rpm(&mut self, rpm: f64) {
        RPM.set(rpm);
        STATUS_UPDATES.inc();
    }
    fn update_engine_state(&mut self, energized: bool) {
        ENGINE_ENERGIZED.set(flag(energized));
        STATUS_UPDATES.inc();
    }
    fn update_power_state(&mut self, on: bool) {
        MAIN_POWER.set(flag(on));
        STATUS_UPDATES.inc();
    }
    fn update_direction_state(&mut self, forward: bool, backward: bool) {
        DIRECTION_FORWARD.set(flag(forward));
        DIRECTION_BACKWARD.set(flag(backward));
        STATUS_UPDATES.inc();
    }
    fn update_light(&mut self, on: bool) {
        LIGHT.set(flag(on));
        STATUS_UPDATES.inc();
    }
    fn update_backlight(&mut self, on: bool) {
        BACKLIGHT.set(flag(on));
        STATUS_UPDATES.inc();
    }
    fn update_lube(&mut self, on: bool) {
        LUBRICATION.set(flag(on));
        STATUS_UPDATES.inc();
    }
    fn update_warning(&mut self, warning: bool) {
        WARNING.set(flag(warning));
        STATUS_UPDATES.inc();
    }
    fn write_emergency(&mut self, emergency: bool) {
        EMERGENCY.set(flag(emergency));
        STATUS_UPDATES.inc();
    }
}

/// Text exposition of every registered metric.
pub fn render_metrics() -> Result<Vec<u8>, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            match request.url() {
                "/metrics" => {
                    let buffer = match render_metrics() {
                        Ok(buffer) => buffer,
                        Err(e) => {
                            tracing::warn!("Failed to encode metrics: {}", e);
                            let _ = request.respond(
                                Response::from_string("Internal Server Error")
                                    .with_status_code(500),
                            );
                            continue;
                        }
                    };
                    let mut response = Response::from_data(buffer);
                    if let Ok(header) = Header::from_bytes(
                        &b"Content-Type"[..],
                        &b"text/plain; version=0.0.4"[..],
                    ) {
                        response = response.with_header(header);
                    }
                    let _ = request.respond(response);
                }
                "/health" => {
                    let _ = request.respond(Response::from_string("OK"));
                }
                "/ready" => {
                    // Ready once the publisher has pushed a first snapshot
                    if STATUS_UPDATES.get() > 0 {
                        let _ = request.respond(Response::from_string("Ready"));
                    } else {
                        let _ = request.respond(
                            Response::from_string("Not Ready").with_status_code(503),
                        );
                    }
                }
                _ => {
                    let _ = request
                        .respond(Response::from_string("Not Found").with_status_code(404));
                }
            }
        }
    })
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = RPM.get();
    let _ = ENGINE_ENERGIZED.get();
    let _ = MAIN_POWER.get();
    let _ = DIRECTION_FORWARD.get();
    let _ = DIRECTION_BACKWARD.get();
    let _ = LIGHT.get();
    let _ = BACKLIGHT.get();
    let _ = LUBRICATION.get();
    let _ = WARNING.get();
    let _ = EMERGENCY.get();
    let _ = STATUS_UPDATES.get();
}
