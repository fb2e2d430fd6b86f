//! Process-wide state reachable from interrupt context.
//!
//! Interrupt handlers cannot carry a pointer to the controller, so the
//! shared pieces live in a cell that is filled exactly once at startup and
//! read through [`get`] afterwards.

use crate::hal::{InputLine, PulseLine};
use crate::pulse::{CaptureConfig, CaptureMode, PulseCapture};
use crate::sync::{EdgeSignal, StateExchange};
use crate::timebase::MonotonicCounter;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("shared controller context already installed")]
    AlreadyInstalled,
}

pub struct SharedContext {
    pub edges: EdgeSignal,
    pub pulses: PulseCapture,
    pub exchange: StateExchange,
    counter: Arc<dyn MonotonicCounter>,
    capture_mode: CaptureMode,
}

impl SharedContext {
    pub fn new(counter: Arc<dyn MonotonicCounter>, capture: CaptureConfig) -> Self {
        Self {
            edges: EdgeSignal::new(),
            pulses: PulseCapture::from_config(&capture),
            exchange: StateExchange::new(),
            counter,
            capture_mode: capture.mode,
        }
    }

    pub fn now_us(&self) -> u64 {
        self.counter.now_us()
    }

    pub fn counter(&self) -> Arc<dyn MonotonicCounter> {
        Arc::clone(&self.counter)
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.capture_mode
    }

    /// Edge interrupt on a debounced input: wake the sampler loop.
    pub fn on_input_edge(&self, line: InputLine) {
        trace!(%line, "Input edge");
        self.edges.notify();
    }

    /// Edge interrupt on the rotation sensor. Ignored in polling mode.
    pub fn on_rotation_edge(&self, sensor: &dyn PulseLine) -> bool {
        match self.capture_mode {
            CaptureMode::Interrupt => self.pulses.on_edge(sensor, self.now_us()),
            CaptureMode::Polling { .. } => false,
        }
    }
}

static CONTEXT: OnceLock<Arc<SharedContext>> = OnceLock::new();

/// Stores the context for interrupt handlers. Only the first call wins.
pub fn install(context: Arc<SharedContext>) -> Result<(), ContextError> {
    CONTEXT
        .set(context)
        .map_err(|_| ContextError::AlreadyInstalled)
}

pub fn get() -> Option<&'static Arc<SharedContext>> {
    CONTEXT.get()
}

/// Interrupt entry points. They do nothing until a context is installed.
pub mod isr {
    use super::get;
    use crate::hal::{InputLine, PulseLine};

    pub fn on_input_edge(line: InputLine) {
        if let Some(context) = get() {
            context.on_input_edge(line);
        }
    }

    pub fn on_rotation_edge(sensor: &dyn PulseLine) -> bool {
        get().map_or(false, |context| context.on_rotation_edge(sensor))
    }
}
