//! Modbus TCP I/O module as a spindle board.
//!
//! Discrete inputs 0..10 map to [`InputLine`] in declaration order and coils
//! 0..4 to [`RelayLine`]. A background task polls both at 100 Hz, so reads
//! return the latest polled image and writes are queued for the next cycle.
//! A lost or refused connection is retried with exponential backoff; writes
//! made while disconnected only touch the image and the next read corrects it.

use spindle_core::{InputLine, PulseLine, RelayLine, SharedContext, SpindleIo};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Runtime;
use tokio::time::{interval, sleep};
use tokio_modbus::prelude::*;
use tracing::{error, info, warn};

const POLL_PERIOD: Duration = Duration::from_millis(10);
const RECONNECT_MIN: Duration = Duration::from_millis(100);
const RECONNECT_MAX: Duration = Duration::from_secs(5);
const INPUT_COUNT: u16 = InputLine::ALL.len() as u16;
const COIL_COUNT: u16 = RelayLine::ALL.len() as u16;

#[derive(Debug, Error)]
pub enum ModbusError {
    #[error("invalid Modbus address {addr}: {source}")]
    InvalidAddress {
        addr: String,
        source: std::net::AddrParseError,
    },
    #[error("failed to start Modbus runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

#[derive(Debug)]
struct BoardImage {
    inputs: [bool; 10],
    coils: [bool; 4],
    pending: Vec<(RelayLine, bool)>,
    interrupts: [bool; 10],
    connected: bool,
}

impl Default for BoardImage {
    fn default() -> Self {
        Self {
            inputs: [false; 10],
            coils: [false; 4],
            pending: Vec::new(),
            interrupts: [true; 10],
            connected: false,
        }
    }
}

impl BoardImage {
    /// Queues a coil write, keeping only the latest level per relay.
    fn queue(&mut self, relay: RelayLine, level: bool) {
        self.coils[relay.index()] = level;
        if !self.connected {
            return;
        }
        self.pending.retain(|(queued, _)| *queued != relay);
        self.pending.push((relay, level));
    }

    fn mark_disconnected(&mut self) {
        self.connected = false;
        self.pending.clear();
    }
}

fn lock(image: &Mutex<BoardImage>) -> MutexGuard<'_, BoardImage> {
    image.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ModbusBoard {
    image: Arc<Mutex<BoardImage>>,
    _runtime: Arc<Runtime>, // Keep runtime alive
}

impl ModbusBoard {
    pub fn new(addr: &str, context: Arc<SharedContext>) -> Result<Self, ModbusError> {
        let socket_addr: SocketAddr = addr.parse().map_err(|source| ModbusError::InvalidAddress {
            addr: addr.to_string(),
            source,
        })?;
        let image = Arc::new(Mutex::new(BoardImage::default()));
        let runtime = Arc::new(Runtime::new()?);

        runtime.spawn(poll_board(socket_addr, Arc::clone(&image), context));

        Ok(Self {
            image,
            _runtime: runtime,
        })
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.image).connected
    }

    /// Rotation sensor view of the polled input image.
    pub fn sensor(&self) -> ModbusPulseLine {
        ModbusPulseLine {
            image: Arc::clone(&self.image),
        }
    }
}

async fn poll_board(addr: SocketAddr, image: Arc<Mutex<BoardImage>>, context: Arc<SharedContext>) {
    let mut backoff = RECONNECT_MIN;
    loop {
        match tcp::connect(addr).await {
            Ok(ctx) => {
                info!(%addr, "Connected to Modbus TCP");
                backoff = RECONNECT_MIN;
                run_session(ctx, &image, &context).await;
                lock(&image).mark_disconnected();
                warn!(%addr, "Modbus TCP connection lost");
            }
            Err(e) => {
                error!(
                    %addr,
                    error = %e,
                    retry_ms = backoff.as_millis() as u64,
                    "Failed to connect to Modbus TCP"
                );
                lock(&image).mark_disconnected();
            }
        }
        sleep(backoff).await;
        backoff = (backoff * 2).min(RECONNECT_MAX);
    }
}

/// Polls until a read fails.
async fn run_session(
    mut ctx: tokio_modbus::client::Context,
    image: &Arc<Mutex<BoardImage>>,
    context: &SharedContext,
) {
    let mut ticker = interval(POLL_PERIOD);
    let sensor = ModbusPulseLine {
        image: Arc::clone(image),
    };

    loop {
        ticker.tick().await;

        let pending = std::mem::take(&mut lock(image).pending);
        for (relay, level) in pending {
            if let Err(e) = ctx.write_single_coil(relay.index() as u16, level).await {
                warn!(%relay, level, error = %e, "Modbus coil write failed");
            }
        }

        match ctx.read_coils(0, COIL_COUNT).await {
            Ok(coils) => {
                let mut image = lock(image);
                for (slot, level) in image.coils.iter_mut().zip(coils) {
                    *slot = level;
                }
            }
            Err(e) => {
                warn!(error = %e, "Modbus coil read failed");
                return;
            }
        }

        let inputs = match ctx.read_discrete_inputs(0, INPUT_COUNT).await {
            Ok(inputs) => inputs,
            Err(e) => {
                warn!(error = %e, "Modbus input read failed");
                return;
            }
        };

        let mut edges = Vec::new();
        {
            let mut image = lock(image);
            image.connected = true;
            for (line, level) in InputLine::ALL.into_iter().zip(inputs) {
                let slot = &mut image.inputs[line.index()];
                if *slot != level {
                    *slot = level;
                    if image.interrupts[line.index()] {
                        edges.push(line);
                    }
                }
            }
        }

        for line in edges {
            match line {
                InputLine::RotationSensor => {
                    context.on_rotation_edge(&sensor);
                }
                _ => context.on_input_edge(line),
            }
        }
    }
}

impl SpindleIo for ModbusBoard {
    fn read_input(&self, line: InputLine) -> bool {
        lock(&self.image).inputs[line.index()]
    }

    fn read_relay(&self, relay: RelayLine) -> bool {
        lock(&self.image).coils[relay.index()]
    }

    /// The image takes the new level at once; the coil follows on the next
    /// poll cycle and a failed write is corrected by the following read.
    fn write_relay(&mut self, relay: RelayLine, level: bool) {
        lock(&self.image).queue(relay, level);
    }

    fn set_interrupt_enabled(&mut self, line: InputLine, enabled: bool) {
        lock(&self.image).interrupts[line.index()] = enabled;
    }

    fn interrupt_enabled(&self, line: InputLine) -> bool {
        lock(&self.image).interrupts[line.index()]
    }
}

#[derive(Clone)]
pub struct ModbusPulseLine {
    image: Arc<Mutex<BoardImage>>,
}

impl PulseLine for ModbusPulseLine {
    fn level(&self) -> bool {
        lock(&self.image).inputs[InputLine::RotationSensor.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_core::{CaptureConfig, ManualClock};

    fn context() -> Arc<SharedContext> {
        Arc::new(SharedContext::new(
            Arc::new(ManualClock::new(0)),
            CaptureConfig::default(),
        ))
    }

    #[test]
    fn rejects_invalid_address() {
        let err = ModbusBoard::new("not-an-address", context()).err();
        assert!(matches!(err, Some(ModbusError::InvalidAddress { .. })));
    }

    #[test]
    fn writes_while_disconnected_only_touch_the_image() {
        // Nothing listens on port 1, so the poll task keeps retrying.
        let mut board = ModbusBoard::new("127.0.0.1:1", context()).unwrap();
        for _ in 0..1000 {
            board.write_relay(RelayLine::Discharge, true);
            board.write_relay(RelayLine::Discharge, false);
        }
        board.write_relay(RelayLine::Discharge, true);
        assert!(board.read_relay(RelayLine::Discharge));
        assert!(lock(&board.image).pending.is_empty());
        assert!(!board.is_connected());
    }

    #[test]
    fn queue_keeps_latest_level_per_relay() {
        let mut image = BoardImage {
            connected: true,
            ..BoardImage::default()
        };
        image.queue(RelayLine::Discharge, true);
        image.queue(RelayLine::Common, true);
        image.queue(RelayLine::Discharge, false);
        assert_eq!(
            image.pending,
            vec![(RelayLine::Common, true), (RelayLine::Discharge, false)]
        );

        image.mark_disconnected();
        assert!(image.pending.is_empty());
        assert!(!image.connected);
        assert!(image.coils[RelayLine::Common.index()]);
    }

    #[test]
    fn interrupts_default_enabled() {
        let mut board = ModbusBoard::new("127.0.0.1:1", context()).unwrap();
        assert!(board.interrupt_enabled(InputLine::EnergizeToggle));
        board.set_interrupt_enabled(InputLine::EnergizeToggle, false);
        assert!(!board.interrupt_enabled(InputLine::EnergizeToggle));
    }
}
