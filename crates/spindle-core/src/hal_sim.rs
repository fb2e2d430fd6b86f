use crate::context::SharedContext;
use crate::hal::{Delay, InputLine, PulseLine, RelayLine, SpindleIo};
use crate::status::StatusSink;
use crate::timebase::{ManualClock, MonotonicCounter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// How the simulated engine power stage reacts to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineModel {
    /// Power rises on an energize-button press and drops when the discharge
    /// relay closes.
    #[default]
    Follow,
    /// Engine power only changes when set explicitly.
    Manual,
}

#[derive(Debug)]
struct SimBoard {
    inputs: [bool; 10],
    relays: [bool; 4],
    readback_override: [Option<bool>; 4],
    interrupts: [bool; 10],
    /// Level changes that arrived while the line's interrupt was disabled.
    masked_edges: [u32; 10],
    engine: EngineModel,
    scheduled: Vec<(u64, InputLine, bool)>,
    writes: Vec<(RelayLine, bool)>,
}

impl SimBoard {
    fn new() -> Self {
        Self {
            inputs: [false; 10],
            relays: [false; 4],
            readback_override: [None; 4],
            interrupts: [true; 10],
            masked_edges: [0; 10],
            engine: EngineModel::default(),
            scheduled: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Sets an input pin and lets the engine model react. Returns whether
    /// the level changed and whether engine power came up with it.
    fn set_level(&mut self, line: InputLine, level: bool) -> (bool, bool) {
        let previous = std::mem::replace(&mut self.inputs[line.index()], level);
        if previous != level && !self.interrupts[line.index()] {
            self.masked_edges[line.index()] += 1;
        }
        let power = InputLine::EnginePower.index();
        let energize = line == InputLine::EnergizeToggle
            && level
            && !previous
            && self.engine == EngineModel::Follow
            && !self.inputs[power];
        if energize {
            self.inputs[power] = true;
        }
        (previous != level, energize)
    }

    fn apply_due(&mut self, now_us: u64) {
        if self.scheduled.is_empty() {
            return;
        }
        let (due, pending): (Vec<_>, Vec<_>) = self
            .scheduled
            .drain(..)
            .partition(|&(at_us, _, _)| at_us <= now_us);
        self.scheduled = pending;
        for (_, line, level) in due {
            self.set_level(line, level);
        }
    }
}

fn lock(board: &Mutex<SimBoard>) -> MutexGuard<'_, SimBoard> {
    board.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory spindle board. The controller owns this half.
pub struct SimulatedSpindle {
    board: Arc<Mutex<SimBoard>>,
    context: Arc<SharedContext>,
}

/// Test/driver half of the simulated board. Input changes made here behave
/// like pin changes and raise the matching interrupts.
#[derive(Clone)]
pub struct SimHandle {
    board: Arc<Mutex<SimBoard>>,
    context: Arc<SharedContext>,
}

impl SimulatedSpindle {
    pub fn new(context: Arc<SharedContext>) -> (Self, SimHandle) {
        let board = Arc::new(Mutex::new(SimBoard::new()));
        (
            Self {
                board: Arc::clone(&board),
                context: Arc::clone(&context),
            },
            SimHandle { board, context },
        )
    }
}

impl SpindleIo for SimulatedSpindle {
    fn read_input(&self, line: InputLine) -> bool {
        let mut board = lock(&self.board);
        board.apply_due(self.context.now_us());
        board.inputs[line.index()]
    }

    fn read_relay(&self, relay: RelayLine) -> bool {
        let board = lock(&self.board);
        board.readback_override[relay.index()].unwrap_or(board.relays[relay.index()])
    }

    fn write_relay(&mut self, relay: RelayLine, level: bool) {
        let notify = {
            let mut board = lock(&self.board);
            board.relays[relay.index()] = level;
            board.writes.push((relay, level));
            let power = InputLine::EnginePower.index();
            if relay == RelayLine::Discharge
                && level
                && board.engine == EngineModel::Follow
                && board.inputs[power]
            {
                board.inputs[power] = false;
                board.interrupts[power]
            } else {
                false
            }
        };
        if notify {
            self.context.on_input_edge(InputLine::EnginePower);
        }
    }

    fn set_interrupt_enabled(&mut self, line: InputLine, enabled: bool) {
        lock(&self.board).interrupts[line.index()] = enabled;
    }

    fn interrupt_enabled(&self, line: InputLine) -> bool {
        lock(&self.board).interrupts[line.index()]
    }
}

impl SimHandle {
    pub fn set_engine_model(&self, model: EngineModel) {
        lock(&self.board).engine = model;
    }

    /// Changes an input pin, firing its interrupt on a level change.
    pub fn set_input(&self, line: InputLine, level: bool) {
        let (changed, enabled, energize) = {
            let mut board = lock(&self.board);
            let (changed, energize) = board.set_level(line, level);
            (changed, board.interrupts[line.index()], energize)
        };

        if changed && enabled {
            match line {
                InputLine::RotationSensor => {
                    self.context.on_rotation_edge(&self.sensor());
                }
                _ => self.context.on_input_edge(line),
            }
        }
        if energize && self.interrupt_enabled(InputLine::EnginePower) {
            self.context.on_input_edge(InputLine::EnginePower);
        }
    }

    /// Applies `level` to `line` on the first read at or after `at_us`.
    /// Scheduled changes raise no interrupt.
    pub fn schedule_input(&self, at_us: u64, line: InputLine, level: bool) {
        lock(&self.board).scheduled.push((at_us, line, level));
    }

    pub fn input(&self, line: InputLine) -> bool {
        lock(&self.board).inputs[line.index()]
    }

    pub fn relay(&self, relay: RelayLine) -> bool {
        lock(&self.board).relays[relay.index()]
    }

    /// Overrides what reading back a relay returns, e.g. a welded contact.
    pub fn override_readback(&self, relay: RelayLine, level: Option<bool>) {
        lock(&self.board).readback_override[relay.index()] = level;
    }

    pub fn interrupt_enabled(&self, line: InputLine) -> bool {
        lock(&self.board).interrupts[line.index()]
    }

    pub fn masked_edges(&self, line: InputLine) -> u32 {
        lock(&self.board).masked_edges[line.index()]
    }

    pub fn relay_writes(&self) -> Vec<(RelayLine, bool)> {
        lock(&self.board).writes.clone()
    }

    pub fn clear_relay_writes(&self) {
        lock(&self.board).writes.clear();
    }

    pub fn sensor(&self) -> SimPulseLine {
        SimPulseLine {
            board: Arc::clone(&self.board),
        }
    }
}

/// Rotation sensor view of the simulated board.
#[derive(Clone)]
pub struct SimPulseLine {
    board: Arc<Mutex<SimBoard>>,
}

impl PulseLine for SimPulseLine {
    fn level(&self) -> bool {
        lock(&self.board).inputs[InputLine::RotationSensor.index()]
    }
}

/// Spins the simulated sensor at `rpm` until `stop` is set.
pub fn spawn_rotation(handle: SimHandle, rpm: f64, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        if rpm <= 0.0 {
            return;
        }
        let half_period = Duration::from_secs_f64(30.0 / rpm);
        let mut level = false;
        while !stop.load(Ordering::Relaxed) {
            level = !level;
            handle.set_input(InputLine::RotationSensor, level);
            thread::sleep(half_period);
        }
    })
}

/// Delay that advances a manual clock instead of sleeping.
#[derive(Debug, Clone)]
pub struct SimDelay {
    clock: ManualClock,
    calls: u32,
    total: Duration,
}

impl SimDelay {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            calls: 0,
            total: Duration::ZERO,
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }
}

impl Delay for SimDelay {
    fn delay(&mut self, duration: Duration) {
        self.calls += 1;
        self.total += duration;
        self.clock.advance(duration);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusCall {
    Rpm(f64),
    Engine(bool),
    Power(bool),
    Direction { forward: bool, backward: bool },
    Light(bool),
    Backlight(bool),
    Lube(bool),
    Warning(bool),
    Emergency(bool),
    Message(String),
}

#[derive(Debug, Default)]
struct Recording {
    calls: Vec<StatusCall>,
    refreshes: u32,
}

/// Status sink that remembers every call. Clones share the recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: StatusCall) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .push(call);
    }

    pub fn calls(&self) -> Vec<StatusCall> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .clone()
    }

    pub fn refreshes(&self) -> u32 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .refreshes
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .clear();
    }
}

impl StatusSink for RecordingSink {
    fn write_rpm(&mut self, rpm: f64) {
        self.record(StatusCall::Rpm(rpm));
    }
    fn update_engine_state(&mut self, energized: bool) {
        self.record(StatusCall::Engine(energized));
    }
    fn update_power_state(&mut self, on: bool) {
        self.record(StatusCall::Power(on));
    }
    fn update_direction_state(&mut self, forward: bool, backward: bool) {
        self.record(StatusCall::Direction { forward, backward });
    }
    fn update_light(&mut self, on: bool) {
        self.record(StatusCall::Light(on));
    }
    fn update_backlight(&mut self, on: bool) {
        self.record(StatusCall::Backlight(on));
    }
    fn update_lube(&mut self, on: bool) {
        self.record(StatusCall::Lube(on));
    }
    fn update_warning(&mut self, warning: bool) {
        self.record(StatusCall::Warning(warning));
    }
    fn write_emergency(&mut self, emergency: bool) {
        self.record(StatusCall::Emergency(emergency));
    }
    fn write_status_message(&mut self, message: &str) {
        self.record(StatusCall::Message(message.to_owned()));
    }
    fn refresh(&mut self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .refreshes += 1;
    }
}
