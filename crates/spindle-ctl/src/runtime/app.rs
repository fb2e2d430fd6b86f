use crate::runtime::config::{ConfigError, RuntimeConfig};
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use spindle_core::context::{self, ContextError};
use spindle_core::hal_sim::spawn_rotation;
use spindle_core::{
    CaptureMode, ExecutionStats, FanoutSink, InputLine, InterlockThread, LogStatusSink,
    PulseLine, PulsePoller, RelayLine, RpmThread, SharedContext, SimHandle, SimPulseLine,
    SimulatedSpindle, SpindleIo, StatusPublisher, StatusRefreshThread, StdDelay, TimeBase,
};
use spindle_io::hal_modbus::ModbusPulseLine;
use spindle_io::{JournalError, JournalSink, ModbusBoard, ModbusError};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Modbus(#[from] ModbusError),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

enum SpindleBoard {
    Simulated(SimulatedSpindle),
    Modbus(ModbusBoard),
}

impl SpindleIo for SpindleBoard {
    fn read_input(&self, line: InputLine) -> bool {
        match self {
            Self::Simulated(b) => b.read_input(line),
            Self::Modbus(b) => b.read_input(line),
        }
    }

    fn read_relay(&self, relay: RelayLine) -> bool {
        match self {
            Self::Simulated(b) => b.read_relay(relay),
            Self::Modbus(b) => b.read_relay(relay),
        }
    }

    fn write_relay(&mut self, relay: RelayLine, level: bool) {
        match self {
            Self::Simulated(b) => b.write_relay(relay, level),
            Self::Modbus(b) => b.write_relay(relay, level),
        }
    }

    fn set_interrupt_enabled(&mut self, line: InputLine, enabled: bool) {
        match self {
            Self::Simulated(b) => b.set_interrupt_enabled(line, enabled),
            Self::Modbus(b) => b.set_interrupt_enabled(line, enabled),
        }
    }

    fn interrupt_enabled(&self, line: InputLine) -> bool {
        match self {
            Self::Simulated(b) => b.interrupt_enabled(line),
            Self::Modbus(b) => b.interrupt_enabled(line),
        }
    }
}

enum RotationSensor {
    Simulated(SimPulseLine),
    Modbus(ModbusPulseLine),
}

impl PulseLine for RotationSensor {
    fn level(&self) -> bool {
        match self {
            Self::Simulated(s) => s.level(),
            Self::Modbus(s) => s.level(),
        }
    }
}

pub fn run_from_args() -> ExitCode {
    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            RuntimeConfig::print_help();
            return ExitCode::FAILURE;
        }
    };
    if config.show_help {
        RuntimeConfig::print_help();
        return ExitCode::SUCCESS;
    }

    init_tracing(config.json_logs);

    match run(config) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Controller stopped with error");
            ExitCode::FAILURE
        }
    }
}

fn spawn_named<T, F>(name: &str, f: F) -> Result<thread::JoinHandle<T>, RuntimeError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    Ok(thread::Builder::new().name(name.to_string()).spawn(f)?)
}

/// Forward selected at startup, then one press of the energize button.
fn script_simulation(handle: &SimHandle, now_us: u64) {
    handle.set_input(InputLine::MainPower, true);
    handle.set_input(InputLine::Forward, true);
    handle.schedule_input(now_us + 1_000_000, InputLine::EnergizeToggle, true);
    handle.schedule_input(now_us + 1_200_000, InputLine::EnergizeToggle, false);
}

pub fn run(config: RuntimeConfig) -> Result<ExecutionStats, RuntimeError> {
    let control = config.control_config()?;
    let timebase = Arc::new(TimeBase::new());
    let context = Arc::new(SharedContext::new(timebase.clone(), control.capture));
    context::install(Arc::clone(&context))?;

    let mut sinks = FanoutSink::new();
    sinks.push(Box::new(LogStatusSink));
    let _metrics_handle = telemetry::start_metrics(&config.metrics_addr).map(|(sink, handle)| {
        sinks.push(Box::new(sink));
        handle
    });
    if let Some(path) = &config.journal_path {
        sinks.push(Box::new(JournalSink::new(path, timebase.clone())?));
        info!(path = %path.display(), "Status journal enabled");
    }
    let publisher = Arc::new(StatusPublisher::new(sinks));

    let stop = Arc::new(AtomicBool::new(false));

    let (board, sensor, rotation_handle) = match &config.modbus_addr {
        Some(addr) => {
            info!(addr = %addr, "Connecting to Modbus I/O module");
            let board = ModbusBoard::new(addr, Arc::clone(&context))?;
            let sensor = RotationSensor::Modbus(board.sensor());
            (SpindleBoard::Modbus(board), sensor, None)
        }
        None => {
            let (sim, handle) = SimulatedSpindle::new(Arc::clone(&context));
            script_simulation(&handle, context.now_us());
            info!(rpm = config.sim_rpm, "Running against simulated spindle");
            let rotation = spawn_rotation(handle.clone(), config.sim_rpm, Arc::clone(&stop));
            (
                SpindleBoard::Simulated(sim),
                RotationSensor::Simulated(handle.sensor()),
                Some(rotation),
            )
        }
    };

    info!(
        tick_ms = control.interlock_tick.as_millis() as u64,
        debounce_ms = control.debounce_interval.as_millis() as u64,
        confirm_timeout_ms = control.interlock.confirm_timeout().as_millis() as u64,
        capture = ?control.capture.mode,
        "Starting spindle controller"
    );

    let interlock_handle = {
        let context = Arc::clone(&context);
        let publisher = Arc::clone(&publisher);
        let stop = Arc::clone(&stop);
        let control = control.clone();
        spawn_named("interlock", move || {
            let mut interlock = InterlockThread::new(board, StdDelay, control, context, publisher);
            interlock.run(&stop);
            interlock.stats().clone()
        })?
    };

    let rpm_handle = {
        let context = Arc::clone(&context);
        let publisher = Arc::clone(&publisher);
        let stop = Arc::clone(&stop);
        let rpm_config = control.rpm;
        spawn_named("rpm", move || {
            RpmThread::new(rpm_config, context, publisher).run(&stop)
        })?
    };

    let poller_handle = match control.capture.mode {
        CaptureMode::Polling { interval } => {
            let context = Arc::clone(&context);
            let stop = Arc::clone(&stop);
            Some(spawn_named("pulse-poll", move || {
                PulsePoller::new(sensor, interval, context).run(&stop)
            })?)
        }
        CaptureMode::Interrupt => None,
    };

    let refresh_handle = {
        let context = Arc::clone(&context);
        let publisher = Arc::clone(&publisher);
        let stop = Arc::clone(&stop);
        let period = control.status_refresh;
        spawn_named("status-refresh", move || {
            StatusRefreshThread::new(period, context, publisher).run(&stop)
        })?
    };

    info!("Spindle controller running");

    if let Some(seconds) = config.run_seconds {
        info!(seconds, "Running for limited duration");
        thread::sleep(Duration::from_secs(seconds));
        stop.store(true, Ordering::Relaxed);
        context.edges.notify();
    }

    let stats = interlock_handle
        .join()
        .map_err(|_| RuntimeError::Panicked("interlock"))?;
    rpm_handle.join().map_err(|_| RuntimeError::Panicked("rpm"))?;
    if let Some(handle) = poller_handle {
        handle.join().map_err(|_| RuntimeError::Panicked("pulse-poll"))?;
    }
    refresh_handle
        .join()
        .map_err(|_| RuntimeError::Panicked("status-refresh"))?;
    if let Some(handle) = rotation_handle {
        let _ = handle.join();
    }

    info!(
        passes = stats.passes,
        edge_wakeups = stats.edge_wakeups,
        tick_wakeups = stats.tick_wakeups,
        transitions_completed = stats.transitions_completed,
        transitions_aborted = stats.transitions_aborted,
        transitions_timed_out = stats.transitions_timed_out,
        transitions_preempted = stats.transitions_preempted,
        power_losses = stats.power_losses,
        emergency_entries = stats.emergency_entries,
        "Run complete"
    );
    Ok(stats)
}
