use crate::context::SharedContext;
use crate::hal::{Delay, PulseLine, SpindleIo};
use crate::input::{InputBank, InputLevels};
use crate::interlock::{
    EnergizedState, Interlock, InterlockConfig, InterlockEvents, TransitionOutcome,
};
use crate::pulse::CaptureConfig;
use crate::rpm::{RpmConfig, RpmEstimate, RpmEstimator};
use crate::status::{StatusPublisher, StatusSink};
use crate::sync::ControllerSnapshot;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct ControlConfig {
    /// Pause after an edge wakeup so the pins settle before sampling.
    pub settle_delay: Duration,
    /// Sampler wakes at least this often without edges.
    pub interlock_tick: Duration,
    pub debounce_interval: Duration,
    pub interlock: InterlockConfig,
    pub rpm: RpmConfig,
    pub capture: CaptureConfig,
    pub status_refresh: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(5),
            interlock_tick: Duration::from_millis(100),
            debounce_interval: Duration::from_millis(50),
            interlock: InterlockConfig::default(),
            rpm: RpmConfig::default(),
            capture: CaptureConfig::default(),
            status_refresh: Duration::from_millis(250),
        }
    }
}

#[derive(Clone, Default, Debug)]
pub struct ExecutionStats {
    pub passes: u64,
    pub edge_wakeups: u64,
    pub tick_wakeups: u64,
    pub transitions_completed: u64,
    pub transitions_aborted: u64,
    pub transitions_timed_out: u64,
    pub transitions_preempted: u64,
    pub power_losses: u64,
    pub emergency_entries: u64,
    pub deferred_applied: u64,
}

impl ExecutionStats {
    fn record(&mut self, events: &InterlockEvents) {
        self.passes += 1;
        match events.transition {
            Some(TransitionOutcome::Completed(_)) => self.transitions_completed += 1,
            Some(TransitionOutcome::Aborted) => self.transitions_aborted += 1,
            Some(TransitionOutcome::TimedOut(_)) => self.transitions_timed_out += 1,
            Some(TransitionOutcome::Preempted) => self.transitions_preempted += 1,
            None => {}
        }
        self.power_losses += u64::from(events.power_loss);
        self.emergency_entries += u64::from(events.emergency_entered);
        self.deferred_applied += u64::from(events.deferred_applied);
    }
}

/// Input sampler and interlock. Sleeps on the edge signal between passes.
pub struct InterlockThread<IO: SpindleIo, D: Delay, S: StatusSink> {
    io: IO,
    delay: D,
    config: ControlConfig,
    context: Arc<SharedContext>,
    publisher: Arc<StatusPublisher<S>>,
    inputs: InputBank,
    interlock: Interlock,
    stats: ExecutionStats,
    sequence: u64,
}

impl<IO: SpindleIo, D: Delay, S: StatusSink> InterlockThread<IO, D, S> {
    pub fn new(
        io: IO,
        delay: D,
        config: ControlConfig,
        context: Arc<SharedContext>,
        publisher: Arc<StatusPublisher<S>>,
    ) -> Self {
        let debounce_us = config.debounce_interval.as_micros() as u64;
        let inputs = InputBank::from_io(&io, debounce_us);
        let interlock = Interlock::new(config.interlock, &io);
        Self {
            io,
            delay,
            config,
            context,
            publisher,
            inputs,
            interlock,
            stats: ExecutionStats::default(),
            sequence: 0,
        }
    }

    /// One sample-process-publish pass.
    pub fn step(&mut self) -> InterlockEvents {
        let now_us = self.context.now_us();
        let changes = self.inputs.sample(&self.io, now_us);
        let levels = self.inputs.levels();
        let events = self
            .interlock
            .process(&mut self.io, &mut self.delay, &levels, &changes);
        self.stats.record(&events);

        let snapshot = self.snapshot(&levels);
        self.context.exchange.publish_controller(snapshot);
        self.publisher.publish(&self.context.exchange.snapshot());
        if let Some(message) = status_message(&events) {
            self.publisher.post_message(&message);
        }
        events
    }

    fn snapshot(&mut self, levels: &InputLevels) -> ControllerSnapshot {
        self.sequence += 1;
        ControllerSnapshot {
            timestamp_us: self.context.now_us(),
            sequence: self.sequence,
            emergency: self.interlock.emergency(),
            main_power: levels.main_power,
            energized_state: self.interlock.energized(),
            direction: self.interlock.direction(),
            light: levels.light,
            backlight: levels.backlight,
            lubrication: levels.lubrication,
            deferred_action: self.interlock.deferred(),
            fault: self.interlock.fault().is_some(),
            rpm: self.context.exchange.rpm().smoothed,
        }
    }

    pub fn run(&mut self, stop: &AtomicBool) {
        info!(tick_ms = self.config.interlock_tick.as_millis() as u64, "Interlock loop started");
        self.step();
        while !stop.load(Ordering::Relaxed) {
            if self.context.edges.wait_timeout(self.config.interlock_tick) {
                self.stats.edge_wakeups += 1;
                self.delay.delay(self.config.settle_delay);
            } else {
                self.stats.tick_wakeups += 1;
            }
            self.step();
        }
        info!(passes = self.stats.passes, "Interlock loop stopped");
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    pub fn interlock(&self) -> &Interlock {
        &self.interlock
    }

    pub fn io(&self) -> &IO {
        &self.io
    }

    pub fn delay(&self) -> &D {
        &self.delay
    }
}

/// Periodic RPM estimation from the captured pulse timestamps.
pub struct RpmThread<S: StatusSink> {
    context: Arc<SharedContext>,
    publisher: Arc<StatusPublisher<S>>,
    estimator: RpmEstimator,
    updates: u64,
}

impl<S: StatusSink> RpmThread<S> {
    pub fn new(
        config: RpmConfig,
        context: Arc<SharedContext>,
        publisher: Arc<StatusPublisher<S>>,
    ) -> Self {
        Self {
            context,
            publisher,
            estimator: RpmEstimator::new(config),
            updates: 0,
        }
    }

    pub fn step(&mut self) -> RpmEstimate {
        let now_us = self.context.now_us();
        self.context.pulses.settle(now_us);
        let timestamps = self.context.pulses.snapshot();
        let estimate = self.estimator.update(&timestamps, now_us);
        self.context.exchange.publish_rpm(estimate);
        self.publisher.publish(&self.context.exchange.snapshot());
        self.updates += 1;
        estimate
    }

    pub fn run(&mut self, stop: &AtomicBool) {
        let period = self.estimator.config().period;
        info!(period_ms = period.as_millis() as u64, "RPM loop started");
        run_periodic(period, stop, || {
            let estimate = self.step();
            debug!(raw = estimate.raw, smoothed = estimate.smoothed, "RPM estimate");
        });
        info!(updates = self.updates, "RPM loop stopped");
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }
}

/// Samples the rotation sensor on a fixed interval when edge capture is
/// unavailable.
pub struct PulsePoller<P: PulseLine> {
    context: Arc<SharedContext>,
    sensor: P,
    interval: Duration,
}

impl<P: PulseLine> PulsePoller<P> {
    pub fn new(sensor: P, interval: Duration, context: Arc<SharedContext>) -> Self {
        Self {
            context,
            sensor,
            interval,
        }
    }

    /// Returns true when the sample completed a pulse.
    pub fn step(&self) -> bool {
        self.context
            .pulses
            .sample(self.sensor.level(), self.context.now_us())
    }

    pub fn run(&self, stop: &AtomicBool) {
        info!(interval_us = self.interval.as_micros() as u64, "Pulse poller started");
        run_periodic(self.interval, stop, || {
            self.step();
        });
    }
}

/// Pushes the merged snapshot to the display and runs its render pass.
pub struct StatusRefreshThread<S: StatusSink> {
    context: Arc<SharedContext>,
    publisher: Arc<StatusPublisher<S>>,
    period: Duration,
}

impl<S: StatusSink> StatusRefreshThread<S> {
    pub fn new(period: Duration, context: Arc<SharedContext>, publisher: Arc<StatusPublisher<S>>) -> Self {
        Self {
            context,
            publisher,
            period,
        }
    }

    pub fn step(&self) {
        self.publisher.refresh(&self.context.exchange.snapshot());
    }

    pub fn run(&self, stop: &AtomicBool) {
        run_periodic(self.period, stop, || self.step());
    }
}

/// Status line text for a pass that changed something worth showing.
fn status_message(events: &InterlockEvents) -> Option<String> {
    if events.emergency_entered {
        return Some("Emergency stop".to_owned());
    }
    if events.emergency_cleared {
        return Some("Emergency stop released".to_owned());
    }
    if events.power_loss {
        return Some("Main power lost".to_owned());
    }
    match events.transition? {
        TransitionOutcome::Completed(EnergizedState::Energized) => {
            Some("Engine energized".to_owned())
        }
        TransitionOutcome::Completed(EnergizedState::DeEnergized) => {
            Some("Engine de-energized".to_owned())
        }
        TransitionOutcome::Completed(_) | TransitionOutcome::Preempted => None,
        TransitionOutcome::Aborted => Some("Energize toggle did not settle".to_owned()),
        TransitionOutcome::TimedOut(err) => Some(err.to_string()),
    }
}

fn run_periodic(period: Duration, stop: &AtomicBool, mut body: impl FnMut()) {
    let mut next = Instant::now();
    while !stop.load(Ordering::Relaxed) {
        body();
        next += period;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            next = now;
        }
    }
}

#[cfg(all(test, feature = "simulation"))]
mod tests {
    use super::*;
    use crate::hal::InputLine;
    use crate::hal_sim::{RecordingSink, SimDelay, SimulatedSpindle, StatusCall};
    use crate::interlock::{Direction, EnergizedState};
    use crate::pulse::CaptureMode;
    use crate::timebase::ManualClock;

    fn context(clock: &ManualClock, capture: CaptureConfig) -> Arc<SharedContext> {
        Arc::new(SharedContext::new(Arc::new(clock.clone()), capture))
    }

    #[test]
    fn pass_publishes_snapshot_and_status() {
        let clock = ManualClock::new(0);
        let ctx = context(&clock, CaptureConfig::default());
        let (sim, handle) = SimulatedSpindle::new(Arc::clone(&ctx));
        handle.set_input(InputLine::MainPower, true);
        handle.set_input(InputLine::Forward, true);

        let sink = RecordingSink::new();
        let publisher = Arc::new(StatusPublisher::new(sink.clone()));
        let mut thread = InterlockThread::new(
            sim,
            SimDelay::new(clock.clone()),
            ControlConfig::default(),
            Arc::clone(&ctx),
            publisher,
        );
        thread.step();

        let snap = ctx.exchange.snapshot();
        assert_eq!(snap.sequence, 1);
        assert!(snap.main_power);
        assert_eq!(snap.direction, Direction::Forward);
        assert_eq!(snap.energized_state, EnergizedState::DeEnergized);
        assert!(sink.calls().contains(&StatusCall::Direction {
            forward: true,
            backward: false
        }));
        assert_eq!(thread.stats().passes, 1);
    }

    #[test]
    fn toggle_press_is_counted_as_completed_transition() {
        let clock = ManualClock::new(0);
        let ctx = context(&clock, CaptureConfig::default());
        let (sim, handle) = SimulatedSpindle::new(Arc::clone(&ctx));
        let publisher = Arc::new(StatusPublisher::new(RecordingSink::new()));
        let mut thread = InterlockThread::new(
            sim,
            SimDelay::new(clock.clone()),
            ControlConfig::default(),
            Arc::clone(&ctx),
            publisher,
        );

        handle.set_input(InputLine::EnergizeToggle, true);
        handle.schedule_input(40_000, InputLine::EnergizeToggle, false);
        thread.step();

        assert_eq!(thread.interlock().energized(), EnergizedState::Energized);
        assert_eq!(thread.stats().transitions_completed, 1);
        assert!(ctx.exchange.snapshot().engine_energized());
    }

    #[test]
    fn rpm_thread_publishes_estimate() {
        let clock = ManualClock::new(0);
        let ctx = context(&clock, CaptureConfig::default());
        for i in 0..=10u64 {
            for level in [true, true, true, true, false, false, false, false] {
                ctx.pulses.sample(level, i * 100_000);
            }
        }
        clock.set_us(1_000_000);

        let sink = RecordingSink::new();
        let publisher = Arc::new(StatusPublisher::new(sink.clone()));
        let mut rpm = RpmThread::new(RpmConfig::default(), Arc::clone(&ctx), publisher);
        let estimate = rpm.step();
        assert_eq!(estimate.raw.round(), 600.0);
        assert_eq!(ctx.exchange.rpm(), estimate);
        assert_eq!(rpm.updates(), 1);
        assert!(sink.calls().contains(&StatusCall::Rpm(estimate.smoothed)));
        assert_eq!(sink.refreshes(), 0);
    }

    #[test]
    fn poller_samples_sensor_level() {
        let clock = ManualClock::new(0);
        let ctx = context(
            &clock,
            CaptureConfig {
                mode: CaptureMode::Polling {
                    interval: Duration::from_micros(250),
                },
                register_width: 3,
                ..CaptureConfig::default()
            },
        );
        let (_sim, handle) = SimulatedSpindle::new(Arc::clone(&ctx));
        let poller = PulsePoller::new(handle.sensor(), Duration::from_micros(250), Arc::clone(&ctx));

        handle.set_input(InputLine::RotationSensor, true);
        for _ in 0..3 {
            assert!(!poller.step());
        }
        handle.set_input(InputLine::RotationSensor, false);
        clock.advance_us(750);
        let completed = (0..3).map(|_| poller.step()).filter(|done| *done).count();
        assert_eq!(completed, 1);
        assert_eq!(ctx.pulses.snapshot().as_slice(), &[750]);
    }

    #[test]
    fn refresh_thread_renders_latest_snapshot() {
        let clock = ManualClock::new(0);
        let ctx = context(&clock, CaptureConfig::default());
        let sink = RecordingSink::new();
        let publisher = Arc::new(StatusPublisher::new(sink.clone()));
        ctx.exchange.publish_rpm(RpmEstimate {
            raw: 300.0,
            smoothed: 300.0,
        });
        let refresh = StatusRefreshThread::new(Duration::from_millis(250), Arc::clone(&ctx), publisher);
        refresh.step();
        assert!(sink.calls().contains(&StatusCall::Rpm(300.0)));
        assert_eq!(sink.refreshes(), 1);
    }

    #[test]
    fn run_exits_when_stop_is_set() {
        let clock = ManualClock::new(0);
        let ctx = context(&clock, CaptureConfig::default());
        let (sim, _handle) = SimulatedSpindle::new(Arc::clone(&ctx));
        let publisher = Arc::new(StatusPublisher::new(RecordingSink::new()));
        let config = ControlConfig {
            interlock_tick: Duration::from_millis(1),
            ..ControlConfig::default()
        };
        let mut thread =
            InterlockThread::new(sim, SimDelay::new(clock.clone()), config, Arc::clone(&ctx), publisher);
        let stop = AtomicBool::new(true);
        thread.run(&stop);
        assert_eq!(thread.stats().passes, 1);
    }

    #[test]
    fn status_line_follows_pass_events() {
        let emergency = InterlockEvents {
            emergency_entered: true,
            transition: Some(TransitionOutcome::Preempted),
            ..InterlockEvents::default()
        };
        assert_eq!(status_message(&emergency).as_deref(), Some("Emergency stop"));

        let timed_out = InterlockEvents {
            transition: Some(TransitionOutcome::TimedOut(
                crate::interlock::InterlockError::EnergizeTimeout { polls: 200 },
            )),
            ..InterlockEvents::default()
        };
        assert_eq!(
            status_message(&timed_out).as_deref(),
            Some("engine not energized in time after 200 polls")
        );

        let quiet = InterlockEvents {
            direction_applied: true,
            ..InterlockEvents::default()
        };
        assert_eq!(status_message(&quiet), None);
    }
}
