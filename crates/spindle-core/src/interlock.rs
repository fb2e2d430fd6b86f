//! Relay interlock for direction selection and engine energize sequencing.
//!
//! The engine-power-detect input is the source of truth for the energized
//! axis. The energize button only requests a transition, which runs as a
//! bounded blocking sequence inside the sampler loop. Direction relays move
//! only while the engine is de-energized; anything else is deferred.

use crate::hal::{Delay, InputLine, RelayLine, SpindleIo};
use crate::input::{InputChanges, InputLevels};
use crate::safety::{Authorized, DirectionCommand};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Neutral,
    Forward,
    Backward,
}

impl Direction {
    /// Both selectors asserted is illegal and resolves to neutral.
    pub fn resolve(forward: bool, backward: bool) -> Self {
        match (forward, backward) {
            (true, false) => Direction::Forward,
            (false, true) => Direction::Backward,
            _ => Direction::Neutral,
        }
    }

    /// Levels for (direction A, direction B, common).
    pub fn relay_levels(self) -> [bool; 3] {
        match self {
            Direction::Neutral => [false, false, false],
            Direction::Forward => [true, false, true],
            Direction::Backward => [false, true, true],
        }
    }

    pub fn from_relays(a: bool, b: bool, common: bool) -> Self {
        match (a, b, common) {
            (true, false, true) => Direction::Forward,
            (false, true, true) => Direction::Backward,
            _ => Direction::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergizedState {
    #[default]
    DeEnergized,
    Energizing,
    Energized,
    DeEnergizing,
}

const DIRECTION_RELAYS: [RelayLine; 3] = [
    RelayLine::DirectionA,
    RelayLine::DirectionB,
    RelayLine::Common,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayChannel {
    pub desired: bool,
    pub reported: bool,
}

impl RelayChannel {
    pub fn mismatch(&self) -> bool {
        self.desired != self.reported
    }
}

/// Commanded and observed state of the four relay outputs.
#[derive(Debug, Clone)]
pub struct RelayBank {
    channels: [RelayChannel; 4],
}

impl RelayBank {
    pub fn from_io<IO: SpindleIo + ?Sized>(io: &IO) -> Self {
        let channels = RelayLine::ALL.map(|relay| {
            let level = io.read_relay(relay);
            RelayChannel {
                desired: level,
                reported: level,
            }
        });
        Self { channels }
    }

    pub fn channel(&self, relay: RelayLine) -> RelayChannel {
        self.channels[relay.index()]
    }

    pub fn refresh<IO: SpindleIo + ?Sized>(&mut self, io: &IO) {
        for relay in RelayLine::ALL {
            self.channels[relay.index()].reported = io.read_relay(relay);
        }
    }

    pub fn set_desired_direction(&mut self, direction: Direction) {
        for (relay, level) in DIRECTION_RELAYS.iter().zip(direction.relay_levels()) {
            self.channels[relay.index()].desired = level;
        }
    }

    pub fn direction_pending(&self) -> bool {
        DIRECTION_RELAYS
            .iter()
            .any(|relay| self.channels[relay.index()].mismatch())
    }

    pub fn reported_direction(&self) -> Direction {
        Direction::from_relays(
            self.channel(RelayLine::DirectionA).reported,
            self.channel(RelayLine::DirectionB).reported,
            self.channel(RelayLine::Common).reported,
        )
    }

    /// Writes only the relays that differ from their desired level.
    pub fn apply_direction<IO: SpindleIo + ?Sized>(
        &mut self,
        io: &mut IO,
        command: DirectionCommand<Authorized>,
    ) {
        self.set_desired_direction(command.direction());
        for relay in DIRECTION_RELAYS {
            let channel = self.channels[relay.index()];
            if channel.mismatch() {
                self.drive(io, relay, channel.desired);
            }
        }
    }

    /// Unconditional write, bypassing the interlock. Used for discharge and
    /// for forcing direction relays open on emergency stop.
    pub fn drive<IO: SpindleIo + ?Sized>(&mut self, io: &mut IO, relay: RelayLine, level: bool) {
        io.write_relay(relay, level);
        let channel = &mut self.channels[relay.index()];
        channel.desired = level;
        channel.reported = io.read_relay(relay);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InterlockConfig {
    pub toggle_poll_interval: Duration,
    /// Consecutive released readings required before a transition runs.
    pub toggle_stable_polls: u32,
    pub toggle_max_polls: u32,
    pub confirm_poll_interval: Duration,
    /// Consecutive engine-power readings required to confirm a transition.
    pub confirm_samples: u32,
    pub confirm_max_polls: u32,
    pub emergency_discharge_pulse: Duration,
}

impl Default for InterlockConfig {
    fn default() -> Self {
        Self {
            toggle_poll_interval: Duration::from_millis(20),
            toggle_stable_polls: 5,
            toggle_max_polls: 100,
            confirm_poll_interval: Duration::from_millis(50),
            confirm_samples: 3,
            confirm_max_polls: 200,
            emergency_discharge_pulse: Duration::from_millis(500),
        }
    }
}

impl InterlockConfig {
    pub fn confirm_timeout(&self) -> Duration {
        self.confirm_poll_interval * self.confirm_max_polls
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InterlockError {
    #[error("engine not de-energized in time after {polls} polls")]
    DeEnergizeTimeout { polls: u32 },
    #[error("engine not energized in time after {polls} polls")]
    EnergizeTimeout { polls: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Completed(EnergizedState),
    /// Button never settled; nothing was written.
    Aborted,
    TimedOut(InterlockError),
    /// Emergency stop asserted while the sequence was waiting.
    Preempted,
}

/// Why a bounded wait gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitAbort {
    Exhausted,
    Emergency,
}

/// What one pass of the interlock did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterlockEvents {
    pub transition: Option<TransitionOutcome>,
    pub power_loss: bool,
    pub emergency_entered: bool,
    pub emergency_cleared: bool,
    pub direction_applied: bool,
    pub deferred_applied: bool,
}

pub struct Interlock {
    config: InterlockConfig,
    relays: RelayBank,
    energized: EnergizedState,
    direction: Direction,
    emergency: bool,
    deferred: bool,
    fault: Option<InterlockError>,
}

impl Interlock {
    /// Seeds relay and energized state from hardware.
    pub fn new<IO: SpindleIo + ?Sized>(config: InterlockConfig, io: &IO) -> Self {
        let relays = RelayBank::from_io(io);
        let direction = relays.reported_direction();
        let energized = if io.read_input(InputLine::EnginePower) {
            EnergizedState::Energized
        } else {
            EnergizedState::DeEnergized
        };
        info!(?energized, ?direction, "Interlock initialised");
        Self {
            config,
            relays,
            energized,
            direction,
            emergency: false,
            deferred: false,
            fault: None,
        }
    }

    pub fn config(&self) -> &InterlockConfig {
        &self.config
    }

    pub fn energized(&self) -> EnergizedState {
        self.energized
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn emergency(&self) -> bool {
        self.emergency
    }

    pub fn deferred(&self) -> bool {
        self.deferred
    }

    pub fn fault(&self) -> Option<InterlockError> {
        self.fault
    }

    pub fn relay(&self, relay: RelayLine) -> RelayChannel {
        self.relays.channel(relay)
    }

    /// One interlock pass over freshly sampled inputs.
    pub fn process<IO, D>(
        &mut self,
        io: &mut IO,
        delay: &mut D,
        levels: &InputLevels,
        changes: &InputChanges,
    ) -> InterlockEvents
    where
        IO: SpindleIo + ?Sized,
        D: Delay + ?Sized,
    {
        let mut events = InterlockEvents::default();

        // A latched stop clears only once the raw pin agrees with the debounced level.
        let held = self.emergency && io.read_input(InputLine::EmergencyStop);
        if levels.emergency_stop || held {
            if !self.emergency {
                self.enter_emergency(io, delay);
                events.emergency_entered = true;
            } else {
                self.hold_emergency(io);
            }
            return events;
        }
        if self.emergency {
            self.emergency = false;
            self.sync_energized(io);
            info!(energized = ?self.energized, "Emergency stop cleared");
            events.emergency_cleared = true;
        }

        let wanted = Direction::resolve(levels.forward, levels.backward);
        if wanted != self.direction {
            info!(from = ?self.direction, to = ?wanted, "Direction selected");
            self.direction = wanted;
        }
        self.relays.set_desired_direction(wanted);
        self.apply_direction(io, &mut events);

        // Unsolicited changes need the raw pin to agree with the debounced level.
        let engine_power = levels.engine_power && io.read_input(InputLine::EnginePower);
        let engine_lost = !levels.engine_power && !io.read_input(InputLine::EnginePower);

        if changes.rose(InputLine::EnergizeToggle) {
            events.transition = Some(self.run_toggle(io, delay));
        } else if self.energized == EnergizedState::Energized && engine_lost {
            warn!("Engine power lost without request");
            events.power_loss = true;
            events.transition = Some(self.de_energize(io, delay));
        } else if self.energized == EnergizedState::DeEnergized && engine_power {
            info!("Engine power detected without request");
            events.transition = Some(self.energize(io, delay));
        }

        if events.transition == Some(TransitionOutcome::Preempted) {
            self.enter_emergency(io, delay);
            events.emergency_entered = true;
        } else if events.transition.is_some() {
            self.apply_direction(io, &mut events);
        }
        events
    }

    fn apply_direction<IO: SpindleIo + ?Sized>(&mut self, io: &mut IO, events: &mut InterlockEvents) {
        self.relays.refresh(io);
        if !self.relays.direction_pending() {
            self.deferred = false;
            return;
        }

        match DirectionCommand::new(self.direction).authorize(self.energized, self.emergency) {
            Ok(command) => {
                self.relays.apply_direction(io, command);
                info!(direction = ?self.direction, "Direction relays applied");
                events.direction_applied = true;
                if self.deferred {
                    events.deferred_applied = true;
                    self.deferred = false;
                }
            }
            Err(violation) => {
                if !self.deferred {
                    warn!(direction = ?self.direction, %violation, "Direction change deferred");
                }
                self.deferred = true;
            }
        }
    }

    fn run_toggle<IO, D>(&mut self, io: &mut IO, delay: &mut D) -> TransitionOutcome
    where
        IO: SpindleIo + ?Sized,
        D: Delay + ?Sized,
    {
        io.set_interrupt_enabled(InputLine::EnergizeToggle, false);
        let outcome = match self.wait_toggle_released(io, delay) {
            Ok(()) => match self.energized {
                EnergizedState::Energized => self.de_energize(io, delay),
                _ => self.energize(io, delay),
            },
            Err(WaitAbort::Exhausted) => {
                info!(
                    polls = self.config.toggle_max_polls,
                    "Energize button did not settle, transition aborted"
                );
                TransitionOutcome::Aborted
            }
            Err(WaitAbort::Emergency) => TransitionOutcome::Preempted,
        };
        io.set_interrupt_enabled(InputLine::EnergizeToggle, true);
        outcome
    }

    fn wait_toggle_released<IO, D>(&self, io: &IO, delay: &mut D) -> Result<(), WaitAbort>
    where
        IO: SpindleIo + ?Sized,
        D: Delay + ?Sized,
    {
        let mut stable = 0;
        for _ in 0..self.config.toggle_max_polls {
            if io.read_input(InputLine::EmergencyStop) {
                return Err(WaitAbort::Emergency);
            }
            if io.read_input(InputLine::EnergizeToggle) {
                stable = 0;
            } else {
                stable += 1;
                if stable >= self.config.toggle_stable_polls {
                    return Ok(());
                }
            }
            delay.delay(self.config.toggle_poll_interval);
        }
        Err(WaitAbort::Exhausted)
    }

    /// Polls engine power until `target` is read on enough consecutive
    /// samples. Returns the polls used. Gives up early on emergency stop.
    fn confirm_engine_power<IO, D>(
        &self,
        io: &IO,
        delay: &mut D,
        target: bool,
    ) -> Result<u32, WaitAbort>
    where
        IO: SpindleIo + ?Sized,
        D: Delay + ?Sized,
    {
        let mut consecutive = 0;
        for poll in 1..=self.config.confirm_max_polls {
            if io.read_input(InputLine::EmergencyStop) {
                return Err(WaitAbort::Emergency);
            }
            if io.read_input(InputLine::EnginePower) == target {
                consecutive += 1;
                if consecutive >= self.config.confirm_samples {
                    return Ok(poll);
                }
            } else {
                consecutive = 0;
            }
            delay.delay(self.config.confirm_poll_interval);
        }
        Err(WaitAbort::Exhausted)
    }

    fn de_energize<IO, D>(&mut self, io: &mut IO, delay: &mut D) -> TransitionOutcome
    where
        IO: SpindleIo + ?Sized,
        D: Delay + ?Sized,
    {
        self.energized = EnergizedState::DeEnergizing;
        info!("De-energizing engine");
        self.relays.drive(io, RelayLine::Discharge, true);
        let confirmed = self.confirm_engine_power(io, delay, false);
        self.relays.drive(io, RelayLine::Discharge, false);

        match confirmed {
            Ok(polls) => {
                self.energized = EnergizedState::DeEnergized;
                self.fault = None;
                info!(polls, "Engine de-energized");
                TransitionOutcome::Completed(EnergizedState::DeEnergized)
            }
            Err(WaitAbort::Emergency) => {
                warn!("De-energize interrupted by emergency stop");
                TransitionOutcome::Preempted
            }
            Err(WaitAbort::Exhausted) => {
                self.energized = EnergizedState::Energized;
                let err = InterlockError::DeEnergizeTimeout {
                    polls: self.config.confirm_max_polls,
                };
                error!(
                    timeout_ms = self.config.confirm_timeout().as_millis() as u64,
                    "Engine not de-energized in time"
                );
                self.fault = Some(err);
                TransitionOutcome::TimedOut(err)
            }
        }
    }

    fn energize<IO, D>(&mut self, io: &mut IO, delay: &mut D) -> TransitionOutcome
    where
        IO: SpindleIo + ?Sized,
        D: Delay + ?Sized,
    {
        self.energized = EnergizedState::Energizing;
        info!("Waiting for engine to energize");

        match self.confirm_engine_power(io, delay, true) {
            Ok(polls) => {
                self.energized = EnergizedState::Energized;
                self.fault = None;
                info!(polls, "Engine energized");
                TransitionOutcome::Completed(EnergizedState::Energized)
            }
            Err(WaitAbort::Emergency) => {
                warn!("Energize interrupted by emergency stop");
                TransitionOutcome::Preempted
            }
            Err(WaitAbort::Exhausted) => {
                self.energized = EnergizedState::DeEnergized;
                let err = InterlockError::EnergizeTimeout {
                    polls: self.config.confirm_max_polls,
                };
                error!(
                    timeout_ms = self.config.confirm_timeout().as_millis() as u64,
                    "Engine not energized in time"
                );
                self.fault = Some(err);
                TransitionOutcome::TimedOut(err)
            }
        }
    }

    fn enter_emergency<IO, D>(&mut self, io: &mut IO, delay: &mut D)
    where
        IO: SpindleIo + ?Sized,
        D: Delay + ?Sized,
    {
        self.emergency = true;
        error!("Emergency stop asserted");
        self.direction = Direction::Neutral;
        self.deferred = false;
        self.hold_emergency(io);

        self.relays.drive(io, RelayLine::Discharge, true);
        delay.delay(self.config.emergency_discharge_pulse);
        self.relays.drive(io, RelayLine::Discharge, false);
        self.sync_energized(io);
    }

    /// Keeps direction relays open while the emergency stop is held.
    fn hold_emergency<IO: SpindleIo + ?Sized>(&mut self, io: &mut IO) {
        self.relays.refresh(io);
        for relay in DIRECTION_RELAYS {
            if self.relays.channel(relay).reported {
                self.relays.drive(io, relay, false);
            }
        }
        self.relays.set_desired_direction(Direction::Neutral);
    }

    fn sync_energized<IO: SpindleIo + ?Sized>(&mut self, io: &IO) {
        self.energized = if io.read_input(InputLine::EnginePower) {
            EnergizedState::Energized
        } else {
            EnergizedState::DeEnergized
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_selectors_resolve_to_neutral() {
        assert_eq!(Direction::resolve(true, true), Direction::Neutral);
        assert_eq!(Direction::resolve(false, false), Direction::Neutral);
        assert_eq!(Direction::resolve(true, false), Direction::Forward);
        assert_eq!(Direction::resolve(false, true), Direction::Backward);
    }

    #[test]
    fn relay_levels_round_trip_through_from_relays() {
        for dir in [Direction::Neutral, Direction::Forward, Direction::Backward] {
            let [a, b, c] = dir.relay_levels();
            assert_eq!(Direction::from_relays(a, b, c), dir);
        }
    }

    #[test]
    fn default_confirm_timeout_is_ten_seconds() {
        assert_eq!(InterlockConfig::default().confirm_timeout(), Duration::from_secs(10));
    }

    #[cfg(feature = "simulation")]
    mod with_board {
        use super::*;
        use crate::context::SharedContext;
        use crate::hal_sim::{SimHandle, SimulatedSpindle};
        use crate::pulse::CaptureConfig;
        use crate::timebase::ManualClock;
        use std::sync::Arc;

        fn board() -> (SimulatedSpindle, SimHandle) {
            let ctx = SharedContext::new(Arc::new(ManualClock::new(0)), CaptureConfig::default());
            SimulatedSpindle::new(Arc::new(ctx))
        }

        #[test]
        fn apply_writes_only_mismatched_relays() {
            let (mut sim, handle) = board();
            let mut bank = RelayBank::from_io(&sim);
            let forward = DirectionCommand::new(Direction::Forward)
                .authorize(EnergizedState::DeEnergized, false)
                .unwrap();
            bank.apply_direction(&mut sim, forward);
            assert_eq!(
                handle.relay_writes(),
                vec![(RelayLine::DirectionA, true), (RelayLine::Common, true)]
            );

            handle.clear_relay_writes();
            let backward = DirectionCommand::new(Direction::Backward)
                .authorize(EnergizedState::DeEnergized, false)
                .unwrap();
            bank.apply_direction(&mut sim, backward);
            assert_eq!(
                handle.relay_writes(),
                vec![(RelayLine::DirectionA, false), (RelayLine::DirectionB, true)]
            );
            assert_eq!(bank.reported_direction(), Direction::Backward);
        }

        #[test]
        fn stuck_relay_stays_pending() {
            let (mut sim, handle) = board();
            handle.override_readback(RelayLine::Common, Some(false));
            let mut bank = RelayBank::from_io(&sim);
            let forward = DirectionCommand::new(Direction::Forward)
                .authorize(EnergizedState::DeEnergized, false)
                .unwrap();
            bank.apply_direction(&mut sim, forward);
            assert!(bank.channel(RelayLine::Common).mismatch());
            assert!(bank.direction_pending());
        }

        #[test]
        fn seeds_energized_from_engine_power() {
            let (sim, handle) = board();
            handle.set_input(InputLine::EnginePower, true);
            let interlock = Interlock::new(InterlockConfig::default(), &sim);
            assert_eq!(interlock.energized(), EnergizedState::Energized);
            assert_eq!(interlock.direction(), Direction::Neutral);
        }
    }
}
