use crate::interlock::{Direction, EnergizedState};
use crate::rpm::RpmEstimate;
use serde::Serialize;
use std::cell::Cell;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Everything the display collaborator is allowed to see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    pub timestamp_us: u64,
    pub sequence: u64,
    pub emergency: bool,
    pub main_power: bool,
    pub energized_state: EnergizedState,
    pub direction: Direction,
    pub light: bool,
    pub backlight: bool,
    pub lubrication: bool,
    pub deferred_action: bool,
    pub fault: bool,
    pub rpm: f64,
}

impl ControllerSnapshot {
    pub fn engine_energized(&self) -> bool {
        self.energized_state == EnergizedState::Energized
    }

    pub fn forward(&self) -> bool {
        self.direction == Direction::Forward
    }

    pub fn backward(&self) -> bool {
        self.direction == Direction::Backward
    }

    /// Deferred direction change or an unresolved confirmation timeout.
    pub fn warning(&self) -> bool {
        self.deferred_action || self.fault
    }
}

/// Latest-value cell. Readers always copy out a whole value.
struct LatestCell<T: Copy> {
    value: critical_section::Mutex<Cell<T>>,
}

impl<T: Copy + Default> LatestCell<T> {
    fn new() -> Self {
        Self {
            value: critical_section::Mutex::new(Cell::new(T::default())),
        }
    }

    fn write(&self, value: T) {
        critical_section::with(|cs| self.value.borrow(cs).set(value));
    }

    fn read(&self) -> T {
        critical_section::with(|cs| self.value.borrow(cs).get())
    }
}

/// Hand-off of the latest state between the control loops.
pub struct StateExchange {
    controller: LatestCell<ControllerSnapshot>,
    rpm: LatestCell<RpmEstimate>,
}

impl StateExchange {
    pub fn new() -> Self {
        Self {
            controller: LatestCell::new(),
            rpm: LatestCell::new(),
        }
    }

    /// Called by the interlock loop after every pass.
    pub fn publish_controller(&self, snapshot: ControllerSnapshot) {
        self.controller.write(snapshot);
    }

    /// Called by the RPM estimator loop every tick.
    pub fn publish_rpm(&self, estimate: RpmEstimate) {
        self.rpm.write(estimate);
    }

    pub fn rpm(&self) -> RpmEstimate {
        self.rpm.read()
    }

    /// Latest controller state with the latest smoothed RPM merged in.
    pub fn snapshot(&self) -> ControllerSnapshot {
        let mut snapshot = self.controller.read();
        snapshot.rpm = self.rpm.read().smoothed;
        snapshot
    }
}

impl Default for StateExchange {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt-to-loop wakeup. Notifications do not queue: any number of
/// `notify` calls before a wait satisfy exactly one wait.
#[derive(Debug, Default)]
pub struct EdgeSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl EdgeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = true;
        self.cond.notify_one();
    }

    /// Waits for a notification or the timeout. Returns true when woken by
    /// a notification, consuming it.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut pending, _) = self
            .cond
            .wait_timeout_while(pending, timeout, |pending| !*pending)
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *pending)
    }

    pub fn is_pending(&self) -> bool {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
