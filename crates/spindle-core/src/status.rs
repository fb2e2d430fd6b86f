//! Status publishing towards the display collaborator.
//!
//! The publisher is a pure projection of [`ControllerSnapshot`]: it diffs
//! against the previous publish and pushes only the changed fields, all
//! while holding the display lock.

use crate::sync::ControllerSnapshot;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Call surface of a status display.
pub trait StatusSink: Send {
    fn write_rpm(&mut self, rpm: f64);
    fn update_engine_state(&mut self, energized: bool);
    fn update_power_state(&mut self, on: bool);
    fn update_direction_state(&mut self, forward: bool, backward: bool);
    fn update_light(&mut self, on: bool);
    fn update_backlight(&mut self, on: bool);
    fn update_lube(&mut self, on: bool);
    fn update_warning(&mut self, warning: bool);
    fn write_emergency(&mut self, emergency: bool);

    /// One-line free-text status, replacing the previous one.
    fn write_status_message(&mut self, _message: &str) {}

    /// Render pass, run by the refresh loop under the display lock.
    fn refresh(&mut self) {}
}

impl<S: StatusSink + ?Sized> StatusSink for Box<S> {
    fn write_rpm(&mut self, rpm: f64) {
        (**self).write_rpm(rpm)
    }
    fn update_engine_state(&mut self, energized: bool) {
        (**self).update_engine_state(energized)
    }
    fn update_power_state(&mut self, on: bool) {
        (**self).update_power_state(on)
    }
    fn update_direction_state(&mut self, forward: bool, backward: bool) {
        (**self).update_direction_state(forward, backward)
    }
    fn update_light(&mut self, on: bool) {
        (**self).update_light(on)
    }
    fn update_backlight(&mut self, on: bool) {
        (**self).update_backlight(on)
    }
    fn update_lube(&mut self, on: bool) {
        (**self).update_lube(on)
    }
    fn update_warning(&mut self, warning: bool) {
        (**self).update_warning(warning)
    }
    fn write_emergency(&mut self, emergency: bool) {
        (**self).write_emergency(emergency)
    }
    fn write_status_message(&mut self, message: &str) {
        (**self).write_status_message(message)
    }
    fn refresh(&mut self) {
        (**self).refresh()
    }
}

/// Bitmask of snapshot fields that changed since the previous publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyFields(u16);

impl DirtyFields {
    pub const NONE: DirtyFields = DirtyFields(0);
    pub const RPM: DirtyFields = DirtyFields(1 << 0);
    pub const ENGINE: DirtyFields = DirtyFields(1 << 1);
    pub const POWER: DirtyFields = DirtyFields(1 << 2);
    pub const DIRECTION: DirtyFields = DirtyFields(1 << 3);
    pub const LIGHT: DirtyFields = DirtyFields(1 << 4);
    pub const BACKLIGHT: DirtyFields = DirtyFields(1 << 5);
    pub const LUBE: DirtyFields = DirtyFields(1 << 6);
    pub const WARNING: DirtyFields = DirtyFields(1 << 7);
    pub const EMERGENCY: DirtyFields = DirtyFields(1 << 8);
    pub const ALL: DirtyFields = DirtyFields(0x1ff);

    pub fn contains(self, other: DirtyFields) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    fn set_if(&mut self, field: DirtyFields, changed: bool) {
        if changed {
            self.0 |= field.0;
        }
    }

    pub fn between(previous: Option<&ControllerSnapshot>, next: &ControllerSnapshot) -> Self {
        let Some(prev) = previous else {
            return DirtyFields::ALL;
        };
        let mut dirty = DirtyFields::NONE;
        dirty.set_if(DirtyFields::RPM, prev.rpm != next.rpm);
        dirty.set_if(
            DirtyFields::ENGINE,
            prev.engine_energized() != next.engine_energized(),
        );
        dirty.set_if(DirtyFields::POWER, prev.main_power != next.main_power);
        dirty.set_if(DirtyFields::DIRECTION, prev.direction != next.direction);
        dirty.set_if(DirtyFields::LIGHT, prev.light != next.light);
        dirty.set_if(DirtyFields::BACKLIGHT, prev.backlight != next.backlight);
        dirty.set_if(DirtyFields::LUBE, prev.lubrication != next.lubrication);
        dirty.set_if(DirtyFields::WARNING, prev.warning() != next.warning());
        dirty.set_if(DirtyFields::EMERGENCY, prev.emergency != next.emergency);
        dirty
    }
}

impl std::ops::BitOr for DirtyFields {
    type Output = DirtyFields;

    fn bitor(self, rhs: Self) -> Self::Output {
        DirtyFields(self.0 | rhs.0)
    }
}

struct PublisherState<S> {
    sink: S,
    last: Option<ControllerSnapshot>,
}

/// Owns the display lock. Every call into the sink happens under it.
pub struct StatusPublisher<S: StatusSink> {
    state: Mutex<PublisherState<S>>,
}

impl<S: StatusSink> StatusPublisher<S> {
    pub fn new(sink: S) -> Self {
        Self {
            state: Mutex::new(PublisherState { sink, last: None }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PublisherState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pushes the fields of `snapshot` that differ from the last publish.
    pub fn publish(&self, snapshot: &ControllerSnapshot) -> DirtyFields {
        let mut state = self.lock();
        let dirty = DirtyFields::between(state.last.as_ref(), snapshot);
        if !dirty.is_empty() {
            push_fields(&mut state.sink, snapshot, dirty);
            state.last = Some(*snapshot);
        }
        dirty
    }

    /// Publish followed by a render pass of the sink.
    pub fn refresh(&self, snapshot: &ControllerSnapshot) -> DirtyFields {
        let mut state = self.lock();
        let dirty = DirtyFields::between(state.last.as_ref(), snapshot);
        if !dirty.is_empty() {
            push_fields(&mut state.sink, snapshot, dirty);
            state.last = Some(*snapshot);
        }
        state.sink.refresh();
        dirty
    }

    /// Replaces the status line. Not part of the snapshot, so never diffed.
    pub fn post_message(&self, message: &str) {
        self.lock().sink.write_status_message(message);
    }

    /// Runs `f` on the sink while holding the display lock.
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut state = self.lock();
        f(&mut state.sink)
    }

    pub fn last_published(&self) -> Option<ControllerSnapshot> {
        self.lock().last
    }
}

fn push_fields<S: StatusSink + ?Sized>(sink: &mut S, snap: &ControllerSnapshot, dirty: DirtyFields) {
    if dirty.contains(DirtyFields::EMERGENCY) {
        sink.write_emergency(snap.emergency);
    }
    if dirty.contains(DirtyFields::POWER) {
        sink.update_power_state(snap.main_power);
    }
    if dirty.contains(DirtyFields::ENGINE) {
        sink.update_engine_state(snap.engine_energized());
    }
    if dirty.contains(DirtyFields::DIRECTION) {
        sink.update_direction_state(snap.forward(), snap.backward());
    }
    if dirty.contains(DirtyFields::LIGHT) {
        sink.update_light(snap.light);
    }
    if dirty.contains(DirtyFields::BACKLIGHT) {
        sink.update_backlight(snap.backlight);
    }
    if dirty.contains(DirtyFields::LUBE) {
        sink.update_lube(snap.lubrication);
    }
    if dirty.contains(DirtyFields::WARNING) {
        sink.update_warning(snap.warning());
    }
    if dirty.contains(DirtyFields::RPM) {
        sink.write_rpm(snap.rpm);
    }
}

/// Renders status calls as log events when no display is attached.
#[derive(Debug, Default)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn write_rpm(&mut self, rpm: f64) {
        info!(target: "status", rpm = rpm.round() as u32, "RPM");
    }
    fn update_engine_state(&mut self, energized: bool) {
        info!(target: "status", energized, "Engine");
    }
    fn update_power_state(&mut self, on: bool) {
        info!(target: "status", on, "Main power");
    }
    fn update_direction_state(&mut self, forward: bool, backward: bool) {
        info!(target: "status", forward, backward, "Direction");
    }
    fn update_light(&mut self, on: bool) {
        info!(target: "status", on, "Light");
    }
    fn update_backlight(&mut self, on: bool) {
        info!(target: "status", on, "Backlight");
    }
    fn update_lube(&mut self, on: bool) {
        info!(target: "status", on, "Lubrication");
    }
    fn update_warning(&mut self, warning: bool) {
        info!(target: "status", warning, "Warning");
    }
    fn write_emergency(&mut self, emergency: bool) {
        info!(target: "status", emergency, "Emergency");
    }
    fn write_status_message(&mut self, message: &str) {
        info!(target: "status", message, "Status");
    }
}

/// Forwards every call to each contained sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn StatusSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn StatusSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl StatusSink for FanoutSink {
    fn write_rpm(&mut self, rpm: f64) {
        self.sinks.iter_mut().for_each(|s| s.write_rpm(rpm));
    }
    fn update_engine_state(&mut self, energized: bool) {
        self.sinks.iter_mut().for_each(|s| s.update_engine_state(energized));
    }
    fn update_power_state(&mut self, on: bool) {
        self.sinks.iter_mut().for_each(|s| s.update_power_state(on));
    }
    fn update_direction_state(&mut self, forward: bool, backward: bool) {
        self.sinks
            .iter_mut()
            .for_each(|s| s.update_direction_state(forward, backward));
    }
    fn update_light(&mut self, on: bool) {
        self.sinks.iter_mut().for_each(|s| s.update_light(on));
    }
    fn update_backlight(&mut self, on: bool) {
        self.sinks.iter_mut().for_each(|s| s.update_backlight(on));
    }
    fn update_lube(&mut self, on: bool) {
        self.sinks.iter_mut().for_each(|s| s.update_lube(on));
    }
    fn update_warning(&mut self, warning: bool) {
        self.sinks.iter_mut().for_each(|s| s.update_warning(warning));
    }
    fn write_emergency(&mut self, emergency: bool) {
        self.sinks.iter_mut().for_each(|s| s.write_emergency(emergency));
    }
    fn write_status_message(&mut self, message: &str) {
        self.sinks
            .iter_mut()
            .for_each(|s| s.write_status_message(message));
    }
    fn refresh(&mut self) {
        self.sinks.iter_mut().for_each(|s| s.refresh());
    }
}
