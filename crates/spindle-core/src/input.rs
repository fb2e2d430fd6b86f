use crate::hal::{InputLine, SpindleIo};
use serde::Serialize;
use tracing::{info, trace};

/// Software-debounced view of one input pin.
#[derive(Debug, Clone, Copy)]
pub struct DebouncedInput {
    line: InputLine,
    state: bool,
    last_change_us: Option<u64>,
}

impl DebouncedInput {
    pub fn new(line: InputLine, level: bool) -> Self {
        Self {
            line,
            state: level,
            last_change_us: None,
        }
    }

    pub fn line(&self) -> InputLine {
        self.line
    }

    pub fn state(&self) -> bool {
        self.state
    }

    pub fn last_change_us(&self) -> Option<u64> {
        self.last_change_us
    }

    /// Feeds a raw reading. Returns the new level when a transition is
    /// accepted, i.e. at least `interval_us` after the previous one.
    pub fn update(&mut self, raw: bool, now_us: u64, interval_us: u64) -> Option<bool> {
        if raw == self.state {
            return None;
        }
        if let Some(last) = self.last_change_us {
            if now_us.saturating_sub(last) < interval_us {
                trace!(line = %self.line, raw, "Debounce rejected transition");
                return None;
            }
        }
        self.state = raw;
        self.last_change_us = Some(now_us);
        Some(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InputChange {
    pub line: InputLine,
    pub level: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InputChanges {
    changes: heapless::Vec<InputChange, 9>,
}

impl InputChanges {
    pub fn push(&mut self, line: InputLine, level: bool) {
        // At most one change per debounced line per sample.
        let _ = self.changes.push(InputChange { line, level });
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InputChange> {
        self.changes.iter()
    }

    pub fn rose(&self, line: InputLine) -> bool {
        self.changes.iter().any(|c| c.line == line && c.level)
    }

    pub fn fell(&self, line: InputLine) -> bool {
        self.changes.iter().any(|c| c.line == line && !c.level)
    }
}

/// Debounced levels of every monitored input at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InputLevels {
    pub main_power: bool,
    pub emergency_stop: bool,
    pub energize_toggle: bool,
    pub forward: bool,
    pub backward: bool,
    pub light: bool,
    pub backlight: bool,
    pub lubrication: bool,
    pub engine_power: bool,
}

pub struct InputBank {
    inputs: [DebouncedInput; 9],
    interval_us: u64,
}

impl InputBank {
    /// Seeds every input from the current pin levels.
    pub fn from_io<IO: SpindleIo + ?Sized>(io: &IO, interval_us: u64) -> Self {
        let inputs = InputLine::DEBOUNCED.map(|line| DebouncedInput::new(line, io.read_input(line)));
        Self {
            inputs,
            interval_us,
        }
    }

    pub fn get(&self, line: InputLine) -> Option<&DebouncedInput> {
        self.inputs.get(line.index())
    }

    pub fn state(&self, line: InputLine) -> bool {
        self.get(line).map(|input| input.state()).unwrap_or(false)
    }

    /// Re-reads every pin and reports the accepted transitions.
    pub fn sample<IO: SpindleIo + ?Sized>(&mut self, io: &IO, now_us: u64) -> InputChanges {
        let mut changes = InputChanges::default();
        for input in self.inputs.iter_mut() {
            let raw = io.read_input(input.line());
            if let Some(level) = input.update(raw, now_us, self.interval_us) {
                info!(line = %input.line(), level, "Input changed");
                changes.push(input.line(), level);
            }
        }
        changes
    }

    pub fn levels(&self) -> InputLevels {
        InputLevels {
            main_power: self.state(InputLine::MainPower),
            emergency_stop: self.state(InputLine::EmergencyStop),
            energize_toggle: self.state(InputLine::EnergizeToggle),
            forward: self.state(InputLine::Forward),
            backward: self.state(InputLine::Backward),
            light: self.state(InputLine::Light),
            backlight: self.state(InputLine::Backlight),
            lubrication: self.state(InputLine::Lubrication),
            engine_power: self.state(InputLine::EnginePower),
        }
    }
}
