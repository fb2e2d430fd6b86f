use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Physical input lines monitored by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputLine {
    MainPower,
    EmergencyStop,
    EnergizeToggle,
    Forward,
    Backward,
    Light,
    Backlight,
    Lubrication,
    EnginePower,
    RotationSensor,
}

impl InputLine {
    /// Lines tracked by the debounced sampler. The rotation sensor is
    /// handled by pulse capture instead.
    pub const DEBOUNCED: [InputLine; 9] = [
        InputLine::MainPower,
        InputLine::EmergencyStop,
        InputLine::EnergizeToggle,
        InputLine::Forward,
        InputLine::Backward,
        InputLine::Light,
        InputLine::Backlight,
        InputLine::Lubrication,
        InputLine::EnginePower,
    ];

    pub const ALL: [InputLine; 10] = [
        InputLine::MainPower,
        InputLine::EmergencyStop,
        InputLine::EnergizeToggle,
        InputLine::Forward,
        InputLine::Backward,
        InputLine::Light,
        InputLine::Backlight,
        InputLine::Lubrication,
        InputLine::EnginePower,
        InputLine::RotationSensor,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            InputLine::MainPower => "main_power",
            InputLine::EmergencyStop => "emergency_stop",
            InputLine::EnergizeToggle => "energize_toggle",
            InputLine::Forward => "forward",
            InputLine::Backward => "backward",
            InputLine::Light => "light",
            InputLine::Backlight => "backlight",
            InputLine::Lubrication => "lubrication",
            InputLine::EnginePower => "engine_power",
            InputLine::RotationSensor => "rotation_sensor",
        }
    }
}

impl fmt::Display for InputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Relay outputs driven by the interlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayLine {
    DirectionA,
    DirectionB,
    Common,
    Discharge,
}

impl RelayLine {
    pub const ALL: [RelayLine; 4] = [
        RelayLine::DirectionA,
        RelayLine::DirectionB,
        RelayLine::Common,
        RelayLine::Discharge,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            RelayLine::DirectionA => "direction_a",
            RelayLine::DirectionB => "direction_b",
            RelayLine::Common => "common",
            RelayLine::Discharge => "discharge",
        }
    }
}

impl fmt::Display for RelayLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Digital I/O owned by the interlock loop.
///
/// Levels are logical: `true` means asserted, whatever the electrical
/// polarity of the pin is.
pub trait SpindleIo: Send {
    fn read_input(&self, line: InputLine) -> bool;
    /// Actual level of the relay pin, not the last commanded one.
    fn read_relay(&self, relay: RelayLine) -> bool;
    fn write_relay(&mut self, relay: RelayLine, level: bool);
    fn set_interrupt_enabled(&mut self, line: InputLine, enabled: bool);
    fn interrupt_enabled(&self, line: InputLine) -> bool;
}

/// Read access to the rotation sensor from the capture context.
pub trait PulseLine: Send + Sync {
    fn level(&self) -> bool;
}

pub trait Delay: Send {
    fn delay(&mut self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
