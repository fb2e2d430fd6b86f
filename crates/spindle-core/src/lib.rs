pub mod context;
pub mod control_loop;
pub mod hal;
#[cfg(feature = "simulation")]
pub mod hal_sim;
pub mod input;
pub mod interlock;
pub mod pulse;
pub mod rpm;
pub mod safety;
mod safety_proptest;
pub mod status;
pub mod sync;
pub mod tags;
pub mod timebase;

pub use context::{ContextError, SharedContext};
pub use control_loop::{
    ControlConfig, ExecutionStats, InterlockThread, PulsePoller, RpmThread, StatusRefreshThread,
};
pub use hal::{Delay, InputLine, PulseLine, RelayLine, SpindleIo, StdDelay};
#[cfg(feature = "simulation")]
pub use hal_sim::{EngineModel, SimDelay, SimHandle, SimPulseLine, SimulatedSpindle};
pub use input::{InputBank, InputChanges, InputLevels};
pub use interlock::{
    Direction, EnergizedState, Interlock, InterlockConfig, InterlockError, InterlockEvents,
    TransitionOutcome,
};
pub use pulse::{CaptureConfig, CaptureMode, PulseCapture, MAX_RPM_PULSES};
pub use rpm::{RpmConfig, RpmEstimate, RpmEstimator};
pub use safety::{Authorized, DirectionCommand, InterlockViolation, Requested};
pub use status::{DirtyFields, FanoutSink, LogStatusSink, StatusPublisher, StatusSink};
pub use sync::{ControllerSnapshot, EdgeSignal, StateExchange};
pub use timebase::{ManualClock, MonotonicCounter, TimeBase};
