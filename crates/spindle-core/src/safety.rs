use crate::interlock::{Direction, EnergizedState};
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Clone, Copy)]
pub struct Requested;

#[derive(Debug, Clone, Copy)]
pub struct Authorized;

/// A direction change on its way to the relays. Only the `Authorized` form
/// can be applied.
#[derive(Debug, Clone, Copy)]
pub struct DirectionCommand<State = Requested> {
    direction: Direction,
    _state: PhantomData<State>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InterlockViolation {
    #[error("direction relays locked while engine is {state:?}")]
    Energized { state: EnergizedState },
    #[error("direction relays locked during emergency stop")]
    EmergencyActive,
}

impl DirectionCommand<Requested> {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            _state: PhantomData,
        }
    }

    /// Direction relays may only move while the engine is fully
    /// de-energized and no emergency stop is active.
    pub fn authorize(
        self,
        energized: EnergizedState,
        emergency: bool,
    ) -> Result<DirectionCommand<Authorized>, InterlockViolation> {
        if emergency {
            return Err(InterlockViolation::EmergencyActive);
        }
        if energized != EnergizedState::DeEnergized {
            return Err(InterlockViolation::Energized { state: energized });
        }
        Ok(DirectionCommand {
            direction: self.direction,
            _state: PhantomData,
        })
    }
}

impl<State> DirectionCommand<State> {
    pub fn direction(&self) -> Direction {
        self.direction
    }
}
