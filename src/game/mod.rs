//! Simulation Module
//!
//! Everything that runs inside a step. 100% deterministic.
//!
//! ## Module Structure
//!
//! - `input`: inputs, participant ids, per-tick bundles
//! - `state`: the world snapshot
//! - `tick`: the step function
//! - `collision`: pickup resolution
//! - `item`: item waves and collection
//! - `events`: side-effect records with deterministic identities

pub mod input;
pub mod state;
pub mod tick;
pub mod collision;
pub mod item;
pub mod events;

pub use input::{Input, InputBundle, ParticipantId, Tick};
pub use state::{SimulationState, ParticipantState, ItemState};
pub use tick::{ArenaConfig, ArenaSimulation, StepFunction, TickResult};
pub use events::{GameEvent, EventId};
