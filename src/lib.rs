//! # ticksync
//!
//! Deterministic tick synchronization for real-time multiplayer: an
//! authoritative server closes ticks and broadcasts each tick's inputs, and
//! every client runs the same step function locally, predicting ahead of
//! confirmation and rolling back when a prediction turns out wrong.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         TICKSYNC                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── fixed.rs    - Q16.16 fixed-point arithmetic             │
//! │  ├── vec2.rs     - 2D vector with fixed-point                │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  └── hash.rs     - State hashing for desync detection        │
//! │                                                              │
//! │  game/           - Step function (deterministic)             │
//! │  ├── input.rs    - Inputs and per-tick bundles               │
//! │  ├── state.rs    - Simulation state                          │
//! │  ├── tick.rs     - StepFunction trait and arena rules        │
//! │  ├── collision.rs- Pickup resolution                         │
//! │  ├── item.rs     - Item waves and collection                 │
//! │  └── events.rs   - Events with content-derived ids           │
//! │                                                              │
//! │  sync/           - Client core (deterministic, no I/O)       │
//! │  ├── ledger.rs   - Confirmed bundles                         │
//! │  ├── snapshot.rs - State snapshots                           │
//! │  ├── prediction.rs - Remote input prediction                 │
//! │  ├── reconcile.rs- Rollback and resimulation                 │
//! │  ├── catchup.rs  - Frame pacing, catch-up, hard resync       │
//! │  └── session.rs  - Frame-driven client session               │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── sequencer.rs- Authoritative tick clock                  │
//! │  ├── room.rs     - Rooms and room registry                   │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── client.rs   - WebSocket client adapter                  │
//! │  └── protocol.rs - Message types                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/`, `game/` and `sync/` modules are **fully deterministic**:
//! - No floating-point arithmetic in simulation logic
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No system time dependencies
//! - All randomness from the Xorshift128+ generator carried in the state
//!
//! Given the same initial state and the same bundles, every client reaches
//! **bit-identical states** and the same state hashes as the server.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod sync;
pub mod network;
pub mod config;

// Re-export commonly used types
pub use core::fixed::{Fixed, FIXED_ONE, FIXED_HALF, FIXED_SCALE};
pub use core::vec2::FixedVec2;
pub use core::rng::DeterministicRng;
pub use game::input::{Input, InputBundle, ParticipantId, Tick};
pub use game::state::SimulationState;
pub use game::tick::{ArenaConfig, ArenaSimulation, StepFunction};
pub use sync::session::{ClientSession, FrameReport, Inbound, Outbound, SyncConfig, SyncError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tick duration in milliseconds (20 Hz)
pub const DEFAULT_TICK_MS: u64 = 50;
