//! Network Layer
//!
//! WebSocket server, rooms and the client transport.
//! This layer is **non-deterministic** - all simulation runs through `game/`.

pub mod protocol;
pub mod sequencer;
pub mod room;
pub mod server;
pub mod client;

pub use protocol::{ClientMessage, ServerMessage, WelcomeInfo, ProtocolParams, EncodedState, ProtocolError};
pub use sequencer::{TickSequencer, SequencerConfig, SequencerPhase, SubmitOutcome};
pub use room::{Room, RoomConfig, RoomError, RoomId, RoomManager};
pub use server::{GameServer, ServerConfig, GameServerError};
pub use client::{NetClient, ClientError, PumpStats, Welcome};
