//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a JSON text frame tagged by `type`. Full states travel as
//! hex-encoded bincode so they stay bit-exact through JSON.

use serde::{Serialize, Deserialize};

use crate::core::hash::StateHash;
use crate::game::input::{Input, InputBundle, ParticipantId, Tick};
use crate::game::state::{SimulationState, StateError};

/// Errors from encoding or decoding wire data.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not valid JSON or not a known message
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// State payload is not valid hex
    #[error("Bad state encoding: {0}")]
    Hex(#[from] hex::FromHexError),

    /// State payload did not decode
    #[error("Bad state payload: {0}")]
    State(#[from] StateError),
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Input to apply at a future tick.
    Input {
        /// Target tick
        tick: Tick,
        /// Held input; axes are clamped on arrival
        input: Input,
    },

    /// Request the full authoritative state.
    SyncRequest,

    /// Ping for latency measurement.
    Ping {
        /// Client clock, echoed back
        timestamp: u64,
    },

    /// Participant is leaving the room.
    Leave,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message on a connection.
    Welcome(WelcomeInfo),

    /// A closed tick with its final inputs.
    Tick {
        /// Closed tick
        tick: Tick,
        /// Final inputs for every active participant
        inputs: InputBundle,
        /// Server state hash after the tick
        #[serde(with = "hash_hex")]
        state_hash: StateHash,
    },

    /// Full authoritative state, in answer to `sync_request`.
    Sync {
        /// Tick the state is at
        tick: Tick,
        /// Encoded state
        state: EncodedState,
    },

    /// Pong response.
    Pong {
        /// Echoed client clock
        timestamp: u64,
        /// Server clock (ms since the Unix epoch)
        server_time: u64,
    },

    /// Server is shutting down.
    Shutdown {
        /// Reason shown to the user
        reason: String,
    },
}

/// Greeting with everything a client needs to start a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeInfo {
    /// Assigned participant id
    pub participant: ParticipantId,
    /// Room id
    pub room: String,
    /// Timing parameters
    pub params: ProtocolParams,
    /// Tick the included state is at
    pub tick: Tick,
    /// Room state at `tick`
    pub state: EncodedState,
}

/// Timing parameters the server announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
    /// Milliseconds per tick
    pub tick_ms: u64,
    /// Ticks the client should trail the server by
    pub playback_delay: u32,
    /// How far ahead of the newest tick clients submit input
    pub input_lead: u32,
}

/// Hex-encoded bincode of a [`SimulationState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedState(String);

impl EncodedState {
    /// Encode a state.
    pub fn encode(state: &SimulationState) -> Result<Self, ProtocolError> {
        Ok(Self(hex::encode(state.to_bytes()?)))
    }

    /// Decode back into a state.
    pub fn decode(&self) -> Result<SimulationState, ProtocolError> {
        let bytes = hex::decode(&self.0)?;
        Ok(SimulationState::from_bytes(&bytes)?)
    }

    /// Encoded length in characters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for an empty payload.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

mod hash_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::core::hash::StateHash;

    pub fn serialize<S: Serializer>(hash: &StateHash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StateHash, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        StateHash::try_from(bytes.as_slice())
            .map_err(|_| serde::de::Error::invalid_length(bytes.len(), &"32 bytes"))
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    /// `sync` message for a state.
    pub fn sync(tick: Tick, state: &SimulationState) -> Result<Self, ProtocolError> {
        Ok(ServerMessage::Sync { tick, state: EncodedState::encode(state)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_input_json_roundtrip() {
        let msg = ClientMessage::Input { tick: 100, input: Input::new(1, -1) };

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"input\""));
        assert_eq!(ClientMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_out_of_domain_input_is_clamped() {
        let parsed = ClientMessage::from_json(r#"{"type":"input","tick":5,"input":{"x":7,"y":-300}}"#).unwrap();
        assert_eq!(parsed, ClientMessage::Input { tick: 5, input: Input::new(1, -1) });

        let parsed = ClientMessage::from_json(r#"{"type":"input","tick":5,"input":{"y":1}}"#).unwrap();
        assert_eq!(parsed, ClientMessage::Input { tick: 5, input: Input::new(0, 1) });
    }

    #[test]
    fn test_unit_messages() {
        assert_eq!(ClientMessage::SyncRequest.to_json().unwrap(), r#"{"type":"sync_request"}"#);
        assert_eq!(ClientMessage::from_json(r#"{"type":"leave"}"#).unwrap(), ClientMessage::Leave);
    }

    #[test]
    fn test_malformed_messages_are_errors() {
        assert!(ClientMessage::from_json("not json").is_err());
        assert!(ClientMessage::from_json(r#"{"type":"teleport"}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"type":"input","input":{"x":1}}"#).is_err());
    }

    #[test]
    fn test_tick_message_roundtrip() {
        let inputs = InputBundle::new()
            .with(ParticipantId(2), Input::new(0, 1))
            .with(ParticipantId(1), Input::NEUTRAL);
        let msg = ServerMessage::Tick { tick: 9, inputs, state_hash: [0xab; 32] };

        let json = msg.to_json().unwrap();
        assert!(json.contains(&"ab".repeat(32)));
        assert_eq!(ServerMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_short_state_hash_rejected() {
        let json = r#"{"type":"tick","tick":1,"inputs":[],"state_hash":"abcd"}"#;
        assert!(ServerMessage::from_json(json).is_err());
    }

    #[test]
    fn test_welcome_carries_exact_state() {
        let mut state = SimulationState::new(42);
        state.add_participant(ParticipantId(1));
        state.add_participant(ParticipantId(3));

        let msg = ServerMessage::Welcome(WelcomeInfo {
            participant: ParticipantId(3),
            room: "room-1".into(),
            params: ProtocolParams { tick_ms: 50, playback_delay: 2, input_lead: 2 },
            tick: 0,
            state: EncodedState::encode(&state).unwrap(),
        });

        let json = msg.to_json().unwrap();
        match ServerMessage::from_json(&json).unwrap() {
            ServerMessage::Welcome(info) => {
                assert_eq!(info.participant, ParticipantId(3));
                let decoded = info.state.decode().unwrap();
                assert_eq!(decoded, state);
                assert_eq!(decoded.compute_hash(), state.compute_hash());
            }
            other => panic!("Wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_state_payload() {
        let bad = ServerMessage::from_json(r#"{"type":"sync","tick":1,"state":"zz"}"#).unwrap();
        match bad {
            ServerMessage::Sync { state, .. } => assert!(matches!(state.decode(), Err(ProtocolError::Hex(_)))),
            other => panic!("Wrong message type: {other:?}"),
        }
    }
}
