//! Settings files.
//!
//! JSON documents where every field is optional; missing fields take the
//! defaults below. Binaries load one with `--config` and apply flag
//! overrides on top.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Serialize, Deserialize};

use crate::game::tick::ArenaConfig;
use crate::network::room::RoomConfig;
use crate::network::sequencer::SequencerConfig;
use crate::network::server::ServerConfig;
use crate::sync::session::{SyncConfig, SyncError};

/// Settings errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Cannot read {path}: {source}")]
    Io {
        /// File
        path: PathBuf,
        /// Cause
        source: std::io::Error,
    },

    /// Not valid JSON for the settings type
    #[error("Invalid settings: {0}")]
    Parse(#[from] serde_json::Error),

    /// Bind address does not parse
    #[error("Invalid bind address {0:?}")]
    BindAddr(String),

    /// Values out of range
    #[error("{0}")]
    Invalid(String),

    /// Client sync parameters rejected
    #[error(transparent)]
    Sync(#[from] SyncError),
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })
}

// =============================================================================
// SERVER
// =============================================================================

/// Server settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listen address
    pub bind: String,
    /// Connection cap
    pub max_connections: usize,
    /// Per-connection outbound queue length
    pub outbound_capacity: usize,
    /// Milliseconds per tick
    pub tick_ms: u64,
    /// Participants needed before a room ticks (0 = always)
    pub min_participants: usize,
    /// Participants per room
    pub max_participants: usize,
    /// Furthest future tick accepted for input
    pub max_input_lead: u32,
    /// Closed bundles kept per room
    pub history: u32,
    /// Delay announced to clients
    pub playback_delay: u32,
    /// Input lead announced to clients
    pub input_lead: u32,
    /// Simulation rules
    pub arena: ArenaConfig,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            max_connections: 1000,
            outbound_capacity: 256,
            tick_ms: crate::DEFAULT_TICK_MS,
            min_participants: 1,
            max_participants: 16,
            max_input_lead: 32,
            history: 256,
            playback_delay: 2,
            input_lead: 2,
            arena: ArenaConfig::default(),
        }
    }
}

impl ServerSettings {
    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&read(path.as_ref())?)
    }

    /// Parse from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::Invalid("tick_ms must be positive".into()));
        }
        if self.max_participants == 0 {
            return Err(ConfigError::Invalid("max_participants must be positive".into()));
        }
        if self.input_lead > self.max_input_lead {
            return Err(ConfigError::Invalid(format!(
                "input_lead ({}) exceeds max_input_lead ({})",
                self.input_lead, self.max_input_lead
            )));
        }
        self.bind_addr().map(|_| ())
    }

    /// Parsed listen address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind.parse().map_err(|_| ConfigError::BindAddr(self.bind.clone()))
    }

    /// Per-room parameters.
    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            sequencer: SequencerConfig {
                tick_duration: Duration::from_millis(self.tick_ms),
                min_participants: self.min_participants,
                max_input_lead: self.max_input_lead,
                history: self.history,
            },
            arena: self.arena.clone(),
            playback_delay: self.playback_delay,
            input_lead: self.input_lead,
            max_participants: self.max_participants,
        }
    }

    /// Full server configuration.
    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        Ok(ServerConfig {
            bind_addr: self.bind_addr()?,
            max_connections: self.max_connections,
            outbound_capacity: self.outbound_capacity,
            room: self.room_config(),
            ..ServerConfig::default()
        })
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Client settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Server URL
    pub url: String,
    /// Presentation frame interval in milliseconds
    pub frame_ms: u64,
    /// Ping interval in milliseconds (0 = never)
    pub ping_interval_ms: u64,
    /// Synchronization parameters; timing is replaced by the server's
    pub sync: SyncConfig,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            frame_ms: 16,
            ping_interval_ms: 1000,
            sync: SyncConfig::default(),
        }
    }
}

impl ClientSettings {
    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&read(path.as_ref())?)
    }

    /// Parse from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_ms == 0 {
            return Err(ConfigError::Invalid("frame_ms must be positive".into()));
        }
        Ok(self.sync.validate()?)
    }

    /// Frame interval.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_ms)
    }

    /// Ping interval, if enabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_ms > 0).then(|| Duration::from_millis(self.ping_interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::prediction::PredictionMode;

    #[test]
    fn test_empty_document_is_defaults() {
        assert_eq!(ServerSettings::from_json("{}").unwrap(), ServerSettings::default());
        assert_eq!(ClientSettings::from_json("{}").unwrap(), ClientSettings::default());
    }

    #[test]
    fn test_partial_server_settings() {
        let settings = ServerSettings::from_json(r#"{"tick_ms": 20, "arena": {"bump_damage": 1}}"#).unwrap();
        assert_eq!(settings.tick_ms, 20);
        assert_eq!(settings.arena.bump_damage, 1);
        assert_eq!(settings.arena.half_extent, ArenaConfig::default().half_extent);

        let room = settings.room_config();
        assert_eq!(room.sequencer.tick_duration, Duration::from_millis(20));
        assert_eq!(room.params().tick_ms, 20);
    }

    #[test]
    fn test_partial_client_settings() {
        let settings =
            ClientSettings::from_json(r#"{"url": "ws://example:9000", "sync": {"prediction": "neutral"}}"#).unwrap();
        assert_eq!(settings.url, "ws://example:9000");
        assert_eq!(settings.sync.prediction, PredictionMode::Neutral);
        assert_eq!(settings.sync.history, SyncConfig::default().history);
    }

    #[test]
    fn test_invalid_settings() {
        assert!(matches!(ServerSettings::from_json(r#"{"tick_ms": 0}"#), Err(ConfigError::Invalid(_))));
        assert!(matches!(ServerSettings::from_json(r#"{"bind": "nowhere"}"#), Err(ConfigError::BindAddr(_))));
        assert!(matches!(ServerSettings::from_json("[1, 2]"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            ClientSettings::from_json(r#"{"sync": {"history": 4, "max_prediction": 8}}"#),
            Err(ConfigError::Sync(SyncError::InvalidConfig(_)))
        ));
    }

    #[test]
    fn test_server_config_conversion() {
        let settings = ServerSettings { bind: "127.0.0.1:9001".into(), ..Default::default() };
        let config = settings.server_config().unwrap();
        assert_eq!(config.bind_addr.port(), 9001);
        assert_eq!(config.room.max_participants, 16);
    }

    #[test]
    fn test_missing_file() {
        let err = ServerSettings::load("/nonexistent/ticksync.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
