//! WebSocket Client
//!
//! Connects to a server, waits for `welcome`, then runs reader and writer
//! tasks behind `mpsc` queues. The frame loop drains the queues once per
//! frame with [`NetClient::pump`], so server messages reach the session only
//! between frames.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::game::input::{ParticipantId, Tick};
use crate::game::state::SimulationState;
use crate::game::tick::ArenaSimulation;
use crate::network::protocol::{ClientMessage, ProtocolError, ProtocolParams, ServerMessage};
use crate::sync::session::{ClientSession, Inbound, Outbound, SyncConfig, SyncError};

/// How long to wait for `welcome` after connecting.
pub const WELCOME_TIMEOUT: Duration = Duration::from_secs(5);

/// Client transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Could not connect or the socket failed
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Undecodable payload
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// First message was not `welcome`
    #[error("Expected welcome, got {0}")]
    UnexpectedGreeting(String),

    /// No `welcome` within the timeout
    #[error("Timed out waiting for welcome")]
    WelcomeTimeout,

    /// Connection is gone
    #[error("Connection closed")]
    Closed,

    /// Session could not be built
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Decoded greeting.
#[derive(Debug, Clone)]
pub struct Welcome {
    /// Assigned participant id
    pub participant: ParticipantId,
    /// Room id
    pub room: String,
    /// Server timing
    pub params: ProtocolParams,
    /// Tick of `state`
    pub tick: Tick,
    /// Room state at `tick`
    pub state: SimulationState,
}

/// What a pump moved.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PumpStats {
    /// Messages queued into the session
    pub received: usize,
    /// Messages handed to the writer
    pub sent: usize,
    /// Latest round trip in milliseconds
    pub rtt_ms: Option<u64>,
    /// Set when the server announced shutdown
    pub shutdown: Option<String>,
}

/// Convert a server message into session input. Messages the session does
/// not consume map to `None`.
pub fn to_inbound(message: ServerMessage) -> Result<Option<Inbound<SimulationState>>, ProtocolError> {
    Ok(match message {
        ServerMessage::Tick { tick, inputs, state_hash } => Some(Inbound::Confirmed {
            tick,
            bundle: inputs,
            checksum: Some(state_hash),
        }),
        ServerMessage::Sync { tick, state } => Some(Inbound::Authoritative {
            tick,
            state: state.decode()?,
        }),
        ServerMessage::Welcome(_) | ServerMessage::Pong { .. } | ServerMessage::Shutdown { .. } => None,
    })
}

/// Overlay the server's timing on a local config and check the result.
pub fn apply_params(base: &SyncConfig, params: &ProtocolParams) -> Result<SyncConfig, ClientError> {
    let config = SyncConfig {
        tick_ms: params.tick_ms,
        playback_delay: params.playback_delay,
        input_lead: params.input_lead,
        ..base.clone()
    };
    config.validate()?;
    Ok(config)
}

/// Convert a session request into a wire message.
pub fn to_client_message(outbound: Outbound) -> ClientMessage {
    match outbound {
        Outbound::SubmitInput { tick, input } => ClientMessage::Input { tick, input },
        Outbound::SyncRequest => ClientMessage::SyncRequest,
    }
}

/// Connected client.
pub struct NetClient {
    welcome: Welcome,
    outbound: mpsc::Sender<ClientMessage>,
    inbound: mpsc::Receiver<ServerMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    started: tokio::time::Instant,
}

impl NetClient {
    /// Connect and wait for `welcome`.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        info!(url, "Connecting");
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let greeting = tokio::time::timeout(WELCOME_TIMEOUT, async {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return ServerMessage::from_json(&text).map_err(ClientError::from)
                    }
                    Some(Ok(Message::Close(_))) | None => return Err(ClientError::Closed),
                    Some(Err(e)) => return Err(ClientError::from(e)),
                    _ => {}
                }
            }
        })
        .await
        .map_err(|_| ClientError::WelcomeTimeout)??;

        let welcome = match greeting {
            ServerMessage::Welcome(info) => Welcome {
                participant: info.participant,
                room: info.room,
                params: info.params,
                tick: info.tick,
                state: info.state.decode()?,
            },
            other => return Err(ClientError::UnexpectedGreeting(format!("{other:?}"))),
        };
        info!(
            participant = %welcome.participant,
            room = %welcome.room,
            tick = welcome.tick,
            "Joined room"
        );

        let (inbound_tx, inbound_rx) = mpsc::channel::<ServerMessage>(1024);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(256);

        let reader = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                        Ok(message) => {
                            if inbound_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!("Dropping malformed server message: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        debug!("Server closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!("WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!("Failed to send message: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        Ok(Self {
            welcome,
            outbound: outbound_tx,
            inbound: inbound_rx,
            reader,
            writer,
            started: tokio::time::Instant::now(),
        })
    }

    /// The greeting.
    pub fn welcome(&self) -> &Welcome {
        &self.welcome
    }

    /// `base` with the server's timing applied.
    pub fn sync_config(&self, base: &SyncConfig) -> Result<SyncConfig, ClientError> {
        apply_params(base, &self.welcome.params)
    }

    /// Build a session starting from the greeting state.
    pub fn session(&self, sim: ArenaSimulation, base: &SyncConfig) -> Result<ClientSession<ArenaSimulation>, ClientError> {
        Ok(ClientSession::new(
            sim,
            self.sync_config(base)?,
            self.welcome.participant,
            self.welcome.tick,
            self.welcome.state.clone(),
        )?)
    }

    /// Queue a message without waiting.
    pub fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        match self.outbound.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(message)) => {
                warn!(?message, "Outbound queue full, message dropped");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(ClientError::Closed),
        }
    }

    /// Send a ping stamped with the client clock.
    pub fn ping(&self) -> Result<(), ClientError> {
        self.send(ClientMessage::Ping { timestamp: self.started.elapsed().as_millis() as u64 })
    }

    /// Move queued server messages into the session and the session's
    /// requests onto the wire.
    pub fn pump(&mut self, session: &mut ClientSession<ArenaSimulation>) -> Result<PumpStats, ClientError> {
        let mut stats = PumpStats::default();

        loop {
            match self.inbound.try_recv() {
                Ok(ServerMessage::Pong { timestamp, .. }) => {
                    let now = self.started.elapsed().as_millis() as u64;
                    stats.rtt_ms = Some(now.saturating_sub(timestamp));
                }
                Ok(ServerMessage::Shutdown { reason }) => {
                    info!(%reason, "Server shutting down");
                    stats.shutdown = Some(reason);
                }
                Ok(message) => match to_inbound(message) {
                    Ok(Some(inbound)) => {
                        session.enqueue(inbound);
                        stats.received += 1;
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Dropping undecodable server state: {}", e),
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if stats.received == 0 && stats.shutdown.is_none() {
                        return Err(ClientError::Closed);
                    }
                    break;
                }
            }
        }

        if stats.shutdown.is_some() {
            return Ok(stats);
        }
        for outbound in session.drain_outbound() {
            self.send(to_client_message(outbound))?;
            stats.sent += 1;
        }
        Ok(stats)
    }

    /// Say goodbye and wait briefly for the writer to flush.
    pub async fn close(self) {
        let _ = self.outbound.try_send(ClientMessage::Leave);
        drop(self.outbound);
        if tokio::time::timeout(Duration::from_secs(1), self.writer).await.is_err() {
            debug!("Writer did not finish in time");
        }
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::input::{Input, InputBundle};
    use crate::network::protocol::EncodedState;

    #[test]
    fn test_tick_becomes_confirmation() {
        let inputs = InputBundle::new().with(ParticipantId(1), Input::new(1, 0));
        let inbound = to_inbound(ServerMessage::Tick { tick: 4, inputs: inputs.clone(), state_hash: [3; 32] })
            .unwrap()
            .unwrap();
        match inbound {
            Inbound::Confirmed { tick, bundle, checksum } => {
                assert_eq!(tick, 4);
                assert_eq!(bundle, inputs);
                assert_eq!(checksum, Some([3; 32]));
            }
            other => panic!("Wrong inbound: {other:?}"),
        }
    }

    #[test]
    fn test_sync_becomes_authoritative() {
        let state = SimulationState::new(5);
        let message = ServerMessage::Sync { tick: 0, state: EncodedState::encode(&state).unwrap() };
        match to_inbound(message).unwrap() {
            Some(Inbound::Authoritative { tick, state: decoded }) => {
                assert_eq!(tick, 0);
                assert_eq!(decoded, state);
            }
            other => panic!("Wrong inbound: {other:?}"),
        }
    }

    #[test]
    fn test_control_messages_are_not_session_input() {
        assert!(to_inbound(ServerMessage::Shutdown { reason: "bye".into() }).unwrap().is_none());
        assert!(to_inbound(ServerMessage::Pong { timestamp: 1, server_time: 2 }).unwrap().is_none());
    }

    #[test]
    fn test_server_params_are_validated() {
        let base = SyncConfig::default();
        let params = ProtocolParams { tick_ms: 20, playback_delay: 2, input_lead: 2 };
        let applied = apply_params(&base, &params).unwrap();
        assert_eq!(applied.tick_ms, 20);
        assert_eq!(applied.playback_delay, 2);
        assert_eq!(applied.history, base.history);

        let reaching = ProtocolParams { playback_delay: base.history, ..params };
        assert!(matches!(
            apply_params(&base, &reaching),
            Err(ClientError::Sync(SyncError::InvalidConfig(_)))
        ));
    }

    #[test]
    fn test_outbound_mapping() {
        assert_eq!(
            to_client_message(Outbound::SubmitInput { tick: 9, input: Input::new(0, -1) }),
            ClientMessage::Input { tick: 9, input: Input::new(0, -1) }
        );
        assert_eq!(to_client_message(Outbound::SyncRequest), ClientMessage::SyncRequest);
    }
}
