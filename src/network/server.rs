//! WebSocket Server
//!
//! Accepts connections, seats each one in a room and routes client messages
//! into it. Every room ticks in its own task.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::game::input::ParticipantId;
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::room::{poll_interval, server_time_ms, Room, RoomConfig, RoomError, RoomId, RoomManager};
use crate::network::sequencer::SubmitOutcome;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-connection outbound queue length.
    pub outbound_capacity: usize,
    /// Parameters for new rooms.
    pub room: RoomConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            outbound_capacity: 256,
            room: RoomConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,

    /// Room error.
    #[error("Room error: {0}")]
    Room(#[from] RoomError),
}

/// Connected client state.
struct ConnectedClient {
    /// Seat, once joined.
    seat: Option<(RoomId, ParticipantId)>,
    /// Connection time.
    connected_at: Instant,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Live rooms.
    rooms: Arc<RoomManager>,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            rooms: Arc::new(RoomManager::new(config.room.clone())),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            config,
            shutdown_tx,
        }
    }

    /// Room registry.
    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Sender that stops the server when signalled.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Stop accepting, notify every client and close every room.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the configured address and run until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run on an already bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!(addr = %listener.local_addr()?, version = %self.config.version, "Game server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!(%addr, "Connection limit reached, rejecting");
                                continue;
                            }

                            info!(%addr, "New connection");
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.rooms.shutdown("Server shutting down").await;
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let rooms = self.rooms.clone();
        let capacity = self.config.outbound_capacity.max(1);
        let shutdown_tx = self.shutdown_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!(%addr, "WebSocket handshake failed: {}", e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(capacity);

            clients.write().await.insert(addr, ConnectedClient {
                seat: None,
                connected_at: Instant::now(),
            });

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            // Seat the client
            let (room, pid, start_loop) = match rooms.join(msg_tx.clone(), Instant::now()).await {
                Ok(seat) => seat,
                Err(e) => {
                    warn!(%addr, "Could not join room: {}", e);
                    clients.write().await.remove(&addr);
                    return;
                }
            };
            let room_id = room.read().await.id();
            if start_loop {
                let room = room.clone();
                let shutdown_rx = shutdown_tx.subscribe();
                tokio::spawn(async move {
                    Self::run_room_loop(room, shutdown_rx).await;
                });
            }
            if let Some(client) = clients.write().await.get_mut(&addr) {
                client.seat = Some((room_id, pid));
            }

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!(%addr, "Invalid message: {}", e);
                                        continue;
                                    }
                                };

                                if !Self::handle_client_message(pid, client_msg, &room, &msg_tx).await {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!(%addr, "Client disconnected");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!(%addr, "WebSocket error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.try_send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        });
                        break;
                    }
                }
            }

            // Cleanup
            if rooms.leave(&room, pid).await {
                debug!(%addr, room = %room_id, "Last participant left, room removed");
            }

            // The room held the only other sender; dropping ours lets the
            // writer flush and finish.
            drop(msg_tx);
            if tokio::time::timeout(Duration::from_secs(1), sender_task).await.is_err() {
                debug!(%addr, "Writer did not finish in time");
            }

            if let Some(client) = clients.write().await.remove(&addr) {
                info!(
                    %addr,
                    %pid,
                    connected_for = ?client.connected_at.elapsed(),
                    "Client cleaned up"
                );
            }
        });
    }

    /// Handle a client message. Returns false when the connection should end.
    async fn handle_client_message(
        pid: ParticipantId,
        msg: ClientMessage,
        room: &Arc<RwLock<Room>>,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> bool {
        match msg {
            ClientMessage::Input { tick, input } => {
                let outcome = room.write().await.submit(pid, tick, input);
                if outcome != SubmitOutcome::Accepted {
                    trace!(%pid, tick, ?outcome, "Input not accepted");
                }
            }
            ClientMessage::SyncRequest => {
                if let Err(e) = room.write().await.send_sync(pid) {
                    warn!(%pid, "Sync reply failed: {}", e);
                }
            }
            ClientMessage::Ping { timestamp } => {
                let _ = sender.try_send(ServerMessage::Pong {
                    timestamp,
                    server_time: server_time_ms(),
                });
            }
            ClientMessage::Leave => {
                debug!(%pid, "Participant leaving");
                return false;
            }
        }
        true
    }

    /// Close ticks for one room until it is closed or the server stops.
    async fn run_room_loop(room: Arc<RwLock<Room>>, mut shutdown_rx: broadcast::Receiver<()>) {
        let (room_id, period) = {
            let room = room.read().await;
            (room.id(), poll_interval(room.config()))
        };

        let mut tick_interval = interval(period);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    let mut room = room.write().await;
                    if room.is_closed() {
                        break;
                    }
                    room.poll(Instant::now());
                }
                _ = shutdown_rx.recv() => {
                    room.write().await.close("Server shutting down");
                    break;
                }
            }
        }

        debug!(room = %room_id, "Room loop ended");
    }
}
