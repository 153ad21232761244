//! Rooms
//!
//! A room is one match: a tick sequencer, the connected participants and the
//! authoritative simulation state. The server runs every closed tick through
//! the same step function the clients use and sends the bundle with the
//! resulting state hash to every participant.
//!
//! Each participant has a delivery cursor. A full outbound queue pauses that
//! participant's stream; later polls resume it from the sequencer's retained
//! history, and a participant that falls out of the history gets the full
//! state instead. Nobody ever sees a gap in the confirmed ticks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::hash::{short_hex, StateHash};
use crate::core::rng::derive_room_seed;
use crate::game::input::{Input, ParticipantId, Tick};
use crate::game::state::SimulationState;
use crate::game::tick::{ArenaConfig, ArenaSimulation, StepFunction};
use crate::network::protocol::{EncodedState, ProtocolError, ProtocolParams, ServerMessage, WelcomeInfo};
use crate::network::sequencer::{SequencerConfig, SequencerPhase, SubmitOutcome, TickSequencer};
use crate::sync::window::TickWindow;

/// Room identifier.
pub type RoomId = Uuid;

/// Per-room parameters.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Tick cadence and input acceptance
    pub sequencer: SequencerConfig,
    /// Simulation rules
    pub arena: ArenaConfig,
    /// Ticks clients are told to trail the server by
    pub playback_delay: u32,
    /// How far ahead clients are told to submit input
    pub input_lead: u32,
    /// Participants allowed at once
    pub max_participants: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            sequencer: SequencerConfig::default(),
            arena: ArenaConfig::default(),
            playback_delay: 2,
            input_lead: 2,
            max_participants: 16,
        }
    }
}

impl RoomConfig {
    /// Timing announced in `welcome`.
    pub fn params(&self) -> ProtocolParams {
        ProtocolParams {
            tick_ms: self.sequencer.tick_duration.as_millis() as u64,
            playback_delay: self.playback_delay,
            input_lead: self.input_lead,
        }
    }
}

/// Room errors.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// No free slot
    #[error("Room is full")]
    Full,

    /// Room was torn down
    #[error("Room is closed")]
    Closed,

    /// Participant not in this room
    #[error("Unknown participant {0}")]
    UnknownParticipant(ParticipantId),

    /// Participant's outbound queue is gone or full
    #[error("Participant {0} is unreachable")]
    Unreachable(ParticipantId),

    /// State could not be encoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

struct Member {
    sender: mpsc::Sender<ServerMessage>,
    /// Next tick this participant has not been sent
    next: Tick,
    /// Times delivery stalled on a full queue
    dropped: u64,
}

/// One match.
pub struct Room {
    id: RoomId,
    config: RoomConfig,
    seed: u64,
    /// Next participant id to hand out; ids are never reused
    next_participant: u32,
    members: BTreeMap<ParticipantId, Member>,
    sequencer: TickSequencer,
    /// State hash after each retained tick
    hashes: TickWindow<StateHash>,
    sim: ArenaSimulation,
    state: SimulationState,
    /// Set once a task polls this room
    driven: bool,
}

impl Room {
    /// Create a room. The simulation seed is derived from the room id.
    pub fn new(id: RoomId, config: RoomConfig) -> Self {
        let seed = derive_room_seed(id.as_bytes());
        info!(room = %id, seed, "Room created");

        Self {
            id,
            seed,
            next_participant: 1,
            members: BTreeMap::new(),
            sequencer: TickSequencer::new(config.sequencer.clone(), 0),
            hashes: TickWindow::new(config.sequencer.history),
            sim: ArenaSimulation::new(config.arena.clone()),
            state: SimulationState::new(seed),
            driven: false,
            config,
        }
    }

    /// Room id.
    pub fn id(&self) -> RoomId {
        self.id
    }

    /// Simulation seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Last closed tick.
    pub fn tick(&self) -> Tick {
        self.sequencer.current_tick()
    }

    /// Authoritative state at [`tick`](Self::tick).
    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Parameters.
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Connected participants.
    pub fn participant_count(&self) -> usize {
        self.members.len()
    }

    /// True when nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// True once torn down.
    pub fn is_closed(&self) -> bool {
        self.sequencer.phase() == SequencerPhase::Closed
    }

    /// True if another participant can join.
    pub fn has_capacity(&self) -> bool {
        !self.is_closed() && self.members.len() < self.config.max_participants
    }

    /// True the first time it is called. Whoever gets true runs the tick loop.
    pub fn claim_driver(&mut self) -> bool {
        !std::mem::replace(&mut self.driven, true)
    }

    /// Admit a participant and send them `welcome` before any tick.
    pub fn join(&mut self, sender: mpsc::Sender<ServerMessage>, now: Instant) -> Result<ParticipantId, RoomError> {
        if self.is_closed() {
            return Err(RoomError::Closed);
        }
        if self.members.len() >= self.config.max_participants {
            return Err(RoomError::Full);
        }

        let pid = ParticipantId(self.next_participant);
        let welcome = ServerMessage::Welcome(WelcomeInfo {
            participant: pid,
            room: self.id.to_string(),
            params: self.config.params(),
            tick: self.tick(),
            state: EncodedState::encode(&self.state)?,
        });
        sender.try_send(welcome).map_err(|_| RoomError::Unreachable(pid))?;

        self.next_participant += 1;
        self.sequencer.join(pid, now);
        let next = self.tick() + 1;
        self.members.insert(pid, Member { sender, next, dropped: 0 });

        info!(room = %self.id, %pid, tick = self.tick(), participants = self.participant_count(), "Participant joined");
        Ok(pid)
    }

    /// Remove a participant. Returns false if they were not here.
    pub fn leave(&mut self, pid: ParticipantId) -> bool {
        let Some(member) = self.members.remove(&pid) else {
            return false;
        };
        self.sequencer.leave(pid);
        info!(
            room = %self.id,
            %pid,
            dropped = member.dropped,
            participants = self.participant_count(),
            "Participant left"
        );
        true
    }

    /// Forward an input to the sequencer.
    pub fn submit(&mut self, pid: ParticipantId, tick: Tick, input: Input) -> SubmitOutcome {
        self.sequencer.submit(pid, tick, input)
    }

    /// Send the full state to one participant.
    pub fn send_sync(&mut self, pid: ParticipantId) -> Result<(), RoomError> {
        let tick = self.tick();
        let member = self.members.get_mut(&pid).ok_or(RoomError::UnknownParticipant(pid))?;
        let message = ServerMessage::sync(tick, &self.state)?;
        member.sender.try_send(message).map_err(|_| RoomError::Unreachable(pid))?;
        member.next = member.next.max(tick + 1);
        debug!(room = %self.id, %pid, tick, "Sent authoritative state");
        Ok(())
    }

    /// Close due ticks, advance the state and deliver every tick each
    /// participant has not been sent yet. Returns how many ticks closed.
    pub fn poll(&mut self, now: Instant) -> usize {
        let closed = self.sequencer.poll(now);
        let count = closed.len();

        for (tick, inputs) in closed {
            let (next, _events) = self.sim.step(&self.state, &inputs);
            self.state = next;
            debug_assert_eq!(self.state.tick, tick);

            let state_hash = self.state.compute_hash();
            debug!(room = %self.id, tick, hash = %short_hex(&state_hash), "Tick closed");
            self.hashes.insert(tick, state_hash);
            self.hashes.trim_to(tick);
        }

        self.deliver();
        count
    }

    /// Tell everyone the room is going away and stop ticking.
    pub fn close(&mut self, reason: &str) {
        if self.is_closed() {
            return;
        }
        self.broadcast(ServerMessage::Shutdown { reason: reason.to_string() });
        self.sequencer.close();
        info!(room = %self.id, tick = self.tick(), total_score = self.state.total_score(), reason, "Room closed");
    }

    /// Send each participant the ticks after its cursor, oldest first. A full
    /// queue stops that participant's stream until the next poll.
    fn deliver(&mut self) {
        let current = self.sequencer.current_tick();

        for (pid, member) in self.members.iter_mut() {
            if member.next > current {
                continue;
            }

            if self.sequencer.bundle(member.next).is_none() {
                let message = match ServerMessage::sync(current, &self.state) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(room = %self.id, %pid, "Failed to encode state: {}", e);
                        continue;
                    }
                };
                match member.sender.try_send(message) {
                    Ok(()) => {
                        info!(room = %self.id, %pid, from = member.next, to = current, "Participant behind history, sent state");
                        member.next = current + 1;
                    }
                    Err(TrySendError::Full(_)) => member.dropped += 1,
                    Err(TrySendError::Closed(_)) => {}
                }
                continue;
            }

            for (tick, inputs) in self.sequencer.bundles_since(member.next - 1) {
                let Some(state_hash) = self.hashes.get(tick).copied() else {
                    break;
                };
                match member.sender.try_send(ServerMessage::Tick { tick, inputs, state_hash }) {
                    Ok(()) => member.next = tick + 1,
                    Err(TrySendError::Full(_)) => {
                        member.dropped += 1;
                        warn!(
                            room = %self.id,
                            %pid,
                            behind = current + 1 - member.next,
                            dropped = member.dropped,
                            "Outbound queue full, delivery paused"
                        );
                        break;
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(room = %self.id, %pid, "Outbound queue closed");
                        break;
                    }
                }
            }
        }
    }

    /// Queue a message for every participant without waiting. A full or
    /// closed queue only affects its own participant.
    fn broadcast(&mut self, message: ServerMessage) {
        for (pid, member) in self.members.iter_mut() {
            match member.sender.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    member.dropped += 1;
                    warn!(room = %self.id, %pid, dropped = member.dropped, "Outbound queue full, message dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(room = %self.id, %pid, "Outbound queue closed");
                }
            }
        }
    }
}

// =============================================================================
// ROOM MANAGER
// =============================================================================

/// Joins tried before giving up on a busy registry.
const MAX_JOIN_ATTEMPTS: u32 = 4;

/// Owns every live room.
pub struct RoomManager {
    config: RoomConfig,
    rooms: RwLock<BTreeMap<RoomId, Arc<RwLock<Room>>>>,
}

impl RoomManager {
    /// Create an empty manager; new rooms use `config`.
    pub fn new(config: RoomConfig) -> Self {
        Self {
            config,
            rooms: RwLock::new(BTreeMap::new()),
        }
    }

    /// Parameters for new rooms.
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Create a new room.
    pub async fn create_room(&self) -> Arc<RwLock<Room>> {
        let id = Uuid::new_v4();
        let room = Arc::new(RwLock::new(Room::new(id, self.config.clone())));
        self.rooms.write().await.insert(id, room.clone());
        room
    }

    /// A room with a free slot, creating one if needed.
    pub async fn find_or_create(&self) -> Arc<RwLock<Room>> {
        {
            let rooms = self.rooms.read().await;
            for room in rooms.values() {
                if room.read().await.has_capacity() {
                    return room.clone();
                }
            }
        }
        self.create_room().await
    }

    /// Seat a participant. A room that fills up or closes between lookup and
    /// join is passed over. The flag is true when the caller must start the
    /// room's tick loop.
    pub async fn join(
        &self,
        sender: mpsc::Sender<ServerMessage>,
        now: Instant,
    ) -> Result<(Arc<RwLock<Room>>, ParticipantId, bool), RoomError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let room = self.find_or_create().await;
            let mut guard = room.write().await;
            match guard.join(sender.clone(), now) {
                Ok(pid) => {
                    let start_loop = guard.claim_driver();
                    drop(guard);
                    return Ok((room, pid, start_loop));
                }
                Err(RoomError::Closed | RoomError::Full) if attempts < MAX_JOIN_ATTEMPTS => {
                    debug!(room = %guard.id(), attempts, "Room unavailable, retrying join");
                }
                Err(e) => {
                    let abandoned = guard.is_empty().then(|| guard.id());
                    if abandoned.is_some() {
                        guard.close("Room empty");
                    }
                    drop(guard);
                    if let Some(id) = abandoned {
                        self.remove_room(&id).await;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Remove a participant. The last one out closes the room under the same
    /// lock, so a concurrent join sees it closed, then unregisters it.
    /// Returns true if the room was closed.
    pub async fn leave(&self, room: &Arc<RwLock<Room>>, pid: ParticipantId) -> bool {
        let (id, closed) = {
            let mut room = room.write().await;
            room.leave(pid);
            let closed = room.is_empty();
            if closed {
                room.close("Room empty");
            }
            (room.id(), closed)
        };
        if closed {
            self.remove_room(&id).await;
        }
        closed
    }

    /// Remove a room.
    pub async fn remove_room(&self, id: &RoomId) -> bool {
        self.rooms.write().await.remove(id).is_some()
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Close every room.
    pub async fn shutdown(&self, reason: &str) {
        let mut rooms = self.rooms.write().await;
        for room in rooms.values() {
            room.write().await.close(reason);
        }
        rooms.clear();
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new(RoomConfig::default())
    }
}

/// Milliseconds since the Unix epoch, for `pong`.
pub fn server_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Interval the room loop polls at.
pub fn poll_interval(config: &RoomConfig) -> Duration {
    config.sequencer.tick_duration.max(Duration::from_millis(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::FixedVec2;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn config() -> RoomConfig {
        RoomConfig {
            sequencer: SequencerConfig {
                tick_duration: ms(100),
                min_participants: 1,
                max_input_lead: 8,
                history: 32,
            },
            max_participants: 3,
            ..Default::default()
        }
    }

    fn room() -> Room {
        Room::new(Uuid::from_bytes([7; 16]), config())
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_are_never_reused() {
        let mut room = room();
        let t0 = Instant::now();
        let (tx, _rx) = mpsc::channel(16);

        assert_eq!(room.join(tx.clone(), t0).unwrap(), ParticipantId(1));
        assert_eq!(room.join(tx.clone(), t0).unwrap(), ParticipantId(2));
        assert!(room.leave(ParticipantId(2)));
        assert_eq!(room.join(tx, t0).unwrap(), ParticipantId(3));
    }

    #[tokio::test]
    async fn test_room_full() {
        let mut room = room();
        let t0 = Instant::now();
        let (tx, _rx) = mpsc::channel(16);
        for _ in 0..3 {
            room.join(tx.clone(), t0).unwrap();
        }
        assert!(matches!(room.join(tx, t0), Err(RoomError::Full)));
    }

    #[tokio::test]
    async fn test_welcome_carries_current_state() {
        let mut room = room();
        let (tx, mut rx) = mpsc::channel(16);
        let pid = room.join(tx, Instant::now()).unwrap();

        match rx.try_recv().unwrap() {
            ServerMessage::Welcome(info) => {
                assert_eq!(info.participant, pid);
                assert_eq!(info.tick, 0);
                assert_eq!(info.params.tick_ms, 100);
                assert_eq!(info.state.decode().unwrap(), *room.state());
            }
            other => panic!("Expected welcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_poll_advances_and_broadcasts() {
        let mut room = room();
        let t0 = Instant::now();
        let (tx, mut rx) = mpsc::channel(16);
        let pid = room.join(tx, t0).unwrap();
        drain(&mut rx);

        assert_eq!(room.submit(pid, 1, Input::new(1, 0)), SubmitOutcome::Accepted);
        assert_eq!(room.poll(t0 + ms(250)), 2);
        assert_eq!(room.tick(), 2);
        assert_eq!(
            room.state().position_of(pid),
            Some(SimulationState::spawn_point(pid) + FixedVec2::from_ints(2, 0))
        );

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        match &messages[1] {
            ServerMessage::Tick { tick, inputs, state_hash } => {
                assert_eq!(*tick, 2);
                assert_eq!(inputs.get(pid), Some(Input::new(1, 0)));
                assert_eq!(*state_hash, room.state().compute_hash());
            }
            other => panic!("Expected tick, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block_others() {
        let mut room = room();
        let t0 = Instant::now();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(16);
        room.join(slow_tx, t0).unwrap();
        room.join(fast_tx, t0).unwrap();
        drain(&mut fast_rx);

        assert_eq!(room.poll(t0 + ms(300)), 3);
        assert_eq!(drain(&mut fast_rx).len(), 3);
    }

    #[tokio::test]
    async fn test_sync_request_reply() {
        let mut room = room();
        let t0 = Instant::now();
        let (tx, mut rx) = mpsc::channel(16);
        let pid = room.join(tx, t0).unwrap();
        room.poll(t0 + ms(100));
        drain(&mut rx);

        room.send_sync(pid).unwrap();
        match rx.try_recv().unwrap() {
            ServerMessage::Sync { tick, state } => {
                assert_eq!(tick, 1);
                assert_eq!(state.decode().unwrap(), *room.state());
            }
            other => panic!("Expected sync, got {other:?}"),
        }
        assert!(matches!(room.send_sync(ParticipantId(99)), Err(RoomError::UnknownParticipant(_))));
    }

    #[tokio::test]
    async fn test_close_sends_shutdown() {
        let mut room = room();
        let (tx, mut rx) = mpsc::channel(16);
        room.join(tx.clone(), Instant::now()).unwrap();
        drain(&mut rx);

        room.close("maintenance");
        assert!(room.is_closed());
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Shutdown { .. }));
        assert!(matches!(room.join(tx, Instant::now()), Err(RoomError::Closed)));
    }

    fn ticks(messages: &[ServerMessage]) -> Vec<Tick> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Tick { tick, .. } => Some(*tick),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_full_queue_resumes_without_gaps() {
        let mut room = room();
        let t0 = Instant::now();
        let (tx, mut rx) = mpsc::channel(2);
        room.join(tx, t0).unwrap();
        drain(&mut rx);

        assert_eq!(room.poll(t0 + ms(300)), 3);
        let mut seen = ticks(&drain(&mut rx));
        assert_eq!(seen, vec![1, 2], "tick 3 waits for room in the queue");

        room.poll(t0 + ms(300));
        room.poll(t0 + ms(400));
        let messages = drain(&mut rx);
        seen.extend(ticks(&messages));
        assert_eq!(seen, vec![1, 2, 3, 4]);
        match messages.last() {
            Some(ServerMessage::Tick { state_hash, .. }) => assert_eq!(*state_hash, room.state().compute_hash()),
            other => panic!("Expected tick, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_member_behind_history_gets_state() {
        let mut config = config();
        config.sequencer.history = 4;
        let mut room = Room::new(Uuid::from_bytes([8; 16]), config);
        let t0 = Instant::now();
        let (tx, mut rx) = mpsc::channel(1);
        room.join(tx, t0).unwrap();
        drain(&mut rx);

        room.poll(t0 + ms(100));
        room.poll(t0 + ms(900));
        assert_eq!(ticks(&drain(&mut rx)), vec![1]);

        // Ticks 2..=5 are gone from the history.
        room.poll(t0 + ms(900));
        match rx.try_recv().unwrap() {
            ServerMessage::Sync { tick, state } => {
                assert_eq!(tick, 9);
                assert_eq!(state.decode().unwrap(), *room.state());
            }
            other => panic!("Expected sync, got {other:?}"),
        }

        room.poll(t0 + ms(1000));
        assert_eq!(ticks(&drain(&mut rx)), vec![10]);
    }

    #[tokio::test]
    async fn test_sync_reply_moves_delivery_cursor() {
        let mut room = room();
        let t0 = Instant::now();
        let (tx, mut rx) = mpsc::channel(16);
        let pid = room.join(tx, t0).unwrap();
        room.poll(t0 + ms(200));
        drain(&mut rx);

        room.send_sync(pid).unwrap();
        room.poll(t0 + ms(300));
        let messages = drain(&mut rx);
        assert!(matches!(messages[0], ServerMessage::Sync { tick: 2, .. }));
        assert_eq!(ticks(&messages), vec![3]);
    }

    #[tokio::test]
    async fn test_manager_reuses_rooms_and_removes_empty_ones() {
        let manager = RoomManager::new(config());
        let (tx, _rx) = mpsc::channel(16);

        let (first, p1, start_loop) = manager.join(tx.clone(), Instant::now()).await.unwrap();
        assert!(start_loop);
        let (second, p2, start_loop) = manager.join(tx.clone(), Instant::now()).await.unwrap();
        assert!(!start_loop, "one loop per room");
        assert_eq!(first.read().await.id(), second.read().await.id());
        assert_eq!(manager.room_count().await, 1);

        assert!(!manager.leave(&first, p1).await);
        assert!(manager.leave(&first, p2).await);
        assert!(first.read().await.is_closed());
        assert_eq!(manager.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_join_passes_over_closed_room() {
        let manager = RoomManager::new(config());
        let stale = manager.create_room().await;
        stale.write().await.close("Room empty");

        let (tx, mut rx) = mpsc::channel(16);
        let (room, pid, start_loop) = manager.join(tx, Instant::now()).await.unwrap();
        assert_ne!(room.read().await.id(), stale.read().await.id());
        assert_eq!(pid, ParticipantId(1));
        assert!(start_loop);
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Welcome(_)));
        assert!(matches!(stale.write().await.join(mpsc::channel(1).0, Instant::now()), Err(RoomError::Closed)));
    }

    #[tokio::test]
    async fn test_failed_first_join_unregisters_room() {
        let manager = RoomManager::new(config());
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        assert!(matches!(manager.join(tx, Instant::now()).await, Err(RoomError::Unreachable(_))));
        assert_eq!(manager.room_count().await, 0);
    }
}
