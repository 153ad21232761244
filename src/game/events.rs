//! Game Events
//!
//! Side-effect records produced by a step. Each event carries an [`EventId`]
//! derived only from the tick, the actor, the source object and the rule that
//! fired, so re-running a tick reproduces the same ids and a presentation
//! layer can tell a repeat from a new occurrence.

use serde::{Serialize, Deserialize};
use crate::core::vec2::FixedVec2;
use crate::game::input::{ParticipantId, Tick};

/// Rules in the order a step applies them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventRule {
    /// Participant entered the world
    Join = 0,
    /// Participant hit the arena boundary
    Boundary = 1,
    /// Participant collected an item
    Pickup = 2,
    /// World spawned an item
    ItemSpawn = 3,
}

/// What the event originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventSource {
    /// The participant's spawn point
    Spawn,
    /// The arena wall
    Boundary,
    /// A world item
    Item(u32),
}

/// Deterministic event identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId {
    /// Tick that produced the event
    pub tick: Tick,
    /// Participant that caused it; `None` for world events
    pub actor: Option<ParticipantId>,
    /// Originating object
    pub source: EventSource,
    /// Rule that fired
    pub rule: EventRule,
}

/// Event payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEventData {
    /// Participant spawned
    Joined {
        /// Spawn position
        position: FixedVec2,
    },
    /// Participant lost health against the boundary
    Damaged {
        /// Health removed
        amount: u32,
        /// Health left
        health: u32,
    },
    /// Participant picked up an item
    ItemCollected {
        /// Item id
        item_id: u32,
        /// Score gained
        value: u32,
        /// Score after pickup
        new_score: u32,
    },
    /// New item placed in the world
    ItemSpawned {
        /// Item id
        item_id: u32,
        /// Where it appeared
        position: FixedVec2,
    },
}

/// One event from one tick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Identity
    pub id: EventId,
    /// Payload
    pub data: GameEventData,
}

impl GameEvent {
    /// Participant joined.
    pub fn joined(tick: Tick, pid: ParticipantId, position: FixedVec2) -> Self {
        Self {
            id: EventId {
                tick,
                actor: Some(pid),
                source: EventSource::Spawn,
                rule: EventRule::Join,
            },
            data: GameEventData::Joined { position },
        }
    }

    /// Boundary damage.
    pub fn damaged(tick: Tick, pid: ParticipantId, amount: u32, health: u32) -> Self {
        Self {
            id: EventId {
                tick,
                actor: Some(pid),
                source: EventSource::Boundary,
                rule: EventRule::Boundary,
            },
            data: GameEventData::Damaged { amount, health },
        }
    }

    /// Item pickup.
    pub fn item_collected(tick: Tick, pid: ParticipantId, item_id: u32, value: u32, new_score: u32) -> Self {
        Self {
            id: EventId {
                tick,
                actor: Some(pid),
                source: EventSource::Item(item_id),
                rule: EventRule::Pickup,
            },
            data: GameEventData::ItemCollected { item_id, value, new_score },
        }
    }

    /// Item spawn.
    pub fn item_spawned(tick: Tick, item_id: u32, position: FixedVec2) -> Self {
        Self {
            id: EventId {
                tick,
                actor: None,
                source: EventSource::Item(item_id),
                rule: EventRule::ItemSpawn,
            },
            data: GameEventData::ItemSpawned { item_id, position },
        }
    }

    /// Ordering key: participant events by ascending id, world events last,
    /// then rule order, then source.
    fn order_key(&self) -> (bool, Option<ParticipantId>, EventRule, EventSource) {
        (self.id.actor.is_none(), self.id.actor, self.id.rule, self.id.source)
    }
}

/// Sort a tick's events into their canonical order.
pub fn sort_events(events: &mut [GameEvent]) {
    events.sort_by_key(|event| event.order_key());
}
