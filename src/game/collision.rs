//! Pickup Resolution
//!
//! Decides who collects each item. Contested items go to the lowest
//! participant id, independent of the order anything was inserted in.

use crate::core::fixed::{Fixed, fixed_mul};
use crate::core::vec2::FixedVec2;
use crate::game::input::ParticipantId;
use crate::game::state::SimulationState;

/// Whether `point` lies within `radius` of `center` (boundary inclusive).
#[inline]
pub fn within_radius(center: FixedVec2, point: FixedVec2, radius: Fixed) -> bool {
    center.distance_squared(point) <= fixed_mul(radius, radius)
}

/// A resolved pickup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pickup {
    /// Winning participant
    pub participant: ParticipantId,
    /// Item collected
    pub item_id: u32,
}

/// Active participant with the lowest id inside the capture radius of a point.
pub fn pickup_winner(state: &SimulationState, item_position: FixedVec2, radius: Fixed) -> Option<ParticipantId> {
    // BTreeMap iterates in ascending id order, so the first hit is the winner.
    state
        .participants
        .values()
        .find(|p| p.is_active() && within_radius(item_position, p.position, radius))
        .map(|p| p.id)
}

/// Resolve every item in ascending item id order.
///
/// Each item appears at most once in the result.
pub fn resolve_pickups(state: &SimulationState, radius: Fixed) -> Vec<Pickup> {
    state
        .items
        .values()
        .filter_map(|item| {
            pickup_winner(state, item.position, radius).map(|participant| Pickup {
                participant,
                item_id: item.id,
            })
        })
        .collect()
}
