//! Inputs and Input Bundles
//!
//! An [`Input`] is a direction in {-1, 0, 1}² per participant per tick. An
//! [`InputBundle`] holds every participant's input for exactly one tick and
//! is what the server broadcasts and clients feed into the step function.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Serialize, Deserialize};
use crate::core::vec2::FixedVec2;

/// Discrete simulation step. Tick 0 is the initial state.
pub type Tick = u32;

// =============================================================================
// PARTICIPANT
// =============================================================================

/// Stable participant identifier, assigned by the room on connect.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u32);

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

// =============================================================================
// INPUT
// =============================================================================

/// Direction held by one participant for one tick.
///
/// Both axes are always in `-1..=1`. Construction and deserialization clamp
/// out-of-range values instead of rejecting them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "WireInput", into = "WireInput")]
pub struct Input {
    x: i8,
    y: i8,
}

impl Input {
    /// No movement.
    pub const NEUTRAL: Self = Self { x: 0, y: 0 };

    /// Create an input, clamping each axis into `-1..=1`.
    pub fn new(x: i64, y: i64) -> Self {
        Self {
            x: clamp_axis(x),
            y: clamp_axis(y),
        }
    }

    /// Horizontal axis.
    #[inline]
    pub fn x(&self) -> i8 {
        self.x
    }

    /// Vertical axis.
    #[inline]
    pub fn y(&self) -> i8 {
        self.y
    }

    /// True when no direction is held.
    #[inline]
    pub fn is_neutral(&self) -> bool {
        self.x == 0 && self.y == 0
    }

    /// Direction as a vector of unit steps.
    #[inline]
    pub fn direction(&self) -> FixedVec2 {
        FixedVec2::from_ints(self.x as i32, self.y as i32)
    }
}

#[inline]
fn clamp_axis(value: i64) -> i8 {
    value.clamp(-1, 1) as i8
}

/// Wire shape of [`Input`]; accepts any number per axis.
#[derive(Clone, Copy, Serialize, Deserialize)]
struct WireInput {
    #[serde(default, deserialize_with = "wire_axis")]
    x: i64,
    #[serde(default, deserialize_with = "wire_axis")]
    y: i64,
}

/// Integers of any size clamp; fractions round to the nearest step first.
struct AxisVisitor;

impl<'de> Visitor<'de> for AxisVisitor {
    type Value = i8;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number")
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<i8, E> {
        Ok(clamp_axis(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<i8, E> {
        Ok(clamp_axis(i64::try_from(value).unwrap_or(i64::MAX)))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<i8, E> {
        Ok(value.round().clamp(-1.0, 1.0) as i8)
    }
}

fn wire_axis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    deserializer.deserialize_i64(AxisVisitor).map(i64::from)
}

impl From<WireInput> for Input {
    fn from(wire: WireInput) -> Self {
        Input::new(wire.x, wire.y)
    }
}

impl From<Input> for WireInput {
    fn from(input: Input) -> Self {
        WireInput {
            x: input.x as i64,
            y: input.y as i64,
        }
    }
}

// =============================================================================
// INPUT BUNDLE
// =============================================================================

/// One entry of a bundle on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntry {
    /// Participant
    pub pid: ParticipantId,
    /// Input held for the tick
    pub input: Input,
}

/// Every participant's input for one tick, ordered by participant id.
///
/// Two bundles are equal iff they name the same participants with the same
/// inputs. Serializes as a list of `{pid, input}` entries; when a list names
/// a participant twice the later entry wins.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<BundleEntry>", into = "Vec<BundleEntry>")]
pub struct InputBundle {
    inputs: BTreeMap<ParticipantId, Input>,
}

impl InputBundle {
    /// Empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a participant's input, replacing any previous value.
    pub fn insert(&mut self, pid: ParticipantId, input: Input) {
        self.inputs.insert(pid, input);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, pid: ParticipantId, input: Input) -> Self {
        self.insert(pid, input);
        self
    }

    /// Explicit entry for a participant, if any.
    pub fn get(&self, pid: ParticipantId) -> Option<Input> {
        self.inputs.get(&pid).copied()
    }

    /// Input for a participant; missing participants are neutral.
    pub fn input_for(&self, pid: ParticipantId) -> Input {
        self.get(pid).unwrap_or(Input::NEUTRAL)
    }

    /// Whether the participant has an entry.
    pub fn contains(&self, pid: ParticipantId) -> bool {
        self.inputs.contains_key(&pid)
    }

    /// Entries in ascending participant order.
    pub fn iter(&self) -> impl Iterator<Item = (ParticipantId, Input)> + '_ {
        self.inputs.iter().map(|(pid, input)| (*pid, *input))
    }

    /// Participants in ascending order.
    pub fn participants(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.inputs.keys().copied()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// True if the bundle has no entries.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Participants whose entry differs between the two bundles, including
    /// participants present in only one of them.
    pub fn differing(&self, other: &InputBundle) -> Vec<ParticipantId> {
        let mut pids: Vec<ParticipantId> = self
            .participants()
            .chain(other.participants())
            .filter(|pid| self.get(*pid) != other.get(*pid))
            .collect();
        pids.sort();
        pids.dedup();
        pids
    }
}

impl From<Vec<BundleEntry>> for InputBundle {
    fn from(entries: Vec<BundleEntry>) -> Self {
        let mut bundle = InputBundle::new();
        for entry in entries {
            bundle.insert(entry.pid, entry.input);
        }
        bundle
    }
}

impl From<InputBundle> for Vec<BundleEntry> {
    fn from(bundle: InputBundle) -> Self {
        bundle
            .inputs
            .into_iter()
            .map(|(pid, input)| BundleEntry { pid, input })
            .collect()
    }
}

impl FromIterator<(ParticipantId, Input)> for InputBundle {
    fn from_iter<I: IntoIterator<Item = (ParticipantId, Input)>>(iter: I) -> Self {
        Self {
            inputs: iter.into_iter().collect(),
        }
    }
}
