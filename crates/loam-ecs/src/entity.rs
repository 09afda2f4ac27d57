//! Entity identifiers, lifecycle state, and the slot-based entity store.
//!
//! An [`EntityId`] is a 64-bit handle that packs a *generation* counter in the
//! high 32 bits and a slot *index* in the low 32 bits. The generation is
//! bumped every time a slot is recycled, which allows immediate stale-handle
//! detection: a queue entry or reactive bucket that outlives its entity simply
//! stops resolving.
//!
//! Alongside the dense handle, every live entity carries an [`EntityUuid`],
//! a stable RFC 4122 v4 identifier used for external lookup. The uuid is
//! regenerated whenever a slot returns to the free list, so a dead entity can
//! never be found by its old uuid.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::component::{ComponentTypeId, ComponentValue};
use crate::query::QueryId;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A generational entity handle.
///
/// Layout: `[generation: u32 | index: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// Construct an `EntityId` from a slot index and generation.
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    /// The slot index portion (low 32 bits).
    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// The generation portion (high 32 bits).
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// EntityUuid
// ---------------------------------------------------------------------------

/// A 128-bit RFC 4122 v4 identifier, rendered as 36 uppercase hex characters
/// grouped `8-4-4-4-12`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityUuid([u8; 16]);

impl EntityUuid {
    /// Generate a fresh random uuid with the v4 version and variant nibbles
    /// forced (`0100xxxx` in byte 6, `10xxxxxx` in byte 8).
    pub fn random() -> Self {
        let mut bytes: [u8; 16] = rand::random();
        bytes[6] = (bytes[6] & 0x0F) | 0x40;
        bytes[8] = (bytes[8] & 0x3F) | 0x80;
        Self(bytes)
    }

    /// The raw 16 bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for EntityUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13],
            b[14], b[15]
        )
    }
}

impl fmt::Debug for EntityUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityUuid({self})")
    }
}

/// Error returned when parsing a malformed uuid string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseUuidError;

impl fmt::Display for ParseUuidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed uuid (expected 8-4-4-4-12 hex groups)")
    }
}

impl std::error::Error for ParseUuidError {}

impl FromStr for EntityUuid {
    type Err = ParseUuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 36 {
            return Err(ParseUuidError);
        }
        let mut bytes = [0u8; 16];
        let mut i = 0;
        let mut chars = s.bytes();
        for group_len in [8usize, 4, 4, 4, 12] {
            for _ in 0..group_len / 2 {
                let hi = hex_nibble(chars.next().ok_or(ParseUuidError)?)?;
                let lo = hex_nibble(chars.next().ok_or(ParseUuidError)?)?;
                bytes[i] = hi << 4 | lo;
                i += 1;
            }
            if i < 16 {
                if chars.next() != Some(b'-') {
                    return Err(ParseUuidError);
                }
            }
        }
        Ok(Self(bytes))
    }
}

fn hex_nibble(c: u8) -> Result<u8, ParseUuidError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(ParseUuidError),
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// The lifecycle state of an entity slot.
///
/// ```text
/// detached --add--> active --despawn(deferred)--> removed --drain--> dead
///     \_____________despawn(immediate)______________________________/^
/// ```
///
/// A `Removed` entity is scheduled for teardown but still addressable; a
/// `Dead` slot sits in the free list and no query references it. An entity
/// whose system-state counter is non-zero stays in `Removed` (a ghost) until
/// its last system-state component is explicitly removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Lifecycle {
    /// Constructed (or recycled) but not yet visible to queries.
    Detached,
    /// Visible to queries; component mutations are announced.
    Active,
    /// Scheduled for teardown; still addressable, not yet in the free list.
    Removed,
    /// Returned to the free list; uuid regenerated, no query references.
    Dead,
}

// ---------------------------------------------------------------------------
// EntitySlot
// ---------------------------------------------------------------------------

/// Backing storage for one entity.
///
/// Slots are owned by the [`EntityStore`] arena and addressed by index;
/// queries and entities cross-reference each other through ids rather than
/// pointers, which keeps the reference graph cycle-free.
pub(crate) struct EntitySlot {
    pub(crate) generation: u32,
    pub(crate) state: Lifecycle,
    pub(crate) uuid: EntityUuid,
    /// Attached component types, in attachment order.
    pub(crate) types: Vec<ComponentTypeId>,
    /// Live component instances.
    pub(crate) components: HashMap<ComponentTypeId, ComponentValue>,
    /// Instances detached this tick and awaiting the end-of-tick drain.
    pub(crate) pending: HashMap<ComponentTypeId, ComponentValue>,
    /// Types in `pending`, in detachment order.
    pub(crate) pending_types: Vec<ComponentTypeId>,
    /// Every query whose membership currently contains this entity.
    pub(crate) queries: Vec<QueryId>,
    /// Number of attached components flagged as system-state.
    pub(crate) system_state_count: usize,
}

impl EntitySlot {
    fn fresh() -> Self {
        Self {
            generation: 0,
            state: Lifecycle::Detached,
            uuid: EntityUuid::random(),
            types: Vec::new(),
            components: HashMap::new(),
            pending: HashMap::new(),
            pending_types: Vec::new(),
            queries: Vec::new(),
            system_state_count: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// EntityStore
// ---------------------------------------------------------------------------

/// Arena of entity slots with a FIFO free list.
///
/// Recycled indices are handed out oldest-first so generation bumps spread
/// across slots instead of concentrating on a hot index.
pub(crate) struct EntityStore {
    slots: Vec<EntitySlot>,
    free: VecDeque<u32>,
}

impl EntityStore {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: VecDeque::new(),
        }
    }

    /// Acquire a slot in the `Detached` state and return its handle.
    pub(crate) fn acquire(&mut self) -> EntityId {
        if let Some(index) = self.free.pop_front() {
            let slot = &mut self.slots[index as usize];
            slot.state = Lifecycle::Detached;
            EntityId::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(EntitySlot::fresh());
            EntityId::new(index, 0)
        }
    }

    /// Release a slot back to the free list: clears collections, bumps the
    /// generation so outstanding handles go stale, and regenerates the uuid.
    pub(crate) fn release(&mut self, id: EntityId) {
        let Some(slot) = self.slot_mut(id) else {
            return;
        };
        slot.state = Lifecycle::Dead;
        slot.generation = slot.generation.wrapping_add(1);
        slot.uuid = EntityUuid::random();
        slot.types.clear();
        slot.components.clear();
        slot.pending.clear();
        slot.pending_types.clear();
        slot.queries.clear();
        slot.system_state_count = 0;
        self.free.push_back(id.index());
    }

    /// Resolve a handle to its slot, if the generation still matches and the
    /// slot has not been released.
    pub(crate) fn get(&self, id: EntityId) -> Option<&EntitySlot> {
        let slot = self.slots.get(id.index() as usize)?;
        (slot.generation == id.generation() && slot.state != Lifecycle::Dead).then_some(slot)
    }

    pub(crate) fn get_mut(&mut self, id: EntityId) -> Option<&mut EntitySlot> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        (slot.generation == id.generation() && slot.state != Lifecycle::Dead).then_some(slot)
    }

    /// Resolve a handle even when its generation is stale. Used only by
    /// [`release`](Self::release) while the slot is being torn down.
    fn slot_mut(&mut self, id: EntityId) -> Option<&mut EntitySlot> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        (slot.generation == id.generation()).then_some(slot)
    }

    /// Handles of all non-dead slots, optionally filtered by state.
    pub(crate) fn ids_in(&self, state: Lifecycle) -> Vec<EntityId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state == state)
            .map(|(i, s)| EntityId::new(i as u32, s.generation))
            .collect()
    }

    pub(crate) fn count_in(&self, state: Lifecycle) -> usize {
        self.slots.iter().filter(|s| s.state == state).count()
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
