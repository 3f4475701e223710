//! # Identity
//!
//! Entities and components are referred to by packed, generation-tagged
//! handles:
//! - An index into the owning slot table
//! - A generation counter for detecting stale references
//! - (components only) the family the component belongs to
//!
//! A handle is alive iff its slot is occupied and the slot's generation
//! matches the handle's generation. Generations only ever grow.

use std::collections::VecDeque;
use std::fmt;

use super::bitfield::Bitfield;

/// Family tag identifying a component schema (0-255).
pub type Family = u8;

/// Largest index a slot table hands out. `u32::MAX` is reserved for `INVALID`.
pub const MAX_INDEX: u32 = u32::MAX - 1;

/// Largest generation an [`EntityId`] can carry.
pub const MAX_ENTITY_GENERATION: u32 = u32::MAX;

/// Largest generation a [`ComponentId`] can carry (24 bits).
pub const MAX_COMPONENT_GENERATION: u32 = (1 << 24) - 1;

/// Unique identifier for an entity.
///
/// The ID is split into two parts:
/// - Lower 32 bits: Index into the entity table
/// - Upper 32 bits: Generation counter for detecting stale references
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// The invalid entity ID. Never alive.
    pub const INVALID: Self = Self(u64::MAX);

    /// Creates a new entity ID from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the index portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Returns the packed representation.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Checks whether this is the invalid ID.
    #[inline]
    #[must_use]
    pub const fn is_invalid(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            return f.write_str("entity(invalid)");
        }
        write!(f, "entity({}v{})", self.index(), self.generation())
    }
}

/// Unique identifier for a component.
///
/// - Bits 0-31: Index into the family's pool
/// - Bits 32-55: Generation counter
/// - Bits 56-63: Family
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ComponentId(u64);

impl ComponentId {
    /// The invalid component ID. Never alive.
    pub const INVALID: Self = Self(u64::MAX);

    /// Creates a component ID. The generation is truncated to 24 bits.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32, family: Family) -> Self {
        let generation = (generation & MAX_COMPONENT_GENERATION) as u64;
        Self(((family as u64) << 56) | (generation << 32) | (index as u64))
    }

    /// Returns the index portion of the component ID.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the component ID.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        ((self.0 >> 32) as u32) & MAX_COMPONENT_GENERATION
    }

    /// Returns the family portion of the component ID.
    #[inline]
    #[must_use]
    pub const fn family(self) -> Family {
        (self.0 >> 56) as Family
    }

    /// Returns the packed representation.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Checks whether this is the invalid ID.
    #[inline]
    #[must_use]
    pub const fn is_invalid(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for ComponentId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            return f.write_str("component(invalid)");
        }
        write!(
            f,
            "component({}:{}v{})",
            self.family(),
            self.index(),
            self.generation()
        )
    }
}

/// Generation bookkeeping for a table of reusable slots.
///
/// Freed indices are recycled in FIFO order. A slot whose generation would
/// exceed `max_generation` is retired permanently instead of wrapping, so a
/// stale handle can never alias a live one.
#[derive(Debug)]
pub struct SlotTable {
    /// Current generation per slot. 0 means never allocated.
    generations: Vec<u32>,
    /// Occupancy, one bit per slot.
    live: Bitfield,
    /// Free list of indices for reuse.
    free: VecDeque<u32>,
    /// Widest generation a handle can carry.
    max_generation: u32,
    /// Slots taken out of circulation after generation exhaustion.
    exhausted: usize,
}

impl SlotTable {
    /// Creates an empty table whose generations stop at `max_generation`.
    #[must_use]
    pub fn new(max_generation: u32) -> Self {
        Self {
            generations: Vec::new(),
            live: Bitfield::new(),
            free: VecDeque::new(),
            max_generation,
            exhausted: 0,
        }
    }

    /// Number of addressable slots (live, free or exhausted).
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.generations.len()
    }

    /// Returns true if no slot was ever allocated.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }

    /// Number of currently live slots.
    #[inline]
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.count_bits()
    }

    /// Number of slots retired permanently because of generation exhaustion.
    #[inline]
    #[must_use]
    pub const fn exhausted_slots(&self) -> usize {
        self.exhausted
    }

    /// Occupancy bitfield.
    #[inline]
    #[must_use]
    pub fn occupancy(&self) -> &Bitfield {
        &self.live
    }

    /// Allocates a slot, returning `(index, generation)`.
    ///
    /// Returns `None` when the index space is exhausted.
    pub fn allocate(&mut self) -> Option<(u32, u32)> {
        let index = if let Some(index) = self.free.pop_front() {
            index
        } else {
            let index = u32::try_from(self.generations.len()).ok()?;
            if index > MAX_INDEX {
                return None;
            }
            self.generations.push(1);
            index
        };

        self.live.set(index as usize);
        Some((index, self.generations[index as usize]))
    }

    /// Retires a live slot, bumping its generation.
    ///
    /// Returns `false` if the slot was not live.
    pub fn retire(&mut self, index: u32) -> bool {
        let idx = index as usize;
        if !self.live.has(idx) {
            return false;
        }
        self.live.clear(idx);

        let generation = self.generations[idx];
        if generation >= self.max_generation {
            // Slot stays out of circulation; handles to it remain dead.
            self.exhausted += 1;
            tracing::warn!(index, generation, "slot generation exhausted, retiring permanently");
            return true;
        }

        self.generations[idx] = generation + 1;
        self.free.push_back(index);
        true
    }

    /// Checks whether `(index, generation)` refers to a live slot.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, index: u32, generation: u32) -> bool {
        let idx = index as usize;
        self.live.has(idx) && self.generations.get(idx) == Some(&generation)
    }

    /// Current generation stored for `index`, if addressable.
    #[inline]
    #[must_use]
    pub fn generation(&self, index: u32) -> Option<u32> {
        self.generations.get(index as usize).copied()
    }

    /// Iterates over `(index, generation)` of all live slots.
    pub fn iter_live(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.live.iter().map(move |idx| {
            #[allow(clippy::cast_possible_truncation)]
            let index = idx as u32;
            (index, self.generations[idx])
        })
    }

    /// Forces the stored generation of a free slot. Test hook for overflow paths.
    #[cfg(test)]
    pub(crate) fn set_generation(&mut self, index: u32, generation: u32) {
        self.generations[index as usize] = generation;
    }
}
