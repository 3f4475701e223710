//! # Component Pool
//!
//! Chunked, type-erased storage for one component family.
//!
//! Memory is requested in whole chunks of `chunk_size` slots. Chunks are
//! never reallocated or moved, so the address of a stored value stays valid
//! for as long as the value is alive, no matter how much the pool grows.
//!
//! ```text
//! chunks[0] -> [ slot 0 | slot 1 | ... | slot N-1 ]
//! chunks[1] -> [ slot N | ...                     ]
//!
//! slot_ptr(i) = chunks[i / N] + (i % N) * stride
//! ```

#![allow(unsafe_code)]

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;

use crate::ecs::{Bitfield, ComponentId, EntityId, Family, FamilyInfo, SlotTable, MAX_COMPONENT_GENERATION};
use crate::error::{EcsError, EcsResult};

/// Type-erased storage for every component of one family.
///
/// Values are moved in with [`insert`](Self::insert), read back through the
/// type-checked accessors and dropped by [`destroy`](Self::destroy) using the
/// family's drop function. The pool itself never needs to know `T`.
pub struct ComponentPool {
    family: Family,
    info: FamilyInfo,
    /// Distance between two slots. Always a multiple of the alignment.
    stride: usize,
    chunk_size: usize,
    /// Layout of one chunk. Zero-sized for zero-sized families.
    chunk_layout: Layout,
    chunks: Vec<NonNull<u8>>,
    /// Addressable slots. Tracked separately so zero-sized families can grow
    /// without allocating.
    capacity: usize,
    slots: SlotTable,
    owners: Vec<Option<EntityId>>,
}

impl ComponentPool {
    /// Creates an empty pool for `family`.
    ///
    /// A `chunk_size` of zero is treated as one.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] if one chunk of this family would
    /// not fit in the address space.
    pub fn new(family: Family, info: FamilyInfo, chunk_size: usize) -> EcsResult<Self> {
        let chunk_size = chunk_size.max(1);
        let stride = info.layout.size();
        let chunk_layout = stride
            .checked_mul(chunk_size)
            .and_then(|bytes| Layout::from_size_align(bytes, info.layout.align()).ok())
            .ok_or_else(|| {
                EcsError::InvalidConfig(format!(
                    "a chunk of {chunk_size} `{}` does not fit in memory",
                    info.name
                ))
            })?;

        Ok(Self {
            family,
            info,
            stride,
            chunk_size,
            chunk_layout,
            chunks: Vec::new(),
            capacity: 0,
            slots: SlotTable::new(MAX_COMPONENT_GENERATION),
            owners: Vec::new(),
        })
    }

    /// Family stored in this pool.
    #[inline]
    #[must_use]
    pub const fn family(&self) -> Family {
        self.family
    }

    /// Op table of the stored family.
    #[inline]
    #[must_use]
    pub const fn info(&self) -> &FamilyInfo {
        &self.info
    }

    /// Slots per chunk.
    #[inline]
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of allocated chunks.
    #[inline]
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Number of addressable slots.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of occupied slots.
    #[inline]
    #[must_use]
    pub fn count_bits(&self) -> usize {
        self.slots.live_count()
    }

    /// Occupancy bitfield, one bit per slot.
    #[inline]
    #[must_use]
    pub fn occupancy(&self) -> &Bitfield {
        self.slots.occupancy()
    }

    /// Slots retired because their generation ran out.
    #[inline]
    #[must_use]
    pub const fn exhausted_slots(&self) -> usize {
        self.slots.exhausted_slots()
    }

    /// Grows the pool until at least `count` slots are addressable.
    ///
    /// Existing chunks are left where they are.
    pub fn ensure(&mut self, count: usize) {
        if count > self.owners.len() {
            self.owners.resize(count, None);
        }

        while self.capacity < count {
            if self.chunk_layout.size() > 0 {
                // SAFETY: the layout has a non-zero size
                let ptr = unsafe { alloc(self.chunk_layout) };
                let Some(chunk) = NonNull::new(ptr) else {
                    handle_alloc_error(self.chunk_layout);
                };
                self.chunks.push(chunk);
            }
            self.capacity += self.chunk_size;
            tracing::debug!(
                family = self.family,
                name = self.info.name,
                capacity = self.capacity,
                "component pool grew"
            );
        }
    }

    /// Raw address of slot `index`.
    ///
    /// Returns `None` past the current capacity. The slot may or may not
    /// hold an initialized value.
    #[inline]
    #[must_use]
    pub fn slot_ptr(&self, index: usize) -> Option<NonNull<u8>> {
        debug_assert!(
            index < self.capacity,
            "slot {index} out of bounds for `{}` (capacity {})",
            self.info.name,
            self.capacity
        );
        if index >= self.capacity {
            return None;
        }

        if self.stride == 0 {
            return Some(self.dangling());
        }

        let chunk = self.chunks[index / self.chunk_size];
        let offset = (index % self.chunk_size) * self.stride;
        // SAFETY: offset < chunk_size * stride, which is inside the chunk
        Some(unsafe { NonNull::new_unchecked(chunk.as_ptr().add(offset)) })
    }

    fn dangling(&self) -> NonNull<u8> {
        // Alignment is never zero, so this is a well-aligned non-null address.
        NonNull::new(self.info.layout.align() as *mut u8).unwrap_or(NonNull::dangling())
    }

    /// Moves `value` into a free slot.
    ///
    /// Returns `None` if `T` is not this pool's family or the slot index
    /// space is exhausted.
    pub fn insert<T: 'static>(&mut self, value: T) -> Option<ComponentId> {
        debug_assert!(self.info.is::<T>(), "type mismatch inserting into `{}`", self.info.name);
        if !self.info.is::<T>() {
            return None;
        }

        let (index, generation) = self.slots.allocate()?;
        let slot = index as usize;
        self.ensure(slot + 1);

        let ptr = self.slot_ptr(slot)?;
        // SAFETY: the slot is in bounds, aligned for T and unoccupied
        unsafe { ptr.as_ptr().cast::<T>().write(value) };
        self.owners[slot] = None;

        Some(ComponentId::new(index, generation, self.family))
    }

    /// Checks whether `id` refers to a live value in this pool.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, id: ComponentId) -> bool {
        !id.is_invalid()
            && id.family() == self.family
            && self.slots.is_alive(id.index(), id.generation())
    }

    /// Shared reference to a live value.
    #[must_use]
    pub fn get<T: 'static>(&self, id: ComponentId) -> Option<&T> {
        if !self.info.is::<T>() || !self.is_alive(id) {
            return None;
        }
        let ptr = self.slot_ptr(id.index() as usize)?;
        // SAFETY: the slot is live and holds an initialized T
        Some(unsafe { &*ptr.as_ptr().cast::<T>() })
    }

    /// Mutable reference to a live value.
    pub fn get_mut<T: 'static>(&mut self, id: ComponentId) -> Option<&mut T> {
        if !self.info.is::<T>() || !self.is_alive(id) {
            return None;
        }
        let ptr = self.slot_ptr(id.index() as usize)?;
        // SAFETY: the slot is live, holds an initialized T, and &mut self
        // guarantees exclusive access
        Some(unsafe { &mut *ptr.as_ptr().cast::<T>() })
    }

    /// Drops the value behind `id` and frees its slot.
    ///
    /// The slot's generation is bumped, so `id` is dead afterwards. Storage
    /// is kept for reuse. Returns `false` if `id` was not alive.
    pub fn destroy(&mut self, id: ComponentId) -> bool {
        if !self.is_alive(id) {
            return false;
        }

        let slot = id.index() as usize;
        let Some(ptr) = self.slot_ptr(slot) else {
            return false;
        };

        // Retire first: a panicking destructor must not leave a live slot
        // pointing at a dropped value.
        self.slots.retire(id.index());
        self.owners[slot] = None;

        // SAFETY: the slot held an initialized value of this family and is
        // no longer reachable through any live handle
        unsafe { (self.info.drop_fn)(ptr.as_ptr()) };
        true
    }

    /// Entity a live component is attached to.
    #[inline]
    #[must_use]
    pub fn owner(&self, id: ComponentId) -> Option<EntityId> {
        if !self.is_alive(id) {
            return None;
        }
        self.owners.get(id.index() as usize).copied().flatten()
    }

    /// Records the entity a live component is attached to.
    ///
    /// Returns `false` if `id` is dead.
    pub fn set_owner(&mut self, id: ComponentId, owner: Option<EntityId>) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        self.owners[id.index() as usize] = owner;
        true
    }

    /// Iterates over the handles of every live value, by slot index.
    pub fn ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        let family = self.family;
        self.slots
            .iter_live()
            .map(move |(index, generation)| ComponentId::new(index, generation, family))
    }
}

impl Drop for ComponentPool {
    fn drop(&mut self) {
        let live: Vec<u32> = self.slots.iter_live().map(|(index, _)| index).collect();
        for index in live {
            if let Some(ptr) = self.slot_ptr(index as usize) {
                // SAFETY: live slots hold initialized values of this family
                unsafe { (self.info.drop_fn)(ptr.as_ptr()) };
            }
        }

        if self.chunk_layout.size() > 0 {
            for chunk in self.chunks.drain(..) {
                // SAFETY: every chunk was allocated with chunk_layout
                unsafe { dealloc(chunk.as_ptr(), self.chunk_layout) };
            }
        }
    }
}

impl std::fmt::Debug for ComponentPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentPool")
            .field("family", &self.family)
            .field("name", &self.info.name)
            .field("chunk_size", &self.chunk_size)
            .field("capacity", &self.capacity)
            .field("live", &self.count_bits())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::Component;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Debug, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    impl Component for Position {
        const NAME: &'static str = "Position";
    }

    struct Marker;

    impl Component for Marker {
        const NAME: &'static str = "Marker";
    }

    struct Tracked(Rc<Cell<usize>>);

    impl Component for Tracked {
        const NAME: &'static str = "Tracked";
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn pool_of<T: Component>(chunk_size: usize) -> ComponentPool {
        ComponentPool::new(0, FamilyInfo::of::<T>(), chunk_size).unwrap()
    }

    #[test]
    fn test_insert_get_destroy() {
        let mut pool = pool_of::<Position>(4);
        let id = pool.insert(Position { x: 1.0, y: 2.0 }).unwrap();

        assert_eq!(pool.get::<Position>(id), Some(&Position { x: 1.0, y: 2.0 }));
        pool.get_mut::<Position>(id).unwrap().x = 5.0;
        assert_eq!(pool.get::<Position>(id).unwrap().x, 5.0);
        assert_eq!(pool.count_bits(), 1);

        assert!(pool.destroy(id));
        assert!(!pool.destroy(id));
        assert!(pool.get::<Position>(id).is_none());
        assert_eq!(pool.count_bits(), 0);
    }

    #[test]
    fn test_oversized_chunk_is_an_error() {
        let result = ComponentPool::new(0, FamilyInfo::of::<Position>(), usize::MAX);
        assert!(matches!(result, Err(EcsError::InvalidConfig(_))));

        let result = ComponentPool::new(0, FamilyInfo::of::<Position>(), usize::MAX / 8);
        assert!(matches!(result, Err(EcsError::InvalidConfig(_))));

        // Zero-sized values never need memory.
        assert!(ComponentPool::new(0, FamilyInfo::of::<Marker>(), usize::MAX).is_ok());
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let mut pool = pool_of::<Position>(4);
        let id = pool.insert(Position { x: 0.0, y: 0.0 }).unwrap();
        assert!(pool.get::<Marker>(id).is_none());
    }

    #[test]
    fn test_growth_never_moves_values() {
        let mut pool = pool_of::<Position>(4);
        let ids: Vec<_> = (0..10)
            .map(|i| pool.insert(Position { x: i as f32, y: 0.0 }).unwrap())
            .collect();
        let before: Vec<*const Position> = ids
            .iter()
            .map(|id| pool.get::<Position>(*id).unwrap() as *const _)
            .collect();

        for i in 0..100 {
            pool.insert(Position { x: i as f32, y: 1.0 }).unwrap();
        }

        assert!(pool.chunk_count() >= 27);
        for (id, addr) in ids.iter().zip(before) {
            assert_eq!(pool.get::<Position>(*id).unwrap() as *const _, addr);
        }
    }

    #[test]
    fn test_slot_reuse_invalidates_old_handle() {
        let mut pool = pool_of::<Position>(2);
        let old = pool.insert(Position { x: 1.0, y: 1.0 }).unwrap();
        pool.destroy(old);

        let new = pool.insert(Position { x: 2.0, y: 2.0 }).unwrap();
        assert_eq!(new.index(), old.index());
        assert!(new.generation() > old.generation());
        assert!(!pool.is_alive(old));
        assert_eq!(pool.get::<Position>(new).unwrap().x, 2.0);
    }

    #[test]
    fn test_zero_sized_family() {
        let mut pool = pool_of::<Marker>(8);
        let ids: Vec<_> = (0..20).map(|_| pool.insert(Marker).unwrap()).collect();

        assert_eq!(pool.chunk_count(), 0);
        assert!(pool.capacity() >= 20);
        assert!(ids.iter().all(|id| pool.get::<Marker>(*id).is_some()));
    }

    #[test]
    fn test_drop_runs_destructors() {
        let drops = Rc::new(Cell::new(0));
        {
            let mut pool = pool_of::<Tracked>(3);
            let first = pool.insert(Tracked(drops.clone())).unwrap();
            for _ in 0..4 {
                pool.insert(Tracked(drops.clone())).unwrap();
            }
            pool.destroy(first);
            assert_eq!(drops.get(), 1);
        }
        assert_eq!(drops.get(), 5);
    }

    #[test]
    fn test_owner_tracking() {
        let mut pool = pool_of::<Position>(4);
        let id = pool.insert(Position { x: 0.0, y: 0.0 }).unwrap();
        let entity = EntityId::new(3, 1);

        assert_eq!(pool.owner(id), None);
        assert!(pool.set_owner(id, Some(entity)));
        assert_eq!(pool.owner(id), Some(entity));

        pool.destroy(id);
        assert!(!pool.set_owner(id, Some(entity)));
        let reused = pool.insert(Position { x: 0.0, y: 0.0 }).unwrap();
        assert_eq!(pool.owner(reused), None);
    }

    #[test]
    fn test_ids_lists_live_slots() {
        let mut pool = pool_of::<Position>(4);
        let a = pool.insert(Position { x: 0.0, y: 0.0 }).unwrap();
        let b = pool.insert(Position { x: 0.0, y: 0.0 }).unwrap();
        let c = pool.insert(Position { x: 0.0, y: 0.0 }).unwrap();
        pool.destroy(b);

        assert_eq!(pool.ids().collect::<Vec<_>>(), vec![a, c]);
        assert!(pool.occupancy().has(a.index() as usize));
        assert!(!pool.occupancy().has(b.index() as usize));
    }
}
