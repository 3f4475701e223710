//! # Component Families
//!
//! Components are plain data. Each Rust type used as a component is assigned
//! a [`Family`] the first time an entity system sees it, together with an
//! operation table ([`FamilyInfo`]) describing how to size and drop values
//! stored in that family's untyped pool.

use std::alloc::Layout;
use std::any::TypeId;
use std::collections::HashMap;

use super::id::Family;

/// Default number of slots per pool chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Maximum number of distinct component families per entity system.
pub const MAX_FAMILIES: usize = 256;

/// Marker trait for ECS components.
///
/// # Example
///
/// ```rust
/// use tessera_core::Component;
///
/// struct Health {
///     current: u32,
/// }
///
/// impl Component for Health {
///     const NAME: &'static str = "Health";
/// }
/// ```
pub trait Component: 'static {
    /// Human-readable family name, used by configuration and diagnostics.
    const NAME: &'static str;

    /// Preferred number of slots per pool chunk.
    const CHUNK_SIZE: usize = DEFAULT_CHUNK_SIZE;
}

/// Per-family operation table for type-erased storage.
#[derive(Clone, Copy, Debug)]
pub struct FamilyInfo {
    /// Family name.
    pub name: &'static str,
    /// Rust type stored in the family.
    pub type_id: TypeId,
    /// Size and alignment of one value.
    pub layout: Layout,
    /// Preferred chunk size declared by the type.
    pub preferred_chunk_size: usize,
    /// Drops one value in place.
    pub(crate) drop_fn: unsafe fn(*mut u8),
}

impl FamilyInfo {
    /// Builds the op table for `T`.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            name: T::NAME,
            type_id: TypeId::of::<T>(),
            layout: Layout::new::<T>(),
            preferred_chunk_size: T::CHUNK_SIZE,
            drop_fn: drop_erased::<T>,
        }
    }

    /// Returns true if this table describes `T`.
    #[inline]
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

/// Drops a `T` stored behind an untyped pointer.
///
/// # Safety
///
/// `ptr` must point at an initialized, properly aligned `T` that is not used
/// again afterwards.
#[allow(unsafe_code)]
unsafe fn drop_erased<T>(ptr: *mut u8) {
    std::ptr::drop_in_place(ptr.cast::<T>());
}

/// Assigns families to component types.
#[derive(Debug, Default)]
pub struct FamilyRegistry {
    by_type: HashMap<TypeId, Family>,
    infos: Vec<FamilyInfo>,
}

impl FamilyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the family of `T` without registering it.
    #[inline]
    #[must_use]
    pub fn get<T: 'static>(&self) -> Option<Family> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Returns the family of `T`, registering it on first use.
    ///
    /// Returns `None` once [`MAX_FAMILIES`] families exist.
    pub fn register<T: Component>(&mut self) -> Option<Family> {
        if let Some(family) = self.get::<T>() {
            return Some(family);
        }

        let family = Family::try_from(self.infos.len()).ok()?;
        self.infos.push(FamilyInfo::of::<T>());
        self.by_type.insert(TypeId::of::<T>(), family);
        tracing::debug!(family, name = T::NAME, "registered component family");
        Some(family)
    }

    /// Op table of a registered family.
    #[inline]
    #[must_use]
    pub fn info(&self, family: Family) -> Option<&FamilyInfo> {
        self.infos.get(family as usize)
    }

    /// Number of registered families.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Returns true if no family is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position {
        _x: f32,
    }

    impl Component for Position {
        const NAME: &'static str = "Position";
    }

    struct Tag;

    impl Component for Tag {
        const NAME: &'static str = "Tag";
        const CHUNK_SIZE: usize = 8;
    }

    #[test]
    fn test_families_are_stable() {
        let mut registry = FamilyRegistry::new();
        assert_eq!(registry.get::<Position>(), None);

        let pos = registry.register::<Position>().unwrap();
        let tag = registry.register::<Tag>().unwrap();
        assert_ne!(pos, tag);
        assert_eq!(registry.register::<Position>(), Some(pos));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_info_describes_type() {
        let mut registry = FamilyRegistry::new();
        let tag = registry.register::<Tag>().unwrap();
        let info = registry.info(tag).unwrap();

        assert!(info.is::<Tag>());
        assert!(!info.is::<Position>());
        assert_eq!(info.name, "Tag");
        assert_eq!(info.layout.size(), 0);
        assert_eq!(info.preferred_chunk_size, 8);
    }
}
