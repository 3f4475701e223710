//! # Entity Component System
//!
//! Entities are bare handles. Components are plain data stored per family
//! in chunked pools and attached to at most one entity at a time.
//!
//! ## Design Philosophy
//!
//! - Handles carry a generation, so stale references are detected in O(1)
//! - One pool per family; values never move once written
//! - Per-family op tables instead of virtual dispatch per value

mod bitfield;
mod component;
mod id;
mod system;
mod template;

pub use bitfield::{Bitfield, Ones};
pub use component::{Component, FamilyInfo, FamilyRegistry, DEFAULT_CHUNK_SIZE, MAX_FAMILIES};
pub use id::{
    ComponentId, EntityId, Family, SlotTable, MAX_COMPONENT_GENERATION, MAX_ENTITY_GENERATION,
    MAX_INDEX,
};
pub use system::EntitySystem;
pub use template::Factory;
