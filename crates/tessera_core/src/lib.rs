//! # TESSERA Core
//!
//! Generational entity/component runtime with re-entrant message dispatch.
//!
//! - Entities and components are referred to by generation-tagged handles;
//!   a stale handle is detected in O(1) and never aliases a live one
//! - Each component family lives in its own chunked pool whose values
//!   never move
//! - Components talk through priority-ordered named messages, family
//!   watches and typed events, and may mutate the system from inside any
//!   callback
//!
//! ## Architecture Rules
//!
//! 1. **Handles, never pointers** - every cross reference is an id checked
//!    for liveness
//! 2. **Dispatch freezes structure** - registrations and destructions made
//!    during dispatch are queued and applied when it returns
//! 3. **Single-threaded storage** - only the [`JobQueue`] crosses threads
//!
//! ## Example
//!
//! ```rust
//! use tessera_core::{Component, EntitySystem, Message, Scope};
//!
//! struct Counter(u32);
//!
//! impl Component for Counter {
//!     const NAME: &'static str = "Counter";
//! }
//!
//! let mut system = EntitySystem::new();
//! let increment = system.message_id("Increment")?;
//!
//! let entity = system.entity_create()?;
//! let counter = system.component_create(Counter(0))?;
//! system.component_attach(counter, entity)?;
//! system.message_request(counter, increment, Scope::Local, 0, |system, me, _| {
//!     if let Some(counter) = system.component_get_mut::<Counter>(me) {
//!         counter.0 += 1;
//!     }
//! })?;
//!
//! system.send_local(entity, increment, &mut Message::new());
//! assert_eq!(system.entity_get::<Counter>(entity).map(|c| c.0), Some(1));
//! # Ok::<(), tessera_core::EcsError>(())
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatch;
pub mod ecs;
pub mod error;
pub mod memory;
pub mod sync;

pub use config::SystemConfig;
pub use dispatch::{
    hash_name, ComponentAttached, ComponentCreated, ComponentDestroyed, ComponentDetached,
    EntityCreated, EntityDestroyed, EventOwner, FreezeGuard, ListenerId, Message, MessageCallback,
    MessageId, MessageKind, RequestKey, Scope,
};
pub use ecs::{Bitfield, Component, ComponentId, EntityId, EntitySystem, Family, FamilyInfo};
pub use error::{EcsError, EcsResult};
pub use memory::ComponentPool;
pub use sync::{JobError, JobHandle, JobQueue};
