//! # Dispatch
//!
//! Named messages, component-family watches and typed events.
//!
//! Every dispatch runs with the system frozen: callbacks may register,
//! unregister and destroy freely, and those changes land once the
//! outermost dispatch returns.
//!
//! - **Global** registrations hear every global send of their id.
//! - **Local** registrations hear only sends targeted at their entity.
//! - **Questions** stop at the first callback that handles them.

mod events;
mod freeze;
mod message;
mod registry;
mod send;

pub use events::{
    ComponentAttached, ComponentCreated, ComponentDestroyed, ComponentDetached, EntityCreated,
    EntityDestroyed, EventCallback, EventOwner, ListenerId,
};
pub use freeze::FreezeGuard;
pub use message::{hash_name, Message, MessageId, MessageKind, NameRegistry};
pub use registry::{MessageCallback, RequestKey, Scope};

pub(crate) use events::EventSystem;
pub(crate) use freeze::{DeferredQueue, Destruction};
pub(crate) use registry::MessageRegistry;
