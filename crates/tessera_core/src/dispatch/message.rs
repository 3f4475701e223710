//! # Messages
//!
//! Named messages travel through the entity system as [`Message`] values.
//! Names are hashed to [`MessageId`]s once, up front; dispatch only ever
//! compares integers.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use crate::ecs::{ComponentId, EntityId};
use crate::error::{EcsError, EcsResult};

/// Integer id of a named message.
pub type MessageId = u32;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Hashes a message name (32-bit FNV-1a).
///
/// Deterministic across runs and platforms, and usable in constants:
///
/// ```rust
/// use tessera_core::hash_name;
///
/// const INCREMENT: u32 = hash_name("Increment");
/// assert_eq!(INCREMENT, hash_name("Increment"));
/// ```
#[must_use]
pub const fn hash_name(name: &str) -> MessageId {
    let bytes = name.as_bytes();
    let mut hash = FNV_OFFSET;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Remembers which name produced each id, so two names that hash alike
/// are reported instead of silently sharing registrations.
#[derive(Debug, Default)]
pub struct NameRegistry {
    names: HashMap<MessageId, String>,
}

impl NameRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hashes `name` and records it.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::HashCollision`] if a different name already owns
    /// the id.
    pub fn register(&mut self, name: &str) -> EcsResult<MessageId> {
        let id = hash_name(name);
        match self.names.get(&id) {
            Some(existing) if existing != name => {
                tracing::warn!(name, existing = %existing, id, "message name hash collision");
                Err(EcsError::HashCollision {
                    name: name.to_string(),
                    existing: existing.clone(),
                    id,
                })
            }
            Some(_) => Ok(id),
            None => {
                self.names.insert(id, name.to_string());
                Ok(id)
            }
        }
    }

    /// Name recorded for `id`.
    #[must_use]
    pub fn name(&self, id: MessageId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }
}

/// What a message is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// One-way message. Every registration runs.
    Message,
    /// Question. Dispatch stops at the first registration that handles it.
    Question,
    /// A watched family's component was attached to an entity.
    Attached,
    /// A watched family's component was detached from an entity.
    Detached,
    /// A watched family's component is about to be destroyed.
    Destroyed,
}

/// A message in flight.
///
/// Carries an optional payload of any type. Questions are answered by
/// writing a payload back with [`respond`](Self::respond).
pub struct Message {
    kind: MessageKind,
    sender: Option<ComponentId>,
    entity: Option<EntityId>,
    payload: Option<Box<dyn Any>>,
    handled: bool,
}

impl Message {
    /// Creates an empty one-way message.
    #[must_use]
    pub fn new() -> Self {
        Self::with_kind(MessageKind::Message)
    }

    /// Creates an empty question.
    #[must_use]
    pub fn question() -> Self {
        Self::with_kind(MessageKind::Question)
    }

    fn with_kind(kind: MessageKind) -> Self {
        Self {
            kind,
            sender: None,
            entity: None,
            payload: None,
            handled: false,
        }
    }

    /// Lifecycle notification delivered to family watchers.
    pub(crate) fn notification(kind: MessageKind, component: ComponentId, entity: EntityId) -> Self {
        Self {
            sender: Some(component),
            entity: Some(entity),
            ..Self::with_kind(kind)
        }
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_payload<T: Any>(mut self, payload: T) -> Self {
        self.payload = Some(Box::new(payload));
        self
    }

    /// Records the sending component.
    #[must_use]
    pub fn with_sender(mut self, sender: ComponentId) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Kind of message.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Sending component. For family notifications, the affected component.
    #[inline]
    #[must_use]
    pub fn sender(&self) -> Option<ComponentId> {
        self.sender
    }

    /// Entity the message was targeted at, if any.
    #[inline]
    #[must_use]
    pub fn entity(&self) -> Option<EntityId> {
        self.entity
    }

    pub(crate) fn set_entity(&mut self, entity: Option<EntityId>) {
        self.entity = entity;
    }

    /// Borrows the payload if it is a `T`.
    #[must_use]
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref()
    }

    /// Mutably borrows the payload if it is a `T`.
    pub fn payload_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.payload.as_mut()?.downcast_mut()
    }

    /// Removes and returns the payload if it is a `T`.
    pub fn take_payload<T: Any>(&mut self) -> Option<T> {
        let payload = self.payload.take()?;
        match payload.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.payload = Some(other);
                None
            }
        }
    }

    /// Answers the message: replaces the payload and marks it handled.
    pub fn respond<T: Any>(&mut self, answer: T) {
        self.payload = Some(Box::new(answer));
        self.handled = true;
    }

    /// Marks the message handled.
    pub fn set_handled(&mut self) {
        self.handled = true;
    }

    /// Whether a registration has handled the message.
    #[inline]
    #[must_use]
    pub fn is_handled(&self) -> bool {
        self.handled
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("sender", &self.sender)
            .field("entity", &self.entity)
            .field("has_payload", &self.payload.is_some())
            .field("handled", &self.handled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_fnv1a() {
        assert_eq!(hash_name(""), 0x811c_9dc5);
        assert_eq!(hash_name("a"), 0xe40c_292c);
        assert_ne!(hash_name("Increment"), hash_name("Decrement"));
    }

    #[test]
    fn test_registry_detects_collisions() {
        let mut names = NameRegistry::new();
        let id = names.register("Increment").unwrap();
        assert_eq!(names.register("Increment").unwrap(), id);
        assert_eq!(names.name(id), Some("Increment"));

        // Known FNV-1a 32-bit collision pair.
        let first = names.register("costarring").unwrap();
        let err = names.register("liquid").unwrap_err();
        assert_eq!(
            err,
            EcsError::HashCollision {
                name: "liquid".to_string(),
                existing: "costarring".to_string(),
                id: first,
            }
        );
    }

    #[test]
    fn test_payload_access() {
        let mut msg = Message::new().with_payload(41_i32);
        assert_eq!(msg.payload::<i32>(), Some(&41));
        assert!(msg.payload::<u8>().is_none());

        *msg.payload_mut::<i32>().unwrap() += 1;
        assert!(msg.take_payload::<String>().is_none());
        assert_eq!(msg.take_payload::<i32>(), Some(42));
        assert!(msg.payload::<i32>().is_none());
    }

    #[test]
    fn test_respond_marks_handled() {
        let mut msg = Message::question();
        assert_eq!(msg.kind(), MessageKind::Question);
        assert!(!msg.is_handled());

        msg.respond("pong");
        assert!(msg.is_handled());
        assert_eq!(msg.payload::<&str>(), Some(&"pong"));
    }
}
