//! # Error Types
//!
//! All recoverable errors raised by the entity system.

use thiserror::Error;

use crate::dispatch::MessageId;
use crate::ecs::{ComponentId, EntityId, Family};

/// Errors that can occur while manipulating entities and components.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// The entity handle is stale or was never issued.
    #[error("invalid or destroyed entity: {0}")]
    InvalidEntity(EntityId),

    /// The component handle is stale or was never issued.
    #[error("invalid or destroyed component: {0}")]
    InvalidComponent(ComponentId),

    /// The component is already attached to a different entity.
    #[error("{component} is already attached to {entity}")]
    AlreadyAttached {
        /// The component being attached.
        component: ComponentId,
        /// Its current owner.
        entity: EntityId,
    },

    /// The component is not attached to the given entity.
    #[error("{component} is not attached to {entity}")]
    NotAttached {
        /// The component being detached.
        component: ComponentId,
        /// The entity it was expected on.
        entity: EntityId,
    },

    /// A local registration needs an owner attached to an entity.
    #[error("{0} is not attached to any entity")]
    Unattached(ComponentId),

    /// Finalization found a required family missing. The entity was destroyed.
    #[error("{entity} is missing required family {family}")]
    MissingRequired {
        /// The entity that failed finalization.
        entity: EntityId,
        /// The first missing family.
        family: Family,
    },

    /// No more component families can be registered.
    #[error("component family limit reached")]
    FamilyLimit,

    /// A slot table ran out of indices.
    #[error("handle index space exhausted")]
    IndexExhausted,

    /// Two message names hash to the same id.
    #[error("message name {name:?} collides with {existing:?} (id {id:#010x})")]
    HashCollision {
        /// The name being registered.
        name: String,
        /// The name already holding the id.
        existing: String,
        /// The colliding id.
        id: MessageId,
    },

    /// No factory is registered under this name.
    #[error("unknown component factory: {0}")]
    UnknownFactory(String),

    /// A factory is already registered under this name.
    #[error("component factory already registered: {0}")]
    DuplicateFactory(String),

    /// No template is registered under this name.
    #[error("unknown entity template: {0}")]
    UnknownTemplate(String),

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for entity system operations.
pub type EcsResult<T> = Result<T, EcsError>;
