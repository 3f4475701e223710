//! # Entity System
//!
//! Owns every entity, every component pool and every registration, and
//! keeps the attachment table consistent:
//!
//! - `shape.has(family)` iff `attached[family]` is a live component whose
//!   pool records this entity as its owner
//! - a component belongs to at most one entity
//! - an entity holds at most one component per family
//!
//! All cross references are handles checked for liveness before use.

use std::collections::HashMap;
use std::fmt;

use super::bitfield::Bitfield;
use super::component::{Component, FamilyRegistry};
use super::id::{ComponentId, EntityId, Family, SlotTable, MAX_ENTITY_GENERATION};
use super::template::Factory;
use crate::config::SystemConfig;
use crate::dispatch::{
    ComponentAttached, ComponentCreated, ComponentDestroyed, ComponentDetached, DeferredQueue,
    Destruction, EntityCreated, EntityDestroyed, EventSystem, MessageKind, MessageRegistry,
    NameRegistry,
};
use crate::error::{EcsError, EcsResult};
use crate::memory::ComponentPool;

/// Per-entity attachment table.
#[derive(Clone, Debug, Default)]
struct EntityRecord {
    /// Attached component per family.
    attached: Vec<Option<ComponentId>>,
    /// One bit per attached family.
    shape: Bitfield,
    finalized: bool,
}

/// The entity system - owner of all entities, components and registrations.
///
/// Single-threaded: callbacks are reference counted and may hold
/// non-`Send` state, so the system never crosses threads.
///
/// # Example
///
/// ```rust
/// use tessera_core::{Component, EntitySystem};
///
/// struct Health(u32);
///
/// impl Component for Health {
///     const NAME: &'static str = "Health";
/// }
///
/// let mut system = EntitySystem::new();
/// let entity = system.entity_create()?;
/// let health = system.component_create(Health(100))?;
/// system.component_attach(health, entity)?;
///
/// assert_eq!(system.entity_get::<Health>(entity).map(|h| h.0), Some(100));
/// # Ok::<(), tessera_core::EcsError>(())
/// ```
pub struct EntitySystem {
    pub(crate) config: SystemConfig,
    entities: SlotTable,
    records: Vec<EntityRecord>,
    families: FamilyRegistry,
    pools: Vec<Option<ComponentPool>>,
    pub(crate) messages: MessageRegistry,
    pub(crate) events: EventSystem,
    pub(crate) names: NameRegistry,
    pub(crate) frozen: u32,
    pub(crate) draining: bool,
    pub(crate) deferred: DeferredQueue,
    pub(crate) factories: HashMap<String, Factory>,
    pub(crate) templates: HashMap<String, Vec<String>>,
}

impl EntitySystem {
    /// Creates an empty system with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SystemConfig::default())
    }

    /// Creates an empty system.
    #[must_use]
    pub fn with_config(config: SystemConfig) -> Self {
        Self {
            config,
            entities: SlotTable::new(MAX_ENTITY_GENERATION),
            records: Vec::new(),
            families: FamilyRegistry::new(),
            pools: Vec::new(),
            messages: MessageRegistry::default(),
            events: EventSystem::default(),
            names: NameRegistry::new(),
            frozen: 0,
            draining: false,
            deferred: DeferredQueue::default(),
            factories: HashMap::new(),
            templates: HashMap::new(),
        }
    }

    /// Active configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    // =========================================================================
    // Families
    // =========================================================================

    /// Registers `T` as a component family and creates its pool.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::FamilyLimit`] once 256 families exist, or
    /// [`EcsError::InvalidConfig`] if the configured chunk size is too large
    /// for `T`.
    pub fn register_family<T: Component>(&mut self) -> EcsResult<Family> {
        let family = self.families.register::<T>().ok_or(EcsError::FamilyLimit)?;

        let slot = family as usize;
        if slot >= self.pools.len() {
            self.pools.resize_with(slot + 1, || None);
        }
        if self.pools[slot].is_none() {
            if let Some(info) = self.families.info(family) {
                let chunk_size = self
                    .config
                    .chunk_size_for(info.name, info.preferred_chunk_size);
                self.pools[slot] = Some(ComponentPool::new(family, *info, chunk_size)?);
            }
        }
        Ok(family)
    }

    /// Family of `T`, if registered.
    #[inline]
    #[must_use]
    pub fn family<T: Component>(&self) -> Option<Family> {
        self.families.get::<T>()
    }

    /// Name of a registered family.
    #[must_use]
    pub fn family_name(&self, family: Family) -> Option<&'static str> {
        self.families.info(family).map(|info| info.name)
    }

    /// Number of registered families.
    #[inline]
    #[must_use]
    pub fn family_count(&self) -> usize {
        self.families.len()
    }

    /// Pool of a registered family.
    #[inline]
    #[must_use]
    pub fn pool(&self, family: Family) -> Option<&ComponentPool> {
        self.pools.get(family as usize)?.as_ref()
    }

    fn pool_mut(&mut self, family: Family) -> Option<&mut ComponentPool> {
        self.pools.get_mut(family as usize)?.as_mut()
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Creates an entity with no components.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::IndexExhausted`] when no index is left.
    pub fn entity_create(&mut self) -> EcsResult<EntityId> {
        let (index, generation) = self.entities.allocate().ok_or(EcsError::IndexExhausted)?;

        let slot = index as usize;
        if slot >= self.records.len() {
            self.records.resize_with(slot + 1, EntityRecord::default);
        }
        self.records[slot] = EntityRecord::default();

        let entity = EntityId::new(index, generation);
        tracing::trace!(%entity, "entity created");
        self.emit_event(&EntityCreated { entity });
        Ok(entity)
    }

    /// Checks if an entity is alive.
    #[inline]
    #[must_use]
    pub fn entity_alive(&self, entity: EntityId) -> bool {
        !entity.is_invalid() && self.entities.is_alive(entity.index(), entity.generation())
    }

    fn record(&self, entity: EntityId) -> Option<&EntityRecord> {
        if !self.entity_alive(entity) {
            return None;
        }
        self.records.get(entity.index() as usize)
    }

    /// Destroys an entity and every component attached to it.
    ///
    /// Returns `false` if the entity was already dead. While frozen the
    /// destruction is queued and `true` is returned.
    pub fn entity_destroy(&mut self, entity: EntityId) -> bool {
        if !self.entity_alive(entity) {
            return false;
        }
        if self.is_frozen() {
            self.defer_destruction(Destruction::Entity(entity));
            return true;
        }

        let slot = entity.index() as usize;
        // Callbacks run while tearing down may attach new components, so
        // keep going until the record is empty.
        while let Some(component) = self.records[slot].attached.iter().flatten().next().copied() {
            if !self.component_destroy(component) {
                panic!("{entity} holds dead {component}: attachment table corrupted");
            }
            if !self.entity_alive(entity) {
                return true;
            }
        }

        self.records[slot] = EntityRecord::default();
        self.entities.retire(entity.index());
        tracing::trace!(%entity, "entity destroyed");
        self.emit_event(&EntityDestroyed { entity });
        true
    }

    /// Checks every `required` family watch held by the entity's components.
    ///
    /// On success the entity is marked finalized. If a required family is
    /// missing the entity is destroyed.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidEntity`] for a dead entity,
    /// [`EcsError::MissingRequired`] naming the first missing family.
    pub fn finalize_entity(&mut self, entity: EntityId) -> EcsResult<()> {
        let Some(record) = self.record(entity) else {
            return Err(EcsError::InvalidEntity(entity));
        };

        let missing = record
            .attached
            .iter()
            .flatten()
            .flat_map(|component| self.messages.required_families(*component))
            .find(|family| !record.shape.has(*family as usize));

        if let Some(family) = missing {
            tracing::debug!(%entity, family, "required family missing, destroying entity");
            self.entity_destroy(entity);
            return Err(EcsError::MissingRequired { entity, family });
        }

        self.records[entity.index() as usize].finalized = true;
        Ok(())
    }

    /// Whether [`finalize_entity`](Self::finalize_entity) succeeded on `entity`.
    #[must_use]
    pub fn entity_finalized(&self, entity: EntityId) -> bool {
        self.record(entity).is_some_and(|record| record.finalized)
    }

    // =========================================================================
    // Components
    // =========================================================================

    /// Moves `value` into its family's pool. The component starts unattached.
    ///
    /// # Errors
    ///
    /// [`EcsError::FamilyLimit`] or [`EcsError::InvalidConfig`] if `T`
    /// cannot be registered, [`EcsError::IndexExhausted`] if its pool is full.
    pub fn component_create<T: Component>(&mut self, value: T) -> EcsResult<ComponentId> {
        let family = self.register_family::<T>()?;
        let component = self
            .pool_mut(family)
            .and_then(|pool| pool.insert(value))
            .ok_or(EcsError::IndexExhausted)?;

        tracing::trace!(%component, name = T::NAME, "component created");
        self.emit_event(&ComponentCreated { component });
        Ok(component)
    }

    /// Checks if a component is alive.
    #[inline]
    #[must_use]
    pub fn component_alive(&self, component: ComponentId) -> bool {
        !component.is_invalid()
            && self
                .pool(component.family())
                .is_some_and(|pool| pool.is_alive(component))
    }

    /// Entity a component is attached to.
    #[inline]
    #[must_use]
    pub fn component_owner(&self, component: ComponentId) -> Option<EntityId> {
        self.pool(component.family())?.owner(component)
    }

    /// Borrows a component's value.
    #[must_use]
    pub fn component_get<T: Component>(&self, component: ComponentId) -> Option<&T> {
        self.pool(component.family())?.get(component)
    }

    /// Mutably borrows a component's value.
    pub fn component_get_mut<T: Component>(&mut self, component: ComponentId) -> Option<&mut T> {
        self.pool_mut(component.family())?.get_mut(component)
    }

    /// Attaches a component to an entity.
    ///
    /// A component of the same family already on the entity is detached
    /// first, and destroyed if
    /// [`destroy_replaced_components`](SystemConfig::destroy_replaced_components)
    /// is set. Attaching a component to its current owner does nothing.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidComponent`] / [`EcsError::InvalidEntity`] for dead
    /// handles, [`EcsError::AlreadyAttached`] if the component belongs to
    /// another entity.
    pub fn component_attach(&mut self, component: ComponentId, entity: EntityId) -> EcsResult<()> {
        let family = component.family();
        // Watchers of a detach may change anything, so re-check every round.
        loop {
            if !self.component_alive(component) {
                return Err(EcsError::InvalidComponent(component));
            }
            if !self.entity_alive(entity) {
                return Err(EcsError::InvalidEntity(entity));
            }
            match self.component_owner(component) {
                Some(owner) if owner == entity => return Ok(()),
                Some(owner) => {
                    return Err(EcsError::AlreadyAttached {
                        component,
                        entity: owner,
                    })
                }
                None => {}
            }

            let Some(previous) = self.entity_component(entity, family) else {
                break;
            };
            self.component_detach(previous, entity)?;
            if self.config.destroy_replaced_components {
                self.component_destroy(previous);
            }
        }

        let record = &mut self.records[entity.index() as usize];
        let slot = family as usize;
        if slot >= record.attached.len() {
            record.attached.resize(slot + 1, None);
        }
        record.attached[slot] = Some(component);
        record.shape.set(slot);
        if let Some(pool) = self.pool_mut(family) {
            pool.set_owner(component, Some(entity));
        }

        tracing::trace!(%component, %entity, "component attached");
        self.notify_family(MessageKind::Attached, component, entity);
        self.emit_event(&ComponentAttached { component, entity });
        Ok(())
    }

    /// Detaches a component from an entity without destroying it.
    ///
    /// The component loses its registrations local to that entity.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidComponent`] / [`EcsError::InvalidEntity`] for dead
    /// handles, [`EcsError::NotAttached`] if the component is not on `entity`.
    pub fn component_detach(&mut self, component: ComponentId, entity: EntityId) -> EcsResult<()> {
        if !self.component_alive(component) {
            return Err(EcsError::InvalidComponent(component));
        }
        if !self.entity_alive(entity) {
            return Err(EcsError::InvalidEntity(entity));
        }
        if self.component_owner(component) != Some(entity) {
            return Err(EcsError::NotAttached { component, entity });
        }

        self.unlink(component, entity);
        self.drop_local_requests(component, entity);

        tracing::trace!(%component, %entity, "component detached");
        self.notify_family(MessageKind::Detached, component, entity);
        self.emit_event(&ComponentDetached { component, entity });
        Ok(())
    }

    /// Clears both sides of an attachment.
    fn unlink(&mut self, component: ComponentId, entity: EntityId) {
        let slot = component.family() as usize;
        let record = &mut self.records[entity.index() as usize];
        assert_eq!(
            record.attached.get(slot).copied().flatten(),
            Some(component),
            "{entity} does not list {component} although the pool says it owns it"
        );
        record.attached[slot] = None;
        record.shape.clear(slot);
        if let Some(pool) = self.pool_mut(component.family()) {
            pool.set_owner(component, None);
        }
    }

    /// Destroys a component.
    ///
    /// Its registrations are removed, family watchers are told while the
    /// value is still readable, then it is detached and dropped. Returns
    /// `false` if the component was already dead. While frozen the
    /// destruction is queued and `true` is returned.
    pub fn component_destroy(&mut self, component: ComponentId) -> bool {
        if !self.component_alive(component) {
            return false;
        }
        if self.is_frozen() {
            self.defer_destruction(Destruction::Component(component));
            return true;
        }

        self.unrequest_all(component);
        if let Some(entity) = self.component_owner(component) {
            self.notify_family(MessageKind::Destroyed, component, entity);
        }

        // Watchers may have detached it meanwhile, and the drain that ran
        // when they returned may have destroyed it already.
        if !self.component_alive(component) {
            return true;
        }
        // Watchers may also have registered on its behalf.
        self.unrequest_all(component);
        let entity = self.component_owner(component);
        if let Some(entity) = entity {
            self.unlink(component, entity);
        }
        if let Some(pool) = self.pool_mut(component.family()) {
            pool.destroy(component);
        }

        tracing::trace!(%component, "component destroyed");
        self.emit_event(&ComponentDestroyed { component, entity });
        true
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Number of live entities.
    #[inline]
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.live_count()
    }

    /// Iterates over every live entity in index order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities
            .iter_live()
            .map(|(index, generation)| EntityId::new(index, generation))
    }

    /// Iterates over every live component of a family, attached or not.
    pub fn components_of_family(&self, family: Family) -> impl Iterator<Item = ComponentId> + '_ {
        self.pool(family).into_iter().flat_map(ComponentPool::ids)
    }

    /// Iterates over every live component of type `T`.
    pub fn components_of<T: Component>(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.family::<T>()
            .and_then(|family| self.pool(family))
            .into_iter()
            .flat_map(ComponentPool::ids)
    }

    /// Families attached to an entity.
    #[must_use]
    pub fn entity_shape(&self, entity: EntityId) -> Option<&Bitfield> {
        self.record(entity).map(|record| &record.shape)
    }

    /// Occupancy of a family's pool.
    #[must_use]
    pub fn pool_occupancy(&self, family: Family) -> Option<&Bitfield> {
        self.pool(family).map(ComponentPool::occupancy)
    }

    /// Entities holding at least every family set in `shape`.
    pub fn entities_matching<'a>(&'a self, shape: &'a Bitfield) -> impl Iterator<Item = EntityId> + 'a {
        self.entities().filter(move |entity| {
            self.record(*entity)
                .is_some_and(|record| record.shape.contains_all(shape))
        })
    }

    /// Component of `family` attached to an entity.
    #[must_use]
    pub fn entity_component(&self, entity: EntityId, family: Family) -> Option<ComponentId> {
        self.record(entity)?.attached.get(family as usize).copied().flatten()
    }

    /// Every component attached to an entity, by family.
    #[must_use]
    pub fn entity_components(&self, entity: EntityId) -> Vec<ComponentId> {
        self.record(entity)
            .map(|record| record.attached.iter().flatten().copied().collect())
            .unwrap_or_default()
    }

    /// Borrows the `T` attached to an entity.
    #[must_use]
    pub fn entity_get<T: Component>(&self, entity: EntityId) -> Option<&T> {
        let component = self.entity_component(entity, self.family::<T>()?)?;
        self.component_get(component)
    }

    /// Mutably borrows the `T` attached to an entity.
    pub fn entity_get_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        let component = self.entity_component(entity, self.family::<T>()?)?;
        self.component_get_mut(component)
    }

    /// Every attached component of a family with its entity.
    pub(crate) fn attached_of_family(&self, family: Family) -> Vec<(ComponentId, EntityId)> {
        let Some(pool) = self.pool(family) else {
            return Vec::new();
        };
        pool.ids()
            .filter_map(|component| pool.owner(component).map(|entity| (component, entity)))
            .collect()
    }
}

impl Default for EntitySystem {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EntitySystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySystem")
            .field("entities", &self.entity_count())
            .field("families", &self.families.len())
            .field("registrations", &self.messages.len())
            .field("frozen", &self.frozen)
            .field("deferred", &self.deferred.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SystemConfig;

    #[derive(Debug, PartialEq)]
    struct Position {
        x: i32,
    }

    impl Component for Position {
        const NAME: &'static str = "Position";
    }

    #[derive(Debug, PartialEq)]
    struct Velocity {
        dx: i32,
    }

    impl Component for Velocity {
        const NAME: &'static str = "Velocity";
    }

    #[test]
    fn test_entity_create_destroy() {
        let mut system = EntitySystem::new();

        let e1 = system.entity_create().unwrap();
        let e2 = system.entity_create().unwrap();
        assert!(system.entity_alive(e1));
        assert_eq!(system.entity_count(), 2);

        assert!(system.entity_destroy(e1));
        assert!(!system.entity_alive(e1));
        assert!(!system.entity_destroy(e1));
        assert_eq!(system.entities().collect::<Vec<_>>(), vec![e2]);

        let e3 = system.entity_create().unwrap();
        assert_eq!(e3.index(), e1.index());
        assert!(e3.generation() > e1.generation());
        assert!(!system.entity_alive(e1));
    }

    #[test]
    fn test_attach_sets_shape() {
        let mut system = EntitySystem::new();
        let entity = system.entity_create().unwrap();
        let pos = system.component_create(Position { x: 1 }).unwrap();
        let family = system.family::<Position>().unwrap();

        system.component_attach(pos, entity).unwrap();
        assert!(system.entity_shape(entity).unwrap().has(family as usize));
        assert_eq!(system.component_owner(pos), Some(entity));
        assert_eq!(system.entity_get::<Position>(entity), Some(&Position { x: 1 }));

        // Attaching again is a no-op.
        system.component_attach(pos, entity).unwrap();

        system.component_detach(pos, entity).unwrap();
        assert!(!system.entity_shape(entity).unwrap().has(family as usize));
        assert!(system.component_alive(pos));
        assert_eq!(system.component_owner(pos), None);
    }

    #[test]
    fn test_attach_errors() {
        let mut system = EntitySystem::new();
        let a = system.entity_create().unwrap();
        let b = system.entity_create().unwrap();
        let pos = system.component_create(Position { x: 0 }).unwrap();

        system.component_attach(pos, a).unwrap();
        assert_eq!(
            system.component_attach(pos, b),
            Err(EcsError::AlreadyAttached {
                component: pos,
                entity: a
            })
        );
        assert_eq!(
            system.component_detach(pos, b),
            Err(EcsError::NotAttached {
                component: pos,
                entity: b
            })
        );

        system.entity_destroy(b);
        let other = system.component_create(Position { x: 0 }).unwrap();
        assert_eq!(system.component_attach(other, b), Err(EcsError::InvalidEntity(b)));
    }

    #[test]
    fn test_replacing_detaches_previous() {
        let mut system = EntitySystem::new();
        let entity = system.entity_create().unwrap();
        let first = system.component_create(Position { x: 1 }).unwrap();
        let second = system.component_create(Position { x: 2 }).unwrap();

        system.component_attach(first, entity).unwrap();
        system.component_attach(second, entity).unwrap();

        assert_eq!(system.entity_get::<Position>(entity).unwrap().x, 2);
        assert!(system.component_alive(first));
        assert_eq!(system.component_owner(first), None);
    }

    #[test]
    fn test_replacing_can_destroy_previous() {
        let config = SystemConfig {
            destroy_replaced_components: true,
            ..SystemConfig::default()
        };
        let mut system = EntitySystem::with_config(config);
        let entity = system.entity_create().unwrap();
        let first = system.component_create(Position { x: 1 }).unwrap();
        let second = system.component_create(Position { x: 2 }).unwrap();

        system.component_attach(first, entity).unwrap();
        system.component_attach(second, entity).unwrap();
        assert!(!system.component_alive(first));
    }

    #[test]
    fn test_destroy_entity_destroys_components() {
        let mut system = EntitySystem::new();
        let entity = system.entity_create().unwrap();
        let pos = system.component_create(Position { x: 0 }).unwrap();
        let vel = system.component_create(Velocity { dx: 0 }).unwrap();
        system.component_attach(pos, entity).unwrap();
        system.component_attach(vel, entity).unwrap();

        system.entity_destroy(entity);
        assert!(!system.component_alive(pos));
        assert!(!system.component_alive(vel));
        assert_eq!(system.components_of::<Position>().count(), 0);
    }

    #[test]
    fn test_entities_matching_uses_and() {
        let mut system = EntitySystem::new();
        let both = system.entity_create().unwrap();
        let only_pos = system.entity_create().unwrap();

        for entity in [both, only_pos] {
            let pos = system.component_create(Position { x: 0 }).unwrap();
            system.component_attach(pos, entity).unwrap();
        }
        let vel = system.component_create(Velocity { dx: 1 }).unwrap();
        system.component_attach(vel, both).unwrap();

        let query: Bitfield = [
            system.family::<Position>().unwrap() as usize,
            system.family::<Velocity>().unwrap() as usize,
        ]
        .into_iter()
        .collect();
        assert_eq!(system.entities_matching(&query).collect::<Vec<_>>(), vec![both]);
    }

    #[test]
    fn test_chunk_size_from_config() {
        let mut config = SystemConfig::default();
        config.chunk_sizes.insert("Velocity".to_string(), 16);
        let mut system = EntitySystem::with_config(config);

        let vel = system.register_family::<Velocity>().unwrap();
        let pos = system.register_family::<Position>().unwrap();
        assert_eq!(system.pool(vel).unwrap().chunk_size(), 16);
        assert_eq!(system.pool(pos).unwrap().chunk_size(), 256);
        assert_eq!(system.family_name(vel), Some("Velocity"));
    }
}
