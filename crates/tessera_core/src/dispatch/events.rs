//! # Typed Events
//!
//! Events are plain Rust values dispatched by type. Listeners are owned
//! either by a component, in which case they go away with it, or by a
//! free-standing [`ListenerId`].
//!
//! The system emits the lifecycle events in this module on its own;
//! applications may emit any `'static` type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;

use super::freeze::Deferred;
use super::registry::{Registration, RequestList};
use crate::ecs::{ComponentId, EntityId};
use crate::error::{EcsError, EcsResult};
use crate::EntitySystem;

/// Type-erased event callback.
pub type EventCallback = Rc<dyn Fn(&mut EntitySystem, &dyn Any)>;

/// Handle of a listener not owned by any component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Owner of an event listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventOwner {
    /// Removed when the component is destroyed.
    Component(ComponentId),
    /// Removed only explicitly.
    Listener(ListenerId),
}

impl From<ComponentId> for EventOwner {
    fn from(id: ComponentId) -> Self {
        Self::Component(id)
    }
}

impl From<ListenerId> for EventOwner {
    fn from(id: ListenerId) -> Self {
        Self::Listener(id)
    }
}

/// An entity was created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityCreated {
    /// The new entity.
    pub entity: EntityId,
}

/// An entity was destroyed. Its handle is already dead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityDestroyed {
    /// The destroyed entity.
    pub entity: EntityId,
}

/// A component was created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComponentCreated {
    /// The new component.
    pub component: ComponentId,
}

/// A component was attached to an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComponentAttached {
    /// The attached component.
    pub component: ComponentId,
    /// Its new owner.
    pub entity: EntityId,
}

/// A component was detached from an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComponentDetached {
    /// The detached component.
    pub component: ComponentId,
    /// Its former owner.
    pub entity: EntityId,
}

/// A component was destroyed. Its handle is already dead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComponentDestroyed {
    /// The destroyed component.
    pub component: ComponentId,
    /// The entity it was attached to, if any.
    pub entity: Option<EntityId>,
}

/// Listener lists keyed by event type.
#[derive(Default)]
pub(crate) struct EventSystem {
    lists: HashMap<TypeId, RequestList<EventOwner, EventCallback>>,
    by_component: HashMap<ComponentId, Vec<TypeId>>,
    next_listener: u64,
}

impl EventSystem {
    pub fn next_listener(&mut self) -> ListenerId {
        self.next_listener += 1;
        ListenerId(self.next_listener)
    }

    pub fn insert(&mut self, event: TypeId, owner: EventOwner, priority: i32, callback: EventCallback) {
        self.lists.entry(event).or_default().insert(Registration {
            owner,
            callback,
            priority,
            required: false,
        });
        if let EventOwner::Component(component) = owner {
            let types = self.by_component.entry(component).or_default();
            if !types.contains(&event) {
                types.push(event);
            }
        }
    }

    pub fn remove(&mut self, event: TypeId, owner: EventOwner) -> bool {
        let Some(list) = self.lists.get_mut(&event) else {
            return false;
        };
        let removed = list.remove(owner).is_some();
        if list.is_empty() {
            self.lists.remove(&event);
        }
        if let EventOwner::Component(component) = owner {
            if let Some(types) = self.by_component.get_mut(&component) {
                types.retain(|t| *t != event);
                if types.is_empty() {
                    self.by_component.remove(&component);
                }
            }
        }
        removed
    }

    pub fn contains(&self, event: TypeId, owner: EventOwner) -> bool {
        self.lists.get(&event).is_some_and(|list| list.contains(owner))
    }

    /// Removes every listener owned by `component`.
    pub fn remove_component(&mut self, component: ComponentId) -> usize {
        let Some(types) = self.by_component.remove(&component) else {
            return 0;
        };
        let owner = EventOwner::Component(component);
        let mut removed = 0;
        for event in types {
            if let Some(list) = self.lists.get_mut(&event) {
                if list.remove(owner).is_some() {
                    removed += 1;
                }
                if list.is_empty() {
                    self.lists.remove(&event);
                }
            }
        }
        removed
    }

    pub fn snapshot(&self, event: TypeId) -> Vec<(EventOwner, EventCallback)> {
        self.lists
            .get(&event)
            .map(RequestList::snapshot)
            .unwrap_or_default()
    }

    pub fn has_listeners(&self, event: TypeId) -> bool {
        self.lists.contains_key(&event)
    }
}

/// Wraps a typed listener into an erased callback.
pub(crate) fn erase<E, F>(callback: F) -> EventCallback
where
    E: Any,
    F: Fn(&mut EntitySystem, &E) + 'static,
{
    Rc::new(move |system: &mut EntitySystem, event: &dyn Any| {
        if let Some(event) = event.downcast_ref::<E>() {
            callback(system, event);
        }
    })
}

impl EntitySystem {
    /// Listens for events of type `E` until [`event_unlisten`](Self::event_unlisten)
    /// is called with the returned id.
    pub fn event_listen<E, F>(&mut self, priority: i32, callback: F) -> ListenerId
    where
        E: Any,
        F: Fn(&mut EntitySystem, &E) + 'static,
    {
        let id = self.events.next_listener();
        self.listen_erased(TypeId::of::<E>(), EventOwner::Listener(id), priority, erase(callback));
        id
    }

    /// Listens for events of type `E` on behalf of a component. The
    /// listener is removed when the component is destroyed.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidComponent`] for a dead owner.
    pub fn event_listen_component<E, F>(
        &mut self,
        owner: ComponentId,
        priority: i32,
        callback: F,
    ) -> EcsResult<()>
    where
        E: Any,
        F: Fn(&mut EntitySystem, &E) + 'static,
    {
        if !self.component_alive(owner) {
            return Err(EcsError::InvalidComponent(owner));
        }
        self.listen_erased(
            TypeId::of::<E>(),
            EventOwner::Component(owner),
            priority,
            erase(callback),
        );
        Ok(())
    }

    fn listen_erased(&mut self, event: TypeId, owner: EventOwner, priority: i32, callback: EventCallback) {
        if self.is_frozen() {
            self.defer(Deferred::Listen {
                event,
                owner,
                priority,
                callback,
            });
        } else {
            self.events.insert(event, owner, priority, callback);
        }
    }

    /// Stops `owner` listening for `E`. Returns whether it was listening.
    pub fn event_unlisten<E: Any>(&mut self, owner: impl Into<EventOwner>) -> bool {
        let owner = owner.into();
        let event = TypeId::of::<E>();
        if self.is_frozen() {
            let present = self.events.contains(event, owner);
            self.defer(Deferred::Unlisten { event, owner });
            return present;
        }
        self.events.remove(event, owner)
    }

    /// Delivers `event` to every listener for `E` in priority order.
    pub fn emit_event<E: Any>(&mut self, event: &E) {
        let snapshot = self.events.snapshot(TypeId::of::<E>());
        if snapshot.is_empty() {
            return;
        }

        let erased: &dyn Any = event;
        let mut guard = self.freeze();
        for (owner, callback) in snapshot {
            if let EventOwner::Component(component) = owner {
                if !guard.component_alive(component) {
                    continue;
                }
            }
            callback(&mut *guard, erased);
        }
    }

    /// Whether anything listens for `E`.
    #[must_use]
    pub fn has_listeners<E: Any>(&self) -> bool {
        self.events.has_listeners(TypeId::of::<E>())
    }
}
