//! # Request Registries
//!
//! Priority-ordered callback lists and the global/local tables holding them.
//!
//! Lists are kept sorted by ascending priority. New entries go after every
//! entry of equal priority, so ties fire in registration order.

use std::collections::HashMap;
use std::rc::Rc;

use super::message::{Message, MessageId};
use crate::ecs::{ComponentId, EntityId, Family};
use crate::EntitySystem;

/// Callback for named messages and family notifications.
///
/// Receives the system, the registering component and the message.
pub type MessageCallback = Rc<dyn Fn(&mut EntitySystem, ComponentId, &mut Message)>;

/// What a registration listens to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKey {
    /// A named message.
    Message(MessageId),
    /// Attach/detach/destroy notifications for a component family.
    Family(Family),
}

/// Visibility of a registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Receives every global send of the key.
    Global,
    /// Receives only sends targeted at the owner's entity.
    Local,
}

/// Resolved location of a registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Target {
    Global,
    Local(EntityId),
}

/// One registration.
#[derive(Clone)]
pub(crate) struct Registration<O, C> {
    pub owner: O,
    pub callback: C,
    pub priority: i32,
    pub required: bool,
}

/// Registrations for one key, sorted by priority.
pub(crate) struct RequestList<O, C> {
    entries: Vec<Registration<O, C>>,
}

impl<O, C> Default for RequestList<O, C> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<O: Copy + PartialEq, C: Clone> RequestList<O, C> {
    /// Inserts after every entry of equal or lower priority. An existing
    /// entry with the same owner is replaced.
    pub fn insert(&mut self, registration: Registration<O, C>) {
        self.remove(registration.owner);
        let at = self
            .entries
            .partition_point(|r| r.priority <= registration.priority);
        self.entries.insert(at, registration);
    }

    pub fn remove(&mut self, owner: O) -> Option<Registration<O, C>> {
        let at = self.entries.iter().position(|r| r.owner == owner)?;
        Some(self.entries.remove(at))
    }

    /// Moves an owner's entry to a new priority.
    pub fn reprioritize(&mut self, owner: O, priority: i32) -> bool {
        let Some(mut registration) = self.remove(owner) else {
            return false;
        };
        registration.priority = priority;
        self.insert(registration);
        true
    }

    pub fn contains(&self, owner: O) -> bool {
        self.entries.iter().any(|r| r.owner == owner)
    }

    /// Copy of the list, safe to iterate while the live list changes.
    pub fn snapshot(&self) -> Vec<(O, C)> {
        self.entries
            .iter()
            .map(|r| (r.owner, r.callback.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration<O, C>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

type MessageList = RequestList<ComponentId, MessageCallback>;

/// Global and per-entity message registries.
///
/// Every registration is also indexed by owner so a component's requests
/// can be torn down without scanning all lists.
#[derive(Default)]
pub(crate) struct MessageRegistry {
    global: HashMap<RequestKey, MessageList>,
    local: HashMap<(EntityId, RequestKey), MessageList>,
    by_component: HashMap<ComponentId, Vec<(RequestKey, Target)>>,
}

impl MessageRegistry {
    fn list(&self, key: RequestKey, target: Target) -> Option<&MessageList> {
        match target {
            Target::Global => self.global.get(&key),
            Target::Local(entity) => self.local.get(&(entity, key)),
        }
    }

    fn list_mut(&mut self, key: RequestKey, target: Target) -> Option<&mut MessageList> {
        match target {
            Target::Global => self.global.get_mut(&key),
            Target::Local(entity) => self.local.get_mut(&(entity, key)),
        }
    }

    fn prune(&mut self, key: RequestKey, target: Target) {
        if self.list(key, target).is_some_and(RequestList::is_empty) {
            match target {
                Target::Global => self.global.remove(&key),
                Target::Local(entity) => self.local.remove(&(entity, key)),
            };
        }
    }

    pub fn insert(
        &mut self,
        key: RequestKey,
        target: Target,
        registration: Registration<ComponentId, MessageCallback>,
    ) {
        let owner = registration.owner;
        let list = match target {
            Target::Global => self.global.entry(key).or_default(),
            Target::Local(entity) => self.local.entry((entity, key)).or_default(),
        };
        list.insert(registration);

        let index = self.by_component.entry(owner).or_default();
        if !index.contains(&(key, target)) {
            index.push((key, target));
        }
    }

    pub fn remove(&mut self, owner: ComponentId, key: RequestKey, target: Target) -> bool {
        let removed = self
            .list_mut(key, target)
            .and_then(|list| list.remove(owner))
            .is_some();
        if removed {
            self.prune(key, target);
            if let Some(index) = self.by_component.get_mut(&owner) {
                index.retain(|entry| *entry != (key, target));
                if index.is_empty() {
                    self.by_component.remove(&owner);
                }
            }
        }
        removed
    }

    pub fn reprioritize(
        &mut self,
        owner: ComponentId,
        key: RequestKey,
        target: Target,
        priority: i32,
    ) -> bool {
        self.list_mut(key, target)
            .is_some_and(|list| list.reprioritize(owner, priority))
    }

    pub fn contains(&self, owner: ComponentId, key: RequestKey, target: Target) -> bool {
        self.list(key, target).is_some_and(|list| list.contains(owner))
    }

    /// Removes every registration of `owner`. Returns how many were removed.
    pub fn remove_all(&mut self, owner: ComponentId) -> usize {
        let Some(entries) = self.by_component.remove(&owner) else {
            return 0;
        };
        let mut removed = 0;
        for (key, target) in entries {
            if self
                .list_mut(key, target)
                .and_then(|list| list.remove(owner))
                .is_some()
            {
                removed += 1;
            }
            self.prune(key, target);
        }
        removed
    }

    /// Removes the registrations `owner` holds in `entity`'s local lists.
    pub fn remove_local(&mut self, owner: ComponentId, entity: EntityId) -> usize {
        let locals: Vec<RequestKey> = self
            .by_component
            .get(&owner)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, target)| *target == Target::Local(entity))
                    .map(|(key, _)| *key)
                    .collect()
            })
            .unwrap_or_default();

        locals
            .into_iter()
            .filter(|key| self.remove(owner, *key, Target::Local(entity)))
            .count()
    }

    /// Snapshot of the registrations for `key` at `target`.
    pub fn snapshot(&self, key: RequestKey, target: Target) -> Vec<(ComponentId, MessageCallback)> {
        self.list(key, target)
            .map(RequestList::snapshot)
            .unwrap_or_default()
    }

    /// Families `owner` watches with the `required` flag, at `target`.
    pub fn required_families(&self, owner: ComponentId) -> Vec<Family> {
        let Some(entries) = self.by_component.get(&owner) else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|(key, target)| match key {
                RequestKey::Family(family) => self
                    .list(*key, *target)?
                    .iter()
                    .any(|r| r.owner == owner && r.required)
                    .then_some(*family),
                RequestKey::Message(_) => None,
            })
            .collect()
    }

    /// Total number of registrations.
    pub fn len(&self) -> usize {
        self.global.values().map(RequestList::len).sum::<usize>()
            + self.local.values().map(RequestList::len).sum::<usize>()
    }
}
