//! Registering for and sending named messages.

use std::rc::Rc;

use super::freeze::Deferred;
use super::message::{Message, MessageId, MessageKind};
use super::registry::{MessageCallback, Registration, RequestKey, Scope, Target};
use crate::ecs::{ComponentId, EntityId, Family};
use crate::error::{EcsError, EcsResult};
use crate::EntitySystem;

impl EntitySystem {
    /// Hashes a message name, rejecting names that collide with one seen
    /// before.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::HashCollision`] on a collision.
    pub fn message_id(&mut self, name: &str) -> EcsResult<MessageId> {
        self.names.register(name)
    }

    /// Name a message id was registered under through [`message_id`](Self::message_id).
    #[must_use]
    pub fn message_name(&self, id: MessageId) -> Option<&str> {
        self.names.name(id)
    }

    /// Registers `owner` for message `id`.
    ///
    /// Lower priorities run first. Registering the same owner, id and scope
    /// again replaces the earlier registration. Applied after the freeze
    /// lifts when called during dispatch.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidComponent`] for a dead owner, [`EcsError::Unattached`]
    /// for a local registration by a component without an entity.
    pub fn message_request<F>(
        &mut self,
        owner: ComponentId,
        id: MessageId,
        scope: Scope,
        priority: i32,
        callback: F,
    ) -> EcsResult<()>
    where
        F: Fn(&mut EntitySystem, ComponentId, &mut Message) + 'static,
    {
        self.request_erased(
            owner,
            RequestKey::Message(id),
            scope,
            priority,
            false,
            Rc::new(callback),
        )
    }

    /// Watches attach, detach and destroy of components of `family`.
    ///
    /// The callback immediately receives an [`MessageKind::Attached`]
    /// notification for every component already attached in scope. A
    /// `required` watch makes [`finalize_entity`](Self::finalize_entity) fail
    /// on the owner's entity unless it holds `family`.
    ///
    /// # Errors
    ///
    /// Same as [`message_request`](Self::message_request); a `required`
    /// watch also needs an attached owner.
    pub fn component_request<F>(
        &mut self,
        owner: ComponentId,
        family: Family,
        scope: Scope,
        priority: i32,
        required: bool,
        callback: F,
    ) -> EcsResult<()>
    where
        F: Fn(&mut EntitySystem, ComponentId, &mut Message) + 'static,
    {
        self.request_erased(
            owner,
            RequestKey::Family(family),
            scope,
            priority,
            required,
            Rc::new(callback),
        )
    }

    pub(crate) fn request_erased(
        &mut self,
        owner: ComponentId,
        key: RequestKey,
        scope: Scope,
        priority: i32,
        required: bool,
        callback: MessageCallback,
    ) -> EcsResult<()> {
        if !self.component_alive(owner) {
            return Err(EcsError::InvalidComponent(owner));
        }
        let entity = self.component_owner(owner);
        if entity.is_none() && (required || scope == Scope::Local) {
            return Err(EcsError::Unattached(owner));
        }

        if self.is_frozen() {
            self.defer(Deferred::Request {
                owner,
                key,
                scope,
                priority,
                required,
                callback,
            });
            return Ok(());
        }

        let target = match (scope, entity) {
            (Scope::Local, Some(entity)) => Target::Local(entity),
            _ => Target::Global,
        };
        self.messages.insert(
            key,
            target,
            Registration {
                owner,
                callback: callback.clone(),
                priority,
                required,
            },
        );
        tracing::trace!(%owner, ?key, ?scope, priority, "request registered");

        if let RequestKey::Family(family) = key {
            self.replay_attached(owner, family, target, &callback);
        }
        Ok(())
    }

    /// Removes `owner`'s registration for message `id`.
    ///
    /// Returns whether one existed. Deferred while frozen.
    pub fn message_unrequest(&mut self, owner: ComponentId, id: MessageId, scope: Scope) -> bool {
        self.unrequest_key(owner, RequestKey::Message(id), scope)
    }

    /// Removes `owner`'s watch on `family`.
    pub fn component_unrequest(&mut self, owner: ComponentId, family: Family, scope: Scope) -> bool {
        self.unrequest_key(owner, RequestKey::Family(family), scope)
    }

    /// Moves `owner`'s registration for message `id` to a new priority.
    pub fn message_reprioritize(
        &mut self,
        owner: ComponentId,
        id: MessageId,
        scope: Scope,
        priority: i32,
    ) -> bool {
        self.reprioritize_key(owner, RequestKey::Message(id), scope, priority)
    }

    /// Moves `owner`'s watch on `family` to a new priority.
    pub fn component_reprioritize(
        &mut self,
        owner: ComponentId,
        family: Family,
        scope: Scope,
        priority: i32,
    ) -> bool {
        self.reprioritize_key(owner, RequestKey::Family(family), scope, priority)
    }

    /// Removes every message registration, family watch and event listener
    /// of `owner`.
    ///
    /// Returns the number removed; 0 when deferred by the freeze.
    pub fn unrequest_all(&mut self, owner: ComponentId) -> usize {
        if self.is_frozen() {
            self.defer(Deferred::UnrequestAll(owner));
            return 0;
        }
        let removed = self.messages.remove_all(owner) + self.events.remove_component(owner);
        if removed > 0 {
            tracing::trace!(%owner, removed, "requests removed");
        }
        removed
    }

    /// Number of message and family registrations currently held.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.messages.len()
    }

    fn resolve_target(&self, owner: ComponentId, scope: Scope) -> Option<Target> {
        match scope {
            Scope::Global => Some(Target::Global),
            Scope::Local => self.component_owner(owner).map(Target::Local),
        }
    }

    pub(crate) fn unrequest_key(&mut self, owner: ComponentId, key: RequestKey, scope: Scope) -> bool {
        let Some(target) = self.resolve_target(owner, scope) else {
            return false;
        };
        if self.is_frozen() {
            let present = self.messages.contains(owner, key, target);
            self.defer(Deferred::Unrequest { owner, key, scope });
            return present;
        }
        self.messages.remove(owner, key, target)
    }

    pub(crate) fn reprioritize_key(
        &mut self,
        owner: ComponentId,
        key: RequestKey,
        scope: Scope,
        priority: i32,
    ) -> bool {
        let Some(target) = self.resolve_target(owner, scope) else {
            return false;
        };
        if self.is_frozen() {
            let present = self.messages.contains(owner, key, target);
            self.defer(Deferred::Reprioritize {
                owner,
                key,
                scope,
                priority,
            });
            return present;
        }
        self.messages.reprioritize(owner, key, target, priority)
    }

    /// Drops `owner`'s registrations local to `entity`.
    pub(crate) fn drop_local_requests(&mut self, owner: ComponentId, entity: EntityId) {
        if self.is_frozen() {
            self.defer(Deferred::DropLocal { owner, entity });
        } else {
            self.messages.remove_local(owner, entity);
        }
    }

    /// Sends a message to every global registration for `id`.
    ///
    /// Local registrations never see global sends.
    pub fn send_global(&mut self, id: MessageId, message: &mut Message) {
        message.set_entity(None);
        let snapshot = self.messages.snapshot(RequestKey::Message(id), Target::Global);
        self.dispatch(snapshot, None, message, false);
    }

    /// Sends a message to the registrations local to `entity`.
    pub fn send_local(&mut self, entity: EntityId, id: MessageId, message: &mut Message) {
        if !self.entity_alive(entity) {
            return;
        }
        message.set_entity(Some(entity));
        let snapshot = self
            .messages
            .snapshot(RequestKey::Message(id), Target::Local(entity));
        self.dispatch(snapshot, Some(entity), message, false);
    }

    /// Asks every global registration for `id` until one handles it.
    ///
    /// Returns whether the question was handled.
    pub fn question_global(&mut self, id: MessageId, message: &mut Message) -> bool {
        message.set_entity(None);
        let snapshot = self.messages.snapshot(RequestKey::Message(id), Target::Global);
        self.dispatch(snapshot, None, message, true);
        message.is_handled()
    }

    /// Asks the registrations local to `entity` until one handles it.
    pub fn question_local(&mut self, entity: EntityId, id: MessageId, message: &mut Message) -> bool {
        if !self.entity_alive(entity) {
            return false;
        }
        message.set_entity(Some(entity));
        let snapshot = self
            .messages
            .snapshot(RequestKey::Message(id), Target::Local(entity));
        self.dispatch(snapshot, Some(entity), message, true);
        message.is_handled()
    }

    /// Delivers a message to one component's registration for `id`.
    ///
    /// Its local registration is preferred over its global one. Returns
    /// whether anything was called.
    pub fn send_to_component(
        &mut self,
        component: ComponentId,
        id: MessageId,
        message: &mut Message,
    ) -> bool {
        if !self.component_alive(component) {
            return false;
        }
        let key = RequestKey::Message(id);
        let entity = self.component_owner(component);
        message.set_entity(entity);

        let local = entity
            .map(|entity| self.messages.snapshot(key, Target::Local(entity)))
            .unwrap_or_default();
        let callback = local
            .into_iter()
            .chain(self.messages.snapshot(key, Target::Global))
            .find(|(owner, _)| *owner == component);

        let Some(callback) = callback else {
            return false;
        };
        self.dispatch(vec![callback], None, message, false);
        true
    }

    fn dispatch(
        &mut self,
        snapshot: Vec<(ComponentId, MessageCallback)>,
        local_to: Option<EntityId>,
        message: &mut Message,
        question: bool,
    ) {
        if snapshot.is_empty() {
            return;
        }
        let mut guard = self.freeze();
        for (owner, callback) in snapshot {
            if question && message.is_handled() {
                break;
            }
            if !guard.component_alive(owner) {
                continue;
            }
            // Detached by an earlier callback.
            if local_to.is_some() && guard.component_owner(owner) != local_to {
                continue;
            }
            callback(&mut *guard, owner, message);
        }
    }

    /// Tells family watchers about `component`, local watchers first.
    ///
    /// A component is never told about itself.
    pub(crate) fn notify_family(&mut self, kind: MessageKind, component: ComponentId, entity: EntityId) {
        let key = RequestKey::Family(component.family());
        let mut snapshot = self.messages.snapshot(key, Target::Local(entity));
        snapshot.extend(self.messages.snapshot(key, Target::Global));
        if snapshot.is_empty() {
            return;
        }

        let mut message = Message::notification(kind, component, entity);
        let mut guard = self.freeze();
        for (owner, callback) in snapshot {
            if owner == component || !guard.component_alive(owner) {
                continue;
            }
            callback(&mut *guard, owner, &mut message);
        }
    }

    fn replay_attached(
        &mut self,
        owner: ComponentId,
        family: Family,
        target: Target,
        callback: &MessageCallback,
    ) {
        let existing: Vec<(ComponentId, EntityId)> = match target {
            Target::Global => self.attached_of_family(family),
            Target::Local(entity) => self
                .entity_component(entity, family)
                .map(|component| (component, entity))
                .into_iter()
                .collect(),
        };
        if existing.is_empty() {
            return;
        }

        let mut guard = self.freeze();
        for (component, entity) in existing {
            if component == owner
                || !guard.component_alive(owner)
                || guard.component_owner(component) != Some(entity)
            {
                continue;
            }
            let mut message = Message::notification(MessageKind::Attached, component, entity);
            callback(&mut *guard, owner, &mut message);
        }
    }
}
