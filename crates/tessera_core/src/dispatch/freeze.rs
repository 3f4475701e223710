//! # Freeze Protocol
//!
//! Dispatch holds the system frozen. While frozen, structural changes
//! (registering, unregistering, destroying) are queued instead of applied,
//! so the lists being iterated never change under a running callback.
//!
//! ```text
//! freeze()          frozen += 1
//!   callback        destroy(x)  -> queued
//!   freeze()        frozen += 1   (nested dispatch)
//!   drop guard      frozen -= 1
//! drop guard        frozen -= 1 == 0 -> drain queue
//! ```
//!
//! The queue is drained once per return to zero: registration changes
//! first, then destructions, each in FIFO order, repeated until nothing is
//! left. A guard dropped during a panic restores the counter but leaves
//! the queue for the next drain.

use std::any::TypeId;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};

use super::events::{EventCallback, EventOwner};
use super::registry::{MessageCallback, RequestKey, Scope};
use crate::ecs::{ComponentId, EntityId};
use crate::EntitySystem;

/// A registration change postponed by the freeze.
pub(crate) enum Deferred {
    Request {
        owner: ComponentId,
        key: RequestKey,
        scope: Scope,
        priority: i32,
        required: bool,
        callback: MessageCallback,
    },
    Unrequest {
        owner: ComponentId,
        key: RequestKey,
        scope: Scope,
    },
    Reprioritize {
        owner: ComponentId,
        key: RequestKey,
        scope: Scope,
        priority: i32,
    },
    UnrequestAll(ComponentId),
    DropLocal {
        owner: ComponentId,
        entity: EntityId,
    },
    Listen {
        event: TypeId,
        owner: EventOwner,
        priority: i32,
        callback: EventCallback,
    },
    Unlisten {
        event: TypeId,
        owner: EventOwner,
    },
}

/// A destruction postponed by the freeze.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Destruction {
    Component(ComponentId),
    Entity(EntityId),
}

#[derive(Default)]
pub(crate) struct DeferredQueue {
    pub registrations: VecDeque<Deferred>,
    pub destructions: VecDeque<Destruction>,
}

impl DeferredQueue {
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty() && self.destructions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.registrations.len() + self.destructions.len()
    }
}

/// Keeps an [`EntitySystem`] frozen until dropped.
///
/// Dereferences to the system, so callbacks and nested dispatch can run
/// through the guard.
pub struct FreezeGuard<'a> {
    system: &'a mut EntitySystem,
}

impl Deref for FreezeGuard<'_> {
    type Target = EntitySystem;

    fn deref(&self) -> &EntitySystem {
        self.system
    }
}

impl DerefMut for FreezeGuard<'_> {
    fn deref_mut(&mut self) -> &mut EntitySystem {
        self.system
    }
}

impl Drop for FreezeGuard<'_> {
    fn drop(&mut self) {
        self.system.unfreeze();
    }
}

impl EntitySystem {
    /// Freezes the system until the returned guard is dropped.
    ///
    /// Freezes nest. Structural changes requested while frozen are applied
    /// when the outermost guard goes away.
    pub fn freeze(&mut self) -> FreezeGuard<'_> {
        self.frozen += 1;
        FreezeGuard { system: self }
    }

    /// Whether a dispatch or an explicit guard is active.
    #[inline]
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen > 0
    }

    /// Current nesting depth of the freeze.
    #[inline]
    #[must_use]
    pub fn freeze_depth(&self) -> u32 {
        self.frozen
    }

    /// Number of operations waiting for the freeze to lift.
    #[inline]
    #[must_use]
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub(crate) fn defer(&mut self, op: Deferred) {
        tracing::debug!(depth = self.frozen, "deferring registration change");
        self.deferred.registrations.push_back(op);
    }

    pub(crate) fn defer_destruction(&mut self, op: Destruction) {
        tracing::debug!(depth = self.frozen, ?op, "deferring destruction");
        self.deferred.destructions.push_back(op);
    }

    fn unfreeze(&mut self) {
        debug_assert!(self.frozen > 0, "unfreeze without matching freeze");
        self.frozen = self.frozen.saturating_sub(1);
        if self.frozen > 0 {
            return;
        }

        if std::thread::panicking() {
            // An unwinding drain never reaches its own reset.
            self.draining = false;
            return;
        }

        if !self.draining {
            self.drain_deferred();
        }
    }

    /// Applies everything queued while frozen.
    ///
    /// Does nothing while frozen. Only needed after a panic unwound through
    /// dispatch; the normal path drains automatically.
    pub fn flush_deferred(&mut self) {
        if self.frozen == 0 && !self.draining {
            self.drain_deferred();
        }
    }

    fn drain_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }

        self.draining = true;
        let mut applied = 0usize;
        loop {
            if let Some(op) = self.deferred.registrations.pop_front() {
                self.replay(op);
            } else if let Some(op) = self.deferred.destructions.pop_front() {
                match op {
                    Destruction::Component(id) => {
                        self.component_destroy(id);
                    }
                    Destruction::Entity(id) => {
                        self.entity_destroy(id);
                    }
                }
            } else {
                break;
            }
            applied += 1;
        }
        self.draining = false;
        tracing::debug!(applied, "drained deferred operations");
    }

    fn replay(&mut self, op: Deferred) {
        let result = match op {
            Deferred::Request {
                owner,
                key,
                scope,
                priority,
                required,
                callback,
            } => {
                if !self.component_alive(owner) {
                    tracing::trace!(%owner, "dropping deferred request of destroyed component");
                    return;
                }
                self.request_erased(owner, key, scope, priority, required, callback)
            }
            Deferred::Unrequest { owner, key, scope } => {
                self.unrequest_key(owner, key, scope);
                Ok(())
            }
            Deferred::Reprioritize {
                owner,
                key,
                scope,
                priority,
            } => {
                self.reprioritize_key(owner, key, scope, priority);
                Ok(())
            }
            Deferred::UnrequestAll(owner) => {
                self.unrequest_all(owner);
                Ok(())
            }
            Deferred::DropLocal { owner, entity } => {
                self.messages.remove_local(owner, entity);
                Ok(())
            }
            Deferred::Listen {
                event,
                owner,
                priority,
                callback,
            } => {
                if let EventOwner::Component(component) = owner {
                    if !self.component_alive(component) {
                        return;
                    }
                }
                self.events.insert(event, owner, priority, callback);
                Ok(())
            }
            Deferred::Unlisten { event, owner } => {
                self.events.remove(event, owner);
                Ok(())
            }
        };

        if let Err(error) = result {
            tracing::warn!(%error, "deferred registration failed");
        }
    }
}
