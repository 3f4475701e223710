//! # Factories and Templates
//!
//! Named component constructors, and named lists of them for building a
//! whole entity in one call.
//!
//! ```rust
//! use tessera_core::{Component, EntitySystem};
//!
//! struct Health(u32);
//! impl Component for Health {
//!     const NAME: &'static str = "Health";
//! }
//!
//! let mut system = EntitySystem::new();
//! system.register_factory("health", |system| system.component_create(Health(100)))?;
//! system.register_template("soldier", ["health"]);
//!
//! let soldier = system.entity_create_from_template("soldier")?;
//! assert_eq!(system.entity_get::<Health>(soldier).map(|h| h.0), Some(100));
//! # Ok::<(), tessera_core::EcsError>(())
//! ```

use std::rc::Rc;

use super::id::{ComponentId, EntityId};
use crate::error::{EcsError, EcsResult};
use crate::EntitySystem;

/// Constructor registered under a name.
pub type Factory = Rc<dyn Fn(&mut EntitySystem) -> EcsResult<ComponentId>>;

impl EntitySystem {
    /// Registers a named component constructor.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DuplicateFactory`] if the name is taken.
    pub fn register_factory<F>(&mut self, name: &str, factory: F) -> EcsResult<()>
    where
        F: Fn(&mut EntitySystem) -> EcsResult<ComponentId> + 'static,
    {
        if self.factories.contains_key(name) {
            return Err(EcsError::DuplicateFactory(name.to_string()));
        }
        self.factories.insert(name.to_string(), Rc::new(factory));
        tracing::debug!(name, "component factory registered");
        Ok(())
    }

    /// Whether a factory is registered under `name`.
    #[must_use]
    pub fn has_factory(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Creates an unattached component with a named factory.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownFactory`], or whatever the factory returns.
    pub fn component_create_named(&mut self, name: &str) -> EcsResult<ComponentId> {
        let factory = self
            .factories
            .get(name)
            .cloned()
            .ok_or_else(|| EcsError::UnknownFactory(name.to_string()))?;
        factory(self)
    }

    /// Registers a template as a list of factory names. Re-registering a
    /// name replaces the old list.
    ///
    /// Factory names are resolved when the template is instantiated.
    pub fn register_template<I, S>(&mut self, name: &str, factories: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let factories: Vec<String> = factories.into_iter().map(Into::into).collect();
        tracing::debug!(name, components = factories.len(), "entity template registered");
        self.templates.insert(name.to_string(), factories);
    }

    /// Factory names of a template.
    #[must_use]
    pub fn template(&self, name: &str) -> Option<&[String]> {
        self.templates.get(name).map(Vec::as_slice)
    }

    /// Builds an entity from a template: creates it, creates and attaches
    /// one component per factory, then finalizes it.
    ///
    /// On any failure the half-built entity is destroyed.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownTemplate`], or the first error from creating,
    /// attaching or finalizing.
    pub fn entity_create_from_template(&mut self, name: &str) -> EcsResult<EntityId> {
        let factories = self
            .templates
            .get(name)
            .cloned()
            .ok_or_else(|| EcsError::UnknownTemplate(name.to_string()))?;

        let entity = self.entity_create()?;
        if let Err(error) = self.assemble(entity, &factories) {
            tracing::debug!(template = name, %error, "template instantiation failed");
            self.entity_destroy(entity);
            return Err(error);
        }
        Ok(entity)
    }

    fn assemble(&mut self, entity: EntityId, factories: &[String]) -> EcsResult<()> {
        for factory in factories {
            let component = self.component_create_named(factory)?;
            if let Err(error) = self.component_attach(component, entity) {
                self.component_destroy(component);
                return Err(error);
            }
        }
        self.finalize_entity(entity)
    }
}
