//! Component Registry - Tag to factory mapping.
//!
//! Manages which tags name components:
//! - Tag → [`Factory`] lookup for the template walker
//! - Duplicate tag detection
//! - A thread-local default registry behind the free [`component`] function
//!
//! Factories keep a weak handle back to their registry so instances can
//! resolve child tags without the registry owning itself.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::pipeline::{ComponentDef, ComponentInput, Factory};
use crate::state::State;

type Factories = RefCell<HashMap<Rc<str>, Factory>>;

// =============================================================================
// Registry
// =============================================================================

/// A set of component definitions addressable by tag.
///
/// Cloning a `Registry` clones the handle.
#[derive(Clone, Default)]
pub struct Registry(Rc<Factories>);

/// Non-owning registry handle held by factories.
#[derive(Clone, Default)]
pub struct WeakRegistry(Weak<Factories>);

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<Registry> {
        self.0.upgrade().map(Registry)
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry(Rc::downgrade(&self.0))
    }

    /// Add a definition. Fails if its tag is already taken.
    pub fn register(&self, def: ComponentDef) -> Result<Factory> {
        let tag: Rc<str> = def.tag().into();
        if self.0.borrow().contains_key(&tag) {
            return Err(Error::DuplicateTag(tag.to_string()));
        }
        let factory = Factory::new(def, self.downgrade());
        self.0.borrow_mut().insert(Rc::clone(&tag), factory.clone());
        tracing::debug!(tag = %tag, "component registered");
        Ok(factory)
    }

    /// Define and register in one step.
    pub fn component(
        &self,
        tag: &str,
        template: &str,
        state_fn: impl Fn(&ComponentInput) -> State + 'static,
    ) -> Result<Factory> {
        self.register(ComponentDef::new(tag, template, state_fn)?)
    }

    pub fn lookup(&self, tag: &str) -> Option<Factory> {
        self.0.borrow().get(tag).cloned()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.borrow().contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.0.borrow().keys().map(|t| t.to_string()).collect();
        tags.sort();
        tags
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("tags", &self.tags()).finish()
    }
}

// =============================================================================
// Default registry
// =============================================================================

thread_local! {
    /// Registry used by the free functions.
    static DEFAULT: Registry = Registry::new();
}

/// The thread's default registry.
pub fn registry() -> Registry {
    DEFAULT.with(Registry::clone)
}

/// Define a component in the default registry.
pub fn component(
    tag: &str,
    template: &str,
    state_fn: impl Fn(&ComponentInput) -> State + 'static,
) -> Result<Factory> {
    registry().component(tag, template, state_fn)
}

/// Remove every definition from the default registry (for testing).
pub fn reset_registry() {
    DEFAULT.with(Registry::clear);
}
