//! Addon registry: extension factories keyed by addon name
//!
//! A graph node names the addon that instantiates it. Apps register
//! addons up front; engines create extension instances through the
//! registry on the owning group thread.

use std::collections::HashMap;
use std::sync::Arc;

use crate::extension::Extension;
use crate::schema::Schema;
use crate::{Error, Result};

/// Factory for one extension type.
pub trait ExtensionAddon: Send + Sync {
    /// Create a fresh extension instance.
    fn create_instance(&self) -> Box<dyn Extension>;

    /// Optional schema predicate applied at this extension's message and
    /// property boundaries.
    fn schema(&self) -> Schema {
        Schema::default()
    }
}

struct FnAddon<F> {
    factory: F,
}

impl<F> ExtensionAddon for FnAddon<F>
where
    F: Fn() -> Box<dyn Extension> + Send + Sync,
{
    fn create_instance(&self) -> Box<dyn Extension> {
        (self.factory)()
    }
}

/// Registry of known addon types.
#[derive(Default)]
pub struct AddonRegistry {
    factories: HashMap<String, Arc<dyn ExtensionAddon>>,
}

impl AddonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an addon under `name`.
    pub fn register(&mut self, name: impl Into<String>, addon: Arc<dyn ExtensionAddon>) {
        self.factories.insert(name.into(), addon);
    }

    /// Register a plain factory closure under `name`.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnAddon { factory }));
    }

    /// Instantiate the addon registered under `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn Extension>> {
        self.factories
            .get(name)
            .map(|addon| addon.create_instance())
            .ok_or_else(|| Error::ExtensionInvalid(format!("addon '{name}' is not registered")))
    }

    /// Schema predicate for the addon registered under `name`.
    pub fn schema_for(&self, name: &str) -> Schema {
        self.factories
            .get(name)
            .map(|addon| addon.schema())
            .unwrap_or_default()
    }

    pub fn has(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// All registered addon names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}
