//! Resource registry
//!
//! Built once at startup and passed by reference to whatever needs to look
//! resources up by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::definition::Resource;
use crate::error::{Error, Result};
use crate::repository::RepositoryFactory;

/// Resources keyed by name
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    resources: BTreeMap<String, Arc<Resource>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource; names are unique
    pub fn register(&mut self, resource: Resource) -> Result<Arc<Resource>> {
        let name = resource.name().to_string();
        if self.resources.contains_key(&name) {
            return Err(Error::DuplicateResource(name));
        }
        tracing::debug!(resource = %name, "registered");
        let resource = Arc::new(resource);
        self.resources.insert(name, resource.clone());
        Ok(resource)
    }

    /// Builder form of [`ResourceRegistry::register`]
    pub fn with(mut self, resource: Resource) -> Result<Self> {
        self.register(resource)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Resource>> {
        self.resources.get(name)
    }

    /// Like [`ResourceRegistry::get`], with a `NotFound` error for unknown names
    pub fn resource(&self, name: &str) -> Result<&Arc<Resource>> {
        self.get(name)
            .ok_or_else(|| Error::NotFound(format!("resource {}", name)))
    }

    /// Repository factory of a registered resource, for declaring relations
    pub fn factory(&self, name: &str) -> Result<RepositoryFactory> {
        self.resource(name).map(|r| r.repository().clone())
    }

    /// Registered names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
