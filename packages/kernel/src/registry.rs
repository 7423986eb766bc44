//! Service registry for looking up services by name.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::runtime::ServiceHandle;

/// Name-to-service map shared by everything that routes messages.
///
/// This and the pending-request table are the only state shared across
/// service tasks; each service's own state stays on its task.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, ServiceHandle>>,
}

impl ServiceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handle` to `name`, returning the handle it replaced.
    pub fn insert(&self, name: &str, handle: ServiceHandle) -> Option<ServiceHandle> {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), handle)
    }

    /// Remove the binding for `name`.
    pub fn remove(&self, name: &str) -> Option<ServiceHandle> {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Get a service by name.
    pub fn get(&self, name: &str) -> Option<ServiceHandle> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// List all registered service names.
    pub fn names(&self) -> Vec<String> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Snapshot of every registered service.
    pub fn handles(&self) -> Vec<ServiceHandle> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
