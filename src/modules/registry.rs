//! The set of modules known to the process.
//!
//! The registry is owned by [`App`](crate::app::App) and shared with the
//! dispatcher. Registration happens at startup; there is no unregister.
//! Readers take a [`snapshot`](ModuleRegistry::snapshot) and iterate it
//! without holding the lock.

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error};

use super::ModuleDescriptor;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("module already registered: {0}")]
    AlreadyRegistered(String),
}

/// Modules in registration order, unique by name.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<Vec<ModuleDescriptor>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module. A second module with the same name is rejected and the
    /// first one stays in place.
    pub async fn register(&self, descriptor: ModuleDescriptor) -> Result<(), RegistryError> {
        let mut modules = self.modules.write().await;

        if modules.iter().any(|m| m.name == descriptor.name) {
            error!(module = %descriptor.name, "Module already registered; keeping the first");
            return Err(RegistryError::AlreadyRegistered(descriptor.name));
        }

        debug!(
            module = %descriptor.name,
            initializer = descriptor.initializer.is_some(),
            shutdowner = descriptor.shutdowner.is_some(),
            "Registered module"
        );
        modules.push(descriptor);
        Ok(())
    }

    /// An independent copy of the current module list.
    pub async fn snapshot(&self) -> Vec<ModuleDescriptor> {
        self.modules.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.modules.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.modules.read().await.is_empty()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.modules.read().await.iter().any(|m| m.name == name)
    }

    pub async fn get(&self, name: &str) -> Option<ModuleDescriptor> {
        self.modules
            .read()
            .await
            .iter()
            .find(|m| m.name == name)
            .cloned()
    }
}
