//! Named provider registry shared by a scaffold.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::AgentProvider;

/// Process-local map of provider name to shared instance. Providers are
/// stateless, so one instance serves every session.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn AgentProvider>>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: Arc<dyn AgentProvider>) {
        let mut inner = self.inner.write().expect("provider registry poisoned");
        inner.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentProvider>> {
        let inner = self.inner.read().expect("provider registry poisoned");
        inner.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read().expect("provider registry poisoned");
        let mut names: Vec<String> = inner.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read().expect("provider registry poisoned");
        inner.is_empty()
    }
}
