//! Backend registry -- a named collection of available backend adapters.

use std::collections::HashMap;
use std::sync::Arc;

use super::trait_def::Backend;

/// A collection of registered [`Backend`] implementations, keyed by name.
///
/// Stores backends behind `Arc` rather than `Box` so that `get` can hand
/// callers an owned, shareable handle -- `pilot-cli`'s `serve` command
/// looks one up here and moves it straight into a [`crate::dispatcher::
/// Dispatcher`], which takes ownership of its `Arc<dyn Backend>`.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend adapter, replacing any previous one under the
    /// same name and returning it.
    pub fn register(&mut self, backend: impl Backend + 'static) -> Option<Arc<dyn Backend>> {
        let name = backend.name().to_string();
        self.backends.insert(name, Arc::new(backend))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.backends.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}
