use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::VisionBackend;
use super::backends::{CpuBackend, StubBackend};

/// Named vision backends shared across stabilizers and indicator runs.
///
/// Backends take `&self` everywhere, so they are shared as plain `Arc`s.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn VisionBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Registry with the built-in `cpu` and `stub` backends.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(CpuBackend::new());
        registry.register(StubBackend::new());
        registry
    }

    /// Register a backend under its own name, replacing any previous one.
    pub fn register<B: VisionBackend + 'static>(&mut self, backend: B) {
        self.backends
            .insert(backend.name().to_string(), Arc::new(backend));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn VisionBackend>> {
        self.backends.get(name).cloned()
    }

    /// Backend by name, with the registered names in the error.
    pub fn require(&self, name: &str) -> Result<Arc<dyn VisionBackend>> {
        self.get(name).ok_or_else(|| {
            let mut names = self.list();
            names.sort();
            anyhow!(
                "unknown vision backend '{}' (available: {})",
                name,
                names.join(", ")
            )
        })
    }

    pub fn list(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
