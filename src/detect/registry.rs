use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::{InferenceBackend, InferenceParams};
use super::backends::{CpuBackend, StubBackend};
use super::stage::InferenceStage;

/// Registry of loaded inference backends, keyed by name.
///
/// Backends are wrapped in `Mutex` because `InferenceBackend::infer` takes
/// `&mut self`; a backend handed to several stages is still one loaded
/// instance.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<Mutex<dyn InferenceBackend>>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry preloaded with the backends that need no model file
    /// (`cpu` as default, then `stub`).
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(CpuBackend::new());
        registry.register(StubBackend::new());
        registry
    }

    /// Register a backend. The first registered backend becomes the default.
    /// A backend with the same name replaces the previous one.
    pub fn register<B: InferenceBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Mutex<dyn InferenceBackend>>> {
        self.backends.get(name).cloned()
    }

    pub fn default_backend(&self) -> Option<Arc<Mutex<dyn InferenceBackend>>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// Registered backend names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build an inference stage around the named backend, or the default
    /// backend when `name` is `None`.
    pub fn stage(&self, name: Option<&str>, params: InferenceParams) -> Result<InferenceStage> {
        let backend = match name {
            Some(name) => self.get(name).ok_or_else(|| {
                anyhow!(
                    "backend '{}' not registered (available: {})",
                    name,
                    self.list().join(", ")
                )
            })?,
            None => self
                .default_backend()
                .ok_or_else(|| anyhow!("no inference backend registered"))?,
        };
        Ok(InferenceStage::new(backend, params))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
