//! Runtime backend registry for selecting batch-norm backends by name.
//!
//! Backend crates register constructors at load time; suites and tools look them up without
//! naming the concrete type. The concrete backend is recovered with [`get_typed_backend`].

use super::spec::BatchNormBackend;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Factory function that creates a new backend instance.
pub type BackendConstructor = Box<dyn Fn() -> Box<dyn ErasedBackend> + Send + Sync>;

/// Type-erased view of a [`BatchNormBackend`] exposing its identity.
pub trait ErasedBackend: Send + Sync {
    fn backend_name(&self) -> &str;

    fn device_name(&self) -> String;

    fn device_arch(&self) -> String;

    /// Clone this backend as a trait object sharing the same device state.
    fn clone_backend(&self) -> Box<dyn ErasedBackend>;

    /// Downcast to Any for type recovery.
    fn as_any(&self) -> &dyn Any;
}

struct BackendWrapper<B: BatchNormBackend> {
    inner: Arc<B>,
}

impl<B: BatchNormBackend + 'static> ErasedBackend for BackendWrapper<B> {
    fn backend_name(&self) -> &str {
        self.inner.backend_name()
    }

    fn device_name(&self) -> String {
        self.inner.device_name()
    }

    fn device_arch(&self) -> String {
        self.inner.device_arch()
    }

    fn clone_backend(&self) -> Box<dyn ErasedBackend> {
        Box::new(BackendWrapper {
            inner: Arc::clone(&self.inner),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct BackendRegistry {
    backends: RwLock<HashMap<String, BackendConstructor>>,
}

impl BackendRegistry {
    fn new() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, name: String, constructor: BackendConstructor) {
        self.backends
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, constructor);
    }

    fn create(&self, name: &str) -> Option<Box<dyn ErasedBackend>> {
        let registry = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        let constructor = registry.get(name)?;
        Some(constructor())
    }

    fn list_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn has_backend(&self, name: &str) -> bool {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

static GLOBAL_REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();

fn global_registry() -> &'static BackendRegistry {
    GLOBAL_REGISTRY.get_or_init(BackendRegistry::new)
}

/// Register a type-erased backend constructor under `name`, replacing any previous entry.
pub fn register_backend<F>(name: impl Into<String>, constructor: F)
where
    F: Fn() -> Box<dyn ErasedBackend> + Send + Sync + 'static,
{
    global_registry().register(name.into(), Box::new(constructor));
}

/// Register a concrete [`BatchNormBackend`] constructor.
pub fn register_batch_norm_backend<B, F>(name: impl Into<String>, constructor: F)
where
    B: BatchNormBackend + 'static,
    F: Fn() -> B + Send + Sync + 'static,
{
    register_backend(name, move || -> Box<dyn ErasedBackend> {
        Box::new(BackendWrapper {
            inner: Arc::new(constructor()),
        })
    });
}

/// Create a backend instance by name; `None` if nothing is registered under it.
pub fn create_backend(name: &str) -> Option<Box<dyn ErasedBackend>> {
    global_registry().create(name)
}

/// Registered backend names, sorted.
pub fn list_backends() -> Vec<String> {
    global_registry().list_backends()
}

pub fn has_backend(name: &str) -> bool {
    global_registry().has_backend(name)
}

/// Recovers the concrete backend behind a registry handle.
pub fn get_typed_backend<B: BatchNormBackend + 'static>(
    backend: &dyn ErasedBackend,
) -> Option<Arc<B>> {
    backend
        .as_any()
        .downcast_ref::<BackendWrapper<B>>()
        .map(|wrapper| Arc::clone(&wrapper.inner))
}
