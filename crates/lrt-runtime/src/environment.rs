use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lrt_engine::{Engine, EnvironmentHandle, ResourceKind};

use crate::error::{Checked, Error, Result};

/// Process-unique identity of a binding-side resource wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ResourceId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Root engine context. Every other resource borrows it, so it cannot be
/// destroyed or dropped while any of them is alive.
pub struct Environment {
    engine: Arc<dyn Engine>,
    handle: Option<EnvironmentHandle>,
    id: ResourceId,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.id)
            .field("engine", &self.engine.name())
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl Environment {
    pub fn new(engine: Arc<dyn Engine>) -> Result<Self> {
        let handle = engine.create_environment().checked(engine.as_ref())?;
        let id = ResourceId::next();
        tracing::debug!(%id, engine = engine.name(), "environment created");
        Ok(Environment {
            engine,
            handle: Some(handle),
            id,
        })
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn handle(&self) -> Result<EnvironmentHandle> {
        self.handle.ok_or(Error::Destroyed {
            resource: ResourceKind::Environment,
        })
    }

    pub fn has_gpu_environment(&self) -> Result<bool> {
        self.engine
            .has_gpu_environment(self.handle()?)
            .checked(self.engine.as_ref())
    }

    /// Attach a GPU context to this environment.
    pub fn create_gpu_environment(&self) -> Result<()> {
        self.engine
            .create_gpu_environment(self.handle()?)
            .checked(self.engine.as_ref())
    }

    /// Release the engine context. Further calls are no-ops.
    pub fn destroy(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.engine.destroy_environment(handle);
            tracing::debug!(id = %self.id, "environment destroyed");
        }
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if self.is_valid() {
            tracing::warn!(id = %self.id, "environment dropped without destroy");
            self.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lrt_engine::{HostEngine, Status};

    #[test]
    fn test_destroy_is_idempotent() {
        let engine = Arc::new(HostEngine::new());
        let mut env = Environment::new(engine.clone()).unwrap();
        assert!(env.is_valid());
        env.destroy();
        assert!(!env.is_valid());
        env.destroy();

        let stats = engine.stats();
        assert_eq!(stats.destroyed(ResourceKind::Environment), 1);
        assert_eq!(stats.double_destroys, 0);
    }

    #[test]
    fn test_use_after_destroy() {
        let mut env = Environment::new(Arc::new(HostEngine::new())).unwrap();
        env.destroy();
        let err = env.has_gpu_environment().unwrap_err();
        assert!(matches!(err, Error::Destroyed { .. }));
        assert_eq!(err.status(), Status::ErrorInvalidArgument);
    }

    #[test]
    fn test_drop_destroys() {
        let engine = Arc::new(HostEngine::new());
        drop(Environment::new(engine.clone()).unwrap());
        assert!(engine.stats().is_clean());
    }

    #[test]
    fn test_gpu_environment() {
        let engine = Arc::new(HostEngine::new().with_gpu(true));
        let mut env = Environment::new(engine).unwrap();
        assert!(!env.has_gpu_environment().unwrap());
        env.create_gpu_environment().unwrap();
        assert!(env.has_gpu_environment().unwrap());
        env.destroy();
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(ResourceId::next(), ResourceId::next());
    }
}
