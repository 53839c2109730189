//! CPU, GPU and runtime option blocks.
//!
//! An option block starts out owned by its wrapper. Attaching it to an
//! [`OptionSet`](crate::OptionSet) hands it to the option aggregate, whose
//! destruction releases it. The engine has no primitive that releases a
//! block on its own, so a block destroyed before it was attached leaks;
//! that teardown is reported as [`Teardown::Leaked`] and logged at `warn`.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use lrt_engine::{
    CpuSetting, Engine, ErrorReporterMode, GpuBackend, GpuPriority, GpuSetting, OpaqueHandle,
    OpaqueKind, OpaqueSetting, Precision, ResourceKind, RuntimeSetting,
};

use crate::environment::{Environment, ResourceId};
use crate::error::{Checked, Error, Result};

/// Who is responsible for releasing an option block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owned,
    /// Attached to the option aggregate with this id.
    TransferredTo(ResourceId),
}

/// How a [`OpaqueOption::destroy`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// The block belongs to an option aggregate; only the wrapper was invalidated.
    Absorbed,
    /// The block was never attached and its native memory is not reclaimed.
    Leaked,
    AlreadyDestroyed,
}

pub struct OpaqueOption<'env> {
    engine: Arc<dyn Engine>,
    handle: Option<OpaqueHandle>,
    kind: OpaqueKind,
    ownership: Ownership,
    id: ResourceId,
    _env: PhantomData<&'env Environment>,
}

impl fmt::Debug for OpaqueOption<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpaqueOption")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("ownership", &self.ownership)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl<'env> OpaqueOption<'env> {
    fn new(env: &'env Environment, kind: OpaqueKind) -> Result<Self> {
        env.handle()?;
        let engine = env.engine().clone();
        let handle = engine.create_opaque(kind).checked(engine.as_ref())?;
        let id = ResourceId::next();
        tracing::debug!(%id, %kind, "opaque options created");
        Ok(OpaqueOption {
            engine,
            handle: Some(handle),
            kind,
            ownership: Ownership::Owned,
            id,
            _env: PhantomData,
        })
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn kind(&self) -> OpaqueKind {
        self.kind
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    /// Handle of a block that is still owned by this wrapper.
    pub(crate) fn owned_handle(&self) -> Result<OpaqueHandle> {
        let handle = self.handle.ok_or(Error::Destroyed {
            resource: ResourceKind::Opaque,
        })?;
        match self.ownership {
            Ownership::Owned => Ok(handle),
            Ownership::TransferredTo(parent) => Err(Error::InvalidArgument(format!(
                "{} options {} already belong to options {parent}",
                self.kind, self.id
            ))),
        }
    }

    pub(crate) fn transfer_to(&mut self, parent: ResourceId) {
        self.ownership = Ownership::TransferredTo(parent);
        tracing::debug!(id = %self.id, kind = %self.kind, %parent, "opaque options transferred");
    }

    fn apply(&mut self, setting: OpaqueSetting) -> Result<()> {
        let handle = self.owned_handle()?;
        self.engine
            .configure_opaque(handle, &setting)
            .checked(self.engine.as_ref())
    }

    /// Invalidate the wrapper. The engine is never asked to release the
    /// block here; see [`Teardown`] for the possible outcomes.
    pub fn destroy(&mut self) -> Teardown {
        if self.handle.take().is_none() {
            return Teardown::AlreadyDestroyed;
        }
        match self.ownership {
            Ownership::TransferredTo(parent) => {
                tracing::debug!(id = %self.id, %parent, "opaque options wrapper released");
                Teardown::Absorbed
            }
            Ownership::Owned => {
                tracing::warn!(
                    id = %self.id,
                    kind = %self.kind,
                    "opaque options destroyed before being added to an option set; native memory leaks"
                );
                Teardown::Leaked
            }
        }
    }
}

impl Drop for OpaqueOption<'_> {
    fn drop(&mut self) {
        self.destroy();
    }
}

macro_rules! opaque_wrapper {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name<'env>(OpaqueOption<'env>);

        impl<'env> $name<'env> {
            pub fn new(env: &'env Environment) -> Result<Self> {
                OpaqueOption::new(env, $kind).map($name)
            }
        }

        impl<'env> Deref for $name<'env> {
            type Target = OpaqueOption<'env>;

            fn deref(&self) -> &OpaqueOption<'env> {
                &self.0
            }
        }

        impl<'env> DerefMut for $name<'env> {
            fn deref_mut(&mut self) -> &mut OpaqueOption<'env> {
                &mut self.0
            }
        }
    };
}

opaque_wrapper!(
    /// CPU delegate settings.
    CpuOptions,
    OpaqueKind::Cpu
);
opaque_wrapper!(
    /// GPU delegate settings.
    GpuOptions,
    OpaqueKind::Gpu
);
opaque_wrapper!(RuntimeOptions, OpaqueKind::Runtime);

impl CpuOptions<'_> {
    /// Worker thread count; -1 keeps the engine default.
    pub fn set_num_threads(&mut self, threads: i32) -> Result<()> {
        self.0.apply(OpaqueSetting::Cpu(CpuSetting::NumThreads(threads)))
    }
}

impl GpuOptions<'_> {
    pub fn set_backend(&mut self, backend: GpuBackend) -> Result<()> {
        self.gpu(GpuSetting::Backend(backend))
    }

    pub fn set_precision(&mut self, precision: Precision) -> Result<()> {
        self.gpu(GpuSetting::Precision(precision))
    }

    pub fn set_priority(&mut self, priority: GpuPriority) -> Result<()> {
        self.gpu(GpuSetting::Priority(priority))
    }

    pub fn set_external_tensors(&mut self, enabled: bool) -> Result<()> {
        self.gpu(GpuSetting::ExternalTensors(enabled))
    }

    pub fn set_serialization_dir(&mut self, dir: impl Into<String>) -> Result<()> {
        self.gpu(GpuSetting::SerializationDir(dir.into()))
    }

    pub fn set_model_cache_key(&mut self, key: impl Into<String>) -> Result<()> {
        self.gpu(GpuSetting::ModelCacheKey(key.into()))
    }

    /// Hint that every op is expected to run on the GPU.
    pub fn set_fully_delegated(&mut self, fully: bool) -> Result<()> {
        self.gpu(GpuSetting::FullyDelegated(fully))
    }

    fn gpu(&mut self, setting: GpuSetting) -> Result<()> {
        self.0.apply(OpaqueSetting::Gpu(setting))
    }
}

impl RuntimeOptions<'_> {
    pub fn set_profiling(&mut self, enabled: bool) -> Result<()> {
        self.0.apply(OpaqueSetting::Runtime(RuntimeSetting::Profiling(enabled)))
    }

    pub fn set_error_reporter(&mut self, mode: ErrorReporterMode) -> Result<()> {
        self.0.apply(OpaqueSetting::Runtime(RuntimeSetting::ErrorReporter(mode)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lrt_engine::{HostEngine, Status};

    #[test]
    fn test_unattached_destroy_leaks() {
        let engine = Arc::new(HostEngine::new());
        let mut env = Environment::new(engine.clone()).unwrap();
        {
            let mut cpu = CpuOptions::new(&env).unwrap();
            cpu.set_num_threads(2).unwrap();
            assert_eq!(cpu.ownership(), Ownership::Owned);
            assert_eq!(cpu.destroy(), Teardown::Leaked);
            assert_eq!(cpu.destroy(), Teardown::AlreadyDestroyed);
            assert!(!cpu.is_valid());
        }
        env.destroy();
        assert_eq!(engine.stats().live(ResourceKind::Opaque), 1);
    }

    #[test]
    fn test_engine_rejects_bad_thread_count() {
        let mut env = Environment::new(Arc::new(HostEngine::new())).unwrap();
        {
            let mut cpu = CpuOptions::new(&env).unwrap();
            let err = cpu.set_num_threads(0).unwrap_err();
            assert_eq!(err.status(), Status::ErrorInvalidArgument);
            cpu.destroy();
        }
        env.destroy();
    }

    #[test]
    fn test_setters_after_destroy() {
        let mut env = Environment::new(Arc::new(HostEngine::new())).unwrap();
        {
            let mut gpu = GpuOptions::new(&env).unwrap();
            gpu.set_precision(Precision::Fp16).unwrap();
            gpu.destroy();
            assert!(matches!(
                gpu.set_backend(GpuBackend::OpenCl),
                Err(Error::Destroyed { .. })
            ));
        }
        env.destroy();
    }
}
