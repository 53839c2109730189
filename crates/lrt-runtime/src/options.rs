use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use lrt_engine::{Engine, HwAccelerators, OptionsHandle, ResourceKind};

use crate::environment::{Environment, ResourceId};
use crate::error::{Checked, Error, Result};
use crate::opaque::OpaqueOption;

/// Compilation options: the accelerator mask plus attached option blocks.
///
/// Compiling a model only reads the set; it stays owned by its creator and
/// is destroyed independently of the compiled model.
pub struct OptionSet<'env> {
    engine: Arc<dyn Engine>,
    handle: Option<OptionsHandle>,
    id: ResourceId,
    accelerators: HwAccelerators,
    attached: Vec<ResourceId>,
    _env: PhantomData<&'env Environment>,
}

impl fmt::Debug for OptionSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionSet")
            .field("id", &self.id)
            .field("accelerators", &self.accelerators)
            .field("attached", &self.attached)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl<'env> OptionSet<'env> {
    pub fn new(env: &'env Environment) -> Result<Self> {
        env.handle()?;
        let engine = env.engine().clone();
        let handle = engine.create_options().checked(engine.as_ref())?;
        let id = ResourceId::next();
        tracing::debug!(%id, "options created");
        Ok(OptionSet {
            engine,
            handle: Some(handle),
            id,
            accelerators: HwAccelerators::NONE,
            attached: Vec::new(),
            _env: PhantomData,
        })
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn handle(&self) -> Result<OptionsHandle> {
        self.handle.ok_or(Error::Destroyed {
            resource: ResourceKind::Options,
        })
    }

    pub fn set_hardware_accelerators(&mut self, mask: HwAccelerators) -> Result<()> {
        self.engine
            .set_accelerators(self.handle()?, mask)
            .checked(self.engine.as_ref())?;
        self.accelerators = mask;
        Ok(())
    }

    pub fn hardware_accelerators(&self) -> HwAccelerators {
        self.accelerators
    }

    /// Attach an option block. On success the set owns the block and the
    /// wrapper's own destroy no longer releases anything.
    pub fn add_opaque(&mut self, opaque: &mut OpaqueOption<'env>) -> Result<()> {
        let handle = self.handle()?;
        let block = opaque.owned_handle()?;
        self.engine
            .add_opaque(handle, block)
            .checked(self.engine.as_ref())?;
        opaque.transfer_to(self.id);
        self.attached.push(opaque.id());
        Ok(())
    }

    /// Ids of the option blocks this set owns.
    pub fn attached(&self) -> &[ResourceId] {
        &self.attached
    }

    /// Release the set together with every attached block. Further calls
    /// are no-ops.
    pub fn destroy(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.engine.destroy_options(handle);
            tracing::debug!(id = %self.id, attached = self.attached.len(), "options destroyed");
        }
    }
}

impl Drop for OptionSet<'_> {
    fn drop(&mut self) {
        if self.is_valid() {
            tracing::warn!(id = %self.id, "options dropped without destroy");
            self.destroy();
        }
    }
}
