//! Compiled models: buffer requirements, execution and diagnostics.

use std::ffi::c_void;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use lrt_engine::{
    BufferHandle, BufferType, CancelHook, CompiledHandle, Engine, ProfilerHandle,
    RequirementsHandle, ResizeMode, ResourceKind, Status, TensorSlot,
};
use lrt_tensor::Layout;

use crate::buffer::{BufferCore, TensorBuffer};
use crate::environment::{Environment, ResourceId};
use crate::error::{Checked, Error, Result};
use crate::model::Model;
use crate::options::OptionSet;

type Predicate = Box<dyn FnMut() -> bool + Send>;

/// Engine-facing side of a retained cancellation predicate.
unsafe extern "C" fn poll_predicate(data: *mut c_void) -> bool {
    let predicate = &mut *(data as *mut Predicate);
    match panic::catch_unwind(AssertUnwindSafe(|| predicate())) {
        Ok(cancel) => cancel,
        Err(_) => {
            tracing::warn!("cancellation predicate panicked; run continues");
            false
        }
    }
}

/// How a run call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Outputs are written.
    Completed,
    /// Execution continues on the accelerator; output buffers carry
    /// completion events.
    Submitted,
    /// The cancellation predicate stopped the run. Outputs hold no results.
    Cancelled,
}

impl RunOutcome {
    pub fn is_cancelled(&self) -> bool {
        *self == RunOutcome::Cancelled
    }
}

/// Size, alignment and buffer types the compiled model expects for one
/// tensor. Valid while the compiled model is.
#[derive(Clone, Copy)]
pub struct BufferRequirements<'c> {
    engine: &'c dyn Engine,
    handle: RequirementsHandle,
}

impl fmt::Debug for BufferRequirements<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferRequirements")
            .field("handle", &self.handle)
            .finish()
    }
}

impl BufferRequirements<'_> {
    pub fn supported_types(&self) -> Result<Vec<BufferType>> {
        let count = self
            .engine
            .requirements_num_types(self.handle)
            .checked(self.engine)?;
        (0..count).map(|i| self.buffer_type(i)).collect()
    }

    pub fn buffer_type(&self, index: usize) -> Result<BufferType> {
        self.engine
            .requirements_buffer_type(self.handle, index)
            .checked(self.engine)
    }

    /// The first supported type, which the engine lists as preferred.
    pub fn preferred_type(&self) -> Result<BufferType> {
        self.supported_types()?
            .first()
            .copied()
            .ok_or_else(|| Error::InvalidArgument("no supported buffer types reported".into()))
    }

    pub fn buffer_size(&self) -> Result<usize> {
        self.engine.requirements_size(self.handle).checked(self.engine)
    }

    pub fn alignment(&self) -> Result<usize> {
        self.engine
            .requirements_alignment(self.handle)
            .checked(self.engine)
    }
}

/// Per-run event counter of a compiled model compiled with profiling on.
#[derive(Clone, Copy)]
pub struct Profiler<'c> {
    engine: &'c dyn Engine,
    handle: ProfilerHandle,
}

impl fmt::Debug for Profiler<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profiler").field("handle", &self.handle).finish()
    }
}

impl Profiler<'_> {
    pub fn start(&self) -> Result<()> {
        self.engine.start_profiler(self.handle).checked(self.engine)
    }

    pub fn stop(&self) -> Result<()> {
        self.engine.stop_profiler(self.handle).checked(self.engine)
    }

    pub fn reset(&self) -> Result<()> {
        self.engine.reset_profiler(self.handle).checked(self.engine)
    }

    pub fn num_events(&self) -> Result<usize> {
        self.engine
            .num_profiler_events(self.handle)
            .checked(self.engine)
    }
}

/// A model compiled for a set of accelerators.
///
/// Borrows the environment and model it was compiled from; the option set
/// is only read during compilation.
pub struct CompiledModel<'a> {
    env: &'a Environment,
    model: &'a Model<'a>,
    engine: Arc<dyn Engine>,
    handle: Option<CompiledHandle>,
    id: ResourceId,
    /// Buffers handed to an asynchronous run that may still be in flight.
    in_flight: Vec<Arc<BufferCore>>,
    predicate: Option<Box<Predicate>>,
}

impl fmt::Debug for CompiledModel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledModel")
            .field("id", &self.id)
            .field("model", &self.model.id())
            .field("in_flight", &self.in_flight.len())
            .field("cancellable", &self.predicate.is_some())
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Cores of the buffers handed to a run. A buffer mapped through any of
/// its duplicates is refused before the engine sees it.
fn cores(buffers: &[&TensorBuffer<'_>]) -> Result<Vec<Arc<BufferCore>>> {
    buffers
        .iter()
        .map(|b| {
            let core = b.core()?;
            if core.is_locked() {
                return Err(Error::InvalidArgument(format!(
                    "tensor buffer {} is locked",
                    core.id()
                )));
            }
            Ok(Arc::clone(core))
        })
        .collect()
}

fn handles(cores: &[Arc<BufferCore>]) -> Vec<BufferHandle> {
    cores.iter().map(|c| c.handle()).collect()
}

impl<'a> CompiledModel<'a> {
    pub fn new(env: &'a Environment, model: &'a Model<'a>, options: &OptionSet<'_>) -> Result<Self> {
        let env_handle = env.handle()?;
        let model_handle = model.handle()?;
        let options_handle = options.handle()?;
        let engine = env.engine().clone();
        let handle = engine
            .create_compiled_model(env_handle, model_handle, options_handle)
            .checked(engine.as_ref())?;
        let id = ResourceId::next();
        tracing::info!(
            %id,
            accelerators = %options.hardware_accelerators(),
            signatures = engine.num_signatures(model_handle).unwrap_or(0),
            "model compiled"
        );
        Ok(CompiledModel {
            env,
            model,
            engine,
            handle: Some(handle),
            id,
            in_flight: Vec::new(),
            predicate: None,
        })
    }

    pub fn environment(&self) -> &'a Environment {
        self.env
    }

    pub fn model(&self) -> &'a Model<'a> {
        self.model
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    fn handle(&self) -> Result<CompiledHandle> {
        self.handle.ok_or(Error::Destroyed {
            resource: ResourceKind::CompiledModel,
        })
    }

    pub fn requirements(&self, signature: usize, slot: TensorSlot) -> Result<BufferRequirements<'_>> {
        let handle = self
            .engine
            .buffer_requirements(self.handle()?, signature, slot)
            .checked(self.engine.as_ref())?;
        Ok(BufferRequirements {
            engine: self.engine.as_ref(),
            handle,
        })
    }

    pub fn input_requirements(&self, signature: usize, index: usize) -> Result<BufferRequirements<'_>> {
        self.requirements(signature, TensorSlot::Input(index))
    }

    pub fn output_requirements(&self, signature: usize, index: usize) -> Result<BufferRequirements<'_>> {
        self.requirements(signature, TensorSlot::Output(index))
    }

    pub fn create_input_buffer(&self, signature: usize, index: usize) -> Result<TensorBuffer<'a>> {
        TensorBuffer::from_requirements(self, signature, TensorSlot::Input(index))
    }

    pub fn create_output_buffer(&self, signature: usize, index: usize) -> Result<TensorBuffer<'a>> {
        TensorBuffer::from_requirements(self, signature, TensorSlot::Output(index))
    }

    /// Run `signature` to completion. None of the buffers may be locked.
    pub fn run(
        &mut self,
        signature: usize,
        inputs: &[&TensorBuffer<'_>],
        outputs: &[&TensorBuffer<'_>],
    ) -> Result<RunOutcome> {
        let handle = self.handle()?;
        let ins = handles(&cores(inputs)?);
        let outs = handles(&cores(outputs)?);
        // Retained buffers are released once the engine has taken the
        // next run; it finishes outstanding work first.
        let previous = std::mem::take(&mut self.in_flight);
        let result = self.engine.run(handle, signature, &ins, &outs);
        drop(previous);
        match result {
            Ok(()) => Ok(RunOutcome::Completed),
            Err(status) => self.failed(signature, status),
        }
    }

    /// Submit `signature` for asynchronous execution.
    ///
    /// The engine may run synchronously instead, which is reported as
    /// [`RunOutcome::Completed`]. On [`RunOutcome::Submitted`] the buffers
    /// are retained until the next run, the next resize or destruction.
    pub fn run_async(
        &mut self,
        signature: usize,
        inputs: &[&TensorBuffer<'a>],
        outputs: &[&TensorBuffer<'a>],
    ) -> Result<RunOutcome> {
        let handle = self.handle()?;
        let input_cores = cores(inputs)?;
        let output_cores = cores(outputs)?;
        let previous = std::mem::take(&mut self.in_flight);
        let result = self.engine.run_async(
            handle,
            signature,
            &handles(&input_cores),
            &handles(&output_cores),
        );
        drop(previous);
        match result {
            Ok(true) => {
                self.in_flight = input_cores.into_iter().chain(output_cores).collect();
                tracing::debug!(id = %self.id, signature, retained = self.in_flight.len(), "run submitted");
                Ok(RunOutcome::Submitted)
            }
            Ok(false) => Ok(RunOutcome::Completed),
            Err(status) => self.failed(signature, status),
        }
    }

    fn failed(&self, signature: usize, status: Status) -> Result<RunOutcome> {
        if status == Status::Cancelled {
            tracing::debug!(id = %self.id, signature, "run cancelled");
            return Ok(RunOutcome::Cancelled);
        }
        Err(Error::engine(self.engine.as_ref(), status))
    }

    /// Buffers retained for an asynchronous run.
    pub fn retained_buffers(&self) -> usize {
        self.in_flight.len()
    }

    /// Give input `index` a new shape. Any outstanding asynchronous run
    /// must have completed first.
    pub fn resize_input(
        &mut self,
        signature: usize,
        index: usize,
        dims: &[i32],
        mode: ResizeMode,
    ) -> Result<()> {
        let handle = self.handle()?;
        if dims.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "input {index} cannot be resized to a zero-rank shape"
            )));
        }
        let previous = std::mem::take(&mut self.in_flight);
        let resized = self
            .engine
            .resize_input(handle, signature, index, dims, mode)
            .checked(self.engine.as_ref());
        drop(previous);
        resized?;
        tracing::debug!(id = %self.id, signature, index, ?dims, ?mode, "input resized");
        Ok(())
    }

    pub fn input_layout(&self, signature: usize, index: usize) -> Result<Layout> {
        self.engine
            .input_layout(self.handle()?, signature, index)
            .checked(self.engine.as_ref())
    }

    /// Layouts of every output of `signature`. With `update_allocation`
    /// the current input shapes are propagated first; the result may still
    /// be provisional for data-dependent outputs.
    pub fn output_layouts(&self, signature: usize, update_allocation: bool) -> Result<Vec<Layout>> {
        let handle = self.handle()?;
        let count = self.model.num_outputs(signature)?;
        self.engine
            .output_layouts(handle, signature, count, update_allocation)
            .checked(self.engine.as_ref())
    }

    pub fn is_fully_accelerated(&self) -> Result<bool> {
        self.engine
            .is_fully_accelerated(self.handle()?)
            .checked(self.engine.as_ref())
    }

    /// Register the predicate the engine polls during runs; `true` stops
    /// the run. It replaces any previous predicate and stays alive until
    /// replaced, cleared or the model is destroyed. A panicking predicate
    /// counts as `false`.
    pub fn set_cancellation<F>(&mut self, predicate: F) -> Result<()>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let handle = self.handle()?;
        let mut boxed: Box<Predicate> = Box::new(Box::new(predicate));
        let hook = CancelHook {
            callback: poll_predicate,
            data: &mut *boxed as *mut Predicate as *mut c_void,
        };
        // The boxed predicate is stored below and outlives its registration.
        unsafe { self.engine.set_cancellation(handle, Some(hook)) }
            .checked(self.engine.as_ref())?;
        self.predicate = Some(boxed);
        Ok(())
    }

    pub fn clear_cancellation(&mut self) -> Result<()> {
        let handle = self.handle()?;
        unsafe { self.engine.set_cancellation(handle, None) }.checked(self.engine.as_ref())?;
        self.predicate = None;
        Ok(())
    }

    pub fn has_cancellation(&self) -> bool {
        self.predicate.is_some()
    }

    /// The profiler, present when runtime options enabled profiling.
    pub fn profiler(&self) -> Result<Profiler<'_>> {
        let handle = self
            .engine
            .profiler(self.handle()?)
            .checked(self.engine.as_ref())?;
        Ok(Profiler {
            engine: self.engine.as_ref(),
            handle,
        })
    }

    /// Diagnostics the engine collected for this model, one per line.
    pub fn error_messages(&self) -> Result<String> {
        self.engine
            .error_messages(self.handle()?)
            .checked(self.engine.as_ref())
    }

    pub fn clear_errors(&self) -> Result<()> {
        self.engine
            .clear_errors(self.handle()?)
            .checked(self.engine.as_ref())
    }

    /// Release the compiled model, then the predicate and retained buffers.
    /// Further calls are no-ops.
    pub fn destroy(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.engine.destroy_compiled_model(handle);
            self.predicate = None;
            self.in_flight.clear();
            tracing::debug!(id = %self.id, "compiled model destroyed");
        }
    }
}

impl Drop for CompiledModel<'_> {
    fn drop(&mut self) {
        if self.is_valid() {
            tracing::warn!(id = %self.id, "compiled model dropped without destroy");
            self.destroy();
        }
    }
}
