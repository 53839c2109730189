//! In-process reference engine.
//!
//! `HostEngine` implements every engine primitive over host memory and a
//! registry of [`HostGraph`]s. A "model file" for this engine is the UTF-8
//! name a graph was registered under. Every create and destroy is counted in
//! [`HostStats`], so lifecycle discipline can be asserted in tests: a
//! double destroy or a parent destroyed before its children is recorded and
//! logged at `error` level instead of crashing.

mod graph;
mod stats;

pub use graph::{HostGraph, HostKernel, HostSignature, HostTensor, ShapeFn, TensorSpec};
pub use stats::HostStats;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lrt_tensor::{packed_size_of, Layout, Quantization, RankedTensorType, TensorTypeId};
use parking_lot::{Condvar, Mutex};

use crate::aligned::{is_aligned, AlignedBytes, BUFFER_ALIGNMENT};
use crate::engine::{CancelHook, Engine};
use crate::handle::*;
use crate::status::{EngineResult, Status};
use crate::types::*;

/// Accelerators and option-block settings seen by the latest compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRecord {
    pub accelerators: HwAccelerators,
    pub settings: Vec<OpaqueSetting>,
}

struct HostMemory {
    ptr: *mut u8,
    len: usize,
}

// Caller memory; the registrant keeps it alive until the buffer is destroyed.
unsafe impl Send for HostMemory {}

enum Storage {
    Managed(AlignedBytes),
    Host(HostMemory),
}

impl Storage {
    fn len(&self) -> usize {
        match self {
            Storage::Managed(bytes) => bytes.len(),
            Storage::Host(mem) => mem.len,
        }
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        match self {
            Storage::Managed(bytes) => bytes.as_mut_ptr(),
            Storage::Host(mem) => mem.ptr,
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Managed(bytes) => bytes,
            Storage::Host(mem) => unsafe { std::slice::from_raw_parts(mem.ptr, mem.len) },
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Storage::Managed(bytes) => bytes,
            Storage::Host(mem) => unsafe { std::slice::from_raw_parts_mut(mem.ptr, mem.len) },
        }
    }
}

struct BufferState {
    env: Option<usize>,
    tensor_type: RankedTensorType,
    buffer_type: BufferType,
    storage: Storage,
    locked: Option<LockMode>,
    event: Option<usize>,
}

struct EventState {
    env: usize,
    signaled: bool,
    /// Attached by an asynchronous run to mark its completion.
    completes_run: bool,
}

struct OpaqueState {
    kind: OpaqueKind,
    settings: Vec<OpaqueSetting>,
    attached_to: Option<usize>,
}

struct OptionsState {
    accelerators: HwAccelerators,
    opaques: Vec<usize>,
}

struct CompiledState {
    env: usize,
    model: usize,
    graph: Arc<HostGraph>,
    /// Current input dimensions, per signature and input.
    input_dims: Vec<Vec<Vec<i32>>>,
    /// Last propagated or observed output dimensions.
    output_dims: Vec<Vec<Vec<i32>>>,
    cancel: Option<CancelHook>,
    errors: Vec<String>,
    reporter: ErrorReporterMode,
    profiler: Option<usize>,
    fully_accelerated: bool,
    requirements: Vec<usize>,
    /// Completion events of submitted work that has not finished yet.
    queued: Vec<usize>,
}

struct RequirementsState {
    size: usize,
    types: Vec<BufferType>,
    alignment: usize,
}

#[derive(Default)]
struct ProfilerState {
    active: bool,
    events: usize,
}

type Failure = (Status, String);

#[derive(Default)]
struct HostState {
    next_id: usize,
    environments: HashMap<usize, bool>,
    models: HashMap<usize, Arc<HostGraph>>,
    options: HashMap<usize, OptionsState>,
    opaques: HashMap<usize, OpaqueState>,
    compiled: HashMap<usize, CompiledState>,
    requirements: HashMap<usize, RequirementsState>,
    buffers: HashMap<usize, BufferState>,
    events: HashMap<usize, EventState>,
    profilers: HashMap<usize, ProfilerState>,
    stats: HostStats,
    last_compile: Option<CompileRecord>,
}

fn wrap<H>(id: usize, f: fn(usize) -> Option<H>) -> EngineResult<H> {
    f(id).ok_or(Status::ErrorRuntimeFailure)
}

/// Byte size the engine reports for a shape that may still hold dynamic
/// dimensions: unresolved extents count as 1.
fn provisional_size(spec: &TensorSpec, dims: &[i32]) -> EngineResult<usize> {
    let resolved: Vec<i32> = dims.iter().map(|&d| d.max(1)).collect();
    packed_size_of(spec.element_type, &resolved).map_err(|_| Status::ErrorUnsupported)
}

impl HostState {
    fn next(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    fn double_destroy(&mut self, kind: ResourceKind, id: usize) {
        self.stats.double_destroys += 1;
        tracing::error!(%kind, id, "destroy of a handle that is not alive");
    }

    fn ordering_violation(&mut self, kind: ResourceKind, id: usize, children: usize) {
        self.stats.ordering_violations += 1;
        tracing::error!(%kind, id, children, "destroyed while dependent resources are alive");
    }

    fn report(&mut self, compiled: usize, message: String) {
        let Some(state) = self.compiled.get_mut(&compiled) else {
            return;
        };
        match state.reporter {
            ErrorReporterMode::Buffer => state.errors.push(message),
            ErrorReporterMode::Stderr => tracing::error!(compiled, "{message}"),
            ErrorReporterMode::None => {}
        }
    }

    fn spec(&self, model: usize, signature: usize, slot: TensorSlot) -> EngineResult<TensorSpec> {
        let graph = self.models.get(&model).ok_or(Status::ErrorInvalidArgument)?;
        let sig = graph.signature(signature).ok_or(Status::ErrorNotFound)?;
        let list = match slot {
            TensorSlot::Input(_) => &sig.inputs,
            TensorSlot::Output(_) => &sig.outputs,
        };
        list.get(slot.index()).cloned().ok_or(Status::ErrorIndexOOB)
    }

    fn buffer(&self, buffer: BufferHandle) -> EngineResult<&BufferState> {
        self.buffers.get(&buffer.as_raw()).ok_or(Status::ErrorInvalidArgument)
    }

    fn buffer_mut(&mut self, buffer: BufferHandle) -> EngineResult<&mut BufferState> {
        self.buffers.get_mut(&buffer.as_raw()).ok_or(Status::ErrorInvalidArgument)
    }

    /// Finish the queued work of `compiled`. Returns whether any completion
    /// event was signaled.
    fn drain_queue(&mut self, compiled: usize) -> bool {
        let Some(state) = self.compiled.get_mut(&compiled) else {
            return false;
        };
        let queued = std::mem::take(&mut state.queued);
        let mut drained = false;
        for id in queued {
            if let Some(event) = self.events.get_mut(&id) {
                event.signaled = true;
                drained = true;
            }
        }
        drained
    }

    fn compiled(&self, compiled: CompiledHandle) -> EngineResult<&CompiledState> {
        self.compiled.get(&compiled.as_raw()).ok_or(Status::ErrorInvalidArgument)
    }

    fn compiled_mut(&mut self, compiled: CompiledHandle) -> EngineResult<&mut CompiledState> {
        self.compiled.get_mut(&compiled.as_raw()).ok_or(Status::ErrorInvalidArgument)
    }

    fn prepare_run(
        &self,
        compiled: usize,
        signature: usize,
        inputs: &[BufferHandle],
        outputs: &[BufferHandle],
    ) -> Result<(HostSignature, Option<CancelHook>, Vec<HostTensor>), Failure> {
        let state = self.compiled.get(&compiled).ok_or_else(|| {
            (Status::ErrorInvalidArgument, format!("unknown compiled model {compiled}"))
        })?;
        let sig = state
            .graph
            .signature(signature)
            .cloned()
            .ok_or_else(|| (Status::ErrorNotFound, format!("no signature {signature}")))?;
        if inputs.len() < sig.inputs.len() {
            return Err((
                Status::ErrorMissingInputTensor,
                format!("signature '{}' takes {} inputs, got {}", sig.key, sig.inputs.len(), inputs.len()),
            ));
        }
        if inputs.len() != sig.inputs.len() || outputs.len() != sig.outputs.len() {
            return Err((
                Status::ErrorInvalidArgument,
                format!(
                    "signature '{}' takes {}/{} buffers, got {}/{}",
                    sig.key,
                    sig.inputs.len(),
                    sig.outputs.len(),
                    inputs.len(),
                    outputs.len()
                ),
            ));
        }
        for handle in inputs.iter().chain(outputs) {
            let buffer = self.buffers.get(&handle.as_raw()).ok_or_else(|| {
                (Status::ErrorInvalidArgument, format!("unknown tensor buffer {}", handle.as_raw()))
            })?;
            if buffer.locked.is_some() {
                return Err((
                    Status::ErrorRuntimeFailure,
                    format!("tensor buffer {} is locked during run", handle.as_raw()),
                ));
            }
        }

        let mut tensors = Vec::with_capacity(inputs.len());
        for (i, (handle, spec)) in inputs.iter().zip(&sig.inputs).enumerate() {
            let dims = &state.input_dims[signature][i];
            let needed = packed_size_of(spec.element_type, dims)
                .map_err(|e| (Status::ErrorRuntimeFailure, format!("input {i}: {e}")))?;
            let buffer = &self.buffers[&handle.as_raw()];
            if buffer.tensor_type.element_type != spec.element_type {
                return Err((
                    Status::ErrorInvalidArgument,
                    format!(
                        "input {i} expects {}, buffer holds {}",
                        spec.element_type, buffer.tensor_type.element_type
                    ),
                ));
            }
            if buffer.storage.len() < needed {
                return Err((
                    Status::ErrorInvalidArgument,
                    format!("input {i} needs {needed} bytes, buffer holds {}", buffer.storage.len()),
                ));
            }
            tensors.push(HostTensor::new(
                spec.element_type,
                dims.clone(),
                buffer.storage.bytes()[..needed].to_vec(),
            ));
        }
        Ok((sig, state.cancel, tensors))
    }

    fn commit_outputs(
        &mut self,
        compiled: usize,
        signature: usize,
        outputs: &[BufferHandle],
        results: Vec<HostTensor>,
    ) -> Result<(), Failure> {
        if results.len() != outputs.len() {
            return Err((
                Status::ErrorRuntimeFailure,
                format!("kernel produced {} outputs, expected {}", results.len(), outputs.len()),
            ));
        }
        for (i, (handle, result)) in outputs.iter().zip(&results).enumerate() {
            let buffer = self.buffers.get_mut(&handle.as_raw()).ok_or_else(|| {
                (Status::ErrorInvalidArgument, format!("output buffer {i} vanished during run"))
            })?;
            let capacity = buffer.storage.len();
            if result.data.len() > capacity {
                return Err((
                    Status::ErrorRuntimeFailure,
                    format!(
                        "output {i} needs {} bytes but its buffer holds {capacity}",
                        result.data.len()
                    ),
                ));
            }
            let bytes = buffer.storage.bytes_mut();
            bytes[..result.data.len()].copy_from_slice(&result.data);
            bytes[result.data.len()..].fill(0);
        }

        let Some(state) = self.compiled.get_mut(&compiled) else {
            return Ok(());
        };
        state.output_dims[signature] = results.into_iter().map(|r| r.dims).collect();
        if let Some(profiler) = state.profiler {
            if let Some(p) = self.profilers.get_mut(&profiler) {
                if p.active {
                    p.events += 1;
                }
            }
        }
        self.stats.runs += 1;
        Ok(())
    }
}

/// Reference [`Engine`] that runs registered host graphs.
pub struct HostEngine {
    state: Mutex<HostState>,
    signaled: Condvar,
    registry: HashMap<String, Arc<HostGraph>>,
    gpu_available: bool,
    async_capable: bool,
    deferred_completion: bool,
}

impl Default for HostEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HostEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut models: Vec<&String> = self.registry.keys().collect();
        models.sort();
        f.debug_struct("HostEngine")
            .field("models", &models)
            .field("gpu_available", &self.gpu_available)
            .field("async_capable", &self.async_capable)
            .field("deferred_completion", &self.deferred_completion)
            .finish()
    }
}

impl HostEngine {
    /// A CPU-only engine with no registered models.
    pub fn new() -> Self {
        HostEngine {
            state: Mutex::new(HostState::default()),
            signaled: Condvar::new(),
            registry: HashMap::new(),
            gpu_available: false,
            async_capable: false,
            deferred_completion: false,
        }
    }

    /// Register a graph under `name`. Model files and buffers holding this
    /// name load it.
    pub fn with_model(mut self, name: impl Into<String>, graph: HostGraph) -> Self {
        self.registry.insert(name.into(), Arc::new(graph));
        self
    }

    /// Whether compilation for the GPU accelerator succeeds.
    pub fn with_gpu(mut self, available: bool) -> Self {
        self.gpu_available = available;
        self
    }

    /// Whether `run_async` reports asynchronous execution and attaches a
    /// completion event to every output buffer.
    pub fn with_async(mut self, capable: bool) -> Self {
        self.async_capable = capable;
        self
    }

    /// Whether completion events of an asynchronous run start unsignaled.
    /// The work then finishes when the compiled model's next run, resize or
    /// destruction drains its queue, like an accelerator queue would.
    pub fn with_deferred_completion(mut self, deferred: bool) -> Self {
        self.deferred_completion = deferred;
        self
    }

    fn finish_queued(&self, st: &mut HostState, compiled: usize) {
        if st.drain_queue(compiled) {
            self.signaled.notify_all();
        }
    }

    pub fn stats(&self) -> HostStats {
        self.state.lock().stats.clone()
    }

    pub fn last_compile(&self) -> Option<CompileRecord> {
        self.state.lock().last_compile.clone()
    }

    fn lookup_model(&self, bytes: &[u8]) -> EngineResult<Arc<HostGraph>> {
        let name = std::str::from_utf8(bytes)
            .map(str::trim)
            .map_err(|_| Status::ErrorInvalidFlatbuffer)?;
        self.registry
            .get(name)
            .cloned()
            .ok_or(Status::ErrorInvalidFlatbuffer)
    }

    fn register_model(&self, graph: Arc<HostGraph>) -> EngineResult<ModelHandle> {
        let mut st = self.state.lock();
        let id = st.next();
        st.models.insert(id, graph);
        st.stats.record_create(ResourceKind::Model);
        tracing::debug!(id, "host model created");
        wrap(id, ModelHandle::from_raw)
    }

    fn poll_cancel(&self, hook: Option<CancelHook>) -> bool {
        let cancelled = hook.map(|h| unsafe { h.poll() }).unwrap_or(false);
        if cancelled {
            self.state.lock().stats.cancelled_runs += 1;
        }
        cancelled
    }

    fn execute(
        &self,
        compiled: CompiledHandle,
        signature: usize,
        inputs: &[BufferHandle],
        outputs: &[BufferHandle],
    ) -> EngineResult<()> {
        let c = compiled.as_raw();
        let prepared = {
            let mut st = self.state.lock();
            self.finish_queued(&mut st, c);
            match st.prepare_run(c, signature, inputs, outputs) {
                Ok(prepared) => prepared,
                Err((status, message)) => {
                    st.report(c, message);
                    return Err(status);
                }
            }
        };
        let (sig, hook, tensors) = prepared;

        if self.poll_cancel(hook) {
            return Err(Status::Cancelled);
        }
        let results = match sig.execute(&tensors) {
            Ok(results) => results,
            Err(status) => {
                self.state
                    .lock()
                    .report(c, format!("signature '{}' failed: {status}", sig.key));
                return Err(status);
            }
        };
        if self.poll_cancel(hook) {
            return Err(Status::Cancelled);
        }

        let mut st = self.state.lock();
        if let Err((status, message)) = st.commit_outputs(c, signature, outputs, results) {
            st.report(c, message);
            return Err(status);
        }
        Ok(())
    }

    fn attach_completion_events(&self, compiled: CompiledHandle, outputs: &[BufferHandle]) -> EngineResult<()> {
        let mut st = self.state.lock();
        let env = st.compiled(compiled)?.env;
        let mut queued = Vec::new();
        for handle in outputs {
            let id = st.next();
            let old = st.buffer_mut(*handle)?.event.replace(id);
            st.events.insert(
                id,
                EventState {
                    env,
                    signaled: !self.deferred_completion,
                    completes_run: true,
                },
            );
            st.stats.record_create(ResourceKind::Event);
            if let Some(old) = old {
                st.events.remove(&old);
                st.stats.record_destroy(ResourceKind::Event);
            }
            queued.push(id);
        }
        if self.deferred_completion {
            st.compiled_mut(compiled)?.queued.extend(queued);
        }
        Ok(())
    }
}

impl Engine for HostEngine {
    fn name(&self) -> &str {
        "host"
    }

    fn status_string(&self, status: Status) -> Option<String> {
        Some(status.description().to_string())
    }

    fn create_environment(&self) -> EngineResult<EnvironmentHandle> {
        let mut st = self.state.lock();
        let id = st.next();
        st.environments.insert(id, false);
        st.stats.record_create(ResourceKind::Environment);
        tracing::debug!(id, "host environment created");
        wrap(id, EnvironmentHandle::from_raw)
    }

    fn destroy_environment(&self, env: EnvironmentHandle) {
        let id = env.as_raw();
        let mut st = self.state.lock();
        if st.environments.remove(&id).is_none() {
            st.double_destroy(ResourceKind::Environment, id);
            return;
        }
        let children = st.compiled.values().filter(|c| c.env == id).count()
            + st.buffers.values().filter(|b| b.env == Some(id)).count()
            + st.events.values().filter(|e| e.env == id).count();
        if children > 0 {
            st.ordering_violation(ResourceKind::Environment, id, children);
        }
        st.stats.record_destroy(ResourceKind::Environment);
        tracing::debug!(id, "host environment destroyed");
    }

    fn has_gpu_environment(&self, env: EnvironmentHandle) -> EngineResult<bool> {
        let st = self.state.lock();
        st.environments
            .get(&env.as_raw())
            .copied()
            .ok_or(Status::ErrorInvalidArgument)
    }

    fn create_gpu_environment(&self, env: EnvironmentHandle) -> EngineResult<()> {
        if !self.gpu_available {
            return Err(Status::ErrorUnsupported);
        }
        let mut st = self.state.lock();
        let gpu = st
            .environments
            .get_mut(&env.as_raw())
            .ok_or(Status::ErrorInvalidArgument)?;
        *gpu = true;
        Ok(())
    }

    fn create_model_from_file(&self, path: &Path) -> EngineResult<ModelHandle> {
        let bytes = std::fs::read(path).map_err(|e| {
            tracing::debug!(path = %path.display(), error = %e, "host model file unreadable");
            Status::ErrorFileIO
        })?;
        let graph = self.lookup_model(&bytes)?;
        self.register_model(graph)
    }

    unsafe fn create_model_from_buffer(&self, data: *const u8, len: usize) -> EngineResult<ModelHandle> {
        if data.is_null() || len == 0 {
            return Err(Status::ErrorInvalidArgument);
        }
        let bytes = std::slice::from_raw_parts(data, len);
        let graph = self.lookup_model(bytes)?;
        self.register_model(graph)
    }

    fn destroy_model(&self, model: ModelHandle) {
        let id = model.as_raw();
        let mut st = self.state.lock();
        if st.models.remove(&id).is_none() {
            st.double_destroy(ResourceKind::Model, id);
            return;
        }
        let children = st.compiled.values().filter(|c| c.model == id).count();
        if children > 0 {
            st.ordering_violation(ResourceKind::Model, id, children);
        }
        st.stats.record_destroy(ResourceKind::Model);
        tracing::debug!(id, "host model destroyed");
    }

    fn num_signatures(&self, model: ModelHandle) -> EngineResult<usize> {
        let st = self.state.lock();
        let graph = st.models.get(&model.as_raw()).ok_or(Status::ErrorInvalidArgument)?;
        Ok(graph.signatures.len())
    }

    fn signature_key(&self, model: ModelHandle, signature: usize) -> EngineResult<String> {
        let st = self.state.lock();
        let graph = st.models.get(&model.as_raw()).ok_or(Status::ErrorInvalidArgument)?;
        let sig = graph.signature(signature).ok_or(Status::ErrorNotFound)?;
        Ok(sig.key.clone())
    }

    fn num_inputs(&self, model: ModelHandle, signature: usize) -> EngineResult<usize> {
        let st = self.state.lock();
        let graph = st.models.get(&model.as_raw()).ok_or(Status::ErrorInvalidArgument)?;
        Ok(graph.signature(signature).ok_or(Status::ErrorNotFound)?.inputs.len())
    }

    fn num_outputs(&self, model: ModelHandle, signature: usize) -> EngineResult<usize> {
        let st = self.state.lock();
        let graph = st.models.get(&model.as_raw()).ok_or(Status::ErrorInvalidArgument)?;
        Ok(graph.signature(signature).ok_or(Status::ErrorNotFound)?.outputs.len())
    }

    fn tensor_name(&self, model: ModelHandle, signature: usize, slot: TensorSlot) -> EngineResult<String> {
        Ok(self.state.lock().spec(model.as_raw(), signature, slot)?.name)
    }

    fn tensor_type_id(&self, model: ModelHandle, signature: usize, slot: TensorSlot) -> EngineResult<TensorTypeId> {
        self.state.lock().spec(model.as_raw(), signature, slot)?;
        Ok(TensorTypeId::Ranked)
    }

    fn ranked_tensor_type(&self, model: ModelHandle, signature: usize, slot: TensorSlot) -> EngineResult<RankedTensorType> {
        let spec = self.state.lock().spec(model.as_raw(), signature, slot)?;
        let layout = Layout::new(spec.dims).map_err(|_| Status::ErrorInvalidIrType)?;
        Ok(RankedTensorType::new(spec.element_type, layout))
    }

    fn quantization(&self, model: ModelHandle, signature: usize, slot: TensorSlot) -> EngineResult<Quantization> {
        Ok(self.state.lock().spec(model.as_raw(), signature, slot)?.quantization)
    }

    fn create_options(&self) -> EngineResult<OptionsHandle> {
        let mut st = self.state.lock();
        let id = st.next();
        st.options.insert(
            id,
            OptionsState {
                accelerators: HwAccelerators::NONE,
                opaques: Vec::new(),
            },
        );
        st.stats.record_create(ResourceKind::Options);
        tracing::debug!(id, "host options created");
        wrap(id, OptionsHandle::from_raw)
    }

    fn destroy_options(&self, options: OptionsHandle) {
        let id = options.as_raw();
        let mut st = self.state.lock();
        let Some(state) = st.options.remove(&id) else {
            st.double_destroy(ResourceKind::Options, id);
            return;
        };
        for opaque in state.opaques {
            st.opaques.remove(&opaque);
            st.stats.record_destroy(ResourceKind::Opaque);
        }
        st.stats.record_destroy(ResourceKind::Options);
        tracing::debug!(id, "host options destroyed");
    }

    fn set_accelerators(&self, options: OptionsHandle, mask: HwAccelerators) -> EngineResult<()> {
        let mut st = self.state.lock();
        let state = st.options.get_mut(&options.as_raw()).ok_or(Status::ErrorInvalidArgument)?;
        state.accelerators = mask;
        Ok(())
    }

    fn create_opaque(&self, kind: OpaqueKind) -> EngineResult<OpaqueHandle> {
        let mut st = self.state.lock();
        let id = st.next();
        st.opaques.insert(
            id,
            OpaqueState {
                kind,
                settings: Vec::new(),
                attached_to: None,
            },
        );
        st.stats.record_create(ResourceKind::Opaque);
        tracing::debug!(id, %kind, "host opaque options created");
        wrap(id, OpaqueHandle::from_raw)
    }

    fn configure_opaque(&self, opaque: OpaqueHandle, setting: &OpaqueSetting) -> EngineResult<()> {
        let mut st = self.state.lock();
        let state = st.opaques.get_mut(&opaque.as_raw()).ok_or(Status::ErrorInvalidArgument)?;
        if state.kind != setting.kind() {
            return Err(Status::ErrorInvalidArgument);
        }
        if let OpaqueSetting::Cpu(CpuSetting::NumThreads(n)) = setting {
            if *n == 0 || *n < -1 {
                return Err(Status::ErrorInvalidArgument);
            }
        }
        state.settings.push(setting.clone());
        Ok(())
    }

    fn add_opaque(&self, options: OptionsHandle, opaque: OpaqueHandle) -> EngineResult<()> {
        let mut st = self.state.lock();
        if !st.options.contains_key(&options.as_raw()) {
            return Err(Status::ErrorInvalidArgument);
        }
        let state = st.opaques.get_mut(&opaque.as_raw()).ok_or(Status::ErrorInvalidArgument)?;
        if state.attached_to.is_some() {
            return Err(Status::ErrorAlreadyExists);
        }
        state.attached_to = Some(options.as_raw());
        if let Some(opts) = st.options.get_mut(&options.as_raw()) {
            opts.opaques.push(opaque.as_raw());
        }
        Ok(())
    }

    fn create_compiled_model(
        &self,
        env: EnvironmentHandle,
        model: ModelHandle,
        options: OptionsHandle,
    ) -> EngineResult<CompiledHandle> {
        let mut st = self.state.lock();
        if !st.environments.contains_key(&env.as_raw()) {
            return Err(Status::ErrorInvalidArgument);
        }
        let graph = st.models.get(&model.as_raw()).cloned().ok_or(Status::ErrorInvalidArgument)?;
        let opts = st.options.get(&options.as_raw()).ok_or(Status::ErrorInvalidArgument)?;

        let mut accelerators = opts.accelerators;
        if accelerators.is_empty() {
            accelerators = HwAccelerators::CPU;
        }
        if accelerators.contains(HwAccelerators::NPU)
            || (accelerators.contains(HwAccelerators::GPU) && !self.gpu_available)
        {
            tracing::debug!(%accelerators, "host engine cannot compile for requested accelerators");
            return Err(Status::ErrorCompilation);
        }

        let settings: Vec<OpaqueSetting> = opts
            .opaques
            .iter()
            .filter_map(|id| st.opaques.get(id))
            .flat_map(|o| o.settings.iter().cloned())
            .collect();
        let mut profiling = false;
        let mut reporter = ErrorReporterMode::default();
        for setting in &settings {
            match setting {
                OpaqueSetting::Runtime(RuntimeSetting::Profiling(on)) => profiling = *on,
                OpaqueSetting::Runtime(RuntimeSetting::ErrorReporter(mode)) => reporter = *mode,
                _ => {}
            }
        }

        let input_dims: Vec<Vec<Vec<i32>>> = graph
            .signatures
            .iter()
            .map(|s| s.inputs.iter().map(|t| t.dims.clone()).collect())
            .collect();
        let output_dims = graph
            .signatures
            .iter()
            .zip(&input_dims)
            .map(|(s, dims)| s.provisional_outputs(dims))
            .collect();

        let profiler = if profiling {
            let id = st.next();
            st.profilers.insert(id, ProfilerState::default());
            Some(id)
        } else {
            None
        };

        let id = st.next();
        st.compiled.insert(
            id,
            CompiledState {
                env: env.as_raw(),
                model: model.as_raw(),
                graph,
                input_dims,
                output_dims,
                cancel: None,
                errors: Vec::new(),
                reporter,
                profiler,
                fully_accelerated: accelerators.contains(HwAccelerators::GPU),
                requirements: Vec::new(),
                queued: Vec::new(),
            },
        );
        st.last_compile = Some(CompileRecord {
            accelerators,
            settings,
        });
        st.stats.record_create(ResourceKind::CompiledModel);
        tracing::debug!(id, %accelerators, "host model compiled");
        wrap(id, CompiledHandle::from_raw)
    }

    fn destroy_compiled_model(&self, compiled: CompiledHandle) {
        let id = compiled.as_raw();
        let mut st = self.state.lock();
        self.finish_queued(&mut st, id);
        let Some(state) = st.compiled.remove(&id) else {
            st.double_destroy(ResourceKind::CompiledModel, id);
            return;
        };
        for reqs in state.requirements {
            st.requirements.remove(&reqs);
        }
        if let Some(profiler) = state.profiler {
            st.profilers.remove(&profiler);
        }
        st.stats.record_destroy(ResourceKind::CompiledModel);
        tracing::debug!(id, "host compiled model destroyed");
    }

    fn buffer_requirements(&self, compiled: CompiledHandle, signature: usize, slot: TensorSlot) -> EngineResult<RequirementsHandle> {
        let mut st = self.state.lock();
        let state = st.compiled(compiled)?;
        let sig = state.graph.signature(signature).ok_or(Status::ErrorNotFound)?;
        let (spec, dims) = match slot {
            TensorSlot::Input(i) => (sig.inputs.get(i), state.input_dims[signature].get(i)),
            TensorSlot::Output(i) => (sig.outputs.get(i), state.output_dims[signature].get(i)),
        };
        let (spec, dims) = spec.zip(dims).ok_or(Status::ErrorIndexOOB)?;
        let size = provisional_size(spec, dims)?;

        let id = st.next();
        st.requirements.insert(
            id,
            RequirementsState {
                size,
                types: vec![BufferType::HostMemory],
                alignment: BUFFER_ALIGNMENT,
            },
        );
        st.compiled_mut(compiled)?.requirements.push(id);
        wrap(id, RequirementsHandle::from_raw)
    }

    fn requirements_num_types(&self, reqs: RequirementsHandle) -> EngineResult<usize> {
        let st = self.state.lock();
        let r = st.requirements.get(&reqs.as_raw()).ok_or(Status::ErrorInvalidArgument)?;
        Ok(r.types.len())
    }

    fn requirements_buffer_type(&self, reqs: RequirementsHandle, index: usize) -> EngineResult<BufferType> {
        let st = self.state.lock();
        let r = st.requirements.get(&reqs.as_raw()).ok_or(Status::ErrorInvalidArgument)?;
        r.types.get(index).copied().ok_or(Status::ErrorIndexOOB)
    }

    fn requirements_size(&self, reqs: RequirementsHandle) -> EngineResult<usize> {
        let st = self.state.lock();
        let r = st.requirements.get(&reqs.as_raw()).ok_or(Status::ErrorInvalidArgument)?;
        Ok(r.size)
    }

    fn requirements_alignment(&self, reqs: RequirementsHandle) -> EngineResult<usize> {
        let st = self.state.lock();
        let r = st.requirements.get(&reqs.as_raw()).ok_or(Status::ErrorInvalidArgument)?;
        Ok(r.alignment)
    }

    fn run(&self, compiled: CompiledHandle, signature: usize, inputs: &[BufferHandle], outputs: &[BufferHandle]) -> EngineResult<()> {
        self.execute(compiled, signature, inputs, outputs)
    }

    fn run_async(&self, compiled: CompiledHandle, signature: usize, inputs: &[BufferHandle], outputs: &[BufferHandle]) -> EngineResult<bool> {
        self.execute(compiled, signature, inputs, outputs)?;
        if !self.async_capable {
            return Ok(false);
        }
        self.attach_completion_events(compiled, outputs)?;
        Ok(true)
    }

    fn resize_input(&self, compiled: CompiledHandle, signature: usize, input: usize, dims: &[i32], mode: ResizeMode) -> EngineResult<()> {
        let mut st = self.state.lock();
        self.finish_queued(&mut st, compiled.as_raw());
        let rejected = {
            let state = st.compiled_mut(compiled)?;
            let sig = state.graph.signature(signature).ok_or(Status::ErrorNotFound)?;
            let spec = sig.inputs.get(input).ok_or(Status::ErrorIndexOOB)?;
            if dims.is_empty() || dims.len() > lrt_tensor::MAX_RANK || dims.iter().any(|&d| d <= 0) {
                Some(format!("invalid shape {dims:?} for input '{}'", spec.name))
            } else if mode == ResizeMode::Strict
                && (dims.len() != spec.dims.len()
                    || dims.iter().zip(&spec.dims).any(|(&new, &declared)| declared >= 0 && new != declared))
            {
                Some(format!(
                    "input '{}' declares {:?}; only dynamic dimensions may change",
                    spec.name, spec.dims
                ))
            } else {
                state.input_dims[signature][input] = dims.to_vec();
                None
            }
        };
        match rejected {
            Some(message) => {
                st.report(compiled.as_raw(), message);
                Err(Status::ErrorInvalidArgument)
            }
            None => Ok(()),
        }
    }

    fn input_layout(&self, compiled: CompiledHandle, signature: usize, input: usize) -> EngineResult<Layout> {
        let st = self.state.lock();
        let state = st.compiled(compiled)?;
        let dims = state
            .input_dims
            .get(signature)
            .ok_or(Status::ErrorNotFound)?
            .get(input)
            .ok_or(Status::ErrorIndexOOB)?;
        Layout::new(dims.clone()).map_err(|_| Status::ErrorInvalidIrType)
    }

    fn output_layouts(&self, compiled: CompiledHandle, signature: usize, count: usize, update_allocation: bool) -> EngineResult<Vec<Layout>> {
        let mut st = self.state.lock();
        let state = st.compiled_mut(compiled)?;
        let sig = state.graph.signature(signature).ok_or(Status::ErrorNotFound)?;
        if count != sig.outputs.len() {
            return Err(Status::ErrorInvalidArgument);
        }
        if update_allocation {
            let propagated = sig.provisional_outputs(&state.input_dims[signature]);
            state.output_dims[signature] = propagated;
        }
        state.output_dims[signature]
            .iter()
            .map(|dims| Layout::new(dims.clone()).map_err(|_| Status::ErrorInvalidIrType))
            .collect()
    }

    fn is_fully_accelerated(&self, compiled: CompiledHandle) -> EngineResult<bool> {
        Ok(self.state.lock().compiled(compiled)?.fully_accelerated)
    }

    unsafe fn set_cancellation(&self, compiled: CompiledHandle, hook: Option<CancelHook>) -> EngineResult<()> {
        self.state.lock().compiled_mut(compiled)?.cancel = hook;
        Ok(())
    }

    fn profiler(&self, compiled: CompiledHandle) -> EngineResult<ProfilerHandle> {
        let profiler = self.state.lock().compiled(compiled)?.profiler;
        let id = profiler.ok_or(Status::ErrorNotFound)?;
        wrap(id, ProfilerHandle::from_raw)
    }

    fn start_profiler(&self, profiler: ProfilerHandle) -> EngineResult<()> {
        let mut st = self.state.lock();
        let p = st.profilers.get_mut(&profiler.as_raw()).ok_or(Status::ErrorInvalidArgument)?;
        p.active = true;
        Ok(())
    }

    fn stop_profiler(&self, profiler: ProfilerHandle) -> EngineResult<()> {
        let mut st = self.state.lock();
        let p = st.profilers.get_mut(&profiler.as_raw()).ok_or(Status::ErrorInvalidArgument)?;
        p.active = false;
        Ok(())
    }

    fn reset_profiler(&self, profiler: ProfilerHandle) -> EngineResult<()> {
        let mut st = self.state.lock();
        let p = st.profilers.get_mut(&profiler.as_raw()).ok_or(Status::ErrorInvalidArgument)?;
        p.events = 0;
        Ok(())
    }

    fn num_profiler_events(&self, profiler: ProfilerHandle) -> EngineResult<usize> {
        let st = self.state.lock();
        let p = st.profilers.get(&profiler.as_raw()).ok_or(Status::ErrorInvalidArgument)?;
        Ok(p.events)
    }

    fn error_messages(&self, compiled: CompiledHandle) -> EngineResult<String> {
        Ok(self.state.lock().compiled(compiled)?.errors.join("\n"))
    }

    fn clear_errors(&self, compiled: CompiledHandle) -> EngineResult<()> {
        self.state.lock().compiled_mut(compiled)?.errors.clear();
        Ok(())
    }

    fn create_managed_buffer(
        &self,
        env: EnvironmentHandle,
        buffer_type: BufferType,
        tensor_type: &RankedTensorType,
        size: usize,
    ) -> EngineResult<BufferHandle> {
        if buffer_type != BufferType::HostMemory {
            return Err(Status::ErrorUnsupported);
        }
        if let Ok(packed) = tensor_type.packed_size() {
            if size < packed {
                return Err(Status::ErrorInvalidArgument);
            }
        }
        let storage = Storage::Managed(AlignedBytes::new(size)?);
        let mut st = self.state.lock();
        if !st.environments.contains_key(&env.as_raw()) {
            return Err(Status::ErrorInvalidArgument);
        }
        let id = st.next();
        st.buffers.insert(
            id,
            BufferState {
                env: Some(env.as_raw()),
                tensor_type: tensor_type.clone(),
                buffer_type,
                storage,
                locked: None,
                event: None,
            },
        );
        st.stats.record_create(ResourceKind::TensorBuffer);
        tracing::debug!(id, size, "host managed buffer created");
        wrap(id, BufferHandle::from_raw)
    }

    unsafe fn create_buffer_from_host_memory(
        &self,
        tensor_type: &RankedTensorType,
        data: *mut u8,
        len: usize,
    ) -> EngineResult<BufferHandle> {
        if data.is_null() || !is_aligned(data) {
            return Err(Status::ErrorInvalidArgument);
        }
        if let Ok(packed) = tensor_type.packed_size() {
            if len < packed {
                return Err(Status::ErrorInvalidArgument);
            }
        }
        let mut st = self.state.lock();
        let id = st.next();
        st.buffers.insert(
            id,
            BufferState {
                env: None,
                tensor_type: tensor_type.clone(),
                buffer_type: BufferType::HostMemory,
                storage: Storage::Host(HostMemory { ptr: data, len }),
                locked: None,
                event: None,
            },
        );
        st.stats.record_create(ResourceKind::TensorBuffer);
        tracing::debug!(id, len, "host buffer wraps caller memory");
        wrap(id, BufferHandle::from_raw)
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let id = buffer.as_raw();
        let mut st = self.state.lock();
        let Some(state) = st.buffers.remove(&id) else {
            st.double_destroy(ResourceKind::TensorBuffer, id);
            return;
        };
        if let Some(event) = state.event {
            if st.events.remove(&event).is_some_and(|e| e.completes_run && !e.signaled) {
                st.stats.in_flight_destroys += 1;
                tracing::error!(id, "tensor buffer destroyed while its run is in flight");
            }
            st.stats.record_destroy(ResourceKind::Event);
        }
        st.stats.record_destroy(ResourceKind::TensorBuffer);
        tracing::debug!(id, "host buffer destroyed");
    }

    fn lock_buffer(&self, buffer: BufferHandle, mode: LockMode) -> EngineResult<*mut u8> {
        let mut st = self.state.lock();
        let state = st.buffer_mut(buffer)?;
        if state.locked.is_some() {
            return Err(Status::ErrorRuntimeFailure);
        }
        state.locked = Some(mode);
        let ptr = state.storage.as_mut_ptr();
        st.stats.locks += 1;
        Ok(ptr)
    }

    fn unlock_buffer(&self, buffer: BufferHandle) -> EngineResult<()> {
        let mut st = self.state.lock();
        let state = st.buffer_mut(buffer)?;
        if state.locked.take().is_none() {
            return Err(Status::ErrorRuntimeFailure);
        }
        st.stats.unlocks += 1;
        Ok(())
    }

    fn buffer_type(&self, buffer: BufferHandle) -> EngineResult<BufferType> {
        Ok(self.state.lock().buffer(buffer)?.buffer_type)
    }

    fn buffer_tensor_type(&self, buffer: BufferHandle) -> EngineResult<RankedTensorType> {
        Ok(self.state.lock().buffer(buffer)?.tensor_type.clone())
    }

    fn buffer_size(&self, buffer: BufferHandle) -> EngineResult<usize> {
        Ok(self.state.lock().buffer(buffer)?.storage.len())
    }

    fn buffer_packed_size(&self, buffer: BufferHandle) -> EngineResult<usize> {
        let st = self.state.lock();
        st.buffer(buffer)?
            .tensor_type
            .packed_size()
            .map_err(|_| Status::ErrorInvalidArgument)
    }

    fn buffer_offset(&self, buffer: BufferHandle) -> EngineResult<usize> {
        self.state.lock().buffer(buffer)?;
        Ok(0)
    }

    fn clear_buffer(&self, buffer: BufferHandle) -> EngineResult<()> {
        let mut st = self.state.lock();
        st.buffer_mut(buffer)?.storage.bytes_mut().fill(0);
        Ok(())
    }

    fn buffer_has_event(&self, buffer: BufferHandle) -> EngineResult<bool> {
        Ok(self.state.lock().buffer(buffer)?.event.is_some())
    }

    fn buffer_event(&self, buffer: BufferHandle) -> EngineResult<EventHandle> {
        let event = self.state.lock().buffer(buffer)?.event;
        wrap(event.ok_or(Status::ErrorNotFound)?, EventHandle::from_raw)
    }

    fn set_buffer_event(&self, buffer: BufferHandle, event: EventHandle) -> EngineResult<()> {
        let mut st = self.state.lock();
        if !st.events.contains_key(&event.as_raw()) {
            return Err(Status::ErrorInvalidArgument);
        }
        let old = st.buffer_mut(buffer)?.event.replace(event.as_raw());
        if let Some(old) = old.filter(|&old| old != event.as_raw()) {
            st.events.remove(&old);
            st.stats.record_destroy(ResourceKind::Event);
        }
        Ok(())
    }

    fn clear_buffer_event(&self, buffer: BufferHandle) -> EngineResult<()> {
        self.state.lock().buffer_mut(buffer)?.event = None;
        Ok(())
    }

    fn create_event(&self, env: EnvironmentHandle, _event_type: EventType) -> EngineResult<EventHandle> {
        let mut st = self.state.lock();
        if !st.environments.contains_key(&env.as_raw()) {
            return Err(Status::ErrorInvalidArgument);
        }
        let id = st.next();
        st.events.insert(
            id,
            EventState {
                env: env.as_raw(),
                signaled: false,
                completes_run: false,
            },
        );
        st.stats.record_create(ResourceKind::Event);
        tracing::debug!(id, "host event created");
        wrap(id, EventHandle::from_raw)
    }

    fn destroy_event(&self, event: EventHandle) {
        let id = event.as_raw();
        let mut st = self.state.lock();
        if st.events.remove(&id).is_none() {
            st.double_destroy(ResourceKind::Event, id);
            return;
        }
        for buffer in st.buffers.values_mut() {
            if buffer.event == Some(id) {
                buffer.event = None;
            }
        }
        st.stats.record_destroy(ResourceKind::Event);
        self.signaled.notify_all();
        tracing::debug!(id, "host event destroyed");
    }

    fn signal_event(&self, event: EventHandle) -> EngineResult<()> {
        let mut st = self.state.lock();
        let state = st.events.get_mut(&event.as_raw()).ok_or(Status::ErrorInvalidArgument)?;
        state.signaled = true;
        self.signaled.notify_all();
        Ok(())
    }

    fn is_event_signaled(&self, event: EventHandle) -> EngineResult<bool> {
        let st = self.state.lock();
        let state = st.events.get(&event.as_raw()).ok_or(Status::ErrorInvalidArgument)?;
        Ok(state.signaled)
    }

    fn wait_event(&self, event: EventHandle, timeout_ms: i64) -> EngineResult<()> {
        let id = event.as_raw();
        let deadline = u64::try_from(timeout_ms)
            .ok()
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        let mut st = self.state.lock();
        loop {
            let signaled = st
                .events
                .get(&id)
                .map(|e| e.signaled)
                .ok_or(Status::ErrorInvalidArgument)?;
            if signaled {
                return Ok(());
            }
            match deadline {
                None => self.signaled.wait(&mut st),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(Status::ErrorTimeoutExpired);
                    }
                    let _ = self.signaled.wait_until(&mut st, deadline);
                }
            }
        }
    }
}
