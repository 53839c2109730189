use std::ffi::c_void;
use std::fmt::Debug;
use std::path::Path;

use lrt_tensor::{Layout, Quantization, RankedTensorType, TensorTypeId};

use crate::handle::*;
use crate::status::{EngineResult, Status};
use crate::types::*;

/// Native-callable cancellation predicate. Returns `true` to abort the run.
pub type CancelFn = unsafe extern "C" fn(data: *mut c_void) -> bool;

/// A cancellation predicate as the engine sees it: a C callback plus the
/// opaque pointer it is invoked with.
#[derive(Debug, Clone, Copy)]
pub struct CancelHook {
    pub callback: CancelFn,
    pub data: *mut c_void,
}

// The registrant guarantees `data` stays valid and callable from the thread
// that runs the compiled model for as long as the hook is registered.
unsafe impl Send for CancelHook {}
unsafe impl Sync for CancelHook {}

impl CancelHook {
    /// Poll the predicate.
    ///
    /// # Safety
    /// `data` must still be the live pointer registered with `callback`.
    pub unsafe fn poll(&self) -> bool {
        (self.callback)(self.data)
    }
}

/// Capability surface of the inference engine.
///
/// Every primitive maps onto one engine entry point and reports failure as
/// a [`Status`]. Implementations never track wrapper lifetimes; pairing
/// each handle with a single owner is the caller's job. Destroy primitives
/// return nothing, like the engine's own.
pub trait Engine: Send + Sync + Debug {
    /// Short name of this engine (e.g. "native", "host").
    fn name(&self) -> &str;

    /// Engine-provided description of a status code, if it has one.
    fn status_string(&self, status: Status) -> Option<String>;

    // -- environment --

    fn create_environment(&self) -> EngineResult<EnvironmentHandle>;
    fn destroy_environment(&self, env: EnvironmentHandle);
    fn has_gpu_environment(&self, env: EnvironmentHandle) -> EngineResult<bool>;
    fn create_gpu_environment(&self, env: EnvironmentHandle) -> EngineResult<()>;

    // -- model --

    fn create_model_from_file(&self, path: &Path) -> EngineResult<ModelHandle>;

    /// Parse a model from memory without copying it.
    ///
    /// # Safety
    /// `data..data+len` must stay valid and unmoved until the returned
    /// model is destroyed.
    unsafe fn create_model_from_buffer(&self, data: *const u8, len: usize)
        -> EngineResult<ModelHandle>;

    fn destroy_model(&self, model: ModelHandle);
    fn num_signatures(&self, model: ModelHandle) -> EngineResult<usize>;
    fn signature_key(&self, model: ModelHandle, signature: usize) -> EngineResult<String>;
    fn num_inputs(&self, model: ModelHandle, signature: usize) -> EngineResult<usize>;
    fn num_outputs(&self, model: ModelHandle, signature: usize) -> EngineResult<usize>;
    fn tensor_name(
        &self,
        model: ModelHandle,
        signature: usize,
        slot: TensorSlot,
    ) -> EngineResult<String>;
    fn tensor_type_id(
        &self,
        model: ModelHandle,
        signature: usize,
        slot: TensorSlot,
    ) -> EngineResult<TensorTypeId>;
    fn ranked_tensor_type(
        &self,
        model: ModelHandle,
        signature: usize,
        slot: TensorSlot,
    ) -> EngineResult<RankedTensorType>;
    fn quantization(
        &self,
        model: ModelHandle,
        signature: usize,
        slot: TensorSlot,
    ) -> EngineResult<Quantization>;

    // -- options --

    fn create_options(&self) -> EngineResult<OptionsHandle>;
    fn destroy_options(&self, options: OptionsHandle);
    fn set_accelerators(&self, options: OptionsHandle, mask: HwAccelerators)
        -> EngineResult<()>;
    fn create_opaque(&self, kind: OpaqueKind) -> EngineResult<OpaqueHandle>;
    fn configure_opaque(&self, opaque: OpaqueHandle, setting: &OpaqueSetting)
        -> EngineResult<()>;
    /// Attach an opaque block. The options aggregate releases it from then on.
    fn add_opaque(&self, options: OptionsHandle, opaque: OpaqueHandle) -> EngineResult<()>;

    // -- compiled model --

    fn create_compiled_model(
        &self,
        env: EnvironmentHandle,
        model: ModelHandle,
        options: OptionsHandle,
    ) -> EngineResult<CompiledHandle>;
    fn destroy_compiled_model(&self, compiled: CompiledHandle);

    fn buffer_requirements(
        &self,
        compiled: CompiledHandle,
        signature: usize,
        slot: TensorSlot,
    ) -> EngineResult<RequirementsHandle>;
    fn requirements_num_types(&self, reqs: RequirementsHandle) -> EngineResult<usize>;
    fn requirements_buffer_type(&self, reqs: RequirementsHandle, index: usize)
        -> EngineResult<BufferType>;
    fn requirements_size(&self, reqs: RequirementsHandle) -> EngineResult<usize>;
    fn requirements_alignment(&self, reqs: RequirementsHandle) -> EngineResult<usize>;

    fn run(
        &self,
        compiled: CompiledHandle,
        signature: usize,
        inputs: &[BufferHandle],
        outputs: &[BufferHandle],
    ) -> EngineResult<()>;

    /// Returns whether execution actually proceeded asynchronously.
    fn run_async(
        &self,
        compiled: CompiledHandle,
        signature: usize,
        inputs: &[BufferHandle],
        outputs: &[BufferHandle],
    ) -> EngineResult<bool>;

    fn resize_input(
        &self,
        compiled: CompiledHandle,
        signature: usize,
        input: usize,
        dims: &[i32],
        mode: ResizeMode,
    ) -> EngineResult<()>;
    fn input_layout(
        &self,
        compiled: CompiledHandle,
        signature: usize,
        input: usize,
    ) -> EngineResult<Layout>;
    /// Layouts of all `count` outputs. With `update_allocation` the engine
    /// first propagates the current input shapes through the graph.
    fn output_layouts(
        &self,
        compiled: CompiledHandle,
        signature: usize,
        count: usize,
        update_allocation: bool,
    ) -> EngineResult<Vec<Layout>>;
    fn is_fully_accelerated(&self, compiled: CompiledHandle) -> EngineResult<bool>;

    /// Register or clear the cancellation predicate.
    ///
    /// # Safety
    /// The hook's data pointer must remain valid until it is replaced,
    /// cleared, or the compiled model is destroyed.
    unsafe fn set_cancellation(
        &self,
        compiled: CompiledHandle,
        hook: Option<CancelHook>,
    ) -> EngineResult<()>;

    fn profiler(&self, compiled: CompiledHandle) -> EngineResult<ProfilerHandle>;
    fn start_profiler(&self, profiler: ProfilerHandle) -> EngineResult<()>;
    fn stop_profiler(&self, profiler: ProfilerHandle) -> EngineResult<()>;
    fn reset_profiler(&self, profiler: ProfilerHandle) -> EngineResult<()>;
    fn num_profiler_events(&self, profiler: ProfilerHandle) -> EngineResult<usize>;

    fn error_messages(&self, compiled: CompiledHandle) -> EngineResult<String>;
    fn clear_errors(&self, compiled: CompiledHandle) -> EngineResult<()>;

    // -- tensor buffers --

    fn create_managed_buffer(
        &self,
        env: EnvironmentHandle,
        buffer_type: BufferType,
        tensor_type: &RankedTensorType,
        size: usize,
    ) -> EngineResult<BufferHandle>;

    /// Wrap caller memory without copying.
    ///
    /// # Safety
    /// `data..data+len` must stay valid until the buffer is destroyed.
    unsafe fn create_buffer_from_host_memory(
        &self,
        tensor_type: &RankedTensorType,
        data: *mut u8,
        len: usize,
    ) -> EngineResult<BufferHandle>;

    fn destroy_buffer(&self, buffer: BufferHandle);
    /// Host-visible address of the buffer, valid until the matching unlock.
    fn lock_buffer(&self, buffer: BufferHandle, mode: LockMode) -> EngineResult<*mut u8>;
    fn unlock_buffer(&self, buffer: BufferHandle) -> EngineResult<()>;
    fn buffer_type(&self, buffer: BufferHandle) -> EngineResult<BufferType>;
    fn buffer_tensor_type(&self, buffer: BufferHandle) -> EngineResult<RankedTensorType>;
    fn buffer_size(&self, buffer: BufferHandle) -> EngineResult<usize>;
    fn buffer_packed_size(&self, buffer: BufferHandle) -> EngineResult<usize>;
    fn buffer_offset(&self, buffer: BufferHandle) -> EngineResult<usize>;
    fn clear_buffer(&self, buffer: BufferHandle) -> EngineResult<()>;

    fn buffer_has_event(&self, buffer: BufferHandle) -> EngineResult<bool>;
    fn buffer_event(&self, buffer: BufferHandle) -> EngineResult<EventHandle>;
    /// Attach an event. The buffer owns it from then on.
    fn set_buffer_event(&self, buffer: BufferHandle, event: EventHandle) -> EngineResult<()>;
    /// Detach the attached event without destroying it.
    fn clear_buffer_event(&self, buffer: BufferHandle) -> EngineResult<()>;

    // -- events --

    fn create_event(&self, env: EnvironmentHandle, event_type: EventType)
        -> EngineResult<EventHandle>;
    fn destroy_event(&self, event: EventHandle);
    fn signal_event(&self, event: EventHandle) -> EngineResult<()>;
    fn is_event_signaled(&self, event: EventHandle) -> EngineResult<bool>;
    /// Block until signaled. A negative timeout waits forever.
    fn wait_event(&self, event: EventHandle, timeout_ms: i64) -> EngineResult<()>;
}
