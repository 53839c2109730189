//! [`Engine`] backed by the precompiled engine shared library.

mod ffi;

pub use ffi::{NativeApi, RawLayout, RawRankedTensorType};

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::fmt;
use std::path::Path;
use std::ptr;

use lrt_tensor::{Layout, Quantization, QuantizationTypeId, RankedTensorType, TensorTypeId};

use crate::engine::{CancelHook, Engine};
use crate::error::Result;
use crate::handle::*;
use crate::status::{EngineResult, Status};
use crate::types::*;

use ffi::{RawHandle, RawQuantizationPerChannel, RawQuantizationPerTensor, RawStatus};

/// Environment variable naming the engine library to load.
pub const LIBRARY_PATH_ENV: &str = "LITERT_LIBRARY_PATH";

/// Platform file name of the engine library.
pub fn default_library_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "LiteRt.dll"
    } else if cfg!(target_os = "macos") {
        "libLiteRt.dylib"
    } else {
        "libLiteRt.so"
    }
}

pub struct NativeEngine {
    api: NativeApi,
}

impl fmt::Debug for NativeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeEngine")
            .field("path", &self.api.path())
            .finish()
    }
}

fn check(code: RawStatus) -> EngineResult<()> {
    Status::from_raw(code).check()
}

/// Turn an out-parameter handle into a typed one. A null handle after an
/// ok status is an engine fault.
fn non_null<H>(raw: RawHandle, wrap: fn(*mut c_void) -> Option<H>) -> EngineResult<H> {
    wrap(raw).ok_or(Status::ErrorRuntimeFailure)
}

/// Host pointer of a buffer the engine reports as locked. A null mapping
/// is released again through `unlock` so the buffer does not stay locked.
fn host_mapping(
    host: *mut c_void,
    unlock: impl FnOnce() -> EngineResult<()>,
) -> EngineResult<*mut u8> {
    if host.is_null() {
        if let Err(status) = unlock() {
            tracing::warn!(%status, "unlock after null mapping failed");
        }
        return Err(Status::ErrorRuntimeFailure);
    }
    Ok(host as *mut u8)
}

/// Copy an engine-owned C string.
unsafe fn owned_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

fn c_string(s: &str) -> EngineResult<CString> {
    CString::new(s).map_err(|_| Status::ErrorInvalidArgument)
}

fn raw_handles(buffers: &[BufferHandle]) -> Vec<RawHandle> {
    buffers.iter().map(|b| b.as_ptr()).collect()
}

impl NativeEngine {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let api = NativeApi::load(&path)?;
        tracing::debug!(path = %path, "loaded engine library");
        Ok(NativeEngine { api })
    }

    /// Load the library named by `LITERT_LIBRARY_PATH`, or the platform
    /// default name resolved through the loader search path.
    pub fn from_env() -> Result<Self> {
        match std::env::var(LIBRARY_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::load(path),
            _ => Self::load(default_library_name()),
        }
    }

    fn signature(&self, model: ModelHandle, signature: usize) -> EngineResult<RawHandle> {
        let mut sig = ptr::null_mut();
        check(unsafe { (self.api.model_signature)(model.as_ptr(), signature, &mut sig) })?;
        if sig.is_null() {
            return Err(Status::ErrorNotFound);
        }
        Ok(sig)
    }

    fn tensor(&self, model: ModelHandle, signature: usize, slot: TensorSlot) -> EngineResult<RawHandle> {
        let sig = self.signature(model, signature)?;
        let mut tensor = ptr::null_mut();
        let code = unsafe {
            match slot {
                TensorSlot::Input(i) => (self.api.signature_input_tensor)(sig, i, &mut tensor),
                TensorSlot::Output(i) => (self.api.signature_output_tensor)(sig, i, &mut tensor),
            }
        };
        check(code)?;
        if tensor.is_null() {
            return Err(Status::ErrorNotFound);
        }
        Ok(tensor)
    }

    fn usize_out(&self, f: unsafe extern "C" fn(RawHandle, *mut usize) -> RawStatus, h: RawHandle) -> EngineResult<usize> {
        let mut out = 0usize;
        check(unsafe { f(h, &mut out) })?;
        Ok(out)
    }

    fn bool_out(&self, f: unsafe extern "C" fn(RawHandle, *mut bool) -> RawStatus, h: RawHandle) -> EngineResult<bool> {
        let mut out = false;
        check(unsafe { f(h, &mut out) })?;
        Ok(out)
    }

    fn create_out(&self, f: unsafe extern "C" fn(*mut RawHandle) -> RawStatus) -> EngineResult<RawHandle> {
        let mut out = ptr::null_mut();
        check(unsafe { f(&mut out) })?;
        if out.is_null() {
            return Err(Status::ErrorRuntimeFailure);
        }
        Ok(out)
    }
}

impl Engine for NativeEngine {
    fn name(&self) -> &str {
        "native"
    }

    fn status_string(&self, status: Status) -> Option<String> {
        let ptr = unsafe { (self.api.get_status_string)(status.as_raw()) };
        if ptr.is_null() {
            tracing::warn!(%status, "engine has no description for status");
            return None;
        }
        Some(unsafe { owned_string(ptr) })
    }

    fn create_environment(&self) -> EngineResult<EnvironmentHandle> {
        let mut env = ptr::null_mut();
        check(unsafe { (self.api.create_environment)(0, ptr::null(), &mut env) })?;
        non_null(env, EnvironmentHandle::from_ptr)
    }

    fn destroy_environment(&self, env: EnvironmentHandle) {
        unsafe { (self.api.destroy_environment)(env.as_ptr()) }
    }

    fn has_gpu_environment(&self, env: EnvironmentHandle) -> EngineResult<bool> {
        self.bool_out(self.api.has_gpu_environment, env.as_ptr())
    }

    fn create_gpu_environment(&self, env: EnvironmentHandle) -> EngineResult<()> {
        check(unsafe { (self.api.create_gpu_environment)(env.as_ptr(), 0, ptr::null()) })
    }

    fn create_model_from_file(&self, path: &Path) -> EngineResult<ModelHandle> {
        let path = path.to_str().ok_or(Status::ErrorInvalidArgument)?;
        let c_path = c_string(path)?;
        let mut model = ptr::null_mut();
        check(unsafe { (self.api.create_model_from_file)(c_path.as_ptr(), &mut model) })?;
        non_null(model, ModelHandle::from_ptr)
    }

    unsafe fn create_model_from_buffer(&self, data: *const u8, len: usize) -> EngineResult<ModelHandle> {
        let mut model = ptr::null_mut();
        check((self.api.create_model_from_buffer)(data as *const c_void, len, &mut model))?;
        non_null(model, ModelHandle::from_ptr)
    }

    fn destroy_model(&self, model: ModelHandle) {
        unsafe { (self.api.destroy_model)(model.as_ptr()) }
    }

    fn num_signatures(&self, model: ModelHandle) -> EngineResult<usize> {
        self.usize_out(self.api.num_signatures, model.as_ptr())
    }

    fn signature_key(&self, model: ModelHandle, signature: usize) -> EngineResult<String> {
        let sig = self.signature(model, signature)?;
        let mut key = ptr::null();
        check(unsafe { (self.api.signature_key)(sig, &mut key) })?;
        Ok(unsafe { owned_string(key) })
    }

    fn num_inputs(&self, model: ModelHandle, signature: usize) -> EngineResult<usize> {
        let sig = self.signature(model, signature)?;
        self.usize_out(self.api.num_signature_inputs, sig)
    }

    fn num_outputs(&self, model: ModelHandle, signature: usize) -> EngineResult<usize> {
        let sig = self.signature(model, signature)?;
        self.usize_out(self.api.num_signature_outputs, sig)
    }

    fn tensor_name(&self, model: ModelHandle, signature: usize, slot: TensorSlot) -> EngineResult<String> {
        let tensor = self.tensor(model, signature, slot)?;
        let mut name = ptr::null();
        check(unsafe { (self.api.tensor_name)(tensor, &mut name) })?;
        Ok(unsafe { owned_string(name) })
    }

    fn tensor_type_id(&self, model: ModelHandle, signature: usize, slot: TensorSlot) -> EngineResult<TensorTypeId> {
        let tensor = self.tensor(model, signature, slot)?;
        let mut id: c_int = 0;
        check(unsafe { (self.api.tensor_type_id)(tensor, &mut id) })?;
        TensorTypeId::from_raw(id).ok_or(Status::ErrorInvalidIrType)
    }

    fn ranked_tensor_type(&self, model: ModelHandle, signature: usize, slot: TensorSlot) -> EngineResult<RankedTensorType> {
        let tensor = self.tensor(model, signature, slot)?;
        let mut raw = RawRankedTensorType::zeroed();
        check(unsafe { (self.api.ranked_tensor_type)(tensor, &mut raw) })?;
        raw.to_type().map_err(|_| Status::ErrorInvalidIrType)
    }

    fn quantization(&self, model: ModelHandle, signature: usize, slot: TensorSlot) -> EngineResult<Quantization> {
        let tensor = self.tensor(model, signature, slot)?;
        let mut id: c_int = 0;
        check(unsafe { (self.api.quantization_type_id)(tensor, &mut id) })?;
        match QuantizationTypeId::from_raw(id) {
            Some(QuantizationTypeId::None) => Ok(Quantization::None),
            Some(QuantizationTypeId::PerTensor) => {
                let mut raw = RawQuantizationPerTensor::default();
                check(unsafe { (self.api.quantization_per_tensor)(tensor, &mut raw) })?;
                Ok(Quantization::PerTensor {
                    scale: raw.scale,
                    zero_point: raw.zero_point,
                })
            }
            Some(QuantizationTypeId::PerChannel) => {
                let mut raw = RawQuantizationPerChannel {
                    scales: ptr::null(),
                    zero_points: ptr::null(),
                    quantized_dimension: 0,
                    num_channels: 0,
                };
                check(unsafe { (self.api.quantization_per_channel)(tensor, &mut raw) })?;
                let n = raw.num_channels;
                let copy = |p: *const f32| -> Vec<f32> {
                    if p.is_null() { Vec::new() } else { unsafe { std::slice::from_raw_parts(p, n) }.to_vec() }
                };
                let zero_points = if raw.zero_points.is_null() {
                    Vec::new()
                } else {
                    unsafe { std::slice::from_raw_parts(raw.zero_points, n) }.to_vec()
                };
                Ok(Quantization::PerChannel {
                    scales: copy(raw.scales),
                    zero_points,
                    quantized_dimension: raw.quantized_dimension,
                })
            }
            Some(QuantizationTypeId::BlockWise) => Ok(Quantization::BlockWise),
            None => Err(Status::ErrorInvalidIrType),
        }
    }

    fn create_options(&self) -> EngineResult<OptionsHandle> {
        let raw = self.create_out(self.api.create_options)?;
        non_null(raw, OptionsHandle::from_ptr)
    }

    fn destroy_options(&self, options: OptionsHandle) {
        unsafe { (self.api.destroy_options)(options.as_ptr()) }
    }

    fn set_accelerators(&self, options: OptionsHandle, mask: HwAccelerators) -> EngineResult<()> {
        check(unsafe { (self.api.set_hardware_accelerators)(options.as_ptr(), mask.bits()) })
    }

    fn create_opaque(&self, kind: OpaqueKind) -> EngineResult<OpaqueHandle> {
        let create = match kind {
            OpaqueKind::Cpu => self.api.create_cpu_options,
            OpaqueKind::Gpu => self.api.create_gpu_options,
            OpaqueKind::Runtime => self.api.create_runtime_options,
        };
        let raw = self.create_out(create)?;
        non_null(raw, OpaqueHandle::from_ptr)
    }

    fn configure_opaque(&self, opaque: OpaqueHandle, setting: &OpaqueSetting) -> EngineResult<()> {
        let api = &self.api;
        let h = opaque.as_ptr();
        match setting {
            OpaqueSetting::Cpu(CpuSetting::NumThreads(n)) => {
                let mut cpu = ptr::null_mut();
                check(unsafe { (api.find_cpu_options)(h, &mut cpu) })?;
                check(unsafe { (api.set_cpu_num_threads)(cpu, *n) })
            }
            OpaqueSetting::Gpu(gpu) => unsafe {
                match gpu {
                    GpuSetting::Backend(b) => check((api.set_gpu_backend)(h, *b as c_int)),
                    GpuSetting::Precision(p) => check((api.set_gpu_precision)(h, *p as c_int)),
                    GpuSetting::Priority(p) => check((api.set_gpu_priority)(h, *p as c_int)),
                    GpuSetting::ExternalTensors(on) => check((api.set_gpu_external_tensors)(h, *on)),
                    GpuSetting::SerializationDir(dir) => {
                        let dir = c_string(dir)?;
                        check((api.set_gpu_serialization_dir)(h, dir.as_ptr()))
                    }
                    GpuSetting::ModelCacheKey(key) => {
                        let key = c_string(key)?;
                        check((api.set_gpu_model_cache_key)(h, key.as_ptr()))
                    }
                    GpuSetting::FullyDelegated(hint) => check((api.set_gpu_fully_delegated)(h, *hint)),
                }
            },
            OpaqueSetting::Runtime(setting) => {
                let mut runtime = ptr::null_mut();
                check(unsafe { (api.find_runtime_options)(h, &mut runtime) })?;
                match setting {
                    RuntimeSetting::Profiling(on) => check(unsafe { (api.set_runtime_profiling)(runtime, *on) }),
                    RuntimeSetting::ErrorReporter(mode) => {
                        check(unsafe { (api.set_runtime_error_reporter)(runtime, *mode as c_int) })
                    }
                }
            }
        }
    }

    fn add_opaque(&self, options: OptionsHandle, opaque: OpaqueHandle) -> EngineResult<()> {
        check(unsafe { (self.api.add_opaque_options)(options.as_ptr(), opaque.as_ptr()) })
    }

    fn create_compiled_model(
        &self,
        env: EnvironmentHandle,
        model: ModelHandle,
        options: OptionsHandle,
    ) -> EngineResult<CompiledHandle> {
        let mut compiled = ptr::null_mut();
        check(unsafe {
            (self.api.create_compiled_model)(env.as_ptr(), model.as_ptr(), options.as_ptr(), &mut compiled)
        })?;
        non_null(compiled, CompiledHandle::from_ptr)
    }

    fn destroy_compiled_model(&self, compiled: CompiledHandle) {
        unsafe { (self.api.destroy_compiled_model)(compiled.as_ptr()) }
    }

    fn buffer_requirements(&self, compiled: CompiledHandle, signature: usize, slot: TensorSlot) -> EngineResult<RequirementsHandle> {
        let mut reqs = ptr::null_mut();
        let code = unsafe {
            match slot {
                TensorSlot::Input(i) => (self.api.input_requirements)(compiled.as_ptr(), signature, i, &mut reqs),
                TensorSlot::Output(i) => (self.api.output_requirements)(compiled.as_ptr(), signature, i, &mut reqs),
            }
        };
        check(code)?;
        non_null(reqs, RequirementsHandle::from_ptr)
    }

    fn requirements_num_types(&self, reqs: RequirementsHandle) -> EngineResult<usize> {
        self.usize_out(self.api.requirements_num_types, reqs.as_ptr())
    }

    fn requirements_buffer_type(&self, reqs: RequirementsHandle, index: usize) -> EngineResult<BufferType> {
        let mut code: c_int = 0;
        check(unsafe { (self.api.requirements_buffer_type)(reqs.as_ptr(), index, &mut code) })?;
        Ok(BufferType::from_raw(code))
    }

    fn requirements_size(&self, reqs: RequirementsHandle) -> EngineResult<usize> {
        self.usize_out(self.api.requirements_size, reqs.as_ptr())
    }

    fn requirements_alignment(&self, reqs: RequirementsHandle) -> EngineResult<usize> {
        self.usize_out(self.api.requirements_alignment, reqs.as_ptr())
    }

    fn run(&self, compiled: CompiledHandle, signature: usize, inputs: &[BufferHandle], outputs: &[BufferHandle]) -> EngineResult<()> {
        let ins = raw_handles(inputs);
        let outs = raw_handles(outputs);
        check(unsafe {
            (self.api.run)(compiled.as_ptr(), signature, ins.len(), ins.as_ptr(), outs.len(), outs.as_ptr())
        })
    }

    fn run_async(&self, compiled: CompiledHandle, signature: usize, inputs: &[BufferHandle], outputs: &[BufferHandle]) -> EngineResult<bool> {
        let ins = raw_handles(inputs);
        let outs = raw_handles(outputs);
        let mut executed_async = false;
        check(unsafe {
            (self.api.run_async)(
                compiled.as_ptr(),
                signature,
                ins.len(),
                ins.as_ptr(),
                outs.len(),
                outs.as_ptr(),
                &mut executed_async,
            )
        })?;
        Ok(executed_async)
    }

    fn resize_input(&self, compiled: CompiledHandle, signature: usize, input: usize, dims: &[i32], mode: ResizeMode) -> EngineResult<()> {
        let resize = match mode {
            ResizeMode::Strict => self.api.resize_input,
            ResizeMode::NonStrict => self.api.resize_input_non_strict,
        };
        check(unsafe { resize(compiled.as_ptr(), signature, input, dims.as_ptr(), dims.len()) })
    }

    fn input_layout(&self, compiled: CompiledHandle, signature: usize, input: usize) -> EngineResult<Layout> {
        let mut raw = RawLayout::zeroed();
        check(unsafe { (self.api.input_layout)(compiled.as_ptr(), signature, input, &mut raw) })?;
        raw.to_layout().map_err(|_| Status::ErrorInvalidIrType)
    }

    fn output_layouts(&self, compiled: CompiledHandle, signature: usize, count: usize, update_allocation: bool) -> EngineResult<Vec<Layout>> {
        let mut raw = vec![RawLayout::zeroed(); count];
        check(unsafe {
            (self.api.output_layouts)(compiled.as_ptr(), signature, count, raw.as_mut_ptr(), update_allocation)
        })?;
        raw.iter()
            .map(|l| l.to_layout().map_err(|_| Status::ErrorInvalidIrType))
            .collect()
    }

    fn is_fully_accelerated(&self, compiled: CompiledHandle) -> EngineResult<bool> {
        self.bool_out(self.api.is_fully_accelerated, compiled.as_ptr())
    }

    unsafe fn set_cancellation(&self, compiled: CompiledHandle, hook: Option<CancelHook>) -> EngineResult<()> {
        let (data, callback) = match hook {
            Some(h) => (h.data, Some(h.callback)),
            None => (ptr::null_mut(), None),
        };
        check((self.api.set_cancellation)(compiled.as_ptr(), data, callback))
    }

    fn profiler(&self, compiled: CompiledHandle) -> EngineResult<ProfilerHandle> {
        let mut profiler = ptr::null_mut();
        check(unsafe { (self.api.profiler)(compiled.as_ptr(), &mut profiler) })?;
        non_null(profiler, ProfilerHandle::from_ptr)
    }

    fn start_profiler(&self, profiler: ProfilerHandle) -> EngineResult<()> {
        check(unsafe { (self.api.start_profiler)(profiler.as_ptr()) })
    }

    fn stop_profiler(&self, profiler: ProfilerHandle) -> EngineResult<()> {
        check(unsafe { (self.api.stop_profiler)(profiler.as_ptr()) })
    }

    fn reset_profiler(&self, profiler: ProfilerHandle) -> EngineResult<()> {
        check(unsafe { (self.api.reset_profiler)(profiler.as_ptr()) })
    }

    fn num_profiler_events(&self, profiler: ProfilerHandle) -> EngineResult<usize> {
        self.usize_out(self.api.num_profiler_events, profiler.as_ptr())
    }

    fn error_messages(&self, compiled: CompiledHandle) -> EngineResult<String> {
        let mut messages = ptr::null();
        check(unsafe { (self.api.error_messages)(compiled.as_ptr(), &mut messages) })?;
        Ok(unsafe { owned_string(messages) })
    }

    fn clear_errors(&self, compiled: CompiledHandle) -> EngineResult<()> {
        check(unsafe { (self.api.clear_errors)(compiled.as_ptr()) })
    }

    fn create_managed_buffer(
        &self,
        env: EnvironmentHandle,
        buffer_type: BufferType,
        tensor_type: &RankedTensorType,
        size: usize,
    ) -> EngineResult<BufferHandle> {
        let raw_type = RawRankedTensorType::from_type(tensor_type);
        let mut buffer = ptr::null_mut();
        check(unsafe {
            (self.api.create_managed_buffer)(env.as_ptr(), buffer_type.as_raw(), &raw_type, size, &mut buffer)
        })?;
        non_null(buffer, BufferHandle::from_ptr)
    }

    unsafe fn create_buffer_from_host_memory(
        &self,
        tensor_type: &RankedTensorType,
        data: *mut u8,
        len: usize,
    ) -> EngineResult<BufferHandle> {
        let raw_type = RawRankedTensorType::from_type(tensor_type);
        let mut buffer = ptr::null_mut();
        check((self.api.create_buffer_from_host_memory)(
            &raw_type,
            data as *mut c_void,
            len,
            ptr::null(),
            &mut buffer,
        ))?;
        non_null(buffer, BufferHandle::from_ptr)
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        unsafe { (self.api.destroy_buffer)(buffer.as_ptr()) }
    }

    fn lock_buffer(&self, buffer: BufferHandle, mode: LockMode) -> EngineResult<*mut u8> {
        let mut host = ptr::null_mut();
        check(unsafe { (self.api.lock_buffer)(buffer.as_ptr(), &mut host, mode as c_int) })?;
        host_mapping(host, || self.unlock_buffer(buffer))
    }

    fn unlock_buffer(&self, buffer: BufferHandle) -> EngineResult<()> {
        check(unsafe { (self.api.unlock_buffer)(buffer.as_ptr()) })
    }

    fn buffer_type(&self, buffer: BufferHandle) -> EngineResult<BufferType> {
        let mut code: c_int = 0;
        check(unsafe { (self.api.buffer_type)(buffer.as_ptr(), &mut code) })?;
        Ok(BufferType::from_raw(code))
    }

    fn buffer_tensor_type(&self, buffer: BufferHandle) -> EngineResult<RankedTensorType> {
        let mut raw = RawRankedTensorType::zeroed();
        check(unsafe { (self.api.buffer_tensor_type)(buffer.as_ptr(), &mut raw) })?;
        raw.to_type().map_err(|_| Status::ErrorInvalidIrType)
    }

    fn buffer_size(&self, buffer: BufferHandle) -> EngineResult<usize> {
        self.usize_out(self.api.buffer_size, buffer.as_ptr())
    }

    fn buffer_packed_size(&self, buffer: BufferHandle) -> EngineResult<usize> {
        self.usize_out(self.api.buffer_packed_size, buffer.as_ptr())
    }

    fn buffer_offset(&self, buffer: BufferHandle) -> EngineResult<usize> {
        self.usize_out(self.api.buffer_offset, buffer.as_ptr())
    }

    fn clear_buffer(&self, buffer: BufferHandle) -> EngineResult<()> {
        check(unsafe { (self.api.clear_buffer)(buffer.as_ptr()) })
    }

    fn buffer_has_event(&self, buffer: BufferHandle) -> EngineResult<bool> {
        self.bool_out(self.api.buffer_has_event, buffer.as_ptr())
    }

    fn buffer_event(&self, buffer: BufferHandle) -> EngineResult<EventHandle> {
        let mut event = ptr::null_mut();
        check(unsafe { (self.api.buffer_event)(buffer.as_ptr(), &mut event) })?;
        EventHandle::from_ptr(event).ok_or(Status::ErrorNotFound)
    }

    fn set_buffer_event(&self, buffer: BufferHandle, event: EventHandle) -> EngineResult<()> {
        check(unsafe { (self.api.set_buffer_event)(buffer.as_ptr(), event.as_ptr()) })
    }

    fn clear_buffer_event(&self, buffer: BufferHandle) -> EngineResult<()> {
        check(unsafe { (self.api.clear_buffer_event)(buffer.as_ptr()) })
    }

    fn create_event(&self, env: EnvironmentHandle, event_type: EventType) -> EngineResult<EventHandle> {
        let mut event = ptr::null_mut();
        check(unsafe { (self.api.create_event)(env.as_ptr(), event_type as c_int, &mut event) })?;
        non_null(event, EventHandle::from_ptr)
    }

    fn destroy_event(&self, event: EventHandle) {
        unsafe { (self.api.destroy_event)(event.as_ptr()) }
    }

    fn signal_event(&self, event: EventHandle) -> EngineResult<()> {
        check(unsafe { (self.api.signal_event)(event.as_ptr()) })
    }

    fn is_event_signaled(&self, event: EventHandle) -> EngineResult<bool> {
        self.bool_out(self.api.is_event_signaled, event.as_ptr())
    }

    fn wait_event(&self, event: EventHandle, timeout_ms: i64) -> EngineResult<()> {
        check(unsafe { (self.api.wait_event)(event.as_ptr(), timeout_ms) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_library_name() {
        let name = default_library_name();
        assert!(name.contains("LiteRt"));
    }

    #[test]
    fn test_load_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("libLiteRt.so");
        let err = NativeEngine::load(&missing).err().unwrap();
        assert!(err.to_string().contains("cannot load engine library"));
    }

    #[test]
    fn test_null_mapping_is_unlocked() {
        let mut unlocks = 0;
        let err = host_mapping(ptr::null_mut(), || {
            unlocks += 1;
            Ok(())
        });
        assert_eq!(err, Err(Status::ErrorRuntimeFailure));
        assert_eq!(unlocks, 1);

        let mut byte = 7u8;
        let host = &mut byte as *mut u8 as *mut c_void;
        let mapped = host_mapping(host, || unreachable!()).unwrap();
        assert_eq!(mapped, &mut byte as *mut u8);
    }

    #[test]
    fn test_non_library_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("libLiteRt.so");
        std::fs::write(&bogus, b"not a shared object").unwrap();
        assert!(NativeEngine::load(&bogus).is_err());
    }
}
