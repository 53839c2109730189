//! Runtime-loaded engine entry points.
//!
//! The shared library is opened with `libloading` and every symbol is
//! resolved up front, so a library that lacks one fails at load time rather
//! than at first use.

use std::ffi::{c_char, c_int, c_void};

use libloading::Library;
use lrt_tensor::{ElementType, Layout, RankedTensorType, TensorError, MAX_RANK};

use crate::engine::CancelFn;
use crate::error::{LoadError, Result};

pub type RawStatus = c_int;
pub type RawHandle = *mut c_void;

/// `LiteRtLayout`: a 7-bit rank and a has-strides bit packed into the first
/// word, followed by fixed-size dimension and stride arrays.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawLayout {
    pub rank_and_flags: u32,
    pub dimensions: [i32; MAX_RANK],
    pub strides: [u32; MAX_RANK],
}

impl RawLayout {
    pub const RANK_MASK: u32 = 0x7f;
    pub const HAS_STRIDES: u32 = 0x80;

    pub fn zeroed() -> Self {
        RawLayout {
            rank_and_flags: 0,
            dimensions: [0; MAX_RANK],
            strides: [0; MAX_RANK],
        }
    }

    pub fn rank(&self) -> usize {
        (self.rank_and_flags & Self::RANK_MASK) as usize
    }

    pub fn has_strides(&self) -> bool {
        self.rank_and_flags & Self::HAS_STRIDES != 0
    }

    pub fn from_layout(layout: &Layout) -> Self {
        let mut raw = RawLayout::zeroed();
        raw.rank_and_flags = layout.rank() as u32 & Self::RANK_MASK;
        raw.dimensions[..layout.rank()].copy_from_slice(layout.dims());
        if let Some(strides) = layout.strides() {
            raw.rank_and_flags |= Self::HAS_STRIDES;
            raw.strides[..strides.len()].copy_from_slice(strides);
        }
        raw
    }

    pub fn to_layout(&self) -> lrt_tensor::Result<Layout> {
        let rank = self.rank();
        if rank > MAX_RANK {
            return Err(TensorError::RankTooLarge {
                rank,
                max: MAX_RANK,
            });
        }
        let layout = Layout::new(self.dimensions[..rank].to_vec())?;
        if self.has_strides() {
            layout.with_strides(self.strides[..rank].to_vec())
        } else {
            Ok(layout)
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawRankedTensorType {
    pub element_type: c_int,
    pub layout: RawLayout,
}

impl RawRankedTensorType {
    pub fn zeroed() -> Self {
        RawRankedTensorType {
            element_type: 0,
            layout: RawLayout::zeroed(),
        }
    }

    pub fn from_type(t: &RankedTensorType) -> Self {
        RawRankedTensorType {
            element_type: t.element_type.as_raw(),
            layout: RawLayout::from_layout(&t.layout),
        }
    }

    pub fn to_type(&self) -> lrt_tensor::Result<RankedTensorType> {
        let element_type = ElementType::try_from_raw(self.element_type)?;
        Ok(RankedTensorType::new(element_type, self.layout.to_layout()?))
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawQuantizationPerTensor {
    pub scale: f32,
    pub zero_point: i64,
}

/// Per-channel parameters. The arrays are owned by the engine.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawQuantizationPerChannel {
    pub scales: *const f32,
    pub zero_points: *const i64,
    pub quantized_dimension: i32,
    pub num_channels: usize,
}

macro_rules! native_api {
    ($($field:ident: $ty:ty = $symbol:literal;)*) => {
        /// Resolved engine entry points. The library stays loaded for as
        /// long as this table lives.
        pub struct NativeApi {
            path: String,
            _lib: Library,
            $(pub $field: $ty,)*
        }

        impl NativeApi {
            pub fn load(path: &str) -> Result<Self> {
                let lib = unsafe { Library::new(path) }.map_err(|source| LoadError::Library {
                    path: path.to_string(),
                    source,
                })?;
                $(
                    let $field: $ty = unsafe {
                        *lib.get::<$ty>(concat!($symbol, "\0").as_bytes()).map_err(|source| {
                            LoadError::MissingSymbol {
                                path: path.to_string(),
                                symbol: $symbol,
                                source,
                            }
                        })?
                    };
                )*
                Ok(NativeApi {
                    path: path.to_string(),
                    _lib: lib,
                    $($field,)*
                })
            }

            pub fn path(&self) -> &str {
                &self.path
            }
        }
    };
}

native_api! {
    get_status_string: unsafe extern "C" fn(RawStatus) -> *const c_char = "LiteRtGetStatusString";

    // environment
    create_environment: unsafe extern "C" fn(c_int, *const c_void, *mut RawHandle) -> RawStatus = "LiteRtCreateEnvironment";
    destroy_environment: unsafe extern "C" fn(RawHandle) = "LiteRtDestroyEnvironment";
    has_gpu_environment: unsafe extern "C" fn(RawHandle, *mut bool) -> RawStatus = "LiteRtEnvironmentHasGpuEnvironment";
    create_gpu_environment: unsafe extern "C" fn(RawHandle, c_int, *const c_void) -> RawStatus = "LiteRtGpuEnvironmentCreate";

    // model and signatures
    create_model_from_file: unsafe extern "C" fn(*const c_char, *mut RawHandle) -> RawStatus = "LiteRtCreateModelFromFile";
    create_model_from_buffer: unsafe extern "C" fn(*const c_void, usize, *mut RawHandle) -> RawStatus = "LiteRtCreateModelFromBuffer";
    destroy_model: unsafe extern "C" fn(RawHandle) = "LiteRtDestroyModel";
    num_signatures: unsafe extern "C" fn(RawHandle, *mut usize) -> RawStatus = "LiteRtGetNumModelSignatures";
    model_signature: unsafe extern "C" fn(RawHandle, usize, *mut RawHandle) -> RawStatus = "LiteRtGetModelSignature";
    signature_key: unsafe extern "C" fn(RawHandle, *mut *const c_char) -> RawStatus = "LiteRtGetSignatureKey";
    num_signature_inputs: unsafe extern "C" fn(RawHandle, *mut usize) -> RawStatus = "LiteRtGetNumSignatureInputs";
    num_signature_outputs: unsafe extern "C" fn(RawHandle, *mut usize) -> RawStatus = "LiteRtGetNumSignatureOutputs";
    signature_input_tensor: unsafe extern "C" fn(RawHandle, usize, *mut RawHandle) -> RawStatus = "LiteRtGetSignatureInputTensorByIndex";
    signature_output_tensor: unsafe extern "C" fn(RawHandle, usize, *mut RawHandle) -> RawStatus = "LiteRtGetSignatureOutputTensorByIndex";
    tensor_name: unsafe extern "C" fn(RawHandle, *mut *const c_char) -> RawStatus = "LiteRtGetTensorName";
    tensor_type_id: unsafe extern "C" fn(RawHandle, *mut c_int) -> RawStatus = "LiteRtGetTensorTypeId";
    ranked_tensor_type: unsafe extern "C" fn(RawHandle, *mut RawRankedTensorType) -> RawStatus = "LiteRtGetRankedTensorType";
    quantization_type_id: unsafe extern "C" fn(RawHandle, *mut c_int) -> RawStatus = "LiteRtGetQuantizationTypeId";
    quantization_per_tensor: unsafe extern "C" fn(RawHandle, *mut RawQuantizationPerTensor) -> RawStatus = "LiteRtGetQuantizationPerTensor";
    quantization_per_channel: unsafe extern "C" fn(RawHandle, *mut RawQuantizationPerChannel) -> RawStatus = "LiteRtGetQuantizationPerChannel";

    // options
    create_options: unsafe extern "C" fn(*mut RawHandle) -> RawStatus = "LiteRtCreateOptions";
    destroy_options: unsafe extern "C" fn(RawHandle) = "LiteRtDestroyOptions";
    set_hardware_accelerators: unsafe extern "C" fn(RawHandle, c_int) -> RawStatus = "LiteRtSetOptionsHardwareAccelerators";
    add_opaque_options: unsafe extern "C" fn(RawHandle, RawHandle) -> RawStatus = "LiteRtAddOpaqueOptions";
    create_cpu_options: unsafe extern "C" fn(*mut RawHandle) -> RawStatus = "LiteRtCreateCpuOptions";
    find_cpu_options: unsafe extern "C" fn(RawHandle, *mut RawHandle) -> RawStatus = "LiteRtFindCpuOptions";
    set_cpu_num_threads: unsafe extern "C" fn(RawHandle, c_int) -> RawStatus = "LiteRtSetCpuOptionsNumThread";
    create_gpu_options: unsafe extern "C" fn(*mut RawHandle) -> RawStatus = "LiteRtCreateGpuOptions";
    set_gpu_backend: unsafe extern "C" fn(RawHandle, c_int) -> RawStatus = "LiteRtSetGpuOptionsGpuBackend";
    set_gpu_precision: unsafe extern "C" fn(RawHandle, c_int) -> RawStatus = "LiteRtSetGpuAcceleratorCompilationOptionsPrecision";
    set_gpu_priority: unsafe extern "C" fn(RawHandle, c_int) -> RawStatus = "LiteRtSetGpuOptionsGpuPriority";
    set_gpu_external_tensors: unsafe extern "C" fn(RawHandle, bool) -> RawStatus = "LiteRtSetGpuOptionsExternalTensorsMode";
    set_gpu_serialization_dir: unsafe extern "C" fn(RawHandle, *const c_char) -> RawStatus = "LiteRtSetGpuAcceleratorCompilationOptionsSerializationDir";
    set_gpu_model_cache_key: unsafe extern "C" fn(RawHandle, *const c_char) -> RawStatus = "LiteRtSetGpuAcceleratorCompilationOptionsModelCacheKey";
    set_gpu_fully_delegated: unsafe extern "C" fn(RawHandle, bool) -> RawStatus = "LiteRtSetGpuOptionsHintFullyDelegatedToSingleDelegate";
    create_runtime_options: unsafe extern "C" fn(*mut RawHandle) -> RawStatus = "LiteRtCreateRuntimeOptions";
    find_runtime_options: unsafe extern "C" fn(RawHandle, *mut RawHandle) -> RawStatus = "LiteRtFindRuntimeOptions";
    set_runtime_profiling: unsafe extern "C" fn(RawHandle, bool) -> RawStatus = "LiteRtSetRuntimeOptionsEnableProfiling";
    set_runtime_error_reporter: unsafe extern "C" fn(RawHandle, c_int) -> RawStatus = "LiteRtSetRuntimeOptionsErrorReporterMode";

    // compiled model
    create_compiled_model: unsafe extern "C" fn(RawHandle, RawHandle, RawHandle, *mut RawHandle) -> RawStatus = "LiteRtCreateCompiledModel";
    destroy_compiled_model: unsafe extern "C" fn(RawHandle) = "LiteRtDestroyCompiledModel";
    input_requirements: unsafe extern "C" fn(RawHandle, usize, usize, *mut RawHandle) -> RawStatus = "LiteRtGetCompiledModelInputBufferRequirements";
    output_requirements: unsafe extern "C" fn(RawHandle, usize, usize, *mut RawHandle) -> RawStatus = "LiteRtGetCompiledModelOutputBufferRequirements";
    requirements_size: unsafe extern "C" fn(RawHandle, *mut usize) -> RawStatus = "LiteRtGetTensorBufferRequirementsBufferSize";
    requirements_num_types: unsafe extern "C" fn(RawHandle, *mut usize) -> RawStatus = "LiteRtGetTensorBufferRequirementsNumSupportedTensorBufferTypes";
    requirements_buffer_type: unsafe extern "C" fn(RawHandle, usize, *mut c_int) -> RawStatus = "LiteRtGetTensorBufferRequirementsSupportedTensorBufferType";
    requirements_alignment: unsafe extern "C" fn(RawHandle, *mut usize) -> RawStatus = "LiteRtGetTensorBufferRequirementsAlignment";
    run: unsafe extern "C" fn(RawHandle, usize, usize, *const RawHandle, usize, *const RawHandle) -> RawStatus = "LiteRtRunCompiledModel";
    run_async: unsafe extern "C" fn(RawHandle, usize, usize, *const RawHandle, usize, *const RawHandle, *mut bool) -> RawStatus = "LiteRtRunCompiledModelAsync";
    resize_input: unsafe extern "C" fn(RawHandle, usize, usize, *const i32, usize) -> RawStatus = "LiteRtCompiledModelResizeInputTensor";
    resize_input_non_strict: unsafe extern "C" fn(RawHandle, usize, usize, *const i32, usize) -> RawStatus = "LiteRtCompiledModelResizeInputTensorNonStrict";
    input_layout: unsafe extern "C" fn(RawHandle, usize, usize, *mut RawLayout) -> RawStatus = "LiteRtGetCompiledModelInputTensorLayout";
    output_layouts: unsafe extern "C" fn(RawHandle, usize, usize, *mut RawLayout, bool) -> RawStatus = "LiteRtGetCompiledModelOutputTensorLayouts";
    is_fully_accelerated: unsafe extern "C" fn(RawHandle, *mut bool) -> RawStatus = "LiteRtCompiledModelIsFullyAccelerated";
    set_cancellation: unsafe extern "C" fn(RawHandle, *mut c_void, Option<CancelFn>) -> RawStatus = "LiteRtSetCompiledModelCancellationFunction";
    profiler: unsafe extern "C" fn(RawHandle, *mut RawHandle) -> RawStatus = "LiteRtCompiledModelGetProfiler";
    start_profiler: unsafe extern "C" fn(RawHandle) -> RawStatus = "LiteRtStartProfiler";
    stop_profiler: unsafe extern "C" fn(RawHandle) -> RawStatus = "LiteRtStopProfiler";
    reset_profiler: unsafe extern "C" fn(RawHandle) -> RawStatus = "LiteRtResetProfiler";
    num_profiler_events: unsafe extern "C" fn(RawHandle, *mut usize) -> RawStatus = "LiteRtGetNumProfilerEvents";
    error_messages: unsafe extern "C" fn(RawHandle, *mut *const c_char) -> RawStatus = "LiteRtCompiledModelGetErrorMessages";
    clear_errors: unsafe extern "C" fn(RawHandle) -> RawStatus = "LiteRtCompiledModelClearErrors";

    // tensor buffers
    create_managed_buffer: unsafe extern "C" fn(RawHandle, c_int, *const RawRankedTensorType, usize, *mut RawHandle) -> RawStatus = "LiteRtCreateManagedTensorBuffer";
    create_buffer_from_host_memory: unsafe extern "C" fn(*const RawRankedTensorType, *mut c_void, usize, *const c_void, *mut RawHandle) -> RawStatus = "LiteRtCreateTensorBufferFromHostMemory";
    destroy_buffer: unsafe extern "C" fn(RawHandle) = "LiteRtDestroyTensorBuffer";
    lock_buffer: unsafe extern "C" fn(RawHandle, *mut *mut c_void, c_int) -> RawStatus = "LiteRtLockTensorBuffer";
    unlock_buffer: unsafe extern "C" fn(RawHandle) -> RawStatus = "LiteRtUnlockTensorBuffer";
    buffer_type: unsafe extern "C" fn(RawHandle, *mut c_int) -> RawStatus = "LiteRtGetTensorBufferType";
    buffer_tensor_type: unsafe extern "C" fn(RawHandle, *mut RawRankedTensorType) -> RawStatus = "LiteRtGetTensorBufferTensorType";
    buffer_size: unsafe extern "C" fn(RawHandle, *mut usize) -> RawStatus = "LiteRtGetTensorBufferSize";
    buffer_packed_size: unsafe extern "C" fn(RawHandle, *mut usize) -> RawStatus = "LiteRtGetTensorBufferPackedSize";
    buffer_offset: unsafe extern "C" fn(RawHandle, *mut usize) -> RawStatus = "LiteRtGetTensorBufferOffset";
    clear_buffer: unsafe extern "C" fn(RawHandle) -> RawStatus = "LiteRtClearTensorBuffer";
    buffer_has_event: unsafe extern "C" fn(RawHandle, *mut bool) -> RawStatus = "LiteRtHasTensorBufferEvent";
    buffer_event: unsafe extern "C" fn(RawHandle, *mut RawHandle) -> RawStatus = "LiteRtGetTensorBufferEvent";
    set_buffer_event: unsafe extern "C" fn(RawHandle, RawHandle) -> RawStatus = "LiteRtSetTensorBufferEvent";
    clear_buffer_event: unsafe extern "C" fn(RawHandle) -> RawStatus = "LiteRtClearTensorBufferEvent";

    // events
    create_event: unsafe extern "C" fn(RawHandle, c_int, *mut RawHandle) -> RawStatus = "LiteRtCreateManagedEvent";
    destroy_event: unsafe extern "C" fn(RawHandle) = "LiteRtDestroyEvent";
    signal_event: unsafe extern "C" fn(RawHandle) -> RawStatus = "LiteRtSignalEvent";
    is_event_signaled: unsafe extern "C" fn(RawHandle, *mut bool) -> RawStatus = "LiteRtIsEventSignaled";
    wait_event: unsafe extern "C" fn(RawHandle, i64) -> RawStatus = "LiteRtWaitEvent";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_sizes_match_engine_abi() {
        assert_eq!(std::mem::size_of::<RawLayout>(), 68);
        assert_eq!(std::mem::size_of::<RawRankedTensorType>(), 72);
        assert_eq!(std::mem::size_of::<RawQuantizationPerTensor>(), 16);
    }

    #[test]
    fn test_layout_packing() {
        let layout = Layout::new(vec![1, 224, 224, 3]).unwrap();
        let raw = RawLayout::from_layout(&layout);
        assert_eq!(raw.rank(), 4);
        assert!(!raw.has_strides());
        assert_eq!(&raw.dimensions[..4], &[1, 224, 224, 3]);
        assert_eq!(raw.dimensions[4], 0);
        assert_eq!(raw.to_layout().unwrap(), layout);
    }

    #[test]
    fn test_layout_with_strides() {
        let layout = Layout::new(vec![2, 3]).unwrap().with_strides(vec![3, 1]).unwrap();
        let raw = RawLayout::from_layout(&layout);
        assert_eq!(raw.rank_and_flags, 2 | RawLayout::HAS_STRIDES);
        assert_eq!(raw.to_layout().unwrap(), layout);
    }

    #[test]
    fn test_oversized_rank_is_rejected() {
        let mut raw = RawLayout::zeroed();
        raw.rank_and_flags = 9;
        assert!(matches!(
            raw.to_layout(),
            Err(TensorError::RankTooLarge { rank: 9, .. })
        ));
    }

    #[test]
    fn test_tensor_type_conversion() {
        let t = RankedTensorType::new(ElementType::Int4, Layout::new(vec![1, 7]).unwrap());
        let raw = RawRankedTensorType::from_type(&t);
        assert_eq!(raw.element_type, 18);
        assert_eq!(raw.to_type().unwrap(), t);
    }

    #[test]
    fn test_missing_library() {
        let err = NativeApi::load("/nonexistent/libLiteRt.so").err().unwrap();
        assert!(matches!(err, LoadError::Library { .. }));
    }
}
