use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Storage kinds a tensor buffer can be backed by.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    Unknown = 0,
    HostMemory = 1,
    Ahwb = 2,
    Ion = 3,
    DmaBuf = 4,
    FastRpc = 5,
    GlBuffer = 6,
    GlTexture = 7,
    OpenClBuffer = 10,
    OpenClBufferFp16 = 11,
    OpenClTexture = 12,
    OpenClTextureFp16 = 13,
    OpenClBufferPacked = 14,
    OpenClImageBuffer = 15,
    OpenClImageBufferFp16 = 16,
    WebGpuBuffer = 20,
    WebGpuBufferFp16 = 21,
    WebGpuTexture = 22,
    WebGpuTextureFp16 = 23,
    WebGpuImageBuffer = 24,
    WebGpuImageBufferFp16 = 25,
    WebGpuBufferPacked = 26,
    MetalBuffer = 30,
    MetalBufferFp16 = 31,
    MetalTexture = 32,
    MetalTextureFp16 = 33,
    MetalBufferPacked = 34,
    VulkanBuffer = 40,
    VulkanBufferFp16 = 41,
    VulkanTexture = 42,
    VulkanTextureFp16 = 43,
    VulkanImageBuffer = 44,
    VulkanImageBufferFp16 = 45,
    VulkanBufferPacked = 46,
}

impl BufferType {
    /// Codes reserved for user-defined buffer types.
    pub const CUSTOM_RANGE: std::ops::RangeInclusive<i32> = 100..=199;

    /// Convert a raw code. Unlisted codes, including the custom range,
    /// map to `Unknown`.
    pub fn from_raw(code: i32) -> BufferType {
        use BufferType::*;
        match code {
            1 => HostMemory,
            2 => Ahwb,
            3 => Ion,
            4 => DmaBuf,
            5 => FastRpc,
            6 => GlBuffer,
            7 => GlTexture,
            10 => OpenClBuffer,
            11 => OpenClBufferFp16,
            12 => OpenClTexture,
            13 => OpenClTextureFp16,
            14 => OpenClBufferPacked,
            15 => OpenClImageBuffer,
            16 => OpenClImageBufferFp16,
            20 => WebGpuBuffer,
            21 => WebGpuBufferFp16,
            22 => WebGpuTexture,
            23 => WebGpuTextureFp16,
            24 => WebGpuImageBuffer,
            25 => WebGpuImageBufferFp16,
            26 => WebGpuBufferPacked,
            30 => MetalBuffer,
            31 => MetalBufferFp16,
            32 => MetalTexture,
            33 => MetalTextureFp16,
            34 => MetalBufferPacked,
            40 => VulkanBuffer,
            41 => VulkanBufferFp16,
            42 => VulkanTexture,
            43 => VulkanTextureFp16,
            44 => VulkanImageBuffer,
            45 => VulkanImageBufferFp16,
            46 => VulkanBufferPacked,
            _ => Unknown,
        }
    }

    pub fn as_raw(&self) -> i32 {
        *self as i32
    }

    /// Whether the memory is directly addressable from the host.
    pub fn is_host_visible(&self) -> bool {
        matches!(
            self,
            BufferType::HostMemory | BufferType::Ahwb | BufferType::Ion | BufferType::DmaBuf
        )
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Read = 0,
    Write = 1,
    ReadWrite = 2,
}

impl LockMode {
    pub fn can_write(&self) -> bool {
        !matches!(self, LockMode::Read)
    }
}

/// Hardware accelerator selection bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HwAccelerators(i32);

impl HwAccelerators {
    pub const NONE: HwAccelerators = HwAccelerators(0);
    pub const CPU: HwAccelerators = HwAccelerators(1);
    pub const GPU: HwAccelerators = HwAccelerators(1 << 1);
    pub const NPU: HwAccelerators = HwAccelerators(1 << 2);

    pub fn from_bits(bits: i32) -> Self {
        HwAccelerators(bits & 0b111)
    }

    pub fn bits(&self) -> i32 {
        self.0
    }

    pub fn contains(&self, other: HwAccelerators) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for HwAccelerators {
    type Output = HwAccelerators;

    fn bitor(self, rhs: Self) -> Self {
        HwAccelerators(self.0 | rhs.0)
    }
}

impl BitOrAssign for HwAccelerators {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for HwAccelerators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = [
            (HwAccelerators::CPU, "cpu"),
            (HwAccelerators::GPU, "gpu"),
            (HwAccelerators::NPU, "npu"),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
        f.write_str(&names.join("|"))
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuBackend {
    #[default]
    Automatic = 0,
    OpenCl = 1,
    WebGpu = 2,
    OpenGl = 3,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuPriority {
    #[default]
    Default = 0,
    Low = 1,
    Normal = 2,
    High = 3,
}

/// Delegate compute precision.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Default = 0,
    Fp16 = 1,
    Fp32 = 2,
}

/// Where the engine reports compiled-model diagnostics.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorReporterMode {
    None = 0,
    Stderr = 1,
    #[default]
    Buffer = 2,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventType {
    #[default]
    Unknown = 0,
    SyncFenceFd = 1,
    OpenCl = 2,
    EglSyncFence = 3,
    EglNativeSyncFence = 4,
}

/// How strictly a new input shape is checked against the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeMode {
    /// Only dimensions the model declares dynamic may change.
    #[default]
    Strict,
    NonStrict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpaqueKind {
    Cpu,
    Gpu,
    Runtime,
}

impl fmt::Display for OpaqueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpaqueKind::Cpu => "cpu",
            OpaqueKind::Gpu => "gpu",
            OpaqueKind::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CpuSetting {
    /// Worker thread count. -1 leaves the engine default.
    NumThreads(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuSetting {
    Backend(GpuBackend),
    Precision(Precision),
    Priority(GpuPriority),
    ExternalTensors(bool),
    SerializationDir(String),
    ModelCacheKey(String),
    FullyDelegated(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeSetting {
    Profiling(bool),
    ErrorReporter(ErrorReporterMode),
}

/// A single value written into an opaque option block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpaqueSetting {
    Cpu(CpuSetting),
    Gpu(GpuSetting),
    Runtime(RuntimeSetting),
}

impl OpaqueSetting {
    /// The option block kind this setting applies to.
    pub fn kind(&self) -> OpaqueKind {
        match self {
            OpaqueSetting::Cpu(_) => OpaqueKind::Cpu,
            OpaqueSetting::Gpu(_) => OpaqueKind::Gpu,
            OpaqueSetting::Runtime(_) => OpaqueKind::Runtime,
        }
    }
}

/// Identifies one input or output tensor of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorSlot {
    Input(usize),
    Output(usize),
}

impl TensorSlot {
    pub fn index(&self) -> usize {
        match self {
            TensorSlot::Input(i) | TensorSlot::Output(i) => *i,
        }
    }
}

impl fmt::Display for TensorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorSlot::Input(i) => write!(f, "input {i}"),
            TensorSlot::Output(i) => write!(f, "output {i}"),
        }
    }
}

/// Kinds of engine resources with a create/destroy lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Environment,
    Model,
    Options,
    Opaque,
    CompiledModel,
    TensorBuffer,
    Event,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Environment,
        ResourceKind::Model,
        ResourceKind::Options,
        ResourceKind::Opaque,
        ResourceKind::CompiledModel,
        ResourceKind::TensorBuffer,
        ResourceKind::Event,
    ];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Environment => "environment",
            ResourceKind::Model => "model",
            ResourceKind::Options => "options",
            ResourceKind::Opaque => "opaque options",
            ResourceKind::CompiledModel => "compiled model",
            ResourceKind::TensorBuffer => "tensor buffer",
            ResourceKind::Event => "event",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accelerator_mask() {
        let mask = HwAccelerators::CPU | HwAccelerators::GPU;
        assert_eq!(mask.bits(), 3);
        assert!(mask.contains(HwAccelerators::GPU));
        assert!(!mask.contains(HwAccelerators::NPU));
        assert_eq!(mask.to_string(), "cpu|gpu");
        assert_eq!(HwAccelerators::NONE.to_string(), "none");
        assert_eq!(HwAccelerators::from_bits(0xff).bits(), 7);
    }

    #[test]
    fn test_buffer_type_codes() {
        assert_eq!(BufferType::from_raw(1), BufferType::HostMemory);
        assert_eq!(BufferType::from_raw(34), BufferType::MetalBufferPacked);
        assert_eq!(BufferType::from_raw(46), BufferType::VulkanBufferPacked);
        assert_eq!(BufferType::from_raw(150), BufferType::Unknown);
        assert!(BufferType::CUSTOM_RANGE.contains(&150));
        assert_eq!(BufferType::OpenClImageBufferFp16.as_raw(), 16);
    }

    #[test]
    fn test_option_enum_codes() {
        assert_eq!(GpuBackend::WebGpu as i32, 2);
        assert_eq!(GpuPriority::High as i32, 3);
        assert_eq!(Precision::Fp32 as i32, 2);
        assert_eq!(ErrorReporterMode::Stderr as i32, 1);
        assert_eq!(LockMode::ReadWrite as i32, 2);
        assert!(!LockMode::Read.can_write());
    }

    #[test]
    fn test_setting_kind() {
        assert_eq!(
            OpaqueSetting::Cpu(CpuSetting::NumThreads(4)).kind(),
            OpaqueKind::Cpu
        );
        assert_eq!(
            OpaqueSetting::Runtime(RuntimeSetting::Profiling(true)).kind(),
            OpaqueKind::Runtime
        );
    }
}
