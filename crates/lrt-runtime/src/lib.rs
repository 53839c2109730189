//! `lrt-runtime` - Safe resource wrappers over the inference engine.
//!
//! This crate provides:
//! - `Environment`, `Model`, `OptionSet` and the CPU/GPU/runtime option blocks
//! - `CompiledModel` with synchronous, asynchronous and cancellable runs
//! - `TensorBuffer` allocation, locking, duplication and event attachment
//! - `Event` completion signals
//! - `CompileConfig`, compilation options loaded from TOML
//!
//! Every wrapper releases its engine resource exactly once: explicitly via
//! an idempotent `destroy`, or on drop.

pub mod buffer;
pub mod compiled;
pub mod config;
pub mod environment;
pub mod error;
pub mod event;
pub mod model;
pub mod opaque;
pub mod options;

// Re-export primary types at the crate root for convenience.
pub use buffer::{BufferLock, TensorBuffer};
pub use compiled::{BufferRequirements, CompiledModel, Profiler, RunOutcome};
pub use config::{Accelerator, CompileConfig, CpuConfig, GpuConfig, RuntimeConfig};
pub use environment::{Environment, ResourceId};
pub use error::{Error, Result};
pub use event::{Event, EventRef, Timeout};
pub use model::{Model, TensorInfo};
pub use opaque::{CpuOptions, GpuOptions, OpaqueOption, Ownership, RuntimeOptions, Teardown};
pub use options::OptionSet;

pub use lrt_engine::{
    BufferType, ErrorReporterMode, EventType, GpuBackend, GpuPriority, HwAccelerators, LockMode,
    Precision, ResizeMode, Status, TensorSlot,
};
pub use lrt_tensor::{DynamicSizeEstimator, ElementType, Layout, RankedTensorType, TensorError};
