//! `lrt-engine` - The inference engine's capability surface.
//!
//! This crate provides:
//! - An `Engine` trait with one method per engine primitive
//! - `NativeEngine`, which binds the engine shared library at runtime
//! - `HostEngine`, an in-process reference engine with lifecycle bookkeeping
//! - Typed handles, status codes and the enums shared by both engines

pub mod aligned;
pub mod engine;
pub mod error;
pub mod handle;
pub mod host;
pub mod native;
pub mod status;
pub mod types;

// Re-export primary types at the crate root for convenience.
pub use aligned::{is_aligned, AlignedBytes, BUFFER_ALIGNMENT};
pub use engine::{CancelFn, CancelHook, Engine};
pub use error::LoadError;
pub use handle::*;
pub use host::{CompileRecord, HostEngine, HostGraph, HostSignature, HostStats, HostTensor, TensorSpec};
pub use native::NativeEngine;
pub use status::{EngineResult, Status};
pub use types::*;
