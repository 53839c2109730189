//! `lrt-tensor` - Tensor metadata for the LiteRT binding.
//!
//! This crate provides:
//! - `ElementType` with the engine's element codes and byte ratios
//! - `Layout` and `RankedTensorType` descriptions of tensors
//! - Packed-size arithmetic, including 4-bit and 2-bit packing
//! - `DynamicSizeEstimator` for outputs with data-dependent shapes
//! - Quantization descriptors

pub mod dtype;
pub mod error;
pub mod estimate;
pub mod layout;
pub mod packed;
pub mod tensor_type;

pub use dtype::{ByteRatio, ElementType};
pub use error::{Result, TensorError};
pub use estimate::{DynamicSizeEstimator, TIME_AXIS};
pub use layout::{Layout, MAX_RANK};
pub use packed::{packed_size, packed_size_of};
pub use tensor_type::{Quantization, QuantizationTypeId, RankedTensorType, TensorTypeId};
