use std::fmt;

use crate::dtype::ElementType;
use crate::error::Result;
use crate::layout::Layout;
use crate::packed::packed_size;

/// Element type plus layout, the unit the engine uses to describe a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RankedTensorType {
    pub element_type: ElementType,
    pub layout: Layout,
}

impl RankedTensorType {
    pub fn new(element_type: ElementType, layout: Layout) -> Self {
        RankedTensorType {
            element_type,
            layout,
        }
    }

    /// Packed byte size of this tensor type.
    pub fn packed_size(&self) -> Result<usize> {
        packed_size(self.element_type, &self.layout)
    }
}

impl fmt::Display for RankedTensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.element_type, self.layout)
    }
}

/// Whether a tensor carries a rank.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorTypeId {
    Ranked = 0,
    Unranked = 1,
}

impl TensorTypeId {
    pub fn from_raw(code: i32) -> Option<Self> {
        match code {
            0 => Some(TensorTypeId::Ranked),
            1 => Some(TensorTypeId::Unranked),
            _ => None,
        }
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizationTypeId {
    None = 0,
    PerTensor = 1,
    PerChannel = 2,
    BlockWise = 3,
}

impl QuantizationTypeId {
    pub fn from_raw(code: i32) -> Option<Self> {
        match code {
            0 => Some(QuantizationTypeId::None),
            1 => Some(QuantizationTypeId::PerTensor),
            2 => Some(QuantizationTypeId::PerChannel),
            3 => Some(QuantizationTypeId::BlockWise),
            _ => None,
        }
    }
}

/// Quantization parameters attached to a model tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum Quantization {
    None,
    PerTensor {
        scale: f32,
        zero_point: i64,
    },
    PerChannel {
        scales: Vec<f32>,
        zero_points: Vec<i64>,
        quantized_dimension: i32,
    },
    /// Block-wise parameters are not exposed through the engine surface.
    BlockWise,
}

impl Quantization {
    pub fn type_id(&self) -> QuantizationTypeId {
        match self {
            Quantization::None => QuantizationTypeId::None,
            Quantization::PerTensor { .. } => QuantizationTypeId::PerTensor,
            Quantization::PerChannel { .. } => QuantizationTypeId::PerChannel,
            Quantization::BlockWise => QuantizationTypeId::BlockWise,
        }
    }

    /// Map a quantized value back to a real number using per-tensor parameters.
    ///
    /// Returns `None` for any other quantization kind.
    pub fn dequantize(&self, q: i64) -> Option<f32> {
        match self {
            Quantization::PerTensor { scale, zero_point } => {
                Some((q - zero_point) as f32 * scale)
            }
            _ => None,
        }
    }
}
