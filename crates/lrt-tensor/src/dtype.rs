use std::fmt;

use crate::error::{Result, TensorError};

/// Element types understood by the engine, with their wire codes.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    None = 0,
    Float32 = 1,
    Int32 = 2,
    UInt8 = 3,
    Int64 = 4,
    TfString = 5,
    Bool = 6,
    Int16 = 7,
    Complex64 = 8,
    Int8 = 9,
    Float16 = 10,
    Float64 = 11,
    Complex128 = 12,
    UInt64 = 13,
    TfResource = 14,
    TfVariant = 15,
    UInt32 = 16,
    UInt16 = 17,
    Int4 = 18,
    BFloat16 = 19,
    Int2 = 20,
}

/// Bytes per element expressed as `numerator / denominator`, so that
/// sub-byte types (4-bit, 2-bit) stay in exact integer arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRatio {
    pub numerator: u64,
    pub denominator: u64,
}

impl ByteRatio {
    const fn new(numerator: u64, denominator: u64) -> Self {
        ByteRatio {
            numerator,
            denominator,
        }
    }
}

impl ElementType {
    pub const ALL: [ElementType; 21] = [
        ElementType::None,
        ElementType::Float32,
        ElementType::Int32,
        ElementType::UInt8,
        ElementType::Int64,
        ElementType::TfString,
        ElementType::Bool,
        ElementType::Int16,
        ElementType::Complex64,
        ElementType::Int8,
        ElementType::Float16,
        ElementType::Float64,
        ElementType::Complex128,
        ElementType::UInt64,
        ElementType::TfResource,
        ElementType::TfVariant,
        ElementType::UInt32,
        ElementType::UInt16,
        ElementType::Int4,
        ElementType::BFloat16,
        ElementType::Int2,
    ];

    /// Converts an engine element-type code to an `ElementType`.
    pub fn from_raw(code: i32) -> Option<ElementType> {
        ElementType::ALL.iter().copied().find(|t| t.as_raw() == code)
    }

    /// Same as [`from_raw`](Self::from_raw) but reports unknown codes as errors.
    pub fn try_from_raw(code: i32) -> Result<ElementType> {
        Self::from_raw(code).ok_or(TensorError::UnknownElementCode(code))
    }

    pub fn as_raw(&self) -> i32 {
        *self as i32
    }

    /// Storage ratio for types with a fixed packed width.
    ///
    /// - 2-bit: 1/4
    /// - 4-bit: 1/2
    /// - bool and 8-bit integers: 1/1
    /// - 16-bit integers and floats: 2/1
    /// - 32-bit integers, f32, complex64: 4/1
    /// - 64-bit integers, f64, complex128: 8/1
    ///
    /// Returns `None` for `None`, strings, resources and variants.
    pub fn byte_ratio(&self) -> Option<ByteRatio> {
        use ElementType::*;
        match self {
            Int2 => Some(ByteRatio::new(1, 4)),
            Int4 => Some(ByteRatio::new(1, 2)),
            Bool | Int8 | UInt8 => Some(ByteRatio::new(1, 1)),
            Int16 | UInt16 | Float16 | BFloat16 => Some(ByteRatio::new(2, 1)),
            Int32 | UInt32 | Float32 | Complex64 => Some(ByteRatio::new(4, 1)),
            Int64 | UInt64 | Float64 | Complex128 => Some(ByteRatio::new(8, 1)),
            None | TfString | TfResource | TfVariant => Option::None,
        }
    }

    /// Decode little-endian element bytes into `f32` values.
    ///
    /// Supports f32, f16 and bf16 storage; trailing bytes that do not form
    /// a whole element are rejected.
    pub fn decode_f32(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        let width = match self {
            ElementType::Float32 => 4,
            ElementType::Float16 | ElementType::BFloat16 => 2,
            other => return Err(TensorError::UnsupportedElementType(*other)),
        };
        if bytes.len() % width != 0 {
            return Err(TensorError::SizeMismatch {
                len: bytes.len(),
                element: *self,
            });
        }

        let values = bytes.chunks_exact(width).map(|c| match self {
            ElementType::Float32 => f32::from_le_bytes([c[0], c[1], c[2], c[3]]),
            ElementType::Float16 => half::f16::from_le_bytes([c[0], c[1]]).to_f32(),
            _ => half::bf16::from_le_bytes([c[0], c[1]]).to_f32(),
        });
        Ok(values.collect())
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::None => "none",
            ElementType::Float32 => "f32",
            ElementType::Int32 => "i32",
            ElementType::UInt8 => "u8",
            ElementType::Int64 => "i64",
            ElementType::TfString => "string",
            ElementType::Bool => "bool",
            ElementType::Int16 => "i16",
            ElementType::Complex64 => "complex64",
            ElementType::Int8 => "i8",
            ElementType::Float16 => "f16",
            ElementType::Float64 => "f64",
            ElementType::Complex128 => "complex128",
            ElementType::UInt64 => "u64",
            ElementType::TfResource => "resource",
            ElementType::TfVariant => "variant",
            ElementType::UInt32 => "u32",
            ElementType::UInt16 => "u16",
            ElementType::Int4 => "i4",
            ElementType::BFloat16 => "bf16",
            ElementType::Int2 => "i2",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_byte_ratios() {
        assert_eq!(ElementType::Int2.byte_ratio(), Some(ByteRatio::new(1, 4)));
        assert_eq!(ElementType::Int4.byte_ratio(), Some(ByteRatio::new(1, 2)));
        assert_eq!(ElementType::Bool.byte_ratio(), Some(ByteRatio::new(1, 1)));
        assert_eq!(ElementType::BFloat16.byte_ratio(), Some(ByteRatio::new(2, 1)));
        assert_eq!(ElementType::Complex64.byte_ratio(), Some(ByteRatio::new(4, 1)));
        assert_eq!(ElementType::Complex128.byte_ratio(), Some(ByteRatio::new(8, 1)));
    }

    #[test]
    fn test_unsized_types_have_no_ratio() {
        for t in [
            ElementType::None,
            ElementType::TfString,
            ElementType::TfResource,
            ElementType::TfVariant,
        ] {
            assert!(t.byte_ratio().is_none(), "{t} should have no ratio");
        }
    }

    #[test]
    fn test_raw_codes() {
        assert_eq!(ElementType::Float32.as_raw(), 1);
        assert_eq!(ElementType::Int4.as_raw(), 18);
        assert_eq!(ElementType::Int2.as_raw(), 20);
        for t in ElementType::ALL {
            assert_eq!(ElementType::from_raw(t.as_raw()), Some(t));
        }
        assert!(ElementType::from_raw(21).is_none());
        assert_eq!(
            ElementType::try_from_raw(-1),
            Err(TensorError::UnknownElementCode(-1))
        );
    }

    #[test]
    fn test_decode_f32() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1.5f32.to_le_bytes());
        bytes.extend_from_slice(&(-2.0f32).to_le_bytes());
        let values = ElementType::Float32.decode_f32(&bytes).unwrap();
        assert_eq!(values, vec![1.5, -2.0]);
    }

    #[test]
    fn test_decode_half_types() {
        let bytes = half::f16::from_f32(0.25).to_le_bytes();
        let values = ElementType::Float16.decode_f32(&bytes).unwrap();
        assert_relative_eq!(values[0], 0.25);

        let bytes = half::bf16::from_f32(3.0).to_le_bytes();
        let values = ElementType::BFloat16.decode_f32(&bytes).unwrap();
        assert_relative_eq!(values[0], 3.0);
    }

    #[test]
    fn test_decode_rejects_partial_and_non_float() {
        assert!(matches!(
            ElementType::Float32.decode_f32(&[0, 0, 0]),
            Err(TensorError::SizeMismatch { len: 3, .. })
        ));
        assert!(matches!(
            ElementType::Int32.decode_f32(&[0, 0, 0, 0]),
            Err(TensorError::UnsupportedElementType(ElementType::Int32))
        ));
    }
}
