//! Packed byte sizes for tensors, including sub-byte element types.

use crate::dtype::ElementType;
use crate::error::{Result, TensorError};
use crate::layout::Layout;

/// Number of bytes needed to store a tensor of `element_type` with the
/// given layout, with no padding.
///
/// Computed as `ceil(elements * numerator / denominator)` in integer
/// arithmetic, so a `[1, 7]` tensor of 4-bit values needs 4 bytes.
/// A zero-rank layout needs 0 bytes.
pub fn packed_size(element_type: ElementType, layout: &Layout) -> Result<usize> {
    let ratio = element_type
        .byte_ratio()
        .ok_or(TensorError::UnsupportedElementType(element_type))?;
    let elements = layout.num_elements()?;
    bytes_for(elements, ratio.numerator, ratio.denominator)
        .ok_or_else(|| TensorError::Overflow(layout.dims_i64()))
}

/// [`packed_size`] over a raw dimension slice.
pub fn packed_size_of(element_type: ElementType, dims: &[i32]) -> Result<usize> {
    packed_size(element_type, &Layout::from_slice(dims)?)
}

pub(crate) fn bytes_for(elements: u64, numerator: u64, denominator: u64) -> Option<usize> {
    let scaled = elements.checked_mul(numerator)?;
    let bytes = scaled.checked_add(denominator - 1)? / denominator;
    usize::try_from(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn layout(dims: &[i32]) -> Layout {
        Layout::from_slice(dims).unwrap()
    }

    #[test]
    fn test_sub_byte_packing() {
        assert_eq!(packed_size(ElementType::Int4, &layout(&[1, 8])).unwrap(), 4);
        assert_eq!(packed_size(ElementType::Int2, &layout(&[1, 8])).unwrap(), 2);
    }

    #[test]
    fn test_sub_byte_rounds_up() {
        assert_eq!(packed_size(ElementType::Int4, &layout(&[1, 7])).unwrap(), 4);
        assert_eq!(packed_size(ElementType::Int2, &layout(&[1, 5])).unwrap(), 2);
        assert_eq!(packed_size(ElementType::Int4, &layout(&[1])).unwrap(), 1);
    }

    #[test]
    fn test_whole_byte_types() {
        let l = layout(&[1, 224, 224, 3]);
        assert_eq!(packed_size(ElementType::UInt8, &l).unwrap(), 150_528);
        assert_eq!(packed_size(ElementType::Float16, &l).unwrap(), 301_056);
        assert_eq!(packed_size(ElementType::Float32, &l).unwrap(), 602_112);
        assert_eq!(packed_size(ElementType::Int64, &l).unwrap(), 1_204_224);
    }

    #[test]
    fn test_zero_rank_is_zero_for_every_sized_type() {
        for t in ElementType::ALL {
            if t.byte_ratio().is_some() {
                assert_eq!(packed_size(t, &layout(&[])).unwrap(), 0, "{t}");
            }
        }
    }

    #[test]
    fn test_zero_extent_dimension() {
        assert_eq!(packed_size(ElementType::Float32, &layout(&[4, 0, 3])).unwrap(), 0);
    }

    #[test]
    fn test_unsupported_types() {
        for t in [ElementType::None, ElementType::TfString, ElementType::TfVariant] {
            for dims in [&[][..], &[1][..], &[2, 3][..]] {
                assert_eq!(
                    packed_size(t, &layout(dims)),
                    Err(TensorError::UnsupportedElementType(t))
                );
            }
        }
    }

    #[test]
    fn test_unresolved_dimension_is_rejected() {
        assert!(matches!(
            packed_size_of(ElementType::Float32, &[1, -1]),
            Err(TensorError::DynamicDimension { axis: 1, .. })
        ));
    }

    proptest! {
        #[test]
        fn packed_size_is_exact_ceiling(
            dims in prop::collection::vec(0i32..64, 1..5),
            code in 0i32..21,
        ) {
            let t = ElementType::from_raw(code).unwrap();
            let result = packed_size_of(t, &dims);
            match t.byte_ratio() {
                Some(r) => {
                    let n: u64 = dims.iter().map(|&d| d as u64).product();
                    let expected = (n * r.numerator).div_ceil(r.denominator) as usize;
                    prop_assert_eq!(result.unwrap(), expected);
                }
                None => prop_assert_eq!(result, Err(TensorError::UnsupportedElementType(t))),
            }
        }
    }
}
