//! Capacity planning for outputs whose shape is only known after inference.
//!
//! Sequence models that predict their own output length (durations, frame
//! counts) report a provisional output layout before the run. A buffer
//! sized from that layout can be too small, so the allocation is inflated
//! along the time axis up to a caller-supplied frame bound.

use crate::dtype::ElementType;
use crate::error::{Result, TensorError};
use crate::layout::Layout;
use crate::packed::{bytes_for, packed_size};

/// Conventional position of the time/frame axis in `[batch, time, ...]` outputs.
pub const TIME_AXIS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicSizeEstimator {
    max_frames: u64,
}

impl DynamicSizeEstimator {
    /// Create an estimator bounded by `max_frames` along [`TIME_AXIS`].
    pub fn new(max_frames: u64) -> Self {
        DynamicSizeEstimator { max_frames }
    }

    /// Bound derived from an input sequence length and the largest number
    /// of output frames a single input step can expand into.
    pub fn for_sequence(input_len: usize, max_frames_per_step: u64) -> Self {
        Self::new((input_len as u64).saturating_mul(max_frames_per_step))
    }

    pub fn max_frames(&self) -> u64 {
        self.max_frames
    }

    /// Apply the estimation policy to a reported shape:
    /// the time axis grows to `max_frames` when smaller, then every
    /// non-positive dimension becomes 1.
    pub fn adjusted_dims(&self, dims: &[i32]) -> Vec<u64> {
        dims.iter()
            .enumerate()
            .map(|(axis, &d)| {
                let mut value = d.max(0) as u64;
                if axis == TIME_AXIS && (d < 0 || (d as u64) < self.max_frames) {
                    value = self.max_frames;
                }
                value.max(1)
            })
            .collect()
    }

    /// Packed byte size of the adjusted shape. A zero-rank shape estimates 0.
    pub fn estimate(&self, element_type: ElementType, dims: &[i32]) -> Result<usize> {
        let ratio = element_type
            .byte_ratio()
            .ok_or(TensorError::UnsupportedElementType(element_type))?;
        if dims.is_empty() {
            return Ok(0);
        }
        let adjusted = self.adjusted_dims(dims);
        let overflow = || TensorError::Overflow(adjusted.iter().map(|&d| d as i64).collect());
        let elements = adjusted
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d))
            .ok_or_else(overflow)?;
        bytes_for(elements, ratio.numerator, ratio.denominator).ok_or_else(overflow)
    }

    /// Bytes to allocate for an output with a provisional layout.
    ///
    /// The result is the largest of the engine-reported requirement, the
    /// packed size of the reported layout and [`estimate`](Self::estimate).
    /// A reported layout with unresolved dimensions contributes nothing on
    /// its own; the estimate covers it.
    pub fn capacity(
        &self,
        element_type: ElementType,
        reported: &Layout,
        reported_requirement: usize,
    ) -> Result<usize> {
        let reported_packed = match packed_size(element_type, reported) {
            Ok(n) => n,
            Err(TensorError::DynamicDimension { .. }) => 0,
            Err(e) => return Err(e),
        };
        let estimated = self.estimate(element_type, reported.dims())?;
        Ok(reported_requirement.max(reported_packed).max(estimated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn est(max_frames: u64, t: ElementType, dims: &[i32]) -> usize {
        DynamicSizeEstimator::new(max_frames).estimate(t, dims).unwrap()
    }

    #[test]
    fn test_short_time_axis_grows_to_bound() {
        assert_eq!(est(500, ElementType::Float32, &[1, 10, 80]), 160_000);
    }

    #[test]
    fn test_long_time_axis_is_kept() {
        assert_eq!(est(500, ElementType::Float32, &[1, 600, 80]), 192_000);
        assert_eq!(est(500, ElementType::Float32, &[1, 500, 80]), 160_000);
    }

    #[test]
    fn test_zero_time_axis_takes_bound() {
        assert_eq!(est(100, ElementType::Int32, &[1, 0, 80]), 32_000);
        assert_eq!(est(50, ElementType::Float32, &[1, -1, 80]), 16_000);
    }

    #[test]
    fn test_zero_batch_corrected_to_one() {
        assert_eq!(est(5, ElementType::Float32, &[0, 10, 80]), 3_200);
    }

    #[test]
    fn test_rank_one_has_no_time_axis() {
        assert_eq!(est(100, ElementType::Float32, &[10]), 40);
        assert_eq!(est(100, ElementType::Float32, &[]), 0);
    }

    #[test]
    fn test_wide_and_packed_types() {
        assert_eq!(est(500, ElementType::Float64, &[1, 10, 80]), 320_000);
        assert_eq!(est(10, ElementType::Int64, &[1, 20, 40]), 6_400);
        assert_eq!(est(3, ElementType::Int4, &[1, 1, 3]), 5);
    }

    #[test]
    fn test_unsupported_type() {
        let e = DynamicSizeEstimator::new(10);
        assert_eq!(
            e.estimate(ElementType::TfString, &[1, 2]),
            Err(TensorError::UnsupportedElementType(ElementType::TfString))
        );
    }

    #[test]
    fn test_capacity_takes_largest_source() {
        let e = DynamicSizeEstimator::new(500);
        let reported = Layout::new(vec![1, 10, 80]).unwrap();
        // estimate dominates
        assert_eq!(e.capacity(ElementType::Float32, &reported, 3_200).unwrap(), 160_000);
        // engine requirement dominates
        assert_eq!(e.capacity(ElementType::Float32, &reported, 1_000_000).unwrap(), 1_000_000);

        let e = DynamicSizeEstimator::new(1);
        let reported = Layout::new(vec![1, 10, 80]).unwrap();
        assert_eq!(e.capacity(ElementType::Float32, &reported, 0).unwrap(), 3_200);
    }

    #[test]
    fn test_capacity_with_unresolved_layout() {
        let e = DynamicSizeEstimator::new(20);
        let reported = Layout::new(vec![1, -1, 4]).unwrap();
        assert_eq!(e.capacity(ElementType::Float32, &reported, 16).unwrap(), 320);
    }

    #[test]
    fn test_for_sequence() {
        let e = DynamicSizeEstimator::for_sequence(12, 50);
        assert_eq!(e.max_frames(), 600);
    }

    #[test]
    fn test_huge_bound_overflows_instead_of_shrinking() {
        let e = DynamicSizeEstimator::new(1 << 63);
        assert_eq!(e.adjusted_dims(&[1, 10, 80]), vec![1, 1 << 63, 80]);
        assert!(matches!(
            e.estimate(ElementType::Float32, &[1, 10, 80]),
            Err(TensorError::Overflow(_))
        ));

        let e = DynamicSizeEstimator::for_sequence(usize::MAX, 2);
        assert_eq!(e.max_frames(), u64::MAX);
        let reported = Layout::new(vec![1, 10, 80]).unwrap();
        assert!(matches!(
            e.capacity(ElementType::Float32, &reported, 3_200),
            Err(TensorError::Overflow(_))
        ));
    }
}
