use std::fmt;

use crate::error::{Result, TensorError};

/// Maximum rank the engine's layout struct can carry.
pub const MAX_RANK: usize = 8;

/// A tensor layout: signed dimensions plus optional explicit strides.
///
/// Dimensions are signed because the engine reports unresolved dynamic
/// axes as `-1` until a resize or an inference pass pins them down.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Layout {
    dims: Vec<i32>,
    strides: Option<Vec<u32>>,
}

impl Layout {
    /// Create a layout from dimensions, rejecting ranks above [`MAX_RANK`].
    pub fn new(dims: Vec<i32>) -> Result<Self> {
        if dims.len() > MAX_RANK {
            return Err(TensorError::RankTooLarge {
                rank: dims.len(),
                max: MAX_RANK,
            });
        }
        Ok(Layout {
            dims,
            strides: None,
        })
    }

    /// Create a layout from a slice of dimensions.
    pub fn from_slice(dims: &[i32]) -> Result<Self> {
        Self::new(dims.to_vec())
    }

    /// Attach explicit strides; one stride per dimension is required.
    pub fn with_strides(mut self, strides: Vec<u32>) -> Result<Self> {
        if strides.len() != self.dims.len() {
            return Err(TensorError::StrideMismatch {
                expected: self.dims.len(),
                got: strides.len(),
            });
        }
        self.strides = Some(strides);
        Ok(self)
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[i32] {
        &self.dims
    }

    /// Returns the size of dimension `i`, or `None` past the rank.
    pub fn dim(&self, i: usize) -> Option<i32> {
        self.dims.get(i).copied()
    }

    pub fn strides(&self) -> Option<&[u32]> {
        self.strides.as_deref()
    }

    pub fn has_strides(&self) -> bool {
        self.strides.is_some()
    }

    /// Returns true if any dimension is still unresolved (negative).
    pub fn is_dynamic(&self) -> bool {
        self.dims.iter().any(|&d| d < 0)
    }

    /// Total element count.
    ///
    /// A zero-rank layout has no elements. Unresolved (negative)
    /// dimensions are an error.
    pub fn num_elements(&self) -> Result<u64> {
        if self.dims.is_empty() {
            return Ok(0);
        }
        let mut total: u64 = 1;
        for (axis, &d) in self.dims.iter().enumerate() {
            if d < 0 {
                return Err(TensorError::DynamicDimension { axis, value: d });
            }
            total = total
                .checked_mul(d as u64)
                .ok_or_else(|| TensorError::Overflow(self.dims_i64()))?;
        }
        Ok(total)
    }

    pub(crate) fn dims_i64(&self) -> Vec<i64> {
        self.dims.iter().map(|&d| d as i64).collect()
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if *d < 0 {
                write!(f, "?")?;
            } else {
                write!(f, "{}", d)?;
            }
        }
        write!(f, "]")
    }
}

impl TryFrom<Vec<i32>> for Layout {
    type Error = TensorError;

    fn try_from(dims: Vec<i32>) -> Result<Self> {
        Layout::new(dims)
    }
}

impl TryFrom<&[i32]> for Layout {
    type Error = TensorError;

    fn try_from(dims: &[i32]) -> Result<Self> {
        Layout::from_slice(dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_layout() {
        let l = Layout::new(vec![2, 3, 4]).unwrap();
        assert_eq!(l.rank(), 3);
        assert_eq!(l.num_elements().unwrap(), 24);
        assert_eq!(l.dim(1), Some(3));
        assert_eq!(l.dim(3), None);
        assert!(!l.has_strides());
    }

    #[test]
    fn test_rank_limit() {
        assert!(Layout::new(vec![1; MAX_RANK]).is_ok());
        assert_eq!(
            Layout::new(vec![1; MAX_RANK + 1]),
            Err(TensorError::RankTooLarge { rank: 9, max: 8 })
        );
    }

    #[test]
    fn test_scalar_layout_has_no_elements() {
        let l = Layout::new(vec![]).unwrap();
        assert_eq!(l.rank(), 0);
        assert_eq!(l.num_elements().unwrap(), 0);
    }

    #[test]
    fn test_dynamic_dimension() {
        let l = Layout::new(vec![1, -1, 80]).unwrap();
        assert!(l.is_dynamic());
        assert_eq!(
            l.num_elements(),
            Err(TensorError::DynamicDimension { axis: 1, value: -1 })
        );
        assert_eq!(l.to_string(), "[1, ?, 80]");
    }

    #[test]
    fn test_with_strides() {
        let l = Layout::new(vec![2, 3]).unwrap().with_strides(vec![3, 1]).unwrap();
        assert_eq!(l.strides(), Some(&[3u32, 1][..]));
        assert!(Layout::new(vec![2, 3]).unwrap().with_strides(vec![1]).is_err());
    }
}
