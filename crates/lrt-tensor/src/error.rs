use thiserror::Error;

use crate::dtype::ElementType;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
    #[error("unsupported element type: {0}")]
    UnsupportedElementType(ElementType),
    #[error("unknown element type code: {0}")]
    UnknownElementCode(i32),
    #[error("rank {rank} exceeds the maximum of {max}")]
    RankTooLarge { rank: usize, max: usize },
    #[error("dimension {axis} is unresolved ({value})")]
    DynamicDimension { axis: usize, value: i32 },
    #[error("expected {expected} strides, got {got}")]
    StrideMismatch { expected: usize, got: usize },
    #[error("byte size overflows for shape {0:?}")]
    Overflow(Vec<i64>),
    #[error("{len} bytes is not a whole number of {element} elements")]
    SizeMismatch { len: usize, element: ElementType },
}

pub type Result<T> = std::result::Result<T, TensorError>;
