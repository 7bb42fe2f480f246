//! Typed buffer and strided-array memory model.

mod buffer;
mod dtype;
mod ndarray;
mod shape;

pub use buffer::{AllocationKind, DataBuffer};
pub use dtype::{DType, Element};
pub use ndarray::NdArray;
pub use shape::{Order, Shape};

use thiserror::Error;

/// Errors raised at array/buffer boundaries: shape and dtype mismatches,
/// out-of-range element access and invalid views.
#[derive(Debug, Error)]
pub enum NdArrayError {
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("index {index:?} out of bounds for shape {shape:?}")]
    IndexOutOfBounds { index: Vec<usize>, shape: Vec<usize> },
    #[error("data length {actual} does not match shape element count {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("dtype mismatch: expected {expected:?}, got {actual:?}")]
    DTypeMismatch { expected: DType, actual: DType },
    #[error("view [{offset}, {offset}+{len}) exceeds buffer length {buffer_len}")]
    ViewOutOfBounds {
        offset: usize,
        len: usize,
        buffer_len: usize,
    },
    #[error("reshape from {from:?} ({from_len} elements) to {to:?} ({to_len} elements)")]
    ReshapeCount {
        from: Vec<usize>,
        from_len: usize,
        to: Vec<usize>,
        to_len: usize,
    },
    #[error("invalid axis permutation {perm:?} for rank {rank}")]
    InvalidPermutation { perm: Vec<usize>, rank: usize },
}
