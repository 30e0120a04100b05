//! Memory layout synthesis from index bounds.
//!
//! Given the `[lb, ub)` a buffer must cover, the layout fixes unit stride
//! on dimension 0 and folds the lower bound into a constant base offset,
//! so halo regions with negative bounds address exactly like interior
//! points with zero run-time branching.

use crate::ir::{Index, INDEX_SIZE};

/// Concrete strided layout: `addr(idx) = offset + sum(strides[d] * idx[d])`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferLayout {
    pub shape: Index,
    pub strides: Index,
    pub offset: i64,
}

impl BufferLayout {
    /// The layout covering `[lb, ub)`:
    /// `shape[d] = ub[d] - lb[d]`, `strides[0] = 1`,
    /// `strides[d] = strides[d-1] * shape[d-1]`,
    /// `offset = -sum(strides[d] * lb[d])`.
    pub fn from_bounds(lb: Index, ub: Index) -> Self {
        debug_assert!(lb.iter().zip(ub.iter()).all(|(l, u)| l <= u));
        let mut shape = [0i64; INDEX_SIZE];
        for d in 0..INDEX_SIZE {
            shape[d] = ub[d] - lb[d];
        }
        let mut strides = [1i64; INDEX_SIZE];
        for d in 1..INDEX_SIZE {
            strides[d] = strides[d - 1] * shape[d - 1];
        }
        let mut offset = 0i64;
        for d in 0..INDEX_SIZE {
            offset += strides[d] * -lb[d];
        }
        Self {
            shape,
            strides,
            offset,
        }
    }

    /// The physical address of a logical index tuple.
    pub fn address(&self, idx: Index) -> i64 {
        let mut addr = self.offset;
        for d in 0..INDEX_SIZE {
            addr += self.strides[d] * idx[d];
        }
        addr
    }

    /// The number of addressable elements.
    pub fn element_count(&self) -> i64 {
        self.shape.iter().product()
    }
}
