//! Tensor layout helpers.
//!
//! Batch-norm tensors are always 4D. Logical coordinates are `(n, c, h, w)` regardless of the
//! memory order; the layout only decides the strides used to reach storage.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout4D {
    NCHW,
    NHWC,
}

impl Layout4D {
    pub const ALL: [Layout4D; 2] = [Layout4D::NCHW, Layout4D::NHWC];

    pub const fn as_str(self) -> &'static str {
        match self {
            Layout4D::NCHW => "NCHW",
            Layout4D::NHWC => "NHWC",
        }
    }

    /// Element strides indexed by logical axis `[n, c, h, w]`.
    pub const fn strides(self, dims: [usize; 4]) -> [usize; 4] {
        let [_, c, h, w] = dims;
        match self {
            Layout4D::NCHW => [c * h * w, h * w, w, 1],
            Layout4D::NHWC => [h * w * c, 1, w * c, c],
        }
    }
}

impl fmt::Display for Layout4D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_follow_memory_order() {
        let dims = [2, 3, 4, 5];
        assert_eq!(Layout4D::NCHW.strides(dims), [60, 20, 5, 1]);
        assert_eq!(Layout4D::NHWC.strides(dims), [60, 1, 15, 3]);
    }
}
