//! Layout-aware 4D tensor descriptors.

use std::fmt;

use crate::backend::spec::BnMode;
use crate::layout::Layout4D;

use super::dtype::DType;

/// Describes the element type, logical `[n, c, h, w]` extent and memory layout of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    pub dtype: DType,
    pub dims: [usize; 4],
    pub layout: Layout4D,
}

impl TensorDesc {
    /// Builds a descriptor; every dimension must be non-zero.
    pub fn new(dtype: DType, dims: [usize; 4], layout: Layout4D) -> Self {
        assert!(
            dims.iter().all(|&d| d > 0),
            "tensor dimensions must be non-zero: {dims:?}"
        );
        TensorDesc {
            dtype,
            dims,
            layout,
        }
    }

    /// Descriptor for scale, bias, mean and variance buffers derived from the input descriptor.
    ///
    /// Spatial mode keeps one value per channel (`[1, c, 1, 1]`); per-activation mode keeps one
    /// per `(c, h, w)` (`[1, c, h, w]`). The layout is inherited from `x`.
    pub fn derive_bn(x: &TensorDesc, mode: BnMode, dtype: DType) -> Self {
        TensorDesc::new(dtype, mode.param_dims(x.dims), x.layout)
    }

    pub fn n(&self) -> usize {
        self.dims[0]
    }

    pub fn c(&self) -> usize {
        self.dims[1]
    }

    pub fn h(&self) -> usize {
        self.dims[2]
    }

    pub fn w(&self) -> usize {
        self.dims[3]
    }

    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.num_elements() * self.dtype.size_in_bytes()
    }

    pub fn strides(&self) -> [usize; 4] {
        self.layout.strides(self.dims)
    }

    /// Storage offset of logical coordinate `(n, c, h, w)`.
    #[inline]
    pub fn offset(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        debug_assert!(n < self.n() && c < self.c() && h < self.h() && w < self.w());
        let [sn, sc, sh, sw] = self.strides();
        n * sn + c * sc + h * sh + w * sw
    }

    pub fn with_dtype(self, dtype: DType) -> Self {
        TensorDesc { dtype, ..self }
    }

    /// Iterates logical coordinates in NCHW order, independent of the memory layout.
    pub fn coords(&self) -> impl Iterator<Item = [usize; 4]> {
        let [n, c, h, w] = self.dims;
        (0..n).flat_map(move |ni| {
            (0..c).flat_map(move |ci| {
                (0..h).flat_map(move |hi| (0..w).map(move |wi| [ni, ci, hi, wi]))
            })
        })
    }
}

impl fmt::Display for TensorDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [n, c, h, w] = self.dims;
        write!(f, "{}[{n}x{c}x{h}x{w}] {}", self.dtype, self.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_agree_with_layout_strides() {
        let nchw = TensorDesc::new(DType::F32, [2, 3, 4, 5], Layout4D::NCHW);
        let nhwc = TensorDesc::new(DType::F32, [2, 3, 4, 5], Layout4D::NHWC);
        assert_eq!(nchw.offset(1, 2, 3, 4), 60 + 40 + 15 + 4);
        assert_eq!(nhwc.offset(1, 2, 3, 4), 60 + 2 + 45 + 12);
        assert_eq!(nchw.size_in_bytes(), 480);
    }

    #[test]
    fn offsets_cover_storage_exactly_once() {
        for layout in Layout4D::ALL {
            let desc = TensorDesc::new(DType::F16, [3, 2, 2, 3], layout);
            let mut seen = vec![false; desc.num_elements()];
            for [n, c, h, w] in desc.coords() {
                let offset = desc.offset(n, c, h, w);
                assert!(!seen[offset], "offset {offset} visited twice for {layout}");
                seen[offset] = true;
            }
            assert!(seen.into_iter().all(|v| v));
        }
    }

    #[test]
    fn derived_descriptors_follow_mode() {
        let x = TensorDesc::new(DType::F16, [8, 4, 3, 3], Layout4D::NHWC);
        let spatial = TensorDesc::derive_bn(&x, BnMode::Spatial, DType::F32);
        assert_eq!(spatial.dims, [1, 4, 1, 1]);
        assert_eq!(spatial.dtype, DType::F32);
        assert_eq!(spatial.layout, Layout4D::NHWC);

        let per_act = TensorDesc::derive_bn(&x, BnMode::PerActivation, DType::F16);
        assert_eq!(per_act.dims, [1, 4, 3, 3]);
    }

    #[test]
    #[should_panic(expected = "non-zero")]
    fn zero_dimension_is_rejected() {
        let _ = TensorDesc::new(DType::F32, [0, 1, 1, 1], Layout4D::NCHW);
    }
}
