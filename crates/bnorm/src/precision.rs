//! Precision bundles naming the element type of every batch-norm tensor role.
//!
//! Half-precision bundles keep activations and affine parameters in 16 bits while statistics,
//! accumulators and gradients stay in `f32`. The full-precision bundles are homogeneous.

use half::{bf16, f16};

use crate::tensor::Element;

pub trait Precision: Send + Sync + 'static {
    /// Short label used in test and report names.
    const NAME: &'static str;

    type X: Element;
    type Y: Element;
    type Scale: Element;
    type Bias: Element;
    /// Estimated, running and saved statistics.
    type MeanVar: Element;
    type Acc: Element;
    type Dx: Element;
    type Dy: Element;
    type DScaleDBias: Element;
}

pub struct Fp16;
pub struct Bf16;
pub struct Fp32;
pub struct Fp64;

impl Precision for Fp16 {
    const NAME: &'static str = "fp16";
    type X = f16;
    type Y = f16;
    type Scale = f16;
    type Bias = f16;
    type MeanVar = f32;
    type Acc = f32;
    type Dx = f32;
    type Dy = f32;
    type DScaleDBias = f32;
}

impl Precision for Bf16 {
    const NAME: &'static str = "bfp16";
    type X = bf16;
    type Y = bf16;
    type Scale = bf16;
    type Bias = bf16;
    type MeanVar = f32;
    type Acc = f32;
    type Dx = f32;
    type Dy = f32;
    type DScaleDBias = f32;
}

impl Precision for Fp32 {
    const NAME: &'static str = "fp32";
    type X = f32;
    type Y = f32;
    type Scale = f32;
    type Bias = f32;
    type MeanVar = f32;
    type Acc = f32;
    type Dx = f32;
    type Dy = f32;
    type DScaleDBias = f32;
}

impl Precision for Fp64 {
    const NAME: &'static str = "fp64";
    type X = f64;
    type Y = f64;
    type Scale = f64;
    type Bias = f64;
    type MeanVar = f64;
    type Acc = f64;
    type Dx = f64;
    type Dy = f64;
    type DScaleDBias = f64;
}
