//! Function-call interface of a device batch-normalization library.
//!
//! A backend exposes two API generations for each of the three batch-norm operations. The first
//! generation (`forward_inference`, `forward_training`, `backward`) describes scale, bias, mean
//! and variance with one shared descriptor; the second (`*_v2`) takes a descriptor per buffer so
//! parameters and statistics may use different element types.
//!
//! Buffers are opaque handles owned by the backend. Output buffers are written through shared
//! references, so implementations keep their storage behind interior mutability.

use std::fmt;

use thiserror::Error;

use crate::tensor::{DType, TensorDesc};

/// Statistics granularity of a batch-norm call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BnMode {
    /// One statistic per channel, reduced over N, H and W.
    Spatial,
    /// One statistic per `(c, h, w)` activation, reduced over N.
    PerActivation,
}

impl BnMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            BnMode::Spatial => "spatial",
            BnMode::PerActivation => "per_activation",
        }
    }

    /// Extent of the parameter and statistic tensors for an input of extent `dims`.
    pub const fn param_dims(self, dims: [usize; 4]) -> [usize; 4] {
        let [_, c, h, w] = dims;
        match self {
            BnMode::Spatial => [1, c, 1, 1],
            BnMode::PerActivation => [1, c, h, w],
        }
    }

    /// Parameter coordinate a given input element is normalised with.
    #[inline]
    pub const fn param_coords(self, c: usize, h: usize, w: usize) -> [usize; 4] {
        match self {
            BnMode::Spatial => [0, c, 0, 0],
            BnMode::PerActivation => [0, c, h, w],
        }
    }

    /// Number of input elements reduced into one statistic.
    pub const fn reduction_count(self, dims: [usize; 4]) -> usize {
        let [n, _, h, w] = dims;
        match self {
            BnMode::Spatial => n * h * w,
            BnMode::PerActivation => n,
        }
    }
}

impl fmt::Display for BnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-success status returned by a backend call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("bad parameter: {message}")]
    BadParm { message: String },
    #[error("{op} is not implemented: {reason}")]
    NotImplemented { op: &'static str, reason: String },
    #[error("backend execution failure: {message}")]
    Execution { message: String },
    #[error("buffer handle does not belong to backend {backend}")]
    HandleMismatch { backend: String },
}

impl BackendError {
    pub fn bad_parm(message: impl Into<String>) -> Self {
        BackendError::BadParm {
            message: message.into(),
        }
    }

    pub fn not_implemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::NotImplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }

    pub fn handle_mismatch(backend: impl Into<String>) -> Self {
        BackendError::HandleMismatch {
            backend: backend.into(),
        }
    }
}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Descriptors of the scale, bias, mean and variance buffers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamDescs<'a> {
    /// First API generation: one descriptor shared by every auxiliary buffer.
    Shared(&'a TensorDesc),
    /// Second API generation: one descriptor per auxiliary buffer.
    Split {
        scale: &'a TensorDesc,
        bias: &'a TensorDesc,
        mean: &'a TensorDesc,
        variance: &'a TensorDesc,
    },
}

impl<'a> ParamDescs<'a> {
    /// Effective descriptors `(scale, bias, mean, variance)` for an input of dtype `x_dtype`.
    ///
    /// A shared descriptor names the parameter dtype; statistics then use the accumulation dtype
    /// implied by the input.
    pub fn resolve(&self, x_dtype: DType) -> [TensorDesc; 4] {
        match *self {
            ParamDescs::Shared(desc) => {
                let stats = desc.with_dtype(x_dtype.stats_dtype());
                [*desc, *desc, stats, stats]
            }
            ParamDescs::Split {
                scale,
                bias,
                mean,
                variance,
            } => [*scale, *bias, *mean, *variance],
        }
    }

    /// Descriptor of the `dscale`/`dbias` gradients. A shared descriptor yields the accumulation
    /// dtype of the input; split descriptors reuse the bias descriptor.
    pub fn gradient_desc(&self, x_dtype: DType) -> TensorDesc {
        match *self {
            ParamDescs::Shared(desc) => desc.with_dtype(x_dtype.stats_dtype()),
            ParamDescs::Split { bias, .. } => *bias,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, ParamDescs::Shared(_))
    }
}

/// Running statistics updated in place by forward training.
#[derive(Debug)]
pub struct RunningStats<'a, H> {
    pub average_factor: f64,
    pub mean: &'a H,
    pub variance: &'a H,
}

/// Batch statistics saved by forward training for the backward pass.
#[derive(Debug)]
pub struct SavedStats<'a, H> {
    pub mean: &'a H,
    pub inv_variance: &'a H,
}

#[derive(Debug)]
pub struct ForwardInferenceArgs<'a, H> {
    pub mode: BnMode,
    pub alpha: f64,
    pub beta: f64,
    pub x_desc: &'a TensorDesc,
    pub x: &'a H,
    pub y_desc: &'a TensorDesc,
    pub y: &'a H,
    pub param_descs: ParamDescs<'a>,
    pub scale: &'a H,
    pub bias: &'a H,
    pub estimated_mean: &'a H,
    pub estimated_variance: &'a H,
    pub epsilon: f64,
}

#[derive(Debug)]
pub struct ForwardTrainingArgs<'a, H> {
    pub mode: BnMode,
    pub alpha: f64,
    pub beta: f64,
    pub x_desc: &'a TensorDesc,
    pub x: &'a H,
    pub y_desc: &'a TensorDesc,
    pub y: &'a H,
    pub param_descs: ParamDescs<'a>,
    pub scale: &'a H,
    pub bias: &'a H,
    pub running: Option<RunningStats<'a, H>>,
    pub saved: Option<SavedStats<'a, H>>,
    pub epsilon: f64,
}

/// Backward arguments. `param_descs` describe scale and, through the bias descriptor, the
/// `dscale`/`dbias` gradients; the mean and variance descriptors describe the saved statistics.
#[derive(Debug)]
pub struct BackwardArgs<'a, H> {
    pub mode: BnMode,
    pub alpha_data_diff: f64,
    pub beta_data_diff: f64,
    pub alpha_param_diff: f64,
    pub beta_param_diff: f64,
    pub x_desc: &'a TensorDesc,
    pub x: &'a H,
    pub dy_desc: &'a TensorDesc,
    pub dy: &'a H,
    pub dx_desc: &'a TensorDesc,
    pub dx: &'a H,
    pub param_descs: ParamDescs<'a>,
    pub scale: &'a H,
    pub dscale: &'a H,
    pub dbias: &'a H,
    pub epsilon: f64,
    pub saved: Option<SavedStats<'a, H>>,
}

/// Device batch-normalization library reached through synchronous calls.
///
/// First-generation entry points must reject [`ParamDescs::Split`] and second-generation entry
/// points must reject [`ParamDescs::Shared`] with [`BackendError::BadParm`].
pub trait BatchNormBackend: Send + Sync {
    type Buffer: Send + Sync + 'static;

    /// Returns a human-readable backend identifier (e.g., `"cpu"`).
    fn backend_name(&self) -> &str;

    fn device_name(&self) -> String;

    /// Device architecture string, optionally carrying feature suffixes (`gfx90a:xnack-`).
    fn device_arch(&self) -> String;

    /// Allocates a device buffer described by `desc` and copies `bytes` into it.
    fn upload(&self, desc: &TensorDesc, bytes: &[u8]) -> BackendResult<Self::Buffer>;

    /// Overwrites the contents of an existing buffer.
    fn write(&self, buffer: &Self::Buffer, bytes: &[u8]) -> BackendResult<()>;

    /// Copies a buffer back to the host.
    fn read(&self, buffer: &Self::Buffer) -> BackendResult<Vec<u8>>;

    fn forward_inference(&self, args: ForwardInferenceArgs<'_, Self::Buffer>)
        -> BackendResult<()>;

    fn forward_inference_v2(
        &self,
        args: ForwardInferenceArgs<'_, Self::Buffer>,
    ) -> BackendResult<()>;

    fn forward_training(&self, args: ForwardTrainingArgs<'_, Self::Buffer>) -> BackendResult<()>;

    fn forward_training_v2(
        &self,
        args: ForwardTrainingArgs<'_, Self::Buffer>,
    ) -> BackendResult<()>;

    fn backward(&self, args: BackwardArgs<'_, Self::Buffer>) -> BackendResult<()>;

    fn backward_v2(&self, args: BackwardArgs<'_, Self::Buffer>) -> BackendResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout4D;

    #[test]
    fn reduction_counts_follow_mode() {
        let dims = [4, 3, 5, 6];
        assert_eq!(BnMode::Spatial.reduction_count(dims), 120);
        assert_eq!(BnMode::PerActivation.reduction_count(dims), 4);
        assert_eq!(BnMode::Spatial.param_coords(2, 3, 4), [0, 2, 0, 0]);
        assert_eq!(BnMode::PerActivation.param_coords(2, 3, 4), [0, 2, 3, 4]);
    }

    #[test]
    fn shared_descriptor_promotes_statistics() {
        let desc = TensorDesc::new(DType::F16, [1, 8, 1, 1], Layout4D::NCHW);
        let [scale, bias, mean, var] = ParamDescs::Shared(&desc).resolve(DType::F16);
        assert_eq!(scale.dtype, DType::F16);
        assert_eq!(bias.dtype, DType::F16);
        assert_eq!(mean.dtype, DType::F32);
        assert_eq!(var.dtype, DType::F32);
        assert_eq!(mean.dims, desc.dims);
        assert_eq!(ParamDescs::Shared(&desc).gradient_desc(DType::F16).dtype, DType::F32);

        let half = desc.with_dtype(DType::BF16);
        let split = ParamDescs::Split {
            scale: &half,
            bias: &desc,
            mean: &desc,
            variance: &desc,
        };
        assert_eq!(split.gradient_desc(DType::BF16), desc);
        assert!(!split.is_shared());
    }

    #[test]
    fn errors_render_their_context() {
        let err = BackendError::not_implemented("backward_v2", "no kernel for bf16");
        assert_eq!(err.to_string(), "backward_v2 is not implemented: no kernel for bf16");
        assert!(BackendError::handle_mismatch("cpu#1")
            .to_string()
            .contains("cpu#1"));
    }
}
