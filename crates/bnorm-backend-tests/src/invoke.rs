//! Dispatch of batch-norm calls to the selected API generation.

use bnorm::backend::spec::{
    BackendResult, BackwardArgs, ForwardInferenceArgs, ForwardTrainingArgs, ParamDescs,
};
use bnorm::{BatchNormBackend, DType, Element, Precision, Tensor, TensorDesc, TensorRead};

use crate::params::{ApiVersion, BnOp};

/// Auxiliary descriptors of one instance, from which either API generation's view is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamDescSet {
    pub scale: TensorDesc,
    pub bias: TensorDesc,
    pub mean: TensorDesc,
    pub variance: TensorDesc,
}

impl ParamDescSet {
    /// First generation passes the scale descriptor for every auxiliary buffer.
    pub fn for_api(&self, api: ApiVersion) -> ParamDescs<'_> {
        match api {
            ApiVersion::V1 => ParamDescs::Shared(&self.scale),
            ApiVersion::V2 => ParamDescs::Split {
                scale: &self.scale,
                bias: &self.bias,
                mean: &self.mean,
                variance: &self.variance,
            },
        }
    }
}

/// The first API generation can only express precision bundles whose auxiliary dtypes are the
/// ones implied by the shared descriptor.
pub fn check_v1_dtypes<P: Precision>(op: BnOp) -> Result<(), String> {
    let stats = <P::X as Element>::DTYPE.stats_dtype();
    let mut required: Vec<(&str, DType, DType)> = Vec::new();
    match op {
        BnOp::ForwardInference => {
            required.push(("bias", <P::Bias as Element>::DTYPE, <P::Scale as Element>::DTYPE));
            required.push(("mean/variance", <P::MeanVar as Element>::DTYPE, stats));
        }
        BnOp::ForwardTraining => {
            required.push(("bias", <P::Bias as Element>::DTYPE, <P::Scale as Element>::DTYPE));
            required.push(("saved/running statistics", <P::Acc as Element>::DTYPE, stats));
        }
        BnOp::Backward => {
            required.push(("saved statistics", <P::MeanVar as Element>::DTYPE, stats));
            required.push(("dscale/dbias", <P::DScaleDBias as Element>::DTYPE, stats));
        }
    }
    for (role, actual, expected) in required {
        if actual != expected {
            return Err(format!(
                "{} {op} via {}: {role} dtype {actual} cannot be described by a shared \
                 descriptor (implies {expected})",
                P::NAME,
                ApiVersion::V1
            ));
        }
    }
    Ok(())
}

pub fn forward_inference<B: BatchNormBackend + ?Sized>(
    backend: &B,
    api: ApiVersion,
    args: ForwardInferenceArgs<'_, B::Buffer>,
) -> BackendResult<()> {
    match api {
        ApiVersion::V1 => backend.forward_inference(args),
        ApiVersion::V2 => backend.forward_inference_v2(args),
    }
}

pub fn forward_training<B: BatchNormBackend + ?Sized>(
    backend: &B,
    api: ApiVersion,
    args: ForwardTrainingArgs<'_, B::Buffer>,
) -> BackendResult<()> {
    match api {
        ApiVersion::V1 => backend.forward_training(args),
        ApiVersion::V2 => backend.forward_training_v2(args),
    }
}

pub fn backward<B: BatchNormBackend + ?Sized>(
    backend: &B,
    api: ApiVersion,
    args: BackwardArgs<'_, B::Buffer>,
) -> BackendResult<()> {
    match api {
        ApiVersion::V1 => backend.backward(args),
        ApiVersion::V2 => backend.backward_v2(args),
    }
}

pub fn upload<B: BatchNormBackend + ?Sized, T: Element>(
    backend: &B,
    tensor: &Tensor<T>,
) -> BackendResult<B::Buffer> {
    backend.upload(tensor.desc(), &tensor.to_bytes())
}

/// Reads `buffer` back into a host tensor shaped like `like`.
pub fn read_back<B: BatchNormBackend + ?Sized, T: Element>(
    backend: &B,
    buffer: &B::Buffer,
    like: &Tensor<T>,
) -> anyhow::Result<Tensor<T>> {
    let bytes = backend.read(buffer)?;
    Tensor::from_bytes(like.name(), *like.desc(), &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bnorm::{Bf16, Fp16, Fp32, Fp64, Layout4D};

    #[test]
    fn standard_bundles_fit_the_shared_descriptor() {
        for op in BnOp::ALL {
            check_v1_dtypes::<Fp16>(op).unwrap();
            check_v1_dtypes::<Bf16>(op).unwrap();
            check_v1_dtypes::<Fp32>(op).unwrap();
            check_v1_dtypes::<Fp64>(op).unwrap();
        }
    }

    #[test]
    fn api_view_selects_descriptor_form() {
        let scale = TensorDesc::new(DType::F16, [1, 4, 1, 1], Layout4D::NCHW);
        let stats = scale.with_dtype(DType::F32);
        let set = ParamDescSet {
            scale,
            bias: scale,
            mean: stats,
            variance: stats,
        };
        assert_eq!(set.for_api(ApiVersion::V1), ParamDescs::Shared(&scale));
        match set.for_api(ApiVersion::V2) {
            ParamDescs::Split { mean, .. } => assert_eq!(*mean, stats),
            other => panic!("expected split descriptors, got {other:?}"),
        }
    }
}
