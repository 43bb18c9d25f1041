use bnorm::backend::spec::{BackendResult, ForwardInferenceArgs};
use bnorm::{
    reference, BatchNormBackend, BnTestCase, Element, Precision, Tensor, TensorDesc, TensorRead,
};
use rand::rngs::StdRng;

use super::{bind, bind_poisoned, check_output, uniform, BnFixture, Bound};
use super::{BIAS_RANGE, MEAN_RANGE, SCALE_RANGE, VARIANCE_RANGE, X_RANGE};
use crate::compare::{ComparisonReport, Tolerance};
use crate::invoke::{self, ParamDescSet};
use crate::params::{ApiVersion, BnOp, TestParams};

/// Forward inference with externally estimated mean and variance.
pub struct InferFixture<P: Precision, B: BatchNormBackend> {
    case: BnTestCase,
    api: ApiVersion,
    descs: ParamDescSet,
    x: Bound<P::X, B::Buffer>,
    scale: Bound<P::Scale, B::Buffer>,
    bias: Bound<P::Bias, B::Buffer>,
    mean: Bound<P::MeanVar, B::Buffer>,
    variance: Bound<P::MeanVar, B::Buffer>,
    y: Bound<P::Y, B::Buffer>,
}

impl<P: Precision, B: BatchNormBackend> BnFixture<B> for InferFixture<P, B> {
    type Precision = P;
    const OP: BnOp = BnOp::ForwardInference;

    fn set_up(
        backend: &B,
        params: &TestParams,
        api: ApiVersion,
        rng: &mut StdRng,
    ) -> anyhow::Result<Self> {
        let case = params.case;
        case.validate()?;
        let layout = params.layout;
        let x: Tensor<P::X> = uniform("x", case.dims(), layout, X_RANGE, rng);
        let x_desc = *x.desc();
        let p_dims = case.mode.param_dims(case.dims());
        let scale: Tensor<P::Scale> = uniform("scale", p_dims, layout, SCALE_RANGE, rng);
        let bias: Tensor<P::Bias> = uniform("bias", p_dims, layout, BIAS_RANGE, rng);
        let mean: Tensor<P::MeanVar> = uniform("estimated_mean", p_dims, layout, MEAN_RANGE, rng);
        let variance: Tensor<P::MeanVar> =
            uniform("estimated_variance", p_dims, layout, VARIANCE_RANGE, rng);

        let descs = ParamDescSet {
            scale: *scale.desc(),
            bias: *bias.desc(),
            mean: *mean.desc(),
            variance: *variance.desc(),
        };
        let y_desc = TensorDesc::new(<P::Y as Element>::DTYPE, x_desc.dims, layout);

        Ok(Self {
            case,
            api,
            descs,
            x: bind(backend, x)?,
            scale: bind(backend, scale)?,
            bias: bind(backend, bias)?,
            mean: bind(backend, mean)?,
            variance: bind(backend, variance)?,
            y: bind_poisoned(backend, "y", y_desc)?,
        })
    }

    fn invoke(&self, backend: &B) -> BackendResult<()> {
        let args = ForwardInferenceArgs {
            mode: self.case.mode,
            alpha: 1.0,
            beta: 0.0,
            x_desc: self.x.desc(),
            x: &self.x.device,
            y_desc: self.y.desc(),
            y: &self.y.device,
            param_descs: self.descs.for_api(self.api),
            scale: &self.scale.device,
            bias: &self.bias.device,
            estimated_mean: &self.mean.device,
            estimated_variance: &self.variance.device,
            epsilon: self.case.epsilon,
        };
        invoke::forward_inference(backend, self.api, args)
    }

    fn tear_down(
        self,
        backend: &B,
        tolerance: Tolerance,
    ) -> anyhow::Result<Vec<ComparisonReport>> {
        let mut expected = Tensor::<P::Y>::from_desc("y", *self.y.desc());
        reference::forward_inference(
            self.case.mode,
            &self.x.host,
            &self.scale.host,
            &self.bias.host,
            &self.mean.host,
            &self.variance.host,
            self.case.epsilon,
            &mut expected,
        )?;
        Ok(vec![check_output(backend, &self.y, &expected, tolerance)?])
    }
}
