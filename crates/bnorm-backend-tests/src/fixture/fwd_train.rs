use bnorm::backend::spec::{BackendResult, ForwardTrainingArgs, RunningStats, SavedStats};
use bnorm::reference::{self, TrainingOutputs};
use bnorm::{BatchNormBackend, BnTestCase, Precision, Tensor, TensorRead};
use rand::rngs::StdRng;

use super::{bind, bind_poisoned, check_output, uniform, BnFixture, Bound};
use super::{BIAS_RANGE, MEAN_RANGE, SCALE_RANGE, VARIANCE_RANGE, X_RANGE};
use crate::compare::{ComparisonReport, Tolerance};
use crate::invoke::{self, ParamDescSet};
use crate::params::{ApiVersion, BnOp, TestParams};

/// Forward training: batch statistics, saved statistics and the running-average update.
///
/// Running mean and variance are in/out buffers seeded with finite values; the host copies keep
/// the prior values the reference update starts from.
pub struct FwdTrainFixture<P: Precision, B: BatchNormBackend> {
    case: BnTestCase,
    api: ApiVersion,
    descs: ParamDescSet,
    x: Bound<P::X, B::Buffer>,
    scale: Bound<P::Scale, B::Buffer>,
    bias: Bound<P::Bias, B::Buffer>,
    running_mean: Bound<P::Acc, B::Buffer>,
    running_variance: Bound<P::Acc, B::Buffer>,
    saved_mean: Bound<P::Acc, B::Buffer>,
    saved_inv_variance: Bound<P::Acc, B::Buffer>,
    y: Bound<P::Y, B::Buffer>,
}

impl<P: Precision, B: BatchNormBackend> BnFixture<B> for FwdTrainFixture<P, B> {
    type Precision = P;
    const OP: BnOp = BnOp::ForwardTraining;

    fn set_up(
        backend: &B,
        params: &TestParams,
        api: ApiVersion,
        rng: &mut StdRng,
    ) -> anyhow::Result<Self> {
        let case = params.case;
        case.validate()?;
        let layout = params.layout;
        let p_dims = case.mode.param_dims(case.dims());
        let x: Tensor<P::X> = uniform("x", case.dims(), layout, X_RANGE, rng);
        let scale: Tensor<P::Scale> = uniform("scale", p_dims, layout, SCALE_RANGE, rng);
        let bias: Tensor<P::Bias> = uniform("bias", p_dims, layout, BIAS_RANGE, rng);
        let running_mean: Tensor<P::Acc> =
            uniform("running_mean", p_dims, layout, MEAN_RANGE, rng);
        let running_variance: Tensor<P::Acc> =
            uniform("running_variance", p_dims, layout, VARIANCE_RANGE, rng);

        let stats_desc = *running_mean.desc();
        let y_desc = x.desc().with_dtype(<P::Y as bnorm::Element>::DTYPE);
        let descs = ParamDescSet {
            scale: *scale.desc(),
            bias: *bias.desc(),
            mean: stats_desc,
            variance: stats_desc,
        };

        Ok(Self {
            case,
            api,
            descs,
            x: bind(backend, x)?,
            scale: bind(backend, scale)?,
            bias: bind(backend, bias)?,
            running_mean: bind(backend, running_mean)?,
            running_variance: bind(backend, running_variance)?,
            saved_mean: bind_poisoned(backend, "saved_mean", stats_desc)?,
            saved_inv_variance: bind_poisoned(backend, "saved_inv_variance", stats_desc)?,
            y: bind_poisoned(backend, "y", y_desc)?,
        })
    }

    fn invoke(&self, backend: &B) -> BackendResult<()> {
        let args = ForwardTrainingArgs {
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
            running: Some(RunningStats {
                average_factor: self.case.average_factor,
                mean: &self.running_mean.device,
                variance: &self.running_variance.device,
            }),
            saved: Some(SavedStats {
                mean: &self.saved_mean.device,
                inv_variance: &self.saved_inv_variance.device,
            }),
            epsilon: self.case.epsilon,
        };
        invoke::forward_training(backend, self.api, args)
    }

    fn tear_down(
        self,
        backend: &B,
        tolerance: Tolerance,
    ) -> anyhow::Result<Vec<ComparisonReport>> {
        let mut y = Tensor::<P::Y>::from_desc("y", *self.y.desc());
        let mut saved_mean = Tensor::<P::Acc>::from_desc("saved_mean", *self.saved_mean.desc());
        let mut saved_inv_variance =
            Tensor::<P::Acc>::from_desc("saved_inv_variance", *self.saved_inv_variance.desc());
        let mut running_mean = self.running_mean.host.clone();
        let mut running_variance = self.running_variance.host.clone();
        reference::forward_training(
            self.case.mode,
            &self.x.host,
            &self.scale.host,
            &self.bias.host,
            self.case.epsilon,
            self.case.average_factor,
            TrainingOutputs {
                y: &mut y,
                saved_mean: &mut saved_mean,
                saved_inv_variance: &mut saved_inv_variance,
                running_mean: &mut running_mean,
                running_variance: &mut running_variance,
            },
        )?;

        Ok(vec![
            check_output(backend, &self.y, &y, tolerance)?,
            check_output(backend, &self.saved_mean, &saved_mean, tolerance)?,
            check_output(backend, &self.saved_inv_variance, &saved_inv_variance, tolerance)?,
            check_output(backend, &self.running_mean, &running_mean, tolerance)?,
            check_output(backend, &self.running_variance, &running_variance, tolerance)?,
        ])
    }
}
