use bnorm::backend::spec::{BackendResult, BackwardArgs, SavedStats};
use bnorm::reference::{self, BackwardOutputs};
use bnorm::{BatchNormBackend, BnTestCase, Element, Precision, Tensor, TensorRead, TensorWrite};
use rand::rngs::StdRng;

use super::{bind, bind_poisoned, check_output, uniform, BnFixture, Bound};
use super::{DY_RANGE, SCALE_RANGE, X_RANGE};
use crate::compare::{ComparisonReport, Tolerance};
use crate::invoke::{self, ParamDescSet};
use crate::params::{ApiVersion, BnOp, TestParams};

/// Backward pass from saved batch statistics.
pub struct BwdFixture<P: Precision, B: BatchNormBackend> {
    case: BnTestCase,
    api: ApiVersion,
    descs: ParamDescSet,
    x: Bound<P::X, B::Buffer>,
    dy: Bound<P::Dy, B::Buffer>,
    scale: Bound<P::Scale, B::Buffer>,
    saved_mean: Bound<P::MeanVar, B::Buffer>,
    saved_inv_variance: Bound<P::MeanVar, B::Buffer>,
    dx: Bound<P::Dx, B::Buffer>,
    dscale: Bound<P::DScaleDBias, B::Buffer>,
    dbias: Bound<P::DScaleDBias, B::Buffer>,
}

impl<P: Precision, B: BatchNormBackend> BnFixture<B> for BwdFixture<P, B> {
    type Precision = P;
    const OP: BnOp = BnOp::Backward;

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
        let dy: Tensor<P::Dy> = uniform("dy", case.dims(), layout, DY_RANGE, rng);
        let scale: Tensor<P::Scale> = uniform("scale", p_dims, layout, SCALE_RANGE, rng);

        // Saved statistics as a forward-training step on the same input would produce them.
        let stats = reference::batch_statistics(case.mode, &x)?;
        let mut saved_mean = Tensor::<P::MeanVar>::zeros("saved_mean", p_dims, layout);
        let mut saved_inv_variance =
            Tensor::<P::MeanVar>::zeros("saved_inv_variance", p_dims, layout);
        let stats_desc = *saved_mean.desc();
        for [_, c, h, w] in stats_desc.coords() {
            let slot = stats.slot(c, h, w);
            saved_mean.put(0, c, h, w, stats.mean[slot]);
            saved_inv_variance.put(0, c, h, w, 1.0 / (stats.variance[slot] + case.epsilon).sqrt());
        }

        let grad_desc = stats_desc.with_dtype(<P::DScaleDBias as Element>::DTYPE);
        let dx_desc = x.desc().with_dtype(<P::Dx as Element>::DTYPE);
        let descs = ParamDescSet {
            scale: *scale.desc(),
            bias: grad_desc,
            mean: stats_desc,
            variance: stats_desc,
        };

        Ok(Self {
            case,
            api,
            descs,
            x: bind(backend, x)?,
            dy: bind(backend, dy)?,
            scale: bind(backend, scale)?,
            saved_mean: bind(backend, saved_mean)?,
            saved_inv_variance: bind(backend, saved_inv_variance)?,
            dx: bind_poisoned(backend, "dx", dx_desc)?,
            dscale: bind_poisoned(backend, "dscale", grad_desc)?,
            dbias: bind_poisoned(backend, "dbias", grad_desc)?,
        })
    }

    fn invoke(&self, backend: &B) -> BackendResult<()> {
        let args = BackwardArgs {
            mode: self.case.mode,
            alpha_data_diff: 1.0,
            beta_data_diff: 0.0,
            alpha_param_diff: 1.0,
            beta_param_diff: 0.0,
            x_desc: self.x.desc(),
            x: &self.x.device,
            dy_desc: self.dy.desc(),
            dy: &self.dy.device,
            dx_desc: self.dx.desc(),
            dx: &self.dx.device,
            param_descs: self.descs.for_api(self.api),
            scale: &self.scale.device,
            dscale: &self.dscale.device,
            dbias: &self.dbias.device,
            epsilon: self.case.epsilon,
            saved: Some(SavedStats {
                mean: &self.saved_mean.device,
                inv_variance: &self.saved_inv_variance.device,
            }),
        };
        invoke::backward(backend, self.api, args)
    }

    fn tear_down(
        self,
        backend: &B,
        tolerance: Tolerance,
    ) -> anyhow::Result<Vec<ComparisonReport>> {
        let mut dx = Tensor::<P::Dx>::from_desc("dx", *self.dx.desc());
        let mut dscale = Tensor::<P::DScaleDBias>::from_desc("dscale", *self.dscale.desc());
        let mut dbias = Tensor::<P::DScaleDBias>::from_desc("dbias", *self.dbias.desc());
        let saved: (&dyn TensorRead, &dyn TensorRead) =
            (&self.saved_mean.host, &self.saved_inv_variance.host);
        reference::backward(
            self.case.mode,
            &self.x.host,
            &self.dy.host,
            &self.scale.host,
            Some(saved),
            self.case.epsilon,
            BackwardOutputs {
                dx: &mut dx,
                dscale: &mut dscale,
                dbias: &mut dbias,
            },
        )?;

        Ok(vec![
            check_output(backend, &self.dx, &dx, tolerance)?,
            check_output(backend, &self.dscale, &dscale, tolerance)?,
            check_output(backend, &self.dbias, &dbias, tolerance)?,
        ])
    }
}
