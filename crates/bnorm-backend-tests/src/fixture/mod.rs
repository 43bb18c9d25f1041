//! Per-operation setup, device call and teardown.
//!
//! `set_up` generates seeded host tensors, uploads inputs and uploads NaN-poisoned outputs.
//! `invoke` issues exactly one device call. `tear_down` reads every output back, computes the
//! host reference from the same host inputs and compares each output independently.

mod bwd;
mod fwd_train;
mod infer;

pub use bwd::BwdFixture;
pub use fwd_train::FwdTrainFixture;
pub use infer::InferFixture;

use bnorm::backend::spec::BackendResult;
use bnorm::{BatchNormBackend, Element, Layout4D, Precision, Tensor, TensorDesc, TensorRead};
use rand::rngs::StdRng;

use crate::compare::{compare_tensor, ComparisonReport, Tolerance};
use crate::invoke;
use crate::params::{ApiVersion, BnOp, TestParams};

pub(crate) const X_RANGE: (f64, f64) = (-1.0, 1.0);
pub(crate) const SCALE_RANGE: (f64, f64) = (-1.0, 1.0);
pub(crate) const BIAS_RANGE: (f64, f64) = (-0.5, 0.5);
pub(crate) const MEAN_RANGE: (f64, f64) = (-0.5, 0.5);
pub(crate) const VARIANCE_RANGE: (f64, f64) = (0.5, 1.5);
pub(crate) const DY_RANGE: (f64, f64) = (-1.0, 1.0);

pub trait BnFixture<B: BatchNormBackend>: Sized {
    type Precision: Precision;
    const OP: BnOp;

    fn set_up(
        backend: &B,
        params: &TestParams,
        api: ApiVersion,
        rng: &mut StdRng,
    ) -> anyhow::Result<Self>;

    fn invoke(&self, backend: &B) -> BackendResult<()>;

    /// Reports for every output tensor, in a fixed order.
    fn tear_down(
        self,
        backend: &B,
        tolerance: Tolerance,
    ) -> anyhow::Result<Vec<ComparisonReport>>;
}

/// Host tensor plus its device mirror.
pub(crate) struct Bound<T: Element, H> {
    pub host: Tensor<T>,
    pub device: H,
}

impl<T: Element, H> Bound<T, H> {
    pub fn desc(&self) -> &TensorDesc {
        self.host.desc()
    }
}

pub(crate) fn bind<B: BatchNormBackend, T: Element>(
    backend: &B,
    host: Tensor<T>,
) -> anyhow::Result<Bound<T, B::Buffer>> {
    let device = invoke::upload(backend, &host)?;
    Ok(Bound { host, device })
}

/// Uploads a NaN-poisoned output tensor shaped like `desc` with element type `T`.
pub(crate) fn bind_poisoned<B: BatchNormBackend, T: Element>(
    backend: &B,
    name: &str,
    desc: TensorDesc,
) -> anyhow::Result<Bound<T, B::Buffer>> {
    let mut host = Tensor::<T>::from_desc(name, desc);
    host.fill_nan();
    bind(backend, host)
}

pub(crate) fn uniform<T: Element>(
    name: &str,
    dims: [usize; 4],
    layout: Layout4D,
    range: (f64, f64),
    rng: &mut StdRng,
) -> Tensor<T> {
    Tensor::uniform(name, dims, layout, range.0, range.1, rng)
}

/// Reads `bound` back and compares it with `expected`.
pub(crate) fn check_output<B: BatchNormBackend, T: Element>(
    backend: &B,
    bound: &Bound<T, B::Buffer>,
    expected: &Tensor<T>,
    tolerance: Tolerance,
) -> anyhow::Result<ComparisonReport> {
    let actual = invoke::read_back(backend, &bound.device, &bound.host)?;
    Ok(compare_tensor(
        expected.name(),
        &expected.to_logical_f64(),
        &actual.to_logical_f64(),
        tolerance,
    ))
}
