//! Standard suite instantiations: operation x precision x network.

use std::sync::Arc;

use bnorm::{BatchNormBackend, BnTestCase, Layout4D, Network, Precision};

use crate::error::HarnessError;
use crate::fixture::{BwdFixture, FwdTrainFixture, InferFixture};
use crate::harness::{run_suite, RunContext, SuiteReport};
use crate::params::{expand, ApiSelector, ApiVersion, BnOp, TestParams};

/// API generations exercised per network: the small network through the first generation and
/// the large network through the second.
pub fn standard_apis(network: Network) -> &'static [ApiVersion] {
    match network {
        Network::Small => &[ApiVersion::V1],
        Network::Large => &[ApiVersion::V2],
    }
}

/// Network cases, with the large network cut to its first case when `BNORM_LARGE` is off.
pub fn network_cases(network: Network) -> Vec<BnTestCase> {
    select_cases(network, bnorm::env::large_networks_enabled())
}

fn select_cases(network: Network, full_large: bool) -> Vec<BnTestCase> {
    let mut cases = network.cases();
    if network == Network::Large && !full_large {
        cases.truncate(1);
    }
    cases
}

pub fn standard_params(network: Network) -> Vec<TestParams> {
    let apis: Vec<ApiSelector> = standard_apis(network)
        .iter()
        .copied()
        .map(ApiSelector::from)
        .collect();
    expand(&network_cases(network), &Layout4D::ALL, &apis)
}

pub fn suite_name<P: Precision>(op: BnOp, network: Network) -> String {
    format!("{op}_{}_{network}", P::NAME)
}

/// Runs `params` for `op` in precision `P`, printing the summary table.
pub fn run_op_suite<P, B>(
    backend: &Arc<B>,
    ctx: &RunContext,
    op: BnOp,
    suite: &str,
    params: &[TestParams],
) -> SuiteReport
where
    P: Precision,
    B: BatchNormBackend + 'static,
{
    let report = match op {
        BnOp::ForwardInference => run_suite::<InferFixture<P, B>, B>(backend, ctx, suite, params),
        BnOp::ForwardTraining => {
            run_suite::<FwdTrainFixture<P, B>, B>(backend, ctx, suite, params)
        }
        BnOp::Backward => run_suite::<BwdFixture<P, B>, B>(backend, ctx, suite, params),
    };
    report.print_table();
    report
}

/// Runs the standard instantiation of `op` for precision `P` over `network`.
pub fn run_standard_suite<P, B>(
    backend: &Arc<B>,
    op: BnOp,
    network: Network,
) -> Result<SuiteReport, HarnessError>
where
    P: Precision,
    B: BatchNormBackend + 'static,
{
    let ctx = RunContext::from_env()?;
    let params = standard_params(network);
    Ok(run_op_suite::<P, B>(
        backend,
        &ctx,
        op,
        &suite_name::<P>(op, network),
        &params,
    ))
}
