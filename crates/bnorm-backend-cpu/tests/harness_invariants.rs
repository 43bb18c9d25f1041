use std::sync::Arc;

use bnorm::{network_small, BnMode, BnTestCase, Fp16, Fp32, Layout4D, Precision};
use bnorm_backend_cpu::CpuBatchNormBackend;
use bnorm_backend_tests::faulty_backend::{Fault, FaultyBackend};
use bnorm_backend_tests::fixture::{BnFixture, BwdFixture, FwdTrainFixture, InferFixture};
use bnorm_backend_tests::harness::{instance_seed, run_one, run_suite, RunContext};
use bnorm_backend_tests::params::{expand, ApiSelector, ApiVersion, BnOp, TestParams};
use bnorm_backend_tests::skip::SkipPolicy;
use bnorm_backend_tests::{init_test_logging, Failure, TestOutcome};
use rand::rngs::StdRng;
use rand::SeedableRng;

type Faulty = FaultyBackend<CpuBatchNormBackend>;

/// Single-precision bundle with a double-precision bias, which a shared descriptor cannot name.
struct WideBias;

impl Precision for WideBias {
    const NAME: &'static str = "fp32_wide_bias";
    type X = f32;
    type Y = f32;
    type Scale = f32;
    type Bias = f64;
    type MeanVar = f32;
    type Acc = f32;
    type Dx = f32;
    type Dy = f32;
    type DScaleDBias = f32;
}

fn faulty(fault: Fault) -> Faulty {
    FaultyBackend::new(CpuBatchNormBackend::new(), fault)
}

fn instance(api: ApiVersion) -> TestParams {
    TestParams {
        case: BnTestCase::new(4, 3, 2, 2, BnMode::Spatial),
        layout: Layout4D::NHWC,
        api: api.into(),
        index: 0,
    }
}

#[test]
fn unwritten_outputs_fail_comparison() {
    init_test_logging();
    let backend = faulty(Fault::SkipWrites);
    let ctx = RunContext::default();
    let outcome =
        run_one::<InferFixture<Fp32, _>, _>(&backend, &ctx, "sentinel", &instance(ApiVersion::V1));

    let TestOutcome::Failed(Failure::Mismatch(reports)) = outcome else {
        panic!("expected mismatch, got {outcome:?}");
    };
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].tensor, "y");
    assert_eq!(reports[0].non_finite_actual, reports[0].len);
    assert_eq!(backend.calls(), 1);
}

#[test]
fn every_training_output_is_checked() {
    init_test_logging();
    let backend = faulty(Fault::SkipWrites);
    let ctx = RunContext::default();
    let outcome = run_one::<FwdTrainFixture<Fp16, _>, _>(
        &backend,
        &ctx,
        "sentinel",
        &instance(ApiVersion::V2),
    );

    let failure = outcome.failure().expect("skipped writes must fail");
    let tensors: Vec<&str> = failure.reports().iter().map(|r| r.tensor.as_str()).collect();
    assert_eq!(tensors[..3], ["y", "saved_mean", "saved_inv_variance"]);
}

#[test]
fn training_teardown_reports_all_five_outputs() {
    let backend = CpuBatchNormBackend::new();
    let params = instance(ApiVersion::V2);
    let mut rng = StdRng::seed_from_u64(instance_seed(0, &params.case));
    let fixture =
        FwdTrainFixture::<Fp32, _>::set_up(&backend, &params, ApiVersion::V2, &mut rng).unwrap();
    fixture.invoke(&backend).unwrap();
    let reports = fixture
        .tear_down(&backend, BnOp::ForwardTraining.default_tolerance())
        .unwrap();

    let tensors: Vec<&str> = reports.iter().map(|r| r.tensor.as_str()).collect();
    assert_eq!(
        tensors,
        ["y", "saved_mean", "saved_inv_variance", "running_mean", "running_variance"]
    );
    assert!(reports.iter().all(|r| r.passed()), "{reports:?}");
}

#[test]
fn unsupported_architecture_skips_before_touching_the_device() {
    init_test_logging();
    let backend = faulty(Fault::None).with_arch("gfx1010:xnack-");
    let ctx = RunContext::default();
    let outcome =
        run_one::<BwdFixture<Fp32, _>, _>(&backend, &ctx, "skip", &instance(ApiVersion::V2));

    assert!(outcome.is_skipped(), "{outcome:?}");
    assert_eq!(backend.uploads(), 0);
    assert_eq!(backend.calls(), 0);
}

#[test]
fn whitelisted_architecture_with_feature_suffix_runs() {
    init_test_logging();
    let backend = faulty(Fault::None).with_arch("gfx90a:sramecc+:xnack-");
    let ctx = RunContext::default();
    let outcome =
        run_one::<BwdFixture<Fp32, _>, _>(&backend, &ctx, "skip", &instance(ApiVersion::V1));
    assert!(outcome.is_passed(), "{outcome:?}");
    assert!(backend.uploads() > 0);
}

#[test]
fn explicit_whitelist_replaces_default() {
    let backend = CpuBatchNormBackend::new();
    let policy = SkipPolicy::ArchWhitelist(vec!["gfx942".to_string()]);
    assert!(policy.check(&backend).is_some());
    assert!(SkipPolicy::RunAll.check(&backend).is_none());
    assert!(SkipPolicy::default_whitelist().check(&backend).is_none());
}

#[test]
fn device_errors_are_reported_without_comparison() {
    init_test_logging();
    let backend = faulty(Fault::FailCalls);
    let ctx = RunContext::default();
    let outcome =
        run_one::<BwdFixture<Fp32, _>, _>(&backend, &ctx, "error", &instance(ApiVersion::V2));

    match outcome {
        TestOutcome::Failed(Failure::DeviceCall { op, api, source }) => {
            assert_eq!(op, BnOp::Backward);
            assert_eq!(api, ApiVersion::V2);
            assert!(source.to_string().contains("backward_v2"));
        }
        other => panic!("expected device call failure, got {other:?}"),
    }
    assert_eq!(backend.calls(), 1);
}

#[test]
fn unknown_api_selector_fails_immediately() {
    init_test_logging();
    let backend = faulty(Fault::None);
    let ctx = RunContext::default();
    let params = TestParams {
        api: ApiSelector::parse("api_v3"),
        ..instance(ApiVersion::V1)
    };
    assert_eq!(params.name(), "NHWC_unknown_api_version_0");

    let outcome = run_one::<InferFixture<Fp32, _>, _>(&backend, &ctx, "api", &params);
    assert!(matches!(
        outcome,
        TestOutcome::Failed(Failure::UnsupportedConfiguration(_))
    ));
    assert_eq!(backend.uploads(), 0);
}

#[test]
fn unknown_api_selector_on_unsupported_architecture_is_skipped() {
    init_test_logging();
    let backend = faulty(Fault::None).with_arch("gfx1010");
    let ctx = RunContext::default();
    let params = TestParams {
        api: ApiSelector::parse("v3"),
        ..instance(ApiVersion::V1)
    };

    let outcome = run_one::<InferFixture<Fp32, _>, _>(&backend, &ctx, "api", &params);
    assert!(outcome.is_skipped(), "{outcome:?}");
    assert_eq!(backend.uploads(), 0);
}

#[test]
fn first_generation_rejects_bias_dtype_it_cannot_describe() {
    init_test_logging();
    let backend = faulty(Fault::None);
    let ctx = RunContext::default();
    let outcome = run_one::<InferFixture<WideBias, _>, _>(
        &backend,
        &ctx,
        "dtypes",
        &instance(ApiVersion::V1),
    );

    match outcome {
        TestOutcome::Failed(Failure::UnsupportedConfiguration(reason)) => {
            assert!(reason.contains("bias"), "{reason}");
        }
        other => panic!("expected unsupported configuration, got {other:?}"),
    }
    assert_eq!(backend.uploads(), 0);
    assert_eq!(backend.calls(), 0);

    let outcome = run_one::<InferFixture<WideBias, _>, _>(
        &backend,
        &ctx,
        "dtypes",
        &instance(ApiVersion::V2),
    );
    assert!(outcome.is_passed(), "{outcome:?}");
}

#[test]
fn empty_case_fails_setup_without_panicking() {
    init_test_logging();
    let backend = faulty(Fault::None);
    let ctx = RunContext::default();
    let params = TestParams {
        case: BnTestCase::new(0, 3, 2, 2, BnMode::Spatial),
        ..instance(ApiVersion::V2)
    };

    let outcome = run_one::<InferFixture<Fp32, _>, _>(&backend, &ctx, "setup", &params);
    match outcome {
        TestOutcome::Failed(Failure::Setup(message)) => {
            assert!(message.contains("empty dimension"), "{message}");
        }
        other => panic!("expected setup failure, got {other:?}"),
    }
    assert_eq!(backend.uploads(), 0);
}

#[test]
fn perturbed_element_is_located() {
    init_test_logging();
    let backend = faulty(Fault::PerturbOutput {
        index: 5,
        delta: 0.25,
    });
    let ctx = RunContext::default();
    let mut params = instance(ApiVersion::V1);
    params.layout = Layout4D::NCHW;
    let outcome = run_one::<InferFixture<Fp32, _>, _>(&backend, &ctx, "perturb", &params);

    let failure = outcome.failure().expect("perturbation must fail");
    let report = &failure.reports()[0];
    assert_eq!(report.mismatches, 1);
    assert_eq!(report.first_mismatches[0].index, 5);
    assert!((report.max_abs_diff - 0.25).abs() < 1e-6);
}

#[test]
fn perturbation_below_tolerance_passes() {
    init_test_logging();
    let backend = faulty(Fault::PerturbOutput {
        index: 0,
        delta: 1e-4,
    });
    let ctx = RunContext::default();
    let outcome =
        run_one::<BwdFixture<Fp32, _>, _>(&backend, &ctx, "perturb", &instance(ApiVersion::V2));
    assert!(outcome.is_passed(), "{outcome:?}");
}

#[test]
fn suite_runs_every_instance_and_counts_outcomes() {
    init_test_logging();
    let backend = Arc::new(CpuBatchNormBackend::new());
    let ctx = RunContext::default();
    let apis: Vec<ApiSelector> = vec![
        ApiVersion::V1.into(),
        ApiVersion::V2.into(),
        ApiSelector::parse("v9"),
    ];
    let params = expand(&network_small()[..2], &Layout4D::ALL, &apis);
    let report = run_suite::<InferFixture<Fp32, _>, _>(&backend, &ctx, "mixed", &params);

    assert_eq!(report.results.len(), 12);
    assert_eq!(report.passed(), 8);
    assert_eq!(report.failed(), 4);
    assert_eq!(report.skipped(), 0);
    report.print_table();
}
