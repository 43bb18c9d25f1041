use bnorm::backend::spec::{ForwardInferenceArgs, ParamDescs};
use bnorm::{network_small, BatchNormBackend, BnMode, Fp32, Layout4D, Tensor, TensorRead};
use bnorm_backend_cpu::CpuBatchNormBackend;
use bnorm_backend_tests::fixture::{BnFixture, FwdTrainFixture};
use bnorm_backend_tests::harness::instance_seed;
use bnorm_backend_tests::invoke::upload;
use bnorm_backend_tests::params::{ApiVersion, BnOp, TestParams};
use half::f16;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn fixtures_report_identically_in_both_layouts() {
    let backend = CpuBatchNormBackend::new();
    let case = network_small()[2];
    let mut max_diffs = Vec::new();
    for layout in Layout4D::ALL {
        let params = TestParams {
            case,
            layout,
            api: ApiVersion::V2.into(),
            index: 0,
        };
        let mut rng = StdRng::seed_from_u64(instance_seed(7, &case));
        let fixture =
            FwdTrainFixture::<Fp32, _>::set_up(&backend, &params, ApiVersion::V2, &mut rng)
                .unwrap();
        fixture.invoke(&backend).unwrap();
        let reports = fixture
            .tear_down(&backend, BnOp::ForwardTraining.default_tolerance())
            .unwrap();
        assert!(reports.iter().all(|r| r.passed()));
        max_diffs.push(reports.iter().map(|r| r.max_abs_diff).collect::<Vec<_>>());
    }
    assert_eq!(max_diffs[0], max_diffs[1]);
}

#[test]
fn device_results_are_layout_independent() {
    let backend = CpuBatchNormBackend::new();
    let dims = [3, 4, 2, 5];
    let p_dims = [1, 4, 1, 1];
    let mut outputs = Vec::new();
    for layout in Layout4D::ALL {
        let mut rng = StdRng::seed_from_u64(3);
        let x: Tensor<f16> = Tensor::uniform("x", dims, layout, -1.0, 1.0, &mut rng);
        let scale: Tensor<f16> = Tensor::uniform("scale", p_dims, layout, -1.0, 1.0, &mut rng);
        let bias: Tensor<f16> = Tensor::uniform("bias", p_dims, layout, -0.5, 0.5, &mut rng);
        let mean: Tensor<f32> = Tensor::uniform("mean", p_dims, layout, -0.5, 0.5, &mut rng);
        let var: Tensor<f32> = Tensor::uniform("var", p_dims, layout, 0.5, 1.5, &mut rng);
        let mut y: Tensor<f16> = Tensor::zeros("y", dims, layout);
        y.fill_nan();

        let y_dev = upload(&backend, &y).unwrap();
        let x_dev = upload(&backend, &x).unwrap();
        let scale_dev = upload(&backend, &scale).unwrap();
        let bias_dev = upload(&backend, &bias).unwrap();
        let mean_dev = upload(&backend, &mean).unwrap();
        let var_dev = upload(&backend, &var).unwrap();
        backend
            .forward_inference(ForwardInferenceArgs {
                mode: BnMode::Spatial,
                alpha: 1.0,
                beta: 0.0,
                x_desc: x.desc(),
                x: &x_dev,
                y_desc: y.desc(),
                y: &y_dev,
                param_descs: ParamDescs::Shared(scale.desc()),
                scale: &scale_dev,
                bias: &bias_dev,
                estimated_mean: &mean_dev,
                estimated_variance: &var_dev,
                epsilon: 1e-5,
            })
            .unwrap();
        y.load_bytes(&backend.read(&y_dev).unwrap()).unwrap();
        outputs.push(y.to_logical_f64());
    }
    assert!(outputs[0].iter().all(|v| v.is_finite()));
    assert_eq!(outputs[0], outputs[1]);
}
