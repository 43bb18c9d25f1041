//! Parameterized batch-normalization conformance suites.
//!
//! Each suite expands test cases over layouts and API generations, runs every instance against
//! a [`bnorm::BatchNormBackend`] and compares device outputs with the host reference. Backend
//! crates instantiate the standard suites with [`define_backend_tests!`].

pub mod compare;
pub mod error;
pub mod faulty_backend;
pub mod fixture;
pub mod harness;
pub mod invoke;
pub mod outcome;
pub mod params;
pub mod skip;
pub mod suites;

pub use bnorm;
pub use error::HarnessError;
pub use outcome::{Failure, TestOutcome};

/// Routes `log` output through the test harness's captured stdout.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[macro_export]
macro_rules! define_backend_tests {
    ($module:ident, $backend_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            use $crate::bnorm::{Bf16, Fp16, Fp32, Fp64, Network};
            use $crate::params::BnOp;
            use $crate::{init_test_logging, suites};

            macro_rules! suite_test {
                ($name:ident, $op:expr, $precision:ty, $network:expr) => {
                    #[test]
                    fn $name() {
                        init_test_logging();
                        let backend = ($backend_ctor)();
                        let report = suites::run_standard_suite::<$precision, _>(
                            &backend, $op, $network,
                        )
                        .expect("suite configuration");
                        report.assert_passed();
                    }
                };
            }

            suite_test!(infer_fp16_small, BnOp::ForwardInference, Fp16, Network::Small);
            suite_test!(infer_fp16_large, BnOp::ForwardInference, Fp16, Network::Large);
            suite_test!(infer_bfp16_small, BnOp::ForwardInference, Bf16, Network::Small);
            suite_test!(infer_bfp16_large, BnOp::ForwardInference, Bf16, Network::Large);
            suite_test!(infer_fp32_small, BnOp::ForwardInference, Fp32, Network::Small);
            suite_test!(infer_fp32_large, BnOp::ForwardInference, Fp32, Network::Large);
            suite_test!(infer_fp64_small, BnOp::ForwardInference, Fp64, Network::Small);
            suite_test!(infer_fp64_large, BnOp::ForwardInference, Fp64, Network::Large);
            suite_test!(fwd_train_fp16_small, BnOp::ForwardTraining, Fp16, Network::Small);
            suite_test!(fwd_train_fp16_large, BnOp::ForwardTraining, Fp16, Network::Large);
            suite_test!(fwd_train_bfp16_small, BnOp::ForwardTraining, Bf16, Network::Small);
            suite_test!(fwd_train_bfp16_large, BnOp::ForwardTraining, Bf16, Network::Large);
            suite_test!(fwd_train_fp32_small, BnOp::ForwardTraining, Fp32, Network::Small);
            suite_test!(fwd_train_fp32_large, BnOp::ForwardTraining, Fp32, Network::Large);
            suite_test!(fwd_train_fp64_small, BnOp::ForwardTraining, Fp64, Network::Small);
            suite_test!(fwd_train_fp64_large, BnOp::ForwardTraining, Fp64, Network::Large);
            suite_test!(bwd_fp16_small, BnOp::Backward, Fp16, Network::Small);
            suite_test!(bwd_fp16_large, BnOp::Backward, Fp16, Network::Large);
            suite_test!(bwd_bfp16_small, BnOp::Backward, Bf16, Network::Small);
            suite_test!(bwd_bfp16_large, BnOp::Backward, Bf16, Network::Large);
            suite_test!(bwd_fp32_small, BnOp::Backward, Fp32, Network::Small);
            suite_test!(bwd_fp32_large, BnOp::Backward, Fp32, Network::Large);
            suite_test!(bwd_fp64_small, BnOp::Backward, Fp64, Network::Small);
            suite_test!(bwd_fp64_large, BnOp::Backward, Fp64, Network::Large);
        }
    };
}
