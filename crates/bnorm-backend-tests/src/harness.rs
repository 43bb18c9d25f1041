//! Sequential suite runner and ASCII summary table.

use std::sync::Arc;
use std::time::Instant;

use bnorm::{BatchNormBackend, BnTestCase};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::compare::ToleranceConfig;
use crate::error::HarnessError;
use crate::fixture::BnFixture;
use crate::invoke::check_v1_dtypes;
use crate::outcome::{Failure, TestOutcome};
use crate::params::{ApiVersion, TestParams};
use crate::skip::SkipPolicy;

/// Process-wide knobs shared by every instance of a suite.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub skip_policy: SkipPolicy,
    pub tolerances: ToleranceConfig,
    pub seed: u64,
}

impl RunContext {
    pub fn from_env() -> Result<Self, HarnessError> {
        Ok(Self {
            skip_policy: SkipPolicy::from_env(),
            tolerances: ToleranceConfig::from_env()?,
            seed: bnorm::env::base_seed(),
        })
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            skip_policy: SkipPolicy::default(),
            tolerances: ToleranceConfig::default(),
            seed: bnorm::env::base_seed(),
        }
    }
}

/// Seed of an instance; depends only on the case so every layout and API sees the same values.
pub fn instance_seed(base: u64, case: &BnTestCase) -> u64 {
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = 0xcbf2_9ce4_8422_2325 ^ base;
    for word in case.dims().into_iter().chain([case.mode as usize]) {
        for byte in (word as u64).to_le_bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

/// Runs one instance: skip check, API resolution, setup, device call, teardown comparison.
pub fn run_one<F, B>(backend: &B, ctx: &RunContext, suite: &str, params: &TestParams) -> TestOutcome
where
    F: BnFixture<B>,
    B: BatchNormBackend,
{
    let name = params.name();
    if let Some(reason) = ctx.skip_policy.check(backend) {
        log::warn!("{suite}/{name}: skipped: {reason}");
        return TestOutcome::Skipped { reason };
    }

    let api = match params.api.resolve() {
        Ok(api) => api,
        Err(err) => {
            log::error!("{suite}/{name}: {err}");
            return TestOutcome::Failed(Failure::UnsupportedConfiguration(err.to_string()));
        }
    };

    if api == ApiVersion::V1 {
        if let Err(reason) = check_v1_dtypes::<F::Precision>(F::OP) {
            log::error!("{suite}/{name}: {reason}");
            return TestOutcome::Failed(Failure::UnsupportedConfiguration(reason));
        }
    }

    let test_name = format!("{suite}/{name}");
    let tolerance = ctx.tolerances.resolve(
        backend.backend_name(),
        &test_name,
        F::OP.default_tolerance(),
    );
    log::debug!(
        "{test_name}: {} on {} ({}), {tolerance}",
        params.case,
        backend.device_name(),
        backend.device_arch()
    );

    let mut rng = StdRng::seed_from_u64(instance_seed(ctx.seed, &params.case));
    let fixture = match F::set_up(backend, params, api, &mut rng) {
        Ok(fixture) => fixture,
        Err(err) => {
            log::error!("{test_name}: setup failed: {err:#}");
            return TestOutcome::Failed(Failure::Setup(format!("{err:#}")));
        }
    };

    if let Err(source) = fixture.invoke(backend) {
        let failure = Failure::DeviceCall {
            op: F::OP,
            api,
            source,
        };
        log::error!("{test_name}: {failure}");
        return TestOutcome::Failed(failure);
    }

    match fixture.tear_down(backend, tolerance) {
        Ok(reports) => {
            let failing: Vec<_> = reports.into_iter().filter(|r| !r.passed()).collect();
            if failing.is_empty() {
                TestOutcome::Passed
            } else {
                let failure = Failure::Mismatch(failing);
                log::error!("{test_name}: {failure}");
                TestOutcome::Failed(failure)
            }
        }
        Err(err) => {
            log::error!("{test_name}: readback failed: {err:#}");
            TestOutcome::Failed(Failure::Readback(format!("{err:#}")))
        }
    }
}

#[derive(Debug)]
pub struct InstanceResult {
    pub params: TestParams,
    pub outcome: TestOutcome,
    pub elapsed_ms: f64,
}

#[derive(Debug)]
pub struct SuiteReport {
    pub suite: String,
    pub backend: String,
    pub results: Vec<InstanceResult>,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.count(TestOutcome::is_passed)
    }

    pub fn skipped(&self) -> usize {
        self.count(TestOutcome::is_skipped)
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed() - self.skipped()
    }

    fn count(&self, pred: impl Fn(&TestOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&TestParams, &Failure)> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.failure().map(|f| (&r.params, f)))
    }

    /// Panics with every failure message if any instance failed.
    pub fn assert_passed(&self) {
        if self.failed() == 0 {
            return;
        }
        let details = self
            .failures()
            .map(|(params, failure)| format!("{}/{}: {failure}", self.suite, params.name()))
            .collect::<Vec<_>>()
            .join("\n");
        panic!(
            "{}: {} of {} instances failed on backend {}\n{details}",
            self.suite,
            self.failed(),
            self.results.len(),
            self.backend
        );
    }

    pub fn print_table(&self) {
        print_table(self);
    }
}

/// Runs `params` sequentially against `backend` with fixture `F`.
pub fn run_suite<F, B>(
    backend: &Arc<B>,
    ctx: &RunContext,
    suite: &str,
    params: &[TestParams],
) -> SuiteReport
where
    F: BnFixture<B>,
    B: BatchNormBackend,
{
    let mut results = Vec::with_capacity(params.len());
    for params in params {
        let start = Instant::now();
        let outcome = run_one::<F, B>(backend.as_ref(), ctx, suite, params);
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        results.push(InstanceResult {
            params: params.clone(),
            outcome,
            elapsed_ms,
        });
    }
    let report = SuiteReport {
        suite: suite.to_string(),
        backend: backend.backend_name().to_string(),
        results,
    };
    log::info!(
        "{} on {}: {} passed, {} skipped, {} failed",
        report.suite,
        report.backend,
        report.passed(),
        report.skipped(),
        report.failed()
    );
    report
}

#[derive(Clone, Copy)]
enum Align {
    Left,
    Right,
    Center,
}

fn format_cell(value: &str, width: usize, align: Align) -> String {
    match align {
        Align::Left => format!("{value:<width$}"),
        Align::Right => format!("{value:>width$}"),
        Align::Center => {
            let pad = width.saturating_sub(value.len());
            let left = pad / 2;
            let right = pad - left;
            format!("{}{}{}", " ".repeat(left), value, " ".repeat(right))
        }
    }
}

fn border(widths: &[usize]) -> String {
    let mut line = String::new();
    line.push('+');
    for width in widths {
        line.push_str(&"-".repeat(width + 2));
        line.push('+');
    }
    line
}

fn format_ms(value: f64) -> String {
    if value.is_finite() {
        format!("{:.3}", value)
    } else {
        "n/a".to_string()
    }
}

fn print_table(report: &SuiteReport) {
    let headers = ["test", "case", "ms", "status"];
    let aligns = [Align::Left, Align::Left, Align::Right, Align::Center];
    let rows: Vec<[String; 4]> = report
        .results
        .iter()
        .map(|r| {
            [
                format!("{}/{}", report.suite, r.params.name()),
                r.params.case.to_string(),
                format_ms(r.elapsed_ms),
                r.outcome.status().to_string(),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let header = headers
        .iter()
        .zip(widths)
        .zip(aligns)
        .map(|((h, w), a)| format_cell(h, w, a))
        .collect::<Vec<_>>()
        .join(" | ");
    println!("{}", border(&widths));
    println!("| {} |", header);
    println!("{}", border(&widths));
    for row in &rows {
        let cells = row
            .iter()
            .zip(widths)
            .zip(aligns)
            .map(|((c, w), a)| format_cell(c, w, a))
            .collect::<Vec<_>>()
            .join(" | ");
        println!("| {} |", cells);
    }
    println!("{}", border(&widths));
}
