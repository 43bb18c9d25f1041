//! Tolerance resolution and element-wise tensor comparison.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::HarnessError;

/// Mismatching elements kept per report.
pub const MAX_REPORTED_MISMATCHES: usize = 8;

/// An element passes when `|actual - expected| <= atol + rtol * max(|actual|, |expected|)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub atol: f64,
    pub rtol: f64,
}

impl Tolerance {
    pub const fn absolute(atol: f64) -> Self {
        Tolerance { atol, rtol: 0.0 }
    }

    fn threshold(&self, expected: f64, actual: f64) -> f64 {
        self.atol + self.rtol * expected.abs().max(actual.abs())
    }

    fn apply(&mut self, overrides: &ToleranceOverride) {
        if let Some(atol) = overrides.atol {
            self.atol = atol;
        }
        if let Some(rtol) = overrides.rtol {
            self.rtol = rtol;
        }
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "atol={:e} rtol={:e}", self.atol, self.rtol)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ToleranceOverride {
    #[serde(default)]
    pub atol: Option<f64>,
    #[serde(default)]
    pub rtol: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToleranceRule {
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub atol: Option<f64>,
    #[serde(default)]
    pub rtol: Option<f64>,
}

impl ToleranceRule {
    fn overrides(&self) -> ToleranceOverride {
        ToleranceOverride {
            atol: self.atol,
            rtol: self.rtol,
        }
    }
}

/// Externally supplied tolerance overrides.
///
/// ```json
/// { "default": { "atol": 1e-3 },
///   "rules": [ { "backend": "cpu", "test": "bwd_fp16_*", "atol": 1e-3 } ] }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToleranceConfig {
    #[serde(default)]
    pub default: Option<ToleranceOverride>,
    #[serde(default)]
    pub rules: Vec<ToleranceRule>,
}

impl ToleranceConfig {
    /// Default location of the override file, relative to the workspace root.
    pub fn default_path() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../configs/bn_tolerance.json")
    }

    pub fn parse(path: &Path, contents: &str) -> Result<Self, HarnessError> {
        serde_json::from_str(contents).map_err(|source| HarnessError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let contents = fs::read_to_string(path).map_err(|source| HarnessError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &contents)
    }

    /// Loads `BNORM_TOLERANCE_CONFIG` if set, else the default file if it exists, else nothing.
    pub fn from_env() -> Result<Self, HarnessError> {
        if let Some(path) = bnorm::env::tolerance_config_path() {
            return Self::load(&path);
        }
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Applies overrides with precedence default < backend < test < backend+test.
    /// Within one class the last matching rule wins.
    pub fn resolve(&self, backend: &str, test_name: &str, fallback: Tolerance) -> Tolerance {
        let mut resolved = fallback;
        if let Some(defaults) = &self.default {
            resolved.apply(defaults);
        }

        let mut backend_rule = None;
        let mut test_rule = None;
        let mut backend_test_rule = None;
        for rule in &self.rules {
            let backend_match = rule
                .backend
                .as_deref()
                .is_some_and(|pattern| matches_pattern(backend, pattern));
            let test_match = rule
                .test
                .as_deref()
                .is_some_and(|pattern| matches_pattern(test_name, pattern));
            match (backend_match, test_match) {
                (true, true) => backend_test_rule = Some(rule.overrides()),
                (false, true) if rule.backend.is_none() => test_rule = Some(rule.overrides()),
                (true, false) if rule.test.is_none() => backend_rule = Some(rule.overrides()),
                _ => {}
            }
        }

        for rule in [backend_rule, test_rule, backend_test_rule]
            .iter()
            .flatten()
        {
            resolved.apply(rule);
        }
        resolved
    }
}

/// Glob match supporting `*` wildcards only.
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return value == pattern;
    }
    let parts: Vec<&str> = pattern.split('*').filter(|part| !part.is_empty()).collect();
    if parts.is_empty() {
        return true;
    }
    let mut offset = 0usize;
    let mut start_index = 0usize;
    if !pattern.starts_with('*') {
        let first = parts[0];
        if !value.starts_with(first) {
            return false;
        }
        offset = first.len();
        start_index = 1;
    }
    for part in &parts[start_index..] {
        match value[offset..].find(part) {
            Some(found) => offset += found + part.len(),
            None => return false,
        }
    }
    if !pattern.ends_with('*') {
        let last = parts.last().copied().unwrap_or("");
        return value.ends_with(last);
    }
    true
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    pub index: usize,
    pub expected: f64,
    pub actual: f64,
    pub diff: f64,
}

/// Outcome of comparing one device tensor against its reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonReport {
    pub tensor: String,
    pub len: usize,
    pub expected_len: usize,
    pub tolerance: Tolerance,
    /// Count of every mismatching element.
    pub mismatches: usize,
    /// The first [`MAX_REPORTED_MISMATCHES`] mismatches in index order.
    pub first_mismatches: Vec<Mismatch>,
    pub max_abs_diff: f64,
    pub rms_error: f64,
    pub non_finite_actual: usize,
    pub non_finite_expected: usize,
    /// Device tensor is entirely zero while the reference is not.
    pub all_zero: bool,
}

impl ComparisonReport {
    pub fn passed(&self) -> bool {
        self.len == self.expected_len
            && self.mismatches == 0
            && self.non_finite_actual == 0
            && self.non_finite_expected == 0
            && !self.all_zero
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len != self.expected_len {
            return write!(
                f,
                "{}: length mismatch (device {}, reference {})",
                self.tensor, self.len, self.expected_len
            );
        }
        write!(
            f,
            "{}: {}/{} mismatches ({}), max_abs_diff={:e}, rms={:e}",
            self.tensor,
            self.mismatches,
            self.len,
            self.tolerance,
            self.max_abs_diff,
            self.rms_error
        )?;
        if self.non_finite_actual > 0 {
            write!(f, ", {} non-finite device values", self.non_finite_actual)?;
        }
        if self.non_finite_expected > 0 {
            write!(f, ", {} non-finite reference values", self.non_finite_expected)?;
        }
        if self.all_zero {
            write!(f, ", device output is all zero")?;
        }
        for m in &self.first_mismatches {
            write!(
                f,
                "\n  [{}] expected {} actual {} diff {:e}",
                m.index, m.expected, m.actual, m.diff
            )?;
        }
        Ok(())
    }
}

/// Compares logically ordered values element-wise.
pub fn compare_tensor(
    tensor: &str,
    expected: &[f64],
    actual: &[f64],
    tolerance: Tolerance,
) -> ComparisonReport {
    let mut report = ComparisonReport {
        tensor: tensor.to_string(),
        len: actual.len(),
        expected_len: expected.len(),
        tolerance,
        mismatches: 0,
        first_mismatches: Vec::new(),
        max_abs_diff: 0.0,
        rms_error: 0.0,
        non_finite_actual: 0,
        non_finite_expected: 0,
        all_zero: false,
    };
    if actual.len() != expected.len() {
        return report;
    }

    let mut sum_sq = 0.0;
    let mut finite_pairs = 0usize;
    for (index, (&e, &a)) in expected.iter().zip(actual).enumerate() {
        let finite = e.is_finite() && a.is_finite();
        if !a.is_finite() {
            report.non_finite_actual += 1;
        }
        if !e.is_finite() {
            report.non_finite_expected += 1;
        }
        let diff = (a - e).abs();
        if finite {
            sum_sq += diff * diff;
            finite_pairs += 1;
            report.max_abs_diff = report.max_abs_diff.max(diff);
        }
        if !finite || diff > tolerance.threshold(e, a) {
            report.mismatches += 1;
            if report.first_mismatches.len() < MAX_REPORTED_MISMATCHES {
                report.first_mismatches.push(Mismatch {
                    index,
                    expected: e,
                    actual: a,
                    diff,
                });
            }
        }
    }
    if finite_pairs > 0 {
        report.rms_error = (sum_sq / finite_pairs as f64).sqrt();
    }
    report.all_zero = !actual.is_empty()
        && actual.iter().all(|&a| a == 0.0)
        && expected.iter().any(|&e| e != 0.0);
    report
}
