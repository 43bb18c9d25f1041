//! Batch-norm problem configurations and the two standard networks.

use std::fmt;

use anyhow::{ensure, Result};

use crate::backend::spec::BnMode;

pub const DEFAULT_EPSILON: f64 = 1e-5;
pub const DEFAULT_AVERAGE_FACTOR: f64 = 0.1;

/// One batch-norm problem: input extent, statistics mode and numeric constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BnTestCase {
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
    pub mode: BnMode,
    pub epsilon: f64,
    /// Exponential average factor applied to running statistics.
    pub average_factor: f64,
}

impl BnTestCase {
    pub const fn new(n: usize, c: usize, h: usize, w: usize, mode: BnMode) -> Self {
        BnTestCase {
            n,
            c,
            h,
            w,
            mode,
            epsilon: DEFAULT_EPSILON,
            average_factor: DEFAULT_AVERAGE_FACTOR,
        }
    }

    pub const fn dims(&self) -> [usize; 4] {
        [self.n, self.c, self.h, self.w]
    }

    pub const fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Rejects empty extents and constants the reference cannot evaluate.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.dims().iter().all(|&d| d > 0),
            "batch-norm case {} has an empty dimension",
            self
        );
        ensure!(
            self.epsilon.is_finite() && self.epsilon > 0.0,
            "batch-norm case {} needs a positive epsilon",
            self
        );
        ensure!(
            (0.0..=1.0).contains(&self.average_factor),
            "batch-norm case {} has average factor outside [0, 1]",
            self
        );
        Ok(())
    }
}

impl fmt::Display for BnTestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "N{} C{} H{} W{} {} eps={:e} f={}",
            self.n, self.c, self.h, self.w, self.mode, self.epsilon, self.average_factor
        )
    }
}

/// Standard case lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Small,
    Large,
}

impl Network {
    pub const fn as_str(self) -> &'static str {
        match self {
            Network::Small => "small",
            Network::Large => "large",
        }
    }

    pub fn cases(self) -> Vec<BnTestCase> {
        match self {
            Network::Small => network_small(),
            Network::Large => network_large(),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quick configurations, including degenerate 1x1 spatial extents.
pub fn network_small() -> Vec<BnTestCase> {
    vec![
        BnTestCase::new(2, 3, 4, 4, BnMode::Spatial),
        BnTestCase::new(4, 8, 5, 5, BnMode::Spatial),
        BnTestCase::new(3, 4, 3, 3, BnMode::PerActivation),
        BnTestCase::new(16, 8, 8, 8, BnMode::Spatial),
        BnTestCase::new(8, 2, 1, 1, BnMode::PerActivation),
    ]
}

/// Convolution-network sized configurations.
pub fn network_large() -> Vec<BnTestCase> {
    vec![
        BnTestCase::new(32, 16, 28, 28, BnMode::Spatial),
        BnTestCase::new(16, 32, 14, 14, BnMode::Spatial),
        BnTestCase::new(8, 64, 7, 7, BnMode::PerActivation),
        BnTestCase::new(64, 8, 6, 6, BnMode::Spatial),
    ]
}
