//! Streaming batch statistics.

use anyhow::{ensure, Result};

use crate::backend::spec::BnMode;
use crate::tensor::TensorRead;

/// Welford running mean and sum of squared deviations.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Welford {
    count: usize,
    mean: f64,
    m2: f64,
}

impl Welford {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Biased (population) variance; zero for an empty accumulator.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }
}

/// Per-slot batch mean and biased variance of an input tensor.
///
/// Slots are addressed by parameter coordinate (`[0, c, 0, 0]` or `[0, c, h, w]`) and stored in
/// logical NCHW order of the parameter extent.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStats {
    pub mode: BnMode,
    pub param_dims: [usize; 4],
    /// Number of input elements reduced into each slot.
    pub count: usize,
    pub mean: Vec<f64>,
    pub variance: Vec<f64>,
}

impl BatchStats {
    #[inline]
    pub fn slot(&self, c: usize, h: usize, w: usize) -> usize {
        slot_index(self.mode, self.param_dims, c, h, w)
    }
}

#[inline]
pub(crate) fn slot_index(
    mode: BnMode,
    param_dims: [usize; 4],
    c: usize,
    h: usize,
    w: usize,
) -> usize {
    let [_, pc, ph, pw] = mode.param_coords(c, h, w);
    (pc * param_dims[2] + ph) * param_dims[3] + pw
}

pub fn batch_statistics(mode: BnMode, x: &dyn TensorRead) -> Result<BatchStats> {
    let desc = *x.desc();
    ensure!(
        desc.num_elements() > 0,
        "cannot compute statistics of an empty tensor"
    );
    let param_dims = mode.param_dims(desc.dims);
    let slots: usize = param_dims.iter().product();
    let mut acc = vec![Welford::default(); slots];
    for [n, c, h, w] in desc.coords() {
        acc[slot_index(mode, param_dims, c, h, w)].push(x.at(n, c, h, w));
    }
    Ok(BatchStats {
        mode,
        param_dims,
        count: mode.reduction_count(desc.dims),
        mean: acc.iter().map(Welford::mean).collect(),
        variance: acc.iter().map(Welford::variance).collect(),
    })
}
