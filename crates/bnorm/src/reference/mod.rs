//! Host reference batch normalization.
//!
//! Every routine widens its inputs to `f64`, accumulates statistics with Welford's algorithm and
//! rounds results once when storing them into the destination tensors. Inputs and outputs are
//! addressed by logical coordinate, so any layout combination is accepted.
//!
//! Saved variance follows the device convention of storing the inverse standard deviation
//! `1 / sqrt(var + eps)`. Running variance is updated with the unbiased batch variance.

mod stats;

use anyhow::{ensure, Result};

use crate::backend::spec::BnMode;
use crate::tensor::{TensorRead, TensorWrite};

pub use stats::{batch_statistics, BatchStats, Welford};

use stats::slot_index;

/// Destination tensors of a forward-training step. The running tensors hold the prior running
/// statistics on entry and are updated in place.
pub struct TrainingOutputs<'a> {
    pub y: &'a mut dyn TensorWrite,
    pub saved_mean: &'a mut dyn TensorWrite,
    pub saved_inv_variance: &'a mut dyn TensorWrite,
    pub running_mean: &'a mut dyn TensorWrite,
    pub running_variance: &'a mut dyn TensorWrite,
}

/// Destination tensors of a backward step.
pub struct BackwardOutputs<'a> {
    pub dx: &'a mut dyn TensorWrite,
    pub dscale: &'a mut dyn TensorWrite,
    pub dbias: &'a mut dyn TensorWrite,
}

fn ensure_same_extent<T: TensorRead + ?Sized>(
    x: &dyn TensorRead,
    other: &T,
    role: &str,
) -> Result<()> {
    ensure!(
        other.desc().dims == x.desc().dims,
        "{role} dims {:?} do not match input dims {:?}",
        other.desc().dims,
        x.desc().dims
    );
    Ok(())
}

fn ensure_param_extent<T: TensorRead + ?Sized>(
    mode: BnMode,
    x: &dyn TensorRead,
    param: &T,
    role: &str,
) -> Result<()> {
    let expected = mode.param_dims(x.desc().dims);
    ensure!(
        param.desc().dims == expected,
        "{role} dims {:?} do not match {mode} parameter dims {expected:?}",
        param.desc().dims
    );
    Ok(())
}

#[inline]
fn param_at(mode: BnMode, t: &dyn TensorRead, c: usize, h: usize, w: usize) -> f64 {
    let [n, c, h, w] = mode.param_coords(c, h, w);
    t.at(n, c, h, w)
}

/// `y = scale * (x - mean) / sqrt(var + eps) + bias` with externally estimated statistics.
#[allow(clippy::too_many_arguments)]
pub fn forward_inference(
    mode: BnMode,
    x: &dyn TensorRead,
    scale: &dyn TensorRead,
    bias: &dyn TensorRead,
    estimated_mean: &dyn TensorRead,
    estimated_variance: &dyn TensorRead,
    epsilon: f64,
    y: &mut dyn TensorWrite,
) -> Result<()> {
    ensure_same_extent(x, &*y, "y")?;
    for (param, role) in [
        (scale, "scale"),
        (bias, "bias"),
        (estimated_mean, "estimated mean"),
        (estimated_variance, "estimated variance"),
    ] {
        ensure_param_extent(mode, x, param, role)?;
    }

    let desc = *x.desc();
    for [n, c, h, w] in desc.coords() {
        let mean = param_at(mode, estimated_mean, c, h, w);
        let inv_std = 1.0 / (param_at(mode, estimated_variance, c, h, w) + epsilon).sqrt();
        let x_hat = (x.at(n, c, h, w) - mean) * inv_std;
        let value = param_at(mode, scale, c, h, w) * x_hat + param_at(mode, bias, c, h, w);
        y.put(n, c, h, w, value);
    }
    Ok(())
}

/// Normalises with batch statistics and produces saved and running statistics.
pub fn forward_training(
    mode: BnMode,
    x: &dyn TensorRead,
    scale: &dyn TensorRead,
    bias: &dyn TensorRead,
    epsilon: f64,
    average_factor: f64,
    out: TrainingOutputs<'_>,
) -> Result<()> {
    ensure_same_extent(x, &*out.y, "y")?;
    ensure_param_extent(mode, x, scale, "scale")?;
    ensure_param_extent(mode, x, bias, "bias")?;
    ensure_param_extent(mode, x, &*out.saved_mean, "saved mean")?;
    ensure_param_extent(mode, x, &*out.saved_inv_variance, "saved inverse variance")?;
    ensure_param_extent(mode, x, &*out.running_mean, "running mean")?;
    ensure_param_extent(mode, x, &*out.running_variance, "running variance")?;

    let stats = batch_statistics(mode, x)?;
    let inv_std: Vec<f64> = stats
        .variance
        .iter()
        .map(|var| 1.0 / (var + epsilon).sqrt())
        .collect();

    let desc = *x.desc();
    for [n, c, h, w] in desc.coords() {
        let slot = stats.slot(c, h, w);
        let x_hat = (x.at(n, c, h, w) - stats.mean[slot]) * inv_std[slot];
        let value = param_at(mode, scale, c, h, w) * x_hat + param_at(mode, bias, c, h, w);
        out.y.put(n, c, h, w, value);
    }

    let m = stats.count as f64;
    let unbias = if stats.count > 1 { m / (m - 1.0) } else { 1.0 };
    let param_desc = *out.saved_mean.desc();
    for [_, c, h, w] in param_desc.coords() {
        let slot = slot_index(mode, stats.param_dims, c, h, w);
        let mean = stats.mean[slot];
        let var = stats.variance[slot];
        out.saved_mean.put(0, c, h, w, mean);
        out.saved_inv_variance.put(0, c, h, w, inv_std[slot]);

        let prior_mean = out.running_mean.at(0, c, h, w);
        let prior_var = out.running_variance.at(0, c, h, w);
        out.running_mean.put(
            0,
            c,
            h,
            w,
            (1.0 - average_factor) * prior_mean + average_factor * mean,
        );
        out.running_variance.put(
            0,
            c,
            h,
            w,
            (1.0 - average_factor) * prior_var + average_factor * var * unbias,
        );
    }
    Ok(())
}

/// Input, scale and bias gradients.
///
/// With `saved` statistics `(mean, inverse std)` from a forward-training step the routine uses
/// them verbatim; otherwise it recomputes batch statistics from `x` and `epsilon`.
pub fn backward(
    mode: BnMode,
    x: &dyn TensorRead,
    dy: &dyn TensorRead,
    scale: &dyn TensorRead,
    saved: Option<(&dyn TensorRead, &dyn TensorRead)>,
    epsilon: f64,
    out: BackwardOutputs<'_>,
) -> Result<()> {
    ensure_same_extent(x, dy, "dy")?;
    ensure_same_extent(x, &*out.dx, "dx")?;
    ensure_param_extent(mode, x, scale, "scale")?;
    ensure_param_extent(mode, x, &*out.dscale, "dscale")?;
    ensure_param_extent(mode, x, &*out.dbias, "dbias")?;

    let desc = *x.desc();
    let param_dims = mode.param_dims(desc.dims);
    let slots: usize = param_dims.iter().product();
    let m = mode.reduction_count(desc.dims) as f64;

    let (mean, inv_std) = match saved {
        Some((saved_mean, saved_inv_variance)) => {
            ensure_param_extent(mode, x, saved_mean, "saved mean")?;
            ensure_param_extent(mode, x, saved_inv_variance, "saved inverse variance")?;
            let mut mean = vec![0.0; slots];
            let mut inv_std = vec![0.0; slots];
            for [_, c, h, w] in saved_mean.desc().coords() {
                let slot = slot_index(mode, param_dims, c, h, w);
                mean[slot] = saved_mean.at(0, c, h, w);
                inv_std[slot] = saved_inv_variance.at(0, c, h, w);
            }
            (mean, inv_std)
        }
        None => {
            let stats = batch_statistics(mode, x)?;
            let inv_std = stats
                .variance
                .iter()
                .map(|var| 1.0 / (var + epsilon).sqrt())
                .collect();
            (stats.mean, inv_std)
        }
    };

    let mut dbias = vec![0.0; slots];
    let mut dscale = vec![0.0; slots];
    for [n, c, h, w] in desc.coords() {
        let slot = slot_index(mode, param_dims, c, h, w);
        let x_hat = (x.at(n, c, h, w) - mean[slot]) * inv_std[slot];
        let g = dy.at(n, c, h, w);
        dbias[slot] += g;
        dscale[slot] += g * x_hat;
    }

    for [n, c, h, w] in desc.coords() {
        let slot = slot_index(mode, param_dims, c, h, w);
        let x_hat = (x.at(n, c, h, w) - mean[slot]) * inv_std[slot];
        let coeff = param_at(mode, scale, c, h, w) * inv_std[slot] / m;
        let value = coeff * (m * dy.at(n, c, h, w) - dbias[slot] - x_hat * dscale[slot]);
        out.dx.put(n, c, h, w, value);
    }

    let param_desc = *out.dscale.desc();
    for [_, c, h, w] in param_desc.coords() {
        let slot = slot_index(mode, param_dims, c, h, w);
        out.dscale.put(0, c, h, w, dscale[slot]);
        out.dbias.put(0, c, h, w, dbias[slot]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout4D;
    use crate::tensor::Tensor;
    use rand::{rngs::StdRng, SeedableRng};

    fn filled(name: &str, dims: [usize; 4], value: f64) -> Tensor<f64> {
        let mut t = Tensor::zeros(name, dims, Layout4D::NCHW);
        t.fill(value);
        t
    }

    #[test]
    fn identity_parameters_normalise_input() {
        let dims = [4, 1, 1, 1];
        let p = [1, 1, 1, 1];
        let x = Tensor::from_vec(
            "x",
            crate::tensor::TensorDesc::new(crate::tensor::DType::F64, dims, Layout4D::NCHW),
            vec![1.0, 2.0, 3.0, 4.0],
        )
        .unwrap();
        let mut y = Tensor::<f64>::zeros("y", dims, Layout4D::NCHW);
        forward_inference(
            BnMode::Spatial,
            &x,
            &filled("scale", p, 1.0),
            &filled("bias", p, 0.0),
            &filled("mean", p, 2.5),
            &filled("var", p, 1.25),
            0.0,
            &mut y,
        )
        .unwrap();
        let expected = [-1.5, -0.5, 0.5, 1.5].map(|v: f64| v / 1.25f64.sqrt());
        for (got, want) in y.data().iter().zip(expected) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn training_updates_running_statistics() {
        let dims = [4, 1, 1, 1];
        let p = [1, 1, 1, 1];
        let x = Tensor::from_vec(
            "x",
            crate::tensor::TensorDesc::new(crate::tensor::DType::F64, dims, Layout4D::NCHW),
            vec![1.0, 2.0, 3.0, 4.0],
        )
        .unwrap();
        let mut y = Tensor::<f64>::zeros("y", dims, Layout4D::NCHW);
        let mut saved_mean = filled("saved_mean", p, f64::NAN);
        let mut saved_inv = filled("saved_inv", p, f64::NAN);
        let mut running_mean = filled("running_mean", p, 1.0);
        let mut running_var = filled("running_var", p, 2.0);
        forward_training(
            BnMode::Spatial,
            &x,
            &filled("scale", p, 2.0),
            &filled("bias", p, 0.5),
            1e-5,
            0.1,
            TrainingOutputs {
                y: &mut y,
                saved_mean: &mut saved_mean,
                saved_inv_variance: &mut saved_inv,
                running_mean: &mut running_mean,
                running_variance: &mut running_var,
            },
        )
        .unwrap();

        assert!((saved_mean.data()[0] - 2.5).abs() < 1e-12);
        assert!((saved_inv.data()[0] - 1.0 / (1.25f64 + 1e-5).sqrt()).abs() < 1e-12);
        assert!((running_mean.data()[0] - (0.9 + 0.25)).abs() < 1e-12);
        // unbiased variance 5/3
        assert!((running_var.data()[0] - (1.8 + 0.1 * 5.0 / 3.0)).abs() < 1e-12);
        let y_sum: f64 = y.data().iter().sum();
        assert!((y_sum - 4.0 * 0.5).abs() < 1e-9);
    }

    #[test]
    fn single_element_reduction_skips_unbiasing() {
        let dims = [1, 2, 1, 1];
        let p = [1, 2, 1, 1];
        let x = filled("x", dims, 3.0);
        let mut y = filled("y", dims, 0.0);
        let mut saved_mean = filled("saved_mean", p, 0.0);
        let mut saved_inv = filled("saved_inv", p, 0.0);
        let mut running_mean = filled("running_mean", p, 0.0);
        let mut running_var = filled("running_var", p, 1.0);
        forward_training(
            BnMode::PerActivation,
            &x,
            &filled("scale", p, 1.0),
            &filled("bias", p, 0.0),
            1e-5,
            0.5,
            TrainingOutputs {
                y: &mut y,
                saved_mean: &mut saved_mean,
                saved_inv_variance: &mut saved_inv,
                running_mean: &mut running_mean,
                running_variance: &mut running_var,
            },
        )
        .unwrap();
        assert_eq!(running_var.data(), &[0.5, 0.5]);
        assert_eq!(running_mean.data(), &[1.5, 1.5]);
        assert!(y.data().iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn backward_gradients_sum_to_zero_over_reduction() {
        let dims = [3, 2, 2, 2];
        let p = BnMode::Spatial.param_dims(dims);
        let mut rng = StdRng::seed_from_u64(11);
        let x: Tensor<f64> = Tensor::uniform("x", dims, Layout4D::NHWC, -1.0, 1.0, &mut rng);
        let dy: Tensor<f64> = Tensor::uniform("dy", dims, Layout4D::NHWC, -1.0, 1.0, &mut rng);
        let scale: Tensor<f64> = Tensor::uniform("scale", p, Layout4D::NHWC, 0.5, 1.5, &mut rng);
        let mut dx = Tensor::<f64>::zeros("dx", dims, Layout4D::NHWC);
        let mut dscale = Tensor::<f64>::zeros("dscale", p, Layout4D::NHWC);
        let mut dbias = Tensor::<f64>::zeros("dbias", p, Layout4D::NHWC);
        backward(
            BnMode::Spatial,
            &x,
            &dy,
            &scale,
            None,
            1e-5,
            BackwardOutputs {
                dx: &mut dx,
                dscale: &mut dscale,
                dbias: &mut dbias,
            },
        )
        .unwrap();

        for c in 0..2 {
            let mut sum = 0.0;
            let mut expected_dbias = 0.0;
            for n in 0..3 {
                for h in 0..2 {
                    for w in 0..2 {
                        sum += dx.at(n, c, h, w);
                        expected_dbias += dy.at(n, c, h, w);
                    }
                }
            }
            assert!(sum.abs() < 1e-10, "channel {c} dx sum {sum}");
            assert!((dbias.at(0, c, 0, 0) - expected_dbias).abs() < 1e-12);
        }
    }

    #[test]
    fn saved_statistics_match_recomputed_ones() {
        let dims = [5, 2, 1, 3];
        let mode = BnMode::PerActivation;
        let p = mode.param_dims(dims);
        let mut rng = StdRng::seed_from_u64(5);
        let x: Tensor<f64> = Tensor::uniform("x", dims, Layout4D::NCHW, -1.0, 1.0, &mut rng);
        let dy: Tensor<f64> = Tensor::uniform("dy", dims, Layout4D::NCHW, -1.0, 1.0, &mut rng);
        let scale: Tensor<f64> = Tensor::uniform("scale", p, Layout4D::NCHW, -1.0, 1.0, &mut rng);

        let stats = batch_statistics(mode, &x).unwrap();
        let mut saved_mean = Tensor::<f64>::zeros("saved_mean", p, Layout4D::NCHW);
        let mut saved_inv = Tensor::<f64>::zeros("saved_inv", p, Layout4D::NCHW);
        for [_, c, h, w] in saved_mean.desc().coords().collect::<Vec<_>>() {
            let slot = stats.slot(c, h, w);
            saved_mean.put(0, c, h, w, stats.mean[slot]);
            saved_inv.put(0, c, h, w, 1.0 / (stats.variance[slot] + 1e-5).sqrt());
        }

        let run = |saved: Option<(&dyn TensorRead, &dyn TensorRead)>| {
            let mut dx = Tensor::<f64>::zeros("dx", dims, Layout4D::NCHW);
            let mut dscale = Tensor::<f64>::zeros("dscale", p, Layout4D::NCHW);
            let mut dbias = Tensor::<f64>::zeros("dbias", p, Layout4D::NCHW);
            backward(
                mode,
                &x,
                &dy,
                &scale,
                saved,
                1e-5,
                BackwardOutputs {
                    dx: &mut dx,
                    dscale: &mut dscale,
                    dbias: &mut dbias,
                },
            )
            .unwrap();
            (dx, dscale, dbias)
        };
        let saved: (&dyn TensorRead, &dyn TensorRead) = (&saved_mean, &saved_inv);
        let (dx_a, dscale_a, dbias_a) = run(Some(saved));
        let (dx_b, dscale_b, dbias_b) = run(None);
        for (a, b) in dx_a.data().iter().zip(dx_b.data()) {
            assert!((a - b).abs() < 1e-12);
        }
        for (a, b) in dscale_a.data().iter().zip(dscale_b.data()) {
            assert!((a - b).abs() < 1e-12);
        }
        assert_eq!(dbias_a, dbias_b);
    }

    #[test]
    fn mismatched_parameter_extent_is_rejected() {
        let dims = [2, 3, 2, 2];
        let x = filled("x", dims, 0.0);
        let mut y = filled("y", dims, 0.0);
        let wrong = filled("scale", [1, 3, 2, 2], 1.0);
        let right = filled("bias", [1, 3, 1, 1], 0.0);
        let err = forward_inference(
            BnMode::Spatial,
            &x,
            &wrong,
            &right,
            &right,
            &right,
            1e-5,
            &mut y,
        )
        .unwrap_err();
        assert!(err.to_string().contains("scale dims"));
    }
}
