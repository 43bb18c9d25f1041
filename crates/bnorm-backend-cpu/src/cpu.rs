//! Host emulation of a device batch-norm library.
//!
//! Buffers hold raw byte images in the layout of their descriptor, exactly as a device would.
//! Kernels gather inputs into logically ordered `f64` vectors, reduce with two-pass sums and
//! scatter results back, applying the `alpha`/`beta` blend of the call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use bnorm::arch::HOST_ARCH;
use bnorm::backend::spec::{
    BackendError, BackendResult, BackwardArgs, BatchNormBackend, BnMode, ForwardInferenceArgs,
    ForwardTrainingArgs, ParamDescs,
};
use bnorm::tensor::element::{decode_f64, encode_f64};
use bnorm::tensor::TensorDesc;

static NEXT_BACKEND_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct CpuBuffer {
    owner: u64,
    desc: TensorDesc,
    bytes: RwLock<Vec<u8>>,
}

impl CpuBuffer {
    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }
}

/// Host-emulated device. Each instance is a separate device; buffers cannot cross instances.
#[derive(Debug)]
pub struct CpuBatchNormBackend {
    id: u64,
    arch: String,
}

impl CpuBatchNormBackend {
    pub fn new() -> Self {
        Self::with_arch(HOST_ARCH)
    }

    /// Emulates a device reporting `arch` (e.g. `"gfx90a:xnack-"`).
    pub fn with_arch(arch: impl Into<String>) -> Self {
        Self {
            id: NEXT_BACKEND_ID.fetch_add(1, Ordering::Relaxed),
            arch: arch.into(),
        }
    }

    fn check_owner(&self, buffer: &CpuBuffer) -> BackendResult<()> {
        if buffer.owner != self.id {
            return Err(BackendError::handle_mismatch(format!("cpu#{}", self.id)));
        }
        Ok(())
    }

    /// Call descriptors must describe the buffer exactly as it was allocated.
    fn check_buffer(&self, buffer: &CpuBuffer, desc: &TensorDesc, role: &str) -> BackendResult<()> {
        self.check_owner(buffer)?;
        if buffer.desc != *desc {
            return Err(BackendError::bad_parm(format!(
                "{role}: descriptor {desc} does not match buffer {}",
                buffer.desc
            )));
        }
        Ok(())
    }

    /// Reads `buffer` as described by the call descriptor `desc`, in logical NCHW order.
    fn gather(
        &self,
        buffer: &CpuBuffer,
        desc: &TensorDesc,
        role: &str,
    ) -> BackendResult<Vec<f64>> {
        self.check_buffer(buffer, desc, role)?;
        let bytes = buffer.bytes.read().unwrap_or_else(PoisonError::into_inner);
        let storage = decode_f64(desc.dtype, &bytes)
            .map_err(|err| BackendError::execution(format!("{role}: {err}")))?;
        Ok(desc
            .coords()
            .map(|[n, c, h, w]| storage[desc.offset(n, c, h, w)])
            .collect())
    }

    /// Writes logically ordered `values` into `buffer` as `alpha * value + beta * prior`.
    fn scatter(
        &self,
        buffer: &CpuBuffer,
        desc: &TensorDesc,
        role: &str,
        values: &[f64],
        alpha: f64,
        beta: f64,
    ) -> BackendResult<()> {
        let prior = if beta != 0.0 {
            Some(self.gather(buffer, desc, role)?)
        } else {
            self.check_buffer(buffer, desc, role)?;
            None
        };
        let mut storage = vec![0.0; desc.num_elements()];
        for (i, [n, c, h, w]) in desc.coords().enumerate() {
            let mut value = alpha * values[i];
            if let Some(prior) = &prior {
                value += beta * prior[i];
            }
            storage[desc.offset(n, c, h, w)] = value;
        }
        self.write(buffer, &encode_f64(desc.dtype, &storage))
    }
}

impl Default for CpuBatchNormBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics slot of the logical element `i` of an input with extent `dims`.
#[inline]
fn slot_of(mode: BnMode, dims: [usize; 4], i: usize) -> usize {
    let [_, c, h, w] = dims;
    let chw = c * h * w;
    match mode {
        BnMode::Spatial => (i % chw) / (h * w),
        BnMode::PerActivation => i % chw,
    }
}

fn slot_count(mode: BnMode, dims: [usize; 4]) -> usize {
    mode.param_dims(dims).iter().product()
}

fn two_pass_stats(mode: BnMode, dims: [usize; 4], x: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let slots = slot_count(mode, dims);
    let m = mode.reduction_count(dims) as f64;
    let mut mean = vec![0.0; slots];
    for (i, v) in x.iter().enumerate() {
        mean[slot_of(mode, dims, i)] += v;
    }
    mean.iter_mut().for_each(|s| *s /= m);
    let mut var = vec![0.0; slots];
    for (i, v) in x.iter().enumerate() {
        let slot = slot_of(mode, dims, i);
        let d = v - mean[slot];
        var[slot] += d * d;
    }
    var.iter_mut().for_each(|s| *s /= m);
    (mean, var)
}

fn check_data_desc(x_desc: &TensorDesc, other: &TensorDesc, role: &str) -> BackendResult<()> {
    if other.dims != x_desc.dims {
        return Err(BackendError::bad_parm(format!(
            "{role} dims {:?} do not match x dims {:?}",
            other.dims, x_desc.dims
        )));
    }
    Ok(())
}

fn check_param_descs(
    mode: BnMode,
    x_desc: &TensorDesc,
    descs: &[TensorDesc],
) -> BackendResult<()> {
    let expected = mode.param_dims(x_desc.dims);
    for desc in descs {
        if desc.dims != expected {
            return Err(BackendError::bad_parm(format!(
                "{mode} parameter descriptor {desc} must have dims {expected:?}"
            )));
        }
    }
    Ok(())
}

fn check_epsilon(epsilon: f64) -> BackendResult<()> {
    if !epsilon.is_finite() || epsilon < 0.0 {
        return Err(BackendError::bad_parm(format!("invalid epsilon {epsilon}")));
    }
    Ok(())
}

fn require_shared(op: &str, descs: &ParamDescs<'_>) -> BackendResult<()> {
    if !descs.is_shared() {
        return Err(BackendError::bad_parm(format!(
            "{op} takes one shared scale/bias/mean/variance descriptor"
        )));
    }
    Ok(())
}

fn require_split(op: &str, descs: &ParamDescs<'_>) -> BackendResult<()> {
    if descs.is_shared() {
        return Err(BackendError::bad_parm(format!(
            "{op} takes separate scale, bias, mean and variance descriptors"
        )));
    }
    Ok(())
}

impl CpuBatchNormBackend {
    fn run_inference(&self, args: &ForwardInferenceArgs<'_, CpuBuffer>) -> BackendResult<()> {
        let mode = args.mode;
        let x_desc = args.x_desc;
        check_epsilon(args.epsilon)?;
        check_data_desc(x_desc, args.y_desc, "y")?;
        let [scale_desc, bias_desc, mean_desc, var_desc] = args.param_descs.resolve(x_desc.dtype);
        check_param_descs(mode, x_desc, &[scale_desc, bias_desc, mean_desc, var_desc])?;

        let x = self.gather(args.x, x_desc, "x")?;
        let scale = self.gather(args.scale, &scale_desc, "scale")?;
        let bias = self.gather(args.bias, &bias_desc, "bias")?;
        let mean = self.gather(args.estimated_mean, &mean_desc, "estimated mean")?;
        let var = self.gather(args.estimated_variance, &var_desc, "estimated variance")?;

        let dims = x_desc.dims;
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let s = slot_of(mode, dims, i);
                let inv_std = 1.0 / (var[s] + args.epsilon).sqrt();
                scale[s] * ((v - mean[s]) * inv_std) + bias[s]
            })
            .collect();
        self.scatter(args.y, args.y_desc, "y", &y, args.alpha, args.beta)
    }

    fn run_training(&self, args: &ForwardTrainingArgs<'_, CpuBuffer>) -> BackendResult<()> {
        let mode = args.mode;
        let x_desc = args.x_desc;
        check_epsilon(args.epsilon)?;
        check_data_desc(x_desc, args.y_desc, "y")?;
        let [scale_desc, bias_desc, mean_desc, var_desc] = args.param_descs.resolve(x_desc.dtype);
        check_param_descs(mode, x_desc, &[scale_desc, bias_desc, mean_desc, var_desc])?;

        let dims = x_desc.dims;
        let x = self.gather(args.x, x_desc, "x")?;
        let scale = self.gather(args.scale, &scale_desc, "scale")?;
        let bias = self.gather(args.bias, &bias_desc, "bias")?;
        let (mean, var) = two_pass_stats(mode, dims, &x);
        let inv_std: Vec<f64> = var.iter().map(|v| 1.0 / (v + args.epsilon).sqrt()).collect();

        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let s = slot_of(mode, dims, i);
                scale[s] * ((v - mean[s]) * inv_std[s]) + bias[s]
            })
            .collect();
        self.scatter(args.y, args.y_desc, "y", &y, args.alpha, args.beta)?;

        if let Some(running) = &args.running {
            let f = running.average_factor;
            let m = mode.reduction_count(dims) as f64;
            let adjust = if m > 1.0 { m / (m - 1.0) } else { 1.0 };
            let prior_mean = self.gather(running.mean, &mean_desc, "running mean")?;
            let prior_var = self.gather(running.variance, &var_desc, "running variance")?;
            let next_mean: Vec<f64> = prior_mean
                .iter()
                .zip(&mean)
                .map(|(p, b)| (1.0 - f) * p + f * b)
                .collect();
            let next_var: Vec<f64> = prior_var
                .iter()
                .zip(&var)
                .map(|(p, b)| (1.0 - f) * p + f * b * adjust)
                .collect();
            self.scatter(running.mean, &mean_desc, "running mean", &next_mean, 1.0, 0.0)?;
            self.scatter(running.variance, &var_desc, "running variance", &next_var, 1.0, 0.0)?;
        }
        if let Some(saved) = &args.saved {
            self.scatter(saved.mean, &mean_desc, "saved mean", &mean, 1.0, 0.0)?;
            self.scatter(
                saved.inv_variance,
                &var_desc,
                "saved inverse variance",
                &inv_std,
                1.0,
                0.0,
            )?;
        }
        Ok(())
    }

    fn run_backward(&self, args: &BackwardArgs<'_, CpuBuffer>) -> BackendResult<()> {
        let mode = args.mode;
        let x_desc = args.x_desc;
        check_epsilon(args.epsilon)?;
        check_data_desc(x_desc, args.dy_desc, "dy")?;
        check_data_desc(x_desc, args.dx_desc, "dx")?;
        let [scale_desc, _, mean_desc, var_desc] = args.param_descs.resolve(x_desc.dtype);
        let grad_desc = args.param_descs.gradient_desc(x_desc.dtype);
        check_param_descs(mode, x_desc, &[scale_desc, mean_desc, var_desc, grad_desc])?;

        let dims = x_desc.dims;
        let x = self.gather(args.x, x_desc, "x")?;
        let dy = self.gather(args.dy, args.dy_desc, "dy")?;
        let scale = self.gather(args.scale, &scale_desc, "scale")?;
        let (mean, inv_std) = match &args.saved {
            Some(saved) => (
                self.gather(saved.mean, &mean_desc, "saved mean")?,
                self.gather(saved.inv_variance, &var_desc, "saved inverse variance")?,
            ),
            None => {
                let (mean, var) = two_pass_stats(mode, dims, &x);
                let inv_std = var.iter().map(|v| 1.0 / (v + args.epsilon).sqrt()).collect();
                (mean, inv_std)
            }
        };

        let slots = slot_count(mode, dims);
        let m = mode.reduction_count(dims) as f64;
        let x_hat: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let s = slot_of(mode, dims, i);
                (v - mean[s]) * inv_std[s]
            })
            .collect();
        let mut dbias = vec![0.0; slots];
        let mut dscale = vec![0.0; slots];
        for (i, (&g, &xh)) in dy.iter().zip(&x_hat).enumerate() {
            let s = slot_of(mode, dims, i);
            dbias[s] += g;
            dscale[s] += g * xh;
        }
        let dx: Vec<f64> = dy
            .iter()
            .zip(&x_hat)
            .enumerate()
            .map(|(i, (&g, &xh))| {
                let s = slot_of(mode, dims, i);
                scale[s] * inv_std[s] / m * (m * g - dbias[s] - xh * dscale[s])
            })
            .collect();

        self.scatter(
            args.dx,
            args.dx_desc,
            "dx",
            &dx,
            args.alpha_data_diff,
            args.beta_data_diff,
        )?;
        self.scatter(
            args.dscale,
            &grad_desc,
            "dscale",
            &dscale,
            args.alpha_param_diff,
            args.beta_param_diff,
        )?;
        self.scatter(
            args.dbias,
            &grad_desc,
            "dbias",
            &dbias,
            args.alpha_param_diff,
            args.beta_param_diff,
        )
    }
}

impl BatchNormBackend for CpuBatchNormBackend {
    type Buffer = CpuBuffer;

    fn backend_name(&self) -> &str {
        "cpu"
    }

    fn device_name(&self) -> String {
        format!("host emulation #{}", self.id)
    }

    fn device_arch(&self) -> String {
        self.arch.clone()
    }

    fn upload(&self, desc: &TensorDesc, bytes: &[u8]) -> BackendResult<Self::Buffer> {
        if bytes.len() != desc.size_in_bytes() {
            return Err(BackendError::bad_parm(format!(
                "upload of {} bytes into {desc} ({} bytes)",
                bytes.len(),
                desc.size_in_bytes()
            )));
        }
        log::trace!("cpu#{}: upload {desc}", self.id);
        Ok(CpuBuffer {
            owner: self.id,
            desc: *desc,
            bytes: RwLock::new(bytes.to_vec()),
        })
    }

    fn write(&self, buffer: &Self::Buffer, bytes: &[u8]) -> BackendResult<()> {
        self.check_owner(buffer)?;
        if bytes.len() != buffer.desc.size_in_bytes() {
            return Err(BackendError::bad_parm(format!(
                "write of {} bytes into {} ({} bytes)",
                bytes.len(),
                buffer.desc,
                buffer.desc.size_in_bytes()
            )));
        }
        let mut storage = buffer.bytes.write().unwrap_or_else(PoisonError::into_inner);
        storage.copy_from_slice(bytes);
        Ok(())
    }

    fn read(&self, buffer: &Self::Buffer) -> BackendResult<Vec<u8>> {
        self.check_owner(buffer)?;
        Ok(buffer
            .bytes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn forward_inference(&self, args: ForwardInferenceArgs<'_, CpuBuffer>) -> BackendResult<()> {
        log::trace!("cpu#{}: forward_inference {} {}", self.id, args.mode, args.x_desc);
        require_shared("forward_inference", &args.param_descs)?;
        self.run_inference(&args)
    }

    fn forward_inference_v2(
        &self,
        args: ForwardInferenceArgs<'_, CpuBuffer>,
    ) -> BackendResult<()> {
        log::trace!("cpu#{}: forward_inference_v2 {} {}", self.id, args.mode, args.x_desc);
        require_split("forward_inference_v2", &args.param_descs)?;
        self.run_inference(&args)
    }

    fn forward_training(&self, args: ForwardTrainingArgs<'_, CpuBuffer>) -> BackendResult<()> {
        log::trace!("cpu#{}: forward_training {} {}", self.id, args.mode, args.x_desc);
        require_shared("forward_training", &args.param_descs)?;
        self.run_training(&args)
    }

    fn forward_training_v2(
        &self,
        args: ForwardTrainingArgs<'_, CpuBuffer>,
    ) -> BackendResult<()> {
        log::trace!("cpu#{}: forward_training_v2 {} {}", self.id, args.mode, args.x_desc);
        require_split("forward_training_v2", &args.param_descs)?;
        self.run_training(&args)
    }

    fn backward(&self, args: BackwardArgs<'_, CpuBuffer>) -> BackendResult<()> {
        log::trace!("cpu#{}: backward {} {}", self.id, args.mode, args.x_desc);
        require_shared("backward", &args.param_descs)?;
        self.run_backward(&args)
    }

    fn backward_v2(&self, args: BackwardArgs<'_, CpuBuffer>) -> BackendResult<()> {
        log::trace!("cpu#{}: backward_v2 {} {}", self.id, args.mode, args.x_desc);
        require_split("backward_v2", &args.param_descs)?;
        self.run_backward(&args)
    }
}
