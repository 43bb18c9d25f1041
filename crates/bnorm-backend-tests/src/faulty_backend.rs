use std::sync::atomic::{AtomicUsize, Ordering};

use bnorm::backend::spec::{
    BackendError, BackendResult, BackwardArgs, ForwardInferenceArgs, ForwardTrainingArgs,
};
use bnorm::tensor::element::{decode_f64, encode_f64};
use bnorm::{BatchNormBackend, TensorDesc};

/// Misbehaviour injected by [`FaultyBackend`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fault {
    None,
    /// Every batch-norm call returns an execution error.
    FailCalls,
    /// Calls report success without touching any output buffer.
    SkipWrites,
    /// After a successful call, adds `delta` to storage element `index` of the primary output
    /// (`y` for forward calls, `dx` for backward).
    PerturbOutput { index: usize, delta: f64 },
}

/// Test-only wrapper around a real backend that injects faults and counts device traffic.
pub struct FaultyBackend<B: BatchNormBackend> {
    inner: B,
    fault: Fault,
    arch: Option<String>,
    uploads: AtomicUsize,
    calls: AtomicUsize,
}

impl<B: BatchNormBackend> FaultyBackend<B> {
    pub fn new(inner: B, fault: Fault) -> Self {
        Self {
            inner,
            fault,
            arch: None,
            uploads: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Reports `arch` instead of the wrapped device's architecture.
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Runs `call` under the configured fault, then perturbs `output` if requested.
    fn intercept(
        &self,
        op: &'static str,
        output: (&B::Buffer, &TensorDesc),
        call: impl FnOnce() -> BackendResult<()>,
    ) -> BackendResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fault {
            Fault::None => call(),
            Fault::FailCalls => Err(BackendError::execution(format!("injected failure in {op}"))),
            Fault::SkipWrites => Ok(()),
            Fault::PerturbOutput { index, delta } => {
                call()?;
                let (buffer, desc) = output;
                let bytes = self.inner.read(buffer)?;
                let mut values = decode_f64(desc.dtype, &bytes)
                    .map_err(|err| BackendError::execution(err.to_string()))?;
                if let Some(value) = values.get_mut(index) {
                    *value += delta;
                }
                self.inner.write(buffer, &encode_f64(desc.dtype, &values))
            }
        }
    }
}

impl<B: BatchNormBackend> BatchNormBackend for FaultyBackend<B> {
    type Buffer = B::Buffer;

    fn backend_name(&self) -> &str {
        self.inner.backend_name()
    }

    fn device_name(&self) -> String {
        format!("faulty {}", self.inner.device_name())
    }

    fn device_arch(&self) -> String {
        self.arch
            .clone()
            .unwrap_or_else(|| self.inner.device_arch())
    }

    fn upload(&self, desc: &TensorDesc, bytes: &[u8]) -> BackendResult<Self::Buffer> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.inner.upload(desc, bytes)
    }

    fn write(&self, buffer: &Self::Buffer, bytes: &[u8]) -> BackendResult<()> {
        self.inner.write(buffer, bytes)
    }

    fn read(&self, buffer: &Self::Buffer) -> BackendResult<Vec<u8>> {
        self.inner.read(buffer)
    }

    fn forward_inference(&self, args: ForwardInferenceArgs<'_, B::Buffer>) -> BackendResult<()> {
        let output = (args.y, args.y_desc);
        self.intercept("forward_inference", output, || {
            self.inner.forward_inference(args)
        })
    }

    fn forward_inference_v2(
        &self,
        args: ForwardInferenceArgs<'_, B::Buffer>,
    ) -> BackendResult<()> {
        let output = (args.y, args.y_desc);
        self.intercept("forward_inference_v2", output, || {
            self.inner.forward_inference_v2(args)
        })
    }

    fn forward_training(&self, args: ForwardTrainingArgs<'_, B::Buffer>) -> BackendResult<()> {
        let output = (args.y, args.y_desc);
        self.intercept("forward_training", output, || {
            self.inner.forward_training(args)
        })
    }

    fn forward_training_v2(&self, args: ForwardTrainingArgs<'_, B::Buffer>) -> BackendResult<()> {
        let output = (args.y, args.y_desc);
        self.intercept("forward_training_v2", output, || {
            self.inner.forward_training_v2(args)
        })
    }

    fn backward(&self, args: BackwardArgs<'_, B::Buffer>) -> BackendResult<()> {
        let output = (args.dx, args.dx_desc);
        self.intercept("backward", output, || self.inner.backward(args))
    }

    fn backward_v2(&self, args: BackwardArgs<'_, B::Buffer>) -> BackendResult<()> {
        let output = (args.dx, args.dx_desc);
        self.intercept("backward_v2", output, || self.inner.backward_v2(args))
    }
}
