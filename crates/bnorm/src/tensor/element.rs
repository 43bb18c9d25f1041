//! Defines the scalar element trait implemented by host-side tensors.

use std::fmt::Debug;

use anyhow::{ensure, Result};
use bytemuck::Pod;
use half::{bf16, f16};

use super::dtype::DType;

/// Numeric behaviour required by batch-norm tensor storage.
///
/// All arithmetic happens in `f64`; elements only need lossless widening, rounding narrowing and
/// a quiet NaN used to poison output buffers.
pub trait Element: Copy + Default + Debug + PartialEq + Pod + Send + Sync + 'static {
    /// Dtype tag describing this element in descriptors.
    const DTYPE: DType;
    /// Rounds an `f64` to the nearest representable value.
    fn from_f64(v: f64) -> Self;
    /// Widens the element to `f64`.
    fn to_f64(self) -> f64;
    /// Quiet NaN sentinel.
    fn nan() -> Self;
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;

    fn from_f64(v: f64) -> Self {
        f16::from_f64(v)
    }

    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }

    fn nan() -> Self {
        f16::NAN
    }
}

impl Element for bf16 {
    const DTYPE: DType = DType::BF16;

    fn from_f64(v: f64) -> Self {
        bf16::from_f64(v)
    }

    fn to_f64(self) -> f64 {
        bf16::to_f64(self)
    }

    fn nan() -> Self {
        bf16::NAN
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    fn from_f64(v: f64) -> Self {
        v as f32
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn nan() -> Self {
        f32::NAN
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;

    fn from_f64(v: f64) -> Self {
        v
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn nan() -> Self {
        f64::NAN
    }
}

/// Serialises elements into their native-endian byte image.
pub fn encode<T: Element>(data: &[T]) -> Vec<u8> {
    bytemuck::cast_slice(data).to_vec()
}

/// Deserialises a byte image, rejecting partial trailing elements.
pub fn decode<T: Element>(bytes: &[u8]) -> Result<Vec<T>> {
    let size = T::DTYPE.size_in_bytes();
    ensure!(
        bytes.len() % size == 0,
        "byte length {} is not a multiple of {} element size {}",
        bytes.len(),
        T::DTYPE,
        size
    );
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

/// Decodes a byte image of runtime dtype `dtype` into widened values.
pub fn decode_f64(dtype: DType, bytes: &[u8]) -> Result<Vec<f64>> {
    fn widen<T: Element>(bytes: &[u8]) -> Result<Vec<f64>> {
        Ok(decode::<T>(bytes)?.into_iter().map(T::to_f64).collect())
    }
    match dtype {
        DType::F16 => widen::<f16>(bytes),
        DType::BF16 => widen::<bf16>(bytes),
        DType::F32 => widen::<f32>(bytes),
        DType::F64 => widen::<f64>(bytes),
    }
}

/// Rounds widened values to runtime dtype `dtype` and encodes them.
pub fn encode_f64(dtype: DType, values: &[f64]) -> Vec<u8> {
    fn narrow<T: Element>(values: &[f64]) -> Vec<u8> {
        let data: Vec<T> = values.iter().map(|&v| T::from_f64(v)).collect();
        encode(&data)
    }
    match dtype {
        DType::F16 => narrow::<f16>(values),
        DType::BF16 => narrow::<bf16>(values),
        DType::F32 => narrow::<f32>(values),
        DType::F64 => narrow::<f64>(values),
    }
}
