//! Enumerates the scalar element types batch-norm buffers may hold.

use std::fmt;

/// Logical dtype identifier shared between host tensors and device descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 16-bit floating point (fp16).
    F16,
    /// 16-bit bfloat16 as used by many accelerators.
    BF16,
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 64-bit floating point.
    F64,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F16 | DType::BF16 => 2,
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    /// Dtype of statistics and parameter gradients implied by an input dtype when a call
    /// does not describe them explicitly. Half types accumulate in `f32`.
    pub fn stats_dtype(self) -> DType {
        match self {
            DType::F64 => DType::F64,
            DType::F16 | DType::BF16 | DType::F32 => DType::F32,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_and_names() {
        assert_eq!(DType::BF16.size_in_bytes(), 2);
        assert_eq!(DType::F64.size_in_bytes(), 8);
        assert_eq!(DType::BF16.to_string(), "bf16");
    }

    #[test]
    fn half_types_accumulate_in_f32() {
        assert_eq!(DType::F16.stats_dtype(), DType::F32);
        assert_eq!(DType::BF16.stats_dtype(), DType::F32);
        assert_eq!(DType::F64.stats_dtype(), DType::F64);
    }
}
