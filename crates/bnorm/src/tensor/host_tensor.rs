//! Named host tensors mirroring one device buffer each.

use anyhow::{ensure, Result};
use rand::Rng;

use crate::layout::Layout4D;

use super::desc::TensorDesc;
use super::element::{self, Element};

/// Read access by logical coordinate, widened to `f64`.
pub trait TensorRead {
    fn desc(&self) -> &TensorDesc;
    fn at(&self, n: usize, c: usize, h: usize, w: usize) -> f64;
}

/// Write access by logical coordinate; values are rounded to the storage element type.
pub trait TensorWrite: TensorRead {
    fn put(&mut self, n: usize, c: usize, h: usize, w: usize, value: f64);
}

/// Owned host buffer with a descriptor and a diagnostic name.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T: Element> {
    name: String,
    desc: TensorDesc,
    data: Vec<T>,
}

impl<T: Element> Tensor<T> {
    /// Zero-initialised tensor; the descriptor dtype is forced to `T::DTYPE`.
    pub fn zeros(name: impl Into<String>, dims: [usize; 4], layout: Layout4D) -> Self {
        Self::from_desc(name, TensorDesc::new(T::DTYPE, dims, layout))
    }

    pub fn from_desc(name: impl Into<String>, desc: TensorDesc) -> Self {
        let desc = desc.with_dtype(T::DTYPE);
        Tensor {
            name: name.into(),
            data: vec![T::default(); desc.num_elements()],
            desc,
        }
    }

    /// Wraps storage-ordered data, validating the length against the descriptor.
    pub fn from_vec(name: impl Into<String>, desc: TensorDesc, data: Vec<T>) -> Result<Self> {
        let name = name.into();
        ensure!(
            data.len() == desc.num_elements(),
            "tensor {name}: data length ({}) does not match dims {:?}",
            data.len(),
            desc.dims
        );
        Ok(Tensor {
            name,
            desc: desc.with_dtype(T::DTYPE),
            data,
        })
    }

    /// Decodes a device byte image.
    pub fn from_bytes(name: impl Into<String>, desc: TensorDesc, bytes: &[u8]) -> Result<Self> {
        let name = name.into();
        ensure!(
            desc.dtype == T::DTYPE,
            "tensor {name}: descriptor dtype {} does not match element type {}",
            desc.dtype,
            T::DTYPE
        );
        ensure!(
            bytes.len() == desc.size_in_bytes(),
            "tensor {name}: byte length ({}) does not match {} ({} bytes)",
            bytes.len(),
            desc,
            desc.size_in_bytes()
        );
        let data = element::decode::<T>(bytes)?;
        Self::from_vec(name, desc, data)
    }

    /// Samples uniformly from `[lo, hi)` in logical NCHW order, so tensors drawn from equal
    /// seeds hold identical logical values in every layout.
    pub fn uniform(
        name: impl Into<String>,
        dims: [usize; 4],
        layout: Layout4D,
        lo: f64,
        hi: f64,
        rng: &mut impl Rng,
    ) -> Self {
        let mut tensor = Self::zeros(name, dims, layout);
        let desc = tensor.desc;
        for [n, c, h, w] in desc.coords() {
            let value = rng.gen_range(lo..hi);
            tensor.data[desc.offset(n, c, h, w)] = T::from_f64(value);
        }
        tensor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn get(&self, n: usize, c: usize, h: usize, w: usize) -> T {
        self.data[self.desc.offset(n, c, h, w)]
    }

    pub fn set(&mut self, n: usize, c: usize, h: usize, w: usize, value: T) {
        let offset = self.desc.offset(n, c, h, w);
        self.data[offset] = value;
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    /// Poisons every element with quiet NaN.
    pub fn fill_nan(&mut self) {
        self.fill(T::nan());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        element::encode(&self.data)
    }

    /// Replaces the contents with a device byte image of the same descriptor.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let reloaded = Self::from_bytes(self.name.clone(), self.desc, bytes)?;
        self.data = reloaded.data;
        Ok(())
    }

    /// Widened values in logical NCHW order.
    pub fn to_logical_f64(&self) -> Vec<f64> {
        self.desc
            .coords()
            .map(|[n, c, h, w]| self.at(n, c, h, w))
            .collect()
    }
}

impl<T: Element> TensorRead for Tensor<T> {
    fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    #[inline]
    fn at(&self, n: usize, c: usize, h: usize, w: usize) -> f64 {
        self.get(n, c, h, w).to_f64()
    }
}

impl<T: Element> TensorWrite for Tensor<T> {
    #[inline]
    fn put(&mut self, n: usize, c: usize, h: usize, w: usize, value: f64) {
        self.set(n, c, h, w, T::from_f64(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn uniform_values_are_layout_independent() {
        let dims = [2, 3, 2, 2];
        let nchw: Tensor<f32> =
            Tensor::uniform("x", dims, Layout4D::NCHW, -1.0, 1.0, &mut StdRng::seed_from_u64(7));
        let nhwc: Tensor<f32> =
            Tensor::uniform("x", dims, Layout4D::NHWC, -1.0, 1.0, &mut StdRng::seed_from_u64(7));
        assert_eq!(nchw.to_logical_f64(), nhwc.to_logical_f64());
        assert_ne!(nchw.data(), nhwc.data());
        assert!(nchw.data().iter().all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn from_bytes_checks_descriptor() {
        let desc = TensorDesc::new(super::super::DType::F16, [1, 2, 1, 1], Layout4D::NCHW);
        let tensor = Tensor::from_vec("s", desc, vec![f16::from_f32(1.5), f16::from_f32(-2.0)])
            .unwrap();
        let reloaded = Tensor::<f16>::from_bytes("s", desc, &tensor.to_bytes()).unwrap();
        assert_eq!(reloaded, tensor);

        let err = Tensor::<f16>::from_bytes("s", desc, &[0u8; 2]).unwrap_err();
        assert!(err.to_string().contains("byte length"));
        let err = Tensor::<f32>::from_bytes("s", desc, &[0u8; 8]).unwrap_err();
        assert!(err.to_string().contains("descriptor dtype"));
    }

    #[test]
    fn nan_fill_poisons_every_element() {
        let mut tensor: Tensor<f32> = Tensor::zeros("y", [2, 2, 1, 1], Layout4D::NHWC);
        tensor.fill_nan();
        assert!(tensor.to_logical_f64().iter().all(|v| v.is_nan()));
        tensor.put(1, 1, 0, 0, 2.0);
        assert_eq!(tensor.at(1, 1, 0, 0), 2.0);
    }
}
