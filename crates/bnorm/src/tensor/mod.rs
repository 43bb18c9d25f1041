//! Host tensor abstractions shared by backends, fixtures and the reference.
//!
//! The module defines scalar dtypes, the [`Element`] trait implemented by every storage type,
//! layout-aware 4D descriptors, and the owned host [`Tensor`] that mirrors one device buffer.

pub mod desc;
pub mod dtype;
pub mod element;
mod host_tensor;

pub use desc::TensorDesc;
pub use dtype::DType;
pub use element::Element;
pub use host_tensor::{Tensor, TensorRead, TensorWrite};
