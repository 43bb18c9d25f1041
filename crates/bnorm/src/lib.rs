//! Core types for batch-normalization device conformance testing.
//!
//! The crate owns everything the harness needs that is independent of a particular device:
//! tensor descriptors and host buffers in NCHW/NHWC layouts, the precision bundles that name the
//! element type of every batch-norm role, the [`BatchNormBackend`] trait a device library is
//! reached through, and the host reference implementation results are checked against.

pub mod arch;
pub mod backend;
pub mod case;
pub mod env;
pub mod layout;
pub mod precision;
pub mod reference;
pub mod tensor;

pub use backend::spec::{BackendError, BackendResult, BatchNormBackend, BnMode};
pub use case::{network_large, network_small, BnTestCase, Network};
pub use layout::Layout4D;
pub use precision::{Bf16, Fp16, Fp32, Fp64, Precision};
pub use tensor::{DType, Element, Tensor, TensorDesc, TensorRead, TensorWrite};
