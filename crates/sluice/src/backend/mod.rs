//! # Tensor backends
//!
//! The pipeline works on host tensors ([`Tensor`](crate::tensor::Tensor) and
//! [`OutputTensor`](crate::tensor::OutputTensor)). A [`TensorBackend`] moves
//! tensors of some tensor library in and out of that representation, so that
//! [`Model::compute_backend`](crate::model::Model::compute_backend) can be
//! called with the library's own type.
//!
//! ## Feature Flags
//!
//! - `candle`: implements [`TensorBackend`] for `candle_core::Tensor`
//!
//! Host tensors implement the trait themselves, as the identity conversion.

mod core_trait;

#[cfg_attr(docsrs, doc(cfg(feature = "candle")))]
#[cfg(feature = "candle")]
/// Candle tensor backend.
///
/// Only available with the `candle` feature. Conversions go through the CPU
/// device and support `u8`, `u32`, `i64`, `f32` and `f64` tensors. Half
/// precision (`f16`, `bf16`) is rejected with an invalid-argument error.
pub mod candle;

pub use core_trait::*;
