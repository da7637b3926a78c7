//! # Host tensors
//!
//! The pipeline never looks at tensor values. It only needs to know a tensor's
//! element type, its shape and where its bytes live, so that it can cut
//! row ranges out of the batch dimension and hand them to the device.
//!
//! - [`Tensor`] is an immutable runtime input backed by [`Bytes`]; slicing rows
//!   is a reference-counted view, never a copy.
//! - [`OutputTensor`] is a writable output backed by [`BytesMut`]; sub-batch
//!   views are split off the same allocation and stitched back afterwards.

pub mod constant;
pub(crate) mod operations;

use std::fmt;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use crate::error::{PipelineError, Result};
use constant::BATCH_DIM;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    I64,
    F16,
    BF16,
    F32,
    F64,
}

impl DType {
    /// Width of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::Bool | DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 | DType::F16 | DType::BF16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }
}

/// Number of elements described by `shape`; a rank-0 shape holds one element.
pub fn num_elements(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Bytes occupied by a dense tensor of `dtype` and `shape`.
pub fn byte_size(dtype: DType, shape: &[usize]) -> usize {
    dtype.size_in_bytes() * num_elements(shape)
}

/// An immutable, densely packed runtime tensor.
#[derive(Clone, PartialEq, Eq)]
pub struct Tensor {
    dtype: DType,
    shape: Vec<usize>,
    data: Bytes,
}

impl Tensor {
    /// Wraps `data` as a tensor, checking that its length matches `dtype` and `shape`.
    pub fn new(dtype: DType, shape: Vec<usize>, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let expected = byte_size(dtype, &shape);
        if data.len() != expected {
            return Err(PipelineError::InvalidArgument(format!(
                "tensor data holds {} bytes, shape {:?} of {:?} needs {}",
                data.len(), shape, dtype, expected
            )));
        }
        Ok(Self { dtype, shape, data })
    }

    /// A zero-filled tensor.
    pub fn zeros(dtype: DType, shape: Vec<usize>) -> Self {
        let data = Bytes::from(vec![0u8; byte_size(dtype, &shape)]);
        Self { dtype, shape, data }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Raw bytes of the tensor.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Raw byte size.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Leading dimension, if the tensor has one.
    pub fn batch_dim(&self) -> Option<usize> {
        self.shape.get(BATCH_DIM).copied()
    }

    pub(crate) fn from_parts(dtype: DType, shape: Vec<usize>, data: Bytes) -> Self {
        Self { dtype, shape, data }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor({:?}, {:?}, {} bytes)", self.dtype, self.shape, self.data.len())
    }
}

/// A writable output tensor, or a view over some rows of one.
#[derive(Clone, PartialEq, Eq)]
pub struct OutputTensor {
    dtype: DType,
    shape: Vec<usize>,
    data: BytesMut,
}

impl OutputTensor {
    /// A zero-filled output of the given type and shape.
    pub fn zeros(dtype: DType, shape: Vec<usize>) -> Self {
        let data = BytesMut::zeroed(byte_size(dtype, &shape));
        Self { dtype, shape, data }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access for the device writing results.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Freezes the output into an immutable [`Tensor`].
    pub fn freeze(self) -> Tensor {
        Tensor::from_parts(self.dtype, self.shape, self.data.freeze())
    }

    pub(crate) fn from_parts(dtype: DType, shape: Vec<usize>, data: BytesMut) -> Self {
        Self { dtype, shape, data }
    }

    pub(crate) fn into_parts(self) -> (DType, Vec<usize>, BytesMut) {
        (self.dtype, self.shape, self.data)
    }
}

impl fmt::Debug for OutputTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputTensor({:?}, {:?}, {} bytes)", self.dtype, self.shape, self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_sizes() {
        assert_eq!(DType::Bool.size_in_bytes(), 1);
        assert_eq!(DType::BF16.size_in_bytes(), 2);
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::I64.size_in_bytes(), 8);
    }

    #[test]
    fn test_byte_size_of_scalar() {
        assert_eq!(byte_size(DType::F32, &[]), 4);
        assert_eq!(byte_size(DType::F32, &[3, 0]), 0);
        assert_eq!(byte_size(DType::F16, &[2, 3]), 12);
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        let err = Tensor::new(DType::F32, vec![2, 2], vec![0u8; 15]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument(_)));
    }

    #[test]
    fn test_new_accepts_exact_length() {
        let tensor = Tensor::new(DType::U8, vec![2, 3], vec![1u8; 6]).unwrap();
        assert_eq!(tensor.shape(), &[2, 3]);
        assert_eq!(tensor.batch_dim(), Some(2));
        assert_eq!(tensor.byte_len(), 6);
    }

    #[test]
    fn test_output_freeze_keeps_bytes() {
        let mut out = OutputTensor::zeros(DType::U8, vec![2, 2]);
        out.data_mut()[3] = 9;
        let frozen = out.freeze();
        assert_eq!(frozen.data().as_ref(), &[0, 0, 0, 9]);
    }
}
