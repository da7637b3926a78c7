//! Conversions between candle and host tensors.
//!
//! `f16` and `bf16` are not converted in either direction; cast half-precision
//! tensors to `f32` before calling the model.

use candle_core::{DType, Device, Tensor};
use crate::error::{PipelineError, Result};
use crate::tensor::{DType as HostDType, OutputTensor, Tensor as HostTensor};
use super::TensorBackend;

fn candle_error(err: candle_core::Error) -> PipelineError {
    PipelineError::InvalidArgument(format!("candle tensor conversion failed: {}", err))
}

fn to_le<T: Copy, const N: usize>(values: Vec<T>, encode: fn(T) -> [u8; N]) -> Vec<u8> {
    values.into_iter().flat_map(encode).collect()
}

fn from_le<T, const N: usize>(bytes: &[u8], decode: fn([u8; N]) -> T) -> Vec<T> {
    bytes.chunks_exact(N)
        .map(|chunk| {
            let mut raw = [0u8; N];
            raw.copy_from_slice(chunk);
            decode(raw)
        })
        .collect()
}

impl TensorBackend for Tensor {
    fn to_host(&self) -> Result<HostTensor> {
        let shape = self.dims().to_vec();
        let flat = self.flatten_all().map_err(candle_error)?;
        let (dtype, data) = match self.dtype() {
            DType::U8 => (HostDType::U8, flat.to_vec1::<u8>().map_err(candle_error)?),
            DType::U32 => (HostDType::U32, to_le(flat.to_vec1::<u32>().map_err(candle_error)?, u32::to_le_bytes)),
            DType::I64 => (HostDType::I64, to_le(flat.to_vec1::<i64>().map_err(candle_error)?, i64::to_le_bytes)),
            DType::F32 => (HostDType::F32, to_le(flat.to_vec1::<f32>().map_err(candle_error)?, f32::to_le_bytes)),
            DType::F64 => (HostDType::F64, to_le(flat.to_vec1::<f64>().map_err(candle_error)?, f64::to_le_bytes)),
            other => {
                return Err(PipelineError::InvalidArgument(format!("unsupported candle dtype {:?}", other)));
            }
        };
        HostTensor::new(dtype, shape, data)
    }

    fn from_host(output: OutputTensor) -> Result<Self> {
        let shape = output.shape().to_vec();
        let bytes = output.data();
        let device = &Device::Cpu;
        let tensor = match output.dtype() {
            HostDType::U8 => Tensor::from_vec(bytes.to_vec(), shape, device),
            HostDType::U32 => Tensor::from_vec(from_le(bytes, u32::from_le_bytes), shape, device),
            HostDType::I64 => Tensor::from_vec(from_le(bytes, i64::from_le_bytes), shape, device),
            HostDType::F32 => Tensor::from_vec(from_le(bytes, f32::from_le_bytes), shape, device),
            HostDType::F64 => Tensor::from_vec(from_le(bytes, f64::from_le_bytes), shape, device),
            other => {
                return Err(PipelineError::InvalidArgument(format!("no candle dtype for {:?}", other)));
            }
        };
        tensor.map_err(candle_error)
    }
}
