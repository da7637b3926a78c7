use crate::error::Result;
use crate::tensor::{OutputTensor, Tensor};

/// Conversion between a tensor library's type and host tensors.
pub trait TensorBackend: Sized + Send + Sync + 'static {
    /// Copies (or shares) this tensor's contents into a host input tensor.
    fn to_host(&self) -> Result<Tensor>;

    /// Builds a tensor from a computed output.
    fn from_host(output: OutputTensor) -> Result<Self>;
}

impl TensorBackend for Tensor {
    fn to_host(&self) -> Result<Tensor> {
        Ok(self.clone())
    }

    fn from_host(output: OutputTensor) -> Result<Self> {
        Ok(output.freeze())
    }
}
