//! # Tensor size validation
//!
//! Every tensor handed to the device must be exactly the size the executable
//! was compiled for. Sizes are derived from the declared type and shape, and
//! checked again for every sub-batch, since a sliced or padded sub-batch has to
//! match the hardware-sized declaration on its own.

use crate::error::{PipelineError, Result};
use crate::metadata::{ExecutableMetadata, SignatureLists, Side};
use crate::tensor::{byte_size, Tensor};

/// Expected byte sizes of every input and output, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoSizes {
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
}

/// Byte sizes for one side of the signature.
pub fn tensor_sizes(lists: &SignatureLists, side: Side) -> Result<Vec<usize>> {
    lists.check(side)?;
    Ok(lists.dtypes.iter()
        .zip(lists.shapes.iter())
        .map(|(dtype, shape)| byte_size(*dtype, shape))
        .collect())
}

/// Byte sizes for both sides; fails with a precondition error when any
/// side's lists do not line up.
pub fn validate_and_size(metadata: &ExecutableMetadata) -> Result<IoSizes> {
    Ok(IoSizes {
        inputs: tensor_sizes(&metadata.inputs, Side::Input)?,
        outputs: tensor_sizes(&metadata.outputs, Side::Output)?,
    })
}

/// Checks a candidate input list against the declared names and sizes.
pub fn check_input_tensors(tensors: &[Tensor], metadata: &ExecutableMetadata) -> Result<()> {
    let sizes = tensor_sizes(&metadata.inputs, Side::Input)?;
    let names = &metadata.inputs.names;
    if tensors.len() != names.len() {
        return Err(PipelineError::Internal(format!(
            "incorrect number of input tensors, input_tensors size {}, input_names size {}",
            tensors.len(), names.len()
        )));
    }
    for (idx, tensor) in tensors.iter().enumerate() {
        if tensor.byte_len() != sizes[idx] {
            return Err(PipelineError::Internal(format!(
                "incorrect input tensor size {} found on {} ({})",
                tensor.byte_len(), names[idx], sizes[idx]
            )));
        }
    }
    Ok(())
}
