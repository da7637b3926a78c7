//! # Batch planning
//!
//! Decides how a runtime batch maps onto fixed-size hardware sub-batches.
//!
//! The executable is compiled for a hardware batch size `H`, read from the
//! leading dimension of the first batched input's declared shape. The caller
//! may pass any runtime batch size `R`:
//!
//! - `R == H`: nothing to split, the call takes the single-shot path
//! - otherwise: `ceil(R / H)` sub-batches, the last one zero-padded to `H` rows
//!   when `R` is not a multiple of `H`
//!
//! Padding never reaches the caller: output row ranges are bounded by `R`.

use std::ops::Range;
use crate::error::{PipelineError, Result};
use crate::metadata::{ExecutableMetadata, Side, TensorDescriptor};
use crate::tensor::Tensor;
use crate::tensor::constant::BATCH_DIM;

/// How one invocation will be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPlan {
    /// One request at the declared shapes.
    SingleShot,
    /// Split into hardware-sized sub-batches.
    Batched(BatchPlan),
}

/// Mapping of a runtime batch onto hardware sub-batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub runtime_batch_size: usize,
    pub hardware_batch_size: usize,
    pub num_sub_batches: usize,
    pub padded_total: usize,
    /// Per input: sliced per sub-batch, or passed whole to every sub-batch.
    pub input_batched: Vec<bool>,
    /// Per output: written through a row view, or through a scratch buffer.
    pub output_batched: Vec<bool>,
}

impl BatchPlan {
    /// Builds a plan for `runtime` rows on hardware batches of `hardware` rows.
    pub fn new(runtime: usize, hardware: usize, input_batched: Vec<bool>, output_batched: Vec<bool>) -> Result<Self> {
        if hardware == 0 {
            return Err(PipelineError::Internal("hardware batch size must be positive".to_string()));
        }
        let num_sub_batches = runtime.div_ceil(hardware);
        Ok(Self {
            runtime_batch_size: runtime,
            hardware_batch_size: hardware,
            num_sub_batches,
            padded_total: num_sub_batches * hardware,
            input_batched,
            output_batched,
        })
    }

    /// Caller-visible rows covered by sub-batch `index`.
    pub fn row_range(&self, index: usize) -> Range<usize> {
        let start = index * self.hardware_batch_size;
        let limit = start + self.hardware_batch_size;
        start.min(self.runtime_batch_size)..limit.min(self.runtime_batch_size)
    }

    /// True if sub-batch `index` is shorter than the hardware batch and needs padding.
    pub fn is_ragged(&self, index: usize) -> bool {
        self.row_range(index).len() < self.hardware_batch_size
    }

    /// True if the last sub-batch needs padding.
    pub fn has_ragged_tail(&self) -> bool {
        self.padded_total != self.runtime_batch_size
    }
}

/// Plans one invocation of `metadata` over `inputs`.
pub fn plan(metadata: &ExecutableMetadata, inputs: &[Tensor]) -> Result<ExecutionPlan> {
    let input_descriptors = metadata.inputs.descriptors(Side::Input)?;
    let output_descriptors = metadata.outputs.descriptors(Side::Output)?;
    if inputs.len() != input_descriptors.len() {
        return Err(PipelineError::InvalidArgument(format!(
            "incorrect number of input tensors: got {}, expected {}",
            inputs.len(), input_descriptors.len()
        )));
    }
    if !metadata.batch_axes_enabled() {
        return Ok(ExecutionPlan::SingleShot);
    }

    let mut batch_sizes: Option<(usize, usize)> = None;
    let mut input_batched = Vec::with_capacity(inputs.len());
    for (tensor, descriptor) in inputs.iter().zip(input_descriptors.iter()) {
        input_batched.push(plan_input(tensor, descriptor, &mut batch_sizes)?);
    }

    let output_batched = output_descriptors.iter()
        .map(|descriptor| plan_output(descriptor, batch_sizes))
        .collect::<Result<Vec<bool>>>()?;

    match batch_sizes {
        Some((runtime, hardware)) if runtime != hardware => Ok(ExecutionPlan::Batched(
            BatchPlan::new(runtime, hardware, input_batched, output_batched)?
        )),
        _ => Ok(ExecutionPlan::SingleShot),
    }
}

/// Checks one input against its descriptor; returns whether it is sliced.
///
/// The first batched input fixes `(runtime, hardware)` batch sizes, every
/// later one has to agree.
fn plan_input(
    tensor: &Tensor,
    descriptor: &TensorDescriptor,
    batch_sizes: &mut Option<(usize, usize)>,
) -> Result<bool> {
    let mut shape = tensor.shape().to_vec();
    let mut declared = descriptor.shape.clone();
    let mut batched = false;

    if descriptor.is_batched() {
        if shape.is_empty() {
            return Err(PipelineError::InvalidArgument(format!(
                "no batch-dimension found on input tensor {} with shape {:?}",
                descriptor.name, tensor.shape()
            )));
        }
        if declared.is_empty() {
            return Err(PipelineError::InvalidArgument(format!(
                "no batch-dimension declared on input tensor {} with shape {:?}",
                descriptor.name, descriptor.shape
            )));
        }
        let runtime = shape[BATCH_DIM];
        let (runtime_batch, hardware_batch) = match *batch_sizes {
            None => {
                if runtime == 0 {
                    return Err(PipelineError::Internal(format!(
                        "incorrect internal batch size inferred from input tensor {} with shape {:?}",
                        descriptor.name, tensor.shape()
                    )));
                }
                let sizes = (runtime, declared[BATCH_DIM]);
                *batch_sizes = Some(sizes);
                sizes
            }
            Some(sizes) => {
                if runtime != sizes.0 {
                    return Err(PipelineError::InvalidArgument(format!(
                        "incorrect batch size found on input tensor {}, tensor shape {:?}, internal batch size {}",
                        descriptor.name, tensor.shape(), sizes.0
                    )));
                }
                sizes
            }
        };
        shape.remove(BATCH_DIM);
        declared.remove(BATCH_DIM);
        batched = runtime_batch != hardware_batch;
    }

    if shape != declared {
        return Err(PipelineError::InvalidArgument(format!(
            "incorrect shape found on input tensor {}, inference time shape {:?}, expected shape {:?}",
            descriptor.name, tensor.shape(), descriptor.shape
        )));
    }
    Ok(batched)
}

/// Checks one output descriptor; returns whether it is written through row views.
fn plan_output(descriptor: &TensorDescriptor, batch_sizes: Option<(usize, usize)>) -> Result<bool> {
    if !descriptor.is_batched() {
        return Ok(false);
    }
    let Some(&declared_batch) = descriptor.shape.get(BATCH_DIM) else {
        return Err(PipelineError::InvalidArgument(format!(
            "no batch-dimension found on output tensor {} with declared shape {:?}",
            descriptor.name, descriptor.shape
        )));
    };
    let Some((runtime, hardware)) = batch_sizes else {
        return Err(PipelineError::Internal(format!(
            "output tensor {} declares a batch axis but no input fixes the hardware batch size",
            descriptor.name
        )));
    };
    if hardware == 0 {
        return Err(PipelineError::Internal(format!(
            "hardware batch size of output tensor {} must be positive", descriptor.name
        )));
    }
    if declared_batch != hardware {
        return Err(PipelineError::InvalidArgument(format!(
            "incorrect batch size found on output tensor {}, declared shape {:?}, hardware batch size {}",
            descriptor.name, descriptor.shape, hardware
        )));
    }
    Ok(runtime != declared_batch)
}
