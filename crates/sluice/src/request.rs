//! # Sub-batch request building
//!
//! [`RequestBuilder`] turns one invocation's runtime inputs and a
//! [`BatchPlan`] into a sequence of [`SubBatchRequest`]s, and reassembles the
//! outputs as the requests retire.
//!
//! - Batched inputs are sliced into hardware-sized row views. Only the ragged
//!   last sub-batch is copied, into a zero-padded hardware-sized buffer.
//! - Batched outputs are carved into row views of one pre-allocated output per
//!   tensor, bounded by the runtime batch size. The device writes straight
//!   into the caller's buffer; retiring the views stitches it back together.
//! - Tensors without a batch dimension go whole to every sub-batch. Their
//!   outputs are written through per-request scratch buffers and the last
//!   retired scratch becomes the final value.
//!
//! Requests must be built, and retired, in index order.

use crate::device::SubBatchRequest;
use crate::error::{PipelineError, Result};
use crate::metadata::{ExecutableMetadata, Side};
use crate::planner::BatchPlan;
use crate::tensor::{OutputTensor, Tensor};
use crate::tensor::constant::BATCH_DIM;
use crate::tensor::operations::{join_rows, pad_rows, slice_rows, split_rows};

/// Allocates zeroed outputs at their declared shapes, with the batch
/// dimension of batched outputs resized to `runtime_batch`.
pub(crate) fn allocate_outputs(
    metadata: &ExecutableMetadata,
    batched: Option<(&[bool], usize)>,
) -> Result<Vec<OutputTensor>> {
    let descriptors = metadata.outputs.descriptors(Side::Output)?;
    Ok(descriptors.into_iter().enumerate().map(|(idx, descriptor)| {
        let mut shape = descriptor.shape;
        if let Some((flags, runtime_batch)) = batched {
            if flags.get(idx).copied().unwrap_or(false) && !shape.is_empty() {
                shape[BATCH_DIM] = runtime_batch;
            }
        }
        OutputTensor::zeros(descriptor.dtype, shape)
    }).collect())
}

/// Builds sub-batch requests for one invocation and collects their outputs.
pub struct RequestBuilder<'a> {
    plan: &'a BatchPlan,
    inputs: &'a [Tensor],
    /// Batched outputs: rows not yet handed out. Unbatched: the final value.
    outputs: Vec<OutputTensor>,
    /// Retired row views of each batched output, in index order.
    retired: Vec<Vec<OutputTensor>>,
    next_build: usize,
    next_retire: usize,
}

impl<'a> RequestBuilder<'a> {
    /// Allocates the invocation's outputs and prepares to slice `inputs`.
    pub fn new(plan: &'a BatchPlan, inputs: &'a [Tensor], metadata: &ExecutableMetadata) -> Result<Self> {
        if plan.input_batched.len() != inputs.len() {
            return Err(PipelineError::Internal(format!(
                "plan covers {} inputs, invocation has {}", plan.input_batched.len(), inputs.len()
            )));
        }
        let outputs = allocate_outputs(metadata, Some((plan.output_batched.as_slice(), plan.runtime_batch_size)))?;
        if plan.output_batched.len() != outputs.len() {
            return Err(PipelineError::Internal(format!(
                "plan covers {} outputs, executable declares {}", plan.output_batched.len(), outputs.len()
            )));
        }
        let retired = outputs.iter().map(|_| Vec::with_capacity(plan.num_sub_batches)).collect();
        Ok(Self {
            plan,
            inputs,
            outputs,
            retired,
            next_build: 0,
            next_retire: 0,
        })
    }

    /// Hardware-sized inputs of sub-batch `index`.
    pub fn inputs_for(&self, index: usize) -> Result<Vec<Tensor>> {
        let hardware = self.plan.hardware_batch_size;
        let start = index * hardware;
        self.inputs.iter().zip(self.plan.input_batched.iter()).map(|(tensor, batched)| {
            if !*batched {
                Ok(tensor.clone())
            } else if self.plan.is_ragged(index) {
                pad_rows(tensor, start, hardware)
            } else {
                slice_rows(tensor, start, hardware)
            }
        }).collect()
    }

    /// Builds the next request; `index` must follow the previous one.
    pub fn build(&mut self, index: usize) -> Result<SubBatchRequest> {
        if index != self.next_build || index >= self.plan.num_sub_batches {
            return Err(PipelineError::Internal(format!(
                "sub-batch {} built out of order, expected {} of {}",
                index, self.next_build, self.plan.num_sub_batches
            )));
        }
        let inputs = self.inputs_for(index)?;
        let rows = self.plan.row_range(index).len();
        let mut outputs = Vec::with_capacity(self.outputs.len());
        for (output, batched) in self.outputs.iter_mut().zip(self.plan.output_batched.iter()) {
            if *batched {
                outputs.push(split_rows(output, rows)?);
            } else {
                outputs.push(OutputTensor::zeros(output.dtype(), output.shape().to_vec()));
            }
        }
        self.next_build += 1;
        Ok(SubBatchRequest { index, inputs, outputs })
    }

    /// Takes back a completed request's outputs; must be called in index order.
    pub fn retire(&mut self, request: SubBatchRequest) -> Result<()> {
        if request.index != self.next_retire {
            return Err(PipelineError::Internal(format!(
                "sub-batch {} retired out of order, expected {}", request.index, self.next_retire
            )));
        }
        if request.outputs.len() != self.outputs.len() {
            return Err(PipelineError::Internal(format!(
                "sub-batch {} returned {} outputs, expected {}",
                request.index, request.outputs.len(), self.outputs.len()
            )));
        }
        for (idx, view) in request.outputs.into_iter().enumerate() {
            if self.plan.output_batched[idx] {
                self.retired[idx].push(view);
            } else {
                let target = &mut self.outputs[idx];
                if target.byte_len() != view.byte_len() {
                    return Err(PipelineError::Internal(format!(
                        "scratch output {} holds {} bytes, expected {}", idx, view.byte_len(), target.byte_len()
                    )));
                }
                target.data_mut().copy_from_slice(view.data());
            }
        }
        self.next_retire += 1;
        Ok(())
    }

    /// Number of requests retired so far.
    pub fn retired_count(&self) -> usize {
        self.next_retire
    }

    /// Final outputs once every request has retired.
    pub fn into_outputs(self) -> Result<Vec<OutputTensor>> {
        if self.next_retire != self.plan.num_sub_batches {
            return Err(PipelineError::Internal(format!(
                "{} of {} sub-batches retired", self.next_retire, self.plan.num_sub_batches
            )));
        }
        let mut finals = Vec::with_capacity(self.outputs.len());
        for ((remaining, views), batched) in self.outputs.into_iter()
            .zip(self.retired.into_iter())
            .zip(self.plan.output_batched.iter())
        {
            if !*batched {
                finals.push(remaining);
                continue;
            }
            let joined = join_rows(views)?.ok_or_else(|| {
                PipelineError::Internal("batched output has no retired rows".to_string())
            })?;
            if joined.shape().get(BATCH_DIM) != Some(&self.plan.runtime_batch_size) {
                return Err(PipelineError::Internal(format!(
                    "reassembled output has shape {:?}, expected {} rows",
                    joined.shape(), self.plan.runtime_batch_size
                )));
            }
            finals.push(joined);
        }
        Ok(finals)
    }
}
