//! # Pipeline
//!
//! Executes one planned invocation against a shared device.
//!
//! * [`scheduler`] - the windowed sub-batch pipeline used whenever the runtime
//!   batch differs from the hardware batch. Keeps up to `window_size` requests
//!   in flight, retiring them in submission order.
//!
//! * [`single_shot`] - one request at the declared shapes, for executables
//!   without batch axes or calls whose batch already matches the hardware.
//!
//! Both paths take a [`PipelineContext`], which bundles the device handle,
//! the loaded program and the admission semaphore of the bound model.

pub mod scheduler;
pub mod single_shot;
mod window;

#[cfg(test)]
pub(crate) mod testing;

use crate::config::ConfirmPolicy;
use crate::device::{Device, DeviceHandle, ProgramId};
use crate::error::Result;
use crate::metadata::ExecutableMetadata;
use crate::planner::ExecutionPlan;
use crate::semaphore::AdmissionSemaphore;
use crate::tensor::{OutputTensor, Tensor};
use crate::timing::Timestamps;

/// Everything an invocation needs from its bound model.
pub struct PipelineContext<'c, D: Device> {
    pub device: &'c DeviceHandle<D>,
    pub program: ProgramId,
    pub admission: &'c AdmissionSemaphore,
    pub metadata: &'c ExecutableMetadata,
    /// Upper bound on requests in flight for one invocation.
    pub window_capacity: usize,
    pub confirm_policy: ConfirmPolicy,
}

/// Runs `inputs` along `plan`.
pub async fn execute<D: Device>(
    ctx: &PipelineContext<'_, D>,
    plan: &ExecutionPlan,
    inputs: &[Tensor],
    timestamps: &mut Timestamps,
) -> Result<Vec<OutputTensor>> {
    match plan {
        ExecutionPlan::SingleShot => single_shot::run_single(ctx, inputs, timestamps).await,
        ExecutionPlan::Batched(batch) => scheduler::run_windowed(ctx, batch, inputs, timestamps).await,
    }
}
