//! Invocations that need no splitting: one request at the declared shapes.

use tracing::{debug, warn};
use crate::device::{Device, RequestHandle, SubBatchRequest, SubmitMode};
use crate::error::{ignore_if, ErrorKind, Result};
use crate::request::allocate_outputs;
use crate::tensor::{OutputTensor, Tensor};
use crate::timing::Timestamps;
use crate::validator::check_input_tensors;
use super::PipelineContext;

/// Runs `inputs` through the device as a single request.
pub async fn run_single<D: Device>(
    ctx: &PipelineContext<'_, D>,
    inputs: &[Tensor],
    timestamps: &mut Timestamps,
) -> Result<Vec<OutputTensor>> {
    let outputs = allocate_outputs(ctx.metadata, None)?;
    check_input_tensors(inputs, ctx.metadata)?;
    let request = SubBatchRequest {
        index: 0,
        inputs: inputs.to_vec(),
        outputs,
    };

    submit_and_wait(ctx, request, timestamps).await
}

/// Takes the admission token under the device-exclusive lock, in the same
/// order as the windowed path, and gives it back on every path.
async fn submit_and_wait<D: Device>(
    ctx: &PipelineContext<'_, D>,
    request: SubBatchRequest,
    timestamps: &mut Timestamps,
) -> Result<Vec<OutputTensor>> {
    let device = ctx.device.device();

    let (token, mut handle) = {
        let _exclusive = ctx.device.acquire_exclusive().await;
        ignore_if(device.start_program(ctx.program).await, ErrorKind::Aborted)?;
        ignore_if(device.ping(ctx.program).await, ErrorKind::Aborted)?;
        let token = ctx.admission.acquire().await?;
        timestamps.mark_above_device();

        match device.submit(ctx.program, request, SubmitMode::Normal).await {
            Ok(handle) => (token, handle),
            Err(err) => {
                ctx.admission.release(token);
                return Err(err);
            }
        }
    };

    let waited = ignore_if(device.wait(&mut handle, Some(timestamps)).await, ErrorKind::Aborted);
    let finished = ignore_if(device.finish(&mut handle), ErrorKind::Aborted);
    ctx.admission.release(token);
    if let Err(err) = waited {
        if let Err(finish_err) = finished {
            warn!(error = %finish_err, "finish failed after a failed wait");
        }
        return Err(err);
    }
    finished?;
    debug!("single-shot invocation done");
    Ok(handle.into_request().outputs)
}
