use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;
use crate::config::ModelConfig;
use crate::error::Result;
use crate::tensor::{OutputTensor, Tensor};
use crate::timing::Timestamps;

/// Identifier of an executable loaded onto a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// How a request is handed to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Plain post; the request is queued when `post` returns.
    Normal,
    /// Post that needs a later [`Device::confirm_posted`] before the request
    /// counts as durably queued.
    Posted,
}

/// One hardware-sized set of inputs plus the output views the device writes.
#[derive(Debug)]
pub struct SubBatchRequest {
    /// Position of the sub-batch within its invocation.
    pub index: usize,
    /// Hardware-sized inputs, in declaration order.
    pub inputs: Vec<Tensor>,
    /// Output views, in declaration order. A batched output's view covers only
    /// the caller-visible rows of this sub-batch.
    pub outputs: Vec<OutputTensor>,
}

/// Per-request I/O handle issued by a [`Device`].
pub trait RequestHandle: Send + 'static {
    /// Sub-batch index the handle was set up for.
    fn index(&self) -> usize;

    /// Gives the request, with its written outputs, back to the scheduler.
    fn into_request(self) -> SubBatchRequest;
}

/// The accelerator collaborator driven by the pipeline.
///
/// The pipeline guarantees, per invocation, that:
/// * requests are posted in index order and waited in the same order
/// * `confirm_posted` is only called on requests set up with [`SubmitMode::Posted`]
/// * `finish` is called exactly once per handle that was set up, after its
///   wait, or straight away if its post or wait failed
#[async_trait]
pub trait Device: Send + Sync + 'static {
    /// The per-request I/O handle.
    type Handle: RequestHandle;

    /// Loads a compiled executable.
    async fn load(&self, executable: &Bytes, config: &ModelConfig) -> Result<ProgramId>;

    /// Unloads a previously loaded executable.
    fn unload(&self, program: ProgramId);

    /// Number of requests the device can work on in parallel per admission
    /// slot; scales the window.
    fn parallelism(&self) -> usize {
        1
    }

    /// Makes `program` the running program. Safe to call once per submission burst.
    async fn start_program(&self, program: ProgramId) -> Result<()>;

    /// Keepalive round-trip re-establishing the submission channel.
    async fn ping(&self, _program: ProgramId) -> Result<()> {
        Ok(())
    }

    /// Prepares `request` for submission without posting it.
    async fn setup(&self, program: ProgramId, request: SubBatchRequest, mode: SubmitMode) -> Result<Self::Handle>;

    /// Posts a prepared request to the device.
    async fn post(&self, handle: &mut Self::Handle) -> Result<()>;

    /// Confirms that a [`SubmitMode::Posted`] request is durably queued.
    async fn confirm_posted(&self, handle: &mut Self::Handle) -> Result<()>;

    /// Waits for a posted request to complete.
    async fn wait(&self, handle: &mut Self::Handle, timestamps: Option<&mut Timestamps>) -> Result<()>;

    /// Releases the device-side resources of a completed request.
    fn finish(&self, handle: &mut Self::Handle) -> Result<()>;

    /// Prepares and posts a request.
    ///
    /// If the post fails the handle is finished before the error is returned,
    /// so the caller owns nothing on failure.
    async fn submit(&self, program: ProgramId, request: SubBatchRequest, mode: SubmitMode) -> Result<Self::Handle> {
        let mut handle = self.setup(program, request, mode).await?;
        if let Err(err) = self.post(&mut handle).await {
            if let Err(finish_err) = self.finish(&mut handle) {
                warn!(sub_batch = handle.index(), error = %finish_err, "finish failed after a failed post");
            }
            return Err(err);
        }
        Ok(handle)
    }
}
