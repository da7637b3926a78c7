//! Windowed sub-batch scheduler.
//!
//! One invocation moves through four phases:
//!
//! - `Filling`: under the device-exclusive lock, start the program and post the
//!   first `window_size` sub-batches, each holding one admission token
//! - `Steady`: still under the lock, for every further sub-batch set it up,
//!   wait for the oldest outstanding one, post the new one with the token the
//!   oldest held, then retire the oldest
//! - `Draining`: with the lock released, wait out what is left in FIFO order,
//!   giving back one token per completion
//! - `Done`
//!
//! Requests flagged by the [`ConfirmPolicy`](crate::config::ConfirmPolicy) are posted in
//! [`SubmitMode::Posted`]. Those still in the window at the end of `Steady` are
//! confirmed in one pass, oldest first, and the count is checked against the
//! policy before the lock is released. A flagged request that reaches the
//! head of the window earlier is confirmed just before its wait.
//!
//! On any error the remaining window is drained best-effort and the first
//! error is returned.

use tracing::{debug, warn};
use crate::device::{Device, RequestHandle, SubmitMode};
use crate::error::{ignore_if, ErrorKind, PipelineError, Result};
use crate::planner::BatchPlan;
use crate::request::RequestBuilder;
use crate::tensor::{OutputTensor, Tensor};
use crate::timing::Timestamps;
use crate::validator::check_input_tensors;
use super::PipelineContext;
use super::window::{InFlight, PipelineWindow};

/// Phase of one windowed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Filling,
    Steady,
    Draining,
    Done,
}

/// Number of requests kept in flight for `plan`.
///
/// Bounded by the model's window capacity, by the shared admission capacity
/// and by the number of sub-batches; never below one.
pub fn window_size(window_capacity: usize, admission_capacity: usize, num_sub_batches: usize) -> usize {
    window_capacity
        .min(admission_capacity)
        .min(num_sub_batches)
        .max(1)
}

/// Fails unless exactly `expected` posted confirmations were made.
pub(crate) fn check_confirms(confirms: usize, expected: usize) -> Result<()> {
    if confirms != expected {
        return Err(PipelineError::Internal(format!(
            "incorrect queue length -- race condition likely: {} posted requests confirmed, expected {}",
            confirms, expected
        )));
    }
    Ok(())
}

/// Runs `inputs` through the device in hardware-sized sub-batches.
pub async fn run_windowed<D: Device>(
    ctx: &PipelineContext<'_, D>,
    plan: &BatchPlan,
    inputs: &[Tensor],
    timestamps: &mut Timestamps,
) -> Result<Vec<OutputTensor>> {
    let builder = RequestBuilder::new(plan, inputs, ctx.metadata)?;
    let size = window_size(ctx.window_capacity, ctx.admission.capacity(), plan.num_sub_batches);
    debug!(
        runtime_batch = plan.runtime_batch_size,
        hardware_batch = plan.hardware_batch_size,
        sub_batches = plan.num_sub_batches,
        window = size,
        "windowed invocation"
    );

    let mut pipeline = WindowedPipeline {
        ctx,
        plan,
        builder,
        window: PipelineWindow::new(size),
        pending: None,
        state: PipelineState::Filling,
        next_index: 0,
        confirms: 0,
    };
    match pipeline.drive(timestamps).await {
        Ok(()) => pipeline.builder.into_outputs(),
        Err(err) => {
            warn!(error = %err, state = ?pipeline.state, "pipeline failed, draining window");
            pipeline.abort().await;
            Err(err)
        }
    }
}

struct WindowedPipeline<'p, 'c, D: Device> {
    ctx: &'p PipelineContext<'c, D>,
    plan: &'p BatchPlan,
    builder: RequestBuilder<'p>,
    window: PipelineWindow<D::Handle>,
    /// Set up in `Steady` but not yet admitted to the window.
    pending: Option<InFlight<D::Handle>>,
    state: PipelineState,
    next_index: usize,
    confirms: usize,
}

impl<'p, 'c, D: Device> WindowedPipeline<'p, 'c, D> {
    async fn drive(&mut self, timestamps: &mut Timestamps) -> Result<()> {
        let ctx = self.ctx;
        let device = ctx.device.device();
        let num_sub_batches = self.plan.num_sub_batches;
        let window_size = self.window.capacity();

        let exclusive = ctx.device.acquire_exclusive().await;
        ignore_if(device.start_program(ctx.program).await, ErrorKind::Aborted)?;
        ignore_if(device.ping(ctx.program).await, ErrorKind::Aborted)?;
        timestamps.mark_above_device();

        self.state = PipelineState::Filling;
        while self.next_index < window_size {
            self.fill_one().await?;
        }

        self.state = PipelineState::Steady;
        while self.next_index < num_sub_batches {
            self.advance().await?;
        }

        self.confirm_window().await?;
        check_confirms(self.confirms, ctx.confirm_policy.expected_confirms(num_sub_batches, window_size))?;
        drop(exclusive);

        self.state = PipelineState::Draining;
        while !self.window.is_empty() {
            let sink = if self.window.len() == 1 { Some(&mut *timestamps) } else { None };
            self.wait_oldest(sink).await?;
            let slot = self.pop_oldest()?;
            self.retire(slot)?;
        }

        self.state = PipelineState::Done;
        debug!(sub_batches = num_sub_batches, confirms = self.confirms, "windowed invocation done");
        Ok(())
    }

    fn needs_confirm(&self, index: usize) -> bool {
        self.ctx.confirm_policy.needs_confirm(index, self.plan.num_sub_batches, self.window.capacity())
    }

    /// Builds sub-batch `index`, checks its inputs and sets it up on the device.
    async fn prepare(&mut self, index: usize) -> Result<InFlight<D::Handle>> {
        let ctx = self.ctx;
        let needs_confirm = self.needs_confirm(index);
        let request = self.builder.build(index)?;
        check_input_tensors(&request.inputs, ctx.metadata)?;
        let mode = if needs_confirm { SubmitMode::Posted } else { SubmitMode::Normal };
        let handle = ctx.device.device().setup(ctx.program, request, mode).await?;
        self.next_index += 1;
        Ok(InFlight::new(index, handle, needs_confirm))
    }

    async fn post(&self, slot: &mut InFlight<D::Handle>) -> Result<()> {
        self.ctx.device.device().post(&mut slot.handle).await?;
        slot.posted = true;
        Ok(())
    }

    /// Confirms every posted request in the window that still owes a
    /// confirmation, oldest first.
    async fn confirm_window(&mut self) -> Result<()> {
        let device = self.ctx.device.device();
        for slot in self.window.iter_mut() {
            if slot.needs_confirm && !slot.confirmed {
                device.confirm_posted(&mut slot.handle).await?;
                slot.confirmed = true;
                self.confirms += 1;
            }
        }
        Ok(())
    }

    async fn fill_one(&mut self) -> Result<()> {
        let ctx = self.ctx;
        let token = ctx.admission.acquire().await?;
        let mut slot = match self.prepare(self.next_index).await {
            Ok(slot) => slot.with_token(token),
            Err(err) => {
                ctx.admission.release(token);
                return Err(err);
            }
        };
        let posted = self.post(&mut slot).await;
        self.window.push(slot)?;
        posted
    }

    async fn advance(&mut self) -> Result<()> {
        let next = self.prepare(self.next_index).await?;
        self.pending = Some(next);

        self.wait_oldest(None).await?;

        let Some(mut next) = self.pending.take() else {
            return Err(PipelineError::Internal("no pending sub-batch to post".to_string()));
        };
        let posted = self.post(&mut next).await;
        if let Err(err) = posted {
            self.pending = Some(next);
            return Err(err);
        }

        let mut oldest = self.pop_oldest()?;
        next.token = oldest.token.take();
        self.window.push(next)?;
        self.retire(oldest)
    }

    async fn wait_oldest(&mut self, timestamps: Option<&mut Timestamps>) -> Result<()> {
        let device = self.ctx.device.device();
        let Some(oldest) = self.window.oldest_mut() else {
            return Err(PipelineError::Internal("wait on an empty pipeline window".to_string()));
        };
        if oldest.needs_confirm && !oldest.confirmed {
            device.confirm_posted(&mut oldest.handle).await?;
            oldest.confirmed = true;
            self.confirms += 1;
        }
        // A failed wait still counts as waited; abort only finishes it.
        let waited = device.wait(&mut oldest.handle, timestamps).await;
        oldest.posted = false;
        waited
    }

    fn pop_oldest(&mut self) -> Result<InFlight<D::Handle>> {
        self.window.pop_oldest()
            .ok_or_else(|| PipelineError::Internal("pop from an empty pipeline window".to_string()))
    }

    /// Finishes a completed request, gives back its token and hands its
    /// outputs to the builder.
    fn retire(&mut self, mut slot: InFlight<D::Handle>) -> Result<()> {
        let ctx = self.ctx;
        if let Some(token) = slot.token.take() {
            ctx.admission.release(token);
        }
        ignore_if(ctx.device.device().finish(&mut slot.handle), ErrorKind::Aborted)?;
        self.builder.retire(slot.handle.into_request())
    }

    /// Waits out and releases everything still owned after a failure.
    async fn abort(&mut self) {
        let ctx = self.ctx;
        let device = ctx.device.device();
        debug!(posted = self.window.posted(), queued = self.window.len(), "draining after failure");
        let mut leftovers: Vec<InFlight<D::Handle>> = self.window.drain().collect();
        leftovers.extend(self.pending.take());

        for mut slot in leftovers {
            if slot.posted {
                if let Err(err) = device.wait(&mut slot.handle, None).await {
                    warn!(sub_batch = slot.index, confirmed = slot.confirmed, error = %err, "wait failed while draining");
                }
            }
            if let Err(err) = device.finish(&mut slot.handle) {
                warn!(sub_batch = slot.index, error = %err, "finish failed while draining");
            }
            if let Some(token) = slot.token.take() {
                ctx.admission.release(token);
            }
        }
        self.state = PipelineState::Done;
    }
}
