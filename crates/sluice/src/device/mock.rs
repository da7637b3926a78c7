use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use crate::config::ModelConfig;
use crate::error::{PipelineError, Result};
use crate::timing::Timestamps;
use super::{Device, ProgramId, RequestHandle, SubBatchRequest, SubmitMode};

/// A call observed by the mock device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    Load,
    Unload,
    Start,
    Ping,
    Setup(usize),
    Post(usize),
    Confirm(usize),
    Wait(usize),
    Finish(usize),
}

/// Call sites a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum FaultSite {
    Load,
    Start,
    Setup(usize),
    Post(usize),
    Confirm(usize),
    Wait(usize),
    Finish(usize),
}

pub(crate) struct MockHandle {
    request: SubBatchRequest,
    mode: SubmitMode,
    posted: bool,
    confirmed: bool,
}

impl RequestHandle for MockHandle {
    fn index(&self) -> usize {
        self.request.index
    }

    fn into_request(self) -> SubBatchRequest {
        self.request
    }
}

/// In-memory device whose program writes each input byte plus one into the
/// output with the same position (the last input feeds any extra outputs).
pub(crate) struct MockDevice {
    parallelism: usize,
    start_delay: Option<Duration>,
    wait_delay: Option<Duration>,
    events: Mutex<Vec<Event>>,
    faults: Mutex<HashMap<FaultSite, PipelineError>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    next_program: AtomicU32,
}

impl MockDevice {
    pub(crate) fn new() -> Self {
        Self {
            parallelism: 1,
            start_delay: None,
            wait_delay: None,
            events: Mutex::new(vec![]),
            faults: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            next_program: AtomicU32::new(1),
        }
    }

    pub(crate) fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub(crate) fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    pub(crate) fn with_wait_delay(mut self, delay: Duration) -> Self {
        self.wait_delay = Some(delay);
        self
    }

    /// Fails the next call at `site` with `error`.
    pub(crate) fn inject(&self, site: FaultSite, error: PipelineError) {
        self.faults.lock().insert(site, error);
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Indices of all events of one kind, in the order they happened.
    pub(crate) fn indices(&self, pick: fn(&Event) -> Option<usize>) -> Vec<usize> {
        self.events.lock().iter().filter_map(pick).collect()
    }

    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }

    fn fault(&self, site: FaultSite) -> Result<()> {
        match self.faults.lock().remove(&site) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn run_program(request: &mut SubBatchRequest) {
        let Some(last) = request.inputs.len().checked_sub(1) else {
            return;
        };
        for (idx, output) in request.outputs.iter_mut().enumerate() {
            let source = request.inputs[idx.min(last)].data();
            if source.is_empty() {
                continue;
            }
            for (pos, byte) in output.data_mut().iter_mut().enumerate() {
                *byte = source[pos % source.len()].wrapping_add(1);
            }
        }
    }
}

#[async_trait]
impl Device for MockDevice {
    type Handle = MockHandle;

    async fn load(&self, _executable: &Bytes, _config: &ModelConfig) -> Result<ProgramId> {
        self.fault(FaultSite::Load)?;
        self.record(Event::Load);
        Ok(ProgramId(self.next_program.fetch_add(1, Ordering::SeqCst)))
    }

    fn unload(&self, _program: ProgramId) {
        self.record(Event::Unload);
    }

    fn parallelism(&self) -> usize {
        self.parallelism
    }

    async fn start_program(&self, _program: ProgramId) -> Result<()> {
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }
        self.record(Event::Start);
        self.fault(FaultSite::Start)
    }

    async fn ping(&self, _program: ProgramId) -> Result<()> {
        self.record(Event::Ping);
        Ok(())
    }

    async fn setup(&self, _program: ProgramId, request: SubBatchRequest, mode: SubmitMode) -> Result<MockHandle> {
        self.fault(FaultSite::Setup(request.index))?;
        self.record(Event::Setup(request.index));
        Ok(MockHandle { request, mode, posted: false, confirmed: false })
    }

    async fn post(&self, handle: &mut MockHandle) -> Result<()> {
        self.fault(FaultSite::Post(handle.index()))?;
        if handle.posted {
            return Err(PipelineError::Internal(format!("request {} posted twice", handle.index())));
        }
        handle.posted = true;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.record(Event::Post(handle.index()));
        Ok(())
    }

    async fn confirm_posted(&self, handle: &mut MockHandle) -> Result<()> {
        self.fault(FaultSite::Confirm(handle.index()))?;
        if handle.mode != SubmitMode::Posted || !handle.posted || handle.confirmed {
            return Err(PipelineError::Internal(format!(
                "unexpected confirmation of request {}", handle.index()
            )));
        }
        handle.confirmed = true;
        self.record(Event::Confirm(handle.index()));
        Ok(())
    }

    async fn wait(&self, handle: &mut MockHandle, timestamps: Option<&mut Timestamps>) -> Result<()> {
        if !handle.posted {
            return Err(PipelineError::Internal(format!("wait on unposted request {}", handle.index())));
        }
        match self.wait_delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        handle.posted = false;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.fault(FaultSite::Wait(handle.index()))?;
        Self::run_program(&mut handle.request);
        self.record(Event::Wait(handle.index()));
        if let Some(ts) = timestamps {
            ts.mark_below_device();
        }
        Ok(())
    }

    fn finish(&self, handle: &mut MockHandle) -> Result<()> {
        self.record(Event::Finish(handle.index()));
        self.fault(FaultSite::Finish(handle.index()))
    }
}
