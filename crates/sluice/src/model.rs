//! # Models
//!
//! A [`Model`] is one compiled executable bound to one shared device. It is
//! created cheaply and binds lazily: the first [`Model::compute`] (or an
//! explicit [`Model::initialize`]) takes a device from the
//! [`DeviceRegistry`], loads the executable and joins the device-wide
//! admission semaphore. Dropping the model unloads the executable and gives the
//! device back to the registry.
//!
//! Any number of invocations may run concurrently against one model or
//! against several models sharing a device.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, debug_span, warn, Instrument};
use uuid::Uuid;
use crate::backend::TensorBackend;
use crate::config::ModelConfig;
use crate::pipeline::{execute, PipelineContext};
use crate::device::{Device, DeviceHandle, DeviceKey, DeviceRegistry, ProgramId};
use crate::error::{ignore_if, ErrorKind, PipelineError, Result};
use crate::metadata::ExecutableMetadata;
use crate::planner::plan;
use crate::semaphore::AdmissionSemaphore;
use crate::tensor::{OutputTensor, Tensor};
use crate::timing::Timestamps;
use crate::validator::validate_and_size;

/// What an initialized model holds on its device.
struct Binding<D: Device> {
    device: Arc<DeviceHandle<D>>,
    program: ProgramId,
    admission: AdmissionSemaphore,
    window_capacity: usize,
}

enum ModelState<D: Device> {
    Uninitialized,
    Ready(Arc<Binding<D>>),
}

/// A compiled executable bound to a shared device.
pub struct Model<D: Device> {
    metadata: ExecutableMetadata,
    config: ModelConfig,
    registry: Arc<DeviceRegistry<D>>,
    key: DeviceKey,
    state: Mutex<ModelState<D>>,
}

impl<D: Device> Model<D> {
    /// A model that will bind to the device `(session, config.device_index)`.
    pub fn new(
        metadata: ExecutableMetadata,
        config: ModelConfig,
        registry: Arc<DeviceRegistry<D>>,
        session: impl Into<String>,
    ) -> Self {
        let key = DeviceKey::new(session, config.device_index);
        Self {
            metadata,
            config,
            registry,
            key,
            state: Mutex::new(ModelState::Uninitialized),
        }
    }

    pub fn metadata(&self) -> &ExecutableMetadata {
        &self.metadata
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device_key(&self) -> &DeviceKey {
        &self.key
    }

    pub async fn is_initialized(&self) -> bool {
        matches!(*self.state.lock().await, ModelState::Ready(_))
    }

    /// The bound device, once initialized.
    pub async fn device(&self) -> Option<Arc<DeviceHandle<D>>> {
        self.binding().await.map(|binding| binding.device.clone())
    }

    /// Binds the model to its device; returns immediately if already bound.
    pub async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let ModelState::Ready(_) = *state {
            return Ok(());
        }
        if self.metadata.executable.is_empty() {
            return Err(PipelineError::InvalidArgument(format!(
                "no executable supplied for {}", self.metadata.name
            )));
        }
        let sizes = validate_and_size(&self.metadata)?;

        let device = self.registry.acquire(&self.key)?;
        let program = match self.load(&device).await {
            Ok(program) => program,
            Err(err) => {
                if let Err(release_err) = self.registry.release(&self.key) {
                    warn!(device = %self.key, error = %release_err, "release after failed load");
                }
                return Err(err);
            }
        };

        let window_capacity = self.config.window_capacity(device.device().parallelism());
        let admission = device.admission(window_capacity, self.config.unlimited_infers);
        debug!(
            model = %self.metadata.name,
            device = %self.key,
            program = program.0,
            window_capacity,
            admission_capacity = admission.capacity(),
            input_bytes = ?sizes.inputs,
            output_bytes = ?sizes.outputs,
            "model initialized"
        );
        *state = ModelState::Ready(Arc::new(Binding {
            device,
            program,
            admission,
            window_capacity,
        }));
        Ok(())
    }

    async fn load(&self, device: &DeviceHandle<D>) -> Result<ProgramId> {
        let timeout = self.config.timeout();
        match tokio::time::timeout(timeout, device.device().load(&self.metadata.executable, &self.config)).await {
            Ok(loaded) => loaded,
            Err(_) => Err(PipelineError::Device(format!(
                "loading {} timed out after {:?}", self.metadata.name, timeout
            ))),
        }
    }

    async fn binding(&self) -> Option<Arc<Binding<D>>> {
        match &*self.state.lock().await {
            ModelState::Ready(binding) => Some(binding.clone()),
            ModelState::Uninitialized => None,
        }
    }

    /// Runs one invocation over `inputs`, in declaration order.
    ///
    /// The runtime batch may differ from the batch the executable was compiled
    /// for; outputs always carry the runtime batch.
    pub async fn compute(&self, inputs: &[Tensor]) -> Result<Vec<OutputTensor>> {
        let invocation = Uuid::new_v4();
        let span = debug_span!("compute", model = %self.metadata.name, %invocation);
        self.run(inputs).instrument(span).await
    }

    async fn run(&self, inputs: &[Tensor]) -> Result<Vec<OutputTensor>> {
        let mut timestamps = Timestamps::new();
        timestamps.mark_enter();

        let plan = plan(&self.metadata, inputs)?;
        ignore_if(self.initialize().await, ErrorKind::Aborted)?;
        let Some(binding) = self.binding().await else {
            return Err(PipelineError::Internal(format!(
                "model {} is not initialized", self.metadata.name
            )));
        };

        let ctx = PipelineContext {
            device: &binding.device,
            program: binding.program,
            admission: &binding.admission,
            metadata: &self.metadata,
            window_capacity: binding.window_capacity,
            confirm_policy: self.config.confirm_policy,
        };
        let outputs = execute(&ctx, &plan, inputs, &mut timestamps).await?;

        timestamps.mark_exit();
        debug!(timing = %timestamps.timing_string(), "invocation done");
        Ok(outputs)
    }

    /// [`compute`](Self::compute) over tensors of a backend library.
    pub async fn compute_backend<B: TensorBackend>(&self, inputs: &[B]) -> Result<Vec<B>> {
        let host = inputs.iter()
            .map(TensorBackend::to_host)
            .collect::<Result<Vec<Tensor>>>()?;
        self.compute(&host).await?
            .into_iter()
            .map(B::from_host)
            .collect()
    }
}

impl<D: Device> Drop for Model<D> {
    fn drop(&mut self) {
        let state = std::mem::replace(self.state.get_mut(), ModelState::Uninitialized);
        let ModelState::Ready(binding) = state else {
            return;
        };
        binding.device.device().unload(binding.program);
        match self.registry.release(&self.key) {
            Ok(closed) => debug!(model = %self.metadata.name, device = %self.key, closed, "model dropped"),
            Err(err) => warn!(model = %self.metadata.name, error = %err, "device release failed"),
        }
    }
}
