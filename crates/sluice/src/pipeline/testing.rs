//! Shared fixtures for pipeline tests.

use crate::config::ConfirmPolicy;
use crate::device::{DeviceHandle, DeviceKey, ProgramId};
use crate::device::mock::MockDevice;
use crate::error::Result;
use crate::metadata::{ExecutableMetadata, SignatureLists};
use crate::planner::plan;
use crate::semaphore::AdmissionSemaphore;
use crate::tensor::{DType, OutputTensor, Tensor};
use crate::timing::Timestamps;
use super::{execute, PipelineContext};

pub(crate) fn mock_device() -> MockDevice {
    MockDevice::new()
}

/// `x: u8[4, 2] -> y: u8[4, 2]`, both batched on axis 0.
pub(crate) fn batch_metadata() -> ExecutableMetadata {
    ExecutableMetadata {
        name: "add_one".into(),
        inputs: SignatureLists {
            names: vec!["x".into()],
            dtypes: vec![DType::U8],
            shapes: vec![vec![4, 2]],
            batch_axis: vec![0],
        },
        outputs: SignatureLists {
            names: vec!["y".into()],
            dtypes: vec![DType::U8],
            shapes: vec![vec![4, 2]],
            batch_axis: vec![0],
        },
        ..Default::default()
    }
}

/// [`batch_metadata`] plus an unbatched `bias: u8[2] -> stat: u8[2]` pair.
pub(crate) fn stat_metadata() -> ExecutableMetadata {
    let mut metadata = batch_metadata();
    metadata.inputs.names.push("bias".into());
    metadata.inputs.dtypes.push(DType::U8);
    metadata.inputs.shapes.push(vec![2]);
    metadata.inputs.batch_axis.push(-1);
    metadata.outputs.names.push("stat".into());
    metadata.outputs.dtypes.push(DType::U8);
    metadata.outputs.shapes.push(vec![2]);
    metadata.outputs.batch_axis.push(-1);
    metadata
}

/// `rows` rows of two bytes counting up from zero.
pub(crate) fn rows_input(rows: usize) -> Tensor {
    let data: Vec<u8> = (0..rows * 2).map(|v| v as u8).collect();
    Tensor::new(DType::U8, vec![rows, 2], data).unwrap()
}

pub(crate) fn bias_input() -> Tensor {
    Tensor::new(DType::U8, vec![2], vec![7u8, 9]).unwrap()
}

/// What the mock program writes for [`rows_input`].
pub(crate) fn expected_rows(rows: usize) -> Vec<u8> {
    (0..rows * 2).map(|v| (v as u8).wrapping_add(1)).collect()
}

pub(crate) struct Fixture {
    pub(crate) handle: DeviceHandle<MockDevice>,
    pub(crate) admission: AdmissionSemaphore,
    pub(crate) metadata: ExecutableMetadata,
}

impl Fixture {
    pub(crate) fn new(device: MockDevice, admission_capacity: usize) -> Self {
        Self::with_metadata(device, admission_capacity, batch_metadata())
    }

    pub(crate) fn with_metadata(device: MockDevice, admission_capacity: usize, metadata: ExecutableMetadata) -> Self {
        Self::with_admission(device, AdmissionSemaphore::bounded(admission_capacity), metadata)
    }

    pub(crate) fn with_admission(device: MockDevice, admission: AdmissionSemaphore, metadata: ExecutableMetadata) -> Self {
        Self {
            handle: DeviceHandle::new(DeviceKey::new("test", None), device),
            admission,
            metadata,
        }
    }

    pub(crate) fn device(&self) -> &MockDevice {
        self.handle.device()
    }

    pub(crate) fn context(&self, window_capacity: usize, confirm_policy: ConfirmPolicy) -> PipelineContext<'_, MockDevice> {
        PipelineContext {
            device: &self.handle,
            program: ProgramId(1),
            admission: &self.admission,
            metadata: &self.metadata,
            window_capacity,
            confirm_policy,
        }
    }

    pub(crate) async fn run_with(
        &self,
        inputs: &[Tensor],
        window_capacity: usize,
        confirm_policy: ConfirmPolicy,
        timestamps: &mut Timestamps,
    ) -> Result<Vec<OutputTensor>> {
        let plan = plan(&self.metadata, inputs)?;
        let ctx = self.context(window_capacity, confirm_policy);
        execute(&ctx, &plan, inputs, timestamps).await
    }

    pub(crate) async fn run(
        &self,
        inputs: &[Tensor],
        window_capacity: usize,
        confirm_policy: ConfirmPolicy,
    ) -> Result<Vec<OutputTensor>> {
        let mut timestamps = Timestamps::new();
        self.run_with(inputs, window_capacity, confirm_policy, &mut timestamps).await
    }

    pub(crate) async fn run_rows(
        &self,
        rows: usize,
        window_capacity: usize,
        confirm_policy: ConfirmPolicy,
    ) -> Result<Vec<OutputTensor>> {
        self.run(&[rows_input(rows)], window_capacity, confirm_policy).await
    }
}
