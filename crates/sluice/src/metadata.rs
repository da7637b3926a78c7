//! # Compiled executable metadata
//!
//! The compiler emits one [`SignatureLists`] per side (inputs and outputs) as
//! parallel lists: names, element types, declared shapes and batch axes. The
//! lists are trusted to line up by position, which [`SignatureLists::descriptors`]
//! checks before anything else reads them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use crate::error::{PipelineError, Result};
use crate::tensor::DType;
use crate::tensor::constant::{BATCH_DIM, NO_BATCH_AXIS};

/// Whether a list describes the inputs or the outputs of an executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Input,
    Output,
}

impl Side {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Side::Input => "input",
            Side::Output => "output",
        }
    }
}

/// Name, type and shape of one tensor in the executable's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDescriptor {
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
    /// `0` for a leading batch dimension, [`NO_BATCH_AXIS`] otherwise.
    pub batch_axis: i64,
}

impl TensorDescriptor {
    /// True if the leading dimension of this tensor is the batch dimension.
    pub fn is_batched(&self) -> bool {
        self.batch_axis == BATCH_DIM as i64
    }
}

/// Parallel signature lists for one side of an executable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureLists {
    pub names: Vec<String>,
    pub dtypes: Vec<DType>,
    pub shapes: Vec<Vec<usize>>,
    pub batch_axis: Vec<i64>,
}

impl SignatureLists {
    /// Number of declared tensors.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// True if the batch-axis list lines up with the names. A misaligned list
    /// is ignored, which disables dynamic batching for the side.
    pub fn has_batch_axes(&self) -> bool {
        self.batch_axis.len() == self.names.len()
    }

    /// Checks that names, types and shapes line up.
    pub fn check(&self, side: Side) -> Result<()> {
        if self.names.len() != self.dtypes.len() || self.names.len() != self.shapes.len() {
            return Err(PipelineError::Precondition(format!(
                "incorrect number of {side}s: {side}_names size {}, {side}_dtypes size {}, {side}_shapes size {}",
                self.names.len(), self.dtypes.len(), self.shapes.len(),
                side = side.label(),
            )));
        }
        Ok(())
    }

    /// Zips the lists into descriptors.
    pub fn descriptors(&self, side: Side) -> Result<Vec<TensorDescriptor>> {
        self.check(side)?;
        let use_axes = self.has_batch_axes();
        Ok(self.names.iter().enumerate().map(|(idx, name)| TensorDescriptor {
            name: name.clone(),
            dtype: self.dtypes[idx],
            shape: self.shapes[idx].clone(),
            batch_axis: if use_axes { self.batch_axis[idx] } else { NO_BATCH_AXIS },
        }).collect())
    }
}

/// Everything the pipeline knows about one compiled executable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutableMetadata {
    /// Node name, used in logs.
    pub name: String,
    /// Opaque compiled program handed to the device on load.
    #[serde(skip)]
    pub executable: Bytes,
    pub inputs: SignatureLists,
    pub outputs: SignatureLists,
}

impl ExecutableMetadata {
    /// Checks both sides' lists.
    pub fn check(&self) -> Result<()> {
        self.inputs.check(Side::Input)?;
        self.outputs.check(Side::Output)
    }

    /// Parses the signature from JSON and attaches the executable blob.
    pub fn from_json(json: &str, executable: impl Into<Bytes>) -> Result<Self> {
        let mut metadata: ExecutableMetadata = serde_json::from_str(json)
            .map_err(|e| PipelineError::Precondition(format!("malformed executable metadata: {}", e)))?;
        metadata.executable = executable.into();
        Ok(metadata)
    }

    /// True if dynamic batching is enabled by the lists: both batch-axis
    /// lists line up and at least one input declares a batch axis.
    pub fn batch_axes_enabled(&self) -> bool {
        self.inputs.has_batch_axes()
            && self.outputs.has_batch_axes()
            && self.inputs.batch_axis.iter().any(|axis| *axis != NO_BATCH_AXIS)
    }
}
