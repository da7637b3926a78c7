//! # Sluice
//!
//! Windowed sub-batch pipelining for accelerator executables compiled at a
//! fixed batch size.
//!
//! ## Overview
//!
//! An executable compiled for a hardware batch of `H` rows can only ever be
//! handed exactly `H` rows. Callers rarely have exactly `H`. Sluice accepts any
//! runtime batch `R`, splits it into `ceil(R / H)` hardware-sized sub-batches
//! (zero-padding the last one if needed), keeps a bounded window of them in
//! flight on the device, and writes every result straight into the caller's
//! `R`-row output.
//!
//! Key components include:
//!
//! - A batch planner deciding between the single-shot and windowed paths
//! - A request builder slicing inputs and carving output views without copies
//! - A windowed scheduler that overlaps submission with completion
//! - A device-wide admission semaphore bounding in-flight requests across
//!   every concurrent invocation
//! - A device registry sharing devices between models by reference count
//!
//! ## Architecture
//!
//! ### Assumptions
//! Regardless of device, sluice reserves one dimension:
//!  - The `0th` dimension is the batch dimension of every batched tensor
//!  - Tensors without a batch axis are handed whole to every sub-batch
//!
//! ### Devices
//!
//! The [`Device`](device::Device) trait is the boundary to the hardware. The
//! pipeline sets up, posts, confirms, waits and finishes per-request handles;
//! transport, buffers and program loading stay behind the trait.
//!
//! ### Models
//!
//! A [`Model`](model::Model) binds one executable to one shared device and
//! runs invocations with [`Model::compute`](model::Model::compute).
//!
//! ## Features
//!
//! - **candle** - Enables candle tensor conversion
//!
//! ## Configuration
//!
//! [`ModelConfig`](config::ModelConfig) can be overlaid from the environment:
//! `SLUICE_MAX_NUM_INFERS` bounds in-flight requests, and
//! `SLUICE_UNLIMITED_INFERS=yes` lifts the bound.
//!

mod request;
mod timing;

pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod metadata;
pub mod model;
pub mod pipeline;
pub mod planner;
pub mod semaphore;
pub mod tensor;
pub mod validator;

/// Constants for client reference
pub use tensor::constant;

pub use config::{ConfirmPolicy, ModelConfig};
pub use error::{ErrorKind, PipelineError, Result};
pub use metadata::ExecutableMetadata;
pub use model::Model;
pub use request::RequestBuilder;
pub use tensor::{DType, OutputTensor, Tensor};
pub use timing::Timestamps;
