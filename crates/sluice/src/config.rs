//! # Model configuration
//!
//! [`ModelConfig`] carries the knobs that shape how a model is bound to its
//! device and how many sub-batch requests it may keep in flight.
//!
//! A config can be built in code, deserialised from JSON with
//! [`ModelConfig::from_json`], and then overlaid with environment variables via
//! [`ModelConfig::apply_env`]:
//!
//! - `SLUICE_UNLIMITED_INFERS=yes` disables the admission semaphore
//! - `SLUICE_MAX_NUM_INFERS=<n>` overrides [`ModelConfig::max_num_infers`]

use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use crate::error::{PipelineError, Result};

/// Environment variable that disables admission control when set to `yes`.
pub const ENV_UNLIMITED_INFERS: &str = "SLUICE_UNLIMITED_INFERS";

/// Environment variable overriding the number of in-flight requests.
pub const ENV_MAX_NUM_INFERS: &str = "SLUICE_MAX_NUM_INFERS";

/// Decides which sub-batch requests need a posted confirmation before the
/// device-exclusive lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmPolicy {
    /// Only requests within one window of the end of the invocation.
    #[default]
    WindowTail,
    /// No request is confirmed.
    Never,
    /// Every request is confirmed.
    Always,
}

impl ConfirmPolicy {
    /// Whether sub-batch `index` of `num_sub_batches` must be posted and confirmed.
    pub fn needs_confirm(&self, index: usize, num_sub_batches: usize, window_size: usize) -> bool {
        match self {
            ConfirmPolicy::WindowTail => index >= num_sub_batches.saturating_sub(window_size),
            ConfirmPolicy::Never => false,
            ConfirmPolicy::Always => true,
        }
    }

    /// Number of requests this policy selects for one invocation.
    pub fn expected_confirms(&self, num_sub_batches: usize, window_size: usize) -> usize {
        (0..num_sub_batches)
            .filter(|idx| self.needs_confirm(*idx, num_sub_batches, window_size))
            .count()
    }
}

/// Per-model configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Requests a single invocation may keep in flight, before scaling by the
    /// device's parallelism factor.
    pub max_num_infers: usize,

    /// Disables the admission semaphore entirely.
    pub unlimited_infers: bool,

    /// Load timeout forwarded to the device.
    pub timeout_secs: u64,

    /// Preferred device index, if the caller pins one.
    pub device_index: Option<u32>,

    /// Which requests need a posted confirmation.
    pub confirm_policy: ConfirmPolicy,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_num_infers: 5,
            unlimited_infers: false,
            timeout_secs: 10,
            device_index: None,
            confirm_policy: ConfirmPolicy::default(),
        }
    }
}

impl ModelConfig {
    /// Parses a config from JSON; absent fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| PipelineError::InvalidArgument(format!("malformed model config: {}", e)))
    }

    /// Overlays values from the process environment.
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlays values from an arbitrary lookup, e.g. a map in tests.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Self
    where F: Fn(&str) -> Option<String>
    {
        if let Some(value) = lookup(ENV_UNLIMITED_INFERS) {
            self.unlimited_infers = value == "yes";
        }
        if let Some(value) = lookup(ENV_MAX_NUM_INFERS) {
            match value.parse::<usize>() {
                Ok(n) if n > 0 => self.max_num_infers = n,
                _ => warn!(value = %value, "ignoring invalid {}", ENV_MAX_NUM_INFERS),
            }
        }
        debug!(config = ?self, "model config resolved");
        self
    }

    /// Load timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Window capacity once scaled by the device's parallelism factor; never below one.
    pub fn window_capacity(&self, parallelism: usize) -> usize {
        self.max_num_infers.saturating_mul(parallelism).max(1)
    }
}
