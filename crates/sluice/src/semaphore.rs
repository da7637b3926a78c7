//! # Admission control
//!
//! [`AdmissionSemaphore`] bounds how many sub-batch requests may be resident on
//! a device at once, across every invocation and every model bound to that
//! device. Each in-flight request holds one [`AdmissionToken`]; the token is
//! given back with [`AdmissionSemaphore::release`] once the request retires.
//!
//! The semaphore can be built in unlimited mode, in which case `acquire`
//! returns immediately with an empty token.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;
use crate::error::{PipelineError, Result};

/// One unit of permission to have a request in flight.
#[derive(Debug)]
pub struct AdmissionToken {
    permit: Option<OwnedSemaphorePermit>,
}

impl AdmissionToken {
    /// True if the token was issued by a bounded semaphore.
    pub fn is_bounded(&self) -> bool {
        self.permit.is_some()
    }
}

/// Counting semaphore shared by every invocation against one device.
#[derive(Debug, Clone)]
pub struct AdmissionSemaphore {
    inner: Option<Arc<Semaphore>>,
    capacity: usize,
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl AdmissionSemaphore {
    /// A semaphore admitting at most `capacity` requests.
    pub fn bounded(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        debug!(capacity, "admission semaphore capacity");
        Self {
            inner: Some(Arc::new(Semaphore::new(capacity))),
            capacity,
            acquired: Default::default(),
            released: Default::default(),
        }
    }

    /// A semaphore that never blocks.
    pub fn unlimited() -> Self {
        debug!("admission semaphore disabled");
        Self {
            inner: None,
            capacity: usize::MAX,
            acquired: Default::default(),
            released: Default::default(),
        }
    }

    /// True if acquisition can block.
    pub fn is_bounded(&self) -> bool {
        self.inner.is_some()
    }

    /// Configured capacity; `usize::MAX` when unlimited.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tokens currently available, or `None` when unlimited.
    pub fn available(&self) -> Option<usize> {
        self.inner.as_ref().map(|sem| sem.available_permits())
    }

    /// Waits until a token is available.
    pub async fn acquire(&self) -> Result<AdmissionToken> {
        let permit = match &self.inner {
            None => None,
            Some(sem) => Some(sem.clone().acquire_owned().await.map_err(|_| {
                PipelineError::Internal("admission semaphore closed".to_string())
            })?),
        };
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(AdmissionToken { permit })
    }

    /// Gives a token back.
    pub fn release(&self, token: AdmissionToken) {
        drop(token.permit);
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    /// Total tokens handed out so far.
    pub fn acquired_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Total tokens given back so far.
    pub fn released_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Tokens handed out and not yet given back.
    pub fn outstanding(&self) -> usize {
        self.acquired_count().saturating_sub(self.released_count())
    }
}
