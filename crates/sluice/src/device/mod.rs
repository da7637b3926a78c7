//! # Device collaborator
//!
//! The pipeline never talks to hardware directly. It drives an implementation
//! of the [`Device`] trait, which owns the transport and the device-side
//! buffers, through a small set of calls: start a program, set up, post,
//! confirm and wait on per-request handles, and finish them.
//!
//! Devices are shared. A [`DeviceHandle`] wraps one device together with the
//! state every model bound to it shares:
//!
//! - the device-exclusive lock serialising submission bursts
//! - the admission semaphore bounding device-resident requests
//!
//! Handles are pooled by a [`DeviceRegistry`], keyed by [`DeviceKey`] and
//! reference counted so that a device lives exactly as long as some model
//! uses it.

mod core_trait;
mod registry;

#[cfg(test)]
/// Scripted in-memory device.
///
/// Records every call in an event log and supports fault injection.
pub(crate) mod mock;

pub use core_trait::*;
pub use registry::{DeviceKey, DeviceRegistry};

use std::sync::OnceLock;
use tokio::sync::{Mutex, MutexGuard};
use crate::semaphore::AdmissionSemaphore;

/// A device plus the state shared by everything bound to it.
pub struct DeviceHandle<D> {
    key: DeviceKey,
    device: D,
    exclusive: Mutex<()>,
    admission: OnceLock<AdmissionSemaphore>,
}

impl<D: Device> DeviceHandle<D> {
    pub(crate) fn new(key: DeviceKey, device: D) -> Self {
        Self {
            key,
            device,
            exclusive: Mutex::new(()),
            admission: OnceLock::new(),
        }
    }

    pub fn key(&self) -> &DeviceKey {
        &self.key
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Takes the device-exclusive lock; released when the guard drops.
    pub async fn acquire_exclusive(&self) -> MutexGuard<'_, ()> {
        self.exclusive.lock().await
    }

    /// The device-wide admission semaphore.
    ///
    /// The first binding fixes the capacity; later bindings share it.
    pub fn admission(&self, capacity: usize, unlimited: bool) -> AdmissionSemaphore {
        self.admission.get_or_init(|| {
            if unlimited {
                AdmissionSemaphore::unlimited()
            } else {
                AdmissionSemaphore::bounded(capacity)
            }
        }).clone()
    }
}
