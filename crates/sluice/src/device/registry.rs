use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use parking_lot::Mutex;
use tracing::debug;
use crate::error::{PipelineError, Result};
use super::{Device, DeviceHandle};

/// Identifies one shareable device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    /// Session the device was opened for.
    pub session: String,
    /// Device index pinned by the model config, if any.
    pub device_index: Option<u32>,
}

impl DeviceKey {
    pub fn new(session: impl Into<String>, device_index: Option<u32>) -> Self {
        Self { session: session.into(), device_index }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device_index {
            Some(idx) => write!(f, "{}#{}", self.session, idx),
            None => write!(f, "{}#any", self.session),
        }
    }
}

type DeviceFactory<D> = Box<dyn Fn(&DeviceKey) -> Result<D> + Send + Sync>;

struct Entry<D> {
    handle: Arc<DeviceHandle<D>>,
    refs: usize,
}

/// Reference-counted pool of shared devices.
///
/// Devices are created on first [`acquire`](Self::acquire) by the factory and
/// dropped by the [`release`](Self::release) that brings their count to zero.
pub struct DeviceRegistry<D> {
    factory: DeviceFactory<D>,
    entries: Mutex<HashMap<DeviceKey, Entry<D>>>,
}

impl<D: Device> DeviceRegistry<D> {
    /// A registry creating devices with `factory`.
    pub fn new<F>(factory: F) -> Self
    where F: Fn(&DeviceKey) -> Result<D> + Send + Sync + 'static
    {
        Self {
            factory: Box::new(factory),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the device for `key`, creating it if needed, and takes a reference.
    pub fn acquire(&self, key: &DeviceKey) -> Result<Arc<DeviceHandle<D>>> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.refs += 1;
            debug!(device = %key, refs = entry.refs, "reusing device");
            return Ok(entry.handle.clone());
        }
        let device = (self.factory)(key)?;
        let handle = Arc::new(DeviceHandle::new(key.clone(), device));
        entries.insert(key.clone(), Entry { handle: handle.clone(), refs: 1 });
        debug!(device = %key, "opened device");
        Ok(handle)
    }

    /// Drops one reference; returns true if the device was closed.
    pub fn release(&self, key: &DeviceKey) -> Result<bool> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return Err(PipelineError::Internal(format!("release of unknown device {}", key)));
        };
        entry.refs -= 1;
        if entry.refs > 0 {
            return Ok(false);
        }
        entries.remove(key);
        debug!(device = %key, "closed device");
        Ok(true)
    }

    /// Number of open devices.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// References held on `key`, zero if it is not open.
    pub fn refcount(&self, key: &DeviceKey) -> usize {
        self.entries.lock().get(key).map(|e| e.refs).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::device::mock::MockDevice;

    #[test]
    fn test_acquire_shares_device_per_key() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let registry = DeviceRegistry::new(move |_key: &DeviceKey| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(MockDevice::new())
        });
        let key = DeviceKey::new("session", Some(0));

        let a = registry.acquire(&key).unwrap();
        let b = registry.acquire(&key).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(registry.refcount(&key), 2);

        let other = registry.acquire(&DeviceKey::new("session", Some(1))).unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_release_closes_at_zero() {
        let registry = DeviceRegistry::new(|_: &DeviceKey| Ok(MockDevice::new()));
        let key = DeviceKey::new("session", None);
        registry.acquire(&key).unwrap();
        registry.acquire(&key).unwrap();

        assert!(!registry.release(&key).unwrap());
        assert_eq!(registry.refcount(&key), 1);
        assert!(registry.release(&key).unwrap());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_release_unknown_key() {
        let registry = DeviceRegistry::new(|_: &DeviceKey| Ok(MockDevice::new()));
        let err = registry.release(&DeviceKey::new("nope", None)).unwrap_err();
        assert!(matches!(err, PipelineError::Internal(_)));
    }

    #[test]
    fn test_factory_error_propagates() {
        let registry: DeviceRegistry<MockDevice> = DeviceRegistry::new(|key: &DeviceKey| {
            Err(PipelineError::Device(format!("no device for {}", key)))
        });
        assert!(registry.acquire(&DeviceKey::new("s", Some(3))).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(DeviceKey::new("s", Some(3)).to_string(), "s#3");
        assert_eq!(DeviceKey::new("s", None).to_string(), "s#any");
    }

    #[tokio::test]
    async fn test_admission_is_fixed_by_first_binding() {
        let registry = DeviceRegistry::new(|_: &DeviceKey| Ok(MockDevice::new()));
        let handle = registry.acquire(&DeviceKey::new("s", None)).unwrap();
        let first = handle.admission(3, false);
        let second = handle.admission(8, true);
        assert_eq!(first.capacity(), 3);
        assert_eq!(second.capacity(), 3);
        assert!(second.is_bounded());
    }
}
