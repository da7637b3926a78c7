//! Bounded FIFO of in-flight sub-batch requests.

use std::collections::VecDeque;
use crate::error::{PipelineError, Result};
use crate::semaphore::AdmissionToken;

/// A request the scheduler has set up and still owns.
pub(crate) struct InFlight<H> {
    pub(crate) index: usize,
    pub(crate) handle: H,
    /// Admission token held on behalf of this request, if any.
    pub(crate) token: Option<AdmissionToken>,
    /// Posted and not yet waited.
    pub(crate) posted: bool,
    pub(crate) needs_confirm: bool,
    pub(crate) confirmed: bool,
}

impl<H> InFlight<H> {
    pub(crate) fn new(index: usize, handle: H, needs_confirm: bool) -> Self {
        Self {
            index,
            handle,
            token: None,
            posted: false,
            needs_confirm,
            confirmed: false,
        }
    }

    pub(crate) fn with_token(mut self, token: AdmissionToken) -> Self {
        self.token = Some(token);
        self
    }
}

/// Requests in submission order, oldest first, never more than `capacity`.
pub(crate) struct PipelineWindow<H> {
    slots: VecDeque<InFlight<H>>,
    capacity: usize,
}

impl<H> PipelineWindow<H> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    /// Appends the newest request; it must follow the current newest.
    pub(crate) fn push(&mut self, slot: InFlight<H>) -> Result<()> {
        if self.is_full() {
            return Err(PipelineError::Internal(format!(
                "pipeline window full ({} requests), cannot admit sub-batch {}",
                self.capacity, slot.index
            )));
        }
        if let Some(newest) = self.slots.back() {
            if slot.index <= newest.index {
                return Err(PipelineError::Internal(format!(
                    "sub-batch {} queued after {}", slot.index, newest.index
                )));
            }
        }
        self.slots.push_back(slot);
        Ok(())
    }

    pub(crate) fn oldest_mut(&mut self) -> Option<&mut InFlight<H>> {
        self.slots.front_mut()
    }

    pub(crate) fn pop_oldest(&mut self) -> Option<InFlight<H>> {
        self.slots.pop_front()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut InFlight<H>> + '_ {
        self.slots.iter_mut()
    }

    /// Number of requests currently posted to the device.
    pub(crate) fn posted(&self) -> usize {
        self.slots.iter().filter(|slot| slot.posted).count()
    }

    /// Empties the window, oldest first.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = InFlight<H>> + '_ {
        self.slots.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut window = PipelineWindow::new(3);
        for idx in 0..3 {
            window.push(InFlight::new(idx, format!("h{}", idx), false)).unwrap();
        }
        assert!(window.is_full());
        assert_eq!(window.oldest_mut().unwrap().handle, "h0");

        let popped: Vec<usize> = std::iter::from_fn(|| window.pop_oldest()).map(|s| s.index).collect();
        assert_eq!(popped, vec![0, 1, 2]);
        assert!(window.is_empty());
    }

    #[test]
    fn test_push_beyond_capacity() {
        let mut window = PipelineWindow::new(1);
        window.push(InFlight::new(0, (), false)).unwrap();
        let err = window.push(InFlight::new(1, (), false)).unwrap_err();
        assert!(matches!(err, PipelineError::Internal(_)));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_push_out_of_order() {
        let mut window = PipelineWindow::new(4);
        window.push(InFlight::new(2, (), false)).unwrap();
        assert!(window.push(InFlight::new(1, (), false)).is_err());
    }

    #[test]
    fn test_iter_mut_oldest_first() {
        let mut window = PipelineWindow::new(3);
        for idx in 0..3 {
            window.push(InFlight::new(idx, (), idx > 0)).unwrap();
        }
        let mut seen = vec![];
        for slot in window.iter_mut().filter(|slot| slot.needs_confirm) {
            slot.confirmed = true;
            seen.push(slot.index);
        }
        assert_eq!(seen, vec![1, 2]);
        assert!(!window.oldest_mut().unwrap().confirmed);
    }

    #[test]
    fn test_posted_count_and_drain() {
        let mut window = PipelineWindow::new(4);
        for idx in 0..3 {
            let mut slot = InFlight::new(idx, (), false);
            slot.posted = idx != 1;
            window.push(slot).unwrap();
        }
        assert_eq!(window.posted(), 2);
        assert_eq!(window.drain().map(|s| s.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(window.capacity(), 4);
        assert!(window.is_empty());
    }
}
