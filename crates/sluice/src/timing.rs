//! Coarse timestamps recorded at pipeline milestones. Purely observational.

use std::time::{Duration, Instant};

/// Milestones of one invocation.
#[derive(Debug, Clone, Default)]
pub struct Timestamps {
    enter: Option<Instant>,
    above_device: Option<Instant>,
    below_device: Option<Instant>,
    exit: Option<Instant>,
}

impl Timestamps {
    pub fn new() -> Self {
        Self::default()
    }

    /// The invocation started.
    pub fn mark_enter(&mut self) {
        self.enter = Some(Instant::now());
    }

    /// The first request is about to be posted to the device.
    pub fn mark_above_device(&mut self) {
        self.above_device.get_or_insert_with(Instant::now);
    }

    /// The device reported the tracked request complete.
    pub fn mark_below_device(&mut self) {
        self.below_device = Some(Instant::now());
    }

    /// The invocation finished.
    pub fn mark_exit(&mut self) {
        self.exit = Some(Instant::now());
    }

    /// Time from entering to the first post.
    pub fn setup_time(&self) -> Option<Duration> {
        Some(self.above_device?.duration_since(self.enter?))
    }

    /// Time spent with requests on the device.
    pub fn device_time(&self) -> Option<Duration> {
        Some(self.below_device?.duration_since(self.above_device?))
    }

    /// Total time of the invocation.
    pub fn total_time(&self) -> Option<Duration> {
        Some(self.exit?.duration_since(self.enter?))
    }

    /// One-line summary for logs.
    pub fn timing_string(&self) -> String {
        fn us(d: Option<Duration>) -> String {
            d.map(|d| format!("{}us", d.as_micros())).unwrap_or_else(|| "-".to_string())
        }
        format!(
            "setup {} device {} total {}",
            us(self.setup_time()), us(self.device_time()), us(self.total_time())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_timing_string() {
        assert_eq!(Timestamps::new().timing_string(), "setup - device - total -");
    }

    #[test]
    fn test_marks_are_ordered() {
        let mut ts = Timestamps::new();
        ts.mark_enter();
        ts.mark_above_device();
        let first = ts.above_device;
        ts.mark_above_device();
        assert_eq!(ts.above_device, first, "only the first post is recorded");
        ts.mark_below_device();
        ts.mark_exit();
        assert!(ts.setup_time().is_some());
        assert!(ts.device_time().is_some());
        assert!(ts.total_time().unwrap() >= ts.setup_time().unwrap());
    }
}
