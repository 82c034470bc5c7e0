//! Utility types shared across the server

pub mod config;

use std::time::{Duration, Instant};

/// Logs how long a scope took when dropped
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.elapsed();
        tracing::debug!("Timer '{}' finished in {:?}", self.name, duration);
    }
}
