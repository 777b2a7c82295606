//! Injectable sleeping, so poll waits and rescan settling can be faked.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub trait Delay: Send + Sync {
    fn delay_ms(&self, ms: u64);
}

/// Blocks the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay_ms(&self, ms: u64) {
        if ms > 0 {
            thread::sleep(Duration::from_millis(ms));
        }
    }
}

/// Records requested delays without sleeping.
#[derive(Debug, Clone, Default)]
pub struct RecordingDelay {
    calls: Arc<Mutex<Vec<u64>>>,
}

impl RecordingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<u64> {
        self.calls.lock().unwrap().clone()
    }
}

impl Delay for RecordingDelay {
    fn delay_ms(&self, ms: u64) {
        self.calls.lock().unwrap().push(ms);
    }
}
