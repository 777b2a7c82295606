//! Event system for UI decoupling.
//!
//! Allows a CLI or other front end to follow locating and flashing without
//! tight coupling to the core logic.

use std::fmt;

use crate::session::BootloaderVariant;

/// Flashing phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashPhase {
    /// Enumerating and switching devices.
    Locating,
    /// Erasing and programming chunks.
    Programming,
    /// Leaving the loader.
    Exiting,
    /// All operations complete.
    Complete,
}

impl fmt::Display for FlashPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashPhase::Locating => write!(f, "Locating"),
            FlashPhase::Programming => write!(f, "Programming"),
            FlashPhase::Exiting => write!(f, "Exiting"),
            FlashPhase::Complete => write!(f, "Complete"),
        }
    }
}

/// Events emitted while locating and flashing.
#[derive(Debug, Clone)]
pub enum FlashEvent {
    /// Loader found and opened.
    DeviceArmed {
        vid: u16,
        pid: u16,
        variant: BootloaderVariant,
    },
    /// Application firmware asked to reboot into the loader.
    ModeSwitchRequested { vid: u16, pid: u16 },
    /// Debug probe asked to detach into its own DFU mode.
    ProbeDetached { vid: u16, pid: u16 },
    /// Waiting for re-enumeration before the next pass.
    Rescanning { pass: u32 },
    /// Phase changed.
    PhaseChanged { from: FlashPhase, to: FlashPhase },
    /// Erase issued before writing `address`.
    Erased { address: u32 },
    /// Chunk written.
    Progress {
        address: u32,
        written: usize,
        total: usize,
    },
    /// Run finished successfully.
    Complete,
}

/// Observer trait for receiving flash events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait FlashObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &FlashEvent);
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl FlashObserver for TracingObserver {
    fn on_event(&self, event: &FlashEvent) {
        match event {
            FlashEvent::DeviceArmed { vid, pid, variant } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), variant = %variant, "Loader armed");
            }
            FlashEvent::ModeSwitchRequested { vid, pid } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), "Switching application to loader");
            }
            FlashEvent::ProbeDetached { vid, pid } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), "Debug probe detached");
            }
            FlashEvent::Rescanning { pass } => {
                tracing::debug!(pass, "Rescanning USB devices");
            }
            FlashEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            FlashEvent::Erased { address } => {
                tracing::debug!(address = %format!("0x{:08X}", address), "Erased");
            }
            FlashEvent::Progress {
                address,
                written,
                total,
            } => {
                let pct = if *total > 0 { (*written * 100) / *total } else { 0 };
                tracing::debug!(address = %format!("0x{:08X}", address), progress = %format!("{}%", pct), "Chunk written");
            }
            FlashEvent::Complete => {
                tracing::info!("Operation complete");
            }
        }
    }
}

/// Observer that records every event (for tests and front ends replaying a run).
#[derive(Default)]
pub struct RecordingObserver {
    events: std::sync::Mutex<Vec<FlashEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FlashEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl FlashObserver for RecordingObserver {
    fn on_event(&self, event: &FlashEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_observer_keeps_order() {
        let observer = RecordingObserver::new();
        observer.on_event(&FlashEvent::Rescanning { pass: 2 });
        observer.on_event(&FlashEvent::Complete);

        let events = observer.events();
        assert!(matches!(events[0], FlashEvent::Rescanning { pass: 2 }));
        assert!(matches!(events[1], FlashEvent::Complete));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(FlashPhase::Programming.to_string(), "Programming");
    }
}
