//! Finding an ST-Link and getting it into its loader.
//!
//! Each enumeration pass looks for, in bus order:
//! - a loader (V2 or V3), which is opened and armed;
//! - ST-Link application firmware, which is asked to reboot into the loader;
//! - a Black Magic Probe, which is detached into its own DFU mode.
//!
//! After a switch or detach the device re-enumerates, so the locator waits and
//! lists the bus again, up to `max_rescans` extra passes.

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::dfu::{self, DfuError};
use crate::events::{FlashEvent, FlashObserver};
use crate::protocol::constants::*;
use crate::session::{BootloaderVariant, DeviceSession, Endpoints, SessionConfig};
use crate::transport::{ControlRequest, Delay, TransportError, UsbBackend, UsbId, UsbTransport};

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("No ST-Link found")]
    NotFound,

    #[error(
        "ST-Link {pid:04X} refused the switch to DFU mode (reply 0x{code:04X}); unplug it and try again"
    )]
    NotReady { pid: u16, code: u16 },

    #[error("No loader appeared after {passes} enumeration passes")]
    RescanLimit { passes: u32 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Failed to read loader identity: {0}")]
    Identity(#[source] DfuError),
}

/// What a VID/PID pair is to the locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductKind {
    Bootloader(BootloaderVariant),
    /// ST-Link running application firmware; listens on [`Endpoints::APPLICATION`].
    Application,
    DebugProbe,
}

pub fn classify(vendor_id: u16, product_id: u16) -> Option<ProductKind> {
    match (vendor_id, product_id) {
        (ST_VENDOR_ID, STLINK_V2_BOOTLOADER_PID) => {
            Some(ProductKind::Bootloader(BootloaderVariant::V2))
        }
        (ST_VENDOR_ID, STLINK_V3_BOOTLOADER_PID) => {
            Some(ProductKind::Bootloader(BootloaderVariant::V3))
        }
        (ST_VENDOR_ID, pid) if APPLICATION_PIDS.contains(&pid) => Some(ProductKind::Application),
        (OPENMOKO_VENDOR_ID, BMP_APPLICATION_PID) => Some(ProductKind::DebugProbe),
        _ => None,
    }
}

enum Pass<T: UsbTransport, D: Delay> {
    Armed(DeviceSession<T, D>),
    Switched,
    Empty,
}

pub struct Locator<B: UsbBackend, D: Delay + Clone> {
    backend: B,
    delay: D,
    config: SessionConfig,
}

impl<B: UsbBackend, D: Delay + Clone> Locator<B, D> {
    pub fn new(backend: B, delay: D, config: SessionConfig) -> Self {
        Self {
            backend,
            delay,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Enumerate until a loader is open, switching devices into it as needed.
    ///
    /// An empty first pass is `NotFound`. Once a switch was requested, empty
    /// passes are re-enumeration gaps and only the rescan bound ends the wait.
    #[instrument(level = "info", skip_all)]
    pub fn locate_and_arm<O: FlashObserver + ?Sized>(
        &self,
        observer: &O,
    ) -> Result<DeviceSession<B::Transport, D>, LocateError> {
        let passes = self.config.max_rescans.saturating_add(1);
        let mut switched = false;

        for pass in 1..=passes {
            let devices = self.backend.list()?;
            debug!(pass, count = devices.len(), "Enumerated USB devices");

            match self.scan(&devices, observer)? {
                Pass::Armed(session) => return Ok(session),
                Pass::Switched => switched = true,
                Pass::Empty if !switched => return Err(LocateError::NotFound),
                Pass::Empty => debug!(pass, "Loader not enumerated yet"),
            }

            if pass < passes {
                observer.on_event(&FlashEvent::Rescanning { pass: pass + 1 });
                self.delay.delay_ms(self.config.settle_delay_ms);
            }
        }

        warn!(passes, "Gave up waiting for the loader");
        Err(LocateError::RescanLimit { passes })
    }

    fn scan<O: FlashObserver + ?Sized>(
        &self,
        devices: &[UsbId],
        observer: &O,
    ) -> Result<Pass<B::Transport, D>, LocateError> {
        for id in devices {
            let Some(kind) = classify(id.vendor_id, id.product_id) else {
                continue;
            };

            match kind {
                ProductKind::Bootloader(variant) => {
                    let session = self.arm(id, variant)?;
                    observer.on_event(&FlashEvent::DeviceArmed {
                        vid: id.vendor_id,
                        pid: id.product_id,
                        variant,
                    });
                    return Ok(Pass::Armed(session));
                }
                ProductKind::Application => {
                    self.switch_to_loader(id)?;
                    observer.on_event(&FlashEvent::ModeSwitchRequested {
                        vid: id.vendor_id,
                        pid: id.product_id,
                    });
                    return Ok(Pass::Switched);
                }
                ProductKind::DebugProbe => {
                    self.detach_probe(id)?;
                    observer.on_event(&FlashEvent::ProbeDetached {
                        vid: id.vendor_id,
                        pid: id.product_id,
                    });
                    return Ok(Pass::Switched);
                }
            }
        }

        Ok(Pass::Empty)
    }

    fn arm(
        &self,
        id: &UsbId,
        variant: BootloaderVariant,
    ) -> Result<DeviceSession<B::Transport, D>, LocateError> {
        info!(device = %id, %variant, "Found ST-Link loader");
        let transport = self.backend.open(id, 0)?;
        let session = DeviceSession::open(
            transport,
            variant.endpoints(),
            variant,
            self.delay.clone(),
        )
        .map_err(LocateError::Identity)?;

        match session.current_mode() {
            Ok(MODE_DFU) => debug!("Loader reports DFU mode"),
            Ok(mode) => warn!(mode = %format!("0x{:04X}", mode), "Loader reports unexpected mode"),
            Err(e) => warn!(error = %e, "Could not read current mode"),
        }

        Ok(session)
    }

    fn switch_to_loader(&self, id: &UsbId) -> Result<(), LocateError> {
        info!(device = %id, "Found ST-Link in application mode");
        let mut transport = self.backend.open(id, 0)?;
        let result = request_switch(&transport, Endpoints::APPLICATION, id.product_id);
        transport.release();
        result
    }

    fn detach_probe(&self, id: &UsbId) -> Result<(), LocateError> {
        info!(device = %id, "Found Black Magic Probe, detaching");
        let mut transport = self.backend.open(id, BMP_DFU_INTERFACE)?;
        let result = transport.control_out(ControlRequest {
            request: DFU_DETACH,
            value: BMP_DETACH_TIMEOUT_MS,
            index: u16::from(BMP_DFU_INTERFACE),
        });
        transport.release();
        Ok(result?)
    }
}

fn request_switch<T: UsbTransport>(
    transport: &T,
    endpoints: Endpoints,
    pid: u16,
) -> Result<(), LocateError> {
    let code = dfu::query_dfu_switch(transport, endpoints)?;
    if code != DFU_SWITCH_READY {
        return Err(LocateError::NotReady { pid, code });
    }
    dfu::trigger_dfu_switch(transport, endpoints)?;
    Ok(())
}
