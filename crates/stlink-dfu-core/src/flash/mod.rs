//! Firmware programming over an armed loader session.
//!
//! A run is planned up front ([`FlashPlan`]) and then executed chunk by chunk:
//! optional erase, set address, encrypted data block. The first failure aborts
//! the run; nothing is retried and no further chunk is sent.

pub mod plan;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::dfu::{self, DfuError};
use crate::events::{FlashEvent, FlashObserver, FlashPhase};
use crate::session::{BootloaderVariant, DeviceSession};
use crate::transport::{Delay, TransportError, UsbTransport};

pub use plan::{ChunkStep, EraseCommand, FlashPlan};

#[derive(Error, Debug)]
pub enum FlashError {
    #[error("Firmware image is empty")]
    EmptyImage,

    #[error("Firmware image of {len} bytes does not fit the address space")]
    ImageTooLarge { len: usize },

    #[error("No erasable flash sector covers address 0x{address:08X}")]
    UnknownSector { address: u32 },

    #[error("Erase failed before 0x{address:08X}: {source}")]
    Erase {
        address: u32,
        #[source]
        source: DfuError,
    },

    #[error("Set address 0x{address:08X} failed: {source}")]
    SetAddress {
        address: u32,
        #[source]
        source: DfuError,
    },

    #[error("Download at 0x{address:08X} failed: {source}")]
    Download {
        address: u32,
        #[source]
        source: DfuError,
    },

    #[error("Exit DFU failed: {0}")]
    Exit(#[source] TransportError),
}

impl FlashError {
    /// The loader-level failure behind this error, if any.
    pub fn dfu_error(&self) -> Option<&DfuError> {
        match self {
            FlashError::Erase { source, .. }
            | FlashError::SetAddress { source, .. }
            | FlashError::Download { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_write_protected(&self) -> bool {
        self.dfu_error().is_some_and(DfuError::is_write_protected)
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashReport {
    pub variant: BootloaderVariant,
    pub base_address: u32,
    pub bytes_written: usize,
    pub chunks: usize,
    pub erases: usize,
}

/// Program `firmware` and leave the loader.
///
/// Takes the session by value: the interface is released when this returns,
/// whether the run succeeded or not.
#[instrument(skip_all, fields(variant = %session.variant(), len = firmware.len()))]
pub fn flash<T, D, O>(
    session: DeviceSession<T, D>,
    firmware: &[u8],
    observer: &O,
) -> Result<FlashReport, FlashError>
where
    T: UsbTransport,
    D: Delay,
    O: FlashObserver + ?Sized,
{
    let plan = FlashPlan::for_variant(session.variant());
    let steps = plan.plan(firmware.len())?;

    info!(
        base = %format!("0x{:08X}", plan.base_address),
        chunks = steps.len(),
        "Programming firmware"
    );
    observer.on_event(&FlashEvent::PhaseChanged {
        from: FlashPhase::Locating,
        to: FlashPhase::Programming,
    });

    let mut buffer = vec![0u8; plan.chunk_size];
    let mut written = 0;
    let mut erases = 0;

    for step in &steps {
        if let Some(erase) = step.erase {
            debug!(?erase, "Erasing");
            let result = match erase {
                EraseCommand::Page(address) => dfu::erase_page(&session, address),
                EraseCommand::Sector(index) => dfu::erase_sector(&session, index),
            };
            result.map_err(|source| FlashError::Erase {
                address: step.address,
                source,
            })?;
            erases += 1;
            observer.on_event(&FlashEvent::Erased {
                address: step.address,
            });
        }

        dfu::set_address(&session, step.address).map_err(|source| FlashError::SetAddress {
            address: step.address,
            source,
        })?;

        // Stale bytes from the previous chunk would leak into the cipher padding.
        buffer.fill(0);
        buffer[..step.length].copy_from_slice(&firmware[step.offset..step.offset + step.length]);
        dfu::download(&session, &mut buffer, step.length, step.block).map_err(|source| {
            if source.is_write_protected() {
                warn!("Flash is read-out protected; aborting");
            }
            FlashError::Download {
                address: step.address,
                source,
            }
        })?;

        written += step.length;
        observer.on_event(&FlashEvent::Progress {
            address: step.address,
            written,
            total: firmware.len(),
        });
    }

    observer.on_event(&FlashEvent::PhaseChanged {
        from: FlashPhase::Programming,
        to: FlashPhase::Exiting,
    });
    dfu::exit_dfu(&session).map_err(FlashError::Exit)?;
    session.close();

    observer.on_event(&FlashEvent::PhaseChanged {
        from: FlashPhase::Exiting,
        to: FlashPhase::Complete,
    });
    observer.on_event(&FlashEvent::Complete);
    info!(bytes = written, chunks = steps.len(), erases, "Firmware programmed");

    Ok(FlashReport {
        variant: plan.variant,
        base_address: plan.base_address,
        bytes_written: written,
        chunks: steps.len(),
        erases,
    })
}
