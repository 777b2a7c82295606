use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use stlink_dfu_core::{
    DeviceSession, FlashEvent, FlashObserver, Locator, NusbBackend, NusbTransport, SessionConfig,
    ThreadDelay, TracingObserver, dfu, flash,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "ST-Link bootloader flasher (Pure Rust)", long_about = None)]
struct Args {
    /// Print loader information and stay in DFU mode
    #[arg(short, long)]
    probe: bool,

    /// Session configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Firmware image to program (raw binary)
    firmware: Option<PathBuf>,
}

/// Prints one dot per programmed chunk, on top of the tracing log.
struct ProgressDots;

impl FlashObserver for ProgressDots {
    fn on_event(&self, event: &FlashEvent) {
        TracingObserver.on_event(event);
        match event {
            FlashEvent::Progress { .. } => {
                eprint!(".");
                let _ = std::io::stderr().flush();
            }
            FlashEvent::Complete => eprintln!(),
            _ => {}
        }
    }
}

fn print_identity(session: &DeviceSession<NusbTransport, ThreadDelay>) {
    let identity = session.identity();
    println!("Firmware version : {}", identity.firmware_version());
    println!("Loader version : {}", identity.loader_version);
    println!("ST-Link ID : {}", identity.id_hex());
    println!("Firmware encryption key : {}", identity.firmware_key_hex());
    match session.current_mode() {
        Ok(mode) => println!("Current mode : {}", mode),
        Err(e) => println!("Current mode : unknown ({})", e),
    }
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    };

    // Read the image first so a bad path fails before touching the device.
    let firmware = args
        .firmware
        .as_ref()
        .map(|path| {
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
        })
        .transpose()?;

    let backend = NusbBackend::new(config.usb_timeout_ms);
    let locator = Locator::new(backend, ThreadDelay, config);
    let session = locator.locate_and_arm(&TracingObserver)?;

    print_identity(&session);

    if args.probe {
        info!("Staying in DFU mode");
        return Ok(());
    }

    match firmware {
        Some(firmware) => {
            info!(bytes = firmware.len(), variant = %session.variant(), "Flashing firmware");
            let report = flash(session, &firmware, &ProgressDots)?;
            println!(
                "Wrote {} bytes in {} chunks at 0x{:08X}",
                report.bytes_written, report.chunks, report.base_address
            );
        }
        None => {
            dfu::exit_dfu(&session).context("Failed to exit DFU mode")?;
            session.close();
        }
    }

    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting stlink-dfu (nusb backend)...");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
