//! Full locate-and-flash runs against the mock backend.

use hex_literal::hex;
use stlink_dfu_core::crypto;
use stlink_dfu_core::events::RecordingObserver;
use stlink_dfu_core::protocol::constants::*;
use stlink_dfu_core::protocol::{CommandFrame, checksum};
use stlink_dfu_core::transport::RecordingDelay;
use stlink_dfu_core::{
    BootloaderVariant, DeviceIdentity, DeviceState, DeviceStatus, FlashError, FlashEvent, Locator,
    MockBackend, MockTransport, SessionConfig, flash,
};

const VERSION: [u8; 6] = hex!("2143 0000 2500");
const SEED_BLOCK: [u8; 20] = hex!("deadbeef 00000000 3f0041000f5132353934381e");

/// One DNLOAD as seen on the wire.
#[derive(Debug)]
struct Download {
    block: u16,
    checksum: u16,
    payload: Vec<u8>,
}

fn loader(pid: u16) -> MockTransport {
    let mock = MockTransport::with_ids(ST_VENDOR_ID, pid);
    mock.queue_identity(VERSION, SEED_BLOCK);
    mock.queue_response(&MODE_DFU.to_be_bytes());
    mock
}

fn firmware(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

fn key() -> [u8; 16] {
    DeviceIdentity::from_replies(&VERSION, &SEED_BLOCK).firmware_key
}

fn ciphered(plain: &[u8]) -> Vec<u8> {
    let mut buffer = plain.to_vec();
    buffer.resize(plain.len().next_multiple_of(16), 0);
    crypto::encrypt(&key(), &mut buffer);
    buffer.truncate(plain.len());
    buffer
}

fn downloads(mock: &MockTransport) -> Vec<Download> {
    let writes = mock.get_writes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < writes.len() {
        let data = &writes[i].1;
        match CommandFrame::from_bytes(data) {
            Some(f) if data.len() == 16 && f.magic() == CMD_DFU && f.opcode() == DFU_DNLOAD => {
                let payload = writes[i + 1].1.clone();
                assert_eq!(payload.len(), usize::from(f.length()));
                out.push(Download {
                    block: f.value(),
                    checksum: f.index(),
                    payload,
                });
                i += 2;
            }
            _ => i += 1,
        }
    }
    out
}

fn exit_sent(mock: &MockTransport) -> bool {
    mock.get_writes()
        .iter()
        .any(|(_, d)| d.len() == 16 && d[..2] == [CMD_DFU, DFU_EXIT])
}

fn arm(
    backend: &MockBackend,
) -> stlink_dfu_core::DeviceSession<MockTransport, RecordingDelay> {
    Locator::new(backend.clone(), RecordingDelay::new(), SessionConfig::default())
        .locate_and_arm(&RecordingObserver::new())
        .unwrap()
}

#[test]
fn v2_run_of_2500_bytes() {
    let device = loader(STLINK_V2_BOOTLOADER_PID);
    let backend = MockBackend::new();
    backend.push_pass(vec![device.clone()]);
    let session = arm(&backend);
    device.clear_writes();

    for _ in 0..9 {
        device.queue_download_ok(2);
    }
    let image = firmware(2500);
    let observer = RecordingObserver::new();

    let report = flash(session, &image, &observer).unwrap();
    assert_eq!(report.chunks, 3);
    assert_eq!(report.bytes_written, 2500);
    assert_eq!(report.variant, BootloaderVariant::V2);

    let dl = downloads(&device);
    assert_eq!(dl.len(), 9);

    let lengths: Vec<_> = dl
        .iter()
        .filter(|d| d.block == BLOCK_DATA)
        .map(|d| d.payload.len())
        .collect();
    assert_eq!(lengths, vec![1024, 1024, 452]);

    for (n, cycle) in dl.chunks(3).enumerate() {
        let address = 0x0800_4000 + (n as u32) * 1024;
        let a = address.to_le_bytes();
        assert_eq!(cycle[0].block, BLOCK_CONTROL);
        assert_eq!(cycle[0].payload, [ERASE_COMMAND, a[0], a[1], a[2], a[3]]);
        assert_eq!(cycle[1].block, BLOCK_CONTROL);
        assert_eq!(cycle[1].payload, [SET_ADDRESS_POINTER_COMMAND, a[0], a[1], a[2], a[3]]);

        let plain = &image[n * 1024..(n * 1024 + 1024).min(2500)];
        assert_eq!(cycle[2].checksum, checksum(plain));
        assert_eq!(cycle[2].payload, ciphered(plain));
    }

    assert!(exit_sent(&device));
    assert!(device.is_released());
    assert_eq!(device.pending_responses(), 0);

    let progress = observer
        .events()
        .iter()
        .filter(|e| matches!(e, FlashEvent::Progress { .. }))
        .count();
    assert_eq!(progress, 3);
}

#[test]
fn control_blocks_plain_data_blocks_ciphered() {
    let device = loader(STLINK_V2_BOOTLOADER_PID);
    let backend = MockBackend::new();
    backend.push_pass(vec![device.clone()]);
    let session = arm(&backend);
    device.clear_writes();

    for _ in 0..6 {
        device.queue_download_ok(0);
    }
    let image = firmware(1500);
    flash(session, &image, &RecordingObserver::new()).unwrap();

    for d in downloads(&device) {
        match d.block {
            BLOCK_CONTROL => {
                assert_eq!(d.payload.len(), 5);
                assert!(matches!(d.payload[0], ERASE_COMMAND | SET_ADDRESS_POINTER_COMMAND));
                assert_eq!(d.checksum, checksum(&d.payload));
            }
            block => {
                assert!(block >= BLOCK_DATA);
                assert!(!image.windows(d.payload.len()).any(|w| w == d.payload));
            }
        }
    }
}

#[test]
fn write_protection_stops_the_run() {
    let device = loader(STLINK_V2_BOOTLOADER_PID);
    let backend = MockBackend::new();
    backend.push_pass(vec![device.clone()]);
    let session = arm(&backend);
    device.clear_writes();

    // First chunk: erase and set address succeed, data is refused.
    device.queue_download_ok(0);
    device.queue_download_ok(0);
    device.queue_status(DeviceStatus::Ok, DeviceState::DfuDnBusy, 0);
    device.queue_status(DeviceStatus::ErrVendor, DeviceState::DfuError, 0);

    let err = flash(session, &firmware(3000), &RecordingObserver::new()).unwrap_err();
    assert!(err.is_write_protected());
    assert!(matches!(
        err,
        FlashError::Download {
            address: 0x0800_4000,
            ..
        }
    ));

    assert_eq!(downloads(&device).len(), 3);
    assert!(!exit_sent(&device));
    assert!(device.is_released());
}

#[test]
fn v3_run_after_application_switch() {
    let app = MockTransport::with_ids(ST_VENDOR_ID, STLINK_V3_APP_PID);
    app.queue_response(&DFU_SWITCH_READY.to_be_bytes());
    let device = loader(STLINK_V3_BOOTLOADER_PID);
    let backend = MockBackend::new();
    backend.push_pass(vec![app.clone()]);
    backend.push_pass(vec![]);
    backend.push_pass(vec![device.clone()]);

    let delay = RecordingDelay::new();
    let session = Locator::new(backend.clone(), delay.clone(), SessionConfig::default())
        .locate_and_arm(&RecordingObserver::new())
        .unwrap();
    assert_eq!(session.variant(), BootloaderVariant::V3);
    assert!(app.is_released());
    assert_eq!(delay.calls(), vec![2000, 2000]);
    device.clear_writes();

    // 0x08020000..0x08024800: sector 5 erased once, 17 continuations.
    let image = firmware(0x4800);
    for _ in 0..(1 + 18 * 2) {
        device.queue_download_ok(0);
    }
    let report = flash(session, &image, &RecordingObserver::new()).unwrap();
    assert_eq!(report.chunks, 18);
    assert_eq!(report.erases, 1);

    let dl = downloads(&device);
    assert_eq!(dl[0].payload, [ERASE_COMMAND, 5, 0, 0, 0]);
    let blocks: Vec<_> = dl
        .iter()
        .filter(|d| d.block != BLOCK_CONTROL)
        .map(|d| d.block)
        .collect();
    assert_eq!(blocks[0], BLOCK_DATA);
    assert!(blocks[1..].iter().all(|&b| b == BLOCK_CONTINUATION));
    assert!(device.get_writes().iter().all(|(ep, _)| *ep == EP_OUT_V3));
    assert!(exit_sent(&device));
}

#[test]
fn v3_image_past_flash_end_sends_nothing() {
    let device = loader(STLINK_V3_BOOTLOADER_PID);
    let backend = MockBackend::new();
    backend.push_pass(vec![device.clone()]);
    let session = arm(&backend);
    device.clear_writes();

    let err = flash(session, &firmware(0x6_0400), &RecordingObserver::new()).unwrap_err();
    assert!(matches!(err, FlashError::UnknownSector { address: 0x0808_0000 }));
    assert!(device.get_writes().is_empty());
    assert!(device.is_released());
}
