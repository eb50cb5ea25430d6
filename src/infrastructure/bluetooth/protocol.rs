//! Mi Buds Protocol
//!
//! Frame definitions for the vendor RFCOMM protocol spoken by the earbuds.
//! Frames carry no length prefix; each transport read is treated as one frame.

use crate::domain::models::{BatteryStatus, LatencyMode};
use tracing::trace;

/// RFCOMM channel the earbuds expose the control service on
pub const RFCOMM_CHANNEL: u8 = 6;

/// Marker preceding the left/right/case battery bytes in telemetry frames
pub const BATTERY_PATTERN: [u8; 4] = [0x02, 0x02, 0x04, 0x07];

/// Battery status request
pub const BATTERY_REQUEST: [u8; 14] = [
    0xFE, 0xDC, 0xBA, 0xC4, 0x02, 0x00, 0x05, 0x0B, 0xFF, 0xFF, 0xFF, 0xFF, 0xEF, 0x4F,
];

/// Value of the "counter" byte in mode commands. The device accepts it as a constant.
pub const MODE_COMMAND_COUNTER: u8 = 0x90;

/// Offsets of the variable bytes inside [`MODE_COMMAND_TEMPLATE`]
const MODE_COUNTER_OFFSET: usize = 7;
const MODE_PARAM_OFFSET: usize = 11;

const MODE_COMMAND_TEMPLATE: [u8; 13] = [
    0xFE, 0xDC, 0xBA, 0xC4, 0xF2, 0x00, 0x05, 0x00, 0x03, 0x00, 0x2F, 0x00, 0xEF,
];

/// Frame lengths that carry battery telemetry
pub const PACKET_SIZES_BATTERY: [usize; 3] = [62, 76, 164];

/// Frame length of a latency mode acknowledgment
pub const PACKET_SIZE_MODE_ACK: usize = 14;

/// Initialization frames sent right after the channel opens, in this order.
/// The device does not answer normally until it has seen them.
pub const HANDSHAKE_SEQUENCE: [&[u8]; 5] = [
    &BATTERY_REQUEST,
    &[
        0xFE, 0xDC, 0xBA, 0xC4, 0x50, 0x00, 0x12, 0x00, 0x01, 0x67, 0xC6, 0x69, 0x73, 0x51,
        0xFF, 0x4A, 0xEC, 0x29, 0xCD, 0xBA, 0xAB, 0xF2, 0xFB, 0xE3, 0x46, 0xEF,
    ],
    &[
        0xFE, 0xDC, 0xBA, 0x04, 0x50, 0x00, 0x13, 0x00, 0x02, 0x01, 0x11, 0x14, 0x30, 0xF0,
        0xD8, 0x77, 0x7A, 0x5F, 0x68, 0xBA, 0xCE, 0x0E, 0xD7, 0x64, 0xCD, 0x10,
    ],
    &[0xFE, 0xDC, 0xBA, 0x04, 0x51, 0x00, 0x03, 0x00, 0x03, 0x01, 0xEF],
    &[
        0xFE, 0xDC, 0xBA, 0xC4, 0xF2, 0x00, 0x08, 0x04, 0x06, 0x00, 0x28, 0x69, 0x92, 0x65,
        0xB9,
    ],
];

/// Classification of an inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    BatteryTelemetry,
    ModeAck,
    Unrecognized,
}

/// Classify a frame by its length alone
pub fn classify(length: usize) -> PacketKind {
    if PACKET_SIZES_BATTERY.contains(&length) {
        PacketKind::BatteryTelemetry
    } else if length == PACKET_SIZE_MODE_ACK {
        PacketKind::ModeAck
    } else {
        PacketKind::Unrecognized
    }
}

/// Build the latency mode command
///
/// ```text
/// FE DC BA C4 F2 00 05 [counter] 03 00 2F [param] EF
/// ```
///
/// `param` is `01` for low latency and `00` for standard.
pub fn build_mode_command(mode: LatencyMode) -> Vec<u8> {
    let mut frame = MODE_COMMAND_TEMPLATE.to_vec();
    frame[MODE_COUNTER_OFFSET] = MODE_COMMAND_COUNTER;
    frame[MODE_PARAM_OFFSET] = match mode {
        LatencyMode::Low => 0x01,
        LatencyMode::Standard => 0x00,
    };
    frame
}

pub fn build_battery_request() -> Vec<u8> {
    BATTERY_REQUEST.to_vec()
}

/// Extract battery bytes from a telemetry frame
///
/// Only the first occurrence of [`BATTERY_PATTERN`] is considered. Returns
/// `None` when the marker is missing or fewer than three bytes follow it.
pub fn parse_battery(frame: &[u8]) -> Option<BatteryStatus> {
    let idx = frame
        .windows(BATTERY_PATTERN.len())
        .position(|window| window == &BATTERY_PATTERN[..])?;

    let values = frame.get(idx + BATTERY_PATTERN.len()..idx + BATTERY_PATTERN.len() + 3)?;
    trace!("Battery marker at offset {}: {:02X?}", idx, values);

    Some(BatteryStatus {
        left: values[0],
        right: values[1],
        case: values[2],
    })
}

pub fn mode_display_name(mode: LatencyMode) -> &'static str {
    mode.display_name()
}

/// Lowercase hex rendering used in log and status text
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parse a hex string such as `fedcbac4...` into bytes. Whitespace is ignored.
pub fn parse_hex(input: &str) -> Option<Vec<u8>> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty()
        || cleaned.len() % 2 != 0
        || !cleaned.chars().all(|c| c.is_ascii_hexdigit())
    {
        return None;
    }

    (0..cleaned.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&cleaned[i..i + 2], 16).ok())
        .collect()
}
