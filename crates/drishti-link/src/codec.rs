//! Fixed 9-byte packet wire format.
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 1 | `node_id` |
//! | 1 | 2 | `sequence` (LE) |
//! | 3 | 2 | `distance_cm` (LE) |
//! | 5 | 1 | `battery_pct` |
//! | 6 | 1 | `flags` |
//! | 7 | 1 | reserved, always 0 on encode |
//! | 8 | 1 | checksum: sum of bytes 0..8 modulo 256 |
//!
//! The reserved byte is covered by the checksum but its value is not
//! interpreted on decode.

use drishti_types::{DecodeError, Packet};

/// Encoded frame length in bytes.
pub const PACKET_LEN: usize = 9;

/// One encoded packet.
pub type Frame = [u8; PACKET_LEN];

const CHECKSUM_AT: usize = PACKET_LEN - 1;

/// Sum of `bytes` modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Encode `packet`, computing its checksum.
pub fn encode(packet: &Packet) -> Frame {
    let mut frame = [0u8; PACKET_LEN];
    frame[0] = packet.node_id;
    frame[1..3].copy_from_slice(&packet.sequence.to_le_bytes());
    frame[3..5].copy_from_slice(&packet.distance_cm.to_le_bytes());
    frame[5] = packet.battery_pct;
    frame[6] = packet.flags;
    frame[7] = 0;
    frame[CHECKSUM_AT] = checksum(&frame[..CHECKSUM_AT]);
    frame
}

/// Decode a received frame.
///
/// # Errors
///
/// [`DecodeError::WrongLength`] unless `bytes` is exactly [`PACKET_LEN`]
/// long; [`DecodeError::ChecksumMismatch`] when the trailing checksum does not
/// match the preceding bytes.
pub fn decode(bytes: &[u8]) -> Result<Packet, DecodeError> {
    let frame: &Frame = bytes.try_into().map_err(|_| DecodeError::WrongLength {
        expected: PACKET_LEN,
        actual: bytes.len(),
    })?;

    let computed = checksum(&frame[..CHECKSUM_AT]);
    if computed != frame[CHECKSUM_AT] {
        return Err(DecodeError::ChecksumMismatch {
            expected: frame[CHECKSUM_AT],
            computed,
        });
    }

    Ok(Packet {
        node_id: frame[0],
        sequence: u16::from_le_bytes([frame[1], frame[2]]),
        distance_cm: u16::from_le_bytes([frame[3], frame[4]]),
        battery_pct: frame[5],
        flags: frame[6],
    })
}
