//! Packet codec and wire constants.
//!
//! A data packet is a fixed 9 byte header followed by a variable payload:
//!
//! ```text
//! byte: [  0  ][  1..=4   ][    5..=8    ][ 9..      ]
//!       [ seq ][ crc32 LE ][ len u32 LE  ][ payload  ]
//! ```
//!
//! `seq` alternates between 0 and 1 on consecutive packets so the receiver
//! can tell a retransmission from the next block. `crc32` covers the payload
//! bytes only. `len` is the exact payload length, between 1 and
//! [`BLOCK_SIZE`]; payloads are never padded on the wire.
//!
//! Control traffic shares the wire with data packets:
//!
//! - `'A'` / `'N'` - single byte positive / negative acknowledgement
//! - `START:<name>\n` - transfer request carrying the file name
//! - `ACK_STATUS:<n>\n` - handshake reply carrying the resume block count
//! - `END\n` - end of transfer
//!
//! The codec does no I/O; the state machines feed it byte slices.

use crate::crc::crc32;

/// Payload bytes per data packet. A design constant, not negotiated.
pub const BLOCK_SIZE: usize = 100;

/// Fixed header length: seq byte, CRC-32, payload length.
pub const HEADER_LEN: usize = 9;

/// Positive acknowledgement byte.
pub const ACK: u8 = b'A';

/// Negative acknowledgement byte.
pub const NAK: u8 = b'N';

/// Marker closing a transfer.
pub const END_MARKER: &[u8] = b"END\n";

/// Prefix of the transfer request line.
pub const START_TAG: &str = "START:";

/// Prefix of the handshake reply line.
pub const STATUS_TAG: &str = "ACK_STATUS:";

/// Upper bound on handshake line length, tag and newline included.
pub const MAX_LINE: usize = 256;

/// Decode failure. The receiver answers all of these with a NAK and waits
/// for the retransmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame shorter than the {HEADER_LEN} byte header")]
    ShortFrame,
    #[error("payload shorter than its declared length")]
    InconsistentLength,
    #[error("declared payload length exceeds {BLOCK_SIZE}")]
    OversizedPayload,
}

/// Parsed data packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub seq: u8,
    pub crc: u32,
    pub payload_len: u32,
}

impl Header {
    /// Parses the fixed header from the front of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Header, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::ShortFrame);
        }
        Ok(Header {
            seq: bytes[0],
            crc: u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            payload_len: u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
        })
    }
}

/// Encodes one data packet.
///
/// `payload` must hold between 1 and [`BLOCK_SIZE`] bytes and `seq` must be
/// 0 or 1; both are sender-side invariants.
pub fn encode(seq: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(seq <= 1);
    debug_assert!(!payload.is_empty() && payload.len() <= BLOCK_SIZE);

    let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
    packet.push(seq);
    packet.extend_from_slice(&crc32(payload).to_le_bytes());
    packet.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// Decodes a data packet from `bytes`, returning the header and the payload
/// slice. Trailing bytes beyond the declared length are ignored. CRC and
/// sequence validation are the receiver's business, not the codec's.
pub fn decode(bytes: &[u8]) -> Result<(Header, &[u8]), FrameError> {
    let header = Header::parse(bytes)?;
    let len = header.payload_len as usize;
    if len > BLOCK_SIZE {
        return Err(FrameError::OversizedPayload);
    }
    if bytes.len() - HEADER_LEN < len {
        return Err(FrameError::InconsistentLength);
    }
    Ok((header, &bytes[HEADER_LEN..HEADER_LEN + len]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_bit_exact() {
        let packet = encode(1, &[0xDE, 0xAD]);
        let crc = crc32(&[0xDE, 0xAD]);
        assert_eq!(packet[0], 1);
        assert_eq!(&packet[1..5], &crc.to_le_bytes());
        assert_eq!(&packet[5..9], &2u32.to_le_bytes());
        assert_eq!(&packet[9..], &[0xDE, 0xAD]);
        assert_eq!(packet.len(), HEADER_LEN + 2);
    }

    #[test]
    fn roundtrip() {
        let payload: Vec<u8> = (0..BLOCK_SIZE as u8).collect();
        let packet = encode(0, &payload);
        let (header, decoded) = decode(&packet).unwrap();
        assert_eq!(header.seq, 0);
        assert_eq!(header.payload_len as usize, BLOCK_SIZE);
        assert_eq!(header.crc, crc32(&payload));
        assert_eq!(decoded, &payload[..]);
    }

    #[test]
    fn short_frame() {
        assert_eq!(Header::parse(&[0u8; 8]), Err(FrameError::ShortFrame));
        assert_eq!(decode(&[0u8; 8]).unwrap_err(), FrameError::ShortFrame);
    }

    #[test]
    fn oversized_payload() {
        let mut packet = encode(0, &[7u8; BLOCK_SIZE]);
        let bad_len = (BLOCK_SIZE as u32 + 1).to_le_bytes();
        packet[5..9].copy_from_slice(&bad_len);
        assert_eq!(decode(&packet).unwrap_err(), FrameError::OversizedPayload);
    }

    #[test]
    fn truncated_payload() {
        let packet = encode(0, &[1, 2, 3, 4]);
        assert_eq!(
            decode(&packet[..packet.len() - 1]).unwrap_err(),
            FrameError::InconsistentLength
        );
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut packet = encode(1, b"xyz");
        packet.extend_from_slice(b"junk");
        let (header, payload) = decode(&packet).unwrap();
        assert_eq!(header.payload_len, 3);
        assert_eq!(payload, b"xyz");
    }
}
