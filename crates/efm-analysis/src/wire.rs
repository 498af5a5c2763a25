//! # QUIC Datagram Scanning
//!
//! Locates the EFM signal bytes inside a UDP payload that may carry one or
//! more coalesced QUIC packets.
//!
//! ## Short header first byte
//!
//! ```text
//!  0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+
//! |0|1|S|1|2|3|4|R|     S = spin bit, 1-4 = extension bits
//! +-+-+-+-+-+-+-+-+
//! ```
//!
//! The second byte (normally the start of the encrypted packet number) is
//! repurposed by the EFM experiments as a further extension byte; its top
//! four bits are individually addressable.
//!
//! Long-header packets preceding a short-header packet in the same datagram
//! are skipped by decoding their connection-ID, token, and length fields.

use std::fmt;

use tracing::debug;

// ─── Header form bits ────────────────────────────────────────────────────────

/// Header form bit: set for long headers, clear for short headers.
pub const HEADER_FORM_BIT: u8 = 0x80;

/// Fixed bit ("QUIC bit"): must be set on every QUIC packet.
pub const FIXED_BIT: u8 = 0x40;

/// Long-header packet type occupying bits 0x30: Initial.
const LONG_TYPE_INITIAL: u8 = 0;
/// Long-header packet type occupying bits 0x30: Retry (unsupported).
const LONG_TYPE_RETRY: u8 = 3;

// ─── Bit positions ───────────────────────────────────────────────────────────

/// A named, individually addressable bit inside the two signal bytes.
///
/// Which position carries which semantic signal (L, T, Q, R) is a per-run
/// configuration choice, not a property of the byte layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitPosition {
    /// Spin bit (byte 0, mask 0x20).
    Spin,
    /// First reserved bit of byte 0 (mask 0x10).
    Ext1,
    /// Second reserved bit of byte 0 (mask 0x08).
    Ext2,
    /// Third reserved bit of byte 0 (mask 0x04).
    Ext3,
    /// Fourth reserved bit of byte 0 (mask 0x02).
    Ext4,
    /// Top bit of the extension byte (byte 1, mask 0x80).
    ExtByte1,
    /// Byte 1, mask 0x40.
    ExtByte2,
    /// Byte 1, mask 0x20.
    ExtByte3,
    /// Byte 1, mask 0x10.
    ExtByte4,
}

impl BitPosition {
    /// (byte index, mask) for this position.
    fn locate(self) -> (usize, u8) {
        match self {
            BitPosition::Spin => (0, 0x20),
            BitPosition::Ext1 => (0, 0x10),
            BitPosition::Ext2 => (0, 0x08),
            BitPosition::Ext3 => (0, 0x04),
            BitPosition::Ext4 => (0, 0x02),
            BitPosition::ExtByte1 => (1, 0x80),
            BitPosition::ExtByte2 => (1, 0x40),
            BitPosition::ExtByte3 => (1, 0x20),
            BitPosition::ExtByte4 => (1, 0x10),
        }
    }
}

// ─── Signal bytes ────────────────────────────────────────────────────────────

/// The first two bytes of a short-header QUIC packet.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignalBits {
    bytes: [u8; 2],
}

impl SignalBits {
    pub fn new(first: u8, second: u8) -> Self {
        SignalBits {
            bytes: [first, second],
        }
    }

    /// Value of one named bit, as 0 or 1.
    #[inline]
    pub fn bit(&self, pos: BitPosition) -> u8 {
        let (idx, mask) = pos.locate();
        u8::from(self.bytes[idx] & mask == mask)
    }

    /// Whether one named bit is set.
    #[inline]
    pub fn is_set(&self, pos: BitPosition) -> bool {
        self.bit(pos) == 1
    }
}

impl fmt::Debug for SignalBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SignalBits({:#04x}, {:#04x})",
            self.bytes[0], self.bytes[1]
        )
    }
}

// ─── Datagram scanning ───────────────────────────────────────────────────────

/// Scan a UDP payload for the first short-header QUIC packet and return its
/// signal bytes.
///
/// Returns `None` when the datagram carries no usable short-header packet:
/// non-QUIC payloads, long-header-only datagrams, unsupported encodings
/// (Retry packets, length fields wider than 2 bytes), and truncated payloads
/// all end the scan without a match. None of these abort processing of the
/// capture file.
pub fn scan_datagram(payload: &[u8]) -> Option<SignalBits> {
    let mut offset = 0usize;
    loop {
        let first = *payload.get(offset)?;
        if first & FIXED_BIT == 0 {
            // Not QUIC at this offset; could be a non-QUIC trailing fragment.
            return None;
        }
        if first & HEADER_FORM_BIT == HEADER_FORM_BIT {
            offset = skip_long_header(payload, offset)?;
        } else {
            let second = *payload.get(offset + 1)?;
            return Some(SignalBits::new(first, second));
        }
    }
}

/// Skip one long-header packet starting at `offset`, returning the offset of
/// the next coalesced packet. `None` ends the scan: end of datagram reached,
/// truncated fields, or an unsupported encoding.
fn skip_long_header(payload: &[u8], offset: usize) -> Option<usize> {
    let packet_type = (*payload.get(offset)? & 0x30) >> 4;
    if packet_type == LONG_TYPE_RETRY {
        debug!(offset, "retry packet, abandoning datagram");
        return None;
    }

    // Flags byte + 4-byte version.
    let mut pos = offset + 5;

    let dcid_len = *payload.get(pos)? as usize;
    pos += 1 + dcid_len;
    let scid_len = *payload.get(pos)? as usize;
    pos += 1 + scid_len;

    // Initial packets carry a token, prefixed by a plain 1-byte length.
    if packet_type == LONG_TYPE_INITIAL {
        let token_len = *payload.get(pos)? as usize;
        pos += 1 + token_len;
    }

    // Payload length as a QUIC varint; only 1- and 2-byte widths occur in
    // the emulation traffic.
    let first_len_byte = *payload.get(pos)?;
    let width = 1usize << (first_len_byte >> 6);
    let length = match width {
        1 => (first_len_byte & 0x3F) as usize,
        2 => (((first_len_byte & 0x3F) as usize) << 8) | *payload.get(pos + 1)? as usize,
        _ => {
            debug!(width, "unsupported length encoding, abandoning datagram");
            return None;
        }
    };

    let next = pos + width + length;
    if next >= payload.len() {
        // Length field consumed the rest of the datagram.
        None
    } else {
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a short-header first byte from individual bits.
    fn short_byte(spin: u8, ext: [u8; 4]) -> u8 {
        FIXED_BIT | (spin << 5) | (ext[0] << 4) | (ext[1] << 3) | (ext[2] << 2) | (ext[3] << 1)
    }

    /// Build the extension byte from its four addressable bits.
    fn ext_byte(bits: [u8; 4]) -> u8 {
        (bits[0] << 7) | (bits[1] << 6) | (bits[2] << 5) | (bits[3] << 4)
    }

    /// Synthetic Initial long-header packet with the given CID/token/payload
    /// sizes and a 2-byte length field.
    fn initial_packet(dcid: usize, scid: usize, token: usize, inner: usize) -> Vec<u8> {
        let mut pkt = vec![0xC0 | FIXED_BIT]; // long header, type Initial
        pkt.extend_from_slice(&[0, 0, 0, 1]); // version
        pkt.push(dcid as u8);
        pkt.extend(std::iter::repeat(0xAA).take(dcid));
        pkt.push(scid as u8);
        pkt.extend(std::iter::repeat(0xBB).take(scid));
        pkt.push(token as u8);
        pkt.extend(std::iter::repeat(0xCC).take(token));
        pkt.push(0x40 | (inner >> 8) as u8); // 2-byte varint length
        pkt.push(inner as u8);
        pkt.extend(std::iter::repeat(0xDD).take(inner));
        pkt
    }

    #[test]
    fn short_header_bits_roundtrip() {
        let bits = SignalBits::new(short_byte(1, [0, 1, 0, 1]), ext_byte([1, 0, 1, 0]));
        assert_eq!(bits.bit(BitPosition::Spin), 1);
        assert_eq!(bits.bit(BitPosition::Ext1), 0);
        assert_eq!(bits.bit(BitPosition::Ext2), 1);
        assert_eq!(bits.bit(BitPosition::Ext3), 0);
        assert_eq!(bits.bit(BitPosition::Ext4), 1);
        assert_eq!(bits.bit(BitPosition::ExtByte1), 1);
        assert_eq!(bits.bit(BitPosition::ExtByte2), 0);
        assert_eq!(bits.bit(BitPosition::ExtByte3), 1);
        assert_eq!(bits.bit(BitPosition::ExtByte4), 0);
    }

    #[test]
    fn plain_short_header_matches() {
        let payload = vec![short_byte(0, [0, 0, 1, 0]), ext_byte([0, 0, 1, 1]), 0x00];
        let bits = scan_datagram(&payload).unwrap();
        assert!(bits.is_set(BitPosition::Ext3));
        assert!(bits.is_set(BitPosition::ExtByte3));
        assert!(bits.is_set(BitPosition::ExtByte4));
        assert!(!bits.is_set(BitPosition::Spin));
    }

    #[test]
    fn non_quic_payload_no_match() {
        // Fixed bit clear.
        assert!(scan_datagram(&[0x00, 0xFF, 0xFF]).is_none());
        assert!(scan_datagram(&[]).is_none());
    }

    #[test]
    fn long_header_skip_lands_on_coalesced_short_header() {
        let (dcid, scid, token, inner) = (8, 4, 3, 100);
        let mut payload = initial_packet(dcid, scid, token, inner);
        let expected_offset = 5 + dcid + 1 + scid + 1 + token + 1 + 2 + inner;
        assert_eq!(payload.len(), expected_offset);

        payload.push(short_byte(1, [0, 0, 0, 0]));
        payload.push(ext_byte([1, 1, 1, 1]));
        let bits = scan_datagram(&payload).unwrap();
        assert_eq!(bits.bit(BitPosition::Spin), 1);
        assert_eq!(bits.bit(BitPosition::ExtByte1), 1);
    }

    #[test]
    fn one_byte_length_field() {
        let mut pkt = vec![0xC0 | FIXED_BIT | 0x10]; // long header, type 1 (no token)
        pkt.extend_from_slice(&[0, 0, 0, 1]);
        pkt.push(0); // empty DCID
        pkt.push(0); // empty SCID
        pkt.push(0x05); // 1-byte varint, length 5
        pkt.extend_from_slice(&[0; 5]);
        pkt.push(short_byte(0, [1, 0, 0, 0]));
        pkt.push(0x00);
        let bits = scan_datagram(&pkt).unwrap();
        assert!(bits.is_set(BitPosition::Ext1));
    }

    #[test]
    fn long_header_only_datagram_no_match() {
        let payload = initial_packet(4, 4, 0, 20);
        assert!(scan_datagram(&payload).is_none());
    }

    #[test]
    fn retry_packet_abandons_datagram() {
        let mut pkt = vec![0xC0 | FIXED_BIT | 0x30]; // type 3 = Retry
        pkt.extend_from_slice(&[0, 0, 0, 1]);
        pkt.extend_from_slice(&[0u8; 32]);
        assert!(scan_datagram(&pkt).is_none());
    }

    #[test]
    fn wide_length_encoding_abandons_datagram() {
        let mut pkt = vec![0xC0 | FIXED_BIT | 0x10];
        pkt.extend_from_slice(&[0, 0, 0, 1]);
        pkt.push(0);
        pkt.push(0);
        pkt.push(0x80); // 4-byte varint prefix: unsupported
        pkt.extend_from_slice(&[0u8; 16]);
        assert!(scan_datagram(&pkt).is_none());
    }

    #[test]
    fn truncation_never_faults() {
        let mut payload = initial_packet(8, 4, 3, 50);
        payload.push(short_byte(1, [1, 1, 1, 1]));
        payload.push(0xF0);
        for cut in 0..payload.len() {
            // Result may be None or Some, but must never panic.
            let _ = scan_datagram(&payload[..cut]);
        }
    }
}
