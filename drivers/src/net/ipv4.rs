//! IPv4 header validation, construction, and protocol demux support.
//!
//! [`parse`] is the single gate for received IPv4 packets: version, IHL
//! bounds, header checksum, and total-length bounds are all enforced here.
//! Packets failing any check are rejected for the caller to drop silently —
//! this device never generates ICMP errors for malformed input.

use super::checksum;
use super::types::Ipv4Addr;
use super::{IPV4_HEADER_LEN, IPV4_MAX_HEADER_LEN};

/// Byte offsets within the IPv4 header (RFC 791).
const OFFSET_VERSION_IHL: usize = 0;
const OFFSET_TOTAL_LENGTH: usize = 2;
const OFFSET_IDENTIFICATION: usize = 4;
const OFFSET_FLAGS_FRAG: usize = 6;
const OFFSET_TTL: usize = 8;
const OFFSET_PROTOCOL: usize = 9;
const OFFSET_CHECKSUM: usize = 10;
const OFFSET_SRC_ADDR: usize = 12;
const OFFSET_DST_ADDR: usize = 16;

/// A validated IPv4 header.
///
/// Multi-byte fields are in host byte order; addresses keep their wire form.
#[derive(Clone, Copy, Debug)]
pub struct Ipv4Header {
    /// Header length in bytes (IHL × 4, 20–60).
    pub header_len: usize,
    /// Total datagram length in bytes (header + payload).
    pub total_len: usize,
    pub ttl: u8,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

/// Parse and validate an IPv4 packet.
///
/// Enforces, in order: minimum length, version 4, IHL within 5..=15 and
/// within both the captured buffer and the 60-byte maximum, header checksum
/// over the first IHL×4 bytes, total length covering the header and not
/// exceeding the buffer.  The payload occupies
/// `packet[header_len..total_len]` — bytes beyond `total_len` (Ethernet
/// minimum-frame padding) are excluded, not an error.
pub fn parse(packet: &[u8]) -> Option<Ipv4Header> {
    if packet.len() < IPV4_HEADER_LEN {
        return None;
    }

    let version = packet[OFFSET_VERSION_IHL] >> 4;
    if version != 4 {
        return None;
    }

    let header_len = ((packet[OFFSET_VERSION_IHL] & 0x0F) as usize) * 4;
    if header_len < IPV4_HEADER_LEN || header_len > IPV4_MAX_HEADER_LEN || header_len > packet.len()
    {
        return None;
    }

    // Checksum over the header with the checksum field included must fold to
    // zero; the transmitted value is the complement of the rest.
    if !checksum::verify(&packet[..header_len]) {
        return None;
    }

    let total_len =
        u16::from_be_bytes([packet[OFFSET_TOTAL_LENGTH], packet[OFFSET_TOTAL_LENGTH + 1]]) as usize;
    if total_len < header_len || total_len > packet.len() {
        return None;
    }

    let mut src = [0u8; 4];
    let mut dst = [0u8; 4];
    src.copy_from_slice(&packet[OFFSET_SRC_ADDR..OFFSET_SRC_ADDR + 4]);
    dst.copy_from_slice(&packet[OFFSET_DST_ADDR..OFFSET_DST_ADDR + 4]);

    Some(Ipv4Header {
        header_len,
        total_len,
        ttl: packet[OFFSET_TTL],
        protocol: packet[OFFSET_PROTOCOL],
        src: Ipv4Addr(src),
        dst: Ipv4Addr(dst),
    })
}

/// Write a 20-byte IPv4 header (no options) into `out` and return its length.
///
/// TTL is the caller's policy (the stack always uses its default), DF and
/// fragmentation fields are zero, and the header checksum is computed and
/// inserted.
pub fn build_header(
    out: &mut [u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: u8,
    ttl: u8,
    payload_len: usize,
    ident: u16,
) -> usize {
    let total_len = (IPV4_HEADER_LEN + payload_len) as u16;
    out[OFFSET_VERSION_IHL] = 0x45; // version 4, IHL 5
    out[1] = 0; // TOS
    out[OFFSET_TOTAL_LENGTH..OFFSET_TOTAL_LENGTH + 2].copy_from_slice(&total_len.to_be_bytes());
    out[OFFSET_IDENTIFICATION..OFFSET_IDENTIFICATION + 2].copy_from_slice(&ident.to_be_bytes());
    out[OFFSET_FLAGS_FRAG..OFFSET_FLAGS_FRAG + 2].copy_from_slice(&0u16.to_be_bytes());
    out[OFFSET_TTL] = ttl;
    out[OFFSET_PROTOCOL] = protocol;
    out[OFFSET_CHECKSUM..OFFSET_CHECKSUM + 2].copy_from_slice(&0u16.to_be_bytes());
    out[OFFSET_SRC_ADDR..OFFSET_SRC_ADDR + 4].copy_from_slice(src.as_bytes());
    out[OFFSET_DST_ADDR..OFFSET_DST_ADDR + 4].copy_from_slice(dst.as_bytes());

    let csum = checksum::checksum(&out[..IPV4_HEADER_LEN]);
    out[OFFSET_CHECKSUM..OFFSET_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
    IPV4_HEADER_LEN
}
