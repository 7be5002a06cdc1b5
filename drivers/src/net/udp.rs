//! UDP header parsing, construction, and the pseudo-header checksum rules.

use super::checksum::InternetChecksum;
use super::types::{Ipv4Addr, Port};
use super::{IPPROTO_UDP, UDP_HEADER_LEN};

const OFFSET_SRC_PORT: usize = 0;
const OFFSET_DST_PORT: usize = 2;
const OFFSET_LENGTH: usize = 4;
const OFFSET_CHECKSUM: usize = 6;

/// Parse a UDP segment out of an IPv4 payload.
///
/// Validates the length field (at least the header, at most the captured
/// payload) and returns `(src_port, dst_port, payload)`.  Does **not** check
/// the checksum — callers that care use [`verify_checksum`] with the
/// addresses from the IP header.
pub fn parse(ip_payload: &[u8]) -> Option<(Port, Port, &[u8])> {
    if ip_payload.len() < UDP_HEADER_LEN {
        return None;
    }

    let src_port = Port::from_network_bytes([ip_payload[0], ip_payload[1]]);
    let dst_port = Port::from_network_bytes([ip_payload[2], ip_payload[3]]);
    let udp_len = u16::from_be_bytes([ip_payload[4], ip_payload[5]]) as usize;

    if udp_len < UDP_HEADER_LEN || udp_len > ip_payload.len() {
        return None;
    }

    Some((src_port, dst_port, &ip_payload[UDP_HEADER_LEN..udp_len]))
}

/// Verify the checksum of a UDP segment (header + payload).
///
/// A transmitted checksum of zero means the sender did not compute one and
/// is always accepted.  Otherwise the one's-complement sum over the
/// pseudo-header and the segment (checksum field included) must fold to
/// all-ones.
pub fn verify_checksum(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, segment: &[u8]) -> bool {
    if segment.len() < UDP_HEADER_LEN {
        return false;
    }
    let wire = u16::from_be_bytes([segment[OFFSET_CHECKSUM], segment[OFFSET_CHECKSUM + 1]]);
    if wire == 0 {
        return true;
    }

    let mut acc = InternetChecksum::new();
    acc.add_pseudo_header(src_ip, dst_ip, IPPROTO_UDP, segment.len());
    acc.add(segment);
    acc.finish() == 0
}

/// Compute the checksum for an outgoing segment whose checksum field is
/// still zero.  A computed value of zero is returned as `0xFFFF` per the
/// RFC 768 encoding rule.
pub fn compute_checksum(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, segment: &[u8]) -> u16 {
    let mut acc = InternetChecksum::new();
    acc.add_pseudo_header(src_ip, dst_ip, IPPROTO_UDP, segment.len());
    acc.add(segment);
    acc.finish_udp()
}

/// Write an 8-byte UDP header at the start of `out` with a zeroed checksum
/// field.  `payload_len` is the payload that will follow the header.
/// Returns the header length.
pub fn build_header(out: &mut [u8], src_port: Port, dst_port: Port, payload_len: usize) -> usize {
    let udp_len = (UDP_HEADER_LEN + payload_len) as u16;
    out[OFFSET_SRC_PORT..OFFSET_SRC_PORT + 2].copy_from_slice(&src_port.to_network_bytes());
    out[OFFSET_DST_PORT..OFFSET_DST_PORT + 2].copy_from_slice(&dst_port.to_network_bytes());
    out[OFFSET_LENGTH..OFFSET_LENGTH + 2].copy_from_slice(&udp_len.to_be_bytes());
    out[OFFSET_CHECKSUM..OFFSET_CHECKSUM + 2].copy_from_slice(&0u16.to_be_bytes());
    UDP_HEADER_LEN
}

/// Insert a computed checksum into a built segment.
#[inline]
pub fn set_checksum(segment: &mut [u8], csum: u16) {
    segment[OFFSET_CHECKSUM..OFFSET_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
}
