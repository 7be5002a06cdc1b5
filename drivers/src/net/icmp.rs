//! ICMP echo responder (RFC 792).
//!
//! Only echo requests are answered.  Every other message type is logged at
//! debug level and dropped — this device does not generate destination
//! unreachable or time exceeded.

use leafnet_lib::netlog_debug;

use super::checksum;

/// Byte offsets within the ICMP message.
const OFFSET_TYPE: usize = 0;
const OFFSET_CODE: usize = 1;
const OFFSET_CHECKSUM: usize = 2;

/// Fixed header: type, code, checksum, identifier, sequence number.
pub const ICMP_HEADER_LEN: usize = 8;

/// Message types (RFC 792).
pub const MSG_TYPE_ECHO_REPLY: u8 = 0;
pub const MSG_TYPE_DESTINATION_UNREACHABLE: u8 = 3;
pub const MSG_TYPE_SOURCE_QUENCH: u8 = 4;
pub const MSG_TYPE_REDIRECT: u8 = 5;
pub const MSG_TYPE_ECHO: u8 = 8;
pub const MSG_TYPE_TIME_EXCEEDED: u8 = 11;
pub const MSG_TYPE_PARAMETER_PROBLEM: u8 = 12;
pub const MSG_TYPE_TIMESTAMP: u8 = 13;
pub const MSG_TYPE_TIMESTAMP_REPLY: u8 = 14;

/// Handle a received ICMP message.
///
/// For an echo request with a valid checksum, writes the reply message
/// (identifier, sequence number and payload unchanged, type rewritten,
/// checksum recomputed) into `out` and returns its length.  Anything else
/// returns `None`.
pub fn handle_rx(message: &[u8], out: &mut [u8]) -> Option<usize> {
    if message.len() < ICMP_HEADER_LEN || out.len() < message.len() {
        return None;
    }
    if !checksum::verify(message) {
        netlog_debug!("icmp: bad checksum, dropping");
        return None;
    }
    if message[OFFSET_TYPE] != MSG_TYPE_ECHO {
        netlog_debug!("icmp: type {} not handled, dropping", message[OFFSET_TYPE]);
        return None;
    }
    if message[OFFSET_CODE] != 0 {
        netlog_debug!("icmp: echo with code {}, dropping", message[OFFSET_CODE]);
        return None;
    }

    let reply = &mut out[..message.len()];
    reply.copy_from_slice(message);
    reply[OFFSET_TYPE] = MSG_TYPE_ECHO_REPLY;
    reply[OFFSET_CHECKSUM..OFFSET_CHECKSUM + 2].copy_from_slice(&0u16.to_be_bytes());
    let csum = checksum::checksum(reply);
    reply[OFFSET_CHECKSUM..OFFSET_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
    Some(message.len())
}
