//! DHCP message construction and parsing (RFC 2131 / RFC 2132).
//!
//! Pure wire codec: the state machine that decides *when* to send what lives
//! in [`dhcp_client`](super::dhcp_client).  All builders write into a fixed
//! `[u8; DHCP_MAX_LEN]` buffer and return the message length.

use super::types::{Ipv4Addr, MacAddr};

pub const UDP_PORT_SERVER: u16 = 67;
pub const UDP_PORT_CLIENT: u16 = 68;

const BOOTREQUEST: u8 = 1;
const BOOTREPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;
const HLEN_ETHERNET: u8 = 6;
const FLAGS_BROADCAST: u16 = 0x8000;
const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Byte offsets of the fixed BOOTP region.
const OFFSET_OP: usize = 0;
const OFFSET_HTYPE: usize = 1;
const OFFSET_HLEN: usize = 2;
const OFFSET_XID: usize = 4;
const OFFSET_SECS: usize = 8;
const OFFSET_FLAGS: usize = 10;
const OFFSET_CIADDR: usize = 12;
const OFFSET_YIADDR: usize = 16;
const OFFSET_CHADDR: usize = 28;
const OFFSET_COOKIE: usize = 236;

const OPTION_PAD: u8 = 0;
const OPTION_SUBNET_MASK: u8 = 1;
const OPTION_ROUTER: u8 = 3;
const OPTION_DNS: u8 = 6;
const OPTION_REQUESTED_IP: u8 = 50;
const OPTION_LEASE_TIME: u8 = 51;
const OPTION_MSG_TYPE: u8 = 53;
const OPTION_SERVER_ID: u8 = 54;
const OPTION_PARAM_REQ_LIST: u8 = 55;
const OPTION_RENEWAL_TIME: u8 = 58;
const OPTION_REBINDING_TIME: u8 = 59;
const OPTION_END: u8 = 255;

pub const MSG_DISCOVER: u8 = 1;
pub const MSG_OFFER: u8 = 2;
pub const MSG_REQUEST: u8 = 3;
pub const MSG_DECLINE: u8 = 4;
pub const MSG_ACK: u8 = 5;
pub const MSG_NAK: u8 = 6;
pub const MSG_RELEASE: u8 = 7;
pub const MSG_INFORM: u8 = 8;

/// Fixed BOOTP region (236 bytes) plus the magic cookie.
pub const BOOTP_HEADER_LEN: usize = 240;
/// Buffer size for any message we build: fixed region plus our options.
pub const DHCP_MAX_LEN: usize = 320;

// =============================================================================
// Packet construction
// =============================================================================

/// Write the common BOOTP header fields shared by all client messages.
///
/// The broadcast flag is set whenever `ciaddr` is unspecified: a client
/// without a configured address cannot receive unicast replies.  Returns the
/// byte offset where DHCP options begin (`BOOTP_HEADER_LEN`).
fn write_bootp_header(
    out: &mut [u8; DHCP_MAX_LEN],
    mac: MacAddr,
    xid: u32,
    secs: u16,
    ciaddr: Ipv4Addr,
) -> usize {
    out.fill(0);
    out[OFFSET_OP] = BOOTREQUEST;
    out[OFFSET_HTYPE] = HTYPE_ETHERNET;
    out[OFFSET_HLEN] = HLEN_ETHERNET;
    out[OFFSET_XID..OFFSET_XID + 4].copy_from_slice(&xid.to_be_bytes());
    out[OFFSET_SECS..OFFSET_SECS + 2].copy_from_slice(&secs.to_be_bytes());
    if ciaddr.is_unspecified() {
        out[OFFSET_FLAGS..OFFSET_FLAGS + 2].copy_from_slice(&FLAGS_BROADCAST.to_be_bytes());
    } else {
        out[OFFSET_CIADDR..OFFSET_CIADDR + 4].copy_from_slice(ciaddr.as_bytes());
    }
    out[OFFSET_CHADDR..OFFSET_CHADDR + 6].copy_from_slice(mac.as_bytes());
    out[OFFSET_COOKIE..OFFSET_COOKIE + 4].copy_from_slice(&MAGIC_COOKIE);
    BOOTP_HEADER_LEN
}

/// Append the message-type option.  Always the first option after the cookie.
fn put_msg_type(out: &mut [u8; DHCP_MAX_LEN], mut i: usize, msg_type: u8) -> usize {
    out[i] = OPTION_MSG_TYPE;
    out[i + 1] = 1;
    out[i + 2] = msg_type;
    i += 3;
    i
}

/// Append a 4-byte address option.
fn put_addr_option(out: &mut [u8; DHCP_MAX_LEN], mut i: usize, code: u8, addr: Ipv4Addr) -> usize {
    out[i] = code;
    out[i + 1] = 4;
    out[i + 2..i + 6].copy_from_slice(addr.as_bytes());
    i += 6;
    i
}

/// Append the standard parameter-request-list option and the END marker.
/// Returns the final packet length.
fn finish_options(out: &mut [u8; DHCP_MAX_LEN], mut i: usize) -> usize {
    out[i] = OPTION_PARAM_REQ_LIST;
    out[i + 1] = 6;
    out[i + 2] = OPTION_SUBNET_MASK;
    out[i + 3] = OPTION_ROUTER;
    out[i + 4] = OPTION_DNS;
    out[i + 5] = OPTION_LEASE_TIME;
    out[i + 6] = OPTION_RENEWAL_TIME;
    out[i + 7] = OPTION_REBINDING_TIME;
    i += 8;

    out[i] = OPTION_END;
    i + 1
}

/// DISCOVER: broadcast, no address options.
pub fn build_discover(mac: MacAddr, xid: u32, secs: u16, out: &mut [u8; DHCP_MAX_LEN]) -> usize {
    let i = write_bootp_header(out, mac, xid, secs, Ipv4Addr::UNSPECIFIED);
    let i = put_msg_type(out, i, MSG_DISCOVER);
    finish_options(out, i)
}

/// REQUEST in response to an OFFER: echoes the offered address (option 50)
/// and the chosen server (option 54).
pub fn build_request(
    mac: MacAddr,
    xid: u32,
    secs: u16,
    requested: Ipv4Addr,
    server: Ipv4Addr,
    out: &mut [u8; DHCP_MAX_LEN],
) -> usize {
    let i = write_bootp_header(out, mac, xid, secs, Ipv4Addr::UNSPECIFIED);
    let i = put_msg_type(out, i, MSG_REQUEST);
    let i = put_addr_option(out, i, OPTION_REQUESTED_IP, requested);
    let i = put_addr_option(out, i, OPTION_SERVER_ID, server);
    finish_options(out, i)
}

/// REQUEST while renewing or rebinding: `ciaddr` carries the bound address
/// and options 50/54 are absent per RFC 2131 §4.3.2.
pub fn build_renew_request(
    mac: MacAddr,
    xid: u32,
    secs: u16,
    ciaddr: Ipv4Addr,
    out: &mut [u8; DHCP_MAX_LEN],
) -> usize {
    let i = write_bootp_header(out, mac, xid, secs, ciaddr);
    let i = put_msg_type(out, i, MSG_REQUEST);
    finish_options(out, i)
}

/// REQUEST after reboot with a remembered lease: option 50 carries the
/// remembered address, no server id, `ciaddr` stays zero.
pub fn build_reboot_request(
    mac: MacAddr,
    xid: u32,
    secs: u16,
    requested: Ipv4Addr,
    out: &mut [u8; DHCP_MAX_LEN],
) -> usize {
    let i = write_bootp_header(out, mac, xid, secs, Ipv4Addr::UNSPECIFIED);
    let i = put_msg_type(out, i, MSG_REQUEST);
    let i = put_addr_option(out, i, OPTION_REQUESTED_IP, requested);
    finish_options(out, i)
}

// =============================================================================
// Parsing
// =============================================================================

/// Options extracted from a server reply.
#[derive(Clone, Copy, Default)]
struct DhcpOptions {
    message_type: u8,
    server_id: [u8; 4],
    subnet_mask: [u8; 4],
    router: [u8; 4],
    dns: [u8; 4],
    lease_time: Option<u32>,
    renewal_time: Option<u32>,
    rebinding_time: Option<u32>,
}

/// A validated BOOTREPLY addressed to us.
#[derive(Clone, Copy, Debug)]
pub struct DhcpReply {
    /// Option 53 value (OFFER, ACK, NAK, ...).
    pub msg_type: u8,
    /// `yiaddr` — the address being offered or acknowledged.
    pub yiaddr: Ipv4Addr,
    /// Option 54, or unspecified if absent.
    pub server_id: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub router: Ipv4Addr,
    pub dns: Ipv4Addr,
    /// Option 51 (seconds).
    pub lease_time: Option<u32>,
    /// Option 58 (T1, seconds).
    pub renewal_time: Option<u32>,
    /// Option 59 (T2, seconds).
    pub rebinding_time: Option<u32>,
}

fn parse_options(options: &[u8]) -> DhcpOptions {
    let mut opts = DhcpOptions::default();
    let mut i = 0usize;
    while i < options.len() {
        let code = options[i];
        if code == OPTION_END {
            break;
        }
        if code == OPTION_PAD {
            i += 1;
            continue;
        }
        if i + 1 >= options.len() {
            break;
        }
        let len = options[i + 1] as usize;
        if i + 2 + len > options.len() {
            break;
        }

        let data = &options[i + 2..i + 2 + len];
        match code {
            OPTION_MSG_TYPE if len >= 1 => opts.message_type = data[0],
            OPTION_SERVER_ID if len >= 4 => opts.server_id.copy_from_slice(&data[..4]),
            OPTION_SUBNET_MASK if len >= 4 => opts.subnet_mask.copy_from_slice(&data[..4]),
            OPTION_ROUTER if len >= 4 => opts.router.copy_from_slice(&data[..4]),
            OPTION_DNS if len >= 4 => opts.dns.copy_from_slice(&data[..4]),
            OPTION_LEASE_TIME if len >= 4 => {
                opts.lease_time = Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
            }
            OPTION_RENEWAL_TIME if len >= 4 => {
                opts.renewal_time = Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
            }
            OPTION_REBINDING_TIME if len >= 4 => {
                opts.rebinding_time =
                    Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
            }
            _ => {}
        }

        i += 2 + len;
    }

    opts
}

/// Parse a server reply out of a UDP payload.
///
/// Returns `None` — leaving the caller's state untouched — unless the
/// message is a BOOTREPLY for Ethernet, carries our `xid` and `mac` in
/// chaddr, starts its options with the magic cookie, and has a message-type
/// option.
pub fn parse_reply(payload: &[u8], xid: u32, mac: MacAddr) -> Option<DhcpReply> {
    if payload.len() < BOOTP_HEADER_LEN {
        return None;
    }
    if payload[OFFSET_OP] != BOOTREPLY
        || payload[OFFSET_HTYPE] != HTYPE_ETHERNET
        || payload[OFFSET_HLEN] != HLEN_ETHERNET
    {
        return None;
    }
    let wire_xid = u32::from_be_bytes([
        payload[OFFSET_XID],
        payload[OFFSET_XID + 1],
        payload[OFFSET_XID + 2],
        payload[OFFSET_XID + 3],
    ]);
    if wire_xid != xid {
        return None;
    }
    if payload[OFFSET_CHADDR..OFFSET_CHADDR + 6] != mac.0 {
        return None;
    }
    if payload[OFFSET_COOKIE..OFFSET_COOKIE + 4] != MAGIC_COOKIE {
        return None;
    }

    let options = parse_options(&payload[BOOTP_HEADER_LEN..]);
    if options.message_type == 0 {
        return None;
    }

    Some(DhcpReply {
        msg_type: options.message_type,
        yiaddr: Ipv4Addr([
            payload[OFFSET_YIADDR],
            payload[OFFSET_YIADDR + 1],
            payload[OFFSET_YIADDR + 2],
            payload[OFFSET_YIADDR + 3],
        ]),
        server_id: Ipv4Addr(options.server_id),
        subnet_mask: Ipv4Addr(options.subnet_mask),
        router: Ipv4Addr(options.router),
        dns: Ipv4Addr(options.dns),
        lease_time: options.lease_time,
        renewal_time: options.renewal_time,
        rebinding_time: options.rebinding_time,
    })
}
