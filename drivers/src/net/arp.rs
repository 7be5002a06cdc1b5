//! ARP request/reply handling and the single-slot peer cache.
//!
//! The device talks to exactly one remote host at a time, so the cache is a
//! single `{ip, mac}` slot rather than a table: learning a new peer
//! overwrites the old one.  This is a deliberate fixed-capacity-1 design,
//! not a placeholder for a real cache.
//!
//! Per-packet handling is stateless.  A REQUEST for our address produces a
//! REPLY with sender/target swapped; a REPLY completing an outstanding
//! resolution fills the slot.  Everything else is dropped.  An unanswered
//! request is not retransmitted here — the caller re-initiates resolution if
//! it still needs the address.

use leafnet_lib::netlog_debug;

use super::types::{Ipv4Addr, MacAddr};
use super::{
    ARP_HLEN_ETHERNET, ARP_HTYPE_ETHERNET, ARP_OPER_REPLY, ARP_OPER_REQUEST, ARP_PACKET_LEN,
    ARP_PLEN_IPV4, ARP_PTYPE_IPV4,
};

/// Byte offsets within the 28-byte Ethernet/IPv4 ARP packet (RFC 826).
const OFFSET_HTYPE: usize = 0;
const OFFSET_PTYPE: usize = 2;
const OFFSET_HLEN: usize = 4;
const OFFSET_PLEN: usize = 5;
const OFFSET_OPER: usize = 6;
const OFFSET_SHA: usize = 8;
const OFFSET_SPA: usize = 14;
const OFFSET_THA: usize = 18;
const OFFSET_TPA: usize = 24;

/// A validated Ethernet/IPv4 ARP packet.
#[derive(Clone, Copy, Debug)]
pub struct ArpPacket {
    pub oper: u16,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

/// Parse and validate an ARP payload.
///
/// Rejects anything that is not Ethernet/IPv4 ARP: htype must be 1, ptype
/// `0x0800`, hlen 6, plen 4.  Trailing bytes (Ethernet minimum-frame padding)
/// are ignored.
pub fn parse(payload: &[u8]) -> Option<ArpPacket> {
    if payload.len() < ARP_PACKET_LEN {
        return None;
    }
    if u16::from_be_bytes([payload[OFFSET_HTYPE], payload[OFFSET_HTYPE + 1]]) != ARP_HTYPE_ETHERNET
        || u16::from_be_bytes([payload[OFFSET_PTYPE], payload[OFFSET_PTYPE + 1]]) != ARP_PTYPE_IPV4
        || payload[OFFSET_HLEN] != ARP_HLEN_ETHERNET
        || payload[OFFSET_PLEN] != ARP_PLEN_IPV4
    {
        return None;
    }

    let mut sender_mac = [0u8; 6];
    let mut target_mac = [0u8; 6];
    let mut sender_ip = [0u8; 4];
    let mut target_ip = [0u8; 4];
    sender_mac.copy_from_slice(&payload[OFFSET_SHA..OFFSET_SHA + 6]);
    sender_ip.copy_from_slice(&payload[OFFSET_SPA..OFFSET_SPA + 4]);
    target_mac.copy_from_slice(&payload[OFFSET_THA..OFFSET_THA + 6]);
    target_ip.copy_from_slice(&payload[OFFSET_TPA..OFFSET_TPA + 4]);

    Some(ArpPacket {
        oper: u16::from_be_bytes([payload[OFFSET_OPER], payload[OFFSET_OPER + 1]]),
        sender_mac: MacAddr(sender_mac),
        sender_ip: Ipv4Addr(sender_ip),
        target_mac: MacAddr(target_mac),
        target_ip: Ipv4Addr(target_ip),
    })
}

/// Write a raw ARP packet into `out` and return its length (28 bytes).
fn write_packet(
    out: &mut [u8],
    oper: u16,
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
) -> usize {
    out[OFFSET_HTYPE..OFFSET_HTYPE + 2].copy_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
    out[OFFSET_PTYPE..OFFSET_PTYPE + 2].copy_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
    out[OFFSET_HLEN] = ARP_HLEN_ETHERNET;
    out[OFFSET_PLEN] = ARP_PLEN_IPV4;
    out[OFFSET_OPER..OFFSET_OPER + 2].copy_from_slice(&oper.to_be_bytes());
    out[OFFSET_SHA..OFFSET_SHA + 6].copy_from_slice(sender_mac.as_bytes());
    out[OFFSET_SPA..OFFSET_SPA + 4].copy_from_slice(sender_ip.as_bytes());
    out[OFFSET_THA..OFFSET_THA + 6].copy_from_slice(target_mac.as_bytes());
    out[OFFSET_TPA..OFFSET_TPA + 4].copy_from_slice(target_ip.as_bytes());
    ARP_PACKET_LEN
}

/// Build a reply to `request` with our MAC inserted as the sender hardware
/// address and sender/target swapped.  Returns the packet length.
pub fn build_reply(
    our_mac: MacAddr,
    our_ip: Ipv4Addr,
    request: &ArpPacket,
    out: &mut [u8],
) -> usize {
    write_packet(
        out,
        ARP_OPER_REPLY,
        our_mac,
        our_ip,
        request.sender_mac,
        request.sender_ip,
    )
}

/// Build a request asking who owns `target_ip`.  The target hardware address
/// is zero per RFC 826.  Returns the packet length.
pub fn build_request(
    our_mac: MacAddr,
    our_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
    out: &mut [u8],
) -> usize {
    write_packet(
        out,
        ARP_OPER_REQUEST,
        our_mac,
        our_ip,
        MacAddr::ZERO,
        target_ip,
    )
}

// =============================================================================
// Peer cache
// =============================================================================

/// Resolution state of the cached peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Empty,
    /// Request sent, reply outstanding.
    Resolving,
    Resolved,
}

/// Single-slot cache of the current remote peer.
#[derive(Clone, Copy)]
pub struct PeerCache {
    ip: Ipv4Addr,
    mac: MacAddr,
    state: SlotState,
}

impl PeerCache {
    pub const fn new() -> Self {
        Self {
            ip: Ipv4Addr::UNSPECIFIED,
            mac: MacAddr::ZERO,
            state: SlotState::Empty,
        }
    }

    /// Record that a resolution request for `ip` is in flight.  Replaces any
    /// previous peer.
    pub fn begin_resolve(&mut self, ip: Ipv4Addr) {
        self.ip = ip;
        self.mac = MacAddr::ZERO;
        self.state = SlotState::Resolving;
    }

    /// Learn a peer directly from received traffic (e.g. the source of an
    /// echo request we answered).  Replaces any previous peer.
    pub fn learn(&mut self, ip: Ipv4Addr, mac: MacAddr) {
        self.ip = ip;
        self.mac = mac;
        self.state = SlotState::Resolved;
    }

    /// Feed an ARP reply.  Completes the slot only if a resolution for the
    /// reply's sender address is outstanding.  Returns `true` on completion.
    pub fn complete_resolve(&mut self, sender_ip: Ipv4Addr, sender_mac: MacAddr) -> bool {
        if self.state == SlotState::Resolving && self.ip == sender_ip {
            self.mac = sender_mac;
            self.state = SlotState::Resolved;
            return true;
        }
        false
    }

    /// MAC for `ip`, if it is the resolved peer.
    pub fn mac_for(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        if self.state == SlotState::Resolved && self.ip == ip {
            Some(self.mac)
        } else {
            None
        }
    }

    /// The cached peer address, if resolved.
    pub fn peer(&self) -> Option<(Ipv4Addr, MacAddr)> {
        if self.state == SlotState::Resolved {
            Some((self.ip, self.mac))
        } else {
            None
        }
    }

    /// Forget the peer (link-down, restart).
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

// =============================================================================
// Per-packet handling
// =============================================================================

/// Handle a received ARP payload.
///
/// On a REQUEST targeting `our_ip`, builds a reply into `reply` and returns
/// its length; the requester is also learned into the cache, since it is now
/// the host we are talking to.  On a REPLY, completes an outstanding
/// resolution.  Returns `None` when nothing is to be transmitted.
pub fn handle_rx(
    cache: &mut PeerCache,
    our_mac: MacAddr,
    our_ip: Ipv4Addr,
    payload: &[u8],
    reply: &mut [u8],
) -> Option<usize> {
    let pkt = match parse(payload) {
        Some(pkt) => pkt,
        None => {
            netlog_debug!("arp: malformed packet ({} bytes), dropping", payload.len());
            return None;
        }
    };

    match pkt.oper {
        ARP_OPER_REQUEST if pkt.target_ip == our_ip => {
            cache.learn(pkt.sender_ip, pkt.sender_mac);
            Some(build_reply(our_mac, our_ip, &pkt, reply))
        }
        ARP_OPER_REPLY => {
            if cache.complete_resolve(pkt.sender_ip, pkt.sender_mac) {
                netlog_debug!("arp: resolved {} -> {}", pkt.sender_ip, pkt.sender_mac);
            }
            None
        }
        _ => None,
    }
}
