//! Interface configuration and the single event loop driving the stack.
//!
//! # Architecture
//!
//! [`NetStack`] owns everything with protocol state: the frame device, the
//! interface configuration, the one-slot peer cache, the DHCP client, and
//! the two fixed frame buffers.  There are no globals — each component's
//! buffer is owned exclusively through `&mut self`, which also guarantees
//! the serialization the protocols need: [`poll`] (packet processing) and
//! [`on_tick`] (timer processing) can never interleave mid-operation.
//!
//! # Integration
//!
//! The board support loop calls [`poll`] when the controller signals pending
//! packets and [`on_tick`] from its one-second timer.  Both return
//! [`StackEvent`]s for the things only the integrator can do: persisting a
//! fresh lease to EEPROM, or reacting to a lost one.
//!
//! [`poll`]: NetStack::poll
//! [`on_tick`]: NetStack::on_tick

use leafnet_lib::{netlog_debug, netlog_error, netlog_info};

use super::arp::{self, PeerCache};
use super::dhcp::{self, DHCP_MAX_LEN};
use super::dhcp_client::{self, DhcpAction, DhcpClient, DhcpState, DhcpTiming, Lease, RememberedLease};
use super::ethernet::{self, FrameClass};
use super::icmp;
use super::ipv4;
use super::tcp;
use super::types::{EtherType, IpProtocol, Ipv4Addr, MacAddr, NetError, Port};
use super::udp;
use super::{
    ARP_PACKET_LEN, DEFAULT_TTL, ETH_HEADER_LEN, IPPROTO_ICMP, IPPROTO_UDP, IPV4_HEADER_LEN,
    MAX_FRAME_LEN, UDP_HEADER_LEN,
};

/// Offsets of the layer headers within a frame we build.
const IP_OFFSET: usize = ETH_HEADER_LEN;
const UDP_OFFSET: usize = ETH_HEADER_LEN + IPV4_HEADER_LEN;
const UDP_PAYLOAD_OFFSET: usize = UDP_OFFSET + UDP_HEADER_LEN;

/// Largest UDP payload that fits a single frame.
pub const MAX_UDP_PAYLOAD: usize = MAX_FRAME_LEN - UDP_PAYLOAD_OFFSET - 4;

// =============================================================================
// Frame device abstraction
// =============================================================================

/// Abstraction over the Ethernet controller.
///
/// One frame crosses the boundary per call; the implementation owns its
/// hardware FIFO and must release a received frame's slot before returning
/// from [`recv`](Self::recv) so the hardware can reuse it.
pub trait FrameDevice {
    /// Number of received frames waiting in the hardware FIFO (oldest first).
    fn pending_frames(&mut self) -> Result<u8, NetError>;

    /// Copy the oldest pending frame into `buf` and release its FIFO slot.
    ///
    /// Returns the frame length, or `0` when the frame was consumed but not
    /// delivered (bad receive status, oversized) — the slot is released
    /// either way.  Must only be called when `pending_frames() > 0`.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetError>;

    /// Transmit one complete Ethernet frame.
    fn send(&mut self, frame: &[u8]) -> Result<(), NetError>;

    /// Current PHY link state.
    fn link_up(&mut self) -> Result<bool, NetError>;
}

// =============================================================================
// IfaceConfig
// =============================================================================

/// Interface configuration: our own addresses.
///
/// Populated from persisted values (EEPROM collaborator) for a static setup,
/// or by the DHCP client on bind.
#[derive(Clone, Copy)]
pub struct IfaceConfig {
    pub mac: MacAddr,
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: Ipv4Addr,
    /// Whether `addr` is valid and the interface may source unicast traffic.
    pub up: bool,
}

impl IfaceConfig {
    /// An interface that knows only its MAC (address pending via DHCP).
    pub const fn unconfigured(mac: MacAddr) -> Self {
        Self {
            mac,
            addr: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            dns: Ipv4Addr::UNSPECIFIED,
            up: false,
        }
    }

    /// A statically configured interface.
    pub const fn with_static(
        mac: MacAddr,
        addr: Ipv4Addr,
        netmask: Ipv4Addr,
        gateway: Ipv4Addr,
    ) -> Self {
        Self {
            mac,
            addr,
            netmask,
            gateway,
            dns: Ipv4Addr::UNSPECIFIED,
            up: true,
        }
    }

    /// Directed broadcast address: `addr | !netmask`.
    #[inline]
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from_u32_be(self.addr.to_u32_be() | !self.netmask.to_u32_be())
    }

    /// `true` if `ip` is on our directly connected subnet.
    #[inline]
    pub fn is_local(&self, ip: Ipv4Addr) -> bool {
        Ipv4Addr::in_subnet(ip, self.addr, self.netmask)
    }

    /// Leading 1-bits of the netmask.
    #[inline]
    pub fn prefix_len(&self) -> u8 {
        self.netmask.to_u32_be().leading_ones() as u8
    }

    /// Whether a received IPv4 packet with destination `dst` is for us:
    /// our configured address, the limited broadcast, or the subnet
    /// broadcast.
    pub fn accepts_dst(&self, dst: Ipv4Addr) -> bool {
        if dst.is_broadcast() {
            return true;
        }
        self.up && (dst == self.addr || dst == self.broadcast())
    }
}

// =============================================================================
// NetStack
// =============================================================================

/// Things the integrator must react to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackEvent {
    /// A DHCP lease was acquired or renewed; worth persisting.
    LeaseAcquired(Lease),
    /// The address is gone (expiry, NAK, link-down).
    LeaseLost,
}

/// The stack: one device, one interface, one peer.
pub struct NetStack<D: FrameDevice> {
    dev: D,
    cfg: IfaceConfig,
    peer: PeerCache,
    dhcp: Option<DhcpClient>,
    /// IPv4 identification counter for outgoing packets.
    ident: u16,
    rx: [u8; MAX_FRAME_LEN],
    tx: [u8; MAX_FRAME_LEN],
}

impl<D: FrameDevice> NetStack<D> {
    /// Stack with a static address; DHCP stays off.
    pub fn new_static(dev: D, cfg: IfaceConfig) -> Self {
        Self {
            dev,
            cfg,
            peer: PeerCache::new(),
            dhcp: None,
            ident: 0,
            rx: [0; MAX_FRAME_LEN],
            tx: [0; MAX_FRAME_LEN],
        }
    }

    /// Stack that acquires its address via DHCP.  `seed` feeds the xid
    /// generator; `remembered` (from persistent storage) makes the client
    /// try to reclaim its previous address first.
    pub fn new_dhcp(
        dev: D,
        mac: MacAddr,
        seed: u32,
        timing: DhcpTiming,
        remembered: Option<RememberedLease>,
    ) -> Self {
        Self {
            dev,
            cfg: IfaceConfig::unconfigured(mac),
            peer: PeerCache::new(),
            dhcp: Some(DhcpClient::new(mac, seed, timing, remembered)),
            ident: 0,
            rx: [0; MAX_FRAME_LEN],
            tx: [0; MAX_FRAME_LEN],
        }
    }

    pub fn iface(&self) -> &IfaceConfig {
        &self.cfg
    }

    pub fn dhcp_state(&self) -> Option<DhcpState> {
        self.dhcp.as_ref().map(|c| c.state())
    }

    /// The resolved peer, if any.
    pub fn peer(&self) -> Option<(Ipv4Addr, MacAddr)> {
        self.peer.peer()
    }

    pub fn device(&mut self) -> &mut D {
        &mut self.dev
    }

    // =========================================================================
    // Event sources
    // =========================================================================

    /// Drain up to `budget` pending frames from the device.
    ///
    /// Stops early when an event surfaces so the caller can react before the
    /// remaining frames are drained on the next call.  Device errors abandon
    /// the current operation and leave all protocol state unchanged.
    pub fn poll(&mut self, budget: u8) -> Option<StackEvent> {
        for _ in 0..budget {
            let pending = match self.dev.pending_frames() {
                Ok(n) => n,
                Err(err) => {
                    netlog_error!("netstack: pending-count read failed: {}", err);
                    return None;
                }
            };
            if pending == 0 {
                return None;
            }

            let len = match self.dev.recv(&mut self.rx) {
                Ok(len) => len,
                Err(err) => {
                    netlog_error!("netstack: frame receive failed: {}", err);
                    return None;
                }
            };
            if len == 0 {
                continue; // driver consumed a bad frame
            }

            if let Some(event) = self.process_frame(len) {
                return Some(event);
            }
        }
        None
    }

    /// Advance the one-second timers (DHCP lease aging and retransmission).
    pub fn on_tick(&mut self) -> Option<StackEvent> {
        let action = match self.dhcp.as_mut() {
            Some(client) => client.on_tick(),
            None => DhcpAction::None,
        };
        self.perform_dhcp_action(action)
    }

    /// React to loss of the Ethernet link: any in-flight DHCP exchange is
    /// abandoned and the lease (if DHCP-managed) is dropped.
    pub fn on_link_down(&mut self) -> Option<StackEvent> {
        self.peer.clear();
        let client = self.dhcp.as_mut()?;
        let had_lease = client.lease().is_some();
        client.reset();
        if had_lease {
            self.cfg.addr = Ipv4Addr::UNSPECIFIED;
            self.cfg.netmask = Ipv4Addr::UNSPECIFIED;
            self.cfg.gateway = Ipv4Addr::UNSPECIFIED;
            self.cfg.dns = Ipv4Addr::UNSPECIFIED;
            self.cfg.up = false;
            netlog_info!("netstack: link down, lease dropped");
            Some(StackEvent::LeaseLost)
        } else {
            None
        }
    }

    // =========================================================================
    // Application TX
    // =========================================================================

    /// Broadcast an ARP request for `ip` and mark the peer slot as
    /// resolving.  Not retried automatically — call again if no reply shows
    /// up.
    pub fn resolve_peer(&mut self, ip: Ipv4Addr) -> Result<(), NetError> {
        let n = arp::build_request(
            self.cfg.mac,
            self.cfg.addr,
            ip,
            &mut self.tx[ETH_HEADER_LEN..ETH_HEADER_LEN + ARP_PACKET_LEN],
        );
        ethernet::write_header(&mut self.tx, MacAddr::BROADCAST, self.cfg.mac, EtherType::Arp);
        self.dev.send(&self.tx[..ETH_HEADER_LEN + n])?;
        self.peer.begin_resolve(ip);
        Ok(())
    }

    /// Send a UDP datagram to the resolved peer.
    pub fn send_udp_to_peer(
        &mut self,
        src_port: Port,
        dst_port: Port,
        payload: &[u8],
    ) -> Result<(), NetError> {
        if !self.cfg.up {
            return Err(NetError::InvalidArgument);
        }
        if payload.len() > MAX_UDP_PAYLOAD {
            return Err(NetError::InvalidArgument);
        }
        let (peer_ip, peer_mac) = self.peer.peer().ok_or(NetError::HostUnreachable)?;

        self.tx[UDP_PAYLOAD_OFFSET..UDP_PAYLOAD_OFFSET + payload.len()].copy_from_slice(payload);
        udp::build_header(&mut self.tx[UDP_OFFSET..], src_port, dst_port, payload.len());

        let seg_end = UDP_PAYLOAD_OFFSET + payload.len();
        let csum = udp::compute_checksum(self.cfg.addr, peer_ip, &self.tx[UDP_OFFSET..seg_end]);
        udp::set_checksum(&mut self.tx[UDP_OFFSET..seg_end], csum);

        self.send_ipv4(peer_ip, peer_mac, IPPROTO_UDP, UDP_HEADER_LEN + payload.len())
    }

    // =========================================================================
    // RX pipeline
    // =========================================================================

    /// Run one received frame through classify → ARP / IPv4.
    fn process_frame(&mut self, len: usize) -> Option<StackEvent> {
        if len < ETH_HEADER_LEN {
            netlog_debug!("netstack: frame too short ({} bytes)", len);
            return None;
        }

        // Destination MAC filter: ours, broadcast, or multicast.
        let dst = ethernet::dst_mac(&self.rx);
        if dst != self.cfg.mac && !dst.is_broadcast() && !dst.is_multicast() {
            return None;
        }

        match ethernet::classify(ethernet::type_len(&self.rx)) {
            FrameClass::Arp => {
                self.handle_arp(len);
                None
            }
            FrameClass::Ipv4 => self.handle_ipv4(len),
            FrameClass::LengthFramed => {
                netlog_debug!("netstack: 802.3 length-framed packet, dropping");
                None
            }
            FrameClass::Unknown(type_len) => {
                netlog_debug!("netstack: unknown EtherType 0x{:04x}, dropping", type_len);
                None
            }
        }
    }

    fn handle_arp(&mut self, len: usize) {
        let reply_len = arp::handle_rx(
            &mut self.peer,
            self.cfg.mac,
            self.cfg.addr,
            &self.rx[ETH_HEADER_LEN..len],
            &mut self.tx[ETH_HEADER_LEN..ETH_HEADER_LEN + ARP_PACKET_LEN],
        );
        if let Some(n) = reply_len {
            let requester = ethernet::src_mac(&self.rx);
            ethernet::write_header(&mut self.tx, requester, self.cfg.mac, EtherType::Arp);
            if let Err(err) = self.dev.send(&self.tx[..ETH_HEADER_LEN + n]) {
                netlog_error!("netstack: arp reply send failed: {}", err);
            }
        }
    }

    fn handle_ipv4(&mut self, len: usize) -> Option<StackEvent> {
        let hdr = match ipv4::parse(&self.rx[ETH_HEADER_LEN..len]) {
            Some(hdr) => hdr,
            None => {
                netlog_debug!("netstack: invalid IPv4 header, dropping");
                return None;
            }
        };
        if !self.cfg.accepts_dst(hdr.dst) {
            netlog_debug!("netstack: IPv4 packet for {}, not us", hdr.dst);
            return None;
        }

        let payload_start = ETH_HEADER_LEN + hdr.header_len;
        let payload_end = ETH_HEADER_LEN + hdr.total_len;

        match IpProtocol::from_u8(hdr.protocol) {
            Some(IpProtocol::Icmp) => {
                self.handle_icmp(&hdr, payload_start, payload_end);
                None
            }
            Some(IpProtocol::Udp) => self.handle_udp(&hdr, payload_start, payload_end),
            Some(IpProtocol::Tcp) => {
                // Header inspection only; there is no TCP state machine.
                if let Some(tcp_hdr) = tcp::parse_header(&self.rx[payload_start..payload_end]) {
                    netlog_debug!(
                        "netstack: TCP {}:{} -> port {} flags {:#04x}, dropping",
                        hdr.src,
                        tcp_hdr.src_port,
                        tcp_hdr.dst_port,
                        tcp_hdr.flags
                    );
                }
                None
            }
            None => {
                netlog_debug!("netstack: IP protocol {} unsupported, dropping", hdr.protocol);
                None
            }
        }
    }

    fn handle_icmp(&mut self, hdr: &ipv4::Ipv4Header, start: usize, end: usize) {
        let reply_len = icmp::handle_rx(&self.rx[start..end], &mut self.tx[UDP_OFFSET..]);
        let Some(n) = reply_len else {
            return;
        };

        // The host pinging us becomes the current peer.
        let src_mac = ethernet::src_mac(&self.rx);
        self.peer.learn(hdr.src, src_mac);

        if let Err(err) = self.send_ipv4(hdr.src, src_mac, IPPROTO_ICMP, n) {
            netlog_error!("netstack: echo reply send failed: {}", err);
        }
    }

    fn handle_udp(
        &mut self,
        hdr: &ipv4::Ipv4Header,
        start: usize,
        end: usize,
    ) -> Option<StackEvent> {
        let (src_port, dst_port, payload_len) = {
            let Some((src_port, dst_port, payload)) = udp::parse(&self.rx[start..end]) else {
                netlog_debug!("netstack: invalid UDP header, dropping");
                return None;
            };
            (src_port, dst_port, payload.len())
        };

        let seg_end = start + UDP_HEADER_LEN + payload_len;
        if !udp::verify_checksum(hdr.src, hdr.dst, &self.rx[start..seg_end]) {
            netlog_debug!("netstack: bad UDP checksum, dropping");
            return None;
        }

        // The only UDP listener on this device is the DHCP client.
        if dst_port.as_u16() == dhcp::UDP_PORT_CLIENT && src_port.as_u16() == dhcp::UDP_PORT_SERVER
        {
            let payload_start = start + UDP_HEADER_LEN;
            let action = match self.dhcp.as_mut() {
                Some(client) => client.handle_reply(&self.rx[payload_start..seg_end]),
                None => DhcpAction::None,
            };
            return self.perform_dhcp_action(action);
        }

        netlog_debug!("netstack: UDP to port {} has no listener, dropping", dst_port);
        None
    }

    // =========================================================================
    // DHCP glue
    // =========================================================================

    /// Execute a state-machine action: transmit the message it names, or
    /// apply a lease change to the interface.
    fn perform_dhcp_action(&mut self, action: DhcpAction) -> Option<StackEvent> {
        match action {
            DhcpAction::None => None,
            DhcpAction::LeaseAcquired(lease) => {
                self.cfg.addr = lease.addr;
                self.cfg.netmask = lease.subnet_mask;
                self.cfg.gateway = lease.router;
                self.cfg.dns = lease.dns;
                self.cfg.up = true;
                Some(StackEvent::LeaseAcquired(lease))
            }
            DhcpAction::LeaseLost => {
                self.cfg.addr = Ipv4Addr::UNSPECIFIED;
                self.cfg.netmask = Ipv4Addr::UNSPECIFIED;
                self.cfg.gateway = Ipv4Addr::UNSPECIFIED;
                self.cfg.dns = Ipv4Addr::UNSPECIFIED;
                self.cfg.up = false;
                self.peer.clear();
                Some(StackEvent::LeaseLost)
            }
            send => {
                if let Err(err) = self.send_dhcp_message(&send) {
                    netlog_error!("netstack: DHCP send failed: {}", err);
                }
                None
            }
        }
    }

    /// Build and transmit the UDP/IPv4/Ethernet encapsulation for a DHCP
    /// send action.
    fn send_dhcp_message(&mut self, action: &DhcpAction) -> Result<(), NetError> {
        let mut msg = [0u8; DHCP_MAX_LEN];
        let Some(n) = dhcp_client::build_action(self.cfg.mac, action, &mut msg) else {
            return Ok(());
        };

        // Renewal is unicast to the bound server; everything else is
        // broadcast.  An unresolved server MAC falls back to the broadcast
        // address — the server still receives the IP-unicast request.
        let (src_ip, dst_ip) = match *action {
            DhcpAction::SendRenewRequest { ciaddr, server, .. } => (ciaddr, server),
            DhcpAction::SendRebindRequest { ciaddr, .. } => (ciaddr, Ipv4Addr::BROADCAST),
            _ => (Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST),
        };
        let dst_mac = if dst_ip.is_broadcast() {
            MacAddr::BROADCAST
        } else {
            self.peer.mac_for(dst_ip).unwrap_or(MacAddr::BROADCAST)
        };

        self.tx[UDP_PAYLOAD_OFFSET..UDP_PAYLOAD_OFFSET + n].copy_from_slice(&msg[..n]);
        udp::build_header(
            &mut self.tx[UDP_OFFSET..],
            Port(dhcp::UDP_PORT_CLIENT),
            Port(dhcp::UDP_PORT_SERVER),
            n,
        );
        let seg_end = UDP_PAYLOAD_OFFSET + n;
        let csum = udp::compute_checksum(src_ip, dst_ip, &self.tx[UDP_OFFSET..seg_end]);
        udp::set_checksum(&mut self.tx[UDP_OFFSET..seg_end], csum);

        let total = UDP_HEADER_LEN + n;
        self.send_ipv4_from(src_ip, dst_ip, dst_mac, IPPROTO_UDP, total)
    }

    // =========================================================================
    // TX helpers
    // =========================================================================

    /// Finish a frame whose L4 content already sits at
    /// [`UDP_OFFSET`]: write the IPv4 and Ethernet headers and transmit.
    fn send_ipv4(
        &mut self,
        dst_ip: Ipv4Addr,
        dst_mac: MacAddr,
        protocol: u8,
        l4_len: usize,
    ) -> Result<(), NetError> {
        self.send_ipv4_from(self.cfg.addr, dst_ip, dst_mac, protocol, l4_len)
    }

    fn send_ipv4_from(
        &mut self,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        dst_mac: MacAddr,
        protocol: u8,
        l4_len: usize,
    ) -> Result<(), NetError> {
        self.ident = self.ident.wrapping_add(1);
        ipv4::build_header(
            &mut self.tx[IP_OFFSET..],
            src_ip,
            dst_ip,
            protocol,
            DEFAULT_TTL,
            l4_len,
            self.ident,
        );
        ethernet::write_header(&mut self.tx, dst_mac, self.cfg.mac, EtherType::Ipv4);
        self.dev.send(&self.tx[..UDP_OFFSET + l4_len])
    }
}
