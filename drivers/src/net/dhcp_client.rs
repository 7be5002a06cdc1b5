//! DHCP client state machine (RFC 2131 §4.4).
//!
//! The machine is I/O-free: it consumes two kinds of events — a received
//! server reply ([`handle_reply`]) and a one-second timer tick
//! ([`on_tick`]) — and returns a [`DhcpAction`] telling the caller what to
//! transmit or apply.  The event loop owns the machine exclusively, so the
//! two event paths can never interleave mid-transition.
//!
//! # States
//!
//! ```text
//!            +--------- NAK / retries exhausted ----------+
//!            v                                            |
//!  INIT -> SELECTING --OFFER--> REQUESTING --ACK--> BOUND |
//!    ^                                               |    |
//!    |                                            T1 v    |
//!    +---- lease expired ---- REBINDING <--T2-- RENEWING -+
//!
//!  INIT_REBOOT --request--> REBOOTING --ACK--> BOUND
//!                               +------NAK/timeout------> INIT
//! ```
//!
//! Response timeouts start at [`DHCP_TIMER_LAP`] seconds and double on each
//! retransmission up to a configurable cap.  Any reply whose xid, chaddr, op
//! code or magic cookie does not match is discarded by the codec without
//! touching state.
//!
//! [`handle_reply`]: DhcpClient::handle_reply
//! [`on_tick`]: DhcpClient::on_tick

use leafnet_lib::{netlog_debug, netlog_info};

use super::dhcp::{self, DHCP_MAX_LEN, MSG_ACK, MSG_NAK, MSG_OFFER};
use super::types::{Ipv4Addr, MacAddr};

/// Seconds to wait for a server response before the first retransmission.
/// Also the fixed ACK wait in the REBOOTING state.
pub const DHCP_TIMER_LAP: u32 = 7;

// =============================================================================
// Public types
// =============================================================================

/// Client state per RFC 2131 figure 5.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DhcpState {
    Init,
    Selecting,
    Requesting,
    Bound,
    Renewing,
    Rebinding,
    InitReboot,
    Rebooting,
}

/// Retransmission policy.  The RFC leaves the exact schedule to the
/// implementation, so the knobs live here rather than in the state machine.
#[derive(Clone, Copy, Debug)]
pub struct DhcpTiming {
    /// First response timeout in seconds.
    pub base_wait: u32,
    /// Ceiling for the doubled timeout.
    pub max_wait: u32,
    /// REQUEST retransmissions before giving up and rediscovering.
    pub max_requests: u8,
}

impl Default for DhcpTiming {
    fn default() -> Self {
        Self {
            base_wait: DHCP_TIMER_LAP,
            max_wait: 64,
            max_requests: 4,
        }
    }
}

/// A bound lease and its timers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lease {
    pub addr: Ipv4Addr,
    pub server_id: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub router: Ipv4Addr,
    pub dns: Ipv4Addr,
    /// Total lease duration in seconds (option 51).
    pub lease_secs: u32,
    /// Renewal threshold in seconds (option 58; lease/2 if absent).
    pub renewal_t1: u32,
    /// Rebinding threshold in seconds (option 59; 0.875 × lease if absent).
    pub rebinding_t2: u32,
}

/// Lease metadata restored from persistent storage for INIT_REBOOT.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RememberedLease {
    pub addr: Ipv4Addr,
    pub server_id: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub router: Ipv4Addr,
}

/// What the caller must do after feeding the machine an event.
///
/// Send actions carry everything needed to build the message; `secs` is the
/// wire value for the seconds-elapsed field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DhcpAction {
    None,
    /// Broadcast a DISCOVER.
    SendDiscover { xid: u32, secs: u16 },
    /// Broadcast a REQUEST for an offered address (options 50 + 54).
    SendRequest {
        xid: u32,
        secs: u16,
        requested: Ipv4Addr,
        server: Ipv4Addr,
    },
    /// Unicast a REQUEST to the bound server (ciaddr set).
    SendRenewRequest {
        xid: u32,
        secs: u16,
        ciaddr: Ipv4Addr,
        server: Ipv4Addr,
    },
    /// Broadcast a REQUEST while rebinding (ciaddr set).
    SendRebindRequest { xid: u32, secs: u16, ciaddr: Ipv4Addr },
    /// Broadcast a REQUEST for a remembered address (option 50, no 54).
    SendRebootRequest {
        xid: u32,
        secs: u16,
        requested: Ipv4Addr,
    },
    /// A lease was (re)acquired; apply and persist it.
    LeaseAcquired(Lease),
    /// The bound address is no longer valid; stop using it.
    LeaseLost,
}

// =============================================================================
// xid generation
// =============================================================================

/// xorshift32 — enough entropy for transaction ids on a device without a
/// hardware RNG.  The caller seeds it (e.g. MAC bytes mixed with a timer
/// capture at boot).
struct Xorshift32(u32);

impl Xorshift32 {
    fn new(seed: u32) -> Self {
        // xorshift has a fixed point at zero.
        Self(if seed == 0 { 0x6c65_6166 } else { seed })
    }

    fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }
}

// =============================================================================
// DhcpClient
// =============================================================================

/// The DHCP client.  One instance per interface, owned by the event loop.
pub struct DhcpClient {
    mac: MacAddr,
    state: DhcpState,
    timing: DhcpTiming,
    rng: Xorshift32,
    /// Transaction id of the in-flight exchange.
    xid: u32,
    /// Seconds since the current acquisition began (wire `secs` field).
    acquire_secs: u32,
    /// Seconds spent waiting for the current response.
    waited: u32,
    /// Current response timeout; doubles on retransmission.
    wait: u32,
    /// REQUEST retransmissions so far in REQUESTING.
    request_retries: u8,
    /// Offered (address, server) while REQUESTING.
    offer: Option<(Ipv4Addr, Ipv4Addr)>,
    lease: Option<Lease>,
    /// Seconds since the lease was (re)bound; compared against T1/T2/expiry.
    lease_elapsed: u32,
    remembered: Option<RememberedLease>,
}

impl DhcpClient {
    /// Create a client for `mac`.  With a remembered lease the machine boots
    /// into INIT_REBOOT and tries to reclaim the old address before falling
    /// back to discovery.
    pub fn new(
        mac: MacAddr,
        seed: u32,
        timing: DhcpTiming,
        remembered: Option<RememberedLease>,
    ) -> Self {
        let state = if remembered.is_some() {
            DhcpState::InitReboot
        } else {
            DhcpState::Init
        };
        Self {
            mac,
            state,
            timing,
            rng: Xorshift32::new(seed),
            xid: 0,
            acquire_secs: 0,
            waited: 0,
            wait: timing.base_wait,
            request_retries: 0,
            offer: None,
            lease: None,
            lease_elapsed: 0,
            remembered,
        }
    }

    pub fn state(&self) -> DhcpState {
        self.state
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    /// Transaction id of the exchange in flight (zero before the first one).
    pub fn xid(&self) -> u32 {
        self.xid
    }

    /// Abandon whatever is in flight and return to INIT (link-down,
    /// restart).  No message is sent to the server; the xid is simply
    /// forgotten.  The caller deconfigures the interface itself.
    pub fn reset(&mut self) {
        self.state = DhcpState::Init;
        self.xid = 0;
        self.offer = None;
        self.lease = None;
        self.acquire_secs = 0;
        self.waited = 0;
        self.wait = self.timing.base_wait;
        self.request_retries = 0;
    }

    // =========================================================================
    // Timer events
    // =========================================================================

    /// Advance all per-state timers by one second.
    pub fn on_tick(&mut self) -> DhcpAction {
        match self.state {
            DhcpState::Init => self.start_discovery(),
            DhcpState::Selecting => {
                self.acquire_secs += 1;
                self.waited += 1;
                if self.waited >= self.wait {
                    self.backoff();
                    netlog_debug!("dhcp: no offer, resending discover (wait {}s)", self.wait);
                    DhcpAction::SendDiscover {
                        xid: self.xid,
                        secs: self.secs(),
                    }
                } else {
                    DhcpAction::None
                }
            }
            DhcpState::Requesting => {
                self.acquire_secs += 1;
                self.waited += 1;
                if self.waited < self.wait {
                    return DhcpAction::None;
                }
                self.request_retries += 1;
                if self.request_retries >= self.timing.max_requests {
                    netlog_debug!("dhcp: request retries exhausted, restarting discovery");
                    self.offer = None;
                    return self.start_discovery();
                }
                self.backoff();
                match self.offer {
                    Some((requested, server)) => DhcpAction::SendRequest {
                        xid: self.xid,
                        secs: self.secs(),
                        requested,
                        server,
                    },
                    None => self.start_discovery(),
                }
            }
            DhcpState::Bound => {
                self.lease_elapsed += 1;
                let Some(lease) = self.lease else {
                    return self.start_discovery();
                };
                if self.lease_elapsed >= lease.renewal_t1 {
                    self.begin_exchange();
                    self.state = DhcpState::Renewing;
                    netlog_info!("dhcp: T1 reached, renewing {}", lease.addr);
                    DhcpAction::SendRenewRequest {
                        xid: self.xid,
                        secs: self.secs(),
                        ciaddr: lease.addr,
                        server: lease.server_id,
                    }
                } else {
                    DhcpAction::None
                }
            }
            DhcpState::Renewing => {
                self.lease_elapsed += 1;
                self.acquire_secs += 1;
                self.waited += 1;
                let Some(lease) = self.lease else {
                    return self.start_discovery();
                };
                if self.lease_elapsed >= lease.rebinding_t2 {
                    self.state = DhcpState::Rebinding;
                    self.waited = 0;
                    self.wait = self.timing.base_wait;
                    netlog_info!("dhcp: T2 reached, rebinding {}", lease.addr);
                    DhcpAction::SendRebindRequest {
                        xid: self.xid,
                        secs: self.secs(),
                        ciaddr: lease.addr,
                    }
                } else if self.waited >= self.wait {
                    self.backoff();
                    DhcpAction::SendRenewRequest {
                        xid: self.xid,
                        secs: self.secs(),
                        ciaddr: lease.addr,
                        server: lease.server_id,
                    }
                } else {
                    DhcpAction::None
                }
            }
            DhcpState::Rebinding => {
                self.lease_elapsed += 1;
                self.acquire_secs += 1;
                self.waited += 1;
                let Some(lease) = self.lease else {
                    return self.start_discovery();
                };
                if self.lease_elapsed >= lease.lease_secs {
                    netlog_info!("dhcp: lease on {} expired", lease.addr);
                    self.lease = None;
                    self.state = DhcpState::Init;
                    self.wait = self.timing.base_wait;
                    DhcpAction::LeaseLost
                } else if self.waited >= self.wait {
                    self.backoff();
                    DhcpAction::SendRebindRequest {
                        xid: self.xid,
                        secs: self.secs(),
                        ciaddr: lease.addr,
                    }
                } else {
                    DhcpAction::None
                }
            }
            DhcpState::InitReboot => match self.remembered {
                Some(rem) => {
                    self.begin_exchange();
                    self.state = DhcpState::Rebooting;
                    self.wait = DHCP_TIMER_LAP;
                    netlog_info!("dhcp: rebooting with remembered address {}", rem.addr);
                    DhcpAction::SendRebootRequest {
                        xid: self.xid,
                        secs: self.secs(),
                        requested: rem.addr,
                    }
                }
                None => {
                    self.state = DhcpState::Init;
                    DhcpAction::None
                }
            },
            DhcpState::Rebooting => {
                self.acquire_secs += 1;
                self.waited += 1;
                if self.waited >= DHCP_TIMER_LAP {
                    netlog_debug!("dhcp: reboot request unanswered, restarting discovery");
                    self.remembered = None;
                    self.start_discovery()
                } else {
                    DhcpAction::None
                }
            }
        }
    }

    // =========================================================================
    // Server replies
    // =========================================================================

    /// Feed a received DHCP payload (UDP port 68) to the machine.
    ///
    /// Replies that fail validation — wrong op, xid, chaddr or cookie — are
    /// dropped without touching state.
    pub fn handle_reply(&mut self, payload: &[u8]) -> DhcpAction {
        let Some(reply) = dhcp::parse_reply(payload, self.xid, self.mac) else {
            netlog_debug!("dhcp: reply ignored (validation failed)");
            return DhcpAction::None;
        };

        match (self.state, reply.msg_type) {
            (DhcpState::Selecting, MSG_OFFER) => {
                if reply.server_id.is_unspecified() || reply.yiaddr.is_unspecified() {
                    netlog_debug!("dhcp: offer without server id or address, ignoring");
                    return DhcpAction::None;
                }
                self.offer = Some((reply.yiaddr, reply.server_id));
                self.state = DhcpState::Requesting;
                self.waited = 0;
                self.request_retries = 0;
                netlog_info!(
                    "dhcp: offer {} from server {}",
                    reply.yiaddr,
                    reply.server_id
                );
                DhcpAction::SendRequest {
                    xid: self.xid,
                    secs: self.secs(),
                    requested: reply.yiaddr,
                    server: reply.server_id,
                }
            }
            (DhcpState::Requesting, MSG_ACK) => self.bind(&reply),
            (DhcpState::Requesting, MSG_NAK) => {
                netlog_info!("dhcp: request refused, restarting discovery");
                self.offer = None;
                self.start_discovery()
            }
            (DhcpState::Renewing | DhcpState::Rebinding, MSG_ACK) => {
                // Only an ACK that renews the bound address counts.
                match self.lease {
                    Some(lease) if lease.addr == reply.yiaddr => self.bind(&reply),
                    _ => {
                        netlog_debug!("dhcp: renewal ack for foreign address, ignoring");
                        DhcpAction::None
                    }
                }
            }
            (DhcpState::Renewing | DhcpState::Rebinding, MSG_NAK) => {
                netlog_info!("dhcp: renewal refused, address abandoned");
                self.lease = None;
                self.state = DhcpState::Init;
                self.wait = self.timing.base_wait;
                DhcpAction::LeaseLost
            }
            (DhcpState::Rebooting, MSG_ACK) => self.bind(&reply),
            (DhcpState::Rebooting, MSG_NAK) => {
                netlog_info!("dhcp: remembered address refused, restarting discovery");
                self.remembered = None;
                self.start_discovery()
            }
            _ => {
                netlog_debug!(
                    "dhcp: message type {} unexpected in {:?}, ignoring",
                    reply.msg_type,
                    self.state
                );
                DhcpAction::None
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Seconds-elapsed value for outgoing messages.
    fn secs(&self) -> u16 {
        self.acquire_secs.min(u16::MAX as u32) as u16
    }

    /// Start a fresh exchange: new xid, timers rewound.  The backoff `wait`
    /// is deliberately kept, so repeated failures keep slowing down.
    fn begin_exchange(&mut self) {
        self.xid = self.rng.next();
        self.acquire_secs = 0;
        self.waited = 0;
        self.request_retries = 0;
    }

    /// Enter SELECTING and emit the DISCOVER that begins an acquisition.
    fn start_discovery(&mut self) -> DhcpAction {
        self.begin_exchange();
        self.state = DhcpState::Selecting;
        DhcpAction::SendDiscover {
            xid: self.xid,
            secs: 0,
        }
    }

    /// Double the response timeout up to the configured cap.
    fn backoff(&mut self) {
        self.waited = 0;
        self.wait = (self.wait * 2).min(self.timing.max_wait);
    }

    /// Common ACK handling: record the lease and move to BOUND.
    fn bind(&mut self, reply: &dhcp::DhcpReply) -> DhcpAction {
        let Some(lease_secs) = reply.lease_time else {
            netlog_debug!("dhcp: ack without lease time, ignoring");
            return DhcpAction::None;
        };
        if reply.yiaddr.is_unspecified() {
            netlog_debug!("dhcp: ack without address, ignoring");
            return DhcpAction::None;
        }

        // Fall back to the previous exchange's server when option 54 is
        // absent from the ACK.
        let server_id = if !reply.server_id.is_unspecified() {
            reply.server_id
        } else if let Some((_, server)) = self.offer {
            server
        } else if let Some(lease) = self.lease {
            lease.server_id
        } else if let Some(rem) = self.remembered {
            rem.server_id
        } else {
            netlog_debug!("dhcp: ack without server id, ignoring");
            return DhcpAction::None;
        };

        let renewal_t1 = reply.renewal_time.unwrap_or(lease_secs / 2);
        let rebinding_t2 = reply.rebinding_time.unwrap_or(lease_secs - lease_secs / 8);

        let lease = Lease {
            addr: reply.yiaddr,
            server_id,
            subnet_mask: reply.subnet_mask,
            router: reply.router,
            dns: reply.dns,
            lease_secs,
            renewal_t1,
            rebinding_t2,
        };

        self.lease = Some(lease);
        self.lease_elapsed = 0;
        self.state = DhcpState::Bound;
        self.offer = None;
        self.remembered = None;
        self.wait = self.timing.base_wait;
        self.waited = 0;
        netlog_info!(
            "dhcp: bound to {} (lease {}s, T1 {}s, T2 {}s)",
            lease.addr,
            lease.lease_secs,
            lease.renewal_t1,
            lease.rebinding_t2
        );
        DhcpAction::LeaseAcquired(lease)
    }
}

// =============================================================================
// Message building glue
// =============================================================================

/// Build the wire message for a send action.  Returns the message length,
/// or `None` for actions that carry no message.
pub fn build_action(mac: MacAddr, action: &DhcpAction, out: &mut [u8; DHCP_MAX_LEN]) -> Option<usize> {
    match *action {
        DhcpAction::SendDiscover { xid, secs } => Some(dhcp::build_discover(mac, xid, secs, out)),
        DhcpAction::SendRequest {
            xid,
            secs,
            requested,
            server,
        } => Some(dhcp::build_request(mac, xid, secs, requested, server, out)),
        DhcpAction::SendRenewRequest {
            xid, secs, ciaddr, ..
        } => Some(dhcp::build_renew_request(mac, xid, secs, ciaddr, out)),
        DhcpAction::SendRebindRequest { xid, secs, ciaddr } => {
            Some(dhcp::build_renew_request(mac, xid, secs, ciaddr, out))
        }
        DhcpAction::SendRebootRequest {
            xid,
            secs,
            requested,
        } => Some(dhcp::build_reboot_request(mac, xid, secs, requested, out)),
        DhcpAction::None | DhcpAction::LeaseAcquired(_) | DhcpAction::LeaseLost => None,
    }
}
