//! ENC28J60 Ethernet MAC/PHY driver.
//!
//! The controller exposes four banks of 5-bit-addressed control registers,
//! an 8 KiB packet buffer shared between one TX slot and a circular RX FIFO,
//! and a PHY reachable only through the MII indirect registers.  This module
//! owns all of that sequencing; the byte-level SPI mechanics live behind the
//! [`ControlBus`] contract (see [`spi`](crate::spi) for the stock
//! implementation).
//!
//! # RX FIFO
//!
//! The hardware writes each received frame into the ring preceded by a
//! 6-byte receive status vector (next-packet pointer, byte count, status
//! bits).  [`recv`](Enc28j60::recv) consumes exactly one frame: it reads the
//! vector, copies the frame out if the status is clean, then releases the
//! FIFO slot by advancing `ERXRDPT` and decrementing the pending counter.
//! Frames that arrive while the FIFO is full are dropped by the hardware
//! itself; software only ever sees the pending count stop growing.

use bitflags::bitflags;

use leafnet_lib::{netlog_debug, netlog_info};

use crate::net::MAX_FRAME_LEN;
use crate::net::netstack::FrameDevice;
use crate::net::types::{MacAddr, NetError};

// =============================================================================
// Register map
// =============================================================================

/// A control register address: bank, 5-bit address, and whether it belongs
/// to the MAC/MII group (whose SPI reads insert a dummy byte).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Register {
    bank: u8,
    addr: u8,
    mac_mii: bool,
}

impl Register {
    const fn eth(bank: u8, addr: u8) -> Self {
        Self {
            bank,
            addr,
            mac_mii: false,
        }
    }

    const fn mac(bank: u8, addr: u8) -> Self {
        Self {
            bank,
            addr,
            mac_mii: true,
        }
    }

    #[inline]
    pub const fn bank(self) -> u8 {
        self.bank
    }

    #[inline]
    pub const fn addr(self) -> u8 {
        self.addr
    }

    #[inline]
    pub const fn is_mac_mii(self) -> bool {
        self.mac_mii
    }

    /// Registers 0x1B–0x1F exist in every bank; no bank switch needed.
    #[inline]
    pub const fn is_common(self) -> bool {
        self.addr >= 0x1B
    }
}

/// Control register definitions (the subset this driver touches).
pub mod regs {
    use super::Register;

    // Common (all banks)
    pub const EIE: Register = Register::eth(0, 0x1B);
    pub const EIR: Register = Register::eth(0, 0x1C);
    pub const ESTAT: Register = Register::eth(0, 0x1D);
    pub const ECON2: Register = Register::eth(0, 0x1E);
    pub const ECON1: Register = Register::eth(0, 0x1F);

    // Bank 0 — buffer pointers
    pub const ERDPTL: Register = Register::eth(0, 0x00);
    pub const ERDPTH: Register = Register::eth(0, 0x01);
    pub const EWRPTL: Register = Register::eth(0, 0x02);
    pub const EWRPTH: Register = Register::eth(0, 0x03);
    pub const ETXSTL: Register = Register::eth(0, 0x04);
    pub const ETXSTH: Register = Register::eth(0, 0x05);
    pub const ETXNDL: Register = Register::eth(0, 0x06);
    pub const ETXNDH: Register = Register::eth(0, 0x07);
    pub const ERXSTL: Register = Register::eth(0, 0x08);
    pub const ERXSTH: Register = Register::eth(0, 0x09);
    pub const ERXNDL: Register = Register::eth(0, 0x0A);
    pub const ERXNDH: Register = Register::eth(0, 0x0B);
    pub const ERXRDPTL: Register = Register::eth(0, 0x0C);
    pub const ERXRDPTH: Register = Register::eth(0, 0x0D);

    // Bank 1 — receive filters, pending count
    pub const ERXFCON: Register = Register::eth(1, 0x18);
    pub const EPKTCNT: Register = Register::eth(1, 0x19);

    // Bank 2 — MAC and MII
    pub const MACON1: Register = Register::mac(2, 0x00);
    pub const MACON3: Register = Register::mac(2, 0x02);
    pub const MACON4: Register = Register::mac(2, 0x03);
    pub const MABBIPG: Register = Register::mac(2, 0x04);
    pub const MAIPGL: Register = Register::mac(2, 0x06);
    pub const MAIPGH: Register = Register::mac(2, 0x07);
    pub const MAMXFLL: Register = Register::mac(2, 0x0A);
    pub const MAMXFLH: Register = Register::mac(2, 0x0B);
    pub const MICMD: Register = Register::mac(2, 0x12);
    pub const MIREGADR: Register = Register::mac(2, 0x14);
    pub const MIWRL: Register = Register::mac(2, 0x16);
    pub const MIWRH: Register = Register::mac(2, 0x17);
    pub const MIRDL: Register = Register::mac(2, 0x18);
    pub const MIRDH: Register = Register::mac(2, 0x19);

    // Bank 3 — MAC address, MII status
    pub const MAADR5: Register = Register::mac(3, 0x00);
    pub const MAADR6: Register = Register::mac(3, 0x01);
    pub const MAADR3: Register = Register::mac(3, 0x02);
    pub const MAADR4: Register = Register::mac(3, 0x03);
    pub const MAADR1: Register = Register::mac(3, 0x04);
    pub const MAADR2: Register = Register::mac(3, 0x05);
    pub const MISTAT: Register = Register::mac(3, 0x0A);
}

/// PHY register addresses (MII-indirect).
pub const PHY_PHCON1: u8 = 0x00;
pub const PHY_PHCON2: u8 = 0x10;
pub const PHY_PHSTAT2: u8 = 0x11;

/// PHCON2.HDLDIS — disable half-duplex loopback.
const PHCON2_HDLDIS: u16 = 0x0100;
/// PHSTAT2.LSTAT — link is up.
const PHSTAT2_LSTAT: u16 = 0x0400;
/// MICMD.MIIRD — start an MII read.
const MICMD_MIIRD: u8 = 0x01;
/// MISTAT.BUSY — MII transaction in progress.
const MISTAT_BUSY: u8 = 0x01;

bitflags! {
    /// EIE — interrupt enable.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Eie: u8 {
        const INTIE  = 0x80;
        const PKTIE  = 0x40;
        const DMAIE  = 0x20;
        const LINKIE = 0x10;
        const TXIE   = 0x08;
        const TXERIE = 0x02;
        const RXERIE = 0x01;
    }

    /// EIR — interrupt request flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Eir: u8 {
        const PKTIF  = 0x40;
        const DMAIF  = 0x20;
        const LINKIF = 0x10;
        const TXIF   = 0x08;
        const TXERIF = 0x02;
        const RXERIF = 0x01;
    }

    /// ESTAT — status.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Estat: u8 {
        const INT     = 0x80;
        const BUFER   = 0x40;
        const LATECOL = 0x10;
        const RXBUSY  = 0x04;
        const TXABRT  = 0x02;
        const CLKRDY  = 0x01;
    }

    /// ECON1 — bank select, RX/TX control.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Econ1: u8 {
        const TXRST  = 0x80;
        const RXRST  = 0x40;
        const DMAST  = 0x20;
        const CSUMEN = 0x10;
        const TXRTS  = 0x08;
        const RXEN   = 0x04;
        const BSEL1  = 0x02;
        const BSEL0  = 0x01;
    }

    /// ECON2 — buffer control.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Econ2: u8 {
        const AUTOINC = 0x80;
        const PKTDEC  = 0x40;
        const PWRSV   = 0x20;
        const VRPS    = 0x08;
    }

    /// ERXFCON — receive filters.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ErxFcon: u8 {
        const UCEN  = 0x80;
        const ANDOR = 0x40;
        const CRCEN = 0x20;
        const PMEN  = 0x10;
        const MPEN  = 0x08;
        const HTEN  = 0x04;
        const MCEN  = 0x02;
        const BCEN  = 0x01;
    }

    /// MACON1 — MAC receive enable, flow control.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Macon1: u8 {
        const TXPAUS  = 0x08;
        const RXPAUS  = 0x04;
        const PASSALL = 0x02;
        const MARXEN  = 0x01;
    }

    /// MACON3 — padding, CRC, duplex.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Macon3: u8 {
        const PADCFG2 = 0x80;
        const PADCFG1 = 0x40;
        const PADCFG0 = 0x20;
        const TXCRCEN = 0x10;
        const PHDREN  = 0x08;
        const HFRMEN  = 0x04;
        const FRMLNEN = 0x02;
        const FULDPX  = 0x01;
    }

    /// Byte 4 of the receive status vector.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RxStatus: u8 {
        const RECEIVED_OK         = 0x80;
        const LENGTH_OUT_OF_RANGE = 0x40;
        const LENGTH_CHECK_ERROR  = 0x20;
        const CRC_ERROR           = 0x10;
        const CARRIER_EVENT_SEEN  = 0x04;
        const LONG_DROP_EVENT     = 0x01;
    }
}

// =============================================================================
// ControlBus — the collaborator contract
// =============================================================================

/// Low-level register access primitives, implemented over SPI (or a mock in
/// tests).  The driver sequences these; the bus only moves bytes.
///
/// `bit_field_set` / `bit_field_clear` are only defined for ETH registers —
/// the silicon does not implement them for MAC/MII registers.
pub trait ControlBus {
    /// Point subsequent banked register accesses at `bank` (0–3).
    fn select_bank(&mut self, bank: u8) -> Result<(), NetError>;

    fn read_control_register(&mut self, reg: Register) -> Result<u8, NetError>;
    fn write_control_register(&mut self, reg: Register, value: u8) -> Result<(), NetError>;

    fn bit_field_set(&mut self, reg: Register, mask: u8) -> Result<(), NetError>;
    fn bit_field_clear(&mut self, reg: Register, mask: u8) -> Result<(), NetError>;

    /// Read `dst.len()` bytes from buffer memory at `ERDPT` (auto-increment).
    fn read_buffer_memory(&mut self, dst: &mut [u8]) -> Result<(), NetError>;
    /// Write `src` to buffer memory at `EWRPT` (auto-increment).
    fn write_buffer_memory(&mut self, src: &[u8]) -> Result<(), NetError>;

    /// Issue the system reset command.
    fn soft_reset(&mut self) -> Result<(), NetError>;
}

// =============================================================================
// Buffer layout and timing
// =============================================================================

/// RX FIFO bounds.  The ring occupies the top of the 8 KiB buffer, matching
/// the controller's reset pointer values; the region below it holds the
/// single TX slot.
const RX_START: u16 = 0x05FA;
const RX_END: u16 = 0x1FFF;
const TX_START: u16 = 0x0000;

/// Receive status vector: next-packet pointer, byte count, two status bytes.
const STATUS_VECTOR_LEN: usize = 6;

/// Bounded spin counts for hardware waits.
const RESET_TIMEOUT_SPINS: u32 = 100_000;
const TX_TIMEOUT_SPINS: u32 = 100_000;
const MII_TIMEOUT_SPINS: u32 = 10_000;

// =============================================================================
// Driver
// =============================================================================

/// Driver state: the bus, our MAC, and the read cursor into the RX ring.
pub struct Enc28j60<B: ControlBus> {
    bus: B,
    mac: MacAddr,
    /// Start of the next unread packet in the RX ring.
    next_packet: u16,
}

impl<B: ControlBus> Enc28j60<B> {
    pub fn new(bus: B, mac: MacAddr) -> Self {
        Self {
            bus,
            mac,
            next_packet: RX_START,
        }
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    /// Direct access to the underlying bus (diagnostics, tests).
    pub fn bus(&mut self) -> &mut B {
        &mut self.bus
    }

    // -- banked register helpers ---------------------------------------------

    fn rcr(&mut self, reg: Register) -> Result<u8, NetError> {
        if !reg.is_common() {
            self.bus.select_bank(reg.bank())?;
        }
        self.bus.read_control_register(reg)
    }

    fn wcr(&mut self, reg: Register, value: u8) -> Result<(), NetError> {
        if !reg.is_common() {
            self.bus.select_bank(reg.bank())?;
        }
        self.bus.write_control_register(reg, value)
    }

    fn bfs(&mut self, reg: Register, mask: u8) -> Result<(), NetError> {
        if !reg.is_common() {
            self.bus.select_bank(reg.bank())?;
        }
        self.bus.bit_field_set(reg, mask)
    }

    fn bfc(&mut self, reg: Register, mask: u8) -> Result<(), NetError> {
        if !reg.is_common() {
            self.bus.select_bank(reg.bank())?;
        }
        self.bus.bit_field_clear(reg, mask)
    }

    /// Write a 16-bit pointer register pair, low byte first.
    fn wcr16(&mut self, low: Register, high: Register, value: u16) -> Result<(), NetError> {
        self.wcr(low, (value & 0xFF) as u8)?;
        self.wcr(high, (value >> 8) as u8)
    }

    // -- PHY access through the MII registers --------------------------------

    fn mii_wait(&mut self) -> Result<(), NetError> {
        for _ in 0..MII_TIMEOUT_SPINS {
            if self.rcr(regs::MISTAT)? & MISTAT_BUSY == 0 {
                return Ok(());
            }
        }
        Err(NetError::TimedOut)
    }

    fn phy_write(&mut self, reg: u8, value: u16) -> Result<(), NetError> {
        self.wcr(regs::MIREGADR, reg)?;
        self.wcr(regs::MIWRL, (value & 0xFF) as u8)?;
        self.wcr(regs::MIWRH, (value >> 8) as u8)?;
        self.mii_wait()
    }

    fn phy_read(&mut self, reg: u8) -> Result<u16, NetError> {
        self.wcr(regs::MIREGADR, reg)?;
        self.wcr(regs::MICMD, MICMD_MIIRD)?;
        self.mii_wait()?;
        self.wcr(regs::MICMD, 0)?;
        let low = self.rcr(regs::MIRDL)?;
        let high = self.rcr(regs::MIRDH)?;
        Ok(((high as u16) << 8) | low as u16)
    }

    // -- bring-up ------------------------------------------------------------

    /// Reset and configure the controller, program the MAC address, and
    /// enable reception.
    pub fn init(&mut self) -> Result<(), NetError> {
        self.bus.soft_reset()?;
        let mut ready = false;
        for _ in 0..RESET_TIMEOUT_SPINS {
            let estat = Estat::from_bits_truncate(self.rcr(regs::ESTAT)?);
            if estat.contains(Estat::CLKRDY) {
                ready = true;
                break;
            }
        }
        if !ready {
            return Err(NetError::TimedOut);
        }

        // RX ring.  ERXRDPT trails the ring: the controller treats the FIFO
        // as full when the write pointer catches up to it, and the register
        // must hold an odd address (silicon erratum), which RX_END is.
        self.next_packet = RX_START;
        self.wcr16(regs::ERXSTL, regs::ERXSTH, RX_START)?;
        self.wcr16(regs::ERXNDL, regs::ERXNDH, RX_END)?;
        self.wcr16(regs::ERXRDPTL, regs::ERXRDPTH, RX_END)?;
        self.wcr16(regs::ERDPTL, regs::ERDPTH, RX_START)?;

        // Accept our unicast and broadcast, with hardware CRC validation.
        self.wcr(
            regs::ERXFCON,
            (ErxFcon::UCEN | ErxFcon::CRCEN | ErxFcon::BCEN).bits(),
        )?;

        // MAC: enable reception and flow control, pad to 60 bytes + CRC,
        // enforce frame length, defer to carrier (half duplex).
        self.wcr(
            regs::MACON1,
            (Macon1::MARXEN | Macon1::TXPAUS | Macon1::RXPAUS).bits(),
        )?;
        self.wcr(
            regs::MACON3,
            (Macon3::PADCFG0 | Macon3::TXCRCEN | Macon3::FRMLNEN).bits(),
        )?;
        self.wcr(regs::MACON4, 0x40)?; // DEFER
        self.wcr16(regs::MAMXFLL, regs::MAMXFLH, MAX_FRAME_LEN as u16)?;
        self.wcr(regs::MABBIPG, 0x12)?; // half-duplex back-to-back gap
        self.wcr(regs::MAIPGL, 0x12)?;
        self.wcr(regs::MAIPGH, 0x0C)?;

        // Station address.  MAADR1 holds the first (most significant) octet.
        self.wcr(regs::MAADR1, self.mac.0[0])?;
        self.wcr(regs::MAADR2, self.mac.0[1])?;
        self.wcr(regs::MAADR3, self.mac.0[2])?;
        self.wcr(regs::MAADR4, self.mac.0[3])?;
        self.wcr(regs::MAADR5, self.mac.0[4])?;
        self.wcr(regs::MAADR6, self.mac.0[5])?;

        // PHY: never loop transmitted frames back in half duplex.
        self.phy_write(PHY_PHCON2, PHCON2_HDLDIS)?;

        // Packet-pending interrupt and receive enable.
        self.bfs(regs::EIE, (Eie::INTIE | Eie::PKTIE).bits())?;
        self.bfs(regs::ECON1, Econ1::RXEN.bits())?;

        netlog_info!("enc28j60: up, mac {}", self.mac);
        Ok(())
    }

    // -- RX ------------------------------------------------------------------

    /// Frames waiting in the RX FIFO.
    pub fn pending_packets(&mut self) -> Result<u8, NetError> {
        self.rcr(regs::EPKTCNT)
    }

    /// Consume the oldest pending frame.
    ///
    /// Returns the frame length copied into `buf`, or 0 when the frame was
    /// dropped (receive status not OK, or it does not fit `buf`).  The FIFO
    /// slot is released in every case.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        self.wcr16(regs::ERDPTL, regs::ERDPTH, self.next_packet)?;

        let mut vector = [0u8; STATUS_VECTOR_LEN];
        self.bus.read_buffer_memory(&mut vector)?;

        let next = u16::from_le_bytes([vector[0], vector[1]]);
        let byte_count = u16::from_le_bytes([vector[2], vector[3]]) as usize;
        let status = RxStatus::from_bits_truncate(vector[4]);

        // Byte count includes the 4-byte CRC appended by the MAC.
        let frame_len = byte_count.saturating_sub(4);
        let deliver = status.contains(RxStatus::RECEIVED_OK)
            && frame_len > 0
            && frame_len <= buf.len()
            && frame_len <= MAX_FRAME_LEN;

        let copied = if deliver {
            self.bus.read_buffer_memory(&mut buf[..frame_len])?;
            frame_len
        } else {
            netlog_debug!(
                "enc28j60: dropping frame (status {:#04x}, {} bytes)",
                vector[4],
                frame_len
            );
            0
        };

        // Release the slot: ERXRDPT must stay one behind the next packet and
        // must be odd (erratum); the wrap case lands exactly on RX_END.
        let rdpt = if next == RX_START { RX_END } else { next - 1 };
        self.wcr16(regs::ERXRDPTL, regs::ERXRDPTH, rdpt)?;
        self.bfs(regs::ECON2, Econ2::PKTDEC.bits())?;
        self.next_packet = next;

        Ok(copied)
    }

    // -- TX ------------------------------------------------------------------

    /// Transmit one frame from the single TX slot.
    pub fn send(&mut self, frame: &[u8]) -> Result<(), NetError> {
        if frame.is_empty() || frame.len() > MAX_FRAME_LEN {
            return Err(NetError::InvalidArgument);
        }

        // Wait out a previous transmission.
        let mut idle = false;
        for _ in 0..TX_TIMEOUT_SPINS {
            let econ1 = Econ1::from_bits_truncate(self.rcr(regs::ECON1)?);
            if !econ1.contains(Econ1::TXRTS) {
                idle = true;
                break;
            }
        }
        if !idle {
            return Err(NetError::TimedOut);
        }

        // Per-packet control byte 0 lets MACON3 govern padding and CRC.
        self.wcr16(regs::EWRPTL, regs::EWRPTH, TX_START)?;
        self.bus.write_buffer_memory(&[0x00])?;
        self.bus.write_buffer_memory(frame)?;

        self.wcr16(regs::ETXSTL, regs::ETXSTH, TX_START)?;
        self.wcr16(regs::ETXNDL, regs::ETXNDH, TX_START + frame.len() as u16)?;

        self.bfc(regs::EIR, (Eir::TXIF | Eir::TXERIF).bits())?;
        self.bfs(regs::ECON1, Econ1::TXRTS.bits())?;

        for _ in 0..TX_TIMEOUT_SPINS {
            let eir = Eir::from_bits_truncate(self.rcr(regs::EIR)?);
            if eir.contains(Eir::TXIF) {
                let estat = Estat::from_bits_truncate(self.rcr(regs::ESTAT)?);
                if estat.contains(Estat::TXABRT) {
                    self.bfc(regs::ECON1, Econ1::TXRTS.bits())?;
                    return Err(NetError::Device);
                }
                return Ok(());
            }
        }
        self.bfc(regs::ECON1, Econ1::TXRTS.bits())?;
        Err(NetError::TimedOut)
    }

    /// PHY link state (PHSTAT2.LSTAT).
    pub fn link_up(&mut self) -> Result<bool, NetError> {
        Ok(self.phy_read(PHY_PHSTAT2)? & PHSTAT2_LSTAT != 0)
    }
}

impl<B: ControlBus> FrameDevice for Enc28j60<B> {
    fn pending_frames(&mut self) -> Result<u8, NetError> {
        self.pending_packets()
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        Enc28j60::recv(self, buf)
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), NetError> {
        Enc28j60::send(self, frame)
    }

    fn link_up(&mut self) -> Result<bool, NetError> {
        Enc28j60::link_up(self)
    }
}
