use crate::enc28j60::{ControlBus, Enc28j60, Register, regs};
use crate::net::types::{MacAddr, NetError};

const MAC: MacAddr = MacAddr([0x02, 0x12, 0x34, 0x56, 0x78, 0x9a]);

const RX_START: u16 = 0x05FA;
const RX_END: u16 = 0x1FFF;

/// Behavioural model of the controller: four register banks, 8 KiB of
/// buffer memory, auto-incrementing read/write pointers with the RX-ring
/// wrap, and the PKTDEC / TXRTS side effects the driver relies on.
struct MockBus {
    regs: [[u8; 32]; 4],
    mem: [u8; 0x2000],
    bank: u8,
    /// Frames "transmitted" — contents of the TX slot at TXRTS time.
    transmitted: Vec<Vec<u8>>,
    reset_count: u32,
}

impl MockBus {
    fn new() -> Self {
        let mut bus = Self {
            regs: [[0u8; 32]; 4],
            mem: [0u8; 0x2000],
            bank: 0,
            transmitted: Vec::new(),
            reset_count: 0,
        };
        // Clock is ready from the start; MII is never busy.
        bus.regs[0][regs::ESTAT.addr() as usize] = 0x01;
        bus
    }

    fn reg(&self, reg: Register) -> u8 {
        let bank = if reg.is_common() { 0 } else { reg.bank() as usize };
        self.regs[bank][reg.addr() as usize]
    }

    fn set_reg(&mut self, reg: Register, value: u8) {
        let bank = if reg.is_common() { 0 } else { reg.bank() as usize };
        self.regs[bank][reg.addr() as usize] = value;
    }

    fn reg16(&self, low: Register, high: Register) -> u16 {
        u16::from_le_bytes([self.reg(low), self.reg(high)])
    }

    fn set_reg16(&mut self, low: Register, high: Register, value: u16) {
        self.set_reg(low, (value & 0xff) as u8);
        self.set_reg(high, (value >> 8) as u8);
    }

    /// Lay a frame into the RX ring at `at`, preceded by its status vector.
    /// Returns the next-packet pointer it encodes.
    fn inject_frame(&mut self, at: u16, frame: &[u8], status2: u8) -> u16 {
        let byte_count = (frame.len() + 4) as u16; // hardware appends CRC
        let next = at + 6 + byte_count; // no wrap needed in tests
        let mut cursor = at as usize;
        let header = [
            (next & 0xff) as u8,
            (next >> 8) as u8,
            (byte_count & 0xff) as u8,
            (byte_count >> 8) as u8,
            status2,
            0,
        ];
        for byte in header.into_iter().chain(frame.iter().copied()) {
            self.mem[cursor] = byte;
            cursor += 1;
        }
        let pending = self.reg(regs::EPKTCNT) + 1;
        self.set_reg(regs::EPKTCNT, pending);
        next
    }
}

impl ControlBus for MockBus {
    fn select_bank(&mut self, bank: u8) -> Result<(), NetError> {
        self.bank = bank & 0x03;
        Ok(())
    }

    fn read_control_register(&mut self, reg: Register) -> Result<u8, NetError> {
        if !reg.is_common() {
            assert_eq!(self.bank, reg.bank(), "driver touched an unselected bank");
        }
        Ok(self.reg(reg))
    }

    fn write_control_register(&mut self, reg: Register, value: u8) -> Result<(), NetError> {
        if !reg.is_common() {
            assert_eq!(self.bank, reg.bank(), "driver touched an unselected bank");
        }
        self.set_reg(reg, value);
        Ok(())
    }

    fn bit_field_set(&mut self, reg: Register, mask: u8) -> Result<(), NetError> {
        let value = self.reg(reg) | mask;
        self.set_reg(reg, value);

        // PKTDEC side effect: decrement the pending-packet counter.
        if reg == regs::ECON2 && mask & 0x40 != 0 {
            let count = self.reg(regs::EPKTCNT).saturating_sub(1);
            self.set_reg(regs::EPKTCNT, count);
            let value = self.reg(regs::ECON2) & !0x40;
            self.set_reg(regs::ECON2, value);
        }
        // TXRTS side effect: "transmit" the slot, flag TXIF, clear TXRTS.
        if reg == regs::ECON1 && mask & 0x08 != 0 {
            let start = self.reg16(regs::ETXSTL, regs::ETXSTH) as usize;
            let end = self.reg16(regs::ETXNDL, regs::ETXNDH) as usize;
            self.transmitted.push(self.mem[start..=end].to_vec());
            let econ1 = self.reg(regs::ECON1) & !0x08;
            self.set_reg(regs::ECON1, econ1);
            let eir = self.reg(regs::EIR) | 0x08;
            self.set_reg(regs::EIR, eir);
        }
        Ok(())
    }

    fn bit_field_clear(&mut self, reg: Register, mask: u8) -> Result<(), NetError> {
        let value = self.reg(reg) & !mask;
        self.set_reg(reg, value);
        Ok(())
    }

    fn read_buffer_memory(&mut self, dst: &mut [u8]) -> Result<(), NetError> {
        let mut ptr = self.reg16(regs::ERDPTL, regs::ERDPTH);
        let rx_end = self.reg16(regs::ERXNDL, regs::ERXNDH);
        let rx_start = self.reg16(regs::ERXSTL, regs::ERXSTH);
        for byte in dst.iter_mut() {
            *byte = self.mem[ptr as usize];
            // Auto-increment wraps at the RX ring boundary.
            ptr = if ptr == rx_end { rx_start } else { ptr + 1 };
        }
        self.set_reg16(regs::ERDPTL, regs::ERDPTH, ptr);
        Ok(())
    }

    fn write_buffer_memory(&mut self, src: &[u8]) -> Result<(), NetError> {
        let mut ptr = self.reg16(regs::EWRPTL, regs::EWRPTH);
        for &byte in src {
            self.mem[ptr as usize] = byte;
            ptr = ptr.wrapping_add(1);
        }
        self.set_reg16(regs::EWRPTL, regs::EWRPTH, ptr);
        Ok(())
    }

    fn soft_reset(&mut self) -> Result<(), NetError> {
        self.reset_count += 1;
        self.regs = [[0u8; 32]; 4];
        self.bank = 0;
        self.regs[0][regs::ESTAT.addr() as usize] = 0x01; // CLKRDY
        Ok(())
    }
}

fn initialized() -> Enc28j60<MockBus> {
    let mut dev = Enc28j60::new(MockBus::new(), MAC);
    dev.init().expect("init must succeed");
    dev
}

#[test]
fn test_init_programs_ring_filters_and_mac() {
    let mut dev = Enc28j60::new(MockBus::new(), MAC);
    dev.init().unwrap();
    let bus = dev.bus();

    assert_eq!(bus.reset_count, 1);
    assert_eq!(bus.reg16(regs::ERXSTL, regs::ERXSTH), RX_START);
    assert_eq!(bus.reg16(regs::ERXNDL, regs::ERXNDH), RX_END);
    assert_eq!(bus.reg16(regs::ERXRDPTL, regs::ERXRDPTH), RX_END);
    assert_eq!(bus.reg(regs::ERXFCON), 0xA1, "unicast + CRC + broadcast");
    assert_eq!(bus.reg16(regs::MAMXFLL, regs::MAMXFLH), 1518);
    assert_eq!(bus.reg(regs::MAADR1), MAC.0[0]);
    assert_eq!(bus.reg(regs::MAADR6), MAC.0[5]);
    assert_ne!(bus.reg(regs::ECON1) & 0x04, 0, "RXEN set");
    assert_ne!(bus.reg(regs::EIE) & 0x40, 0, "PKTIE set");
}

#[test]
fn test_recv_delivers_frame_and_releases_slot() {
    let mut dev = initialized();
    let frame: Vec<u8> = (0u8..60).collect();
    let next = {
        let bus = dev.bus();
        bus.inject_frame(RX_START, &frame, 0x80)
    };

    assert_eq!(dev.pending_packets().unwrap(), 1);

    let mut buf = [0u8; 1518];
    let len = dev.recv(&mut buf).unwrap();
    assert_eq!(len, frame.len());
    assert_eq!(&buf[..len], &frame[..]);

    let bus = dev.bus();
    assert_eq!(bus.reg(regs::EPKTCNT), 0, "PKTDEC fired");
    assert_eq!(
        bus.reg16(regs::ERXRDPTL, regs::ERXRDPTH),
        next - 1,
        "read pointer trails the next packet"
    );
}

#[test]
fn test_recv_drops_frame_with_bad_status() {
    let mut dev = initialized();
    {
        let bus = dev.bus();
        // RECEIVED_OK clear (CRC error bit set instead).
        bus.inject_frame(RX_START, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10], 0x10);
    }

    let mut buf = [0u8; 1518];
    assert_eq!(dev.recv(&mut buf).unwrap(), 0, "bad frame not delivered");
    let bus = dev.bus();
    assert_eq!(bus.reg(regs::EPKTCNT), 0, "slot still released");
}

#[test]
fn test_recv_consumes_frames_in_order() {
    let mut dev = initialized();
    let second_at = {
        let bus = dev.bus();
        bus.inject_frame(RX_START, &[0xAA; 20], 0x80)
    };
    {
        let bus = dev.bus();
        bus.inject_frame(second_at, &[0xBB; 30], 0x80);
    }

    let mut buf = [0u8; 1518];
    assert_eq!(dev.recv(&mut buf).unwrap(), 20);
    assert_eq!(buf[0], 0xAA);
    assert_eq!(dev.recv(&mut buf).unwrap(), 30);
    assert_eq!(buf[0], 0xBB);
    assert_eq!(dev.pending_packets().unwrap(), 0);
}

#[test]
fn test_send_writes_control_byte_and_frame() {
    let mut dev = initialized();
    let frame = [0x11u8, 0x22, 0x33, 0x44, 0x55];
    dev.send(&frame).unwrap();

    let bus = dev.bus();
    assert_eq!(bus.transmitted.len(), 1);
    let slot = &bus.transmitted[0];
    assert_eq!(slot[0], 0x00, "per-packet control byte");
    assert_eq!(&slot[1..], &frame[..]);
}

#[test]
fn test_send_rejects_oversized_frames() {
    let mut dev = initialized();
    let frame = [0u8; 1600];
    assert_eq!(dev.send(&frame), Err(NetError::InvalidArgument));
    assert_eq!(dev.send(&[]), Err(NetError::InvalidArgument));
}
