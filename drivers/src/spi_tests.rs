use std::collections::VecDeque;

use crate::enc28j60::{ControlBus, regs};
use crate::net::types::NetError;
use crate::spi::{SpiBus, SpiControlPort};

/// What crossed the bus, including chip-select edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Event {
    Select,
    Deselect,
    Out(u8),
}

/// Records every byte shifted out and feeds back scripted responses.
struct RecordingBus {
    events: Vec<Event>,
    responses: VecDeque<u8>,
}

impl RecordingBus {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            responses: VecDeque::new(),
        }
    }

    fn port(self) -> SpiControlPort<RecordingBus> {
        SpiControlPort::new(self)
    }
}

impl SpiBus for RecordingBus {
    fn select(&mut self) {
        self.events.push(Event::Select);
    }

    fn deselect(&mut self) {
        self.events.push(Event::Deselect);
    }

    fn transfer(&mut self, byte: u8) -> Result<u8, NetError> {
        self.events.push(Event::Out(byte));
        Ok(self.responses.pop_front().unwrap_or(0))
    }
}

fn outs(events: &[Event]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Out(b) => Some(*b),
            _ => None,
        })
        .collect()
}

#[test]
fn test_eth_register_read_has_no_dummy_byte() {
    let mut port = RecordingBus::new().port();
    port.bus().responses.extend([0x00, 0x5a]);

    let value = port.read_control_register(regs::EIR).unwrap();
    assert_eq!(value, 0x5a);
    // Opcode 000 + address, then one clock to read the data.
    assert_eq!(outs(&port.bus().events), vec![0x1c, 0x00]);
}

#[test]
fn test_mac_register_read_inserts_dummy_byte() {
    let mut port = RecordingBus::new().port();

    // MACON1 lives in bank 2; access it the way the driver would.
    port.select_bank(2).unwrap();
    port.bus().responses.extend([0x00, 0xff, 0xa7]);
    let value = port.read_control_register(regs::MACON1).unwrap();
    assert_eq!(value, 0xa7, "value arrives after the dummy byte");

    let bytes = outs(&port.bus().events);
    // Bank switch: BFC ECON1 0x03, BFS ECON1 0x02; then RCR MACON1 + dummy + read.
    assert_eq!(bytes, vec![0xbf, 0x03, 0x9f, 0x02, 0x00, 0x00, 0x00]);
}

#[test]
fn test_write_control_register_opcode() {
    let mut port = RecordingBus::new().port();
    port.write_control_register(regs::ECON2, 0x80).unwrap();
    // WCR (010) | 0x1E, then the data byte.
    assert_eq!(outs(&port.bus().events), vec![0x5e, 0x80]);
}

#[test]
fn test_bit_field_opcodes() {
    let mut port = RecordingBus::new().port();
    port.bit_field_set(regs::ECON1, 0x08).unwrap();
    port.bit_field_clear(regs::ECON1, 0x08).unwrap();
    // BFS (100) | 0x1F then BFC (101) | 0x1F.
    assert_eq!(outs(&port.bus().events), vec![0x9f, 0x08, 0xbf, 0x08]);
}

#[test]
fn test_buffer_memory_opcodes() {
    let mut port = RecordingBus::new().port();
    port.write_buffer_memory(&[0xaa, 0xbb]).unwrap();

    port.bus().responses.extend([0x00, 0x11, 0x22, 0x33]);
    let mut readback = [0u8; 3];
    port.read_buffer_memory(&mut readback).unwrap();

    assert_eq!(
        outs(&port.bus().events),
        vec![0x7a, 0xaa, 0xbb, 0x3a, 0x00, 0x00, 0x00]
    );
    assert_eq!(readback, [0x11, 0x22, 0x33]);
}

#[test]
fn test_bank_switch_is_cached() {
    let mut port = RecordingBus::new().port();
    port.select_bank(1).unwrap();
    port.select_bank(1).unwrap();
    port.select_bank(1).unwrap();
    // One BFC + one BFS, not three of each.
    assert_eq!(outs(&port.bus().events), vec![0xbf, 0x03, 0x9f, 0x01]);
}

#[test]
fn test_bank_zero_needs_no_set() {
    let mut port = RecordingBus::new().port();
    port.select_bank(0).unwrap();
    // Clearing both BSEL bits already selects bank 0.
    assert_eq!(outs(&port.bus().events), vec![0xbf, 0x03]);
}

#[test]
fn test_soft_reset_opcode_and_bank_cache_invalidation() {
    let mut port = RecordingBus::new().port();
    port.select_bank(2).unwrap();
    port.soft_reset().unwrap();
    port.bus().events.clear();

    // After reset the cached bank is stale, so the switch happens again.
    port.select_bank(2).unwrap();
    assert_eq!(outs(&port.bus().events), vec![0xbf, 0x03, 0x9f, 0x02]);
}

#[test]
fn test_chip_select_brackets_every_instruction() {
    let mut port = RecordingBus::new().port();
    port.write_control_register(regs::ECON2, 0x01).unwrap();

    let events = &port.bus().events;
    assert_eq!(events.first(), Some(&Event::Select));
    assert_eq!(events.last(), Some(&Event::Deselect));
    assert_eq!(
        events.iter().filter(|e| **e == Event::Select).count(),
        events.iter().filter(|e| **e == Event::Deselect).count()
    );
}
