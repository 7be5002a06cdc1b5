use super::ethernet::{self, FrameClass};
use super::types::{EtherType, MacAddr};

#[test]
fn test_classify_known_ethertypes() {
    assert_eq!(ethernet::classify(0x0800), FrameClass::Ipv4);
    assert_eq!(ethernet::classify(0x0806), FrameClass::Arp);
}

#[test]
fn test_classify_length_field_is_unsupported() {
    // Anything at or below 0x05DC is an 802.3 length, not an EtherType.
    assert_eq!(ethernet::classify(0x05DC), FrameClass::LengthFramed);
    assert_eq!(ethernet::classify(0x0040), FrameClass::LengthFramed);
    assert_eq!(ethernet::classify(0x0000), FrameClass::LengthFramed);
}

#[test]
fn test_classify_unknown_ethertype() {
    assert_eq!(ethernet::classify(0x86DD), FrameClass::Unknown(0x86DD));
    assert_eq!(ethernet::classify(0x8100), FrameClass::Unknown(0x8100));
}

#[test]
fn test_header_round_trip() {
    let dst = MacAddr([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
    let src = MacAddr([0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee]);

    let mut frame = [0u8; 64];
    ethernet::write_header(&mut frame, dst, src, EtherType::Ipv4);

    assert_eq!(ethernet::dst_mac(&frame), dst);
    assert_eq!(ethernet::src_mac(&frame), src);
    assert_eq!(ethernet::type_len(&frame), 0x0800);
}
