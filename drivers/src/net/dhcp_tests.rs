use super::dhcp::{self, BOOTP_HEADER_LEN, DHCP_MAX_LEN};
use super::types::{Ipv4Addr, MacAddr};

const MAC: MacAddr = MacAddr([0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee]);
const XID: u32 = 0xcafe_f00d;
const OFFERED: Ipv4Addr = Ipv4Addr([192, 168, 1, 50]);
const SERVER: Ipv4Addr = Ipv4Addr([192, 168, 1, 1]);

/// Scan the options region for `code`, returning its value bytes.
fn find_option(msg: &[u8], code: u8) -> Option<&[u8]> {
    let mut i = BOOTP_HEADER_LEN;
    while i < msg.len() {
        match msg[i] {
            255 => return None,
            0 => i += 1,
            c => {
                let len = msg[i + 1] as usize;
                if c == code {
                    return Some(&msg[i + 2..i + 2 + len]);
                }
                i += 2 + len;
            }
        }
    }
    None
}

/// Craft a minimal server reply for parser tests.
fn reply(
    msg_type: u8,
    xid: u32,
    chaddr: MacAddr,
    yiaddr: Ipv4Addr,
    extra_options: &[u8],
) -> [u8; DHCP_MAX_LEN] {
    let mut buf = [0u8; DHCP_MAX_LEN];
    buf[0] = 2; // BOOTREPLY
    buf[1] = 1;
    buf[2] = 6;
    buf[4..8].copy_from_slice(&xid.to_be_bytes());
    buf[16..20].copy_from_slice(yiaddr.as_bytes());
    buf[28..34].copy_from_slice(chaddr.as_bytes());
    buf[236..240].copy_from_slice(&[0x63, 0x82, 0x53, 0x63]);

    let mut i = BOOTP_HEADER_LEN;
    buf[i] = 53;
    buf[i + 1] = 1;
    buf[i + 2] = msg_type;
    i += 3;
    buf[i..i + extra_options.len()].copy_from_slice(extra_options);
    i += extra_options.len();
    buf[i] = 255;
    buf
}

#[test]
fn test_discover_layout() {
    let mut out = [0u8; DHCP_MAX_LEN];
    let len = dhcp::build_discover(MAC, XID, 3, &mut out);
    let msg = &out[..len];

    assert_eq!(msg[0], 1, "BOOTREQUEST");
    assert_eq!(msg[1], 1, "htype Ethernet");
    assert_eq!(msg[2], 6, "hlen");
    assert_eq!(&msg[4..8], &XID.to_be_bytes());
    assert_eq!(&msg[8..10], &3u16.to_be_bytes(), "secs");
    assert_eq!(&msg[10..12], &0x8000u16.to_be_bytes(), "broadcast flag");
    assert_eq!(&msg[28..34], MAC.as_bytes());
    assert_eq!(&msg[236..240], &[0x63, 0x82, 0x53, 0x63]);

    // Message type is the first option after the cookie.
    assert_eq!(&msg[240..243], &[53, 1, dhcp::MSG_DISCOVER]);
    assert!(find_option(msg, 55).is_some(), "parameter request list");
    assert_eq!(msg[len - 1], 255, "END terminates the options");
    assert!(find_option(msg, 50).is_none(), "no requested address");
}

#[test]
fn test_select_request_carries_address_and_server() {
    let mut out = [0u8; DHCP_MAX_LEN];
    let len = dhcp::build_request(MAC, XID, 1, OFFERED, SERVER, &mut out);
    let msg = &out[..len];

    assert_eq!(&msg[240..243], &[53, 1, dhcp::MSG_REQUEST]);
    assert_eq!(find_option(msg, 50), Some(&OFFERED.0[..]), "option 50");
    assert_eq!(find_option(msg, 54), Some(&SERVER.0[..]), "option 54");
    assert_eq!(&msg[12..16], &[0, 0, 0, 0], "ciaddr stays zero");
}

#[test]
fn test_renew_request_uses_ciaddr() {
    let mut out = [0u8; DHCP_MAX_LEN];
    let len = dhcp::build_renew_request(MAC, XID, 0, OFFERED, &mut out);
    let msg = &out[..len];

    assert_eq!(&msg[12..16], OFFERED.as_bytes(), "ciaddr carries the lease");
    assert_eq!(&msg[10..12], &[0, 0], "no broadcast flag once addressed");
    assert!(find_option(msg, 50).is_none());
    assert!(find_option(msg, 54).is_none());
}

#[test]
fn test_reboot_request_names_remembered_address() {
    let mut out = [0u8; DHCP_MAX_LEN];
    let len = dhcp::build_reboot_request(MAC, XID, 0, OFFERED, &mut out);
    let msg = &out[..len];

    assert_eq!(&msg[12..16], &[0, 0, 0, 0], "ciaddr zero while rebooting");
    assert_eq!(find_option(msg, 50), Some(&OFFERED.0[..]));
    assert!(find_option(msg, 54).is_none(), "no server id after reboot");
}

#[test]
fn test_parse_reply_extracts_lease_options() {
    let mut extra = [0u8; 30];
    extra[0..6].copy_from_slice(&[54, 4, 192, 168, 1, 1]);
    extra[6..12].copy_from_slice(&[1, 4, 255, 255, 255, 0]);
    extra[12..18].copy_from_slice(&[51, 4, 0, 0, 0x0e, 0x10]); // 3600 s
    extra[18..24].copy_from_slice(&[58, 4, 0, 0, 0x07, 0x08]); // 1800 s
    extra[24..30].copy_from_slice(&[59, 4, 0, 0, 0x0c, 0x4e]); // 3150 s
    let msg = reply(dhcp::MSG_ACK, XID, MAC, OFFERED, &extra);

    let parsed = dhcp::parse_reply(&msg, XID, MAC).expect("valid ack must parse");
    assert_eq!(parsed.msg_type, dhcp::MSG_ACK);
    assert_eq!(parsed.yiaddr, OFFERED);
    assert_eq!(parsed.server_id, SERVER);
    assert_eq!(parsed.subnet_mask, Ipv4Addr([255, 255, 255, 0]));
    assert_eq!(parsed.lease_time, Some(3600));
    assert_eq!(parsed.renewal_time, Some(1800));
    assert_eq!(parsed.rebinding_time, Some(3150));
}

#[test]
fn test_parse_rejects_foreign_replies() {
    let msg = reply(dhcp::MSG_OFFER, XID, MAC, OFFERED, &[]);
    assert!(dhcp::parse_reply(&msg, XID, MAC).is_some());

    // Wrong transaction id.
    assert!(dhcp::parse_reply(&msg, XID ^ 1, MAC).is_none());

    // Someone else's hardware address.
    let other = MacAddr([0x02, 1, 2, 3, 4, 5]);
    assert!(dhcp::parse_reply(&msg, XID, other).is_none());

    // A request (op 1) is never a reply.
    let mut bad = msg;
    bad[0] = 1;
    assert!(dhcp::parse_reply(&bad, XID, MAC).is_none());

    // Corrupt magic cookie.
    let mut bad = msg;
    bad[236] = 0x00;
    assert!(dhcp::parse_reply(&bad, XID, MAC).is_none());

    // No message-type option at all.
    let mut bad = msg;
    bad[240] = 255;
    assert!(dhcp::parse_reply(&bad, XID, MAC).is_none());
}

#[test]
fn test_parse_skips_pad_and_stops_at_end() {
    let mut msg = reply(dhcp::MSG_OFFER, XID, MAC, OFFERED, &[]);
    // PAD, PAD, server id, END, then garbage that must not be read.
    let i = 240 + 3;
    msg[i] = 0;
    msg[i + 1] = 0;
    msg[i + 2..i + 8].copy_from_slice(&[54, 4, 192, 168, 1, 1]);
    msg[i + 8] = 255;
    msg[i + 9..i + 15].copy_from_slice(&[51, 4, 0xff, 0xff, 0xff, 0xff]);

    let parsed = dhcp::parse_reply(&msg, XID, MAC).expect("must parse");
    assert_eq!(parsed.server_id, SERVER);
    assert_eq!(parsed.lease_time, None, "options after END are ignored");
}

#[test]
fn test_parse_survives_truncated_option() {
    let mut msg = reply(dhcp::MSG_OFFER, XID, MAC, OFFERED, &[]);
    // An option whose declared length runs past the buffer.
    let i = 240 + 3;
    msg[i] = 54;
    msg[i + 1] = 255;
    let parsed = dhcp::parse_reply(&msg, XID, MAC).expect("truncation is not fatal");
    assert!(parsed.server_id.is_unspecified());
}
