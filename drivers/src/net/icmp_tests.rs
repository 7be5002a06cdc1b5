use super::checksum;
use super::icmp;

/// Build an echo request with the given identifier, sequence and payload.
fn echo_request(ident: u16, seq: u16, payload: &[u8]) -> [u8; 64] {
    let mut buf = [0u8; 64];
    buf[0] = icmp::MSG_TYPE_ECHO;
    buf[1] = 0;
    buf[4..6].copy_from_slice(&ident.to_be_bytes());
    buf[6..8].copy_from_slice(&seq.to_be_bytes());
    buf[8..8 + payload.len()].copy_from_slice(payload);
    let len = icmp::ICMP_HEADER_LEN + payload.len();
    let csum = checksum::checksum(&buf[..len]);
    buf[2..4].copy_from_slice(&csum.to_be_bytes());
    buf
}

#[test]
fn test_echo_request_gets_mirrored_reply() {
    let payload = [0xde, 0xad, 0xbe, 0xef, 0x01];
    let request = echo_request(0x4242, 7, &payload);
    let len = icmp::ICMP_HEADER_LEN + payload.len();

    let mut out = [0u8; 64];
    let n = icmp::handle_rx(&request[..len], &mut out).expect("echo must be answered");
    assert_eq!(n, len);

    let reply = &out[..n];
    assert_eq!(reply[0], icmp::MSG_TYPE_ECHO_REPLY);
    assert_eq!(reply[1], 0, "code preserved");
    assert_eq!(&reply[4..6], &0x4242u16.to_be_bytes(), "identifier preserved");
    assert_eq!(&reply[6..8], &7u16.to_be_bytes(), "sequence preserved");
    assert_eq!(&reply[8..], &payload, "payload preserved");
    assert!(checksum::verify(reply), "reply checksum recomputed");
}

#[test]
fn test_reply_checksum_differs_from_request() {
    // Type 8 → 0 changes the sum, so a reply carrying the request's
    // checksum would be corrupt.
    let request = echo_request(1, 1, &[]);
    let len = icmp::ICMP_HEADER_LEN;
    let mut out = [0u8; 64];
    let n = icmp::handle_rx(&request[..len], &mut out).unwrap();
    assert_ne!(&out[2..4], &request[2..4]);
    assert_eq!(n, len);
}

#[test]
fn test_bad_checksum_dropped() {
    let mut request = echo_request(1, 2, &[1, 2, 3]);
    request[3] ^= 0xff;
    let len = icmp::ICMP_HEADER_LEN + 3;
    let mut out = [0u8; 64];
    assert!(icmp::handle_rx(&request[..len], &mut out).is_none());
}

#[test]
fn test_non_echo_types_dropped() {
    for msg_type in [
        icmp::MSG_TYPE_ECHO_REPLY,
        icmp::MSG_TYPE_DESTINATION_UNREACHABLE,
        icmp::MSG_TYPE_TIME_EXCEEDED,
        icmp::MSG_TYPE_TIMESTAMP,
    ] {
        let mut request = echo_request(1, 3, &[]);
        request[0] = msg_type;
        request[2] = 0;
        request[3] = 0;
        let csum = checksum::checksum(&request[..icmp::ICMP_HEADER_LEN]);
        request[2..4].copy_from_slice(&csum.to_be_bytes());

        let mut out = [0u8; 64];
        assert!(
            icmp::handle_rx(&request[..icmp::ICMP_HEADER_LEN], &mut out).is_none(),
            "type {} must not be answered",
            msg_type
        );
    }
}

#[test]
fn test_truncated_message_dropped() {
    let request = echo_request(1, 4, &[]);
    let mut out = [0u8; 64];
    assert!(icmp::handle_rx(&request[..6], &mut out).is_none());
}
