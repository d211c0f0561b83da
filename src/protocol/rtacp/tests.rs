//! Unit tests for RTACP identifier packing and message validation.
use super::*;

#[test]
/// Identifier bits for the canonical "Hello" unicast:
/// `000 1 10 000001 000010 1111111111`.
fn test_pack_id_unicast() {
    let msg = RtacpMessage::new(Priority::MedLow, 0x01, 0x02, b"Hello").expect("valid message");
    assert_eq!(msg.pack_id(), CanId(0x0301_0BFF));
}

#[test]
/// An ACK differs from a MSG only in bit 25.
fn test_pack_id_kind_bit() {
    let msg = RtacpMessage::new(Priority::High, 0x05, 0x06, &[]).expect("valid message");
    let ack = RtacpMessage {
        kind: RtacpKind::Ack,
        ..msg
    };
    assert_eq!(msg.pack_id().0 ^ ack.pack_id().0, 1 << 25);
}

#[test]
/// Packing an id and parsing it back yields the original fields.
fn test_id_roundtrip() {
    let original =
        RtacpMessage::new(Priority::Low, 0x3E, 0x11, &[0xDE, 0xAD]).expect("valid message");
    let frame = original.to_frame();
    assert!(frame.extended);
    assert_eq!(frame.dlc, 2);

    let parsed = RtacpMessage::from_frame(&frame).expect("parse");
    assert_eq!(parsed, original);
}

#[test]
/// Out-of-range addresses and oversized payloads are rejected up front.
fn test_new_validation() {
    assert_eq!(
        RtacpMessage::new(Priority::High, 0x40, 0x01, &[]),
        Err(ProtocolError::InvalidArgument)
    );
    assert_eq!(
        RtacpMessage::new(Priority::High, 0x01, 0x40, &[]),
        Err(ProtocolError::InvalidArgument)
    );
    assert_eq!(
        RtacpMessage::new(Priority::High, 0x01, 0x02, &[0u8; 9]),
        Err(ProtocolError::InvalidArgument)
    );
}

#[test]
/// The frame payload is copied verbatim, no stuffing and no CRC.
fn test_payload_verbatim() {
    let msg = RtacpMessage::new(Priority::MedLow, 0x01, 0x02, b"Hello").expect("valid message");
    let frame = msg.to_frame();
    assert_eq!(frame.payload(), b"Hello");
}
