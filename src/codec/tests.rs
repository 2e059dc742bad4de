//! Frame codec tests

use proptest::prelude::*;

use crate::bus::{BusFrame, EFF_MASK};

use super::{CodecError, Direction, FrameCodec};

fn codec() -> FrameCodec {
    FrameCodec::new("can/host/can0")
}

// =============================================================================
// Encoding
// =============================================================================

#[test]
fn test_encode_data_frame() {
    let frame = BusFrame::new(0x123, &[0xAA, 0xBB]).unwrap();
    let msg = codec().encode(&frame, Direction::Telemetry).unwrap();
    assert_eq!(msg.topic, "can/host/can0/rx/123");
    assert_eq!(msg.body, "2 aabb");
}

#[test]
fn test_encode_command_direction() {
    let frame = BusFrame::new(0x123, &[0xAA, 0xBB]).unwrap();
    let msg = codec().encode(&frame, Direction::Command).unwrap();
    assert_eq!(msg.topic, "can/host/can0/tx/123");
    assert_eq!(msg.body, "2 aabb");
}

#[test]
fn test_encode_full_payload() {
    let frame = BusFrame::new(0x7FF, &[0x00, 0x01, 0x02, 0x03, 0xFC, 0xFD, 0xFE, 0xFF]).unwrap();
    let msg = codec().encode(&frame, Direction::Telemetry).unwrap();
    assert_eq!(msg.topic, "can/host/can0/rx/7ff");
    assert_eq!(msg.body, "8 00010203fcfdfeff");
}

#[test]
fn test_encode_empty_data_frame() {
    let frame = BusFrame::new(0x1, &[]).unwrap();
    let msg = codec().encode(&frame, Direction::Telemetry).unwrap();
    assert_eq!(msg.body, "0");
}

#[test]
fn test_encode_remote_request() {
    let frame = BusFrame::new_remote(0x123, 4).unwrap();
    let msg = codec().encode(&frame, Direction::Telemetry).unwrap();
    assert_eq!(msg.topic, "can/host/can0/rx/123");
    assert_eq!(msg.body, "4 RTR");
}

#[test]
fn test_encode_extended_id_lowercase_hex() {
    let frame = BusFrame::new(0x1ABC_DEF0 & EFF_MASK, &[0x01]).unwrap();
    let msg = codec().encode(&frame, Direction::Telemetry).unwrap();
    assert_eq!(msg.topic, "can/host/can0/rx/1abcdef0");
}

#[test]
fn test_encode_drops_error_frames() {
    assert!(codec()
        .encode(&BusFrame::new_error(), Direction::Telemetry)
        .is_none());
}

#[test]
fn test_command_filter() {
    assert_eq!(codec().command_filter(), "can/host/can0/tx/+");
}

// =============================================================================
// Decoding
// =============================================================================

#[test]
fn test_decode_data_frame() {
    let frame = codec().decode("can/host/can0/tx/123", b"2 aabb").unwrap();
    assert_eq!(frame.id(), 0x123);
    assert_eq!(frame.dlc(), 2);
    assert_eq!(frame.payload(), &[0xAA, 0xBB]);
    assert!(!frame.is_remote());
    assert!(!frame.is_extended());
}

#[test]
fn test_decode_remote_request() {
    let frame = codec().decode("can/host/can0/tx/123", b"4 RTR").unwrap();
    assert!(frame.is_remote());
    assert_eq!(frame.dlc(), 4);
}

#[test]
fn test_decode_empty_data_frame() {
    let frame = codec().decode("can/host/can0/tx/42", b"0").unwrap();
    assert_eq!(frame.dlc(), 0);
    assert!(frame.payload().is_empty());
}

#[test]
fn test_decode_extended_by_magnitude() {
    let frame = codec().decode("can/host/can0/tx/800", b"0").unwrap();
    assert!(frame.is_extended());
    assert_eq!(frame.id(), 0x800);

    let frame = codec().decode("can/host/can0/tx/7ff", b"0").unwrap();
    assert!(!frame.is_extended());
}

#[test]
fn test_decode_masks_flag_bits() {
    // Flag bits embedded above bit 28 are discarded, not an error
    let frame = codec().decode("can/host/can0/tx/80000123", b"0").unwrap();
    assert_eq!(frame.id(), 0x123);
}

#[test]
fn test_decode_uppercase_hex_accepted() {
    let frame = codec().decode("can/host/can0/tx/1A", b"1 AB").unwrap();
    assert_eq!(frame.id(), 0x1A);
    assert_eq!(frame.payload(), &[0xAB]);
}

#[test]
fn test_decode_malformed_topic() {
    assert!(matches!(
        codec().decode("can/host/can0/tx/zzz", b"2 aabb"),
        Err(CodecError::MalformedTopic(_))
    ));
    assert!(matches!(
        codec().decode("can/host/can0/tx/", b"2 aabb"),
        Err(CodecError::MalformedTopic(_))
    ));
    // More than 8 hex digits overflows the parse
    assert!(matches!(
        codec().decode("can/host/can0/tx/123456789", b"0"),
        Err(CodecError::MalformedTopic(_))
    ));
}

#[test]
fn test_decode_dlc_out_of_range() {
    assert!(matches!(
        codec().decode("can/host/can0/tx/123", b"9 00"),
        Err(CodecError::MalformedPayload(_))
    ));
}

#[test]
fn test_decode_wrong_token_count() {
    let c = codec();
    for body in [
        &b""[..],
        b"2",
        b"2 aabb extra",
        b"2 aa bb",
        b"12 aabb",
        b"2 RTR trailing",
    ] {
        assert!(
            matches!(
                c.decode("can/host/can0/tx/123", body),
                Err(CodecError::MalformedPayload(_))
            ),
            "body {:?} should be rejected",
            body
        );
    }
}

#[test]
fn test_decode_payload_length_mismatch() {
    let c = codec();
    assert!(c.decode("can/host/can0/tx/123", b"2 aa").is_err());
    assert!(c.decode("can/host/can0/tx/123", b"1 aabb").is_err());
    assert!(c.decode("can/host/can0/tx/123", b"0 aa").is_err());
}

#[test]
fn test_decode_non_hex_payload() {
    assert!(codec().decode("can/host/can0/tx/123", b"2 aaxy").is_err());
    // Lowercase marker is not a remote request, and not hex either
    assert!(codec().decode("can/host/can0/tx/123", b"3 rtr").is_err());
}

#[test]
fn test_decode_non_utf8_body() {
    assert!(matches!(
        codec().decode("can/host/can0/tx/123", &[0x32, 0x20, 0xFF, 0xFE]),
        Err(CodecError::MalformedPayload(_))
    ));
}

// =============================================================================
// Round trip
// =============================================================================

proptest! {
    #[test]
    fn prop_roundtrip_data_frames(id in 0u32..=EFF_MASK, payload in proptest::collection::vec(any::<u8>(), 0..=8)) {
        let c = codec();
        let frame = BusFrame::new(id, &payload).unwrap();
        let msg = c.encode(&frame, Direction::Telemetry).unwrap();
        let decoded = c.decode(&msg.topic, msg.body.as_bytes()).unwrap();
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn prop_roundtrip_remote_frames(id in 0u32..=EFF_MASK, dlc in 0u8..=8) {
        let c = codec();
        let frame = BusFrame::new_remote(id, dlc).unwrap();
        let msg = c.encode(&frame, Direction::Command).unwrap();
        let decoded = c.decode(&msg.topic, msg.body.as_bytes()).unwrap();
        prop_assert_eq!(decoded, frame);
    }
}
