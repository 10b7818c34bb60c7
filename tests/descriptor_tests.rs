//! Tests for the descriptor wire protocol

use monet::{
    adapter,
    descriptor::{decode_descriptor, encode_descriptor, FIXED_HEADER_BYTES},
    format::pixel_format,
    BufferDescriptor, MonetError,
};

fn descriptor(name: &str) -> BufferDescriptor {
    BufferDescriptor {
        width: 1920,
        height: 1080,
        layer_count: 2,
        format: pixel_format::YCBCR_420_888,
        usage: monet::usage::CPU_USAGE_OFTEN | monet::BufferUsage::VIDEO_ENCODER.bits(),
        reserved_size: 4096,
        name: name.to_string(),
    }
}

#[test]
fn round_trip_preserves_every_field() {
    let desc = descriptor("recorder-input");

    let decoded = decode_descriptor::<u8>(&encode_descriptor::<u8>(&desc)).unwrap();
    assert_eq!(decoded.width, 1920);
    assert_eq!(decoded.height, 1080);
    assert_eq!(decoded.layer_count, 2);
    assert_eq!(decoded.format, pixel_format::YCBCR_420_888 as u64);
    assert_eq!(decoded.reserved_size, 4096);
    assert_eq!(decoded.name, "recorder-input");

    // Derived fields are recomputed, not carried on the wire.
    assert_eq!(decoded.consumer_usage, decoded.producer_usage);
    assert!(decoded.layout.is_none());
}

#[test]
fn round_trip_through_both_transports() {
    let desc = descriptor("dual-stack");

    let via_stable = adapter::stable::decode(&adapter::stable::encode(&desc)).unwrap();
    let via_legacy = adapter::legacy::decode(&adapter::legacy::encode(&desc)).unwrap();

    assert_eq!(via_stable, desc);
    assert_eq!(via_legacy, desc);
}

#[test]
fn truncated_payload_is_rejected() {
    let wire = encode_descriptor::<u8>(&descriptor("truncated"));

    for len in [0, 1, FIXED_HEADER_BYTES - 1, FIXED_HEADER_BYTES] {
        let err = decode_descriptor::<u8>(&wire[..len]).unwrap_err();
        assert!(
            matches!(err, MonetError::BadDescriptor { .. }),
            "length {} must fail with BadDescriptor",
            len
        );
    }
}

#[test]
fn missing_trailing_nul_is_rejected() {
    let mut wire = encode_descriptor::<u8>(&descriptor("no-nul"));
    *wire.last_mut().unwrap() = b'!';
    assert!(matches!(
        decode_descriptor::<u8>(&wire).unwrap_err(),
        MonetError::BadDescriptor { .. }
    ));
}

#[test]
fn version_tag_mismatch_is_rejected() {
    let mut wire = encode_descriptor::<u32>(&descriptor("versioned"));
    wire[0] += 1;
    assert!(matches!(
        decode_descriptor::<u32>(&wire).unwrap_err(),
        MonetError::BadDescriptor { .. }
    ));
}

#[test]
fn validation_rejects_each_zero_field() {
    assert!(descriptor("ok").validate());

    let mut zero_width = descriptor("w");
    zero_width.width = 0;
    assert!(!zero_width.validate());

    let mut zero_height = descriptor("h");
    zero_height.height = 0;
    assert!(!zero_height.validate());

    let mut zero_layers = descriptor("l");
    zero_layers.layer_count = 0;
    assert!(!zero_layers.validate());

    let mut zero_format = descriptor("f");
    zero_format.format = 0;
    assert!(!zero_format.validate());
}

#[test]
fn long_names_survive_the_wire() {
    let mut desc = descriptor("long");
    desc.name = "a".repeat(512);
    let decoded = decode_descriptor::<u32>(&encode_descriptor::<u32>(&desc)).unwrap();
    assert_eq!(decoded.name.len(), 512);
}

#[test]
fn unknown_usage_bits_are_masked_on_decode() {
    let mut desc = descriptor("masked");
    desc.usage |= 1 << 27; // not a valid usage bit
    let decoded = decode_descriptor::<u8>(&encode_descriptor::<u8>(&desc)).unwrap();
    assert_eq!(decoded.producer_usage & (1 << 27), 0);
}
