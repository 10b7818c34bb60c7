//! Descriptor wire codec
//!
//! A descriptor travels as a fixed-size numeric header followed by exactly
//! one NUL-terminated name string. The codec is generic over the transport
//! unit: the legacy transport carries `u32` elements, the stable transport
//! plain bytes. Multi-unit fields are packed little-endian-contiguous
//! across units, and the unit size must evenly divide every field width.

use crate::error::{MonetError, Result};

use super::{BufferDescriptor, FormatType, InternalDescriptor, MAPPER_VERSION_SCALED};
use crate::usage::mask_usage;

/// Fixed header field counts, set by the protocol version. Reordering or
/// removing a header field requires a version bump; extension is only by
/// appending new trailing fields before the name.
pub const DESCRIPTOR_32BIT_FIELDS: usize = 5;
pub const DESCRIPTOR_64BIT_FIELDS: usize = 2;

/// Byte size of the fixed header
pub const FIXED_HEADER_BYTES: usize = DESCRIPTOR_32BIT_FIELDS * 4 + DESCRIPTOR_64BIT_FIELDS * 8;

/// One element of the transport payload
pub trait TransportUnit: Copy + Default {
    const BYTES: usize;

    /// Compile-time guard: the unit must evenly divide both field widths.
    const UNIT_DIVIDES_FIELDS: () = assert!(4 % Self::BYTES == 0 && 8 % Self::BYTES == 0);

    fn from_le(bytes: &[u8]) -> Self;
    fn write_le(self, out: &mut [u8]);
}

impl TransportUnit for u8 {
    const BYTES: usize = 1;

    fn from_le(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn write_le(self, out: &mut [u8]) {
        out[0] = self;
    }
}

impl TransportUnit for u32 {
    const BYTES: usize = 4;

    fn from_le(bytes: &[u8]) -> Self {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn write_le(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_le_bytes());
    }
}

fn push_u32(bytes: &mut Vec<u8>, val: u32) {
    bytes.extend_from_slice(&val.to_le_bytes());
}

fn push_u64(bytes: &mut Vec<u8>, val: u64) {
    bytes.extend_from_slice(&val.to_le_bytes());
}

fn pop_u32(bytes: &[u8], pos: &mut usize) -> u32 {
    let val = u32::from_le_bytes(bytes[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    val
}

fn pop_u64(bytes: &[u8], pos: &mut usize) -> u64 {
    let val = u64::from_le_bytes(bytes[*pos..*pos + 8].try_into().unwrap());
    *pos += 8;
    val
}

/// Encode a request into transport units.
///
/// The name is the sole variable-length element and sits last; the payload
/// always ends with at least one NUL byte. When the unit is wider than a
/// byte the tail is padded with additional NULs up to a unit boundary.
pub fn encode_descriptor<U: TransportUnit>(desc: &BufferDescriptor) -> Vec<U> {
    let () = U::UNIT_DIVIDES_FIELDS;

    // The wire carries the name up to the first NUL only.
    let name_bytes = match desc.name.as_bytes().iter().position(|&b| b == 0) {
        Some(end) => &desc.name.as_bytes()[..end],
        None => desc.name.as_bytes(),
    };

    let payload_len = FIXED_HEADER_BYTES + name_bytes.len() + 1;
    let padded_len = (payload_len + U::BYTES - 1) / U::BYTES * U::BYTES;

    let mut bytes = Vec::with_capacity(padded_len);
    push_u32(&mut bytes, MAPPER_VERSION_SCALED / 10);
    push_u32(&mut bytes, desc.width);
    push_u32(&mut bytes, desc.height);
    push_u32(&mut bytes, desc.layer_count);
    push_u32(&mut bytes, desc.format);
    push_u64(&mut bytes, desc.usage);
    push_u64(&mut bytes, desc.reserved_size);
    debug_assert_eq!(bytes.len(), FIXED_HEADER_BYTES);

    bytes.extend_from_slice(name_bytes);
    bytes.resize(padded_len, 0);

    bytes
        .chunks(U::BYTES)
        .map(|chunk| U::from_le(chunk))
        .collect()
}

/// Decode transport units back into the allocator-side descriptor.
///
/// Fails with `BadDescriptor` when the payload is shorter than the fixed
/// header plus one byte, does not end in NUL, or carries a version tag
/// other than the expected one. Derived fields (consumer usage, layout
/// tag, signature stamp) are recomputed here, never read off the wire.
pub fn decode_descriptor<U: TransportUnit>(wire: &[U]) -> Result<InternalDescriptor> {
    let () = U::UNIT_DIVIDES_FIELDS;

    let total_bytes = wire.len() * U::BYTES;
    if total_bytes < FIXED_HEADER_BYTES + 1 {
        return Err(MonetError::bad_descriptor("descriptor is too small"));
    }

    let mut bytes = vec![0u8; total_bytes];
    for (unit, chunk) in wire.iter().zip(bytes.chunks_mut(U::BYTES)) {
        unit.write_le(chunk);
    }

    if bytes[bytes.len() - 1] != 0 {
        return Err(MonetError::bad_descriptor(
            "descriptor does not end with a null character",
        ));
    }

    let mut pos = 0;
    let version = pop_u32(&bytes, &mut pos);
    if version != MAPPER_VERSION_SCALED / 10 {
        return Err(MonetError::bad_descriptor(format!(
            "corrupted version tag {} in descriptor",
            version
        )));
    }

    let width = pop_u32(&bytes, &mut pos);
    let height = pop_u32(&bytes, &mut pos);
    let layer_count = pop_u32(&bytes, &mut pos);
    let format = pop_u32(&bytes, &mut pos) as u64;
    let producer_usage = mask_usage(pop_u64(&bytes, &mut pos));
    let reserved_size = pop_u64(&bytes, &mut pos);
    debug_assert_eq!(pos, FIXED_HEADER_BYTES);

    let name_end = bytes[pos..]
        .iter()
        .position(|&b| b == 0)
        .map(|idx| pos + idx)
        .unwrap_or(bytes.len() - 1);
    let name = std::str::from_utf8(&bytes[pos..name_end])
        .map_err(|_| MonetError::bad_descriptor("descriptor name is not valid UTF-8"))?
        .to_string();

    Ok(InternalDescriptor {
        width,
        height,
        layer_count,
        format,
        producer_usage,
        consumer_usage: producer_usage,
        format_type: FormatType::Usage,
        signature: std::mem::size_of::<InternalDescriptor>(),
        reserved_size,
        name,
        layout: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::pixel_format;

    fn request() -> BufferDescriptor {
        BufferDescriptor {
            width: 640,
            height: 480,
            layer_count: 1,
            format: pixel_format::YV12,
            usage: crate::usage::CPU_USAGE_OFTEN,
            reserved_size: 1024,
            name: "camera-preview".to_string(),
        }
    }

    #[test]
    fn test_round_trip_bytes() {
        let desc = request();
        let wire = encode_descriptor::<u8>(&desc);
        let decoded = decode_descriptor::<u8>(&wire).unwrap();
        assert_eq!(decoded, desc);
    }

    #[test]
    fn test_round_trip_u32_units() {
        let desc = request();
        let wire = encode_descriptor::<u32>(&desc);
        assert_eq!(wire.len() * 4 % 4, 0);
        let decoded = decode_descriptor::<u32>(&wire).unwrap();
        assert_eq!(decoded, desc);
    }

    #[test]
    fn test_header_layout() {
        let wire = encode_descriptor::<u8>(&request());
        // version tag leads the payload
        assert_eq!(
            u32::from_le_bytes(wire[..4].try_into().unwrap()),
            MAPPER_VERSION_SCALED / 10
        );
        assert_eq!(u32::from_le_bytes(wire[4..8].try_into().unwrap()), 640);
        assert_eq!(*wire.last().unwrap(), 0);
    }

    #[test]
    fn test_truncated_payload() {
        let wire = encode_descriptor::<u8>(&request());
        let err = decode_descriptor::<u8>(&wire[..FIXED_HEADER_BYTES]).unwrap_err();
        assert!(matches!(err, MonetError::BadDescriptor { .. }));
    }

    #[test]
    fn test_missing_terminator() {
        let mut wire = encode_descriptor::<u8>(&request());
        *wire.last_mut().unwrap() = b'x';
        let err = decode_descriptor::<u8>(&wire).unwrap_err();
        assert!(matches!(err, MonetError::BadDescriptor { .. }));
    }

    #[test]
    fn test_version_mismatch() {
        let mut wire = encode_descriptor::<u8>(&request());
        wire[0] ^= 0xff;
        let err = decode_descriptor::<u8>(&wire).unwrap_err();
        assert!(matches!(err, MonetError::BadDescriptor { .. }));
    }

    #[test]
    fn test_empty_name() {
        let mut desc = request();
        desc.name.clear();
        let wire = encode_descriptor::<u8>(&desc);
        assert_eq!(wire.len(), FIXED_HEADER_BYTES + 1);
        let decoded = decode_descriptor::<u8>(&wire).unwrap();
        assert_eq!(decoded.name, "");
    }

    #[test]
    fn test_embedded_nul_is_cut() {
        let mut desc = request();
        desc.name = "front\0back".to_string();
        let wire = encode_descriptor::<u8>(&desc);
        let decoded = decode_descriptor::<u8>(&wire).unwrap();
        assert_eq!(decoded.name, "front");
    }
}
