//! Legacy transport adapter: `u32`-element descriptor payloads

use crate::allocator::Allocator;
use crate::descriptor::{self, BufferDescriptor, InternalDescriptor};
use crate::error::Result;

use super::AllocationReply;

/// Encode a request for the legacy transport
pub fn encode(descriptor: &BufferDescriptor) -> Vec<u32> {
    descriptor::encode_descriptor::<u32>(descriptor)
}

/// Decode a legacy transport payload
pub fn decode(wire: &[u32]) -> Result<InternalDescriptor> {
    descriptor::decode_descriptor::<u32>(wire)
}

/// Service a legacy allocation request end to end: decode, allocate and
/// flatten the outcome with its stable error code.
pub fn allocate(allocator: &Allocator, wire: &[u32], count: u32) -> AllocationReply {
    let descriptor = match decode(wire) {
        Ok(descriptor) => descriptor,
        Err(e) => return AllocationReply::from_result(Err(e)),
    };
    AllocationReply::from_result(allocator.allocate(&descriptor, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ERROR_CODE_BAD_DESCRIPTOR;
    use crate::format::pixel_format;

    fn request() -> BufferDescriptor {
        BufferDescriptor {
            width: 64,
            height: 64,
            layer_count: 1,
            format: pixel_format::RGBA_8888,
            usage: crate::usage::CPU_USAGE_OFTEN,
            reserved_size: 0,
            name: "legacy".to_string(),
        }
    }

    #[test]
    fn test_round_trip() {
        let decoded = decode(&encode(&request())).unwrap();
        assert_eq!(decoded, request());
    }

    #[test]
    fn test_allocate_maps_decode_failure() {
        let allocator = Allocator::with_defaults();
        let reply = allocate(&allocator, &[0u32; 2], 1);
        assert_eq!(reply.error_code, ERROR_CODE_BAD_DESCRIPTOR);
        assert!(reply.buffers.is_empty());
    }

    #[test]
    fn test_allocate_success() {
        let allocator = Allocator::with_defaults();
        let reply = allocate(&allocator, &encode(&request()), 2);
        assert_eq!(reply.error_code, 0);
        assert_eq!(reply.buffers.len(), 2);
        assert_eq!(reply.stride, 64);
    }
}
