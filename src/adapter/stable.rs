//! Stable transport adapter: byte-vector descriptor payloads

use crate::allocator::Allocator;
use crate::descriptor::{self, BufferDescriptor, InternalDescriptor};
use crate::error::Result;

use super::AllocationReply;

/// Encode a request for the stable transport
pub fn encode(descriptor: &BufferDescriptor) -> Vec<u8> {
    descriptor::encode_descriptor::<u8>(descriptor)
}

/// Decode a stable transport payload
pub fn decode(wire: &[u8]) -> Result<InternalDescriptor> {
    descriptor::decode_descriptor::<u8>(wire)
}

/// Service a stable allocation request end to end
pub fn allocate(allocator: &Allocator, wire: &[u8], count: u32) -> AllocationReply {
    let descriptor = match decode(wire) {
        Ok(descriptor) => descriptor,
        Err(e) => return AllocationReply::from_result(Err(e)),
    };
    AllocationReply::from_result(allocator.allocate(&descriptor, count))
}
