//! Buffer descriptors: the request side of the allocation protocol

pub mod codec;

pub use codec::{decode_descriptor, encode_descriptor, TransportUnit, FIXED_HEADER_BYTES};

use serde::Serialize;

use crate::format::{self, DerivedLayout};
use crate::usage::mask_usage;

/// Scaled mapper protocol version. The wire tag is this value divided by
/// ten; both transport generations stamp the same tag.
pub const MAPPER_VERSION_SCALED: u32 = 400;

/// A buffer allocation request as built by the producer.
///
/// Immutable after creation: the requester owns it until it is serialized,
/// and the decoded copy is owned by the allocator process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferDescriptor {
    /// Width in pixels, must be greater than zero
    pub width: u32,
    /// Height in pixels, must be greater than zero
    pub height: u32,
    /// Number of image layers, must be greater than zero
    pub layer_count: u32,
    /// Pixel format id, must be non-zero
    pub format: u32,
    /// Combined producer/consumer usage bits
    pub usage: u64,
    /// Requested size of the client reserved region, in bytes
    pub reserved_size: u64,
    /// Human-readable buffer name. Embedded NUL bytes are cut at encode
    /// time; the wire carries the name up to the first NUL only.
    pub name: String,
}

impl BufferDescriptor {
    /// A descriptor is well-formed only if all dimensions are non-zero and
    /// the format id is set. Mandatory before any allocation attempt and
    /// before any is-allocatable query.
    pub fn validate(&self) -> bool {
        if self.width == 0 || self.height == 0 || self.layer_count == 0 {
            return false;
        }
        self.format != 0
    }
}

/// Storage-layout tag recorded on decoded descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatType {
    /// Layout chosen from the usage bits (the only type produced by the
    /// wire protocol; internal layouts are set by embedder code)
    Usage,
    /// Layout forced to a specific internal format
    Internal,
}

/// The allocator-side view of a decoded request.
///
/// Derived fields are recomputed by the decoder and by `derive`, never
/// carried on the wire.
#[derive(Debug, Clone)]
pub struct InternalDescriptor {
    pub width: u32,
    pub height: u32,
    pub layer_count: u32,
    /// Requested format, widened to the internal format domain
    pub format: u64,
    pub producer_usage: u64,
    pub consumer_usage: u64,
    pub format_type: FormatType,
    /// Size-of-structure stamp, used to reject foreign descriptors handed
    /// back across an ABI boundary
    pub signature: usize,
    pub reserved_size: u64,
    pub name: String,
    /// Filled in by `derive`; `None` until then
    pub layout: Option<DerivedLayout>,
}

impl InternalDescriptor {
    /// Build the allocator-side descriptor from a validated request,
    /// recomputing every derived field.
    pub fn from_request(desc: &BufferDescriptor) -> Self {
        let usage = mask_usage(desc.usage);
        Self {
            width: desc.width,
            height: desc.height,
            layer_count: desc.layer_count,
            format: desc.format as u64,
            producer_usage: usage,
            consumer_usage: usage,
            format_type: FormatType::Usage,
            signature: std::mem::size_of::<InternalDescriptor>(),
            reserved_size: desc.reserved_size,
            name: desc.name.clone(),
            layout: None,
        }
    }

    /// Combined usage bits
    pub fn usage(&self) -> u64 {
        self.producer_usage | self.consumer_usage
    }

    /// Derive stride, plane layout and allocation size through the format
    /// table. Idempotent; required before the descriptor reaches a backend.
    pub fn derive(&mut self) -> crate::error::Result<&DerivedLayout> {
        if self.layout.is_none() {
            let layout = format::derive_layout(
                self.width,
                self.height,
                self.layer_count,
                self.format as u32,
            )?;
            self.layout = Some(layout);
        }
        Ok(self.layout.as_ref().unwrap())
    }
}

impl PartialEq<BufferDescriptor> for InternalDescriptor {
    fn eq(&self, other: &BufferDescriptor) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.layer_count == other.layer_count
            && self.format == other.format as u64
            && self.producer_usage == mask_usage(other.usage)
            && self.reserved_size == other.reserved_size
            && self.name == other.name
    }
}
