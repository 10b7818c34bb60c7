//! # Monet - Cross-Process Graphics Buffer Allocator
//!
//! Monet mediates allocation and sharing of GPU/display/camera memory
//! buffers across process boundaries. Producers describe a buffer's
//! required attributes in a descriptor; the allocator obtains backing
//! memory, attaches a small shared out-of-band metadata region to each
//! buffer, and any process that imports the handle can read and write
//! well-known and vendor-specific metadata without renegotiating with the
//! allocator.
//!
//! ## Features
//!
//! - **Descriptor wire protocol**: flat, forward-extensible byte layout,
//!   generic over the transport element size
//! - **Shared metadata region**: fixed-offset block per buffer, mapped by
//!   every importer, with an optional client-reserved byte range
//! - **Registered handle pool**: per-process import dedup and lifecycle
//! - **Allocation registry**: bounded overwrite-on-wrap telemetry ring
//! - **Metadata dispatch**: closed standard enumeration plus an open
//!   vendor handler table
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                    Monet Core                      │
//! ├────────────────────────────────────────────────────┤
//! │  Allocator side          │  Mapper side            │
//! │  - Descriptor codec      │  - Handle pool          │
//! │  - Heap policy table     │  - Metadata dispatch    │
//! │  - Allocation registry   │  - Lock/unlock          │
//! └────────────────────────────────────────────────────┘
//!            │                          │
//!            ▼                          ▼
//! ┌─────────────────────┐   ┌─────────────────────────┐
//! │  Transport adapters │   │  Shared metadata region │
//! │  (legacy / stable)  │   │  (mapped per importer)  │
//! └─────────────────────┘   └─────────────────────────┘
//! ```

pub mod adapter;
pub mod allocator;
pub mod descriptor;
pub mod error;
pub mod format;
pub mod handle;
pub mod handle_pool;
pub mod mapper;
pub mod registry;
pub mod shared_metadata;
pub mod usage;

// Main API re-exports
pub use allocator::{Allocator, AllocationResult, HeapAllocator, MemfdHeapAllocator};
pub use descriptor::{
    decode_descriptor, encode_descriptor, BufferDescriptor, InternalDescriptor,
    MAPPER_VERSION_SCALED,
};
pub use error::{MonetError, Result};
pub use handle::{ImportedHandle, RawHandle};
pub use handle_pool::RegisteredHandlePool;
pub use mapper::{BufferKey, Mapper, MetadataType, StandardMetadataType, VendorMetadata};
pub use registry::{AllocationRecord, AllocationRegistry};
pub use shared_metadata::{shared_metadata_size, SharedMetadataRegion};
pub use usage::{BufferUsage, VALID_USAGE_BITS};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration constants
pub mod config {
    /// Ceiling for the client reserved region per buffer
    pub use crate::allocator::MAX_RESERVED_REGION_SIZE;

    /// Slot count of the per-process allocation registry
    pub use crate::registry::DEFAULT_REGISTRY_CAPACITY;

    /// Bounded wait for the registry's diagnostic dump
    pub use crate::registry::DUMP_LOCK_TIMEOUT;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        assert!(!VERSION.is_empty());
        assert_eq!(MAPPER_VERSION_SCALED, 400);
    }

    #[test]
    fn test_full_lifecycle() {
        // Producer builds a request and ships it through the stable
        // transport; the consumer imports, annotates and frees.
        let request = BufferDescriptor {
            width: 320,
            height: 240,
            layer_count: 1,
            format: format::pixel_format::RGBA_8888,
            usage: usage::CPU_USAGE_OFTEN,
            reserved_size: 64,
            name: "lifecycle".to_string(),
        };
        assert!(request.validate());

        let allocator = Allocator::with_defaults();
        let reply = adapter::stable::allocate(&allocator, &adapter::stable::encode(&request), 1);
        assert_eq!(reply.error_code, 0);

        let mapper = Mapper::new();
        let key = mapper.import_buffer(&reply.buffers[0]).unwrap();

        let dataspace_ty = MetadataType::standard(StandardMetadataType::Dataspace);
        mapper
            .set(key, &dataspace_ty, &6u32.to_le_bytes())
            .unwrap();
        assert_eq!(mapper.get(key, &dataspace_ty).unwrap(), 6u32.to_le_bytes());

        let (_ptr, size) = mapper.get_reserved_region(key).unwrap();
        assert_eq!(size, 64);

        mapper.free_buffer(key).unwrap();
        assert!(mapper.free_buffer(key).is_err());
    }
}
