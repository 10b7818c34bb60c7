//! Allocation front-end
//!
//! Orchestrates a batch allocation: validate the decoded descriptor, check
//! the reserved-region ceiling, derive the layout, obtain backing memory
//! from the heap backend, create and initialize the shared metadata region,
//! record the event in the allocation registry, and enforce stride
//! consistency across the batch. Any failure mid-batch rolls back every
//! buffer allocated so far in the same request.

pub mod heap;

use std::os::fd::{AsFd, AsRawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error};

use crate::descriptor::{InternalDescriptor, MAPPER_VERSION_SCALED};
use crate::error::{MonetError, Result};
use crate::format;
use crate::handle::RawHandle;
use crate::registry::{AllocationRecord, AllocationRegistry};
use crate::shared_metadata::{shared_metadata_size, SharedMetadataRegion};

pub use heap::{HeapAllocator, HeapSpecifier, MemfdHeapAllocator};

/// Ceiling for the client reserved region. A 4K frame at one byte per
/// pixel is roughly 7.9 MiB, the largest payload the reserved region is
/// expected to carry.
pub const MAX_RESERVED_REGION_SIZE: u64 = 8 * 1024 * 1024;

/// Outcome of a successful batch allocation
#[derive(Debug)]
pub struct AllocationResult {
    /// Pixel stride shared by every buffer in the batch
    pub stride: u32,
    pub buffers: Vec<RawHandle>,
}

/// The allocation service. Constructed once by the embedder and injected
/// into call paths; tests construct their own with a private registry.
pub struct Allocator {
    heap_allocator: Box<dyn HeapAllocator>,
    registry: Arc<AllocationRegistry>,
    next_buffer_id: AtomicU64,
}

impl Allocator {
    pub fn new(heap_allocator: Box<dyn HeapAllocator>, registry: Arc<AllocationRegistry>) -> Self {
        Self {
            heap_allocator,
            registry,
            next_buffer_id: AtomicU64::new(1),
        }
    }

    /// Memfd-backed allocator with a default-capacity registry
    pub fn with_defaults() -> Self {
        Self::new(
            Box::new(MemfdHeapAllocator),
            Arc::new(AllocationRegistry::with_default_capacity()),
        )
    }

    /// The registry this allocator records into
    pub fn registry(&self) -> &Arc<AllocationRegistry> {
        &self.registry
    }

    /// Whether a buffer for this descriptor could be allocated. Checks
    /// well-formedness and layout derivation without any side effect.
    pub fn is_supported(&self, descriptor: &InternalDescriptor) -> bool {
        if descriptor.width == 0
            || descriptor.height == 0
            || descriptor.layer_count == 0
            || descriptor.format == 0
        {
            return false;
        }
        format::derive_layout(
            descriptor.width,
            descriptor.height,
            descriptor.layer_count,
            descriptor.format as u32,
        )
        .is_ok()
    }

    /// Allocate `count` buffers for one descriptor.
    ///
    /// Validation failures are detected before any side effect. A failure
    /// after the first buffer frees everything allocated so far; callers
    /// never see a partial batch.
    pub fn allocate(&self, descriptor: &InternalDescriptor, count: u32) -> Result<AllocationResult> {
        if descriptor.width == 0
            || descriptor.height == 0
            || descriptor.layer_count == 0
            || descriptor.format == 0
        {
            return Err(MonetError::bad_value(
                "descriptor",
                "width, height, layer_count and format must all be non-zero",
            ));
        }
        if count == 0 {
            return Err(MonetError::bad_value("count", "batch count must be non-zero"));
        }
        if descriptor.reserved_size > MAX_RESERVED_REGION_SIZE {
            error!(
                "requested reserved region size ({}) is larger than allowed ({})",
                descriptor.reserved_size, MAX_RESERVED_REGION_SIZE
            );
            return Err(MonetError::bad_value(
                "reserved_size",
                format!(
                    "{} exceeds the {} byte ceiling",
                    descriptor.reserved_size, MAX_RESERVED_REGION_SIZE
                ),
            ));
        }

        let mut descriptor = descriptor.clone();
        let layout = descriptor.derive()?.clone();

        let mut buffers: Vec<RawHandle> = Vec::with_capacity(count as usize);
        let mut stride = 0u32;

        for _ in 0..count {
            // Dropping the partial batch closes every fd allocated so far.
            let handle = match self.allocate_one(&descriptor, &layout) {
                Ok(handle) => handle,
                Err(e) => {
                    error!("buffer allocation failed, rolling back batch: {}", e);
                    return Err(e);
                }
            };

            // Stride must be the same for every buffer in the batch.
            if stride == 0 {
                stride = handle.pixel_stride;
            } else if stride != handle.pixel_stride {
                return Err(MonetError::unsupported(
                    "backend produced differing strides within one batch",
                ));
            }

            buffers.push(handle);
        }

        Ok(AllocationResult { stride, buffers })
    }

    fn allocate_one(
        &self,
        descriptor: &InternalDescriptor,
        layout: &format::DerivedLayout,
    ) -> Result<RawHandle> {
        let usage = descriptor.usage();
        let heap = heap::select_heap(usage);
        let data_fd = self
            .heap_allocator
            .alloc(heap.name, layout.alloc_size as usize, heap.flags)?;

        // The metadata region may come from any shared memory allocator;
        // it only has to be CPU-accessible and mappable by importers.
        let attr_size = shared_metadata_size() + descriptor.reserved_size as usize;
        let attr_fd = self
            .heap_allocator
            .alloc(heap::SYSTEM_HEAP_NAME, attr_size, heap::HEAP_FLAG_CACHED)?;

        let mut metadata =
            SharedMetadataRegion::map(&attr_fd, attr_size, descriptor.reserved_size as usize)?;
        metadata.init(&descriptor.name);
        metadata.set_dataspace(format::default_dataspace(descriptor.format as u32));

        let buffer_id = self.next_buffer_id.fetch_add(1, Ordering::Relaxed);

        let mut inodes = Vec::with_capacity(2);
        inodes.push(fd_inode(&data_fd));
        inodes.push(fd_inode(&attr_fd));

        self.registry.record(AllocationRecord {
            name: descriptor.name.clone(),
            buffer_id,
            inodes,
            format: descriptor.format,
            usage: descriptor.producer_usage,
            width: descriptor.width,
            height: descriptor.height,
        });

        debug!(
            "allocated buffer {} ({}x{} fmt {:#x}) from heap {}",
            buffer_id,
            descriptor.width,
            descriptor.height,
            descriptor.format,
            heap.name
        );

        // The allocator's mapping ends here; importers remap from the fd.
        drop(metadata);

        Ok(RawHandle {
            version: MAPPER_VERSION_SCALED,
            buffer_id,
            width: descriptor.width,
            height: descriptor.height,
            layer_count: descriptor.layer_count,
            format: descriptor.format as u32,
            alloc_format: layout.alloc_format,
            usage,
            pixel_stride: layout.pixel_stride,
            plane_info: layout.plane_info.clone(),
            alloc_size: layout.alloc_size,
            fds: vec![data_fd],
            attr_fd,
            attr_size,
            reserved_size: descriptor.reserved_size,
        })
    }
}

fn fd_inode<F: AsFd>(fd: &F) -> u64 {
    nix::sys::stat::fstat(fd.as_fd().as_raw_fd())
        .map(|stat| stat.st_ino)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::BufferDescriptor;
    use crate::format::pixel_format;

    fn internal(width: u32, height: u32, format: u32, reserved: u64) -> InternalDescriptor {
        InternalDescriptor::from_request(&BufferDescriptor {
            width,
            height,
            layer_count: 1,
            format,
            usage: crate::usage::CPU_USAGE_OFTEN,
            reserved_size: reserved,
            name: "alloc-test".to_string(),
        })
    }

    #[test]
    fn test_allocate_single() {
        let allocator = Allocator::with_defaults();
        let result = allocator
            .allocate(&internal(320, 240, pixel_format::RGBA_8888, 0), 1)
            .unwrap();
        assert_eq!(result.buffers.len(), 1);
        assert_eq!(result.stride, 320);
        assert_eq!(allocator.registry().total_allocated(), 1);
    }

    #[test]
    fn test_reserved_region_ceiling() {
        let allocator = Allocator::with_defaults();
        let over = internal(64, 64, pixel_format::RGBA_8888, 9 * 1024 * 1024);
        let err = allocator.allocate(&over, 1).unwrap_err();
        assert!(matches!(err, MonetError::BadValue { .. }));
        assert_eq!(allocator.registry().total_allocated(), 0);

        let under = internal(64, 64, pixel_format::RGBA_8888, 1024);
        let result = allocator.allocate(&under, 1).unwrap();
        assert_eq!(result.buffers[0].reserved_size, 1024);
    }

    #[test]
    fn test_invalid_descriptor_rejected_early() {
        let allocator = Allocator::with_defaults();
        let err = allocator
            .allocate(&internal(0, 240, pixel_format::RGBA_8888, 0), 1)
            .unwrap_err();
        assert!(matches!(err, MonetError::BadValue { .. }));
    }

    #[test]
    fn test_unknown_format_is_unsupported_query() {
        let allocator = Allocator::with_defaults();
        assert!(!allocator.is_supported(&internal(64, 64, 0xdead, 0)));
        assert!(allocator.is_supported(&internal(64, 64, pixel_format::YV12, 0)));
    }

    #[test]
    fn test_batch_allocation_shares_stride() {
        let allocator = Allocator::with_defaults();
        let result = allocator
            .allocate(&internal(100, 100, pixel_format::RGB_565, 0), 3)
            .unwrap();
        assert_eq!(result.buffers.len(), 3);
        assert!(result.buffers.iter().all(|b| b.pixel_stride == result.stride));
        assert_eq!(allocator.registry().total_allocated(), 3);
    }

    struct FailingAfter {
        remaining: std::sync::atomic::AtomicU32,
        inner: MemfdHeapAllocator,
    }

    impl HeapAllocator for FailingAfter {
        fn alloc(&self, heap_name: &str, size: usize, flags: u32) -> Result<std::os::fd::OwnedFd> {
            if self.remaining.fetch_sub(1, Ordering::SeqCst) == 0 {
                return Err(MonetError::no_resources("injected failure"));
            }
            self.inner.alloc(heap_name, size, flags)
        }
    }

    #[test]
    fn test_partial_batch_rolls_back() {
        // Each buffer takes two backend allocations (data + metadata);
        // fail on the fifth call, inside the third buffer.
        let backend = FailingAfter {
            remaining: std::sync::atomic::AtomicU32::new(4),
            inner: MemfdHeapAllocator,
        };
        let allocator = Allocator::new(
            Box::new(backend),
            Arc::new(AllocationRegistry::new(16).unwrap()),
        );

        let err = allocator
            .allocate(&internal(64, 64, pixel_format::RGBA_8888, 0), 4)
            .unwrap_err();
        assert!(matches!(err, MonetError::NoResources { .. }));
    }
}
