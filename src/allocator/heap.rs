//! Named-heap policy table and the physical allocation interface
//!
//! Heap choice is policy, not core: the table below maps usage patterns to
//! a named kernel memory pool and allocation flags, and the `HeapAllocator`
//! trait is the seam a platform backend plugs into. The built-in
//! `MemfdHeapAllocator` services every heap name from anonymous memory so
//! the crate is exercisable without kernel DMA-BUF heaps.

use std::ffi::CString;
use std::os::fd::OwnedFd;

use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use nix::unistd::ftruncate;

use crate::error::{MonetError, Result};
use crate::usage::{is_cpu_accessible, BufferUsage};

pub const SYSTEM_HEAP_NAME: &str = "system";
pub const SENSOR_DIRECT_HEAP_NAME: &str = "sensor_direct_heap";
pub const VFRAME_SECURE_HEAP_NAME: &str = "vframe-secure";
pub const VSTREAM_SECURE_HEAP_NAME: &str = "vstream-secure";

/// Allocation attribute flags passed through to the backend
pub const HEAP_FLAG_CACHED: u32 = 1 << 0;
pub const HEAP_FLAG_PROTECTED: u32 = 1 << 1;

/// One row of the usage-to-heap policy table
#[derive(Debug, Clone, Copy)]
pub struct HeapSpecifier {
    /// Usage bits that select this heap when all are present
    pub usage_bits: u64,
    /// When set, the row matches only if the usage equals the bits exactly
    pub exact: bool,
    pub name: &'static str,
    pub flags: u32,
}

const HEAP_TABLE: &[HeapSpecifier] = &[
    HeapSpecifier {
        usage_bits: BufferUsage::SENSOR_DIRECT_DATA.bits(),
        exact: true,
        name: SENSOR_DIRECT_HEAP_NAME,
        flags: 0,
    },
    HeapSpecifier {
        usage_bits: BufferUsage::PROTECTED.bits() | BufferUsage::VIDEO_DECODER.bits(),
        exact: false,
        name: VSTREAM_SECURE_HEAP_NAME,
        flags: HEAP_FLAG_PROTECTED,
    },
    HeapSpecifier {
        usage_bits: BufferUsage::PROTECTED.bits(),
        exact: false,
        name: VFRAME_SECURE_HEAP_NAME,
        flags: HEAP_FLAG_PROTECTED,
    },
];

/// Pick the heap for a combined usage mask. Falls through to the system
/// heap, cached when the CPU touches the buffer.
pub fn select_heap(usage: u64) -> HeapSpecifier {
    for spec in HEAP_TABLE {
        let matches = if spec.exact {
            usage == spec.usage_bits
        } else {
            usage & spec.usage_bits == spec.usage_bits
        };
        if matches {
            return *spec;
        }
    }

    HeapSpecifier {
        usage_bits: 0,
        exact: false,
        name: SYSTEM_HEAP_NAME,
        flags: if is_cpu_accessible(usage) {
            HEAP_FLAG_CACHED
        } else {
            0
        },
    }
}

/// The physical allocation backend consumed by the allocator front-end
pub trait HeapAllocator: Send + Sync {
    /// Allocate `size` bytes from the named heap, returning the backing fd
    fn alloc(&self, heap_name: &str, size: usize, flags: u32) -> Result<OwnedFd>;
}

/// Anonymous-memory backend used for tests, demos and platforms without
/// dedicated heaps. Heap names and flags only affect the memfd label.
#[derive(Debug, Default)]
pub struct MemfdHeapAllocator;

impl HeapAllocator for MemfdHeapAllocator {
    fn alloc(&self, heap_name: &str, size: usize, flags: u32) -> Result<OwnedFd> {
        if size == 0 {
            return Err(MonetError::bad_value("size", "allocation size must be non-zero"));
        }
        let label = CString::new(format!("monet:{}:{:x}", heap_name, flags))
            .map_err(|_| MonetError::bad_value("heap_name", "heap name contains null bytes"))?;

        let fd = memfd_create(&label, MemFdCreateFlag::MFD_CLOEXEC)
            .map_err(|e| MonetError::no_resources(format!("memfd_create failed: {}", e)))?;
        ftruncate(&fd, size as i64)
            .map_err(|e| MonetError::no_resources(format!("failed to size memfd: {}", e)))?;

        Ok(fd)
    }
}
