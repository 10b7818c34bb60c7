//! Raw buffer handles
//!
//! A `RawHandle` is the allocator's output: the kernel resources backing a
//! buffer (plane fds plus the metadata region fd) together with the
//! immutable attributes stamped at allocation time. It is the unit that
//! crosses process boundaries; consumers import it through the mapper,
//! which clones the fds and registers the clone.

use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};

use nix::unistd::dup;
use parking_lot::Mutex;

use crate::descriptor::MAPPER_VERSION_SCALED;
use crate::error::{MonetError, Result};
use crate::format::PlaneInfo;

/// Transport representation of a buffer: fds plus immutable attributes.
#[derive(Debug)]
pub struct RawHandle {
    /// Version stamp of the protocol that produced this handle
    pub version: u32,
    /// Process-wide unique logical buffer id
    pub buffer_id: u64,
    pub width: u32,
    pub height: u32,
    pub layer_count: u32,
    /// Requested pixel format id
    pub format: u32,
    /// Internal allocation format
    pub alloc_format: u64,
    /// Combined usage bits
    pub usage: u64,
    /// Pixel stride of plane 0
    pub pixel_stride: u32,
    /// Per-plane layout within the backing allocation
    pub plane_info: Vec<PlaneInfo>,
    /// Byte size of the backing allocation
    pub alloc_size: u64,
    /// Backing allocation fds, one per physically distinct allocation
    pub fds: Vec<OwnedFd>,
    /// Metadata region fd
    pub attr_fd: OwnedFd,
    /// Total metadata region size (fixed block + reserved region)
    pub attr_size: usize,
    /// Client reserved region size requested at allocation
    pub reserved_size: u64,
}

impl RawHandle {
    /// Integer words occupied by the scalar attributes when the handle is
    /// flattened for transport.
    const TRANSPORT_INT_FIELDS: u32 = 16;

    /// Check structural integrity before any use. A handle that fails here
    /// is corrupted or was produced by an incompatible protocol version.
    pub fn validate(&self) -> Result<()> {
        if self.version != MAPPER_VERSION_SCALED {
            return Err(MonetError::bad_buffer(format!(
                "handle version {} does not match {}",
                self.version, MAPPER_VERSION_SCALED
            )));
        }
        if self.fds.is_empty() {
            return Err(MonetError::bad_buffer("handle carries no backing fds"));
        }
        if self.plane_info.is_empty() {
            return Err(MonetError::bad_buffer("handle carries no plane layout"));
        }
        if self.width == 0 || self.height == 0 || self.layer_count == 0 {
            return Err(MonetError::bad_buffer("handle has zero dimensions"));
        }
        Ok(())
    }

    /// Duplicate every fd, producing an independently-owned handle. This is
    /// the import path's cloning step; failure to dup is resource
    /// exhaustion, not corruption.
    pub fn try_clone(&self) -> Result<RawHandle> {
        let mut fds = Vec::with_capacity(self.fds.len());
        for fd in &self.fds {
            fds.push(dup_owned(fd)?);
        }
        let attr_fd = dup_owned(&self.attr_fd)?;

        Ok(RawHandle {
            version: self.version,
            buffer_id: self.buffer_id,
            width: self.width,
            height: self.height,
            layer_count: self.layer_count,
            format: self.format,
            alloc_format: self.alloc_format,
            usage: self.usage,
            pixel_stride: self.pixel_stride,
            plane_info: self.plane_info.clone(),
            alloc_size: self.alloc_size,
            fds,
            attr_fd,
            attr_size: self.attr_size,
            reserved_size: self.reserved_size,
        })
    }

    /// Transport size of this handle: fd count and integer word count.
    pub fn transport_size(&self) -> (u32, u32) {
        let num_fds = self.fds.len() as u32 + 1; // + metadata fd
        let num_ints = Self::TRANSPORT_INT_FIELDS + self.plane_info.len() as u32 * 12;
        (num_fds, num_ints)
    }
}

fn dup_owned<F: AsFd>(fd: &F) -> Result<OwnedFd> {
    dup(fd.as_fd().as_raw_fd())
        .map_err(|e| MonetError::no_resources(format!("failed to duplicate fd: {}", e)))
        .map(|raw| unsafe { OwnedFd::from_raw_fd(raw) })
}

/// A buffer imported into this process: the cloned handle, the mapped
/// metadata region, and the CPU lock state.
///
/// The identity of an imported buffer is its metadata fd — each import
/// clones the fds, so the fd number is unique among live imports in this
/// process.
pub struct ImportedHandle {
    raw: RawHandle,
    metadata: crate::shared_metadata::SharedMetadataRegion,
    cpu_read: AtomicBool,
    cpu_write: AtomicBool,
    data_map: Mutex<Option<memmap2::MmapMut>>,
}

impl ImportedHandle {
    pub fn new(raw: RawHandle, metadata: crate::shared_metadata::SharedMetadataRegion) -> Self {
        Self {
            raw,
            metadata,
            cpu_read: AtomicBool::new(false),
            cpu_write: AtomicBool::new(false),
            data_map: Mutex::new(None),
        }
    }

    /// Process-local identity of this import
    pub fn key(&self) -> std::os::fd::RawFd {
        self.raw.attr_fd.as_raw_fd()
    }

    pub fn raw(&self) -> &RawHandle {
        &self.raw
    }

    pub fn metadata(&self) -> &crate::shared_metadata::SharedMetadataRegion {
        &self.metadata
    }

    pub fn is_locked(&self) -> bool {
        self.cpu_read.load(Ordering::Acquire) || self.cpu_write.load(Ordering::Acquire)
    }

    /// Map the backing allocation and mark the buffer CPU-locked.
    ///
    /// Simultaneous write locks are tolerated the way the platform
    /// tolerates them: the second lock simply observes the same mapping.
    pub fn lock_cpu(&self, read: bool, write: bool) -> Result<std::ptr::NonNull<u8>> {
        let mut map = self.data_map.lock();
        if map.is_none() {
            let mmap = unsafe {
                memmap2::MmapOptions::new()
                    .len(self.raw.alloc_size as usize)
                    .map_mut(self.raw.fds[0].as_fd().as_raw_fd())
                    .map_err(|e| {
                        MonetError::bad_value("buffer", format!("failed to map buffer data: {}", e))
                    })?
            };
            *map = Some(mmap);
        }
        self.cpu_read.fetch_or(read, Ordering::AcqRel);
        self.cpu_write.fetch_or(write, Ordering::AcqRel);

        let ptr = map.as_mut().unwrap().as_mut_ptr();
        Ok(std::ptr::NonNull::new(ptr).expect("mmap returned a null pointer"))
    }

    /// Clear the CPU lock state. The data mapping is kept for the lifetime
    /// of the import so repeated lock/unlock cycles stay cheap.
    pub fn unlock_cpu(&self) -> Result<()> {
        if !self.is_locked() {
            return Err(MonetError::bad_buffer("buffer is not locked"));
        }
        self.cpu_read.store(false, Ordering::Release);
        self.cpu_write.store(false, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for ImportedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportedHandle")
            .field("buffer_id", &self.raw.buffer_id)
            .field("key", &self.key())
            .field("locked", &self.is_locked())
            .finish()
    }
}
