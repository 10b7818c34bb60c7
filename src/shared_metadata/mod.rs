//! Shared metadata region attached to every allocated buffer
//!
//! The region is a small out-of-band memory block mapped by every process
//! that imports the buffer. It has a fixed-offset `#[repr(C)]` layout: the
//! standard fields below, followed by an opaque client-reserved byte range
//! the core never interprets.
//!
//! There is no cross-process synchronization over the region by protocol
//! contract: concurrent writers from different processes are not ordered
//! relative to each other and the last write wins. This is an accepted
//! race, not an oversight.

pub mod types;

use std::os::fd::{AsFd, AsRawFd, RawFd};

use memmap2::{MmapMut, MmapOptions};

use crate::error::{MonetError, Result};

pub use types::{
    AlignedOptional, BlendMode, Cta861_3, Dataspace, MetadataName, Rect, Smpte2086, Smpte2094_40,
    XyColor, METADATA_NAME_MAX, SMPTE2094_40_MAX,
};

/// Fixed-offset layout of the standard metadata fields.
///
/// Field order is part of the cross-process protocol; reordering requires
/// every importer to be updated in lockstep.
#[repr(C)]
pub struct SharedMetadata {
    name: MetadataName,
    crop: AlignedOptional<Rect>,
    dataspace: AlignedOptional<Dataspace>,
    blend_mode: AlignedOptional<BlendMode>,
    smpte2086: AlignedOptional<Smpte2086>,
    cta861_3: AlignedOptional<Cta861_3>,
    smpte2094_40: AlignedOptional<Smpte2094_40>,
}

/// Byte size of the fixed metadata block; the reserved region starts at
/// this offset within the mapping.
pub fn shared_metadata_size() -> usize {
    std::mem::size_of::<SharedMetadata>()
}

/// A mapped view of one buffer's metadata region.
///
/// All accessors take `&self`: the mapping is shared memory that other
/// processes mutate concurrently, so exclusive references would promise
/// more than the protocol can deliver.
pub struct SharedMetadataRegion {
    mmap: MmapMut,
    meta: *mut SharedMetadata,
    reserved_size: usize,
    fd: RawFd,
}

impl SharedMetadataRegion {
    /// Map a metadata region from its backing fd.
    ///
    /// `attr_size` is the full region size; it must cover the fixed block
    /// plus `reserved_size`.
    pub fn map<F: AsFd>(fd: &F, attr_size: usize, reserved_size: usize) -> Result<Self> {
        if attr_size < shared_metadata_size() + reserved_size {
            return Err(MonetError::bad_buffer(format!(
                "metadata region too small: {} < {} + {}",
                attr_size,
                shared_metadata_size(),
                reserved_size
            )));
        }

        let mmap = unsafe {
            MmapOptions::new()
                .len(attr_size)
                .map_mut(fd.as_fd().as_raw_fd())
                .map_err(|e| MonetError::bad_buffer(format!("failed to map metadata region: {}", e)))?
        };
        let meta = mmap.as_ptr() as *mut SharedMetadata;

        Ok(Self {
            mmap,
            meta,
            reserved_size,
            fd: fd.as_fd().as_raw_fd(),
        })
    }

    /// Zero-fill the whole region and populate the name. Called exactly
    /// once, at allocation time; importers must never re-init.
    pub fn init(&mut self, name: &str) {
        self.mmap.fill(0);
        unsafe {
            (*self.meta).name.set(name);
        }
    }

    pub fn name(&self) -> String {
        unsafe { (*self.meta).name.get() }
    }

    pub fn dataspace(&self) -> Option<Dataspace> {
        unsafe { (*self.meta).dataspace.to_option() }
    }

    pub fn set_dataspace(&self, dataspace: Dataspace) {
        unsafe { (*self.meta).dataspace.set(dataspace) }
    }

    pub fn blend_mode(&self) -> Option<BlendMode> {
        unsafe { (*self.meta).blend_mode.to_option() }
    }

    pub fn set_blend_mode(&self, mode: BlendMode) {
        unsafe { (*self.meta).blend_mode.set(mode) }
    }

    pub fn crop(&self) -> Option<Rect> {
        unsafe { (*self.meta).crop.to_option() }
    }

    pub fn set_crop(&self, rect: Rect) {
        unsafe { (*self.meta).crop.set(rect) }
    }

    pub fn smpte2086(&self) -> Option<Smpte2086> {
        unsafe { (*self.meta).smpte2086.to_option() }
    }

    pub fn set_smpte2086(&self, value: Option<Smpte2086>) {
        unsafe {
            match value {
                Some(v) => (*self.meta).smpte2086.set(v),
                None => (*self.meta).smpte2086.clear(),
            }
        }
    }

    pub fn cta861_3(&self) -> Option<Cta861_3> {
        unsafe { (*self.meta).cta861_3.to_option() }
    }

    pub fn set_cta861_3(&self, value: Option<Cta861_3>) {
        unsafe {
            match value {
                Some(v) => (*self.meta).cta861_3.set(v),
                None => (*self.meta).cta861_3.clear(),
            }
        }
    }

    pub fn smpte2094_40(&self) -> Option<Vec<u8>> {
        unsafe {
            (*self.meta)
                .smpte2094_40
                .to_option()
                .map(|blob| blob.as_slice().to_vec())
        }
    }

    /// Store a dynamic-HDR blob; `Unsupported` when it exceeds the inline
    /// capacity.
    pub fn set_smpte2094_40(&self, payload: Option<&[u8]>) -> Result<()> {
        unsafe {
            match payload {
                Some(bytes) => {
                    let blob = Smpte2094_40::from_slice(bytes).ok_or_else(|| {
                        MonetError::unsupported(format!(
                            "SMPTE 2094-40 blob of {} bytes exceeds capacity {}",
                            bytes.len(),
                            SMPTE2094_40_MAX
                        ))
                    })?;
                    (*self.meta).smpte2094_40.set(blob);
                }
                None => (*self.meta).smpte2094_40.clear(),
            }
        }
        Ok(())
    }

    /// The client-reserved byte range immediately after the fixed fields.
    /// `None` when the buffer was allocated without one.
    pub fn reserved_region(&self) -> Option<(std::ptr::NonNull<u8>, usize)> {
        if self.reserved_size == 0 {
            return None;
        }
        let ptr = unsafe { self.mmap.as_ptr().add(shared_metadata_size()) as *mut u8 };
        std::ptr::NonNull::new(ptr).map(|nn| (nn, self.reserved_size))
    }

    pub fn reserved_size(&self) -> usize {
        self.reserved_size
    }

    /// Total mapped size of the region
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.len() == 0
    }

    /// The backing fd this region was mapped from
    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

// The mapping is shared cross-process memory; in-process sharing through
// Arc adds no hazard the protocol does not already carry.
unsafe impl Send for SharedMetadataRegion {}
unsafe impl Sync for SharedMetadataRegion {}
