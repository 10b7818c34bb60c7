//! Mapper front-end: the consumer side of the buffer lifecycle
//!
//! A consumer imports a raw handle, reads and writes metadata, locks the
//! buffer for CPU access, and finally frees it. The mapper owns the
//! process-local registered handle pool and the vendor metadata handler
//! table; it is an explicit service object the embedder constructs once
//! and injects, never ambient global state.

pub mod metadata;

use std::collections::HashMap;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::ptr::NonNull;
use std::sync::Arc;

use log::{error, warn};

use crate::descriptor::BufferDescriptor;
use crate::error::{MonetError, Result};
use crate::format;
use crate::handle::{ImportedHandle, RawHandle};
use crate::handle_pool::RegisteredHandlePool;
use crate::shared_metadata::{Rect, SharedMetadataRegion};
use crate::usage::BufferUsage;

pub use metadata::{
    get_from_descriptor, BufferDump, MetadataDump, MetadataType, MetadataTypeDescription,
    PlaneFdsMetadata, StandardMetadataType, VendorMetadata, MONET_METADATA_TYPE_NAME,
    MONET_PLANE_FDS, STANDARD_METADATA_TYPE_NAME,
};

/// Process-local key of an imported buffer, handed back from
/// `import_buffer` and accepted by every other operation.
pub type BufferKey = RawFd;

/// The mapper service
pub struct Mapper {
    pool: RegisteredHandlePool,
    vendor: HashMap<&'static str, Box<dyn VendorMetadata>>,
}

impl Mapper {
    /// A mapper with the built-in vendor handler table
    pub fn new() -> Self {
        let mut vendor: HashMap<&'static str, Box<dyn VendorMetadata>> = HashMap::new();
        let plane_fds = PlaneFdsMetadata;
        vendor.insert(VendorMetadata::namespace(&plane_fds), Box::new(plane_fds));
        Self {
            pool: RegisteredHandlePool::new(),
            vendor,
        }
    }

    /// Register an additional vendor metadata namespace
    pub fn register_vendor_metadata(&mut self, handler: Box<dyn VendorMetadata>) {
        self.vendor.insert(handler.namespace(), handler);
    }

    /// The registered handle pool, exposed for diagnostics
    pub fn pool(&self) -> &RegisteredHandlePool {
        &self.pool
    }

    /// Import a raw handle: clone its fds, map the metadata region and
    /// register the clone. The caller's handle is untouched.
    pub fn import_buffer(&self, raw: &RawHandle) -> Result<BufferKey> {
        if let Err(e) = raw.validate() {
            warn!("buffer {} is corrupted: {}", raw.buffer_id, e);
            return Err(e);
        }

        let clone = raw.try_clone()?;
        let region = SharedMetadataRegion::map(
            &clone.attr_fd,
            clone.attr_size,
            clone.reserved_size as usize,
        )?;

        let imported = Arc::new(ImportedHandle::new(clone, region));
        let key = imported.key();
        if !self.pool.add(imported) {
            // Only reachable when a previously registered handle was torn
            // down outside free_buffer and its fd number was reused.
            error!(
                "handle {} has already been imported; potential fd leaking",
                key
            );
            return Err(MonetError::no_resources(
                "raw handle identity is already registered",
            ));
        }

        Ok(key)
    }

    /// Free an imported buffer, releasing its fds and unmapping its
    /// metadata region. The only release path the pool recognizes.
    pub fn free_buffer(&self, key: BufferKey) -> Result<()> {
        match self.pool.remove(key) {
            Some(handle) => {
                drop(handle);
                Ok(())
            }
            None => {
                error!("invalid buffer key {} to free_buffer", key);
                Err(MonetError::bad_buffer(format!(
                    "buffer {} is not registered",
                    key
                )))
            }
        }
    }

    fn imported(&self, key: BufferKey) -> Result<Arc<ImportedHandle>> {
        self.pool.get(key).ok_or_else(|| {
            MonetError::bad_buffer(format!("buffer {} has not been registered", key))
        })
    }

    /// Lock a buffer for CPU access and return the data pointer.
    ///
    /// The acquire fence is duplicated — dup failure is `NoResources` —
    /// and owned from here on; waiting on it is the platform's concern.
    pub fn lock(
        &self,
        key: BufferKey,
        cpu_usage: u64,
        access_region: Rect,
        acquire_fence: Option<RawFd>,
    ) -> Result<NonNull<u8>> {
        // Dup first: the fence is owned by the mapper from this point,
        // even when locking fails afterwards.
        let _fence: Option<OwnedFd> = match acquire_fence {
            Some(fd) if fd >= 0 => {
                let duped = nix::unistd::dup(fd).map_err(|e| {
                    error!("failed to duplicate acquire fence: {}", e);
                    MonetError::no_resources("failed to duplicate fence fd")
                })?;
                Some(unsafe { OwnedFd::from_raw_fd(duped) })
            }
            _ => None,
        };

        let handle = self.imported(key).map_err(|_| {
            MonetError::bad_buffer(format!("buffer to lock {} is not imported", key))
        })?;
        let raw = handle.raw();

        let read = cpu_usage & BufferUsage::CPU_READ_MASK.bits() != 0;
        let write = cpu_usage & BufferUsage::CPU_WRITE_MASK.bits() != 0;
        if !read && !write {
            return Err(MonetError::bad_value(
                "cpu_usage",
                "lock requires CPU read or write usage",
            ));
        }

        let in_bounds = access_region.left >= 0
            && access_region.top >= 0
            && access_region.left <= access_region.right
            && access_region.top <= access_region.bottom
            && access_region.right <= raw.width as i32
            && access_region.bottom <= raw.height as i32;
        if !in_bounds {
            return Err(MonetError::bad_value(
                "access_region",
                "region exceeds buffer bounds",
            ));
        }

        handle.lock_cpu(read, write)
    }

    /// Unlock a buffer. There is no release fence: all CPU work is done
    /// synchronously within the lock window.
    pub fn unlock(&self, key: BufferKey) -> Result<Option<OwnedFd>> {
        let handle = self.imported(key).map_err(|_| {
            error!("buffer to unlock {} has not been registered", key);
            MonetError::bad_buffer(format!("buffer {} has not been registered", key))
        })?;
        handle.unlock_cpu()?;
        Ok(None)
    }

    /// Flush CPU writes of a locked buffer towards memory
    pub fn flush_locked(&self, key: BufferKey) -> Result<()> {
        let handle = self.imported(key)?;
        if !handle.is_locked() {
            return Err(MonetError::bad_buffer(
                "flush_locked called on an unlocked buffer",
            ));
        }
        // Cache maintenance is delegated to the backing allocator; the
        // memfd backend is cache-coherent.
        Ok(())
    }

    /// Invalidate CPU caches of a locked buffer before re-reading
    pub fn reread_locked(&self, key: BufferKey) -> Result<()> {
        let handle = self.imported(key)?;
        if !handle.is_locked() {
            return Err(MonetError::bad_buffer(
                "reread_locked called on an unlocked buffer",
            ));
        }
        Ok(())
    }

    /// Read a metadata field of an imported buffer
    pub fn get(&self, key: BufferKey, ty: &MetadataType) -> Result<Vec<u8>> {
        let handle = self.imported(key)?;
        if ty.is_standard() {
            let standard = StandardMetadataType::from_value(ty.value).ok_or_else(|| {
                MonetError::unsupported(format!("unknown standard metadata id {}", ty.value))
            })?;
            metadata::get_standard_metadata(&handle, standard)
        } else {
            let handler = self.vendor.get(ty.name.as_str()).ok_or_else(|| {
                MonetError::unsupported(format!("unknown metadata namespace {}", ty.name))
            })?;
            handler.get(&handle, ty.value)
        }
    }

    /// Write a metadata field of an imported buffer
    pub fn set(&self, key: BufferKey, ty: &MetadataType, bytes: &[u8]) -> Result<()> {
        let handle = self.imported(key)?;
        if ty.is_standard() {
            let standard = StandardMetadataType::from_value(ty.value).ok_or_else(|| {
                MonetError::unsupported(format!("unknown standard metadata id {}", ty.value))
            })?;
            metadata::set_standard_metadata(&handle, standard, bytes)
        } else {
            let handler = self.vendor.get(ty.name.as_str()).ok_or_else(|| {
                MonetError::unsupported(format!("unknown metadata namespace {}", ty.name))
            })?;
            handler.set(&handle, ty.value, bytes)
        }
    }

    /// Every metadata type this mapper supports. Standard entries carry an
    /// empty description.
    pub fn list_supported_metadata_types(&self) -> Vec<MetadataTypeDescription> {
        let mut out: Vec<MetadataTypeDescription> = StandardMetadataType::ALL
            .iter()
            .map(|&ty| MetadataTypeDescription {
                metadata_type: MetadataType::standard(ty),
                description: "",
                is_gettable: true,
                is_settable: ty.is_settable(),
            })
            .collect();
        for handler in self.vendor.values() {
            out.extend(handler.describe());
        }
        out
    }

    fn dump_one(handle: &ImportedHandle) -> BufferDump {
        let mut dumps = Vec::with_capacity(StandardMetadataType::DUMPABLE.len());
        for &ty in StandardMetadataType::DUMPABLE.iter() {
            match metadata::get_standard_metadata(handle, ty) {
                Ok(bytes) => dumps.push(MetadataDump {
                    metadata_type: MetadataType::standard(ty),
                    metadata: bytes,
                }),
                // Best effort: a single failed read aborts to an empty
                // dump rather than yielding a partial one.
                Err(_) => return BufferDump::default(),
            }
        }
        BufferDump { metadata: dumps }
    }

    /// Dump every standard metadata field of one buffer
    pub fn dump_buffer(&self, key: BufferKey) -> Result<BufferDump> {
        let handle = self.imported(key)?;
        Ok(Self::dump_one(&handle))
    }

    /// Dump the metadata of every buffer imported into this process
    pub fn dump_buffers(&self) -> Vec<BufferDump> {
        let mut dumps = Vec::new();
        self.pool.for_each(|handle| {
            dumps.push(Self::dump_one(handle));
        });
        dumps
    }

    /// The client reserved region of a buffer. Only accessible between
    /// import and free; `BadBuffer` when none was requested.
    pub fn get_reserved_region(&self, key: BufferKey) -> Result<(NonNull<u8>, u64)> {
        let handle = self.imported(key)?;
        if handle.raw().reserved_size == 0 {
            return Err(MonetError::bad_buffer(format!(
                "buffer {} has no reserved region",
                key
            )));
        }
        let (ptr, size) = handle
            .metadata()
            .reserved_region()
            .ok_or_else(|| MonetError::bad_buffer("metadata region lost its reserved range"))?;
        Ok((ptr, size as u64))
    }

    /// Fd and integer counts needed to flatten the handle for transport
    pub fn get_transport_size(&self, key: BufferKey) -> Result<(u32, u32)> {
        let handle = self.imported(key)?;
        Ok(handle.raw().transport_size())
    }

    /// Whether a buffer for this descriptor could be allocated
    pub fn is_supported(&self, descriptor: &BufferDescriptor) -> bool {
        if !descriptor.validate() {
            return false;
        }
        format::derive_layout(
            descriptor.width,
            descriptor.height,
            descriptor.layer_count,
            descriptor.format,
        )
        .is_ok()
    }

    /// Validate an imported buffer against the descriptor it is claimed to
    /// satisfy. The buffer must be at least as large as a fresh allocation
    /// for the descriptor would be, with matching layout.
    pub fn validate_buffer_size(
        &self,
        key: BufferKey,
        descriptor: &BufferDescriptor,
        in_stride: u32,
    ) -> Result<()> {
        let handle = self.imported(key)?;
        let raw = handle.raw();

        let layout = format::derive_layout(
            descriptor.width,
            descriptor.height,
            descriptor.layer_count,
            descriptor.format,
        )
        .map_err(|_| {
            MonetError::bad_value("descriptor", "unable to derive layout for the descriptor")
        })?;

        if raw.alloc_size < layout.alloc_size {
            warn!(
                "buffer size mismatch: buffer {} < derived {}",
                raw.alloc_size, layout.alloc_size
            );
            return Err(MonetError::bad_value(
                "descriptor",
                "buffer is smaller than the descriptor requires",
            ));
        }
        if in_stride != 0 && raw.pixel_stride != in_stride {
            return Err(MonetError::bad_value(
                "stride",
                format!("expected {}, buffer has {}", in_stride, raw.pixel_stride),
            ));
        }
        if raw.alloc_format != layout.alloc_format {
            return Err(MonetError::bad_value(
                "format",
                format!(
                    "buffer format {:#x} does not match derived {:#x}",
                    raw.alloc_format, layout.alloc_format
                ),
            ));
        }
        for (idx, (have, want)) in raw.plane_info.iter().zip(layout.plane_info.iter()).enumerate()
        {
            if have.byte_stride != want.byte_stride
                || have.alloc_width != want.alloc_width
                || have.alloc_height != want.alloc_height
            {
                return Err(MonetError::bad_value(
                    "plane_info",
                    format!("plane {} layout does not match the descriptor", idx),
                ));
            }
        }
        if raw.width != descriptor.width
            || raw.height != descriptor.height
            || raw.layer_count != descriptor.layer_count
        {
            return Err(MonetError::bad_value(
                "dimensions",
                "buffer dimensions do not match the descriptor",
            ));
        }

        Ok(())
    }
}

impl Default for Mapper {
    fn default() -> Self {
        Self::new()
    }
}
