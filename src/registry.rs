//! Allocation registry: a bounded telemetry ring of every buffer ever
//! allocated in this process
//!
//! The registry is diagnostic only. Records are overwritten once the ring
//! wraps and are never synchronized with buffer lifetime — a record may
//! outlive the buffer it describes.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::error::{MonetError, Result};

/// Bounded wait for the diagnostic dump's lock acquisition. Diagnostics
/// must never stall allocation-path progress.
pub const DUMP_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// Default ring capacity; must be a power of two
pub const DEFAULT_REGISTRY_CAPACITY: usize = 2048;

/// One allocation event
#[derive(Debug, Clone, Serialize)]
pub struct AllocationRecord {
    pub name: String,
    pub buffer_id: u64,
    /// Inode numbers of the backing fds, metadata fd included
    pub inodes: Vec<u64>,
    pub format: u64,
    pub usage: u64,
    pub width: u32,
    pub height: u32,
}

/// Fixed-capacity overwrite-on-wrap ring of allocation records.
///
/// Writers take the shared side of the outer lock, so concurrent
/// allocations never serialize against each other; each slot carries its
/// own mutex so a slot write is published atomically with respect to the
/// dumping reader, which takes the exclusive side with a bounded wait.
pub struct AllocationRegistry {
    slots: Vec<Mutex<Option<AllocationRecord>>>,
    mask: usize,
    next_idx: AtomicUsize,
    total_allocated: AtomicU64,
    gate: RwLock<()>,
}

impl AllocationRegistry {
    /// Create a registry with the given slot count
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(MonetError::bad_value(
                "capacity",
                "registry capacity must be a power of 2 and greater than 0",
            ));
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Mutex::new(None));

        Ok(Self {
            slots,
            mask: capacity - 1,
            next_idx: AtomicUsize::new(0),
            total_allocated: AtomicU64::new(0),
            gate: RwLock::new(()),
        })
    }

    pub fn with_default_capacity() -> Self {
        // DEFAULT_REGISTRY_CAPACITY is a power of two by construction
        Self::new(DEFAULT_REGISTRY_CAPACITY).unwrap()
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Total allocations ever recorded, monotonically increasing
    pub fn total_allocated(&self) -> u64 {
        self.total_allocated.load(Ordering::Acquire)
    }

    /// Record an allocation event. Never blocks on other writers beyond
    /// the per-slot critical section.
    pub fn record(&self, record: AllocationRecord) {
        let _shared = self.gate.read();
        // The atomic index has no rounding, it overflows; masking keeps it
        // in range because the capacity is a power of two.
        let idx = self.next_idx.fetch_add(1, Ordering::Relaxed) & self.mask;
        *self.slots[idx].lock() = Some(record);
        self.total_allocated.fetch_add(1, Ordering::Release);
    }

    /// Render every live record, one line each.
    ///
    /// Takes the exclusive side of the gate with a bounded wait; on timeout
    /// the dump returns an empty string rather than blocking allocators.
    /// Before the first wrap the output is complete and in allocation
    /// order; after wrapping it reflects whichever entries currently occupy
    /// the ring.
    pub fn dump(&self) -> String {
        let guard = match self.gate.try_write_for(DUMP_LOCK_TIMEOUT) {
            Some(guard) => guard,
            None => return String::new(),
        };

        let live = self
            .total_allocated
            .load(Ordering::Acquire)
            .min(self.capacity() as u64) as usize;

        let mut out = String::new();
        for slot in self.slots.iter().take(live) {
            let slot = slot.lock();
            let Some(record) = slot.as_ref() else {
                continue;
            };
            write!(out, "buffer_id: {}, inodes: ", record.buffer_id).unwrap();
            for (idx, inode) in record.inodes.iter().enumerate() {
                if idx != 0 {
                    out.push(',');
                }
                write!(out, "{}", inode).unwrap();
            }
            writeln!(
                out,
                ", format: 0x{:x}, usage: 0x{:x}, width: {}, height: {}, name: {}",
                record.format, record.usage, record.width, record.height, record.name
            )
            .unwrap();
        }

        drop(guard);
        out
    }

    /// Snapshot the live records for structured diagnostics
    pub fn snapshot(&self) -> Vec<AllocationRecord> {
        let Some(guard) = self.gate.try_write_for(DUMP_LOCK_TIMEOUT) else {
            return Vec::new();
        };

        let live = self
            .total_allocated
            .load(Ordering::Acquire)
            .min(self.capacity() as u64) as usize;

        let records = self
            .slots
            .iter()
            .take(live)
            .filter_map(|slot| slot.lock().clone())
            .collect();

        drop(guard);
        records
    }
}
