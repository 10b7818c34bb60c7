//! Protocol-generation adapters
//!
//! Two transport generations coexist in the field: the legacy stack moves
//! descriptors as `u32` element vectors, the stable stack as plain bytes.
//! Both are thin translations onto the one canonical descriptor codec and
//! allocator; the core is written once.

pub mod legacy;
pub mod stable;

use crate::error::{Result, ERROR_CODE_NONE};
use crate::handle::RawHandle;

/// Allocation outcome flattened for a transport reply
#[derive(Debug)]
pub struct AllocationReply {
    /// Stable numeric error code; 0 is success
    pub error_code: i32,
    pub stride: u32,
    pub buffers: Vec<RawHandle>,
}

impl AllocationReply {
    pub(crate) fn from_result(result: Result<crate::allocator::AllocationResult>) -> Self {
        match result {
            Ok(result) => Self {
                error_code: ERROR_CODE_NONE,
                stride: result.stride,
                buffers: result.buffers,
            },
            Err(e) => Self {
                error_code: e.code(),
                stride: 0,
                buffers: Vec::new(),
            },
        }
    }
}
