//! Buffer usage bitmask and the fixed valid-bits set

use bitflags::bitflags;

bitflags! {
    /// Combined producer/consumer usage bits for a buffer request.
    ///
    /// The values mirror the platform HAL usage enumeration so that usage
    /// masks travel unchanged across the wire.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferUsage: u64 {
        const CPU_READ_MASK = 0xf;
        const CPU_WRITE_MASK = 0xf << 4;
        const GPU_TEXTURE = 1 << 8;
        const GPU_RENDER_TARGET = 1 << 9;
        const COMPOSER_OVERLAY = 1 << 11;
        const COMPOSER_CLIENT_TARGET = 1 << 12;
        const PROTECTED = 1 << 14;
        const COMPOSER_CURSOR = 1 << 15;
        const VIDEO_ENCODER = 1 << 16;
        const CAMERA_OUTPUT = 1 << 17;
        const CAMERA_INPUT = 1 << 18;
        const RENDERSCRIPT = 1 << 20;
        const VIDEO_DECODER = 1 << 22;
        const SENSOR_DIRECT_DATA = 1 << 23;
        const GPU_DATA_BUFFER = 1 << 24;
        const GPU_CUBE_MAP = 1 << 25;
        const GPU_MIPMAP_COMPLETE = 1 << 26;
        const VENDOR_MASK = 0xf << 28;
        const VENDOR_MASK_HI = 0xffff << 48;
    }
}

/// Commonly read/written CPU usage shorthand
pub const CPU_USAGE_RARELY: u64 = 0x2;
pub const CPU_USAGE_OFTEN: u64 = 0x3;

/// The set of usage bits a descriptor is allowed to carry. Unknown bits
/// are masked off before the usage reaches heap selection or metadata.
pub const VALID_USAGE_BITS: u64 = BufferUsage::CPU_READ_MASK.bits()
    | BufferUsage::CPU_WRITE_MASK.bits()
    | BufferUsage::GPU_TEXTURE.bits()
    | BufferUsage::GPU_RENDER_TARGET.bits()
    | BufferUsage::COMPOSER_OVERLAY.bits()
    | BufferUsage::COMPOSER_CLIENT_TARGET.bits()
    | BufferUsage::PROTECTED.bits()
    | BufferUsage::COMPOSER_CURSOR.bits()
    | BufferUsage::VIDEO_ENCODER.bits()
    | BufferUsage::CAMERA_OUTPUT.bits()
    | BufferUsage::CAMERA_INPUT.bits()
    | BufferUsage::RENDERSCRIPT.bits()
    | BufferUsage::VIDEO_DECODER.bits()
    | BufferUsage::SENSOR_DIRECT_DATA.bits()
    | BufferUsage::GPU_DATA_BUFFER.bits()
    | BufferUsage::GPU_CUBE_MAP.bits()
    | BufferUsage::GPU_MIPMAP_COMPLETE.bits()
    | BufferUsage::VENDOR_MASK.bits()
    | BufferUsage::VENDOR_MASK_HI.bits();

/// Mask a raw usage value against the valid-bits set
pub fn mask_usage(usage: u64) -> u64 {
    usage & VALID_USAGE_BITS
}

/// Whether the usage requests CPU access in either direction
pub fn is_cpu_accessible(usage: u64) -> bool {
    usage & (BufferUsage::CPU_READ_MASK.bits() | BufferUsage::CPU_WRITE_MASK.bits()) != 0
}
