//! Type-keyed metadata dispatch
//!
//! Metadata is addressed by a (namespace, id) pair. The standard namespace
//! is a closed enumeration dispatched exhaustively below; any other
//! namespace is vendor-defined and resolved through the mapper's open
//! handler table. Values travel as little-endian byte vectors.

use std::os::fd::AsRawFd;

use crate::descriptor::BufferDescriptor;
use crate::error::{MonetError, Result};
use crate::format;
use crate::handle::ImportedHandle;
use crate::shared_metadata::{BlendMode, Cta861_3, Dataspace, Rect, Smpte2086, XyColor};
use crate::usage::BufferUsage;

/// Namespace of the closed standard enumeration
pub const STANDARD_METADATA_TYPE_NAME: &str = "monet.graphics.StandardMetadataType";

/// Namespace of the built-in vendor extension fields
pub const MONET_METADATA_TYPE_NAME: &str = "monet.graphics.MonetMetadataType";

/// Vendor field id: raw plane file descriptors
pub const MONET_PLANE_FDS: u64 = 1;

const COMPRESSION_TYPE_NAME: &str = "monet.graphics.Compression";
const INTERLACED_TYPE_NAME: &str = "monet.graphics.Interlaced";
const CHROMA_SITING_TYPE_NAME: &str = "monet.graphics.ChromaSiting";

/// A metadata field identifier: namespace string plus numeric id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetadataType {
    pub name: String,
    pub value: u64,
}

impl MetadataType {
    pub fn new(name: impl Into<String>, value: u64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn standard(ty: StandardMetadataType) -> Self {
        Self::new(STANDARD_METADATA_TYPE_NAME, ty as u64)
    }

    /// The empty namespace is accepted as an alias for the standard one.
    pub fn is_standard(&self) -> bool {
        self.name.is_empty() || self.name == STANDARD_METADATA_TYPE_NAME
    }
}

/// The closed set of standard metadata fields. Dispatch over this enum is
/// exhaustive; adding a field is a compile-time visible protocol change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum StandardMetadataType {
    BufferId = 1,
    Name = 2,
    Width = 3,
    Height = 4,
    LayerCount = 5,
    PixelFormatRequested = 6,
    PixelFormatFourcc = 7,
    PixelFormatModifier = 8,
    Usage = 9,
    AllocationSize = 10,
    ProtectedContent = 11,
    Compression = 12,
    Interlaced = 13,
    ChromaSiting = 14,
    PlaneLayouts = 15,
    Crop = 16,
    Dataspace = 17,
    BlendMode = 18,
    Smpte2086 = 19,
    Cta861_3 = 20,
    Smpte2094_40 = 21,
    Stride = 22,
}

impl StandardMetadataType {
    /// Every standard field, in protocol order
    pub const ALL: [StandardMetadataType; 22] = [
        Self::BufferId,
        Self::Name,
        Self::Width,
        Self::Height,
        Self::LayerCount,
        Self::PixelFormatRequested,
        Self::PixelFormatFourcc,
        Self::PixelFormatModifier,
        Self::Usage,
        Self::AllocationSize,
        Self::ProtectedContent,
        Self::Compression,
        Self::Interlaced,
        Self::ChromaSiting,
        Self::PlaneLayouts,
        Self::Crop,
        Self::Dataspace,
        Self::BlendMode,
        Self::Smpte2086,
        Self::Cta861_3,
        Self::Smpte2094_40,
        Self::Stride,
    ];

    /// The fields a per-buffer dump walks: everything except `Stride`,
    /// which duplicates the plane layout information.
    pub const DUMPABLE: [StandardMetadataType; 21] = [
        Self::BufferId,
        Self::Name,
        Self::Width,
        Self::Height,
        Self::LayerCount,
        Self::PixelFormatRequested,
        Self::PixelFormatFourcc,
        Self::PixelFormatModifier,
        Self::Usage,
        Self::AllocationSize,
        Self::ProtectedContent,
        Self::Compression,
        Self::Interlaced,
        Self::ChromaSiting,
        Self::PlaneLayouts,
        Self::Crop,
        Self::Dataspace,
        Self::BlendMode,
        Self::Smpte2086,
        Self::Cta861_3,
        Self::Smpte2094_40,
    ];

    pub fn from_value(value: u64) -> Option<Self> {
        Self::ALL.iter().copied().find(|ty| *ty as u64 == value)
    }

    /// Region-stored fields are settable; handle-derived fields are not.
    pub fn is_settable(self) -> bool {
        matches!(
            self,
            Self::Dataspace
                | Self::BlendMode
                | Self::Smpte2086
                | Self::Cta861_3
                | Self::Smpte2094_40
                | Self::Crop
        )
    }
}

/// Description of one supported metadata field
#[derive(Debug, Clone)]
pub struct MetadataTypeDescription {
    pub metadata_type: MetadataType,
    /// Standard fields need no description; vendor fields carry one
    pub description: &'static str,
    pub is_gettable: bool,
    pub is_settable: bool,
}

/// One dumped field value
#[derive(Debug, Clone)]
pub struct MetadataDump {
    pub metadata_type: MetadataType,
    pub metadata: Vec<u8>,
}

/// All dumped fields of one buffer
#[derive(Debug, Clone, Default)]
pub struct BufferDump {
    pub metadata: Vec<MetadataDump>,
}

/// Vendor metadata handler, one per namespace
pub trait VendorMetadata: Send + Sync {
    fn namespace(&self) -> &'static str;
    fn get(&self, handle: &ImportedHandle, value: u64) -> Result<Vec<u8>>;
    fn set(&self, handle: &ImportedHandle, value: u64, bytes: &[u8]) -> Result<()>;
    fn describe(&self) -> Vec<MetadataTypeDescription>;
}

/// Built-in vendor handler exposing the raw plane fds of a buffer
#[derive(Debug, Default)]
pub struct PlaneFdsMetadata;

impl VendorMetadata for PlaneFdsMetadata {
    fn namespace(&self) -> &'static str {
        MONET_METADATA_TYPE_NAME
    }

    fn get(&self, handle: &ImportedHandle, value: u64) -> Result<Vec<u8>> {
        if value != MONET_PLANE_FDS {
            return Err(MonetError::unsupported(format!(
                "unknown vendor metadata id {}",
                value
            )));
        }
        let raw = handle.raw();
        let mut out = Vec::new();
        enc::u64(&mut out, raw.plane_info.len() as u64);
        for (idx, _) in raw.plane_info.iter().enumerate() {
            // Planes share the backing allocation unless the handle carries
            // one fd per plane.
            let fd_idx = if raw.fds.len() == raw.plane_info.len() {
                idx
            } else {
                0
            };
            enc::i32(&mut out, raw.fds[fd_idx].as_raw_fd());
        }
        Ok(out)
    }

    fn set(&self, _handle: &ImportedHandle, _value: u64, _bytes: &[u8]) -> Result<()> {
        Err(MonetError::unsupported("plane fds are read-only"))
    }

    fn describe(&self) -> Vec<MetadataTypeDescription> {
        vec![MetadataTypeDescription {
            metadata_type: MetadataType::new(MONET_METADATA_TYPE_NAME, MONET_PLANE_FDS),
            description: "Vector of file descriptors of each plane",
            is_gettable: true,
            is_settable: false,
        }]
    }
}

/// Little-endian value encoding shared by get, set and dump
pub(crate) mod enc {
    pub fn u32(out: &mut Vec<u8>, val: u32) {
        out.extend_from_slice(&val.to_le_bytes());
    }

    pub fn u64(out: &mut Vec<u8>, val: u64) {
        out.extend_from_slice(&val.to_le_bytes());
    }

    pub fn i32(out: &mut Vec<u8>, val: i32) {
        out.extend_from_slice(&val.to_le_bytes());
    }

    pub fn f32(out: &mut Vec<u8>, val: f32) {
        out.extend_from_slice(&val.to_le_bytes());
    }

    pub fn string(out: &mut Vec<u8>, val: &str) {
        u64(out, val.len() as u64);
        out.extend_from_slice(val.as_bytes());
    }

    /// Namespaced tag value (name plus numeric id)
    pub fn extendable(out: &mut Vec<u8>, name: &str, value: i64) {
        string(out, name);
        out.extend_from_slice(&value.to_le_bytes());
    }

    pub fn read_u32(bytes: &[u8]) -> Option<u32> {
        Some(u32::from_le_bytes(bytes.get(..4)?.try_into().ok()?))
    }

    pub fn read_i32(bytes: &[u8]) -> Option<i32> {
        Some(i32::from_le_bytes(bytes.get(..4)?.try_into().ok()?))
    }

    pub fn read_f32(bytes: &[u8]) -> Option<f32> {
        Some(f32::from_le_bytes(bytes.get(..4)?.try_into().ok()?))
    }
}

/// Presence word leading every optional-struct wire value
const PRESENT: u32 = 1;
const ABSENT: u32 = 0;

fn encode_optional(payload: Option<Vec<u8>>) -> Vec<u8> {
    let mut out = Vec::new();
    match payload {
        Some(bytes) => {
            enc::u32(&mut out, PRESENT);
            out.extend_from_slice(&bytes);
        }
        None => enc::u32(&mut out, ABSENT),
    }
    out
}

fn encode_smpte2086(value: &Smpte2086) -> Vec<u8> {
    let mut out = Vec::new();
    for color in [
        &value.primary_red,
        &value.primary_green,
        &value.primary_blue,
        &value.white_point,
    ] {
        enc::f32(&mut out, color.x);
        enc::f32(&mut out, color.y);
    }
    enc::f32(&mut out, value.max_luminance);
    enc::f32(&mut out, value.min_luminance);
    out
}

fn decode_smpte2086(bytes: &[u8]) -> Option<Smpte2086> {
    if bytes.len() != 40 {
        return None;
    }
    let f = |idx: usize| enc::read_f32(&bytes[idx * 4..]).unwrap();
    Some(Smpte2086 {
        primary_red: XyColor { x: f(0), y: f(1) },
        primary_green: XyColor { x: f(2), y: f(3) },
        primary_blue: XyColor { x: f(4), y: f(5) },
        white_point: XyColor { x: f(6), y: f(7) },
        max_luminance: f(8),
        min_luminance: f(9),
    })
}

fn encode_rect(rect: &Rect) -> Vec<u8> {
    let mut out = Vec::new();
    enc::i32(&mut out, rect.left);
    enc::i32(&mut out, rect.top);
    enc::i32(&mut out, rect.right);
    enc::i32(&mut out, rect.bottom);
    out
}

fn decode_rect(bytes: &[u8]) -> Option<Rect> {
    if bytes.len() != 16 {
        return None;
    }
    Some(Rect {
        left: enc::read_i32(&bytes[0..])?,
        top: enc::read_i32(&bytes[4..])?,
        right: enc::read_i32(&bytes[8..])?,
        bottom: enc::read_i32(&bytes[12..])?,
    })
}

/// Read one standard field from an imported buffer. Handle-derived fields
/// come from the immutable handle; region-stored fields from the shared
/// metadata block.
pub fn get_standard_metadata(handle: &ImportedHandle, ty: StandardMetadataType) -> Result<Vec<u8>> {
    let raw = handle.raw();
    let region = handle.metadata();
    let mut out = Vec::new();

    match ty {
        StandardMetadataType::BufferId => enc::u64(&mut out, raw.buffer_id),
        StandardMetadataType::Name => enc::string(&mut out, &region.name()),
        StandardMetadataType::Width => enc::u64(&mut out, raw.width as u64),
        StandardMetadataType::Height => enc::u64(&mut out, raw.height as u64),
        StandardMetadataType::LayerCount => enc::u64(&mut out, raw.layer_count as u64),
        StandardMetadataType::PixelFormatRequested => enc::u32(&mut out, raw.format),
        StandardMetadataType::PixelFormatFourcc => {
            let fourcc = format::format_info(raw.format).map(|info| info.fourcc).unwrap_or(0);
            enc::u32(&mut out, fourcc);
        }
        StandardMetadataType::PixelFormatModifier => enc::u64(&mut out, 0),
        StandardMetadataType::Usage => enc::u64(&mut out, raw.usage),
        StandardMetadataType::AllocationSize => enc::u64(&mut out, raw.alloc_size),
        StandardMetadataType::ProtectedContent => {
            let protected = raw.usage & BufferUsage::PROTECTED.bits() != 0;
            enc::u64(&mut out, protected as u64);
        }
        StandardMetadataType::Compression => {
            enc::extendable(&mut out, COMPRESSION_TYPE_NAME, 0);
        }
        StandardMetadataType::Interlaced => {
            enc::extendable(&mut out, INTERLACED_TYPE_NAME, 0);
        }
        StandardMetadataType::ChromaSiting => {
            enc::extendable(&mut out, CHROMA_SITING_TYPE_NAME, 0);
        }
        StandardMetadataType::PlaneLayouts => {
            enc::u64(&mut out, raw.plane_info.len() as u64);
            for plane in &raw.plane_info {
                enc::u64(&mut out, plane.offset);
                enc::u64(&mut out, plane.byte_stride);
                enc::u64(&mut out, plane.alloc_width);
                enc::u64(&mut out, plane.alloc_height);
                enc::u64(&mut out, plane.hsub as u64);
                enc::u64(&mut out, plane.vsub as u64);
                enc::u64(&mut out, plane.byte_stride * plane.alloc_height);
            }
        }
        StandardMetadataType::Crop => {
            // Unset crop reads as the full buffer rect.
            let rect = region.crop().unwrap_or(Rect {
                left: 0,
                top: 0,
                right: raw.width as i32,
                bottom: raw.height as i32,
            });
            out = encode_rect(&rect);
        }
        StandardMetadataType::Dataspace => {
            enc::u32(&mut out, region.dataspace().unwrap_or(Dataspace::UNKNOWN).0);
        }
        StandardMetadataType::BlendMode => {
            enc::u32(&mut out, region.blend_mode().unwrap_or(BlendMode::INVALID).0);
        }
        StandardMetadataType::Smpte2086 => {
            out = encode_optional(region.smpte2086().map(|v| encode_smpte2086(&v)));
        }
        StandardMetadataType::Cta861_3 => {
            out = encode_optional(region.cta861_3().map(|v| {
                let mut payload = Vec::new();
                enc::f32(&mut payload, v.max_content_light_level);
                enc::f32(&mut payload, v.max_frame_average_light_level);
                payload
            }));
        }
        StandardMetadataType::Smpte2094_40 => {
            out = encode_optional(region.smpte2094_40());
        }
        StandardMetadataType::Stride => enc::u64(&mut out, raw.pixel_stride as u64),
    }

    Ok(out)
}

/// Write one standard field. Read-only fields and byte-size mismatches are
/// `Unsupported`; a failed set never partially writes.
pub fn set_standard_metadata(
    handle: &ImportedHandle,
    ty: StandardMetadataType,
    bytes: &[u8],
) -> Result<()> {
    if !ty.is_settable() {
        return Err(MonetError::unsupported(format!(
            "metadata type {:?} is read-only",
            ty
        )));
    }

    let region = handle.metadata();
    let size_mismatch =
        || MonetError::unsupported(format!("wrong payload size {} for {:?}", bytes.len(), ty));

    match ty {
        StandardMetadataType::Dataspace => {
            if bytes.len() != 4 {
                return Err(size_mismatch());
            }
            region.set_dataspace(Dataspace(enc::read_u32(bytes).unwrap()));
        }
        StandardMetadataType::BlendMode => {
            if bytes.len() != 4 {
                return Err(size_mismatch());
            }
            region.set_blend_mode(BlendMode(enc::read_u32(bytes).unwrap()));
        }
        StandardMetadataType::Crop => {
            let rect = decode_rect(bytes).ok_or_else(size_mismatch)?;
            region.set_crop(rect);
        }
        StandardMetadataType::Smpte2086 => {
            let value = decode_optional_payload(bytes, 40).ok_or_else(size_mismatch)?;
            region.set_smpte2086(value.map(|payload| decode_smpte2086(payload).unwrap()));
        }
        StandardMetadataType::Cta861_3 => {
            let value = decode_optional_payload(bytes, 8).ok_or_else(size_mismatch)?;
            region.set_cta861_3(value.map(|payload| Cta861_3 {
                max_content_light_level: enc::read_f32(&payload[0..]).unwrap(),
                max_frame_average_light_level: enc::read_f32(&payload[4..]).unwrap(),
            }));
        }
        StandardMetadataType::Smpte2094_40 => {
            let value = decode_optional_blob(bytes).ok_or_else(size_mismatch)?;
            region.set_smpte2094_40(value)?;
        }
        _ => unreachable!("is_settable covers the settable set"),
    }

    Ok(())
}

/// Split a presence-word payload with a fixed body size
fn decode_optional_payload(bytes: &[u8], body_len: usize) -> Option<Option<&[u8]>> {
    let flag = enc::read_u32(bytes)?;
    match flag {
        ABSENT if bytes.len() == 4 => Some(None),
        PRESENT if bytes.len() == 4 + body_len => Some(Some(&bytes[4..])),
        _ => None,
    }
}

/// Split a presence-word payload whose body length is implied
fn decode_optional_blob(bytes: &[u8]) -> Option<Option<&[u8]>> {
    let flag = enc::read_u32(bytes)?;
    match flag {
        ABSENT if bytes.len() == 4 => Some(None),
        PRESENT => Some(Some(&bytes[4..])),
        _ => None,
    }
}

/// Pre-allocation metadata query answered from the descriptor alone.
/// Only fields derivable without an allocation are supported.
pub fn get_from_descriptor(descriptor: &BufferDescriptor, ty: &MetadataType) -> Result<Vec<u8>> {
    if !ty.is_standard() {
        return Err(MonetError::unsupported(format!(
            "vendor metadata {} is not available before allocation",
            ty.name
        )));
    }
    let standard = StandardMetadataType::from_value(ty.value)
        .ok_or_else(|| MonetError::unsupported(format!("unknown standard metadata id {}", ty.value)))?;

    let mut out = Vec::new();
    match standard {
        StandardMetadataType::Name => enc::string(&mut out, &descriptor.name),
        StandardMetadataType::Width => enc::u64(&mut out, descriptor.width as u64),
        StandardMetadataType::Height => enc::u64(&mut out, descriptor.height as u64),
        StandardMetadataType::LayerCount => enc::u64(&mut out, descriptor.layer_count as u64),
        StandardMetadataType::PixelFormatRequested => enc::u32(&mut out, descriptor.format),
        StandardMetadataType::Usage => enc::u64(&mut out, crate::usage::mask_usage(descriptor.usage)),
        _ => {
            return Err(MonetError::unsupported(format!(
                "metadata type {:?} requires an allocated buffer",
                standard
            )))
        }
    }
    Ok(out)
}
