//! Tests for metadata dispatch over imported buffers

use monet::{
    adapter,
    format::pixel_format,
    mapper::{MetadataType, StandardMetadataType, MONET_METADATA_TYPE_NAME, MONET_PLANE_FDS},
    shared_metadata::Dataspace,
    Allocator, BufferDescriptor, BufferKey, Mapper, MonetError,
};

fn allocate_and_import(mapper: &Mapper, reserved: u64) -> (Allocator, BufferKey) {
    let request = BufferDescriptor {
        width: 640,
        height: 480,
        layer_count: 1,
        format: pixel_format::YV12,
        usage: monet::usage::CPU_USAGE_OFTEN,
        reserved_size: reserved,
        name: "metadata-test".to_string(),
    };

    let allocator = Allocator::with_defaults();
    let reply = adapter::stable::allocate(&allocator, &adapter::stable::encode(&request), 1);
    assert_eq!(reply.error_code, 0);

    let key = mapper.import_buffer(&reply.buffers[0]).unwrap();
    (allocator, key)
}

fn standard(ty: StandardMetadataType) -> MetadataType {
    MetadataType::standard(ty)
}

#[test]
fn set_on_read_only_type_is_unsupported() {
    let mapper = Mapper::new();
    let (_allocator, key) = allocate_and_import(&mapper, 0);

    for ty in [
        StandardMetadataType::Width,
        StandardMetadataType::BufferId,
        StandardMetadataType::Usage,
        StandardMetadataType::PlaneLayouts,
    ] {
        let err = mapper.set(key, &standard(ty), &[0u8; 8]).unwrap_err();
        assert!(
            matches!(err, MonetError::Unsupported { .. }),
            "set on {:?} must be Unsupported",
            ty
        );
    }
}

#[test]
fn set_then_get_returns_previous_bytes() {
    let mapper = Mapper::new();
    let (_allocator, key) = allocate_and_import(&mapper, 0);

    let dataspace = standard(StandardMetadataType::Dataspace);
    mapper.set(key, &dataspace, &7u32.to_le_bytes()).unwrap();
    assert_eq!(mapper.get(key, &dataspace).unwrap(), 7u32.to_le_bytes());

    let blend = standard(StandardMetadataType::BlendMode);
    mapper.set(key, &blend, &2u32.to_le_bytes()).unwrap();
    assert_eq!(mapper.get(key, &blend).unwrap(), 2u32.to_le_bytes());
}

#[test]
fn size_mismatch_is_unsupported_not_partial() {
    let mapper = Mapper::new();
    let (_allocator, key) = allocate_and_import(&mapper, 0);

    let dataspace = standard(StandardMetadataType::Dataspace);
    mapper.set(key, &dataspace, &9u32.to_le_bytes()).unwrap();

    let err = mapper.set(key, &dataspace, &[1u8, 2, 3]).unwrap_err();
    assert!(matches!(err, MonetError::Unsupported { .. }));

    // The previous value is intact; nothing was partially written.
    assert_eq!(mapper.get(key, &dataspace).unwrap(), 9u32.to_le_bytes());
}

#[test]
fn unknown_vendor_namespace_is_unsupported() {
    let mapper = Mapper::new();
    let (_allocator, key) = allocate_and_import(&mapper, 0);

    let foreign = MetadataType::new("acme.graphics.Secret", 1);
    assert!(matches!(
        mapper.get(key, &foreign).unwrap_err(),
        MonetError::Unsupported { .. }
    ));
    assert!(matches!(
        mapper.set(key, &foreign, &[0u8; 4]).unwrap_err(),
        MonetError::Unsupported { .. }
    ));

    let unknown_standard = MetadataType::new(
        monet::mapper::STANDARD_METADATA_TYPE_NAME,
        0x7fff_ffff,
    );
    assert!(matches!(
        mapper.get(key, &unknown_standard).unwrap_err(),
        MonetError::Unsupported { .. }
    ));
}

#[test]
fn dataspace_is_preset_from_the_format() {
    let mapper = Mapper::new();
    let (_allocator, key) = allocate_and_import(&mapper, 0);

    // YUV content defaults to BT.601-625 at allocation time, so a fresh
    // buffer reads a concrete dataspace rather than unset.
    let bytes = mapper.get(key, &standard(StandardMetadataType::Dataspace)).unwrap();
    assert_eq!(bytes, Dataspace::BT601_625.0.to_le_bytes());
}

#[test]
fn handle_derived_fields_read_from_the_handle() {
    let mapper = Mapper::new();
    let (_allocator, key) = allocate_and_import(&mapper, 0);

    let width = mapper.get(key, &standard(StandardMetadataType::Width)).unwrap();
    assert_eq!(width, 640u64.to_le_bytes());

    let name = mapper.get(key, &standard(StandardMetadataType::Name)).unwrap();
    let len = u64::from_le_bytes(name[..8].try_into().unwrap()) as usize;
    assert_eq!(&name[8..8 + len], b"metadata-test");

    let layouts = mapper
        .get(key, &standard(StandardMetadataType::PlaneLayouts))
        .unwrap();
    let planes = u64::from_le_bytes(layouts[..8].try_into().unwrap());
    assert_eq!(planes, 3, "YV12 carries three planes");
}

#[test]
fn unset_crop_reads_as_full_buffer() {
    let mapper = Mapper::new();
    let (_allocator, key) = allocate_and_import(&mapper, 0);

    let crop = standard(StandardMetadataType::Crop);
    let bytes = mapper.get(key, &crop).unwrap();
    let field = |idx: usize| i32::from_le_bytes(bytes[idx * 4..idx * 4 + 4].try_into().unwrap());
    assert_eq!((field(0), field(1), field(2), field(3)), (0, 0, 640, 480));

    let rect: Vec<u8> = [10i32, 20, 320, 240]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    mapper.set(key, &crop, &rect).unwrap();
    assert_eq!(mapper.get(key, &crop).unwrap(), rect);
}

#[test]
fn hdr_fields_carry_a_presence_word() {
    let mapper = Mapper::new();
    let (_allocator, key) = allocate_and_import(&mapper, 0);

    let smpte2086 = standard(StandardMetadataType::Smpte2086);
    let absent = mapper.get(key, &smpte2086).unwrap();
    assert_eq!(absent, 0u32.to_le_bytes());

    let mut payload = 1u32.to_le_bytes().to_vec();
    payload.extend((0..10).flat_map(|i| (i as f32).to_le_bytes()));
    mapper.set(key, &smpte2086, &payload).unwrap();
    assert_eq!(mapper.get(key, &smpte2086).unwrap(), payload);

    // Clearing through an absent write works too.
    mapper.set(key, &smpte2086, &0u32.to_le_bytes()).unwrap();
    assert_eq!(mapper.get(key, &smpte2086).unwrap(), 0u32.to_le_bytes());
}

#[test]
fn plane_fds_vendor_field_is_gettable_only() {
    let mapper = Mapper::new();
    let (_allocator, key) = allocate_and_import(&mapper, 0);

    let plane_fds = MetadataType::new(MONET_METADATA_TYPE_NAME, MONET_PLANE_FDS);
    let bytes = mapper.get(key, &plane_fds).unwrap();
    let count = u64::from_le_bytes(bytes[..8].try_into().unwrap());
    assert_eq!(count, 3);
    assert_eq!(bytes.len(), 8 + 3 * 4);

    assert!(matches!(
        mapper.set(key, &plane_fds, &[0u8; 4]).unwrap_err(),
        MonetError::Unsupported { .. }
    ));
}

#[test]
fn supported_type_listing_is_complete() {
    let mapper = Mapper::new();
    let descriptions = mapper.list_supported_metadata_types();
    assert_eq!(descriptions.len(), 23, "22 standard + 1 vendor entry");

    let settable = descriptions.iter().filter(|d| d.is_settable).count();
    assert_eq!(settable, 6);
    assert!(descriptions.iter().all(|d| d.is_gettable));

    // Standard entries carry empty descriptions; vendor entries do not.
    for desc in &descriptions {
        if desc.metadata_type.is_standard() {
            assert!(desc.description.is_empty());
        } else {
            assert!(!desc.description.is_empty());
        }
    }
}

#[test]
fn buffer_dump_walks_every_dumpable_field() {
    let mapper = Mapper::new();
    let (_allocator, key) = allocate_and_import(&mapper, 0);

    let dump = mapper.dump_buffer(key).unwrap();
    assert_eq!(dump.metadata.len(), 21);

    let all = mapper.dump_buffers();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].metadata.len(), 21);
}

#[test]
fn metadata_of_freed_buffer_is_bad_buffer() {
    let mapper = Mapper::new();
    let (_allocator, key) = allocate_and_import(&mapper, 0);
    mapper.free_buffer(key).unwrap();

    let err = mapper
        .get(key, &standard(StandardMetadataType::Width))
        .unwrap_err();
    assert!(matches!(err, MonetError::BadBuffer { .. }));
}
