
use pretty_assertions::assert_eq;
use wevt::WevtError;
use wevt::manifest::Manifest;

use fixtures::{MANIFEST, ensure_logger};

#[test]
fn it_parses_the_manifest_fixture() {
    ensure_logger();

    let manifest = Manifest::parse(&MANIFEST).unwrap();
    assert_eq!(manifest.header.provider_count, 1);
    assert_eq!(manifest.number_of_providers(), 1);

    let provider = manifest.provider_by_index(0).unwrap();
    assert!(
        provider
            .guid
            .to_string()
            .eq_ignore_ascii_case("06a2ea53-fc6c-42e5-9176-18749ab2ca13")
    );

    // One event, one template; the scalar sections are present but empty.
    assert_eq!(provider.number_of_events(), 1);
    assert_eq!(provider.number_of_channels(), 0);
    assert_eq!(provider.number_of_opcodes(), 0);
    assert_eq!(provider.number_of_levels(), 0);
    assert_eq!(provider.number_of_tasks(), 0);
    assert_eq!(provider.number_of_keywords(), 0);
    assert_eq!(provider.number_of_templates(), 1);

    let event = provider.event_by_identifier(1).unwrap();
    assert_eq!(event.identifier, 1);
    assert_eq!(event.detail.version(), 1);

    let template = provider.template_by_index(0).unwrap();
    assert!(
        template
            .guid
            .to_string()
            .eq_ignore_ascii_case("278a1233-f665-5252-0ba7-2bca597433a8")
    );
    assert!(template.is_managed);
    assert!(!template.binxml.is_empty());

    // The event's template offset resolves to that template.
    let linked = provider
        .template_by_offset(event.template_offset.unwrap())
        .unwrap();
    assert_eq!(linked.offset, template.offset);
}

#[test]
fn provider_lookup_by_guid() {
    ensure_logger();

    let manifest = Manifest::parse(&MANIFEST).unwrap();
    let guid = manifest.providers[0].guid.clone();
    assert!(manifest.provider_by_guid(&guid).is_some());
}

#[test]
fn recorded_offsets_stay_inside_the_buffer() {
    ensure_logger();

    let manifest = Manifest::parse(&MANIFEST).unwrap();
    let len = manifest.data.len() as u32;
    for provider in &manifest.providers {
        for offset in [
            provider.channels_offset,
            provider.events_offset,
            provider.keywords_offset,
            provider.levels_offset,
            provider.maps_offset,
            provider.opcodes_offset,
            provider.tasks_offset,
            provider.templates_offset,
        ] {
            assert!(offset < len);
        }
        for template in &provider.templates {
            assert!(template.offset + template.size <= len);
        }
    }
}

#[test]
fn corrupted_signature_is_rejected() {
    ensure_logger();

    let mut data = MANIFEST;
    data[0..4].copy_from_slice(&[0xff, 0xff, 0xff, 0xff]);
    assert!(matches!(
        Manifest::parse(&data),
        Err(WevtError::UnsupportedSignature { offset: 0, .. })
    ));
}

#[test]
fn truncated_manifest_is_rejected() {
    ensure_logger();

    assert!(Manifest::parse(&MANIFEST[..12]).is_err());
    assert!(Manifest::parse(&[]).is_err());

    // Declared size larger than the buffer.
    let mut data = MANIFEST[..64].to_vec();
    data[4..8].copy_from_slice(&(65u32).to_le_bytes());
    assert!(Manifest::parse(&data).is_err());
}

/// Minimal CRIM → WEVT → CHAN + KEYW + MAPS with size-prefixed name strings.
fn synthetic_manifest() -> Vec<u8> {
    let guid: [u8; 16] = [
        0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff,
        0x00,
    ];

    let chan_off: u32 = 80;
    let keyw_off: u32 = 108;
    let maps_off: u32 = 136;
    let name1_off: u32 = 172;
    let name2_off: u32 = 184;
    let total: u32 = 200;

    let mut data = Vec::with_capacity(total as usize);
    data.extend_from_slice(b"CRIM");
    data.extend_from_slice(&total.to_le_bytes());
    data.extend_from_slice(&3u16.to_le_bytes());
    data.extend_from_slice(&1u16.to_le_bytes());
    data.extend_from_slice(&1u32.to_le_bytes());

    data.extend_from_slice(&guid);
    data.extend_from_slice(&36u32.to_le_bytes());

    // WEVT header + 3 descriptors, no unknown2 entries.
    assert_eq!(data.len(), 36);
    data.extend_from_slice(b"WEVT");
    data.extend_from_slice(&(total - 36).to_le_bytes());
    data.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
    data.extend_from_slice(&3u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    for offset in [chan_off, keyw_off, maps_off] {
        data.extend_from_slice(&offset.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
    }

    assert_eq!(data.len(), chan_off as usize);
    data.extend_from_slice(b"CHAN");
    data.extend_from_slice(&28u32.to_le_bytes());
    data.extend_from_slice(&1u32.to_le_bytes());
    data.extend_from_slice(&5u32.to_le_bytes()); // identifier
    data.extend_from_slice(&name1_off.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&0xffff_ffffu32.to_le_bytes());

    assert_eq!(data.len(), keyw_off as usize);
    data.extend_from_slice(b"KEYW");
    data.extend_from_slice(&28u32.to_le_bytes());
    data.extend_from_slice(&1u32.to_le_bytes());
    data.extend_from_slice(&0x10u64.to_le_bytes()); // identifier
    data.extend_from_slice(&0x0aceu32.to_le_bytes());
    data.extend_from_slice(&name2_off.to_le_bytes());

    // MAPS: two 8-byte maps, the first implied after the offset vector.
    assert_eq!(data.len(), maps_off as usize);
    data.extend_from_slice(b"MAPS");
    data.extend_from_slice(&36u32.to_le_bytes());
    data.extend_from_slice(&2u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&164u32.to_le_bytes());
    data.extend_from_slice(b"VMAP");
    data.extend_from_slice(&[0u8; 4]);
    data.extend_from_slice(b"BMAP");
    data.extend_from_slice(&[0u8; 4]);

    assert_eq!(data.len(), name1_off as usize);
    data.extend_from_slice(&12u32.to_le_bytes());
    for unit in "Ops\0".encode_utf16() {
        data.extend_from_slice(&unit.to_le_bytes());
    }

    assert_eq!(data.len(), name2_off as usize);
    data.extend_from_slice(&16u32.to_le_bytes());
    for unit in "Admin\0".encode_utf16() {
        data.extend_from_slice(&unit.to_le_bytes());
    }

    assert_eq!(data.len(), total as usize);
    data
}

#[test]
fn it_parses_a_synthetic_manifest_with_names_and_maps() {
    ensure_logger();

    let data = synthetic_manifest();
    let manifest = Manifest::parse(&data).unwrap();
    let provider = manifest.provider_by_index(0).unwrap();

    let channel = provider.channel_by_index(0).unwrap();
    assert_eq!(channel.identifier, 5);
    assert_eq!(channel.name.as_deref(), Some("Ops"));
    assert_eq!(channel.message_identifier, None);

    let keyword = provider.keyword_by_index(0).unwrap();
    assert_eq!(keyword.identifier, 0x10);
    assert_eq!(keyword.message_identifier, Some(0x0ace));
    assert_eq!(keyword.name.as_deref(), Some("Admin"));

    assert_eq!(provider.number_of_maps(), 2);
    assert_eq!(&provider.map_by_index(0).unwrap().signature, b"VMAP");
    assert_eq!(&provider.map_by_index(1).unwrap().signature, b"BMAP");
    assert_eq!(provider.map_by_index(0).unwrap().data.len(), 8);
}

#[test]
fn unrecognized_section_tag_is_silently_ignored() {
    ensure_logger();

    let mut data = synthetic_manifest();
    // Rewriting the CHAN tag turns its descriptor into an unknown one; the
    // descriptor table is forward-extensible, so the section just vanishes.
    data[80..84].copy_from_slice(b"XXXX");
    let manifest = Manifest::parse(&data).unwrap();
    let provider = manifest.provider_by_index(0).unwrap();
    assert_eq!(provider.channels_offset, 0);
    assert_eq!(provider.number_of_channels(), 0);
    assert_eq!(provider.number_of_keywords(), 1);
}

#[test]
fn oversized_section_count_is_rejected() {
    ensure_logger();

    let mut data = synthetic_manifest();
    // CHAN count at offset 88.
    data[88..92].copy_from_slice(&0x00ff_ffffu32.to_le_bytes());
    assert!(Manifest::parse(&data).is_err());
}

#[test]
fn oversized_provider_count_is_rejected() {
    ensure_logger();

    let mut data = MANIFEST;
    data[12..16].copy_from_slice(&(0x1000_0000u32).to_le_bytes());
    assert!(matches!(
        Manifest::parse(&data),
        Err(WevtError::TruncatedInput { .. }) | Err(WevtError::ValueOutOfBounds { .. })
    ));
}
