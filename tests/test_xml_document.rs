
use encoding::all::WINDOWS_1252;
use pretty_assertions::assert_eq;

use wevt::WevtError;
use wevt::binxml::{XmlDocument, XmlDocumentFlags, XmlTagKind};

use fixtures::{XML_DOCUMENT, ensure_logger};

fn read_fixture() -> XmlDocument {
    XmlDocument::read_with_template_values(
        &XML_DOCUMENT,
        0,
        WINDOWS_1252,
        XmlDocumentFlags::HAS_DATA_OFFSETS,
        None,
    )
    .unwrap()
}

#[test]
fn it_evaluates_the_event_record_fixture() {
    ensure_logger();

    let document = read_fixture();
    let root = document.root().unwrap();

    assert_eq!(root.kind(), XmlTagKind::Element);
    assert_eq!(root.name(), "Event");
    assert_eq!(root.number_of_attributes(), 1);
    assert_eq!(
        root.attribute_by_name("xmlns").unwrap().value_string(),
        "http://schemas.microsoft.com/win/2004/08/events/event"
    );
    assert_eq!(root.number_of_elements(), 2);

    let system = root.element_by_name("System").unwrap();
    let provider = system.element_by_name("Provider").unwrap();
    assert_eq!(
        provider.attribute_by_name("Name").unwrap().value_string(),
        "ESENT"
    );

    let event_id = system.element_by_name("EventID").unwrap();
    assert_eq!(event_id.value_string(), "103");
    assert_eq!(
        event_id
            .attribute_by_name("Qualifiers")
            .unwrap()
            .value_string(),
        "0"
    );

    assert_eq!(system.element_by_name("Level").unwrap().value_string(), "4");
    assert_eq!(system.element_by_name("Task").unwrap().value_string(), "1");
    assert_eq!(
        system.element_by_name("Keywords").unwrap().value_string(),
        "0x8000000000000000"
    );
    assert_eq!(
        system
            .element_by_name("TimeCreated")
            .unwrap()
            .attribute_by_name("SystemTime")
            .unwrap()
            .value_string(),
        "2010-01-29T21:47:19.000000000Z"
    );
    assert_eq!(
        system
            .element_by_name("EventRecordID")
            .unwrap()
            .value_string(),
        "890"
    );
    assert_eq!(
        system.element_by_name("Channel").unwrap().value_string(),
        "Application"
    );
    assert_eq!(
        system.element_by_name("Computer").unwrap().value_string(),
        "WIN-3QMDJGKF3G9"
    );

    // The event data is a string array expanded into sibling elements.
    let event_data = root.element_by_name("EventData").unwrap();
    let values: Vec<String> = event_data
        .elements()
        .iter()
        .map(|e| e.value_string())
        .collect();
    assert_eq!(values, ["Windows", "2124", "Windows: ", "0"]);
}

#[test]
fn rendering_is_stable_and_non_empty() {
    ensure_logger();

    let document = read_fixture();
    let first = document.to_utf8_xml();
    assert!(!first.is_empty());
    assert!(first.starts_with("<Event"));

    let second = document.to_utf8_xml();
    assert_eq!(first, second);

    let utf16 = document.to_utf16_xml();
    assert_eq!(String::from_utf16(&utf16).unwrap(), first);
}

#[test]
fn truncated_document_is_rejected() {
    ensure_logger();

    assert!(
        XmlDocument::read(
            &XML_DOCUMENT[..11],
            0,
            WINDOWS_1252,
            XmlDocumentFlags::HAS_DATA_OFFSETS,
        )
        .is_err()
    );
}

#[test]
fn out_of_bounds_read_offset_is_rejected() {
    ensure_logger();

    assert!(matches!(
        XmlDocument::read(
            &XML_DOCUMENT,
            XML_DOCUMENT.len(),
            WINDOWS_1252,
            XmlDocumentFlags::HAS_DATA_OFFSETS,
        ),
        Err(WevtError::ValueOutOfBounds { .. })
    ));
}

#[test]
fn garbage_top_level_token_is_rejected() {
    ensure_logger();

    let data = [0x99u8, 0x00];
    assert!(matches!(
        XmlDocument::read(&data, 0, WINDOWS_1252, XmlDocumentFlags::empty()),
        Err(WevtError::UnsupportedToken { token: 0x99, .. })
    ));
}
