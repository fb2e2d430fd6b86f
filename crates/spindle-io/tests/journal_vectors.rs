use spindle_core::tags;
use spindle_io::protocol::JournalEntry;

#[test]
fn parses_rpm_entry() {
    let raw = r#"{"timestamp_us":1500000,"field":"rpm","value":600.0}"#;

    let entry = JournalEntry::parse(raw).expect("rpm entry should parse");
    assert_eq!(entry.timestamp_us, 1_500_000);
    assert_eq!(entry.value.as_f64(), Some(600.0));
    assert_eq!(entry.tag().map(|t| t.key), Some(tags::RPM.key));
}

#[test]
fn parses_direction_entry() {
    let raw = r#"{
        "timestamp_us":42,
        "field":"direction_forward",
        "value":true
    }"#;

    let entry = JournalEntry::parse(raw).expect("direction entry should parse");
    assert_eq!(entry.value.as_bool(), Some(true));
    assert_eq!(entry.tag().map(|t| t.metric), Some("spindle_direction_forward"));
}

#[test]
fn unknown_field_has_no_tag() {
    let raw = r#"{"timestamp_us":1,"field":"coolant","value":false}"#;
    let entry = JournalEntry::parse(raw).expect("entry should parse");
    assert!(entry.tag().is_none());
}

#[test]
fn rejects_missing_timestamp() {
    let raw = r#"{"field":"rpm","value":1.0}"#;
    assert!(JournalEntry::parse(raw).is_err());
}

#[test]
fn serializes_with_tag_key() {
    let entry = JournalEntry::new(7, tags::EMERGENCY, true);
    let line = serde_json::to_string(&entry).expect("entry should serialize");
    assert_eq!(line, r#"{"timestamp_us":7,"field":"emergency","value":true}"#);
}
