use super::*;

#[test]
fn chunk_ids_are_derived_from_document_and_index() {
    assert_eq!(chunk_id("doc1", 0), "doc1-0");
    assert_eq!(chunk_id("doc1", 12), "doc1-12");

    let chunk = Chunk::new("notes", 3, "Some text");
    assert_eq!(chunk.id, "notes-3");
    assert_eq!(chunk.document_id, "notes");
    assert_eq!(chunk.index, 3);
    assert!(chunk.metadata.is_empty());
}

#[test]
fn metadata_serialization() {
    let mut nested = BTreeMap::new();
    nested.insert("page".to_string(), MetadataValue::Number(4.0));
    nested.insert("draft".to_string(), MetadataValue::Bool(false));

    let mut metadata = Metadata::new();
    metadata.insert(HEADING_KEY.to_string(), "Installation".into());
    metadata.insert("source".to_string(), "guide.md".into());
    metadata.insert("location".to_string(), MetadataValue::Map(nested));

    let json = serde_json::to_string(&metadata).expect("can serialize json");
    let parsed: Metadata = serde_json::from_str(&json).expect("can parse json");
    assert_eq!(parsed, metadata);

    let chunk = Chunk::new("doc", 0, "body").with_metadata(parsed);
    assert_eq!(chunk.heading(), Some("Installation"));
}

#[test]
fn metadata_accepts_plain_json() {
    let parsed: Metadata =
        serde_json::from_str(r#"{"count": 3, "title": "Intro", "flag": true, "nested": {"a": "b"}}"#)
            .expect("can parse json");

    assert_eq!(parsed.get("count"), Some(&MetadataValue::Number(3.0)));
    assert_eq!(parsed.get("title").and_then(MetadataValue::as_str), Some("Intro"));
    assert_eq!(parsed.get("flag"), Some(&MetadataValue::Bool(true)));
    assert!(matches!(parsed.get("nested"), Some(MetadataValue::Map(_))));
}

#[test]
fn metadata_rejects_unsupported_kinds() {
    assert!(serde_json::from_str::<Metadata>(r#"{"list": [1, 2]}"#).is_err());
    assert!(serde_json::from_str::<Metadata>(r#"{"missing": null}"#).is_err());
}

#[test]
fn non_finite_numbers_are_detected_at_any_depth() {
    assert!(MetadataValue::Number(1.5).is_finite());
    assert!(MetadataValue::from("text").is_finite());
    assert!(!MetadataValue::Number(f64::NAN).is_finite());
    assert!(!MetadataValue::Number(f64::NEG_INFINITY).is_finite());

    let mut inner = BTreeMap::new();
    inner.insert("score".to_string(), MetadataValue::Number(f64::INFINITY));
    let mut outer = BTreeMap::new();
    outer.insert("ok".to_string(), MetadataValue::Bool(true));
    outer.insert("inner".to_string(), MetadataValue::Map(inner));
    assert!(!MetadataValue::Map(outer).is_finite());
}

#[test]
fn search_result_heading() {
    let mut metadata = Metadata::new();
    metadata.insert(HEADING_KEY.to_string(), MetadataValue::Number(1.0));
    let result = SearchResult {
        chunk_id: "doc-0".to_string(),
        document_id: "doc".to_string(),
        content: "text".to_string(),
        similarity: 0.5,
        metadata,
    };

    // Non-string heading values are ignored
    assert_eq!(result.heading(), None);
}
