use rowforge_core::{FieldValue, Row, RowRef};

#[test]
fn serializes_row_deterministically() {
    let mut row = Row::new("Contact", 2, 1);
    row.insert("name", FieldValue::from("Ada"));
    row.insert("account", FieldValue::pointer("Account", 1));

    let json = serde_json::to_string_pretty(&row).expect("serialize row");
    let expected = r#"{
  "table": "Contact",
  "id": 2,
  "child_index": 1,
  "values": {
    "name": {
      "type": "text",
      "value": "Ada"
    },
    "account": {
      "type": "reference",
      "value": {
        "table": "Account",
        "id": 1
      }
    }
  }
}"#;
    assert_eq!(json, expected);
}

#[test]
fn stored_rows_come_back_with_unresolved_references() {
    let json = r#"{
        "table": "Opportunity",
        "id": 4,
        "values": {
            "account": {"type": "reference", "value": {"table": "Account", "id": 9}},
            "closed": {"type": "null"}
        }
    }"#;

    let row: Row = serde_json::from_str(json).expect("deserialize row");
    assert_eq!(row.child_index(), 0);
    assert_eq!(row.field("closed"), Some(FieldValue::Null));
    match row.value("account") {
        Some(FieldValue::Reference(RowRef::Unresolved(pointer))) => {
            assert_eq!((pointer.table.as_str(), pointer.id), ("Account", 9));
        }
        other => panic!("unexpected account value {other:?}"),
    }
}
