//! Tests for `key` module

use super::key::*;

#[test]
fn test_identity_key_equality_includes_entity() {
    let a = IdentityKey::int("Order", 7);
    let b = IdentityKey::int("Invoice", 7);

    assert_ne!(a, b);
    assert_eq!(a, IdentityKey::int("Order", 7));
}

#[test]
fn test_composite_key_display() {
    let key = IdentityKey::new(
        "LineItem",
        PrimaryKey::new(vec![KeyValue::Int(42), KeyValue::from("sku-1")]),
    );

    assert_eq!(key.to_string(), "LineItem(42, 'sku-1')");
    assert_eq!(key.key().arity(), 2);
}

#[test]
fn test_key_ordering_is_columnwise() {
    let low = PrimaryKey::new(vec![KeyValue::Int(1), KeyValue::Int(9)]);
    let high = PrimaryKey::new(vec![KeyValue::Int(2), KeyValue::Int(0)]);

    assert!(low < high);
}

#[test]
fn test_key_value_serializes_with_column_kind() {
    let key = PrimaryKey::new(vec![KeyValue::Int(3), KeyValue::Text("x".into())]);

    let json = serde_json::to_string(&key).expect("serialize");

    assert_eq!(json, r#"[{"int":3},{"text":"x"}]"#);
}

#[test]
fn test_uuid_identity_survives_serde() {
    // Arrange - a UUID column and a text column holding the same string
    let id = uuid::Uuid::new_v4();
    let uuid_key = IdentityKey::new("Session", PrimaryKey::single(id));
    let text_key = IdentityKey::new("Session", PrimaryKey::single(id.to_string()));

    // Act
    let uuid_back: IdentityKey =
        serde_json::from_str(&serde_json::to_string(&uuid_key).expect("serialize"))
            .expect("deserialize");
    let text_back: IdentityKey =
        serde_json::from_str(&serde_json::to_string(&text_key).expect("serialize"))
            .expect("deserialize");

    // Assert
    assert_eq!(uuid_back, uuid_key);
    assert_eq!(text_back, text_key);
    assert_ne!(uuid_back, text_back);
}

#[test]
fn test_uuid_key_round_trips_through_display() {
    let id = uuid::Uuid::new_v4();
    let key = IdentityKey::new("Session", PrimaryKey::single(id));

    assert_eq!(key.to_string(), format!("Session({id})"));
    assert_eq!(key.key().values(), &[KeyValue::Uuid(id)]);
}
