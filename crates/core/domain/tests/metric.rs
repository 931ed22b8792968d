use domain::{FieldValue, Metric};
use std::collections::BTreeMap;

#[test]
fn metric_builds_and_renders() {
    let mut tags = BTreeMap::new();
    tags.insert("id".to_string(), "ns=2;s=temp".to_string());
    tags.insert("site".to_string(), "plant-1".to_string());
    let mut fields = BTreeMap::new();
    fields.insert("Quality".to_string(), FieldValue::from("OK"));
    fields.insert("temp".to_string(), FieldValue::F64(21.5));

    let metric = Metric::new("opcua", tags, fields, 1000);

    assert_eq!(metric.tag("id"), Some("ns=2;s=temp"));
    assert_eq!(metric.field("temp"), Some(&FieldValue::F64(21.5)));
    assert_eq!(
        metric.to_string(),
        "opcua,id=ns=2;s=temp,site=plant-1 Quality=\"OK\",temp=21.5 1000"
    );
}

#[test]
fn field_value_conversions() {
    assert_eq!(FieldValue::from(3i64), FieldValue::I64(3));
    assert_eq!(FieldValue::from(3u64), FieldValue::U64(3));
    assert_eq!(FieldValue::from(true), FieldValue::Bool(true));
    assert_eq!(FieldValue::from("x".to_string()), FieldValue::String("x".to_string()));
}
